//! Control channel protocol
//!
//! Defines the values exchanged between the bridge and its owning process:
//! command frames, forwarded message envelopes, the broker connection
//! settings a CONNECT command stores, and the bridge error taxonomy.
//!
//! Commands are multi-frame messages. The first frame names the command and
//! the remaining frames are consumed positionally:
//!
//! ```text
//! CONNECT   host port keepalive [bind_address]
//! SUBSCRIBE topic [topic ...]
//! PUBLISH   topic qos retain [payload]
//! START | STOP | VERBOSE | TERMINATE
//! ```
//!
//! Forwarded broker messages travel the other way as `[topic, payload]`.

mod command;
mod envelope;
mod error;
mod server;

pub use command::{parse_lenient_int, Command, Frames};
pub use envelope::MessageEnvelope;
pub use error::BridgeError;
pub use server::{ServerConfig, MIN_KEEPALIVE};

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    /// Parse the QoS field of a PUBLISH command.
    ///
    /// Only the first byte is significant: `'1'` and `'2'` select the
    /// matching level, anything else (including an empty field) is QoS 0.
    pub fn from_field(field: &[u8]) -> Self {
        match field.first() {
            Some(b'1') => QoS::AtLeastOnce,
            Some(b'2') => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

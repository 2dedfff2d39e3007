//! Bridge error types

use std::fmt;

use crate::engine::EngineError;

/// Failures reported by the bridge.
///
/// None of these stop the bridge loop. They are logged where they happen
/// and sent to the owning process as `BridgeEvent::Error`.
#[derive(Debug)]
pub enum BridgeError {
    /// The engine refused to initiate the connection; START must be sent again
    ConnectInitiation(EngineError),
    /// The engine refused a publish; the message was dropped
    Publish { topic: String, source: EngineError },
    /// The engine refused to replay a subscription after connecting
    Subscribe { topic: String, source: EngineError },
    /// Unknown command or missing fields on the control channel
    ProtocolViolation(String),
    /// Process-wide engine library state could not be set up or torn down
    Library(String),
    /// The other side of the control channel is gone
    Closed,
    /// OS error, e.g. while spawning the bridge thread
    Io(std::io::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::ConnectInitiation(e) => {
                write!(f, "Can't connect to broker, run START again: {}", e)
            }
            BridgeError::Publish { topic, source } => {
                write!(f, "Message on topic {} not published: {}", topic, source)
            }
            BridgeError::Subscribe { topic, source } => {
                write!(f, "Subscription to {} failed: {}", topic, source)
            }
            BridgeError::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            BridgeError::Library(msg) => write!(f, "Engine library error: {}", msg),
            BridgeError::Closed => write!(f, "Control channel closed"),
            BridgeError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::ConnectInitiation(e) => Some(e),
            BridgeError::Publish { source, .. } | BridgeError::Subscribe { source, .. } => {
                Some(source)
            }
            BridgeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e)
    }
}

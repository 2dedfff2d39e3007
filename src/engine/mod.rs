//! MQTT client engine abstraction
//!
//! The bridge never speaks the broker protocol itself. It drives an engine
//! through the [`Engine`] trait and receives broker events through
//! [`EngineCallbacks`], which the engine invokes on its own network thread
//! or task, never on the bridge thread.
//!
//! Implementations:
//! - [`rumqtt::RumqttEngine`]: network engine built on `rumqttc`
//! - [`memory::MemoryEngine`]: loopback engine attached to an in-process
//!   [`memory::MemoryBroker`]

pub mod library;
pub mod memory;
pub mod rumqtt;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::{QoS, ServerConfig};

pub use memory::{MemoryBroker, MemoryEngine};
pub use rumqtt::RumqttEngine;

/// Error type for engine operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The network context has not been started
    NotRunning,
    /// No connection has been initiated
    NotConnected,
    /// Connection settings are unusable
    InvalidConfig(String),
    /// The engine's request queue is full
    QueueFull,
    /// The engine refused the operation
    Rejected(String),
    /// The runtime hosting the engine is unavailable
    Runtime(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotRunning => write!(f, "Network loop not running"),
            EngineError::NotConnected => write!(f, "Not connected"),
            EngineError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            EngineError::QueueFull => write!(f, "Request queue full"),
            EngineError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            EngineError::Runtime(msg) => write!(f, "Runtime unavailable: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Result of a connection attempt, as reported to `on_connect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The broker accepted the connection
    Accepted,
    /// The broker refused the connection
    Refused(String),
}

impl ConnectOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ConnectOutcome::Accepted)
    }
}

/// Operations available to callbacks while they run on the engine context
pub trait EngineSession {
    /// Request a subscription; must not block
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), EngineError>;
}

/// Callbacks invoked by the engine on its own execution context.
///
/// Implementations must not block.
pub trait EngineCallbacks: Send + Sync {
    /// Called after every connection attempt, including automatic reconnects
    fn on_connect(&self, session: &dyn EngineSession, outcome: ConnectOutcome);

    /// Called for every message received on a subscribed topic
    fn on_message(&self, topic: &str, payload: Bytes);
}

/// An MQTT client engine owning its own network execution context
pub trait Engine: Send {
    /// Register the callbacks used by subsequently started network contexts
    fn set_callbacks(&mut self, callbacks: Arc<dyn EngineCallbacks>);

    /// Launch the network execution context
    fn start_network(&mut self) -> Result<(), EngineError>;

    /// Halt the network execution context, blocking until it has stopped.
    /// Does nothing when it is not running.
    fn stop_network(&mut self);

    /// Initiate a connection; completion is reported through `on_connect`
    fn connect_async(&mut self, server: &ServerConfig) -> Result<(), EngineError>;

    /// Drop the current connection. Safe to call when not connected.
    fn disconnect(&mut self) -> Result<(), EngineError>;

    /// Queue a message for publishing
    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError>;
}

/// Reject settings no engine can connect with
pub(crate) fn check_server(server: &ServerConfig) -> Result<u16, EngineError> {
    if server.host.is_empty() {
        return Err(EngineError::InvalidConfig("no host configured".into()));
    }
    server
        .port
        .ok_or_else(|| EngineError::InvalidConfig("no valid port configured".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_server() {
        let mut server = ServerConfig::default();
        assert!(matches!(
            check_server(&server),
            Err(EngineError::InvalidConfig(_))
        ));

        server.update("localhost".into(), 0, 10, None);
        assert!(check_server(&server).is_err());

        server.update("localhost".into(), 1883, 10, None);
        assert_eq!(check_server(&server), Ok(1883));
    }
}

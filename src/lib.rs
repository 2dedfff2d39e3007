//! mqlink - MQTT client bridge
//!
//! Runs an MQTT client connection on its own worker thread and exposes it to
//! the owning process through a multi-frame command channel. The owner
//! configures the connection, registers subscriptions, starts and stops the
//! engine and publishes; every message the broker delivers comes back over
//! the same channel in arrival order.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod subscriptions;
pub mod topic;

pub use bridge::{Bridge, BridgeEvent, BridgeHandle, BridgeState};
pub use config::Config;
pub use engine::{Engine, EngineError};
pub use protocol::{BridgeError, Command, MessageEnvelope, QoS};
pub use subscriptions::SubscriptionSet;

//! MQTT Bridge
//!
//! Runs a broker connection as an independent worker and exposes it through
//! a control channel. The owning process sends commands; the bridge sends
//! back every message received on a subscribed topic.
//!
//! # Threads
//!
//! - The **bridge thread** runs the event loop ([`Bridge::run`]) and the
//!   [`Dispatcher`]. It alone writes the connection settings and the
//!   subscription registry, and performs publishes.
//! - The **engine context** belongs to the engine. It invokes the connect
//!   and message callbacks, which only read the registry (to replay
//!   subscriptions) and write to the bridge transport.
//!
//! ```text
//! owner --commands--> loop --> dispatcher --> engine (connect, publish)
//! engine callbacks --transport--> loop --events--> owner
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mqlink::bridge::{BridgeEvent, BridgeHandle};
//! use mqlink::engine::RumqttEngine;
//! use mqlink::protocol::Command;
//!
//! let bridge = BridgeHandle::spawn(RumqttEngine::new())?;
//! bridge.send(Command::Connect {
//!     host: "127.0.0.1".into(),
//!     port: 1883,
//!     keepalive: 10,
//!     bind_address: None,
//! })?;
//! bridge.send(Command::Subscribe(vec!["sensors/#".into()]))?;
//! bridge.send(Command::Start)?;
//!
//! while let Ok(event) = bridge.recv() {
//!     if let BridgeEvent::Message(msg) = event {
//!         println!("{}: {:?}", msg.topic(), msg.payload());
//!     }
//! }
//! # Ok::<(), mqlink::protocol::BridgeError>(())
//! ```

mod actor;
mod dispatcher;
mod handle;
mod lifecycle;
pub mod transport;


pub use actor::{Bridge, BridgeEvent};
pub use dispatcher::{BridgeState, Dispatcher};
pub use handle::BridgeHandle;
pub use lifecycle::{BridgeCallbacks, ConnectionManager};

//! Control-plane dispatcher
//!
//! Executes one control command at a time on the bridge thread. It owns
//! the connection settings and is the only writer of the subscription
//! registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::lifecycle::{BridgeCallbacks, ConnectionManager};
use super::transport::TransportSender;
use crate::engine::Engine;
use crate::protocol::{BridgeError, Command, Frames, ServerConfig};
use crate::subscriptions::{SharedSubscriptions, SubscriptionSet};
use crate::topic::validate_topic_filter;

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    /// Engine stopped
    #[default]
    Idle,
    /// START succeeded and no STOP followed
    Running,
    /// TERMINATE received; absorbing
    Terminated,
}

pub struct Dispatcher {
    state: BridgeState,
    server: ServerConfig,
    subscriptions: SharedSubscriptions,
    lifecycle: ConnectionManager,
    verbose: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Create a dispatcher driving `engine`; inbound messages go to `transport`
    pub fn new(engine: Box<dyn Engine>, transport: TransportSender) -> Self {
        let subscriptions = SubscriptionSet::shared();
        let verbose = Arc::new(AtomicBool::new(false));
        let callbacks = Arc::new(BridgeCallbacks::new(
            subscriptions.clone(),
            transport,
            verbose.clone(),
        ));

        Self {
            state: BridgeState::Idle,
            server: ServerConfig::default(),
            subscriptions,
            lifecycle: ConnectionManager::new(engine, callbacks),
            verbose,
        }
    }

    /// Parse and execute one control message
    pub fn handle(&mut self, frames: Frames) -> Result<(), BridgeError> {
        let command = Command::parse(frames).map_err(|e| {
            error!("{}", e);
            e
        })?;
        self.execute(command)
    }

    pub fn execute(&mut self, command: Command) -> Result<(), BridgeError> {
        if self.state == BridgeState::Terminated {
            debug!("Ignoring {} after termination", command.name());
            return Ok(());
        }
        if self.is_verbose() {
            info!("Command: {}", command);
        }

        match command {
            Command::Connect {
                host,
                port,
                keepalive,
                bind_address,
            } => {
                self.server.update(host, port, keepalive, bind_address);
                if self.server.port.is_none() {
                    warn!("CONNECT without a valid port ({})", port);
                }
                if self.state == BridgeState::Running {
                    warn!("CONNECT while running takes effect on the next START");
                }
                debug!(
                    "Server set to {} (keepalive={}s, bind={})",
                    self.server.endpoint(),
                    self.server.keepalive,
                    self.server.bind_address
                );
            }
            Command::Subscribe(topics) => {
                let mut subscriptions = self.subscriptions.write();
                for topic in topics {
                    if let Err(reason) = validate_topic_filter(&topic) {
                        warn!("Topic filter '{}' may be refused: {}", topic, reason);
                    }
                    subscriptions.add(&topic);
                }
                if self.state == BridgeState::Running {
                    debug!("Subscriptions take effect on the next connect");
                }
            }
            Command::Publish {
                topic,
                qos,
                retain,
                payload,
            } => {
                self.lifecycle
                    .publish(&topic, payload, qos, retain)
                    .map_err(|source| {
                        warn!("Message on topic {} not published: {}", topic, source);
                        BridgeError::Publish { topic, source }
                    })?;
            }
            Command::Start => {
                if self.state == BridgeState::Running {
                    warn!("START ignored, bridge already running");
                    return Ok(());
                }
                self.lifecycle.start(&self.server)?;
                self.state = BridgeState::Running;
            }
            Command::Stop => {
                self.lifecycle.stop();
                self.state = BridgeState::Idle;
            }
            Command::Verbose => {
                self.verbose.store(true, Ordering::Relaxed);
                info!("Verbose logging enabled");
            }
            Command::Terminate => self.terminate(),
        }
        Ok(())
    }

    /// Stop the engine and enter the terminal state
    pub fn terminate(&mut self) {
        if self.state == BridgeState::Terminated {
            return;
        }
        self.lifecycle.stop();
        self.state = BridgeState::Terminated;
        info!("Bridge terminated");
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == BridgeState::Terminated
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Copy of the registered subscriptions
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.subscriptions.read().clone()
    }
}

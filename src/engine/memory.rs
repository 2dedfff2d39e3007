//! In-process loopback broker and engine
//!
//! [`MemoryBroker`] routes publishes between the [`MemoryEngine`]s attached
//! to it using MQTT topic filter matching, and keeps retained messages.
//! Each engine runs its own network thread that invokes the callbacks, so
//! the threading seen by a bridge matches a network engine. Sessions are
//! clean: a reconnect forgets the client's subscriptions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{check_server, ConnectOutcome, Engine, EngineCallbacks, EngineError, EngineSession};
use crate::protocol::{QoS, ServerConfig};
use crate::topic::{topic_matches_filter, validate_topic_filter, validate_topic_name};

/// Work delivered to an engine's network thread
enum NetworkEvent {
    Connected(ConnectOutcome),
    Message { topic: String, payload: Bytes },
    Shutdown,
}

struct ClientSlot {
    inbox: Sender<NetworkEvent>,
    filters: Vec<String>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    clients: HashMap<u64, ClientSlot>,
    retained: BTreeMap<String, Bytes>,
    refuse: Option<String>,
}

/// In-process MQTT-like broker shared by [`MemoryEngine`]s
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine attached to this broker
    pub fn engine(&self) -> MemoryEngine {
        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            state.next_id
        };
        MemoryEngine {
            broker: self.clone(),
            id,
            callbacks: None,
            network: None,
        }
    }

    /// Number of connected engines
    pub fn connected_clients(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn is_connected(&self, client_id: u64) -> bool {
        self.state.lock().clients.contains_key(&client_id)
    }

    /// Active subscriptions of a client, in subscription order
    pub fn subscriptions(&self, client_id: u64) -> Vec<String> {
        self.state
            .lock()
            .clients
            .get(&client_id)
            .map(|c| c.filters.clone())
            .unwrap_or_default()
    }

    /// Last retained payload for a topic
    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.state.lock().retained.get(topic).cloned()
    }

    /// Refuse further connection attempts with `reason`, or accept them again with `None`
    pub fn refuse_connections(&self, reason: Option<String>) {
        self.state.lock().refuse = reason;
    }

    /// Drop every session and let the clients reconnect.
    ///
    /// Subscriptions are forgotten and each engine receives a fresh
    /// successful connect, as after a broker restart.
    pub fn restart(&self) {
        let mut state = self.state.lock();
        for slot in state.clients.values_mut() {
            slot.filters.clear();
            let _ = slot
                .inbox
                .send(NetworkEvent::Connected(ConnectOutcome::Accepted));
        }
        debug!("Memory broker restarted ({} clients)", state.clients.len());
    }

    fn attach(&self, client_id: u64, inbox: Sender<NetworkEvent>) -> ConnectOutcome {
        let mut state = self.state.lock();
        let outcome = match &state.refuse {
            Some(reason) => ConnectOutcome::Refused(reason.clone()),
            None => {
                state.clients.insert(
                    client_id,
                    ClientSlot {
                        inbox: inbox.clone(),
                        filters: Vec::new(),
                    },
                );
                ConnectOutcome::Accepted
            }
        };
        let _ = inbox.send(NetworkEvent::Connected(outcome.clone()));
        outcome
    }

    fn detach(&self, client_id: u64) -> bool {
        self.state.lock().clients.remove(&client_id).is_some()
    }

    fn subscribe(&self, client_id: u64, filter: &str) -> Result<(), EngineError> {
        validate_topic_filter(filter).map_err(|e| EngineError::Rejected(e.to_string()))?;

        let mut state = self.state.lock();
        let BrokerState {
            clients, retained, ..
        } = &mut *state;
        let slot = clients
            .get_mut(&client_id)
            .ok_or(EngineError::NotConnected)?;

        if !slot.filters.iter().any(|f| f == filter) {
            slot.filters.push(filter.to_string());
        }
        for (topic, payload) in retained.iter() {
            if topic_matches_filter(topic, filter) {
                let _ = slot.inbox.send(NetworkEvent::Message {
                    topic: topic.clone(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    fn route(&self, topic: &str, payload: Bytes, retain: bool) -> Result<usize, EngineError> {
        validate_topic_name(topic).map_err(|e| EngineError::Rejected(e.to_string()))?;

        let mut state = self.state.lock();
        if retain {
            if payload.is_empty() {
                state.retained.remove(topic);
            } else {
                state.retained.insert(topic.to_string(), payload.clone());
            }
        }

        let mut delivered = 0;
        for slot in state.clients.values() {
            if slot.filters.iter().any(|f| topic_matches_filter(topic, f)) {
                let _ = slot.inbox.send(NetworkEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
                delivered += 1;
            }
        }
        trace!("Memory broker: {} delivered to {} clients", topic, delivered);
        Ok(delivered)
    }
}

struct Network {
    inbox: Sender<NetworkEvent>,
    thread: JoinHandle<()>,
}

/// Engine connected to a [`MemoryBroker`]
pub struct MemoryEngine {
    broker: MemoryBroker,
    id: u64,
    callbacks: Option<Arc<dyn EngineCallbacks>>,
    network: Option<Network>,
}

impl MemoryEngine {
    /// Identifier of this engine on its broker
    pub fn client_id(&self) -> u64 {
        self.id
    }
}

struct MemorySession {
    broker: MemoryBroker,
    id: u64,
}

impl EngineSession for MemorySession {
    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), EngineError> {
        self.broker.subscribe(self.id, topic)
    }
}

impl Engine for MemoryEngine {
    fn set_callbacks(&mut self, callbacks: Arc<dyn EngineCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    fn start_network(&mut self) -> Result<(), EngineError> {
        if self.network.is_some() {
            return Ok(());
        }

        let (inbox, events) = unbounded();
        let callbacks = self.callbacks.clone();
        let session = MemorySession {
            broker: self.broker.clone(),
            id: self.id,
        };
        let thread = thread::Builder::new()
            .name(format!("mqlink-memory-{}", self.id))
            .spawn(move || {
                for event in events.iter() {
                    match event {
                        NetworkEvent::Connected(outcome) => {
                            if let Some(callbacks) = &callbacks {
                                callbacks.on_connect(&session, outcome);
                            }
                        }
                        NetworkEvent::Message { topic, payload } => {
                            if let Some(callbacks) = &callbacks {
                                callbacks.on_message(&topic, payload);
                            }
                        }
                        NetworkEvent::Shutdown => break,
                    }
                }
            })
            .map_err(|e| EngineError::Runtime(e.to_string()))?;

        self.network = Some(Network { inbox, thread });
        Ok(())
    }

    fn stop_network(&mut self) {
        let Some(network) = self.network.take() else {
            return;
        };
        let _ = network.inbox.send(NetworkEvent::Shutdown);
        if network.thread.join().is_err() {
            debug!("Memory engine {}: network thread panicked", self.id);
        }
    }

    fn connect_async(&mut self, server: &ServerConfig) -> Result<(), EngineError> {
        check_server(server)?;
        let network = self.network.as_ref().ok_or(EngineError::NotRunning)?;
        let outcome = self.broker.attach(self.id, network.inbox.clone());
        debug!("Memory engine {}: connect {:?}", self.id, outcome);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), EngineError> {
        self.broker.detach(self.id);
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        _qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError> {
        if !self.broker.is_connected(self.id) {
            return Err(EngineError::NotConnected);
        }
        self.broker.route(topic, payload, retain)?;
        Ok(())
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        self.stop_network();
        self.broker.detach(self.id);
    }
}

//! Connection lifecycle
//!
//! Sequences engine start/stop/connect/disconnect for the dispatcher and
//! provides the engine callbacks. On every successful (re)connect the
//! callbacks replay all registered subscriptions at QoS 0; inbound
//! messages are handed to the bridge loop through the transport only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use super::transport::{Inbound, TransportSender};
use crate::engine::{ConnectOutcome, Engine, EngineCallbacks, EngineError, EngineSession};
use crate::protocol::{BridgeError, MessageEnvelope, QoS, ServerConfig};
use crate::subscriptions::SharedSubscriptions;

/// Callbacks the bridge registers with its engine
pub struct BridgeCallbacks {
    subscriptions: SharedSubscriptions,
    transport: TransportSender,
    verbose: Arc<AtomicBool>,
}

impl BridgeCallbacks {
    pub fn new(
        subscriptions: SharedSubscriptions,
        transport: TransportSender,
        verbose: Arc<AtomicBool>,
    ) -> Self {
        Self {
            subscriptions,
            transport,
            verbose,
        }
    }

    fn replay(&self, session: &dyn EngineSession) {
        let topics: Vec<String> = self
            .subscriptions
            .read()
            .iter()
            .map(str::to_string)
            .collect();

        for topic in topics {
            if let Err(error) = session.subscribe(&topic, QoS::AtMostOnce) {
                error!("Subscription to {} failed: {}", topic, error);
                self.transport
                    .send(Inbound::SubscribeFailed { topic, error });
            } else if self.verbose.load(Ordering::Relaxed) {
                info!("Subscribed to {}", topic);
            }
        }
    }
}

impl EngineCallbacks for BridgeCallbacks {
    fn on_connect(&self, session: &dyn EngineSession, outcome: ConnectOutcome) {
        match outcome {
            ConnectOutcome::Accepted => {
                debug!("Connected, replaying subscriptions");
                self.replay(session);
            }
            ConnectOutcome::Refused(reason) => {
                warn!("Broker refused connection: {}", reason);
            }
        }
    }

    fn on_message(&self, topic: &str, payload: Bytes) {
        if self.verbose.load(Ordering::Relaxed) {
            info!("Received {} ({} bytes)", topic, payload.len());
        }
        if !self
            .transport
            .send(Inbound::Message(MessageEnvelope::new(topic, payload)))
        {
            debug!("Bridge loop gone, dropping message on {}", topic);
        }
    }
}

/// Owns the engine and drives its lifecycle
pub struct ConnectionManager {
    engine: Box<dyn Engine>,
}

impl ConnectionManager {
    /// Take ownership of `engine` and register `callbacks` with it
    pub fn new(mut engine: Box<dyn Engine>, callbacks: Arc<BridgeCallbacks>) -> Self {
        engine.set_callbacks(callbacks);
        Self { engine }
    }

    /// Launch the network context and initiate the connection.
    ///
    /// When the connection cannot be initiated the network context is
    /// stopped again; nothing is retried.
    pub fn start(&mut self, server: &ServerConfig) -> Result<(), BridgeError> {
        if let Err(e) = self.engine.start_network() {
            error!("Can't start network loop: {}", e);
            return Err(BridgeError::ConnectInitiation(e));
        }

        if let Err(e) = self.engine.connect_async(server) {
            error!(
                "Can't connect to {}, run START again: {}",
                server.endpoint(),
                e
            );
            self.engine.stop_network();
            return Err(BridgeError::ConnectInitiation(e));
        }

        info!("Connecting to {}", server.endpoint());
        Ok(())
    }

    /// Halt the network context and disconnect. Safe when already stopped.
    pub fn stop(&mut self) {
        self.engine.stop_network();
        if let Err(e) = self.engine.disconnect() {
            warn!("Disconnect failed: {}", e);
        }
    }

    /// Publish through the engine, on the caller's thread
    pub fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError> {
        self.engine.publish(topic, payload, qos, retain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::transport;
    use crate::subscriptions::SubscriptionSet;
    use parking_lot::Mutex;

    /// Session recording subscribe calls, failing for one topic
    struct FakeSession {
        calls: Mutex<Vec<(String, QoS)>>,
        fail_on: Option<&'static str>,
    }

    impl EngineSession for FakeSession {
        fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), EngineError> {
            if self.fail_on == Some(topic) {
                return Err(EngineError::Rejected("not allowed".into()));
            }
            self.calls.lock().push((topic.to_string(), qos));
            Ok(())
        }
    }

    fn callbacks(topics: &[&str]) -> (BridgeCallbacks, transport::TransportReceiver) {
        let subscriptions = SubscriptionSet::shared();
        subscriptions.write().extend(topics.iter().copied());
        let (tx, rx) = transport::channel();
        (
            BridgeCallbacks::new(subscriptions, tx, Arc::new(AtomicBool::new(false))),
            rx,
        )
    }

    #[test]
    fn test_replay_in_order_at_qos0() {
        let (cb, _rx) = callbacks(&["TEST", "TEST2", "TOPIC", "SOME MORE"]);
        let session = FakeSession {
            calls: Mutex::new(Vec::new()),
            fail_on: None,
        };

        cb.on_connect(&session, ConnectOutcome::Accepted);
        cb.on_connect(&session, ConnectOutcome::Accepted);

        let calls = session.calls.lock();
        let topics: Vec<&str> = calls.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            vec!["TEST", "TEST2", "TOPIC", "SOME MORE", "TEST", "TEST2", "TOPIC", "SOME MORE"]
        );
        assert!(calls.iter().all(|(_, qos)| *qos == QoS::AtMostOnce));
    }

    #[test]
    fn test_refused_connect_does_not_subscribe() {
        let (cb, _rx) = callbacks(&["a"]);
        let session = FakeSession {
            calls: Mutex::new(Vec::new()),
            fail_on: None,
        };
        cb.on_connect(&session, ConnectOutcome::Refused("bad credentials".into()));
        assert!(session.calls.lock().is_empty());
    }

    #[test]
    fn test_failed_replay_is_reported_and_continues() {
        let (cb, rx) = callbacks(&["a", "b", "c"]);
        let session = FakeSession {
            calls: Mutex::new(Vec::new()),
            fail_on: Some("b"),
        };
        cb.on_connect(&session, ConnectOutcome::Accepted);

        assert_eq!(session.calls.lock().len(), 2);
        match rx.try_recv().unwrap() {
            Inbound::SubscribeFailed { topic, error } => {
                assert_eq!(topic, "b");
                assert_eq!(error, EngineError::Rejected("not allowed".into()));
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_on_message_enqueues_envelope() {
        let (cb, rx) = callbacks(&[]);
        cb.on_message("TOPIC", Bytes::from_static(b"HELLO, FRAME"));
        cb.on_message("empty", Bytes::new());

        match rx.try_recv().unwrap() {
            Inbound::Message(env) => {
                assert_eq!(env.topic(), "TOPIC");
                assert_eq!(&env.payload().unwrap()[..], b"HELLO, FRAME");
            }
            other => panic!("unexpected item {:?}", other),
        }
        match rx.try_recv().unwrap() {
            Inbound::Message(env) => assert!(env.payload().is_none()),
            other => panic!("unexpected item {:?}", other),
        }
    }
}

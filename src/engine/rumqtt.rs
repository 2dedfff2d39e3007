//! Network engine built on `rumqttc`
//!
//! The network context is a task on the shared library runtime (see
//! [`super::library`]) that polls the rumqttc event loop and invokes the
//! bridge callbacks from there. The event loop reconnects on its own after
//! a connection error, so every reconnect reaches `on_connect` again.
//!
//! Stopping the network hands a connected event loop back to the engine
//! instead of dropping it, so that [`Engine::disconnect`] can still send
//! DISCONNECT to the broker.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet,
};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    check_server, library, ConnectOutcome, Engine, EngineCallbacks, EngineError, EngineSession,
};
use crate::protocol::{QoS, ServerConfig};

/// Default capacity of the client request queue
pub const DEFAULT_CAPACITY: usize = 1024;

/// Pause between reconnection attempts after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for writing DISCONNECT on a stopped connection
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<ClientError> for EngineError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::TryRequest(_) => EngineError::QueueFull,
            ClientError::Request(_) => EngineError::Rejected(e.to_string()),
        }
    }
}

/// Event loop and client handed to the network task once a connect is issued
type Connection = (EventLoop, AsyncClient);

struct NetworkTask {
    runtime: Handle,
    task: JoinHandle<Option<EventLoop>>,
    connection_tx: Option<oneshot::Sender<Connection>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// Connected event loop kept after the network task stopped
struct Parked {
    runtime: Handle,
    eventloop: EventLoop,
}

/// MQTT engine backed by `rumqttc`
pub struct RumqttEngine {
    client_id: String,
    capacity: usize,
    callbacks: Option<Arc<dyn EngineCallbacks>>,
    network: Option<NetworkTask>,
    parked: Option<Parked>,
    client: Option<AsyncClient>,
}

impl RumqttEngine {
    /// Create an engine with a random client identifier
    pub fn new() -> Self {
        Self::with_options("mqlink", DEFAULT_CAPACITY)
    }

    /// Create an engine whose client identifier starts with `prefix`
    pub fn with_options(prefix: &str, capacity: usize) -> Self {
        Self {
            client_id: format!("{}-{}", prefix, uuid::Uuid::new_v4()),
            capacity: capacity.max(1),
            callbacks: None,
            network: None,
            parked: None,
            client: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn mqtt_options(&self, server: &ServerConfig, port: u16) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), server.host.clone(), port);
        options
            .set_keep_alive(Duration::from_secs(server.keepalive as u64))
            .set_clean_session(false);
        options
    }
}

impl Default for RumqttEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for RumqttEngine {
    fn set_callbacks(&mut self, callbacks: Arc<dyn EngineCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    fn start_network(&mut self) -> Result<(), EngineError> {
        if self.network.is_some() {
            return Ok(());
        }
        self.parked = None;

        let runtime = library::handle()
            .ok_or_else(|| EngineError::Runtime("engine library not initialized".into()))?;
        let (connection_tx, connection_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let callbacks = self.callbacks.clone();
        let client_id = self.client_id.clone();
        let task = runtime.spawn(network_loop(
            client_id,
            connection_rx,
            shutdown_rx,
            callbacks,
        ));

        self.network = Some(NetworkTask {
            runtime,
            task,
            connection_tx: Some(connection_tx),
            shutdown_tx: Some(shutdown_tx),
        });
        debug!("Engine {}: network loop started", self.client_id);
        Ok(())
    }

    fn stop_network(&mut self) {
        let Some(mut network) = self.network.take() else {
            return;
        };

        if let Some(shutdown_tx) = network.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        match network.runtime.block_on(network.task) {
            Ok(Some(eventloop)) => {
                self.parked = Some(Parked {
                    runtime: network.runtime,
                    eventloop,
                });
            }
            Ok(None) => {}
            Err(e) => warn!("Engine {}: network loop failed: {}", self.client_id, e),
        }
        debug!("Engine {}: network loop stopped", self.client_id);
    }

    fn connect_async(&mut self, server: &ServerConfig) -> Result<(), EngineError> {
        let port = check_server(server)?;
        let network = self.network.as_mut().ok_or(EngineError::NotRunning)?;
        let connection_tx = network
            .connection_tx
            .take()
            .ok_or_else(|| EngineError::Rejected("connect already issued".into()))?;

        if server.bind_address != server.host {
            debug!(
                "Engine {}: bind address {} not applied, rumqttc picks the local interface",
                self.client_id, server.bind_address
            );
        }

        let options = self.mqtt_options(server, port);
        let (client, eventloop) = AsyncClient::new(options, self.capacity);
        connection_tx
            .send((eventloop, client.clone()))
            .map_err(|_| EngineError::NotRunning)?;
        self.client = Some(client);

        info!(
            "Engine {}: connecting to {}:{} (keepalive={}s)",
            self.client_id, server.host, port, server.keepalive
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), EngineError> {
        let parked = self.parked.take();
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        match parked {
            Some(Parked {
                runtime,
                mut eventloop,
            }) => {
                client.try_disconnect()?;
                let flushed = runtime.block_on(async {
                    tokio::time::timeout(DISCONNECT_TIMEOUT, flush_disconnect(&mut eventloop)).await
                });
                match flushed {
                    Ok(result) => result?,
                    Err(_) => return Err(EngineError::Runtime("DISCONNECT not sent in time".into())),
                }
                info!("Engine {}: disconnected", self.client_id);
            }
            // The running loop writes the request itself
            None if self.network.is_some() => client.try_disconnect()?,
            None => debug!("Engine {}: not connected, nothing to disconnect", self.client_id),
        }
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError> {
        let client = self.client.as_ref().ok_or(EngineError::NotConnected)?;
        client.try_publish(topic, qos.into(), retain, payload.to_vec())?;
        Ok(())
    }
}

impl Drop for RumqttEngine {
    fn drop(&mut self) {
        if let Some(network) = self.network.take() {
            network.task.abort();
        }
    }
}

struct RumqttSession {
    client: AsyncClient,
}

impl EngineSession for RumqttSession {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), EngineError> {
        self.client.try_subscribe(topic, qos.into())?;
        Ok(())
    }
}

/// Drive the event loop until the queued DISCONNECT has been written
async fn flush_disconnect(eventloop: &mut EventLoop) -> Result<(), EngineError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(EngineError::Runtime(e.to_string())),
        }
    }
}

/// Poll the event loop until shut down.
///
/// Returns the event loop if it is connected at shutdown.
async fn network_loop(
    client_id: String,
    connection_rx: oneshot::Receiver<Connection>,
    mut shutdown_rx: oneshot::Receiver<()>,
    callbacks: Option<Arc<dyn EngineCallbacks>>,
) -> Option<EventLoop> {
    let (mut eventloop, client) = tokio::select! {
        connection = connection_rx => connection.ok()?,
        _ = &mut shutdown_rx => return None,
    };
    let session = RumqttSession { client };
    let mut connected = false;

    loop {
        let event = tokio::select! {
            _ = &mut shutdown_rx => return connected.then_some(eventloop),
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let outcome = if ack.code == ConnectReturnCode::Success {
                    info!("Engine {}: connected", client_id);
                    connected = true;
                    ConnectOutcome::Accepted
                } else {
                    ConnectOutcome::Refused(format!("{:?}", ack.code))
                };
                if let Some(callbacks) = &callbacks {
                    callbacks.on_connect(&session, outcome);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Some(callbacks) = &callbacks {
                    callbacks.on_message(&publish.topic, publish.payload);
                }
            }
            Ok(_) => {}
            Err(e) => {
                connected = false;
                if let ConnectionError::ConnectionRefused(code) = e {
                    warn!("Engine {}: connection refused: {:?}", client_id, code);
                    if let Some(callbacks) = &callbacks {
                        callbacks.on_connect(&session, ConnectOutcome::Refused(format!("{:?}", code)));
                    }
                } else {
                    warn!("Engine {}: connection error: {}", client_id, e);
                }
                tokio::select! {
                    _ = &mut shutdown_rx => return None,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use crossbeam_channel::{unbounded, Receiver, Sender};
    use pretty_assertions::assert_eq;

    use crate::bridge::transport::{self, Inbound};
    use crate::bridge::BridgeCallbacks;
    use crate::subscriptions::SubscriptionSet;

    const WAIT: Duration = Duration::from_secs(5);

    const CONNECT: u8 = 0x10;
    const SUBSCRIBE: u8 = 0x82;
    const DISCONNECT: u8 = 0xE0;

    // -------------------------------------------------------------------------
    // Minimal MQTT 3.1.1 broker side over a blocking socket
    // -------------------------------------------------------------------------

    fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
        let mut header = [0u8; 1];
        stream.read_exact(&mut header)?;

        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte)?;
            len |= ((byte[0] & 0x7f) as usize) << shift;
            if byte[0] & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body)?;
        Ok((header[0], body))
    }

    fn read_str(body: &[u8], at: usize) -> (String, usize) {
        let len = u16::from_be_bytes([body[at], body[at + 1]]) as usize;
        let end = at + 2 + len;
        (String::from_utf8_lossy(&body[at + 2..end]).into_owned(), end)
    }

    /// Accept a client, answer its CONNECT with `code` and return its client id
    fn accept(listener: &TcpListener, code: u8) -> (TcpStream, String) {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();

        let (kind, body) = read_packet(&mut stream).unwrap();
        assert_eq!(kind, CONNECT);
        // protocol name, level, flags and keepalive precede the client id
        let (client_id, _) = read_str(&body, 10);

        stream.write_all(&[0x20, 0x02, 0x00, code]).unwrap();
        (stream, client_id)
    }

    /// Read one SUBSCRIBE, acknowledge it and return its filter and QoS
    fn read_subscribe(stream: &mut TcpStream) -> (String, u8) {
        let (kind, body) = read_packet(stream).unwrap();
        assert_eq!(kind, SUBSCRIBE);
        let (filter, end) = read_str(&body, 2);
        let qos = body[end];

        stream
            .write_all(&[0x90, 0x03, body[0], body[1], qos])
            .unwrap();
        (filter, qos)
    }

    fn write_publish(stream: &mut TcpStream, topic: &str, payload: &[u8]) {
        let len = 2 + topic.len() + payload.len();
        let mut packet = vec![0x30, len as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        stream.write_all(&packet).unwrap();
    }

    fn listen() -> (TcpListener, ServerConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut server = ServerConfig::default();
        server.update("127.0.0.1".into(), i64::from(port), 10, None);
        (listener, server)
    }

    /// Callbacks reporting connect outcomes
    struct Outcomes(Sender<ConnectOutcome>);

    impl EngineCallbacks for Outcomes {
        fn on_connect(&self, _session: &dyn EngineSession, outcome: ConnectOutcome) {
            let _ = self.0.send(outcome);
        }

        fn on_message(&self, _topic: &str, _payload: Bytes) {}
    }

    fn engine_with_outcomes() -> (RumqttEngine, Receiver<ConnectOutcome>) {
        library::init().unwrap();
        let (tx, rx) = unbounded();
        let mut engine = RumqttEngine::new();
        engine.set_callbacks(Arc::new(Outcomes(tx)));
        (engine, rx)
    }

    // -------------------------------------------------------------------------

    #[test]
    fn test_client_id_prefix() {
        let engine = RumqttEngine::with_options("edge", 0);
        assert!(engine.client_id().starts_with("edge-"));
        assert_eq!(engine.capacity, 1);
        assert_ne!(RumqttEngine::new().client_id(), RumqttEngine::new().client_id());
    }

    #[test]
    fn test_connect_requires_network() {
        let mut engine = RumqttEngine::new();
        let mut server = ServerConfig::default();
        server.update("127.0.0.1".into(), 1883, 10, None);
        assert_eq!(engine.connect_async(&server), Err(EngineError::NotRunning));
    }

    #[test]
    fn test_connect_rejects_unset_port() {
        library::init().unwrap();
        let mut engine = RumqttEngine::new();
        engine.start_network().unwrap();

        let mut server = ServerConfig::default();
        server.update("127.0.0.1".into(), 0, 10, None);
        assert!(matches!(
            engine.connect_async(&server),
            Err(EngineError::InvalidConfig(_))
        ));
        engine.stop_network();
    }

    #[test]
    fn test_stop_and_disconnect_are_idempotent() {
        let mut engine = RumqttEngine::new();
        engine.stop_network();
        engine.stop_network();
        assert_eq!(engine.disconnect(), Ok(()));
        assert_eq!(engine.disconnect(), Ok(()));
    }

    #[test]
    fn test_publish_before_connect() {
        let mut engine = RumqttEngine::new();
        let err = engine
            .publish("t", Bytes::from_static(b"x"), QoS::AtMostOnce, false)
            .unwrap_err();
        assert_eq!(err, EngineError::NotConnected);
    }

    #[test]
    fn test_stop_then_disconnect_sends_disconnect() {
        let (listener, server) = listen();
        let (mut engine, outcomes) = engine_with_outcomes();

        let broker = thread::spawn(move || {
            let (mut stream, _) = accept(&listener, 0);
            read_packet(&mut stream).map(|(kind, _)| kind)
        });

        engine.start_network().unwrap();
        engine.connect_async(&server).unwrap();
        assert_eq!(outcomes.recv_timeout(WAIT).unwrap(), ConnectOutcome::Accepted);

        engine.stop_network();
        assert_eq!(engine.disconnect(), Ok(()));
        assert_eq!(broker.join().unwrap().unwrap(), DISCONNECT);

        // Nothing left to disconnect
        assert_eq!(engine.disconnect(), Ok(()));
    }

    #[test]
    fn test_refused_connack_reported() {
        let (listener, server) = listen();
        let (mut engine, outcomes) = engine_with_outcomes();

        let broker = thread::spawn(move || {
            // 0x05: not authorized
            let (stream, _) = accept(&listener, 0x05);
            drop(stream);
        });

        engine.start_network().unwrap();
        engine.connect_async(&server).unwrap();
        assert!(matches!(
            outcomes.recv_timeout(WAIT).unwrap(),
            ConnectOutcome::Refused(_)
        ));
        broker.join().unwrap();

        engine.stop_network();
        assert_eq!(engine.disconnect(), Ok(()));
    }

    #[test]
    fn test_restart_reuses_client_id() {
        let (listener, server) = listen();
        let (mut engine, outcomes) = engine_with_outcomes();
        let expected = engine.client_id().to_string();

        let broker = thread::spawn(move || {
            let mut ids = Vec::new();
            for _ in 0..2 {
                let (mut stream, id) = accept(&listener, 0);
                ids.push(id);
                let (kind, _) = read_packet(&mut stream).unwrap();
                assert_eq!(kind, DISCONNECT);
            }
            ids
        });

        for _ in 0..2 {
            engine.start_network().unwrap();
            engine.connect_async(&server).unwrap();
            assert!(outcomes.recv_timeout(WAIT).unwrap().is_accepted());
            engine.stop_network();
            engine.disconnect().unwrap();
        }

        assert_eq!(broker.join().unwrap(), vec![expected.clone(), expected]);
    }

    #[test]
    fn test_replay_and_delivery_across_reconnect() {
        let (listener, server) = listen();
        library::init().unwrap();

        let subscriptions = SubscriptionSet::shared();
        subscriptions.write().extend(["TEST", "TOPIC"]);
        let (transport_tx, transport_rx) = transport::channel();
        let callbacks = BridgeCallbacks::new(
            subscriptions,
            transport_tx,
            Arc::new(AtomicBool::new(false)),
        );

        let mut engine = RumqttEngine::new();
        engine.set_callbacks(Arc::new(callbacks));

        let (replayed_tx, replayed_rx) = unbounded();
        let broker = thread::spawn(move || {
            let (mut first, _) = accept(&listener, 0);
            let first_subs = vec![read_subscribe(&mut first), read_subscribe(&mut first)];
            write_publish(&mut first, "TEST", b"HELLO, FRAME");
            // Dropping the socket forces a reconnect
            drop(first);

            let (mut second, _) = accept(&listener, 0);
            let second_subs = vec![read_subscribe(&mut second), read_subscribe(&mut second)];
            replayed_tx.send(()).unwrap();

            let (kind, _) = read_packet(&mut second).unwrap();
            (first_subs, second_subs, kind)
        });

        engine.start_network().unwrap();
        engine.connect_async(&server).unwrap();

        match transport_rx.receiver().recv_timeout(WAIT).unwrap() {
            Inbound::Message(envelope) => {
                assert_eq!(envelope.topic(), "TEST");
                assert_eq!(
                    envelope.payload().map(|p| &p[..]),
                    Some(&b"HELLO, FRAME"[..])
                );
            }
            other => panic!("unexpected item {:?}", other),
        }

        replayed_rx.recv_timeout(WAIT).unwrap();
        engine.stop_network();
        engine.disconnect().unwrap();

        let (first_subs, second_subs, last) = broker.join().unwrap();
        let expected = vec![("TEST".to_string(), 0), ("TOPIC".to_string(), 0)];
        assert_eq!(first_subs, expected);
        assert_eq!(second_subs, expected);
        assert_eq!(last, DISCONNECT);
        assert!(transport_rx.is_empty());
    }
}

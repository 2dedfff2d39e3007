//! Bridge event loop
//!
//! Waits, without timeout, on both the control channel and the bridge
//! transport. Control messages go to the dispatcher; each transport item
//! is forwarded to the owning process unmodified and in arrival order.
//! The loop ends when the dispatcher reaches the terminal state.

use crossbeam_channel::{select, Receiver, RecvError, Sender};
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;
use super::transport::{self, Inbound, TransportReceiver};
use crate::engine::library::{self, LibraryLease};
use crate::engine::Engine;
use crate::protocol::{BridgeError, Frames, MessageEnvelope};

/// Event delivered to the owning process
#[derive(Debug)]
pub enum BridgeEvent {
    /// A message received from the broker
    Message(MessageEnvelope),
    /// A failure the bridge recovered from
    Error(BridgeError),
}

/// What woke the loop up
enum Wakeup {
    Control(Result<Frames, RecvError>),
    Transport(Result<Inbound, RecvError>),
}

/// The bridge worker: dispatcher plus event loop
pub struct Bridge {
    commands: Receiver<Frames>,
    events: Sender<BridgeEvent>,
    transport: TransportReceiver,
    dispatcher: Dispatcher,
    _lease: LibraryLease,
}

impl Bridge {
    /// Build a bridge around `engine`.
    ///
    /// Initializes the process-wide engine library on first use; the
    /// bridge keeps it alive until dropped.
    pub fn new(
        engine: Box<dyn Engine>,
        commands: Receiver<Frames>,
        events: Sender<BridgeEvent>,
    ) -> Result<Self, BridgeError> {
        let lease = library::lease()?;
        let (transport_tx, transport_rx) = transport::channel();

        Ok(Self {
            commands,
            events,
            transport: transport_rx,
            dispatcher: Dispatcher::new(engine, transport_tx),
            _lease: lease,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run until TERMINATE is received or the owning process goes away
    pub fn run(mut self) {
        info!("Bridge loop started");
        while !self.dispatcher.is_terminated() {
            self.run_once();
        }
        info!("Bridge loop exited");
    }

    /// Block until one event is available and handle it
    pub fn run_once(&mut self) {
        let wakeup = select! {
            recv(self.commands) -> msg => Wakeup::Control(msg),
            recv(self.transport.receiver()) -> item => Wakeup::Transport(item),
        };

        match wakeup {
            Wakeup::Control(Ok(frames)) => {
                if let Err(e) = self.dispatcher.handle(frames) {
                    self.emit(BridgeEvent::Error(e));
                }
            }
            Wakeup::Control(Err(_)) => {
                info!("Control channel closed, terminating");
                self.dispatcher.terminate();
            }
            Wakeup::Transport(Ok(Inbound::Message(envelope))) => {
                if self.dispatcher.is_verbose() {
                    info!("Forwarding message on {}", envelope.topic());
                }
                self.emit(BridgeEvent::Message(envelope));
            }
            Wakeup::Transport(Ok(Inbound::SubscribeFailed { topic, error })) => {
                self.emit(BridgeEvent::Error(BridgeError::Subscribe {
                    topic,
                    source: error,
                }));
            }
            Wakeup::Transport(Err(_)) => {
                error!("Bridge transport closed, terminating");
                self.dispatcher.terminate();
            }
        }
    }

    fn emit(&mut self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            debug!("Owning process gone, terminating");
            self.dispatcher.terminate();
        }
    }
}

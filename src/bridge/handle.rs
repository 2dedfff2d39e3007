//! Owning-process side of the control channel

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::error;

use super::actor::{Bridge, BridgeEvent};
use crate::engine::Engine;
use crate::protocol::{BridgeError, Command, Frames};

/// Handle to a bridge running on its own thread.
///
/// Dropping the handle sends TERMINATE and waits for the thread to exit.
pub struct BridgeHandle {
    commands: Sender<Frames>,
    events: Receiver<BridgeEvent>,
    thread: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Spawn a bridge thread driving `engine`.
    ///
    /// The bridge is built on the calling thread, so a library or engine
    /// setup failure is returned here and commands sent after this returns
    /// are served.
    pub fn spawn<E: Engine + 'static>(engine: E) -> Result<Self, BridgeError> {
        let (commands_tx, commands_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();

        let bridge = Bridge::new(Box::new(engine), commands_rx, events_tx)?;
        let thread = thread::Builder::new()
            .name("mqlink-bridge".into())
            .spawn(move || bridge.run())?;

        Ok(Self {
            commands: commands_tx,
            events: events_rx,
            thread: Some(thread),
        })
    }

    /// Send a command
    pub fn send(&self, command: Command) -> Result<(), BridgeError> {
        self.send_frames(command.into_frames())
    }

    /// Send a raw command message
    pub fn send_frames(&self, frames: Frames) -> Result<(), BridgeError> {
        self.commands.send(frames).map_err(|_| BridgeError::Closed)
    }

    /// Block until the next event; fails once the bridge has exited
    pub fn recv(&self) -> Result<BridgeEvent, BridgeError> {
        self.events.recv().map_err(|_| BridgeError::Closed)
    }

    /// Next event, waiting at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BridgeEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<BridgeEvent> {
        self.events.try_recv().ok()
    }

    /// Event receiver, for use in the caller's own `select!`
    pub fn events(&self) -> &Receiver<BridgeEvent> {
        &self.events
    }

    /// True once the bridge thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Terminate the bridge and wait for its thread
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(Command::Terminate.into_frames());
        if thread.join().is_err() {
            error!("Bridge thread panicked");
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

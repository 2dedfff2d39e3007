//! Bridge transport
//!
//! Carries work from the engine's callback context to the bridge loop.
//! There is exactly one writer (the engine callbacks) and one reader (the
//! loop); neither half is `Clone`. The queue is unbounded so the engine
//! never blocks on a slow loop, and delivery is FIFO.

use crossbeam_channel::{unbounded, Receiver, RecvError, Sender, TryRecvError};

use crate::engine::EngineError;
use crate::protocol::MessageEnvelope;

/// Item moved from the engine context to the bridge loop
#[derive(Debug)]
pub enum Inbound {
    /// A broker message to forward to the owning process
    Message(MessageEnvelope),
    /// A subscription replay the engine refused
    SubscribeFailed { topic: String, error: EngineError },
}

/// Create a connected transport pair
pub fn channel() -> (TransportSender, TransportReceiver) {
    let (tx, rx) = unbounded();
    (TransportSender { tx }, TransportReceiver { rx })
}

/// Writing half, owned by the engine callbacks
#[derive(Debug)]
pub struct TransportSender {
    tx: Sender<Inbound>,
}

impl TransportSender {
    /// Enqueue without blocking.
    ///
    /// Returns false once the reading half is gone, i.e. the bridge loop
    /// has exited.
    pub fn send(&self, item: Inbound) -> bool {
        self.tx.send(item).is_ok()
    }
}

/// Reading half, owned by the bridge loop
#[derive(Debug)]
pub struct TransportReceiver {
    rx: Receiver<Inbound>,
}

impl TransportReceiver {
    pub fn recv(&self) -> Result<Inbound, RecvError> {
        self.rx.recv()
    }

    pub fn try_recv(&self) -> Result<Inbound, TryRecvError> {
        self.rx.try_recv()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Underlying receiver, for use in `select!`
    pub(crate) fn receiver(&self) -> &Receiver<Inbound> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::thread;

    #[test]
    fn test_fifo_across_threads() {
        let (tx, rx) = channel();
        const COUNT: usize = 10_000;

        let writer = thread::spawn(move || {
            for i in 0..COUNT {
                let env = MessageEnvelope::new(format!("t/{}", i), Bytes::from(i.to_string()));
                assert!(tx.send(Inbound::Message(env)));
            }
        });

        for i in 0..COUNT {
            match rx.recv().unwrap() {
                Inbound::Message(env) => {
                    assert_eq!(env.topic(), format!("t/{}", i));
                    assert_eq!(&env.payload().unwrap()[..], i.to_string().as_bytes());
                }
                other => panic!("unexpected item {:?}", other),
            }
        }
        writer.join().unwrap();
        assert!(rx.is_empty());
    }

    #[test]
    fn test_send_after_reader_dropped() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(!tx.send(Inbound::Message(MessageEnvelope::new("t", Bytes::new()))));
    }

    #[test]
    fn test_reader_sees_disconnect() {
        let (tx, rx) = channel();
        tx.send(Inbound::SubscribeFailed {
            topic: "a".into(),
            error: EngineError::QueueFull,
        });
        drop(tx);
        assert_eq!(rx.len(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(Inbound::SubscribeFailed { .. })
        ));
        assert!(rx.recv().is_err());
    }
}

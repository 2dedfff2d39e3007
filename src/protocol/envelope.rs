//! Forwarded broker message

use bytes::Bytes;

use super::Frames;

/// A message received from the broker, as forwarded to the owning process.
///
/// Immutable once built. An empty payload is represented as no payload,
/// so the wire form then carries the topic frame only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    topic: String,
    payload: Option<Bytes>,
}

impl MessageEnvelope {
    pub fn new(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            payload: (!payload.is_empty()).then_some(payload),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Two-frame wire form `[topic, payload]`
    pub fn into_frames(self) -> Frames {
        let mut frames = Vec::with_capacity(2);
        frames.push(Bytes::from(self.topic));
        if let Some(payload) = self.payload {
            frames.push(payload);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_frames() {
        let env = MessageEnvelope::new("TOPIC", Bytes::from_static(b"HELLO, FRAME"));
        assert_eq!(env.topic(), "TOPIC");
        assert_eq!(env.payload().map(|p| &p[..]), Some(&b"HELLO, FRAME"[..]));
        assert_eq!(
            env.into_frames(),
            vec![
                Bytes::from_static(b"TOPIC"),
                Bytes::from_static(b"HELLO, FRAME")
            ]
        );
    }

    #[test]
    fn test_envelope_without_payload() {
        let env = MessageEnvelope::new("empty", Bytes::new());
        assert!(env.payload().is_none());
        assert_eq!(env.into_frames(), vec![Bytes::from_static(b"empty")]);
    }
}

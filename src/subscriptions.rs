//! Subscription registry
//!
//! Ordered, deduplicated set of topic filters. The bridge thread adds
//! filters in response to SUBSCRIBE; the engine thread walks them on every
//! successful connect to replay the subscriptions.

use std::sync::Arc;

use parking_lot::RwLock;

/// Registry shared between the dispatcher (writer) and the connect replay (reader)
pub type SharedSubscriptions = Arc<RwLock<SubscriptionSet>>;

/// Topic filters in order of first registration, without duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    topics: Vec<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a new, empty registry for sharing across threads
    pub fn shared() -> SharedSubscriptions {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Append `topic` unless an identical filter is already registered.
    ///
    /// Returns true if the filter was added.
    pub fn add(&mut self, topic: &str) -> bool {
        if self.contains(topic) {
            return false;
        }
        self.topics.push(topic.to_string());
        true
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl<'a> Extend<&'a str> for SubscriptionSet {
    fn extend<I: IntoIterator<Item = &'a str>>(&mut self, iter: I) {
        for topic in iter {
            self.add(topic);
        }
    }
}

use crate::routing::topic::share_group;

pub type SubscriberId = String;

/// A topic filter held by the broker and the clients subscribed to it.
///
/// Subscribers are kept in subscription order. For a shared filter
/// (`$share/{group}/...`) each message goes to exactly one subscriber,
/// picked round-robin.
#[derive(Debug, Default)]
pub struct Topic {
    pub filter: String,
    pub subscribers: Vec<SubscriberId>,
    next_member: usize,
}

impl Topic {
    /// Creates a new instance of the Topic with the given filter
    /// Initializes an empty list of subscribers
    pub fn new(filter: &str) -> Self {
        Self {
            filter: filter.to_string(),
            subscribers: Vec::new(),
            next_member: 0,
        }
    }

    /// Subscribes a new subscriber to the topic
    /// If the subscriber is already subscribed, it has no effect
    pub fn subscribe(&mut self, id: SubscriberId) {
        if !self.subscribers.contains(&id) {
            self.subscribers.push(id);
        }
    }

    /// Unsubscribes a subscriber from the topic
    /// If the subscriber is not subscribed, it has no effect
    pub fn unsubscribe(&mut self, id: &SubscriberId) {
        self.subscribers.retain(|s| s != id);
    }

    pub fn is_shared(&self) -> bool {
        share_group(&self.filter).is_some()
    }

    /// Picks the group member for the next shared delivery.
    pub fn next_member(&mut self) -> Option<&SubscriberId> {
        if self.subscribers.is_empty() {
            return None;
        }
        let index = self.next_member % self.subscribers.len();
        self.next_member = index + 1;
        self.subscribers.get(index)
    }
}

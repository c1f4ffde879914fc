//! Topic-based publish/subscribe over bounded channels.
//!
//! Publishing never blocks: when a subscriber's channel is full the message
//! is dropped for that subscriber and a warning is logged. Within a topic,
//! messages reach each subscriber in publication order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use opal_messages::{Message, Topic};
use tokio::sync::mpsc;

use crate::preprocessor::ProcessorRegistry;

/// Default subscriber channel capacity.
const DEFAULT_CAPACITY: usize = 100;

struct Subscriber {
    id: u32,
    tx: mpsc::Sender<Message>,
}

/// The event bus. Clones share the same subscriber map.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<Topic, Vec<Subscriber>>>>,
    processors: ProcessorRegistry,
    next_id: Arc<Mutex<u32>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            processors: ProcessorRegistry::new(),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Subscribe to `topic` with the default channel capacity.
    pub fn subscribe(&self, topic: Topic) -> (u32, mpsc::Receiver<Message>) {
        self.subscribe_with_capacity(topic, DEFAULT_CAPACITY)
    }

    /// Subscribe to `topic` with an explicit channel capacity.
    pub fn subscribe_with_capacity(
        &self,
        topic: Topic,
        capacity: usize,
    ) -> (u32, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = {
            let mut next = self.next_id.lock().expect("event bus id lock");
            let id = *next;
            *next = next.wrapping_add(1).max(1);
            id
        };
        let mut map = self.subscribers.lock().expect("event bus subscriber lock");
        map.entry(topic).or_default().push(Subscriber { id, tx });
        (id, rx)
    }

    /// Drop the subscription `id` on `topic`. Returns whether it existed.
    pub fn unsubscribe(&self, topic: Topic, id: u32) -> bool {
        let mut map = self.subscribers.lock().expect("event bus subscriber lock");
        if let Some(subs) = map.get_mut(&topic) {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            return subs.len() != before;
        }
        false
    }

    /// Publish `msg` under `topic` to every current subscriber.
    ///
    /// Registered preprocessors run first; a failing preprocessor swallows
    /// the message.
    pub fn publish(&self, topic: Topic, msg: Message) {
        let msg = match self.processors.preprocess(topic, msg) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(?topic, error = %e, "preprocessor rejected message");
                return;
            }
        };

        let map = self.subscribers.lock().expect("event bus subscriber lock");
        let Some(subs) = map.get(&topic) else {
            return;
        };
        for sub in subs {
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.tx.try_send(msg.clone()) {
                tracing::warn!(
                    ?topic,
                    subscriber = sub.id,
                    "subscriber channel full, dropping message"
                );
            }
        }
    }

    /// The preprocessor registry attached to this bus.
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Number of subscribers currently listening on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let map = self.subscribers.lock().expect("event bus subscriber lock");
        map.get(&topic).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

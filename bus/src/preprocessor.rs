//! Per-topic message preprocessors.
//!
//! A preprocessor can rewrite or reject a message before it reaches the
//! subscribers of a topic. Registration ids come from a PRNG owned by the
//! registry, so there is no process-wide mutable state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use opal_messages::{Message, Topic};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Mutates or rejects a message before subscriber delivery.
pub trait Preprocessor: Send + Sync {
    fn process(&self, msg: Message) -> Result<Message, String>;
}

struct IdProcessor {
    id: u32,
    processor: Arc<dyn Preprocessor>,
}

struct Inner {
    processors: HashMap<Topic, Vec<IdProcessor>>,
    rng: SmallRng,
}

/// Registry of per-topic preprocessors. Clones share state.
#[derive(Clone)]
pub struct ProcessorRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                processors: HashMap::new(),
                rng: SmallRng::from_entropy(),
            })),
        }
    }

    /// Run all preprocessors registered for `topic` over `msg`, in
    /// registration order.
    pub fn preprocess(&self, topic: Topic, msg: Message) -> Result<Message, String> {
        let inner = self.inner.lock().expect("processor registry lock");
        let Some(list) = inner.processors.get(&topic) else {
            return Ok(msg);
        };
        let mut msg = msg;
        for entry in list {
            msg = entry.processor.process(msg)?;
        }
        Ok(msg)
    }

    /// Register preprocessors for `topic`, returning their ids.
    pub fn register(&self, topic: Topic, processors: Vec<Arc<dyn Preprocessor>>) -> Vec<u32> {
        let mut inner = self.inner.lock().expect("processor registry lock");
        let mut ids = Vec::with_capacity(processors.len());
        for processor in processors {
            let id: u32 = inner.rng.gen();
            ids.push(id);
            inner
                .processors
                .entry(topic)
                .or_default()
                .push(IdProcessor { id, processor });
        }
        ids
    }

    /// Remove one preprocessor from `topic` by id.
    pub fn remove(&self, topic: Topic, id: u32) {
        let mut inner = self.inner.lock().expect("processor registry lock");
        if let Some(list) = inner.processors.get_mut(&topic) {
            list.retain(|entry| entry.id != id);
        }
    }

    /// Remove every preprocessor registered for `topic`.
    pub fn remove_topic(&self, topic: Topic) {
        let mut inner = self.inner.lock().expect("processor registry lock");
        inner.processors.remove(&topic);
    }

    /// Remove every preprocessor on every topic.
    pub fn remove_all(&self) {
        let mut inner = self.inner.lock().expect("processor registry lock");
        inner.processors.clear();
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectAll;

    impl Preprocessor for RejectAll {
        fn process(&self, _msg: Message) -> Result<Message, String> {
            Err("rejected".into())
        }
    }

    struct BumpHeight;

    impl Preprocessor for BumpHeight {
        fn process(&self, msg: Message) -> Result<Message, String> {
            match msg {
                Message::HighestSeen(h) => Ok(Message::HighestSeen(h + 1)),
                other => Ok(other),
            }
        }
    }

    #[test]
    fn no_processors_passes_through() {
        let registry = ProcessorRegistry::new();
        let out = registry
            .preprocess(Topic::HighestSeen, Message::HighestSeen(7))
            .unwrap();
        assert!(matches!(out, Message::HighestSeen(7)));
    }

    #[test]
    fn processors_run_in_registration_order() {
        let registry = ProcessorRegistry::new();
        registry.register(
            Topic::HighestSeen,
            vec![Arc::new(BumpHeight) as Arc<dyn Preprocessor>, Arc::new(BumpHeight)],
        );
        let out = registry
            .preprocess(Topic::HighestSeen, Message::HighestSeen(5))
            .unwrap();
        assert!(matches!(out, Message::HighestSeen(7)));
    }

    #[test]
    fn rejection_propagates() {
        let registry = ProcessorRegistry::new();
        registry.register(Topic::HighestSeen, vec![Arc::new(RejectAll) as Arc<dyn Preprocessor>]);
        assert!(registry
            .preprocess(Topic::HighestSeen, Message::HighestSeen(5))
            .is_err());
    }

    #[test]
    fn remove_by_id() {
        let registry = ProcessorRegistry::new();
        let ids = registry.register(Topic::HighestSeen, vec![Arc::new(RejectAll) as Arc<dyn Preprocessor>]);
        registry.remove(Topic::HighestSeen, ids[0]);
        assert!(registry
            .preprocess(Topic::HighestSeen, Message::HighestSeen(5))
            .is_ok());
    }

    #[test]
    fn remove_topic_and_all() {
        let registry = ProcessorRegistry::new();
        registry.register(Topic::HighestSeen, vec![Arc::new(RejectAll) as Arc<dyn Preprocessor>]);
        registry.register(Topic::Initialization, vec![Arc::new(RejectAll) as Arc<dyn Preprocessor>]);

        registry.remove_topic(Topic::HighestSeen);
        assert!(registry
            .preprocess(Topic::HighestSeen, Message::HighestSeen(5))
            .is_ok());

        registry.remove_all();
        assert!(registry
            .preprocess(Topic::Initialization, Message::Initialization)
            .is_ok());
    }

    #[test]
    fn ids_are_distinct() {
        let registry = ProcessorRegistry::new();
        let ids = registry.register(
            Topic::HighestSeen,
            vec![
                Arc::new(BumpHeight) as Arc<dyn Preprocessor>,
                Arc::new(BumpHeight),
                Arc::new(BumpHeight),
            ],
        );
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
    }
}

//! Synchronous request/response calls between components.
//!
//! One component registers as the handler for a topic and receives
//! [`Request`]s on a channel; callers get the response through a oneshot
//! with a deadline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opal_messages::{CallParams, CallResponse, Topic};
use tokio::sync::{mpsc, oneshot};

use crate::BusError;

/// Capacity of a handler's request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// A pending call delivered to the registered handler.
pub struct Request {
    pub params: CallParams,
    pub response: oneshot::Sender<Result<CallResponse, String>>,
}

/// The RPC bus. Clones share the handler map.
#[derive(Clone)]
pub struct RpcBus {
    handlers: Arc<Mutex<HashMap<Topic, mpsc::Sender<Request>>>>,
}

impl RpcBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Claim a topic, returning the stream of requests for it. At most one
    /// handler may hold a topic.
    pub fn register(&self, topic: Topic) -> Result<mpsc::Receiver<Request>, BusError> {
        let mut map = self.handlers.lock().expect("rpc bus handler lock");
        if map.contains_key(&topic) {
            return Err(BusError::AlreadyRegistered(topic));
        }
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        map.insert(topic, tx);
        Ok(rx)
    }

    /// Release a topic registration.
    pub fn deregister(&self, topic: Topic) {
        let mut map = self.handlers.lock().expect("rpc bus handler lock");
        map.remove(&topic);
    }

    /// Call the handler registered for `topic` and wait up to `timeout`
    /// for its response.
    pub async fn call(
        &self,
        topic: Topic,
        params: CallParams,
        timeout: Duration,
    ) -> Result<CallResponse, BusError> {
        let handler = {
            let map = self.handlers.lock().expect("rpc bus handler lock");
            map.get(&topic).cloned()
        }
        .ok_or(BusError::NotRegistered(topic))?;

        let (tx, rx) = oneshot::channel();
        handler
            .send(Request {
                params,
                response: tx,
            })
            .await
            .map_err(|_| BusError::HandlerGone(topic))?;

        let result = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| BusError::Timeout(topic))?
            .map_err(|_| BusError::HandlerGone(topic))?;

        result.map_err(BusError::CallFailed)
    }
}

impl Default for RpcBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_and_respond() {
        let bus = RpcBus::new();
        let mut rx = bus.register(Topic::GetLastBlock).unwrap();

        tokio::spawn(async move {
            let req = rx.recv().await.expect("request arrives");
            let _ = req.response.send(Ok(CallResponse::Empty));
        });

        let resp = bus
            .call(
                Topic::GetLastBlock,
                CallParams::GetLastBlock,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(matches!(resp, CallResponse::Empty));
    }

    #[tokio::test]
    async fn double_registration_rejected() {
        let bus = RpcBus::new();
        let _rx = bus.register(Topic::GetLastBlock).unwrap();
        assert!(matches!(
            bus.register(Topic::GetLastBlock),
            Err(BusError::AlreadyRegistered(Topic::GetLastBlock))
        ));
    }

    #[tokio::test]
    async fn unregistered_topic_fails_fast() {
        let bus = RpcBus::new();
        let err = bus
            .call(
                Topic::GetLastBlock,
                CallParams::GetLastBlock,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let bus = RpcBus::new();
        let mut rx = bus.register(Topic::GetLastBlock).unwrap();

        tokio::spawn(async move {
            // Hold the request without answering.
            let _req = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = bus
            .call(
                Topic::GetLastBlock,
                CallParams::GetLastBlock,
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout(_)));
    }

    #[tokio::test]
    async fn handler_error_is_surfaced() {
        let bus = RpcBus::new();
        let mut rx = bus.register(Topic::GetLastCertificate).unwrap();

        tokio::spawn(async move {
            let req = rx.recv().await.expect("request arrives");
            let _ = req.response.send(Err("no last certificate present".into()));
        });

        let err = bus
            .call(
                Topic::GetLastCertificate,
                CallParams::GetLastCertificate,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::CallFailed(_)));
    }

    #[tokio::test]
    async fn deregister_frees_the_topic() {
        let bus = RpcBus::new();
        let _rx = bus.register(Topic::GetLastBlock).unwrap();
        bus.deregister(Topic::GetLastBlock);
        assert!(bus.register(Topic::GetLastBlock).is_ok());
    }
}

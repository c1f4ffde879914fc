//! Wallet stand-in: answers the chain's clear-database request.

use opal_bus::RpcBus;
use opal_messages::{CallResponse, Topic};

/// Registers on the wallet topics and acknowledges every request.
pub struct NullWallet;

impl NullWallet {
    /// Spawn the responder task.
    pub fn spawn(rpc: &RpcBus) -> Result<tokio::task::JoinHandle<()>, opal_bus::BusError> {
        let mut rx = rpc.register(Topic::ClearWalletDatabase)?;
        Ok(tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                tracing::debug!("wallet database clear acknowledged");
                let _ = req.response.send(Ok(CallResponse::Empty));
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_messages::CallParams;
    use std::time::Duration;

    #[tokio::test]
    async fn clear_requests_are_acknowledged() {
        let rpc = RpcBus::new();
        let _task = NullWallet::spawn(&rpc).unwrap();
        let resp = rpc
            .call(
                Topic::ClearWalletDatabase,
                CallParams::ClearWalletDatabase,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(matches!(resp, CallResponse::Empty));
    }
}

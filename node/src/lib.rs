//! Node assembly: configuration, logging, metrics, and the wiring that
//! connects chain, consensus, and networking over the buses.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;

pub use config::NodeConfig;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::Node;
pub use shutdown::ShutdownController;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("chain error: {0}")]
    Chain(#[from] opal_chain::ChainError),

    #[error("store error: {0}")]
    Store(#[from] opal_store::StoreError),

    #[error("bus error: {0}")]
    Bus(#[from] opal_bus::BusError),

    #[error("network error: {0}")]
    Network(#[from] opal_network::NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

//! In-process message substrate: topic pub/sub plus request/response calls.
//!
//! The buses carry no business logic. Components hold cheaply clonable
//! handles instead of references to each other, which is what breaks the
//! consensus ↔ chain dependency cycle.

pub mod event_bus;
pub mod preprocessor;
pub mod rpc_bus;

pub use event_bus::EventBus;
pub use preprocessor::{Preprocessor, ProcessorRegistry};
pub use rpc_bus::{Request, RpcBus};

use opal_messages::Topic;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("topic {0:?} already registered")]
    AlreadyRegistered(Topic),

    #[error("no handler registered for topic {0:?}")]
    NotRegistered(Topic),

    #[error("call on topic {0:?} timed out")]
    Timeout(Topic),

    #[error("handler for topic {0:?} went away")]
    HandlerGone(Topic),

    #[error("call failed: {0}")]
    CallFailed(String),
}

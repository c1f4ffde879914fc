//! Pass-through state-transition executor.

use opal_chain::Executor;
use opal_types::{Provisioners, Transaction};

/// An executor that accepts every transaction and leaves the provisioner
/// set unchanged.
#[derive(Default)]
pub struct NullExecutor;

impl NullExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for NullExecutor {
    fn execute_state_transition(
        &self,
        _txs: &[Transaction],
        _height: u64,
        provisioners: &Provisioners,
    ) -> Result<Provisioners, String> {
        Ok(provisioners.clone())
    }

    fn validate_state_transition(&self, _txs: &[Transaction], _height: u64) -> Result<(), String> {
        Ok(())
    }
}

//! Contract executor seam

use crate::contract::state::ContractState;
use thiserror::Error;

/// Contract errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Runs opaque contract payloads against contract state
pub trait ContractExecutor: Send + Sync {
    fn execute(&self, payload: &[u8], state: &mut ContractState) -> Result<(), ContractError>;
}

/// Executor that accepts every payload and changes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

impl ContractExecutor for NoopExecutor {
    fn execute(&self, _payload: &[u8], _state: &mut ContractState) -> Result<(), ContractError> {
        Ok(())
    }
}

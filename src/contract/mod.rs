//! Contract execution boundary
//!
//! The ledger does not interpret contract payloads. A [`ContractExecutor`]
//! receives the opaque call data together with a mutable [`ContractState`];
//! the engine runs it against a scratch copy and keeps the result only when
//! execution succeeds.

pub mod executor;
pub mod state;

pub use executor::{ContractError, ContractExecutor, NoopExecutor};
pub use state::ContractState;

//! kreg Transaction
//!
//! Transaction propagation over a kernel transaction manager.
//!
//! Responsibilities:
//! - Own native transaction handles (create, status, commit, rollback, close)
//! - Track the ambient transaction of the executing call chain
//! - Run units of work under the six propagation policies
//! - Finalize created transactions on every exit path

pub mod ambient;
mod error;
mod manager;
mod option;
mod propagation;
#[cfg(test)]
mod testing;
mod transaction;

pub use error::{PropagationError, TransactionError, TransactionResult};
pub use manager::{TransactionManager, TransactionManagerBuilder};
pub use option::{OptionKind, TransactionDefaults, TransactionOption};
pub use propagation::{Propagation, TransactionalState};
pub use transaction::{Status, Transaction};

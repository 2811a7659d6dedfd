//! Transaction error types.

use std::time::Duration;

use kreg_core::NativeError;
use thiserror::Error;
use tracing::warn;

use crate::option::OptionKind;

/// Transaction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// A mandatory policy ran with no ambient transaction.
    #[error("a transaction is required but none is active")]
    TransactionRequired,

    /// A never policy ran inside an ambient transaction.
    #[error("a transaction is active but transactions are not allowed here")]
    TransactionNotAllowed,

    /// A transaction manager call failed.
    #[error("{operation} failed: {message} (error {error_code})")]
    Native {
        operation: &'static str,
        error_code: u32,
        message: String,
    },

    /// The same option kind was supplied twice to one policy.
    #[error("transaction option {kind} supplied more than once")]
    DuplicateOption { kind: OptionKind },

    /// The timeout cannot be expressed to the transaction manager.
    #[error("invalid transaction timeout {timeout:?}: {reason}")]
    InvalidTimeout {
        timeout: Duration,
        reason: &'static str,
    },
}

impl TransactionError {
    pub fn native(operation: &'static str, error: NativeError) -> Self {
        Self::Native {
            operation,
            error_code: error.code(),
            message: error.message().to_string(),
        }
    }

    pub fn duplicate_option(kind: OptionKind) -> Self {
        Self::DuplicateOption { kind }
    }

    pub fn invalid_timeout(timeout: Duration, reason: &'static str) -> Self {
        Self::InvalidTimeout { timeout, reason }
    }

    /// The native error code, for failures reported by the transaction manager.
    pub fn error_code(&self) -> Option<u32> {
        match self {
            Self::Native { error_code, .. } => Some(*error_code),
            _ => None,
        }
    }
}

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Failure of a unit of work run under a propagation policy.
///
/// The primary error is either the action's own or a transaction failure
/// (create, status query, commit, or a lone close). Close failures that
/// happen while another error is already propagating are kept in
/// `suppressed` rather than replacing it.
#[derive(Debug, Error)]
pub enum PropagationError<E> {
    #[error("{error}")]
    Transaction {
        error: TransactionError,
        suppressed: Vec<TransactionError>,
    },

    #[error("{error}")]
    Action {
        error: E,
        suppressed: Vec<TransactionError>,
    },
}

impl<E> PropagationError<E> {
    pub(crate) fn action(error: E, suppressed: Vec<TransactionError>) -> Self {
        Self::Action { error, suppressed }
    }

    /// Secondary failures recorded while the primary one propagated.
    pub fn suppressed(&self) -> &[TransactionError] {
        match self {
            Self::Transaction { suppressed, .. } | Self::Action { suppressed, .. } => suppressed,
        }
    }

    /// The action's error, if the action is what failed.
    pub fn action_error(&self) -> Option<&E> {
        match self {
            Self::Action { error, .. } => Some(error),
            Self::Transaction { .. } => None,
        }
    }

    /// The transaction failure, if the transaction layer is what failed.
    pub fn transaction_error(&self) -> Option<&TransactionError> {
        match self {
            Self::Transaction { error, .. } => Some(error),
            Self::Action { .. } => None,
        }
    }

    /// Collapse into the action's error type, logging any suppressed
    /// failures. Lets nested policy calls propagate with `?`.
    pub fn into_error(self) -> E
    where
        E: From<TransactionError>,
    {
        let (error, suppressed) = match self {
            Self::Transaction { error, suppressed } => (E::from(error), suppressed),
            Self::Action { error, suppressed } => (error, suppressed),
        };
        for failure in &suppressed {
            warn!(%failure, "suppressed transaction failure");
        }
        error
    }
}

impl<E> From<TransactionError> for PropagationError<E> {
    fn from(error: TransactionError) -> Self {
        Self::Transaction {
            error,
            suppressed: Vec::new(),
        }
    }
}

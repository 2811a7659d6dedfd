//! Registry error types.

use kreg_core::{codes, NativeError, RegType};
use kreg_transaction::{PropagationError, TransactionError};
use thiserror::Error;

use crate::value::ValueError;

/// Registry errors. Paths are rendered with their root key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry key not found: {path}")]
    NoSuchKey { path: String },

    #[error("registry value not found: {path} [{name}]")]
    NoSuchValue { path: String, name: String },

    #[error("access denied: {path}")]
    AccessDenied { path: String },

    #[error("invalid handle for {path}")]
    InvalidHandle { path: String },

    #[error("registry key already exists: {path}")]
    KeyAlreadyExists { path: String },

    #[error("{operation} is not supported on root key {path}")]
    RootKeyUnsupported {
        operation: &'static str,
        path: String,
    },

    #[error("unknown root key: {name}")]
    UnknownRoot { name: String },

    #[error("invalid data in {path} [{name}]: {source}")]
    InvalidData {
        path: String,
        name: String,
        source: ValueError,
    },

    #[error("{path} [{name}] is {actual}, expected {expected}")]
    TypeMismatch {
        path: String,
        name: String,
        expected: RegType,
        actual: RegType,
    },

    #[error("{operation} failed on {path}: {message} (error {code})")]
    Native {
        operation: &'static str,
        code: u32,
        message: &'static str,
        path: String,
    },

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl RegistryError {
    /// Map a native failure on a key. Not-found codes mean the key.
    pub fn from_native(operation: &'static str, path: impl Into<String>, error: NativeError) -> Self {
        let path = path.into();
        match error.code() {
            codes::FILE_NOT_FOUND | codes::KEY_DELETED => Self::NoSuchKey { path },
            codes::ACCESS_DENIED => Self::AccessDenied { path },
            codes::INVALID_HANDLE => Self::InvalidHandle { path },
            codes::ALREADY_EXISTS => Self::KeyAlreadyExists { path },
            code => Self::Native {
                operation,
                code,
                message: error.message(),
                path,
            },
        }
    }

    /// Map a native failure on a value. Not-found means the value.
    pub fn from_native_value(
        operation: &'static str,
        path: impl Into<String>,
        name: &str,
        error: NativeError,
    ) -> Self {
        if error.is_not_found() {
            Self::NoSuchValue {
                path: path.into(),
                name: name.to_string(),
            }
        } else {
            Self::from_native(operation, path, error)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchKey { .. } | Self::NoSuchValue { .. })
    }
}

/// Lets a nested policy call inside a registry action propagate with `?`.
impl From<PropagationError<RegistryError>> for RegistryError {
    fn from(error: PropagationError<RegistryError>) -> Self {
        error.into_error()
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

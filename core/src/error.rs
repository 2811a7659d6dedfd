//! Native error codes.
//!
//! The native layer reports failures as Win32 error codes. Only the codes this
//! workspace inspects get a name; everything else passes through as a number.

use thiserror::Error;

/// Win32 error codes inspected by the transaction and registry layers.
pub mod codes {
    pub const SUCCESS: u32 = 0;
    pub const FILE_NOT_FOUND: u32 = 2;
    pub const ACCESS_DENIED: u32 = 5;
    pub const INVALID_HANDLE: u32 = 6;
    pub const GEN_FAILURE: u32 = 31;
    pub const INVALID_PARAMETER: u32 = 87;
    pub const ALREADY_EXISTS: u32 = 183;
    pub const NO_MORE_ITEMS: u32 = 259;
    pub const KEY_DELETED: u32 = 1018;
    pub const TRANSACTION_NOT_ACTIVE: u32 = 6701;
    pub const TRANSACTION_ALREADY_ABORTED: u32 = 6704;
    pub const TRANSACTION_ALREADY_COMMITTED: u32 = 6705;
    pub const TRANSACTIONAL_CONFLICT: u32 = 6800;
}

/// Human-readable text for a native error code.
pub fn error_message(code: u32) -> &'static str {
    match code {
        codes::SUCCESS => "the operation completed successfully",
        codes::FILE_NOT_FOUND => "the system cannot find the file specified",
        codes::ACCESS_DENIED => "access is denied",
        codes::INVALID_HANDLE => "the handle is invalid",
        codes::GEN_FAILURE => "a device attached to the system is not functioning",
        codes::INVALID_PARAMETER => "the parameter is incorrect",
        codes::ALREADY_EXISTS => "cannot create a file when that file already exists",
        codes::NO_MORE_ITEMS => "no more data is available",
        codes::KEY_DELETED => "illegal operation attempted on a registry key that has been marked for deletion",
        codes::TRANSACTION_NOT_ACTIVE => "the transaction handle is not active",
        codes::TRANSACTION_ALREADY_ABORTED => "the transaction has already been aborted",
        codes::TRANSACTION_ALREADY_COMMITTED => "the transaction has already been committed",
        codes::TRANSACTIONAL_CONFLICT => "the function attempted to use a name that is reserved for use by another transaction",
        _ => "unrecognized native error",
    }
}

/// A failed native call, normalized to its error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{} (error {code})", error_message(*.code))]
pub struct NativeError {
    code: u32,
}

impl NativeError {
    /// Wrap a native error code.
    pub fn new(code: u32) -> Self {
        Self { code }
    }

    /// The raw native error code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Text describing the code.
    pub fn message(&self) -> &'static str {
        error_message(self.code)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == codes::FILE_NOT_FOUND
    }

    pub fn is_invalid_handle(&self) -> bool {
        self.code == codes::INVALID_HANDLE
    }

    pub fn is_no_more_items(&self) -> bool {
        self.code == codes::NO_MORE_ITEMS
    }
}

/// Result type for native calls.
pub type NativeResult<T> = Result<T, NativeError>;

//! Normalization of native failure conventions.
//!
//! Native calls report failure in one of three shapes:
//! - a status code return (`0` is success, anything else is the error),
//! - a boolean `false` return with the error captured separately as the
//!   thread's last error,
//! - a handle return equal to the invalid-handle sentinel, again with the
//!   error captured as the last error.
//!
//! Backends funnel every call through one of these helpers so callers only
//! ever see a `NativeResult`.

use crate::error::{codes, NativeError, NativeResult};
use crate::handle::TransactionHandle;

/// Normalize a status-code return.
pub fn check_status(status: u32) -> NativeResult<()> {
    if status == codes::SUCCESS {
        Ok(())
    } else {
        Err(NativeError::new(status))
    }
}

/// Normalize a boolean return whose failure detail lives in the last error.
///
/// `last_error` is only consulted on failure. A failure that left no last
/// error behind is reported as `GEN_FAILURE` so it is never mistaken for
/// success.
pub fn check_bool(ok: bool, last_error: impl FnOnce() -> u32) -> NativeResult<()> {
    if ok {
        return Ok(());
    }
    Err(NativeError::new(nonzero(last_error())))
}

/// Normalize a handle return that signals failure with the invalid sentinel.
pub fn check_handle(
    handle: TransactionHandle,
    last_error: impl FnOnce() -> u32,
) -> NativeResult<TransactionHandle> {
    if handle.is_invalid() {
        return Err(NativeError::new(nonzero(last_error())));
    }
    Ok(handle)
}

fn nonzero(code: u32) -> u32 {
    if code == codes::SUCCESS {
        codes::GEN_FAILURE
    } else {
        code
    }
}

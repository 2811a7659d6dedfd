//! The transaction entity.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use kreg_core::{codes, outcome_code, KtmApi, NativeError, TransactionHandle};
use tracing::{debug, trace, warn};

use crate::error::{TransactionError, TransactionResult};
use crate::option::timeout_millis;

/// Transaction status, as reported by the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Not yet committed or rolled back.
    Active,
    Committed,
    /// Rolled back explicitly or by timeout.
    RolledBack,
    /// The handle has been closed.
    Closed,
    /// The manager reported an outcome this crate does not know.
    /// Only produced when rendering a transaction for diagnostics.
    Unknown,
}

impl Status {
    /// Map a raw outcome code. `None` for codes outside the known set.
    pub fn from_outcome(code: i32) -> Option<Status> {
        match code {
            outcome_code::UNDETERMINED => Some(Status::Active),
            outcome_code::COMMITTED => Some(Status::Committed),
            outcome_code::ABORTED => Some(Status::RolledBack),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Status::Active => "ACTIVE",
            Status::Committed => "COMMITTED",
            Status::RolledBack => "ROLLED_BACK",
            Status::Closed => "CLOSED",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Inner {
    api: Arc<dyn KtmApi>,
    handle: TransactionHandle,
    timeout: Duration,
    description: Option<String>,
    auto_commit: Cell<bool>,
    closed: Cell<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.closed.get() {
            return;
        }
        warn!(handle = %self.handle, "transaction dropped without close, closing it");
        if let Err(error) = self.api.close_transaction(self.handle) {
            warn!(handle = %self.handle, %error, "failed to close dropped transaction");
        }
    }
}

/// A kernel transaction.
///
/// Owns one native handle. Clones share the handle; the handle is closed
/// once, by [`close`](Transaction::close) or when the last clone is dropped.
/// Confined to the thread that created it.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<Inner>,
}

impl Transaction {
    /// Create a transaction. A zero `timeout` means no automatic rollback.
    pub fn create(
        api: Arc<dyn KtmApi>,
        timeout: Duration,
        description: Option<&str>,
    ) -> TransactionResult<Transaction> {
        let timeout_ms = timeout_millis(timeout)?;
        let handle = api
            .create_transaction(timeout_ms, description)
            .map_err(|e| TransactionError::native("CreateTransaction", e))?;
        debug!(%handle, timeout_ms, ?description, "transaction created");

        Ok(Transaction {
            inner: Rc::new(Inner {
                api,
                handle,
                timeout,
                description: description.map(str::to_string),
                auto_commit: Cell::new(true),
                closed: Cell::new(false),
            }),
        })
    }

    /// Query the current status. Never cached.
    ///
    /// # Panics
    ///
    /// If the transaction manager reports an outcome code outside the known
    /// set; that means this crate and the manager disagree about the protocol.
    pub fn status(&self) -> TransactionResult<Status> {
        match self.query()? {
            Ok(status) => Ok(status),
            Err(code) => panic!("unsupported transaction outcome {code} for {}", self.inner.handle),
        }
    }

    /// Like [`status`](Self::status), but never fails: errors and unknown
    /// outcomes render as `Unknown`.
    fn diagnostic_status(&self) -> Status {
        match self.query() {
            Ok(Ok(status)) => status,
            _ => Status::Unknown,
        }
    }

    /// Outer error is a failed query; inner error is an unrecognized outcome.
    fn query(&self) -> TransactionResult<Result<Status, i32>> {
        // A closed handle value may already belong to something else.
        if self.inner.closed.get() {
            return Ok(Ok(Status::Closed));
        }
        match self.inner.api.transaction_outcome(self.inner.handle) {
            Ok(code) => Ok(Status::from_outcome(code).ok_or(code)),
            Err(e) if e.is_invalid_handle() => Ok(Ok(Status::Closed)),
            Err(e) => Err(TransactionError::native("GetTransactionInformation", e)),
        }
    }

    pub fn commit(&self) -> TransactionResult<()> {
        self.require_open("CommitTransaction")?;
        self.inner
            .api
            .commit_transaction(self.inner.handle)
            .map_err(|e| TransactionError::native("CommitTransaction", e))?;
        debug!(handle = %self.inner.handle, "transaction committed");
        Ok(())
    }

    pub fn rollback(&self) -> TransactionResult<()> {
        self.require_open("RollbackTransaction")?;
        self.inner
            .api
            .rollback_transaction(self.inner.handle)
            .map_err(|e| TransactionError::native("RollbackTransaction", e))?;
        debug!(handle = %self.inner.handle, "transaction rolled back");
        Ok(())
    }

    /// Release the handle. Closing an active transaction rolls it back.
    /// Closing again is a no-op.
    pub fn close(&self) -> TransactionResult<()> {
        if self.inner.closed.replace(true) {
            trace!(handle = %self.inner.handle, "transaction already closed");
            return Ok(());
        }
        self.inner
            .api
            .close_transaction(self.inner.handle)
            .map_err(|e| TransactionError::native("CloseHandle", e))?;
        trace!(handle = %self.inner.handle, "transaction closed");
        Ok(())
    }

    fn require_open(&self, operation: &'static str) -> TransactionResult<()> {
        if self.inner.closed.get() {
            return Err(TransactionError::native(
                operation,
                NativeError::new(codes::INVALID_HANDLE),
            ));
        }
        Ok(())
    }

    /// Whether a policy that created this transaction commits it when the
    /// action succeeds. Defaults to true.
    pub fn auto_commit(&self) -> bool {
        self.inner.auto_commit.get()
    }

    pub fn set_auto_commit(&self, auto_commit: bool) {
        self.inner.auto_commit.set(auto_commit);
    }

    pub fn handle(&self) -> TransactionHandle {
        self.inner.handle
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }
}

/// Clones of one transaction are equal; distinct transactions never are.
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Transaction {}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction[{}, {}]", self.inner.handle, self.diagnostic_status())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.inner.handle)
            .field("timeout", &self.inner.timeout)
            .field("description", &self.inner.description)
            .field("auto_commit", &self.inner.auto_commit.get())
            .field("closed", &self.inner.closed.get())
            .finish()
    }
}

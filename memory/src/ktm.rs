//! Transaction manager.

use std::time::{Duration, Instant};

use kreg_core::{codes, outcome, outcome_code, KtmApi, NativeResult, TransactionHandle};
use tracing::{debug, trace};

use crate::tree::{Hives, Mutation};
use crate::{last_error, set_last_error, MemoryNative};

/// Longest accepted transaction description, in UTF-16 units.
pub const MAX_DESCRIPTION_LENGTH: usize = 64;

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active.
    Active,
    /// Changes were applied to the live trees.
    Committed,
    /// Changes were discarded: explicitly, by timeout, on a commit conflict,
    /// or by closing while active.
    RolledBack,
}

#[derive(Debug)]
pub(crate) struct TransactionRecord {
    pub description: Option<String>,
    pub timeout: Option<Duration>,
    pub created: Instant,
    pub state: TransactionState,
    /// Private copy of the trees, taken on first registry access.
    pub workspace: Option<Hives>,
    /// Mutations to replay on commit, in order.
    pub log: Vec<Mutation>,
}

impl TransactionRecord {
    fn new(timeout_ms: u32, description: Option<&str>) -> Self {
        Self {
            description: description.map(str::to_string),
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(u64::from(timeout_ms))),
            created: Instant::now(),
            state: TransactionState::Active,
            workspace: None,
            log: Vec::new(),
        }
    }

    /// Roll back an active transaction whose timeout has elapsed.
    pub fn expire_if_due(&mut self) {
        if self.state != TransactionState::Active {
            return;
        }
        if let Some(timeout) = self.timeout {
            if self.created.elapsed() >= timeout {
                debug!(description = ?self.description, ?timeout, "transaction timed out");
                self.discard();
            }
        }
    }

    fn discard(&mut self) {
        self.state = TransactionState::RolledBack;
        self.workspace = None;
        self.log.clear();
    }

    fn outcome(&self) -> i32 {
        match self.state {
            TransactionState::Active => outcome_code::UNDETERMINED,
            TransactionState::Committed => outcome_code::COMMITTED,
            TransactionState::RolledBack => outcome_code::ABORTED,
        }
    }
}

// ========== Native-convention entry points ==========

impl MemoryNative {
    /// Returns the invalid sentinel and sets the last error on failure.
    fn raw_create_transaction(&self, timeout_ms: u32, description: Option<&str>) -> TransactionHandle {
        if description.is_some_and(|d| d.encode_utf16().count() > MAX_DESCRIPTION_LENGTH) {
            set_last_error(codes::INVALID_PARAMETER);
            return TransactionHandle::INVALID;
        }

        let mut state = self.state.lock();
        let handle = state.allocate_handle();
        state
            .transactions
            .insert(handle, TransactionRecord::new(timeout_ms, description));
        debug!(handle, timeout_ms, ?description, "transaction created");
        TransactionHandle::new(handle)
    }

    fn raw_get_transaction_outcome(&self, transaction: TransactionHandle, outcome: &mut i32) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.transactions.get_mut(&transaction.raw()) else {
            set_last_error(codes::INVALID_HANDLE);
            return false;
        };
        record.expire_if_due();
        *outcome = record.outcome();
        true
    }

    fn raw_commit_transaction(&self, transaction: TransactionHandle) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(record) = state.transactions.get_mut(&transaction.raw()) else {
            set_last_error(codes::INVALID_HANDLE);
            return false;
        };
        record.expire_if_due();
        match record.state {
            TransactionState::Committed => {
                set_last_error(codes::TRANSACTION_ALREADY_COMMITTED);
                false
            }
            TransactionState::RolledBack => {
                set_last_error(codes::TRANSACTION_ALREADY_ABORTED);
                false
            }
            TransactionState::Active => {
                // Replay onto a staged copy; the live trees change only if
                // every step still applies.
                let mut staged = state.hives.clone();
                let conflict = record
                    .log
                    .iter()
                    .find_map(|mutation| mutation.apply(&mut staged).err().map(|code| (mutation, code)));
                if let Some((mutation, code)) = conflict {
                    debug!(%transaction, ?mutation, code, "commit conflict, transaction rolled back");
                    record.discard();
                    set_last_error(codes::TRANSACTIONAL_CONFLICT);
                    return false;
                }
                state.hives = staged;
                record.log.clear();
                record.workspace = None;
                record.state = TransactionState::Committed;
                debug!(%transaction, "transaction committed");
                true
            }
        }
    }

    fn raw_rollback_transaction(&self, transaction: TransactionHandle) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.transactions.get_mut(&transaction.raw()) else {
            set_last_error(codes::INVALID_HANDLE);
            return false;
        };
        record.expire_if_due();
        match record.state {
            TransactionState::Committed => {
                set_last_error(codes::TRANSACTION_ALREADY_COMMITTED);
                false
            }
            TransactionState::RolledBack => {
                set_last_error(codes::TRANSACTION_ALREADY_ABORTED);
                false
            }
            TransactionState::Active => {
                record.discard();
                debug!(%transaction, "transaction rolled back");
                true
            }
        }
    }

    fn raw_close_transaction(&self, transaction: TransactionHandle) -> bool {
        let mut state = self.state.lock();
        let Some(mut record) = state.transactions.remove(&transaction.raw()) else {
            set_last_error(codes::INVALID_HANDLE);
            return false;
        };
        // Each handle is the transaction's only reference, so closing an
        // active one rolls it back.
        if record.state == TransactionState::Active {
            record.discard();
            debug!(%transaction, description = ?record.description, "transaction closed while active, rolled back");
        } else {
            trace!(%transaction, state = ?record.state, "transaction closed");
        }
        true
    }
}

impl KtmApi for MemoryNative {
    fn create_transaction(
        &self,
        timeout_ms: u32,
        description: Option<&str>,
    ) -> NativeResult<TransactionHandle> {
        outcome::check_handle(self.raw_create_transaction(timeout_ms, description), last_error)
    }

    fn transaction_outcome(&self, transaction: TransactionHandle) -> NativeResult<i32> {
        let mut code = 0;
        outcome::check_bool(self.raw_get_transaction_outcome(transaction, &mut code), last_error)?;
        Ok(code)
    }

    fn commit_transaction(&self, transaction: TransactionHandle) -> NativeResult<()> {
        outcome::check_bool(self.raw_commit_transaction(transaction), last_error)
    }

    fn rollback_transaction(&self, transaction: TransactionHandle) -> NativeResult<()> {
        outcome::check_bool(self.raw_rollback_transaction(transaction), last_error)
    }

    fn close_transaction(&self, transaction: TransactionHandle) -> NativeResult<()> {
        outcome::check_bool(self.raw_close_transaction(transaction), last_error)
    }
}

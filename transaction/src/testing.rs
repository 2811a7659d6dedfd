//! A recording transaction manager for tests.

use std::sync::Arc;

use kreg_core::{KtmApi, NativeError, NativeResult, TransactionHandle};
use kreg_memory::MemoryNative;
use parking_lot::Mutex;

/// Native calls seen so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Calls {
    pub create: usize,
    pub outcome: usize,
    pub commit: usize,
    pub rollback: usize,
    pub close: usize,
}

#[derive(Debug, Default)]
struct Faults {
    create: Option<u32>,
    outcome: Option<Result<i32, u32>>,
    commit: Option<u32>,
    close: Option<u32>,
}

/// Counts every call and forwards it to an in-memory manager, unless a
/// fault has been injected for that primitive.
#[derive(Debug, Default)]
pub(crate) struct RecordingKtm {
    inner: MemoryNative,
    calls: Mutex<Calls>,
    faults: Mutex<Faults>,
}

impl RecordingKtm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Calls {
        *self.calls.lock()
    }

    pub fn inner(&self) -> &MemoryNative {
        &self.inner
    }

    pub fn fail_create(&self, code: u32) {
        self.faults.lock().create = Some(code);
    }

    /// Make outcome queries report `code` regardless of the real state.
    pub fn report_outcome(&self, code: i32) {
        self.faults.lock().outcome = Some(Ok(code));
    }

    pub fn fail_outcome(&self, code: u32) {
        self.faults.lock().outcome = Some(Err(code));
    }

    pub fn fail_commit(&self, code: u32) {
        self.faults.lock().commit = Some(code);
    }

    pub fn fail_close(&self, code: u32) {
        self.faults.lock().close = Some(code);
    }
}

impl KtmApi for RecordingKtm {
    fn create_transaction(
        &self,
        timeout_ms: u32,
        description: Option<&str>,
    ) -> NativeResult<TransactionHandle> {
        self.calls.lock().create += 1;
        if let Some(code) = self.faults.lock().create {
            return Err(NativeError::new(code));
        }
        self.inner.create_transaction(timeout_ms, description)
    }

    fn transaction_outcome(&self, transaction: TransactionHandle) -> NativeResult<i32> {
        self.calls.lock().outcome += 1;
        if let Some(fault) = self.faults.lock().outcome {
            return fault.map_err(NativeError::new);
        }
        self.inner.transaction_outcome(transaction)
    }

    fn commit_transaction(&self, transaction: TransactionHandle) -> NativeResult<()> {
        self.calls.lock().commit += 1;
        if let Some(code) = self.faults.lock().commit {
            return Err(NativeError::new(code));
        }
        self.inner.commit_transaction(transaction)
    }

    fn rollback_transaction(&self, transaction: TransactionHandle) -> NativeResult<()> {
        self.calls.lock().rollback += 1;
        self.inner.rollback_transaction(transaction)
    }

    fn close_transaction(&self, transaction: TransactionHandle) -> NativeResult<()> {
        self.calls.lock().close += 1;
        if let Some(code) = self.faults.lock().close {
            return Err(NativeError::new(code));
        }
        self.inner.close_transaction(transaction)
    }
}

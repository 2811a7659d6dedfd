//! kreg In-Memory Backend
//!
//! A process-local implementation of both native surfaces:
//! - `KtmApi`: transactions with timeouts, commit, rollback and
//!   rollback-on-last-close
//! - `RegistryApi`: the five predefined trees with plain and transacted
//!   key/value primitives
//!
//! Transacted work happens in a private copy of the trees taken on the
//! transaction's first registry access, and is replayed onto the live trees
//! on commit. Plain callers never observe uncommitted transacted changes. A
//! commit whose log no longer applies to the live trees fails with
//! `TRANSACTIONAL_CONFLICT`, rolls back, and leaves the live trees untouched.
//!
//! The transaction entry points follow the native boolean/last-error
//! convention internally and the registry entry points the status-code
//! convention; both are normalized through `kreg_core::outcome` before they
//! leave the crate.

mod ktm;
mod registry;
mod tree;

use std::cell::Cell;
use std::collections::HashMap;

use kreg_core::{KeyHandle, TransactionHandle};
use parking_lot::Mutex;

pub use ktm::{TransactionState, MAX_DESCRIPTION_LENGTH};

use ktm::TransactionRecord;
use registry::OpenKey;
use tree::{Hives, KeyPath};

thread_local! {
    static LAST_ERROR: Cell<u32> = const { Cell::new(0) };
}

/// Record the calling thread's last error.
fn set_last_error(code: u32) {
    LAST_ERROR.with(|cell| cell.set(code));
}

/// Read the calling thread's last error.
fn last_error() -> u32 {
    LAST_ERROR.with(Cell::get)
}

/// First handle value handed out. Keeps clear of small integers and the
/// predefined root range.
const FIRST_HANDLE: u64 = 0x1000;

/// Shared state behind the backend's lock.
#[derive(Debug)]
struct State {
    hives: Hives,
    transactions: HashMap<u64, TransactionRecord>,
    keys: HashMap<u64, OpenKey>,
    protected: Vec<KeyPath>,
    next_handle: u64,
}

impl State {
    fn new() -> Self {
        Self {
            hives: Hives::new(),
            transactions: HashMap::new(),
            keys: HashMap::new(),
            protected: Vec::new(),
            next_handle: FIRST_HANDLE,
        }
    }

    /// Handles are never reused, so a stale handle can't alias a new object.
    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 4;
        handle
    }
}

/// In-memory transaction manager and registry.
///
/// Share it through an `Arc`; both capability traits are implemented on the
/// same value so transacted registry calls see the transactions it creates.
#[derive(Debug)]
pub struct MemoryNative {
    state: Mutex<State>,
}

impl MemoryNative {
    /// Create a backend with five empty predefined trees.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
        }
    }

    /// Make the key at `path` under `root`, and everything beneath it,
    /// read-only: modifying opens, creates, deletes, renames and value writes
    /// fail with `ACCESS_DENIED`.
    pub fn protect(&self, root: KeyHandle, path: &str) {
        self.state
            .lock()
            .protected
            .push(KeyPath::root(root.raw()).join(path));
    }

    /// Number of transaction handles not yet closed.
    pub fn open_transaction_count(&self) -> usize {
        self.state.lock().transactions.len()
    }

    /// Number of key handles not yet closed.
    pub fn open_key_count(&self) -> usize {
        self.state.lock().keys.len()
    }

    /// State of a transaction whose handle is still open.
    pub fn transaction_state(&self, transaction: TransactionHandle) -> Option<TransactionState> {
        let mut state = self.state.lock();
        let record = state.transactions.get_mut(&transaction.raw())?;
        record.expire_if_due();
        Some(record.state)
    }
}

impl Default for MemoryNative {
    fn default() -> Self {
        Self::new()
    }
}

//! The native capability surface.
//!
//! The transaction and registry layers never call the OS directly. They are
//! handed an implementation of these traits at construction time, which keeps
//! the propagation engine testable against doubles and lets the in-memory
//! backend stand in where the OS primitives are unavailable.

use std::time::SystemTime;

use crate::access::Access;
use crate::error::NativeResult;
use crate::handle::{KeyHandle, TransactionHandle};
use crate::value_type::ValueData;

/// Raw transaction outcome codes reported by the transaction manager.
pub mod outcome_code {
    /// Not yet decided; the transaction is still active.
    pub const UNDETERMINED: i32 = 1;
    pub const COMMITTED: i32 = 2;
    pub const ABORTED: i32 = 3;
}

/// Transaction manager primitives.
pub trait KtmApi: Send + Sync {
    /// Create a transaction. A `timeout_ms` of zero means no automatic timeout.
    fn create_transaction(
        &self,
        timeout_ms: u32,
        description: Option<&str>,
    ) -> NativeResult<TransactionHandle>;

    /// Query the transaction's outcome code (see [`outcome_code`]).
    fn transaction_outcome(&self, transaction: TransactionHandle) -> NativeResult<i32>;

    fn commit_transaction(&self, transaction: TransactionHandle) -> NativeResult<()>;

    fn rollback_transaction(&self, transaction: TransactionHandle) -> NativeResult<()>;

    /// Release the handle. Closing the last handle of an active transaction
    /// rolls it back.
    fn close_transaction(&self, transaction: TransactionHandle) -> NativeResult<()>;
}

/// Whether a create call made a new key or opened an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    CreatedNew,
    OpenedExisting,
}

/// Summary returned by a key-info query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub sub_key_count: u32,
    pub value_count: u32,
    /// Longest sub-key name, in UTF-16 units.
    pub max_sub_key_len: u32,
    /// Longest value name, in UTF-16 units.
    pub max_value_name_len: u32,
    /// Largest value payload, in bytes.
    pub max_value_len: u32,
    pub last_write: SystemTime,
}

/// Registry primitives.
///
/// Key-level primitives come in plain and transacted flavours. A key handle
/// opened through a transacted entry point stays bound to that transaction,
/// so the handle-only primitives (`query_info`, `enum_*`) observe the
/// transaction's view without taking the handle again.
pub trait RegistryApi: Send + Sync {
    // ========== Keys ==========

    fn open_key(&self, parent: KeyHandle, sub_key: &str, access: Access) -> NativeResult<KeyHandle>;

    fn open_key_transacted(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
        transaction: TransactionHandle,
    ) -> NativeResult<KeyHandle>;

    /// Create `sub_key` (and any missing intermediate keys) or open it if it exists.
    fn create_key(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
    ) -> NativeResult<(KeyHandle, Disposition)>;

    fn create_key_transacted(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
        transaction: TransactionHandle,
    ) -> NativeResult<(KeyHandle, Disposition)>;

    /// Delete `sub_key`, which must have no sub-keys of its own.
    fn delete_key(&self, parent: KeyHandle, sub_key: &str) -> NativeResult<()>;

    fn delete_key_transacted(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        transaction: TransactionHandle,
    ) -> NativeResult<()>;

    /// Rename `sub_key` of `parent` to `new_name` (a single name, not a path).
    fn rename_key(&self, parent: KeyHandle, sub_key: &str, new_name: &str) -> NativeResult<()>;

    fn rename_key_transacted(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        new_name: &str,
        transaction: TransactionHandle,
    ) -> NativeResult<()>;

    fn close_key(&self, key: KeyHandle) -> NativeResult<()>;

    // ========== Queries ==========

    fn query_info(&self, key: KeyHandle) -> NativeResult<KeyInfo>;

    /// Name of the `index`-th sub-key; `NO_MORE_ITEMS` past the end.
    fn enum_key(&self, key: KeyHandle, index: u32) -> NativeResult<String>;

    /// Name and payload of the `index`-th value; `NO_MORE_ITEMS` past the end.
    fn enum_value(&self, key: KeyHandle, index: u32) -> NativeResult<(String, ValueData)>;

    // ========== Values ==========

    fn get_value(&self, key: KeyHandle, name: &str) -> NativeResult<ValueData>;

    fn get_value_transacted(
        &self,
        key: KeyHandle,
        name: &str,
        transaction: TransactionHandle,
    ) -> NativeResult<ValueData>;

    fn set_value(&self, key: KeyHandle, name: &str, value: &ValueData) -> NativeResult<()>;

    fn set_value_transacted(
        &self,
        key: KeyHandle,
        name: &str,
        value: &ValueData,
        transaction: TransactionHandle,
    ) -> NativeResult<()>;

    fn delete_value(&self, key: KeyHandle, name: &str) -> NativeResult<()>;

    fn delete_value_transacted(
        &self,
        key: KeyHandle,
        name: &str,
        transaction: TransactionHandle,
    ) -> NativeResult<()>;
}

//! Registry primitives.

use kreg_core::{
    codes, outcome, Access, Disposition, KeyHandle, KeyInfo, NativeError, NativeResult,
    RegistryApi, TransactionHandle, ValueData,
};
use tracing::trace;

use crate::ktm::TransactionState;
use crate::tree::{fold, Hives, KeyNode, KeyPath, Mutation};
use crate::{MemoryNative, State};

/// An open key handle.
#[derive(Debug, Clone)]
pub(crate) struct OpenKey {
    path: KeyPath,
    access: Access,
    /// Transaction the handle was opened under; later calls through the
    /// handle run in it.
    transaction: Option<TransactionHandle>,
}

impl OpenKey {
    fn predefined(handle: KeyHandle) -> Self {
        Self {
            path: KeyPath::root(handle.raw()),
            access: Access::ALL_ACCESS,
            transaction: None,
        }
    }

    fn require(&self, access: Access) -> Result<(), u32> {
        if self.access.contains(access) {
            Ok(())
        } else {
            Err(codes::ACCESS_DENIED)
        }
    }
}

impl State {
    fn key(&self, handle: KeyHandle) -> Result<OpenKey, u32> {
        if handle.is_predefined() {
            return Ok(OpenKey::predefined(handle));
        }
        self.keys
            .get(&handle.raw())
            .cloned()
            .ok_or(codes::INVALID_HANDLE)
    }

    fn is_protected(&self, path: &KeyPath) -> bool {
        self.protected.iter().any(|p| path.is_within(p))
    }

    /// The trees a call observes: a transaction's workspace, or the live trees.
    fn view(&mut self, transaction: Option<TransactionHandle>) -> Result<&mut Hives, u32> {
        let Some(transaction) = transaction else {
            return Ok(&mut self.hives);
        };
        let State {
            hives,
            transactions,
            ..
        } = self;
        let record = transactions
            .get_mut(&transaction.raw())
            .ok_or(codes::INVALID_HANDLE)?;
        record.expire_if_due();
        if record.state != TransactionState::Active {
            return Err(codes::TRANSACTION_NOT_ACTIVE);
        }
        Ok(record.workspace.get_or_insert_with(|| hives.clone()))
    }

    /// Apply a mutation to the observed trees, logging it for replay when
    /// it ran inside a transaction.
    fn mutate(&mut self, transaction: Option<TransactionHandle>, mutation: Mutation) -> u32 {
        let applied = self
            .view(transaction)
            .and_then(|hives| mutation.apply(hives));
        if let Err(code) = applied {
            return code;
        }
        if let Some(transaction) = transaction {
            if let Some(record) = self.transactions.get_mut(&transaction.raw()) {
                record.log.push(mutation);
            }
        }
        codes::SUCCESS
    }

    /// Resolve `parent\sub_key` and check the parent still exists.
    fn target(
        &mut self,
        parent: &OpenKey,
        sub_key: &str,
        transaction: Option<TransactionHandle>,
    ) -> Result<KeyPath, u32> {
        if !self.view(transaction)?.exists(&parent.path) {
            return Err(codes::KEY_DELETED);
        }
        Ok(parent.path.join(sub_key))
    }

    fn insert_key(&mut self, key: OpenKey) -> KeyHandle {
        let handle = self.allocate_handle();
        self.keys.insert(handle, key);
        KeyHandle::new(handle)
    }

    // ========== Keys ==========

    fn open_key(
        &mut self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
        transaction: Option<TransactionHandle>,
    ) -> Result<KeyHandle, u32> {
        let parent = self.key(parent)?;
        let transaction = transaction.or(parent.transaction);
        let path = self.target(&parent, sub_key, transaction)?;
        if !self.view(transaction)?.exists(&path) {
            return Err(codes::FILE_NOT_FOUND);
        }
        if access.is_modifying() && self.is_protected(&path) {
            return Err(codes::ACCESS_DENIED);
        }
        Ok(self.insert_key(OpenKey {
            path,
            access,
            transaction,
        }))
    }

    fn create_key(
        &mut self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
        transaction: Option<TransactionHandle>,
    ) -> Result<(KeyHandle, Disposition), u32> {
        let parent = self.key(parent)?;
        let transaction = transaction.or(parent.transaction);
        let path = self.target(&parent, sub_key, transaction)?;
        let disposition = if self.view(transaction)?.exists(&path) {
            Disposition::OpenedExisting
        } else {
            parent.require(Access::CREATE_SUB_KEY)?;
            if self.is_protected(&path) {
                return Err(codes::ACCESS_DENIED);
            }
            into_result(self.mutate(transaction, Mutation::CreateKey(path.clone())))?;
            Disposition::CreatedNew
        };
        if access.is_modifying() && self.is_protected(&path) {
            return Err(codes::ACCESS_DENIED);
        }
        let handle = self.insert_key(OpenKey {
            path,
            access,
            transaction,
        });
        Ok((handle, disposition))
    }

    fn delete_key(
        &mut self,
        parent: KeyHandle,
        sub_key: &str,
        transaction: Option<TransactionHandle>,
    ) -> u32 {
        let result = self.key(parent).and_then(|parent| {
            let transaction = transaction.or(parent.transaction);
            let path = self.target(&parent, sub_key, transaction)?;
            if path.components.is_empty() || self.is_protected(&path) {
                return Err(codes::ACCESS_DENIED);
            }
            into_result(self.mutate(transaction, Mutation::DeleteKey(path)))
        });
        status(result)
    }

    fn rename_key(
        &mut self,
        parent: KeyHandle,
        sub_key: &str,
        new_name: &str,
        transaction: Option<TransactionHandle>,
    ) -> u32 {
        let result = self.key(parent).and_then(|parent| {
            let transaction = transaction.or(parent.transaction);
            let path = self.target(&parent, sub_key, transaction)?;
            if path.components.is_empty() || self.is_protected(&path) {
                return Err(codes::ACCESS_DENIED);
            }
            into_result(self.mutate(transaction, Mutation::RenameKey(path, new_name.to_string())))
        });
        status(result)
    }

    fn close_key(&mut self, key: KeyHandle) -> u32 {
        if key.is_predefined() {
            return codes::SUCCESS;
        }
        match self.keys.remove(&key.raw()) {
            Some(_) => codes::SUCCESS,
            None => codes::INVALID_HANDLE,
        }
    }

    // ========== Queries ==========

    /// The node behind an open handle, in the view the handle is bound to.
    fn with_node<T>(
        &mut self,
        key: KeyHandle,
        access: Access,
        transaction: Option<TransactionHandle>,
        read: impl FnOnce(&KeyNode) -> Result<T, u32>,
    ) -> Result<T, u32> {
        let key = self.key(key)?;
        key.require(access)?;
        let transaction = transaction.or(key.transaction);
        let node = self
            .view(transaction)?
            .find(&key.path)
            .ok_or(codes::KEY_DELETED)?;
        read(node)
    }

    fn enum_key(&mut self, key: KeyHandle, index: u32) -> Result<String, u32> {
        self.with_node(key, Access::ENUMERATE_SUB_KEYS, None, |node| {
            node.sub_keys
                .values()
                .nth(index as usize)
                .map(|k| k.name.clone())
                .ok_or(codes::NO_MORE_ITEMS)
        })
    }

    fn enum_value(&mut self, key: KeyHandle, index: u32) -> Result<(String, ValueData), u32> {
        self.with_node(key, Access::QUERY_VALUE, None, |node| {
            node.values
                .values()
                .nth(index as usize)
                .map(|v| (v.name.clone(), v.data.clone()))
                .ok_or(codes::NO_MORE_ITEMS)
        })
    }

    // ========== Values ==========

    fn get_value(
        &mut self,
        key: KeyHandle,
        name: &str,
        transaction: Option<TransactionHandle>,
    ) -> Result<ValueData, u32> {
        self.with_node(key, Access::QUERY_VALUE, transaction, |node| {
            node.values
                .get(&fold(name))
                .map(|v| v.data.clone())
                .ok_or(codes::FILE_NOT_FOUND)
        })
    }

    fn write_value(
        &mut self,
        key: KeyHandle,
        transaction: Option<TransactionHandle>,
        mutation: impl FnOnce(KeyPath) -> Mutation,
    ) -> u32 {
        let result = self.key(key).and_then(|key| {
            key.require(Access::SET_VALUE)?;
            if self.is_protected(&key.path) {
                return Err(codes::ACCESS_DENIED);
            }
            let transaction = transaction.or(key.transaction);
            into_result(self.mutate(transaction, mutation(key.path)))
        });
        status(result)
    }
}

fn into_result(status: u32) -> Result<(), u32> {
    if status == codes::SUCCESS {
        Ok(())
    } else {
        Err(status)
    }
}

fn status(result: Result<(), u32>) -> u32 {
    match result {
        Ok(()) => codes::SUCCESS,
        Err(code) => code,
    }
}

fn native<T>(result: Result<T, u32>) -> NativeResult<T> {
    result.map_err(NativeError::new)
}

impl RegistryApi for MemoryNative {
    fn open_key(&self, parent: KeyHandle, sub_key: &str, access: Access) -> NativeResult<KeyHandle> {
        trace!(%parent, sub_key, "open key");
        native(self.state.lock().open_key(parent, sub_key, access, None))
    }

    fn open_key_transacted(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
        transaction: TransactionHandle,
    ) -> NativeResult<KeyHandle> {
        trace!(%parent, sub_key, %transaction, "open key transacted");
        native(
            self.state
                .lock()
                .open_key(parent, sub_key, access, Some(transaction)),
        )
    }

    fn create_key(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
    ) -> NativeResult<(KeyHandle, Disposition)> {
        trace!(%parent, sub_key, "create key");
        native(self.state.lock().create_key(parent, sub_key, access, None))
    }

    fn create_key_transacted(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
        transaction: TransactionHandle,
    ) -> NativeResult<(KeyHandle, Disposition)> {
        trace!(%parent, sub_key, %transaction, "create key transacted");
        native(
            self.state
                .lock()
                .create_key(parent, sub_key, access, Some(transaction)),
        )
    }

    fn delete_key(&self, parent: KeyHandle, sub_key: &str) -> NativeResult<()> {
        outcome::check_status(self.state.lock().delete_key(parent, sub_key, None))
    }

    fn delete_key_transacted(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        transaction: TransactionHandle,
    ) -> NativeResult<()> {
        outcome::check_status(
            self.state
                .lock()
                .delete_key(parent, sub_key, Some(transaction)),
        )
    }

    fn rename_key(&self, parent: KeyHandle, sub_key: &str, new_name: &str) -> NativeResult<()> {
        outcome::check_status(
            self.state
                .lock()
                .rename_key(parent, sub_key, new_name, None),
        )
    }

    fn rename_key_transacted(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        new_name: &str,
        transaction: TransactionHandle,
    ) -> NativeResult<()> {
        outcome::check_status(self.state.lock().rename_key(
            parent,
            sub_key,
            new_name,
            Some(transaction),
        ))
    }

    fn close_key(&self, key: KeyHandle) -> NativeResult<()> {
        outcome::check_status(self.state.lock().close_key(key))
    }

    fn query_info(&self, key: KeyHandle) -> NativeResult<KeyInfo> {
        native(
            self.state
                .lock()
                .with_node(key, Access::QUERY_VALUE, None, |node| Ok(node.info())),
        )
    }

    fn enum_key(&self, key: KeyHandle, index: u32) -> NativeResult<String> {
        native(self.state.lock().enum_key(key, index))
    }

    fn enum_value(&self, key: KeyHandle, index: u32) -> NativeResult<(String, ValueData)> {
        native(self.state.lock().enum_value(key, index))
    }

    fn get_value(&self, key: KeyHandle, name: &str) -> NativeResult<ValueData> {
        native(self.state.lock().get_value(key, name, None))
    }

    fn get_value_transacted(
        &self,
        key: KeyHandle,
        name: &str,
        transaction: TransactionHandle,
    ) -> NativeResult<ValueData> {
        native(self.state.lock().get_value(key, name, Some(transaction)))
    }

    fn set_value(&self, key: KeyHandle, name: &str, value: &ValueData) -> NativeResult<()> {
        outcome::check_status(self.state.lock().write_value(key, None, |path| {
            Mutation::SetValue(path, name.to_string(), value.clone())
        }))
    }

    fn set_value_transacted(
        &self,
        key: KeyHandle,
        name: &str,
        value: &ValueData,
        transaction: TransactionHandle,
    ) -> NativeResult<()> {
        outcome::check_status(self.state.lock().write_value(key, Some(transaction), |path| {
            Mutation::SetValue(path, name.to_string(), value.clone())
        }))
    }

    fn delete_value(&self, key: KeyHandle, name: &str) -> NativeResult<()> {
        outcome::check_status(self.state.lock().write_value(key, None, |path| {
            Mutation::DeleteValue(path, name.to_string())
        }))
    }

    fn delete_value_transacted(
        &self,
        key: KeyHandle,
        name: &str,
        transaction: TransactionHandle,
    ) -> NativeResult<()> {
        outcome::check_status(self.state.lock().write_value(key, Some(transaction), |path| {
            Mutation::DeleteValue(path, name.to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kreg_core::{KtmApi, RegType};

    const HKCU: KeyHandle = KeyHandle::HKEY_CURRENT_USER;

    fn dword(value: u32) -> ValueData {
        ValueData::new(RegType::Dword, value.to_le_bytes().to_vec())
    }

    fn read(native: &MemoryNative, path: &str, name: &str) -> NativeResult<ValueData> {
        let key = native.open_key(HKCU, path, Access::READ)?;
        let value = native.get_value(key, name);
        native.close_key(key)?;
        value
    }

    #[test]
    fn test_create_open_and_close() {
        // GIVEN
        let native = MemoryNative::new();

        // WHEN
        let (key, first) = native.create_key(HKCU, "Software\\Vendor", Access::ALL_ACCESS).unwrap();
        let (again, second) = native.create_key(HKCU, "software\\vendor", Access::READ).unwrap();

        // THEN
        assert_eq!(first, Disposition::CreatedNew);
        assert_eq!(second, Disposition::OpenedExisting);
        assert_eq!(native.open_key_count(), 2);
        native.close_key(key).unwrap();
        native.close_key(again).unwrap();
        assert_eq!(native.open_key_count(), 0);
        assert!(native.close_key(key).unwrap_err().is_invalid_handle());
    }

    #[test]
    fn test_open_missing_key() {
        let native = MemoryNative::new();
        let err = native.open_key(HKCU, "Nope", Access::READ).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_transacted_writes_are_isolated_until_commit() {
        // GIVEN
        let native = MemoryNative::new();
        let tx = native.create_transaction(0, None).unwrap();
        let (key, _) = native
            .create_key_transacted(HKCU, "App", Access::ALL_ACCESS, tx)
            .unwrap();
        native.set_value_transacted(key, "Count", &dword(1), tx).unwrap();
        native.close_key(key).unwrap();

        // WHEN / THEN - invisible outside the transaction
        assert!(native.open_key(HKCU, "App", Access::READ).unwrap_err().is_not_found());
        let inside = native.open_key_transacted(HKCU, "App", Access::READ, tx).unwrap();
        assert_eq!(native.get_value(inside, "count").unwrap(), dword(1));
        native.close_key(inside).unwrap();

        // WHEN / THEN - visible after commit
        native.commit_transaction(tx).unwrap();
        native.close_transaction(tx).unwrap();
        assert_eq!(read(&native, "App", "Count").unwrap(), dword(1));
    }

    #[test]
    fn test_closing_active_transaction_discards_writes() {
        // GIVEN
        let native = MemoryNative::new();
        let tx = native.create_transaction(0, None).unwrap();
        let (key, _) = native
            .create_key_transacted(HKCU, "Temp", Access::ALL_ACCESS, tx)
            .unwrap();
        native.close_key(key).unwrap();

        // WHEN
        native.close_transaction(tx).unwrap();

        // THEN
        assert!(native.open_key(HKCU, "Temp", Access::READ).unwrap_err().is_not_found());
    }

    #[test]
    fn test_handle_keeps_its_transaction() {
        // GIVEN - a handle opened transacted, written through the plain entry point
        let native = MemoryNative::new();
        native.create_key(HKCU, "Bound", Access::ALL_ACCESS).map(|(k, _)| native.close_key(k)).unwrap().unwrap();
        let tx = native.create_transaction(0, None).unwrap();
        let key = native.open_key_transacted(HKCU, "Bound", Access::ALL_ACCESS, tx).unwrap();

        // WHEN
        native.set_value(key, "v", &dword(9)).unwrap();
        native.close_key(key).unwrap();

        // THEN
        assert!(read(&native, "Bound", "v").unwrap_err().is_not_found());
        native.rollback_transaction(tx).unwrap();
        native.close_transaction(tx).unwrap();
        assert!(read(&native, "Bound", "v").unwrap_err().is_not_found());
    }

    #[test]
    fn test_transacted_call_after_commit_is_rejected() {
        let native = MemoryNative::new();
        let tx = native.create_transaction(0, None).unwrap();
        native.commit_transaction(tx).unwrap();

        let err = native
            .create_key_transacted(HKCU, "Late", Access::ALL_ACCESS, tx)
            .unwrap_err();

        assert_eq!(err.code(), codes::TRANSACTION_NOT_ACTIVE);
    }

    #[test]
    fn test_commit_replays_rename_and_delete() {
        // GIVEN
        let native = MemoryNative::new();
        for path in ["Old", "Doomed"] {
            let (key, _) = native.create_key(HKCU, path, Access::ALL_ACCESS).unwrap();
            native.close_key(key).unwrap();
        }
        let tx = native.create_transaction(0, None).unwrap();

        // WHEN
        native.rename_key_transacted(HKCU, "Old", "New", tx).unwrap();
        native.delete_key_transacted(HKCU, "Doomed", tx).unwrap();
        assert!(native.open_key(HKCU, "Old", Access::READ).map(|k| native.close_key(k)).is_ok());
        native.commit_transaction(tx).unwrap();
        native.close_transaction(tx).unwrap();

        // THEN
        assert!(native.open_key(HKCU, "Old", Access::READ).unwrap_err().is_not_found());
        assert!(native.open_key(HKCU, "Doomed", Access::READ).unwrap_err().is_not_found());
        let key = native.open_key(HKCU, "New", Access::READ).unwrap();
        native.close_key(key).unwrap();
    }

    #[test]
    fn test_commit_conflict_applies_nothing() {
        // GIVEN - a transaction writes into K and creates Other
        let native = MemoryNative::new();
        let (key, _) = native.create_key(HKCU, "K", Access::ALL_ACCESS).unwrap();
        native.close_key(key).unwrap();
        let tx = native.create_transaction(0, None).unwrap();
        let key = native.open_key_transacted(HKCU, "K", Access::ALL_ACCESS, tx).unwrap();
        native.set_value_transacted(key, "a", &dword(1), tx).unwrap();
        native.close_key(key).unwrap();
        let (other, _) = native
            .create_key_transacted(HKCU, "Other", Access::ALL_ACCESS, tx)
            .unwrap();
        native.close_key(other).unwrap();

        // WHEN - K is deleted outside the transaction before it commits
        native.delete_key(HKCU, "K").unwrap();
        let err = native.commit_transaction(tx).unwrap_err();

        // THEN
        assert_eq!(err.code(), codes::TRANSACTIONAL_CONFLICT);
        assert_eq!(native.transaction_state(tx), Some(TransactionState::RolledBack));
        assert!(native.open_key(HKCU, "Other", Access::READ).unwrap_err().is_not_found());
        assert!(native.open_key(HKCU, "K", Access::READ).unwrap_err().is_not_found());
        native.close_transaction(tx).unwrap();
        assert_eq!(native.open_key_count(), 0);
    }

    #[test]
    fn test_access_rights_are_enforced() {
        // GIVEN
        let native = MemoryNative::new();
        let (key, _) = native.create_key(HKCU, "K", Access::READ).unwrap();

        // WHEN
        let err = native.set_value(key, "v", &dword(1)).unwrap_err();

        // THEN
        assert_eq!(err.code(), codes::ACCESS_DENIED);
        native.close_key(key).unwrap();
    }

    #[test]
    fn test_protected_keys_deny_modification() {
        // GIVEN
        let native = MemoryNative::new();
        let (key, _) = native.create_key(HKCU, "Policies\\Locked", Access::ALL_ACCESS).unwrap();
        native.close_key(key).unwrap();
        native.protect(HKCU, "Policies");

        // WHEN / THEN
        assert_eq!(
            native.open_key(HKCU, "Policies\\Locked", Access::WRITE).unwrap_err().code(),
            codes::ACCESS_DENIED
        );
        assert_eq!(
            native.delete_key(HKCU, "Policies\\Locked").unwrap_err().code(),
            codes::ACCESS_DENIED
        );
        let key = native.open_key(HKCU, "Policies\\Locked", Access::READ).unwrap();
        native.close_key(key).unwrap();
    }

    #[test]
    fn test_stale_handle_reports_key_deleted() {
        // GIVEN
        let native = MemoryNative::new();
        let (key, _) = native.create_key(HKCU, "Gone", Access::ALL_ACCESS).unwrap();

        // WHEN
        native.delete_key(HKCU, "Gone").unwrap();

        // THEN
        assert_eq!(native.get_value(key, "v").unwrap_err().code(), codes::KEY_DELETED);
        native.close_key(key).unwrap();
    }

    #[test]
    fn test_enumeration() {
        // GIVEN
        let native = MemoryNative::new();
        let (key, _) = native.create_key(HKCU, "Root", Access::ALL_ACCESS).unwrap();
        for name in ["b", "a"] {
            let (child, _) = native.create_key(key, name, Access::READ).unwrap();
            native.close_key(child).unwrap();
        }
        native.set_value(key, "x", &dword(1)).unwrap();

        // WHEN
        let first = native.enum_key(key, 0).unwrap();
        let second = native.enum_key(key, 1).unwrap();
        let end = native.enum_key(key, 2).unwrap_err();
        let (value_name, value) = native.enum_value(key, 0).unwrap();
        let info = native.query_info(key).unwrap();

        // THEN
        assert_eq!((first.as_str(), second.as_str()), ("a", "b"));
        assert!(end.is_no_more_items());
        assert_eq!((value_name.as_str(), value), ("x", dword(1)));
        assert_eq!((info.sub_key_count, info.value_count, info.max_value_len), (2, 1, 4));
        native.close_key(key).unwrap();
    }

    #[test]
    fn test_root_cannot_be_deleted() {
        let native = MemoryNative::new();
        let err = native.delete_key(HKCU, "").unwrap_err();
        assert_eq!(err.code(), codes::ACCESS_DENIED);
    }
}

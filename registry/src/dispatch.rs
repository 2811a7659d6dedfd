//! Routing of registry primitives by ambient transaction.

use kreg_core::{
    Access, Disposition, KeyHandle, KeyInfo, NativeResult, RegistryApi, TransactionHandle,
    ValueData,
};
use kreg_transaction::ambient;
use tracing::{trace, warn};

/// Picks the transacted or plain entry point for each primitive.
///
/// Captures the ambient transaction once, so every primitive of one
/// registry operation runs in the same transaction.
pub(crate) struct Dispatcher<'a> {
    api: &'a dyn RegistryApi,
    transaction: Option<TransactionHandle>,
}

impl<'a> Dispatcher<'a> {
    pub fn current(api: &'a dyn RegistryApi) -> Self {
        Self {
            api,
            transaction: ambient::current().map(|tx| tx.handle()),
        }
    }

    pub fn transaction(&self) -> Option<TransactionHandle> {
        self.transaction
    }

    pub fn open_key(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
    ) -> NativeResult<OpenKey<'a>> {
        let handle = match self.transaction {
            Some(tx) => {
                trace!(%parent, sub_key, %tx, "RegOpenKeyTransacted");
                self.api.open_key_transacted(parent, sub_key, access, tx)?
            }
            None => {
                trace!(%parent, sub_key, "RegOpenKeyEx");
                self.api.open_key(parent, sub_key, access)?
            }
        };
        Ok(OpenKey::new(self.api, handle))
    }

    pub fn create_key(
        &self,
        parent: KeyHandle,
        sub_key: &str,
        access: Access,
    ) -> NativeResult<(OpenKey<'a>, Disposition)> {
        let (handle, disposition) = match self.transaction {
            Some(tx) => {
                trace!(%parent, sub_key, %tx, "RegCreateKeyTransacted");
                self.api.create_key_transacted(parent, sub_key, access, tx)?
            }
            None => {
                trace!(%parent, sub_key, "RegCreateKeyEx");
                self.api.create_key(parent, sub_key, access)?
            }
        };
        Ok((OpenKey::new(self.api, handle), disposition))
    }

    pub fn delete_key(&self, parent: KeyHandle, sub_key: &str) -> NativeResult<()> {
        match self.transaction {
            Some(tx) => {
                trace!(%parent, sub_key, %tx, "RegDeleteKeyTransacted");
                self.api.delete_key_transacted(parent, sub_key, tx)
            }
            None => {
                trace!(%parent, sub_key, "RegDeleteKeyEx");
                self.api.delete_key(parent, sub_key)
            }
        }
    }

    pub fn rename_key(&self, parent: KeyHandle, sub_key: &str, new_name: &str) -> NativeResult<()> {
        match self.transaction {
            Some(tx) => {
                trace!(%parent, sub_key, new_name, %tx, "RegRenameKey transacted");
                self.api.rename_key_transacted(parent, sub_key, new_name, tx)
            }
            None => {
                trace!(%parent, sub_key, new_name, "RegRenameKey");
                self.api.rename_key(parent, sub_key, new_name)
            }
        }
    }

    pub fn get_value(&self, key: &OpenKey<'_>, name: &str) -> NativeResult<ValueData> {
        match self.transaction {
            Some(tx) => {
                trace!(key = %key.handle, name, %tx, "RegGetValue transacted");
                self.api.get_value_transacted(key.handle, name, tx)
            }
            None => {
                trace!(key = %key.handle, name, "RegGetValue");
                self.api.get_value(key.handle, name)
            }
        }
    }

    pub fn set_value(&self, key: &OpenKey<'_>, name: &str, value: &ValueData) -> NativeResult<()> {
        match self.transaction {
            Some(tx) => {
                trace!(key = %key.handle, name, %tx, "RegSetValueEx transacted");
                self.api.set_value_transacted(key.handle, name, value, tx)
            }
            None => {
                trace!(key = %key.handle, name, "RegSetValueEx");
                self.api.set_value(key.handle, name, value)
            }
        }
    }

    pub fn delete_value(&self, key: &OpenKey<'_>, name: &str) -> NativeResult<()> {
        match self.transaction {
            Some(tx) => {
                trace!(key = %key.handle, name, %tx, "RegDeleteValue transacted");
                self.api.delete_value_transacted(key.handle, name, tx)
            }
            None => {
                trace!(key = %key.handle, name, "RegDeleteValue");
                self.api.delete_value(key.handle, name)
            }
        }
    }
}

/// An open key handle, closed on drop.
///
/// Handle-only primitives need no routing: the handle stays bound to the
/// transaction it was opened under.
pub(crate) struct OpenKey<'a> {
    api: &'a dyn RegistryApi,
    handle: KeyHandle,
}

impl<'a> OpenKey<'a> {
    fn new(api: &'a dyn RegistryApi, handle: KeyHandle) -> Self {
        Self { api, handle }
    }

    pub fn info(&self) -> NativeResult<KeyInfo> {
        self.api.query_info(self.handle)
    }

    /// All sub-key names, in enumeration order.
    pub fn sub_key_names(&self) -> NativeResult<Vec<String>> {
        collect(|index| self.api.enum_key(self.handle, index))
    }

    /// All values, in enumeration order.
    pub fn values(&self) -> NativeResult<Vec<(String, ValueData)>> {
        collect(|index| self.api.enum_value(self.handle, index))
    }
}

impl Drop for OpenKey<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.api.close_key(self.handle) {
            warn!(key = %self.handle, %error, "failed to close registry key");
        }
    }
}

/// Enumerate by index until the native layer reports no more items.
fn collect<T>(mut item: impl FnMut(u32) -> NativeResult<T>) -> NativeResult<Vec<T>> {
    let mut items = Vec::new();
    for index in 0.. {
        match item(index) {
            Ok(value) => items.push(value),
            Err(error) if error.is_no_more_items() => break,
            Err(error) => return Err(error),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kreg_memory::MemoryNative;
    use kreg_transaction::TransactionManager;
    use parking_lot::Mutex;
    use std::fmt;
    use std::sync::Arc;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    const HKCU: KeyHandle = KeyHandle::HKEY_CURRENT_USER;

    /// Captures event messages.
    #[derive(Clone, Default)]
    struct Messages(Arc<Mutex<Vec<String>>>);

    impl Messages {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    impl<S: Subscriber> Layer<S> for Messages {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut message = MessageField::default();
            event.record(&mut message);
            if let Some(message) = message.0 {
                self.0.lock().push(message);
            }
        }
    }

    #[derive(Default)]
    struct MessageField(Option<String>);

    impl Visit for MessageField {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = Some(format!("{value:?}"));
            }
        }
    }

    #[test]
    fn test_captures_ambient_transaction() {
        // GIVEN
        let native = Arc::new(MemoryNative::new());
        let manager = TransactionManager::new(native.clone());

        // WHEN
        let (inside, expected) = manager
            .required([])
            .unwrap()
            .call(|| {
                let dispatcher = Dispatcher::current(&*native);
                Ok::<_, ()>((dispatcher.transaction(), ambient::current().map(|tx| tx.handle())))
            })
            .unwrap();

        // THEN
        assert!(inside.is_some());
        assert_eq!(inside, expected);
        assert_eq!(Dispatcher::current(&*native).transaction(), None);
    }

    #[test]
    fn test_transacted_routing_is_isolated() {
        // GIVEN
        let native = Arc::new(MemoryNative::new());
        let manager = TransactionManager::new(native.clone());
        let state = manager.required([]).unwrap();

        // WHEN
        state
            .run(|| {
                let dispatcher = Dispatcher::current(&*native);
                let (key, _) = dispatcher.create_key(HKCU, "Routed", Access::QUERY_VALUE)?;
                drop(key);
                // plain call from inside the action does not see the write
                assert!(native.open_key(HKCU, "Routed", Access::READ).is_err());
                Ok::<_, kreg_core::NativeError>(())
            })
            .unwrap();

        // THEN
        let key = Dispatcher::current(&*native)
            .open_key(HKCU, "Routed", Access::READ)
            .unwrap();
        assert_eq!(key.sub_key_names().unwrap(), Vec::<String>::new());
        drop(key);
        assert_eq!(native.open_key_count(), 0);
    }

    #[test]
    fn test_get_value_traces_both_entry_points() {
        // GIVEN
        let native = Arc::new(MemoryNative::new());
        let manager = TransactionManager::new(native.clone());
        let messages = Messages::default();
        let subscriber = tracing_subscriber::registry().with(messages.clone());

        // WHEN
        tracing::subscriber::with_default(subscriber, || {
            let dispatcher = Dispatcher::current(&*native);
            let (key, _) = dispatcher.create_key(HKCU, "Traced", Access::ALL_ACCESS).unwrap();
            let _ = dispatcher.get_value(&key, "missing");
            drop(key);
            manager
                .required([])
                .unwrap()
                .run(|| {
                    let dispatcher = Dispatcher::current(&*native);
                    let key = dispatcher.open_key(HKCU, "Traced", Access::READ)?;
                    let _ = dispatcher.get_value(&key, "missing");
                    Ok::<_, kreg_core::NativeError>(())
                })
                .unwrap();
        });

        // THEN
        let messages = messages.take();
        assert!(messages.iter().any(|m| m == "RegGetValue"), "{messages:?}");
        assert!(messages.iter().any(|m| m == "RegGetValue transacted"), "{messages:?}");
    }

    #[test]
    fn test_enumeration_collects_until_end() {
        // GIVEN
        let native = MemoryNative::new();
        let dispatcher = Dispatcher::current(&native);
        let (parent, _) = dispatcher.create_key(HKCU, "Enum", Access::ALL_ACCESS).unwrap();
        for name in ["one", "two", "three"] {
            drop(dispatcher.create_key(HKCU, &format!("Enum\\{name}"), Access::READ).unwrap());
        }

        // WHEN
        let names = parent.sub_key_names().unwrap();

        // THEN
        assert_eq!(names, ["one", "three", "two"]);
    }
}

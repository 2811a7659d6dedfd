//! Registry keys.

use std::fmt;
use std::sync::Arc;

use kreg_core::{Access, Disposition, KeyInfo, RegType, RegistryApi};
use tracing::debug;

use crate::dispatch::{Dispatcher, OpenKey};
use crate::error::{RegistryError, RegistryResult};
use crate::path::{RegistryPath, SEPARATOR};
use crate::root::RootKey;
use crate::value::RegistryValue;

/// A registry key, by location.
///
/// Holds no native handle between calls: every operation opens the
/// narrowest handle it needs, runs in the ambient transaction if there is
/// one, and closes the handle before returning.
#[derive(Clone)]
pub struct RegistryKey {
    api: Arc<dyn RegistryApi>,
    root: RootKey,
    path: RegistryPath,
}

impl RegistryKey {
    /// A predefined root key.
    pub fn root(api: Arc<dyn RegistryApi>, root: RootKey) -> Self {
        Self {
            api,
            root,
            path: RegistryPath::root(),
        }
    }

    /// Parse `ROOT\path\to\key`, where `ROOT` is a long or short root name.
    pub fn parse(api: Arc<dyn RegistryApi>, full_path: &str) -> RegistryResult<Self> {
        let full_path = full_path.trim_start_matches(SEPARATOR);
        let (root, rest) = full_path.split_once(SEPARATOR).unwrap_or((full_path, ""));
        Ok(Self {
            api,
            root: root.parse()?,
            path: RegistryPath::new(rest),
        })
    }

    /// A key below this one. Does not touch the registry.
    pub fn sub_key(&self, relative: &str) -> RegistryKey {
        self.at(self.path.join(relative))
    }

    /// The enclosing key; `None` for a root key.
    pub fn parent(&self) -> Option<RegistryKey> {
        self.path.parent().map(|path| self.at(path))
    }

    fn at(&self, path: RegistryPath) -> RegistryKey {
        Self {
            api: self.api.clone(),
            root: self.root,
            path,
        }
    }

    /// Last path component, or the root key's name.
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or(self.root.name())
    }

    /// Path below the root key.
    pub fn path(&self) -> &RegistryPath {
        &self.path
    }

    pub fn root_key(&self) -> RootKey {
        self.root
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    /// Path including the root key's name.
    pub fn full_path(&self) -> String {
        if self.path.is_root() {
            self.root.name().to_string()
        } else {
            format!("{}{}{}", self.root.name(), SEPARATOR, self.path)
        }
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::current(self.api.as_ref())
    }

    fn open<'a>(&self, dispatcher: &Dispatcher<'a>, access: Access) -> RegistryResult<OpenKey<'a>> {
        dispatcher
            .open_key(self.root.handle(), &self.path.to_native(), access)
            .map_err(|e| RegistryError::from_native("RegOpenKeyEx", self.full_path(), e))
    }

    fn reject_root(&self, operation: &'static str) -> RegistryResult<()> {
        if self.is_root() {
            return Err(RegistryError::RootKeyUnsupported {
                operation,
                path: self.full_path(),
            });
        }
        Ok(())
    }

    // ========== Keys ==========

    pub fn exists(&self) -> RegistryResult<bool> {
        let dispatcher = self.dispatcher();
        match self.open(&dispatcher, Access::QUERY_VALUE) {
            Ok(_) => Ok(true),
            Err(RegistryError::NoSuchKey { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create the key and any missing parents. Fails if it already exists;
    /// a root key always exists.
    pub fn create(&self) -> RegistryResult<()> {
        if self.create_if_missing()? {
            Ok(())
        } else {
            Err(RegistryError::KeyAlreadyExists {
                path: self.full_path(),
            })
        }
    }

    /// Create the key unless it exists. Returns whether it was created.
    pub fn create_if_missing(&self) -> RegistryResult<bool> {
        if self.is_root() {
            return Ok(false);
        }
        let dispatcher = self.dispatcher();
        let (_key, disposition) = dispatcher
            .create_key(self.root.handle(), &self.path.to_native(), Access::QUERY_VALUE)
            .map_err(|e| RegistryError::from_native("RegCreateKeyEx", self.full_path(), e))?;
        let created = disposition == Disposition::CreatedNew;
        if created {
            debug!(key = %self, transacted = dispatcher.transaction().is_some(), "key created");
        }
        Ok(created)
    }

    /// Delete the key, which must have no sub-keys.
    pub fn delete(&self) -> RegistryResult<()> {
        self.reject_root("delete")?;
        let dispatcher = self.dispatcher();
        dispatcher
            .delete_key(self.root.handle(), &self.path.to_native())
            .map_err(|e| RegistryError::from_native("RegDeleteKeyEx", self.full_path(), e))?;
        debug!(key = %self, transacted = dispatcher.transaction().is_some(), "key deleted");
        Ok(())
    }

    /// Delete the key if it exists. Returns whether it did.
    pub fn delete_if_exists(&self) -> RegistryResult<bool> {
        match self.delete() {
            Ok(()) => Ok(true),
            Err(RegistryError::NoSuchKey { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Rename the key in place. Returns the key at its new location.
    pub fn rename(&self, new_name: &str) -> RegistryResult<RegistryKey> {
        self.reject_root("rename")?;
        let dispatcher = self.dispatcher();
        dispatcher
            .rename_key(self.root.handle(), &self.path.to_native(), new_name)
            .map_err(|e| RegistryError::from_native("RegRenameKey", self.full_path(), e))?;
        let renamed = self.path.with_name(new_name).map(|path| self.at(path));
        debug!(key = %self, new_name, transacted = dispatcher.transaction().is_some(), "key renamed");
        // Only a root key has no name to replace, and roots were rejected above
        renamed.ok_or_else(|| RegistryError::RootKeyUnsupported {
            operation: "rename",
            path: self.full_path(),
        })
    }

    pub fn info(&self) -> RegistryResult<KeyInfo> {
        let dispatcher = self.dispatcher();
        let key = self.open(&dispatcher, Access::QUERY_VALUE)?;
        key.info()
            .map_err(|e| RegistryError::from_native("RegQueryInfoKey", self.full_path(), e))
    }

    pub fn sub_key_names(&self) -> RegistryResult<Vec<String>> {
        let dispatcher = self.dispatcher();
        let key = self.open(&dispatcher, Access::ENUMERATE_SUB_KEYS)?;
        key.sub_key_names()
            .map_err(|e| RegistryError::from_native("RegEnumKeyEx", self.full_path(), e))
    }

    pub fn sub_keys(&self) -> RegistryResult<Vec<RegistryKey>> {
        Ok(self
            .sub_key_names()?
            .iter()
            .map(|name| self.sub_key(name))
            .collect())
    }

    // ========== Values ==========

    pub fn value_names(&self) -> RegistryResult<Vec<String>> {
        Ok(self.raw_values()?.into_iter().map(|(name, _)| name).collect())
    }

    pub fn values(&self) -> RegistryResult<Vec<(String, RegistryValue)>> {
        self.raw_values()?
            .into_iter()
            .map(|(name, data)| {
                let value = RegistryValue::decode(&data).map_err(|source| self.invalid(&name, source))?;
                Ok((name, value))
            })
            .collect()
    }

    fn raw_values(&self) -> RegistryResult<Vec<(String, kreg_core::ValueData)>> {
        let dispatcher = self.dispatcher();
        let key = self.open(&dispatcher, Access::QUERY_VALUE)?;
        key.values()
            .map_err(|e| RegistryError::from_native("RegEnumValue", self.full_path(), e))
    }

    pub fn get_value(&self, name: &str) -> RegistryResult<RegistryValue> {
        let dispatcher = self.dispatcher();
        let key = self.open(&dispatcher, Access::QUERY_VALUE)?;
        let data = dispatcher
            .get_value(&key, name)
            .map_err(|e| RegistryError::from_native_value("RegGetValue", self.full_path(), name, e))?;
        RegistryValue::decode(&data).map_err(|source| self.invalid(name, source))
    }

    pub fn value_exists(&self, name: &str) -> RegistryResult<bool> {
        match self.get_value(name) {
            Ok(_) | Err(RegistryError::InvalidData { .. }) => Ok(true),
            Err(RegistryError::NoSuchValue { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn set_value(&self, name: &str, value: &RegistryValue) -> RegistryResult<()> {
        let data = value.encode().map_err(|source| self.invalid(name, source))?;
        let dispatcher = self.dispatcher();
        let key = self.open(&dispatcher, Access::SET_VALUE)?;
        dispatcher
            .set_value(&key, name, &data)
            .map_err(|e| RegistryError::from_native("RegSetValueEx", self.full_path(), e))?;
        debug!(key = %self, name, reg_type = %value.reg_type(), transacted = dispatcher.transaction().is_some(), "value set");
        Ok(())
    }

    pub fn delete_value(&self, name: &str) -> RegistryResult<()> {
        let dispatcher = self.dispatcher();
        let key = self.open(&dispatcher, Access::SET_VALUE)?;
        dispatcher
            .delete_value(&key, name)
            .map_err(|e| RegistryError::from_native_value("RegDeleteValue", self.full_path(), name, e))?;
        debug!(key = %self, name, transacted = dispatcher.transaction().is_some(), "value deleted");
        Ok(())
    }

    /// Delete the value if it exists. Returns whether it did.
    pub fn delete_value_if_exists(&self, name: &str) -> RegistryResult<bool> {
        match self.delete_value(name) {
            Ok(()) => Ok(true),
            Err(RegistryError::NoSuchValue { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ========== Typed Getters ==========

    /// A `REG_SZ` or `REG_EXPAND_SZ` value, unexpanded.
    pub fn get_string(&self, name: &str) -> RegistryResult<String> {
        match self.get_value(name)? {
            RegistryValue::String(s) | RegistryValue::ExpandString(s) => Ok(s),
            other => Err(self.mismatch(name, RegType::Sz, &other)),
        }
    }

    /// A `REG_DWORD` in either byte order.
    pub fn get_dword(&self, name: &str) -> RegistryResult<u32> {
        match self.get_value(name)? {
            RegistryValue::Dword(n) | RegistryValue::DwordBigEndian(n) => Ok(n),
            other => Err(self.mismatch(name, RegType::Dword, &other)),
        }
    }

    pub fn get_qword(&self, name: &str) -> RegistryResult<u64> {
        match self.get_value(name)? {
            RegistryValue::Qword(n) => Ok(n),
            other => Err(self.mismatch(name, RegType::Qword, &other)),
        }
    }

    pub fn get_multi_string(&self, name: &str) -> RegistryResult<Vec<String>> {
        match self.get_value(name)? {
            RegistryValue::MultiString(strings) => Ok(strings),
            other => Err(self.mismatch(name, RegType::MultiSz, &other)),
        }
    }

    pub fn get_binary(&self, name: &str) -> RegistryResult<Vec<u8>> {
        match self.get_value(name)? {
            RegistryValue::Binary(bytes) => Ok(bytes),
            other => Err(self.mismatch(name, RegType::Binary, &other)),
        }
    }

    fn invalid(&self, name: &str, source: crate::value::ValueError) -> RegistryError {
        RegistryError::InvalidData {
            path: self.full_path(),
            name: name.to_string(),
            source,
        }
    }

    fn mismatch(&self, name: &str, expected: RegType, actual: &RegistryValue) -> RegistryError {
        RegistryError::TypeMismatch {
            path: self.full_path(),
            name: name.to_string(),
            expected,
            actual: actual.reg_type(),
        }
    }
}

/// Keys are equal when they name the same location.
impl PartialEq for RegistryKey {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.path == other.path
    }
}

impl Eq for RegistryKey {}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

impl fmt::Debug for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryKey")
            .field("root", &self.root)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

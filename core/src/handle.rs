//! Opaque native handle types.
//!
//! Handles are plain 64-bit values handed out by the native layer. They are
//! `Copy` so the owning wrappers (`Transaction`, key guards) decide when a
//! handle is released; the handle itself carries no lifetime.

use std::fmt;

/// Handle to a native transaction object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionHandle(pub u64);

impl TransactionHandle {
    /// Sentinel returned by a failed create-transaction call (`INVALID_HANDLE_VALUE`).
    pub const INVALID: TransactionHandle = TransactionHandle(u64::MAX);

    /// Create a handle from a raw value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Returns true if this is the invalid-handle sentinel.
    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{:#x}", self.0)
    }
}

/// Handle to an open registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHandle(pub u64);

impl KeyHandle {
    pub const HKEY_CLASSES_ROOT: KeyHandle = KeyHandle(0x8000_0000);
    pub const HKEY_CURRENT_USER: KeyHandle = KeyHandle(0x8000_0001);
    pub const HKEY_LOCAL_MACHINE: KeyHandle = KeyHandle(0x8000_0002);
    pub const HKEY_USERS: KeyHandle = KeyHandle(0x8000_0003);
    pub const HKEY_CURRENT_CONFIG: KeyHandle = KeyHandle(0x8000_0005);

    /// The predefined root handles. They are always open and never closed.
    pub const PREDEFINED: [KeyHandle; 5] = [
        Self::HKEY_CLASSES_ROOT,
        Self::HKEY_CURRENT_USER,
        Self::HKEY_LOCAL_MACHINE,
        Self::HKEY_USERS,
        Self::HKEY_CURRENT_CONFIG,
    ];

    /// Create a handle from a raw value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Returns true if this is one of the predefined root handles.
    pub fn is_predefined(&self) -> bool {
        Self::PREDEFINED.contains(self)
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{:#x}", self.0)
    }
}

//! Predefined root keys.

use std::fmt;
use std::str::FromStr;

use kreg_core::KeyHandle;

use crate::error::RegistryError;

/// The five predefined root keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKey {
    ClassesRoot,
    CurrentUser,
    LocalMachine,
    Users,
    CurrentConfig,
}

impl RootKey {
    pub const ALL: [RootKey; 5] = [
        RootKey::ClassesRoot,
        RootKey::CurrentUser,
        RootKey::LocalMachine,
        RootKey::Users,
        RootKey::CurrentConfig,
    ];

    /// The predefined native handle. Never closed.
    pub fn handle(&self) -> KeyHandle {
        match self {
            RootKey::ClassesRoot => KeyHandle::HKEY_CLASSES_ROOT,
            RootKey::CurrentUser => KeyHandle::HKEY_CURRENT_USER,
            RootKey::LocalMachine => KeyHandle::HKEY_LOCAL_MACHINE,
            RootKey::Users => KeyHandle::HKEY_USERS,
            RootKey::CurrentConfig => KeyHandle::HKEY_CURRENT_CONFIG,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RootKey::ClassesRoot => "HKEY_CLASSES_ROOT",
            RootKey::CurrentUser => "HKEY_CURRENT_USER",
            RootKey::LocalMachine => "HKEY_LOCAL_MACHINE",
            RootKey::Users => "HKEY_USERS",
            RootKey::CurrentConfig => "HKEY_CURRENT_CONFIG",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            RootKey::ClassesRoot => "HKCR",
            RootKey::CurrentUser => "HKCU",
            RootKey::LocalMachine => "HKLM",
            RootKey::Users => "HKU",
            RootKey::CurrentConfig => "HKCC",
        }
    }
}

impl fmt::Display for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts long and short names, in any case.
impl FromStr for RootKey {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RootKey::ALL
            .into_iter()
            .find(|root| {
                root.name().eq_ignore_ascii_case(s) || root.short_name().eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| RegistryError::UnknownRoot { name: s.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_long_and_short_names() {
        assert_eq!("HKEY_LOCAL_MACHINE".parse::<RootKey>().unwrap(), RootKey::LocalMachine);
        assert_eq!("hkcu".parse::<RootKey>().unwrap(), RootKey::CurrentUser);
        assert_eq!("HKU".parse::<RootKey>().unwrap(), RootKey::Users);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "HKEY_PERFORMANCE_DATA".parse::<RootKey>().unwrap_err();
        assert!(matches!(err, RegistryError::UnknownRoot { .. }));
    }

    #[test]
    fn test_handles_are_predefined() {
        for root in RootKey::ALL {
            assert!(root.handle().is_predefined(), "{root}");
        }
        assert_eq!(RootKey::CurrentConfig.handle().raw(), 0x8000_0005);
    }
}

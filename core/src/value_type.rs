//! Registry value type codes.

use std::fmt;

/// Registry value types, with their native `REG_*` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum RegType {
    /// No type
    #[default]
    None = 0,
    /// NUL-terminated string
    Sz = 1,
    /// String with unexpanded `%VARIABLE%` references
    ExpandSz = 2,
    /// Binary data
    Binary = 3,
    /// 32-bit little-endian integer
    Dword = 4,
    /// 32-bit big-endian integer
    DwordBigEndian = 5,
    /// Symbolic link (UTF-16 string)
    Link = 6,
    /// Sequence of NUL-terminated strings
    MultiSz = 7,
    /// Resource list
    ResourceList = 8,
    /// Full resource descriptor
    FullResourceDescriptor = 9,
    /// Resource requirements list
    ResourceRequirementsList = 10,
    /// 64-bit little-endian integer
    Qword = 11,
}

impl RegType {
    /// Create from a raw code.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Sz),
            2 => Some(Self::ExpandSz),
            3 => Some(Self::Binary),
            4 => Some(Self::Dword),
            5 => Some(Self::DwordBigEndian),
            6 => Some(Self::Link),
            7 => Some(Self::MultiSz),
            8 => Some(Self::ResourceList),
            9 => Some(Self::FullResourceDescriptor),
            10 => Some(Self::ResourceRequirementsList),
            11 => Some(Self::Qword),
            _ => None,
        }
    }

    /// The raw code.
    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::Sz | Self::ExpandSz | Self::Link)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Dword | Self::DwordBigEndian | Self::Qword)
    }

    /// The native constant name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "REG_NONE",
            Self::Sz => "REG_SZ",
            Self::ExpandSz => "REG_EXPAND_SZ",
            Self::Binary => "REG_BINARY",
            Self::Dword => "REG_DWORD",
            Self::DwordBigEndian => "REG_DWORD_BIG_ENDIAN",
            Self::Link => "REG_LINK",
            Self::MultiSz => "REG_MULTI_SZ",
            Self::ResourceList => "REG_RESOURCE_LIST",
            Self::FullResourceDescriptor => "REG_FULL_RESOURCE_DESCRIPTOR",
            Self::ResourceRequirementsList => "REG_RESOURCE_REQUIREMENTS_LIST",
            Self::Qword => "REG_QWORD",
        }
    }
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw value payload as stored by the native registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValueData {
    /// Raw `REG_*` type code. Kept unparsed so unknown types survive a read.
    pub reg_type: u32,
    /// Raw bytes.
    pub data: Vec<u8>,
}

impl ValueData {
    pub fn new(reg_type: RegType, data: Vec<u8>) -> Self {
        Self {
            reg_type: reg_type.code(),
            data,
        }
    }

    /// The parsed type, if the code is known.
    pub fn kind(&self) -> Option<RegType> {
        RegType::from_u32(self.reg_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u32_round_trips_known_codes() {
        for code in 0..=11 {
            let ty = RegType::from_u32(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(RegType::from_u32(12), None);
    }

    #[test]
    fn test_type_classes() {
        assert!(RegType::ExpandSz.is_string());
        assert!(!RegType::MultiSz.is_string());
        assert!(RegType::DwordBigEndian.is_integer());
        assert_eq!(RegType::Qword.to_string(), "REG_QWORD");
    }

    #[test]
    fn test_value_data_unknown_kind() {
        let raw = ValueData {
            reg_type: 0x4242,
            data: vec![1, 2],
        };
        assert_eq!(raw.kind(), None);
    }
}

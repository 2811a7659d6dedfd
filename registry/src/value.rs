//! Registry values and their native encodings.

use kreg_core::{RegType, ValueData};
use thiserror::Error;

/// Why a value could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("string contains an interior NUL")]
    InteriorNul,

    #[error("multi-string entries must not be empty")]
    EmptyMultiStringEntry,

    #[error("{reg_type} data must be {expected} bytes, got {actual}")]
    WrongLength {
        reg_type: RegType,
        expected: usize,
        actual: usize,
    },

    #[error("string data has an odd length of {0} bytes")]
    OddLength(usize),

    #[error("string data is not valid UTF-16")]
    InvalidUtf16,

    #[error("unsupported value type {0}")]
    UnsupportedType(u32),
}

/// A typed registry value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValue {
    None,
    String(String),
    ExpandString(String),
    Binary(Vec<u8>),
    Dword(u32),
    DwordBigEndian(u32),
    MultiString(Vec<String>),
    Qword(u64),
}

impl RegistryValue {
    pub fn reg_type(&self) -> RegType {
        match self {
            RegistryValue::None => RegType::None,
            RegistryValue::String(_) => RegType::Sz,
            RegistryValue::ExpandString(_) => RegType::ExpandSz,
            RegistryValue::Binary(_) => RegType::Binary,
            RegistryValue::Dword(_) => RegType::Dword,
            RegistryValue::DwordBigEndian(_) => RegType::DwordBigEndian,
            RegistryValue::MultiString(_) => RegType::MultiSz,
            RegistryValue::Qword(_) => RegType::Qword,
        }
    }

    /// Encode the way the registry stores it.
    pub fn encode(&self) -> Result<ValueData, ValueError> {
        let data = match self {
            RegistryValue::None => Vec::new(),
            RegistryValue::String(s) | RegistryValue::ExpandString(s) => {
                let mut data = Vec::with_capacity((s.len() + 1) * 2);
                push_utf16(&mut data, s)?;
                data.extend_from_slice(&[0, 0]);
                data
            }
            RegistryValue::Binary(bytes) => bytes.clone(),
            RegistryValue::Dword(n) => n.to_le_bytes().to_vec(),
            RegistryValue::DwordBigEndian(n) => n.to_be_bytes().to_vec(),
            RegistryValue::MultiString(strings) => {
                let mut data = Vec::new();
                for s in strings {
                    // An empty entry would read back as the list terminator
                    if s.is_empty() {
                        return Err(ValueError::EmptyMultiStringEntry);
                    }
                    push_utf16(&mut data, s)?;
                    data.extend_from_slice(&[0, 0]);
                }
                data.extend_from_slice(&[0, 0]);
                data
            }
            RegistryValue::Qword(n) => n.to_le_bytes().to_vec(),
        };
        Ok(ValueData::new(self.reg_type(), data))
    }

    /// Decode stored data. Missing string terminators are tolerated.
    pub fn decode(value: &ValueData) -> Result<RegistryValue, ValueError> {
        let kind = value.kind().ok_or(ValueError::UnsupportedType(value.reg_type))?;
        let data = value.data.as_slice();
        Ok(match kind {
            RegType::None => RegistryValue::None,
            RegType::Sz => RegistryValue::String(decode_string(data)?),
            RegType::ExpandSz => RegistryValue::ExpandString(decode_string(data)?),
            RegType::Binary => RegistryValue::Binary(data.to_vec()),
            RegType::Dword => RegistryValue::Dword(u32::from_le_bytes(fixed(kind, data)?)),
            RegType::DwordBigEndian => {
                RegistryValue::DwordBigEndian(u32::from_be_bytes(fixed(kind, data)?))
            }
            RegType::MultiSz => RegistryValue::MultiString(decode_multi_string(data)?),
            RegType::Qword => RegistryValue::Qword(u64::from_le_bytes(fixed(kind, data)?)),
            other => return Err(ValueError::UnsupportedType(other.code())),
        })
    }
}

impl From<&str> for RegistryValue {
    fn from(s: &str) -> Self {
        RegistryValue::String(s.to_string())
    }
}

impl From<String> for RegistryValue {
    fn from(s: String) -> Self {
        RegistryValue::String(s)
    }
}

impl From<u32> for RegistryValue {
    fn from(n: u32) -> Self {
        RegistryValue::Dword(n)
    }
}

impl From<u64> for RegistryValue {
    fn from(n: u64) -> Self {
        RegistryValue::Qword(n)
    }
}

impl From<Vec<u8>> for RegistryValue {
    fn from(bytes: Vec<u8>) -> Self {
        RegistryValue::Binary(bytes)
    }
}

impl From<Vec<String>> for RegistryValue {
    fn from(strings: Vec<String>) -> Self {
        RegistryValue::MultiString(strings)
    }
}

fn push_utf16(data: &mut Vec<u8>, s: &str) -> Result<(), ValueError> {
    for unit in s.encode_utf16() {
        if unit == 0 {
            return Err(ValueError::InteriorNul);
        }
        data.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(())
}

fn units(data: &[u8]) -> Result<Vec<u16>, ValueError> {
    if data.len() % 2 != 0 {
        return Err(ValueError::OddLength(data.len()));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn decode_string(data: &[u8]) -> Result<String, ValueError> {
    let units = units(data)?;
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    String::from_utf16(&units[..end]).map_err(|_| ValueError::InvalidUtf16)
}

fn decode_multi_string(data: &[u8]) -> Result<Vec<String>, ValueError> {
    let units = units(data)?;
    let mut strings = Vec::new();
    for entry in units.split(|&u| u == 0) {
        // First empty entry is the list terminator
        if entry.is_empty() {
            break;
        }
        strings.push(String::from_utf16(entry).map_err(|_| ValueError::InvalidUtf16)?);
    }
    Ok(strings)
}

fn fixed<const N: usize>(reg_type: RegType, data: &[u8]) -> Result<[u8; N], ValueError> {
    data.try_into().map_err(|_| ValueError::WrongLength {
        reg_type,
        expected: N,
        actual: data.len(),
    })
}

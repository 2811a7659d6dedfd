//! Per-call transaction options and defaults.

use std::fmt;
use std::time::Duration;

use crate::error::{TransactionError, TransactionResult};

/// Option kinds. At most one option of each kind per policy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Timeout,
    Description,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionKind::Timeout => f.write_str("Timeout"),
            OptionKind::Description => f.write_str("Description"),
        }
    }
}

/// An option for a transaction created by a propagation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOption {
    /// Automatic rollback after this long. Zero means no timeout.
    Timeout(Duration),
    /// Human-readable description recorded by the transaction manager.
    Description(String),
}

impl TransactionOption {
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout(timeout)
    }

    pub fn description(description: impl Into<String>) -> Self {
        Self::Description(description.into())
    }

    pub fn kind(&self) -> OptionKind {
        match self {
            Self::Timeout(_) => OptionKind::Timeout,
            Self::Description(_) => OptionKind::Description,
        }
    }
}

/// Settings for transactions a manager creates.
///
/// Serves both as the manager-wide defaults and as the resolved settings of
/// a single policy call, after its options are applied on top.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionDefaults {
    /// Zero means no automatic timeout.
    pub timeout: Duration,
    pub description: Option<String>,
}

impl TransactionDefaults {
    /// Apply `options` over these settings, field by field.
    ///
    /// Fails on the first option kind that appears twice; nothing is
    /// applied in that case.
    pub fn with_options<I>(&self, options: I) -> TransactionResult<TransactionDefaults>
    where
        I: IntoIterator<Item = TransactionOption>,
    {
        let mut timeout = None;
        let mut description = None;
        for option in options {
            let kind = option.kind();
            let duplicate = match option {
                TransactionOption::Timeout(value) => timeout.replace(value).is_some(),
                TransactionOption::Description(value) => description.replace(value).is_some(),
            };
            if duplicate {
                return Err(TransactionError::duplicate_option(kind));
            }
        }

        Ok(TransactionDefaults {
            timeout: timeout.unwrap_or(self.timeout),
            description: description.or_else(|| self.description.clone()),
        })
    }
}

/// Convert a timeout to the transaction manager's whole milliseconds.
///
/// Zero stays zero (no timeout). Any other duration rounds up so a short
/// timeout never turns into "no timeout".
pub(crate) fn timeout_millis(timeout: Duration) -> TransactionResult<u32> {
    if timeout.is_zero() {
        return Ok(0);
    }
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    match u32::try_from(millis) {
        // u32::MAX is the manager's INFINITE sentinel
        Ok(millis) if millis < u32::MAX => Ok(millis),
        _ => Err(TransactionError::invalid_timeout(
            timeout,
            "exceeds the largest finite timeout the transaction manager accepts",
        )),
    }
}

//! Transaction manager: the factory for propagation policies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kreg_core::KtmApi;

use crate::error::TransactionResult;
use crate::option::{TransactionDefaults, TransactionOption};
use crate::propagation::{Propagation, TransactionalState};
use crate::transaction::Transaction;

/// Hands out propagation policies bound to one transaction manager.
///
/// Transactions the policies create take the manager's defaults, overridden
/// field by field by per-call options.
#[derive(Clone)]
pub struct TransactionManager {
    api: Arc<dyn KtmApi>,
    defaults: TransactionDefaults,
}

impl TransactionManager {
    /// Create a manager with no timeout and no description by default.
    pub fn new(api: Arc<dyn KtmApi>) -> Self {
        Self {
            api,
            defaults: TransactionDefaults::default(),
        }
    }

    pub fn builder(api: Arc<dyn KtmApi>) -> TransactionManagerBuilder {
        TransactionManagerBuilder {
            api,
            defaults: TransactionDefaults::default(),
        }
    }

    pub fn defaults(&self) -> &TransactionDefaults {
        &self.defaults
    }

    pub fn api(&self) -> &Arc<dyn KtmApi> {
        &self.api
    }

    // ========== Policies ==========

    pub fn mandatory(&self) -> TransactionalState {
        self.policy(Propagation::Mandatory, self.defaults.clone())
    }

    pub fn required<I>(&self, options: I) -> TransactionResult<TransactionalState>
    where
        I: IntoIterator<Item = TransactionOption>,
    {
        let settings = self.defaults.with_options(options)?;
        Ok(self.policy(Propagation::Required, settings))
    }

    pub fn requires_new<I>(&self, options: I) -> TransactionResult<TransactionalState>
    where
        I: IntoIterator<Item = TransactionOption>,
    {
        let settings = self.defaults.with_options(options)?;
        Ok(self.policy(Propagation::RequiresNew, settings))
    }

    pub fn supports(&self) -> TransactionalState {
        self.policy(Propagation::Supports, self.defaults.clone())
    }

    pub fn not_supported(&self) -> TransactionalState {
        self.policy(Propagation::NotSupported, self.defaults.clone())
    }

    pub fn never(&self) -> TransactionalState {
        self.policy(Propagation::Never, self.defaults.clone())
    }

    fn policy(&self, propagation: Propagation, settings: TransactionDefaults) -> TransactionalState {
        TransactionalState::new(propagation, self.api.clone(), settings)
    }

    // ========== Manual Transactions ==========

    /// Create a transaction outside any policy. The caller settles and
    /// closes it; it is not made ambient.
    pub fn create_transaction<I>(&self, options: I) -> TransactionResult<Transaction>
    where
        I: IntoIterator<Item = TransactionOption>,
    {
        let settings = self.defaults.with_options(options)?;
        Transaction::create(
            self.api.clone(),
            settings.timeout,
            settings.description.as_deref(),
        )
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`TransactionManager`] with non-default settings.
pub struct TransactionManagerBuilder {
    api: Arc<dyn KtmApi>,
    defaults: TransactionDefaults,
}

impl TransactionManagerBuilder {
    /// Default timeout for created transactions. Zero means none.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = timeout;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.defaults.description = Some(description.into());
        self
    }

    pub fn build(self) -> TransactionManager {
        TransactionManager {
            api: self.api,
            defaults: self.defaults,
        }
    }
}

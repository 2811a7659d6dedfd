//! Propagation policies.
//!
//! A policy decides, from the ambient transaction, whether a unit of work
//! reuses it, runs in a new transaction, runs with it suspended, or is
//! rejected. Transactions a policy creates are finalized before it returns:
//!
//! 1. query the status
//! 2. commit if still active and auto-commit is on
//! 3. close, on every exit path including panics
//!
//! and the ambient stack is restored to its state on entry.

use std::fmt;
use std::sync::Arc;

use kreg_core::KtmApi;
use tracing::{debug, trace, warn};

use crate::ambient;
use crate::error::{PropagationError, TransactionError, TransactionResult};
use crate::option::TransactionDefaults;
use crate::transaction::{Status, Transaction};

/// The six propagation policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Propagation {
    /// Reuse the ambient transaction; fail without one.
    Mandatory,
    /// Reuse the ambient transaction or create one.
    Required,
    /// Always create a transaction, suspending any ambient one.
    RequiresNew,
    /// Reuse the ambient transaction if there is one, else run without.
    Supports,
    /// Run without a transaction, suspending any ambient one.
    NotSupported,
    /// Run without a transaction; fail if one is ambient.
    Never,
}

impl Propagation {
    pub fn name(&self) -> &'static str {
        match self {
            Propagation::Mandatory => "MANDATORY",
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::Supports => "SUPPORTS",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
        }
    }

    /// Only policies that may create a transaction take options.
    pub fn accepts_options(&self) -> bool {
        matches!(self, Propagation::Required | Propagation::RequiresNew)
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A policy bound to a transaction manager and resolved settings, ready to
/// run work.
#[derive(Clone)]
pub struct TransactionalState {
    propagation: Propagation,
    api: Arc<dyn KtmApi>,
    settings: TransactionDefaults,
}

impl TransactionalState {
    pub(crate) fn new(
        propagation: Propagation,
        api: Arc<dyn KtmApi>,
        settings: TransactionDefaults,
    ) -> Self {
        Self {
            propagation,
            api,
            settings,
        }
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    /// Settings for a transaction this policy creates.
    pub fn settings(&self) -> &TransactionDefaults {
        &self.settings
    }

    /// Run `action` under this policy.
    pub fn run<E, F>(&self, action: F) -> Result<(), PropagationError<E>>
    where
        F: FnOnce() -> Result<(), E>,
    {
        self.call(action)
    }

    /// Run `action` under this policy and return its value.
    pub fn call<T, E, F>(&self, action: F) -> Result<T, PropagationError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let ambient = ambient::current();
        trace!(
            propagation = %self.propagation,
            ambient = ?ambient.as_ref().map(Transaction::handle),
            "propagation policy entered"
        );

        match (self.propagation, ambient) {
            (Propagation::Mandatory, None) => Err(TransactionError::TransactionRequired.into()),
            (Propagation::Never, Some(_)) => Err(TransactionError::TransactionNotAllowed.into()),

            (Propagation::Mandatory | Propagation::Required | Propagation::Supports, Some(_)) => {
                run_action(action)
            }
            (Propagation::Supports | Propagation::NotSupported | Propagation::Never, None) => {
                run_action(action)
            }

            (Propagation::NotSupported, Some(_)) => {
                let _suspended = ambient::suspend();
                run_action(action)
            }

            (Propagation::Required, None) | (Propagation::RequiresNew, None) => {
                self.in_new_transaction(action)
            }
            (Propagation::RequiresNew, Some(_)) => {
                let _suspended = ambient::suspend();
                self.in_new_transaction(action)
            }
        }
    }

    fn in_new_transaction<T, E, F>(&self, action: F) -> Result<T, PropagationError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let transaction = Transaction::create(
            self.api.clone(),
            self.settings.timeout,
            self.settings.description.as_deref(),
        )?;
        debug!(propagation = %self.propagation, handle = %transaction.handle(), "running in new transaction");

        // Declared after the scope so it drops first on unwind: the
        // transaction is closed before the ambient entry is popped.
        let scope = ambient::enter(Some(transaction.clone()));
        let finalizer = Finalizer::new(transaction);

        let result = action();
        let (settled, closed) = finalizer.finish(result.is_ok());
        drop(scope);

        match (result, settled, closed) {
            (Ok(value), Ok(()), Ok(())) => Ok(value),
            (Ok(_), Ok(()), Err(close)) => Err(close.into()),
            (Ok(_), Err(commit), closed) => Err(PropagationError::Transaction {
                error: commit,
                suppressed: closed.err().into_iter().collect(),
            }),
            (Err(error), _, closed) => Err(PropagationError::action(
                error,
                closed.err().into_iter().collect(),
            )),
        }
    }
}

impl fmt::Debug for TransactionalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalState")
            .field("propagation", &self.propagation)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn run_action<T, E, F>(action: F) -> Result<T, PropagationError<E>>
where
    F: FnOnce() -> Result<T, E>,
{
    action().map_err(|error| PropagationError::action(error, Vec::new()))
}

/// Closes a policy-created transaction on every exit path.
struct Finalizer {
    transaction: Option<Transaction>,
}

impl Finalizer {
    fn new(transaction: Transaction) -> Self {
        Self {
            transaction: Some(transaction),
        }
    }

    /// Settle after the action, then close. Returns the settle (commit)
    /// result and the close result.
    fn finish(mut self, succeeded: bool) -> (TransactionResult<()>, TransactionResult<()>) {
        let settled = match &self.transaction {
            Some(transaction) if succeeded => settle(transaction),
            _ => Ok(()),
        };
        let closed = match self.transaction.take() {
            Some(transaction) => transaction.close(),
            None => Ok(()),
        };
        (settled, closed)
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        if let Some(transaction) = self.transaction.take() {
            debug!(handle = %transaction.handle(), "closing transaction on unwind");
            if let Err(error) = transaction.close() {
                warn!(%error, "failed to close transaction on unwind");
            }
        }
    }
}

/// Commit an active auto-commit transaction; leave anything else alone.
fn settle(transaction: &Transaction) -> TransactionResult<()> {
    match transaction.status()? {
        Status::Active if transaction.auto_commit() => transaction.commit(),
        Status::Active => {
            debug!(handle = %transaction.handle(), "auto-commit off, closing uncommitted");
            Ok(())
        }
        status => {
            trace!(handle = %transaction.handle(), %status, "transaction already settled");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::TransactionManager;
    use crate::option::{OptionKind, TransactionOption};
    use crate::testing::{Calls, RecordingKtm};
    use kreg_core::codes;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Eq)]
    struct Failed;

    fn setup() -> (Arc<RecordingKtm>, TransactionManager) {
        let ktm = RecordingKtm::new();
        let manager = TransactionManager::new(ktm.clone());
        (ktm, manager)
    }

    fn ok() -> Result<(), Failed> {
        Ok(())
    }

    #[test]
    fn test_required_without_ambient_creates_commits_closes() {
        // GIVEN
        let (ktm, manager) = setup();
        let seen = Cell::new(None);

        // WHEN
        manager
            .required([])
            .unwrap()
            .run(|| {
                seen.set(ambient::current().map(|tx| tx.handle()));
                ok()
            })
            .unwrap();

        // THEN
        assert!(seen.get().is_some());
        assert_eq!(
            ktm.calls(),
            Calls {
                create: 1,
                outcome: 1,
                commit: 1,
                rollback: 0,
                close: 1,
            }
        );
        assert_eq!(ambient::depth(), 0);
    }

    #[test]
    fn test_required_with_ambient_reuses_it() {
        // GIVEN
        let (ktm, manager) = setup();

        // WHEN
        manager
            .required([])
            .unwrap()
            .run(|| {
                let outer = ambient::current();
                manager.required([]).unwrap().run(|| {
                    assert_eq!(ambient::current(), outer);
                    ok()
                })
            })
            .unwrap();

        // THEN
        assert_eq!(ktm.calls().create, 1);
        assert_eq!(ktm.calls().close, 1);
    }

    #[test]
    fn test_requires_new_creates_independent_transaction() {
        // GIVEN
        let (ktm, manager) = setup();

        // WHEN
        manager
            .required([])
            .unwrap()
            .run(|| {
                let outer = ambient::current().unwrap();
                manager.requires_new([]).unwrap().run(|| {
                    let inner = ambient::current().unwrap();
                    assert_ne!(inner, outer);
                    ok()
                })?;
                assert_eq!(ambient::current(), Some(outer));
                Ok::<_, PropagationError<Failed>>(())
            })
            .unwrap();

        // THEN
        assert_eq!(ktm.calls().create, 2);
        assert_eq!(ktm.calls().commit, 2);
        assert_eq!(ktm.calls().close, 2);
    }

    #[test]
    fn test_requires_new_without_ambient_restores_empty() {
        let (ktm, manager) = setup();

        manager.requires_new([]).unwrap().run(ok).unwrap();

        assert_eq!(ktm.calls().create, 1);
        assert!(ambient::current().is_none());
        assert_eq!(ambient::depth(), 0);
    }

    #[test]
    fn test_mandatory_without_ambient_never_runs_action() {
        // GIVEN
        let (ktm, manager) = setup();
        let invoked = Cell::new(false);

        // WHEN
        let err = manager
            .mandatory()
            .run(|| {
                invoked.set(true);
                ok()
            })
            .unwrap_err();

        // THEN
        assert!(!invoked.get());
        assert_eq!(err.transaction_error(), Some(&TransactionError::TransactionRequired));
        assert_eq!(ktm.calls(), Calls::default());
    }

    #[test]
    fn test_mandatory_with_ambient_runs_in_it() {
        let (_ktm, manager) = setup();

        manager
            .required([])
            .unwrap()
            .run(|| {
                let outer = ambient::current();
                manager.mandatory().run(|| {
                    assert_eq!(ambient::current(), outer);
                    ok()
                })
            })
            .unwrap();
    }

    #[test]
    fn test_never_with_ambient_never_runs_action() {
        // GIVEN
        let (_ktm, manager) = setup();
        let invoked = Cell::new(false);

        // WHEN
        let inner = manager
            .required([])
            .unwrap()
            .call(|| {
                Ok::<_, Failed>(manager.never().run(|| {
                    invoked.set(true);
                    ok()
                }))
            })
            .unwrap();

        // THEN
        assert!(!invoked.get());
        assert_eq!(
            inner.unwrap_err().transaction_error(),
            Some(&TransactionError::TransactionNotAllowed)
        );
    }

    #[test]
    fn test_never_without_ambient_runs_action() {
        let (ktm, manager) = setup();

        let value = manager.never().call(|| Ok::<_, Failed>(7)).unwrap();

        assert_eq!(value, 7);
        assert_eq!(ktm.calls().create, 0);
    }

    #[test]
    fn test_not_supported_suspends_and_restores() {
        // GIVEN
        let (_ktm, manager) = setup();

        // WHEN / THEN
        manager
            .required([])
            .unwrap()
            .run(|| {
                let outer = ambient::current();
                assert!(outer.is_some());
                manager.not_supported().run(|| {
                    assert!(ambient::current().is_none());
                    ok()
                })?;
                assert_eq!(ambient::current(), outer);
                Ok::<_, PropagationError<Failed>>(())
            })
            .unwrap();
    }

    #[test]
    fn test_supports_runs_with_or_without_ambient() {
        let (ktm, manager) = setup();

        manager
            .supports()
            .run(|| {
                assert!(ambient::current().is_none());
                ok()
            })
            .unwrap();
        manager
            .required([])
            .unwrap()
            .run(|| {
                let outer = ambient::current();
                manager.supports().run(|| {
                    assert_eq!(ambient::current(), outer);
                    ok()
                })
            })
            .unwrap();

        assert_eq!(ktm.calls().create, 1);
    }

    #[test]
    fn test_auto_commit_off_skips_commit_but_closes() {
        // GIVEN
        let (ktm, manager) = setup();

        // WHEN
        manager
            .required([])
            .unwrap()
            .run(|| {
                if let Some(tx) = ambient::current() {
                    tx.set_auto_commit(false);
                }
                ok()
            })
            .unwrap();

        // THEN
        assert_eq!(ktm.calls().commit, 0);
        assert_eq!(ktm.calls().close, 1);
    }

    #[test]
    fn test_explicit_rollback_skips_commit() {
        let (ktm, manager) = setup();

        manager
            .required([])
            .unwrap()
            .run(|| {
                ambient::current().map_or(Ok(()), |tx| tx.rollback())
            })
            .unwrap();

        assert_eq!(ktm.calls().rollback, 1);
        assert_eq!(ktm.calls().commit, 0);
        assert_eq!(ktm.calls().close, 1);
    }

    #[test]
    fn test_action_failure_closes_without_commit() {
        // GIVEN
        let (ktm, manager) = setup();

        // WHEN
        let err = manager
            .required([])
            .unwrap()
            .run(|| Err::<(), _>(Failed))
            .unwrap_err();

        // THEN
        assert_eq!(err.action_error(), Some(&Failed));
        assert!(err.suppressed().is_empty());
        assert_eq!(ktm.calls().commit, 0);
        assert_eq!(ktm.calls().close, 1);
        assert_eq!(ktm.inner().open_transaction_count(), 0);
    }

    #[test]
    fn test_close_failure_is_suppressed_behind_action_failure() {
        // GIVEN
        let (ktm, manager) = setup();
        ktm.fail_close(codes::GEN_FAILURE);

        // WHEN
        let err = manager
            .required([])
            .unwrap()
            .run(|| Err::<(), _>(Failed))
            .unwrap_err();

        // THEN
        assert_eq!(err.action_error(), Some(&Failed));
        assert_eq!(err.suppressed().len(), 1);
        assert_eq!(err.suppressed()[0].error_code(), Some(codes::GEN_FAILURE));
    }

    #[test]
    fn test_close_failure_alone_is_primary() {
        let (ktm, manager) = setup();
        ktm.fail_close(codes::GEN_FAILURE);

        let err = manager.required([]).unwrap().run(ok).unwrap_err();

        assert_eq!(
            err.transaction_error().and_then(TransactionError::error_code),
            Some(codes::GEN_FAILURE)
        );
        assert_eq!(ktm.calls().commit, 1);
    }

    #[test]
    fn test_commit_failure_still_closes() {
        // GIVEN
        let (ktm, manager) = setup();
        ktm.fail_commit(codes::TRANSACTION_ALREADY_ABORTED);

        // WHEN
        let err = manager.required([]).unwrap().run(ok).unwrap_err();

        // THEN
        assert_eq!(
            err.transaction_error().and_then(TransactionError::error_code),
            Some(codes::TRANSACTION_ALREADY_ABORTED)
        );
        assert_eq!(ktm.calls().close, 1);
        assert_eq!(ambient::depth(), 0);
    }

    #[test]
    fn test_create_failure_never_runs_action() {
        let (ktm, manager) = setup();
        ktm.fail_create(codes::ACCESS_DENIED);
        let invoked = Cell::new(false);

        let err = manager
            .required([])
            .unwrap()
            .run(|| {
                invoked.set(true);
                ok()
            })
            .unwrap_err();

        assert!(!invoked.get());
        assert_eq!(
            err.transaction_error().and_then(TransactionError::error_code),
            Some(codes::ACCESS_DENIED)
        );
        assert_eq!(ambient::depth(), 0);
    }

    #[test]
    fn test_panic_closes_and_restores_ambient() {
        // GIVEN
        let (ktm, manager) = setup();
        let state = manager.required([]).unwrap();

        // WHEN
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            state.run(|| -> Result<(), Failed> { panic!("boom") })
        }));

        // THEN
        assert!(result.is_err());
        assert_eq!(ktm.calls().commit, 0);
        assert_eq!(ktm.calls().close, 1);
        assert_eq!(ambient::depth(), 0);
        assert_eq!(ktm.inner().open_transaction_count(), 0);
    }

    #[test]
    fn test_unknown_outcome_during_finalize_still_closes() {
        // GIVEN
        let (ktm, manager) = setup();
        let state = manager.required([]).unwrap();

        // WHEN
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            state.run(|| {
                ktm.report_outcome(-1);
                ok()
            })
        }));

        // THEN
        assert!(result.is_err());
        assert_eq!(ktm.calls().close, 1);
        assert_eq!(ambient::depth(), 0);
    }

    #[test]
    fn test_duplicate_options_rejected_before_native_call() {
        // GIVEN
        let (ktm, manager) = setup();

        // WHEN
        let err = manager
            .required([
                TransactionOption::timeout(Duration::from_secs(1)),
                TransactionOption::timeout(Duration::from_secs(2)),
            ])
            .unwrap_err();

        // THEN
        assert_eq!(
            err,
            TransactionError::DuplicateOption {
                kind: OptionKind::Timeout
            }
        );
        assert_eq!(ktm.calls(), Calls::default());
    }

    #[test]
    fn test_options_reach_created_transaction() {
        let (_ktm, manager) = setup();

        manager
            .requires_new([
                TransactionOption::timeout(Duration::from_secs(3)),
                TransactionOption::description("import"),
            ])
            .unwrap()
            .run(|| {
                let tx = ambient::current().unwrap();
                assert_eq!(tx.timeout(), Duration::from_secs(3));
                assert_eq!(tx.description(), Some("import"));
                ok()
            })
            .unwrap();
    }

    #[test]
    fn test_call_returns_action_value() {
        let (_ktm, manager) = setup();

        let value = manager
            .required([])
            .unwrap()
            .call(|| Ok::<_, Failed>("done"))
            .unwrap();

        assert_eq!(value, "done");
    }

    #[test]
    fn test_propagation_names() {
        assert_eq!(Propagation::RequiresNew.to_string(), "REQUIRES_NEW");
        assert!(Propagation::Required.accepts_options());
        assert!(!Propagation::Supports.accepts_options());
    }
}

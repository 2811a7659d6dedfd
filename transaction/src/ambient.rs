//! The ambient transaction of the executing call chain.
//!
//! A per-thread stack of `Option<Transaction>`. Propagation policies push an
//! entry on entry and pop it on exit through [`AmbientScope`]; the top entry
//! is the current transaction, and a `None` entry suspends whatever lies
//! beneath it.

use std::cell::RefCell;
use std::marker::PhantomData;

use tracing::trace;

use crate::transaction::Transaction;

thread_local! {
    static STACK: RefCell<Vec<Option<Transaction>>> = const { RefCell::new(Vec::new()) };
}

/// The current transaction, if any.
pub fn current() -> Option<Transaction> {
    STACK
        .try_with(|stack| stack.borrow().last().cloned().flatten())
        .ok()
        .flatten()
}

/// Whether a transaction is current.
pub fn is_active() -> bool {
    STACK
        .try_with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
        .unwrap_or(false)
}

/// Number of entries on this thread's stack.
pub fn depth() -> usize {
    STACK.try_with(|stack| stack.borrow().len()).unwrap_or(0)
}

/// Make `transaction` current until the returned scope is dropped.
#[must_use = "the entry is popped as soon as the scope is dropped"]
pub(crate) fn enter(transaction: Option<Transaction>) -> AmbientScope {
    trace!(transaction = ?transaction.as_ref().map(Transaction::handle), "enter ambient scope");
    let depth = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(transaction);
        stack.len()
    });
    AmbientScope {
        depth,
        _not_send: PhantomData,
    }
}

/// Hide the current transaction until the returned scope is dropped.
#[must_use = "the entry is popped as soon as the scope is dropped"]
pub(crate) fn suspend() -> AmbientScope {
    enter(None)
}

/// Pops its stack entry on drop, including during unwinding.
pub(crate) struct AmbientScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        // Dropped outside the borrow: releasing the last clone may close
        // the transaction.
        let popped = STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "ambient scopes dropped out of order");
            stack.pop()
        });
        trace!(depth = self.depth, "leave ambient scope");
        drop(popped);
    }
}

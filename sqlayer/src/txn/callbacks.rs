// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-session transaction callback stacks
//!
//! Independent subsystems register work to run at a transaction boundary.
//! Each boundary has its own stack; draining pops and invokes every callback
//! exactly once in reverse registration order, collecting failures so one
//! failing participant never hides the boundary from the others.

use crate::error::{combine, TxnError, TxnResult};
use crate::session::Session;
use crate::storage::Version;
use std::fmt;

/// Transaction boundary a callback is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackType {
    /// Before the store commit is issued; receives the read version
    PreCommit,
    /// After a successful store commit; receives the commit version
    AfterCommit,
    /// After rollback; receives `NO_VERSION`
    AfterRollback,
    /// Last, on every exit path; receives `NO_VERSION` and the failure cause
    AfterEnd,
}

impl CallbackType {
    pub const ALL: [CallbackType; 4] = [
        CallbackType::PreCommit,
        CallbackType::AfterCommit,
        CallbackType::AfterRollback,
        CallbackType::AfterEnd,
    ];
}

/// A unit of work bound to one transaction boundary
///
/// Arguments are the session, the event timestamp (or `NO_VERSION`), and the
/// failure that ended the transaction, if any.
pub type Callback =
    Box<dyn FnOnce(&Session, Version, Option<&TxnError>) -> TxnResult<()> + Send>;

/// The four callback stacks of one session
#[derive(Default)]
pub struct CallbackRegistry {
    pre_commit: Vec<Callback>,
    after_commit: Vec<Callback>,
    after_rollback: Vec<Callback>,
    after_end: Vec<Callback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn stack(&self, callback_type: CallbackType) -> &Vec<Callback> {
        match callback_type {
            CallbackType::PreCommit => &self.pre_commit,
            CallbackType::AfterCommit => &self.after_commit,
            CallbackType::AfterRollback => &self.after_rollback,
            CallbackType::AfterEnd => &self.after_end,
        }
    }

    fn stack_mut(&mut self, callback_type: CallbackType) -> &mut Vec<Callback> {
        match callback_type {
            CallbackType::PreCommit => &mut self.pre_commit,
            CallbackType::AfterCommit => &mut self.after_commit,
            CallbackType::AfterRollback => &mut self.after_rollback,
            CallbackType::AfterEnd => &mut self.after_end,
        }
    }

    pub fn push(&mut self, callback_type: CallbackType, callback: Callback) {
        self.stack_mut(callback_type).push(callback);
    }

    /// Most recently registered callback of a stack
    pub fn pop(&mut self, callback_type: CallbackType) -> Option<Callback> {
        self.stack_mut(callback_type).pop()
    }

    pub fn len(&self, callback_type: CallbackType) -> usize {
        self.stack(callback_type).len()
    }

    /// True when all four stacks are empty
    pub fn is_empty(&self) -> bool {
        CallbackType::ALL.iter().all(|t| self.stack(*t).is_empty())
    }

    /// Discard a stack without running it
    pub fn clear(&mut self, callback_type: CallbackType) {
        self.stack_mut(callback_type).clear();
    }

    pub fn clear_all(&mut self) {
        for callback_type in CallbackType::ALL {
            self.clear(callback_type);
        }
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("pre_commit", &self.pre_commit.len())
            .field("after_commit", &self.after_commit.len())
            .field("after_rollback", &self.after_rollback.len())
            .field("after_end", &self.after_end.len())
            .finish()
    }
}

/// Drain one stack of `session`, LIFO
///
/// Every callback runs even when earlier ones fail. The result is an error
/// when `cause` was given or any callback failed; failures are folded into
/// `cause` in the order they occurred.
pub fn run_callbacks(
    session: &mut Session,
    callback_type: CallbackType,
    timestamp: Version,
    cause: Option<TxnError>,
) -> TxnResult<()> {
    let mut failures: Option<TxnError> = None;
    let mut ran = 0usize;
    while let Some(callback) = session.callbacks_mut().pop(callback_type) {
        ran += 1;
        if let Err(e) = callback(&*session, timestamp, cause.as_ref()) {
            log::warn!("{:?} callback failed: {}", callback_type, e);
            failures = Some(combine(failures, e));
        }
    }
    if ran > 0 {
        log::trace!("Ran {} {:?} callbacks at {}", ran, callback_type, timestamp);
    }

    match (cause, failures) {
        (None, None) => Ok(()),
        (Some(cause), None) => Err(cause),
        (None, Some(failures)) => Err(failures),
        (Some(cause), Some(failures)) => Err(fold_into(cause, failures)),
    }
}

fn fold_into(cause: TxnError, failures: TxnError) -> TxnError {
    match failures {
        TxnError::Aggregate(errors) => errors
            .into_iter()
            .fold(cause, |acc, e| combine(Some(acc), e)),
        single => combine(Some(cause), single),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NO_VERSION;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Callback {
        let log = log.clone();
        let name = name.to_string();
        Box::new(move |_, ts, _| {
            log.lock().push(format!("{}@{}", name, ts));
            Ok(())
        })
    }

    #[test]
    fn test_drain_is_lifo_and_single_shot() {
        let mut session = Session::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            session
                .callbacks_mut()
                .push(CallbackType::AfterCommit, recorder(&log, name));
        }

        run_callbacks(&mut session, CallbackType::AfterCommit, 42, None).unwrap();
        assert_eq!(*log.lock(), vec!["c@42", "b@42", "a@42"]);
        assert_eq!(session.callbacks().len(CallbackType::AfterCommit), 0);

        run_callbacks(&mut session, CallbackType::AfterCommit, 43, None).unwrap();
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_failures_are_aggregated_after_full_drain() {
        let mut session = Session::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = session.callbacks_mut();
        registry.push(CallbackType::PreCommit, recorder(&log, "first"));
        registry.push(
            CallbackType::PreCommit,
            Box::new(|_, _, _| Err(TxnError::callback("one"))),
        );
        registry.push(CallbackType::PreCommit, recorder(&log, "middle"));
        registry.push(
            CallbackType::PreCommit,
            Box::new(|_, _, _| Err(TxnError::callback("two"))),
        );

        let err = run_callbacks(&mut session, CallbackType::PreCommit, 7, None).unwrap_err();
        assert_eq!(err.causes().len(), 2);
        assert_eq!(*log.lock(), vec!["middle@7", "first@7"]);
    }

    #[test]
    fn test_cause_is_passed_and_returned() {
        let mut session = Session::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        session.callbacks_mut().push(
            CallbackType::AfterEnd,
            Box::new(move |_, ts, cause| {
                *seen_clone.lock() = Some((ts, cause.map(|c| c.to_string())));
                Ok(())
            }),
        );

        let cause = TxnError::usage("No transaction open");
        let err = run_callbacks(
            &mut session,
            CallbackType::AfterEnd,
            NO_VERSION,
            Some(cause.clone()),
        )
        .unwrap_err();
        assert_eq!(err, cause);
        assert_eq!(
            *seen.lock(),
            Some((NO_VERSION, Some(cause.to_string())))
        );
    }

    #[test]
    fn test_clear_all() {
        let mut registry = CallbackRegistry::new();
        for callback_type in CallbackType::ALL {
            registry.push(callback_type, Box::new(|_, _, _| Ok(())));
        }
        assert!(!registry.is_empty());
        registry.clear(CallbackType::AfterEnd);
        assert_eq!(registry.len(CallbackType::AfterEnd), 0);
        assert_eq!(registry.len(CallbackType::PreCommit), 1);
        registry.clear_all();
        assert!(registry.is_empty());
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction service implementation
//!
//! Drives the begin / commit / rollback lifecycle of the transaction bound to
//! each session, retries conflicting units of work, and chunks long-running
//! work into several physical transactions.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::TransactionConfig;
use crate::error::{combine, TxnError, TxnResult};
use crate::session::options::parse_check_time;
use crate::session::{Session, SessionOption};
use crate::storage::{KvStore, StoreError, Version, NO_VERSION};

use super::callbacks::{run_callbacks, Callback, CallbackType};
use super::checks::{
    CheckExecutor, CheckPass, CheckTime, ForeignKey, PendingCheck, StoreCheckExecutor,
};
use super::guard::TransactionGuard;
use super::state::{CommitBudget, TransactionState};

/// Outcome of [`TransactionService::commit_or_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum CommitOutcome {
    /// The transaction committed at `commit_version` and has ended
    Committed { commit_version: Version },
    /// The store asked for a retry: the transaction is still open, reset to a
    /// fresh read version, and the unit of work must be executed again
    Retried,
}

impl CommitOutcome {
    pub fn is_retried(&self) -> bool {
        matches!(self, CommitOutcome::Retried)
    }
}

/// Where a constraint check went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckDisposition {
    /// Evaluated now and passed
    Checked,
    /// Queued for the given pass
    Deferred(CheckPass),
}

/// Transaction statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatistics {
    pub committed_transactions: u64,
    pub rolled_back_transactions: u64,
    pub retried_transactions: u64,
    pub periodic_commits: u64,
    /// Uniqueness checks currently queued across all sessions
    pub pending_uniqueness_checks: i64,
}

#[derive(Debug, Default)]
struct Counters {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    retried: AtomicU64,
    periodic: AtomicU64,
}

enum CommitFailure {
    /// TRANSACTION pass found a violation; nothing was issued
    Checks(TxnError),
    /// A pre-commit callback failed; nothing was issued
    PreCommit(TxnError),
    /// The store rejected the commit, or a read on the way there failed
    Store(TxnError),
    /// The commit landed but an after-commit callback failed
    AfterCommit(TxnError),
}

/// Session-scoped transaction lifecycle over a shared store
pub struct TransactionService {
    store: Arc<dyn KvStore>,
    config: TransactionConfig,
    executor: Arc<dyn CheckExecutor>,
    counters: Counters,
    pending_uniqueness: Arc<AtomicI64>,
}

impl TransactionService {
    /// Create a service over `store`
    ///
    /// # Arguments
    /// * `store` - Shared transactional store
    /// * `config` - Periodic commit budget, check keyspace and retry policy
    pub fn new(store: Arc<dyn KvStore>, config: TransactionConfig) -> TxnResult<Self> {
        config.validate()?;
        log::info!(
            "Transaction service on {} store (commit after {} ms / {} bytes)",
            store.storage_type(),
            config.commit_after_millis,
            config.commit_after_bytes
        );
        Ok(Self {
            store,
            config,
            executor: Arc::new(StoreCheckExecutor),
            counters: Counters::default(),
            pending_uniqueness: Arc::new(AtomicI64::new(0)),
        })
    }

    /// Replace the executor used to evaluate constraint checks
    pub fn with_check_executor(mut self, executor: Arc<dyn CheckExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Map a store error to the class the store assigns it; units of work run
    /// under [`run`](Self::run) use this so read conflicts trigger a retry
    pub fn wrap(&self, error: StoreError) -> TxnError {
        TxnError::from_store(self.store.as_ref(), error)
    }

    pub fn statistics(&self) -> TransactionStatistics {
        TransactionStatistics {
            committed_transactions: self.counters.committed.load(Ordering::Relaxed),
            rolled_back_transactions: self.counters.rolled_back.load(Ordering::Relaxed),
            retried_transactions: self.counters.retried.load(Ordering::Relaxed),
            periodic_commits: self.counters.periodic.load(Ordering::Relaxed),
            pending_uniqueness_checks: self.pending_uniqueness.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Session state
    // ========================================================================

    pub fn is_transaction_active(&self, session: &Session) -> bool {
        session.txn.is_some()
    }

    pub fn is_rollback_pending(&self, session: &Session) -> bool {
        session.rollback_pending
    }

    /// Refuse any further commit until the transaction is rolled back
    pub fn set_rollback_pending(&self, session: &mut Session) {
        session.rollback_pending = true;
    }

    /// The open transaction of `session`
    pub fn transaction<'s>(
        &self,
        session: &'s mut Session,
    ) -> TxnResult<&'s mut TransactionState> {
        session
            .txn
            .as_mut()
            .ok_or_else(|| TxnError::usage("No transaction open"))
    }

    /// Read version of the open transaction
    pub fn transaction_start_timestamp(&self, session: &mut Session) -> TxnResult<Version> {
        let state = self.transaction(session)?;
        let version = state.transaction().read_version();
        version.map_err(|e| self.wrap(e))
    }

    pub fn set_session_option(
        &self,
        session: &mut Session,
        option: SessionOption,
        value: Option<&str>,
    ) -> TxnResult<()> {
        match option {
            SessionOption::ConstraintCheckTime => {
                let check_time = parse_check_time(value)?;
                log::debug!(
                    "Session {} {} = {:?}",
                    session.id(),
                    option.name(),
                    check_time
                );
                session.set_constraint_check_time(check_time);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open a transaction on `session`; transactions do not nest
    pub fn begin<'s>(&self, session: &'s mut Session) -> TxnResult<&'s mut TransactionState> {
        if session.txn.is_some() {
            return Err(TxnError::usage("Transaction already began"));
        }
        let state = TransactionState::new(
            self.store.create_transaction(),
            session.constraint_check_time(),
            CommitBudget::from(&self.config),
            self.pending_uniqueness.clone(),
        );
        log::debug!("Begin transaction on session {}", session.id());
        Ok(session.txn.insert(state))
    }

    /// Begin a transaction that is rolled back when the guard drops while still open
    pub fn begin_closeable<'a>(
        &'a self,
        session: &'a mut Session,
    ) -> TxnResult<TransactionGuard<'a>> {
        self.begin(session)?;
        Ok(TransactionGuard::new(self, session))
    }

    /// Commit the open transaction
    ///
    /// On success the transaction has ended. A TRANSACTION-pass constraint
    /// violation leaves it open; every other failure ends it.
    pub fn commit(&self, session: &mut Session) -> TxnResult<Version> {
        self.require_committable(session)?;
        match self.commit_attempt(session) {
            Ok(commit_version) => self.finish_commit(session, commit_version),
            Err(failure) => Err(self.fail_commit(session, failure)),
        }
    }

    /// Commit, or reset the transaction for another attempt after a conflict
    ///
    /// `Retried` means every callback stack and queued check of the failed
    /// attempt was discarded and the same transaction state is ready for the
    /// unit of work to run again.
    pub fn commit_or_retry(&self, session: &mut Session) -> TxnResult<CommitOutcome> {
        self.require_committable(session)?;
        match self.commit_attempt(session) {
            Ok(commit_version) => self
                .finish_commit(session, commit_version)
                .map(|commit_version| CommitOutcome::Committed { commit_version }),
            Err(CommitFailure::Store(e)) if e.is_conflict() => {
                self.retry_after_conflict(session, e)
            }
            Err(failure) => Err(self.fail_commit(session, failure)),
        }
    }

    fn require_committable(&self, session: &mut Session) -> TxnResult<()> {
        if session.rollback_pending {
            return Err(TxnError::usage("Rollback is pending"));
        }
        if session.txn.is_none() {
            return Err(self.fail_inactive(session, TxnError::usage("No transaction open")));
        }
        Ok(())
    }

    fn finish_commit(&self, session: &mut Session, commit_version: Version) -> TxnResult<Version> {
        self.counters.committed.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Committed transaction on session {} at version {}",
            session.id(),
            commit_version
        );
        self.end(session, None)?;
        Ok(commit_version)
    }

    fn fail_commit(&self, session: &mut Session, failure: CommitFailure) -> TxnError {
        match failure {
            CommitFailure::Checks(e) => e,
            CommitFailure::AfterCommit(e) => {
                self.counters.committed.fetch_add(1, Ordering::Relaxed);
                self.end_with(session, e)
            }
            CommitFailure::Store(e) | CommitFailure::PreCommit(e) => {
                log::debug!("Commit failed on session {}: {}", session.id(), e);
                self.end_with(session, e)
            }
        }
    }

    fn commit_attempt(&self, session: &mut Session) -> Result<Version, CommitFailure> {
        let executor = self.executor.clone();
        let state = self.transaction(session).map_err(CommitFailure::Checks)?;
        match state.perform_checks(executor.as_ref(), CheckPass::Transaction) {
            Ok(None) => {}
            Ok(Some(violation)) => {
                return Err(CommitFailure::Checks(TxnError::ConstraintViolation(violation)))
            }
            Err(e) => return Err(CommitFailure::Store(self.wrap(e))),
        }
        log::debug!(
            "Commit after {} ms / {} ms uniqueness",
            state.elapsed().as_millis(),
            state.uniqueness_time().as_millis()
        );

        let start = state
            .transaction()
            .read_version()
            .map_err(|e| CommitFailure::Store(self.wrap(e)))?;
        run_callbacks(session, CallbackType::PreCommit, start, None)
            .map_err(CommitFailure::PreCommit)?;

        let state = self.transaction(session).map_err(CommitFailure::Store)?;
        let commit_version = state
            .transaction()
            .commit()
            .map_err(|e| CommitFailure::Store(self.wrap(e)))?;

        run_callbacks(session, CallbackType::AfterCommit, commit_version, None)
            .map_err(CommitFailure::AfterCommit)?;
        Ok(commit_version)
    }

    fn retry_after_conflict(
        &self,
        session: &mut Session,
        error: TxnError,
    ) -> TxnResult<CommitOutcome> {
        let resolved = match (self.transaction(session), error.store_error()) {
            (Ok(state), Some(store_error)) => state.transaction().on_error(store_error),
            _ => Err(StoreError::not_committed()),
        };
        match resolved {
            Ok(()) => {
                session.callbacks_mut().clear_all();
                if let Some(state) = session.txn.as_mut() {
                    state.reset();
                }
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                log::debug!("Retrying transaction on session {}: {}", session.id(), error);
                Ok(CommitOutcome::Retried)
            }
            Err(terminal) => {
                let terminal = self.wrap(terminal);
                log::warn!(
                    "Giving up on transaction for session {}: {}",
                    session.id(),
                    terminal
                );
                Err(self.end_with(session, terminal))
            }
        }
    }

    /// Roll back the open transaction
    pub fn rollback(&self, session: &mut Session) -> TxnResult<()> {
        if session.txn.is_none() {
            return Err(self.fail_inactive(session, TxnError::usage("No transaction open")));
        }
        let result = run_callbacks(session, CallbackType::AfterRollback, NO_VERSION, None);
        self.counters.rolled_back.fetch_add(1, Ordering::Relaxed);
        log::debug!("Rolled back transaction on session {}", session.id());
        self.end(session, result.err())
    }

    /// Roll back if a transaction is open; safe to call from any cleanup path
    pub fn rollback_if_open(&self, session: &mut Session) -> TxnResult<()> {
        if session.txn.is_some() {
            self.rollback(session)
        } else {
            Ok(())
        }
    }

    /// Run `work` in a transaction, re-running it from `begin` after conflicts
    ///
    /// Gives up once the retry policy is exhausted. Any other failure rolls
    /// back and propagates.
    pub fn run<T, F>(&self, session: &mut Session, mut work: F) -> TxnResult<T>
    where
        F: FnMut(&mut Session) -> TxnResult<T>,
    {
        let policy = self.config.retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.begin(session)?;
            let result = match work(session) {
                Ok(value) => self.commit(session).map(|_| value),
                Err(e) => Err(e),
            };
            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let error = match self.rollback_if_open(session) {
                Ok(()) => error,
                Err(cleanup) => combine(Some(error), cleanup),
            };

            if error.is_conflict() && policy.allows_retry(attempt) {
                let delay = policy.backoff(attempt);
                log::debug!("Retry attempt {} due to conflict: {}", attempt, error);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                continue;
            }
            return Err(error);
        }
    }

    /// Commit and reset in place when the time or byte budget is exceeded
    ///
    /// Returns whether a commit happened.
    pub fn periodically_commit(&self, session: &mut Session) -> TxnResult<bool> {
        if !self.transaction(session)?.time_to_commit() {
            return Ok(false);
        }
        self.commit_and_reset(session)?;
        Ok(true)
    }

    /// Whether the time or byte budget is exceeded, without committing
    pub fn periodically_commit_now(&self, session: &mut Session) -> TxnResult<bool> {
        Ok(self.transaction(session)?.time_to_commit())
    }

    /// Commit the current physical transaction and continue in a fresh one
    ///
    /// Runs the TRANSACTION check pass but no callback stacks; the session
    /// keeps its transaction binding.
    pub fn commit_and_reset(&self, session: &mut Session) -> TxnResult<Version> {
        let executor = self.executor.clone();
        let state = self.transaction(session)?;
        if let Some(violation) = state
            .perform_checks(executor.as_ref(), CheckPass::Transaction)
            .map_err(|e| self.wrap(e))?
        {
            return Err(TxnError::ConstraintViolation(violation));
        }

        let elapsed = state.elapsed();
        let bytes = state.bytes_set();
        let commit_version = state.transaction().commit().map_err(|e| self.wrap(e))?;
        state.transaction().reset();
        state.reset();
        state.next_generation();
        self.counters.periodic.fetch_add(1, Ordering::Relaxed);

        log::debug!(
            "Periodic commit at version {} after {} ms / {} bytes (generation {})",
            commit_version,
            elapsed.as_millis(),
            bytes,
            state.generation()
        );
        Ok(commit_version)
    }

    /// Release per-session state at disconnect
    pub fn close_session(&self, session: &mut Session) -> TxnResult<()> {
        let result = self.rollback_if_open(session);
        session.callbacks_mut().clear_all();
        log::debug!("Closed session {}", session.id());
        result
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    pub fn add_callback<F>(&self, session: &mut Session, callback_type: CallbackType, callback: F)
    where
        F: FnOnce(&Session, Version, Option<&TxnError>) -> TxnResult<()> + Send + 'static,
    {
        session
            .callbacks_mut()
            .push(callback_type, Box::new(callback) as Callback);
    }

    /// Register a callback, requiring an open transaction
    pub fn add_callback_on_active<F>(
        &self,
        session: &mut Session,
        callback_type: CallbackType,
        callback: F,
    ) -> TxnResult<()>
    where
        F: FnOnce(&Session, Version, Option<&TxnError>) -> TxnResult<()> + Send + 'static,
    {
        if session.txn.is_none() {
            return Err(TxnError::usage("No transaction open"));
        }
        self.add_callback(session, callback_type, callback);
        Ok(())
    }

    /// Register a callback, requiring no open transaction
    pub fn add_callback_on_inactive<F>(
        &self,
        session: &mut Session,
        callback_type: CallbackType,
        callback: F,
    ) -> TxnResult<()>
    where
        F: FnOnce(&Session, Version, Option<&TxnError>) -> TxnResult<()> + Send + 'static,
    {
        if session.txn.is_some() {
            return Err(TxnError::usage("Transaction already began"));
        }
        self.add_callback(session, callback_type, callback);
        Ok(())
    }

    // ========================================================================
    // Constraint checks
    // ========================================================================

    /// Evaluate `check` now or queue it, per the transaction's timing and deferral flags
    pub fn check_or_defer(
        &self,
        session: &mut Session,
        check: PendingCheck,
    ) -> TxnResult<CheckDisposition> {
        let state = self.transaction(session)?;

        let deferred_fk = check
            .foreign_key()
            .map(|fk| state.is_deferred(fk))
            .unwrap_or(false);
        let pass = if deferred_fk {
            Some(CheckPass::Transaction)
        } else {
            match state.check_time() {
                CheckTime::Immediate => None,
                CheckTime::DeferredStatement => Some(CheckPass::Statement),
                CheckTime::DeferredTransaction => Some(CheckPass::Transaction),
            }
        };

        match pass {
            Some(pass) => {
                if let Some(checks) = state.index_checks(true) {
                    checks.add(pass, check);
                }
                Ok(CheckDisposition::Deferred(pass))
            }
            None => {
                let violation = self
                    .executor
                    .evaluate(state.transaction(), &check)
                    .map_err(|e| self.wrap(e))?;
                match violation {
                    Some(violation) => Err(TxnError::ConstraintViolation(violation)),
                    None => Ok(CheckDisposition::Checked),
                }
            }
        }
    }

    /// Run the STATEMENT pass
    ///
    /// A violation fails the statement only: the transaction stays open with
    /// the statement's writes applied and the violating check still queued,
    /// so a commit without correction fails as well.
    pub fn check_statement_foreign_keys(&self, session: &mut Session) -> TxnResult<()> {
        let executor = self.executor.clone();
        let state = self.transaction(session)?;
        match state
            .perform_checks(executor.as_ref(), CheckPass::Statement)
            .map_err(|e| self.wrap(e))?
        {
            Some(violation) => Err(TxnError::ConstraintViolation(violation)),
            None => Ok(()),
        }
    }

    /// Defer (or un-defer) one foreign key, or all deferrable ones for `None`
    pub fn set_deferred_foreign_key(
        &self,
        session: &mut Session,
        foreign_key: Option<&ForeignKey>,
        deferred: bool,
    ) -> TxnResult<()> {
        self.transaction(session)?
            .set_deferred_foreign_key(foreign_key, deferred)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Tear down the session's transaction and run the after-end stack
    ///
    /// Returns an error when `cause` is given or an after-end callback failed.
    fn end(&self, session: &mut Session, cause: Option<TxnError>) -> TxnResult<()> {
        if let Some(mut state) = session.txn.take() {
            state.transaction().cancel();
        }
        session.rollback_pending = false;
        let callbacks = session.callbacks_mut();
        callbacks.clear(CallbackType::PreCommit);
        callbacks.clear(CallbackType::AfterCommit);
        callbacks.clear(CallbackType::AfterRollback);
        run_callbacks(session, CallbackType::AfterEnd, NO_VERSION, cause)
    }

    /// End with a failure cause, returning the error to surface
    fn end_with(&self, session: &mut Session, cause: TxnError) -> TxnError {
        match self.end(session, Some(cause.clone())) {
            Err(e) => e,
            Ok(()) => cause,
        }
    }

    /// Report a lifecycle call on an idle session, still draining after-end
    fn fail_inactive(&self, session: &mut Session, error: TxnError) -> TxnError {
        log::warn!("Session {}: {}", session.id(), error);
        self.end_with(session, error)
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-session transaction state
//!
//! Wraps one live store transaction together with the budget counters used
//! for periodic commits, the deferred-check collector, and the session's
//! foreign-key deferral flags for this transaction.

use super::checks::{
    CheckExecutor, CheckPass, CheckTime, ConstraintViolation, ForeignKey, PendingChecks,
};
use crate::config::TransactionConfig;
use crate::error::{TxnError, TxnResult};
use crate::storage::{KvTransaction, StorageResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Limits on one physical transaction before a periodic commit is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitBudget {
    pub after: Duration,
    pub after_bytes: u64,
    pub scan_limit: usize,
}

impl From<&TransactionConfig> for CommitBudget {
    fn from(config: &TransactionConfig) -> Self {
        Self {
            after: config.commit_after(),
            after_bytes: config.commit_after_bytes,
            scan_limit: config.commit_scan_limit,
        }
    }
}

/// State of the transaction open on a session
pub struct TransactionState {
    transaction: Box<dyn KvTransaction>,
    index_checks: Option<PendingChecks>,
    start_time: Instant,
    bytes_set: u64,
    uniqueness_time: Duration,
    deferred_foreign_keys: HashMap<String, bool>,
    /// Set by `SET CONSTRAINTS ALL`; applies to deferrable keys without an explicit flag
    all_foreign_keys_deferred: Option<bool>,
    /// Physical transactions completed by periodic commits so far
    generation: u64,
    budget: CommitBudget,
    pending_uniqueness: Arc<AtomicI64>,
}

impl TransactionState {
    pub(crate) fn new(
        transaction: Box<dyn KvTransaction>,
        check_time: Option<CheckTime>,
        budget: CommitBudget,
        pending_uniqueness: Arc<AtomicI64>,
    ) -> Self {
        let index_checks = match check_time {
            Some(time) if time != CheckTime::Immediate => {
                Some(PendingChecks::new(time, pending_uniqueness.clone()))
            }
            _ => None,
        };
        Self {
            transaction,
            index_checks,
            start_time: Instant::now(),
            bytes_set: 0,
            uniqueness_time: Duration::ZERO,
            deferred_foreign_keys: HashMap::new(),
            all_foreign_keys_deferred: None,
            generation: 0,
            budget,
            pending_uniqueness,
        }
    }

    /// The live store transaction
    pub fn transaction(&mut self) -> &mut dyn KvTransaction {
        self.transaction.as_mut()
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn bytes_set(&self) -> u64 {
        self.bytes_set
    }

    pub fn uniqueness_time(&self) -> Duration {
        self.uniqueness_time
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Write through the transaction, counting key and value bytes against the budget
    pub fn set_bytes(&mut self, key: &[u8], value: &[u8]) {
        self.transaction.set(key, value);
        self.bytes_set += (key.len() + value.len()) as u64;
    }

    pub fn get(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.transaction.get(key)
    }

    pub fn get_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.transaction.get_range(begin, end, limit)
    }

    pub fn clear(&mut self, key: &[u8]) {
        self.transaction.clear(key);
    }

    pub fn clear_range(&mut self, begin: &[u8], end: &[u8]) {
        self.transaction.clear_range(begin, end);
    }

    /// Deferred-check collector; created with immediate timing when `create` is set
    pub fn index_checks(&mut self, create: bool) -> Option<&mut PendingChecks> {
        if create && self.index_checks.is_none() {
            self.index_checks = Some(PendingChecks::new(
                CheckTime::Immediate,
                self.pending_uniqueness.clone(),
            ));
        }
        self.index_checks.as_mut()
    }

    /// Check timing in effect for this transaction
    pub fn check_time(&self) -> CheckTime {
        self.index_checks
            .as_ref()
            .map(|c| c.check_time())
            .unwrap_or(CheckTime::Immediate)
    }

    /// Restart the budget window and drop queued checks
    pub fn reset(&mut self) {
        self.start_time = Instant::now();
        self.bytes_set = 0;
        if let Some(checks) = self.index_checks.as_mut() {
            checks.clear();
        }
    }

    /// Whether the time or byte budget of this physical transaction is exceeded
    pub fn time_to_commit(&self) -> bool {
        let elapsed = self.start_time.elapsed();
        if elapsed > self.budget.after || self.bytes_set > self.budget.after_bytes {
            log::debug!(
                "Periodic commit after {} ms / {} bytes",
                elapsed.as_millis(),
                self.bytes_set
            );
            return true;
        }
        false
    }

    /// Rows a bulk scan should process between `periodically_commit` calls
    pub fn periodically_commit_scan_limit(&self) -> usize {
        self.budget.scan_limit
    }

    pub fn is_deferred(&self, foreign_key: &ForeignKey) -> bool {
        if let Some(deferred) = self.deferred_foreign_keys.get(&foreign_key.name) {
            return *deferred;
        }
        match self.all_foreign_keys_deferred {
            Some(deferred) if foreign_key.deferrable => deferred,
            _ => foreign_key.initially_deferred,
        }
    }

    /// Mark one foreign key, or all of them when `foreign_key` is `None`
    pub fn set_deferred_foreign_key(
        &mut self,
        foreign_key: Option<&ForeignKey>,
        deferred: bool,
    ) -> TxnResult<()> {
        match foreign_key {
            Some(fk) => {
                if deferred && !fk.deferrable {
                    return Err(TxnError::InvalidParameter(format!(
                        "Foreign key {} is not deferrable",
                        fk.name
                    )));
                }
                self.deferred_foreign_keys.insert(fk.name.clone(), deferred);
            }
            None => {
                self.deferred_foreign_keys.clear();
                self.all_foreign_keys_deferred = Some(deferred);
            }
        }
        Ok(())
    }

    pub(crate) fn perform_checks(
        &mut self,
        executor: &dyn CheckExecutor,
        pass: CheckPass,
    ) -> StorageResult<Option<ConstraintViolation>> {
        match self.index_checks.as_mut() {
            Some(checks) => checks.perform(
                self.transaction.as_mut(),
                executor,
                pass,
                &mut self.uniqueness_time,
            ),
            None => Ok(None),
        }
    }

    pub(crate) fn next_generation(&mut self) {
        self.generation += 1;
    }
}

impl fmt::Debug for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionState")
            .field("bytes_set", &self.bytes_set)
            .field("elapsed", &self.start_time.elapsed())
            .field("generation", &self.generation)
            .field("pending_checks", &self.index_checks.as_ref().map(|c| c.len()))
            .finish()
    }
}

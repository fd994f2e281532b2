// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Deferred constraint checks
//!
//! Uniqueness and foreign-key checks either run when the write happens or are
//! queued in a per-transaction collector and run at a later pass: the end of
//! the statement or the commit. This module only sequences *when* a check
//! runs; evaluating one is delegated to a [`CheckExecutor`].

use crate::error::{TxnError, TxnResult};
use crate::storage::tuple::strinc;
use crate::storage::{KvTransaction, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Check Timing
// ============================================================================

/// When a session's constraint checks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CheckTime {
    /// At write time
    #[default]
    Immediate,
    /// At the end of each statement
    DeferredStatement,
    /// At commit
    DeferredTransaction,
}

impl CheckTime {
    /// Parse a session option value
    ///
    /// Names are case-insensitive. `DEFERRED*` spellings are accepted as
    /// aliases of the `DELAYED*` names.
    pub fn parse(value: &str) -> TxnResult<Self> {
        let mut name = value.trim().to_uppercase();
        if let Some(rest) = name.strip_prefix("DEFERRED") {
            name = format!("DELAYED{}", rest);
        }
        match name.as_str() {
            "IMMEDIATE" => Ok(CheckTime::Immediate),
            "DELAYED" | "DELAYED_STATEMENT" | "STATEMENT" => Ok(CheckTime::DeferredStatement),
            "DELAYED_UNTIL_COMMIT" | "DELAYED_TRANSACTION" | "TRANSACTION" => {
                Ok(CheckTime::DeferredTransaction)
            }
            _ => Err(TxnError::InvalidParameter(format!(
                "Unknown constraint check time: {}",
                value
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckTime::Immediate => "IMMEDIATE",
            CheckTime::DeferredStatement => "DELAYED",
            CheckTime::DeferredTransaction => "DELAYED_UNTIL_COMMIT",
        }
    }
}

impl fmt::Display for CheckTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Boundary at which queued checks are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckPass {
    /// End of a SQL statement
    Statement,
    /// Commit
    Transaction,
}

// ============================================================================
// Constraints and Checks
// ============================================================================

/// Foreign key as seen by the deferral logic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    /// Whether `SET CONSTRAINTS ... DEFERRED` may apply to this key
    pub deferrable: bool,
    pub initially_deferred: bool,
}

impl ForeignKey {
    /// A non-deferrable foreign key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deferrable: false,
            initially_deferred: false,
        }
    }

    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    pub fn initially_deferred(mut self) -> Self {
        self.deferrable = true;
        self.initially_deferred = true;
        self
    }
}

/// A constraint check awaiting evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCheck {
    /// At most one key may exist under `prefix`
    Uniqueness { index: String, prefix: Vec<u8> },
    /// The referenced parent row at `key` must exist
    ReferencedRowExists { foreign_key: ForeignKey, key: Vec<u8> },
    /// No referencing child row may exist under `prefix`
    NoReferencingRows { foreign_key: ForeignKey, prefix: Vec<u8> },
}

impl PendingCheck {
    pub fn constraint_name(&self) -> &str {
        match self {
            PendingCheck::Uniqueness { index, .. } => index,
            PendingCheck::ReferencedRowExists { foreign_key, .. }
            | PendingCheck::NoReferencingRows { foreign_key, .. } => &foreign_key.name,
        }
    }

    pub fn foreign_key(&self) -> Option<&ForeignKey> {
        match self {
            PendingCheck::Uniqueness { .. } => None,
            PendingCheck::ReferencedRowExists { foreign_key, .. }
            | PendingCheck::NoReferencingRows { foreign_key, .. } => Some(foreign_key),
        }
    }

    pub fn is_uniqueness(&self) -> bool {
        matches!(self, PendingCheck::Uniqueness { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    DuplicateKey,
    MissingReferencedRow,
    ReferencingRowsExist,
}

/// A failed constraint check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    pub constraint: String,
    pub detail: String,
}

impl ConstraintViolation {
    pub fn new(
        kind: ViolationKind,
        constraint: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            constraint: constraint.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ViolationKind::DuplicateKey => "duplicate key",
            ViolationKind::MissingReferencedRow => "referenced row missing",
            ViolationKind::ReferencingRowsExist => "referencing rows exist",
        };
        write!(f, "{} for {}: {}", what, self.constraint, self.detail)
    }
}

// ============================================================================
// Check Executor
// ============================================================================

/// Evaluates a single check against a live store transaction
pub trait CheckExecutor: Send + Sync {
    fn evaluate(
        &self,
        txn: &mut dyn KvTransaction,
        check: &PendingCheck,
    ) -> StorageResult<Option<ConstraintViolation>>;
}

/// Evaluates checks with point and range reads on the check's keys
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreCheckExecutor;

impl CheckExecutor for StoreCheckExecutor {
    fn evaluate(
        &self,
        txn: &mut dyn KvTransaction,
        check: &PendingCheck,
    ) -> StorageResult<Option<ConstraintViolation>> {
        match check {
            PendingCheck::Uniqueness { index, prefix } => {
                let rows = txn.get_range(prefix, &strinc(prefix)?, 2)?;
                if rows.len() > 1 {
                    return Ok(Some(ConstraintViolation::new(
                        ViolationKind::DuplicateKey,
                        index.clone(),
                        format!("{} entries share one unique value", rows.len()),
                    )));
                }
            }
            PendingCheck::ReferencedRowExists { foreign_key, key } => {
                if txn.get(key)?.is_none() {
                    return Ok(Some(ConstraintViolation::new(
                        ViolationKind::MissingReferencedRow,
                        foreign_key.name.clone(),
                        "no matching row in the referenced table",
                    )));
                }
            }
            PendingCheck::NoReferencingRows {
                foreign_key,
                prefix,
            } => {
                if !txn.get_range(prefix, &strinc(prefix)?, 1)?.is_empty() {
                    return Ok(Some(ConstraintViolation::new(
                        ViolationKind::ReferencingRowsExist,
                        foreign_key.name.clone(),
                        "row is still referenced",
                    )));
                }
            }
        }
        Ok(None)
    }
}

// ============================================================================
// Pending Check Collector
// ============================================================================

#[derive(Debug, Clone)]
struct QueuedCheck {
    pass: CheckPass,
    check: PendingCheck,
}

impl QueuedCheck {
    fn runs_in(&self, pass: CheckPass) -> bool {
        match pass {
            CheckPass::Statement => self.pass == CheckPass::Statement,
            CheckPass::Transaction => true,
        }
    }
}

/// Checks queued by one transaction, tagged with the pass that must run them
#[derive(Debug)]
pub struct PendingChecks {
    check_time: CheckTime,
    queue: Vec<QueuedCheck>,
    /// Process-wide count of queued uniqueness checks
    pending_uniqueness: Arc<AtomicI64>,
}

impl PendingChecks {
    pub fn new(check_time: CheckTime, pending_uniqueness: Arc<AtomicI64>) -> Self {
        Self {
            check_time,
            queue: Vec::new(),
            pending_uniqueness,
        }
    }

    pub fn check_time(&self) -> CheckTime {
        self.check_time
    }

    pub fn add(&mut self, pass: CheckPass, check: PendingCheck) {
        if check.is_uniqueness() {
            self.pending_uniqueness.fetch_add(1, Ordering::Relaxed);
        }
        self.queue.push(QueuedCheck { pass, check });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued checks that `pass` would evaluate
    pub fn pending(&self, pass: CheckPass) -> usize {
        self.queue.iter().filter(|q| q.runs_in(pass)).count()
    }

    fn release(&self, entry: &QueuedCheck) {
        if entry.check.is_uniqueness() {
            self.pending_uniqueness.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn clear(&mut self) {
        for entry in &self.queue {
            self.release(entry);
        }
        self.queue.clear();
    }

    /// Evaluate the checks due at `pass`, in queue order
    ///
    /// Passing checks leave the queue. Evaluation stops at the first violation
    /// or store error; the failing check and everything not yet evaluated stay
    /// queued. Time spent on uniqueness checks is added to `uniqueness_time`.
    pub fn perform(
        &mut self,
        txn: &mut dyn KvTransaction,
        executor: &dyn CheckExecutor,
        pass: CheckPass,
        uniqueness_time: &mut Duration,
    ) -> StorageResult<Option<ConstraintViolation>> {
        let mut entries = std::mem::take(&mut self.queue).into_iter();
        let mut remaining = Vec::new();
        let mut outcome = Ok(None);

        for entry in entries.by_ref() {
            if !entry.runs_in(pass) {
                remaining.push(entry);
                continue;
            }
            let started = Instant::now();
            let result = executor.evaluate(txn, &entry.check);
            if entry.check.is_uniqueness() {
                *uniqueness_time += started.elapsed();
            }
            match result {
                Ok(None) => self.release(&entry),
                Ok(Some(violation)) => {
                    log::debug!("{:?} check pass found {}", pass, violation);
                    remaining.push(entry);
                    outcome = Ok(Some(violation));
                    break;
                }
                Err(e) => {
                    remaining.push(entry);
                    outcome = Err(e);
                    break;
                }
            }
        }

        remaining.extend(entries);
        self.queue = remaining;
        outcome
    }
}

impl Drop for PendingChecks {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvStore, MemoryStore};

    fn unique(prefix: &[u8]) -> PendingCheck {
        PendingCheck::Uniqueness {
            index: "users_email".to_string(),
            prefix: prefix.to_vec(),
        }
    }

    #[test]
    fn test_parse_check_time() {
        assert_eq!(CheckTime::parse("immediate").unwrap(), CheckTime::Immediate);
        assert_eq!(
            CheckTime::parse("DEFERRED").unwrap(),
            CheckTime::DeferredStatement
        );
        assert_eq!(
            CheckTime::parse("deferred_until_commit").unwrap(),
            CheckTime::DeferredTransaction
        );
        assert_eq!(
            CheckTime::parse("Delayed_Until_Commit").unwrap(),
            CheckTime::DeferredTransaction
        );
        assert!(matches!(
            CheckTime::parse("eventually"),
            Err(TxnError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_statement_pass_skips_transaction_checks() {
        let store = MemoryStore::new();
        let mut txn = store.create_transaction();
        txn.set(b"u/a/1", b"");
        txn.set(b"u/a/2", b"");

        let gauge = Arc::new(AtomicI64::new(0));
        let mut checks = PendingChecks::new(CheckTime::DeferredStatement, gauge.clone());
        checks.add(CheckPass::Transaction, unique(b"u/a/"));
        checks.add(CheckPass::Statement, unique(b"u/b/"));
        assert_eq!(gauge.load(Ordering::Relaxed), 2);
        assert_eq!(checks.pending(CheckPass::Statement), 1);

        let mut spent = Duration::ZERO;
        let outcome = checks
            .perform(txn.as_mut(), &StoreCheckExecutor, CheckPass::Statement, &mut spent)
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(checks.len(), 1);

        let violation = checks
            .perform(txn.as_mut(), &StoreCheckExecutor, CheckPass::Transaction, &mut spent)
            .unwrap()
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::DuplicateKey);
        assert_eq!(checks.len(), 1);

        drop(checks);
        assert_eq!(gauge.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_violation_keeps_unevaluated_checks() {
        let store = MemoryStore::new();
        let mut txn = store.create_transaction();
        let fk = ForeignKey::new("orders_customer");

        let mut checks = PendingChecks::new(CheckTime::Immediate, Arc::new(AtomicI64::new(0)));
        checks.add(
            CheckPass::Transaction,
            PendingCheck::ReferencedRowExists {
                foreign_key: fk.clone(),
                key: b"customer/9".to_vec(),
            },
        );
        checks.add(
            CheckPass::Transaction,
            PendingCheck::NoReferencingRows {
                foreign_key: fk,
                prefix: b"orders/9/".to_vec(),
            },
        );

        let mut spent = Duration::ZERO;
        let violation = checks
            .perform(txn.as_mut(), &StoreCheckExecutor, CheckPass::Transaction, &mut spent)
            .unwrap()
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::MissingReferencedRow);
        assert_eq!(checks.len(), 2);

        txn.set(b"customer/9", b"bob");
        let outcome = checks
            .perform(txn.as_mut(), &StoreCheckExecutor, CheckPass::Transaction, &mut spent)
            .unwrap();
        assert!(outcome.is_none());
        assert!(checks.is_empty());
    }

    #[test]
    fn test_foreign_key_builders() {
        let fk = ForeignKey::new("fk");
        assert!(!fk.deferrable);
        let fk = fk.initially_deferred();
        assert!(fk.deferrable && fk.initially_deferred);
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Commit-unknown-result reconciliation
//!
//! A commit can fail with an unknown result: the writes may or may not have
//! been applied. Work that must not be applied twice marks itself with
//! [`TransactionService::mark_for_check`], which writes a per-session counter
//! inside the same store transaction. After an ambiguous failure, a later
//! transaction reads the counter back with
//! [`TransactionService::check_succeeded`] to learn whether the commit landed.
//!
//! Keys live under the configured check prefix as the packed tuple
//! `(timestamp_ms, salt)`; values are the packed tuple `(counter)`. Entries are
//! only ever written here; [`TransactionService::clear_old_transaction_checks`]
//! sweeps them by timestamp.

use super::manager::TransactionService;
use super::state::TransactionState;
use crate::error::{TxnError, TxnResult};
use crate::session::Session;
use crate::storage::tuple::{join, pack_ints, unpack_ints};

/// Session-lifetime identity of the check keyspace entry, plus its counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionCheckCounter {
    timestamp: i64,
    unique: i32,
    counter: i64,
}

impl TransactionCheckCounter {
    /// Fresh identity at the current wall-clock millisecond with a random salt
    pub fn generate() -> Self {
        Self::with_identity(chrono::Utc::now().timestamp_millis(), fastrand::i32(..))
    }

    pub fn with_identity(timestamp: i64, unique: i32) -> Self {
        Self {
            timestamp,
            unique,
            counter: 0,
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn unique(&self) -> i32 {
        self.unique
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    pub fn key(&self, prefix: &[u8]) -> Vec<u8> {
        join(prefix, &pack_ints(&[self.timestamp, self.unique as i64]))
    }

    fn increment(&mut self) -> i64 {
        self.counter += 1;
        self.counter
    }
}

/// Exclusive end key for sweeping entries created before `before_timestamp`
pub fn sweep_end_key(prefix: &[u8], before_timestamp: i64) -> Vec<u8> {
    join(prefix, &pack_ints(&[before_timestamp]))
}

impl TransactionService {
    /// Persist the next check counter for this session in its open transaction
    ///
    /// The first call for a session picks an identity not yet present in the
    /// check keyspace. Returns the counter value the caller must remember.
    pub fn mark_for_check(&self, session: &mut Session) -> TxnResult<i64> {
        let prefix = self.config().check_prefix_bytes().to_vec();
        let attempts = self.config().check_token_probe_attempts;
        let existing = session.check_counter();

        let state = self.transaction(session)?;
        let mut counter = match existing {
            Some(counter) => counter,
            None => self.allocate_check_token(
                state,
                &prefix,
                attempts,
                TransactionCheckCounter::generate,
            )?,
        };
        let value = counter.increment();
        state.set_bytes(&counter.key(&prefix), &pack_ints(&[value]));
        session.set_check_counter(Some(counter));

        log::trace!(
            "Marked transaction check ({}, {}) = {}",
            counter.timestamp(),
            counter.unique(),
            value
        );
        Ok(value)
    }

    /// Whether the ambiguous commit that last marked `expected` actually committed
    ///
    /// Must be called in a transaction begun after the failure. Returns false
    /// for a negative `expected`, for any error other than an unknown commit
    /// result, and when the session never marked or nothing was persisted.
    pub fn check_succeeded(
        &self,
        session: &mut Session,
        error: &TxnError,
        expected: i64,
    ) -> TxnResult<bool> {
        if expected < 0 || !error.is_ambiguous() {
            return Ok(false);
        }
        let Some(counter) = session.check_counter() else {
            return Ok(false);
        };
        let key = counter.key(self.config().check_prefix_bytes());

        let state = self.transaction(session)?;
        let stored = state.get(&key).map_err(|e| self.wrap(e))?;
        let Some(stored) = stored else {
            log::debug!("No transaction check entry; commit did not apply");
            return Ok(false);
        };
        let values = unpack_ints(&stored).map_err(|e| self.wrap(e))?;
        Ok(values.first() == Some(&expected))
    }

    /// Delete check entries whose identity timestamp precedes `before_timestamp`
    ///
    /// Runs in its own store transaction, retried through the store's backoff.
    pub fn clear_old_transaction_checks(&self, before_timestamp: i64) -> TxnResult<()> {
        let prefix = self.config().check_prefix_bytes();
        let end = sweep_end_key(prefix, before_timestamp);
        let mut txn = self.store().create_transaction();
        loop {
            txn.clear_range(prefix, &end);
            match txn.commit() {
                Ok(version) => {
                    log::info!(
                        "Cleared transaction checks before {} at version {}",
                        before_timestamp,
                        version
                    );
                    return Ok(());
                }
                Err(e) => txn.on_error(&e).map_err(|e| self.wrap(e))?,
            }
        }
    }

    /// Probe for an identity whose key is unused, up to `attempts` candidates
    pub(crate) fn allocate_check_token<F>(
        &self,
        state: &mut TransactionState,
        prefix: &[u8],
        attempts: u32,
        mut candidate: F,
    ) -> TxnResult<TransactionCheckCounter>
    where
        F: FnMut() -> TransactionCheckCounter,
    {
        for attempt in 1..=attempts {
            let counter = candidate();
            let existing = state.get(&counter.key(prefix)).map_err(|e| self.wrap(e))?;
            if existing.is_none() {
                log::debug!(
                    "Allocated transaction check token ({}, {}) after {} probe(s)",
                    counter.timestamp(),
                    counter.unique(),
                    attempt
                );
                return Ok(counter);
            }
            log::warn!(
                "Transaction check token ({}, {}) already in use",
                counter.timestamp(),
                counter.unique()
            );
        }
        Err(TxnError::CheckTokenExhausted(attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactionConfig;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn service() -> TransactionService {
        TransactionService::new(Arc::new(MemoryStore::new()), TransactionConfig::default())
            .unwrap()
    }

    #[test]
    fn test_key_layout() {
        let counter = TransactionCheckCounter::with_identity(1_000, -7);
        let key = counter.key(b"pfx");
        assert!(key.starts_with(b"pfx"));
        assert_eq!(unpack_ints(&key[3..]).unwrap(), vec![1_000, -7]);

        // Everything created at 1_000 sorts below a 1_001 cutoff and above a 1_000 one
        assert!(key < sweep_end_key(b"pfx", 1_001));
        assert!(key >= sweep_end_key(b"pfx", 1_000));
    }

    #[test]
    fn test_probe_is_bounded() {
        let service = service();
        let mut session = Session::new();
        let taken = TransactionCheckCounter::with_identity(5, 5);
        let prefix = service.config().check_prefix_bytes().to_vec();

        service.begin(&mut session).unwrap();
        let state = service.transaction(&mut session).unwrap();
        state.set_bytes(&taken.key(&prefix), &pack_ints(&[1]));

        let err = service
            .allocate_check_token(state, &prefix, 3, || taken)
            .unwrap_err();
        assert_eq!(err, TxnError::CheckTokenExhausted(3));

        let mut candidates = vec![TransactionCheckCounter::with_identity(5, 6), taken];
        let found = service
            .allocate_check_token(state, &prefix, 3, || candidates.pop().unwrap())
            .unwrap();
        assert_eq!(found.unique(), 6);
    }

    #[test]
    fn test_counter_increments_within_transaction() {
        let service = service();
        let mut session = Session::new();
        service.begin(&mut session).unwrap();
        assert_eq!(service.mark_for_check(&mut session).unwrap(), 1);
        assert_eq!(service.mark_for_check(&mut session).unwrap(), 2);
        assert!(service.transaction(&mut session).unwrap().bytes_set() > 0);
    }

    #[test]
    fn test_check_succeeded_ignores_other_errors() {
        let service = service();
        let mut session = Session::new();
        service.begin(&mut session).unwrap();
        service.mark_for_check(&mut session).unwrap();

        let conflict = TxnError::Conflict(crate::storage::StoreError::not_committed());
        assert!(!service.check_succeeded(&mut session, &conflict, 1).unwrap());

        let ambiguous = TxnError::AmbiguousResult(crate::storage::StoreError::unknown_result());
        assert!(!service.check_succeeded(&mut session, &ambiguous, -1).unwrap());
    }
}

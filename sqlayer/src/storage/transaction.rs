// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Optimistic transactional store over a raw [`KvBackend`]
//!
//! Transactions buffer their writes and remember the key ranges they read.
//! Commits are serialized under one lock: read ranges are validated against
//! the recent commit log, the batch is applied to the backend, and a new
//! strictly increasing version is assigned.
//!
//! Reads go to the backend's latest state overlaid with the transaction's own
//! writes, and are validated against the commit log right after the backend
//! read. A read overlapping a commit newer than the read version fails with a
//! conflict-class error, so every value a transaction observes belongs to its
//! read version.

use super::conflict::{ConflictTracker, KeyRange};
use super::traits::{key_after, ErrorClassifier, KvBackend, KvStore, KvTransaction, Mutation};
use super::types::{
    ErrorClass, StorageResult, StorageType, StoreError, StoreErrorKind, Version,
};
use crate::config::RetryPolicy;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Store-level options
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Backoff applied by `on_error`
    pub retry: RetryPolicy,
    /// Number of recent commits kept for conflict validation
    pub conflict_window: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            conflict_window: 10_000,
        }
    }
}

/// Failure injected into the next commit of any transaction of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// Fail as if a concurrent commit overlapped the read set
    Conflict,
    /// Apply the commit, then report an unknown result
    UnknownResultApplied,
    /// Drop the commit and report an unknown result
    UnknownResultDropped,
    /// Fail with an arbitrary error kind without applying
    Error(StoreErrorKind),
}

struct CommitState {
    version: Version,
    tracker: ConflictTracker,
}

struct Shared<B> {
    backend: B,
    commit: Mutex<CommitState>,
    faults: Mutex<VecDeque<InjectedFault>>,
    options: StoreOptions,
}

/// Optimistic-concurrency store
pub struct OccStore<B: KvBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: KvBackend + 'static> OccStore<B> {
    /// Wrap a backend, resuming from its last recorded version
    pub fn with_options(backend: B, options: StoreOptions) -> StorageResult<Self> {
        let version = backend.last_version()?;
        log::debug!(
            "Opening {} store at version {}",
            backend.storage_type(),
            version
        );
        Ok(Self::with_version(backend, version, options))
    }

    pub(crate) fn with_version(backend: B, version: Version, options: StoreOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                commit: Mutex::new(CommitState {
                    version,
                    tracker: ConflictTracker::new(options.conflict_window),
                }),
                faults: Mutex::new(VecDeque::new()),
                options,
            }),
        }
    }

    /// Queue a failure for the next commit issued against this store
    pub fn inject_fault(&self, fault: InjectedFault) {
        self.shared.faults.lock().push_back(fault);
    }

    /// Latest committed version
    pub fn current_version(&self) -> Version {
        self.shared.commit.lock().version
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.shared.backend.flush()
    }
}

impl<B: KvBackend + 'static> ErrorClassifier for OccStore<B> {
    fn classify(&self, error: &StoreError) -> ErrorClass {
        match error.kind {
            StoreErrorKind::NotCommitted | StoreErrorKind::TransactionTooOld => {
                ErrorClass::Conflict
            }
            StoreErrorKind::CommitUnknownResult => ErrorClass::Ambiguous,
            _ => ErrorClass::Other,
        }
    }
}

impl<B: KvBackend + 'static> KvStore for OccStore<B> {
    fn create_transaction(&self) -> Box<dyn KvTransaction> {
        Box::new(OccTransaction::new(self.shared.clone()))
    }

    fn storage_type(&self) -> StorageType {
        self.shared.backend.storage_type()
    }
}

/// Transaction handed out by [`OccStore`]
pub struct OccTransaction<B: KvBackend> {
    shared: Arc<Shared<B>>,
    read_version: Option<Version>,
    writes: Vec<Mutation>,
    read_ranges: Vec<KeyRange>,
    committed_version: Option<Version>,
    /// Consecutive `on_error` retries since the last explicit reset
    attempts: u32,
    cancelled: bool,
}

impl<B: KvBackend> OccTransaction<B> {
    fn new(shared: Arc<Shared<B>>) -> Self {
        Self {
            shared,
            read_version: None,
            writes: Vec::new(),
            read_ranges: Vec::new(),
            committed_version: None,
            attempts: 0,
            cancelled: false,
        }
    }

    fn ensure_usable(&self) -> StorageResult<()> {
        if self.cancelled {
            return Err(StoreError::cancelled());
        }
        Ok(())
    }

    fn clear_buffers(&mut self) {
        self.read_version = None;
        self.writes.clear();
        self.read_ranges.clear();
    }

    /// Value of `key` as seen through this transaction's own writes, if they decide it
    fn local_value(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        for mutation in self.writes.iter().rev() {
            match mutation {
                Mutation::Set { key: k, value } if k.as_slice() == key => {
                    return Some(Some(value.clone()))
                }
                Mutation::Clear { key: k } if k.as_slice() == key => return Some(None),
                Mutation::ClearRange { begin, end }
                    if begin.as_slice() <= key && key < end.as_slice() =>
                {
                    return Some(None)
                }
                _ => {}
            }
        }
        None
    }

    /// Reject a backend read that overlaps a commit newer than `read_version`
    fn track_read(&mut self, read_version: Version, range: KeyRange) -> StorageResult<()> {
        let state = self.shared.commit.lock();
        if let Err(e) = state.tracker.validate(read_version, std::slice::from_ref(&range)) {
            log::debug!(
                "Read at version {} is stale (latest {}): {}",
                read_version,
                state.version,
                e
            );
            return Err(e);
        }
        drop(state);
        self.read_ranges.push(range);
        Ok(())
    }

    fn take_fault(&self) -> Option<InjectedFault> {
        self.shared.faults.lock().pop_front()
    }
}

impl<B: KvBackend + 'static> KvTransaction for OccTransaction<B> {
    fn read_version(&mut self) -> StorageResult<Version> {
        self.ensure_usable()?;
        if let Some(version) = self.read_version {
            return Ok(version);
        }
        let version = self.shared.commit.lock().version;
        self.read_version = Some(version);
        Ok(version)
    }

    fn get(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let read_version = self.read_version()?;
        if let Some(local) = self.local_value(key) {
            return Ok(local);
        }
        let value = self.shared.backend.get(key)?;
        self.track_read(read_version, KeyRange::new(key.to_vec(), key_after(key)))?;
        Ok(value)
    }

    fn get_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_version = self.read_version()?;
        if begin >= end {
            return Ok(Vec::new());
        }

        let rows = self.shared.backend.range(begin, end, 0)?;
        self.track_read(read_version, KeyRange::new(begin.to_vec(), end.to_vec()))?;
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> =
            rows.into_iter().map(|(k, v)| (k, Some(v))).collect();
        for mutation in &self.writes {
            match mutation {
                Mutation::Set { key, value } => {
                    if begin <= key.as_slice() && key.as_slice() < end {
                        merged.insert(key.clone(), Some(value.clone()));
                    }
                }
                Mutation::Clear { key } => {
                    if let Some(slot) = merged.get_mut(key) {
                        *slot = None;
                    }
                }
                Mutation::ClearRange { begin: b, end: e } => {
                    for (_, slot) in merged.range_mut(b.clone()..e.clone()) {
                        *slot = None;
                    }
                }
            }
        }

        let live = merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)));
        Ok(if limit == 0 {
            live.collect()
        } else {
            live.take(limit).collect()
        })
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.writes.push(Mutation::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    fn clear(&mut self, key: &[u8]) {
        self.writes.push(Mutation::Clear { key: key.to_vec() });
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) {
        if begin < end {
            self.writes.push(Mutation::ClearRange {
                begin: begin.to_vec(),
                end: end.to_vec(),
            });
        }
    }

    fn commit(&mut self) -> StorageResult<Version> {
        self.ensure_usable()?;
        let mut state = self.shared.commit.lock();
        let read_version = *self.read_version.get_or_insert(state.version);

        let mut report_unknown = false;
        match self.take_fault() {
            None => {}
            Some(InjectedFault::Conflict) => return Err(StoreError::not_committed()),
            Some(InjectedFault::UnknownResultDropped) => return Err(StoreError::unknown_result()),
            Some(InjectedFault::UnknownResultApplied) => report_unknown = true,
            Some(InjectedFault::Error(kind)) => {
                return Err(StoreError::new(kind, "Injected commit failure"))
            }
        }

        state.tracker.validate(read_version, &self.read_ranges)?;

        let version = state.version + 1;
        self.shared.backend.apply(&self.writes, version)?;
        let written = self
            .writes
            .iter()
            .map(|m| {
                let (begin, end) = m.range();
                KeyRange::new(begin, end)
            })
            .collect();
        state.tracker.record(version, written);
        state.version = version;
        drop(state);

        log::trace!(
            "Committed {} mutations at version {} (read version {})",
            self.writes.len(),
            version,
            read_version
        );
        self.writes.clear();
        self.read_ranges.clear();
        self.committed_version = Some(version);

        if report_unknown {
            return Err(StoreError::unknown_result());
        }
        Ok(version)
    }

    fn committed_version(&self) -> Option<Version> {
        self.committed_version
    }

    fn on_error(&mut self, error: &StoreError) -> StorageResult<()> {
        if self.cancelled || !error.kind.is_retryable() {
            return Err(error.clone());
        }
        self.attempts += 1;
        let policy = self.shared.options.retry;
        if !policy.allows_retry(self.attempts) {
            log::warn!(
                "Giving up after {} attempts: {}",
                self.attempts,
                error
            );
            return Err(error.clone());
        }

        let delay = policy.backoff(self.attempts);
        log::debug!(
            "Backing off {:?} before retry {} after {}",
            delay,
            self.attempts,
            error
        );
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.clear_buffers();
        self.committed_version = None;
        Ok(())
    }

    fn reset(&mut self) {
        self.clear_buffers();
        self.committed_version = None;
        self.attempts = 0;
    }

    fn cancel(&mut self) {
        self.clear_buffers();
        self.cancelled = true;
    }
}

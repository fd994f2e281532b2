// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Store traits
//!
//! This module defines the contract between the transaction layer and the
//! backing store:
//!
//! - [`KvBackend`]: raw ordered key-value storage used underneath the optimistic store
//! - [`KvTransaction`]: one live store transaction (read version, buffered writes, commit)
//! - [`KvStore`]: a transactional store that hands out transactions
//! - [`ErrorClassifier`]: maps a binding's errors onto conflict / ambiguous / other

use super::types::{ErrorClass, StorageResult, StorageType, StoreError, Version};

/// A single buffered write, applied atomically at commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set { key: Vec<u8>, value: Vec<u8> },
    Clear { key: Vec<u8> },
    /// Clears `[begin, end)`
    ClearRange { begin: Vec<u8>, end: Vec<u8> },
}

impl Mutation {
    /// Key range `[begin, end)` touched by this mutation
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        match self {
            Mutation::Set { key, .. } | Mutation::Clear { key } => {
                (key.clone(), key_after(key))
            }
            Mutation::ClearRange { begin, end } => (begin.clone(), end.clone()),
        }
    }
}

/// Smallest key strictly greater than `key`
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

/// Raw ordered key-value storage
///
/// Similar to a tree / column family in an embedded database. Has no notion of
/// transactions; the optimistic store serializes commits on top of it.
pub trait KvBackend: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Ordered scan of `[begin, end)`; `limit == 0` means unlimited
    fn range(&self, begin: &[u8], end: &[u8], limit: usize)
        -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply a committed batch atomically and record `version` as the latest commit
    fn apply(&self, mutations: &[Mutation], version: Version) -> StorageResult<()>;

    /// Latest version recorded by `apply`, or 0 for a fresh backend
    fn last_version(&self) -> StorageResult<Version>;

    /// Flush any pending writes to disk
    fn flush(&self) -> StorageResult<()>;

    /// Get storage type
    fn storage_type(&self) -> StorageType;
}

/// One live transaction against the backing store
///
/// Reads observe a consistent snapshot at the read version plus the
/// transaction's own buffered writes. Writes are invisible to others until
/// `commit` succeeds.
pub trait KvTransaction: Send {
    /// Read version of this transaction, acquired on first use
    fn read_version(&mut self) -> StorageResult<Version>;

    /// Get a value by key
    fn get(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Ordered scan of `[begin, end)`; `limit == 0` means unlimited
    fn get_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Buffer a write
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Buffer a single-key clear
    fn clear(&mut self, key: &[u8]);

    /// Buffer a clear of `[begin, end)`
    fn clear_range(&mut self, begin: &[u8], end: &[u8]);

    /// Commit buffered writes, returning the commit version
    fn commit(&mut self) -> StorageResult<Version>;

    /// Version assigned by the last successful commit
    fn committed_version(&self) -> Option<Version>;

    /// Error-to-backoff resolution step
    ///
    /// Blocks until it is safe to retry and resets the transaction to a fresh
    /// read version, returning `Ok(())`. Returns the error when it is not
    /// retryable or the retry budget is exhausted.
    fn on_error(&mut self, error: &StoreError) -> StorageResult<()>;

    /// Discard buffered state and acquire a new read version on next use
    fn reset(&mut self);

    /// Dispose the transaction; later operations fail with `TransactionCancelled`
    fn cancel(&mut self);
}

/// Maps a store binding's errors onto the classes the transaction layer acts on
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &StoreError) -> ErrorClass;
}

/// A transactional store
pub trait KvStore: ErrorClassifier {
    /// Start a new transaction
    fn create_transaction(&self) -> Box<dyn KvTransaction>;

    /// Get storage type
    fn storage_type(&self) -> StorageType;
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Conflict tracking for optimistic commits
//!
//! On every backend read and again at commit time, validates that no key range
//! a transaction read has been written by another transaction that committed
//! after its read version.
//! Blind writes never conflict, so the resulting history is serializable in
//! commit-version order.

use super::types::{StorageResult, StoreError, Version};

// ============================================================================
// Key Range
// ============================================================================

/// Half-open key range `[begin, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(begin: Vec<u8>, end: Vec<u8>) -> Self {
        Self { begin, end }
    }

    pub fn intersects(&self, other: &KeyRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

// ============================================================================
// Committed Write Record
// ============================================================================

/// Write ranges of one committed transaction (kept until pruned)
#[derive(Debug, Clone)]
struct CommittedWrites {
    version: Version,
    ranges: Vec<KeyRange>,
}

// ============================================================================
// Conflict Tracker
// ============================================================================

/// Bounded log of recently committed write ranges
///
/// Strategy: **First-Committer-Wins**. Once an entry is pruned, transactions
/// whose read version precedes it can no longer be validated and fail with
/// `TransactionTooOld`.
#[derive(Debug)]
pub struct ConflictTracker {
    committed: Vec<CommittedWrites>,
    /// Newest version whose write ranges have been pruned
    pruned_through: Version,
    max_entries: usize,
}

impl ConflictTracker {
    pub fn new(max_entries: usize) -> Self {
        Self {
            committed: Vec::new(),
            pruned_through: 0,
            max_entries: max_entries.max(1),
        }
    }

    /// Validate a transaction's read ranges against commits newer than `read_version`
    pub fn validate(&self, read_version: Version, reads: &[KeyRange]) -> StorageResult<()> {
        if read_version < self.pruned_through {
            return Err(StoreError::too_old(read_version));
        }

        let newer = self
            .committed
            .iter()
            .rev()
            .take_while(|entry| entry.version > read_version);
        for entry in newer {
            for written in &entry.ranges {
                if reads.iter().any(|read| read.intersects(written)) {
                    log::debug!(
                        "Read range conflicts with commit at version {} (read version {})",
                        entry.version,
                        read_version
                    );
                    return Err(StoreError::not_committed());
                }
            }
        }
        Ok(())
    }

    /// Record the write ranges of a transaction that committed at `version`
    pub fn record(&mut self, version: Version, ranges: Vec<KeyRange>) {
        self.committed.push(CommittedWrites { version, ranges });
        if self.committed.len() > self.max_entries {
            let excess = self.committed.len() - self.max_entries;
            if let Some(last_pruned) = self.committed.drain(..excess).last() {
                self.pruned_through = last_pruned.version;
            }
        }
    }

    /// Number of tracked commits (for monitoring)
    pub fn tracked_commits(&self) -> usize {
        self.committed.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

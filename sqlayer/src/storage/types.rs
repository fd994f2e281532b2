// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Store types and error handling
//!
//! This module defines the types, enums, and error handling shared by every
//! backing-store binding.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Commit / read version of the backing store.
///
/// Versions are totally ordered and strictly increase with every commit.
/// `NO_VERSION` (-1) marks "no timestamp" for rollback and end callbacks.
pub type Version = i64;

/// Sentinel passed to callbacks that have no meaningful timestamp
pub const NO_VERSION: Version = -1;

/// Store binding configuration
///
/// Specifies which underlying key-value technology backs the optimistic store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StorageType {
    /// Sled - Pure Rust embedded database
    /// Best for: Development, single-node deployments
    Sled,

    /// Memory - In-memory storage for testing
    /// Best for: Unit testing, development
    #[default]
    Memory,
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sled" => Ok(StorageType::Sled),
            "memory" => Ok(StorageType::Memory),
            _ => Err(format!(
                "Unknown storage type: {}. Valid options: sled, memory",
                s
            )),
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageType::Sled => "sled",
            StorageType::Memory => "memory",
        };
        write!(f, "{}", name)
    }
}

/// Low-level failure codes reported by a store binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreErrorKind {
    /// Commit rejected because a concurrent commit overlapped this transaction's reads
    NotCommitted,

    /// Read version fell outside the store's conflict-tracking window
    TransactionTooOld,

    /// Commit outcome cannot be determined from the response
    CommitUnknownResult,

    /// Operation issued against a cancelled / disposed transaction
    TransactionCancelled,

    /// I/O related errors (file system, etc.)
    Io,

    /// Binding-specific error (sled, encoding, etc.)
    Backend,
}

impl StoreErrorKind {
    /// Kinds the store's own `on_error` step is willing to back off and retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreErrorKind::NotCommitted
                | StoreErrorKind::TransactionTooOld
                | StoreErrorKind::CommitUnknownResult
        )
    }
}

/// Error type for store operations
///
/// Bindings convert their engine-specific failures into this shape; the
/// transaction layer classifies it through [`super::traits::ErrorClassifier`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_committed() -> Self {
        Self::new(
            StoreErrorKind::NotCommitted,
            "Transaction not committed due to conflict with another transaction",
        )
    }

    pub fn too_old(read_version: Version) -> Self {
        Self::new(
            StoreErrorKind::TransactionTooOld,
            format!("Read version {} is too old", read_version),
        )
    }

    pub fn unknown_result() -> Self {
        Self::new(
            StoreErrorKind::CommitUnknownResult,
            "Transaction may or may not have committed",
        )
    }

    pub fn cancelled() -> Self {
        Self::new(
            StoreErrorKind::TransactionCancelled,
            "Operation issued while a commit was outstanding or after cancel",
        )
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Backend, message)
    }
}

// Automatic conversions from common error types
impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::new(StoreErrorKind::Io, e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::backend(format!("Serialization error: {}", e))
    }
}

/// Result type for store operations
pub type StorageResult<T> = Result<T, StoreError>;

/// Classification of a store error, as seen by the transaction layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Serialization conflict; safe to back off and retry the unit of work
    Conflict,
    /// Commit outcome unknown; must be reconciled before resubmitting
    Ambiguous,
    /// Anything else; surfaced as-is
    Other,
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction layer error types

use crate::storage::{ErrorClass, ErrorClassifier, StoreError};
use crate::txn::checks::ConstraintViolation;
use thiserror::Error;

/// Transaction layer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxnError {
    /// Programmer error: lifecycle operation issued in the wrong state. Never retried.
    #[error("Usage error: {0}")]
    Usage(String),

    /// Serialization conflict reported by the store
    #[error("Transaction conflict: {0}")]
    Conflict(StoreError),

    /// Commit outcome unknown; resolve through the check-counter protocol
    #[error("Commit result unknown: {0}")]
    AmbiguousResult(StoreError),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(ConstraintViolation),

    /// Several failures collected from one callback drain or end sequence
    #[error("{} errors: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<TxnError>),

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Invalid parameter value: {0}")]
    InvalidParameter(String),

    #[error("No unused transaction check token found after {0} attempts")]
    CheckTokenExhausted(u32),

    /// Failure raised by a registered callback
    #[error("Callback failed: {0}")]
    Callback(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for transaction operations
pub type TxnResult<T> = Result<T, TxnError>;

fn join_messages(errors: &[TxnError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl TxnError {
    pub fn usage(message: impl Into<String>) -> Self {
        TxnError::Usage(message.into())
    }

    pub fn callback(message: impl Into<String>) -> Self {
        TxnError::Callback(message.into())
    }

    /// Wrap a store error according to the binding's classification
    pub fn from_store<C>(classifier: &C, error: StoreError) -> Self
    where
        C: ErrorClassifier + ?Sized,
    {
        match classifier.classify(&error) {
            ErrorClass::Conflict => TxnError::Conflict(error),
            ErrorClass::Ambiguous => TxnError::AmbiguousResult(error),
            ErrorClass::Other => TxnError::Storage(error),
        }
    }

    /// Conflict-class failure; the unit of work may be re-executed
    pub fn is_conflict(&self) -> bool {
        matches!(self, TxnError::Conflict(_))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, TxnError::AmbiguousResult(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, TxnError::Usage(_))
    }

    /// Underlying store error, if this error came from the store
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            TxnError::Conflict(e) | TxnError::AmbiguousResult(e) | TxnError::Storage(e) => {
                Some(e)
            }
            _ => None,
        }
    }

    /// Leaf errors, with aggregates flattened
    pub fn causes(&self) -> Vec<&TxnError> {
        match self {
            TxnError::Aggregate(errors) => errors.iter().flat_map(|e| e.causes()).collect(),
            other => vec![other],
        }
    }
}

/// Fold `next` into an optional accumulated error
pub fn combine(first: Option<TxnError>, next: TxnError) -> TxnError {
    match first {
        None => next,
        Some(TxnError::Aggregate(mut errors)) => {
            errors.push(next);
            TxnError::Aggregate(errors)
        }
        Some(first) => TxnError::Aggregate(vec![first, next]),
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! sqlayer - transactional core of a SQL layer over an optimistic key-value store
//!
//! Every SQL statement runs inside a transaction bound to a caller session.
//! This crate manages that transaction's lifecycle on a strictly serializable
//! store with optimistic concurrency control.
//!
//! # Features
//!
//! - **Session lifecycle**: begin / commit / rollback with no nesting
//! - **Conflict retry**: `commit_or_retry` and the `run` retry wrapper
//! - **Periodic commits**: chunk bulk work by elapsed time and bytes written
//! - **Unknown-result reconciliation**: persisted per-session check counters
//! - **Deferred checks**: statement- and commit-time constraint passes
//! - **Callbacks**: pre-commit, after-commit, after-rollback and after-end hooks
//! - **Stores**: in-memory and Sled backends behind one transactional contract
//!
//! # Usage
//!
//! ```ignore
//! use sqlayer::{MemoryStore, Session, TransactionConfig, TransactionService};
//! use std::sync::Arc;
//!
//! let service =
//!     TransactionService::new(Arc::new(MemoryStore::new()), TransactionConfig::default())?;
//! let mut session = Session::new();
//! service.run(&mut session, |session| {
//!     service.transaction(session)?.set_bytes(b"key", b"value");
//!     Ok(())
//! })?;
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod txn;

pub use config::{RetryPolicy, TransactionConfig};
pub use error::{TxnError, TxnResult};
pub use session::{Session, SessionOption};
pub use storage::{create_store, KvStore, MemoryStore, StorageType, Version, NO_VERSION};
pub use txn::{
    CallbackType, CheckDisposition, CheckPass, CheckTime, CommitOutcome, ForeignKey,
    PendingCheck, TransactionGuard, TransactionService, TransactionState, TransactionStatistics,
};

/// sqlayer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// sqlayer crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

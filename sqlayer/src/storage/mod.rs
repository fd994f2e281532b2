// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Backing store bindings
//!
//! The transaction layer talks to an ordered, transactional key-value store
//! with optimistic strictly-serializable commits.
//!
//! # Architecture
//!
//! ```text
//! TransactionService (session state machine, retries, callbacks)
//!     ↓
//! KvStore / KvTransaction (read version, buffered writes, commit, on_error)
//!     ↓
//! OccStore (conflict validation, version assignment)
//!     ↓
//! KvBackend (Sled, Memory)
//! ```

// Core modules
pub mod conflict;
pub mod factory;
pub mod traits;
pub mod transaction;
pub mod tuple;
pub mod types;

// Backend implementations
pub mod memory;
#[cfg(feature = "sled-backend")]
pub mod sled;

// Public API re-exports
pub use factory::create_store;
pub use memory::{MemoryBackend, MemoryStore};
#[cfg(feature = "sled-backend")]
pub use self::sled::{SledBackend, SledStore};
pub use traits::{ErrorClassifier, KvBackend, KvStore, KvTransaction, Mutation};
pub use transaction::{InjectedFault, OccStore, OccTransaction, StoreOptions};
pub use types::{
    ErrorClass, StorageResult, StorageType, StoreError, StoreErrorKind, Version, NO_VERSION,
};

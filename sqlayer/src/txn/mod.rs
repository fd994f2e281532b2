// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction management
//!
//! This module provides the session-scoped transaction lifecycle:
//! - `manager`: begin / commit / rollback, conflict retry and periodic commits
//! - `state`: the per-session transaction record and its commit budget
//! - `callbacks`: pre-commit / after-commit / after-rollback / after-end hooks
//! - `checks`: deferred uniqueness and foreign-key checks
//! - `check_counter`: reconciliation of commits with an unknown result
//! - `guard`: transaction rolled back on drop

pub mod callbacks;
pub mod check_counter;
pub mod checks;
pub mod guard;
pub mod manager;
pub mod state;

pub use callbacks::{Callback, CallbackRegistry, CallbackType};
pub use check_counter::TransactionCheckCounter;
pub use checks::{
    CheckExecutor, CheckPass, CheckTime, ConstraintViolation, ForeignKey, PendingCheck,
    PendingChecks, StoreCheckExecutor, ViolationKind,
};
pub use guard::TransactionGuard;
pub use manager::{CheckDisposition, CommitOutcome, TransactionService, TransactionStatistics};
pub use state::{CommitBudget, TransactionState};

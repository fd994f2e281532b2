// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Session model

use crate::txn::callbacks::CallbackRegistry;
use crate::txn::check_counter::TransactionCheckCounter;
use crate::txn::checks::CheckTime;
use crate::txn::state::TransactionState;
use std::fmt;

/// Per-connection state owned by the embedding server
///
/// Not shared between threads: one logical thread of control drives a
/// session at a time.
pub struct Session {
    // === Identity ===
    /// Unique session identifier
    session_id: String,
    /// When the session was created
    created_at: chrono::DateTime<chrono::Utc>,

    // === Transaction ===
    pub(crate) txn: Option<TransactionState>,
    pub(crate) rollback_pending: bool,
    callbacks: CallbackRegistry,

    // === Options ===
    constraint_check_time: Option<CheckTime>,

    /// Check-keyspace identity, chosen on the first `mark_for_check`
    check_counter: Option<TransactionCheckCounter>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            txn: None,
            rollback_pending: false,
            callbacks: CallbackRegistry::new(),
            constraint_check_time: None,
            check_counter: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    /// Whether a transaction is open on this session
    pub fn has_transaction(&self) -> bool {
        self.txn.is_some()
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    /// Constraint check timing applied to the next `begin`
    pub fn constraint_check_time(&self) -> Option<CheckTime> {
        self.constraint_check_time
    }

    pub(crate) fn set_constraint_check_time(&mut self, check_time: Option<CheckTime>) {
        self.constraint_check_time = check_time;
    }

    pub fn check_counter(&self) -> Option<TransactionCheckCounter> {
        self.check_counter
    }

    pub(crate) fn set_check_counter(&mut self, counter: Option<TransactionCheckCounter>) {
        self.check_counter = counter;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("created_at", &self.created_at)
            .field("txn", &self.txn)
            .field("rollback_pending", &self.rollback_pending)
            .field("callbacks", &self.callbacks)
            .field("constraint_check_time", &self.constraint_check_time)
            .finish()
    }
}

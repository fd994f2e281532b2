// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Closeable transaction
//!
//! Returned by [`TransactionService::begin_closeable`]. Dropping the guard
//! rolls the transaction back if it is still open.

use super::manager::{CommitOutcome, TransactionService};
use super::state::TransactionState;
use crate::error::TxnResult;
use crate::session::Session;
use crate::storage::Version;

/// Transaction guard that rolls back on drop unless the transaction has ended
pub struct TransactionGuard<'a> {
    service: &'a TransactionService,
    session: &'a mut Session,
}

impl<'a> TransactionGuard<'a> {
    pub(crate) fn new(service: &'a TransactionService, session: &'a mut Session) -> Self {
        Self { service, session }
    }

    pub fn session(&mut self) -> &mut Session {
        self.session
    }

    /// The guarded transaction, while it is open
    pub fn state(&mut self) -> TxnResult<&mut TransactionState> {
        self.service.transaction(self.session)
    }

    pub fn is_open(&self) -> bool {
        self.service.is_transaction_active(&*self.session)
    }

    pub fn commit(&mut self) -> TxnResult<Version> {
        self.service.commit(self.session)
    }

    pub fn commit_or_retry(&mut self) -> TxnResult<CommitOutcome> {
        self.service.commit_or_retry(self.session)
    }

    pub fn rollback(&mut self) -> TxnResult<()> {
        self.service.rollback(self.session)
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.service.is_transaction_active(&*self.session) {
            log::warn!(
                "Transaction guard for session {} dropped while open - rolling back",
                self.session.id()
            );
            if let Err(e) = self.service.rollback_if_open(self.session) {
                log::warn!("Rollback on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactionConfig;
    use crate::storage::MemoryStore;
    use crate::txn::callbacks::CallbackType;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn service() -> TransactionService {
        TransactionService::new(Arc::new(MemoryStore::new()), TransactionConfig::default())
            .unwrap()
    }

    #[test]
    fn test_drop_rolls_back_open_transaction() {
        let service = service();
        let mut session = Session::new();
        let rolled_back = Arc::new(AtomicBool::new(false));
        {
            let mut guard = service.begin_closeable(&mut session).unwrap();
            guard.state().unwrap().set_bytes(b"k", b"v");
            let flag = rolled_back.clone();
            service.add_callback(guard.session(), CallbackType::AfterRollback, move |_, _, _| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
        }
        assert!(rolled_back.load(Ordering::SeqCst));
        assert!(!service.is_transaction_active(&session));
    }

    #[test]
    fn test_committed_guard_does_not_roll_back() {
        let service = service();
        let mut session = Session::new();
        {
            let mut guard = service.begin_closeable(&mut session).unwrap();
            guard.state().unwrap().set_bytes(b"k", b"v");
            guard.commit().unwrap();
            assert!(!guard.is_open());
        }
        assert_eq!(service.statistics().rolled_back_transactions, 0);
        assert_eq!(service.statistics().committed_transactions, 1);
    }
}

//! Test fixture for sqlayer integration tests
//!
//! Uses only the public crate API.

#![allow(dead_code)]

use parking_lot::Mutex;
use sqlayer::storage::{KvStore, MemoryStore, StoreOptions};
use sqlayer::{
    CallbackType, RetryPolicy, Session, TransactionConfig, TransactionService, TxnError,
    TxnResult, Version,
};
use std::sync::Arc;

/// Transaction service over a fresh in-memory store, with one open session
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub service: TransactionService,
    pub session: Session,
}

impl TestFixture {
    /// Fixture with default budgets and a retry policy that never sleeps
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: TransactionConfig) -> Self {
        Self::with_store_options(
            config,
            StoreOptions {
                retry: RetryPolicy::immediate(5),
                conflict_window: 1_000,
            },
        )
    }

    pub fn with_store_options(config: TransactionConfig, options: StoreOptions) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(MemoryStore::with_backend_options(options));
        let service = TransactionService::new(store.clone() as Arc<dyn KvStore>, config)
            .expect("Failed to create transaction service");
        TestFixture {
            store,
            service,
            session: Session::new(),
        }
    }

    /// Value of `key` as seen by a fresh store transaction
    pub fn committed_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut txn = self.store.create_transaction();
        txn.get(key).expect("Failed to read committed value")
    }

    /// Begin, write one key, commit
    pub fn commit_row(&mut self, key: &[u8], value: &[u8]) -> TxnResult<Version> {
        self.service.begin(&mut self.session)?.set_bytes(key, value);
        self.service.commit(&mut self.session)
    }

    /// Register a callback that records `name@timestamp` and, for after-end, the cause
    pub fn record(&mut self, log: &CallLog, callback_type: CallbackType, name: &str) {
        let log = log.clone();
        let name = name.to_string();
        self.service
            .add_callback(&mut self.session, callback_type, move |_, ts, cause| {
                log.push(name, ts, cause);
                Ok(())
            });
    }

    /// Register a callback that always fails
    pub fn fail_with(&mut self, callback_type: CallbackType, message: &str) {
        let message = message.to_string();
        self.service
            .add_callback(&mut self.session, callback_type, move |_, _, _| {
                Err(TxnError::callback(message))
            });
    }
}

/// Test config: default budgets, immediate retries
pub fn test_config() -> TransactionConfig {
    TransactionConfig {
        retry: RetryPolicy::immediate(5),
        ..TransactionConfig::default()
    }
}

/// One recorded callback invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub name: String,
    pub timestamp: Version,
    pub cause: Option<String>,
}

/// Shared, ordered log of callback invocations
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<CallRecord>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: String, timestamp: Version, cause: Option<&TxnError>) {
        self.0.lock().push(CallRecord {
            name,
            timestamp,
            cause: cause.map(|c| c.to_string()),
        });
    }

    pub fn names(&self) -> Vec<String> {
        self.0.lock().iter().map(|r| r.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<CallRecord> {
        self.0.lock().iter().find(|r| r.name == name).cloned()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.lock().iter().filter(|r| r.name == name).count()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

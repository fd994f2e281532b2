//! Commit-unknown-result reconciliation through transaction check counters

#[path = "testutils/mod.rs"]
mod testutils;

use sqlayer::storage::InjectedFault;
use sqlayer::{CallbackType, Session, TxnError};
use testutils::test_fixture::{CallLog, TestFixture};

#[test]
fn test_unknown_result_that_applied_is_detected() {
    let mut fixture = TestFixture::new();
    let log = CallLog::new();

    fixture.service.begin(&mut fixture.session).unwrap();
    let start = fixture
        .service
        .transaction_start_timestamp(&mut fixture.session)
        .unwrap();
    assert_eq!(fixture.service.mark_for_check(&mut fixture.session).unwrap(), 1);
    fixture
        .service
        .transaction(&mut fixture.session)
        .unwrap()
        .set_bytes(b"rows/1", &[7u8; 94]);
    fixture.record(&log, CallbackType::AfterCommit, "after_commit");
    fixture.service.commit(&mut fixture.session).unwrap();
    assert!(log.get("after_commit").unwrap().timestamp > start);

    // A second session gets its own identity and starts counting at one
    let mut other = Session::new();
    fixture.service.begin(&mut other).unwrap();
    assert_eq!(fixture.service.mark_for_check(&mut other).unwrap(), 1);
    let first = fixture.session.check_counter().unwrap();
    let second = other.check_counter().unwrap();
    assert_ne!(
        (first.timestamp(), first.unique()),
        (second.timestamp(), second.unique())
    );

    fixture.store.inject_fault(InjectedFault::UnknownResultApplied);
    let err = fixture.service.commit(&mut other).unwrap_err();
    assert!(matches!(err, TxnError::AmbiguousResult(_)));
    assert!(!fixture.service.is_transaction_active(&other));

    fixture.service.begin(&mut other).unwrap();
    assert!(fixture.service.check_succeeded(&mut other, &err, 1).unwrap());
    fixture.service.rollback(&mut other).unwrap();
}

#[test]
fn test_unknown_result_that_dropped_is_detected() {
    let mut fixture = TestFixture::new();
    fixture.service.begin(&mut fixture.session).unwrap();
    let expected = fixture.service.mark_for_check(&mut fixture.session).unwrap();
    fixture.store.inject_fault(InjectedFault::UnknownResultDropped);
    let err = fixture.service.commit(&mut fixture.session).unwrap_err();
    assert!(err.is_ambiguous());

    fixture.service.begin(&mut fixture.session).unwrap();
    assert!(!fixture
        .service
        .check_succeeded(&mut fixture.session, &err, expected)
        .unwrap());
}

#[test]
fn test_stale_counter_is_not_mistaken_for_success() {
    let mut fixture = TestFixture::new();

    fixture.service.begin(&mut fixture.session).unwrap();
    assert_eq!(fixture.service.mark_for_check(&mut fixture.session).unwrap(), 1);
    fixture.service.commit(&mut fixture.session).unwrap();

    // The next unit of work reuses the session identity with the next counter value
    fixture.service.begin(&mut fixture.session).unwrap();
    let expected = fixture.service.mark_for_check(&mut fixture.session).unwrap();
    assert_eq!(expected, 2);
    fixture.store.inject_fault(InjectedFault::UnknownResultDropped);
    let err = fixture.service.commit(&mut fixture.session).unwrap_err();

    fixture.service.begin(&mut fixture.session).unwrap();
    assert!(!fixture
        .service
        .check_succeeded(&mut fixture.session, &err, expected)
        .unwrap());
    assert!(fixture
        .service
        .check_succeeded(&mut fixture.session, &err, 1)
        .unwrap());
}

#[test]
fn test_session_that_never_marked() {
    let mut fixture = TestFixture::new();
    fixture.service.begin(&mut fixture.session).unwrap();
    let err = TxnError::AmbiguousResult(sqlayer::storage::StoreError::unknown_result());
    assert!(!fixture
        .service
        .check_succeeded(&mut fixture.session, &err, 1)
        .unwrap());
}

#[test]
fn test_check_operations_require_transaction() {
    let mut fixture = TestFixture::new();
    assert!(fixture
        .service
        .mark_for_check(&mut fixture.session)
        .unwrap_err()
        .is_usage());

    fixture.service.begin(&mut fixture.session).unwrap();
    let expected = fixture.service.mark_for_check(&mut fixture.session).unwrap();
    fixture.store.inject_fault(InjectedFault::UnknownResultApplied);
    let err = fixture.service.commit(&mut fixture.session).unwrap_err();

    assert!(fixture
        .service
        .check_succeeded(&mut fixture.session, &err, expected)
        .unwrap_err()
        .is_usage());
}

#[test]
fn test_clear_old_transaction_checks() {
    let mut fixture = TestFixture::new();
    fixture.service.begin(&mut fixture.session).unwrap();
    fixture.service.mark_for_check(&mut fixture.session).unwrap();
    fixture
        .service
        .transaction(&mut fixture.session)
        .unwrap()
        .set_bytes(b"unrelated", b"row");
    fixture.service.commit(&mut fixture.session).unwrap();

    let counter = fixture.session.check_counter().unwrap();
    let key = counter.key(fixture.service.config().check_prefix_bytes());
    assert!(fixture.committed_value(&key).is_some());

    // A cutoff at the entry's own timestamp keeps it
    fixture
        .service
        .clear_old_transaction_checks(counter.timestamp())
        .unwrap();
    assert!(fixture.committed_value(&key).is_some());

    fixture
        .service
        .clear_old_transaction_checks(counter.timestamp() + 1)
        .unwrap();
    assert!(fixture.committed_value(&key).is_none());
    assert!(fixture.committed_value(b"unrelated").is_some());
}

//! Test utilities for sqlayer integration tests
//!
//! - TestFixture: a transaction service over an in-memory store plus one session
//! - CallLog: records callback invocations in order

pub mod test_fixture;

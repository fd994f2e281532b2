// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Session context
//!
//! A session is created by the embedding server for each connection and
//! passed by `&mut` to every transaction operation. It holds at most one open
//! transaction, the session options, and the callback stacks.

pub mod models;
pub mod options;

pub use models::Session;
pub use options::SessionOption;

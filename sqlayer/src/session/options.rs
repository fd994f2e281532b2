// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Session options understood by the transaction service

use crate::error::{TxnError, TxnResult};
use crate::txn::checks::CheckTime;
use serde::{Deserialize, Serialize};

/// Settable session option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionOption {
    /// When constraint checks run; read at `begin`
    ConstraintCheckTime,
}

impl SessionOption {
    pub fn name(&self) -> &'static str {
        match self {
            SessionOption::ConstraintCheckTime => "constraint_check_time",
        }
    }
}

impl std::str::FromStr for SessionOption {
    type Err = TxnError;

    fn from_str(s: &str) -> TxnResult<Self> {
        match s.to_lowercase().as_str() {
            "constraint_check_time" => Ok(SessionOption::ConstraintCheckTime),
            _ => Err(TxnError::InvalidParameter(format!(
                "Unknown session option: {}",
                s
            ))),
        }
    }
}

/// Parse a `constraint_check_time` value; `None` restores the default
pub fn parse_check_time(value: Option<&str>) -> TxnResult<Option<CheckTime>> {
    value.map(CheckTime::parse).transpose()
}

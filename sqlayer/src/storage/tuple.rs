// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Order-preserving tuple packing for integer tuples
//!
//! Integers are encoded with a length-carrying type code so that the byte
//! order of packed tuples matches the numeric order of their elements. This
//! lets callers clear "everything before timestamp T" as one key range.

use super::types::{StorageResult, StoreError};

const INT_ZERO_CODE: u8 = 0x14;
const MAX_INT_BYTES: u8 = 8;

/// Pack a tuple of integers
pub fn pack_ints(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 9);
    for value in values {
        encode_int(*value, &mut out);
    }
    out
}

/// Unpack a tuple produced by [`pack_ints`]
pub fn unpack_ints(bytes: &[u8]) -> StorageResult<Vec<i64>> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let code = bytes[pos];
        pos += 1;
        if code == INT_ZERO_CODE {
            values.push(0);
            continue;
        }

        let (len, negative) = if code > INT_ZERO_CODE && code <= INT_ZERO_CODE + MAX_INT_BYTES {
            ((code - INT_ZERO_CODE) as usize, false)
        } else if code < INT_ZERO_CODE && code >= INT_ZERO_CODE - MAX_INT_BYTES {
            ((INT_ZERO_CODE - code) as usize, true)
        } else {
            return Err(StoreError::backend(format!(
                "Unknown tuple type code 0x{:02x} at offset {}",
                code,
                pos - 1
            )));
        };

        if pos + len > bytes.len() {
            return Err(StoreError::backend("Truncated integer in packed tuple"));
        }
        let mut raw: u64 = 0;
        for b in &bytes[pos..pos + len] {
            raw = (raw << 8) | *b as u64;
        }
        pos += len;

        let value = if negative {
            let magnitude = mask(len) - raw;
            if magnitude > (i64::MAX as u64) + 1 {
                return Err(StoreError::backend("Packed integer out of range"));
            }
            (magnitude as i128).wrapping_neg() as i64
        } else {
            i64::try_from(raw).map_err(|_| StoreError::backend("Packed integer out of range"))?
        };
        values.push(value);
    }
    Ok(values)
}

/// First key after every key that starts with `prefix`
pub fn strinc(prefix: &[u8]) -> StorageResult<Vec<u8>> {
    let trimmed_len = prefix
        .iter()
        .rposition(|b| *b != 0xff)
        .map(|i| i + 1)
        .ok_or_else(|| {
            StoreError::backend("Key must contain at least one byte not equal to 0xFF")
        })?;
    let mut end = prefix[..trimmed_len].to_vec();
    if let Some(last) = end.last_mut() {
        *last += 1;
    }
    Ok(end)
}

/// Concatenate a keyspace prefix with a packed tuple
pub fn join(prefix: &[u8], packed: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + packed.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(packed);
    key
}

fn mask(len: usize) -> u64 {
    if len >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * len)) - 1
    }
}

fn byte_len(magnitude: u64) -> usize {
    ((64 - magnitude.leading_zeros() as usize) + 7) / 8
}

fn encode_int(value: i64, out: &mut Vec<u8>) {
    if value == 0 {
        out.push(INT_ZERO_CODE);
        return;
    }
    let magnitude = value.unsigned_abs();
    let len = byte_len(magnitude);
    let raw = if value > 0 {
        out.push(INT_ZERO_CODE + len as u8);
        magnitude
    } else {
        out.push(INT_ZERO_CODE - len as u8);
        mask(len) - magnitude
    };
    out.extend_from_slice(&raw.to_be_bytes()[8 - len..]);
}

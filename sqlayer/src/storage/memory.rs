// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory store backend for testing

use super::traits::{KvBackend, Mutation};
use super::transaction::{OccStore, StoreOptions};
use super::types::{StorageResult, StorageType, Version};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Optimistic store over [`MemoryBackend`]
pub type MemoryStore = OccStore<MemoryBackend>;

impl MemoryStore {
    /// Create an empty in-memory store with default options
    pub fn new() -> Self {
        Self::with_backend_options(StoreOptions::default())
    }

    /// Create an empty in-memory store
    pub fn with_backend_options(options: StoreOptions) -> Self {
        OccStore::with_version(MemoryBackend::new(), 0, options)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryData {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    version: Version,
}

/// In-memory ordered key-value backend
pub struct MemoryBackend {
    data: RwLock<MemoryData>,
}

impl MemoryBackend {
    /// Create a new memory backend
    pub fn new() -> Self {
        Self {
            data: RwLock::new(MemoryData {
                entries: BTreeMap::new(),
                version: 0,
            }),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().entries.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().entries.get(key).cloned())
    }

    fn range(
        &self,
        begin: &[u8],
        end: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        if begin >= end {
            return Ok(Vec::new());
        }
        let data = self.data.read();
        let items = data
            .entries
            .range(begin.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(if limit == 0 {
            items.collect()
        } else {
            items.take(limit).collect()
        })
    }

    fn apply(&self, mutations: &[Mutation], version: Version) -> StorageResult<()> {
        let mut data = self.data.write();
        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    data.entries.insert(key.clone(), value.clone());
                }
                Mutation::Clear { key } => {
                    data.entries.remove(key);
                }
                Mutation::ClearRange { begin, end } => {
                    let doomed: Vec<Vec<u8>> = data
                        .entries
                        .range(begin.clone()..end.clone())
                        .map(|(k, _)| k.clone())
                        .collect();
                    for key in doomed {
                        data.entries.remove(&key);
                    }
                }
            }
        }
        data.version = version;
        Ok(())
    }

    fn last_version(&self) -> StorageResult<Version> {
        Ok(self.data.read().version)
    }

    fn flush(&self) -> StorageResult<()> {
        // No-op for memory storage
        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }
}

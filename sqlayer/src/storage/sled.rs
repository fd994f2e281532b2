// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Sled store backend implementation

use super::traits::{KvBackend, Mutation};
use super::transaction::{OccStore, StoreOptions};
use super::types::{StorageResult, StorageType, StoreError, Version};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::collections::BTreeMap;
use std::path::Path;

const DATA_TREE: &str = "kv";
const META_TREE: &str = "meta";
const VERSION_KEY: &[u8] = b"last_version";

/// Optimistic store over [`SledBackend`]
pub type SledStore = OccStore<SledBackend>;

impl SledStore {
    /// Open (or create) a sled-backed store at `path`
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> StorageResult<Self> {
        OccStore::with_options(SledBackend::open(path)?, options)
    }
}

fn sled_error(e: sled::Error) -> StoreError {
    StoreError::backend(e.to_string())
}

/// Sled backend: user data in one tree, the commit version in another
pub struct SledBackend {
    db: sled::Db,
    data: sled::Tree,
    meta: sled::Tree,
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path).map_err(sled_error)?;
        let data = db.open_tree(DATA_TREE).map_err(sled_error)?;
        let meta = db.open_tree(META_TREE).map_err(sled_error)?;
        Ok(SledBackend { db, data, meta })
    }

    /// Resolve a batch into its final per-key effect
    fn resolve(&self, mutations: &[Mutation]) -> StorageResult<BTreeMap<Vec<u8>, Option<Vec<u8>>>> {
        let mut overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    overlay.insert(key.clone(), Some(value.clone()));
                }
                Mutation::Clear { key } => {
                    overlay.insert(key.clone(), None);
                }
                Mutation::ClearRange { begin, end } => {
                    if begin >= end {
                        continue;
                    }
                    for item in self.data.range(begin.as_slice()..end.as_slice()) {
                        let (key, _) = item.map_err(sled_error)?;
                        overlay.insert(key.to_vec(), None);
                    }
                    for (_, slot) in overlay.range_mut(begin.clone()..end.clone()) {
                        *slot = None;
                    }
                }
            }
        }
        Ok(overlay)
    }
}

impl KvBackend for SledBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.data
            .get(key)
            .map_err(sled_error)
            .map(|opt| opt.map(|v| v.to_vec()))
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
        let mut results = Vec::new();
        for item in self.data.range(begin..end) {
            let (k, v) = item.map_err(sled_error)?;
            results.push((k.to_vec(), v.to_vec()));
            if limit != 0 && results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    fn apply(&self, mutations: &[Mutation], version: Version) -> StorageResult<()> {
        let overlay = self.resolve(mutations)?;
        let encoded_version = bincode::serialize(&version)?;

        let result: Result<(), TransactionError<StoreError>> =
            (&self.data, &self.meta).transaction(|(data, meta)| {
                for (key, value) in &overlay {
                    match value {
                        Some(v) => {
                            data.insert(key.as_slice(), v.as_slice())?;
                        }
                        None => {
                            data.remove(key.as_slice())?;
                        }
                    }
                }
                meta.insert(VERSION_KEY, encoded_version.as_slice())?;
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            });

        result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => sled_error(e),
        })
    }

    fn last_version(&self) -> StorageResult<Version> {
        match self.meta.get(VERSION_KEY).map_err(sled_error)? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Ok(0),
        }
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush().map_err(sled_error)?;
        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Sled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::KvStore;
    use tempfile::TempDir;

    #[test]
    fn test_apply_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let backend = SledBackend::open(temp_dir.path()).unwrap();
            assert_eq!(backend.last_version().unwrap(), 0);
            backend
                .apply(
                    &[
                        Mutation::Set {
                            key: b"row/1".to_vec(),
                            value: b"alice".to_vec(),
                        },
                        Mutation::Set {
                            key: b"row/2".to_vec(),
                            value: b"bob".to_vec(),
                        },
                        Mutation::ClearRange {
                            begin: b"row/2".to_vec(),
                            end: b"row/3".to_vec(),
                        },
                    ],
                    3,
                )
                .unwrap();
            backend.flush().unwrap();
        }

        let backend = SledBackend::open(temp_dir.path()).unwrap();
        assert_eq!(backend.last_version().unwrap(), 3);
        assert_eq!(backend.get(b"row/1").unwrap(), Some(b"alice".to_vec()));
        assert_eq!(backend.get(b"row/2").unwrap(), None);
    }

    #[test]
    fn test_store_resumes_version() {
        let temp_dir = TempDir::new().unwrap();
        let first = {
            let store = SledStore::open(temp_dir.path(), StoreOptions::default()).unwrap();
            let mut txn = store.create_transaction();
            txn.set(b"k", b"v");
            let version = txn.commit().unwrap();
            store.flush().unwrap();
            version
        };

        let store = SledStore::open(temp_dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.current_version(), first);
        assert_eq!(KvStore::storage_type(&store), StorageType::Sled);
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Store factory
//!
//! Creates a transactional store for the configured backend technology.

use super::traits::KvStore;
use super::transaction::StoreOptions;
use super::types::{StorageResult, StorageType};
use std::path::Path;
use std::sync::Arc;

/// Factory function to create a store based on configuration
///
/// # Arguments
/// * `storage_type` - The backend to use
/// * `path` - Filesystem path for persistent backends; ignored for memory
/// * `options` - Retry and conflict-window options for the optimistic layer
pub fn create_store<P: AsRef<Path>>(
    storage_type: StorageType,
    path: P,
    options: StoreOptions,
) -> StorageResult<Arc<dyn KvStore>> {
    match storage_type {
        #[cfg(feature = "sled-backend")]
        StorageType::Sled => {
            use crate::storage::sled::SledStore;
            let store = SledStore::open(path, options)?;
            Ok(Arc::new(store) as Arc<dyn KvStore>)
        }
        #[cfg(not(feature = "sled-backend"))]
        StorageType::Sled => {
            let _ = path;
            Err(super::types::StoreError::backend(
                "Sled backend not compiled in (enable the sled-backend feature)",
            ))
        }
        StorageType::Memory => {
            use crate::storage::memory::MemoryStore;
            Ok(Arc::new(MemoryStore::with_backend_options(options)) as Arc<dyn KvStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_store() {
        let store = create_store(StorageType::Memory, "", StoreOptions::default()).unwrap();
        assert_eq!(store.storage_type(), StorageType::Memory);
    }

    #[cfg(feature = "sled-backend")]
    #[test]
    fn test_create_sled_store() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store =
            create_store(StorageType::Sled, temp_dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.storage_type(), StorageType::Sled);
    }
}

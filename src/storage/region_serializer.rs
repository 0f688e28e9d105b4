use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::constants::REGION_DIR;
use crate::core::chunk::Chunk;
use crate::error::{RegionError, StorageError};
use crate::storage::compression::Compression;
use crate::storage::region::{RegionStore, region_coords, region_file_name};
use crate::storage::{ChunkSerializer, decode, encode};

/// Stores chunks in `<world>/region/r.<rx>.<rz>.mcr` files.
///
/// File I/O runs on tokio's blocking pool; each region file is guarded by
/// its own lock so loads from different regions never wait on each other.
pub struct RegionSerializer {
    root: PathBuf,
    compression: Compression,
    regions: Mutex<FxHashMap<(i32, i32), Arc<Mutex<RegionStore>>>>,
}

impl RegionSerializer {
    pub fn connect(world_path: impl AsRef<Path>, compression: Compression) -> Result<Self, StorageError> {
        let root = world_path.as_ref().join(REGION_DIR);
        std::fs::create_dir_all(&root).map_err(|source| StorageError::Connect {
            path: root.clone(),
            source,
        })?;
        tracing::info!(path = %root.display(), ?compression, "region storage connected");
        Ok(RegionSerializer {
            root,
            compression,
            regions: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn region(&self, x: i32, z: i32) -> Arc<Mutex<RegionStore>> {
        let mut regions = self.regions.lock();
        regions
            .entry(region_coords(x, z))
            .or_insert_with(|| {
                let path = self.root.join(region_file_name(x, z));
                Arc::new(Mutex::new(RegionStore::new(path, self.compression)))
            })
            .clone()
    }
}

#[async_trait]
impl ChunkSerializer for RegionSerializer {
    fn name(&self) -> &str {
        "region"
    }

    async fn load_chunk(&self, x: i32, z: i32) -> Result<Chunk, StorageError> {
        let store = self.region(x, z);
        let bytes = tokio::task::spawn_blocking(move || store.lock().get(x, z))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
            .map_err(|e| match e {
                RegionError::Missing { x, z } => StorageError::NotFound { x, z },
                RegionError::Corrupt(reason) => StorageError::Corrupt { x, z, reason },
                RegionError::UnknownCompression(tag) => StorageError::Corrupt {
                    x,
                    z,
                    reason: format!("unknown compression format {tag}"),
                },
                source => StorageError::Read { x, z, source },
            })?;
        decode(x, z, &bytes)
    }

    fn serialize_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>, StorageError> {
        encode(chunk)
    }

    async fn save_payload(&self, x: i32, z: i32, payload: Vec<u8>) -> Result<(), StorageError> {
        let store = self.region(x, z);
        tokio::task::spawn_blocking(move || {
            let mut store = store.lock();
            store.ensure()?;
            store.put(x, z, &payload)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
        .map_err(|source| StorageError::Write { x, z, source })
    }
}

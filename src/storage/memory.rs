use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::core::chunk::Chunk;
use crate::error::{RegionError, StorageError};
use crate::storage::{ChunkSerializer, decode, encode};

/// Keeps payloads in a map. Used for ephemeral worlds and in tests, where
/// the counters and failure switch make load/save traffic observable.
#[derive(Default)]
pub struct MemorySerializer {
    payloads: Mutex<FxHashMap<(i32, i32), Vec<u8>>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
    load_delay: Mutex<Option<Duration>>,
    save_delay: Mutex<Option<Duration>>,
}

impl MemorySerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every load sleeps this long first, keeping loads in flight.
    pub fn with_load_delay(delay: Duration) -> Self {
        let serializer = Self::default();
        *serializer.load_delay.lock() = Some(delay);
        serializer
    }

    /// Every save sleeps this long before writing, keeping the write in
    /// flight while the caller edits.
    pub fn set_save_delay(&self, delay: Option<Duration>) {
        *self.save_delay.lock() = delay;
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        self.payloads.lock().contains_key(&(x, z))
    }

    pub fn insert_raw(&self, x: i32, z: i32, bytes: Vec<u8>) {
        self.payloads.lock().insert((x, z), bytes);
    }
}

#[async_trait]
impl ChunkSerializer for MemorySerializer {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_chunk(&self, x: i32, z: i32) -> Result<Chunk, StorageError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .payloads
            .lock()
            .get(&(x, z))
            .cloned()
            .ok_or(StorageError::NotFound { x, z })?;
        decode(x, z, &bytes)
    }

    fn serialize_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>, StorageError> {
        encode(chunk)
    }

    async fn save_payload(&self, x: i32, z: i32, payload: Vec<u8>) -> Result<(), StorageError> {
        let delay = *self.save_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Write {
                x,
                z,
                source: RegionError::Io(std::io::Error::other("simulated write failure")),
            });
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().insert((x, z), payload);
        Ok(())
    }
}

//! Chunk persistence
//! The serializer boundary the world talks to, plus its region-file and
//! in-memory implementations.

pub mod codec;
pub mod compression;
pub mod memory;
pub mod region;
pub mod region_serializer;

use async_trait::async_trait;

use crate::core::chunk::Chunk;
use crate::error::StorageError;

// Re-export commonly used types
pub use compression::Compression;
pub use memory::MemorySerializer;
pub use region::RegionStore;
pub use region_serializer::RegionSerializer;

/// Turns chunks into stored payloads and back.
///
/// `load_chunk` reports a chunk that was never stored as
/// `StorageError::NotFound`, which is not a failure: the world generates
/// it instead. Anything that exists but cannot be decoded must come back
/// as a different error so it is never regenerated over.
#[async_trait]
pub trait ChunkSerializer: Send + Sync {
    fn name(&self) -> &str;

    async fn load_chunk(&self, x: i32, z: i32) -> Result<Chunk, StorageError>;

    /// Encodes a chunk without performing I/O, so callers can release
    /// their hold on the chunk before writing.
    fn serialize_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>, StorageError>;

    async fn save_payload(&self, x: i32, z: i32, payload: Vec<u8>) -> Result<(), StorageError>;

    async fn save_chunk(&self, chunk: &Chunk) -> Result<(), StorageError> {
        let payload = self.serialize_chunk(chunk)?;
        self.save_payload(chunk.x, chunk.z, payload).await
    }
}

pub(crate) fn encode(chunk: &Chunk) -> Result<Vec<u8>, StorageError> {
    codec::encode_chunk(chunk).map_err(|reason| StorageError::Corrupt {
        x: chunk.x,
        z: chunk.z,
        reason,
    })
}

pub(crate) fn decode(x: i32, z: i32, bytes: &[u8]) -> Result<Chunk, StorageError> {
    codec::decode_chunk(x, z, bytes).map_err(|reason| {
        tracing::error!(x, z, %reason, "stored chunk failed to decode");
        StorageError::Corrupt { x, z, reason }
    })
}

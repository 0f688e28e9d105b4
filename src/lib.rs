//! Voxel world storage: chunk columns with incremental lighting, page
//! allocated region files, and a world that loads or generates each chunk
//! exactly once and writes edits back in the background.

pub mod constants;

// Core module with blocks, sections and chunks
pub mod core;

pub mod error;

// Storage module with region files and serializers
pub mod storage;

pub mod utils;

// World module with caching, generation and persistence
pub mod world;

pub use crate::core::{BlockId, BlockType, Chunk};
pub use error::{RegionError, StageError, StorageError, WorldError};
pub use storage::{ChunkSerializer, Compression, MemorySerializer, RegionSerializer, RegionStore};
pub use world::{ChunkPos, ChunkRef, World, WorldConfig};

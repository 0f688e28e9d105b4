//! World management modules
//! Contains the chunk cache, the single-flight load table, generation
//! stages, seasonal overlays and the orchestrating `World`.

pub mod cache;
pub mod generator;
pub mod manager;
pub mod pending;
pub mod season;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::constants::CHUNK_SIZE;
use crate::core::chunk::Chunk;

/// Chunk coordinates `(x, z)`.
pub type ChunkPos = (i32, i32);

/// Shared handle to the single live instance of a chunk.
pub type ChunkRef = Arc<RwLock<Chunk>>;

/// Splits a world block coordinate into chunk and local coordinates.
pub fn split_block_coord(v: i32) -> (i32, i32) {
    (v.div_euclid(CHUNK_SIZE), v.rem_euclid(CHUNK_SIZE))
}

// Re-export commonly used types
pub use cache::ChunkCache;
pub use generator::{Stage, StageList, sort_stages, stages_from_names};
pub use manager::{FlushOutcome, PostLoadHook, World, WorldConfig, WorldStats};
pub use pending::PendingTable;
pub use season::{Season, SeasonKind};

//! Core voxel data structures
//! Contains the block table, sections, chunk columns and damage tracking.

pub mod block;
pub mod chunk;
pub mod damage;
pub mod section;

// Re-export commonly used types
pub use block::{BlockId, BlockType};
pub use chunk::Chunk;
pub use damage::{DamagePayload, DamageTracker};
pub use section::Section;

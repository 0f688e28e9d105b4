use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::core::block::{self, BlockType};
use crate::core::chunk::Chunk;

/// World-wide overlay applied to every chunk as it becomes available.
pub trait Season: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `true` if the chunk went from clean to dirty.
    fn transform(&self, chunk: &mut Chunk) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeasonKind {
    Winter,
    Spring,
}

impl SeasonKind {
    pub fn season(self) -> Box<dyn Season> {
        match self {
            SeasonKind::Winter => Box::new(Winter),
            SeasonKind::Spring => Box::new(Spring),
        }
    }
}

/// Freezes surface water and lays snow on exposed solid tops.
pub struct Winter;

impl Season for Winter {
    fn name(&self) -> &str {
        "winter"
    }

    fn transform(&self, chunk: &mut Chunk) -> bool {
        let mut became_dirty = false;
        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let top = chunk.height_at(x, z) as i32;
                let id = chunk.get_block(x, top, z);
                if id == BlockType::Water.id() {
                    became_dirty |= chunk.set_block(x, top, z, BlockType::Ice.id());
                } else if id != BlockType::Air.id() && block::dim(id) == MAX_LIGHT && top + 1 < WORLD_HEIGHT {
                    became_dirty |= chunk.set_block(x, top + 1, z, BlockType::Snow.id());
                }
            }
        }
        became_dirty
    }
}

/// Undoes winter: thaws surface ice and clears snow layers.
pub struct Spring;

impl Season for Spring {
    fn name(&self) -> &str {
        "spring"
    }

    fn transform(&self, chunk: &mut Chunk) -> bool {
        let mut became_dirty = false;
        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let top = chunk.height_at(x, z) as i32;
                let id = chunk.get_block(x, top, z);
                if id == BlockType::Ice.id() {
                    became_dirty |= chunk.set_block(x, top, z, BlockType::Water.id());
                } else if id == BlockType::Snow.id() {
                    became_dirty |= chunk.set_block(x, top, z, BlockType::Air.id());
                }
            }
        }
        became_dirty
    }
}

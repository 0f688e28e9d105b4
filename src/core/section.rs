use crate::constants::*;
use crate::core::block::BlockId;

#[inline]
pub fn section_index(x: usize, y: usize, z: usize) -> usize {
    (y * CHUNK_SIZE as usize + z) * CHUNK_SIZE as usize + x
}

/// A 16x16x16 slab of a chunk column.
///
/// Coordinates are local and assumed to be in `[0, 16)`; bounds are the
/// owning chunk's job.
#[derive(Clone)]
pub struct Section {
    pub blocks: Box<[u8; SECTION_VOLUME]>,
    pub metadata: Box<[u8; SECTION_VOLUME]>,
    pub skylight: Box<[u8; SECTION_VOLUME]>,
}

impl Section {
    pub fn new() -> Self {
        Section {
            blocks: Box::new([0; SECTION_VOLUME]),
            metadata: Box::new([0; SECTION_VOLUME]),
            skylight: Box::new([MAX_LIGHT; SECTION_VOLUME]),
        }
    }

    #[inline]
    pub fn get_block(&self, x: usize, y: usize, z: usize) -> BlockId {
        self.blocks[section_index(x, y, z)]
    }

    #[inline]
    pub fn set_block(&mut self, x: usize, y: usize, z: usize, block: BlockId) {
        self.blocks[section_index(x, y, z)] = block;
    }

    #[inline]
    pub fn get_metadata(&self, x: usize, y: usize, z: usize) -> u8 {
        self.metadata[section_index(x, y, z)]
    }

    #[inline]
    pub fn set_metadata(&mut self, x: usize, y: usize, z: usize, metadata: u8) {
        self.metadata[section_index(x, y, z)] = metadata;
    }

    #[inline]
    pub fn get_skylight(&self, x: usize, y: usize, z: usize) -> u8 {
        self.skylight[section_index(x, y, z)]
    }

    #[inline]
    pub fn set_skylight(&mut self, x: usize, y: usize, z: usize, light: u8) {
        self.skylight[section_index(x, y, z)] = light;
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&b| b == 0)
    }
}

impl Default for Section {
    fn default() -> Self {
        Self::new()
    }
}

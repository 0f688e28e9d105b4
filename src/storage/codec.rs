//! Chunk <-> payload bytes.
//!
//! Payloads are a magic header and format version followed by a
//! bincode-encoded `SavedChunk`. Only present sections are written.

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::core::chunk::Chunk;
use crate::core::section::Section;

const MAGIC_HEADER: &[u8; 4] = b"CVCH";
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
pub struct SavedSection {
    pub y: u8,
    pub blocks: Vec<u8>,
    pub metadata: Vec<u8>,
    pub skylight: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
pub struct SavedChunk {
    pub x: i32,
    pub z: i32,
    pub populated: bool,
    pub heightmap: Vec<u8>,
    pub blocklight: Vec<u8>,
    pub sections: Vec<SavedSection>,
}

impl SavedChunk {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let sections = chunk
            .sections()
            .iter()
            .enumerate()
            .filter_map(|(y, section)| section.as_ref().map(|s| (y, s)))
            .filter(|(_, section)| worth_saving(section))
            .map(|(y, section)| SavedSection {
                y: y as u8,
                blocks: section.blocks.to_vec(),
                metadata: section.metadata.to_vec(),
                skylight: section.skylight.to_vec(),
            })
            .collect();

        SavedChunk {
            x: chunk.x,
            z: chunk.z,
            populated: chunk.is_populated(),
            heightmap: chunk.heightmap().to_vec(),
            blocklight: chunk.blocklight().to_vec(),
            sections,
        }
    }

    pub fn into_chunk(self) -> Result<Chunk, String> {
        let heightmap: [u8; COLUMN_COUNT] = self
            .heightmap
            .try_into()
            .map_err(|v: Vec<u8>| format!("heightmap has {} entries", v.len()))?;
        if self.blocklight.len() != CHUNK_VOLUME {
            return Err(format!("blocklight has {} entries", self.blocklight.len()));
        }

        let mut sections: [Option<Section>; NUM_SECTIONS as usize] = std::array::from_fn(|_| None);
        for saved in self.sections {
            let slot = sections
                .get_mut(saved.y as usize)
                .ok_or_else(|| format!("section index {} out of range", saved.y))?;
            if slot.is_some() {
                return Err(format!("section {} stored twice", saved.y));
            }
            *slot = Some(Section {
                blocks: into_section_array(saved.blocks, "blocks")?,
                metadata: into_section_array(saved.metadata, "metadata")?,
                skylight: into_section_array(saved.skylight, "skylight")?,
            });
        }

        Ok(Chunk::from_parts(
            self.x,
            self.z,
            sections,
            heightmap,
            self.blocklight.into_boxed_slice(),
            self.populated,
        ))
    }
}

/// A section equal to the implicit default (air, no metadata, full sky)
/// is left out.
fn worth_saving(section: &Section) -> bool {
    !section.is_empty()
        || section.metadata.iter().any(|&m| m != 0)
        || section.skylight.iter().any(|&l| l != MAX_LIGHT)
}

fn into_section_array(data: Vec<u8>, what: &str) -> Result<Box<[u8; SECTION_VOLUME]>, String> {
    let len = data.len();
    data.into_boxed_slice()
        .try_into()
        .map_err(|_| format!("section {what} has {len} entries"))
}

pub fn encode_chunk(chunk: &Chunk) -> Result<Vec<u8>, String> {
    let saved = SavedChunk::from_chunk(chunk);
    let data = bincode::serialize(&saved).map_err(|e| format!("Serialization error: {}", e))?;

    let mut out = Vec::with_capacity(data.len() + 8);
    out.extend_from_slice(MAGIC_HEADER);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&data);
    Ok(out)
}

/// Decodes a payload, checking it really belongs at `(x, z)`.
pub fn decode_chunk(x: i32, z: i32, bytes: &[u8]) -> Result<Chunk, String> {
    if bytes.len() < 8 || &bytes[..4] != MAGIC_HEADER {
        return Err("Invalid payload header".to_string());
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(format!("Unsupported payload version: {}", version));
    }

    let saved: SavedChunk =
        bincode::deserialize(&bytes[8..]).map_err(|e| format!("Deserialization error: {}", e))?;
    if (saved.x, saved.z) != (x, z) {
        return Err(format!(
            "payload belongs to ({}, {}), not ({x}, {z})",
            saved.x, saved.z
        ));
    }
    saved.into_chunk()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::BlockType;

    #[test]
    fn test_blocks_and_metadata_survive() {
        let mut chunk = Chunk::new(-4, 9);
        for i in 0..400 {
            let (x, y, z) = (i % 16, (i * 7) % 256, (i / 16) % 16);
            chunk.set_block(x, y, z, (i % 90 + 1) as u8);
            chunk.set_metadata(x, y, z, (i % 16) as u8);
        }
        chunk.set_block(2, 2, 2, BlockType::Torch.id());
        chunk.set_populated();
        chunk.regenerate();

        let bytes = encode_chunk(&chunk).unwrap();
        let loaded = decode_chunk(-4, 9, &bytes).unwrap();

        assert!(loaded.is_populated());
        assert!(!loaded.is_dirty());
        assert_eq!(loaded.heightmap(), chunk.heightmap());
        assert_eq!(loaded.blocklight(), chunk.blocklight());
        for y in 0..WORLD_HEIGHT {
            for z in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    assert_eq!(loaded.get_block(x, y, z), chunk.get_block(x, y, z));
                    assert_eq!(loaded.get_metadata(x, y, z), chunk.get_metadata(x, y, z));
                    assert_eq!(loaded.get_skylight(x, y, z), chunk.get_skylight(x, y, z));
                }
            }
        }
    }

    #[test]
    fn test_wrong_coordinates_rejected() {
        let bytes = encode_chunk(&Chunk::new(1, 1)).unwrap();
        assert!(decode_chunk(1, 2, &bytes).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode_chunk(0, 0, b"nope").is_err());
        let mut bytes = encode_chunk(&Chunk::new(0, 0)).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(decode_chunk(0, 0, &bytes).is_err());
    }
}

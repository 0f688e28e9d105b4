use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_LIGHT;

/// Raw block id as stored in sections.
pub type BlockId = u8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockType {
    #[default]
    Air = 0,
    Stone = 1,
    Grass = 2,
    Dirt = 3,
    Cobblestone = 4,
    Planks = 5,
    Bedrock = 7,
    FlowingWater = 8,
    Water = 9,
    FlowingLava = 10,
    Lava = 11,
    Sand = 12,
    Gravel = 13,
    Wood = 17,
    Leaves = 18,
    Glass = 20,
    BrownMushroom = 39,
    Torch = 50,
    Fire = 51,
    RedstoneTorch = 76,
    Snow = 78,
    Ice = 79,
    SnowBlock = 80,
    Cactus = 81,
    Clay = 82,
    Glowstone = 89,
    JackOLantern = 91,
}

impl BlockType {
    pub const ALL: [BlockType; 27] = [
        BlockType::Air,
        BlockType::Stone,
        BlockType::Grass,
        BlockType::Dirt,
        BlockType::Cobblestone,
        BlockType::Planks,
        BlockType::Bedrock,
        BlockType::FlowingWater,
        BlockType::Water,
        BlockType::FlowingLava,
        BlockType::Lava,
        BlockType::Sand,
        BlockType::Gravel,
        BlockType::Wood,
        BlockType::Leaves,
        BlockType::Glass,
        BlockType::BrownMushroom,
        BlockType::Torch,
        BlockType::Fire,
        BlockType::RedstoneTorch,
        BlockType::Snow,
        BlockType::Ice,
        BlockType::SnowBlock,
        BlockType::Cactus,
        BlockType::Clay,
        BlockType::Glowstone,
        BlockType::JackOLantern,
    ];

    pub fn id(self) -> BlockId {
        self as BlockId
    }

    pub fn from_id(id: BlockId) -> Option<BlockType> {
        Self::ALL.iter().copied().find(|block| block.id() == id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlockType::Air => "air",
            BlockType::Stone => "stone",
            BlockType::Grass => "grass",
            BlockType::Dirt => "dirt",
            BlockType::Cobblestone => "cobblestone",
            BlockType::Planks => "planks",
            BlockType::Bedrock => "bedrock",
            BlockType::FlowingWater => "flowing-water",
            BlockType::Water => "water",
            BlockType::FlowingLava => "flowing-lava",
            BlockType::Lava => "lava",
            BlockType::Sand => "sand",
            BlockType::Gravel => "gravel",
            BlockType::Wood => "wood",
            BlockType::Leaves => "leaves",
            BlockType::Glass => "glass",
            BlockType::BrownMushroom => "brown-mushroom",
            BlockType::Torch => "torch",
            BlockType::Fire => "fire",
            BlockType::RedstoneTorch => "redstone-torch",
            BlockType::Snow => "snow",
            BlockType::Ice => "ice",
            BlockType::SnowBlock => "snow-block",
            BlockType::Cactus => "cactus",
            BlockType::Clay => "clay",
            BlockType::Glowstone => "glowstone",
            BlockType::JackOLantern => "jack-o-lantern",
        }
    }

    /// Strength of the light this block emits.
    pub fn glow(&self) -> u8 {
        match self {
            BlockType::Torch => 14,
            BlockType::Fire
            | BlockType::FlowingLava
            | BlockType::Lava
            | BlockType::Glowstone
            | BlockType::JackOLantern => 15,
            BlockType::RedstoneTorch => 7,
            BlockType::BrownMushroom => 1,
            _ => 0,
        }
    }

    /// How much skylight is lost passing through this block.
    pub fn dim(&self) -> u8 {
        match self {
            BlockType::Air
            | BlockType::Glass
            | BlockType::Torch
            | BlockType::RedstoneTorch
            | BlockType::Fire
            | BlockType::BrownMushroom
            | BlockType::Snow => 0,
            BlockType::Leaves => 1,
            BlockType::FlowingWater | BlockType::Water | BlockType::Ice => 3,
            _ => MAX_LIGHT,
        }
    }

    /// What the block leaves behind when destroyed.
    pub fn decay(&self) -> BlockType {
        match self {
            BlockType::Ice => BlockType::Water,
            _ => BlockType::Air,
        }
    }

    pub fn is_transparent(&self) -> bool {
        self.dim() < MAX_LIGHT
    }

    pub fn is_fluid(&self) -> bool {
        matches!(
            self,
            BlockType::FlowingWater | BlockType::Water | BlockType::FlowingLava | BlockType::Lava
        )
    }
}

impl From<BlockType> for BlockId {
    fn from(block: BlockType) -> Self {
        block.id()
    }
}

/// Per-id lighting and decay properties, including ids with no named
/// `BlockType` (those are treated as opaque, dark and decaying to air).
#[derive(Clone, Copy, Debug)]
pub struct BlockInfo {
    pub glow: u8,
    pub dim: u8,
    pub decay: BlockId,
}

static BLOCK_TABLE: Lazy<[BlockInfo; 256]> = Lazy::new(|| {
    let mut table = [BlockInfo {
        glow: 0,
        dim: MAX_LIGHT,
        decay: BlockType::Air.id(),
    }; 256];
    for block in BlockType::ALL {
        table[block.id() as usize] = BlockInfo {
            glow: block.glow(),
            dim: block.dim(),
            decay: block.decay().id(),
        };
    }
    table
});

pub fn info(id: BlockId) -> BlockInfo {
    BLOCK_TABLE[id as usize]
}

pub fn glow(id: BlockId) -> u8 {
    info(id).glow
}

pub fn dim(id: BlockId) -> u8 {
    info(id).dim
}

pub fn decay(id: BlockId) -> BlockId {
    info(id).decay
}

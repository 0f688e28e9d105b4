use crate::constants::*;
use crate::core::block::{self, BlockId};
use crate::core::damage::{DamagePayload, DamageTracker, LocalPos};
use crate::core::section::Section;

const AIR: BlockId = 0;

#[inline]
fn column_index(x: usize, z: usize) -> usize {
    z * CHUNK_SIZE as usize + x
}

#[inline]
fn light_index(x: usize, y: usize, z: usize) -> usize {
    (y * CHUNK_SIZE as usize + z) * CHUNK_SIZE as usize + x
}

fn in_bounds(x: i32, y: i32, z: i32) -> bool {
    (0..CHUNK_SIZE).contains(&x) && (0..WORLD_HEIGHT).contains(&y) && (0..CHUNK_SIZE).contains(&z)
}

/// A 16x16x256 column of blocks, stored as up to 16 stacked sections.
///
/// Missing sections read as air with full skylight. Every mutating call
/// returns `true` only when it moved the chunk from clean to dirty, so the
/// owner knows when to hand it to the cache's dirty tier.
pub struct Chunk {
    pub x: i32,
    pub z: i32,
    sections: [Option<Section>; NUM_SECTIONS as usize],
    heightmap: [u8; COLUMN_COUNT],
    blocklight: Box<[u8]>,
    populated: bool,
    dirty: bool,
    version: u64,
    damage: DamageTracker,
}

impl Chunk {
    pub fn new(x: i32, z: i32) -> Self {
        Chunk {
            x,
            z,
            sections: std::array::from_fn(|_| None),
            heightmap: [0; COLUMN_COUNT],
            blocklight: vec![0; CHUNK_VOLUME].into_boxed_slice(),
            populated: false,
            dirty: false,
            version: 0,
            damage: DamageTracker::default(),
        }
    }

    /// Rebuilds a chunk from stored parts. The result is clean.
    pub fn from_parts(
        x: i32,
        z: i32,
        sections: [Option<Section>; NUM_SECTIONS as usize],
        heightmap: [u8; COLUMN_COUNT],
        blocklight: Box<[u8]>,
        populated: bool,
    ) -> Self {
        debug_assert_eq!(blocklight.len(), CHUNK_VOLUME);
        Chunk {
            x,
            z,
            sections,
            heightmap,
            blocklight,
            populated,
            dirty: false,
            version: 0,
            damage: DamageTracker::default(),
        }
    }

    pub fn coords(&self) -> (i32, i32) {
        (self.x, self.z)
    }

    pub fn sections(&self) -> &[Option<Section>; NUM_SECTIONS as usize] {
        &self.sections
    }

    pub fn heightmap(&self) -> &[u8; COLUMN_COUNT] {
        &self.heightmap
    }

    pub fn blocklight(&self) -> &[u8] {
        &self.blocklight
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// One-way: a populated chunk never goes back to being a skeleton.
    pub fn set_populated(&mut self) {
        self.populated = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Bumped on every mutation; lets a flush tell whether the snapshot it
    /// wrote is still current.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` on the clean to dirty transition only.
    pub fn mark_dirty(&mut self) -> bool {
        self.version += 1;
        let became_dirty = !self.dirty;
        self.dirty = true;
        became_dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn section_mut(&mut self, y: usize) -> &mut Section {
        self.sections[y / SECTION_HEIGHT as usize].get_or_insert_with(Section::new)
    }

    #[inline]
    fn raw_block(&self, x: usize, y: usize, z: usize) -> BlockId {
        match &self.sections[y / SECTION_HEIGHT as usize] {
            Some(section) => section.get_block(x, y % SECTION_HEIGHT as usize, z),
            None => AIR,
        }
    }

    #[inline]
    fn raw_skylight(&self, x: usize, y: usize, z: usize) -> u8 {
        match &self.sections[y / SECTION_HEIGHT as usize] {
            Some(section) => section.get_skylight(x, y % SECTION_HEIGHT as usize, z),
            None => MAX_LIGHT,
        }
    }

    fn write_skylight(&mut self, x: usize, y: usize, z: usize, light: u8) {
        let sy = y / SECTION_HEIGHT as usize;
        if self.sections[sy].is_none() && light == MAX_LIGHT {
            return;
        }
        self.section_mut(y)
            .set_skylight(x, y % SECTION_HEIGHT as usize, z, light);
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> BlockId {
        if !in_bounds(x, y, z) {
            tracing::warn!(chunk_x = self.x, chunk_z = self.z, x, y, z, "get_block out of range");
            return AIR;
        }
        self.raw_block(x as usize, y as usize, z as usize)
    }

    pub fn get_metadata(&self, x: i32, y: i32, z: i32) -> u8 {
        if !in_bounds(x, y, z) {
            tracing::warn!(chunk_x = self.x, chunk_z = self.z, x, y, z, "get_metadata out of range");
            return 0;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        match &self.sections[y / SECTION_HEIGHT as usize] {
            Some(section) => section.get_metadata(x, y % SECTION_HEIGHT as usize, z),
            None => 0,
        }
    }

    pub fn get_skylight(&self, x: i32, y: i32, z: i32) -> u8 {
        if !in_bounds(x, y, z) {
            return if y >= WORLD_HEIGHT { MAX_LIGHT } else { 0 };
        }
        self.raw_skylight(x as usize, y as usize, z as usize)
    }

    pub fn get_blocklight(&self, x: i32, y: i32, z: i32) -> u8 {
        if !in_bounds(x, y, z) {
            return 0;
        }
        self.blocklight[light_index(x as usize, y as usize, z as usize)]
    }

    /// Height of the topmost non-air block in a column, 0 when empty.
    pub fn height_at(&self, x: i32, z: i32) -> u8 {
        if !(0..CHUNK_SIZE).contains(&x) || !(0..CHUNK_SIZE).contains(&z) {
            return 0;
        }
        self.heightmap[column_index(x as usize, z as usize)]
    }

    /// Places a block, keeping heightmap and lighting up to date
    /// incrementally. Out-of-range coordinates are rejected with a warning.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block: BlockId) -> bool {
        if !in_bounds(x, y, z) {
            tracing::warn!(chunk_x = self.x, chunk_z = self.z, x, y, z, block, "set_block out of range");
            return false;
        }
        let (ux, uy, uz) = (x as usize, y as usize, z as usize);
        if self.raw_block(ux, uy, uz) == block {
            return false;
        }

        let local_y = uy % SECTION_HEIGHT as usize;
        self.section_mut(uy).set_block(ux, local_y, uz, block);

        let column = column_index(ux, uz);
        let height = self.heightmap[column] as usize;
        if block != AIR {
            if uy >= height {
                self.heightmap[column] = uy as u8;
            }
        } else if uy == height {
            self.heightmap[column] = (0..uy)
                .rev()
                .find(|&cy| self.raw_block(ux, cy, uz) != AIR)
                .unwrap_or(0) as u8;
        }

        let strength = block::glow(block);
        if strength > 0 {
            self.composite_glow(ux, uy, uz, strength);
        }

        self.relight_cell(ux, uy, uz);

        self.damage.damage((ux as u8, uy as u8, uz as u8));
        self.mark_dirty()
    }

    pub fn set_metadata(&mut self, x: i32, y: i32, z: i32, metadata: u8) -> bool {
        if !in_bounds(x, y, z) {
            tracing::warn!(chunk_x = self.x, chunk_z = self.z, x, y, z, "set_metadata out of range");
            return false;
        }
        if self.get_metadata(x, y, z) == metadata {
            return false;
        }
        let (ux, uy, uz) = (x as usize, y as usize, z as usize);
        self.section_mut(uy)
            .set_metadata(ux, uy % SECTION_HEIGHT as usize, uz, metadata);
        self.damage.damage((ux as u8, uy as u8, uz as u8));
        self.mark_dirty()
    }

    /// Replaces a block with whatever it decays into and zeroes its
    /// metadata. Destroying air does nothing.
    pub fn destroy(&mut self, x: i32, y: i32, z: i32) -> bool {
        let current = self.get_block(x, y, z);
        if current == AIR {
            return false;
        }
        let became_dirty = self.set_block(x, y, z, block::decay(current));
        self.set_metadata(x, y, z, 0) || became_dirty
    }

    /// Additively spreads an emitter's light over the blocklight array.
    fn composite_glow(&mut self, x: usize, y: usize, z: usize, strength: u8) {
        let reach = strength as i32 - 1;
        let (x, y, z) = (x as i32, y as i32, z as i32);
        for dy in -reach..=reach {
            let ty = y + dy;
            if !(0..WORLD_HEIGHT).contains(&ty) {
                continue;
            }
            for dz in -reach..=reach {
                let tz = z + dz;
                if !(0..CHUNK_SIZE).contains(&tz) {
                    continue;
                }
                for dx in -reach..=reach {
                    let tx = x + dx;
                    if !(0..CHUNK_SIZE).contains(&tx) {
                        continue;
                    }
                    let distance = dx.abs() + dy.abs() + dz.abs();
                    let intensity = strength as i32 - distance;
                    if intensity <= 0 {
                        continue;
                    }
                    let index = light_index(tx as usize, ty as usize, tz as usize);
                    let lit = self.blocklight[index] as i32 + intensity;
                    self.blocklight[index] = lit.min(MAX_LIGHT as i32) as u8;
                }
            }
        }
    }

    /// Single-cell skylight approximation from the six axis neighbours.
    fn relight_cell(&mut self, x: usize, y: usize, z: usize) {
        let mut brightest = if y + 1 >= WORLD_HEIGHT as usize {
            MAX_LIGHT
        } else {
            self.raw_skylight(x, y + 1, z)
        };
        if y > 0 {
            brightest = brightest.max(self.raw_skylight(x, y - 1, z));
        }
        if x > 0 {
            brightest = brightest.max(self.raw_skylight(x - 1, y, z));
        }
        if x + 1 < CHUNK_SIZE as usize {
            brightest = brightest.max(self.raw_skylight(x + 1, y, z));
        }
        if z > 0 {
            brightest = brightest.max(self.raw_skylight(x, y, z - 1));
        }
        if z + 1 < CHUNK_SIZE as usize {
            brightest = brightest.max(self.raw_skylight(x, y, z + 1));
        }
        let light = brightest
            .saturating_sub(block::dim(self.raw_block(x, y, z)))
            .min(MAX_LIGHT);
        self.write_skylight(x, y, z, light);
    }

    /// Full recomputation of heightmap, blocklight and skylight.
    ///
    /// Costs a pass over the whole column; meant for freshly generated or
    /// freshly loaded chunks, not for single edits.
    pub fn regenerate(&mut self) {
        self.regenerate_heightmap();
        self.regenerate_blocklight();
        self.regenerate_skylight();
    }

    fn regenerate_heightmap(&mut self) {
        for z in 0..CHUNK_SIZE as usize {
            for x in 0..CHUNK_SIZE as usize {
                let height = (0..WORLD_HEIGHT as usize)
                    .rev()
                    .find(|&y| self.raw_block(x, y, z) != AIR)
                    .unwrap_or(0);
                self.heightmap[column_index(x, z)] = height as u8;
            }
        }
    }

    fn regenerate_blocklight(&mut self) {
        self.blocklight.fill(0);
        let mut emitters = Vec::new();
        for (sy, section) in self.sections.iter().enumerate() {
            let Some(section) = section else { continue };
            for (i, &id) in section.blocks.iter().enumerate() {
                let strength = block::glow(id);
                if strength > 0 {
                    let x = i % CHUNK_SIZE as usize;
                    let z = (i / CHUNK_SIZE as usize) % CHUNK_SIZE as usize;
                    let y = sy * SECTION_HEIGHT as usize + i / (CHUNK_SIZE * CHUNK_SIZE) as usize;
                    emitters.push((x, y, z, strength));
                }
            }
        }
        for (x, y, z, strength) in emitters {
            self.composite_glow(x, y, z, strength);
        }
    }

    fn regenerate_skylight(&mut self) {
        for z in 0..CHUNK_SIZE as usize {
            for x in 0..CHUNK_SIZE as usize {
                let mut light = MAX_LIGHT;
                for y in (0..WORLD_HEIGHT as usize).rev() {
                    light = light.saturating_sub(block::dim(self.raw_block(x, y, z)));
                    self.write_skylight(x, y, z, light);
                    if light == 0 {
                        for below in 0..y {
                            self.write_skylight(x, below, z, 0);
                        }
                        break;
                    }
                }
            }
        }
    }

    pub fn damage(&mut self, x: i32, y: i32, z: i32) {
        if !in_bounds(x, y, z) {
            tracing::warn!(chunk_x = self.x, chunk_z = self.z, x, y, z, "damage out of range");
            return;
        }
        self.damage.damage((x as u8, y as u8, z as u8));
    }

    /// Marks the whole chunk as needing a resend.
    pub fn damage_all(&mut self) {
        self.damage.damage_all();
    }

    pub fn is_damaged(&self) -> bool {
        self.damage.is_damaged()
    }

    pub fn damage_tracker(&self) -> &DamageTracker {
        &self.damage
    }

    /// Current diff against the last sync. Reported again until
    /// `clear_damage` is called.
    pub fn get_damage_payload(&self) -> DamagePayload {
        match &self.damage {
            DamageTracker::All => DamagePayload::Whole,
            tracker if !tracker.is_damaged() => DamagePayload::None,
            tracker => {
                let mut cells: Vec<(LocalPos, u8, u8)> = tracker
                    .positions()
                    .map(|(x, y, z)| {
                        let (x, y, z) = (x as i32, y as i32, z as i32);
                        ((x as u8, y as u8, z as u8), self.get_block(x, y, z), self.get_metadata(x, y, z))
                    })
                    .collect();
                cells.sort_unstable_by_key(|(pos, _, _)| *pos);
                DamagePayload::Blocks(cells)
            }
        }
    }

    pub fn clear_damage(&mut self) {
        self.damage.clear();
    }

    /// Block ids of the column `(x, z)` from bottom to top.
    pub fn column(&self, x: i32, z: i32) -> Vec<BlockId> {
        (0..WORLD_HEIGHT).map(|y| self.get_block(x, y, z)).collect()
    }

    pub fn count_non_air(&self) -> usize {
        self.sections
            .iter()
            .flatten()
            .map(|section| section.blocks.iter().filter(|&&b| b != AIR).count())
            .sum()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("x", &self.x)
            .field("z", &self.z)
            .field("populated", &self.populated)
            .field("dirty", &self.dirty)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

//! Chunk generation stages
//!
//! A new chunk is run through an ordered list of stages, each filling in
//! part of the terrain. Stages declare which other stages they must run
//! before or after; `sort_stages` turns those declarations into a fixed
//! order once, before the list is handed to the world.

use std::sync::Arc;

use fastnoise_lite::{FastNoiseLite, FractalType, NoiseType};
use rustc_hash::FxHashMap;

use crate::constants::*;
use crate::core::block::{BlockId, BlockType};
use crate::core::chunk::Chunk;
use crate::error::StageError;

pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Stages that must run after this one.
    fn before(&self) -> &'static [&'static str] {
        &[]
    }

    /// Stages that must run before this one.
    fn after(&self) -> &'static [&'static str] {
        &[]
    }

    fn populate(&self, chunk: &mut Chunk, seed: u64);
}

pub type StageList = Arc<[Arc<dyn Stage>]>;

/// Heightfield of stone shaped by fractal simplex noise.
pub struct SimplexStage;

impl SimplexStage {
    fn create_fbm_noise(seed: u64, frequency: f32) -> FastNoiseLite {
        let mut noise = FastNoiseLite::with_seed(seed as i32);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_fractal_type(Some(FractalType::FBm));
        noise.set_fractal_octaves(Some(4));
        noise.set_fractal_lacunarity(Some(2.0));
        noise.set_fractal_gain(Some(0.5));
        noise.set_frequency(Some(frequency));
        noise
    }

    pub fn height(noise: &FastNoiseLite, world_x: i32, world_z: i32) -> i32 {
        let n = noise.get_noise_2d(world_x as f32, world_z as f32);
        (64.0 + n * 24.0).round().clamp(1.0, (WORLD_HEIGHT - 56) as f32) as i32
    }
}

impl Stage for SimplexStage {
    fn name(&self) -> &str {
        "simplex"
    }

    fn populate(&self, chunk: &mut Chunk, seed: u64) {
        let noise = Self::create_fbm_noise(seed, 0.008);
        let base_x = chunk.x * CHUNK_SIZE;
        let base_z = chunk.z * CHUNK_SIZE;
        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                let height = Self::height(&noise, base_x + lx, base_z + lz);
                for y in 0..height {
                    chunk.set_block(lx, y, lz, BlockType::Stone.id());
                }
            }
        }
    }
}

/// Floods air below sea level.
pub struct WatertableStage;

impl Stage for WatertableStage {
    fn name(&self) -> &str {
        "watertable"
    }

    fn after(&self) -> &'static [&'static str] {
        &["simplex", "flat"]
    }

    fn populate(&self, chunk: &mut Chunk, _seed: u64) {
        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                for y in (1..SEA_LEVEL).rev() {
                    if chunk.get_block(lx, y, lz) != BlockType::Air.id() {
                        break;
                    }
                    chunk.set_block(lx, y, lz, BlockType::Water.id());
                }
            }
        }
    }
}

/// Turns exposed stone into grass over a few layers of dirt.
pub struct GrassStage;

impl Stage for GrassStage {
    fn name(&self) -> &str {
        "grass"
    }

    fn after(&self) -> &'static [&'static str] {
        &["simplex", "flat", "watertable"]
    }

    fn populate(&self, chunk: &mut Chunk, _seed: u64) {
        let stone = BlockType::Stone.id();
        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                let top = chunk.height_at(lx, lz) as i32;
                if chunk.get_block(lx, top, lz) != stone {
                    continue;
                }
                chunk.set_block(lx, top, lz, BlockType::Grass.id());
                for y in (top - 3).max(1)..top {
                    if chunk.get_block(lx, y, lz) == stone {
                        chunk.set_block(lx, y, lz, BlockType::Dirt.id());
                    }
                }
            }
        }
    }
}

/// Bedrock floor, so nothing can fall out of the world.
pub struct SafetyStage;

impl Stage for SafetyStage {
    fn name(&self) -> &str {
        "safety"
    }

    fn after(&self) -> &'static [&'static str] {
        &["simplex", "flat", "watertable", "grass"]
    }

    fn populate(&self, chunk: &mut Chunk, _seed: u64) {
        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                chunk.set_block(lx, 0, lz, BlockType::Bedrock.id());
            }
        }
    }
}

/// Flat stone up to a fixed height.
pub struct FlatStage {
    pub height: i32,
    pub block: BlockId,
}

impl Default for FlatStage {
    fn default() -> Self {
        FlatStage {
            height: 60,
            block: BlockType::Stone.id(),
        }
    }
}

impl Stage for FlatStage {
    fn name(&self) -> &str {
        "flat"
    }

    fn populate(&self, chunk: &mut Chunk, _seed: u64) {
        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                for y in 0..self.height.clamp(0, WORLD_HEIGHT) {
                    chunk.set_block(lx, y, lz, self.block);
                }
            }
        }
    }
}

pub fn builtin_stage(name: &str) -> Option<Arc<dyn Stage>> {
    let stage: Arc<dyn Stage> = match name {
        "simplex" => Arc::new(SimplexStage),
        "watertable" => Arc::new(WatertableStage),
        "grass" => Arc::new(GrassStage),
        "safety" => Arc::new(SafetyStage),
        "flat" => Arc::new(FlatStage::default()),
        _ => return None,
    };
    Some(stage)
}

pub fn default_stage_names() -> Vec<String> {
    ["simplex", "watertable", "grass", "safety"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Looks up built-in stages by name and puts them in dependency order.
pub fn stages_from_names(names: &[String]) -> Result<StageList, StageError> {
    let stages = names
        .iter()
        .map(|name| builtin_stage(name).ok_or_else(|| StageError::Unknown(name.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sort_stages(stages)?.into())
}

/// Topological sort over the declared `before`/`after` relations.
///
/// References to stages that are not in the list are ignored. Among stages
/// that are free to run, input order wins, so the result is
/// deterministic.
pub fn sort_stages(stages: Vec<Arc<dyn Stage>>) -> Result<Vec<Arc<dyn Stage>>, StageError> {
    let index: FxHashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, stage)| (stage.name(), i))
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    let mut incoming = vec![0usize; stages.len()];
    for (i, stage) in stages.iter().enumerate() {
        for name in stage.before() {
            if let Some(&j) = index.get(name) {
                successors[i].push(j);
                incoming[j] += 1;
            }
        }
        for name in stage.after() {
            if let Some(&j) = index.get(name) {
                successors[j].push(i);
                incoming[i] += 1;
            }
        }
    }

    let mut placed = vec![false; stages.len()];
    let mut order = Vec::with_capacity(stages.len());
    while order.len() < stages.len() {
        let next = (0..stages.len()).find(|&i| !placed[i] && incoming[i] == 0);
        let Some(i) = next else {
            let stuck = (0..stages.len()).find(|&i| !placed[i]).unwrap_or(0);
            return Err(StageError::Cycle(stages[stuck].name().to_string()));
        };
        placed[i] = true;
        order.push(i);
        for &j in &successors[i] {
            incoming[j] -= 1;
        }
    }

    let mut slots: Vec<Option<Arc<dyn Stage>>> = stages.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static [&'static str], &'static [&'static str]);

    impl Stage for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn before(&self) -> &'static [&'static str] {
            self.1
        }
        fn after(&self) -> &'static [&'static str] {
            self.2
        }
        fn populate(&self, _chunk: &mut Chunk, _seed: u64) {}
    }

    fn names(stages: &[Arc<dyn Stage>]) -> Vec<String> {
        stages.iter().map(|s| s.name().to_string()).collect()
    }

    #[test]
    fn test_builtin_order_is_resolved() {
        let names_in = vec![
            "safety".to_string(),
            "grass".to_string(),
            "watertable".to_string(),
            "simplex".to_string(),
        ];
        let stages = stages_from_names(&names_in).unwrap();
        assert_eq!(names(&stages), vec!["simplex", "watertable", "grass", "safety"]);
    }

    #[test]
    fn test_before_and_after_both_count() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(Named("c", &[], &["b"])),
            Arc::new(Named("b", &[], &[])),
            Arc::new(Named("a", &["b"], &[])),
        ];
        assert_eq!(names(&sort_stages(stages).unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_and_unknown_rejected() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(Named("a", &["b"], &[])),
            Arc::new(Named("b", &["a"], &[])),
        ];
        assert!(matches!(sort_stages(stages), Err(StageError::Cycle(_))));
        assert_eq!(
            stages_from_names(&["nope".to_string()]).err(),
            Some(StageError::Unknown("nope".to_string()))
        );
    }

    #[test]
    fn test_default_pipeline_builds_sane_terrain() {
        let stages = stages_from_names(&default_stage_names()).unwrap();
        let mut chunk = Chunk::new(3, -8);
        for stage in stages.iter() {
            stage.populate(&mut chunk, 1234);
        }
        chunk.regenerate();
        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                assert_eq!(chunk.get_block(x, 0, z), BlockType::Bedrock.id());
                let top = chunk.height_at(x, z) as i32;
                assert!(top >= SEA_LEVEL - 1 || chunk.get_block(x, SEA_LEVEL - 1, z) != 0);
                assert_eq!(chunk.get_block(x, top + 1, z), BlockType::Air.id());
            }
        }
    }

    #[test]
    fn test_simplex_is_seeded() {
        let mut a = Chunk::new(0, 0);
        let mut b = Chunk::new(0, 0);
        SimplexStage.populate(&mut a, 1);
        SimplexStage.populate(&mut b, 1);
        assert_eq!(a.heightmap(), b.heightmap());
    }
}

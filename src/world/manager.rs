//! World orchestration
//!
//! `World` owns the chunk cache and the single-flight table of in-flight
//! loads. A request for a chunk that is not resident either joins the load
//! already running for that coordinate or starts one; the load reads the
//! chunk from storage, or generates it when storage has never seen it, and
//! hands the same instance to every waiter. Edited chunks sit in the dirty
//! tier until the flusher writes them back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::constants::*;
use crate::core::block::BlockId;
use crate::core::chunk::Chunk;
use crate::error::{StageError, WorldError};
use crate::storage::ChunkSerializer;
use crate::utils::settings::{LevelData, WorldSettings};
use crate::world::cache::ChunkCache;
use crate::world::generator::{StageList, stages_from_names};
use crate::world::pending::{LoadResult, PendingTable};
use crate::world::season::Season;
use crate::world::{ChunkPos, ChunkRef, split_block_coord};

/// Runs once for every chunk that becomes available, before any requester
/// sees it.
pub type PostLoadHook = Arc<dyn Fn(&ChunkRef) + Send + Sync>;

pub struct WorldConfig {
    pub seed: u64,
    pub stages: StageList,
    pub season: Option<Arc<dyn Season>>,
    pub post_load: Option<PostLoadHook>,
    pub dirty_high_water: usize,
    pub flush_burst: usize,
}

impl WorldConfig {
    pub fn new(seed: u64, stages: StageList) -> Self {
        Self {
            seed,
            stages,
            season: None,
            post_load: None,
            dirty_high_water: DEFAULT_DIRTY_HIGH_WATER,
            flush_burst: DEFAULT_FLUSH_BURST,
        }
    }

    pub fn from_settings(settings: &WorldSettings, level: &LevelData) -> Result<Self, StageError> {
        let stages = stages_from_names(&settings.generation.stages)?;
        let mut config = Self::new(level.seed, stages);
        config.season = settings.season.map(|kind| Arc::from(kind.season()));
        config.dirty_high_water = settings.persistence.dirty_high_water;
        config.flush_burst = settings.persistence.flush_burst.max(1);
        Ok(config)
    }

    pub fn with_season(mut self, season: Arc<dyn Season>) -> Self {
        self.season = Some(season);
        self
    }

    pub fn with_post_load(mut self, hook: PostLoadHook) -> Self {
        self.post_load = Some(hook);
        self
    }

    pub fn with_flush_limits(mut self, dirty_high_water: usize, flush_burst: usize) -> Self {
        self.dirty_high_water = dirty_high_water;
        self.flush_burst = flush_burst.max(1);
        self
    }
}

/// What a single flush step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was dirty.
    Idle,
    /// Saving is switched off.
    Suspended,
    /// The payload was written. The chunk stays dirty if it was edited
    /// while the write was in flight.
    Saved(ChunkPos),
    /// Serializing or writing failed; the chunk stays dirty.
    Failed(ChunkPos),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorldStats {
    pub resident: usize,
    pub pinned: usize,
    pub dirty: usize,
    pub pending: usize,
    pub loaded: usize,
    pub generated: usize,
}

#[derive(Default)]
struct WorldState {
    cache: ChunkCache,
    pending: PendingTable,
    over_high_water: bool,
}

pub struct World {
    serializer: Arc<dyn ChunkSerializer>,
    seed: u64,
    stages: StageList,
    season: RwLock<Option<Arc<dyn Season>>>,
    post_load: Option<PostLoadHook>,
    // Lock order: `state` before any chunk lock. Never held across an await.
    state: Mutex<WorldState>,
    saving: AtomicBool,
    flushing: tokio::sync::Mutex<()>,
    dirty_high_water: usize,
    flush_burst: usize,
    loaded: AtomicUsize,
    generated: AtomicUsize,
}

/// Resolves the pending entry with `Abandoned` if a load task dies before
/// delivering its result, so later requests do not wait on a dead entry.
struct LoadGuard {
    world: Arc<World>,
    pos: ChunkPos,
    armed: bool,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if self.armed {
            let (x, z) = self.pos;
            tracing::error!(x, z, "chunk load ended without a result");
            self.world
                .state
                .lock()
                .pending
                .resolve(self.pos, Err(WorldError::Abandoned { x, z }));
        }
    }
}

impl World {
    pub fn new(serializer: Arc<dyn ChunkSerializer>, config: WorldConfig) -> Arc<Self> {
        tracing::info!(
            "World created: serializer {}, seed {}, {} generation stages",
            serializer.name(),
            config.seed,
            config.stages.len()
        );
        Arc::new(Self {
            serializer,
            seed: config.seed,
            stages: config.stages,
            season: RwLock::new(config.season),
            post_load: config.post_load,
            state: Mutex::new(WorldState::default()),
            saving: AtomicBool::new(true),
            flushing: tokio::sync::Mutex::new(()),
            dirty_high_water: config.dirty_high_water,
            flush_burst: config.flush_burst.max(1),
            loaded: AtomicUsize::new(0),
            generated: AtomicUsize::new(0),
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn serializer(&self) -> &Arc<dyn ChunkSerializer> {
        &self.serializer
    }

    /// Returns the single live instance for `(x, z)`, loading or generating
    /// it if it is not resident.
    ///
    /// Concurrent callers for the same coordinate share one load and all
    /// receive the same chunk, or the same error. The load runs on its own
    /// task, so dropping the returned future does not cancel it.
    pub async fn request_chunk(self: &Arc<Self>, x: i32, z: i32) -> Result<ChunkRef, WorldError> {
        let pos = (x, z);
        let subscription = {
            let mut state = self.state.lock();
            if let Some(chunk) = state.cache.get(pos) {
                return Ok(chunk);
            }
            state.pending.subscribe(pos)
        };

        if subscription.is_leader {
            let world = Arc::clone(self);
            tokio::spawn(async move {
                let mut guard = LoadGuard {
                    world: Arc::clone(&world),
                    pos,
                    armed: true,
                };
                let result = world.load_or_generate(x, z).await;
                world.publish(pos, result);
                guard.armed = false;
            });
        }

        subscription
            .receiver
            .await
            .unwrap_or(Err(WorldError::Abandoned { x, z }))
    }

    /// Returns the chunk only if it is already resident.
    pub fn get_loaded(&self, x: i32, z: i32) -> Option<ChunkRef> {
        self.state.lock().cache.get((x, z))
    }

    pub fn is_resident(&self, x: i32, z: i32) -> bool {
        self.state.lock().cache.contains((x, z))
    }

    async fn load_or_generate(&self, x: i32, z: i32) -> LoadResult {
        let chunk = match self.serializer.load_chunk(x, z).await {
            Ok(chunk) => {
                self.loaded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(x, z, "chunk loaded from storage");
                chunk
            }
            Err(e) if e.is_not_found() => self.generate(x, z).await?,
            Err(e) => {
                tracing::error!(x, z, error = %e, "chunk load failed");
                return Err(WorldError::Load {
                    x,
                    z,
                    source: Arc::new(e),
                });
            }
        };

        let season = self.season.read().clone();
        let mut chunk = tokio::task::spawn_blocking(move || {
            let mut chunk = chunk;
            chunk.set_populated();
            if let Some(season) = season {
                season.transform(&mut chunk);
            }
            // Nobody has seen this chunk yet, so there is nothing to diff against.
            chunk.clear_damage();
            chunk
        })
        .await
        .map_err(|e| WorldError::Generation {
            x,
            z,
            reason: e.to_string(),
        })?;
        chunk.mark_dirty();

        let chunk: ChunkRef = Arc::new(RwLock::new(chunk));
        if let Some(hook) = &self.post_load {
            hook(&chunk);
        }
        Ok(chunk)
    }

    async fn generate(&self, x: i32, z: i32) -> Result<Chunk, WorldError> {
        let stages = Arc::clone(&self.stages);
        let seed = self.seed;
        let chunk = tokio::task::spawn_blocking(move || {
            let mut chunk = Chunk::new(x, z);
            for stage in stages.iter() {
                stage.populate(&mut chunk, seed);
            }
            chunk.regenerate();
            chunk.clear_damage();
            chunk
        })
        .await
        .map_err(|e| {
            tracing::error!(x, z, error = %e, "chunk generation failed");
            WorldError::Generation {
                x,
                z,
                reason: e.to_string(),
            }
        })?;
        self.generated.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(x, z, "chunk generated");
        Ok(chunk)
    }

    /// Makes a finished load visible. Cache insertion and waking the
    /// subscribers happen under one lock, so no request can miss both. If an
    /// instance is already resident the waiters get that one instead.
    fn publish(&self, pos: ChunkPos, result: LoadResult) {
        let mut state = self.state.lock();
        let result = result.map(|chunk| match state.cache.get(pos) {
            Some(live) if !Arc::ptr_eq(&live, &chunk) => {
                let (x, z) = pos;
                tracing::warn!(x, z, "chunk already resident, dropping the loaded copy");
                live
            }
            _ => {
                state.cache.dirtied(pos, &chunk);
                chunk
            }
        });
        state.pending.resolve(pos, result);
    }

    /// Runs `edit` on the live instance of the chunk and records it in the
    /// dirty tier if the edit dirtied it. A handle that was evicted and
    /// reloaded since it was obtained is redirected to the resident copy.
    ///
    /// `edit` runs under the chunk's write lock; it must not call back into
    /// the `World`.
    pub fn edit_chunk<R>(&self, chunk: &ChunkRef, edit: impl FnOnce(&mut Chunk) -> R) -> R {
        let pos = chunk.read().coords();
        let state = self.state.lock();
        let target = match state.cache.get(pos) {
            Some(live) if !Arc::ptr_eq(&live, chunk) => {
                let (x, z) = pos;
                tracing::warn!(x, z, "edit through a stale chunk handle, using the resident copy");
                live
            }
            _ => Arc::clone(chunk),
        };
        let mut guard = target.write();
        drop(state);

        let result = edit(&mut guard);
        let dirty = guard.is_dirty();
        drop(guard);
        if dirty {
            self.state.lock().cache.dirtied(pos, &target);
        }
        result
    }

    pub async fn get_block(self: &Arc<Self>, x: i32, y: i32, z: i32) -> Result<BlockId, WorldError> {
        let ((cx, lx), (cz, lz)) = (split_block_coord(x), split_block_coord(z));
        let chunk = self.request_chunk(cx, cz).await?;
        let id = chunk.read().get_block(lx, y, lz);
        Ok(id)
    }

    pub async fn get_metadata(self: &Arc<Self>, x: i32, y: i32, z: i32) -> Result<u8, WorldError> {
        let ((cx, lx), (cz, lz)) = (split_block_coord(x), split_block_coord(z));
        let chunk = self.request_chunk(cx, cz).await?;
        let metadata = chunk.read().get_metadata(lx, y, lz);
        Ok(metadata)
    }

    /// Returns `true` if the block changed.
    pub async fn set_block(self: &Arc<Self>, x: i32, y: i32, z: i32, block: BlockId) -> Result<bool, WorldError> {
        self.edit_at(x, z, |chunk, lx, lz| {
            let before = chunk.version();
            chunk.set_block(lx, y, lz, block);
            chunk.version() != before
        })
        .await
    }

    pub async fn set_metadata(self: &Arc<Self>, x: i32, y: i32, z: i32, metadata: u8) -> Result<bool, WorldError> {
        self.edit_at(x, z, |chunk, lx, lz| {
            let before = chunk.version();
            chunk.set_metadata(lx, y, lz, metadata);
            chunk.version() != before
        })
        .await
    }

    /// Replaces the block with its decay product.
    pub async fn destroy(self: &Arc<Self>, x: i32, y: i32, z: i32) -> Result<bool, WorldError> {
        self.edit_at(x, z, |chunk, lx, lz| {
            let before = chunk.version();
            chunk.destroy(lx, y, lz);
            chunk.version() != before
        })
        .await
    }

    async fn edit_at<R>(
        self: &Arc<Self>,
        x: i32,
        z: i32,
        edit: impl FnOnce(&mut Chunk, i32, i32) -> R,
    ) -> Result<R, WorldError> {
        let ((cx, lx), (cz, lz)) = (split_block_coord(x), split_block_coord(z));
        let chunk = self.request_chunk(cx, cz).await?;
        Ok(self.edit_chunk(&chunk, |c| edit(c, lx, lz)))
    }

    /// Keeps the chunk resident regardless of its dirty state.
    pub async fn pin(self: &Arc<Self>, x: i32, z: i32) -> Result<ChunkRef, WorldError> {
        let chunk = self.request_chunk(x, z).await?;
        Ok(self.state.lock().cache.pin((x, z), &chunk))
    }

    /// Releases a pin. A clean chunk leaves the cache with it.
    pub fn unpin(&self, x: i32, z: i32) -> bool {
        self.state.lock().cache.unpin((x, z)).is_some()
    }

    pub fn is_pinned(&self, x: i32, z: i32) -> bool {
        self.state.lock().cache.is_pinned((x, z))
    }

    /// Loads and pins the square of chunks around `center`. Every chunk is
    /// attempted; the first error is returned.
    pub async fn warm(self: &Arc<Self>, center: ChunkPos, radius: i32) -> Result<usize, WorldError> {
        let mut requests = Vec::new();
        for x in center.0 - radius..=center.0 + radius {
            for z in center.1 - radius..=center.1 + radius {
                let world = Arc::clone(self);
                requests.push(tokio::spawn(async move { world.pin(x, z).await }));
            }
        }

        let mut pinned = 0;
        let mut first_error = None;
        for (request, (x, z)) in requests.into_iter().zip(square(center, radius)) {
            match request.await {
                Ok(Ok(_)) => pinned += 1,
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(WorldError::Abandoned { x, z });
                }
            }
        }
        tracing::info!("Pinned {} chunks around {:?}", pinned, center);
        match first_error {
            Some(e) => Err(e),
            None => Ok(pinned),
        }
    }

    pub fn season(&self) -> Option<Arc<dyn Season>> {
        self.season.read().clone()
    }

    /// Switches the overlay and applies it to every resident chunk. Chunks
    /// loaded later pick it up as they arrive.
    pub fn set_season(&self, season: Option<Arc<dyn Season>>) {
        if let Some(season) = &season {
            tracing::info!("Season changed to {}", season.name());
        }
        *self.season.write() = season.clone();
        let Some(season) = season else {
            return;
        };
        let resident = self.state.lock().cache.resident();
        let mut changed = 0;
        for (_, chunk) in &resident {
            if self.edit_chunk(chunk, |c| season.transform(c)) {
                changed += 1;
            }
        }
        tracing::debug!(changed, resident = resident.len(), "season applied to resident chunks");
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }

    /// Stops all writes. Edits still accumulate in the dirty tier.
    pub fn save_off(&self) {
        if self.saving.swap(false, Ordering::SeqCst) {
            tracing::info!("Saving disabled");
        }
    }

    pub fn save_on(&self) {
        if !self.saving.swap(true, Ordering::SeqCst) {
            tracing::info!("Saving enabled");
        }
    }

    /// Writes the next dirty chunk.
    ///
    /// The payload is built under a read lock, which is released before the
    /// write. The chunk is only marked clean if it was not edited in the
    /// meantime and nobody holds it at that moment; otherwise, or on
    /// failure, it stays dirty and is retried later.
    pub async fn flush_one(&self) -> FlushOutcome {
        if !self.is_saving() {
            return FlushOutcome::Suspended;
        }
        let _flushing = self.flushing.lock().await;

        let next = self.state.lock().cache.next_dirty();
        let Some((pos, chunk)) = next else {
            return FlushOutcome::Idle;
        };
        let (x, z) = pos;

        let snapshot = {
            let guard = chunk.read();
            self.serializer
                .serialize_chunk(&guard)
                .map(|payload| (payload, guard.version()))
        };
        let (payload, version) = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(x, z, error = %e, "failed to serialize chunk");
                return FlushOutcome::Failed(pos);
            }
        };

        if let Err(e) = self.serializer.save_payload(x, z, payload).await {
            tracing::error!(x, z, error = %e, "failed to save chunk, will retry");
            return FlushOutcome::Failed(pos);
        }

        // A chunk held elsewhere stays dirty and is written again later.
        let mut state = self.state.lock();
        let cleaned = match chunk.try_write() {
            Some(mut guard) if guard.version() == version => {
                guard.mark_clean();
                true
            }
            _ => false,
        };
        if cleaned {
            state.cache.cleaned(pos, &chunk);
        }
        tracing::trace!(x, z, cleaned, "chunk flushed");
        FlushOutcome::Saved(pos)
    }

    /// One flusher tick: a single chunk normally, a burst while the dirty
    /// tier is above its high-water mark.
    pub async fn flush_tick(&self) -> usize {
        let budget = {
            let mut state = self.state.lock();
            let dirty = state.cache.dirty_len();
            let over = dirty > self.dirty_high_water;
            if over && !state.over_high_water {
                tracing::warn!(
                    "{} dirty chunks exceed the high-water mark of {}, flushing in bursts",
                    dirty,
                    self.dirty_high_water
                );
            } else if !over && state.over_high_water {
                tracing::info!("Dirty chunks back under the high-water mark");
            }
            state.over_high_water = over;
            if over { self.flush_burst } else { 1 }
        };

        let mut saved = 0;
        for _ in 0..budget {
            match self.flush_one().await {
                FlushOutcome::Saved(_) => saved += 1,
                FlushOutcome::Failed(_) => {}
                FlushOutcome::Idle | FlushOutcome::Suspended => break,
            }
        }
        saved
    }

    /// Flushes until nothing is dirty or a whole pass makes no progress.
    /// Returns how many chunks are still dirty.
    pub async fn flush_all(&self) -> usize {
        if !self.is_saving() {
            let dirty = self.dirty_len();
            tracing::warn!("Saving is off, {} dirty chunks not flushed", dirty);
            return dirty;
        }
        loop {
            let before = self.dirty_len();
            if before == 0 {
                return 0;
            }
            for _ in 0..before {
                if let FlushOutcome::Idle | FlushOutcome::Suspended = self.flush_one().await {
                    break;
                }
            }
            let after = self.dirty_len();
            if after >= before {
                tracing::warn!("{} chunks could not be flushed", after);
                return after;
            }
        }
    }

    /// Starts the periodic flusher. Abort the handle to stop it.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let world = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                world.flush_tick().await;
            }
        })
    }

    pub fn dirty_len(&self) -> usize {
        self.state.lock().cache.dirty_len()
    }

    pub fn stats(&self) -> WorldStats {
        let state = self.state.lock();
        WorldStats {
            resident: state.cache.len(),
            pinned: state.cache.pinned_len(),
            dirty: state.cache.dirty_len(),
            pending: state.pending.len(),
            loaded: self.loaded.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
        }
    }
}

fn square(center: ChunkPos, radius: i32) -> impl Iterator<Item = ChunkPos> {
    (center.0 - radius..=center.0 + radius)
        .flat_map(move |x| (center.1 - radius..=center.1 + radius).map(move |z| (x, z)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::BlockType;
    use crate::storage::MemorySerializer;
    use crate::world::generator::{FlatStage, Stage};
    use crate::world::season::Winter;

    struct CountingStage(Arc<AtomicUsize>);

    impl Stage for CountingStage {
        fn name(&self) -> &str {
            "counting"
        }

        fn populate(&self, chunk: &mut Chunk, _seed: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
            chunk.set_block(0, 1, 0, BlockType::Stone.id());
        }
    }

    struct PanickingStage;

    impl Stage for PanickingStage {
        fn name(&self) -> &str {
            "panicking"
        }

        fn populate(&self, _chunk: &mut Chunk, _seed: u64) {
            panic!("stage failed");
        }
    }

    fn flat_stages() -> StageList {
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(FlatStage::default())];
        stages.into()
    }

    fn world_with(serializer: Arc<MemorySerializer>, config: WorldConfig) -> Arc<World> {
        World::new(serializer, config)
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let serializer = Arc::new(MemorySerializer::with_load_delay(Duration::from_millis(50)));
        let world = world_with(serializer.clone(), WorldConfig::new(1, flat_stages()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let world = Arc::clone(&world);
            handles.push(tokio::spawn(async move { world.request_chunk(4, -2).await }));
        }
        let mut chunks = Vec::new();
        for handle in handles {
            chunks.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(serializer.load_count(), 1);
        assert!(chunks.iter().all(|c| Arc::ptr_eq(c, &chunks[0])));
        assert_eq!(world.stats().pending, 0);
        assert_eq!(world.stats().generated, 1);
    }

    #[tokio::test]
    async fn test_generation_runs_once_and_marks_dirty() {
        let runs = Arc::new(AtomicUsize::new(0));
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(CountingStage(runs.clone()))];
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer, WorldConfig::new(1, stages.into()));

        let a = world.request_chunk(0, 0).await.unwrap();
        let b = world.request_chunk(0, 0).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let chunk = a.read();
        assert!(chunk.is_populated());
        assert!(chunk.is_dirty());
        assert!(!chunk.is_damaged());
        assert_eq!(chunk.get_block(0, 1, 0), BlockType::Stone.id());
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_an_error_not_regenerated() {
        let runs = Arc::new(AtomicUsize::new(0));
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(CountingStage(runs.clone()))];
        let serializer = Arc::new(MemorySerializer::with_load_delay(Duration::from_millis(20)));
        serializer.insert_raw(2, 2, b"garbage".to_vec());
        let world = world_with(serializer.clone(), WorldConfig::new(1, stages.into()));

        let first = tokio::spawn({
            let world = Arc::clone(&world);
            async move { world.request_chunk(2, 2).await }
        });
        let second = world.request_chunk(2, 2).await;
        let first = first.await.unwrap();

        assert!(matches!(first, Err(WorldError::Load { .. })));
        assert!(matches!(second, Err(WorldError::Load { .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(serializer.load_count(), 1);
        assert!(!world.is_resident(2, 2));
        assert_eq!(world.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_flush_cleans_and_evicts_unpinned() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer.clone(), WorldConfig::new(1, flat_stages()));

        let chunk = world.request_chunk(1, 1).await.unwrap();
        assert_eq!(world.flush_one().await, FlushOutcome::Saved((1, 1)));
        assert!(!chunk.read().is_dirty());
        assert!(!world.is_resident(1, 1));
        assert_eq!(world.flush_one().await, FlushOutcome::Idle);

        // Next request reads back what was written instead of generating.
        let reloaded = world.request_chunk(1, 1).await.unwrap();
        assert!(!Arc::ptr_eq(&chunk, &reloaded));
        assert_eq!(world.stats().generated, 1);
        assert_eq!(world.stats().loaded, 1);
        assert_eq!(reloaded.read().get_block(3, 59, 3), BlockType::Stone.id());
    }

    #[tokio::test]
    async fn test_pinned_chunk_survives_flush() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer, WorldConfig::new(1, flat_stages()));

        let pinned = world.pin(0, 0).await.unwrap();
        world.flush_all().await;
        let again = world.request_chunk(0, 0).await.unwrap();
        assert!(Arc::ptr_eq(&pinned, &again));

        assert!(world.unpin(0, 0));
        assert!(!world.is_resident(0, 0));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_chunk_dirty() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer.clone(), WorldConfig::new(1, flat_stages()));
        world.request_chunk(0, 0).await.unwrap();

        serializer.set_fail_saves(true);
        assert_eq!(world.flush_one().await, FlushOutcome::Failed((0, 0)));
        assert_eq!(world.dirty_len(), 1);
        assert_eq!(world.flush_all().await, 1);

        serializer.set_fail_saves(false);
        assert_eq!(world.flush_all().await, 0);
        assert!(serializer.contains(0, 0));
    }

    #[tokio::test]
    async fn test_save_off_suspends_writes() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer.clone(), WorldConfig::new(1, flat_stages()));
        world.request_chunk(0, 0).await.unwrap();

        world.save_off();
        assert!(!world.is_saving());
        assert_eq!(world.flush_one().await, FlushOutcome::Suspended);
        assert_eq!(world.flush_tick().await, 0);
        assert_eq!(serializer.save_count(), 0);

        world.save_on();
        assert_eq!(world.flush_tick().await, 1);
        assert_eq!(serializer.save_count(), 1);
    }

    #[tokio::test]
    async fn test_block_edits_use_world_coordinates() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer, WorldConfig::new(1, flat_stages()));
        world.request_chunk(-1, 0).await.unwrap();
        world.flush_all().await;
        assert_eq!(world.dirty_len(), 0);

        assert!(world.set_block(-1, 70, 5, BlockType::Glowstone.id()).await.unwrap());
        assert!(!world.set_block(-1, 70, 5, BlockType::Glowstone.id()).await.unwrap());
        assert_eq!(world.get_block(-1, 70, 5).await.unwrap(), BlockType::Glowstone.id());
        assert!(world.is_resident(-1, 0));
        assert_eq!(world.dirty_len(), 1);

        let chunk = world.get_loaded(-1, 0).unwrap();
        assert_eq!(chunk.read().get_block(15, 70, 5), BlockType::Glowstone.id());

        assert!(world.set_metadata(-1, 70, 5, 3).await.unwrap());
        assert_eq!(world.get_metadata(-1, 70, 5).await.unwrap(), 3);
        assert!(world.destroy(-1, 70, 5).await.unwrap());
        assert_eq!(world.get_block(-1, 70, 5).await.unwrap(), BlockType::Air.id());
    }

    #[tokio::test]
    async fn test_edit_during_write_keeps_chunk_dirty() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer.clone(), WorldConfig::new(1, flat_stages()));
        let chunk = world.request_chunk(0, 0).await.unwrap();

        serializer.set_save_delay(Some(Duration::from_millis(50)));
        let flush = tokio::spawn({
            let world = Arc::clone(&world);
            async move { world.flush_one().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(world.set_block(1, 100, 1, BlockType::Stone.id()).await.unwrap());

        assert_eq!(flush.await.unwrap(), FlushOutcome::Saved((0, 0)));
        assert!(chunk.read().is_dirty());
        assert_eq!(world.dirty_len(), 1);

        serializer.set_save_delay(None);
        assert_eq!(world.flush_one().await, FlushOutcome::Saved((0, 0)));
        assert!(!chunk.read().is_dirty());
        assert_eq!(world.dirty_len(), 0);
    }

    #[tokio::test]
    async fn test_post_load_hook_runs_once_per_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook: PostLoadHook = {
            let calls = calls.clone();
            Arc::new(move |_chunk: &ChunkRef| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let serializer = Arc::new(MemorySerializer::with_load_delay(Duration::from_millis(20)));
        let world = world_with(serializer, WorldConfig::new(1, flat_stages()).with_post_load(hook));

        let other = tokio::spawn({
            let world = Arc::clone(&world);
            async move { world.request_chunk(0, 0).await }
        });
        world.request_chunk(0, 0).await.unwrap();
        other.await.unwrap().unwrap();
        world.request_chunk(0, 0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_stage_fails_every_waiter() {
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(PanickingStage)];
        let serializer = Arc::new(MemorySerializer::with_load_delay(Duration::from_millis(20)));
        let world = world_with(serializer, WorldConfig::new(1, stages.into()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let world = Arc::clone(&world);
            handles.push(tokio::spawn(async move { world.request_chunk(3, 3).await }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(WorldError::Generation { x: 3, z: 3, .. })));
        }
        assert_eq!(world.stats().pending, 0);
        assert!(!world.is_resident(3, 3));
    }

    #[tokio::test]
    async fn test_panicking_hook_abandons_every_waiter() {
        let hook: PostLoadHook = Arc::new(|chunk: &ChunkRef| {
            if chunk.read().coords() == (0, 0) {
                panic!("hook failed");
            }
        });
        let serializer = Arc::new(MemorySerializer::with_load_delay(Duration::from_millis(20)));
        let world = world_with(serializer, WorldConfig::new(1, flat_stages()).with_post_load(hook));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let world = Arc::clone(&world);
            handles.push(tokio::spawn(async move { world.request_chunk(0, 0).await }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(WorldError::Abandoned { x: 0, z: 0 })));
        }
        assert_eq!(world.stats().pending, 0);
        assert!(!world.is_resident(0, 0));

        // Other coordinates are unaffected.
        world.request_chunk(1, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_handle_edits_resident_copy() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer, WorldConfig::new(1, flat_stages()));

        let stale = world.request_chunk(0, 0).await.unwrap();
        assert_eq!(world.flush_one().await, FlushOutcome::Saved((0, 0)));
        assert!(!world.is_resident(0, 0));
        let live = world.request_chunk(0, 0).await.unwrap();
        assert!(!Arc::ptr_eq(&stale, &live));

        world.edit_chunk(&live, |c| c.set_block(1, 100, 1, BlockType::Stone.id()));
        world.edit_chunk(&stale, |c| c.set_block(2, 100, 2, BlockType::Glass.id()));
        assert!(Arc::ptr_eq(&world.get_loaded(0, 0).unwrap(), &live));
        assert_eq!(live.read().get_block(2, 100, 2), BlockType::Glass.id());
        assert_eq!(stale.read().get_block(2, 100, 2), BlockType::Air.id());

        assert_eq!(world.flush_all().await, 0);
        assert!(!world.is_resident(0, 0));
        let reloaded = world.request_chunk(0, 0).await.unwrap();
        let chunk = reloaded.read();
        assert_eq!(chunk.get_block(1, 100, 1), BlockType::Stone.id());
        assert_eq!(chunk.get_block(2, 100, 2), BlockType::Glass.id());
    }

    #[tokio::test]
    async fn test_season_applies_to_new_and_resident_chunks() {
        let serializer = Arc::new(MemorySerializer::new());
        let config = WorldConfig::new(1, flat_stages()).with_season(Arc::new(Winter));
        let world = world_with(serializer, config);

        let chunk = world.request_chunk(0, 0).await.unwrap();
        assert_eq!(chunk.read().get_block(0, 60, 0), BlockType::Snow.id());

        world.set_season(Some(Arc::new(crate::world::season::Spring)));
        assert_eq!(chunk.read().get_block(0, 60, 0), BlockType::Air.id());
        assert_eq!(world.season().map(|s| s.name().to_string()), Some("spring".to_string()));
    }

    #[tokio::test]
    async fn test_high_water_switches_to_bursts() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer, WorldConfig::new(1, flat_stages()).with_flush_limits(2, 3));
        for x in 0..5 {
            world.request_chunk(x, 0).await.unwrap();
        }
        assert_eq!(world.flush_tick().await, 3);
        assert_eq!(world.dirty_len(), 2);
        assert_eq!(world.flush_tick().await, 1);
        assert_eq!(world.dirty_len(), 1);
    }

    #[tokio::test]
    async fn test_warm_pins_square() {
        let serializer = Arc::new(MemorySerializer::new());
        let world = world_with(serializer, WorldConfig::new(1, flat_stages()));
        assert_eq!(world.warm((0, 0), 1).await.unwrap(), 9);
        assert_eq!(world.stats().pinned, 9);
        assert!(world.is_pinned(-1, 1));
    }
}

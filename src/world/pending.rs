//! Single-flight table of in-flight chunk loads.

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::error::WorldError;
use crate::world::{ChunkPos, ChunkRef};

pub type LoadResult = Result<ChunkRef, WorldError>;

/// Subscribers waiting on each in-flight load. An entry exists exactly
/// while one load for that coordinate is running.
#[derive(Default)]
pub struct PendingTable {
    waiting: FxHashMap<ChunkPos, Vec<oneshot::Sender<LoadResult>>>,
}

/// Result of joining the table: whether the caller has to start the load.
pub struct Subscription {
    pub is_leader: bool,
    pub receiver: oneshot::Receiver<LoadResult>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `pos`. The first subscriber becomes the
    /// leader and must start the load; later ones only wait.
    pub fn subscribe(&mut self, pos: ChunkPos) -> Subscription {
        let (tx, rx) = oneshot::channel();
        let mut is_leader = false;
        self.waiting
            .entry(pos)
            .or_insert_with(|| {
                is_leader = true;
                Vec::new()
            })
            .push(tx);
        Subscription {
            is_leader,
            receiver: rx,
        }
    }

    /// Hands the result to every subscriber and removes the entry.
    /// Returns how many subscribers were still listening.
    pub fn resolve(&mut self, pos: ChunkPos, result: LoadResult) -> usize {
        let Some(subscribers) = self.waiting.remove(&pos) else {
            return 0;
        };
        subscribers
            .into_iter()
            .map(|tx| tx.send(result.clone()).is_ok())
            .filter(|&sent| sent)
            .count()
    }

    pub fn is_pending(&self, pos: ChunkPos) -> bool {
        self.waiting.contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

//! Bounded record of edits made to a chunk since the last sync.

use rustc_hash::FxHashSet;

use crate::constants::DAMAGE_THRESHOLD;

/// Local block coordinate inside a chunk: `(x, y, z)`.
pub type LocalPos = (u8, u8, u8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DamageTracker {
    Blocks(FxHashSet<LocalPos>),
    All,
}

/// What a consumer has to resend to bring a peer up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DamagePayload {
    None,
    /// Individual cells: position, block id, metadata.
    Blocks(Vec<(LocalPos, u8, u8)>),
    Whole,
}

impl Default for DamageTracker {
    fn default() -> Self {
        DamageTracker::Blocks(FxHashSet::default())
    }
}

impl DamageTracker {
    pub fn damage(&mut self, pos: LocalPos) {
        if let DamageTracker::Blocks(set) = self {
            set.insert(pos);
            if set.len() > DAMAGE_THRESHOLD {
                *self = DamageTracker::All;
            }
        }
    }

    pub fn damage_all(&mut self) {
        *self = DamageTracker::All;
    }

    pub fn is_damaged(&self) -> bool {
        match self {
            DamageTracker::Blocks(set) => !set.is_empty(),
            DamageTracker::All => true,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, DamageTracker::All)
    }

    pub fn len(&self) -> usize {
        match self {
            DamageTracker::Blocks(set) => set.len(),
            DamageTracker::All => 0,
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = LocalPos> + '_ {
        let set = match self {
            DamageTracker::Blocks(set) => Some(set),
            DamageTracker::All => None,
        };
        set.into_iter().flat_map(|s| s.iter().copied())
    }

    pub fn clear(&mut self) {
        *self = DamageTracker::default();
    }
}

//! Thread-safe map of block-index → freshly allocated label block, used
//! when an update targets an unallocated region (spec §4.2). Only the
//! *map structure* needs global serialization; voxel mutation within an
//! already-created block goes through [`crate::stripe_lock::StripeLocks`],
//! so the hot path does not take this map's lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::FusionError;
use crate::grid::{Block, BlockIndex, GridGeometry, LabelGrid};

#[derive(Default)]
pub struct ScratchBlockMap {
    blocks: Mutex<HashMap<BlockIndex, Arc<Block>>>,
}

impl ScratchBlockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the scratch block for `idx`, allocating a zero-initialized
    /// one if none exists yet (spec §4.2 `get_or_create`).
    pub fn get_or_create(
        &self,
        idx: BlockIndex,
        geometry: GridGeometry,
    ) -> Result<Arc<Block>, FusionError> {
        let mut guard = self.blocks.lock().expect("scratch map lock poisoned");
        if let Some(existing) = guard.get(&idx) {
            return Ok(Arc::clone(existing));
        }
        let origin = geometry.origin_from_block_idx(idx);
        let block = Arc::new(Block::new_zeroed_at(origin, geometry.voxels_per_side));
        log::trace!("allocating scratch block {idx:?} at origin {origin:?}");
        if guard.insert(idx, Arc::clone(&block)).is_some() {
            // We just checked `idx` absent under the same lock acquisition;
            // finding a prior entry here means the map's own invariant is
            // broken (spec §7 internal invariant violation).
            return Err(FusionError::ScratchCollision { block: idx });
        }
        Ok(block)
    }

    /// Moves every scratch block into the live grid under its block
    /// index, then clears the scratch map (spec §4.2 `flush`).
    /// Single-threaded; must not race `get_or_create` or another `flush`.
    pub fn flush(&self, grid: &mut impl LabelGrid) {
        let mut guard = self.blocks.lock().expect("scratch map lock poisoned");
        for (idx, block) in guard.drain() {
            let owned = Arc::try_unwrap(block).unwrap_or_else(|shared| (*shared).clone());
            grid.insert_block(idx, owned);
        }
    }
}

//! The label grid contract this crate consumes (spec §6.2), plus a
//! reference in-memory implementation usable for tests and as a starting
//! adapter. The sparse grid *container* is external; what is specified
//! here is the small interface the rest of the crate needs from it.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};

use crate::label::LabelVoxel;
use crate::math::Point3;

/// Integer coordinates of a block in the sparse grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIndex(pub i32, pub i32, pub i32);

/// Integer coordinates of a voxel in the grid's global (not block-local) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalVoxelIndex(pub i64, pub i64, pub i64);

/// Offset of a voxel inside its owning block, each coordinate in
/// `0..voxels_per_side`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalVoxelIndex(pub u32, pub u32, pub u32);

/// A ray bundler's output: global voxel index → ordered list of point
/// indices into the segment that fell into it (spec §6.1 `bundle_rays`).
/// A [`BTreeMap`] (rather than a hash map) so that a pass's worker
/// partition iterates bundles in a fixed order regardless of process or
/// thread, which the determinism property (spec §8, invariant 9) needs
/// when `integrator_threads == 1`.
pub type BundleMap = BTreeMap<GlobalVoxelIndex, Vec<usize>>;

/// Geometry constants shared by the distance and label grids (spec §6.2).
#[derive(Debug, Clone, Copy)]
pub struct GridGeometry {
    pub voxel_size: f32,
    pub voxels_per_side: u32,
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self { voxel_size: 0.1, voxels_per_side: 16 }
    }
}

impl GridGeometry {
    pub fn block_size(&self) -> f32 {
        self.voxel_size * self.voxels_per_side as f32
    }

    pub fn global_voxel_idx_from_point(&self, p: Point3) -> GlobalVoxelIndex {
        GlobalVoxelIndex(
            (p.x / self.voxel_size).floor() as i64,
            (p.y / self.voxel_size).floor() as i64,
            (p.z / self.voxel_size).floor() as i64,
        )
    }

    pub fn block_idx_from_global_voxel_idx(&self, idx: GlobalVoxelIndex) -> BlockIndex {
        let n = self.voxels_per_side as i64;
        BlockIndex(
            idx.0.div_euclid(n) as i32,
            idx.1.div_euclid(n) as i32,
            idx.2.div_euclid(n) as i32,
        )
    }

    pub fn local_from_global_voxel_idx(&self, idx: GlobalVoxelIndex) -> LocalVoxelIndex {
        let n = self.voxels_per_side as i64;
        LocalVoxelIndex(
            idx.0.rem_euclid(n) as u32,
            idx.1.rem_euclid(n) as u32,
            idx.2.rem_euclid(n) as u32,
        )
    }

    pub fn origin_from_block_idx(&self, idx: BlockIndex) -> Point3 {
        let s = self.block_size();
        Point3::new(idx.0 as f32 * s, idx.1 as f32 * s, idx.2 as f32 * s)
    }
}

/// A fixed-edge cube of label voxels (spec §3).
///
/// Voxels are stored behind [`Cell`] rather than behind a lock: the stripe
/// locks in [`crate::stripe_lock`] are what make concurrent mutation
/// correct, exactly the way the teacher crate's own `LabelStore` type
/// allows lock-free concurrent writes to a `Box<[Cell<usize>]>` under an
/// external invariant (one writer per index at a time). `Block` is
/// therefore `Sync` by an explicit unsafe impl, not because the compiler
/// can prove it: callers outside this crate's own modules must hold the
/// corresponding stripe lock before calling [`Block::set`] or
/// [`Block::swap_label`].
#[derive(Debug, Clone)]
pub struct Block {
    voxels: Box<[Cell<LabelVoxel>]>,
    voxels_per_side: u32,
    origin: Point3,
    updated: Cell<bool>,
}

// SAFETY: concurrent access to distinct voxels is always safe (each Cell
// is independent); concurrent access to the *same* voxel is safe because
// every caller in this crate holds the corresponding stripe lock
// (`crate::stripe_lock::StripeLocks`) for the whole read-modify-write.
unsafe impl Sync for Block {}

impl Block {
    /// A zero-initialized block with no meaningful origin (`Point3::ZERO`).
    /// Prefer [`Block::new_zeroed_at`] wherever the block's origin in the
    /// grid is known, e.g. when allocating into the scratch map (spec §4.2).
    pub fn new_zeroed(voxels_per_side: u32) -> Self {
        Self::new_zeroed_at(Point3::ZERO, voxels_per_side)
    }

    /// A zero-initialized block anchored at `origin`, the world-frame
    /// corner derived from its block index and the grid's voxel size (spec
    /// §4.2: "a newly allocated, zero-initialized block with the correct
    /// origin derived from `block_idx` and voxel size").
    pub fn new_zeroed_at(origin: Point3, voxels_per_side: u32) -> Self {
        let n = (voxels_per_side as usize).pow(3);
        Self {
            voxels: (0..n).map(|_| Cell::new(LabelVoxel::default())).collect(),
            voxels_per_side,
            origin,
            updated: Cell::new(false),
        }
    }

    pub fn origin(&self) -> Point3 {
        self.origin
    }

    fn offset(&self, local: LocalVoxelIndex) -> usize {
        let n = self.voxels_per_side as usize;
        local.0 as usize + n * (local.1 as usize + n * local.2 as usize)
    }

    pub fn get(&self, local: LocalVoxelIndex) -> LabelVoxel {
        self.voxels[self.offset(local)].get()
    }

    /// Overwrites a voxel. Caller must hold the stripe lock for this
    /// voxel's global index (spec §4.1).
    pub fn set(&self, local: LocalVoxelIndex, voxel: LabelVoxel) {
        let off = self.offset(local);
        self.voxels[off].set(voxel);
        self.updated.set(true);
    }

    pub fn is_updated(&self) -> bool {
        self.updated.get()
    }

    pub fn for_each_voxel(&self, mut f: impl FnMut(LabelVoxel)) {
        for cell in self.voxels.iter() {
            f(cell.get());
        }
    }

    /// Rewrites every voxel bearing `old` to `new`, leaving confidence
    /// untouched (spec §4.6 `swapLabels`). Not thread-safe with
    /// concurrent integration.
    pub fn swap_label(&self, old: crate::label::Label, new: crate::label::Label) {
        for i in 0..self.voxels.len() {
            let mut v = self.voxels[i].get();
            if v.label == old {
                v.label = new;
                self.voxels[i].set(v);
                self.updated.set(true);
            }
        }
    }
}

/// The label grid contract (spec §6.2): allocation, lookup, and
/// iteration over allocated blocks.
///
/// Implementations must ensure structural insertion of a *new* block
/// into the live grid never races a lookup of that same block; the rest
/// of this crate upholds that by only inserting during the
/// single-threaded flush (spec §4.2, §4.7).
pub trait LabelGrid {
    fn geometry(&self) -> GridGeometry;
    fn block_by_index(&self, idx: BlockIndex) -> Option<&Block>;
    fn insert_block(&mut self, idx: BlockIndex, block: Block);
    fn all_allocated_blocks(&self) -> Vec<BlockIndex>;

    /// Convenience: the block containing a world-frame point, if allocated.
    fn block_by_coords(&self, point_g: Point3) -> Option<&Block> {
        let geometry = self.geometry();
        let global = geometry.global_voxel_idx_from_point(point_g);
        self.block_by_index(geometry.block_idx_from_global_voxel_idx(global))
    }

    /// Convenience: the voxel at a world-frame point, if its block is allocated.
    fn voxel_by_coords(&self, point_g: Point3) -> Option<LabelVoxel> {
        let geometry = self.geometry();
        let global = geometry.global_voxel_idx_from_point(point_g);
        let block_idx = geometry.block_idx_from_global_voxel_idx(global);
        let local = geometry.local_from_global_voxel_idx(global);
        self.block_by_index(block_idx).map(|b| b.get(local))
    }
}

/// A plain `HashMap`-backed [`LabelGrid`], usable directly in tests and
/// as a starting point for a real sparse-grid adapter.
#[derive(Debug)]
pub struct InMemoryLabelGrid {
    geometry: GridGeometry,
    blocks: HashMap<BlockIndex, Block>,
}

impl InMemoryLabelGrid {
    pub fn new(geometry: GridGeometry) -> Self {
        Self { geometry, blocks: HashMap::new() }
    }
}

impl LabelGrid for InMemoryLabelGrid {
    fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    fn block_by_index(&self, idx: BlockIndex) -> Option<&Block> {
        self.blocks.get(&idx)
    }

    fn insert_block(&mut self, idx: BlockIndex, block: Block) {
        self.blocks.insert(idx, block);
    }

    fn all_allocated_blocks(&self) -> Vec<BlockIndex> {
        self.blocks.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_to_block_and_back_roundtrips_origin() {
        let g = GridGeometry { voxel_size: 0.1, voxels_per_side: 8 };
        let idx = BlockIndex(2, -1, 0);
        let origin = g.origin_from_block_idx(idx);
        let global = g.global_voxel_idx_from_point(origin);
        assert_eq!(g.block_idx_from_global_voxel_idx(global), idx);
        assert_eq!(g.local_from_global_voxel_idx(global), LocalVoxelIndex(0, 0, 0));
    }

    #[test]
    fn negative_coordinates_floor_correctly() {
        let g = GridGeometry { voxel_size: 1.0, voxels_per_side: 4 };
        let global = g.global_voxel_idx_from_point(Point3::new(-0.5, -4.5, 0.0));
        assert_eq!(global, GlobalVoxelIndex(-1, -5, 0));
        let block_idx = g.block_idx_from_global_voxel_idx(global);
        assert_eq!(block_idx, BlockIndex(-1, -2, 0));
    }

    #[test]
    fn new_zeroed_at_records_its_origin() {
        let g = GridGeometry { voxel_size: 0.5, voxels_per_side: 8 };
        let idx = BlockIndex(1, -2, 3);
        let origin = g.origin_from_block_idx(idx);
        let block = Block::new_zeroed_at(origin, g.voxels_per_side);
        assert_eq!(block.origin(), origin);
    }

    #[test]
    fn block_swap_label_rewrites_all_matching_voxels() {
        let block = Block::new_zeroed(2);
        for z in 0u32..2 {
            for y in 0u32..2 {
                for x in 0u32..2 {
                    block.set(
                        LocalVoxelIndex(x, y, z),
                        LabelVoxel { label: crate::label::Label(1), confidence: crate::label::LabelConfidence(3) },
                    );
                }
            }
        }
        block.swap_label(crate::label::Label(1), crate::label::Label(2));
        block.for_each_voxel(|v| {
            assert_eq!(v.label, crate::label::Label(2));
            assert_eq!(v.confidence, crate::label::LabelConfidence(3));
        });
    }
}

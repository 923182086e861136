//! Label-merge application: rewriting every voxel bearing one label to
//! another (spec §4.6). The policy of *when* to merge (pairwise
//! co-occurrence bookkeeping, threshold) lives on
//! [`crate::worker_pool::FusionIntegrator`]; this module is just the
//! grid-wide rewrite itself, so it can be unit-tested without a whole
//! integrator.

use crate::grid::LabelGrid;
use crate::label::Label;

/// Rewrites every voxel bearing `old` to `new` across all allocated
/// blocks, leaving confidence untouched (spec §4.6 `swapLabels`). Not
/// thread-safe with concurrent integration; callers must ensure no
/// workers are active.
pub fn swap_labels(grid: &impl LabelGrid, old: Label, new: Label) {
    if old == new {
        return;
    }
    for block_idx in grid.all_allocated_blocks() {
        if let Some(block) = grid.block_by_index(block_idx) {
            block.swap_label(old, new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BlockIndex, GridGeometry, InMemoryLabelGrid, LocalVoxelIndex};
    use crate::label::{LabelConfidence, LabelVoxel};

    #[test]
    fn swap_labels_rewrites_across_every_allocated_block() {
        let geometry = GridGeometry::default();
        let mut grid = InMemoryLabelGrid::new(geometry);

        let block_a = crate::grid::Block::new_zeroed(geometry.voxels_per_side);
        block_a.set(
            LocalVoxelIndex(0, 0, 0),
            LabelVoxel { label: Label(1), confidence: LabelConfidence(4) },
        );
        grid.insert_block(BlockIndex(0, 0, 0), block_a);

        let block_b = crate::grid::Block::new_zeroed(geometry.voxels_per_side);
        block_b.set(
            LocalVoxelIndex(1, 1, 1),
            LabelVoxel { label: Label(1), confidence: LabelConfidence(9) },
        );
        grid.insert_block(BlockIndex(5, 0, 0), block_b);

        swap_labels(&grid, Label(1), Label(2));

        for idx in grid.all_allocated_blocks() {
            let block = grid.block_by_index(idx).unwrap();
            block.for_each_voxel(|v| assert_ne!(v.label, Label(1)));
        }
        assert_eq!(
            grid.block_by_index(BlockIndex(0, 0, 0)).unwrap().get(LocalVoxelIndex(0, 0, 0)).label,
            Label(2)
        );
        assert_eq!(
            grid.block_by_index(BlockIndex(0, 0, 0)).unwrap().get(LocalVoxelIndex(0, 0, 0)).confidence,
            LabelConfidence(4)
        );
    }

    #[test]
    fn swap_labels_is_a_no_op_when_old_equals_new() {
        let geometry = GridGeometry::default();
        let mut grid = InMemoryLabelGrid::new(geometry);
        let block = crate::grid::Block::new_zeroed(geometry.voxels_per_side);
        block.set(
            LocalVoxelIndex(0, 0, 0),
            LabelVoxel { label: Label(3), confidence: LabelConfidence(1) },
        );
        grid.insert_block(BlockIndex(0, 0, 0), block);

        swap_labels(&grid, Label(3), Label(3));

        assert_eq!(
            grid.block_by_index(BlockIndex(0, 0, 0)).unwrap().get(LocalVoxelIndex(0, 0, 0)).label,
            Label(3)
        );
    }
}

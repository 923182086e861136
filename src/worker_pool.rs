//! The top-level fusion integrator: owns the label grid, the external
//! distance integrator, and every piece of shared concurrent state, and
//! drives the worker-pool passes described in spec §4.7.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::assigner::{CandidateMap, LabelAssigner, PairwiseConfidence};
use crate::config::IntegratorConfig;
use crate::distance::DistanceIntegrator;
use crate::error::FusionError;
use crate::grid::{Block, BlockIndex, BundleMap, GridGeometry, LabelGrid};
use crate::label::{HighestLabel, Label, LabelConfidence};
use crate::math::{Point3, Transform3};
use crate::merge;
use crate::ray_integrator::{apply_label_update, merge_bundle};
use crate::segment::Segment;

/// A handle to a label block resolved either from the live grid or from
/// the scratch map, cached across consecutive voxels of one ray so a
/// block lookup is not repeated when traversal stays inside one block
/// (spec §9 "raw pointer caches").
enum BlockHandle<'g> {
    Live(&'g Block),
    Scratch(Arc<Block>),
}

impl<'g> BlockHandle<'g> {
    fn as_block(&self) -> &Block {
        match self {
            BlockHandle::Live(b) => b,
            BlockHandle::Scratch(b) => b,
        }
    }
}

#[derive(Default)]
struct BlockCursor<'g> {
    last_idx: Option<BlockIndex>,
    last: Option<BlockHandle<'g>>,
}

impl<'g> BlockCursor<'g> {
    fn resolve(
        &mut self,
        idx: BlockIndex,
        grid: &'g impl LabelGrid,
        scratch: &crate::scratch::ScratchBlockMap,
        geometry: GridGeometry,
    ) -> Result<&Block, FusionError> {
        if self.last_idx != Some(idx) {
            let handle = match grid.block_by_index(idx) {
                Some(b) => BlockHandle::Live(b),
                None => BlockHandle::Scratch(scratch.get_or_create(idx, geometry)?),
            };
            self.last = Some(handle);
            self.last_idx = Some(idx);
        }
        Ok(self.last.as_ref().expect("just populated").as_block())
    }
}

/// Fuses labeled point-cloud segments into a shared label grid, delegating
/// distance-voxel updates to an external [`DistanceIntegrator`] (spec §1,
/// §5). Holds borrowed-by-value, non-owning-in-spirit handles to the grid
/// and base integrator for the lifetime of the whole subsystem (spec §9
/// "cyclic ownership").
pub struct FusionIntegrator<G, D>
where
    G: LabelGrid + Sync,
    D: DistanceIntegrator + Sync,
{
    grid: G,
    distance: D,
    config: IntegratorConfig,
    stripe_locks: crate::stripe_lock::StripeLocks,
    scratch: crate::scratch::ScratchBlockMap,
    highest_label: HighestLabel,
    pairwise: PairwiseConfidence,
    pool: ThreadPool,
}

impl<G, D> FusionIntegrator<G, D>
where
    G: LabelGrid + Sync,
    D: DistanceIntegrator + Sync,
{
    pub fn new(grid: G, distance: D, config: IntegratorConfig) -> Result<Self, FusionError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.integrator_threads)
            .build()
            .map_err(|_| FusionError::ThreadPoolInit)?;
        Ok(Self {
            grid,
            distance,
            config,
            stripe_locks: crate::stripe_lock::StripeLocks::new(),
            scratch: crate::scratch::ScratchBlockMap::new(),
            highest_label: HighestLabel::new(),
            pairwise: PairwiseConfidence::new(),
            pool,
        })
    }

    pub fn grid(&self) -> &G {
        &self.grid
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Stage A for one segment (spec §4.3, §6.3).
    pub fn compute_segment_label_candidates(
        &mut self,
        segment: &Segment,
        segment_id: usize,
        candidates: &mut CandidateMap,
    ) -> Result<(), FusionError> {
        LabelAssigner::new(&self.grid, &self.config).compute_segment_label_candidates(
            segment,
            segment_id,
            candidates,
            &mut self.pairwise,
            &self.highest_label,
        )
    }

    /// Stages B and C across a batch (spec §4.3, §6.3).
    pub fn decide_label_point_clouds(
        &mut self,
        segments: &mut [Segment],
        candidates: &mut CandidateMap,
    ) -> Result<(), FusionError> {
        LabelAssigner::new(&self.grid, &self.config).decide_label_point_clouds(
            segments,
            candidates,
            &self.highest_label,
        )
    }

    /// Convenience wrapper running the whole assignment-then-integration
    /// pipeline for one batch of segments: Stage A for each segment,
    /// Stages B/C once, then one `integrate_point_cloud` per segment using
    /// the label it was assigned.
    pub fn integrate_batch(
        &mut self,
        segments: &mut [Segment],
        freespace_points: bool,
    ) -> Result<(), FusionError> {
        let mut candidates = CandidateMap::new();
        for (segment_id, segment) in segments.iter().enumerate() {
            self.compute_segment_label_candidates(segment, segment_id, &mut candidates)?;
        }
        self.decide_label_point_clouds(segments, &mut candidates)?;

        for segment in segments.iter() {
            self.integrate_point_cloud(
                segment.t_g_c,
                &segment.points_c,
                &segment.colors,
                &segment.labels,
                freespace_points,
            )?;
        }
        Ok(())
    }

    /// Consults pairwise co-occurrence counts and swaps labels for every
    /// pair that crossed the merge threshold (spec §4.6). Must only be
    /// called when no workers are active.
    pub fn merge_labels(&mut self) {
        if !self.config.enable_pairwise_confidence_merging {
            return;
        }
        let crossed = self.pairwise.drain_exceeding(self.config.pairwise_confidence_threshold);
        for (old, new) in crossed {
            log::info!("merging label {:?} into {:?}", old, new);
            merge::swap_labels(&self.grid, old, new);
        }
    }

    /// Rewrites every voxel bearing `old` to `new` (spec §4.6). Must only
    /// be called when no workers are active.
    pub fn swap_labels(&mut self, old: Label, new: Label) {
        merge::swap_labels(&self.grid, old, new);
    }

    /// One-shot scan resolving the `labels_count_map_` open question
    /// (spec §9 open question 1, option a): every label currently borne by
    /// at least one voxel, in ascending order.
    pub fn get_labels_list(&self) -> Vec<Label> {
        let mut seen = std::collections::BTreeSet::new();
        for block_idx in self.grid.all_allocated_blocks() {
            if let Some(block) = self.grid.block_by_index(block_idx) {
                block.for_each_voxel(|v| {
                    if !v.label.is_none() {
                        seen.insert(v.label);
                    }
                });
            }
        }
        seen.into_iter().collect()
    }

    pub fn get_fresh_label(&self) -> Result<Label, FusionError> {
        self.highest_label.fresh()
    }

    /// Integrates one already-labeled point cloud (spec §4.7). Runs the
    /// surface pass, then the clearing pass, then flushes both the
    /// distance scratch map and the label [`crate::scratch::ScratchBlockMap`]
    /// into their live grids (spec §4.7 step 4) before returning, so a
    /// caller using only the public §6.3 surface always sees a consistent
    /// live grid afterwards.
    pub fn integrate_point_cloud(
        &mut self,
        t_g_c: Transform3,
        points_c: &[Point3],
        colors: &[[u8; 3]],
        labels: &[Label],
        freespace_points: bool,
    ) -> Result<(), FusionError> {
        if points_c.len() != colors.len() || points_c.len() != labels.len() {
            return Err(FusionError::LengthMismatch {
                points: points_c.len(),
                colors: colors.len(),
                labels: labels.len(),
            });
        }

        let (surface_map, clear_map) =
            self.distance.bundle_rays(&t_g_c, points_c, freespace_points);

        log::debug!(
            "integrating batch: {} surface bundles, {} clear bundles, {} threads",
            surface_map.len(),
            clear_map.len(),
            self.config.integrator_threads
        );

        self.run_pass(&surface_map, points_c, colors, labels, &t_g_c, false, &surface_map)?;
        self.run_pass(&clear_map, points_c, colors, labels, &t_g_c, true, &surface_map)?;

        self.distance.flush_tsdf_scratch();
        self.flush_scratch();
        Ok(())
    }

    /// Moves every scratch-allocated label block into the live grid (spec
    /// §4.2 `flush`). Called automatically at the end of
    /// [`Self::integrate_point_cloud`]; exposed separately for callers that
    /// drive the surface/clearing passes themselves instead of going
    /// through that method.
    pub fn flush_scratch(&mut self) {
        self.scratch.flush(&mut self.grid);
    }

    fn run_pass(
        &self,
        bundle_map: &BundleMap,
        points_c: &[Point3],
        colors: &[[u8; 3]],
        labels: &[Label],
        t_g_c: &Transform3,
        clearing: bool,
        anti_grazing_reference: &BundleMap,
    ) -> Result<(), FusionError> {
        let entries: Vec<(crate::grid::GlobalVoxelIndex, &[usize])> =
            bundle_map.iter().map(|(&idx, pts)| (idx, pts.as_slice())).collect();
        if entries.is_empty() {
            return Ok(());
        }

        let n = self.config.integrator_threads.max(1);

        let work = |w: usize| -> Result<(), FusionError> {
            for (i, (target_idx, point_indices)) in entries.iter().enumerate() {
                if (i + w + 1) % n != 0 {
                    continue;
                }
                self.integrate_bundle(
                    *target_idx,
                    point_indices,
                    points_c,
                    colors,
                    labels,
                    t_g_c,
                    clearing,
                    anti_grazing_reference,
                )?;
            }
            Ok(())
        };

        if n == 1 {
            return work(0);
        }

        self.pool.install(|| {
            (0..n).into_par_iter().map(work).collect::<Result<Vec<()>, FusionError>>()
        })?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate_bundle(
        &self,
        target_idx: crate::grid::GlobalVoxelIndex,
        point_indices: &[usize],
        points_c: &[Point3],
        colors: &[[u8; 3]],
        labels: &[Label],
        t_g_c: &Transform3,
        clearing: bool,
        anti_grazing_reference: &BundleMap,
    ) -> Result<(), FusionError> {
        let Some(sample) = merge_bundle(
            points_c,
            colors,
            labels,
            point_indices,
            |p| self.distance.voxel_weight(p),
            clearing,
        ) else {
            return Ok(()); // benign skip: empty ray bundle (spec §7)
        };

        let origin = t_g_c.origin();
        let merged_point_g = t_g_c.transform_point(sample.point_c);
        let geometry = self.grid.geometry();
        let mut cursor = BlockCursor::default();

        for global_idx in self.distance.cast_ray(origin, merged_point_g, clearing) {
            if self.config.anti_grazing
                && !clearing
                && global_idx != target_idx
                && anti_grazing_reference.contains_key(&global_idx)
            {
                continue;
            }

            let tsdf_handle = self.distance.allocate_tsdf_voxel(global_idx);
            self.distance.update_tsdf_voxel(
                origin,
                merged_point_g,
                global_idx,
                sample.color,
                sample.weight,
                tsdf_handle,
            );

            let block_idx = geometry.block_idx_from_global_voxel_idx(global_idx);
            let local = geometry.local_from_global_voxel_idx(global_idx);

            let _stripe = self.stripe_locks.lock(global_idx);
            let block = cursor.resolve(block_idx, &self.grid, &self.scratch, geometry)?;
            apply_label_update(
                block,
                local,
                sample.label,
                LabelConfidence(1),
                &self.highest_label,
                self.config.confidence_cap(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GlobalVoxelIndex, GridGeometry, InMemoryLabelGrid};
    use std::sync::Mutex;

    /// A minimal stepping ray caster good enough to exercise
    /// `FusionIntegrator` end to end: one voxel per unit step from origin
    /// to end along the dominant axis.
    struct FakeDistance {
        geometry: GridGeometry,
        allocations: Mutex<u32>,
    }

    impl FakeDistance {
        fn new(geometry: GridGeometry) -> Self {
            Self { geometry, allocations: Mutex::new(0) }
        }
    }

    impl DistanceIntegrator for FakeDistance {
        fn voxel_weight(&self, _point_c: Point3) -> f32 {
            1.0
        }

        fn bundle_rays(
            &self,
            t_g_c: &Transform3,
            points_c: &[Point3],
            freespace: bool,
        ) -> (BundleMap, BundleMap) {
            let mut surface = BundleMap::new();
            let mut clear = BundleMap::new();
            for (i, &p) in points_c.iter().enumerate() {
                let p_g = t_g_c.transform_point(p);
                let idx = self.geometry.global_voxel_idx_from_point(p_g);
                let map = if freespace { &mut clear } else { &mut surface };
                map.entry(idx).or_default().push(i);
            }
            (surface, clear)
        }

        fn allocate_tsdf_voxel(&self, _global_idx: GlobalVoxelIndex) -> crate::distance::TsdfVoxelHandle {
            let mut guard = self.allocations.lock().unwrap();
            *guard += 1;
            crate::distance::TsdfVoxelHandle(0)
        }

        fn update_tsdf_voxel(
            &self,
            _origin: Point3,
            _point_g: Point3,
            _global_idx: GlobalVoxelIndex,
            _color: [u8; 3],
            _weight: f32,
            _voxel: crate::distance::TsdfVoxelHandle,
        ) {
        }

        fn flush_tsdf_scratch(&self) {}

        fn cast_ray<'a>(
            &'a self,
            origin: Point3,
            end: Point3,
            _clearing: bool,
        ) -> Box<dyn Iterator<Item = GlobalVoxelIndex> + 'a> {
            let geometry = self.geometry;
            let start_idx = geometry.global_voxel_idx_from_point(origin);
            let end_idx = geometry.global_voxel_idx_from_point(end);
            let steps = (end_idx.0 - start_idx.0)
                .abs()
                .max((end_idx.1 - start_idx.1).abs())
                .max((end_idx.2 - start_idx.2).abs())
                .max(1);
            Box::new((0..=steps).map(move |s| {
                GlobalVoxelIndex(
                    start_idx.0 + (end_idx.0 - start_idx.0) * s / steps,
                    start_idx.1 + (end_idx.1 - start_idx.1) * s / steps,
                    start_idx.2 + (end_idx.2 - start_idx.2) * s / steps,
                )
            }))
        }
    }

    fn new_integrator(
        threads: usize,
    ) -> FusionIntegrator<InMemoryLabelGrid, FakeDistance> {
        let geometry = GridGeometry::default();
        let grid = InMemoryLabelGrid::new(geometry);
        let distance = FakeDistance::new(geometry);
        let mut config = IntegratorConfig::default();
        config.integrator_threads = threads;
        FusionIntegrator::new(grid, distance, config).unwrap()
    }

    #[test]
    fn fresh_volume_single_segment_labels_surface_with_confidence_one() {
        let mut integrator = new_integrator(1);
        let points = vec![Point3::new(0.3, 0.0, 0.0)];
        let colors = vec![[1, 2, 3]];
        let label = integrator.get_fresh_label().unwrap();
        let labels = vec![label];

        integrator
            .integrate_point_cloud(Transform3::identity(), &points, &colors, &labels, false)
            .unwrap();

        let geometry = integrator.grid().geometry();
        let global = geometry.global_voxel_idx_from_point(points[0]);
        let voxel = integrator.grid().voxel_by_coords(points[0]).unwrap();
        assert_eq!(voxel.label, label);
        assert_eq!(voxel.confidence, LabelConfidence(1));
        let _ = global;
    }

    #[test]
    fn matching_reinforcement_raises_confidence_on_repeat_integration() {
        let mut integrator = new_integrator(1);
        let points = vec![Point3::new(0.3, 0.0, 0.0)];
        let colors = vec![[1, 2, 3]];
        let label = integrator.get_fresh_label().unwrap();
        let labels = vec![label];

        for _ in 0..2 {
            integrator
                .integrate_point_cloud(Transform3::identity(), &points, &colors, &labels, false)
                .unwrap();
        }

        let voxel = integrator.grid().voxel_by_coords(points[0]).unwrap();
        assert_eq!(voxel.confidence, LabelConfidence(2));
    }

    #[test]
    fn competing_label_erodes_then_seats() {
        let mut integrator = new_integrator(1);
        let points = vec![Point3::new(0.3, 0.0, 0.0)];
        let colors = vec![[1, 2, 3]];
        let label_a = integrator.get_fresh_label().unwrap();
        let label_b = integrator.get_fresh_label().unwrap();

        integrator
            .integrate_point_cloud(Transform3::identity(), &points, &colors, &[label_a], false)
            .unwrap();

        integrator
            .integrate_point_cloud(Transform3::identity(), &points, &colors, &[label_b], false)
            .unwrap();
        let after_first_clash = integrator.grid().voxel_by_coords(points[0]).unwrap();
        assert_eq!(after_first_clash.label, label_a);
        assert_eq!(after_first_clash.confidence, LabelConfidence::ZERO);

        integrator
            .integrate_point_cloud(Transform3::identity(), &points, &colors, &[label_b], false)
            .unwrap();
        let after_second_clash = integrator.grid().voxel_by_coords(points[0]).unwrap();
        assert_eq!(after_second_clash.label, label_b);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut integrator = new_integrator(1);
        let points = vec![Point3::ZERO, Point3::ZERO];
        let colors = vec![[0, 0, 0]];
        let labels = vec![Label(1), Label(1)];
        let err = integrator
            .integrate_point_cloud(Transform3::identity(), &points, &colors, &labels, false)
            .unwrap_err();
        assert!(matches!(err, FusionError::LengthMismatch { .. }));
    }

    #[test]
    fn swap_labels_via_integrator_removes_old_label() {
        let mut integrator = new_integrator(1);
        let points = vec![Point3::new(0.3, 0.0, 0.0)];
        let colors = vec![[1, 2, 3]];
        let label = integrator.get_fresh_label().unwrap();
        integrator
            .integrate_point_cloud(Transform3::identity(), &points, &colors, &[label], false)
            .unwrap();

        let replacement = Label(label.0 + 100);
        integrator.swap_labels(label, replacement);

        for idx in integrator.grid().all_allocated_blocks() {
            integrator
                .grid()
                .block_by_index(idx)
                .unwrap()
                .for_each_voxel(|v| assert_ne!(v.label, label));
        }
    }

    #[test]
    fn multi_threaded_pass_agrees_with_single_threaded_pass() {
        let mut single = new_integrator(1);
        let mut multi = new_integrator(4);

        let points: Vec<Point3> = (0..20).map(|i| Point3::new(i as f32 * 0.15, 0.0, 0.0)).collect();
        let colors = vec![[5, 6, 7]; points.len()];
        let label = Label(1);
        let labels = vec![label; points.len()];

        single
            .integrate_point_cloud(Transform3::identity(), &points, &colors, &labels, false)
            .unwrap();
        multi
            .integrate_point_cloud(Transform3::identity(), &points, &colors, &labels, false)
            .unwrap();

        for &p in &points {
            let a = single.grid().voxel_by_coords(p);
            let b = multi.grid().voxel_by_coords(p);
            assert_eq!(a, b);
        }
    }
}

//! Contract for the external base integrator this crate consumes (spec
//! §6.1). The TSDF distance-update rule, ray bundling, and block
//! allocation for *distance* voxels are all implemented by that base
//! integrator; this crate never implements them, it only calls through
//! this trait. A concrete TSDF integrator is out of scope (spec §1).

use crate::grid::{BundleMap, GlobalVoxelIndex};
use crate::math::{Point3, Transform3};

/// Opaque handle to a distance (TSDF) voxel, owned by the external base
/// integrator (spec §3 `TsdfVoxel`).
#[derive(Debug, Clone, Copy)]
pub struct TsdfVoxelHandle(pub usize);

pub trait DistanceIntegrator {
    /// Monotonically decreasing weight for a point observed in camera
    /// frame at `point_c` (spec §6.1 `voxel_weight`).
    fn voxel_weight(&self, point_c: Point3) -> f32;

    /// Partitions a segment's camera-frame points into a surface bundle
    /// map and a clearing bundle map, each keyed by global voxel index
    /// (spec §6.1 `bundle_rays`, §4.7 step 1).
    fn bundle_rays(
        &self,
        t_g_c: &Transform3,
        points_c: &[Point3],
        freespace: bool,
    ) -> (BundleMap, BundleMap);

    /// Thread-safe allocation of a distance voxel handle, with a scratch
    /// fallback equivalent to [`crate::scratch::ScratchBlockMap`] on the
    /// label side (spec §6.1 `allocate_tsdf_voxel`).
    fn allocate_tsdf_voxel(&self, global_idx: GlobalVoxelIndex) -> TsdfVoxelHandle;

    /// Delegated distance-voxel update; this crate never reads or
    /// interprets the result (spec §6.1 `update_tsdf_voxel`).
    fn update_tsdf_voxel(
        &self,
        origin: Point3,
        point_g: Point3,
        global_idx: GlobalVoxelIndex,
        color: [u8; 3],
        weight: f32,
        voxel: TsdfVoxelHandle,
    );

    /// Merges the distance scratch map into the live TSDF grid
    /// (spec §6.1 `flush_tsdf_scratch`, §4.7 step 4).
    fn flush_tsdf_scratch(&self);

    /// Voxels visited tracing from `origin` to `end`, in traversal order
    /// (spec §6.1 `RayCaster`). `clearing` selects carving behavior.
    fn cast_ray<'a>(
        &'a self,
        origin: Point3,
        end: Point3,
        clearing: bool,
    ) -> Box<dyn Iterator<Item = GlobalVoxelIndex> + 'a>;
}

//! Per-bundle point merging and the label-voxel update rule (spec §4.4,
//! §4.5). Distance-side integration is delegated to
//! [`crate::distance::DistanceIntegrator`]; this module only produces the
//! representative sample handed to it and owns the label half of the
//! read-modify-write.

use crate::grid::{Block, LocalVoxelIndex};
use crate::label::{HighestLabel, Label, LabelConfidence, LabelVoxel};
use crate::math::Point3;

/// The single representative point a bundle of rays condenses to before
/// casting (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct MergedSample {
    pub point_c: Point3,
    pub color: [u8; 3],
    pub weight: f32,
    pub label: Label,
}

/// Condenses a bundle of point indices into one representative sample.
///
/// Surface bundles are a weighted average over every point in the bundle,
/// weighted by `voxel_weight`; clearing bundles use only the bundle's
/// first point and ignore the rest (spec §4.4). Returns `None` for an
/// empty bundle (spec §7 benign skip).
pub fn merge_bundle(
    points_c: &[Point3],
    colors: &[[u8; 3]],
    labels: &[Label],
    point_indices: &[usize],
    voxel_weight: impl Fn(Point3) -> f32,
    clearing: bool,
) -> Option<MergedSample> {
    let &first = point_indices.first()?;

    if clearing {
        return Some(MergedSample {
            point_c: points_c[first],
            color: colors[first],
            weight: voxel_weight(points_c[first]),
            label: labels[first],
        });
    }

    let mut point_acc = Point3::ZERO;
    let mut color_acc = [0f32; 3];
    let mut weight_sum = 0f32;
    let mut merged_label = labels[first];

    for &idx in point_indices {
        let w = voxel_weight(points_c[idx]);
        point_acc = point_acc.add(points_c[idx].scale(w));
        for c in 0..3 {
            color_acc[c] += colors[idx][c] as f32 * w;
        }
        weight_sum += w;
        // Last point in the bundle wins (spec §4.4 "last wins").
        merged_label = labels[idx];
    }

    if weight_sum == 0.0 {
        return Some(MergedSample {
            point_c: points_c[first],
            color: colors[first],
            weight: 0.0,
            label: merged_label,
        });
    }

    Some(MergedSample {
        point_c: point_acc.scale(1.0 / weight_sum),
        color: [
            (color_acc[0] / weight_sum).round() as u8,
            (color_acc[1] / weight_sum).round() as u8,
            (color_acc[2] / weight_sum).round() as u8,
        ],
        weight: weight_sum,
        label: merged_label,
    })
}

/// Applies the label voxel update rule to `local` inside `block` (spec
/// §4.5). The caller must hold the stripe lock for this voxel's global
/// index for the whole call.
pub fn apply_label_update(
    block: &Block,
    local: LocalVoxelIndex,
    incoming_label: Label,
    incoming_confidence: LabelConfidence,
    highest_label: &HighestLabel,
    confidence_cap: Option<u32>,
) {
    let mut voxel = block.get(local);

    if voxel.label == incoming_label {
        voxel.confidence = voxel.confidence.saturating_add(incoming_confidence, confidence_cap);
    } else if voxel.confidence == LabelConfidence::ZERO {
        voxel = LabelVoxel { label: incoming_label, confidence: incoming_confidence };
        highest_label.raise_to_at_least(incoming_label);
    } else {
        voxel.confidence = voxel.confidence.saturating_sub(incoming_confidence);
    }

    block.set(local, voxel);
}

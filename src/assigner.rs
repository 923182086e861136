//! Per-segment label reconciliation: inspects existing label voxels under
//! a segment's points and selects a label (or coins a fresh one), while
//! accumulating pairwise co-occurrence evidence between labels (spec §4.3).

use std::collections::{BTreeMap, BTreeSet};

use crate::config::IntegratorConfig;
use crate::error::FusionError;
use crate::grid::LabelGrid;
use crate::label::{HighestLabel, Label};
use crate::segment::Segment;

/// Label → segment index → overlap count (spec §3 "Candidate map"). A
/// [`BTreeMap`] of [`BTreeMap`]s so Stage B's greedy scan has a fixed,
/// deterministic iteration order (spec §4.3 "deterministic within one
/// run"; spec §8 invariant 9).
pub type CandidateMap = BTreeMap<Label, BTreeMap<usize, usize>>;

/// Symmetric co-occurrence counts, canonically keyed `(min(L1,L2),
/// max(L1,L2))` (spec §3 "Pairwise confidence").
#[derive(Debug, Default)]
pub struct PairwiseConfidence {
    counts: BTreeMap<Label, BTreeMap<Label, u32>>,
}

impl PairwiseConfidence {
    pub fn new() -> Self {
        Self::default()
    }

    fn canonical_key(l1: Label, l2: Label) -> (Label, Label) {
        if l1.0 < l2.0 { (l1, l2) } else { (l2, l1) }
    }

    /// Increments the co-occurrence count for an unordered pair. Self-pairs
    /// are excluded (spec §4.3: "Self-pairs are excluded").
    pub fn increment(&mut self, l1: Label, l2: Label) {
        if l1 == l2 {
            return;
        }
        let (lo, hi) = Self::canonical_key(l1, l2);
        *self.counts.entry(lo).or_default().entry(hi).or_insert(0) += 1;
    }

    pub fn get(&self, l1: Label, l2: Label) -> u32 {
        let (lo, hi) = Self::canonical_key(l1, l2);
        self.counts.get(&lo).and_then(|m| m.get(&hi)).copied().unwrap_or(0)
    }

    /// Removes and returns every pair whose count exceeds `threshold`, an
    /// erase-aware traversal suitable for `merge_labels` (spec §4.6: "must
    /// tolerate in-loop erasure").
    pub fn drain_exceeding(&mut self, threshold: u32) -> Vec<(Label, Label)> {
        let mut result = Vec::new();
        self.counts.retain(|&lo, inner| {
            inner.retain(|&hi, &mut count| {
                if count > threshold {
                    result.push((lo, hi));
                    false
                } else {
                    true
                }
            });
            !inner.is_empty()
        });
        result
    }

    pub fn is_empty(&self) -> bool {
        self.counts.values().all(|m| m.is_empty())
    }
}

/// Reconciles a batch of segments against labels already stored in the
/// volume (spec §4.3 Stages A/B/C).
pub struct LabelAssigner<'g> {
    grid: &'g dyn LabelGrid,
    config: &'g IntegratorConfig,
}

impl<'g> LabelAssigner<'g> {
    pub fn new(grid: &'g dyn LabelGrid, config: &'g IntegratorConfig) -> Self {
        Self { grid, config }
    }

    /// Stage A: accumulates overlap candidates for one segment against the
    /// live label grid, and (if enabled) pairwise co-occurrence evidence.
    pub fn compute_segment_label_candidates(
        &self,
        segment: &Segment,
        segment_id: usize,
        candidates: &mut CandidateMap,
        pairwise: &mut PairwiseConfidence,
        highest_label: &HighestLabel,
    ) -> Result<(), FusionError> {
        let n = segment.len();
        let geometry = self.grid.geometry();
        let mut merge_candidate_labels: BTreeSet<Label> = BTreeSet::new();
        let mut touched_any = false;

        for &point_c in &segment.points_c {
            let point_g = segment.t_g_c.transform_point(point_c);
            let global_idx = geometry.global_voxel_idx_from_point(point_g);
            let block_idx = geometry.block_idx_from_global_voxel_idx(global_idx);

            let Some(block) = self.grid.block_by_index(block_idx) else {
                continue; // benign skip: unallocated block (spec §7)
            };
            let local = geometry.local_from_global_voxel_idx(global_idx);
            let voxel = block.get(local);
            if voxel.label.is_none() {
                continue; // benign skip: allocated but unobserved (spec §7)
            }

            touched_any = true;
            let count = {
                let per_segment = candidates.entry(voxel.label).or_default();
                let c = per_segment.entry(segment_id).or_insert(0);
                *c += 1;
                *c
            };

            if self.config.enable_pairwise_confidence_merging {
                let ratio = count as f32 / n as f32;
                if ratio > self.config.pairwise_confidence_ratio_threshold {
                    merge_candidate_labels.insert(voxel.label);
                }
            }
        }

        if self.config.enable_pairwise_confidence_merging {
            let labels: Vec<Label> = merge_candidate_labels.into_iter().collect();
            for i in 0..labels.len() {
                for j in (i + 1)..labels.len() {
                    pairwise.increment(labels[i], labels[j]);
                }
            }
        }

        if !touched_any {
            // Guarantees S will win against itself in Stage B (spec §4.3).
            let fresh = highest_label.fresh()?;
            candidates.entry(fresh).or_default().insert(segment_id, n);
        }

        Ok(())
    }

    /// Stages B and C across a whole batch: greedy global assignment,
    /// then a fresh label for any segment left unassigned (spec §4.3).
    pub fn decide_label_point_clouds(
        &self,
        segments: &mut [Segment],
        candidates: &mut CandidateMap,
        highest_label: &HighestLabel,
    ) -> Result<(), FusionError> {
        let mut assigned = vec![false; segments.len()];

        loop {
            let mut best: Option<(Label, usize, usize)> = None;
            for (&label, per_segment) in candidates.iter() {
                for (&segment_id, &count) in per_segment.iter() {
                    if assigned[segment_id] || count == 0 {
                        continue;
                    }
                    let is_better = match best {
                        None => true,
                        Some((_, _, best_count)) => count > best_count,
                    };
                    if is_better {
                        best = Some((label, segment_id, count));
                    }
                }
            }

            let Some((label, segment_id, _)) = best else { break };
            segments[segment_id].assign_label(label);
            assigned[segment_id] = true;
            // One label wins at most one segment per batch (spec §4.3).
            candidates.remove(&label);
        }

        for (segment_id, segment) in segments.iter_mut().enumerate() {
            if !assigned[segment_id] {
                let fresh = highest_label.fresh()?;
                segment.assign_label(fresh);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_confidence_is_symmetric_and_excludes_self_pairs() {
        let mut pw = PairwiseConfidence::new();
        pw.increment(Label(5), Label(5));
        assert!(pw.is_empty());

        pw.increment(Label(5), Label(2));
        pw.increment(Label(2), Label(5));
        assert_eq!(pw.get(Label(2), Label(5)), 2);
        assert_eq!(pw.get(Label(5), Label(2)), 2);
    }

    #[test]
    fn drain_exceeding_removes_only_crossed_pairs() {
        let mut pw = PairwiseConfidence::new();
        for _ in 0..3 {
            pw.increment(Label(1), Label(2));
        }
        pw.increment(Label(3), Label(4));

        let drained = pw.drain_exceeding(2);
        assert_eq!(drained, vec![(Label(1), Label(2))]);
        assert_eq!(pw.get(Label(3), Label(4)), 1);
        assert_eq!(pw.get(Label(1), Label(2)), 0);
    }
}

//! Typed errors for the fatal classes named by spec §7: precondition
//! violations and internal invariant violations. Benign skips (an
//! unallocated block, a zero-label voxel, an empty bundle) are not
//! errors — they are `continue`s in the hot loop, per §7.

use crate::grid::BlockIndex;

/// Fatal errors surfaced to callers (spec §7). A batch that hits one of
/// these aborts; updates already applied are left in place, since the
/// label-update rule is individually correct per voxel.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// A segment's `points_c`, `colors`, and `labels` slices disagree in
    /// length.
    #[error("segment input lengths differ: {points} points, {colors} colors, {labels} labels")]
    LengthMismatch {
        points: usize,
        colors: usize,
        labels: usize,
    },

    /// `highest_label` is already at `u32::MAX`; no fresh label can be
    /// minted without wrapping.
    #[error("highest_label counter is exhausted (already at u32::MAX)")]
    LabelCounterExhausted,

    /// The scratch block map found an entry for a block index that was
    /// just checked absent while holding its structural lock. This can
    /// only happen if the map's own invariant is broken.
    #[error(
        "scratch block map insert collision for block {block:?} that was just checked absent"
    )]
    ScratchCollision { block: BlockIndex },

    /// The integrator's worker thread pool could not be built.
    #[error("failed to build integrator thread pool")]
    ThreadPoolInit,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Precondition violations on [`crate::config::IntegratorConfig`] (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("integrator_threads must be >= 1")]
    ZeroThreads,

    #[error("pairwise_confidence_ratio_threshold must be in [0.0, 1.0], got {0}")]
    RatioOutOfRange(f32),
}

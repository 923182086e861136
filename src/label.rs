//! Label identity, confidence, and the process-wide monotonic label
//! counter (spec §3, §9).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::FusionError;

/// A semantic/instance label. `0` ([`Label::NONE`]) means "unobserved/no
/// label"; all other values are positive identifiers minted by
/// [`HighestLabel::fresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Label(pub u32);

impl Label {
    pub const NONE: Label = Label(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Non-negative accumulated evidence for a [`Label`] sitting in a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct LabelConfidence(pub u32);

impl LabelConfidence {
    pub const ZERO: LabelConfidence = LabelConfidence(0);

    /// Adds `rhs`, saturating at `cap` when one is given (spec §4.5,
    /// §6.4 `cap_confidence`).
    pub fn saturating_add(self, rhs: LabelConfidence, cap: Option<u32>) -> LabelConfidence {
        let sum = self.0.saturating_add(rhs.0);
        match cap {
            Some(cap) => LabelConfidence(sum.min(cap)),
            None => LabelConfidence(sum),
        }
    }

    /// Subtracts `rhs`, saturating at zero (spec §4.5: "wrap-around must
    /// be prevented").
    pub fn saturating_sub(self, rhs: LabelConfidence) -> LabelConfidence {
        LabelConfidence(self.0.saturating_sub(rhs.0))
    }
}

/// A voxel in the label field. `label == Label::NONE` iff the voxel has
/// never been written (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LabelVoxel {
    pub label: Label,
    pub confidence: LabelConfidence,
}

/// The process-wide monotonic counter from which fresh labels are minted
/// (spec §3, §9). Uses `fetch_add` for minting and `fetch_max` for the
/// label-update rule's seating branch, so the two mutation sites never
/// need to agree on a lock.
#[derive(Debug, Default)]
pub struct HighestLabel(AtomicU32);

impl HighestLabel {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Mints a label never returned by a previous call. Overflowing past
    /// `u32::MAX` is a hard precondition violation (spec §3).
    pub fn fresh(&self) -> Result<Label, FusionError> {
        let prev = self.0.fetch_add(1, Ordering::Relaxed);
        if prev == u32::MAX {
            return Err(FusionError::LabelCounterExhausted);
        }
        Ok(Label(prev + 1))
    }

    /// Raises the counter to at least `candidate` without ever lowering
    /// it (label-update rule's seating branch, spec §4.5/§9).
    pub fn raise_to_at_least(&self, candidate: Label) {
        self.0.fetch_max(candidate.0, Ordering::Relaxed);
    }

    pub fn current(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_labels_are_unique_and_increasing() {
        let hl = HighestLabel::new();
        let a = hl.fresh().unwrap();
        let b = hl.fresh().unwrap();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn raise_to_at_least_never_lowers() {
        let hl = HighestLabel::new();
        hl.raise_to_at_least(Label(10));
        hl.raise_to_at_least(Label(3));
        assert_eq!(hl.current(), 10);
    }

    #[test]
    fn exhausted_counter_is_reported() {
        let hl = HighestLabel(AtomicU32::new(u32::MAX));
        assert!(hl.fresh().is_err());
    }
}

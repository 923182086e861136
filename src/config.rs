//! Tunable behavior of the fusion integrator (spec §6.4). The crate does
//! not parse CLI flags or config files itself (out of scope, §1); callers
//! build an [`IntegratorConfig`] however they like and pass it to
//! [`crate::worker_pool::FusionIntegrator::new`].

use crate::error::ConfigError;

/// Enumerated options from spec §6.4, with the listed defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorConfig {
    /// Gate for candidate-label merge tracking (§4.3 stages A2/A3) and
    /// for [`crate::merge`] (§4.6).
    pub enable_pairwise_confidence_merging: bool,
    /// Overlap-ratio gate for considering a label a merge candidate for a
    /// segment (§4.3).
    pub pairwise_confidence_ratio_threshold: f32,
    /// Minimum co-occurrence count to trigger a swap (§4.6).
    pub pairwise_confidence_threshold: u32,
    /// Saturating cap on matching-label accumulation (§4.5).
    pub cap_confidence: bool,
    pub confidence_cap_value: u32,
    /// Worker count for the ray-integration pass (§4.7).
    pub integrator_threads: usize,
    /// Suppress redundant/glancing-incidence voxel updates already owned
    /// by another bundle (§4.4, §8 S6).
    pub anti_grazing: bool,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            enable_pairwise_confidence_merging: false,
            pairwise_confidence_ratio_threshold: 0.05,
            pairwise_confidence_threshold: 2,
            cap_confidence: false,
            confidence_cap_value: 10,
            integrator_threads: num_cpus::get().max(1),
            anti_grazing: true,
        }
    }
}

impl IntegratorConfig {
    /// Precondition checks performed before a grid is ever touched (spec §7).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.integrator_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if !(0.0..=1.0).contains(&self.pairwise_confidence_ratio_threshold) {
            return Err(ConfigError::RatioOutOfRange(
                self.pairwise_confidence_ratio_threshold,
            ));
        }
        Ok(())
    }

    pub fn confidence_cap(&self) -> Option<u32> {
        self.cap_confidence.then_some(self.confidence_cap_value)
    }
}

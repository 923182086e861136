// No warnings
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]

//! Labeled volumetric fusion integrator.
//!
//! Fuses a stream of labeled 3D point-cloud segments, each captured from a
//! known sensor pose, into a shared volumetric representation: a
//! truncated signed-distance field (delegated to an external
//! [`distance::DistanceIntegrator`]) paired with a label field tracked by
//! this crate. Handles segment-to-label reconciliation
//! ([`assigner::LabelAssigner`]), concurrent ray-traced voxel updates over
//! a striped-lock sparse grid ([`worker_pool::FusionIntegrator`]), and
//! label-merge bookkeeping ([`merge`]).
//!
//! The volumetric grid container, the TSDF distance-update rule, ray
//! bundling, point-cloud acquisition, and CLI/config-file loading are all
//! out of scope; see [`grid::LabelGrid`] and
//! [`distance::DistanceIntegrator`] for the interfaces this crate
//! consumes instead of owning them.

pub mod assigner;
pub mod config;
pub mod distance;
pub mod error;
pub mod grid;
pub mod label;
pub mod math;
pub mod merge;
pub mod ray_integrator;
pub mod scratch;
pub mod segment;
pub mod stripe_lock;
pub mod worker_pool;

pub use config::IntegratorConfig;
pub use error::{ConfigError, FusionError};
pub use label::{HighestLabel, Label, LabelConfidence, LabelVoxel};
pub use segment::Segment;
pub use worker_pool::FusionIntegrator;

/// Prelude module to import everything from this crate.
pub mod prelude {
    pub use crate::assigner::{CandidateMap, LabelAssigner, PairwiseConfidence};
    pub use crate::config::IntegratorConfig;
    pub use crate::distance::{DistanceIntegrator, TsdfVoxelHandle};
    pub use crate::error::{ConfigError, FusionError};
    pub use crate::grid::{
        Block, BlockIndex, BundleMap, GlobalVoxelIndex, GridGeometry, InMemoryLabelGrid,
        LabelGrid, LocalVoxelIndex,
    };
    pub use crate::label::{HighestLabel, Label, LabelConfidence, LabelVoxel};
    pub use crate::math::{Point3, Transform3};
    pub use crate::segment::Segment;
    pub use crate::worker_pool::FusionIntegrator;
}

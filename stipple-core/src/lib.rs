//! Weighted Voronoi stippling.
//!
//! Converts a grayscale density field into a set of stipple points by
//! iterated centroidal Voronoi relaxation with split/merge. Partitioning is
//! pluggable: an exact brute-force CPU scan, a grid-accelerated CPU search
//! (both Rayon-parallelized), and a GPU cone-rasterization backend (wgpu,
//! feature `gpu`).

mod density;
mod engine;
mod label;
mod moments;
mod partition;
mod point;
mod policy;
mod render;

mod cpu;

#[cfg(feature = "gpu")]
mod gpu;

pub use cpu::{BruteForceBackend, GridBackend};
pub use density::DensityField;
pub use engine::{
    Decision, EngineState, FailureReason, Params, Solution, StepReport, StippleEngine,
};
pub use label::{decode_label, encode_label, MAX_LABELS};
pub use moments::{accumulate, VoronoiCell};
pub use partition::{BackendKind, LabelRaster, PartitionBackend};
pub use point::{Point, Position};
pub use policy::{ConstantPolicy, StipplePolicy};
pub use render::{DiscRenderer, Renderer};

#[cfg(feature = "gpu")]
pub use gpu::RasterBackend;

/// RGB color tuple
pub type Rgb = [u8; 3];

/// Error type for stippling operations
#[derive(Debug, thiserror::Error)]
pub enum StippleError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to converge after {iterations} iterations ({points} points)")]
    ConvergenceFailure { iterations: usize, points: usize },

    #[cfg(feature = "gpu")]
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Backend not available: {0}")]
    BackendUnavailable(String),
}

pub type Result<T> = std::result::Result<T, StippleError>;

//! Error types for simulation setup and stepping.
//!
//! Configuration problems surface from [`crate::FlipSimulation::new`] before any
//! buffer is allocated. Step errors are detected before the state is touched,
//! so a rejected step leaves particles and grid exactly as they were.

use thiserror::Error;

/// Result alias used across the crate.
pub type FlipResult<T> = Result<T, FlipError>;

/// Everything that can go wrong when building or advancing a simulation.
#[derive(Error, Debug)]
pub enum FlipError {
    /// A simulation extent is zero, negative or not finite.
    #[error("simulation extent `{axis}` must be positive and finite, got {value}")]
    NonPositiveExtent { axis: &'static str, value: f32 },

    /// A scalar parameter lies outside its accepted range.
    #[error("parameter `{name}` = {value} is out of range, expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: f32,
        expected: &'static str,
    },

    /// The derived grid has no interior cell along an active axis.
    #[error("grid resolution {nx}x{ny}x{nz} is too coarse, need at least 3 cells per active axis")]
    DegenerateGrid { nx: usize, ny: usize, nz: usize },

    /// The derived grid would hold more cells than the simulation allows.
    #[error("grid of {cells:.0} cells exceeds the limit of {max} cells")]
    GridTooLarge { cells: f64, max: usize },

    /// A caller-supplied particle has a NaN or infinite position or velocity.
    #[error("particle {index} has a non-finite position or velocity")]
    NonFiniteParticle { index: usize },

    /// The water block is too small to hold a single particle.
    #[error("dam-break configuration produces zero particles")]
    NoParticles,

    /// `step` was called with a negative or non-finite time step.
    #[error("time step must be finite and non-negative, got {0}")]
    InvalidTimeStep(f32),

    /// An external force targets a cell outside the grid.
    #[error("external force targets cell {cell:?} outside grid {dims:?}")]
    ForceOutOfBounds { cell: [usize; 3], dims: [usize; 3] },

    /// Reading or writing a configuration file failed.
    #[error("config i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid JSON for [`crate::FlipConfig`].
    #[error("config parse failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlipError {
    pub(crate) fn parameter(name: &'static str, value: f32, expected: &'static str) -> Self {
        Self::InvalidParameter {
            name,
            value,
            expected,
        }
    }
}

//! Numerical constants shared by the simulation passes.

/// Gravity acceleration along +Y (m/s^2).
pub const GRAVITY: f32 = -9.81;

/// Particle radius as a fraction of the nominal grid spacing.
pub const PARTICLE_RADIUS_FACTOR: f32 = 0.3;

/// Scale applied to floats before they enter an integer accumulator.
///
/// One quantum is 1e-6 world units, so a single rounded contribution is off by
/// at most 5e-7.
pub const FIXED_POINT_SCALE: f64 = 1.0e6;

/// Smallest grid extent (in cells) along an active axis: a solid shell on both
/// sides plus one interior cell.
pub const MIN_CELLS_PER_AXIS: usize = 3;

/// Largest grid (in cells) a configuration may ask for.
pub const MAX_GRID_CELLS: usize = 1 << 25;

/// Default FLIP/PIC blend (0.9 = 90% FLIP, 10% PIC).
pub const DEFAULT_FLIP_RATIO: f32 = 0.9;

/// Default overrelaxation for the incompressibility pass.
pub const DEFAULT_OVERRELAXATION: f32 = 1.9;

//! Incompressibility solver for the MAC grid.
//!
//! Uses Jacobi relaxation: every FLUID cell computes its correction from the
//! same velocity snapshot, face updates go into a fixed-point buffer, and the
//! buffer is applied once the whole grid has been visited.

use rayon::prelude::*;

use crate::config::FlipConfig;
use crate::fixed_point::FixedPointBuffer;
use crate::grid::{CellType, Grid};

/// Parameters of one `solve` call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverSettings {
    /// Multiplier on each correction, in (1, 2)
    pub overrelaxation: f32,
    pub iterations: usize,
    /// Divergence bias per unit of density above rest
    pub density_stiffness: f32,
    /// Early exit once the max divergence drops below this
    pub divergence_tolerance: Option<f32>,
}

impl From<&FlipConfig> for SolverSettings {
    fn from(config: &FlipConfig) -> Self {
        Self {
            overrelaxation: config.overrelaxation,
            iterations: config.solve_iterations,
            density_stiffness: config.density_stiffness,
            divergence_tolerance: config.divergence_tolerance,
        }
    }
}

/// Outcome of a solve.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SolveStats {
    /// Relaxation passes whose updates were applied
    pub iterations: usize,
    /// Largest |divergence| over FLUID cells seen by the last pass
    pub max_divergence: f32,
}

/// Velocity divergence of cell `idx`: outflow minus inflow summed over the
/// active axes. Faces beyond the grid read as zero.
pub fn cell_divergence(grid: &Grid, idx: usize) -> f32 {
    let velocity = grid.velocity();
    let coords = grid.cell_coords(idx);
    let dims = grid.dims();

    let mut d = 0.0;
    for a in 0..grid.axes() {
        let upper = if coords[a] + 1 < dims[a] {
            velocity[idx + grid.stride(a)][a]
        } else {
            0.0
        };
        d += upper - velocity[idx][a];
    }
    d
}

/// Jacobi relaxation with a persistent face-update buffer.
pub struct IncompressibilitySolver {
    updates: FixedPointBuffer,
}

impl IncompressibilitySolver {
    pub fn new(grid: &Grid) -> Self {
        Self {
            updates: FixedPointBuffer::vectors(grid.cell_count()),
        }
    }

    /// Run up to `settings.iterations` passes over the FLUID cells.
    ///
    /// With a rest density, cells denser than rest get their divergence
    /// biased by `density_stiffness * (density - rest)` so over-packed regions
    /// push outward.
    pub fn solve(
        &mut self,
        grid: &mut Grid,
        settings: &SolverSettings,
        rest_density: Option<f32>,
    ) -> SolveStats {
        let mut stats = SolveStats::default();

        for iteration in 0..settings.iterations {
            self.updates.clear();
            let max_divergence = self.relax(grid, settings, rest_density);
            stats.max_divergence = max_divergence;

            log::trace!(
                "Solver iteration {}: max divergence {:.6}",
                iteration,
                max_divergence
            );

            if let Some(tolerance) = settings.divergence_tolerance {
                if max_divergence < tolerance {
                    break;
                }
            }

            self.apply(grid);
            stats.iterations += 1;
        }

        stats
    }

    /// One pass: accumulate every FLUID cell's face corrections and return
    /// the largest absolute (biased) divergence.
    fn relax(&self, grid: &Grid, settings: &SolverSettings, rest_density: Option<f32>) -> f32 {
        let updates = &self.updates;
        let cell_type = grid.cell_type();
        let density = grid.density();
        let axes = grid.axes();
        let dims = grid.dims();
        let omega = settings.overrelaxation;

        (0..grid.cell_count())
            .into_par_iter()
            .filter(|&idx| cell_type[idx] == CellType::Fluid)
            .map(|idx| {
                let coords = grid.cell_coords(idx);

                // Open-face weights toward the lower and upper neighbor
                let mut s_lower = [0.0f32; 3];
                let mut s_upper = [0.0f32; 3];
                for a in 0..axes {
                    let stride = grid.stride(a);
                    if coords[a] > 0 && !grid.is_solid(idx - stride) {
                        s_lower[a] = 1.0;
                    }
                    if coords[a] + 1 < dims[a] && !grid.is_solid(idx + stride) {
                        s_upper[a] = 1.0;
                    }
                }
                let s: f32 = s_lower.iter().chain(s_upper.iter()).sum();
                if s == 0.0 {
                    return 0.0;
                }

                let mut d = cell_divergence(grid, idx);
                if let Some(rest) = rest_density {
                    if density[idx] > rest {
                        d -= settings.density_stiffness * (density[idx] - rest);
                    }
                }

                let p = -omega * d / s;
                for a in 0..axes {
                    updates.add_component(idx, a, -s_lower[a] * p);
                    if s_upper[a] > 0.0 {
                        updates.add_component(idx + grid.stride(a), a, s_upper[a] * p);
                    }
                }
                d.abs()
            })
            .reduce(|| 0.0, f32::max)
    }

    fn apply(&self, grid: &mut Grid) {
        let updates = &self.updates;
        let axes = grid.axes();
        grid.velocity_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, v)| {
                for a in 0..axes {
                    v[a] += updates.load(idx * 3 + a);
                }
            });
    }
}

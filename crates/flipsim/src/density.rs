//! Per-cell particle density and one-shot rest-density calibration.

use rayon::prelude::*;

use crate::fixed_point::FixedPointBuffer;
use crate::grid::{CellType, Grid};
use crate::particle::Particles;

/// Accumulates particle density at cell centers and holds the rest density
/// the solver compresses against.
pub struct DensityEstimator {
    accum: FixedPointBuffer,
    rest_density: Option<f32>,
    calibrated: bool,
    multiplier: f32,
}

impl DensityEstimator {
    /// Estimator sized for `grid`. The calibrated mean is scaled by
    /// `multiplier` before it is stored.
    pub fn new(grid: &Grid, multiplier: f32) -> Self {
        Self {
            accum: FixedPointBuffer::new(grid.cell_count()),
            rest_density: None,
            calibrated: false,
            multiplier,
        }
    }

    /// Scatter a unit contribution per particle to the surrounding cell
    /// centers and write the result to `grid.density`.
    pub fn accumulate(&mut self, grid: &mut Grid, particles: &Particles) {
        self.accum.clear();
        let accum = &self.accum;
        let offset = grid.center_offset();

        {
            let grid = &*grid;
            particles.list.par_iter().for_each(|particle| {
                let stencil = grid.sample_stencil(particle.position, offset);
                for (idx, w) in stencil.iter() {
                    accum.add(idx, w);
                }
            });
        }

        grid.density_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, d)| *d = accum.load(idx));
    }

    /// Set the rest density to the mean density of FLUID cells.
    ///
    /// Only the first call has an effect; later calls return the stored value
    /// unchanged. If no cell is FLUID the estimator stays without a rest
    /// density and the solver runs without density correction.
    pub fn calibrate_rest_density(&mut self, grid: &Grid) -> Option<f32> {
        if self.calibrated {
            return self.rest_density;
        }
        self.calibrated = true;

        // Sequential so the mean is bit-identical between runs
        let (sum, count) = grid
            .density()
            .iter()
            .zip(grid.cell_type())
            .filter(|&(_, &t)| t == CellType::Fluid)
            .fold((0.0f64, 0usize), |(sum, count), (&d, _)| (sum + d as f64, count + 1));

        if count == 0 {
            log::warn!("Rest density calibration found no fluid cells");
            return None;
        }

        let rest = (sum / count as f64) as f32 * self.multiplier;
        log::info!(
            "Rest density calibrated to {:.4} over {} fluid cells",
            rest,
            count
        );
        self.rest_density = Some(rest);
        self.rest_density
    }

    /// Calibrated rest density, if any.
    pub fn rest_density(&self) -> Option<f32> {
        self.rest_density
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }
}

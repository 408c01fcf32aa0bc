//! Bilinear/trilinear interpolation stencils on the MAC grid.
//!
//! Scatter and gather share one stencil so grid weights and resampling are
//! exact adjoints. The weights are a tensor product of `(1 - t, t)` pairs and
//! always sum to one.

use glam::Vec3;

use crate::grid::Grid;

/// Corner count of the largest (3D) stencil.
pub const MAX_CORNERS: usize = 8;

/// Interpolation stencil: up to 8 cell indices with their weights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stencil {
    pub cells: [usize; MAX_CORNERS],
    pub weights: [f32; MAX_CORNERS],
    /// 4 in 2D, 8 in 3D
    pub len: usize,
}

/// 1D sample along one axis: lower index, upper index and fraction.
///
/// The coordinate is clamped to `[h, (n - 1) h]` before the offset is
/// removed, and both indices are capped at `n - 2`.
#[inline]
pub fn axis_sample(coord: f32, offset: f32, n: usize, h: f32) -> (usize, usize, f32) {
    let inv = 1.0 / h;
    let x = coord.clamp(h, (n - 1) as f32 * h) - offset;
    let x0 = ((x * inv).floor().max(0.0) as usize).min(n - 2);
    let t = (x - x0 as f32 * h) * inv;
    let x1 = (x0 + 1).min(n - 2);
    (x0, x1, t)
}

impl Stencil {
    /// Build the stencil for `pos` at staggering `offset`.
    pub fn build(grid: &Grid, pos: Vec3, offset: Vec3) -> Self {
        let axes = grid.axes();
        let dims = grid.dims();
        let h = grid.cell_size;

        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        let mut frac = [0.0f32; 3];
        for a in 0..axes {
            let (x0, x1, t) = axis_sample(pos[a], offset[a], dims[a], h);
            lo[a] = x0 * grid.stride(a);
            hi[a] = x1 * grid.stride(a);
            frac[a] = t;
        }

        let len = 1usize << axes;
        let mut cells = [0usize; MAX_CORNERS];
        let mut weights = [0.0f32; MAX_CORNERS];
        for corner in 0..len {
            let mut idx = 0;
            let mut w = 1.0;
            for a in 0..axes {
                if (corner >> a) & 1 == 1 {
                    idx += hi[a];
                    w *= frac[a];
                } else {
                    idx += lo[a];
                    w *= 1.0 - frac[a];
                }
            }
            cells[corner] = idx;
            weights[corner] = w;
        }

        Self {
            cells,
            weights,
            len,
        }
    }

    /// `(cell index, weight)` pairs of the active corners.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.cells[..self.len]
            .iter()
            .copied()
            .zip(self.weights[..self.len].iter().copied())
    }

    pub fn weight_sum(&self) -> f32 {
        self.weights[..self.len].iter().sum()
    }
}

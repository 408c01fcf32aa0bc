//! Staggered MAC (Marker-and-Cell) grid shared by the 2D and 3D solvers.
//!
//! Every cell stores one velocity vector whose components live on the cell's
//! lower faces:
//! - x-velocity on the left face, at `(i * h, (j + 0.5) * h, (k + 0.5) * h)`
//! - y-velocity on the bottom face, at `((i + 0.5) * h, j * h, (k + 0.5) * h)`
//! - z-velocity on the back face, at `((i + 0.5) * h, (j + 0.5) * h, k * h)`
//!
//! Cells are flattened with the last axis fastest:
//! `index = i * (ny * nz) + j * nz + k`. A 2D grid is a grid with `nz = 1`
//! whose z axis is inactive; its velocity z components stay zero.

use std::sync::atomic::{AtomicBool, Ordering};

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::FlipError;
use crate::kernels::Stencil;
use crate::particle::Particle;

/// Number of spatial axes the simulation runs in.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Dimension {
    /// Planar simulation in x/y.
    #[default]
    Two,
    /// Volumetric simulation in x/y/z.
    Three,
}

impl Dimension {
    /// Number of active axes (2 or 3).
    #[inline]
    pub fn axes(self) -> usize {
        match self {
            Dimension::Two => 2,
            Dimension::Three => 3,
        }
    }

    #[inline]
    pub fn is_3d(self) -> bool {
        self == Dimension::Three
    }
}

impl TryFrom<u8> for Dimension {
    type Error = FlipError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Dimension::Two),
            3 => Ok(Dimension::Three),
            other => Err(FlipError::parameter("dimension", other as f32, "2 or 3")),
        }
    }
}

impl From<Dimension> for u8 {
    fn from(dimension: Dimension) -> Self {
        dimension.axes() as u8
    }
}

/// Cell classification, recomputed every step.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum CellType {
    /// Not solid and holds at least one particle
    Fluid = 0,
    /// Not solid and empty
    #[default]
    Air = 1,
    /// Permanent wall
    Solid = 2,
}

/// Mutable velocity/weight with read-only snapshot and cell types.
pub(crate) struct VelocityFieldsMut<'a> {
    pub velocity: &'a mut [Vec3],
    pub weight: &'a mut [Vec3],
    pub prev_velocity: &'a [Vec3],
    pub cell_type: &'a [CellType],
}

/// MAC grid with per-cell staggered velocity, scatter weights and density.
#[derive(Clone, Debug)]
pub struct Grid {
    pub dimension: Dimension,
    /// Number of cells in X direction
    pub nx: usize,
    /// Number of cells in Y direction
    pub ny: usize,
    /// Number of cells in Z direction (1 in 2D)
    pub nz: usize,
    /// Size of each cell in world units
    pub cell_size: f32,
    inv_spacing: f32,

    /// Cell classification (Fluid/Air/Solid)
    cell_type: Vec<CellType>,

    /// Static wall mask, set once at construction
    solid: Vec<bool>,

    /// Face velocities (component `a` sits on the lower face along axis `a`)
    velocity: Vec<Vec3>,

    /// Snapshot of `velocity` (pre-scatter, then pre-projection)
    prev_velocity: Vec<Vec3>,

    /// Accumulated scatter weight per face
    weight: Vec<Vec3>,

    /// Particle density at cell centers
    density: Vec<f32>,
}

impl Grid {
    /// Create a grid whose outer shell of cells is solid.
    ///
    /// In 2D `nz` is ignored and forced to 1.
    pub fn new(dimension: Dimension, nx: usize, ny: usize, nz: usize, cell_size: f32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive, got {}", cell_size);
        let nz = if dimension.is_3d() { nz } else { 1 };
        let cell_count = nx * ny * nz;

        let mut grid = Self {
            dimension,
            nx,
            ny,
            nz,
            cell_size,
            inv_spacing: 1.0 / cell_size,
            cell_type: vec![CellType::Air; cell_count],
            solid: vec![false; cell_count],
            velocity: vec![Vec3::ZERO; cell_count],
            prev_velocity: vec![Vec3::ZERO; cell_count],
            weight: vec![Vec3::ZERO; cell_count],
            density: vec![0.0; cell_count],
        };
        grid.mark_boundary_shell();
        grid.reset_cell_types();
        grid
    }

    fn mark_boundary_shell(&mut self) {
        let dims = self.dims();
        let axes = self.axes();
        for idx in 0..self.cell_count() {
            let coords = self.cell_coords(idx);
            self.solid[idx] = (0..axes).any(|a| coords[a] == 0 || coords[a] == dims[a] - 1);
        }
    }

    // ========== Shape ==========

    #[inline]
    pub fn axes(&self) -> usize {
        self.dimension.axes()
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Cell counts along x, y, z.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    /// Flat-index distance between neighbors along `axis`.
    #[inline]
    pub fn stride(&self, axis: usize) -> usize {
        match axis {
            0 => self.ny * self.nz,
            1 => self.nz,
            _ => 1,
        }
    }

    #[inline]
    pub fn inv_spacing(&self) -> f32 {
        self.inv_spacing
    }

    /// World-space size of the grid (z is 0 in 2D).
    pub fn world_size(&self) -> Vec3 {
        let depth = if self.dimension.is_3d() {
            self.nz as f32 * self.cell_size
        } else {
            0.0
        };
        Vec3::new(
            self.nx as f32 * self.cell_size,
            self.ny as f32 * self.cell_size,
            depth,
        )
    }

    // ========== Field accessors ==========

    pub fn cell_type(&self) -> &[CellType] {
        &self.cell_type
    }

    pub fn cell_type_mut(&mut self) -> &mut [CellType] {
        &mut self.cell_type
    }

    pub fn solid(&self) -> &[bool] {
        &self.solid
    }

    pub fn velocity(&self) -> &[Vec3] {
        &self.velocity
    }

    pub fn velocity_mut(&mut self) -> &mut [Vec3] {
        &mut self.velocity
    }

    pub fn prev_velocity(&self) -> &[Vec3] {
        &self.prev_velocity
    }

    pub fn prev_velocity_mut(&mut self) -> &mut [Vec3] {
        &mut self.prev_velocity
    }

    pub fn weight(&self) -> &[Vec3] {
        &self.weight
    }

    pub fn density(&self) -> &[f32] {
        &self.density
    }

    pub fn density_mut(&mut self) -> &mut [f32] {
        &mut self.density
    }

    /// Disjoint borrows for passes that rewrite velocity from the snapshot.
    pub(crate) fn velocity_fields_mut(&mut self) -> VelocityFieldsMut<'_> {
        VelocityFieldsMut {
            velocity: &mut self.velocity,
            weight: &mut self.weight,
            prev_velocity: &self.prev_velocity,
            cell_type: &self.cell_type,
        }
    }

    // ========== Index functions ==========

    #[inline]
    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        i * (self.ny * self.nz) + j * self.nz + k
    }

    /// Inverse of [`Grid::cell_index`].
    #[inline]
    pub fn cell_coords(&self, idx: usize) -> [usize; 3] {
        let plane = self.ny * self.nz;
        [idx / plane, (idx % plane) / self.nz, idx % self.nz]
    }

    #[inline]
    pub fn is_solid(&self, idx: usize) -> bool {
        self.solid[idx]
    }

    /// Cell containing `pos`, clamped into the grid. Inactive axes map to 0.
    #[inline]
    pub fn world_to_cell(&self, pos: Vec3) -> [usize; 3] {
        let dims = self.dims();
        let mut cell = [0usize; 3];
        for (a, c) in cell.iter_mut().enumerate().take(self.axes()) {
            let f = (pos[a] * self.inv_spacing).floor();
            *c = (f.max(0.0) as usize).min(dims[a] - 1);
        }
        cell
    }

    /// Flat index of the cell containing `pos`.
    #[inline]
    pub fn world_to_index(&self, pos: Vec3) -> usize {
        let [i, j, k] = self.world_to_cell(pos);
        self.cell_index(i, j, k)
    }

    /// World position of the center of cell `idx`.
    pub fn cell_center(&self, idx: usize) -> Vec3 {
        let [i, j, k] = self.cell_coords(idx);
        let z = if self.dimension.is_3d() {
            (k as f32 + 0.5) * self.cell_size
        } else {
            0.0
        };
        Vec3::new(
            (i as f32 + 0.5) * self.cell_size,
            (j as f32 + 0.5) * self.cell_size,
            z,
        )
    }

    // ========== Staggering ==========

    /// Sample offset of velocity component `axis`: zero along its own axis,
    /// half a cell along the other active axes.
    #[inline]
    pub fn component_offset(&self, axis: usize) -> Vec3 {
        let half = 0.5 * self.cell_size;
        let mut offset = Vec3::ZERO;
        for a in 0..self.axes() {
            if a != axis {
                offset[a] = half;
            }
        }
        offset
    }

    /// Sample offset of cell-centered quantities.
    #[inline]
    pub fn center_offset(&self) -> Vec3 {
        self.component_offset(usize::MAX)
    }

    /// Bilinear (2D) or trilinear (3D) interpolation stencil for `pos`
    /// sampled at the given staggering offset.
    #[inline]
    pub fn sample_stencil(&self, pos: Vec3, offset: Vec3) -> Stencil {
        Stencil::build(self, pos, offset)
    }

    // ========== Per-step passes ==========

    /// Reset every cell to Solid or Air from the static mask.
    pub fn reset_cell_types(&mut self) {
        self.cell_type
            .par_iter_mut()
            .zip(self.solid.par_iter())
            .for_each(|(t, &solid)| {
                *t = if solid { CellType::Solid } else { CellType::Air };
            });
    }

    /// Recompute cell types from particle occupancy.
    ///
    /// A cell is Fluid when it is not solid and contains a particle, Air when
    /// it is not solid and empty, Solid otherwise.
    pub fn classify(&mut self, particles: &[Particle]) {
        self.reset_cell_types();

        let occupied: Vec<AtomicBool> = (0..self.cell_count())
            .map(|_| AtomicBool::new(false))
            .collect();
        let grid = &*self;
        particles.par_iter().for_each(|p| {
            occupied[grid.world_to_index(p.position)].store(true, Ordering::Relaxed);
        });

        self.cell_type
            .par_iter_mut()
            .zip(occupied.par_iter())
            .for_each(|(t, occ)| {
                if *t != CellType::Solid && occ.load(Ordering::Relaxed) {
                    *t = CellType::Fluid;
                }
            });
    }

    /// Zero velocity and scatter weights before particle-to-grid accumulation.
    pub fn reset_velocity_and_weight(&mut self) {
        self.velocity.par_iter_mut().for_each(|v| *v = Vec3::ZERO);
        self.weight.par_iter_mut().for_each(|w| *w = Vec3::ZERO);
    }

    /// Copy current velocities into the snapshot buffer.
    pub fn store_prev_velocities(&mut self) {
        self.prev_velocity
            .par_iter_mut()
            .zip(self.velocity.par_iter())
            .for_each(|(prev, &v)| *prev = v);
    }

    pub fn fluid_cell_count(&self) -> usize {
        self.cell_type
            .par_iter()
            .filter(|&&t| t == CellType::Fluid)
            .count()
    }
}

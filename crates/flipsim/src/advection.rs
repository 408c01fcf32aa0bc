//! Particle integration, wall containment and external pushes.

use glam::Vec3;
use rayon::prelude::*;

use crate::grid::Grid;
use crate::particle::Particles;

/// Axis-aligned box particles are confined to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleBounds {
    pub min: Vec3,
    pub max: Vec3,
    /// Number of clamped axes (z is left alone in 2D)
    pub axes: usize,
}

impl ParticleBounds {
    /// Interior of the solid shell, shrunk by the particle radius:
    /// `[h + r, (n - 1) h - r]` on each active axis.
    pub fn for_grid(grid: &Grid, particle_radius: f32) -> Self {
        let h = grid.cell_size;
        let dims = grid.dims();
        let axes = grid.axes();
        let mut min = Vec3::ZERO;
        let mut max = Vec3::ZERO;
        for a in 0..axes {
            min[a] = h + particle_radius;
            max[a] = (dims[a] - 1) as f32 * h - particle_radius;
        }
        Self { min, max, axes }
    }

    #[inline]
    pub fn contains(&self, pos: Vec3) -> bool {
        (0..self.axes).all(|a| pos[a] >= self.min[a] && pos[a] <= self.max[a])
    }
}

/// A velocity push applied to the particles of one grid cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExternalForce {
    /// Target cell (k is 0 in 2D)
    pub cell: [usize; 3],
    /// Velocity added to each particle in the cell
    pub velocity: Vec3,
}

impl ExternalForce {
    pub fn new(cell: [usize; 3], velocity: Vec3) -> Self {
        Self { cell, velocity }
    }

    /// Resolve a world-space pointer position to a cell, the way a tracked
    /// controller is mapped onto the grid.
    pub fn at_position(grid: &Grid, position: Vec3, velocity: Vec3) -> Self {
        let h = grid.cell_size;
        let dims = grid.dims();
        let mut cell = [0usize; 3];
        for a in 0..grid.axes() {
            let p = position[a].clamp(h, (dims[a] - 1) as f32 * h);
            let idx = ((p - 0.5 * h) * grid.inv_spacing()).floor().max(0.0) as usize;
            cell[a] = idx.min(dims[a] - 1);
        }
        Self { cell, velocity }
    }

    /// True if the target cell exists in `grid`.
    pub fn in_bounds(&self, grid: &Grid) -> bool {
        let dims = grid.dims();
        (0..3).all(|a| self.cell[a] < dims[a])
    }
}

/// Apply gravity along +Y, then move particles: `v.y += g dt; x += v dt`.
pub fn integrate_particles(particles: &mut Particles, dt: f32, gravity: f32) {
    particles.list.par_iter_mut().for_each(|particle| {
        particle.velocity.y += dt * gravity;
        particle.position += particle.velocity * dt;
    });
}

/// Clamp particles into `bounds`.
///
/// Any component that sits on or beyond a wall is placed on the wall and its
/// velocity component is zeroed (fully inelastic along that axis).
pub fn enforce_particle_boundaries(particles: &mut Particles, bounds: &ParticleBounds) {
    particles.list.par_iter_mut().for_each(|particle| {
        for a in 0..bounds.axes {
            if particle.position[a] <= bounds.min[a] {
                particle.position[a] = bounds.min[a];
                particle.velocity[a] = 0.0;
            } else if particle.position[a] >= bounds.max[a] {
                particle.position[a] = bounds.max[a];
                particle.velocity[a] = 0.0;
            }
        }
    });
}

/// Zero position and velocity on every axis past the first `axes`, so 2D
/// particles stay in the z = 0 plane.
pub fn flatten_inactive_axes(particles: &mut Particles, axes: usize) {
    particles.list.par_iter_mut().for_each(|particle| {
        for a in axes..3 {
            particle.position[a] = 0.0;
            particle.velocity[a] = 0.0;
        }
    });
}

/// Add the force velocity to every particle inside the target cell.
///
/// Returns how many particles were pushed.
pub fn apply_external_force(particles: &mut Particles, grid: &Grid, force: &ExternalForce) -> usize {
    let [i, j, k] = force.cell;
    let target = grid.cell_index(i, j, k);
    let mut push = Vec3::ZERO;
    for a in 0..grid.axes() {
        push[a] = force.velocity[a];
    }

    particles
        .list
        .par_iter_mut()
        .filter(|p| grid.world_to_index(p.position) == target)
        .map(|p| p.velocity += push)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Dimension;
    use crate::particle::Particle;

    #[test]
    fn test_integration() {
        let mut particles = Particles::new();
        particles.list.push(Particle::new(
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, 2.0, 3.0),
        ));

        integrate_particles(&mut particles, 0.5, -10.0);

        let p = &particles.list[0];
        // v.y = 2 - 5 = -3, then x += v * dt
        assert!((p.velocity.y + 3.0).abs() < 1e-6);
        assert!((p.position.x - 1.5).abs() < 1e-6);
        assert!((p.position.y + 0.5).abs() < 1e-6);
        assert!((p.position.z - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_zero_dt_is_noop() {
        let mut particles = Particles::new();
        particles.spawn(Vec3::new(2.0, 3.0, 0.0), Vec3::new(1.0, -1.0, 0.0));
        let before = particles.list.clone();
        integrate_particles(&mut particles, 0.0, -9.81);
        assert_eq!(particles.list, before);
    }

    #[test]
    fn test_boundary_clamping_zeroes_velocity() {
        let grid = Grid::new(Dimension::Three, 6, 6, 6, 1.0);
        let bounds = ParticleBounds::for_grid(&grid, 0.25);
        assert_eq!(bounds.min, Vec3::splat(1.25));
        assert_eq!(bounds.max, Vec3::splat(4.75));

        let mut particles = Particles::new();
        particles.spawn(Vec3::new(-1.0, 3.0, 9.0), Vec3::new(-2.0, 1.0, 5.0));
        particles.spawn(Vec3::new(3.0, 3.0, 3.0), Vec3::new(1.0, 1.0, 1.0));

        enforce_particle_boundaries(&mut particles, &bounds);

        let clamped = particles.list[0];
        assert_eq!(clamped.position, Vec3::new(1.25, 3.0, 4.75));
        assert_eq!(clamped.velocity, Vec3::new(0.0, 1.0, 0.0));

        let free = particles.list[1];
        assert_eq!(free.velocity, Vec3::ONE);
    }

    #[test]
    fn test_2d_boundaries_leave_z_alone() {
        let grid = Grid::new(Dimension::Two, 6, 6, 1, 1.0);
        let bounds = ParticleBounds::for_grid(&grid, 0.25);
        assert_eq!(bounds.axes, 2);

        let mut particles = Particles::new();
        particles.spawn(Vec3::new(3.0, 0.0, 0.0), Vec3::new(0.5, -4.0, 0.0));
        enforce_particle_boundaries(&mut particles, &bounds);

        let p = particles.list[0];
        assert_eq!(p.position, Vec3::new(3.0, 1.25, 0.0));
        assert_eq!(p.velocity, Vec3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn test_flatten_inactive_axes() {
        let mut particles = Particles::new();
        particles.spawn(Vec3::new(2.0, 3.0, 4.0), Vec3::new(1.0, -1.0, 5.0));

        flatten_inactive_axes(&mut particles, 3);
        assert_eq!(particles.list[0].position, Vec3::new(2.0, 3.0, 4.0));

        flatten_inactive_axes(&mut particles, 2);
        let p = particles.list[0];
        assert_eq!(p.position, Vec3::new(2.0, 3.0, 0.0));
        assert_eq!(p.velocity, Vec3::new(1.0, -1.0, 0.0));
    }

    #[test]
    fn test_force_at_position_maps_to_stencil_cell() {
        let grid = Grid::new(Dimension::Two, 10, 10, 1, 1.0);
        let force = ExternalForce::at_position(&grid, Vec3::new(4.7, 2.2, 5.0), Vec3::X);
        assert_eq!(force.cell, [4, 1, 0]);
        assert!(force.in_bounds(&grid));

        // Far outside clamps to the last interior stencil base
        let force = ExternalForce::at_position(&grid, Vec3::splat(100.0), Vec3::X);
        assert_eq!(force.cell, [8, 8, 0]);
    }

    #[test]
    fn test_apply_external_force_targets_one_cell() {
        let grid = Grid::new(Dimension::Two, 8, 8, 1, 1.0);
        let mut particles = Particles::new();
        particles.spawn_at(Vec3::new(3.5, 3.5, 0.0));
        particles.spawn_at(Vec3::new(3.1, 3.9, 0.0));
        particles.spawn_at(Vec3::new(5.5, 3.5, 0.0));

        let force = ExternalForce::new([3, 3, 0], Vec3::new(2.0, 1.0, 7.0));
        let pushed = apply_external_force(&mut particles, &grid, &force);

        assert_eq!(pushed, 2);
        assert_eq!(particles.list[0].velocity, Vec3::new(2.0, 1.0, 0.0));
        assert_eq!(particles.list[1].velocity, Vec3::new(2.0, 1.0, 0.0));
        assert_eq!(particles.list[2].velocity, Vec3::ZERO);
    }
}

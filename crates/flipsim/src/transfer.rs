//! Particle-Grid transfer for PIC/FLIP.
//!
//! P2G: scatter particle velocity to the staggered faces with the linear
//! stencil, accumulating in fixed point so the result does not depend on
//! thread scheduling.
//! G2P: gather back with the same stencil, masking faces that touch no
//! fluid or solid, and blend the PIC sample with the FLIP update.

use glam::Vec3;
use rayon::prelude::*;

use crate::fixed_point::{decode, FixedPointBuffer};
use crate::grid::{CellType, Grid};
use crate::particle::Particles;

/// Pre-allocated scatter accumulators (avoids allocation each frame).
pub struct TransferBuffers {
    pub velocity_sum: FixedPointBuffer,
    pub weight_sum: FixedPointBuffer,
}

impl TransferBuffers {
    /// Create buffers sized for the given grid.
    pub fn new(grid: &Grid) -> Self {
        Self {
            velocity_sum: FixedPointBuffer::vectors(grid.cell_count()),
            weight_sum: FixedPointBuffer::vectors(grid.cell_count()),
        }
    }

    pub fn clear(&mut self) {
        self.velocity_sum.clear();
        self.weight_sum.clear();
    }
}

/// Transfer particle velocities to the grid (P2G).
///
/// Every face with positive accumulated weight gets the weighted mean of the
/// particle velocities around it. Faces no particle reaches keep the value
/// from the velocity snapshot, so call [`Grid::store_prev_velocities`] first.
pub fn particles_to_grid(grid: &mut Grid, particles: &Particles, buffers: &mut TransferBuffers) {
    buffers.clear();
    let buffers = &*buffers;

    let axes = grid.axes();
    let offsets = [
        grid.component_offset(0),
        grid.component_offset(1),
        grid.component_offset(2),
    ];

    {
        let grid = &*grid;
        particles.list.par_iter().for_each(|particle| {
            for (a, &offset) in offsets.iter().enumerate().take(axes) {
                let stencil = grid.sample_stencil(particle.position, offset);
                let v = particle.velocity[a];
                for (idx, w) in stencil.iter() {
                    buffers.velocity_sum.add_component(idx, a, w * v);
                    buffers.weight_sum.add_component(idx, a, w);
                }
            }
        });
    }

    // Normalize: velocity = momentum / weight
    let fields = grid.velocity_fields_mut();
    fields
        .velocity
        .par_iter_mut()
        .zip(fields.weight.par_iter_mut())
        .zip(fields.prev_velocity.par_iter())
        .enumerate()
        .for_each(|(idx, ((velocity, weight), prev))| {
            for a in 0..axes {
                let slot = idx * 3 + a;
                let raw_weight = buffers.weight_sum.raw(slot);
                if raw_weight > 0 {
                    let w = decode(raw_weight);
                    weight[a] = w;
                    velocity[a] = buffers.velocity_sum.load(slot) / w;
                } else {
                    weight[a] = 0.0;
                    velocity[a] = prev[a];
                }
            }
        });
}

/// Put back the snapshot value on every face that touches a wall.
///
/// Component `a` of cell `idx` is restored when the cell itself or its lower
/// neighbor along `a` is solid.
pub fn restore_solid_velocities(grid: &mut Grid) {
    let axes = grid.axes();
    let dims = grid.dims();
    let strides = [grid.stride(0), grid.stride(1), grid.stride(2)];

    let fields = grid.velocity_fields_mut();
    let cell_type = fields.cell_type;
    let prev = fields.prev_velocity;
    fields
        .velocity
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, velocity)| {
            let solid_here = cell_type[idx] == CellType::Solid;
            for a in 0..axes {
                let coord = (idx / strides[a]) % dims[a];
                let solid_below = coord > 0 && cell_type[idx - strides[a]] == CellType::Solid;
                if solid_here || solid_below {
                    velocity[a] = prev[idx][a];
                }
            }
        });
}

/// Masked linear gather of component `axis` at `pos`.
///
/// Returns the PIC sample and the FLIP increment (current minus snapshot),
/// or `None` when no corner touches fluid or a wall.
#[inline]
fn gather_component(grid: &Grid, pos: Vec3, axis: usize) -> Option<(f32, f32)> {
    let cell_type = grid.cell_type();
    let velocity = grid.velocity();
    let prev = grid.prev_velocity();
    let stride = grid.stride(axis);

    let stencil = grid.sample_stencil(pos, grid.component_offset(axis));
    let mut weight_sum = 0.0;
    let mut pic = 0.0;
    let mut delta = 0.0;
    for (idx, w) in stencil.iter() {
        // Along its own axis the stencil never reaches index 0, so the lower
        // neighbor always exists.
        let valid = cell_type[idx] != CellType::Air || cell_type[idx - stride] != CellType::Air;
        if !valid || w <= 0.0 {
            continue;
        }
        let v = velocity[idx][axis];
        weight_sum += w;
        pic += w * v;
        delta += w * (v - prev[idx][axis]);
    }

    if weight_sum > 0.0 {
        Some((pic / weight_sum, delta / weight_sum))
    } else {
        None
    }
}

/// Interpolated grid velocity at `pos` (masked components read as zero).
pub fn sample_velocity(grid: &Grid, pos: Vec3) -> Vec3 {
    let mut v = Vec3::ZERO;
    for a in 0..grid.axes() {
        if let Some((pic, _)) = gather_component(grid, pos, a) {
            v[a] = pic;
        }
    }
    v
}

/// Transfer grid velocities to particles (G2P).
///
/// `flip_ratio = 0` is pure PIC (resample), `1` is pure FLIP (add the grid
/// change since the snapshot). Components with no valid corner keep the
/// particle's velocity.
pub fn grid_to_particles(
    grid: &Grid,
    particles: &mut Particles,
    flip_ratio: f32,
    max_speed: f32,
) {
    let axes = grid.axes();

    particles.list.par_iter_mut().for_each(|particle| {
        let old_vel = particle.velocity;
        let mut final_vel = old_vel;

        for a in 0..axes {
            if let Some((pic, delta)) = gather_component(grid, particle.position, a) {
                let flip = old_vel[a] + delta;
                final_vel[a] = flip_ratio * flip + (1.0 - flip_ratio) * pic;
            }
        }

        // Clamp velocity to prevent numerical explosion
        let speed = final_vel.length();
        if speed > max_speed {
            final_vel *= max_speed / speed;
        }

        // Safety: NaN/Inf check
        if !final_vel.is_finite() {
            final_vel = Vec3::ZERO;
        }

        particle.velocity = final_vel;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Dimension;

    fn flood_interior(grid: &mut Grid) {
        for t in grid.cell_type_mut() {
            if *t == CellType::Air {
                *t = CellType::Fluid;
            }
        }
    }

    #[test]
    fn test_p2g_single_particle_spreads_unit_weight() {
        let mut grid = Grid::new(Dimension::Two, 8, 8, 1, 1.0);
        let mut buffers = TransferBuffers::new(&grid);
        let mut particles = Particles::new();
        particles.spawn(Vec3::new(3.3, 4.6, 0.0), Vec3::new(2.0, -1.0, 0.0));

        particles_to_grid(&mut grid, &particles, &mut buffers);

        for a in 0..2 {
            let total: f32 = grid.weight().iter().map(|w| w[a]).sum();
            assert!(
                (total - 1.0).abs() < 1e-5,
                "axis {} weight sums to {}",
                a,
                total
            );
        }
        for (w, v) in grid.weight().iter().zip(grid.velocity()) {
            if w.x > 0.0 {
                assert!((v.x - 2.0).abs() < 1e-3, "u = {}", v.x);
            }
            if w.y > 0.0 {
                assert!((v.y + 1.0).abs() < 1e-3, "v = {}", v.y);
            }
            assert_eq!(v.z, 0.0);
        }
    }

    #[test]
    fn test_p2g_unreached_faces_keep_snapshot() {
        let mut grid = Grid::new(Dimension::Two, 8, 8, 1, 1.0);
        let mut buffers = TransferBuffers::new(&grid);
        grid.prev_velocity_mut().fill(Vec3::new(5.0, 5.0, 0.0));

        let mut particles = Particles::new();
        particles.spawn(Vec3::new(2.5, 2.5, 0.0), Vec3::ONE);
        particles_to_grid(&mut grid, &particles, &mut buffers);

        let far = grid.cell_index(6, 6, 0);
        assert_eq!(grid.weight()[far], Vec3::ZERO);
        assert_eq!(grid.velocity()[far], Vec3::new(5.0, 5.0, 0.0));
    }

    #[test]
    fn test_p2g_3d_scatters_z() {
        let mut grid = Grid::new(Dimension::Three, 6, 6, 6, 1.0);
        let mut buffers = TransferBuffers::new(&grid);
        let mut particles = Particles::new();
        particles.spawn(Vec3::new(2.4, 2.6, 3.1), Vec3::new(0.0, 0.0, -3.0));

        particles_to_grid(&mut grid, &particles, &mut buffers);

        let total: f32 = grid.weight().iter().map(|w| w.z).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(grid
            .weight()
            .iter()
            .zip(grid.velocity())
            .filter(|(w, _)| w.z > 0.0)
            .all(|(_, v)| (v.z + 3.0).abs() < 1e-3));
    }

    #[test]
    fn test_restore_solid_velocities() {
        let mut grid = Grid::new(Dimension::Two, 5, 5, 1, 1.0);
        grid.velocity_mut().fill(Vec3::new(9.0, 9.0, 0.0));
        grid.prev_velocity_mut().fill(Vec3::new(1.0, 2.0, 0.0));

        restore_solid_velocities(&mut grid);

        let v = grid.velocity();
        // Left face touches the x = 0 wall, bottom face is interior
        assert_eq!(v[grid.cell_index(1, 2, 0)], Vec3::new(1.0, 9.0, 0.0));
        assert_eq!(v[grid.cell_index(2, 1, 0)], Vec3::new(9.0, 2.0, 0.0));
        assert_eq!(v[grid.cell_index(2, 2, 0)], Vec3::new(9.0, 9.0, 0.0));
        assert_eq!(v[grid.cell_index(0, 2, 0)], Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_g2p_pure_pic_resamples_grid() {
        let mut grid = Grid::new(Dimension::Two, 8, 8, 1, 1.0);
        flood_interior(&mut grid);
        grid.velocity_mut().fill(Vec3::new(1.0, 2.0, 0.0));

        let mut particles = Particles::new();
        particles.spawn(Vec3::new(3.7, 4.2, 0.0), Vec3::new(7.0, 7.0, 0.0));
        grid_to_particles(&grid, &mut particles, 0.0, 100.0);

        let v = particles.list[0].velocity;
        assert!((v - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5, "got {:?}", v);
        assert_eq!(v, sample_velocity(&grid, particles.list[0].position));
    }

    #[test]
    fn test_g2p_pure_flip_adds_grid_change() {
        let mut grid = Grid::new(Dimension::Two, 8, 8, 1, 1.0);
        flood_interior(&mut grid);
        grid.velocity_mut().fill(Vec3::new(1.0, 2.0, 0.0));
        grid.prev_velocity_mut().fill(Vec3::new(0.5, 0.5, 0.0));

        let mut particles = Particles::new();
        particles.spawn(Vec3::new(4.1, 3.3, 0.0), Vec3::new(3.0, 0.0, 0.0));
        grid_to_particles(&grid, &mut particles, 1.0, 100.0);

        let v = particles.list[0].velocity;
        assert!((v - Vec3::new(3.5, 1.5, 0.0)).length() < 1e-5, "got {:?}", v);
    }

    #[test]
    fn test_g2p_without_fluid_keeps_velocity() {
        let grid = Grid::new(Dimension::Two, 10, 10, 1, 1.0);
        let mut particles = Particles::new();
        particles.spawn(Vec3::new(5.2, 5.3, 0.0), Vec3::new(1.0, -1.0, 0.0));

        grid_to_particles(&grid, &mut particles, 0.9, 100.0);

        assert_eq!(particles.list[0].velocity, Vec3::new(1.0, -1.0, 0.0));
    }

    #[test]
    fn test_g2p_clamps_speed() {
        let mut grid = Grid::new(Dimension::Three, 6, 6, 6, 1.0);
        flood_interior(&mut grid);
        grid.velocity_mut().fill(Vec3::new(300.0, 0.0, 400.0));

        let mut particles = Particles::new();
        particles.spawn_at(Vec3::splat(3.0));
        grid_to_particles(&grid, &mut particles, 0.0, 10.0);

        let speed = particles.list[0].velocity.length();
        assert!((speed - 10.0).abs() < 1e-3, "speed {}", speed);
    }
}

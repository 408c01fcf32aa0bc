//! Initial particle placement.
//!
//! The dam-break block is a staggered lattice packed against the lower-left
//! (and back, in 3D) corner of the domain: rows two radii apart, odd rows
//! shifted by one radius, and in 3D odd layers shifted once more.

use glam::Vec3;

use crate::config::{FlipConfig, GridLayout};
use crate::error::{FlipError, FlipResult};
use crate::particle::Particles;

/// Lattice counts along each axis for the configured water block.
pub fn dam_break_counts(config: &FlipConfig, layout: &GridLayout) -> [usize; 3] {
    let h0 = layout.nominal_spacing;
    let r = layout.particle_radius;
    let dx = 2.0 * r;
    let dy = 2.0 * r;
    let dz = 3.0f32.sqrt() * r;

    let count = |extent: f32, step: f32| {
        ((extent - 2.0 * h0 - 2.0 * r) / step).floor().max(0.0) as usize
    };

    let num_x = count(config.relative_water_width * config.sim_width, dx);
    let num_y = count(config.relative_water_height * config.sim_height, dy);
    let num_z = if config.dimension.is_3d() {
        count(config.sim_depth, dz)
    } else {
        1
    };
    [num_x, num_y, num_z]
}

/// Spawn the dam-break block. Fails if the block holds no particle.
pub fn spawn_dam_break(config: &FlipConfig, layout: &GridLayout) -> FlipResult<Particles> {
    let [num_x, num_y, num_z] = dam_break_counts(config, layout);
    let total = num_x * num_y * num_z;
    if total == 0 {
        return Err(FlipError::NoParticles);
    }

    let h = layout.cell_size;
    let r = layout.particle_radius;
    let dx = 2.0 * r;
    let dy = 2.0 * r;
    let dz = 3.0f32.sqrt() * r;
    let is_3d = config.dimension.is_3d();

    let mut particles = Particles::with_capacity(total);
    for i in 0..num_x {
        for j in 0..num_y {
            for k in 0..num_z {
                let row_shift = if j % 2 == 0 { 0.0 } else { r };
                let layer_shift = if k % 2 == 0 { 0.0 } else { r };
                let z = if is_3d { h + r + dz * k as f32 } else { 0.0 };
                particles.spawn_at(Vec3::new(
                    h + r + dx * i as f32 + row_shift + layer_shift,
                    h + r + dy * j as f32,
                    z,
                ));
            }
        }
    }
    Ok(particles)
}

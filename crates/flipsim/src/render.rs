//! Per-particle render data for instanced drawing.
//!
//! The simulation does no drawing itself. It hands out one transform per
//! particle and a GPU-ready instance layout a renderer can upload as is.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

use crate::config::FlipConfig;
use crate::particle::Particle;

/// Position, uniform scale and color of one rendered particle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleTransform {
    pub position: Vec3,
    pub scale: f32,
    pub color: [f32; 4],
}

impl ParticleTransform {
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), Quat::IDENTITY, self.position)
    }

    pub fn to_instance(&self) -> ParticleInstance {
        ParticleInstance {
            model: self.model_matrix().to_cols_array_2d(),
            color: self.color,
        }
    }
}

/// Instance record: column-major model matrix followed by RGBA.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default, Debug, PartialEq)]
pub struct ParticleInstance {
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
}

/// Byte view of an instance buffer, ready for upload.
pub fn instance_bytes(instances: &[ParticleInstance]) -> &[u8] {
    bytemuck::cast_slice(instances)
}

/// Size and speed-to-color mapping for particles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleStyle {
    pub scale: f32,
    pub base_color: [f32; 4],
    pub fast_color: [f32; 4],
    pub color_speed_scale: f32,
}

impl ParticleStyle {
    pub fn from_config(config: &FlipConfig, particle_radius: f32) -> Self {
        Self {
            scale: particle_radius * config.particle_render_scale,
            base_color: config.base_color,
            fast_color: config.fast_color,
            color_speed_scale: config.color_speed_scale,
        }
    }

    /// Blend from `base_color` at rest to `fast_color` at `color_speed_scale`.
    pub fn color_for_speed(&self, speed: f32) -> [f32; 4] {
        let t = (speed / self.color_speed_scale).clamp(0.0, 1.0);
        let mut color = [0.0; 4];
        for (c, (base, fast)) in color
            .iter_mut()
            .zip(self.base_color.iter().zip(self.fast_color.iter()))
        {
            *c = base + (fast - base) * t;
        }
        color
    }

    pub fn transform(&self, particle: &Particle) -> ParticleTransform {
        ParticleTransform {
            position: particle.position,
            scale: self.scale,
            color: self.color_for_speed(particle.velocity.length()),
        }
    }
}

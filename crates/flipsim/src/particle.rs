//! Particle representation for the FLIP simulation.

use glam::Vec3;

/// A single fluid particle. In 2D the z components stay zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    /// World position
    pub position: Vec3,
    /// Current velocity
    pub velocity: Vec3,
}

impl Particle {
    /// Create a new particle at the given position with initial velocity.
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }

    /// Create a stationary particle at the given position.
    pub fn at(position: Vec3) -> Self {
        Self::new(position, Vec3::ZERO)
    }
}

impl Default for Particle {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// Fixed-population particle set.
#[derive(Clone, Debug, Default)]
pub struct Particles {
    pub list: Vec<Particle>,
}

impl Particles {
    /// Create an empty particle collection.
    pub fn new() -> Self {
        Self { list: Vec::new() }
    }

    /// Create with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity),
        }
    }

    /// Add a particle with the given position and velocity.
    pub fn spawn(&mut self, position: Vec3, velocity: Vec3) {
        self.list.push(Particle::new(position, velocity));
    }

    /// Add a stationary particle.
    pub fn spawn_at(&mut self, position: Vec3) {
        self.list.push(Particle::at(position));
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn as_slice(&self) -> &[Particle] {
        &self.list
    }

    /// Largest particle speed, 0 for an empty set.
    pub fn max_speed(&self) -> f32 {
        self.list
            .iter()
            .map(|p| p.velocity.length())
            .fold(0.0, f32::max)
    }
}

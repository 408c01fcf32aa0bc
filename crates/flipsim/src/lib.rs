//! PIC/FLIP Fluid Simulation
//!
//! A hybrid particle/grid fluid solver on a staggered MAC grid, in 2D or 3D.
//! Particles carry the fluid; each step they are splatted onto the grid, the
//! grid is relaxed toward zero divergence, and the change is carried back to
//! the particles with a FLIP/PIC blend.
//!
//! Every pass runs in parallel with rayon. Many-to-one writes go through
//! fixed-point atomic accumulators, so a step produces the same result
//! whatever the thread count.
//!
//! # Example
//!
//! ```
//! use flipsim::{FlipConfig, FlipSimulation};
//!
//! let config = FlipConfig {
//!     sim_width: 10.0,
//!     sim_height: 5.0,
//!     ..FlipConfig::dam_break_2d()
//! };
//! let mut sim = FlipSimulation::new(config).unwrap();
//!
//! // Run simulation step
//! sim.step(1.0 / 60.0, None).unwrap();
//!
//! for transform in sim.particle_transforms() {
//!     assert!(transform.position.is_finite());
//! }
//! ```

pub mod advection;
pub mod config;
pub mod constants;
pub mod density;
pub mod error;
pub mod fixed_point;
pub mod grid;
pub mod kernels;
pub mod particle;
pub mod pressure;
pub mod render;
pub mod spawning;
pub mod transfer;

pub use advection::{ExternalForce, ParticleBounds};
pub use config::{FlipConfig, GridLayout};
pub use density::DensityEstimator;
pub use error::{FlipError, FlipResult};
pub use glam::Vec3;
pub use grid::{CellType, Dimension, Grid};
pub use particle::{Particle, Particles};
pub use pressure::{IncompressibilitySolver, SolveStats, SolverSettings};
pub use render::{ParticleInstance, ParticleStyle, ParticleTransform};

use transfer::TransferBuffers;

/// PIC/FLIP fluid simulation state.
pub struct FlipSimulation {
    config: FlipConfig,
    layout: GridLayout,

    /// The MAC grid for velocity, density and cell types
    pub grid: Grid,
    /// All particles in the simulation
    pub particles: Particles,

    bounds: ParticleBounds,
    style: ParticleStyle,
    solver_settings: SolverSettings,

    /// Scatter buffers (pre-allocated to avoid per-frame allocation)
    transfer_buffers: TransferBuffers,
    density: DensityEstimator,
    solver: IncompressibilitySolver,

    frame: u64,
    last_solve_stats: SolveStats,
}

impl FlipSimulation {
    /// Validate `config`, size the grid and spawn the dam-break block.
    pub fn new(config: FlipConfig) -> FlipResult<Self> {
        config.validate()?;
        let layout = GridLayout::from_config(&config)?;
        let particles = spawning::spawn_dam_break(&config, &layout)?;
        Self::build(config, layout, particles)
    }

    /// Like [`FlipSimulation::new`] but with caller-supplied particles
    /// instead of the dam-break block.
    ///
    /// Non-finite particles are rejected. In 2D the z components are zeroed,
    /// and particles outside the walls are clamped onto them.
    pub fn with_particles(config: FlipConfig, particles: Particles) -> FlipResult<Self> {
        config.validate()?;
        let layout = GridLayout::from_config(&config)?;
        if particles.is_empty() {
            return Err(FlipError::NoParticles);
        }
        let non_finite = particles
            .list
            .iter()
            .position(|p| !p.position.is_finite() || !p.velocity.is_finite());
        if let Some(index) = non_finite {
            return Err(FlipError::NonFiniteParticle { index });
        }

        let mut sim = Self::build(config, layout, particles)?;
        sim.confine_particles();
        Ok(sim)
    }

    fn build(config: FlipConfig, layout: GridLayout, particles: Particles) -> FlipResult<Self> {
        let grid = Grid::new(
            config.dimension,
            layout.nx,
            layout.ny,
            layout.nz,
            layout.cell_size,
        );
        let bounds = ParticleBounds::for_grid(&grid, layout.particle_radius);
        let style = ParticleStyle::from_config(&config, layout.particle_radius);
        let solver_settings = SolverSettings::from(&config);
        let transfer_buffers = TransferBuffers::new(&grid);
        let density = DensityEstimator::new(&grid, config.rest_density_multiplier);
        let solver = IncompressibilitySolver::new(&grid);

        log::info!(
            "Initialized {}D simulation: {} particles, grid {}x{}x{}, cell size {:.4}, particle radius {:.4}",
            config.dimension.axes(),
            particles.len(),
            layout.nx,
            layout.ny,
            layout.nz,
            layout.cell_size,
            layout.particle_radius
        );

        Ok(Self {
            config,
            layout,
            grid,
            particles,
            bounds,
            style,
            solver_settings,
            transfer_buffers,
            density,
            solver,
            frame: 0,
            last_solve_stats: SolveStats::default(),
        })
    }

    /// Put caller-supplied particles into the simulable region.
    fn confine_particles(&mut self) {
        advection::flatten_inactive_axes(&mut self.particles, self.config.dimension.axes());
        let outside = self
            .particles
            .list
            .iter()
            .filter(|p| !self.bounds.contains(p.position))
            .count();
        if outside > 0 {
            log::warn!("Clamped {} particles placed outside the walls", outside);
        }
        advection::enforce_particle_boundaries(&mut self.particles, &self.bounds);
    }

    /// Advance by `dt` wall-clock seconds.
    ///
    /// Simulated time is `dt * time_scale`, split over `sub_steps` full
    /// pipelines. `force` pushes the particles of one cell during the first
    /// sub-step. Invalid input is rejected before any state changes.
    pub fn step(&mut self, dt: f32, force: Option<ExternalForce>) -> FlipResult<()> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(FlipError::InvalidTimeStep(dt));
        }
        if let Some(force) = &force {
            if !force.in_bounds(&self.grid) {
                return Err(FlipError::ForceOutOfBounds {
                    cell: force.cell,
                    dims: self.grid.dims(),
                });
            }
            if !force.velocity.is_finite() {
                return Err(FlipError::parameter(
                    "force.velocity",
                    force.velocity.length(),
                    "finite",
                ));
            }
        }

        let sub_steps = self.config.sub_steps.max(1);
        let sub_dt = dt * self.config.time_scale / sub_steps as f32;
        for s in 0..sub_steps {
            let force = if s == 0 { force.as_ref() } else { None };
            self.substep(sub_dt, force);
        }

        self.frame += 1;
        log::debug!(
            "Frame {}: {} fluid cells, {} solver iterations, max divergence {:.6}",
            self.frame,
            self.grid.fluid_cell_count(),
            self.last_solve_stats.iterations,
            self.last_solve_stats.max_divergence
        );
        Ok(())
    }

    /// One full pipeline of simulated duration `dt`.
    fn substep(&mut self, dt: f32, force: Option<&ExternalForce>) {
        // 1. External push, gravity and particle motion
        if let Some(force) = force {
            advection::apply_external_force(&mut self.particles, &self.grid, force);
        }
        advection::integrate_particles(&mut self.particles, dt, self.config.gravity);

        // 2. Keep particles inside the solid shell
        advection::enforce_particle_boundaries(&mut self.particles, &self.bounds);

        // 3. Classify cells from post-move positions
        self.grid.classify(self.particles.as_slice());

        // 4. Snapshot last step's grid velocity, then clear accumulators
        self.grid.store_prev_velocities();
        self.grid.reset_velocity_and_weight();

        // 5. P2G, then undo any flow into walls
        transfer::particles_to_grid(&mut self.grid, &self.particles, &mut self.transfer_buffers);
        transfer::restore_solid_velocities(&mut self.grid);

        // 6. Density; the first call calibrates the rest density
        self.density.accumulate(&mut self.grid, &self.particles);
        let rest_density = self.density.calibrate_rest_density(&self.grid);

        // 7. Store the pre-solve field for the FLIP delta, then relax
        self.grid.store_prev_velocities();
        let settings = &self.solver_settings;
        self.last_solve_stats = self.solver.solve(&mut self.grid, settings, rest_density);

        // 8. G2P
        transfer::grid_to_particles(
            &self.grid,
            &mut self.particles,
            self.config.flip_ratio,
            self.config.max_particle_speed,
        );
    }

    // ========== Render and debug surface ==========

    /// Position, scale and speed color of every particle.
    pub fn particle_transforms(&self) -> Vec<ParticleTransform> {
        self.particles
            .list
            .iter()
            .map(|p| self.style.transform(p))
            .collect()
    }

    /// GPU instance records for every particle.
    pub fn particle_instances(&self) -> Vec<ParticleInstance> {
        self.particles
            .list
            .iter()
            .map(|p| self.style.transform(p).to_instance())
            .collect()
    }

    /// Type of every cell, in grid index order.
    pub fn cell_types(&self) -> &[CellType] {
        self.grid.cell_type()
    }

    /// Center and type of every FLUID or SOLID cell.
    pub fn debug_cells(&self) -> Vec<(Vec3, CellType)> {
        self.grid
            .cell_type()
            .iter()
            .enumerate()
            .filter(|&(_, &t)| t != CellType::Air)
            .map(|(idx, &t)| (self.grid.cell_center(idx), t))
            .collect()
    }

    // ========== Diagnostics ==========

    /// Configuration the simulation was built from.
    pub fn config(&self) -> &FlipConfig {
        &self.config
    }

    /// Grid resolution and spacing.
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Completed `step` calls.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Number of live particles.
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Get world bounds as (min, max) vectors.
    pub fn world_bounds(&self) -> (Vec3, Vec3) {
        (Vec3::ZERO, self.grid.world_size())
    }

    /// Cells classified FLUID in the last step.
    pub fn fluid_cell_count(&self) -> usize {
        self.grid.fluid_cell_count()
    }

    /// Calibrated rest density, `None` before the first step.
    pub fn rest_density(&self) -> Option<f32> {
        self.density.rest_density()
    }

    /// Solver iterations and residual of the last sub-step.
    pub fn last_solve_stats(&self) -> SolveStats {
        self.last_solve_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> FlipConfig {
        FlipConfig {
            sim_width: 10.0,
            sim_height: 5.0,
            ..FlipConfig::default()
        }
    }

    #[test]
    fn test_simulation_creation() {
        let sim = FlipSimulation::new(small_config()).unwrap();
        assert_eq!((sim.grid.nx, sim.grid.ny, sim.grid.nz), (21, 11, 1));
        assert!(sim.particle_count() > 0);
        assert_eq!(sim.frame(), 0);
        assert_eq!(sim.rest_density(), None);
        assert_eq!(sim.world_bounds().0, Vec3::ZERO);
    }

    #[test]
    fn test_first_step_calibrates_rest_density() {
        let mut sim = FlipSimulation::new(small_config()).unwrap();
        sim.step(1.0 / 60.0, None).unwrap();

        let rest = sim.rest_density().unwrap();
        assert!(rest > 0.0);
        assert_eq!(sim.frame(), 1);

        sim.step(1.0 / 60.0, None).unwrap();
        assert_eq!(sim.rest_density(), Some(rest));
    }

    #[test]
    fn test_fluid_cells_follow_particles() {
        let mut sim = FlipSimulation::new(small_config()).unwrap();
        sim.step(0.0, None).unwrap();
        assert!(sim.fluid_cell_count() > 0);

        let debug = sim.debug_cells();
        assert_eq!(
            debug.iter().filter(|(_, t)| *t == CellType::Fluid).count(),
            sim.fluid_cell_count()
        );
        assert!(debug.iter().all(|(_, t)| *t != CellType::Air));
    }

    #[test]
    fn test_render_data_matches_particles() {
        let sim = FlipSimulation::new(small_config()).unwrap();
        let transforms = sim.particle_transforms();
        let instances = sim.particle_instances();
        assert_eq!(transforms.len(), sim.particle_count());
        assert_eq!(instances.len(), sim.particle_count());

        // At rest every particle has the base color
        assert!(transforms.iter().all(|t| t.color == sim.config().base_color));
        let radius = sim.layout().particle_radius;
        assert!((transforms[0].scale - radius).abs() < 1e-6);
    }

    #[test]
    fn test_sub_steps_share_the_step() {
        let config = FlipConfig {
            sub_steps: 4,
            ..small_config()
        };
        let mut sim = FlipSimulation::new(config).unwrap();
        sim.step(1.0 / 30.0, None).unwrap();
        assert_eq!(sim.frame(), 1);
        assert!(sim.particles.list.iter().all(|p| p.velocity.is_finite()));
    }
}

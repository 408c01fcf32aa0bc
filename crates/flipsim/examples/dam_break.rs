//! Headless dam break
//!
//! Run with: cargo run --release --example dam_break [config.json]
//!
//! Without an argument the 2D default scenario runs. Set `RUST_LOG=debug` for
//! a per-frame summary.

use std::path::Path;
use std::time::Instant;

use flipsim::{ExternalForce, FlipConfig, FlipResult, FlipSimulation, Vec3};

const STEPS: u32 = 240;
const DT: f32 = 1.0 / 60.0;
const REPORT_EVERY: u32 = 60;

fn main() -> FlipResult<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => FlipConfig::load_json(Path::new(&path))?,
        None => FlipConfig::dam_break_2d(),
    };

    let mut sim = FlipSimulation::new(config)?;
    let (_, max) = sim.world_bounds();
    println!("=== Dam Break ({}D) ===", sim.config().dimension.axes());
    println!(
        "Grid: {}x{}x{}, cell size: {:.4}",
        sim.grid.nx, sim.grid.ny, sim.grid.nz, sim.grid.cell_size
    );
    println!("Particles: {}", sim.particle_count());

    // Stir the right side of the tank for the first second
    let stir_point = Vec3::new(max.x * 0.75, max.y * 0.25, max.z * 0.5);
    let stir = ExternalForce::at_position(&sim.grid, stir_point, Vec3::new(-4.0, 2.0, 0.0));

    let start = Instant::now();
    for step in 1..=STEPS {
        let force = if step <= 60 { Some(stir) } else { None };
        sim.step(DT, force)?;

        if step % REPORT_EVERY == 0 {
            let stats = sim.last_solve_stats();
            let max_speed = sim.particles.max_speed();
            println!(
                "Frame {:4}: fluid cells {:5}, max speed {:6.3}, max divergence {:.5}",
                sim.frame(),
                sim.fluid_cell_count(),
                max_speed,
                stats.max_divergence
            );
        }
    }
    let elapsed = start.elapsed();

    println!(
        "Steps: {}, avg: {:.3} ms/step",
        STEPS,
        elapsed.as_secs_f64() * 1000.0 / STEPS as f64
    );
    if let Some(rest) = sim.rest_density() {
        println!("Rest density: {:.4}", rest);
    }

    let instances = sim.particle_instances();
    println!(
        "Instance buffer: {} bytes",
        flipsim::render::instance_bytes(&instances).len()
    );
    Ok(())
}

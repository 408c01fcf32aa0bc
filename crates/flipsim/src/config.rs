//! Simulation configuration and the grid layout derived from it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FLIP_RATIO, DEFAULT_OVERRELAXATION, GRAVITY, MAX_GRID_CELLS, MIN_CELLS_PER_AXIS,
    PARTICLE_RADIUS_FACTOR,
};
use crate::error::{FlipError, FlipResult};
use crate::grid::Dimension;

/// Tunable parameters of a simulation.
///
/// Missing JSON fields fall back to [`FlipConfig::default`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipConfig {
    /// Domain size along X (world units).
    pub sim_width: f32,
    /// Domain size along Y (world units).
    pub sim_height: f32,
    /// Domain size along Z (world units). Ignored in 2D.
    pub sim_depth: f32,
    /// Grid cells per world unit along Y.
    pub grid_cell_density: f32,
    /// Fraction of the width initially filled with water.
    pub relative_water_width: f32,
    /// Fraction of the height initially filled with water.
    pub relative_water_height: f32,
    /// FLIP/PIC blend: 1 = pure FLIP, 0 = pure PIC.
    pub flip_ratio: f32,
    /// Multiplier on each relaxation correction, in (1, 2).
    pub overrelaxation: f32,
    /// Relaxation passes per step.
    pub solve_iterations: usize,
    /// 2D or 3D.
    pub dimension: Dimension,

    /// Acceleration along +Y (negative pulls down).
    pub gravity: f32,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f32,
    /// Full pipelines per `step` call.
    pub sub_steps: u32,
    /// Divergence bias per unit of over-density.
    pub density_stiffness: f32,
    /// Factor applied to the calibrated rest density.
    pub rest_density_multiplier: f32,
    /// Stop relaxing once the max divergence drops below this.
    pub divergence_tolerance: Option<f32>,
    /// Particle speed cap applied after grid-to-particle transfer.
    pub max_particle_speed: f32,

    /// Rendered particle size relative to the physical radius.
    pub particle_render_scale: f32,
    /// RGBA of a particle at rest.
    pub base_color: [f32; 4],
    /// RGBA of a particle at or above `color_speed_scale`.
    pub fast_color: [f32; 4],
    /// Speed mapped to the full `fast_color`.
    pub color_speed_scale: f32,
}

impl Default for FlipConfig {
    fn default() -> Self {
        Self {
            sim_width: 40.0,
            sim_height: 20.0,
            sim_depth: 20.0,
            grid_cell_density: 2.0,
            relative_water_width: 0.4,
            relative_water_height: 0.8,
            flip_ratio: DEFAULT_FLIP_RATIO,
            overrelaxation: DEFAULT_OVERRELAXATION,
            solve_iterations: 1,
            dimension: Dimension::Two,
            gravity: GRAVITY,
            time_scale: 1.0,
            sub_steps: 1,
            density_stiffness: 1.0,
            rest_density_multiplier: 1.0,
            divergence_tolerance: None,
            max_particle_speed: 100.0,
            particle_render_scale: 1.0,
            base_color: [0.2, 0.45, 0.9, 1.0],
            fast_color: [0.85, 0.95, 1.0, 1.0],
            color_speed_scale: 10.0,
        }
    }
}

fn check(ok: bool, name: &'static str, value: f32, expected: &'static str) -> FlipResult<()> {
    if ok {
        Ok(())
    } else {
        Err(FlipError::parameter(name, value, expected))
    }
}

fn check_extent(axis: &'static str, value: f32) -> FlipResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FlipError::NonPositiveExtent { axis, value })
    }
}

impl FlipConfig {
    /// 2D dam-break defaults.
    pub fn dam_break_2d() -> Self {
        Self::default()
    }

    /// 3D dam-break defaults.
    pub fn dam_break_3d() -> Self {
        Self {
            dimension: Dimension::Three,
            ..Self::default()
        }
    }

    /// Check every parameter range.
    pub fn validate(&self) -> FlipResult<()> {
        check_extent("sim_width", self.sim_width)?;
        check_extent("sim_height", self.sim_height)?;
        if self.dimension.is_3d() {
            check_extent("sim_depth", self.sim_depth)?;
        }

        let d = self.grid_cell_density;
        check(d.is_finite() && d > 0.0, "grid_cell_density", d, "> 0")?;

        let w = self.relative_water_width;
        check(w > 0.0 && w <= 1.0, "relative_water_width", w, "in (0, 1]")?;
        let h = self.relative_water_height;
        check(h > 0.0 && h <= 1.0, "relative_water_height", h, "in (0, 1]")?;

        let f = self.flip_ratio;
        check((0.0..=1.0).contains(&f), "flip_ratio", f, "in [0, 1]")?;
        let o = self.overrelaxation;
        check(o > 1.0 && o < 2.0, "overrelaxation", o, "in (1, 2)")?;

        check(self.gravity.is_finite(), "gravity", self.gravity, "finite")?;
        let t = self.time_scale;
        check(t.is_finite() && t >= 0.0, "time_scale", t, ">= 0")?;
        check(self.sub_steps >= 1, "sub_steps", self.sub_steps as f32, ">= 1")?;
        let k = self.density_stiffness;
        check(k.is_finite() && k >= 0.0, "density_stiffness", k, ">= 0")?;
        let m = self.rest_density_multiplier;
        check(m.is_finite() && m > 0.0, "rest_density_multiplier", m, "> 0")?;
        if let Some(tol) = self.divergence_tolerance {
            check(tol.is_finite() && tol > 0.0, "divergence_tolerance", tol, "> 0")?;
        }
        let s = self.max_particle_speed;
        check(s > 0.0, "max_particle_speed", s, "> 0")?;

        let r = self.particle_render_scale;
        check(r.is_finite() && r > 0.0, "particle_render_scale", r, "> 0")?;
        let c = self.color_speed_scale;
        check(c.is_finite() && c > 0.0, "color_speed_scale", c, "> 0")?;
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn load_json(path: &Path) -> FlipResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON.
    pub fn save_json(&self, path: &Path) -> FlipResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Grid resolution and spacing derived from a [`FlipConfig`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridLayout {
    pub nx: usize,
    pub ny: usize,
    /// 1 in 2D
    pub nz: usize,
    /// Spacing from `sim_height / floor(sim_height * grid_cell_density)`
    pub nominal_spacing: f32,
    /// Final cell size, the largest extent-per-cell over active axes
    pub cell_size: f32,
    pub particle_radius: f32,
}

impl GridLayout {
    /// Derive the grid from a validated config.
    ///
    /// Fails with [`FlipError::GridTooLarge`] before anything is allocated if
    /// the resolution would exceed [`MAX_GRID_CELLS`].
    pub fn from_config(config: &FlipConfig) -> FlipResult<Self> {
        let resolution = (config.sim_height * config.grid_cell_density).floor();
        if resolution < 1.0 {
            return Err(FlipError::DegenerateGrid {
                nx: 0,
                ny: 0,
                nz: 0,
            });
        }
        let h0 = config.sim_height / resolution;
        if !resolution.is_finite() || !h0.is_finite() || h0 <= 0.0 {
            return Err(FlipError::GridTooLarge {
                cells: f64::INFINITY,
                max: MAX_GRID_CELLS,
            });
        }

        // Counts stay in floating point until they are known to fit
        let count = |extent: f32| (extent / h0).floor() as f64 + 1.0;
        let fx = count(config.sim_width);
        let fy = count(config.sim_height);
        let fz = if config.dimension.is_3d() {
            count(config.sim_depth)
        } else {
            1.0
        };
        let cells = fx * fy * fz;
        if !cells.is_finite() || cells > MAX_GRID_CELLS as f64 {
            return Err(FlipError::GridTooLarge {
                cells,
                max: MAX_GRID_CELLS,
            });
        }
        let (nx, ny, nz) = (fx as usize, fy as usize, fz as usize);

        let too_small = nx < MIN_CELLS_PER_AXIS
            || ny < MIN_CELLS_PER_AXIS
            || (config.dimension.is_3d() && nz < MIN_CELLS_PER_AXIS);
        if too_small {
            return Err(FlipError::DegenerateGrid { nx, ny, nz });
        }

        let mut cell_size = (config.sim_width / nx as f32).max(config.sim_height / ny as f32);
        if config.dimension.is_3d() {
            cell_size = cell_size.max(config.sim_depth / nz as f32);
        }

        Ok(Self {
            nx,
            ny,
            nz,
            nominal_spacing: h0,
            cell_size,
            particle_radius: PARTICLE_RADIUS_FACTOR * h0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        FlipConfig::default().validate().unwrap();
        FlipConfig::dam_break_3d().validate().unwrap();
    }

    #[test]
    fn test_layout_for_default_2d() {
        let layout = GridLayout::from_config(&FlipConfig::default()).unwrap();
        // res = 40, h0 = 0.5
        assert_eq!((layout.nx, layout.ny, layout.nz), (81, 41, 1));
        assert!((layout.nominal_spacing - 0.5).abs() < 1e-6);
        assert!((layout.cell_size - (20.0f32 / 41.0).max(40.0 / 81.0)).abs() < 1e-6);
        assert!((layout.particle_radius - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let bad = FlipConfig {
            flip_ratio: 1.5,
            ..FlipConfig::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(FlipError::InvalidParameter { name: "flip_ratio", .. })
        ));

        let bad = FlipConfig {
            overrelaxation: 2.0,
            ..FlipConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = FlipConfig {
            sim_width: 0.0,
            ..FlipConfig::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(FlipError::NonPositiveExtent { axis: "sim_width", .. })
        ));
    }

    #[test]
    fn test_2d_ignores_depth() {
        let config = FlipConfig {
            sim_depth: -1.0,
            ..FlipConfig::default()
        };
        config.validate().unwrap();
        assert!(FlipConfig {
            dimension: Dimension::Three,
            ..config
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_coarse_grid_is_degenerate() {
        let config = FlipConfig {
            grid_cell_density: 0.04,
            ..FlipConfig::default()
        };
        assert!(matches!(
            GridLayout::from_config(&config),
            Err(FlipError::DegenerateGrid { .. })
        ));
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        // Spacing underflows to zero
        let config = FlipConfig {
            grid_cell_density: f32::MAX,
            ..FlipConfig::default()
        };
        config.validate().unwrap();
        assert!(matches!(
            GridLayout::from_config(&config),
            Err(FlipError::GridTooLarge { .. })
        ));

        // Finite spacing, but far too many cells in 3D
        let config = FlipConfig {
            grid_cell_density: 5000.0,
            ..FlipConfig::dam_break_3d()
        };
        config.validate().unwrap();
        match GridLayout::from_config(&config) {
            Err(FlipError::GridTooLarge { cells, max }) => {
                assert!(cells > 1.0e15, "cells = {}", cells);
                assert_eq!(max, MAX_GRID_CELLS);
            }
            other => panic!("expected GridTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_json_partial_fields_use_defaults() {
        let config: FlipConfig =
            serde_json::from_str(r#"{ "flip_ratio": 0.5, "dimension": 3 }"#).unwrap();
        assert_eq!(config.flip_ratio, 0.5);
        assert_eq!(config.dimension, Dimension::Three);
        assert_eq!(config.sim_width, 40.0);
    }

    #[test]
    fn test_json_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("flipsim_config_{}.json", std::process::id()));
        let config = FlipConfig {
            solve_iterations: 12,
            divergence_tolerance: Some(1e-3),
            ..FlipConfig::dam_break_3d()
        };
        config.save_json(&path).unwrap();
        let loaded = FlipConfig::load_json(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}

//! Order-independent accumulation for many-to-one scatter passes.
//!
//! Floats are scaled by [`FIXED_POINT_SCALE`], rounded to `i64` and added with
//! an atomic `fetch_add`. Integer addition is associative and commutative, so
//! the sum is the same whichever particle (or cell) a rayon worker visits
//! first. The float-to-int cast saturates, so a runaway value clamps instead
//! of wrapping on the way in.

use std::sync::atomic::{AtomicI64, Ordering};

use glam::Vec3;
use rayon::prelude::*;

use crate::constants::FIXED_POINT_SCALE;

/// Encode a float as a fixed-point integer.
#[inline]
pub fn encode(value: f32) -> i64 {
    (value as f64 * FIXED_POINT_SCALE).round() as i64
}

/// Decode a fixed-point integer back to a float.
#[inline]
pub fn decode(raw: i64) -> f32 {
    (raw as f64 / FIXED_POINT_SCALE) as f32
}

/// A flat buffer of atomic fixed-point accumulators.
pub struct FixedPointBuffer {
    slots: Vec<AtomicI64>,
}

impl FixedPointBuffer {
    /// Buffer with `len` zeroed slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    /// Buffer holding one 3-component vector per cell.
    pub fn vectors(cells: usize) -> Self {
        Self::new(cells * 3)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Zero every slot.
    pub fn clear(&mut self) {
        self.slots
            .par_iter_mut()
            .for_each(|slot| *slot.get_mut() = 0);
    }

    /// Atomically add `value` to slot `idx`.
    #[inline]
    pub fn add(&self, idx: usize, value: f32) {
        self.slots[idx].fetch_add(encode(value), Ordering::Relaxed);
    }

    /// Atomically add `value` to component `axis` of vector `cell`.
    #[inline]
    pub fn add_component(&self, cell: usize, axis: usize, value: f32) {
        self.add(cell * 3 + axis, value);
    }

    /// Raw integer sum of slot `idx`.
    #[inline]
    pub fn raw(&self, idx: usize) -> i64 {
        self.slots[idx].load(Ordering::Relaxed)
    }

    /// Decoded sum of slot `idx`.
    #[inline]
    pub fn load(&self, idx: usize) -> f32 {
        decode(self.raw(idx))
    }

    /// Decoded vector sum of `cell`.
    #[inline]
    pub fn load_vec3(&self, cell: usize) -> Vec3 {
        let base = cell * 3;
        Vec3::new(self.load(base), self.load(base + 1), self.load(base + 2))
    }
}

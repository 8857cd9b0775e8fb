//! Growth policy of the scaling filter.
//!
//! Generation `i` (1-based) is a plain Bloom filter sized for
//! `2^(i-1) * capacity` elements at an error budget of `error_rate * 0.5^i`.
//! The persisted insertion counter decides how many generations exist:
//! `ceil(log2(ceil((capacity + count) / capacity)))`.
use crate::error::{BloomError, Result};
use crate::params::FilterParams;

#[derive(Debug, Clone, Copy)]
pub struct ScaleManager {
    capacity: u64,
    error_rate: f64,
}

impl ScaleManager {
    pub fn new(capacity: u64, error_rate: f64) -> Self {
        Self {
            capacity,
            error_rate,
        }
    }

    /// Number of generations holding data once the counter reads `count`.
    /// Zero only for an empty filter.
    pub fn active_generations(&self, count: u64) -> u32 {
        let capacity = self.capacity.max(1) as u128;
        let factor = (capacity + count as u128).div_ceil(capacity);
        if factor <= 1 {
            0
        } else {
            // ceil(log2(factor)), exact for integers
            128 - (factor - 1).leading_zeros()
        }
    }

    /// Generation the next insertion writes to, given the current counter.
    pub fn insert_generation(&self, count: u64) -> u32 {
        self.active_generations(count.saturating_add(1))
    }

    /// Element capacity of `generation`.
    pub fn scale(&self, generation: u32) -> Result<u64> {
        if generation == 0 {
            return Err(BloomError::InvalidConfig(
                "Generations are numbered from 1".into(),
            ));
        }
        1u64.checked_shl(generation - 1)
            .and_then(|factor| factor.checked_mul(self.capacity))
            .ok_or_else(|| {
                BloomError::InvalidConfig(format!(
                    "Generation {generation} overflows the addressable scale"
                ))
            })
    }

    pub fn params(&self, generation: u32) -> Result<FilterParams> {
        FilterParams::compute(self.scale(generation)?, self.error_rate, generation)
    }
}

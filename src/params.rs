use crate::error::{BloomError, Result};

/// ln(2), truncated the same way the store-side scripts spell it.
pub const LN2: f64 = 0.69314718055995;
/// ln(2)^2, truncated the same way the store-side scripts spell it.
pub const LN2_SQUARED: f64 = 0.4804530139182;

/// Bit-vector length and hash count of one filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParams {
    pub bits: u64,
    pub num_hashes: u32,
}

impl FilterParams {
    /// Sizes a filter for `scale` elements.
    ///
    /// `discount` halves the error budget that many times; scaling
    /// generations pass their 1-based index so the compounded false positive
    /// rate over all generations stays below `error_rate`. A fixed-size
    /// filter passes 0.
    pub fn compute(scale: u64, error_rate: f64, discount: u32) -> Result<Self> {
        if scale == 0 {
            return Err(BloomError::InvalidConfig(
                "Scale must be > 0".into(),
            ));
        }
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(BloomError::InvalidConfig(format!(
                "Error rate must be between 0 and 1, got {error_rate}"
            )));
        }

        let m = scale as f64;
        let budget = error_rate * 0.5f64.powi(discount as i32);
        let bits = (-(m * budget.ln()) / LN2_SQUARED).floor();
        if !bits.is_finite() || bits < 1.0 {
            return Err(BloomError::InvalidConfig(format!(
                "Degenerate filter: {bits} bits for scale {scale} at error rate {error_rate}"
            )));
        }
        let bits = bits as u64;
        let num_hashes = (LN2 * bits as f64 / m).floor() as u32;
        if num_hashes == 0 {
            return Err(BloomError::InvalidConfig(format!(
                "Degenerate filter: 0 hash functions for scale {scale} at error rate {error_rate}"
            )));
        }

        Ok(Self { bits, num_hashes })
    }

    /// Parameters of a non-scaling filter sized for `capacity` elements.
    pub fn fixed(capacity: u64, error_rate: f64) -> Result<Self> {
        Self::compute(capacity, error_rate, 0)
    }
}

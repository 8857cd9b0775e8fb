use crate::error::{BloomError, Result};
use crate::params::FilterParams;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which execution strategy performs the bit operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Store-side scripts; scaling filter, one round trip per operation.
    Atomic,
    /// Pipelined SETBIT/GETBIT from the client; fixed-size filter.
    NonAtomic,
    /// Pick `Atomic` when the store supports scripting, `NonAtomic` otherwise.
    #[default]
    Auto,
}

impl FromStr for BackendKind {
    type Err = BloomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" | "lua" | "script" => Ok(BackendKind::Atomic),
            "non-atomic" | "nonatomic" | "pipelined" | "ruby" => {
                Ok(BackendKind::NonAtomic)
            }
            "auto" => Ok(BackendKind::Auto),
            _ => Err(BloomError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Atomic => "atomic",
            BackendKind::NonAtomic => "non-atomic",
            BackendKind::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// Immutable description of one shared filter.
///
/// Built through [`FilterConfigBuilder`], whose `build` validates every field
/// so an invalid configuration never reaches the store.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(
    pattern = "owned",
    build_fn(private, name = "build_unchecked", error = "BloomError")
)]
pub struct FilterConfig {
    /// Expected number of elements before the filter starts to scale
    #[builder(default = "1_000_000")]
    capacity: u64,

    /// Target false positive rate (between 0 and 1)
    #[builder(default = "0.01")]
    error_rate: f64,

    /// Key prefix of the filter in the store
    #[builder(setter(into))]
    name: String,

    /// Execution strategy
    #[builder(default)]
    #[serde(default)]
    backend: BackendKind,
}

impl FilterConfigBuilder {
    pub fn build(self) -> Result<FilterConfig> {
        let config = self.build_unchecked()?;
        config.validate()?;
        Ok(config)
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(BloomError::InvalidConfig(
                "Capacity must be > 0".into(),
            ));
        }
        if !(self.error_rate > 0.0 && self.error_rate < 1.0) {
            return Err(BloomError::InvalidConfig(format!(
                "Error rate must be between 0 and 1, got {}",
                self.error_rate
            )));
        }
        if self.name.is_empty() {
            return Err(BloomError::InvalidConfig(
                "Name must not be empty".into(),
            ));
        }
        // Rejects combinations that round down to an unusable vector.
        FilterParams::fixed(self.capacity, self.error_rate)?;
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Key of the insertion counter.
    pub fn count_key(&self) -> String {
        format!("{}:count", self.name)
    }

    /// Key of scaling generation `generation` (1-based).
    pub fn generation_key(&self, generation: u32) -> String {
        format!("{}:{}", self.name, generation)
    }

    /// Key of the fixed-size bit vector used by the non-atomic backend.
    pub fn fixed_key(&self) -> &str {
        &self.name
    }

    /// Glob pattern matching every key below the filter name, with any glob
    /// metacharacters of the name itself escaped.
    pub fn key_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.name.len() + 2);
        for c in self.name.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(":*");
        pattern
    }
}

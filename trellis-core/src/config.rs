//! Runtime Configuration
//!
//! Limits that keep a misbehaving graph from running forever. Each thread's
//! runtime starts with [`RuntimeConfig::default`] and can be reconfigured
//! with [`Runtime::configure`](crate::reactive::Runtime::configure).
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "max_passes": 16 }"#)?;
//! Runtime::configure(config)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EvalResult, ReactiveError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum number of propagation passes started by one top-level write:
    /// the first pass plus one per generation of writes deferred by effects.
    pub max_passes: u32,

    /// Maximum number of nested evaluations on the tracker stack.
    pub max_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_passes: 100,
            max_depth: 256,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> EvalResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EvalResult<()> {
        if self.max_passes == 0 {
            return Err(ReactiveError::InvalidConfig(
                "max_passes must be at least 1".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(ReactiveError::InvalidConfig(
                "max_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

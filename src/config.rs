//! Run configuration
//!
//! ```rust,ignore
//! use cuantizar::config::QuantizeConfig;
//! use cuantizar::{registry, SkipRoles};
//!
//! let config = QuantizeConfig::new(registry::resolve("q4_k_m")?)
//!     .with_skip_roles(SkipRoles::post_norm())
//!     .with_threads(8);
//! config.validate(&ReferenceKernel)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};
use crate::policy::SkipRoles;
use crate::quantize::RowQuantizer;
use crate::registry::GgmlType;

/// Secondary format for misaligned half-precision tensors
pub const DEFAULT_FALLBACK: GgmlType = GgmlType::Q8_0;

/// Configuration for one quantization run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizeConfig {
    /// Requested output format
    pub target: GgmlType,
    /// Format for half-precision tensors the target cannot hold
    #[serde(default = "default_fallback")]
    pub fallback: GgmlType,
    /// Tensors never quantized, by name
    #[serde(default)]
    pub skip_roles: SkipRoles,
    /// Worker pool size; `None` uses every logical CPU
    #[serde(default)]
    pub threads: Option<usize>,
}

fn default_fallback() -> GgmlType {
    DEFAULT_FALLBACK
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self::new(GgmlType::Q4_K)
    }
}

impl QuantizeConfig {
    /// Configuration targeting `target` with default fallback and skip roles
    #[must_use]
    pub fn new(target: GgmlType) -> Self {
        Self {
            target,
            fallback: DEFAULT_FALLBACK,
            skip_roles: SkipRoles::standard(),
            threads: None,
        }
    }

    /// Set the fallback format
    #[must_use]
    pub fn with_fallback(mut self, fallback: GgmlType) -> Self {
        self.fallback = fallback;
        self
    }

    /// Set the skip-role configuration
    #[must_use]
    pub fn with_skip_roles(mut self, roles: SkipRoles) -> Self {
        self.skip_roles = roles;
        self
    }

    /// Set the worker pool size
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Check the configuration against the kernel that will run it
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::InvalidConfiguration`] if the kernel cannot
    /// produce the target or fallback, the fallback is not block-quantized,
    /// or the pool size is zero.
    pub fn validate(&self, kernel: &dyn RowQuantizer) -> Result<()> {
        if !kernel.supports(self.target) {
            return Err(CuantizarError::InvalidConfiguration {
                reason: format!("no kernel produces target {}", self.target),
            });
        }
        if !self.fallback.is_block_quantized() {
            return Err(CuantizarError::InvalidConfiguration {
                reason: format!(
                    "fallback must be a block-quantized type, got {}",
                    self.fallback
                ),
            });
        }
        if !kernel.supports(self.fallback) {
            return Err(CuantizarError::InvalidConfiguration {
                reason: format!("no kernel produces fallback {}", self.fallback),
            });
        }
        if self.threads == Some(0) {
            return Err(CuantizarError::InvalidConfiguration {
                reason: "thread count must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

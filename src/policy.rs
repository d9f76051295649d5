//! Per-tensor quantization policy
//!
//! [`decide`] is a pure, total function of a tensor's name, row length,
//! source type, and the requested target. [`fallback_for`] picks the
//! secondary format for tensors the primary target cannot hold.
//!
//! Which tensors are skipped by role is configuration, not code: a
//! [`SkipRoles`] value names the substrings to skip and whether alignment
//! skips are reported. Two presets ship built in (`standard`, `post-norm`);
//! anything else can be loaded from JSON.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};
use crate::registry::GgmlType;

/// Named skip-by-role configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRoles {
    /// Preset or user-chosen name, shown in the run summary
    pub name: String,
    /// A tensor whose name contains any of these substrings is never quantized
    pub patterns: Vec<String>,
    /// Print a `Skipping` line for every tensor left unquantized because of
    /// block alignment
    #[serde(default)]
    pub report_skips: bool,
}

impl SkipRoles {
    /// Bias vectors, normalization weights, and the token embedding table
    #[must_use]
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            patterns: vec!["bias".into(), "norm".into(), "token_embd".into()],
            report_skips: false,
        }
    }

    /// `standard` plus the post-normalization tensor (`ln_post`), with
    /// per-skip diagnostics
    #[must_use]
    pub fn post_norm() -> Self {
        let mut roles = Self::standard();
        roles.name = "post-norm".to_string();
        roles.patterns.push("ln_post".into());
        roles.report_skips = true;
        roles
    }

    /// Look up a built-in preset by name
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::InvalidConfiguration`] for unknown names.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "standard" => Ok(Self::standard()),
            "post-norm" | "post_norm" => Ok(Self::post_norm()),
            other => Err(CuantizarError::InvalidConfiguration {
                reason: format!("unknown skip preset '{other}' (expected standard or post-norm)"),
            }),
        }
    }

    /// Load a custom configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::InvalidConfiguration`] if the file cannot be
    /// read or does not describe a `SkipRoles` value.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CuantizarError::InvalidConfiguration {
                reason: format!("cannot read skip roles {}: {e}", path.display()),
            }
        })?;
        serde_json::from_str(&text).map_err(|e| CuantizarError::InvalidConfiguration {
            reason: format!("invalid skip roles {}: {e}", path.display()),
        })
    }

    /// Whether `name` matches any skip pattern
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

impl Default for SkipRoles {
    fn default() -> Self {
        Self::standard()
    }
}

/// Why a tensor is left unquantized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    /// Name matched a skip role
    SkipRole,
    /// Row length is not a multiple of the target block size
    Misaligned,
    /// Source is neither F32 nor F16
    NotFloat,
}

impl fmt::Display for PassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SkipRole => "skip role",
            Self::Misaligned => "not block aligned",
            Self::NotFloat => "not a float tensor",
        })
    }
}

/// Policy outcome for one tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Convert to the requested target
    Quantize,
    /// Leave as is (unless [`fallback_for`] finds a secondary format)
    PassThrough(PassReason),
}

/// Decide what happens to one tensor
///
/// Checks run in a fixed order: skip role, then alignment, then source type.
#[must_use]
pub fn decide(
    name: &str,
    row_len: usize,
    source: GgmlType,
    target: GgmlType,
    roles: &SkipRoles,
) -> Decision {
    if roles.matches(name) {
        Decision::PassThrough(PassReason::SkipRole)
    } else if !target.is_aligned(row_len) {
        Decision::PassThrough(PassReason::Misaligned)
    } else if !source.is_float() {
        Decision::PassThrough(PassReason::NotFloat)
    } else {
        Decision::Quantize
    }
}

/// Secondary format for a pass-through tensor, if any
///
/// Only half-precision tensors rejected for alignment qualify. They go to
/// `fallback` when its block size divides `row_len`, otherwise they are
/// widened to F32.
#[must_use]
pub fn fallback_for(
    reason: PassReason,
    source: GgmlType,
    row_len: usize,
    fallback: GgmlType,
) -> Option<GgmlType> {
    if reason != PassReason::Misaligned || source != GgmlType::F16 {
        return None;
    }
    if fallback.is_aligned(row_len) {
        Some(fallback)
    } else {
        Some(GgmlType::F32)
    }
}

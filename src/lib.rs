//! # Cuantizar
//!
//! Pure Rust GGUF weight quantizer.
//!
//! Cuantizar (Spanish: "to quantize") reads a GGUF model container, reduces
//! selected tensors to a block-quantized format, and writes a new container
//! with the same metadata, the same tensor table order, and smaller payloads.
//!
//! ## Features
//!
//! - **Zero-copy reads**: the source is memory-mapped; pass-through tensors
//!   are written straight from the mapping
//! - **Parallel**: one rayon task per tensor, output order always matches
//!   the source
//! - **Policy as configuration**: skip roles are named presets or JSON, not
//!   code
//! - **All-or-nothing output**: atomic write, no partial files on failure
//!
//! ## Example
//!
//! ```rust,no_run
//! use cuantizar::{config::QuantizeConfig, pipeline, registry};
//!
//! let target = registry::resolve("Q4_K_M")?;
//! let summary = pipeline::run("model-f16.gguf", "model-q4_k.gguf", QuantizeConfig::new(target))?;
//! println!("{summary}");
//! # Ok::<(), cuantizar::CuantizarError>(())
//! ```
//!
//! ## Per-tensor policy
//!
//! | Condition | Result |
//! |-----------|--------|
//! | name matches a skip role | copied unchanged |
//! | row length not a multiple of the target block, F16 source | fallback format, or F32 |
//! | row length not a multiple of the target block, otherwise | copied unchanged |
//! | source not F32/F16 | copied unchanged |
//! | otherwise | quantized to the target |

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_wrap)] // i8 codes stored as u8
#![allow(clippy::cast_precision_loss)] // usize -> f32/f64 for ratios and scales
#![allow(clippy::cast_possible_truncation)] // u64 extents -> usize, checked at parse
#![allow(clippy::cast_sign_loss)] // clamped quant codes -> u8
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::uninlined_format_args)] // Prefer explicit format args
#![allow(clippy::float_cmp)] // Exact zero checks in kernels
#![allow(clippy::cast_lossless)] // Allow u8 to f32 casts
#![allow(clippy::many_single_char_names)] // Kernel math (d, m, x, y, l)

/// Architecture rename for GGUF containers
pub mod arch;
/// Run configuration
pub mod config;
pub mod error;
/// Parallel per-tensor execution
pub mod executor;
pub mod gguf;
/// End-to-end driver
pub mod pipeline;
/// Skip, quantize, and fallback decisions
pub mod policy;
pub mod quantize;
/// Type ids, block geometry, and name resolution
pub mod registry;

pub use config::QuantizeConfig;
pub use error::{CuantizarError, Result};
pub use executor::{Action, Executor, RunStats};
pub use pipeline::RunSummary;
pub use policy::SkipRoles;
pub use registry::{resolve, GgmlType};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

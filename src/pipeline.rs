//! Quantization pipeline driver
//!
//! Sequences one run end to end:
//!
//! 1. validate the configuration and build the worker pool (before any I/O)
//! 2. map and parse the source container
//! 3. run the executor over every tensor
//! 4. copy metadata once, add tensors in source order, write atomically
//!
//! Quantized buffers are owned by their descriptors and released when the
//! writer is dropped after the write; pass-through descriptors borrow the
//! source mapping and are never freed separately.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::config::QuantizeConfig;
use crate::error::Result;
use crate::executor::{Executor, RunStats};
use crate::gguf::{GGUFWriter, MappedGGUFContainer};
use crate::quantize::{ReferenceKernel, RowQuantizer};
use crate::registry::GgmlType;

/// What a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Requested target
    pub target: GgmlType,
    /// Skip-role configuration name
    pub skip_roles: String,
    /// Worker threads used
    pub threads: usize,
    /// Tensors written
    pub tensors: usize,
    /// Metadata entries copied
    pub metadata: usize,
    /// Per-action counters
    pub stats: RunStats,
    /// Source file size in bytes
    pub input_bytes: usize,
    /// Output file size in bytes
    pub output_bytes: u64,
    /// Wall-clock time of the run
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Output size relative to input size
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            return 1.0;
        }
        self.output_bytes as f64 / self.input_bytes as f64
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MIB: f64 = 1024.0 * 1024.0;
        writeln!(
            f,
            "Summary: {} tensors ({} quantized to {}, {} fallback, {} copied), {} metadata entries",
            self.tensors,
            self.stats.quantized,
            self.target,
            self.stats.fallback,
            self.stats.copied,
            self.metadata
        )?;
        write!(
            f,
            "Size: {:.2} MiB -> {:.2} MiB ({:.1}%) in {:.2}s [skip roles: {}, threads: {}]",
            self.input_bytes as f64 / MIB,
            self.output_bytes as f64 / MIB,
            self.ratio() * 100.0,
            self.elapsed.as_secs_f64(),
            self.skip_roles,
            self.threads
        )
    }
}

/// Quantize `input` into `output` with the reference kernel, progress on stdout
///
/// # Errors
///
/// Fails with a usage error for an invalid configuration (before any file is
/// touched), with an I/O or format error if the source cannot be read, with
/// [`crate::CuantizarError::TensorFailures`] if any tensor fails, and with an
/// I/O error if the output cannot be written. No output file exists after a
/// failure.
pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    config: QuantizeConfig,
) -> Result<RunSummary> {
    let executor = Executor::new(config, &ReferenceKernel)?;
    run_with(input.as_ref(), output.as_ref(), &executor)
}

/// Like [`run`], with a caller-supplied kernel and progress sink
///
/// # Errors
///
/// See [`run`].
pub fn run_with_kernel(
    input: &Path,
    output: &Path,
    config: QuantizeConfig,
    kernel: &dyn RowQuantizer,
    progress: Box<dyn Write + Send>,
) -> Result<RunSummary> {
    let executor = Executor::new(config, kernel)?.with_progress(progress);
    run_with(input, output, &executor)
}

fn run_with(input: &Path, output: &Path, executor: &Executor<'_>) -> Result<RunSummary> {
    let start = Instant::now();
    let source = MappedGGUFContainer::from_path(input)?;
    let tensors = source.tensors()?;

    let execution = executor.run(&tensors)?;

    let mut writer = GGUFWriter::begin();
    writer.copy_metadata(source.metadata());
    for outcome in execution.outcomes {
        writer.add_tensor(outcome.descriptor);
    }
    let output_bytes = writer.write(output)?;
    let tensor_count = writer.tensors().len();
    let metadata_count = writer.metadata().len();
    drop(writer);

    let summary = RunSummary {
        target: executor.config().target,
        skip_roles: executor.config().skip_roles.name.clone(),
        threads: executor.threads(),
        tensors: tensor_count,
        metadata: metadata_count,
        stats: execution.stats,
        input_bytes: source.file_size(),
        output_bytes,
        elapsed: start.elapsed(),
    };
    info!(
        input = %input.display(),
        output = %output.display(),
        ratio = summary.ratio(),
        "quantization complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::gguf::test_factory::{create_weight_data, GGUFBuilder};
    use crate::CuantizarError;

    fn quiet(input: &Path, output: &Path, config: QuantizeConfig) -> Result<RunSummary> {
        run_with_kernel(input, output, config, &ReferenceKernel, Box::new(io::sink()))
    }

    #[test]
    fn test_run_writes_quantized_container() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.gguf");
        let output = dir.path().join("out.gguf");
        let bytes = GGUFBuilder::new()
            .architecture("llama")
            .add_u32("llama.block_count", 1)
            .add_f32_tensor("blk.0.attn_q.weight", &[1024, 2], &create_weight_data(2048, 1))
            .add_f32_tensor("blk.0.attn_norm.weight", &[1024], &create_weight_data(1024, 2))
            .build();
        std::fs::write(&input, bytes).unwrap();

        let summary = quiet(&input, &output, QuantizeConfig::new(GgmlType::Q4_K)).unwrap();
        assert_eq!(summary.tensors, 2);
        assert_eq!(summary.metadata, 2);
        assert_eq!(summary.stats.quantized, 1);
        assert_eq!(summary.stats.copied, 1);
        assert_eq!(summary.output_bytes, std::fs::metadata(&output).unwrap().len());
        assert!(summary.output_bytes < summary.input_bytes as u64);

        let out = MappedGGUFContainer::from_path(&output).unwrap();
        assert_eq!(out.tensor(0).unwrap().ggml_type, GgmlType::Q4_K);
        assert_eq!(out.tensor(1).unwrap().ggml_type, GgmlType::F32);
    }

    #[test]
    fn test_invalid_config_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.gguf");
        let output = dir.path().join("out.gguf");
        let config = QuantizeConfig::new(GgmlType::Q4_K).with_fallback(GgmlType::F32);
        let err = quiet(&input, &output, config).unwrap_err();
        // config is checked before the missing input is noticed
        assert!(err.is_usage_error());
        assert!(!output.exists());
    }

    #[test]
    fn test_unreadable_input_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.gguf");
        let output = dir.path().join("out.gguf");
        std::fs::write(&input, b"not a container").unwrap();
        let err = quiet(&input, &output, QuantizeConfig::default()).unwrap_err();
        assert!(matches!(err, CuantizarError::FormatError { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            target: GgmlType::Q8_0,
            skip_roles: "standard".to_string(),
            threads: 4,
            tensors: 3,
            metadata: 5,
            stats: RunStats {
                quantized: 1,
                fallback: 1,
                copied: 1,
                bytes_in: 0,
                bytes_out: 0,
            },
            input_bytes: 2 * 1024 * 1024,
            output_bytes: 1024 * 1024,
            elapsed: Duration::from_millis(1500),
        };
        let text = summary.to_string();
        assert!(text.contains("3 tensors (1 quantized to Q8_0, 1 fallback, 1 copied)"));
        assert!(text.contains("2.00 MiB -> 1.00 MiB (50.0%)"));
        assert!((summary.ratio() - 0.5).abs() < f64::EPSILON);
    }
}

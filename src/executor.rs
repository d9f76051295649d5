//! Parallel quantization executor
//!
//! Every tensor is an independent task on a fixed-size rayon pool. A task
//! runs the policy, widens its payload to f32, allocates its output, and
//! calls the kernel without holding any lock. Only the final registration
//! step (progress line plus run accounting) happens under the mutex, so
//! progress lines appear in completion order.
//!
//! Results are collected by index, so the returned tensors are always in
//! source order no matter which worker finished first. Per-task errors are
//! gathered into a single [`CuantizarError::TensorFailures`] before anything
//! is handed back to the caller.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::QuantizeConfig;
use crate::error::{CuantizarError, Result};
use crate::gguf::TensorDescriptor;
use crate::policy::{decide, fallback_for, Decision, PassReason};
use crate::quantize::{to_full_precision, try_alloc, RowQuantizer};
use crate::registry::GgmlType;

/// What happened to one tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    /// Converted to the requested target
    Quantize,
    /// Converted to the fallback format (or widened to F32)
    Fallback,
    /// Passed through unchanged
    Copy,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quantize => "Quantizing",
            Self::Fallback => "Fallback",
            Self::Copy => "Copying",
        })
    }
}

/// Output descriptor for one tensor plus how it was produced
#[derive(Debug, Clone)]
pub struct TensorOutcome<'a> {
    /// Descriptor to hand to the writer
    pub descriptor: TensorDescriptor<'a>,
    /// Action taken
    pub action: Action,
    /// Why the tensor was not quantized to the target, if it was not
    pub reason: Option<PassReason>,
}

/// Counters accumulated during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Tensors converted to the target
    pub quantized: usize,
    /// Tensors converted to the fallback format
    pub fallback: usize,
    /// Tensors passed through
    pub copied: usize,
    /// Payload bytes read
    pub bytes_in: usize,
    /// Payload bytes produced
    pub bytes_out: usize,
}

impl RunStats {
    fn record(&mut self, action: Action, bytes_in: usize, bytes_out: usize) {
        match action {
            Action::Quantize => self.quantized += 1,
            Action::Fallback => self.fallback += 1,
            Action::Copy => self.copied += 1,
        }
        self.bytes_in += bytes_in;
        self.bytes_out += bytes_out;
    }

    /// Total tensors registered
    #[must_use]
    pub fn total(&self) -> usize {
        self.quantized + self.fallback + self.copied
    }
}

/// Result of a successful run, tensors in source order
#[derive(Debug)]
pub struct Execution<'a> {
    /// One outcome per input tensor, same order as the input
    pub outcomes: Vec<TensorOutcome<'a>>,
    /// Counters for the run
    pub stats: RunStats,
}

/// State shared by workers, guarded by one mutex
struct Registration {
    sink: Box<dyn Write + Send>,
    stats: RunStats,
}

/// Plan for one tensor, decided before any work is done
enum Plan {
    Convert(Action, GgmlType, Option<PassReason>),
    Copy(Option<PassReason>),
}

/// Quantization executor bound to a kernel and a configuration
pub struct Executor<'k> {
    kernel: &'k dyn RowQuantizer,
    config: QuantizeConfig,
    pool: ThreadPool,
    registration: Mutex<Registration>,
}

impl fmt::Debug for Executor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl<'k> Executor<'k> {
    /// Build an executor printing progress to stdout
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::InvalidConfiguration`] if the configuration
    /// is invalid for `kernel` or the worker pool cannot be built.
    pub fn new(config: QuantizeConfig, kernel: &'k dyn RowQuantizer) -> Result<Self> {
        config.validate(kernel)?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .thread_name(|i| format!("cuantizar-{i}"))
            .build()
            .map_err(|e| CuantizarError::InvalidConfiguration {
                reason: format!("cannot build worker pool: {e}"),
            })?;
        info!(threads = pool.current_num_threads(), target = %config.target, "worker pool ready");

        Ok(Self {
            kernel,
            config,
            pool,
            registration: Mutex::new(Registration {
                sink: Box::new(io::stdout()),
                stats: RunStats::default(),
            }),
        })
    }

    /// Send progress lines to `sink` instead of stdout
    #[must_use]
    pub fn with_progress(self, sink: Box<dyn Write + Send>) -> Self {
        let stats = self.lock().stats.clone();
        Self {
            registration: Mutex::new(Registration { sink, stats }),
            ..self
        }
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &QuantizeConfig {
        &self.config
    }

    /// Number of worker threads
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registration> {
        self.registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Process every tensor in parallel
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::TensorFailures`] listing every tensor that
    /// failed, in input order. Successful tensors are discarded in that case.
    pub fn run<'a>(&self, tensors: &[TensorDescriptor<'a>]) -> Result<Execution<'a>> {
        self.lock().stats = RunStats::default();

        let results: Vec<Result<TensorOutcome<'a>>> = self.pool.install(|| {
            (0..tensors.len())
                .into_par_iter()
                .map(|i| self.process(&tensors[i]))
                .collect()
        });

        let mut outcomes = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (tensor, result) in tensors.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => failures.push((tensor.name.to_string(), e.to_string())),
            }
        }
        if !failures.is_empty() {
            return Err(CuantizarError::TensorFailures { failures });
        }

        let stats = std::mem::take(&mut self.lock().stats);
        info!(
            quantized = stats.quantized,
            fallback = stats.fallback,
            copied = stats.copied,
            "all tensors processed"
        );
        Ok(Execution { outcomes, stats })
    }

    fn plan(&self, tensor: &TensorDescriptor<'_>) -> Plan {
        let row_len = tensor.row_len();
        match decide(
            tensor.name,
            row_len,
            tensor.ggml_type,
            self.config.target,
            &self.config.skip_roles,
        ) {
            Decision::Quantize => Plan::Convert(Action::Quantize, self.config.target, None),
            Decision::PassThrough(reason) => {
                match fallback_for(reason, tensor.ggml_type, row_len, self.config.fallback) {
                    Some(ty) => Plan::Convert(Action::Fallback, ty, Some(reason)),
                    None => Plan::Copy(Some(reason)),
                }
            },
        }
    }

    fn process<'a>(&self, tensor: &TensorDescriptor<'a>) -> Result<TensorOutcome<'a>> {
        let (action, reason, data) = match self.plan(tensor) {
            Plan::Copy(reason) => (Action::Copy, reason, None),
            Plan::Convert(action, ty, reason) => {
                (action, reason, Some((ty, self.convert(tensor, ty)?)))
            },
        };

        let descriptor = match data {
            Some((ty, bytes)) => TensorDescriptor {
                name: tensor.name,
                dims: tensor.dims,
                ggml_type: ty,
                data: bytes.into(),
            },
            None => tensor.clone(),
        };
        self.register(tensor, &descriptor, action, reason)?;

        Ok(TensorOutcome {
            descriptor,
            action,
            reason,
        })
    }

    /// Widen and quantize one tensor into a freshly allocated buffer
    fn convert(&self, tensor: &TensorDescriptor<'_>, ty: GgmlType) -> Result<Vec<u8>> {
        let row_len = tensor.row_len();
        let n_rows = tensor.n_rows();
        let src = to_full_precision(&tensor.data, tensor.ggml_type, tensor.n_elements())
            .map_err(|e| attribute_allocation(e, tensor.name))?;

        let bytes = ty.row_size(row_len) * n_rows;
        let mut out = allocate_output(tensor.name, bytes)?;
        if ty == GgmlType::F32 {
            for v in src.iter() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        } else {
            out.resize(bytes, 0);
            self.kernel
                .quantize_rows(ty, &src, &mut out, n_rows, row_len)?;
        }
        debug!(tensor = tensor.name, %ty, bytes, "converted");
        Ok(out)
    }

    /// Critical section: progress line and accounting
    fn register(
        &self,
        source: &TensorDescriptor<'_>,
        output: &TensorDescriptor<'_>,
        action: Action,
        reason: Option<PassReason>,
    ) -> Result<()> {
        let mut reg = self.lock();
        let line_err = |e: io::Error| CuantizarError::IoError {
            message: format!("Failed to write progress: {e}"),
        };
        if reason == Some(PassReason::Misaligned) && self.config.skip_roles.report_skips {
            writeln!(
                reg.sink,
                "Skipping {}: shape {:?} not aligned with block size {}",
                source.name,
                source.dims,
                self.config.target.block_size()
            )
            .map_err(line_err)?;
        }
        writeln!(reg.sink, "{action} {} to {}", output.name, output.ggml_type).map_err(line_err)?;
        reg.stats.record(action, source.data.len(), output.data.len());
        Ok(())
    }
}

/// Capacity for a tensor's output, or [`CuantizarError::AllocationFailed`]
fn allocate_output(tensor: &str, bytes: usize) -> Result<Vec<u8>> {
    try_alloc(tensor, bytes)
}

/// Name the tensor in an allocation failure raised by the precision bridge
fn attribute_allocation(err: CuantizarError, tensor: &str) -> CuantizarError {
    match err {
        CuantizarError::AllocationFailed { bytes, .. } => CuantizarError::AllocationFailed {
            tensor: tensor.to_string(),
            bytes,
        },
        other => other,
    }
}

//! Error types for cuantizar
//!
//! One enum covers every failure the pipeline can report. Variants mirror the
//! stages of a run: resolving the target type, parsing the source container,
//! running the kernels, and writing the output.

use thiserror::Error;

/// Result type alias for cuantizar operations
pub type Result<T> = std::result::Result<T, CuantizarError>;

/// Error type for all cuantizar operations
#[derive(Debug, Error)]
pub enum CuantizarError {
    /// Requested type name does not resolve to a known numeric format
    #[error("Invalid quantization type: {name}")]
    UnknownType {
        /// Name as given on the command line
        name: String,
    },

    /// Container bytes are structurally invalid
    #[error("Invalid GGUF container: {reason}")]
    FormatError {
        /// What was wrong
        reason: String,
    },

    /// File open, mmap, or write failure
    #[error("I/O error: {message}")]
    IoError {
        /// Description including the path involved
        message: String,
    },

    /// Buffer or shape does not satisfy a kernel contract
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// What was wrong
        reason: String,
    },

    /// Operation is not supported for the given input
    #[error("Unsupported operation '{operation}': {reason}")]
    UnsupportedOperation {
        /// Operation name
        operation: String,
        /// Why it is unsupported
        reason: String,
    },

    /// Output buffer could not be allocated
    #[error("Failed to allocate {bytes} bytes for tensor '{tensor}'")]
    AllocationFailed {
        /// Tensor being processed
        tensor: String,
        /// Requested size
        bytes: usize,
    },

    /// One or more tensors failed during the parallel region
    #[error("{} tensor(s) failed to quantize: {}", .failures.len(), summarize(.failures))]
    TensorFailures {
        /// (tensor name, error message) per failed tensor, in container order
        failures: Vec<(String, String)>,
    },

    /// Run configuration is invalid
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong
        reason: String,
    },
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, reason)| format!("{name}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CuantizarError {
    /// Whether this error was raised before any file was opened
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownType { .. } | Self::InvalidConfiguration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_message() {
        let err = CuantizarError::UnknownType {
            name: "Q9_X".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid quantization type: Q9_X");
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_tensor_failures_lists_every_tensor() {
        let err = CuantizarError::TensorFailures {
            failures: vec![
                ("a.weight".to_string(), "oom".to_string()),
                ("b.weight".to_string(), "bad shape".to_string()),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 tensor(s) failed"));
        assert!(msg.contains("a.weight: oom"));
        assert!(msg.contains("b.weight: bad shape"));
        assert!(!err.is_usage_error());
    }

    #[test]
    fn test_io_error_is_not_usage_error() {
        let err = CuantizarError::IoError {
            message: "Failed to open x.gguf".to_string(),
        };
        assert!(!err.is_usage_error());
        assert!(err.to_string().contains("x.gguf"));
    }
}

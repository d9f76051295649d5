//! Architecture rename
//!
//! Rewrites `general.architecture` while copying everything else unchanged,
//! so a model whose architecture the quantizer tooling does not know can be
//! processed under a known name and renamed back afterwards.

use std::path::Path;

use tracing::info;

use crate::error::{CuantizarError, Result};
use crate::gguf::{GGUFValue, GGUFWriter, MappedGGUFContainer, KEY_ARCHITECTURE};

/// Outcome of a rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameSummary {
    /// Architecture before the rename, if the source declared one
    pub previous: Option<String>,
    /// Tensors copied
    pub tensors: usize,
    /// Output file size in bytes
    pub output_bytes: u64,
}

/// Copy `input` to `output` with `general.architecture` set to `new_arch`
///
/// An existing entry keeps its position; a missing one is inserted first.
/// Tensors are copied byte for byte straight from the source mapping.
///
/// # Errors
///
/// Returns [`CuantizarError::InvalidConfiguration`] for an empty name, and
/// propagates read and write errors. No output file exists after a failure.
pub fn rename_architecture<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    new_arch: &str,
) -> Result<RenameSummary> {
    if new_arch.trim().is_empty() {
        return Err(CuantizarError::InvalidConfiguration {
            reason: "architecture name must not be empty".to_string(),
        });
    }

    let source = MappedGGUFContainer::from_path(input.as_ref())?;
    let previous = source.container.architecture().map(str::to_string);

    let mut writer = GGUFWriter::begin();
    writer.copy_metadata(source.metadata());
    writer.set_metadata(KEY_ARCHITECTURE, GGUFValue::String(new_arch.to_string()));
    for tensor in source.tensors()? {
        writer.add_tensor(tensor);
    }
    let output_bytes = writer.write(output.as_ref())?;

    info!(
        from = previous.as_deref().unwrap_or("<none>"),
        to = new_arch,
        tensors = writer.tensors().len(),
        "renamed architecture"
    );
    Ok(RenameSummary {
        previous,
        tensors: writer.tensors().len(),
        output_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::test_factory::GGUFBuilder;
    use crate::registry::GgmlType;

    #[test]
    fn test_rename_replaces_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.gguf");
        let output = dir.path().join("out.gguf");
        std::fs::write(
            &input,
            GGUFBuilder::new()
                .add_u32("general.quantization_version", 2)
                .architecture("qwen3-asr")
                .add_f32_tensor("w", &[4], &[1.0, 2.0, 3.0, 4.0])
                .build(),
        )
        .unwrap();

        let summary = rename_architecture(&input, &output, "qwen2").unwrap();
        assert_eq!(summary.previous.as_deref(), Some("qwen3-asr"));
        assert_eq!(summary.tensors, 1);

        let out = MappedGGUFContainer::from_path(&output).unwrap();
        assert_eq!(out.container.architecture(), Some("qwen2"));
        assert_eq!(out.metadata()[1].0, KEY_ARCHITECTURE);
        let src = MappedGGUFContainer::from_path(&input).unwrap();
        assert_eq!(out.tensor(0).unwrap().data, src.tensor(0).unwrap().data);
        assert_eq!(out.tensor(0).unwrap().ggml_type, GgmlType::F32);
    }

    #[test]
    fn test_rename_inserts_missing_key_first() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.gguf");
        let output = dir.path().join("out.gguf");
        std::fs::write(&input, GGUFBuilder::new().add_u32("x.count", 3).build()).unwrap();

        let summary = rename_architecture(&input, &output, "llama").unwrap();
        assert_eq!(summary.previous, None);
        let out = MappedGGUFContainer::from_path(&output).unwrap();
        assert_eq!(out.metadata()[0].0, KEY_ARCHITECTURE);
        assert_eq!(out.metadata()[1].0, "x.count");
    }

    #[test]
    fn test_rename_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.gguf");
        let tmp = dir.path().join("tmp.gguf");
        let back = dir.path().join("back.gguf");
        std::fs::write(
            &input,
            GGUFBuilder::new()
                .architecture("whisper")
                .add_f16_tensor("enc.conv1.weight", &[3, 2], &[0.5; 6])
                .build(),
        )
        .unwrap();

        rename_architecture(&input, &tmp, "llama").unwrap();
        rename_architecture(&tmp, &back, "whisper").unwrap();
        assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&back).unwrap());
    }

    #[test]
    fn test_rename_rejects_empty_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = rename_architecture(dir.path().join("a"), dir.path().join("b"), " ").unwrap_err();
        assert!(err.is_usage_error());
    }
}

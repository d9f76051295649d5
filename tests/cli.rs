//! CLI integration tests for `cuantizar` and `cuantizar-rename-arch`

#![allow(clippy::unwrap_used)] // Tests can use unwrap

use assert_cmd::Command;
use cuantizar::gguf::test_factory::{create_weight_data, GGUFBuilder};
use cuantizar::gguf::MappedGGUFContainer;
use cuantizar::GgmlType;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Helper Functions
// ============================================================================

fn cuantizar() -> Command {
    Command::cargo_bin("cuantizar").expect("Failed to find cuantizar binary")
}

fn rename_arch() -> Command {
    Command::cargo_bin("cuantizar-rename-arch").expect("Failed to find cuantizar-rename-arch binary")
}

/// Small container with one tensor per policy branch
fn write_model(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("model-f16.gguf");
    let bytes = GGUFBuilder::new()
        .architecture("whisper")
        .add_u32("whisper.encoder.layer_count", 1)
        .add_f32_tensor("blk.0.attn_q.weight", &[256, 2], &create_weight_data(512, 1))
        .add_f32_tensor("blk.0.attn_norm.weight", &[256], &create_weight_data(256, 2))
        .add_f16_tensor("conv.weight", &[80, 3], &create_weight_data(240, 3))
        .add_f16_tensor("ln_post.weight", &[256], &create_weight_data(256, 4))
        .build();
    std::fs::write(&path, bytes).unwrap();
    path
}

// ============================================================================
// Quantize
// ============================================================================

#[test]
fn test_quantize_prints_one_line_per_tensor() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_model(&dir);
    let output = dir.path().join("model-q4_k.gguf");

    cuantizar()
        .arg(&input)
        .arg(&output)
        .arg("q4_k_m")
        .assert()
        .success()
        .stdout(predicate::str::contains("Quantizing blk.0.attn_q.weight to Q4_K"))
        .stdout(predicate::str::contains("Copying blk.0.attn_norm.weight to F32"))
        .stdout(predicate::str::contains("Fallback conv.weight to F32"))
        .stdout(predicate::str::contains("Quantizing ln_post.weight to Q4_K"))
        .stdout(predicate::str::contains("Summary: 4 tensors"))
        .stdout(predicate::str::contains("Skipping").not());

    let out = MappedGGUFContainer::from_path(&output).unwrap();
    assert_eq!(out.tensor_count(), 4);
    assert_eq!(out.tensor(0).unwrap().ggml_type, GgmlType::Q4_K);
}

#[test]
fn test_post_norm_preset() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_model(&dir);
    let output = dir.path().join("out.gguf");

    cuantizar()
        .arg(&input)
        .arg(&output)
        .arg("Q4_K")
        .args(["--skip-preset", "post-norm", "--threads", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Copying ln_post.weight to F16"))
        .stdout(predicate::str::contains(
            "Skipping conv.weight: shape [80, 3] not aligned with block size 256",
        ));
}

#[test]
fn test_skip_roles_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_model(&dir);
    let output = dir.path().join("out.gguf");
    let roles = dir.path().join("roles.json");
    std::fs::write(&roles, r#"{"name":"attn-only","patterns":["attn_q"]}"#).unwrap();

    cuantizar()
        .arg(&input)
        .arg(&output)
        .arg("Q8_0")
        .arg("--skip-roles")
        .arg(&roles)
        .assert()
        .success()
        .stdout(predicate::str::contains("Copying blk.0.attn_q.weight to F32"))
        .stdout(predicate::str::contains("Quantizing blk.0.attn_norm.weight to Q8_0"))
        .stdout(predicate::str::contains("skip roles: attn-only"));
}

#[test]
fn test_unknown_type_exits_1_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_model(&dir);
    let output = dir.path().join("out.gguf");
    let before = std::fs::read(&input).unwrap();

    cuantizar()
        .arg(&input)
        .arg(&output)
        .arg("Q9_X")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid quantization type: Q9_X"));

    assert!(!output.exists());
    assert_eq!(std::fs::read(&input).unwrap(), before);
}

#[test]
fn test_wrong_argument_count_exits_1() {
    cuantizar().arg("only-one.gguf").assert().code(1);
    cuantizar().assert().code(1);
}

#[test]
fn test_missing_input_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.gguf");
    cuantizar()
        .arg(dir.path().join("missing.gguf"))
        .arg(&output)
        .arg("Q8_0")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error:"));
    assert!(!output.exists());
}

#[test]
fn test_bad_fallback_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_model(&dir);
    cuantizar()
        .arg(&input)
        .arg(dir.path().join("out.gguf"))
        .arg("Q4_K")
        .args(["--fallback", "F16"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("block-quantized"));
}

#[test]
fn test_help_exits_0() {
    cuantizar()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--skip-preset"));
}

// ============================================================================
// Rename
// ============================================================================

#[test]
fn test_rename_arch_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_model(&dir);
    let renamed = dir.path().join("renamed.gguf");
    let back = dir.path().join("back.gguf");

    rename_arch()
        .arg(&input)
        .arg(&renamed)
        .arg("llama")
        .assert()
        .success()
        .stdout(predicate::str::contains("architecture whisper -> llama"));
    let out = MappedGGUFContainer::from_path(&renamed).unwrap();
    assert_eq!(out.container.architecture(), Some("llama"));

    rename_arch().arg(&renamed).arg(&back).arg("whisper").assert().success();
    assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&back).unwrap());
}

#[test]
fn test_rename_arch_verbose_logs_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_model(&dir);
    let output = dir.path().join("renamed.gguf");

    rename_arch()
        .arg(&input)
        .arg(&output)
        .arg("llama")
        .arg("--verbose")
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stderr(predicate::str::contains("renamed architecture"))
        .stdout(predicate::str::contains("renamed architecture").not());

    rename_arch()
        .arg(&input)
        .arg(dir.path().join("quiet.gguf"))
        .arg("llama")
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}

#[test]
fn test_rename_arch_bad_input_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.gguf");
    rename_arch()
        .arg(dir.path().join("missing.gguf"))
        .arg(&output)
        .arg("llama")
        .assert()
        .code(1);
    assert!(!output.exists());
}

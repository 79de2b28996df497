//! Black-box CLI tests
//!
//! Invokes the compiled `inferir` binary against synthesized model files
//! and asserts on output text and exit codes.

use std::io::Write;
use std::process::Command;

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};
use predicates::prelude::*;
use tempfile::NamedTempFile;

use inferir::test_factory::{build_tiny_model, TinyModelSpec};

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

fn tiny_model_file() -> NamedTempFile {
    write_temp(&build_tiny_model(&TinyModelSpec::default()))
}

#[test]
fn cli_help() {
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Usage: inferir"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("smoke-load"))
        .stdout(predicate::str::contains("layer-step"));
}

#[test]
fn cli_inspect_prints_header_and_tensors() {
    let model = tiny_model_file();
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("inspect").arg(model.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("gguf version: 3"))
        .stdout(predicate::str::contains("general.architecture: llama"))
        .stdout(predicate::str::contains("Dtype histogram"))
        .stdout(predicate::str::contains("F32: 12 tensors"))
        .stdout(predicate::str::contains("token_embd.weight | F32"))
        .stdout(predicate::str::contains(
            "tokenizer.ggml.tokens: array<string>[3]",
        ));
}

#[test]
fn cli_smoke_load_prints_config_and_stats() {
    let model = tiny_model_file();
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("smoke-load").arg(model.path()).arg("--lm-head");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("config: n_layers=1 d_model=8"))
        .stdout(predicate::str::contains("output.weight"))
        .stdout(predicate::str::contains("blk.ffn_down.weight"))
        .stdout(predicate::str::contains("nan=0"))
        .stdout(predicate::str::contains(
            "gather_column(token_embd.weight, token_id=1)",
        ));
}

#[test]
fn cli_layer_step_prints_output_head() {
    let model = tiny_model_file();
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("layer-step")
        .arg(model.path())
        .arg("--token")
        .arg("1");
    let output = cmd.assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("layer0 output (first 16 floats):"));

    let floats_line = stdout.lines().last().unwrap();
    let floats: Vec<f32> = floats_line
        .split_whitespace()
        .map(|s| s.parse().unwrap())
        .collect();
    // d_model is 8 in the tiny model, so the head is 8 floats
    assert_eq!(floats.len(), 8);
    assert!(floats.iter().all(|v| v.is_finite()));
}

#[test]
fn cli_bad_magic_exits_one_with_diagnostic() {
    let mut bytes = build_tiny_model(&TinyModelSpec::default());
    bytes[..4].copy_from_slice(b"GGU\0");
    let model = write_temp(&bytes);

    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("inspect").arg(model.path());
    cmd.assert()
        .code(1)
        .stderr(predicate::str::starts_with("error: "))
        .stderr(predicate::str::contains("bad magic"));
}

#[test]
fn cli_missing_file_exits_one() {
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("inspect").arg("/nonexistent/model.gguf");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::starts_with("error: "));
}

#[test]
fn cli_usage_error_exits_two() {
    // layer-step without the required --token
    let model = tiny_model_file();
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("layer-step").arg(model.path());
    cmd.assert().code(2);

    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("unknown-subcommand");
    cmd.assert().code(2);
}

#[test]
fn cli_layer_step_rejects_nonzero_pos() {
    let model = tiny_model_file();
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("layer-step")
        .arg(model.path())
        .arg("--token")
        .arg("1")
        .arg("--pos")
        .arg("3");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("only --pos 0"));
}

#[test]
fn cli_layer_step_rejects_out_of_vocab_token() {
    let model = tiny_model_file();
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("layer-step")
        .arg(model.path())
        .arg("--token")
        .arg("99999");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("token id out of range"));
}

#[test]
fn cli_smoke_load_rejects_out_of_range_layer() {
    let model = tiny_model_file();
    let mut cmd = Command::cargo_bin("inferir").expect("binary");
    cmd.arg("smoke-load")
        .arg(model.path())
        .arg("--layer")
        .arg("7");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("layer index out of range"));
}

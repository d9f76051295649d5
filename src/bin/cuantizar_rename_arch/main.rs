//! cuantizar-rename-arch: rewrite `general.architecture` of a GGUF container
//!
//! # Usage
//!
//! ```bash
//! # quantize a model under an architecture name the tooling knows...
//! cuantizar-rename-arch asr-f16.gguf asr-as-qwen2.gguf qwen2
//! cuantizar asr-as-qwen2.gguf asr-as-qwen2-q4_k.gguf Q4_K_M
//! # ...then give it its real name back
//! cuantizar-rename-arch asr-as-qwen2-q4_k.gguf asr-q4_k.gguf qwen3-asr
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cuantizar::arch::rename_architecture;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Copy a GGUF container with a new architecture name
#[derive(Parser)]
#[command(name = "cuantizar-rename-arch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source container
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Destination container
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// New value for general.architecture
    #[arg(value_name = "ARCH")]
    arch: String,

    /// Log open/write phases to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        },
    };
    init_logging(cli.verbose);

    println!("* Loading: {}", cli.input.display());
    match rename_architecture(&cli.input, &cli.output, &cli.arch) {
        Ok(summary) => {
            println!(
                "* Copied {} tensors, architecture {} -> {}",
                summary.tensors,
                summary.previous.as_deref().unwrap_or("<none>"),
                cli.arch
            );
            println!("* Wrote {} ({} bytes)", cli.output.display(), summary.output_bytes);
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}

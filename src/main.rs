//! cuantizar CLI - quantize a GGUF model container
//!
//! ```text
//! cuantizar model-f16.gguf model-q4_k.gguf Q4_K_M
//! cuantizar whisper-f16.gguf whisper-q5_k.gguf q5_k --skip-preset post-norm
//! ```
//!
//! Progress goes to stdout, one line per tensor; diagnostics go to stderr.
//! Exit code 0 on success, 1 on any error (no output file is left behind).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use cuantizar::{
    config::QuantizeConfig,
    error::Result,
    pipeline,
    policy::SkipRoles,
    registry::{self, GgmlType},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Block-quantize the weights of a GGUF model container
#[derive(Parser)]
#[command(name = "cuantizar")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source container
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Destination container (written atomically)
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Target type: F32, F16, Q4_0, Q4_1, Q5_0, Q5_1, Q8_0, Q4_K[_M|_S], Q5_K[_M|_S]
    #[arg(value_name = "TYPE")]
    target: String,

    /// Format for half-precision tensors whose rows do not fit the target blocks
    #[arg(long, value_name = "TYPE", default_value = "Q8_0")]
    fallback: String,

    /// Built-in skip-role preset
    #[arg(long, value_enum, default_value_t = SkipPreset::Standard)]
    skip_preset: SkipPreset,

    /// Load skip roles from a JSON file instead of a preset
    #[arg(long, value_name = "FILE", conflicts_with = "skip_preset")]
    skip_roles: Option<PathBuf>,

    /// Worker threads (default: all logical CPUs)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Log open/parse/write phases to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SkipPreset {
    /// Skip bias, norm, and token_embd tensors
    Standard,
    /// Standard plus ln_post, reporting alignment skips
    PostNorm,
}

impl Cli {
    /// Resolve every argument into a run configuration, before any container I/O
    fn config(&self) -> Result<QuantizeConfig> {
        let target = registry::resolve(&self.target)?;
        let fallback: GgmlType = registry::resolve(&self.fallback)?;
        let skip_roles = match &self.skip_roles {
            Some(path) => SkipRoles::from_json_file(path)?,
            None => match self.skip_preset {
                SkipPreset::Standard => SkipRoles::standard(),
                SkipPreset::PostNorm => SkipRoles::post_norm(),
            },
        };

        let mut config = QuantizeConfig::new(target)
            .with_fallback(fallback)
            .with_skip_roles(skip_roles);
        if let Some(n) = self.threads {
            config = config.with_threads(n);
        }
        Ok(config)
    }
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
            // --help and --version print to stdout and succeed
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        },
    };
    init_logging(cli.verbose);

    let result = cli
        .config()
        .and_then(|config| pipeline::run(&cli.input, &cli.output, config));
    match result {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}

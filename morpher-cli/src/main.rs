//! Offline host for the morphing stream.
//!
//! Feeds a WAV file (plus an optional sidechain) through `StreamCoordinator`
//! block by block, exactly as a plugin host would, and writes the result.

mod render;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Offline renderer for the neural morphing stream.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a main input (and optional sidechain) through the stream.
    Render(RenderArgs),
    /// Print the effective stream configuration as JSON.
    Config {
        /// JSON stream configuration to load before printing.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Main (primary) input WAV. Mono files are duplicated to stereo.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Sidechain WAV, resampled to the main rate and padded or cut to its length.
    #[arg(short, long)]
    pub sidechain: Option<PathBuf>,

    /// Output WAV (32-bit float stereo).
    #[arg(short, long)]
    pub output: PathBuf,

    /// Harmony control in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    pub harmony: f32,

    /// Rhythm control in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    pub rhythm: f32,

    /// Linear gain applied to the main input before the model.
    #[arg(long, default_value_t = 1.0)]
    pub source_gain: f32,

    /// Linear gain applied to the sidechain before the model.
    #[arg(long, default_value_t = 1.0)]
    pub sidechain_gain: f32,

    /// Link harmony and rhythm.
    #[arg(long)]
    pub sync: bool,

    /// Host block size in frames.
    #[arg(long, default_value_t = 512)]
    pub block_size: usize,

    /// JSON stream configuration (window, cache, outputDelay, ...).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// ONNX morph network. Without it a deterministic crossfade is used.
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Write a JSON report with diagnostics and per-inference events.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Pace blocks in real time instead of letting each inference land.
    #[arg(long)]
    pub realtime: bool,
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("morpher=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Render(args) => render::run(&args),
        Command::Config { config } => render::print_config(config.as_deref()),
    };

    if let Err(e) = result {
        tracing::error!("{e:#}");
        eprintln!("morpher: {e:#}");
        std::process::exit(1);
    }
}

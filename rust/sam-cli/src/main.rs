//! CLI tool for listing SAM variants, summarizing models and adapting checkpoints.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sam")]
#[command(author, version, about = "SAM model CLI for variant inspection and checkpoint adaptation")]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered variants
    Variants {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Validate a build configuration file
    Validate {
        /// Path to the YAML build configuration
        config: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Summarize the model a variant builds at a given resolution
    Summarize {
        /// Registered variant name
        #[arg(long, default_value = "default")]
        variant: String,

        /// Input image size in pixels
        #[arg(long, default_value_t = sam_core::default_image_size())]
        image_size: usize,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Adapt a checkpoint to a model built at a new resolution
    Adapt {
        /// Path to a YAML build configuration (replaces --variant, --image-size, --checkpoint, --seed)
        #[arg(long, conflicts_with_all = ["variant", "image_size", "checkpoint", "seed"])]
        config: Option<PathBuf>,

        /// Registered variant name
        #[arg(long)]
        variant: Option<String>,

        /// Input image size in pixels
        #[arg(long)]
        image_size: Option<usize>,

        /// Source checkpoint (.safetensors)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Seed for parameters the checkpoint does not provide
        #[arg(long)]
        seed: Option<u64>,

        /// Destination for the adapted parameters (.safetensors)
        #[arg(long, short)]
        output: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Variants { format } => commands::variants::run(&format),
        Commands::Validate { config, format } => commands::validate::run(&config, &format),
        Commands::Summarize {
            variant,
            image_size,
            format,
        } => commands::summarize::run(&variant, image_size, &format),
        Commands::Adapt {
            config,
            variant,
            image_size,
            checkpoint,
            seed,
            output,
            format,
        } => {
            let source = match config {
                Some(path) => commands::adapt::Source::Config(path),
                None => commands::adapt::Source::Flags {
                    variant: variant.unwrap_or_else(|| "default".to_string()),
                    image_size: image_size.unwrap_or_else(sam_core::default_image_size),
                    checkpoint,
                    seed: seed.unwrap_or(0),
                },
            };
            commands::adapt::run(source, &output, &format)
        }
    }
}

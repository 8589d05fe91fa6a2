// ABOUTME: CLI entry point for filemaker-extractor
// ABOUTME: Parses commands and routes to appropriate handlers

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use filemaker_extractor::commands;
use filemaker_extractor::error::ExtractError;

#[derive(Parser)]
#[command(name = "filemaker-extractor")]
#[command(about = "FileMaker Data API extraction CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one extraction run against a FileMaker Data API server
    Run {
        /// Path to the JSON configuration document
        #[arg(long)]
        config: PathBuf,
        /// Directory where output tables and manifests are written
        #[arg(long, default_value = "out")]
        output_dir: PathBuf,
        /// Path to the incremental state file (defaults to ~/.filemaker-extractor/state.json)
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
    /// Inspect or reset persisted incremental state
    State {
        #[command(flatten)]
        args: commands::state::StateArgs,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let result = match cli.command {
        Commands::Run {
            config,
            output_dir,
            state_file,
        } => commands::run(&config, &output_dir, state_file).await,
        Commands::State { args } => commands::state(args),
    };

    if let Err(err) = result {
        // User-correctable failures (bad configuration, wrong credentials,
        // missing layout) exit with 1; anything unexpected with 2.
        let code = match err.downcast_ref::<ExtractError>() {
            Some(extract_err) => {
                tracing::error!("run failed ({}): {:#}", extract_err.kind(), err);
                if extract_err.is_user_error() {
                    1
                } else {
                    2
                }
            }
            None => {
                tracing::error!("{:#}", err);
                2
            }
        };
        std::process::exit(code);
    }
}

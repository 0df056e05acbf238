use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod config;

/// Writes Singer records from stdin to the Sharpi partner API.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the config file (YAML or JSON).
    #[arg(long)]
    config: PathBuf,

    /// Read messages from this file instead of stdin.
    #[arg(long)]
    input: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _logging = match shared::logging::init(&config.logging.unwrap_or_default()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(metrics) = &config.metrics {
        if let Err(e) = shared::metrics::init(metrics, sharpi::metrics_defs::ALL_METRICS) {
            tracing::error!(error = %e, "could not enable metrics");
            return ExitCode::FAILURE;
        }
    }

    match sharpi::run(&config.sharpi, cli.input.as_deref()) {
        Ok(summary) => {
            tracing::info!(
                created = summary.created,
                updated = summary.updated,
                states = summary.states,
                "target finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "target failed");
            ExitCode::FAILURE
        }
    }
}

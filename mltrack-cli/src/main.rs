//! mltrack CLI: train the registered classifiers on one dataset and record
//! each model as an MLflow run.

mod commands;

use clap::Parser;
use mltrack_core::MltrackConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// mltrack: compare classifiers and track every run in MLflow
#[derive(Parser, Debug)]
#[command(name = "mltrack", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML); environment variables take precedence
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train models and log each one as a tracked run
    Train(commands::TrainArgs),
    /// List registered models and their default hyperparameters
    Models,
    /// List registered datasets
    Datasets,
}

/// Stderr filter for our own crates; dependencies stay at `warn`.
fn stderr_filter(verbose: u8, quiet: bool, local: bool) -> String {
    if quiet && verbose == 0 {
        return "error".to_string();
    }
    let level = match verbose {
        0 if local => "debug",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("warn,mltrack={level},mltrack_core={level}")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = MltrackConfig::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?;

    // RUST_LOG wins over the flags when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(stderr_filter(cli.verbose, cli.quiet, config.is_local())));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let log_dir = directories::ProjectDirs::from("dev", "mltrack", "mltrack")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "mltrack.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("warn,mltrack=debug,mltrack_core=debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), env = %config.env, "starting");
    commands::handle_command(cli.command, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stderr_filter_levels() {
        assert_eq!(stderr_filter(0, false, false), "warn,mltrack=info,mltrack_core=info");
        assert_eq!(stderr_filter(0, false, true), "warn,mltrack=debug,mltrack_core=debug");
        assert_eq!(stderr_filter(2, false, false), "warn,mltrack=trace,mltrack_core=trace");
        assert_eq!(stderr_filter(0, true, true), "error");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mltrack", "models", "-vv", "--config", "mltrack.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("mltrack.toml")));
        assert!(matches!(cli.command, Commands::Models));
    }
}

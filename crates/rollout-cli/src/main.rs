//! Rollout CLI tool.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::exec::ExecArgs;

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Roll container images out through GitOps-managed releases", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to ./rollout.kdl when present)
    #[arg(long, env = "ROLLOUT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update a release's image and sync it to convergence
    #[command(visible_aliases = ["x", "run"])]
    Exec(ExecArgs),
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = rollout_config::DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
    /// Print the version
    Version,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Exec(args) => {
            commands::exec::run(cli.config.as_deref(), args).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Version => {
            commands::version();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_aliases() {
        for alias in ["exec", "x", "run"] {
            let cli = Cli::try_parse_from([
                "rollout",
                alias,
                "api",
                "-e",
                "prod",
                "-i",
                "api:v2",
                "--argocd-host",
                "argocd.example.com",
                "--argocd-token",
                "t0ken",
            ])
            .unwrap();
            assert!(matches!(cli.command, Commands::Exec(_)));
        }
    }

    #[test]
    fn test_exec_requires_environment() {
        let result = Cli::try_parse_from([
            "rollout",
            "exec",
            "api",
            "-i",
            "api:v2",
            "--argocd-host",
            "argocd.example.com",
            "--argocd-token",
            "t0ken",
        ]);
        let err = result.err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert!(err.to_string().contains("--environment"));
    }

    #[test]
    fn test_verbosity_is_global() {
        let cli = Cli::try_parse_from(["rollout", "validate", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Validate { path } => assert_eq!(path, PathBuf::from("rollout.kdl")),
            _ => panic!("expected validate"),
        }
    }
}

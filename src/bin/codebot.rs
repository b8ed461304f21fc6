//! `codebot` entry point.
//!
//! `codebot run` (the default) connects to Discord and runs until Ctrl-C.
//! `codebot check-config` validates the configuration file and exits.

use clap::{Parser, Subcommand};
use codebot::config::{BotConfig, ConfigSeverity};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "codebot", about = "Discord community companion bot", version)]
struct Cli {
    #[arg(
        long,
        short,
        env = "CODEBOT_CONFIG",
        help = "Path to the TOML configuration file (default: ./codebot.toml)"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect and run until interrupted.
    Run,
    /// Validate the configuration and print every issue.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "codebot=info,reqwest=warn,tungstenite=warn,tokio_tungstenite=warn",
                )
            }),
        )
        .init();

    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(BotConfig::default_config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => {
            let config = BotConfig::from_file(&path)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
            let issues = config.validate();
            for issue in &issues {
                let level = match issue.severity {
                    ConfigSeverity::Warning => "warning",
                    ConfigSeverity::Error => "error",
                };
                println!("{level}: [{}] {}", issue.id, issue.summary);
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                return Ok(ExitCode::FAILURE);
            }
            println!("{}: ok", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run => {
            let config = BotConfig::load(&path)
                .map_err(|e| anyhow::anyhow!("cannot load {}: {e}", path.display()))?;
            tracing::info!("codebot starting ({} tracked rooms)", config.resources.len());
            codebot::runtime::run_bot(config).await.map_err(|e| {
                tracing::error!(error = %e, "codebot exited with error");
                anyhow::anyhow!("codebot failed: {e}")
            })?;
            tracing::info!("codebot shut down cleanly");
            Ok(ExitCode::SUCCESS)
        }
    }
}

//! `numscull-server` binary: CLI entry point for the accept loop and the
//! `create-keypair` identity-provisioning subcommand.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use numscull_protocol::server::config::{Cli, Command, ServerConfig};
use numscull_protocol::server::{identity, serve};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Some(Command::CreateKeypair { identity: name }) = &cli.command {
        let Some(config_dir) = &cli.config_dir else {
            tracing::error!("--config-dir is required");
            return std::process::ExitCode::FAILURE;
        };
        return match identity::create_keypair(name, config_dir) {
            Ok(()) => {
                tracing::info!(identity = %name, "wrote identity keypair");
                std::process::ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to create keypair");
                std::process::ExitCode::FAILURE
            }
        };
    }

    let config = match ServerConfig::resolve(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    match serve(&config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server terminated");
            std::process::ExitCode::FAILURE
        }
    }
}

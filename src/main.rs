use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use vps_explorer::config::Cli;
use vps_explorer::gateway::{self, AppState};
use vps_explorer::init_logging;
use vps_explorer::ssh::Session;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting VPS Explorer...");
    let session = Arc::new(Session::new());
    if let Err(e) = session.connect(&config.ssh).await {
        error!("Could not connect to {}: {}", config.ssh.host_port(), e);
        return ExitCode::FAILURE;
    }

    // Closing the session first ends any live output streams, which lets
    // graceful shutdown finish
    let shutdown = {
        let session = session.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down...");
            session.close().await;
        }
    };

    let result = gateway::serve(&config.server, AppState::new(session.clone()), shutdown).await;
    session.close().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

//! volrepl - Volume Replication Control Client
//!
//! Sends one replication command to the controller and exits.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volrepl::cli::{self, Cli, Invocation};
use volrepl::config::ADDRESS_ENV;
use volrepl::network::ConnectionLossPolicy;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let invocation = match Invocation::from_cli(cli, std::env::var(ADDRESS_ENV).ok()) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    init_logging(&invocation.log_level);

    match execute(invocation) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run the invocation on a single-threaded runtime
fn execute(invocation: Invocation) -> anyhow::Result<String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let output = runtime.block_on(cli::run(invocation, ConnectionLossPolicy::Exit))?;
    Ok(output)
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

//! relaypick - Relay server picker for relay-based peer-to-peer clients.

use clap::Parser;
use relaypick::{run_pick, BuildInfo, Cli, Command};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize the crypto provider
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        tracing::warn!(
            "failed to install default crypto provider (may already be installed): {:?}",
            e
        );
    }

    match cli.command {
        Command::Pick(args) => {
            tracing::debug!(?args, "Pick arguments");

            let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
            if let Err(e) = runtime.block_on(run_pick(&args)) {
                tracing::error!(error = %e, "pick failed");
                std::process::exit(e.exit_code().into());
            }
        }
        Command::Version => {
            let info = BuildInfo::get();
            println!("{}", info.format());
        }
    }
}

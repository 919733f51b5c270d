// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use switchboard::config::Config;

#[derive(Parser)]
#[command(name = "switchboard", version, about = "WebSocket signaling relay for peer-to-peer sessions.")]
struct Cli {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.config.log_level)),
        )
        .init();

    if let Err(e) = switchboard::run(cli.config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

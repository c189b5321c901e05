// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! taglock - client for the tag-set lock daemon

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;
mod output;

use std::net::SocketAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{daemon, lock};

use crate::client::{daemon_addr, DaemonClient};
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(
    name = "taglock",
    version,
    about = "Taglock - mutual exclusion keyed by tag sets"
)]
struct Cli {
    /// Daemon address (default: $TAGLOCK_ADDR or 127.0.0.1:7446)
    #[arg(long, global = true)]
    addr: Option<SocketAddr>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain, heartbeat, release and list locks
    Lock(lock::LockArgs),
    /// Daemon management
    Daemon(daemon::DaemonArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();

    let client = DaemonClient::new(daemon_addr(cli.addr)?);

    match cli.command {
        Commands::Lock(args) => lock::handle(args, &client, cli.format).await,
        Commands::Daemon(args) => daemon::handle(args, &client, cli.format).await,
    }
}

/// Diagnostics go to stderr so stdout stays parseable
fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_env("TAGLOCK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

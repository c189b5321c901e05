// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon management commands

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::client::{ClientError, DaemonClient};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Show uptime and lock counts
    Status,
    /// Check that the daemon answers
    Ping,
    /// Ask the daemon to shut down
    Stop,
}

pub async fn handle(args: DaemonArgs, client: &DaemonClient, format: OutputFormat) -> Result<()> {
    match args.command {
        DaemonCommand::Status => status(client, format).await,
        DaemonCommand::Ping => {
            client.ping().await?;
            let version = client.hello().await?;
            println!("pong from {} (protocol {})", client.addr(), version);
            Ok(())
        }
        DaemonCommand::Stop => stop(client).await,
    }
}

async fn status(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    match client.status().await {
        Ok(status) => {
            output::print(&status, format);
            Ok(())
        }
        Err(ClientError::DaemonNotRunning(addr)) => {
            println!("Daemon not running at {}", addr);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn stop(client: &DaemonClient) -> Result<()> {
    match client.shutdown().await {
        Ok(()) => {
            println!("Daemon stopping");
            Ok(())
        }
        Err(ClientError::DaemonNotRunning(_)) => {
            println!("Daemon not running");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock commands: obtain, heartbeat, release, list, run

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use taglock_core::{parse_tag, LockClaim, LockSummary, Selection, SessionId, TagSet, TagValue};
use tracing::{debug, warn};

use crate::client::DaemonClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockCommand,
}

/// Tag set and timing shared by `obtain` and `run`
#[derive(Args)]
pub struct ObtainArgs {
    /// Tag as key=value or key:kind=value (kind: string, int, uint, float, bool)
    #[arg(long = "tag", short = 't', required = true, value_parser = parse_tag)]
    tags: Vec<(String, TagValue)>,

    /// Heartbeat timeout to request (e.g. 30s, 2m)
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Give up if the lock is not granted within this long
    #[arg(long, value_parser = humantime::parse_duration)]
    wait: Option<Duration>,
}

#[derive(Subcommand)]
pub enum LockCommand {
    /// Obtain a lock, waiting while another session holds it
    Obtain(ObtainArgs),
    /// Keep sessions alive
    Heartbeat {
        /// Session ids to heartbeat
        #[arg(required = true)]
        session_ids: Vec<String>,
    },
    /// Release a lock
    Release {
        /// Session id returned by obtain
        session_id: String,
    },
    /// List held locks with their holder and waiter count
    List {
        /// Only locks matching this JSON selection
        #[arg(long, value_parser = parse_selection)]
        select: Option<Selection>,
    },
    /// Run a command while holding a lock
    Run {
        #[command(flatten)]
        obtain: ObtainArgs,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn parse_selection(raw: &str) -> Result<Selection, String> {
    let selection: Selection = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    selection.validate().map_err(|e| e.to_string())?;
    Ok(selection)
}

#[derive(Serialize)]
#[serde(transparent)]
struct Claim(LockClaim);

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.session_id)
    }
}

#[derive(Serialize)]
#[serde(transparent)]
struct LockRow(LockSummary);

impl fmt::Display for LockRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6} {}", self.0.count, self.0.tags)
    }
}

pub async fn handle(args: LockArgs, client: &DaemonClient, format: OutputFormat) -> Result<()> {
    match args.command {
        LockCommand::Obtain(obtain) => {
            let claim = obtain_claim(client, obtain).await?;
            output::print(&Claim(claim), format);
            Ok(())
        }
        LockCommand::Heartbeat { session_ids } => {
            let ids = session_ids.into_iter().map(SessionId::from).collect();
            let failures = client.heartbeat(ids).await?;
            for failure in &failures {
                eprintln!("{}: {}", failure.session_id, failure.error);
            }
            if !failures.is_empty() {
                bail!("{} session(s) not found", failures.len());
            }
            Ok(())
        }
        LockCommand::Release { session_id } => {
            client.release(SessionId::from(session_id)).await?;
            Ok(())
        }
        LockCommand::List { select } => {
            let rows: Vec<LockRow> = client.list(select).await?.into_iter().map(LockRow).collect();
            output::print_list(&rows, &format!("{:<6} TAGS", "COUNT"), "No locks", format);
            Ok(())
        }
        LockCommand::Run { obtain, command } => {
            let code = run(client, obtain, &command).await?;
            std::process::exit(code);
        }
    }
}

async fn obtain_claim(client: &DaemonClient, args: ObtainArgs) -> Result<LockClaim> {
    let tags: TagSet = args.tags.into_iter().collect();
    match client.obtain(tags, args.timeout, args.wait).await? {
        Some(claim) => Ok(claim),
        None => bail!("lock not obtained: wait elapsed or daemon shutting down"),
    }
}

/// Hold a lock for the lifetime of a child process
///
/// Returns the child's exit code once the lock is released.
async fn run(client: &DaemonClient, args: ObtainArgs, command: &[String]) -> Result<i32> {
    let Some((program, rest)) = command.split_first() else {
        bail!("no command given");
    };

    let claim = obtain_claim(client, args).await?;
    debug!(session_id = %claim.session_id, "lock obtained, starting {}", program);

    let status = match tokio::process::Command::new(program).args(rest).spawn() {
        Ok(child) => supervise(client, &claim, child).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = client.release(claim.session_id.clone()).await {
        warn!(session_id = %claim.session_id, "release failed: {}", e);
    }

    Ok(exit_code(status?))
}

/// A third of the lock timeout, never zero
fn heartbeat_period(timeout: Duration) -> Duration {
    (timeout / 3).max(Duration::from_millis(1))
}

/// Wait for the child, heartbeating at a third of the lock timeout
async fn supervise(
    client: &DaemonClient,
    claim: &LockClaim,
    mut child: tokio::process::Child,
) -> Result<ExitStatus> {
    let mut beats = tokio::time::interval(heartbeat_period(claim.timeout));
    // The first tick completes immediately
    beats.tick().await;

    loop {
        tokio::select! {
            status = child.wait() => return Ok(status?),
            _ = beats.tick() => {
                match client.heartbeat(vec![claim.session_id.clone()]).await {
                    Ok(failures) if failures.is_empty() => {}
                    Ok(_) => warn!(session_id = %claim.session_id, "lock lost while command running"),
                    Err(e) => warn!(session_id = %claim.session_id, "heartbeat failed: {}", e),
                }
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn selection_flag_accepts_json() {
        let selection = parse_selection(r#"{"keys":{"env":[{"exists":true}]}}"#);
        assert!(selection.is_ok(), "{:?}", selection.err());
    }

    #[test]
    fn selection_flag_rejects_garbage() {
        assert!(parse_selection("{not json").is_err());
    }

    #[test]
    fn exit_code_passes_through() {
        let status = Command::new("sh").args(["-c", "exit 7"]).status().unwrap();
        assert_eq!(exit_code(status), 7);
    }

    #[cfg(unix)]
    #[test]
    fn killed_child_maps_to_shell_convention() {
        let status = Command::new("sh")
            .args(["-c", "kill -TERM $$"])
            .status()
            .unwrap();
        assert_eq!(exit_code(status), 128 + 15);
    }

    #[test]
    fn heartbeat_period_is_a_third_of_the_timeout() {
        assert_eq!(heartbeat_period(Duration::from_secs(30)), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn tiny_timeout_still_gets_a_usable_interval() {
        let period = heartbeat_period(Duration::from_nanos(1));
        assert_eq!(period, Duration::from_millis(1));
        // interval panics on a zero period
        let mut beats = tokio::time::interval(period);
        beats.tick().await;
    }

    #[test]
    fn rows_render_count_then_tags() {
        let row = LockRow(LockSummary {
            tags: [("repo", "a")].into_iter().collect(),
            count: 2,
        });
        assert_eq!(row.to_string(), "2      repo=a");
    }
}

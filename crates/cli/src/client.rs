// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client for CLI commands

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use taglock_core::{LockClaim, LockSummary, Selection, SessionId, TagSet};
use taglock_daemon::lifecycle::DEFAULT_ADDR;
use taglock_daemon::protocol::{self, ErrorKind, FailedHeartbeat, ProtocolError, PROTOCOL_VERSION};
use taglock_daemon::{Request, Response};
use thiserror::Error;
use tokio::net::TcpStream;

// Timeout configuration (env vars in milliseconds)
fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for IPC requests (hello, status, heartbeat, release, list, shutdown)
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("TAGLOCK_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for establishing the TCP connection
pub fn timeout_connect() -> Duration {
    parse_duration_ms("TAGLOCK_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(2))
}

/// Resolve the daemon address: `--addr`, else `$TAGLOCK_ADDR`, else the default
pub fn daemon_addr(explicit: Option<SocketAddr>) -> Result<SocketAddr, ClientError> {
    if let Some(addr) = explicit {
        return Ok(addr);
    }
    match std::env::var("TAGLOCK_ADDR") {
        Ok(raw) => raw.parse().map_err(|_| ClientError::InvalidAddr(raw)),
        Err(_) => Ok(DEFAULT_ADDR),
    }
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running at {0}")]
    DaemonNotRunning(SocketAddr),

    #[error("Connection timeout reaching daemon at {0}")]
    ConnectTimeout(SocketAddr),

    #[error("Invalid daemon address: {0}")]
    InvalidAddr(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon counters reported by `Status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub uptime_secs: u64,
    pub locks: usize,
    pub holders: usize,
    pub waiters: u64,
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: running")?;
        writeln!(f, "Uptime: {}", format_uptime(self.uptime_secs))?;
        writeln!(f, "Locks: {}", self.locks)?;
        writeln!(f, "Holders: {}", self.holders)?;
        write!(f, "Waiters: {}", self.waiters)
    }
}

fn format_uptime(secs: u64) -> String {
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

/// Daemon client
pub struct DaemonClient {
    addr: SocketAddr,
}

impl DaemonClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn connect(&self) -> Result<TcpStream, ClientError> {
        match tokio::time::timeout(timeout_connect(), TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                Err(ClientError::DaemonNotRunning(self.addr))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClientError::ConnectTimeout(self.addr)),
        }
    }

    /// Send a request and receive a response with specific timeouts
    ///
    /// `read_timeout` of `None` waits for the response indefinitely.
    async fn send_with_timeout(
        &self,
        request: Request,
        read_timeout: Option<Duration>,
        write_timeout: Duration,
    ) -> Result<Response, ClientError> {
        let stream = self.connect().await?;
        let (mut reader, mut writer) = stream.into_split();

        // Encode and send request with write timeout
        let data = protocol::encode(&request)?;
        tokio::time::timeout(write_timeout, protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        // Read response, bounded unless the request may park
        let response_bytes = match read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, protocol::read_message(&mut reader))
                .await
                .map_err(|_| ProtocolError::Timeout)??,
            None => protocol::read_message(&mut reader).await?,
        };

        let response: Response = protocol::decode(&response_bytes)?;
        Ok(response)
    }

    /// Send a request and receive a response
    pub async fn send(&self, request: Request) -> Result<Response, ClientError> {
        self.send_with_timeout(request, Some(timeout_ipc()), timeout_ipc())
            .await
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.send(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Get daemon protocol version via Hello handshake
    pub async fn hello(&self) -> Result<String, ClientError> {
        match self
            .send(Request::Hello {
                version: PROTOCOL_VERSION.to_string(),
            })
            .await?
        {
            Response::Hello { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Get daemon status
    pub async fn status(&self) -> Result<DaemonStatus, ClientError> {
        match self.send(Request::Status).await? {
            Response::Status {
                uptime_secs,
                locks,
                holders,
                waiters,
            } => Ok(DaemonStatus {
                uptime_secs,
                locks,
                holders,
                waiters,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Request daemon shutdown
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        match self.send(Request::Shutdown).await? {
            Response::ShuttingDown => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Obtain the lock for `tags`, parking until it is granted
    ///
    /// `None` means no lock was granted: `wait` elapsed or the daemon is
    /// draining. Dropping the returned future closes the connection, which
    /// withdraws the request on the daemon side.
    pub async fn obtain(
        &self,
        tags: TagSet,
        timeout: Option<Duration>,
        wait: Option<Duration>,
    ) -> Result<Option<LockClaim>, ClientError> {
        let read_timeout = wait.map(|wait| wait + timeout_ipc());
        let request = Request::ObtainLock {
            tags,
            timeout,
            wait,
        };
        match self
            .send_with_timeout(request, read_timeout, timeout_ipc())
            .await?
        {
            Response::Lock { claim } => Ok(claim),
            other => Err(unexpected(other)),
        }
    }

    /// Heartbeat a batch of sessions, returning the ones the daemon no longer knows
    pub async fn heartbeat(
        &self,
        session_ids: Vec<SessionId>,
    ) -> Result<Vec<FailedHeartbeat>, ClientError> {
        match self.send(Request::Heartbeat { session_ids }).await? {
            Response::Heartbeat { failures } => Ok(failures),
            other => Err(unexpected(other)),
        }
    }

    pub async fn release(&self, session_id: SessionId) -> Result<(), ClientError> {
        match self.send(Request::ReleaseLock { session_id }).await? {
            Response::Released => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list(&self, selection: Option<Selection>) -> Result<Vec<LockSummary>, ClientError> {
        match self.send(Request::ListLocks { selection }).await? {
            Response::Locks { locks } => Ok(locks),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> ClientError {
    match response {
        Response::Error { kind, message } => ClientError::Rejected { kind, message },
        _ => ClientError::UnexpectedResponse,
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP server and connection handling.

use std::future::pending;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taglock_core::{CancelToken, LockConfig, LockCoordinator, TagSet};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::protocol::{
    self, ErrorKind, FailedHeartbeat, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION,
};

/// State shared by every connection
pub struct ServerContext {
    pub coordinator: LockCoordinator,
    pub start_time: Instant,
    /// Fired by a `Shutdown` request
    pub shutdown: CancelToken,
}

impl ServerContext {
    pub fn new(locks: LockConfig) -> Self {
        Self {
            coordinator: LockCoordinator::new(locks),
            start_time: Instant::now(),
            shutdown: CancelToken::new(),
        }
    }
}

/// Accept connections until a `Shutdown` request arrives
///
/// Each connection runs on its own task so a parked obtain never stalls the
/// accept loop.
pub async fn serve(listener: &TcpListener, ctx: Arc<ServerContext>) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                info!("Shutdown requested via IPC");
                return;
            }
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(&ctx, stream).await {
                            error!(%peer, "Error handling connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            },
        }
    }
}

/// Handle a single client connection
pub async fn handle_connection(ctx: &ServerContext, stream: TcpStream) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.into_split();

    let request = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
        Ok(req) => req,
        Err(protocol::ProtocolError::Timeout) => {
            error!("Request read timeout");
            return Err(ServerError::Timeout);
        }
        Err(protocol::ProtocolError::ConnectionClosed) => {
            debug!("Client disconnected before sending request");
            return Ok(());
        }
        Err(protocol::ProtocolError::Json(e)) => {
            warn!("Undecodable request: {}", e);
            let response = Response::error(ErrorKind::Protocol, e.to_string());
            protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;
            return Ok(());
        }
        Err(e) => {
            error!("Failed to read request: {}", e);
            return Err(ServerError::Protocol(e));
        }
    };

    debug!("Received request: {:?}", request);

    if let Request::ObtainLock {
        tags,
        timeout,
        wait,
    } = request
    {
        let response = handle_obtain(ctx, &mut reader, tags, timeout, wait).await;
        debug!("Sending response: {:?}", response);
        if let Err(e) = protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await {
            // The client never learns its session id, so nobody could release it
            if let Response::Lock { claim: Some(claim) } = &response {
                warn!(session_id = %claim.session_id, "claim undeliverable, releasing");
                let _ = ctx.coordinator.release_lock(&claim.session_id);
            }
            return Err(e.into());
        }
        return Ok(());
    }

    let response = handle_request(ctx, request);
    debug!("Sending response: {:?}", response);
    protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;
    Ok(())
}

/// Obtain a lock, giving up if the client goes away or the wait elapses
async fn handle_obtain(
    ctx: &ServerContext,
    reader: &mut OwnedReadHalf,
    tags: TagSet,
    timeout: Option<Duration>,
    wait: Option<Duration>,
) -> Response {
    let cancel = CancelToken::new();
    let obtain = ctx.coordinator.obtain_lock(tags, timeout, &cancel);
    tokio::pin!(obtain);

    let result = tokio::select! {
        result = &mut obtain => result,
        _ = wait_elapsed(wait) => {
            debug!("obtain wait elapsed");
            cancel.cancel();
            obtain.await
        }
        _ = disconnected(reader) => {
            debug!("client disconnected while waiting for lock");
            cancel.cancel();
            obtain.await
        }
    };

    match result {
        Ok(claim) => Response::Lock { claim },
        Err(e) => e.into(),
    }
}

async fn wait_elapsed(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => pending().await,
    }
}

/// Resolves once the peer closes its half of the connection
async fn disconnected(reader: &mut OwnedReadHalf) {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

/// Handle every request that completes without waiting
fn handle_request(ctx: &ServerContext, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version: _ } => Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::Status => {
            let stats = ctx.coordinator.stats();
            Response::Status {
                uptime_secs: ctx.start_time.elapsed().as_secs(),
                locks: stats.locks,
                holders: stats.holders,
                waiters: stats.waiters,
            }
        }

        Request::Shutdown => {
            ctx.shutdown.cancel();
            Response::ShuttingDown
        }

        Request::Heartbeat { session_ids } => {
            let failures = ctx
                .coordinator
                .heartbeat(&session_ids)
                .into_iter()
                .map(|failure| FailedHeartbeat {
                    session_id: failure.session_id,
                    error: failure.error.to_string(),
                })
                .collect();
            Response::Heartbeat { failures }
        }

        Request::ReleaseLock { session_id } => match ctx.coordinator.release_lock(&session_id) {
            Ok(()) => Response::Released,
            Err(e) => e.into(),
        },

        Request::ListLocks { selection: None } => Response::Locks {
            locks: ctx.coordinator.list_locks(),
        },

        Request::ListLocks {
            selection: Some(selection),
        } => match ctx.coordinator.query_locks(&selection) {
            Ok(locks) => Response::Locks { locks },
            Err(e) => e.into(),
        },

        Request::ObtainLock { .. } => {
            Response::error(ErrorKind::Protocol, "obtain must be handled by the connection")
        }
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Request timeout")]
    Timeout,
}

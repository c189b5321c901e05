// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process daemon exercised over real TCP connections

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use taglock_core::{LockClaim, SessionId, TagSet};
use taglock_daemon::lifecycle::{self, Config, DaemonState};
use taglock_daemon::protocol::{self, ErrorKind, Request, Response, DEFAULT_TIMEOUT};
use taglock_daemon::server::{self, ServerContext};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

struct Harness {
    addr: SocketAddr,
    config: Config,
    context: Arc<ServerContext>,
    /// Hands the daemon back once the accept loop stops
    server: JoinHandle<DaemonState>,
    _dir: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.listen_addr = "127.0.0.1:0".parse().unwrap();

        let daemon = lifecycle::startup(&config).await.unwrap();
        let addr = daemon.local_addr().unwrap();
        let context = Arc::clone(&daemon.context);
        let server = {
            let context = Arc::clone(&context);
            tokio::spawn(async move {
                server::serve(&daemon.listener, context).await;
                daemon
            })
        };

        Self {
            addr,
            config,
            context,
            server,
            _dir: dir,
        }
    }

    async fn send(&self, request: &Request) -> Response {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        send_on(&mut stream, request).await
    }

    async fn obtain(&self, tags: &TagSet) -> Option<LockClaim> {
        let request = Request::ObtainLock {
            tags: tags.clone(),
            timeout: Some(Duration::from_secs(30)),
            wait: None,
        };
        match self.send(&request).await {
            Response::Lock { claim } => claim,
            other => panic!("Expected Lock, got {:?}", other),
        }
    }

    async fn lock_count(&self) -> Vec<u64> {
        match self.send(&Request::ListLocks { selection: None }).await {
            Response::Locks { locks } => locks.into_iter().map(|l| l.count).collect(),
            other => panic!("Expected Locks, got {:?}", other),
        }
    }

    async fn wait_for_counts(&self, expected: &[u64]) {
        for _ in 0..200 {
            if self.lock_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lock counts never reached {:?}", expected);
    }
}

async fn send_on(stream: &mut TcpStream, request: &Request) -> Response {
    let body = protocol::encode(request).unwrap();
    protocol::write_message(stream, &body).await.unwrap();
    let bytes = protocol::read_message(stream).await.unwrap();
    protocol::decode(&bytes).unwrap()
}

fn tags(pairs: &[(&str, &str)]) -> TagSet {
    pairs.iter().copied().collect()
}

#[tokio::test]
async fn ping_and_hello() {
    let harness = Harness::start().await;
    assert_eq!(harness.send(&Request::Ping).await, Response::Pong);
    assert_eq!(
        harness
            .send(&Request::Hello {
                version: "1".into()
            })
            .await,
        Response::Hello {
            version: protocol::PROTOCOL_VERSION.into()
        }
    );
}

#[tokio::test]
async fn obtain_list_release() {
    let harness = Harness::start().await;
    let key = tags(&[("repo", "a")]);

    let claim = harness.obtain(&key).await.unwrap();
    assert_eq!(claim.timeout, Duration::from_secs(30));
    assert_eq!(harness.lock_count().await, vec![1]);

    let response = harness
        .send(&Request::ReleaseLock {
            session_id: claim.session_id.clone(),
        })
        .await;
    assert_eq!(response, Response::Released);
    assert!(harness.lock_count().await.is_empty());

    let again = harness
        .send(&Request::ReleaseLock {
            session_id: claim.session_id,
        })
        .await;
    assert!(matches!(
        again,
        Response::Error {
            kind: ErrorKind::NotFound,
            ..
        }
    ));
}

#[tokio::test]
async fn wait_elapses_without_a_lock() {
    let harness = Harness::start().await;
    let key = tags(&[("repo", "a")]);
    harness.obtain(&key).await.unwrap();

    let response = harness
        .send(&Request::ObtainLock {
            tags: key,
            timeout: None,
            wait: Some(Duration::from_millis(50)),
        })
        .await;
    assert_eq!(response, Response::Lock { claim: None });
    assert_eq!(harness.lock_count().await, vec![1]);
}

#[tokio::test]
async fn disconnecting_waiter_gives_back_its_reference() {
    let harness = Harness::start().await;
    let key = tags(&[("repo", "a")]);
    harness.obtain(&key).await.unwrap();

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    let body = protocol::encode(&Request::ObtainLock {
        tags: key,
        timeout: None,
        wait: None,
    })
    .unwrap();
    protocol::write_message(&mut stream, &body).await.unwrap();

    harness.wait_for_counts(&[2]).await;
    drop(stream);
    harness.wait_for_counts(&[1]).await;
}

#[tokio::test]
async fn release_wakes_waiting_connection() {
    let harness = Arc::new(Harness::start().await);
    let key = tags(&[("repo", "a")]);
    let first = harness.obtain(&key).await.unwrap();

    let waiter = {
        let harness = Arc::clone(&harness);
        let key = key.clone();
        tokio::spawn(async move { harness.obtain(&key).await })
    };
    harness.wait_for_counts(&[2]).await;

    harness
        .send(&Request::ReleaseLock {
            session_id: first.session_id.clone(),
        })
        .await;
    let second = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_ne!(second.session_id, first.session_id);
    assert_eq!(harness.lock_count().await, vec![1]);

    // The previous holder's session no longer names a lock
    let response = harness
        .send(&Request::ReleaseLock {
            session_id: first.session_id.clone(),
        })
        .await;
    assert!(matches!(
        response,
        Response::Error {
            kind: ErrorKind::NotFound,
            ..
        }
    ));
}

#[tokio::test]
async fn heartbeat_reports_unknown_sessions() {
    let harness = Harness::start().await;
    let claim = harness.obtain(&tags(&[("a", "1")])).await.unwrap();

    let response = harness
        .send(&Request::Heartbeat {
            session_ids: vec![claim.session_id, SessionId::from("missing")],
        })
        .await;
    match response {
        Response::Heartbeat { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].session_id, SessionId::from("missing"));
        }
        other => panic!("Expected Heartbeat, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_tags_are_a_validation_error() {
    let harness = Harness::start().await;
    let response = harness
        .send(&Request::ObtainLock {
            tags: TagSet::new(),
            timeout: None,
            wait: None,
        })
        .await;
    assert!(matches!(
        response,
        Response::Error {
            kind: ErrorKind::Validation,
            ..
        }
    ));
}

#[tokio::test]
async fn garbage_request_is_a_protocol_error() {
    let harness = Harness::start().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    protocol::write_message(&mut stream, b"not json").await.unwrap();
    let bytes = protocol::read_message(&mut stream).await.unwrap();
    let response: Response = protocol::decode(&bytes).unwrap();
    assert!(matches!(
        response,
        Response::Error {
            kind: ErrorKind::Protocol,
            ..
        }
    ));
}

#[tokio::test]
async fn status_counts_locks() {
    let harness = Harness::start().await;
    harness.obtain(&tags(&[("a", "1")])).await.unwrap();
    harness.obtain(&tags(&[("b", "1")])).await.unwrap();

    match harness.send(&Request::Status).await {
        Response::Status {
            locks,
            holders,
            waiters,
            ..
        } => {
            assert_eq!(locks, 2);
            assert_eq!(holders, 2);
            assert_eq!(waiters, 0);
        }
        other => panic!("Expected Status, got {:?}", other),
    }
}

#[tokio::test]
async fn shutdown_request_stops_server_and_unblocks_waiters() {
    let harness = Harness::start().await;
    let key = tags(&[("repo", "a")]);
    harness.obtain(&key).await.unwrap();

    let mut waiting = TcpStream::connect(harness.addr).await.unwrap();
    let body = protocol::encode(&Request::ObtainLock {
        tags: key,
        timeout: None,
        wait: None,
    })
    .unwrap();
    protocol::write_message(&mut waiting, &body).await.unwrap();
    harness.wait_for_counts(&[2]).await;

    assert_eq!(harness.send(&Request::Shutdown).await, Response::ShuttingDown);
    let mut daemon = tokio::time::timeout(Duration::from_secs(5), harness.server)
        .await
        .unwrap()
        .unwrap();
    assert!(harness.context.shutdown.is_cancelled());

    daemon.shutdown().await.unwrap();
    assert!(harness.context.coordinator.is_draining());
    let bytes = tokio::time::timeout(DEFAULT_TIMEOUT, protocol::read_message(&mut waiting))
        .await
        .unwrap()
        .unwrap();
    let response: Response = protocol::decode(&bytes).unwrap();
    assert_eq!(response, Response::Lock { claim: None });
    assert!(!harness.config.lock_path.exists());
}

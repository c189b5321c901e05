// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for daemon client behavior.

use super::{ClientError, DaemonClient, DaemonStatus};
use std::sync::Arc;
use std::time::Duration;
use taglock_core::{Selection, SessionId, TagSet};
use taglock_daemon::lifecycle::{self, Config};
use taglock_daemon::protocol::{ErrorKind, PROTOCOL_VERSION};
use taglock_daemon::server;
use tempfile::TempDir;

/// Start an in-process daemon on an ephemeral port
async fn start_daemon() -> (DaemonClient, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::new(dir.path());
    config.listen_addr = "127.0.0.1:0".parse().unwrap();

    let daemon = lifecycle::startup(&config).await.unwrap();
    let addr = daemon.local_addr().unwrap();
    tokio::spawn(async move {
        let context = Arc::clone(&daemon.context);
        server::serve(&daemon.listener, context).await;
    });
    (DaemonClient::new(addr), dir)
}

fn tags(pairs: &[(&str, &str)]) -> TagSet {
    pairs.iter().copied().collect()
}

#[tokio::test]
async fn refused_connection_means_daemon_not_running() {
    // Reserve a port, then free it so nothing is listening there
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = DaemonClient::new(addr);
    let result = client.ping().await;
    assert!(matches!(result, Err(ClientError::DaemonNotRunning(a)) if a == addr));
}

#[tokio::test]
async fn handshake_and_status() {
    let (client, _dir) = start_daemon().await;
    client.ping().await.unwrap();
    assert_eq!(client.hello().await.unwrap(), PROTOCOL_VERSION);

    let status = client.status().await.unwrap();
    assert_eq!(
        DaemonStatus {
            uptime_secs: 0,
            ..status.clone()
        },
        DaemonStatus {
            uptime_secs: 0,
            locks: 0,
            holders: 0,
            waiters: 0,
        }
    );
}

#[tokio::test]
async fn obtain_heartbeat_release() {
    let (client, _dir) = start_daemon().await;
    let key = tags(&[("repo", "a"), ("branch", "main")]);

    let claim = client
        .obtain(key.clone(), Some(Duration::from_secs(5)), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.timeout, Duration::from_secs(5));

    let failures = client
        .heartbeat(vec![claim.session_id.clone(), SessionId::from("gone")])
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].session_id, SessionId::from("gone"));

    let locks = client.list(None).await.unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].tags, key);
    assert_eq!(locks[0].count, 1);

    client.release(claim.session_id.clone()).await.unwrap();
    assert!(client.list(None).await.unwrap().is_empty());

    let again = client.release(claim.session_id).await;
    assert!(matches!(
        again,
        Err(ClientError::Rejected {
            kind: ErrorKind::NotFound,
            ..
        })
    ));
}

#[tokio::test]
async fn obtain_with_wait_gives_up() {
    let (client, _dir) = start_daemon().await;
    let key = tags(&[("repo", "a")]);
    client.obtain(key.clone(), None, None).await.unwrap().unwrap();

    let second = client
        .obtain(key, None, Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn list_filters_by_selection() {
    let (client, _dir) = start_daemon().await;
    client
        .obtain(tags(&[("repo", "a")]), None, None)
        .await
        .unwrap()
        .unwrap();
    client
        .obtain(tags(&[("env", "prod")]), None, None)
        .await
        .unwrap()
        .unwrap();

    let locks = client
        .list(Some(Selection::new().exists("env")))
        .await
        .unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].tags, tags(&[("env", "prod")]));
}

#[tokio::test]
async fn empty_tags_are_rejected_as_validation() {
    let (client, _dir) = start_daemon().await;
    let result = client.obtain(TagSet::new(), None, None).await;
    assert!(matches!(
        result,
        Err(ClientError::Rejected {
            kind: ErrorKind::Validation,
            ..
        })
    ));
}

#[tokio::test]
async fn shutdown_is_acknowledged() {
    let (client, _dir) = start_daemon().await;
    client.shutdown().await.unwrap();
}

#[test]
fn status_text_lists_counts() {
    let status = DaemonStatus {
        uptime_secs: 90,
        locks: 3,
        holders: 2,
        waiters: 4,
    };
    let text = status.to_string();
    assert!(text.contains("Uptime: 1m 30s"));
    assert!(text.contains("Locks: 3"));
    assert!(text.contains("Waiters: 4"));
}

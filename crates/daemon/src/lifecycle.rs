// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: configuration, startup, shutdown.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use serde::Deserialize;
use taglock_core::{InvalidLockConfig, LockConfig};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::server::ServerContext;

/// Address the daemon listens on unless configured otherwise
pub const DEFAULT_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    7446,
);

/// Optional on-disk configuration (`taglockd.toml`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listen_addr: Option<SocketAddr>,
    pub state_dir: Option<PathBuf>,
    pub locks: LockConfig,
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// TCP address to listen on
    pub listen_addr: SocketAddr,
    /// Directory for pid and log files
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Lock timeout policy
    pub locks: LockConfig,
}

impl Config {
    /// Defaults rooted at `state_dir`
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            listen_addr: DEFAULT_ADDR,
            lock_path: state_dir.join("taglockd.pid"),
            log_path: state_dir.join("taglockd.log"),
            state_dir,
            locks: LockConfig::default(),
        }
    }

    /// Resolve configuration from the environment and an optional TOML file
    ///
    /// The file is `explicit`, else `$TAGLOCK_CONFIG`, else
    /// `<state_dir>/taglockd.toml` when it exists. `$TAGLOCK_ADDR` overrides
    /// the listen address.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let state_dir = state_dir()?;
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("TAGLOCK_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path, state_dir)?,
            None => {
                let default_path = state_dir.join("taglockd.toml");
                if default_path.exists() {
                    Self::from_file(&default_path, state_dir)?
                } else {
                    Self::new(state_dir)
                }
            }
        };

        if let Ok(addr) = std::env::var("TAGLOCK_ADDR") {
            config.listen_addr = addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddr(addr.clone()))?;
        }
        Ok(config)
    }

    /// Read a TOML config file, falling back to `state_dir` for unset paths
    pub fn from_file(path: &Path, state_dir: PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_toml(&text, state_dir)
    }

    pub fn from_toml(text: &str, state_dir: PathBuf) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        file.locks.validate()?;

        let mut config = Self::new(file.state_dir.unwrap_or(state_dir));
        if let Some(addr) = file.listen_addr {
            config.listen_addr = addr;
        }
        config.locks = file.locks;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Locks(#[from] InvalidLockConfig),

    #[error("Invalid listen address: {0}")]
    InvalidAddr(String),
}

/// Get the state directory for taglockd
///
/// `$TAGLOCK_STATE_DIR`, else the platform state dir, else `~/.local/state`.
pub fn state_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("TAGLOCK_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = dirs::state_dir() {
        return Ok(dir.join("taglock"));
    }
    let home = std::env::var("HOME").map_err(|_| ConfigError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/taglock"))
}

/// Daemon state during operation
pub struct DaemonState {
    /// Configuration
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// TCP listener
    pub listener: TcpListener,
    /// Shared with every connection task
    pub context: Arc<ServerContext>,
}

impl DaemonState {
    pub fn local_addr(&self) -> Result<SocketAddr, LifecycleError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shutdown the daemon gracefully
    ///
    /// Parked obtains return without a lock; held locks are dropped with the
    /// process.
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");

        // 1. Drain the coordinator so every parked obtain returns
        self.context.coordinator.shutdown();
        self.context.shutdown.cancel();

        // 2. Remove PID file
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }

        // 3. Lock file is released automatically when self.lock_file is dropped

        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
///
/// A programmatic [`Config`] skips file validation, so its lock timeouts are
/// checked here before the state directory is touched.
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    config.locks.validate().map_err(ConfigError::from)?;
    match startup_inner(config).await {
        Ok(state) => Ok(state),
        Err(e) => {
            // Clean up any resources created before failure
            cleanup_on_failure(config, &e);
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(config: &Config) -> Result<DaemonState, LifecycleError> {
    // 1. Create state directory
    std::fs::create_dir_all(&config.state_dir)?;

    // 2. Acquire lock file FIRST - prevents races
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write PID to lock file
    use std::io::Write;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Bind (LAST - only after all validation passes)
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .map_err(|e| LifecycleError::BindFailed(config.listen_addr, e))?;

    let context = Arc::new(ServerContext::new(config.locks.clone()));

    info!(
        "Daemon started, state in {}",
        config.state_dir.display()
    );

    Ok(DaemonState {
        config: config.clone(),
        lock_file,
        listener,
        context,
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config, error: &LifecycleError) {
    // Another daemon owns the PID file
    if matches!(error, LifecycleError::LockFailed(_)) {
        return;
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

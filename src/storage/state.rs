//! The proxy state record:
//! `{port, url, pid, ecosystem, certPath}`, published at
//! `~/.safe-chain/proxy-state.json` on listen and removed on graceful
//! shutdown. Consumers must validate `pid` liveness before trusting it.

use std::path::Path;

use rama::error::{ErrorContext as _, OpaqueError};
use serde::{Deserialize, Serialize};

const STATE_FILE_NAME: &str = "proxy-state.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyState {
    pub port: u16,
    pub url: String,
    pub pid: u32,
    /// Ecosystems this agent protects; populated from the configured custom
    /// registry configuration plus the fixed npm/pip sets.
    pub ecosystem: Vec<String>,
    #[serde(rename = "certPath")]
    pub cert_path: String,
}

fn state_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join(STATE_FILE_NAME)
}

/// Writes the state record, replacing any prior one.
pub fn write(data_dir: &Path, state: &ProxyState) -> Result<(), OpaqueError> {
    let raw = serde_json::to_vec_pretty(state).context("serialize proxy state record")?;
    crate::storage::write_owner_only_file(&state_path(data_dir), &raw)
}

/// Deletes the state record. Idempotent: a missing file is not an error.
pub fn remove(data_dir: &Path) {
    let path = state_path(data_dir);
    if let Err(err) = std::fs::remove_file(&path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        rama::telemetry::tracing::warn!("failed to remove proxy state record '{}': {err}", path.display());
    }
}

/// Reads the state record, treating a record with a dead `pid` as absent:
/// a stale record left behind by a process that crashed without cleaning
/// up must not be mistaken for a live proxy.
pub fn read(data_dir: &Path) -> Option<ProxyState> {
    let raw = std::fs::read(state_path(data_dir)).ok()?;
    let state: ProxyState = serde_json::from_slice(&raw).ok()?;
    is_pid_alive(state.pid).then_some(state)
}

#[cfg(unix)]
fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        // kill(0, _) targets the caller's whole process group, not a pid.
        return false;
    }
    // SAFETY: signal 0 performs no action other than existence/permission
    // checks; `pid` is a plain integer, no memory is dereferenced.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_pid_alive(_pid: u32) -> bool {
    true
}

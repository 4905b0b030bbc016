//! Error taxonomy for the worker process.
//!
//! Setup-phase errors (`SetupError`) short-circuit to `main` and set the
//! process exit code. Everything else is local to the component that raised
//! it and never unwinds past the event loop — callers log and continue.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal during process setup: bind, privilege drop, or log open.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to open log directory {0}: {1}")]
    LogOpen(PathBuf, #[source] std::io::Error),

    #[error("failed to take ownership of inherited descriptor {0}: {1}")]
    AcceptorBind(i32, #[source] std::io::Error),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("failed to load ticket keys from {0}: {1}")]
    TicketKeyFile(PathBuf, #[source] std::io::Error),

    #[error("configured ticket-key file {0} did not contain a well-formed key")]
    TicketKeyFileMalformed(PathBuf),
}

/// RNG failure while generating a new ticket key (recoverable — the
/// previous set stays published, the next timer tick retries).
#[derive(Debug, Error)]
pub enum KeyGenerationError {
    #[error("failed to read secure random bytes: {0}")]
    Rng(String),
}

/// Outcome of a single remote ticket-key fetch attempt.
#[derive(Debug, Error)]
pub enum KeyFetchError {
    #[error("remote ticket-key response was not usable: {0}")]
    NotFound(String),

    #[error("remote ticket-key fetch failed: {0}")]
    Network(String),
}

/// Errors surfaced while reading the IPC channel.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("transient error reading IPC channel: {0}")]
    Read(#[source] std::io::Error),

    #[error("IPC channel closed by parent")]
    Closed,
}

/// Errors from the privilege-drop sequence (§4.7). Any failure here is
/// unrecoverable — the caller aborts rather than continues half-dropped.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("initgroups({user}, {gid}) failed: {source}")]
    InitGroups {
        user: String,
        gid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("setgid({0}) failed: {1}")]
    SetGid(u32, #[source] nix::Error),

    #[error("setuid({0}) failed: {1}")]
    SetUid(u32, #[source] nix::Error),

    #[error("setuid(0) unexpectedly succeeded after dropping privileges")]
    DropNotEffective,
}

/// Top-level error returned by `WorkerProcess::build`/`run`, propagated out
/// of `main` as `anyhow::Error` to set the process exit code.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("{0}")]
    Other(String),
}

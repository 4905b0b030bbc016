//! Inherited listening descriptors (C5).
//!
//! Owns up to two descriptors (v4, v6) inherited from the parent
//! supervisor. `disable()` removes both from the readiness set without
//! closing them; closing is deferred to process exit. Once disabled, an
//! `AcceptorSet` exposes no way to re-enable — invariant 4 ("once
//! `LifecycleState` leaves `Running`, acceptors never become `enabled=true`
//! again") holds by construction rather than by runtime check.

use std::net::SocketAddr;
use std::os::fd::{FromRawFd, RawFd};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

/// Per-descriptor bookkeeping, kept separate from the live `TcpListener`
/// so the enable/disable state machine is testable without a real socket.
#[derive(Debug, Clone, Copy)]
pub struct AcceptorState {
    pub fd: RawFd,
    pub enabled: bool,
}

impl AcceptorState {
    fn new(fd: RawFd) -> Self {
        Self { fd, enabled: true }
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}

struct Acceptor {
    state: AcceptorState,
    listener: TcpListener,
}

/// Which inherited descriptor a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorKind {
    V4,
    V6,
}

pub struct AcceptorSet {
    v4: Option<Acceptor>,
    v6: Option<Acceptor>,
}

impl AcceptorSet {
    /// Takes ownership of the inherited descriptors. Per §9's resolved
    /// open question, both `server_fd` and `server_fd6` use `-1` as the
    /// "absent" sentinel.
    pub fn from_inherited(server_fd: RawFd, server_fd6: RawFd) -> std::io::Result<Self> {
        Ok(Self {
            v4: acceptor_from_fd(server_fd)?,
            v6: acceptor_from_fd(server_fd6)?,
        })
    }

    pub fn disable(&mut self) {
        if let Some(a) = &mut self.v4 {
            a.state.disable();
        }
        if let Some(a) = &mut self.v6 {
            a.state.disable();
        }
    }

    /// Accepts the next connection on whichever enabled descriptor becomes
    /// ready first. If no descriptor is enabled, never resolves — callers
    /// race this against other event-loop branches in a `select!`.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr, AcceptorKind)> {
        let v4_enabled = self.v4.as_ref().is_some_and(|a| a.state.enabled);
        let v6_enabled = self.v6.as_ref().is_some_and(|a| a.state.enabled);

        tokio::select! {
            res = accept_if(self.v4.as_ref(), v4_enabled) => {
                let (stream, addr) = res?;
                Ok((stream, addr, AcceptorKind::V4))
            }
            res = accept_if(self.v6.as_ref(), v6_enabled) => {
                let (stream, addr) = res?;
                Ok((stream, addr, AcceptorKind::V6))
            }
        }
    }

    /// One final non-blocking accept burst on every descriptor (enabled or
    /// not) until the kernel reports no pending connection — run once,
    /// right after `disable()`, so already-queued clients aren't silently
    /// dropped on the floor.
    pub async fn drain_backlog(&self) {
        if let Some(a) = &self.v4 {
            drain_one(&a.listener, AcceptorKind::V4).await;
        }
        if let Some(a) = &self.v6 {
            drain_one(&a.listener, AcceptorKind::V6).await;
        }
    }
}

async fn accept_if(
    acceptor: Option<&Acceptor>,
    enabled: bool,
) -> std::io::Result<(TcpStream, SocketAddr)> {
    match acceptor {
        Some(a) if enabled => a.listener.accept().await,
        _ => std::future::pending().await,
    }
}

async fn drain_one(listener: &TcpListener, kind: AcceptorKind) {
    loop {
        match tokio::time::timeout(Duration::ZERO, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                drop(stream);
                log::debug!("drained pending {kind:?} connection from {addr} during shutdown");
            }
            _ => break,
        }
    }
}

fn acceptor_from_fd(fd: RawFd) -> std::io::Result<Option<Acceptor>> {
    if fd < 0 {
        return Ok(None);
    }
    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    std_listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(std_listener)?;
    Ok(Some(Acceptor {
        state: AcceptorState::new(fd),
        listener,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_is_permanent_and_offers_no_reverse_operation() {
        let mut state = AcceptorState::new(3);
        assert!(state.enabled);
        state.disable();
        assert!(!state.enabled);
        // `AcceptorState` has no `enable()` method: invariant 4 is
        // structural rather than something a caller could violate.
    }

    #[test]
    fn negative_fd_means_absent_uniformly_for_both_descriptors() {
        let set = AcceptorSet::from_inherited(-1, -1).expect("no descriptors to bind");
        assert!(set.v4.is_none());
        assert!(set.v6.is_none());
    }
}

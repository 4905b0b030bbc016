//! Central lifecycle state machine (C8).
//!
//! Drives the graceful-shutdown and log-reopen transitions described in
//! §4.8. The control loop in `process.rs` owns one `LifecycleController`
//! and feeds it events from the IPC channel; this module only holds the
//! state and decides what to do, it never touches a descriptor directly.

use crate::acceptor::AcceptorSet;
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Terminated,
}

pub struct LifecycleController {
    state: LifecycleState,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self { state: LifecycleState::Running }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == LifecycleState::Terminated
    }

    /// `Running -> Draining` (or a no-op if already draining/terminated).
    /// Disables the acceptors first, drains whatever already queued in
    /// the kernel backlog, then tells every worker to drain in turn. If
    /// there's nothing in flight, transitions straight to `Terminated`
    /// (S1); otherwise stays `Draining` until a later idle check (S2).
    pub async fn on_graceful(&mut self, acceptors: &mut AcceptorSet, workers: &WorkerPool) {
        if self.state != LifecycleState::Running {
            return; // idempotent: Draining/Terminated ignore a repeat request
        }

        acceptors.disable();
        acceptors.drain_backlog().await;
        // Single-worker mode: resolves immediately (nothing to message).
        // Multi-worker mode: blocks until every worker thread has
        // actually exited, so the idle check right after is never
        // premature.
        workers.graceful_shutdown_all().await;
        self.state = LifecycleState::Draining;
        self.check_workers_idle(workers);
    }

    /// Valid in both `Running` and `Draining`; a no-op once `Terminated`
    /// since there's no log sink left to redirect into.
    pub fn should_reopen_log(&self) -> bool {
        self.state != LifecycleState::Terminated
    }

    /// `* -> Terminated`, unconditionally and immediately: the parent's
    /// write end of the IPC channel closing is fatal regardless of state.
    pub fn on_ipc_closed(&mut self) {
        self.state = LifecycleState::Terminated;
    }

    /// `Draining -> Terminated` once every worker reports zero in-flight
    /// connections. No-op outside `Draining`.
    pub fn check_workers_idle(&mut self, workers: &WorkerPool) {
        if self.state == LifecycleState::Draining && workers.aggregate_num_connections() == 0 {
            self.state = LifecycleState::Terminated;
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::key::{Cipher, TicketKey, TicketKeySet};
    use std::sync::Arc;

    fn empty_pool() -> WorkerPool {
        let key = TicketKey::new([0; 16], vec![0; 16], [0; 32], Cipher::Aes128Cbc);
        WorkerPool::new(1, Arc::new(TicketKeySet::new(vec![key]).unwrap()))
    }

    fn no_descriptors() -> AcceptorSet {
        AcceptorSet::from_inherited(-1, -1).unwrap()
    }

    #[tokio::test]
    async fn s1_quiet_shutdown_terminates_immediately() {
        let mut lifecycle = LifecycleController::new();
        let mut acceptors = no_descriptors();
        let workers = empty_pool();

        lifecycle.on_graceful(&mut acceptors, &workers).await;

        assert!(lifecycle.is_terminated());
    }

    #[tokio::test]
    async fn s2_pending_connection_stays_draining_until_released() {
        let mut lifecycle = LifecycleController::new();
        let mut acceptors = no_descriptors();
        let workers = empty_pool();

        // Simulate one active connection before shutdown is requested.
        if let WorkerPool::Single { shared } = &workers {
            shared_num_connections_store(shared, 1);
        }

        lifecycle.on_graceful(&mut acceptors, &workers).await;
        assert_eq!(lifecycle.state(), LifecycleState::Draining);

        // Connection released; next idle check breaks the loop.
        if let WorkerPool::Single { shared } = &workers {
            shared_num_connections_store(shared, 0);
        }
        lifecycle.check_workers_idle(&workers);
        assert!(lifecycle.is_terminated());
    }

    #[test]
    fn on_graceful_is_idempotent_while_draining() {
        let mut lifecycle = LifecycleController::new();
        lifecycle.state = LifecycleState::Draining;
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
    }

    #[test]
    fn ipc_closed_terminates_from_any_state() {
        let mut lifecycle = LifecycleController::new();
        lifecycle.on_ipc_closed();
        assert!(lifecycle.is_terminated());

        let mut lifecycle = LifecycleController::new();
        lifecycle.state = LifecycleState::Draining;
        lifecycle.on_ipc_closed();
        assert!(lifecycle.is_terminated());
    }

    #[test]
    fn reopen_log_is_valid_until_terminated() {
        let mut lifecycle = LifecycleController::new();
        assert!(lifecycle.should_reopen_log());
        lifecycle.state = LifecycleState::Draining;
        assert!(lifecycle.should_reopen_log());
        lifecycle.state = LifecycleState::Terminated;
        assert!(!lifecycle.should_reopen_log());
    }

    // Test-only helper: pokes the private connection counter directly to
    // set up S1/S2 without standing up a real socket.
    fn shared_num_connections_store(shared: &std::sync::Arc<crate::worker_pool::WorkerShared>, n: u64) {
        shared.set_num_connections_for_test(n);
    }
}

//! Worker fan-out (C6).
//!
//! Single-worker mode: the control loop itself is the one worker, and
//! connections are handled in-process. Multi-worker mode: N OS threads,
//! each running its own Tokio runtime, receive hand-offs over a channel.
//!
//! Per-connection HTTP/2 framing is out of scope here (§1); a handed-off
//! connection is tracked (counted in, counted out on close) but not
//! actually served — that's the boundary this core exposes to the rest
//! of the proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::acceptor::AcceptorKind;
use crate::ticket::TicketKeySet;

/// Lock-free publication point for the current ticket-key set. The lock
/// only ever guards a pointer swap, never I/O — readers clone the `Arc`
/// and release immediately, satisfying §5's "no lock held across I/O".
pub struct TicketKeySlot(std::sync::Mutex<Arc<TicketKeySet>>);

impl TicketKeySlot {
    pub fn new(initial: Arc<TicketKeySet>) -> Self {
        Self(std::sync::Mutex::new(initial))
    }

    pub fn publish(&self, set: Arc<TicketKeySet>) {
        *self.0.lock().expect("ticket-key slot mutex poisoned") = set;
    }

    pub fn current(&self) -> Arc<TicketKeySet> {
        self.0.lock().expect("ticket-key slot mutex poisoned").clone()
    }
}

pub(crate) struct WorkerShared {
    ticket_keys: TicketKeySlot,
    num_connections: AtomicU64,
    /// Notified every time `num_connections` changes, so the control
    /// loop can re-check `workers_idle()` in single-worker mode (S2)
    /// without polling.
    idle_notify: tokio::sync::Notify,
    /// Set by a worker thread right before it exits (multi-worker mode),
    /// so `graceful_shutdown_all` can wait for real thread completion
    /// without consuming the `JoinHandle` that `join_all` still needs.
    exited: std::sync::atomic::AtomicBool,
    exited_notify: tokio::sync::Notify,
}

impl WorkerShared {
    /// Test-only seam: pokes the connection counter directly so
    /// lifecycle scenarios (S1/S2) can be set up without a real socket.
    #[cfg(test)]
    pub(crate) fn set_num_connections_for_test(&self, n: u64) {
        self.num_connections.store(n, Ordering::Release);
    }
}

enum WorkerMessage {
    Connection(TcpStream, std::net::SocketAddr, AcceptorKind),
    Drain,
}

struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    shared: Arc<WorkerShared>,
    join: std::thread::JoinHandle<()>,
}

pub enum WorkerPool {
    Single {
        shared: Arc<WorkerShared>,
    },
    Multi {
        workers: Vec<WorkerHandle>,
        next: std::cell::Cell<usize>,
    },
}

impl WorkerPool {
    /// Builds the pool for `num_worker` workers (≥1), seeded with the
    /// initial ticket-key set.
    pub fn new(num_worker: usize, initial_keys: Arc<TicketKeySet>) -> Self {
        assert!(num_worker >= 1, "num_worker must be at least 1");

        if num_worker == 1 {
            return WorkerPool::Single {
                shared: Arc::new(WorkerShared {
                    ticket_keys: TicketKeySlot::new(initial_keys),
                    num_connections: AtomicU64::new(0),
                    idle_notify: tokio::sync::Notify::new(),
                    exited: std::sync::atomic::AtomicBool::new(false),
                    exited_notify: tokio::sync::Notify::new(),
                }),
            };
        }

        let mut workers = Vec::with_capacity(num_worker);
        for id in 0..num_worker {
            let shared = Arc::new(WorkerShared {
                ticket_keys: TicketKeySlot::new(initial_keys.clone()),
                num_connections: AtomicU64::new(0),
                idle_notify: tokio::sync::Notify::new(),
                exited: std::sync::atomic::AtomicBool::new(false),
                exited_notify: tokio::sync::Notify::new(),
            });
            let (tx, rx) = mpsc::unbounded_channel();
            let worker_shared = shared.clone();
            let join = std::thread::Builder::new()
                .name(format!("proxy-worker-{id}"))
                .spawn(move || run_worker_thread(id, rx, worker_shared))
                .expect("failed to spawn worker thread");
            workers.push(WorkerHandle { tx, shared, join });
        }

        WorkerPool::Multi {
            workers,
            next: std::cell::Cell::new(0),
        }
    }

    /// Hands an accepted connection off to the worker that should own it.
    pub fn dispatch(&self, stream: TcpStream, addr: std::net::SocketAddr, kind: AcceptorKind) {
        match self {
            WorkerPool::Single { shared } => {
                shared.num_connections.fetch_add(1, Ordering::AcqRel);
                let shared = shared.clone();
                tokio::spawn(async move {
                    serve_connection(stream, addr, kind, shared).await;
                });
            }
            WorkerPool::Multi { workers, next } => {
                let idx = next.get();
                next.set((idx + 1) % workers.len());
                let worker = &workers[idx];
                if worker.tx.send(WorkerMessage::Connection(stream, addr, kind)).is_err() {
                    log::warn!("worker {idx} hand-off channel closed, dropping connection from {addr}");
                }
            }
        }
    }

    /// Atomically swaps every worker's ticket-key reference. The next
    /// TLS handshake on each worker observes the new set (invariant 3).
    pub fn publish_ticket_keys(&self, set: Arc<TicketKeySet>) {
        match self {
            WorkerPool::Single { shared } => shared.ticket_keys.publish(set),
            WorkerPool::Multi { workers, .. } => {
                for w in workers {
                    w.shared.ticket_keys.publish(set.clone());
                }
            }
        }
    }

    /// Tells every worker to stop accepting new streams on existing
    /// connections and exit once idle. Single-worker mode has nothing to
    /// message — the control loop already stopped calling `accept()` via
    /// `AcceptorSet::disable()` — and resolves immediately; multi-worker
    /// mode resolves once every worker thread has actually exited, per
    /// §4.8's "C6 joins internally" note, without consuming the
    /// `JoinHandle`s that `join_all` still needs afterwards.
    pub async fn graceful_shutdown_all(&self) {
        if let WorkerPool::Multi { workers, .. } = self {
            for w in workers {
                let _ = w.tx.send(WorkerMessage::Drain);
            }
            for w in workers {
                while !w.shared.exited.load(Ordering::Acquire) {
                    w.shared.exited_notify.notified().await;
                }
            }
        }
    }

    /// Resolves whenever a single-worker-mode connection count may have
    /// changed, so the control loop can re-check `workers_idle()` (S2)
    /// without polling. Multi-worker idle detection happens inside
    /// `graceful_shutdown_all` instead, so this never resolves there.
    pub async fn idle_changed(&self) {
        match self {
            WorkerPool::Single { shared } => shared.idle_notify.notified().await,
            WorkerPool::Multi { .. } => std::future::pending().await,
        }
    }

    /// Blocks until every worker thread has returned. No-op in
    /// single-worker mode, since the control loop *is* the worker.
    pub fn join_all(self) {
        if let WorkerPool::Multi { workers, .. } = self {
            for w in workers {
                if let Err(e) = w.join.join() {
                    log::warn!("worker thread panicked: {e:?}");
                }
            }
        }
    }

    /// Sum of in-flight connections across every worker.
    pub fn aggregate_num_connections(&self) -> u64 {
        match self {
            WorkerPool::Single { shared } => shared.num_connections.load(Ordering::Acquire),
            WorkerPool::Multi { workers, .. } => workers
                .iter()
                .map(|w| w.shared.num_connections.load(Ordering::Acquire))
                .sum(),
        }
    }
}

fn run_worker_thread(id: usize, mut rx: mpsc::UnboundedReceiver<WorkerMessage>, shared: Arc<WorkerShared>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build worker runtime");

    runtime.block_on(async move {
        let mut draining = false;
        loop {
            if draining && shared.num_connections.load(Ordering::Acquire) == 0 {
                break;
            }

            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(WorkerMessage::Connection(stream, addr, kind)) => {
                            shared.num_connections.fetch_add(1, Ordering::AcqRel);
                            let shared = shared.clone();
                            tokio::spawn(async move {
                                serve_connection(stream, addr, kind, shared).await;
                            });
                        }
                        Some(WorkerMessage::Drain) => {
                            draining = true;
                        }
                        None => break,
                    }
                }
                _ = shared.idle_notify.notified(), if draining => {}
            }
        }
    });

    shared.exited.store(true, Ordering::Release);
    // `notify_one` (not `notify_waiters`) stores a permit if nobody is
    // waiting yet, so `graceful_shutdown_all`'s check-then-wait loop
    // below can't miss this regardless of ordering.
    shared.exited_notify.notify_one();
    log::debug!("worker {id} exiting");
}

/// Tracks one handed-off connection for the lifetime of the socket. Real
/// HTTP/2 framing lives outside this core; this just upholds the
/// connection-counting contract that `graceful_shutdown_all` and
/// `aggregate_num_connections` depend on.
async fn serve_connection(
    mut stream: TcpStream,
    addr: std::net::SocketAddr,
    kind: AcceptorKind,
    shared: Arc<WorkerShared>,
) {
    let ticket_keys = shared.ticket_keys.current();
    log::trace!(
        "accepted {kind:?} connection from {addr}, current ticket-key generation has {} key(s)",
        ticket_keys.len()
    );

    use tokio::io::AsyncReadExt;
    let mut discard = [0u8; 1024];
    loop {
        match stream.read(&mut discard).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }

    shared.num_connections.fetch_sub(1, Ordering::AcqRel);
    shared.idle_notify.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::key::{Cipher, TicketKey};

    fn dummy_set() -> Arc<TicketKeySet> {
        let key = TicketKey::new([0; 16], vec![0; 16], [0; 32], Cipher::Aes128Cbc);
        Arc::new(TicketKeySet::new(vec![key]).unwrap())
    }

    #[test]
    fn single_worker_mode_starts_with_zero_connections() {
        let pool = WorkerPool::new(1, dummy_set());
        assert_eq!(pool.aggregate_num_connections(), 0);
    }

    #[test]
    fn publish_ticket_keys_is_visible_through_the_slot() {
        let slot = TicketKeySlot::new(dummy_set());
        let new_key = TicketKey::new([9; 16], vec![9; 16], [9; 32], Cipher::Aes128Cbc);
        let new_set = Arc::new(TicketKeySet::new(vec![new_key]).unwrap());
        slot.publish(new_set.clone());
        assert_eq!(slot.current().active().name, [9; 16]);
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn new_rejects_zero_workers() {
        let _ = WorkerPool::new(0, dummy_set());
    }

    #[tokio::test]
    async fn multi_worker_graceful_shutdown_resolves_once_threads_exit() {
        let pool = WorkerPool::new(2, dummy_set());
        pool.graceful_shutdown_all().await;
        assert_eq!(pool.aggregate_num_connections(), 0);
        pool.join_all();
    }

    #[tokio::test]
    async fn single_worker_idle_changed_resolves_after_a_connection_closes() {
        let pool = WorkerPool::new(1, dummy_set());
        if let WorkerPool::Single { shared } = &pool {
            shared.num_connections.fetch_add(1, Ordering::AcqRel);
            let shared = shared.clone();
            tokio::spawn(async move {
                shared.num_connections.fetch_sub(1, Ordering::AcqRel);
                shared.idle_notify.notify_one();
            });
        }
        pool.idle_changed().await;
        assert_eq!(pool.aggregate_num_connections(), 0);
    }
}

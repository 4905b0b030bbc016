//! Top-level orchestrator (C9).
//!
//! Constructs every other component, drops privileges, runs the
//! single-threaded control loop that multiplexes the acceptors, the IPC
//! channel and the ticket-key timer, and joins the worker threads on
//! exit.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use crate::acceptor::AcceptorSet;
use crate::config::{Args, WorkerProcessConfig};
use crate::error::{SetupError, WorkerError};
use crate::ipc::{IpcChannel, LifecycleEvent};
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::logger;
use crate::privilege;
use crate::ticket::key::{Cipher, TicketKey, TicketKeySet};
use crate::ticket::remote_fetch::{KeyCacheClient, RemoteKeyFetcher};
use crate::ticket::rotator::TicketKeyRotator;
use crate::worker_pool::WorkerPool;

const ROTATION_INTERVAL: Duration = Duration::from_secs(3600);
/// Cadence at which C4 re-issues its logical GET once a fetch succeeds;
/// the dispatcher's own request timeout, if any, surfaces as a
/// `KeyFetchError::Network` rather than being modeled at this layer.
const REMOTE_FETCH_INTERVAL: Duration = Duration::from_secs(600);

/// Where the current worker gets new ticket-key sets from. At most one
/// of these is active per process, per §4.3 ("mutually exclusive with
/// C3") and §6 ("file-based ticket keys... bypasses C3 entirely").
enum TicketKeySource {
    /// Loaded once at startup; never rotates.
    Static,
    Rotor(TicketKeyRotator),
    Remote(RemoteKeyFetcher),
}

pub struct WorkerProcess {
    acceptors: AcceptorSet,
    ipc: IpcChannel,
    workers: WorkerPool,
    lifecycle: LifecycleController,
    ticket_source: TicketKeySource,
}

impl WorkerProcess {
    /// Builds every component from `args`/`inherited`. Performs the
    /// file-based ticket-key load (if configured) and the privilege drop
    /// before returning, per invariant 5 ("privileges are dropped...
    /// before the IPC reader is armed").
    pub async fn build(
        args: &Args,
        inherited: WorkerProcessConfig,
        cache_client: Option<Box<dyn KeyCacheClient>>,
    ) -> Result<Self, WorkerError> {
        logger::setup_logging(&args.log_dir, &args.log_level)?;
        ignore_parent_signals();

        let cipher: Cipher = args
            .cipher()
            .map_err(|e| WorkerError::Other(format!("invalid tls_ticket_key_cipher: {e}")))?;

        let acceptors = AcceptorSet::from_inherited(inherited.server_fd, inherited.server_fd6)
            .map_err(|e| SetupError::AcceptorBind(inherited.server_fd, e))?;

        let (initial_keys, ticket_source) = if !args.tls_ticket_key_files.is_empty() {
            let keys = load_ticket_key_files(&args.tls_ticket_key_files, cipher)?;
            (Arc::new(keys), TicketKeySource::Static)
        } else if let Some(_host) = &args.tls_ticket_key_memcached_host {
            let client = cache_client.ok_or_else(|| {
                WorkerError::Other("tls_ticket_key_memcached_host set but no cache client supplied".into())
            })?;
            let fetcher = RemoteKeyFetcher::new(client, cipher);
            let initial = match fetcher.fetch_once().await {
                Ok(set) => set,
                Err(e) => {
                    log::warn!("initial remote ticket-key fetch failed, generating locally: {e}");
                    TicketKeyRotator::new(cipher, args.tls_session_timeout())
                        .tick()
                        .expect("local generation only fails on RNG exhaustion")
                }
            };
            (Arc::new(initial), TicketKeySource::Remote(fetcher))
        } else {
            let mut rotor = TicketKeyRotator::new(cipher, args.tls_session_timeout());
            let initial = rotor.tick().expect("startup tick only fails on RNG exhaustion");
            (Arc::new(initial), TicketKeySource::Rotor(rotor))
        };

        privilege::drop_privileges(args.uid, args.gid, &args.user)?;

        let ipc = IpcChannel::from_inherited(inherited.ipc_fd)
            .map_err(|e| SetupError::AcceptorBind(inherited.ipc_fd, e))?;
        let workers = WorkerPool::new(args.num_worker.max(1), initial_keys);

        Ok(Self {
            acceptors,
            ipc,
            workers,
            lifecycle: LifecycleController::new(),
            ticket_source,
        })
    }

    /// Runs the control loop until `LifecycleController` reaches
    /// `Terminated`, then joins every worker thread. `Ok(())` is a clean
    /// termination (exit code `0`); setup errors are surfaced earlier, by
    /// `build()`.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        let timer_enabled = !matches!(self.ticket_source, TicketKeySource::Static);
        let mut rotation_timer = interval(match &self.ticket_source {
            TicketKeySource::Rotor(_) => ROTATION_INTERVAL,
            TicketKeySource::Remote(_) => REMOTE_FETCH_INTERVAL,
            TicketKeySource::Static => ROTATION_INTERVAL, // never polled; see `timer_enabled` guard below
        });
        rotation_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // `build()` already ran the synchronous startup tick (rotor) or
        // initial fetch (remote fetcher); without this the first
        // `.tick()` below would fire again immediately, since `interval()`
        // treats its first tick as already elapsed.
        rotation_timer.reset();

        loop {
            if self.lifecycle.is_terminated() {
                break;
            }

            tokio::select! {
                accepted = self.acceptors.accept(), if self.lifecycle.state() == LifecycleState::Running => {
                    match accepted {
                        Ok((stream, addr, kind)) => self.workers.dispatch(stream, addr, kind),
                        Err(e) => log::warn!("accept failed: {e}"),
                    }
                }
                events = self.ipc.read_events() => {
                    match events {
                        Ok(events) => self.handle_ipc_events(events).await,
                        Err(_closed) => {
                            log::error!("IPC channel closed by parent, terminating");
                            self.lifecycle.on_ipc_closed();
                        }
                    }
                }
                _ = rotation_timer.tick(), if timer_enabled => {
                    self.tick_ticket_source().await;
                }
                _ = self.workers.idle_changed(), if self.lifecycle.state() == LifecycleState::Draining => {
                    self.lifecycle.check_workers_idle(&self.workers);
                }
            }
        }

        self.workers.join_all();
        Ok(())
    }

    async fn handle_ipc_events(&mut self, events: Vec<LifecycleEvent>) {
        for event in events {
            match event {
                LifecycleEvent::GracefulShutdown => {
                    self.lifecycle.on_graceful(&mut self.acceptors, &self.workers).await;
                }
                LifecycleEvent::ReopenLog => {
                    if self.lifecycle.should_reopen_log() {
                        if let Err(e) = logger::reopen() {
                            log::warn!("log reopen failed: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn tick_ticket_source(&mut self) {
        match &mut self.ticket_source {
            TicketKeySource::Static => {}
            TicketKeySource::Rotor(rotor) => {
                if let Some(set) = rotor.tick() {
                    self.workers.publish_ticket_keys(Arc::new(set));
                }
            }
            TicketKeySource::Remote(fetcher) => match fetcher.fetch_once().await {
                Ok(set) => self.workers.publish_ticket_keys(Arc::new(set)),
                Err(e) => log::warn!("remote ticket-key fetch did not update state: {e}"),
            },
        }
    }
}

/// Loads a fixed ticket-key set from `paths`, in order (position 0 =
/// first file). Each file is expected to hold exactly one
/// `cipher.blob_len()`-byte key blob in the same `{name, enc_key,
/// hmac_key}` layout as the remote-fetch wire format (§4.3), without the
/// `len` prefix since the file boundary already delimits one key.
fn load_ticket_key_files(paths: &[std::path::PathBuf], cipher: Cipher) -> Result<TicketKeySet, SetupError> {
    let mut keys = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = fs::read(path).map_err(|e| SetupError::TicketKeyFile(path.clone(), e))?;
        if bytes.len() != cipher.blob_len() {
            return Err(SetupError::TicketKeyFileMalformed(path.clone()));
        }
        keys.push(TicketKey::from_blob(&bytes, cipher));
    }
    TicketKeySet::new(keys).ok_or_else(|| SetupError::TicketKeyFileMalformed(paths[0].clone()))
}

/// Signal policy (§4.9): the lifecycle signals the parent uses internally
/// are set to ignore inside the worker, so a broadcast `kill` doesn't
/// race the IPC channel. Best-effort — a failure here is logged, not
/// fatal, since the IPC channel remains the authoritative path either way.
fn ignore_parent_signals() {
    use nix::sys::signal::{self, SigHandler, Signal};

    for sig in [Signal::SIGTERM, Signal::SIGUSR1, Signal::SIGUSR2] {
        // SAFETY: SigIgn is async-signal-safe and installed before any
        // other thread is spawned.
        if let Err(e) = unsafe { signal::signal(sig, SigHandler::SigIgn) } {
            log::warn!("failed to ignore {sig:?} in worker process: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::key::{Cipher, HMAC_KEY_LEN, NAME_LEN};

    #[test]
    fn load_ticket_key_files_reads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = Cipher::Aes128Cbc;

        let key_a = TicketKey::new([1; NAME_LEN], vec![1; cipher.enc_key_len()], [1; HMAC_KEY_LEN], cipher);
        let key_b = TicketKey::new([2; NAME_LEN], vec![2; cipher.enc_key_len()], [2; HMAC_KEY_LEN], cipher);

        let path_a = dir.path().join("a.key");
        let path_b = dir.path().join("b.key");
        fs::write(&path_a, key_a.to_blob()).unwrap();
        fs::write(&path_b, key_b.to_blob()).unwrap();

        let set = load_ticket_key_files(&[path_a, path_b], cipher).unwrap();
        assert_eq!(set.active().name, [1; NAME_LEN]);
        assert_eq!(set.keys()[1].name, [2; NAME_LEN]);
    }

    #[test]
    fn load_ticket_key_files_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        fs::write(&path, b"too short").unwrap();

        let err = load_ticket_key_files(&[path], Cipher::Aes128Cbc).unwrap_err();
        assert!(matches!(err, SetupError::TicketKeyFileMalformed(_)));
    }
}

//! Worker-process binary: the event-loop host a parent reverse-proxy
//! supervisor forks one or more of after binding its listening sockets.
//!
//! See `process::WorkerProcess` for the actual control loop; this file is
//! only argument parsing and logging/crypto-provider bootstrap, in the
//! style of `servers/src/server_yahoo.rs` — any setup or control-loop
//! error propagates out of `main` as `anyhow::Error` and exits non-zero.

mod acceptor;
mod config;
mod error;
mod ipc;
mod lifecycle;
mod logger;
mod privilege;
mod process;
mod ticket;
mod worker_pool;

use anyhow::Result;

use config::WorkerProcessConfig;
use process::WorkerProcess;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Installed once, process-wide, before any TLS handshake can occur.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = config::load_config();
    let inherited = WorkerProcessConfig::from_env(&args);

    let cache_client = args.tls_ticket_key_memcached_host.as_ref().map(|host| {
        Box::new(RedisCacheClient::new(host.clone())) as Box<dyn ticket::remote_fetch::KeyCacheClient>
    });

    let worker = WorkerProcess::build(&args, inherited, cache_client).await?;
    log_startup_banner();
    worker.run().await?;
    Ok(())
}

/// Logs a one-line process-introspection banner right after setup
/// completes (logging is armed by `WorkerProcess::build` by this point).
/// Best-effort: a sandboxed or IP-less environment shouldn't stop the
/// worker from serving, so failures here are logged at `warn` and
/// swallowed rather than propagated.
fn log_startup_banner() {
    match lib_common::get_process_info() {
        Ok(info) => log::info!("worker starting: {info}"),
        Err(e) => log::warn!("process introspection unavailable: {e}"),
    }
}

/// Lazily-connecting `KeyCacheClient` over Redis, so a misconfigured or
/// momentarily-unreachable cache host surfaces as a per-tick
/// `KeyFetchError::Network` rather than a startup failure (§4.3's network
/// error is explicitly recoverable; only setup-phase errors are fatal).
struct RedisCacheClient {
    host: String,
    conn: tokio::sync::Mutex<Option<lib_common::CacheHandler>>,
}

impl RedisCacheClient {
    fn new(host: String) -> Self {
        Self {
            host,
            conn: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl ticket::remote_fetch::KeyCacheClient for RedisCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, error::KeyFetchError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let url = format!("redis://{}/", self.host);
            let handler = lib_common::CacheHandler::new(&url)
                .await
                .map_err(|e| error::KeyFetchError::Network(e.to_string()))?;
            *guard = Some(handler);
        }
        let result = guard
            .as_ref()
            .expect("just initialized above")
            .get_bytes(key)
            .await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                // Drop the connection so the next tick reconnects instead
                // of retrying a handler that may be in a broken state.
                *guard = None;
                Err(error::KeyFetchError::Network(e.to_string()))
            }
        }
    }
}

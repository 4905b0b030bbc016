//! Async Redis cache client.
//!
//! Backs the worker's remote ticket-key fetch: a thin wrapper around a
//! multiplexed `redis` connection, since the control loop never wants to
//! block on I/O while holding the current ticket-key set.

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};

/// Async handle to a Redis server, reused across requests via a multiplexed
/// connection rather than opening a new TCP connection per call.
pub struct CacheHandler {
    client: Client,
    conn: MultiplexedConnection,
}

impl CacheHandler {
    /// Opens a connection to `url` (e.g. `redis://127.0.0.1/`).
    pub async fn new(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    /// Fetches the raw bytes stored under `key`, or `None` if absent.
    pub async fn get_bytes(&self, key: &str) -> RedisResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(key).await
    }

    /// Stores `value` under `key`.
    pub async fn set_bytes(&self, key: &str, value: &[u8]) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.set(key, value).await
    }

    /// Re-establishes the multiplexed connection, for use after a fetch
    /// returns a connection-level error.
    pub async fn reconnect(&mut self) -> RedisResult<()> {
        self.conn = self.client.get_multiplexed_async_connection().await?;
        Ok(())
    }
}

//! Remote ticket-key retrieval (C4), mutually exclusive with C3.
//!
//! On each timer tick, issues a logical GET against a key/value cache and
//! parses the response per the bit-exact wire format of §4.3:
//!
//! ```text
//! version: u32
//! repeated { len: u16; key_blob: len bytes }
//! ```

use async_trait::async_trait;
use bytes::Buf;

use crate::error::KeyFetchError;
use crate::ticket::key::{Cipher, TicketKey, TicketKeySet};

/// The logical cache key the worker fetches, stable across parent/worker.
pub const TICKET_KEY_CACHE_KEY: &str = "nghttpx:tls-ticket-key";

const SUPPORTED_VERSION: u32 = 1;

/// Abstraction over the remote key/value cache, so the fetch/parse logic
/// is testable without a running cache server.
#[async_trait]
pub trait KeyCacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyFetchError>;
}

pub struct RemoteKeyFetcher {
    client: Box<dyn KeyCacheClient>,
    cipher: Cipher,
}

impl RemoteKeyFetcher {
    pub fn new(client: Box<dyn KeyCacheClient>, cipher: Cipher) -> Self {
        Self { client, cipher }
    }

    /// Issues one fetch and parses the result. A structural parse failure
    /// and an absent key are both reported as `KeyFetchError::NotFound` —
    /// current ticket-key state is left untouched by the caller either way.
    pub async fn fetch_once(&self) -> Result<TicketKeySet, KeyFetchError> {
        let payload = self
            .client
            .get(TICKET_KEY_CACHE_KEY)
            .await?
            .ok_or_else(|| KeyFetchError::NotFound("cache miss".into()))?;
        parse_response(&payload, self.cipher)
    }
}

/// Parses a remote-fetch response payload against the worker's configured
/// cipher. Exposed standalone so it can be exercised without a cache
/// client (S4/S5).
pub fn parse_response(payload: &[u8], cipher: Cipher) -> Result<TicketKeySet, KeyFetchError> {
    let mut buf = payload;

    if buf.remaining() < 4 {
        return Err(KeyFetchError::NotFound("payload shorter than version header".into()));
    }
    let version = buf.get_u32();
    if version != SUPPORTED_VERSION {
        return Err(KeyFetchError::NotFound(format!("unsupported payload version {version}")));
    }

    let expected_len = cipher.blob_len() as u16;
    let mut keys = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 2 {
            return Err(KeyFetchError::NotFound("truncated entry length".into()));
        }
        let len = buf.get_u16();
        if len != expected_len {
            return Err(KeyFetchError::NotFound(format!(
                "entry length {len} does not match configured cipher (expected {expected_len})"
            )));
        }
        if buf.remaining() < len as usize {
            return Err(KeyFetchError::NotFound("truncated key blob".into()));
        }
        let blob = &buf[..len as usize];
        keys.push(TicketKey::from_blob(blob, cipher));
        buf.advance(len as usize);
    }

    TicketKeySet::new(keys).ok_or_else(|| KeyFetchError::NotFound("payload contained no keys".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn encode_entry(cipher: Cipher, seed: u8) -> Vec<u8> {
        let key = TicketKey::new(
            [seed; 16],
            vec![seed; cipher.enc_key_len()],
            [seed; 32],
            cipher,
        );
        let blob = key.to_blob();
        let mut out = Vec::new();
        out.put_u16(blob.len() as u16);
        out.extend_from_slice(&blob);
        out
    }

    #[test]
    fn rejects_unsupported_version() {
        // S4: version=2, nothing else in the payload.
        let payload = [0x00, 0x00, 0x00, 0x02];
        let err = parse_response(&payload, Cipher::Aes128Cbc).unwrap_err();
        assert!(matches!(err, KeyFetchError::NotFound(_)));
    }

    #[test]
    fn parses_single_aes128_entry() {
        // S5: version=1 plus one len=48 key blob.
        let mut payload = Vec::new();
        payload.put_u32(1);
        payload.extend_from_slice(&encode_entry(Cipher::Aes128Cbc, 0x42));

        let set = parse_response(&payload, Cipher::Aes128Cbc).expect("well-formed payload parses");
        assert_eq!(set.len(), 1);
        assert_eq!(set.active().name, [0x42; 16]);
        assert_eq!(set.active().enc_key, vec![0x42; 16]);
        assert_eq!(set.active().hmac_key, [0x42; 32]);
    }

    #[test]
    fn parses_multiple_aes256_entries_in_order() {
        let mut payload = Vec::new();
        payload.put_u32(1);
        payload.extend_from_slice(&encode_entry(Cipher::Aes256Cbc, 1));
        payload.extend_from_slice(&encode_entry(Cipher::Aes256Cbc, 2));

        let set = parse_response(&payload, Cipher::Aes256Cbc).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.keys()[0].name, [1; 16]);
        assert_eq!(set.keys()[1].name, [2; 16]);
    }

    #[test]
    fn rejects_entry_length_that_does_not_match_configured_cipher() {
        let mut payload = Vec::new();
        payload.put_u32(1);
        payload.extend_from_slice(&encode_entry(Cipher::Aes256Cbc, 9)); // len=80
        let err = parse_response(&payload, Cipher::Aes128Cbc).unwrap_err(); // expects len=48
        assert!(matches!(err, KeyFetchError::NotFound(_)));
    }

    #[test]
    fn rejects_truncated_header() {
        let err = parse_response(&[0x00, 0x00], Cipher::Aes128Cbc).unwrap_err();
        assert!(matches!(err, KeyFetchError::NotFound(_)));
    }

    struct FixedCache(Vec<u8>);

    #[async_trait]
    impl KeyCacheClient for FixedCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, KeyFetchError> {
            Ok(Some(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn fetch_once_delegates_to_client_and_parses_response() {
        let mut payload = Vec::new();
        payload.put_u32(1);
        payload.extend_from_slice(&encode_entry(Cipher::Aes128Cbc, 5));

        let fetcher = RemoteKeyFetcher::new(Box::new(FixedCache(payload)), Cipher::Aes128Cbc);
        let set = fetcher.fetch_once().await.unwrap();
        assert_eq!(set.active().name, [5; 16]);
    }
}

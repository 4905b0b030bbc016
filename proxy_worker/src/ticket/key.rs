//! TLS session-ticket key material (C1).
//!
//! A `TicketKey` is immutable once built. A `TicketKeySet` is an ordered,
//! non-empty sequence of keys: position 0 is the active encryption key,
//! the rest are decryption-only. Rotations never mutate a set in place —
//! they produce a new one and the old one is dropped once its last reader
//! is done with it.

/// Symmetric cipher used to protect ticket contents. The HMAC digest is
/// fixed to SHA-256 (32-byte key) regardless of cipher, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cipher {
    Aes128Cbc,
    Aes256Cbc,
}

impl Cipher {
    /// Encryption-key length in bytes for this cipher.
    pub fn enc_key_len(self) -> usize {
        match self {
            Cipher::Aes128Cbc => 16,
            Cipher::Aes256Cbc => 32,
        }
    }

    /// Total wire length of one key blob: 16-byte name + enc key + 32-byte
    /// HMAC key, per the remote-fetch payload format (§4.3).
    pub fn blob_len(self) -> usize {
        16 + self.enc_key_len() + HMAC_KEY_LEN
    }
}

impl std::str::FromStr for Cipher {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-128-cbc" | "aes128cbc" => Ok(Cipher::Aes128Cbc),
            "aes-256-cbc" | "aes256cbc" => Ok(Cipher::Aes256Cbc),
            other => Err(format!("unrecognized ticket-key cipher: {other}")),
        }
    }
}

/// SHA-256 HMAC key length, fixed regardless of the configured cipher.
pub const HMAC_KEY_LEN: usize = 32;
/// Length of the opaque key identifier transmitted inside tickets.
pub const NAME_LEN: usize = 16;

/// One TLS session-ticket key. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketKey {
    pub name: [u8; NAME_LEN],
    pub enc_key: Vec<u8>,
    pub hmac_key: [u8; HMAC_KEY_LEN],
    pub cipher: Cipher,
}

impl TicketKey {
    /// Builds a key, asserting that `enc_key`'s length matches `cipher`.
    /// This is the "asserts at construction" rule from §4.1 — a mismatch
    /// here is a programming error in the caller, not a runtime condition.
    pub fn new(name: [u8; NAME_LEN], enc_key: Vec<u8>, hmac_key: [u8; HMAC_KEY_LEN], cipher: Cipher) -> Self {
        assert_eq!(
            enc_key.len(),
            cipher.enc_key_len(),
            "ticket-key encryption key length does not match cipher"
        );
        Self { name, enc_key, hmac_key, cipher }
    }

    /// Parses one key blob off the wire, per §4.3's `{len, key_blob}` format.
    /// `blob` must already be exactly `cipher.blob_len()` bytes.
    pub fn from_blob(blob: &[u8], cipher: Cipher) -> Self {
        debug_assert_eq!(blob.len(), cipher.blob_len());
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&blob[..NAME_LEN]);
        let enc_end = NAME_LEN + cipher.enc_key_len();
        let enc_key = blob[NAME_LEN..enc_end].to_vec();
        let mut hmac_key = [0u8; HMAC_KEY_LEN];
        hmac_key.copy_from_slice(&blob[enc_end..enc_end + HMAC_KEY_LEN]);
        Self { name, enc_key, hmac_key, cipher }
    }

    /// Re-encodes this key to the same `{name, enc_key, hmac_key}` byte
    /// layout `from_blob` reads, used by the round-trip test in §8.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cipher.blob_len());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.enc_key);
        out.extend_from_slice(&self.hmac_key);
        out
    }
}

/// An ordered, non-empty set of ticket keys. Position 0 is always the
/// active encryption key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketKeySet {
    keys: Vec<TicketKey>,
}

impl TicketKeySet {
    /// Builds a set, enforcing invariant 1 (`non-empty whenever published`).
    pub fn new(keys: Vec<TicketKey>) -> Option<Self> {
        if keys.is_empty() {
            None
        } else {
            Some(Self { keys })
        }
    }

    pub fn keys(&self) -> &[TicketKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        false // a constructed set is never empty (invariant 1)
    }

    /// The active encryption key (position 0).
    pub fn active(&self) -> &TicketKey {
        &self.keys[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name_byte: u8, cipher: Cipher) -> TicketKey {
        TicketKey::new(
            [name_byte; NAME_LEN],
            vec![name_byte; cipher.enc_key_len()],
            [name_byte; HMAC_KEY_LEN],
            cipher,
        )
    }

    #[test]
    fn set_rejects_empty_keys() {
        assert!(TicketKeySet::new(vec![]).is_none());
    }

    #[test]
    fn blob_round_trip_aes128() {
        let original = key(7, Cipher::Aes128Cbc);
        let blob = original.to_blob();
        assert_eq!(blob.len(), Cipher::Aes128Cbc.blob_len());
        let decoded = TicketKey::from_blob(&blob, Cipher::Aes128Cbc);
        assert_eq!(original, decoded);
    }

    #[test]
    fn blob_round_trip_aes256() {
        let original = key(9, Cipher::Aes256Cbc);
        let blob = original.to_blob();
        assert_eq!(blob.len(), Cipher::Aes256Cbc.blob_len());
        let decoded = TicketKey::from_blob(&blob, Cipher::Aes256Cbc);
        assert_eq!(original, decoded);
    }

    #[test]
    #[should_panic(expected = "does not match cipher")]
    fn new_asserts_key_length_matches_cipher() {
        TicketKey::new([0; NAME_LEN], vec![0; 10], [0; HMAC_KEY_LEN], Cipher::Aes128Cbc);
    }
}

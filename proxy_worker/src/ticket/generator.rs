//! Random generation of a single new ticket key (C2).

use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::error::KeyGenerationError;
use crate::ticket::key::{Cipher, TicketKey, HMAC_KEY_LEN, NAME_LEN};

pub struct TicketKeyGenerator {
    cipher: Cipher,
}

impl TicketKeyGenerator {
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }

    /// Fills `name`, `enc_key` and `hmac_key` from a CSPRNG. Any failure
    /// to read random bytes — the OS source is exhausted or unavailable —
    /// surfaces as `KeyGenerationError` rather than panicking, since this
    /// runs on every rotation tick for the life of the process.
    pub fn generate(&self) -> Result<TicketKey, KeyGenerationError> {
        let mut name = [0u8; NAME_LEN];
        fill(&mut name)?;

        let mut enc_key = vec![0u8; self.cipher.enc_key_len()];
        fill(&mut enc_key)?;

        let mut hmac_key = [0u8; HMAC_KEY_LEN];
        fill(&mut hmac_key)?;

        Ok(TicketKey::new(name, enc_key, hmac_key, self.cipher))
    }
}

fn fill(buf: &mut [u8]) -> Result<(), KeyGenerationError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| KeyGenerationError::Rng(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_correctly_sized_key() {
        let gen = TicketKeyGenerator::new(Cipher::Aes256Cbc);
        let key = gen.generate().expect("rng available in test environment");
        assert_eq!(key.enc_key.len(), 32);
        assert_eq!(key.hmac_key.len(), HMAC_KEY_LEN);
        assert_eq!(key.cipher, Cipher::Aes256Cbc);
    }

    #[test]
    fn generate_produces_distinct_keys() {
        let gen = TicketKeyGenerator::new(Cipher::Aes128Cbc);
        let a = gen.generate().unwrap();
        let b = gen.generate().unwrap();
        assert_ne!(a.name, b.name);
        assert_ne!(a.enc_key, b.enc_key);
    }
}

//! Periodic ticket-key rotation (C3).
//!
//! Fires once synchronously at startup and then every hour. Each tick
//! either starts a fresh set (first tick) or shifts the previous one down
//! by a position, keeping up to `H = max(1, tls_session_timeout in hours)`
//! keys so tickets issued within the session timeout stay decryptable.

use std::time::Duration;

use crate::ticket::generator::TicketKeyGenerator;
use crate::ticket::key::{Cipher, TicketKeySet};

pub struct TicketKeyRotator {
    generator: TicketKeyGenerator,
    retention: u32,
    current: Option<TicketKeySet>,
}

impl TicketKeyRotator {
    pub fn new(cipher: Cipher, tls_session_timeout: Duration) -> Self {
        // Integer-hour floor per the source's own retention rule, clamped
        // to at least one hour (Open Question 3: sub-hour timeouts would
        // otherwise floor to a zero-key retention window).
        let hours = (tls_session_timeout.as_secs() / 3600).max(1) as u32;
        Self {
            generator: TicketKeyGenerator::new(cipher),
            retention: hours,
            current: None,
        }
    }

    /// Produces the next set to publish, or `None` if the RNG failed this
    /// tick (the previous set, held by `WorkerPool`, stays in force; the
    /// rotor forgets its own bookkeeping so the next tick starts clean
    /// rather than shifting from a set that was never actually published).
    pub fn tick(&mut self) -> Option<TicketKeySet> {
        let head = match self.generator.generate() {
            Ok(key) => key,
            Err(err) => {
                log::warn!("ticket-key rotation failed, keeping previous set: {err}");
                self.current = None;
                return None;
            }
        };

        let new_set = match self.current.take() {
            None => TicketKeySet::new(vec![head]).expect("single-key set is never empty"),
            Some(old) => {
                let new_size = self.retention.min(old.len() as u32 + 1) as usize;
                let mut keys = Vec::with_capacity(new_size);
                keys.push(head);
                keys.extend(old.keys()[..new_size - 1].iter().cloned());
                TicketKeySet::new(keys).expect("non-empty by construction")
            }
        };

        self.current = Some(new_set.clone());
        Some(new_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_grows_then_holds_at_retention_window() {
        // S3: H=3, tick four times -> sizes 1, 2, 3, 3.
        let mut rotor = TicketKeyRotator::new(Cipher::Aes128Cbc, Duration::from_secs(3 * 3600));
        let sizes: Vec<usize> = (0..4).map(|_| rotor.tick().unwrap().len()).collect();
        assert_eq!(sizes, vec![1, 2, 3, 3]);
    }

    #[test]
    fn each_head_key_is_freshly_generated_and_shifts_into_position_one() {
        let mut rotor = TicketKeyRotator::new(Cipher::Aes128Cbc, Duration::from_secs(3 * 3600));
        let first = rotor.tick().unwrap();
        let second = rotor.tick().unwrap();
        assert_ne!(first.active().name, second.active().name);
        assert_eq!(second.keys()[1].name, first.active().name);
    }

    #[test]
    fn sub_hour_timeout_clamps_to_one_hour_retention() {
        let mut rotor = TicketKeyRotator::new(Cipher::Aes128Cbc, Duration::from_secs(10));
        let _ = rotor.tick();
        let second = rotor.tick().unwrap();
        assert_eq!(second.len(), 1, "H clamps to 1, so retention never grows past one key");
    }
}

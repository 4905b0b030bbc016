//! TLS session-ticket key material: the data model (C1), generator (C2),
//! periodic rotator (C3), and remote-cache fetcher (C4).

pub mod generator;
pub mod key;
pub mod remote_fetch;
pub mod rotator;

pub use key::{Cipher, TicketKey, TicketKeySet};

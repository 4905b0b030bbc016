//! Small collection of utilities shared across the worker binaries: process
//! introspection for startup banners/diagnostics, and an async cache client
//! used by the TLS ticket-key remote fetch path.

pub mod connections;
pub mod utils;

pub use connections::cache_redis::*;
pub use utils::misc::sys_info::*;

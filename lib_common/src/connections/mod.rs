//! Cache/database client wrappers.

pub mod cache_redis;

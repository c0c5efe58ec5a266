//! Key-value provider implementations

pub mod memory;

#[cfg(feature = "redis-store")]
pub mod redis;

pub use memory::MemoryKeyValueStore;

#[cfg(feature = "redis-store")]
pub use self::redis::RedisKeyValueStore;

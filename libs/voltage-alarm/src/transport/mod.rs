//! Transport implementations

pub mod memory;
pub mod redis;

pub use self::memory::MemoryTransport;
pub use self::redis::{RedisTransport, RedisTransportConfig};

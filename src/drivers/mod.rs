pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryDriver;

#[cfg(feature = "redis")]
pub use self::redis::RedisDriver;

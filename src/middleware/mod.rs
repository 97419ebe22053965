//! Transport-wrapping middleware chain.
//!
//! Construction order (outermost first): retry -> integrity -> compression
//! -> base transport. Each layer preserves the `Transport` interface so the
//! chain composes just like the teacher's backend trait objects do.

pub mod compression;
pub mod integrity;
pub mod retry;

pub use compression::CompressionMiddleware;
pub use integrity::IntegrityMiddleware;
pub use retry::RetryMiddleware;

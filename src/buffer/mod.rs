//! Reusable send buffers
//!
//! Outbound relay frames are assembled in buffers rented from a shared
//! [`BufferPool`] and handed back as soon as the transport has copied them.

pub mod pool;

pub use pool::{BufferPool, PoolStats};

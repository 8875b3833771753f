//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the client is up.
//!
//! # Tasks
//! - Cleanup: removes expired cache entries and fails stale pending mutations

mod cleanup;

pub use cleanup::spawn_cleanup_task;

//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the store.
//!
//! # Tasks
//! - Cache optimize: expires and evicts cache entries at configured intervals

mod optimize;

pub use optimize::spawn_optimize_task;

//! Core types and shared functionality for the waypost worker.
//!
//! This crate provides:
//! - The durable store (cache generations and submission queue) on SQLite
//! - Unified error types
//! - Worker configuration
//! - Request and response values

pub mod config;
pub mod error;
pub mod exchange;
pub mod store;

pub use config::{ConfigError, WorkerConfig};
pub use error::Error;
pub use exchange::{CacheMode, FetchRequest, ResourceClass, Response};
pub use store::{GenerationRole, QueuedSubmission, WorkerDb};

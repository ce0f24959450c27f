//! SQLite-backed durable state of the worker.
//!
//! Everything that must survive between events lives here, never in process
//! memory:
//!
//! - Cache generations and their request-to-response entries
//! - The FIFO queue of submissions awaiting replay
//! - Versioned schema migrations and WAL mode

pub mod connection;
pub mod generations;
pub mod key;
pub mod migrations;
pub mod submissions;

pub use connection::WorkerDb;
pub use generations::{CachedEntry, GenerationRole};
pub use key::request_key;
pub use submissions::QueuedSubmission;

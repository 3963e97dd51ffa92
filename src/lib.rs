//! Asynchronous document ingestion worker: consumes ingestion events,
//! chunks document text, embeds chunks with bounded concurrency, upserts
//! vectors into a tenant-isolated store, and tracks every embedding job
//! through a relational state machine with retry and dead-letter handling.

pub mod cli;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod services;

pub use error::PipelineError;
pub use models::Config;

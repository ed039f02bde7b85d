//! variance-core library: tokenizer, pairwise collator, alignment store,
//! critical apparatus and histogram over a set of text witnesses.

pub mod apparatus;
pub mod cache;
pub mod collate;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod histogram;
pub mod model;
pub mod store;
pub mod task;
pub mod tokenize;

/// # Conventions
///
/// - **Errors**: `thiserror` enums in the library (`StoreError`,
///   `CollationError`); `anyhow::Result` for configuration and the CLI.
/// - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).
/// - **Offsets**: every range counts characters, never bytes.
pub use engine::{CollationReport, Engine};
pub use error::{CollationError, ErrorCode, StoreError};

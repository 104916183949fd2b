//! tally-core library.
//!
//! Raw practice-session exports are consolidated into one append-only record
//! store and rolled up into daily, weekly, and hourly aggregates.
//!
//! # Conventions
//!
//! - **Errors**: library error enums derive `thiserror::Error`; configuration
//!   plumbing returns `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod aggregate;
pub mod config;
pub mod error;
pub mod granularity;
pub mod ingest;
pub mod lock;
pub mod query;
pub mod record;
pub mod store;

pub use aggregate::{AggregateResult, Bucket, BucketKey, aggregate};
pub use granularity::{FilterState, Granularity, select_granularity};
pub use ingest::{ConsolidationReport, DirPool, MemoryPool, PendingPool, RawBatch, consolidate};
pub use query::Tally;
pub use record::{MalformedRecordError, Record};
pub use store::{FileStore, MemoryStore, RecordStore, StoreError};

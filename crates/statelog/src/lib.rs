//! # statelog
//!
//! A buffered write-back history store for time-stamped state records.
//!
//! Records are accepted immediately, buffered in memory, and written to a
//! document store in unordered batches: as soon as `flush_threshold`
//! records are pending, or `flush_interval` after the first unflushed one.
//! A batch that fails to write is put back in front of newer records and
//! retried on the next trigger.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statelog::{HistoryOptions, HistoryStore, State};
//!
//! let store = HistoryStore::new();
//! if !store.connect("file://./history", "plant") {
//!     eprintln!("history unavailable");
//! }
//!
//! store.store("sensor.temp", State::new(21.5, 1_700_000_000_000).with_ack(true));
//!
//! // ...later
//! let last_hour = HistoryOptions::new()
//!     .between(1_699_996_400_000, 1_700_000_000_000)
//!     .descending()
//!     .with_limit(100);
//! for entry in store.get_history("sensor.temp", &last_hour) {
//!     println!("{} {}", entry.ts, entry.val);
//! }
//!
//! store.close();
//! ```
//!
//! ## Failure handling
//!
//! The store is fail-soft: `connect`, `store` and `flush` return `bool`,
//! `get_history` returns an empty list on error and `close` never fails.
//! Every such method has a `try_*` twin returning [`Result`], and every
//! absorbed failure is logged through `tracing` (see [`logging`]).
//!
//! Delivery is at-least-once. A batch the backend partly applied before
//! an error is retried in full, and records still buffered are lost if
//! the process dies.
//!
//! ## Backends
//!
//! - `mem://` keeps collections in memory, shared per connector
//! - `file://<dir>` appends batches to `<dir>/<database>/<collection>.log`;
//!   add `?sync=none` to skip the fsync per batch

pub mod config;
pub mod logging;
mod store;

pub use config::{StoreConfig, DEFAULT_COLLECTION, DEFAULT_DATABASE, DEFAULT_URL};
pub use store::HistoryStore;

pub use serde_json::Value;
pub use statelog_core::{
    Connector, DocumentBackend, Error, HistoryEntry, HistoryOptions, Result, SortOrder, State,
};
pub use statelog_docstore::{DefaultConnector, FileBackend, MemoryConnector, SyncMode};
pub use statelog_writer::{
    FlushOutcome, ManualScheduler, Scheduler, ThreadScheduler, WriterStats,
};

/// Version of the statelog crates
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! # statelog core
//!
//! Core types and traits shared by the statelog crates: the record model,
//! the error type, history query options, and the document store seam.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod query;
pub mod record;

pub use backend::{
    BulkWriteOptions, BulkWriteSummary, Connector, DocumentBackend, IndexSpec, OpError, WriteOp,
};
pub use error::{Error, Result};
pub use query::{FindOptions, HistoryOptions, RangeFilter, SortOrder};
pub use record::{HistoryEntry, Record, State, StoredDocument};

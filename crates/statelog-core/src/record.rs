//! Record types.
//!
//! A value travels through three shapes:
//!
//! ```text
//! State (caller input) --Record::new--> Record --try_from--> StoredDocument (backend)
//!                                                                 |
//!                          HistoryEntry (query output) <--from----+
//! ```
//!
//! Timestamps are epoch milliseconds at the edges and a native
//! `DateTime<Utc>` inside the backend.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A state change as reported by the upstream producer.
///
/// `ack`, `from` and `q` may be absent; defaults are applied when the
/// state is turned into a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// The value, treated as opaque payload
    #[serde(default)]
    pub val: Value,
    /// Milliseconds since the Unix epoch
    pub ts: i64,
    /// Acknowledged flag
    #[serde(default)]
    pub ack: Option<bool>,
    /// Originator of the write
    #[serde(default)]
    pub from: Option<String>,
    /// Quality flags
    #[serde(default)]
    pub q: Option<i64>,
}

impl State {
    /// Create a state with a value and timestamp; all other fields absent.
    pub fn new(val: impl Into<Value>, ts: i64) -> Self {
        Self {
            val: val.into(),
            ts,
            ack: None,
            from: None,
            q: None,
        }
    }

    /// Set the acknowledged flag
    pub fn with_ack(mut self, ack: bool) -> Self {
        self.ack = Some(ack);
        self
    }

    /// Set the originator
    pub fn with_from<S: Into<String>>(mut self, from: S) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the quality flags
    pub fn with_quality(mut self, q: i64) -> Self {
        self.q = Some(q);
        self
    }
}

/// One timestamped value with its metadata, defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Identifier of the value's source, never empty
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub ts: i64,
    /// The value, treated as opaque payload
    pub val: Value,
    /// Acknowledged flag (default `false`)
    pub ack: bool,
    /// Originator of the write
    pub from: Option<String>,
    /// Quality flags (default `0`)
    pub q: i64,
}

impl Record {
    /// Build a record from an identifier and a state.
    ///
    /// Fails with [`Error::InvalidRecord`] when `id` is empty.
    pub fn new(id: impl Into<String>, state: State) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidRecord("id must not be empty".to_string()));
        }

        Ok(Self {
            id,
            ts: state.ts,
            val: state.val,
            ack: state.ack.unwrap_or(false),
            from: state.from,
            q: state.q.unwrap_or(0),
        })
    }
}

/// The persisted document shape: `{ id, ts, val, ack, from, q }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Identifier of the value's source
    pub id: String,
    /// Timestamp in the backend's native form
    pub ts: DateTime<Utc>,
    /// The value
    pub val: Value,
    /// Acknowledged flag
    pub ack: bool,
    /// Originator of the write
    pub from: Option<String>,
    /// Quality flags
    pub q: i64,
}

impl StoredDocument {
    /// Timestamp as epoch milliseconds
    pub fn ts_millis(&self) -> i64 {
        self.ts.timestamp_millis()
    }
}

impl TryFrom<Record> for StoredDocument {
    type Error = Error;

    fn try_from(record: Record) -> Result<Self> {
        let ts = millis_to_datetime(record.ts).ok_or_else(|| {
            Error::InvalidRecord(format!("timestamp {} is out of range", record.ts))
        })?;

        Ok(Self {
            id: record.id,
            ts,
            val: record.val,
            ack: record.ack,
            from: record.from,
            q: record.q,
        })
    }
}

/// A record as returned by a history query (the id is implied by the query).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Milliseconds since the Unix epoch
    pub ts: i64,
    /// The value
    pub val: Value,
    /// Acknowledged flag
    pub ack: bool,
    /// Originator of the write
    pub from: Option<String>,
    /// Quality flags
    pub q: i64,
}

impl From<StoredDocument> for HistoryEntry {
    fn from(doc: StoredDocument) -> Self {
        Self {
            ts: doc.ts_millis(),
            val: doc.val,
            ack: doc.ack,
            from: doc.from,
            q: doc.q,
        }
    }
}

/// Convert epoch milliseconds into a UTC date, `None` when unrepresentable.
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

//! Store configuration

use statelog_core::{Error, Result};
use statelog_writer::{WriterConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_FLUSH_THRESHOLD};
use std::time::Duration;

/// Default connection URL (in-memory collection)
pub const DEFAULT_URL: &str = "mem://";

/// Default database name
pub const DEFAULT_DATABASE: &str = "state_history";

/// Default collection name
pub const DEFAULT_COLLECTION: &str = "history";

/// Configuration for a [`HistoryStore`](crate::HistoryStore)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Connection URL used by `connect_with_config`
    pub url: String,
    /// Database name used by `connect_with_config`
    pub database: String,
    /// Collection holding the history documents
    pub collection: String,
    /// Buffered records that trigger an immediate flush
    pub flush_threshold: usize,
    /// Debounce interval before a timer flush
    pub flush_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl StoreConfig {
    /// Set the connection URL
    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = url.into();
        self
    }

    /// Set the database name
    pub fn with_database<S: Into<String>>(mut self, database: S) -> Self {
        self.database = database.into();
        self
    }

    /// Set the collection name
    pub fn with_collection<S: Into<String>>(mut self, collection: S) -> Self {
        self.collection = collection.into();
        self
    }

    /// Set the flush threshold
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Set the debounce interval
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Config("url must not be empty".to_string()));
        }
        if self.database.is_empty() {
            return Err(Error::Config("database must not be empty".to_string()));
        }
        if self.collection.is_empty() {
            return Err(Error::Config("collection must not be empty".to_string()));
        }
        self.writer_config().validate()
    }

    /// The part of the configuration the writer needs
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            flush_threshold: self.flush_threshold,
            flush_interval: self.flush_interval,
        }
    }
}

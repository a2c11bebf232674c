//! # statelog writer
//!
//! Buffered write-back layer for statelog.
//!
//! ## Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of statelog.**
//!
//! Users should depend on the main `statelog` crate instead, which provides
//! the stable public API. This crate's API may change without notice between
//! minor versions.
//!
//! ---
//!
//! - **Write buffer**: ordered pending operations, failed batches requeued
//!   in front
//! - **Flush scheduler**: size threshold or debounce timer, one flush in
//!   flight at a time
//! - **Write executor**: one unordered bulk write per batch
//!
//! Delivery is at-least-once: a batch whose submission errored after the
//! backend applied part of it is submitted again in full.

use statelog_core::{Error, Result};
use std::time::Duration;

pub mod buffer;
pub mod executor;
pub mod flusher;
pub mod timer;

pub use buffer::WriteBuffer;
pub use executor::{BackendSink, BatchSink};
pub use flusher::{AppendOutcome, BufferedWriter, FlushOutcome, FlushTrigger, WriterStats};
pub use timer::{ManualScheduler, Scheduler, ThreadScheduler, TimerHandle, TimerTask};

/// Default number of buffered records that triggers an immediate flush
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// Default debounce interval before a timer flush
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Writer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Buffer length at which an append flushes synchronously
    pub flush_threshold: usize,
    /// Delay between the first unflushed record and the timer flush
    pub flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl WriterConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(Error::Config("flush_threshold must be at least 1".to_string()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.flush_threshold, 1000);
        assert_eq!(config.flush_interval, Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_writer_config_validation() {
        let config = WriterConfig {
            flush_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WriterConfig {
            flush_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

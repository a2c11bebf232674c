//! Write executor - submits a batch to the backend
//!
//! A batch goes out as one unordered bulk write. The flush fails only when
//! the submission as a whole fails; operations the backend refuses one by
//! one are logged and counted, not retried.

use statelog_core::{BulkWriteOptions, BulkWriteSummary, DocumentBackend, Result, WriteOp};
use std::sync::Arc;
use tracing::warn;

/// Destination of flushed batches
pub trait BatchSink: Send + Sync {
    /// Submit one batch. `Err` means the whole batch must be retried.
    fn submit(&self, batch: &[WriteOp]) -> Result<BulkWriteSummary>;
}

/// Sends batches to a [`DocumentBackend`] as unordered bulk writes
pub struct BackendSink {
    backend: Arc<dyn DocumentBackend>,
}

impl BackendSink {
    /// Wrap a connected backend
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self { backend }
    }
}

impl BatchSink for BackendSink {
    fn submit(&self, batch: &[WriteOp]) -> Result<BulkWriteSummary> {
        let summary = self
            .backend
            .bulk_write(batch, BulkWriteOptions::unordered())?;

        for op_error in &summary.write_errors {
            let id = batch
                .get(op_error.index)
                .map(|op| op.document().id.as_str())
                .unwrap_or("<unknown>");
            warn!(
                id,
                index = op_error.index,
                error = %op_error.message,
                "Backend refused write operation"
            );
        }

        Ok(summary)
    }
}

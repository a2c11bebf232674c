//! Write buffer - ordered sequence of pending write operations
//!
//! Arrival order is preserved, with one exception: a batch handed back after
//! a failed flush goes in front of everything that arrived while it was in
//! flight.

use statelog_core::WriteOp;

/// Pending operations awaiting a flush
#[derive(Debug, Default)]
pub struct WriteBuffer {
    ops: Vec<WriteOp>,
}

impl WriteBuffer {
    /// Creates an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Take the whole contents, leaving the buffer empty
    pub fn take(&mut self) -> Vec<WriteOp> {
        std::mem::take(&mut self.ops)
    }

    /// Put a failed batch back in front of the current contents
    pub fn requeue_front(&mut self, batch: Vec<WriteOp>) {
        let newer = std::mem::replace(&mut self.ops, batch);
        self.ops.extend(newer);
    }

    /// Drop everything, returning how many operations were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.ops.len();
        self.ops.clear();
        dropped
    }

    /// Number of pending operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Pending operations in flush order
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }
}

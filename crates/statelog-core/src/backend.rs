//! Document store seam.
//!
//! statelog never talks to a concrete database directly. A [`Connector`]
//! turns a URL into a [`DocumentBackend`] bound to one collection; the
//! backend exposes the three primitives the store needs: index creation,
//! unordered bulk insert, and range find.

use crate::query::{FindOptions, RangeFilter, SortOrder};
use crate::record::StoredDocument;
use crate::Result;
use std::sync::Arc;

/// A pending write operation
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert one document
    InsertOne(StoredDocument),
}

impl WriteOp {
    /// The document carried by this operation
    pub fn document(&self) -> &StoredDocument {
        match self {
            WriteOp::InsertOne(doc) => doc,
        }
    }
}

/// Options for [`DocumentBackend::bulk_write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkWriteOptions {
    /// When false the backend may apply operations in any order and keeps
    /// going past individual operation errors.
    pub ordered: bool,
}

impl BulkWriteOptions {
    /// Unordered bulk write
    pub fn unordered() -> Self {
        Self { ordered: false }
    }
}

impl Default for BulkWriteOptions {
    fn default() -> Self {
        Self::unordered()
    }
}

/// A single operation that the backend refused inside an otherwise
/// successful bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpError {
    /// Position of the operation in the submitted batch
    pub index: usize,
    /// Why the operation was refused
    pub message: String,
}

/// Result of a bulk write whose submission succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    /// Number of documents inserted
    pub inserted: usize,
    /// Per-operation failures
    pub write_errors: Vec<OpError>,
}

/// Compound index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, e.g. `id_1_ts_1`
    pub name: String,
    /// Indexed fields in key order
    pub keys: Vec<(String, SortOrder)>,
}

impl IndexSpec {
    /// Build an index over `keys`; the name follows the `field_1_other_-1`
    /// convention.
    pub fn new(keys: &[(&str, SortOrder)]) -> Self {
        let name = keys
            .iter()
            .map(|(field, order)| match order {
                SortOrder::Ascending => format!("{}_1", field),
                SortOrder::Descending => format!("{}_-1", field),
            })
            .collect::<Vec<_>>()
            .join("_");

        Self {
            name,
            keys: keys
                .iter()
                .map(|(field, order)| (field.to_string(), *order))
                .collect(),
        }
    }

    /// The `(id ascending, ts ascending)` index every history collection carries
    pub fn history() -> Self {
        Self::new(&[("id", SortOrder::Ascending), ("ts", SortOrder::Ascending)])
    }
}

/// A connected collection in a document store.
///
/// Implementations must be safe to share between the writer's flush path
/// and concurrent queries.
pub trait DocumentBackend: Send + Sync {
    /// Ensure `index` exists; creating an existing index is not an error.
    fn create_index(&self, index: &IndexSpec) -> Result<()>;

    /// Submit `ops` as one batch.
    ///
    /// An `Err` means the submission as a whole failed (e.g. connectivity)
    /// and none of the operations should be assumed applied. Individual
    /// refused operations are reported in [`BulkWriteSummary::write_errors`].
    fn bulk_write(&self, ops: &[WriteOp], options: BulkWriteOptions) -> Result<BulkWriteSummary>;

    /// Return the documents matching `filter`, sorted by timestamp.
    fn find(&self, filter: &RangeFilter, options: &FindOptions) -> Result<Vec<StoredDocument>>;

    /// Release the underlying connection.
    fn close(&self) -> Result<()>;
}

/// Opens backends from a connection URL.
pub trait Connector: Send + Sync {
    /// Connect to `url` and select `database` / `collection`.
    fn connect(
        &self,
        url: &str,
        database: &str,
        collection: &str,
    ) -> Result<Arc<dyn DocumentBackend>>;
}

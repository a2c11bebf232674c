//! In-memory document collection
//!
//! Documents are kept in a `BTreeMap` keyed by `(id, ts, seq)`, which is the
//! `(id ascending, ts ascending)` compound index materialised: a history
//! query is a single ordered range scan. `seq` keeps documents with equal
//! timestamps apart and in insertion order.

use chrono::{DateTime, Utc};
use statelog_core::{
    BulkWriteOptions, BulkWriteSummary, Connector, DocumentBackend, Error, FindOptions, IndexSpec,
    RangeFilter, Result, SortOrder, StoredDocument, WriteOp,
};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Fields a document carries; indexes may only reference these.
const DOCUMENT_FIELDS: [&str; 6] = ["id", "ts", "val", "ack", "from", "q"];

type DocKey = (String, DateTime<Utc>, u64);

/// Sorted document storage shared by the memory and file backends
#[derive(Debug, Default)]
pub struct CollectionData {
    docs: BTreeMap<DocKey, StoredDocument>,
    next_seq: u64,
    indexes: Vec<IndexSpec>,
}

impl CollectionData {
    /// Creates an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document; duplicates are kept
    pub fn insert(&mut self, doc: StoredDocument) {
        let key = (doc.id.clone(), doc.ts, self.next_seq);
        self.next_seq += 1;
        self.docs.insert(key, doc);
    }

    /// Register an index; re-creating an identical index is a no-op
    pub fn create_index(&mut self, index: &IndexSpec) -> Result<()> {
        if let Some((field, _)) = index
            .keys
            .iter()
            .find(|(field, _)| !DOCUMENT_FIELDS.contains(&field.as_str()))
        {
            return Err(Error::Storage(format!(
                "index {} references unknown field {}",
                index.name, field
            )));
        }
        if index.keys.is_empty() {
            return Err(Error::Storage("index must have at least one key".to_string()));
        }

        match self.indexes.iter().find(|existing| existing.name == index.name) {
            Some(existing) if existing == index => Ok(()),
            Some(_) => Err(Error::Storage(format!(
                "index {} already exists with different keys",
                index.name
            ))),
            None => {
                self.indexes.push(index.clone());
                Ok(())
            }
        }
    }

    /// Ordered range scan
    pub fn find(&self, filter: &RangeFilter, options: &FindOptions) -> Vec<StoredDocument> {
        // BTreeMap::range panics on an inverted range
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Vec::new();
            }
        }

        let lower = (
            filter.id.clone(),
            filter.from.unwrap_or(DateTime::<Utc>::MIN_UTC),
            0,
        );
        let upper = (
            filter.id.clone(),
            filter.to.unwrap_or(DateTime::<Utc>::MAX_UTC),
            u64::MAX,
        );
        let range = self
            .docs
            .range((Bound::Included(lower), Bound::Included(upper)))
            .map(|(_, doc)| doc);
        let limit = options.limit.unwrap_or(usize::MAX);

        match options.sort {
            SortOrder::Ascending => range.take(limit).cloned().collect(),
            SortOrder::Descending => range.rev().take(limit).cloned().collect(),
        }
    }

    /// Indexes created on this collection
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns true if no documents are stored
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// A connection to an in-memory collection.
///
/// Several connections may share one [`CollectionData`]; closing a
/// connection does not discard the data.
pub struct MemoryBackend {
    data: Arc<RwLock<CollectionData>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// A connection to a fresh, private collection
    pub fn new() -> Self {
        Self::with_data(Arc::new(RwLock::new(CollectionData::new())))
    }

    /// A connection to an existing collection
    pub fn with_data(data: Arc<RwLock<CollectionData>>) -> Self {
        Self {
            data,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true once [`DocumentBackend::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Connection("client is closed".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBackend for MemoryBackend {
    fn create_index(&self, index: &IndexSpec) -> Result<()> {
        self.check_open()?;
        let mut data = self.data.write().map_err(|_| Error::LockPoisoned)?;
        data.create_index(index)
    }

    fn bulk_write(&self, ops: &[WriteOp], _options: BulkWriteOptions) -> Result<BulkWriteSummary> {
        self.check_open()?;
        let mut data = self.data.write().map_err(|_| Error::LockPoisoned)?;
        for op in ops {
            match op {
                WriteOp::InsertOne(doc) => data.insert(doc.clone()),
            }
        }
        Ok(BulkWriteSummary {
            inserted: ops.len(),
            write_errors: Vec::new(),
        })
    }

    fn find(&self, filter: &RangeFilter, options: &FindOptions) -> Result<Vec<StoredDocument>> {
        self.check_open()?;
        let data = self.data.read().map_err(|_| Error::LockPoisoned)?;
        Ok(data.find(filter, options))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Hands out [`MemoryBackend`] connections.
///
/// Collections live as long as the connector: connecting twice to the same
/// `(database, collection)` through one connector sees the same documents.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    collections: Arc<Mutex<HashMap<(String, String), Arc<RwLock<CollectionData>>>>>,
}

impl MemoryConnector {
    /// Creates a connector with no collections
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection to `database.collection`, creating it if needed
    pub fn open(&self, database: &str, collection: &str) -> Result<MemoryBackend> {
        let mut collections = self.collections.lock().map_err(|_| Error::LockPoisoned)?;
        let data = collections
            .entry((database.to_string(), collection.to_string()))
            .or_insert_with(|| Arc::new(RwLock::new(CollectionData::new())))
            .clone();
        Ok(MemoryBackend::with_data(data))
    }

    /// Number of documents stored in `database.collection`
    pub fn document_count(&self, database: &str, collection: &str) -> Result<usize> {
        let collections = self.collections.lock().map_err(|_| Error::LockPoisoned)?;
        match collections.get(&(database.to_string(), collection.to_string())) {
            Some(data) => Ok(data.read().map_err(|_| Error::LockPoisoned)?.len()),
            None => Ok(0),
        }
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        _url: &str,
        database: &str,
        collection: &str,
    ) -> Result<Arc<dyn DocumentBackend>> {
        Ok(Arc::new(self.open(database, collection)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statelog_core::{HistoryOptions, Record, State};

    fn insert(id: &str, ts: i64, val: i64) -> WriteOp {
        let record = Record::new(id, State::new(val, ts)).unwrap();
        WriteOp::InsertOne(StoredDocument::try_from(record).unwrap())
    }

    fn query(backend: &MemoryBackend, id: &str, options: HistoryOptions) -> Vec<i64> {
        let (filter, find) = options.to_query(id).unwrap();
        backend
            .find(&filter, &find)
            .unwrap()
            .iter()
            .map(|doc| doc.ts_millis())
            .collect()
    }

    fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let ops = vec![
            insert("x", 300, 3),
            insert("x", 100, 1),
            insert("y", 150, 9),
            insert("x", 200, 2),
        ];
        let summary = backend.bulk_write(&ops, BulkWriteOptions::unordered()).unwrap();
        assert_eq!(summary.inserted, 4);
        backend
    }

    #[test]
    fn test_range_scan_is_sorted_by_timestamp() {
        let backend = seeded();
        assert_eq!(query(&backend, "x", HistoryOptions::new()), vec![100, 200, 300]);
        assert_eq!(
            query(&backend, "x", HistoryOptions::new().descending()),
            vec![300, 200, 100]
        );
    }

    #[test]
    fn test_range_bounds_and_limit() {
        let backend = seeded();
        assert_eq!(query(&backend, "x", HistoryOptions::new().between(150, 250)), vec![200]);
        assert_eq!(query(&backend, "x", HistoryOptions::new().since(200)), vec![200, 300]);
        assert_eq!(
            query(&backend, "x", HistoryOptions::new().descending().with_limit(2)),
            vec![300, 200]
        );
        assert!(query(&backend, "z", HistoryOptions::new()).is_empty());
    }

    #[test]
    fn test_duplicate_timestamps_are_kept() {
        let backend = MemoryBackend::new();
        backend
            .bulk_write(&[insert("x", 100, 1), insert("x", 100, 2)], BulkWriteOptions::unordered())
            .unwrap();
        let (filter, find) = HistoryOptions::new().to_query("x").unwrap();
        let vals: Vec<_> = backend
            .find(&filter, &find)
            .unwrap()
            .into_iter()
            .map(|doc| doc.val)
            .collect();
        assert_eq!(vals, vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[test]
    fn test_create_index_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.create_index(&IndexSpec::history()).unwrap();
        backend.create_index(&IndexSpec::history()).unwrap();
        assert_eq!(backend.data.read().unwrap().indexes().len(), 1);

        let bogus = IndexSpec::new(&[("colour", SortOrder::Ascending)]);
        assert!(backend.create_index(&bogus).is_err());
    }

    #[test]
    fn test_closed_backend_rejects_operations() {
        let backend = seeded();
        backend.close().unwrap();
        assert!(backend.is_closed());
        assert!(matches!(
            backend.bulk_write(&[insert("x", 1, 1)], BulkWriteOptions::unordered()),
            Err(Error::Connection(_))
        ));
        let (filter, find) = HistoryOptions::new().to_query("x").unwrap();
        assert!(backend.find(&filter, &find).is_err());
    }

    #[test]
    fn test_connector_shares_collections() {
        let connector = MemoryConnector::new();
        let first = connector.connect("mem://", "db", "history").unwrap();
        first
            .bulk_write(&[insert("x", 1, 1)], BulkWriteOptions::unordered())
            .unwrap();
        first.close().unwrap();

        let second = connector.connect("mem://", "db", "history").unwrap();
        let (filter, find) = HistoryOptions::new().to_query("x").unwrap();
        assert_eq!(second.find(&filter, &find).unwrap().len(), 1);
        assert_eq!(connector.document_count("db", "history").unwrap(), 1);
        assert_eq!(connector.document_count("db", "other").unwrap(), 0);
    }
}

// Common test utilities for history store integration tests

#![allow(dead_code)]

use statelog::{Connector, DocumentBackend, HistoryStore, ManualScheduler, StoreConfig};
use statelog_core::{
    BulkWriteOptions, BulkWriteSummary, Error, FindOptions, IndexSpec, RangeFilter, Result,
    StoredDocument, WriteOp,
};
use statelog_docstore::MemoryConnector;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DB: &str = "state_history";
pub const COLLECTION: &str = "history";
pub const INTERVAL: Duration = Duration::from_millis(1000);

/// Switches shared by a [`FlakyConnector`] and every backend it opened
#[derive(Default)]
pub struct Faults {
    pub offline: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_index: AtomicBool,
    pub fail_find: AtomicBool,
    pub fail_close: AtomicBool,
    pub indexes: Mutex<Vec<IndexSpec>>,
    pub bulk_writes: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Faults {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn bulk_writes(&self) -> usize {
        self.bulk_writes.load(Ordering::SeqCst)
    }
}

/// In-memory connector whose backends can be made to fail
#[derive(Clone, Default)]
pub struct FlakyConnector {
    pub memory: MemoryConnector,
    pub faults: Arc<Faults>,
}

impl FlakyConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self) -> usize {
        self.memory
            .document_count(DB, COLLECTION)
            .expect("document count")
    }
}

impl Connector for FlakyConnector {
    fn connect(
        &self,
        url: &str,
        database: &str,
        collection: &str,
    ) -> Result<Arc<dyn DocumentBackend>> {
        if self.faults.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection refused".to_string()));
        }
        let inner = self.memory.connect(url, database, collection)?;
        Ok(Arc::new(FlakyBackend {
            inner,
            faults: self.faults.clone(),
        }))
    }
}

pub struct FlakyBackend {
    inner: Arc<dyn DocumentBackend>,
    faults: Arc<Faults>,
}

impl DocumentBackend for FlakyBackend {
    fn create_index(&self, index: &IndexSpec) -> Result<()> {
        if self.faults.fail_index.load(Ordering::SeqCst) {
            return Err(Error::Connection("not authorized to create index".to_string()));
        }
        self.faults.indexes.lock().unwrap().push(index.clone());
        self.inner.create_index(index)
    }

    fn bulk_write(&self, ops: &[WriteOp], options: BulkWriteOptions) -> Result<BulkWriteSummary> {
        self.faults.bulk_writes.fetch_add(1, Ordering::SeqCst);
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection reset by peer".to_string()));
        }
        self.inner.bulk_write(ops, options)
    }

    fn find(&self, filter: &RangeFilter, options: &FindOptions) -> Result<Vec<StoredDocument>> {
        if self.faults.fail_find.load(Ordering::SeqCst) || self.faults.offline.load(Ordering::SeqCst)
        {
            return Err(Error::Connection("query timed out".to_string()));
        }
        self.inner.find(filter, options)
    }

    fn close(&self) -> Result<()> {
        self.faults.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close()?;
        if self.faults.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Connection("socket already closed".to_string()));
        }
        Ok(())
    }
}

/// Store over a [`FlakyConnector`] with a virtual clock
pub struct Harness {
    pub store: HistoryStore,
    pub connector: FlakyConnector,
    pub scheduler: Arc<ManualScheduler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let connector = FlakyConnector::new();
        let scheduler = Arc::new(ManualScheduler::new());
        let store =
            HistoryStore::with_components(config, Arc::new(connector.clone()), scheduler.clone());
        Self {
            store,
            connector,
            scheduler,
        }
    }

    pub fn connected() -> Self {
        let harness = Self::new();
        assert!(harness.store.connect("mem://", DB));
        harness
    }

    pub fn faults(&self) -> &Faults {
        &self.connector.faults
    }

    /// Let the debounce interval elapse
    pub fn elapse(&self) -> usize {
        self.scheduler.advance(INTERVAL)
    }
}

//! The history store handle
//!
//! [`HistoryStore`] ties the pieces together: a backend opened through a
//! [`Connector`], a [`BufferedWriter`] flushing into it, and the range query
//! path reading from it. The public methods are fail-soft; each has a
//! `try_*` twin returning the underlying [`Error`].

use crate::config::StoreConfig;
use statelog_core::{
    Connector, DocumentBackend, Error, HistoryEntry, HistoryOptions, IndexSpec, Record, Result,
    State, StoredDocument, WriteOp,
};
use statelog_docstore::DefaultConnector;
use statelog_writer::{
    AppendOutcome, BackendSink, BufferedWriter, FlushOutcome, Scheduler, ThreadScheduler,
    WriterStats,
};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// An open backend together with the writer flushing into it
struct Session {
    backend: Arc<dyn DocumentBackend>,
    writer: Arc<BufferedWriter>,
    url: String,
    database: String,
}

struct StoreInner {
    config: StoreConfig,
    connector: Arc<dyn Connector>,
    scheduler: Arc<dyn Scheduler>,
    session: RwLock<Option<Session>>,
    // Serializes connect and close
    lifecycle: Mutex<()>,
}

impl StoreInner {
    fn writer(&self) -> Result<Arc<BufferedWriter>> {
        let session = self.session.read().map_err(|_| Error::LockPoisoned)?;
        session
            .as_ref()
            .map(|session| session.writer.clone())
            .ok_or(Error::NotConnected)
    }

    fn connect(&self, url: &str, database: &str) -> Result<()> {
        if url.is_empty() {
            return Err(Error::Connection("url must not be empty".to_string()));
        }
        if database.is_empty() {
            return Err(Error::Connection("database name must not be empty".to_string()));
        }

        let _lifecycle = self.lifecycle.lock().map_err(|_| Error::LockPoisoned)?;

        if let Err(e) = self.close_session() {
            warn!(error = %e, "Previous connection did not close cleanly");
        }

        let collection = self.config.collection.as_str();
        let backend = self.connector.connect(url, database, collection)?;

        if let Err(e) = backend.create_index(&IndexSpec::history()) {
            release(backend.as_ref());
            return Err(Error::Connection(format!(
                "failed to create history index: {}",
                e
            )));
        }

        let sink = Arc::new(BackendSink::new(backend.clone()));
        let writer = match BufferedWriter::new(
            self.config.writer_config(),
            sink,
            self.scheduler.clone(),
        ) {
            Ok(writer) => writer,
            Err(e) => {
                release(backend.as_ref());
                return Err(e);
            }
        };

        let mut session = self.session.write().map_err(|_| Error::LockPoisoned)?;
        *session = Some(Session {
            backend,
            writer,
            url: url.to_string(),
            database: database.to_string(),
        });

        info!(url, database, collection, "History store connected");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().map_err(|_| Error::LockPoisoned)?;
        self.close_session()
    }

    /// Drain and release the current session. The caller holds `lifecycle`.
    fn close_session(&self) -> Result<()> {
        let writer = match self.writer() {
            Ok(writer) => writer,
            Err(Error::NotConnected) => return Ok(()),
            Err(e) => return Err(e),
        };

        let drained = writer.flush();
        if let Err(e) = &drained {
            warn!(error = %e, "Final flush failed while closing");
        }

        // Exclusive from here on: no query or append can reach the backend
        let session = self
            .session
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .take();
        let Some(session) = session else {
            return Ok(());
        };

        // Appends that slipped in between the final flush and the swap
        if drained.is_ok() && session.writer.pending() > 0 {
            if let Err(e) = session.writer.flush() {
                warn!(error = %e, "Flush of late records failed while closing");
            }
        }

        match session.writer.shutdown() {
            Ok(0) => {}
            Ok(dropped) => error!(
                dropped,
                url = %session.url,
                "Unflushed records discarded on close"
            ),
            Err(e) => warn!(error = %e, "Writer shutdown failed"),
        }

        release(session.backend.as_ref());
        info!(url = %session.url, database = %session.database, "History store closed");

        drained.map(|_| ())
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "History store dropped without a clean close");
        }
    }
}

/// Close a backend, logging instead of failing
fn release(backend: &dyn DocumentBackend) {
    if let Err(e) = backend.close() {
        debug!(error = %e, "Ignoring error while closing backend");
    }
}

/// Buffered history store for time-stamped state records.
///
/// Writes are buffered and flushed in batches, either when
/// `flush_threshold` records are pending or `flush_interval` after the
/// first unflushed record. [`store`](Self::store) returns before the
/// record is persisted; a failed flush is retried on the next trigger, so
/// delivery is at-least-once.
///
/// Cloning is cheap and clones share one connection. Dropping the last
/// clone closes the store.
///
/// # Examples
///
/// ```rust,no_run
/// use statelog::{HistoryOptions, HistoryStore, State};
///
/// let store = HistoryStore::new();
/// assert!(store.connect("mem://", "plant"));
///
/// store.store("sensor.temp", State::new(21.5, 1_700_000_000_000).with_ack(true));
/// store.flush();
///
/// let history = store.get_history("sensor.temp", &HistoryOptions::new());
/// assert_eq!(history.len(), 1);
/// store.close();
/// ```
#[derive(Clone)]
pub struct HistoryStore {
    inner: Arc<StoreInner>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    /// Store with the default configuration, URL connector and timer thread
    pub fn new() -> Self {
        Self::with_components(
            StoreConfig::default(),
            Arc::new(DefaultConnector::new()),
            Arc::new(ThreadScheduler::new()),
        )
    }

    /// Store with a custom configuration.
    ///
    /// The configuration is checked when connecting.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_components(
            config,
            Arc::new(DefaultConnector::new()),
            Arc::new(ThreadScheduler::new()),
        )
    }

    /// Store with an explicit connector and flush timer scheduler
    pub fn with_components(
        config: StoreConfig,
        connector: Arc<dyn Connector>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                connector,
                scheduler,
                session: RwLock::new(None),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    /// Connect to `url` and select `database`.
    ///
    /// Replaces any existing connection, draining it first. Returns `false`
    /// on failure; the store is then not connected.
    pub fn connect(&self, url: &str, database: &str) -> bool {
        match self.try_connect(url, database) {
            Ok(()) => true,
            Err(e) => {
                warn!(url, database, error = %e, "Failed to connect history store");
                false
            }
        }
    }

    /// Like [`connect`](Self::connect), returning the error
    pub fn try_connect(&self, url: &str, database: &str) -> Result<()> {
        self.inner.config.validate()?;
        self.inner.connect(url, database)
    }

    /// Connect using the configured URL and database
    pub fn connect_with_config(&self) -> bool {
        let config = &self.inner.config;
        self.connect(&config.url, &config.database)
    }

    /// Like [`connect_with_config`](Self::connect_with_config), returning the error
    pub fn try_connect_with_config(&self) -> Result<()> {
        let config = &self.inner.config;
        self.try_connect(&config.url, &config.database)
    }

    /// Returns true while a backend connection is open
    pub fn is_connected(&self) -> bool {
        self.inner
            .session
            .read()
            .map(|session| session.is_some())
            .unwrap_or(false)
    }

    /// Buffer a state for `id`.
    ///
    /// `true` means the record was accepted, not that it is persisted.
    /// `false` when not connected or the record is invalid.
    pub fn store(&self, id: &str, state: State) -> bool {
        match self.try_store(id, state) {
            Ok(()) => true,
            Err(e) => {
                warn!(id, error = %e, "Rejected state record");
                false
            }
        }
    }

    /// Like [`store`](Self::store), returning the error.
    ///
    /// A flush triggered by this call that fails is absorbed and `Ok` is
    /// still returned: the batch is requeued, or dropped if the backend
    /// can never write it.
    pub fn try_store(&self, id: &str, state: State) -> Result<()> {
        let writer = self.inner.writer()?;
        let document = StoredDocument::try_from(Record::new(id, state)?)?;

        match writer.append(WriteOp::InsertOne(document))? {
            AppendOutcome::Requeued => {
                debug!(id, "Threshold flush failed; records stay buffered")
            }
            AppendOutcome::Discarded => {
                debug!(id, "Threshold flush rejected by the backend; batch dropped")
            }
            AppendOutcome::Buffered | AppendOutcome::Flushed(_) => {}
        }
        Ok(())
    }

    /// History of `id` matching `options`, timestamps in epoch milliseconds.
    ///
    /// Empty when nothing matches, when not connected, or when the query
    /// fails. Records still buffered are not included.
    pub fn get_history(&self, id: &str, options: &HistoryOptions) -> Vec<HistoryEntry> {
        match self.try_get_history(id, options) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(id, error = %e, "History query failed; returning no entries");
                Vec::new()
            }
        }
    }

    /// Like [`get_history`](Self::get_history), returning the error
    pub fn try_get_history(&self, id: &str, options: &HistoryOptions) -> Result<Vec<HistoryEntry>> {
        let session = self.inner.session.read().map_err(|_| Error::LockPoisoned)?;
        let session = session.as_ref().ok_or(Error::NotConnected)?;

        let (filter, find) = options.to_query(id)?;
        let documents = session
            .backend
            .find(&filter, &find)
            .map_err(|e| Error::Query(e.to_string()))?;

        Ok(documents.into_iter().map(HistoryEntry::from).collect())
    }

    /// Flush pending records now and wait for the write to finish.
    ///
    /// Returns `false` when not connected or the write failed; failed
    /// records stay buffered.
    pub fn flush(&self) -> bool {
        match self.try_flush() {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Explicit flush failed");
                false
            }
        }
    }

    /// Like [`flush`](Self::flush), returning the outcome
    pub fn try_flush(&self) -> Result<FlushOutcome> {
        self.inner.writer()?.flush()
    }

    /// Drain the buffer and close the connection.
    ///
    /// A no-op when not connected. Errors are logged, never returned.
    pub fn close(&self) {
        if let Err(e) = self.try_close() {
            warn!(error = %e, "History store closed with errors");
        }
    }

    /// Like [`close`](Self::close).
    ///
    /// The connection is released even on error; an `Err` means the final
    /// flush failed and the records it carried were discarded.
    pub fn try_close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Number of records waiting for a flush
    pub fn pending_writes(&self) -> usize {
        self.inner
            .writer()
            .map(|writer| writer.pending())
            .unwrap_or(0)
    }

    /// Writer counters for the current connection (zeroed when not connected)
    pub fn writer_stats(&self) -> WriterStats {
        self.inner
            .writer()
            .map(|writer| writer.stats())
            .unwrap_or_default()
    }

    /// The store's configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }
}

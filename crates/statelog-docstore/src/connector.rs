//! URL based backend selection
//!
//! | URL                          | Backend                                         |
//! |------------------------------|-------------------------------------------------|
//! | `mem://`                     | [`MemoryBackend`](crate::MemoryBackend)         |
//! | `file://<dir>`               | [`FileBackend`] at `<dir>/<db>/<coll>.log`      |
//! | `file://<dir>?sync=none`     | same, without fsync after each batch            |
//!
//! Database and collection names become path segments of file collections,
//! so they must be plain names: no separators, no `.` or `..`.

use crate::file::FileBackend;
use crate::memory::MemoryConnector;
use crate::SyncMode;
use statelog_core::{Connector, DocumentBackend, Error, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where a URL points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// In-memory collection
    Memory,
    /// Collection log files under a directory
    File { dir: PathBuf, sync_mode: SyncMode },
}

impl Location {
    /// Parse a connection URL
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(rest) = url.strip_prefix("mem://") {
            if rest.contains('?') {
                return Err(Error::Connection(format!("mem:// takes no options: {}", url)));
            }
            return Ok(Location::Memory);
        }

        if let Some(rest) = url.strip_prefix("file://") {
            let (dir, query) = match rest.split_once('?') {
                Some((dir, query)) => (dir, Some(query)),
                None => (rest, None),
            };
            if dir.is_empty() {
                return Err(Error::Connection(format!("file:// url has no path: {}", url)));
            }

            let mut sync_mode = SyncMode::Sync;
            for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some(("sync", value)) => {
                        sync_mode = value.parse().map_err(|_| {
                            Error::Connection(format!("unknown sync mode: {}", value))
                        })?
                    }
                    _ => {
                        return Err(Error::Connection(format!("unknown url option: {}", pair)))
                    }
                }
            }

            return Ok(Location::File {
                dir: PathBuf::from(dir),
                sync_mode,
            });
        }

        Err(Error::Connection(format!("unsupported url scheme: {}", url)))
    }
}

/// Checks that `name` stays a single path segment under the data directory
fn check_segment(kind: &str, name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || name.contains(['/', '\\']) {
        return Err(Error::Connection(format!(
            "invalid {} name for a file collection: {:?}",
            kind, name
        )));
    }
    Ok(())
}

/// Connector understanding `mem://` and `file://` URLs.
///
/// In-memory collections belong to the connector instance.
#[derive(Clone, Default)]
pub struct DefaultConnector {
    memory: MemoryConnector,
}

impl DefaultConnector {
    /// Creates a connector
    pub fn new() -> Self {
        Self::default()
    }

    /// The connector serving `mem://` URLs
    pub fn memory(&self) -> &MemoryConnector {
        &self.memory
    }
}

impl Connector for DefaultConnector {
    fn connect(
        &self,
        url: &str,
        database: &str,
        collection: &str,
    ) -> Result<Arc<dyn DocumentBackend>> {
        match Location::parse(url)? {
            Location::Memory => self.memory.connect(url, database, collection),
            Location::File { dir, sync_mode } => {
                check_segment("database", database)?;
                check_segment("collection", collection)?;
                let path = dir.join(database).join(format!("{}.log", collection));
                debug!(path = %path.display(), ?sync_mode, "Opening file collection");
                Ok(Arc::new(FileBackend::open(path, sync_mode)?))
            }
        }
    }
}

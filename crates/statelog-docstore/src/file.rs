// File-backed collection
//
// Every bulk write is appended to `<collection>.log` as checksummed
// frames (more than one when the batch exceeds the frame limit), and the
// whole log is replayed into an in-memory index on open. A frame or header
// cut short by a crash is truncated away during replay; a frame with a bad
// checksum fails the open.

use crate::codec::{self, HEADER_LEN, MAX_FRAME_LEN};
use crate::memory::CollectionData;
use crate::SyncMode;
use statelog_core::{
    BulkWriteOptions, BulkWriteSummary, DocumentBackend, Error, FindOptions, IndexSpec, OpError,
    RangeFilter, Result, StoredDocument, WriteOp,
};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

struct CollectionLog {
    file: File,
    len: u64,
    sync_mode: SyncMode,
    // Set when a partial frame could not be cut off again
    torn: bool,
}

impl CollectionLog {
    fn new(file: File, len: u64, sync_mode: SyncMode) -> Self {
        Self {
            file,
            len,
            sync_mode,
            torn: false,
        }
    }

    fn append(&mut self, frame: &[u8]) -> Result<()> {
        let written = self.file.write_all(frame).and_then(|_| match self.sync_mode {
            SyncMode::Sync => self.file.sync_data(),
            SyncMode::None => Ok(()),
        });

        if let Err(e) = written {
            // Cut off whatever part of the frame reached the file
            let len = self.len;
            let rollback = self
                .file
                .set_len(len)
                .and_then(|_| self.file.seek(SeekFrom::Start(len)).map(|_| ()));
            if let Err(rollback_err) = rollback {
                self.torn = true;
                error!(
                    len,
                    error = %rollback_err,
                    "Failed to roll back partial append"
                );
            }
            return Err(Error::Write(format!("Failed to append batch: {}", e)));
        }

        self.len += frame.len() as u64;
        Ok(())
    }
}

/// A collection persisted in a single append-only log file
pub struct FileBackend {
    path: PathBuf,
    data: RwLock<CollectionData>,
    log: Mutex<Option<CollectionLog>>,
    max_frame_len: usize,
}

impl FileBackend {
    /// Open or create the collection log at `path` and replay it
    pub fn open(path: impl AsRef<Path>, sync_mode: SyncMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Connection(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::Connection(format!("Failed to open {:?}: {}", path, e)))?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut data = CollectionData::new();
        let header = codec::encode_header();
        let len = if contents.len() < HEADER_LEN && header.starts_with(&contents) {
            if !contents.is_empty() {
                warn!(path = %path.display(), "Rewriting incomplete collection log header");
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
            }
            file.write_all(&header)?;
            file.sync_all()?;
            HEADER_LEN as u64
        } else {
            codec::decode_header(&contents)?;
            let valid_len = Self::replay(&contents, &mut data)?;

            if valid_len < contents.len() {
                warn!(
                    path = %path.display(),
                    discarded_bytes = contents.len() - valid_len,
                    "Truncating incomplete frame at end of collection log"
                );
                file.set_len(valid_len as u64)?;
            }
            file.seek(SeekFrom::Start(valid_len as u64))?;
            valid_len as u64
        };

        debug!(path = %path.display(), documents = data.len(), "Opened collection log");

        Ok(Self {
            path,
            data: RwLock::new(data),
            log: Mutex::new(Some(CollectionLog::new(file, len, sync_mode))),
            max_frame_len: MAX_FRAME_LEN,
        })
    }

    /// Limit frame payloads to `max_frame_len` bytes (at most [`MAX_FRAME_LEN`])
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.min(MAX_FRAME_LEN);
        self
    }

    /// Replay all complete frames, returning the length of the valid prefix
    fn replay(contents: &[u8], data: &mut CollectionData) -> Result<usize> {
        let mut offset = HEADER_LEN;
        while offset < contents.len() {
            match codec::decode_batch(&contents[offset..])? {
                Some((docs, consumed)) => {
                    for doc in docs {
                        data.insert(doc);
                    }
                    offset += consumed;
                }
                None => break,
            }
        }
        Ok(offset)
    }

    /// Path of the collection log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of documents in the collection
    pub fn document_count(&self) -> Result<usize> {
        Ok(self.data.read().map_err(|_| Error::LockPoisoned)?.len())
    }

    fn check_open(&self) -> Result<()> {
        let log = self.log.lock().map_err(|_| Error::LockPoisoned)?;
        if log.is_none() {
            return Err(Error::Connection("collection log is closed".to_string()));
        }
        Ok(())
    }
}

impl DocumentBackend for FileBackend {
    fn create_index(&self, index: &IndexSpec) -> Result<()> {
        self.check_open()?;
        let mut data = self.data.write().map_err(|_| Error::LockPoisoned)?;
        data.create_index(index)
    }

    fn bulk_write(&self, ops: &[WriteOp], _options: BulkWriteOptions) -> Result<BulkWriteSummary> {
        let framed = codec::frame_batch(ops.iter().map(WriteOp::document), self.max_frame_len)?;
        let write_errors: Vec<OpError> = framed
            .rejected
            .into_iter()
            .map(|(index, e)| OpError {
                index,
                message: e.to_string(),
            })
            .collect();

        // Hold the log lock until the index is updated so readers never see
        // a batch that is not on disk yet.
        let mut guard = self.log.lock().map_err(|_| Error::LockPoisoned)?;
        let log = guard
            .as_mut()
            .ok_or_else(|| Error::Connection("collection log is closed".to_string()))?;
        let mut data = self.data.write().map_err(|_| Error::LockPoisoned)?;

        let mut inserted = 0;
        for (frame, positions) in &framed.frames {
            if let Err(e) = log.append(frame) {
                if log.torn {
                    *guard = None;
                    warn!(
                        path = %self.path.display(),
                        "Collection log closed after a failed append; reconnect to recover"
                    );
                }
                return Err(e);
            }
            for &index in positions {
                data.insert(ops[index].document().clone());
            }
            inserted += positions.len();
        }

        Ok(BulkWriteSummary {
            inserted,
            write_errors,
        })
    }

    fn find(&self, filter: &RangeFilter, options: &FindOptions) -> Result<Vec<StoredDocument>> {
        self.check_open()?;
        let data = self.data.read().map_err(|_| Error::LockPoisoned)?;
        Ok(data.find(filter, options))
    }

    fn close(&self) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| Error::LockPoisoned)?;
        if let Some(log) = log.take() {
            log.file.sync_all()?;
        }
        Ok(())
    }
}

// Common test utilities for docstore integration tests

use statelog_core::{Record, State, StoredDocument, WriteOp};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Test fixture that creates a temporary data directory
pub struct StoreFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub data_path: PathBuf,
}

impl StoreFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let data_path = temp_dir.path().join("data");
        fs::create_dir_all(&data_path).expect("Failed to create data directory");

        Self {
            temp_dir,
            data_path,
        }
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.data_path.display())
    }

    pub fn log_path(&self, database: &str, collection: &str) -> PathBuf {
        self.data_path
            .join(database)
            .join(format!("{}.log", collection))
    }
}

impl Default for StoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn insert(id: &str, ts: i64, val: serde_json::Value) -> WriteOp {
    let record = Record::new(id, State::new(val, ts)).expect("valid record");
    WriteOp::InsertOne(StoredDocument::try_from(record).expect("valid timestamp"))
}

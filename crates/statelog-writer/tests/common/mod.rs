// Common test utilities for writer integration tests

use statelog_core::{BulkWriteSummary, Error, Record, Result, State, StoredDocument, WriteOp};
use statelog_writer::BatchSink;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Sink that records every submitted batch as `(id, ts)` pairs
#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<Vec<(String, i64)>>>,
    pub offline: AtomicBool,
    /// Submissions currently inside `submit`
    pub in_flight: AtomicUsize,
    /// Highest value `in_flight` ever reached
    pub max_in_flight: AtomicUsize,
    /// Held by a test to park submissions
    pub gate: Mutex<()>,
    pub entered: AtomicBool,
    pub submit_delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            submit_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<(String, i64)>> {
        self.batches.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn batch_timestamps(&self) -> Vec<Vec<i64>> {
        self.batches()
            .into_iter()
            .map(|batch| batch.into_iter().map(|(_, ts)| ts).collect())
            .collect()
    }
}

impl BatchSink for RecordingSink {
    fn submit(&self, batch: &[WriteOp]) -> Result<BulkWriteSummary> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.entered.store(true, Ordering::SeqCst);

        let result = {
            let _gate = self.gate.lock().unwrap();
            if let Some(delay) = self.submit_delay {
                std::thread::sleep(delay);
            }
            if self.offline.load(Ordering::SeqCst) {
                Err(Error::Connection("backend unreachable".to_string()))
            } else {
                self.batches.lock().unwrap().push(
                    batch
                        .iter()
                        .map(|op| (op.document().id.clone(), op.document().ts_millis()))
                        .collect(),
                );
                Ok(BulkWriteSummary {
                    inserted: batch.len(),
                    write_errors: Vec::new(),
                })
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn op(id: &str, ts: i64) -> WriteOp {
    let record = Record::new(id, State::new(ts, ts)).expect("valid record");
    WriteOp::InsertOne(StoredDocument::try_from(record).expect("valid timestamp"))
}

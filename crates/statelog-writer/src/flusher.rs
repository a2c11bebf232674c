//! Flush scheduling
//!
//! [`BufferedWriter`] owns the write buffer and decides when it is flushed:
//!
//! ```text
//! append ──► buffer ──len >= threshold──► flush (caller's thread)
//!               │
//!               └─first pending op──► arm timer ──interval──► flush (timer)
//!
//! flush: take buffer + disarm timer ──► sink.submit(batch)
//!                                          │ Err (transient)
//!                                          ├──► requeue batch in front
//!                                          │ Err (bad input)
//!                                          └──► drop batch, log error
//! ```
//!
//! Two locks are involved. `state` guards the buffer and the timer slot and
//! is only held for in-memory work. `flush_gate` is held for the whole of a
//! flush, so at most one batch is in flight and batches reach the sink in
//! the order they were taken. Appends never wait on `flush_gate`, except
//! for the append that reaches the threshold and runs the flush itself.

use crate::buffer::WriteBuffer;
use crate::executor::BatchSink;
use crate::timer::{Scheduler, TimerHandle};
use crate::WriterConfig;
use statelog_core::{BulkWriteSummary, Error, Result, WriteOp};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, warn};

/// What started a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The buffer reached the size threshold
    Threshold,
    /// The debounce timer fired
    Timer,
    /// Requested explicitly (including on close)
    Forced,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushTrigger::Threshold => write!(f, "threshold"),
            FlushTrigger::Timer => write!(f, "timer"),
            FlushTrigger::Forced => write!(f, "forced"),
        }
    }
}

/// Result of a flush that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The batch was submitted
    Written(BulkWriteSummary),
    /// Nothing was pending
    Empty,
    /// A stale timer fired, or the writer is shut down
    Skipped,
}

/// Result of an append
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Buffered; a timer flush is pending
    Buffered,
    /// The append reached the threshold and the flush it triggered succeeded
    Flushed(BulkWriteSummary),
    /// The append reached the threshold but the flush failed; the batch was
    /// requeued
    Requeued,
    /// The append reached the threshold but the backend rejected the batch
    /// as unwritable; it was dropped
    Discarded,
}

/// Counters describing writer activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Flushes started by the size threshold
    pub threshold_flushes: u64,
    /// Flushes started by the debounce timer
    pub timer_flushes: u64,
    /// Flushes requested explicitly
    pub forced_flushes: u64,
    /// Flushes whose submission failed
    pub failed_flushes: u64,
    /// Records acknowledged by the backend
    pub records_written: u64,
    /// Records put back after a failed flush (counted once per failure)
    pub records_requeued: u64,
    /// Records dropped because the backend can never write them
    pub records_discarded: u64,
    /// Operations the backend refused individually
    pub write_errors: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    threshold_flushes: AtomicU64,
    timer_flushes: AtomicU64,
    forced_flushes: AtomicU64,
    failed_flushes: AtomicU64,
    records_written: AtomicU64,
    records_requeued: AtomicU64,
    records_discarded: AtomicU64,
    write_errors: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            threshold_flushes: self.threshold_flushes.load(Ordering::Relaxed),
            timer_flushes: self.timer_flushes.load(Ordering::Relaxed),
            forced_flushes: self.forced_flushes.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_requeued: self.records_requeued.load(Ordering::Relaxed),
            records_discarded: self.records_discarded.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }

    fn count_trigger(&self, trigger: FlushTrigger) {
        let counter = match trigger {
            FlushTrigger::Threshold => &self.threshold_flushes,
            FlushTrigger::Timer => &self.timer_flushes,
            FlushTrigger::Forced => &self.forced_flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct ArmedTimer {
    generation: u64,
    handle: TimerHandle,
}

struct WriterState {
    buffer: WriteBuffer,
    timer: Option<ArmedTimer>,
    next_generation: u64,
    shut_down: bool,
}

impl WriterState {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.cancel();
        }
    }

    fn armed_generation(&self) -> Option<u64> {
        self.timer.as_ref().map(|timer| timer.generation)
    }
}

/// Buffers write operations and flushes them to a [`BatchSink`].
///
/// Created with [`BufferedWriter::new`], which returns an `Arc` because
/// armed timers hold a weak reference back to the writer.
pub struct BufferedWriter {
    config: WriterConfig,
    sink: Arc<dyn BatchSink>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<WriterState>,
    flush_gate: Mutex<()>,
    stats: StatsCounters,
    self_ref: Weak<BufferedWriter>,
}

impl BufferedWriter {
    /// Create a writer flushing into `sink`, timed by `scheduler`
    pub fn new(
        config: WriterConfig,
        sink: Arc<dyn BatchSink>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new_cyclic(|self_ref| Self {
            config,
            sink,
            scheduler,
            state: Mutex::new(WriterState {
                buffer: WriteBuffer::new(),
                timer: None,
                next_generation: 0,
                shut_down: false,
            }),
            flush_gate: Mutex::new(()),
            stats: StatsCounters::default(),
            self_ref: self_ref.clone(),
        }))
    }

    /// Buffer one operation.
    ///
    /// Reaching the threshold flushes on the calling thread before this
    /// returns; otherwise a timer is armed if none is. A failed threshold
    /// flush is absorbed and reported as [`AppendOutcome::Requeued`], or
    /// [`AppendOutcome::Discarded`] if the batch could never be written. Fails with [`Error::NotConnected`]
    /// after [`shutdown`](Self::shutdown).
    pub fn append(&self, op: WriteOp) -> Result<AppendOutcome> {
        let threshold_reached = {
            let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
            if state.shut_down {
                return Err(Error::NotConnected);
            }

            state.buffer.push(op);
            if state.buffer.len() >= self.config.flush_threshold {
                true
            } else {
                if state.timer.is_none() {
                    self.arm(&mut state);
                }
                false
            }
        };

        if !threshold_reached {
            return Ok(AppendOutcome::Buffered);
        }

        match self.run_flush(FlushTrigger::Threshold, None) {
            Ok(FlushOutcome::Written(summary)) => Ok(AppendOutcome::Flushed(summary)),
            Ok(_) => Ok(AppendOutcome::Buffered),
            Err(Error::LockPoisoned) => Err(Error::LockPoisoned),
            Err(Error::Write(_)) => Ok(AppendOutcome::Requeued),
            Err(_) => Ok(AppendOutcome::Discarded),
        }
    }

    /// Flush whatever is pending and wait for the submission to finish.
    ///
    /// A transient failure requeues the batch and returns [`Error::Write`].
    /// Any other failure drops the batch and returns the sink's error.
    pub fn flush(&self) -> Result<FlushOutcome> {
        self.run_flush(FlushTrigger::Forced, None)
    }

    /// Stop accepting operations, disarm the timer and discard anything
    /// still pending. Waits for an in-flight flush. Returns the number of
    /// discarded operations.
    pub fn shutdown(&self) -> Result<usize> {
        let _gate = self.flush_gate.lock().map_err(|_| Error::LockPoisoned)?;
        let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
        state.shut_down = true;
        state.disarm();
        Ok(state.buffer.clear())
    }

    /// Number of operations waiting for a flush
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.buffer.len())
            .unwrap_or(0)
    }

    /// Returns true while a debounce timer is armed
    pub fn timer_armed(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.timer.is_some())
            .unwrap_or(false)
    }

    /// Activity counters
    pub fn stats(&self) -> WriterStats {
        self.stats.snapshot()
    }

    /// The writer's configuration
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    fn arm(&self, state: &mut WriterState) {
        let generation = state.next_generation;
        state.next_generation += 1;

        let writer = self.self_ref.clone();
        let task = Box::new(move || {
            if let Some(writer) = writer.upgrade() {
                writer.on_timer(generation);
            }
        });

        match self.scheduler.schedule(self.config.flush_interval, task) {
            Ok(handle) => state.timer = Some(ArmedTimer { generation, handle }),
            Err(e) => warn!(
                error = %e,
                pending = state.buffer.len(),
                "Failed to arm flush timer; pending records wait for the next trigger"
            ),
        }
    }

    fn on_timer(&self, generation: u64) {
        // Failures are logged and requeued inside run_flush
        let _ = self.run_flush(FlushTrigger::Timer, Some(generation));
    }

    fn run_flush(&self, trigger: FlushTrigger, generation: Option<u64>) -> Result<FlushOutcome> {
        let _gate = self.flush_gate.lock().map_err(|_| Error::LockPoisoned)?;

        let batch = {
            let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
            if state.shut_down {
                return Ok(FlushOutcome::Skipped);
            }
            if generation.is_some() && state.armed_generation() != generation {
                return Ok(FlushOutcome::Skipped);
            }
            state.disarm();
            state.buffer.take()
        };

        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        self.stats.count_trigger(trigger);
        let records = batch.len();

        match self.sink.submit(&batch) {
            Ok(summary) => {
                self.stats
                    .records_written
                    .fetch_add(summary.inserted as u64, Ordering::Relaxed);
                self.stats
                    .write_errors
                    .fetch_add(summary.write_errors.len() as u64, Ordering::Relaxed);
                debug!(
                    %trigger,
                    records,
                    inserted = summary.inserted,
                    "Flushed write batch"
                );
                Ok(FlushOutcome::Written(summary))
            }
            Err(e) if !e.is_transient() => {
                self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .records_discarded
                    .fetch_add(records as u64, Ordering::Relaxed);
                error!(
                    %trigger,
                    records,
                    error = %e,
                    "Flush rejected; batch discarded"
                );
                Err(e)
            }
            Err(e) => {
                self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .records_requeued
                    .fetch_add(records as u64, Ordering::Relaxed);
                self.requeue(batch)?;
                warn!(
                    %trigger,
                    records,
                    error = %e,
                    "Flush failed; batch requeued for the next attempt"
                );
                Err(Error::Write(e.to_string()))
            }
        }
    }

    fn requeue(&self, batch: Vec<WriteOp>) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
        state.buffer.requeue_front(batch);
        if state.timer.is_none() && !state.buffer.is_empty() {
            self.arm(&mut state);
        }
        Ok(())
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            state.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualScheduler;
    use statelog_core::{Record, State, StoredDocument};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<i64>>>,
        offline: AtomicBool,
        corrupt: AtomicBool,
    }

    impl BatchSink for RecordingSink {
        fn submit(&self, batch: &[WriteOp]) -> Result<BulkWriteSummary> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::Connection("offline".to_string()));
            }
            if self.corrupt.load(Ordering::SeqCst) {
                return Err(Error::Serialization("unencodable batch".to_string()));
            }
            self.batches
                .lock()
                .unwrap()
                .push(batch.iter().map(|op| op.document().ts_millis()).collect());
            Ok(BulkWriteSummary {
                inserted: batch.len(),
                write_errors: Vec::new(),
            })
        }
    }

    fn op(ts: i64) -> WriteOp {
        let record = Record::new("x", State::new(ts, ts)).unwrap();
        WriteOp::InsertOne(StoredDocument::try_from(record).unwrap())
    }

    fn setup(threshold: usize) -> (Arc<BufferedWriter>, Arc<RecordingSink>, Arc<ManualScheduler>) {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(ManualScheduler::new());
        let config = WriterConfig {
            flush_threshold: threshold,
            flush_interval: Duration::from_millis(1000),
        };
        let writer = BufferedWriter::new(config, sink.clone(), scheduler.clone()).unwrap();
        (writer, sink, scheduler)
    }

    #[test]
    fn test_first_append_arms_single_timer() {
        let (writer, _sink, scheduler) = setup(10);

        writer.append(op(1)).unwrap();
        writer.append(op(2)).unwrap();
        writer.append(op(3)).unwrap();

        assert!(writer.timer_armed());
        assert_eq!(scheduler.armed(), 1);
        assert_eq!(writer.pending(), 3);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let (writer, sink, scheduler) = setup(10);

        writer.append(op(1)).unwrap();
        writer.flush().unwrap();
        assert!(!writer.timer_armed());

        // A new op arms a fresh timer; the old generation must not flush it
        writer.on_timer(0);
        writer.append(op(2)).unwrap();
        writer.on_timer(0);
        assert_eq!(writer.pending(), 1);

        scheduler.advance(Duration::from_millis(1000));
        assert_eq!(*sink.batches.lock().unwrap(), vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_failed_flush_rearms_timer() {
        let (writer, sink, scheduler) = setup(10);
        sink.offline.store(true, Ordering::SeqCst);

        writer.append(op(1)).unwrap();
        scheduler.advance(Duration::from_millis(1000));
        assert_eq!(writer.pending(), 1);
        assert!(writer.timer_armed());

        sink.offline.store(false, Ordering::SeqCst);
        scheduler.advance(Duration::from_millis(1000));
        assert_eq!(writer.pending(), 0);
        assert_eq!(*sink.batches.lock().unwrap(), vec![vec![1]]);

        let stats = writer.stats();
        assert_eq!(stats.failed_flushes, 1);
        assert_eq!(stats.timer_flushes, 2);
        assert_eq!(stats.records_requeued, 1);
        assert_eq!(stats.records_written, 1);
    }

    #[test]
    fn test_threshold_flush_failure_is_absorbed() {
        let (writer, sink, _scheduler) = setup(2);
        sink.offline.store(true, Ordering::SeqCst);

        assert_eq!(writer.append(op(1)).unwrap(), AppendOutcome::Buffered);
        assert_eq!(writer.append(op(2)).unwrap(), AppendOutcome::Requeued);
        assert_eq!(writer.pending(), 2);
    }

    #[test]
    fn test_rejected_batch_is_not_retried() {
        let (writer, sink, scheduler) = setup(10);
        sink.corrupt.store(true, Ordering::SeqCst);

        writer.append(op(1)).unwrap();
        writer.append(op(2)).unwrap();
        assert_eq!(scheduler.advance(Duration::from_millis(1000)), 1);
        assert_eq!(writer.pending(), 0);
        assert!(!writer.timer_armed());

        sink.corrupt.store(false, Ordering::SeqCst);
        writer.append(op(3)).unwrap();
        assert!(matches!(writer.flush(), Ok(FlushOutcome::Written(_))));
        assert_eq!(*sink.batches.lock().unwrap(), vec![vec![3]]);

        let stats = writer.stats();
        assert_eq!(stats.failed_flushes, 1);
        assert_eq!(stats.records_discarded, 2);
        assert_eq!(stats.records_requeued, 0);
        assert_eq!(stats.records_written, 1);
    }

    #[test]
    fn test_rejected_threshold_flush_reports_discard() {
        let (writer, sink, _scheduler) = setup(2);
        sink.corrupt.store(true, Ordering::SeqCst);

        assert_eq!(writer.append(op(1)).unwrap(), AppendOutcome::Buffered);
        assert_eq!(writer.append(op(2)).unwrap(), AppendOutcome::Discarded);
        assert_eq!(writer.pending(), 0);

        writer.append(op(3)).unwrap();
        assert!(matches!(writer.flush(), Err(Error::Serialization(_))));
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn test_shutdown_discards_and_rejects() {
        let (writer, sink, scheduler) = setup(10);
        writer.append(op(1)).unwrap();
        writer.append(op(2)).unwrap();

        assert_eq!(writer.shutdown().unwrap(), 2);
        assert_eq!(scheduler.armed(), 0);
        assert!(matches!(writer.append(op(3)), Err(Error::NotConnected)));
        assert_eq!(writer.flush().unwrap(), FlushOutcome::Skipped);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_flush_on_empty_buffer() {
        let (writer, _sink, _scheduler) = setup(10);
        assert_eq!(writer.flush().unwrap(), FlushOutcome::Empty);
        assert_eq!(writer.stats(), WriterStats::default());
    }
}

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use statelog_core::{BulkWriteSummary, Record, Result, State, StoredDocument, WriteOp};
use statelog_writer::{BatchSink, BufferedWriter, ManualScheduler, WriterConfig};
use std::sync::Arc;
use std::time::Duration;

struct DiscardSink;

impl BatchSink for DiscardSink {
    fn submit(&self, batch: &[WriteOp]) -> Result<BulkWriteSummary> {
        Ok(BulkWriteSummary {
            inserted: batch.len(),
            write_errors: Vec::new(),
        })
    }
}

fn make_ops(count: usize) -> Vec<WriteOp> {
    (0..count as i64)
        .map(|ts| {
            let record = Record::new("bench.sensor", State::new(ts as f64 * 0.5, ts)).unwrap();
            WriteOp::InsertOne(StoredDocument::try_from(record).unwrap())
        })
        .collect()
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for threshold in [100usize, 1000] {
        group.bench_with_input(
            BenchmarkId::new("threshold", threshold),
            &threshold,
            |b, &threshold| {
                let ops = make_ops(10_000);
                b.iter(|| {
                    let config = WriterConfig {
                        flush_threshold: threshold,
                        flush_interval: Duration::from_secs(1),
                    };
                    let writer = BufferedWriter::new(
                        config,
                        Arc::new(DiscardSink),
                        Arc::new(ManualScheduler::new()),
                    )
                    .unwrap();
                    for op in &ops {
                        black_box(writer.append(op.clone()).unwrap());
                    }
                    writer.flush().unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_append);
criterion_main!(benches);

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use statelog::{
    HistoryOptions, HistoryStore, ManualScheduler, MemoryConnector, SortOrder, State, StoreConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Arbitrary, Debug)]
enum StoreOp {
    Store { id: u8, ts: i64, val: i32, ack: Option<bool>, q: Option<i64> },
    History { id: u8, start: Option<i64>, end: Option<i64>, desc: bool, limit: Option<u8> },
    Advance { millis: u16 },
    Flush,
    Reconnect,
    Close,
}

fuzz_target!(|ops: Vec<StoreOp>| {
    let scheduler = Arc::new(ManualScheduler::new());
    let config = StoreConfig::default().with_flush_threshold(16);
    let store =
        HistoryStore::with_components(config, Arc::new(MemoryConnector::new()), scheduler.clone());
    if !store.connect("mem://", "fuzz") {
        return;
    }

    for op in ops.iter().take(200) {
        match op {
            StoreOp::Store { id, ts, val, ack, q } => {
                let mut state = State::new(*val, *ts);
                state.ack = *ack;
                state.q = *q;
                let _ = store.store(&format!("id{}", id % 4), state);
            }
            StoreOp::History { id, start, end, desc, limit } => {
                let options = HistoryOptions {
                    start: *start,
                    end: *end,
                    sort: if *desc { SortOrder::Descending } else { SortOrder::Ascending },
                    limit: limit.map(usize::from),
                };
                let entries = store.get_history(&format!("id{}", id % 4), &options);
                if let Some(limit) = options.limit {
                    assert!(entries.len() <= limit);
                }
                for pair in entries.windows(2) {
                    match options.sort {
                        SortOrder::Ascending => assert!(pair[0].ts <= pair[1].ts),
                        SortOrder::Descending => assert!(pair[0].ts >= pair[1].ts),
                    }
                }
            }
            StoreOp::Advance { millis } => {
                scheduler.advance(Duration::from_millis(u64::from(*millis)));
            }
            StoreOp::Flush => {
                let _ = store.flush();
            }
            StoreOp::Reconnect => {
                let _ = store.connect("mem://", "fuzz");
            }
            StoreOp::Close => store.close(),
        }
    }

    store.close();
    assert!(!store.is_connected());
});

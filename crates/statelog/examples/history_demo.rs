use statelog::{HistoryOptions, HistoryStore, State, StoreConfig};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== statelog History Demo ===\n");

    let dir = std::env::temp_dir().join("statelog-demo");
    let config = StoreConfig::default()
        .with_url(format!("file://{}?sync=none", dir.display()))
        .with_flush_interval(Duration::from_millis(200));

    let store = HistoryStore::with_config(config);
    store.try_connect_with_config()?;
    println!("1. Connected, history in {}", dir.display());

    let base = 1_700_000_000_000;
    for i in 0..10 {
        let state = State::new(20.0 + i as f64 * 0.5, base + i * 60_000)
            .with_ack(i % 2 == 0)
            .with_from("demo.sensor");
        store.try_store("sensor.temp", state)?;
    }
    println!("2. Buffered {} records", store.pending_writes());

    std::thread::sleep(Duration::from_millis(400));
    println!("3. After the debounce interval: {} pending", store.pending_writes());

    let options = HistoryOptions::new()
        .between(base + 2 * 60_000, base + 7 * 60_000)
        .descending()
        .with_limit(3);
    println!("4. Newest three entries between minute 2 and 7:");
    for entry in store.try_get_history("sensor.temp", &options)? {
        println!("   ts={} val={} ack={}", entry.ts, entry.val, entry.ack);
    }

    println!("5. Writer stats: {:?}", store.writer_stats());
    store.try_close()?;

    println!("\n=== History Demo Complete ===");
    Ok(())
}

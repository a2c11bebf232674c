use statelog::logging::LogConfig;
use statelog::{HistoryOptions, HistoryStore, State};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Debug level shows every flush; RUST_LOG overrides it
    let _guard = LogConfig::debug().init()?;

    println!("=== statelog Logging Demo ===\n");

    let store = HistoryStore::new();

    println!("1. Storing before connect (rejected, logged)...");
    store.store("sensor.temp", State::new(1, 1));

    println!("\n2. Connecting to an unknown scheme (fails, logged)...");
    store.connect("mongodb://localhost:27017", "demo");

    println!("\n3. Connecting in memory...");
    store.connect("mem://", "demo");
    store.store("sensor.temp", State::new(21.5, 1_700_000_000_000));
    store.flush();

    println!("\n4. Querying with inverted bounds (empty, logged)...");
    let entries = store.get_history("sensor.temp", &HistoryOptions::new().between(10, 1));
    println!("   {} entries", entries.len());

    println!("\n5. Closing...");
    store.close();

    println!("\n=== Logging Demo Complete ===");
    Ok(())
}

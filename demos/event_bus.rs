//! # Example: event_bus
//!
//! Two subscribers on one [`BroadcastBus`]: a [`LogWriter`] that writes every event
//! through `tracing`, and a slow consumer. Every queue is bounded (capacity 4) and
//! drops the oldest events when its consumer falls behind.
//!
//! ```text
//! publisher ─► BroadcastBus ─┬─► [queue: LogWriter]   (tracing)
//!                            └─► [queue: slow, cap 4] (DropOldest)
//! ```
//!
//! Requires the `logging` feature.
//!
//! ## Run
//! ```bash
//! cargo run --example event_bus --features logging
//! ```

use std::time::Duration;

use flightline::{BroadcastBus, Event, LogWriter, OverflowPolicy};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct PriceTick {
    sku: &'static str,
    price: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bus = BroadcastBus::new(OverflowPolicy::DropOldest, 4);

    // 1. Subscribers
    let logger = LogWriter::new().spawn(&bus);
    let mut slow = bus.subscribe();
    let slow_worker = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(ev) = slow.recv().await {
            if let Some(tick) = ev.payload_ref::<PriceTick>() {
                seen.push((ev.seq, tick.sku, tick.price));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        (seen, slow.dropped())
    });

    // 2. Publish a burst
    for (i, sku) in ["apple", "kiwi", "pear"].iter().cycle().take(12).enumerate() {
        let delivered = bus
            .publish(Event::custom("price_tick", PriceTick { sku: *sku, price: 100 + i as u64 }))
            .await;
        println!("published #{i} to {delivered} subscriber(s)");
        tokio::task::yield_now().await;
    }

    // 3. Close and collect
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.close();
    let written = logger.await?;
    let (seen, dropped) = slow_worker.await?;

    println!("log writer handled {written} event(s)");
    println!("slow consumer saw {} event(s), dropped {dropped}:", seen.len());
    for (seq, sku, price) in seen {
        println!("  seq={seq} {sku}={price}");
    }
    Ok(())
}

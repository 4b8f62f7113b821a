//! # Example: retry_with_backoff
//!
//! Demonstrates how [`RetryPolicy`] retries a failing operation with exponential
//! backoff and publishes its lifecycle onto a [`BroadcastBus`].
//!
//! The operation fails twice before succeeding, showing the doubling delay between
//! attempts.
//!
//! ## Flow
//! ```text
//! RetryPolicy::run()
//!   ├─► publish(AttemptStarting, attempt=1)
//!   ├─► op() → Err("boom #1")
//!   ├─► publish(AttemptFailed)
//!   ├─► publish(BackoffScheduled{delay=100ms})
//!   ├─► sleep(delay)
//!   ├─► attempt=2
//!   │     ├─► publish(AttemptStarting)
//!   │     ├─► op() → Err("boom #2")
//!   │     ├─► publish(AttemptFailed)
//!   │     ├─► publish(BackoffScheduled{delay=200ms})
//!   │     └─► sleep(delay)
//!   └─► attempt=3 → Ok("payload")
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example retry_with_backoff
//! ```

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use flightline::{BroadcastBus, FlightError, RetryPolicy};
use tracing_subscriber::EnvFilter;

static FAIL_COUNT: AtomicU32 = AtomicU32::new(0);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Bus + a subscriber that prints what the policy is doing
    let bus = BroadcastBus::unbounded();
    let events = bus.subscribe();
    let printer = tokio::spawn(async move {
        let mut events = events;
        while let Some(ev) = events.recv().await {
            println!(
                "[{:>3}] {:<18} attempt={:?} delay_ms={:?} reason={:?}",
                ev.seq,
                ev.kind.as_label(),
                ev.attempt,
                ev.delay_ms,
                ev.reason.as_deref(),
            );
        }
    });

    // 2. Policy: 3 attempts, 100ms → 200ms
    let policy = RetryPolicy::new(3, Duration::from_millis(100)).with_bus(bus.clone(), "flaky");

    // 3. Operation: fails twice, then succeeds
    let value = policy
        .run(|_ctx| async {
            let n = FAIL_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= 2 {
                println!("  op attempt #{n}: failing");
                Err(FlightError::failed(format!("boom #{n}")))
            } else {
                println!("  op attempt #{n}: success");
                Ok("payload")
            }
        })
        .await?;

    println!("result: {value}");

    // 4. Close the bus so the printer drains and exits
    bus.close();
    printer.await?;
    Ok(())
}

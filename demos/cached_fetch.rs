//! # Example: cached_fetch
//!
//! A read-through price lookup: a slow, flaky "remote" source behind
//! [`CachedLoader`], driven by [`BatchCoordinator`].
//!
//! ## Flow
//! ```text
//! get_many([apple, kiwi, apple, pear])
//!   ├─► apple ─┐
//!   ├─► apple ─┴─► one SingleFlight load ─► RetryPolicy ─► DeadlineRace ─► fetch
//!   ├─► kiwi  ──► fetch
//!   └─► pear  ──► fetch (fails once, retried)
//! second round: every key is a cache hit
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=flightline=debug cargo run --example cached_fetch
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use flightline::{BatchCoordinator, CachedLoader, Config, FetchFn, FlightError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Remote source: 50ms per call, "pear" fails on its first call
    let calls = Arc::new(AtomicU32::new(0));
    let failed_once = Arc::new(Mutex::new(HashMap::<String, bool>::new()));
    let source = {
        let calls = Arc::clone(&calls);
        FetchFn::new("prices", move |sku: String, ctx: CancellationToken| {
            calls.fetch_add(1, Ordering::SeqCst);
            let failed_once = Arc::clone(&failed_once);
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    _ = ctx.cancelled() => return Err(FlightError::Canceled),
                }
                let first = {
                    let mut seen = failed_once.lock().unwrap_or_else(|e| e.into_inner());
                    !seen.insert(sku.clone(), true).unwrap_or(false)
                };
                if sku == "pear" && first {
                    return Err(FlightError::ServiceUnavailable);
                }
                Ok(sku.len() as u64 * 100)
            }
        })
    };

    // 2. Loader: cache 100 entries / 300s, 3 attempts from 20ms, 500ms per attempt
    let cfg = Config::default()
        .with_retry(3, Duration::from_millis(20))
        .with_attempt_timeout(Duration::from_millis(500));
    let loader = CachedLoader::from_config(source, &cfg)?;
    let batch = BatchCoordinator::from_config(&cfg);

    let skus: Vec<String> = ["apple", "kiwi", "apple", "pear"].iter().map(|s| s.to_string()).collect();

    // 3. Two rounds: the second one is served from cache
    for round in 1..=2 {
        let prices = loader.get_many(skus.clone(), &batch).await;
        for (sku, price) in skus.iter().zip(&prices) {
            match price {
                Ok(p) => println!("round {round}: {sku:<6} = {p}"),
                Err(e) => println!("round {round}: {sku:<6} failed: {e}"),
            }
        }
    }

    let stats = loader.stats();
    println!(
        "remote calls={} hits={} misses={} hit_rate={:.2}",
        calls.load(Ordering::SeqCst),
        stats.hits,
        stats.misses,
        stats.hit_rate()
    );
    Ok(())
}

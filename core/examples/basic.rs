//! Circuit breaker and hedged request walkthrough

use guard_machines::{CircuitBreaker, CollectorConfig, HedgeExecutor, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    println!("=== Circuit Breaker ===\n");

    // A manual clock makes the cool-down visible without sleeping
    let clock = Arc::new(ManualClock::new(0));
    let circuit = CircuitBreaker::builder("payment_api")
        .collector(CollectorConfig::error_rate(10_000, 10).ratio(0.5).minimum_calls(4))
        .retry_timeout_ms(5_000)
        .clock(clock.clone())
        .on_open(|name, collector| println!("🔴 Circuit '{}' opened by {}", name, collector))
        .on_close(|name, _| println!("🟢 Circuit '{}' closed!", name))
        .on_half_open(|name, _| println!("🟡 Circuit '{}' half-open, probing...", name))
        .build()
        .expect("valid breaker configuration");

    println!("Initial state: {}\n", circuit.state_name());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.call(move || Ok::<_, String>(format!("Payment {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }

    println!("\n--- Triggering failures ---");
    for i in 1..=2 {
        match circuit.call(move || Err::<String, _>(format!("Payment failed {}", i))) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {}\n", circuit.state_name());

    println!("--- Attempting call while open ---");
    match circuit.call(|| Ok::<_, String>("Should be rejected")) {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e),
    }

    println!("\n--- After the cool-down ---");
    clock.advance(5_000);
    match circuit.call(|| Ok::<_, String>("Payment successful")) {
        Ok(result) => println!("✓ {}", result),
        Err(e) => println!("✗ {}", e),
    }
    println!("State: {}", circuit.state_name());
    for (collector, stats) in circuit.window_stats() {
        println!("{}: {}/{} matched", collector, stats.matched, stats.total);
    }

    println!("\n=== Hedged Request ===\n");

    let hedge = HedgeExecutor::new(Duration::from_millis(10));
    let cancel = CancellationToken::new();
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let counter = attempts.clone();
    let result = hedge
        .execute(&cancel, move || {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                // The first replica is stuck behind a slow disk
                let latency = if n == 0 { 50 } else { 5 };
                tokio::time::sleep(Duration::from_millis(latency)).await;
                Ok::<_, String>(format!("replica {} answered", n))
            }
        })
        .await;

    match result {
        Ok(answer) => println!("✓ {}", answer),
        Err(e) => println!("✗ {}", e),
    }
}

//! Idle expiration and the warm core.
//!
//! Run with: cargo run --example eviction

use std::thread;
use std::time::Duration;

use genpool::{FnAllocator, IdleTimeoutPolicy, ObjectPool, PoolConfiguration};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = PoolConfiguration::new(8)
        .with_core_poolsize(2)
        .with_expiration_policy(
            IdleTimeoutPolicy::new(Duration::from_millis(200))
                .with_check_interval(Duration::from_millis(50)),
        );
    let pool = ObjectPool::new(FnAllocator::new(|| vec![0u8; 4096]), config)
        .expect("valid configuration");

    println!("=== Warm core fills in the background ===");
    thread::sleep(Duration::from_millis(100));
    println!("  allocated: {}", pool.get_metrics().currently_allocated);

    println!();
    println!("=== Claims beyond the core expire once idle ===");
    let buffers: Vec<_> = (0..6).map(|_| pool.claim().expect("claim")).collect();
    println!("  allocated while claimed: {}", pool.get_metrics().currently_allocated);
    drop(buffers);

    thread::sleep(Duration::from_millis(500));
    let metrics = pool.get_metrics();
    println!("  allocated after expiry sweeps: {}", metrics.currently_allocated);
    println!("  total allocated over lifetime: {}", metrics.total_allocated);

    pool.shutdown().wait();
    println!("  pool terminated");
}

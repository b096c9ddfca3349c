// This is just a binary wrapper - the actual library is in lib.rs
// Run demos with: cargo run --example basic

use genpool::{FnAllocator, ObjectPool, PoolConfiguration};

fn main() {
    println!("=== genpool ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let pool = ObjectPool::new(
        FnAllocator::new(|| String::from("connection")),
        PoolConfiguration::new(4),
    )
    .expect("valid configuration");

    {
        let conn = pool.claim().expect("claim");
        println!("  Claimed: {}", *conn);
    }

    let metrics = pool.get_metrics();
    println!("  Allocated after return: {}", metrics.currently_allocated);
    pool.shutdown().wait();
}

//! Basic usage: claiming, releasing, timed claims and metrics.
//!
//! Run with: cargo run --example basic

use std::time::Duration;

use genpool::{Allocator, ObjectPool, PoolConfiguration};

struct Connection {
    id: usize,
    resets: usize,
}

struct ConnectionAllocator;

impl Allocator for ConnectionAllocator {
    type Object = Connection;
    type Error = std::io::Error;

    fn allocate(&self) -> Result<Connection, std::io::Error> {
        static NEXT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
        let id = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        println!("  [allocator] opening connection {id}");
        Ok(Connection { id, resets: 0 })
    }

    fn allocate_for_reuse(&self, conn: &mut Connection) -> Result<(), std::io::Error> {
        conn.resets += 1;
        println!("  [allocator] resetting connection {} (reset #{})", conn.id, conn.resets);
        Ok(())
    }

    fn deallocate(&self, conn: Connection) -> Result<(), std::io::Error> {
        println!("  [allocator] closing connection {}", conn.id);
        Ok(())
    }
}

fn main() {
    println!("=== Claim and release ===");
    let pool = ObjectPool::new(ConnectionAllocator, PoolConfiguration::new(2))
        .expect("valid configuration");

    {
        let conn = pool.claim().expect("claim");
        println!("  claimed connection {}", conn.id);
        // Dropping the handle returns the connection to the pool.
    }

    {
        let conn = pool.claim().expect("claim");
        println!("  claimed connection {} again (claims: {})", conn.id, conn.metadata().claim_count());
    }

    println!();
    println!("=== Timed claim on a saturated pool ===");
    let first = pool.claim().expect("claim");
    let second = pool.claim().expect("claim");
    match pool.claim_timeout(Duration::from_millis(100)).expect("pool running") {
        Some(conn) => println!("  unexpectedly claimed connection {}", conn.id),
        None => println!("  no connection available within 100ms"),
    }
    drop(first);
    drop(second);

    println!();
    println!("=== Metrics and health ===");
    let metrics = pool.get_metrics();
    println!("  allocated: {}", metrics.currently_allocated);
    println!("  total claims: {}", metrics.total_claimed);
    println!("  healthy: {}", pool.health_status().is_healthy());

    println!();
    println!("=== Shutdown ===");
    pool.shutdown().wait();
    println!("  pool terminated");
}

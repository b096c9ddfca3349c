//! # genpool
//!
//! Bounded, thread-safe generic object pool that amortizes the cost of
//! expensive-to-construct resources: database connections, sockets,
//! cryptographic contexts, worker objects.
//!
//! ## Features
//!
//! - Claim/release engine with a hard upper bound on allocated instances
//! - Automatic return of instances via RAII (Drop trait)
//! - Blocking and timed claims with strict FIFO waiter fairness
//! - Pluggable lifecycle hooks through the [`Allocator`] trait
//! - Optional warm core kept allocated in the background
//! - Pluggable idle expiration policies with a background eviction worker
//! - Graceful shutdown returning a completion handle
//! - Consistent metrics snapshots and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use genpool::{FnAllocator, ObjectPool, PoolConfiguration};
//!
//! let pool = ObjectPool::new(
//!     FnAllocator::new(|| vec![0u8; 1024]),
//!     PoolConfiguration::new(4),
//! )
//! .unwrap();
//!
//! {
//!     let buffer = pool.claim().unwrap();
//!     assert_eq!(buffer.len(), 1024);
//!     // Returned to the pool when dropped
//! }
//!
//! pool.shutdown().wait();
//! ```

mod allocator;
mod config;
mod errors;
mod eviction;
mod handle;
mod health;
mod metrics;
mod pool;
mod shutdown;

pub use allocator::{Allocator, FnAllocator};
pub use config::{DefaultThreadFactory, PoolConfiguration, ThreadFactory};
pub use errors::{PoolError, PoolResult};
pub use eviction::{ExpirationPolicy, IdleTimeoutPolicy, TimeToLivePolicy};
pub use handle::{HandleMetadata, HandleState, PooledObject};
pub use health::HealthStatus;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::ObjectPool;
pub use shutdown::ShutdownHandle;

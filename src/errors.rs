//! Error types for the object pool

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool is not running - claims are no longer accepted")]
    PoolNotRunning,

    #[error("allocator failed to produce an instance")]
    AllocationFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid pool configuration: {0}")]
    Configuration(String),
}

pub type PoolResult<T> = Result<T, PoolError>;

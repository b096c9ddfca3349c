//! Pool configuration options and the worker thread factory

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;

use crate::errors::{PoolError, PoolResult};
use crate::eviction::ExpirationPolicy;

/// Constructs the pool's background worker thread.
///
/// The default factory spawns named `std::thread`s that are detached from the
/// pool, in the manner of daemon threads. Supply a custom factory to control
/// naming, stack size or priority.
pub trait ThreadFactory: Send + Sync + 'static {
    /// Spawn a detached thread running `job`.
    fn spawn(&self, name: &str, job: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()>;
}

/// Default factory backed by `std::thread::Builder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultThreadFactory;

impl ThreadFactory for DefaultThreadFactory {
    fn spawn(&self, name: &str, job: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        thread::Builder::new().name(name.to_owned()).spawn(job)?;
        Ok(())
    }
}

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use genpool::PoolConfiguration;
///
/// let config = PoolConfiguration::new(100).with_core_poolsize(10);
///
/// assert_eq!(config.max_poolsize, 100);
/// assert_eq!(config.core_poolsize, 10);
/// ```
#[derive(Clone)]
pub struct PoolConfiguration {
    /// Upper bound on concurrently allocated instances. Must be at least 1.
    pub max_poolsize: usize,

    /// Number of allocated instances maintained while the pool is running.
    pub core_poolsize: usize,

    /// Policy deciding when idle instances expire. Absent means idle
    /// instances live until claimed, invalidated or shut down.
    pub expiration_policy: Option<Arc<dyn ExpirationPolicy>>,

    /// Factory for the background worker thread.
    pub thread_factory: Arc<dyn ThreadFactory>,
}

impl PoolConfiguration {
    /// Create a configuration with the given maximum pool size.
    pub fn new(max_poolsize: usize) -> Self {
        Self {
            max_poolsize,
            core_poolsize: 0,
            expiration_policy: None,
            thread_factory: Arc::new(DefaultThreadFactory),
        }
    }

    /// Set the number of warm instances kept allocated while running.
    pub fn with_core_poolsize(mut self, size: usize) -> Self {
        self.core_poolsize = size;
        self
    }

    /// Set the expiration policy applied to idle instances.
    pub fn with_expiration_policy(mut self, policy: impl ExpirationPolicy) -> Self {
        self.expiration_policy = Some(Arc::new(policy));
        self
    }

    /// Set the factory used to spawn the background worker thread.
    pub fn with_thread_factory(mut self, factory: impl ThreadFactory) -> Self {
        self.thread_factory = Arc::new(factory);
        self
    }

    /// Validate the configuration, returning an error if invalid.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_poolsize == 0 {
            return Err(PoolError::Configuration(
                "max_poolsize must be at least 1".to_owned(),
            ));
        }
        if self.core_poolsize > self.max_poolsize {
            return Err(PoolError::Configuration(format!(
                "core_poolsize ({}) must not exceed max_poolsize ({})",
                self.core_poolsize, self.max_poolsize
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PoolConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("max_poolsize", &self.max_poolsize)
            .field("core_poolsize", &self.core_poolsize)
            .field("expiration_policy", &self.expiration_policy.is_some())
            .finish()
    }
}

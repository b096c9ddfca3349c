//! Allocator contract: user-supplied lifecycle callbacks for pooled instances

use std::convert::Infallible;

/// Lifecycle callbacks for the instances managed by a pool.
///
/// `allocate` is the only required operation; the remaining hooks default to
/// no-ops. The pool never invokes any of these while holding its internal
/// lock, so implementations are free to block on I/O.
///
/// # Examples
///
/// ```
/// use genpool::Allocator;
///
/// struct Connection { open: bool }
///
/// struct ConnectionAllocator;
///
/// impl Allocator for ConnectionAllocator {
///     type Object = Connection;
///     type Error = std::io::Error;
///
///     fn allocate(&self) -> Result<Connection, std::io::Error> {
///         Ok(Connection { open: true })
///     }
///
///     fn allocate_for_reuse(&self, conn: &mut Connection) -> Result<(), std::io::Error> {
///         conn.open = true;
///         Ok(())
///     }
///
///     fn deallocate_for_reuse(&self, conn: &mut Connection) -> Result<(), std::io::Error> {
///         conn.open = false;
///         Ok(())
///     }
/// }
/// ```
pub trait Allocator: Send + Sync + 'static {
    /// The underlying instance type handed out by the pool.
    type Object: Send + 'static;

    /// Error produced by any of the lifecycle callbacks.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce a fully-initialized, ready-to-use instance.
    ///
    /// Called on first hand-out and when filling the warm core. The first
    /// hand-out after allocation skips `allocate_for_reuse`: construction is
    /// the initial activation.
    fn allocate(&self) -> Result<Self::Object, Self::Error>;

    /// Return an idle instance to active state (reset, reconnect, ...).
    ///
    /// Called immediately before every hand-out after the first.
    fn allocate_for_reuse(&self, _object: &mut Self::Object) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Put a released instance to rest (flush, clear transients, ...).
    ///
    /// Called immediately after release, before the instance returns to the
    /// idle set or is handed to a waiting claimer.
    fn deallocate_for_reuse(&self, _object: &mut Self::Object) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Release the underlying resources of a destroyed instance.
    ///
    /// Called on invalidation, expiry and shutdown. Failures are logged and
    /// swallowed; they never abort the pool's bookkeeping.
    fn deallocate(&self, _object: Self::Object) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Allocator built from a factory closure, for instances that need no
/// lifecycle hooks beyond construction.
///
/// # Examples
///
/// ```
/// use genpool::{FnAllocator, ObjectPool, PoolConfiguration};
///
/// let pool = ObjectPool::new(
///     FnAllocator::new(|| vec![0u8; 1024]),
///     PoolConfiguration::new(4),
/// )
/// .unwrap();
///
/// let buffer = pool.claim().unwrap();
/// assert_eq!(buffer.len(), 1024);
/// ```
pub struct FnAllocator<F> {
    factory: F,
}

impl<F> FnAllocator<F> {
    /// Create an allocator that calls `factory` for every fresh instance.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<T, F> Allocator for FnAllocator<F>
where
    T: Send + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    type Object = T;
    type Error = Infallible;

    fn allocate(&self) -> Result<T, Infallible> {
        Ok((self.factory)())
    }
}

//! Shutdown completion handle

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};

/// Completion future returned by [`ObjectPool::shutdown`](crate::ObjectPool::shutdown).
///
/// The handle is cheap to clone; every clone observes the same termination.
/// Completion is signalled by closing the underlying channel, so no value is
/// ever transferred.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    done: Receiver<()>,
}

impl ShutdownHandle {
    pub(crate) fn new(done: Receiver<()>) -> Self {
        Self { done }
    }

    /// Block until the pool reaches its terminal state.
    pub fn wait(&self) {
        let _ = self.done.recv();
    }

    /// Block up to `timeout` for termination. Returns `true` if the pool
    /// terminated within the window.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.done.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// `true` once the pool has fully terminated.
    pub fn is_terminated(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }
}

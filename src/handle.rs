//! Pooled handle: the claimed-object guard and its lifecycle metadata

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use crate::allocator::Allocator;
use crate::pool::PoolInner;

/// Lifecycle state of a pooled handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Parked in the pool, available for the next claim.
    Idle,

    /// Handed out to exactly one claimer.
    Claimed,

    /// Removed from circulation; the underlying instance is being torn down.
    Destroyed,
}

/// Read-only lifecycle metadata of a single handle.
///
/// Expiration policies receive this to decide eviction; claimers can inspect
/// it through [`PooledObject::metadata`].
#[derive(Debug, Clone)]
pub struct HandleMetadata {
    id: u64,
    created_at: Instant,
    last_claimed_at: Option<Instant>,
    last_released_at: Option<Instant>,
    claim_count: u64,
    state: HandleState,
}

impl HandleMetadata {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            last_claimed_at: None,
            last_released_at: None,
            claim_count: 0,
            state: HandleState::Idle,
        }
    }

    /// Monotonic id, unique within the owning pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the underlying instance was allocated.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the handle was last handed out, if ever.
    pub fn last_claimed_at(&self) -> Option<Instant> {
        self.last_claimed_at
    }

    /// When the handle was last released, if ever.
    pub fn last_released_at(&self) -> Option<Instant> {
        self.last_released_at
    }

    /// Number of successful claims of this handle.
    pub fn claim_count(&self) -> u64 {
        self.claim_count
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HandleState {
        self.state
    }

    pub(crate) fn note_claim(&mut self) {
        self.claim_count += 1;
        self.last_claimed_at = Some(Instant::now());
        self.state = HandleState::Claimed;
    }

    pub(crate) fn note_release(&mut self) {
        self.last_released_at = Some(Instant::now());
    }

    pub(crate) fn set_state(&mut self, state: HandleState) {
        self.state = state;
    }
}

/// One live instance together with its metadata. Owned by the pool.
pub(crate) struct Entry<T> {
    pub(crate) object: T,
    pub(crate) meta: HandleMetadata,
}

impl<T> Entry<T> {
    pub(crate) fn new(id: u64, object: T) -> Self {
        Self {
            object,
            meta: HandleMetadata::new(id),
        }
    }
}

/// A claimed instance, exclusively owned by the caller until released.
///
/// Dropping the handle returns it to the pool, so the common case needs no
/// explicit call. [`release`](PooledObject::release) and
/// [`invalidate`](PooledObject::invalidate) consume the handle, which makes a
/// second release impossible by construction.
pub struct PooledObject<A: Allocator> {
    entry: Option<Entry<A::Object>>,
    pool: Arc<PoolInner<A>>,
}

impl<A: Allocator> PooledObject<A> {
    pub(crate) fn new(entry: Entry<A::Object>, pool: Arc<PoolInner<A>>) -> Self {
        Self {
            entry: Some(entry),
            pool,
        }
    }

    /// Lifecycle metadata of this handle.
    pub fn metadata(&self) -> &HandleMetadata {
        &self.entry.as_ref().expect("handle already consumed").meta
    }

    /// Return the instance to the pool for reuse.
    ///
    /// Equivalent to dropping the handle.
    pub fn release(mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.release_entry(entry);
        }
    }

    /// Return the instance to the pool for destruction.
    ///
    /// The slot is freed immediately; the allocator's `deallocate` hook runs
    /// on the pool's background worker.
    pub fn invalidate(mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.invalidate_entry(entry);
        }
    }
}

impl<A: Allocator> Deref for PooledObject<A> {
    type Target = A::Object;

    fn deref(&self) -> &Self::Target {
        &self.entry.as_ref().expect("handle already consumed").object
    }
}

impl<A: Allocator> DerefMut for PooledObject<A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry.as_mut().expect("handle already consumed").object
    }
}

impl<A: Allocator> Drop for PooledObject<A> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.release_entry(entry);
        }
    }
}

impl<A: Allocator> fmt::Debug for PooledObject<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject")
            .field("meta", &self.entry.as_ref().map(|entry| &entry.meta))
            .finish()
    }
}

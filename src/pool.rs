//! Core claim/release engine, waiter queue, and the background worker

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::allocator::Allocator;
use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::handle::{Entry, HandleMetadata, HandleState, PooledObject};
use crate::health::HealthStatus;
use crate::metrics::PoolMetrics;
use crate::shutdown::ShutdownHandle;

const WORKER_THREAD_NAME: &str = "genpool-worker";

/// Upper bound on how long the worker parks between cycles. Keeps the park
/// finite so a worker whose pool has been dropped without shutdown exits on
/// its next wakeup instead of sleeping forever.
const MAX_WORKER_PARK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    ShuttingDown,
    Terminated,
}

/// Outcome slot of one parked claimer. Each waiter owns its slot mutex and
/// condvar, so wakeups target exactly one thread and the hand-off/cancel race
/// is settled atomically under the slot lock.
enum WaiterSlot<T> {
    /// Still parked.
    Waiting,
    /// A released handle was passed directly to this waiter.
    Handoff(Entry<T>),
    /// A slot was freed; retry the claim from the top.
    Retry,
    /// The pool is shutting down; the claim must fail.
    ShuttingDown,
    /// The waiter timed out and left; deliver nothing here.
    Cancelled,
}

enum WaitOutcome<T> {
    Handoff(Entry<T>),
    Retry,
    ShuttingDown,
    TimedOut,
}

struct Waiter<T> {
    slot: Mutex<WaiterSlot<T>>,
    signal: Condvar,
}

impl<T> Waiter<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(WaiterSlot::Waiting),
            signal: Condvar::new(),
        }
    }

    /// Hand a released entry to this waiter. Fails if the waiter already
    /// cancelled, returning the entry so the caller can try the next waiter.
    fn offer_entry(&self, entry: Entry<T>) -> Result<(), Entry<T>> {
        let mut slot = self.slot.lock();
        match *slot {
            WaiterSlot::Waiting => {
                *slot = WaiterSlot::Handoff(entry);
                self.signal.notify_one();
                Ok(())
            }
            _ => Err(entry),
        }
    }

    /// Deliver a retry or shutdown wakeup. Returns `false` if the waiter
    /// already cancelled.
    fn offer_wakeup(&self, outcome: WaiterSlot<T>) -> bool {
        let mut slot = self.slot.lock();
        match *slot {
            WaiterSlot::Waiting => {
                *slot = outcome;
                self.signal.notify_one();
                true
            }
            _ => false,
        }
    }

    /// Park until an outcome arrives or the deadline passes. On timeout the
    /// slot is atomically marked cancelled, so a racing hand-off either lands
    /// before the mark (and is returned here) or observes the mark and moves
    /// to the next waiter. A handle can never be stranded.
    fn await_outcome(&self, deadline: Option<Instant>) -> WaitOutcome<T> {
        let mut slot = self.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, WaiterSlot::Waiting) {
                WaiterSlot::Waiting => {}
                WaiterSlot::Handoff(entry) => return WaitOutcome::Handoff(entry),
                WaiterSlot::Retry => return WaitOutcome::Retry,
                WaiterSlot::ShuttingDown => return WaitOutcome::ShuttingDown,
                WaiterSlot::Cancelled => {
                    *slot = WaiterSlot::Cancelled;
                    return WaitOutcome::TimedOut;
                }
            }
            match deadline {
                None => self.signal.wait(&mut slot),
                Some(limit) => {
                    if Instant::now() >= limit || self.signal.wait_until(&mut slot, limit).timed_out() {
                        return match std::mem::replace(&mut *slot, WaiterSlot::Cancelled) {
                            WaiterSlot::Waiting | WaiterSlot::Cancelled => WaitOutcome::TimedOut,
                            WaiterSlot::Handoff(entry) => WaitOutcome::Handoff(entry),
                            WaiterSlot::Retry => WaitOutcome::Retry,
                            WaiterSlot::ShuttingDown => WaitOutcome::ShuttingDown,
                        };
                    }
                }
            }
        }
    }
}

/// Wakeup channel for the background worker. Separate from the pool lock so
/// nudging never requires more than the pool mutex.
struct WorkerSignal {
    nudged: Mutex<bool>,
    signal: Condvar,
}

impl WorkerSignal {
    fn new() -> Self {
        Self {
            nudged: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn nudge(&self) {
        let mut nudged = self.nudged.lock();
        *nudged = true;
        self.signal.notify_one();
    }

    fn park(&self, timeout: Duration) {
        let mut nudged = self.nudged.lock();
        if !*nudged && !timeout.is_zero() {
            let _ = self.signal.wait_for(&mut nudged, timeout);
        }
        *nudged = false;
    }
}

/// Mutable pool state, all guarded by a single mutex. Allocator and policy
/// callbacks never run while it is held.
struct Core<T> {
    lifecycle: Lifecycle,
    /// Idle handles; most recently used at the back, sweep candidates at the
    /// front.
    idle: VecDeque<Entry<T>>,
    /// Ids of handles currently handed out (including hand-offs in flight).
    claimed: HashSet<u64>,
    /// Destroyed handles awaiting `deallocate` on the worker.
    doomed: Vec<Entry<T>>,
    /// Parked claimers in arrival order.
    waiters: VecDeque<Arc<Waiter<T>>>,
    /// Idle + claimed + in-flight allocation reservations. Enforces the
    /// capacity bound.
    slots_used: usize,
    total_allocated: u64,
    total_claimed: u64,
    next_id: u64,
    worker_started: bool,
    shutdown_tx: Option<Sender<()>>,
    shutdown_handle: Option<ShutdownHandle>,
}

impl<T> Core<T> {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Running,
            idle: VecDeque::new(),
            claimed: HashSet::new(),
            doomed: Vec::new(),
            waiters: VecDeque::new(),
            slots_used: 0,
            total_allocated: 0,
            total_claimed: 0,
            next_id: 0,
            worker_started: false,
            shutdown_tx: None,
            shutdown_handle: None,
        }
    }

    fn next_handle_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Wake the head waiter so it retries the claim. One waiter at a time;
    /// cancelled stragglers are discarded along the way.
    fn signal_slot_free(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.offer_wakeup(WaiterSlot::Retry) {
                return;
            }
        }
    }

    /// Hand a passivated entry to the head waiter, or park it in the idle
    /// set. The entry's id must already be in `claimed`; the idle path
    /// removes it. Returns `true` if the entry was parked idle.
    fn hand_off_or_park(&mut self, entry: Entry<T>) -> bool {
        let mut entry = entry;
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.offer_entry(entry) {
                Ok(()) => return false,
                Err(back) => entry = back,
            }
        }
        self.claimed.remove(&entry.meta.id());
        entry.meta.set_state(HandleState::Idle);
        self.idle.push_back(entry);
        true
    }
}

/// Shared pool state. Handles keep it alive through an `Arc`; the worker
/// holds only a `Weak` so an abandoned pool can be dropped.
pub(crate) struct PoolInner<A: Allocator> {
    allocator: A,
    config: PoolConfiguration,
    core: Mutex<Core<A::Object>>,
    worker: Arc<WorkerSignal>,
    me: Weak<PoolInner<A>>,
}

impl<A: Allocator> PoolInner<A> {
    /// Spawn the background worker if it is not running yet. Drops the guard
    /// around the factory call so user-supplied factories run lock-free.
    fn ensure_worker<'a>(
        &'a self,
        core: MutexGuard<'a, Core<A::Object>>,
    ) -> MutexGuard<'a, Core<A::Object>> {
        let mut core = core;
        if core.worker_started {
            return core;
        }
        core.worker_started = true;
        drop(core);

        let pool = self.me.clone();
        let signal = Arc::clone(&self.worker);
        let spawned = self.config.thread_factory.spawn(
            WORKER_THREAD_NAME,
            Box::new(move || worker_loop::<A>(pool, signal)),
        );

        let mut core = self.core.lock();
        if let Err(error) = spawned {
            core.worker_started = false;
            warn!(%error, "failed to spawn pool worker thread");
        }
        core
    }

    /// Free one slot and let the head waiter retry. Nudges the worker during
    /// shutdown so the drain makes progress.
    fn free_slot(&self, core: &mut Core<A::Object>) {
        core.slots_used -= 1;
        core.signal_slot_free();
        if core.lifecycle != Lifecycle::Running {
            self.worker.nudge();
        }
    }

    /// Move an entry to the deferred-destruction queue, freeing its slot
    /// immediately. `deallocate` runs later on the worker.
    fn defer_destroy<'a>(
        &'a self,
        core: MutexGuard<'a, Core<A::Object>>,
        entry: Entry<A::Object>,
    ) -> MutexGuard<'a, Core<A::Object>> {
        let mut core = core;
        let mut entry = entry;
        core.claimed.remove(&entry.meta.id());
        entry.meta.set_state(HandleState::Destroyed);
        core.doomed.push(entry);
        self.free_slot(&mut core);
        let core = self.ensure_worker(core);
        self.worker.nudge();
        core
    }

    /// Run `deallocate` on the calling thread, swallowing failures.
    fn destroy_now(&self, entry: Entry<A::Object>) {
        if let Err(error) = self.allocator.deallocate(entry.object) {
            warn!(%error, "deallocation failed");
        }
    }

    /// Apply `allocate_for_reuse` ahead of a hand-out. A handle's first
    /// hand-out skips the hook: construction is the initial activation.
    fn activate_for_handout(&self, entry: &mut Entry<A::Object>) -> Result<(), A::Error> {
        if entry.meta.claim_count() == 0 {
            return Ok(());
        }
        self.allocator.allocate_for_reuse(&mut entry.object)
    }

    /// Destroy a handle whose activation failed and reclaim its slot.
    fn discard_failed_activation(
        &self,
        entry: Entry<A::Object>,
        error: A::Error,
    ) -> MutexGuard<'_, Core<A::Object>> {
        let mut entry = entry;
        warn!(handle = entry.meta.id(), %error, "activation failed - destroying handle");
        let id = entry.meta.id();
        entry.meta.set_state(HandleState::Destroyed);
        self.destroy_now(entry);
        let mut core = self.core.lock();
        core.claimed.remove(&id);
        self.free_slot(&mut core);
        core
    }

    /// Return a claimed entry to the pool: passivate, then hand off to the
    /// head waiter or park idle. Destroys instead once shutdown has begun or
    /// when passivation fails.
    pub(crate) fn release_entry(&self, entry: Entry<A::Object>) {
        let mut entry = entry;
        {
            let core = self.core.lock();
            if core.lifecycle != Lifecycle::Running {
                drop(self.defer_destroy(core, entry));
                return;
            }
        }

        match self.allocator.deallocate_for_reuse(&mut entry.object) {
            Ok(()) => {
                entry.meta.note_release();
                let mut core = self.core.lock();
                if core.lifecycle != Lifecycle::Running {
                    drop(self.defer_destroy(core, entry));
                    return;
                }
                if core.hand_off_or_park(entry) && self.config.expiration_policy.is_some() {
                    // Lazy start of the eviction sweeps: the pool now holds
                    // an idle handle with a policy to apply to it.
                    drop(self.ensure_worker(core));
                }
            }
            Err(error) => {
                warn!(handle = entry.meta.id(), %error, "passivation failed - destroying handle");
                let core = self.core.lock();
                drop(self.defer_destroy(core, entry));
            }
        }
    }

    /// Destroy a claimed entry, freeing its slot for a waiter.
    pub(crate) fn invalidate_entry(&self, entry: Entry<A::Object>) {
        debug!(handle = entry.meta.id(), "invalidating handle");
        let core = self.core.lock();
        drop(self.defer_destroy(core, entry));
    }

    fn shutdown(&self) -> ShutdownHandle {
        let mut core = self.core.lock();
        if let Some(handle) = &core.shutdown_handle {
            return handle.clone();
        }

        debug!("pool shutting down");
        let (tx, rx) = unbounded();
        let handle = ShutdownHandle::new(rx);
        core.shutdown_handle = Some(handle.clone());
        core.shutdown_tx = Some(tx);
        core.lifecycle = Lifecycle::ShuttingDown;

        // Fail every parked claimer.
        for waiter in core.waiters.drain(..) {
            let _ = waiter.offer_wakeup(WaiterSlot::ShuttingDown);
        }

        // Idle handles are destroyed right away; claimed ones as they come
        // back.
        while let Some(mut entry) = core.idle.pop_front() {
            entry.meta.set_state(HandleState::Destroyed);
            core.slots_used -= 1;
            core.doomed.push(entry);
        }

        if core.slots_used == 0 && core.doomed.is_empty() && !core.worker_started {
            // Nothing to drain and no worker to do it: terminate inline.
            core.lifecycle = Lifecycle::Terminated;
            let tx = core.shutdown_tx.take();
            drop(core);
            drop(tx);
            debug!("pool terminated");
            return handle;
        }

        let core = self.ensure_worker(core);
        drop(core);
        self.worker.nudge();
        handle
    }

    fn get_metrics(&self) -> PoolMetrics {
        let core = self.core.lock();
        PoolMetrics {
            currently_claimed: core.claimed.len(),
            currently_waiting_count: core.waiters.len(),
            core_poolsize: self.config.core_poolsize,
            max_poolsize: self.config.max_poolsize,
            currently_allocated: core.idle.len() + core.claimed.len(),
            total_allocated: core.total_allocated,
            total_claimed: core.total_claimed,
        }
    }

    /// One pass of the background worker: drain deferred destructions,
    /// terminate a drained pool, sweep expired idle handles, refill the warm
    /// core. Returns how long to park before the next pass, or `None` when
    /// the worker should exit.
    fn worker_cycle(&self) -> Option<Duration> {
        let mut core = self.core.lock();

        // Deferred destruction first: it frees user resources and lets a
        // shutdown drain complete.
        while !core.doomed.is_empty() {
            let batch: Vec<Entry<A::Object>> = core.doomed.drain(..).collect();
            drop(core);
            for entry in batch {
                self.destroy_now(entry);
            }
            core = self.core.lock();
        }

        match core.lifecycle {
            Lifecycle::Terminated => return None,
            Lifecycle::ShuttingDown => {
                if core.slots_used == 0 {
                    core.lifecycle = Lifecycle::Terminated;
                    let tx = core.shutdown_tx.take();
                    drop(core);
                    drop(tx);
                    debug!("pool terminated");
                    return None;
                }
                // Outstanding claims keep the pool alive; their releases
                // nudge us.
                return Some(MAX_WORKER_PARK);
            }
            Lifecycle::Running => {}
        }

        // Expiry sweep, oldest first. The policy runs on metadata snapshots
        // outside the lock; a handle that was claimed and released between
        // snapshot and sweep no longer matches its snapshotted claim count
        // and is skipped.
        if let Some(policy) = &self.config.expiration_policy {
            if !core.idle.is_empty() {
                let snapshot: Vec<HandleMetadata> =
                    core.idle.iter().map(|entry| entry.meta.clone()).collect();
                drop(core);

                let now = Instant::now();
                let mut expired: HashMap<u64, u64> = HashMap::new();
                for meta in &snapshot {
                    if policy.should_evict(meta, now) {
                        expired.insert(meta.id(), meta.claim_count());
                    }
                }

                core = self.core.lock();
                if !expired.is_empty() && core.lifecycle == Lifecycle::Running {
                    let mut kept = VecDeque::with_capacity(core.idle.len());
                    while let Some(mut entry) = core.idle.pop_front() {
                        match expired.get(&entry.meta.id()) {
                            Some(count) if *count == entry.meta.claim_count() => {
                                debug!(handle = entry.meta.id(), "evicting expired idle handle");
                                entry.meta.set_state(HandleState::Destroyed);
                                core.slots_used -= 1;
                                core.doomed.push(entry);
                            }
                            _ => kept.push_back(entry),
                        }
                    }
                    core.idle = kept;
                }
            }
        }

        // Refill toward the warm core, one instance at a time, best-effort.
        while core.lifecycle == Lifecycle::Running && core.slots_used < self.config.core_poolsize {
            core.slots_used += 1;
            drop(core);
            match self.allocator.allocate() {
                Ok(object) => {
                    core = self.core.lock();
                    core.total_allocated += 1;
                    let id = core.next_handle_id();
                    let mut entry = Entry::new(id, object);
                    if core.lifecycle == Lifecycle::Running {
                        debug!(handle = id, "allocated instance for warm core");
                        core.claimed.insert(id);
                        core.hand_off_or_park(entry);
                    } else {
                        entry.meta.set_state(HandleState::Destroyed);
                        core.slots_used -= 1;
                        core.doomed.push(entry);
                    }
                }
                Err(error) => {
                    warn!(%error, "core refill allocation failed");
                    core = self.core.lock();
                    self.free_slot(&mut core);
                    break;
                }
            }
        }

        if !core.doomed.is_empty() {
            // The sweep produced work; run another pass immediately.
            return Some(Duration::ZERO);
        }

        let delay = match &self.config.expiration_policy {
            Some(policy) if core.lifecycle == Lifecycle::Running => {
                policy.next_check_delay().min(MAX_WORKER_PARK)
            }
            _ => MAX_WORKER_PARK,
        };
        Some(delay)
    }
}

impl<A: Allocator> Drop for PoolInner<A> {
    fn drop(&mut self) {
        // A pool dropped without shutdown still deallocates what it owns.
        let core = self.core.get_mut();
        let leftovers: Vec<Entry<A::Object>> =
            core.idle.drain(..).chain(core.doomed.drain(..)).collect();
        for entry in leftovers {
            if let Err(error) = self.allocator.deallocate(entry.object) {
                warn!(%error, "deallocation failed while dropping pool");
            }
        }
    }
}

fn worker_loop<A: Allocator>(pool: Weak<PoolInner<A>>, signal: Arc<WorkerSignal>) {
    loop {
        let Some(inner) = pool.upgrade() else { return };
        let Some(delay) = inner.worker_cycle() else { return };
        drop(inner);
        signal.park(delay);
    }
}

/// Bounded, thread-safe object pool driven by an [`Allocator`].
///
/// Claim an instance with [`claim`](ObjectPool::claim) or
/// [`claim_timeout`](ObjectPool::claim_timeout); the returned
/// [`PooledObject`] gives exclusive access and returns to the pool on drop.
/// The pool is cheap to clone and every clone shares the same state.
///
/// # Examples
///
/// ```
/// use genpool::{FnAllocator, ObjectPool, PoolConfiguration};
///
/// let pool = ObjectPool::new(
///     FnAllocator::new(|| String::from("connection")),
///     PoolConfiguration::new(2),
/// )
/// .unwrap();
///
/// {
///     let conn = pool.claim().unwrap();
///     assert_eq!(*conn, "connection");
/// }
///
/// pool.shutdown().wait();
/// ```
pub struct ObjectPool<A: Allocator> {
    inner: Arc<PoolInner<A>>,
}

impl<A: Allocator> Clone for ObjectPool<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Allocator> fmt::Debug for ObjectPool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("metrics", &self.get_metrics())
            .finish()
    }
}

impl<A: Allocator> ObjectPool<A> {
    /// Create a pool over `allocator` with the given configuration.
    ///
    /// With a non-zero `core_poolsize` the background worker starts
    /// immediately and fills the warm core asynchronously.
    ///
    /// # Errors
    /// Returns [`PoolError::Configuration`] if the configuration is invalid.
    pub fn new(allocator: A, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;
        debug!(
            max_poolsize = config.max_poolsize,
            core_poolsize = config.core_poolsize,
            "created object pool"
        );
        let inner = Arc::new_cyclic(|me| PoolInner {
            allocator,
            config,
            core: Mutex::new(Core::new()),
            worker: Arc::new(WorkerSignal::new()),
            me: me.clone(),
        });

        if inner.config.core_poolsize > 0 {
            let core = inner.core.lock();
            drop(inner.ensure_worker(core));
            inner.worker.nudge();
        }

        Ok(Self { inner })
    }

    /// Claim an instance, blocking until one is available.
    ///
    /// # Errors
    /// [`PoolError::PoolNotRunning`] once shutdown has begun;
    /// [`PoolError::AllocationFailed`] if a fresh allocation was needed and
    /// failed.
    pub fn claim(&self) -> PoolResult<PooledObject<A>> {
        match self.claim_inner(None)? {
            Some(object) => Ok(object),
            // No deadline: the wait can only end with a handle or an error.
            None => unreachable!("untimed claim cannot expire"),
        }
    }

    /// Claim an instance, giving up after `timeout`.
    ///
    /// Returns `Ok(None)` when the wait expires; the deadline is measured on
    /// a monotonic clock from the moment the call enters the pool. A zero
    /// timeout degenerates to a try-claim.
    pub fn claim_timeout(&self, timeout: Duration) -> PoolResult<Option<PooledObject<A>>> {
        self.claim_inner(Instant::now().checked_add(timeout))
    }

    fn claim_inner(&self, deadline: Option<Instant>) -> PoolResult<Option<PooledObject<A>>> {
        let inner = &self.inner;
        let mut requeue_front = false;
        let mut core = inner.core.lock();
        loop {
            if core.lifecycle != Lifecycle::Running {
                return Err(PoolError::PoolNotRunning);
            }

            // Idle hit, most recently used first.
            if let Some(mut entry) = core.idle.pop_back() {
                core.claimed.insert(entry.meta.id());
                drop(core);
                match inner.activate_for_handout(&mut entry) {
                    Ok(()) => {
                        entry.meta.note_claim();
                        let mut locked = inner.core.lock();
                        locked.total_claimed += 1;
                        drop(locked);
                        return Ok(Some(PooledObject::new(entry, Arc::clone(inner))));
                    }
                    Err(error) => {
                        core = inner.discard_failed_activation(entry, error);
                        continue;
                    }
                }
            }

            // Allocate fresh under the capacity bound. The slot is reserved
            // before the callback runs so concurrent claims cannot overshoot.
            if core.slots_used < inner.config.max_poolsize {
                core.slots_used += 1;
                drop(core);
                match inner.allocator.allocate() {
                    Ok(object) => {
                        let mut locked = inner.core.lock();
                        locked.total_allocated += 1;
                        locked.total_claimed += 1;
                        let id = locked.next_handle_id();
                        locked.claimed.insert(id);
                        drop(locked);
                        let mut entry = Entry::new(id, object);
                        entry.meta.note_claim();
                        debug!(handle = id, "allocated fresh instance");
                        return Ok(Some(PooledObject::new(entry, Arc::clone(inner))));
                    }
                    Err(error) => {
                        let mut locked = inner.core.lock();
                        inner.free_slot(&mut locked);
                        drop(locked);
                        return Err(PoolError::AllocationFailed(Box::new(error)));
                    }
                }
            }

            // Saturated: park as a waiter. A waiter woken to retry re-enters
            // at the head of the queue, keeping arrival order intact.
            if let Some(limit) = deadline {
                if Instant::now() >= limit {
                    return Ok(None);
                }
            }
            let waiter = Arc::new(Waiter::new());
            if requeue_front {
                core.waiters.push_front(Arc::clone(&waiter));
            } else {
                core.waiters.push_back(Arc::clone(&waiter));
            }
            drop(core);

            match waiter.await_outcome(deadline) {
                WaitOutcome::Handoff(mut entry) => {
                    // Handed straight from a releaser; skip the idle re-query
                    // and go directly to activation.
                    match inner.activate_for_handout(&mut entry) {
                        Ok(()) => {
                            entry.meta.note_claim();
                            let mut locked = inner.core.lock();
                            locked.total_claimed += 1;
                            drop(locked);
                            return Ok(Some(PooledObject::new(entry, Arc::clone(inner))));
                        }
                        Err(error) => {
                            core = inner.discard_failed_activation(entry, error);
                            requeue_front = false;
                            continue;
                        }
                    }
                }
                WaitOutcome::Retry => {
                    requeue_front = true;
                    core = inner.core.lock();
                }
                WaitOutcome::ShuttingDown => return Err(PoolError::PoolNotRunning),
                WaitOutcome::TimedOut => {
                    let mut locked = inner.core.lock();
                    locked
                        .waiters
                        .retain(|candidate| !Arc::ptr_eq(candidate, &waiter));
                    drop(locked);
                    return Ok(None);
                }
            }
        }
    }

    /// Return a claimed instance to the pool.
    ///
    /// Equivalent to [`PooledObject::release`]; the handle always returns to
    /// the pool that issued it.
    pub fn release(&self, object: PooledObject<A>) {
        object.release();
    }

    /// Destroy a claimed instance.
    ///
    /// Equivalent to [`PooledObject::invalidate`].
    pub fn invalidate(&self, object: PooledObject<A>) {
        object.invalidate();
    }

    /// Begin graceful termination.
    ///
    /// New claims fail immediately, parked claimers are woken with an error,
    /// idle instances are destroyed, and claimed instances are destroyed as
    /// they come back. The returned handle completes once every instance has
    /// been deallocated. Idempotent: repeated calls return the same handle.
    pub fn shutdown(&self) -> ShutdownHandle {
        self.inner.shutdown()
    }

    /// Snapshot of the pool's counters.
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner.get_metrics()
    }

    /// Health assessment derived from the current metrics.
    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::from_metrics(&self.get_metrics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FnAllocator;
    use crate::eviction::IdleTimeoutPolicy;
    use std::fmt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    /// Counts every lifecycle hook invocation.
    #[derive(Debug, Default)]
    struct Hooks {
        allocated: AtomicUsize,
        activated: AtomicUsize,
        passivated: AtomicUsize,
        deallocated: AtomicUsize,
    }

    impl Hooks {
        fn total(&self) -> usize {
            self.allocated.load(Ordering::SeqCst)
                + self.activated.load(Ordering::SeqCst)
                + self.passivated.load(Ordering::SeqCst)
                + self.deallocated.load(Ordering::SeqCst)
        }

        fn deallocated(&self) -> usize {
            self.deallocated.load(Ordering::SeqCst)
        }
    }

    /// Allocator producing sequence numbers and counting every hook, with
    /// switchable failure injection per hook.
    struct CountingAllocator {
        hooks: Arc<Hooks>,
        fail_allocate_times: AtomicUsize,
        fail_activate_times: AtomicUsize,
        fail_passivate: bool,
        fail_deallocate: bool,
    }

    impl CountingAllocator {
        fn new() -> (Self, Arc<Hooks>) {
            let hooks = Arc::new(Hooks::default());
            (
                Self {
                    hooks: Arc::clone(&hooks),
                    fail_allocate_times: AtomicUsize::new(0),
                    fail_activate_times: AtomicUsize::new(0),
                    fail_passivate: false,
                    fail_deallocate: false,
                },
                hooks,
            )
        }

        fn failing_deallocate() -> (Self, Arc<Hooks>) {
            let (mut allocator, hooks) = Self::new();
            allocator.fail_deallocate = true;
            (allocator, hooks)
        }

        fn failing_passivate() -> (Self, Arc<Hooks>) {
            let (mut allocator, hooks) = Self::new();
            allocator.fail_passivate = true;
            (allocator, hooks)
        }

        fn failing_allocate_once() -> (Self, Arc<Hooks>) {
            let (allocator, hooks) = Self::new();
            allocator.fail_allocate_times.store(1, Ordering::SeqCst);
            (allocator, hooks)
        }

        fn failing_activate_once() -> (Self, Arc<Hooks>) {
            let (allocator, hooks) = Self::new();
            allocator.fail_activate_times.store(1, Ordering::SeqCst);
            (allocator, hooks)
        }
    }

    impl Allocator for CountingAllocator {
        type Object = usize;
        type Error = TestError;

        fn allocate(&self) -> Result<usize, TestError> {
            if self.fail_allocate_times.load(Ordering::SeqCst) > 0 {
                self.fail_allocate_times.fetch_sub(1, Ordering::SeqCst);
                return Err(TestError("allocate failed"));
            }
            Ok(self.hooks.allocated.fetch_add(1, Ordering::SeqCst))
        }

        fn allocate_for_reuse(&self, _object: &mut usize) -> Result<(), TestError> {
            self.hooks.activated.fetch_add(1, Ordering::SeqCst);
            if self.fail_activate_times.load(Ordering::SeqCst) > 0 {
                self.fail_activate_times.fetch_sub(1, Ordering::SeqCst);
                return Err(TestError("activation failed"));
            }
            Ok(())
        }

        fn deallocate_for_reuse(&self, _object: &mut usize) -> Result<(), TestError> {
            self.hooks.passivated.fetch_add(1, Ordering::SeqCst);
            if self.fail_passivate {
                return Err(TestError("passivation failed"));
            }
            Ok(())
        }

        fn deallocate(&self, _object: usize) -> Result<(), TestError> {
            self.hooks.deallocated.fetch_add(1, Ordering::SeqCst);
            if self.fail_deallocate {
                return Err(TestError("deallocation failed"));
            }
            Ok(())
        }
    }

    fn counting_pool(max: usize) -> (ObjectPool<CountingAllocator>, Arc<Hooks>) {
        let (allocator, hooks) = CountingAllocator::new();
        let pool = ObjectPool::new(allocator, PoolConfiguration::new(max)).unwrap();
        (pool, hooks)
    }

    fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    const SETTLE: Duration = Duration::from_secs(2);

    #[test]
    fn release_then_claim_returns_the_same_instance() {
        let (pool, hooks) = counting_pool(1);

        let first = pool.claim().unwrap();
        let value = *first;
        drop(first);

        let second = pool.claim().unwrap();
        assert_eq!(*second, value);
        assert_eq!(hooks.allocated.load(Ordering::SeqCst), 1);
        assert_eq!(second.metadata().claim_count(), 2);
    }

    #[test]
    fn timed_claim_expires_when_pool_is_saturated() {
        let (pool, _hooks) = counting_pool(1);
        let held = pool.claim().unwrap();

        let contender = {
            let pool = pool.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let outcome = pool.claim_timeout(Duration::from_millis(500)).unwrap();
                (outcome.is_none(), started.elapsed())
            })
        };

        assert!(eventually(SETTLE, || {
            pool.get_metrics().currently_waiting_count == 1
        }));

        let (timed_out, elapsed) = contender.join().unwrap();
        assert!(timed_out);
        assert!(elapsed >= Duration::from_millis(500), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "returned after {elapsed:?}");
        assert_eq!(pool.get_metrics().currently_waiting_count, 0);
        drop(held);
    }

    #[test]
    fn released_handle_is_handed_to_the_longest_blocked_claimer() {
        let (pool, _hooks) = counting_pool(1);
        let held = pool.claim().unwrap();
        let (order_tx, order_rx) = mpsc::channel::<&'static str>();

        let second = {
            let pool = pool.clone();
            let order = order_tx.clone();
            thread::spawn(move || {
                let object = pool.claim().unwrap();
                order.send("second").unwrap();
                thread::sleep(Duration::from_millis(30));
                drop(object);
            })
        };
        assert!(eventually(SETTLE, || {
            pool.get_metrics().currently_waiting_count == 1
        }));

        let third = {
            let pool = pool.clone();
            let order = order_tx;
            thread::spawn(move || {
                let object = pool.claim().unwrap();
                order.send("third").unwrap();
                drop(object);
            })
        };
        assert!(eventually(SETTLE, || {
            pool.get_metrics().currently_waiting_count == 2
        }));

        drop(held);
        assert_eq!(order_rx.recv_timeout(SETTLE).unwrap(), "second");
        assert_eq!(order_rx.recv_timeout(SETTLE).unwrap(), "third");
        second.join().unwrap();
        third.join().unwrap();
    }

    #[test]
    fn lifecycle_hooks_fire_once_per_transition() {
        let (pool, hooks) = counting_pool(1);

        let object = pool.claim().unwrap();
        assert_eq!(hooks.total(), 1); // allocate
        pool.release(object);
        assert_eq!(hooks.total(), 2); // deallocate_for_reuse
        let object = pool.claim().unwrap();
        assert_eq!(hooks.total(), 3); // allocate_for_reuse
        object.invalidate();

        assert!(eventually(SETTLE, || hooks.total() == 4)); // deallocate, on the worker
        assert_eq!(pool.get_metrics().currently_allocated, 0);

        let object = pool.claim().unwrap();
        pool.release(object);
        let object = pool.claim().unwrap();
        assert_eq!(hooks.total(), 7);
        object.invalidate();
        assert!(eventually(SETTLE, || hooks.total() == 8));
        assert_eq!(pool.get_metrics().currently_allocated, 0);
    }

    #[test]
    fn failing_deallocate_does_not_leak_slots() {
        let (allocator, hooks) = CountingAllocator::failing_deallocate();
        let pool = ObjectPool::new(allocator, PoolConfiguration::new(1)).unwrap();

        let object = pool.claim().unwrap();
        object.release();
        let object = pool.claim().unwrap();
        object.invalidate();

        assert!(eventually(SETTLE, || hooks.total() == 4));
        assert_eq!(pool.get_metrics().currently_allocated, 0);

        // The slot must be reusable and the worker alive.
        let object = pool.claim().unwrap();
        object.invalidate();
        assert!(eventually(SETTLE, || hooks.deallocated() == 2));
        assert_eq!(pool.get_metrics().currently_allocated, 0);
    }

    #[test]
    fn failing_passivation_destroys_instead_of_pooling() {
        let (allocator, hooks) = CountingAllocator::failing_passivate();
        let pool = ObjectPool::new(allocator, PoolConfiguration::new(1)).unwrap();

        let object = pool.claim().unwrap();
        drop(object);

        assert!(eventually(SETTLE, || hooks.deallocated() == 1));
        assert_eq!(pool.get_metrics().currently_allocated, 0);

        // Next claim allocates a replacement.
        let object = pool.claim().unwrap();
        assert_eq!(*object, 1);
        assert_eq!(hooks.allocated.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_activation_allocates_a_replacement() {
        let (allocator, hooks) = CountingAllocator::failing_activate_once();
        let pool = ObjectPool::new(allocator, PoolConfiguration::new(1)).unwrap();

        let object = pool.claim().unwrap();
        drop(object);

        let object = pool.claim().unwrap();
        assert_eq!(*object, 1, "replacement instance expected");
        assert_eq!(hooks.allocated.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.deallocated(), 1);
        assert_eq!(pool.get_metrics().currently_allocated, 1);
        assert_eq!(pool.get_metrics().total_claimed, 2);
    }

    #[test]
    fn failed_allocation_surfaces_and_frees_the_slot() {
        let (allocator, hooks) = CountingAllocator::failing_allocate_once();
        let pool = ObjectPool::new(allocator, PoolConfiguration::new(1)).unwrap();

        let error = pool.claim().unwrap_err();
        assert!(matches!(error, PoolError::AllocationFailed(_)));

        let object = pool.claim().unwrap();
        assert_eq!(*object, 0);
        assert_eq!(hooks.allocated.load(Ordering::SeqCst), 1);
        assert_eq!(pool.get_metrics().total_allocated, 1);
    }

    #[test]
    fn shutdown_rejects_new_claims_and_is_idempotent() {
        let (pool, hooks) = counting_pool(2);
        let object = pool.claim().unwrap();
        drop(object);

        let handle = pool.shutdown();
        assert!(matches!(pool.claim(), Err(PoolError::PoolNotRunning)));
        assert!(matches!(
            pool.claim_timeout(Duration::from_millis(10)),
            Err(PoolError::PoolNotRunning)
        ));
        assert!(handle.wait_timeout(SETTLE));

        let again = pool.shutdown();
        assert!(again.is_terminated());
        assert_eq!(hooks.deallocated(), 1);

        let metrics = pool.get_metrics();
        assert_eq!(metrics.currently_allocated, 0);
        assert_eq!(metrics.currently_claimed, 0);
        assert_eq!(metrics.currently_waiting_count, 0);
    }

    #[test]
    fn shutdown_waits_for_outstanding_claims() {
        let (pool, hooks) = counting_pool(1);
        let object = pool.claim().unwrap();

        let handle = pool.shutdown();
        assert!(!handle.wait_timeout(Duration::from_millis(100)));

        drop(object);
        assert!(handle.wait_timeout(SETTLE));
        assert_eq!(hooks.deallocated(), 1);
        assert_eq!(pool.get_metrics().currently_allocated, 0);
    }

    #[test]
    fn shutdown_wakes_blocked_claimers() {
        let (pool, _hooks) = counting_pool(1);
        let held = pool.claim().unwrap();

        let blocked = {
            let pool = pool.clone();
            thread::spawn(move || pool.claim().map(|_| ()))
        };
        assert!(eventually(SETTLE, || {
            pool.get_metrics().currently_waiting_count == 1
        }));

        let handle = pool.shutdown();
        let outcome = blocked.join().unwrap();
        assert!(matches!(outcome, Err(PoolError::PoolNotRunning)));

        drop(held);
        assert!(handle.wait_timeout(SETTLE));
    }

    #[test]
    fn pools_are_independent() {
        let (pool1, _hooks1) = counting_pool(1);
        let (pool2, _hooks2) = counting_pool(1);

        let object = pool2.claim().unwrap();
        assert!(pool2.claim_timeout(Duration::from_millis(20)).unwrap().is_none());
        drop(object);
        let object = pool2.claim().unwrap();
        pool2.release(object);

        let metrics = pool1.get_metrics();
        assert_eq!(metrics.currently_claimed, 0);
        assert_eq!(metrics.currently_waiting_count, 0);
        assert_eq!(metrics.total_allocated, 0);
        assert_eq!(metrics.total_claimed, 0);
    }

    #[test]
    fn expired_idle_handles_are_evicted_by_the_worker() {
        let (allocator, hooks) = CountingAllocator::new();
        let config = PoolConfiguration::new(2).with_expiration_policy(
            IdleTimeoutPolicy::new(Duration::from_millis(30))
                .with_check_interval(Duration::from_millis(10)),
        );
        let pool = ObjectPool::new(allocator, config).unwrap();

        let object = pool.claim().unwrap();
        drop(object);

        assert!(eventually(SETTLE, || hooks.deallocated() == 1));
        assert!(eventually(SETTLE, || {
            pool.get_metrics().currently_allocated == 0
        }));

        // The pool keeps serving claims after the eviction.
        let object = pool.claim().unwrap();
        assert_eq!(*object, 1);
    }

    #[test]
    fn warm_core_fills_without_activation() {
        let (allocator, hooks) = CountingAllocator::new();
        let config = PoolConfiguration::new(4).with_core_poolsize(2);
        let pool = ObjectPool::new(allocator, config).unwrap();

        assert!(eventually(SETTLE, || {
            pool.get_metrics().currently_allocated == 2
        }));
        assert_eq!(hooks.allocated.load(Ordering::SeqCst), 2);

        // First hand-out of a core-filled instance skips allocate_for_reuse.
        let object = pool.claim().unwrap();
        assert_eq!(hooks.activated.load(Ordering::SeqCst), 0);
        assert_eq!(object.metadata().claim_count(), 1);
        drop(object);

        let handle = pool.shutdown();
        assert!(handle.wait_timeout(SETTLE));
        assert_eq!(hooks.deallocated(), 2);
    }

    #[test]
    fn core_is_refilled_after_invalidation() {
        let (allocator, hooks) = CountingAllocator::new();
        let config = PoolConfiguration::new(2).with_core_poolsize(1);
        let pool = ObjectPool::new(allocator, config).unwrap();

        assert!(eventually(SETTLE, || {
            pool.get_metrics().currently_allocated == 1
        }));

        let object = pool.claim().unwrap();
        object.invalidate();

        assert!(eventually(SETTLE, || {
            hooks.allocated.load(Ordering::SeqCst) == 2
                && pool.get_metrics().currently_allocated == 1
        }));
        assert_eq!(hooks.deallocated(), 1);
    }

    #[test]
    fn many_threads_share_a_single_instance() {
        let (pool, hooks) = counting_pool(1);
        let mut workers = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            workers.push(thread::spawn(move || {
                for _ in 0..5 {
                    let object = pool.claim().unwrap();
                    thread::sleep(Duration::from_millis(1));
                    drop(object);
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(hooks.allocated.load(Ordering::SeqCst), 1);
        let metrics = pool.get_metrics();
        assert_eq!(metrics.total_claimed, 40);
        assert_eq!(metrics.currently_claimed, 0);
        assert_eq!(metrics.currently_allocated, 1);
    }

    #[test]
    fn capacity_bound_holds_under_contention() {
        let (pool, _hooks) = counting_pool(4);
        let done = Arc::new(AtomicBool::new(false));
        let successes = Arc::new(AtomicUsize::new(0));

        let sampler = {
            let pool = pool.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let metrics = pool.get_metrics();
                    assert!(metrics.currently_allocated <= 4);
                    assert!(metrics.currently_claimed <= metrics.currently_allocated);
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let mut workers = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let successes = Arc::clone(&successes);
            workers.push(thread::spawn(move || {
                for round in 0..30 {
                    let object = pool.claim_timeout(Duration::from_secs(2)).unwrap();
                    if let Some(object) = object {
                        successes.fetch_add(1, Ordering::SeqCst);
                        if round % 7 == 0 {
                            thread::sleep(Duration::from_millis(1));
                        }
                        drop(object);
                    }
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        sampler.join().unwrap();

        let metrics = pool.get_metrics();
        assert_eq!(metrics.total_claimed, successes.load(Ordering::SeqCst) as u64);
        assert_eq!(metrics.currently_claimed, 0);
        assert_eq!(metrics.currently_waiting_count, 0);
        assert!(metrics.currently_allocated <= 4);
    }

    #[test]
    fn zero_timeout_acts_as_try_claim() {
        let (pool, _hooks) = counting_pool(1);
        let held = pool.claim().unwrap();

        let outcome = pool.claim_timeout(Duration::ZERO).unwrap();
        assert!(outcome.is_none());
        assert_eq!(pool.get_metrics().currently_waiting_count, 0);
        drop(held);
    }

    #[test]
    fn claimed_handle_state_is_visible_through_metadata() {
        let pool = ObjectPool::new(
            FnAllocator::new(|| vec![1u8, 2, 3]),
            PoolConfiguration::new(2),
        )
        .unwrap();

        let mut object = pool.claim().unwrap();
        assert_eq!(object.metadata().state(), HandleState::Claimed);
        assert_eq!(object.metadata().claim_count(), 1);
        object.push(4);
        assert_eq!(object.len(), 4);
    }
}

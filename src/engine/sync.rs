//! Dispatch and join primitives for the parallel query strategies.
//!
//! Work items are handed to the pool through [`fan_out`], which splits the
//! item list with `rayon::join`. The jobs it creates live on the stack of
//! the splitting thread, so dispatch does not allocate. The calling thread
//! must not return (or move on to the next table) until every item has
//! finished. Two completion counters are provided:
//!
//! - [`SpinCounter`]: an atomic count of outstanding items, waited on by
//!   spinning with periodic yields.
//! - [`CountdownEvent`]: a counter that starts at one (the caller's own
//!   share), is raised once per queued item, and wakes waiters through a
//!   condition variable when it reaches zero.
//!
//! When the waiting thread is itself a pool worker it keeps executing pool
//! jobs while it waits, so nested parallel calls cannot starve the pool.
//!
//! Each item holds a [`JoinGuard`] that signals completion on drop, so a
//! panicking item still balances the counter; `rayon::join` finishes the
//! sibling half before the panic is re-raised.

use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::engine::config::WaitPolicy;

const POOL_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Runs `run` once per item on the current rayon pool.
///
/// Halves the list with `rayon::join` until single items remain; idle
/// workers steal the halves. Must be called from inside the pool (for
/// example through `ThreadPool::install`) to use that pool's workers.
pub(crate) fn fan_out<T, F>(items: &[T], run: &F)
where
    T: Copy + Sync,
    F: Fn(T) + Sync,
{
    match items {
        [] => {}
        [item] => run(*item),
        _ => {
            let (left, right) = items.split_at(items.len() / 2);
            rayon::join(|| fan_out(left, run), || fan_out(right, run));
        }
    }
}

/// Outstanding-work counter waited on by spinning.
#[derive(Default)]
pub struct SpinCounter {
    pending: AtomicUsize,
}

impl SpinCounter {
    /// Creates a counter with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `count` more outstanding items.
    #[inline]
    pub fn add(&self, count: usize) {
        self.pending.fetch_add(count, Ordering::AcqRel);
    }

    /// Marks one item finished.
    #[inline]
    pub fn done(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0);
    }

    /// Items not yet finished.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Spins until nothing is pending, yielding every `spins_before_yield` checks.
    pub fn wait(&self, spins_before_yield: u32) {
        let limit = spins_before_yield.max(1);
        let mut spins = 0u32;
        while self.pending() > 0 {
            spins += 1;
            if spins < limit {
                hint::spin_loop();
                continue;
            }
            spins = 0;
            if !matches!(rayon::yield_now(), Some(rayon::Yield::Executed)) {
                thread::yield_now();
            }
        }
    }
}

/// Counter that releases waiters when it reaches zero.
///
/// The count is atomic; the mutex is only taken by waiters and by the
/// signal that reaches zero.
pub struct CountdownEvent {
    count: AtomicUsize,
    lock: Mutex<()>,
    zero: Condvar,
}

impl CountdownEvent {
    /// Creates an event with `initial` outstanding signals.
    pub fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
            lock: Mutex::new(()),
            zero: Condvar::new(),
        }
    }

    /// Sets the outstanding signal count. Must not race with waiters.
    pub fn reset(&self, initial: usize) {
        self.count.store(initial, Ordering::Release);
    }

    /// Raises the count by `count`.
    #[inline]
    pub fn add_count(&self, count: usize) {
        self.count.fetch_add(count, Ordering::AcqRel);
    }

    /// Lowers the count by one. Returns `true` if this signal reached zero.
    pub fn signal(&self) -> bool {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "countdown signalled below zero");
        if previous != 1 {
            return false;
        }
        let _guard = self.lock.lock();
        self.zero.notify_all();
        true
    }

    /// Signals not yet received.
    #[inline]
    pub fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Blocks until the count is zero.
    pub fn wait(&self) {
        if self.current() == 0 {
            return;
        }
        if rayon::current_thread_index().is_none() {
            let mut guard = self.lock.lock();
            while self.current() > 0 {
                self.zero.wait(&mut guard);
            }
            return;
        }

        loop {
            if self.current() == 0 {
                return;
            }
            if matches!(rayon::yield_now(), Some(rayon::Yield::Executed)) {
                continue;
            }
            let mut guard = self.lock.lock();
            if self.current() == 0 {
                return;
            }
            self.zero.wait_for(&mut guard, POOL_POLL_INTERVAL);
        }
    }
}

/// Join used by one parallel strategy call.
pub(crate) enum Join<'a> {
    Spin {
        pending: SpinCounter,
        spins_before_yield: u32,
    },
    Block(&'a CountdownEvent),
}

impl<'a> Join<'a> {
    /// Arms a join for `policy`. A blocking join reuses `countdown`.
    pub(crate) fn new(policy: WaitPolicy, countdown: &'a CountdownEvent) -> Self {
        match policy {
            WaitPolicy::Spin { spins_before_yield } => Join::Spin {
                pending: SpinCounter::new(),
                spins_before_yield,
            },
            WaitPolicy::Block => {
                countdown.reset(1);
                Join::Block(countdown)
            }
        }
    }

    /// Registers `count` queued items.
    #[inline]
    pub(crate) fn enqueue(&self, count: usize) {
        match self {
            Join::Spin { pending, .. } => pending.add(count),
            Join::Block(countdown) => countdown.add_count(count),
        }
    }

    /// Guard that marks one queued item finished when dropped.
    #[inline]
    pub(crate) fn guard(&self) -> JoinGuard<'_, 'a> {
        JoinGuard { join: self }
    }

    fn complete(&self) {
        match self {
            Join::Spin { pending, .. } => pending.done(),
            Join::Block(countdown) => {
                countdown.signal();
            }
        }
    }

    /// Waits for every queued item and re-arms the join for reuse.
    pub(crate) fn wait(&self) {
        match self {
            Join::Spin {
                pending,
                spins_before_yield,
            } => pending.wait(*spins_before_yield),
            Join::Block(countdown) => {
                countdown.signal();
                countdown.wait();
                countdown.reset(1);
            }
        }
    }
}

/// Completion signal carried by a queued item.
pub(crate) struct JoinGuard<'j, 'a> {
    join: &'j Join<'a>,
}

impl Drop for JoinGuard<'_, '_> {
    fn drop(&mut self) {
        self.join.complete();
    }
}

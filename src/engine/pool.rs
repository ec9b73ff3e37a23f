//! Thread-safe object pools.
//!
//! Structural edits and parallel strategies need short-lived scratch objects
//! (masks for table lookup, partition lists for work splitting). Rather than
//! allocating them per call, they are rented from a [`Pool`] and released
//! back when done. A pool is a bounded lock-free bag backed by an array
//! flavoured `crossbeam-channel`, whose slots are allocated once when the
//! pool is built: renting pops any available item or creates a fresh one,
//! releasing resets the item and pushes it back, dropping it instead when
//! the pool is already full.
//!
//! ## Invariants
//! - Every item handed out by `rent` is in its reset state.
//! - Renting and releasing are safe from any thread and never allocate.
//! - At most `capacity` items sit idle in a pool.

use std::sync::OnceLock;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::engine::mask::Mask;
use crate::engine::types::{MASK_POOL_PREWARM, POOL_CAPACITY};

/// Items that can be returned to a [`Pool`].
pub trait Recycle: Default + Send {
    /// Restores the item to its freshly-constructed state, keeping allocations.
    fn recycle(&mut self);
}

impl Recycle for Mask {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl<T: Send> Recycle for Vec<T> {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// Bounded bag of reusable items.
pub struct Pool<T: Recycle> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T: Recycle> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Recycle> Pool<T> {
    /// Creates an empty pool holding up to [`POOL_CAPACITY`] idle items.
    pub fn new() -> Self {
        Self::with_capacity(POOL_CAPACITY)
    }

    /// Creates an empty pool holding up to `capacity` idle items.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Creates a pool holding `count` fresh items.
    pub fn with_prewarm(count: usize) -> Self {
        let pool = Self::with_capacity(POOL_CAPACITY.max(count));
        for _ in 0..count {
            pool.release(T::default());
        }
        pool
    }

    /// Takes an item from the pool, or builds a new one if it is empty.
    #[inline]
    pub fn rent(&self) -> T {
        self.receiver.try_recv().unwrap_or_default()
    }

    /// Resets `item` and makes it available to later `rent` calls. A full
    /// pool drops the item.
    #[inline]
    pub fn release(&self, mut item: T) {
        item.recycle();
        let _ = self.sender.try_send(item);
    }

    /// Number of items currently waiting in the pool.
    #[inline]
    pub fn available(&self) -> usize {
        self.receiver.len()
    }
}

static MASK_POOL: OnceLock<Pool<Mask>> = OnceLock::new();

/// Process-wide pool of [`Mask`] values.
pub struct MaskPool;

impl MaskPool {
    fn pool() -> &'static Pool<Mask> {
        MASK_POOL.get_or_init(|| Pool::with_prewarm(MASK_POOL_PREWARM))
    }

    /// Rents an empty mask.
    #[inline]
    pub fn rent() -> Mask {
        Self::pool().rent()
    }

    /// Clears `mask` and returns it to the pool.
    #[inline]
    pub fn release(mask: Mask) {
        Self::pool().release(mask);
    }

    /// Masks currently idle in the pool.
    #[inline]
    pub fn available() -> usize {
        Self::pool().available()
    }
}

//! Runtime borrow tracking for component columns.
//!
//! Every query execution and every single-entity guard hands out `&mut`
//! references into columns. The [`BorrowTracker`] records, per component id,
//! whether such references are currently live, so that two overlapping
//! accesses to the same component (two queries running concurrently, or a
//! `get` issued from inside a `run` callback over the same component) are
//! rejected with [`ExecutionError::BorrowConflict`] instead of aliasing.
//!
//! Acquisition never waits: a same-thread nested access would otherwise
//! deadlock. Neither acquisition nor release allocates once a component's
//! flag segment exists.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::engine::error::{ExecutionError, InvalidAccessReason};
use crate::engine::types::{
    ComponentID, BORROW_SEGMENT_BASE, COMPONENT_CAP, MAX_BORROWED_COMPONENTS,
};

const SEGMENTS: usize = (usize::BITS - (COMPONENT_CAP + BORROW_SEGMENT_BASE - 1).leading_zeros()) as usize
    - BORROW_SEGMENT_BASE.trailing_zeros() as usize;

/// Per-component exclusive borrow flags.
///
/// Flags live in segments of doubling size, each allocated the first time an
/// id inside it is borrowed, so the tracker covers every id the registry can
/// hand out without reserving space for all of them.
pub struct BorrowTracker {
    segments: [OnceLock<Box<[AtomicBool]>>; SEGMENTS],
}

impl Default for BorrowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BorrowTracker {
    /// Creates a tracker with every component unborrowed.
    pub fn new() -> Self {
        Self {
            segments: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    #[inline]
    fn locate(component_id: ComponentID) -> (usize, usize) {
        let slot = component_id as usize + BORROW_SEGMENT_BASE;
        let segment = (slot.ilog2() - BORROW_SEGMENT_BASE.ilog2()) as usize;
        (segment, slot - (BORROW_SEGMENT_BASE << segment))
    }

    fn flag(&self, component_id: ComponentID) -> Option<&AtomicBool> {
        let (index, offset) = Self::locate(component_id);
        self.segments
            .get(index)?
            .get_or_init(|| {
                (0..BORROW_SEGMENT_BASE << index)
                    .map(|_| AtomicBool::new(false))
                    .collect()
            })
            .get(offset)
    }

    fn existing_flag(&self, component_id: ComponentID) -> Option<&AtomicBool> {
        let (index, offset) = Self::locate(component_id);
        self.segments.get(index)?.get()?.get(offset)
    }

    /// Attempts to take the exclusive borrow of `component_id`.
    ///
    /// ## State Transition
    /// `false → true`, or [`ExecutionError::BorrowConflict`] if already set.

    pub fn try_acquire(&self, component_id: ComponentID) -> Result<(), ExecutionError> {
        let conflict = ExecutionError::BorrowConflict { component_id };
        self.flag(component_id)
            .ok_or(conflict)?
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| conflict)
    }

    /// Releases a borrow taken by [`BorrowTracker::try_acquire`].
    pub fn release(&self, component_id: ComponentID) {
        let previous = self
            .existing_flag(component_id)
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel));
        debug_assert!(previous, "released component {component_id} that was not borrowed");
    }

    /// Returns `true` if `component_id` is currently borrowed.
    pub fn is_borrowed(&self, component_id: ComponentID) -> bool {
        self.existing_flag(component_id)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

/// RAII guard over a set of component borrows.
///
/// Created with all borrows taken or none; drops release them. The ids are
/// held inline.
pub struct BorrowGuard<'a> {
    tracker: &'a BorrowTracker,
    held: [ComponentID; MAX_BORROWED_COMPONENTS],
    len: usize,
}

impl<'a> BorrowGuard<'a> {
    /// Borrows every id in `component_ids`.
    ///
    /// ## Errors
    /// - [`ExecutionError::InvalidQueryAccess`] if an id repeats or more than
    ///   [`MAX_BORROWED_COMPONENTS`] ids are requested.
    /// - [`ExecutionError::BorrowConflict`] if any id is already borrowed; ids
    ///   taken before the failure are released again.

    pub fn new(tracker: &'a BorrowTracker, component_ids: &[ComponentID]) -> Result<Self, ExecutionError> {
        if let Some(&extra) = component_ids.get(MAX_BORROWED_COMPONENTS) {
            return Err(ExecutionError::InvalidQueryAccess {
                component_id: extra,
                reason: InvalidAccessReason::TooManyComponents,
            });
        }

        let mut sorted = [0; MAX_BORROWED_COMPONENTS];
        let keys = &mut sorted[..component_ids.len()];
        keys.copy_from_slice(component_ids);
        keys.sort_unstable();
        if let Some(pair) = keys.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ExecutionError::InvalidQueryAccess {
                component_id: pair[0],
                reason: InvalidAccessReason::DuplicateComponent,
            });
        }

        let mut guard = BorrowGuard {
            tracker,
            held: [0; MAX_BORROWED_COMPONENTS],
            len: 0,
        };
        for &component_id in keys.iter() {
            // On error `guard` drops here and releases what it holds.
            tracker.try_acquire(component_id)?;
            guard.held[guard.len] = component_id;
            guard.len += 1;
        }
        Ok(guard)
    }
}

impl Drop for BorrowGuard<'_> {
    fn drop(&mut self) {
        for &component_id in self.held[..self.len].iter().rev() {
            self.tracker.release(component_id);
        }
    }
}

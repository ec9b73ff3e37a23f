//! Column storage for component values.
//!
//! A [`Column<T>`] is one densely packed array of component values of a single
//! type. A table owns one column per component key plus its identity column;
//! all of them advance in lockstep so that index `i` of every column describes
//! the same entity.
//!
//! ## Shared mutation
//!
//! Query strategies hand out `&mut T` for disjoint rows to several worker
//! threads while the table itself is only shared (`&Table`). To make that
//! sound without a lock per element, every slot is wrapped in an
//! [`UnsafeCell`] and the column exposes a raw [`ColumnPtr`] derived through
//! [`UnsafeCell::raw_get`]. The pointer is only valid while the owning world
//! is locked: structural edits, the only operations that reallocate or move
//! slots, require exclusive access to the table and are deferred while any
//! lock is held.
//!
//! ## Invariants
//! - `len()` equals the owning table's row count between operations.
//! - A [`ColumnPtr`] never outlives the world lock it was created under.
//! - Callers never produce two live `&mut T` to the same slot; the borrow
//!   tracker and row partitioning enforce this.

use std::{
    any::{type_name, Any, TypeId},
    cell::UnsafeCell,
    marker::PhantomData,
    slice,
};

use crate::engine::error::TypeMismatchError;

/// Dense storage for values of one component type.
pub struct Column<T> {
    data: Vec<UnsafeCell<T>>,
}

// SAFETY: slots are only mutated through `ColumnPtr`, whose users guarantee
// that no two threads touch the same row (see the module docs).
unsafe impl<T: Send + Sync> Sync for Column<T> {}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Column<T> {
    /// Creates an empty column.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Number of stored values.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the column stores no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends a value.
    #[inline]
    pub fn push(&mut self, value: T) {
        self.data.push(UnsafeCell::new(value));
    }

    /// Exclusive view of all stored values.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.data.len();
        // SAFETY: `UnsafeCell<T>` is `repr(transparent)` and `&mut self`
        // guarantees no other access.
        unsafe { slice::from_raw_parts_mut(self.data.as_mut_ptr().cast::<T>(), len) }
    }

    /// Raw shared-mutation handle for the current allocation.
    #[inline]
    pub(crate) fn column_ptr(&self) -> ColumnPtr<T> {
        ColumnPtr {
            ptr: UnsafeCell::raw_get(self.data.as_ptr()),
            len: self.data.len(),
        }
    }
}

/// Copyable raw handle to a column's slots, valid while the world is locked.
#[doc(hidden)]
pub struct ColumnPtr<T> {
    ptr: *mut T,
    len: usize,
}

impl<T> Clone for ColumnPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ColumnPtr<T> {}

// SAFETY: the handle only carries an address; exclusivity per row is
// guaranteed by the executing strategy.
unsafe impl<T: Send> Send for ColumnPtr<T> {}
unsafe impl<T: Send + Sync> Sync for ColumnPtr<T> {}

impl<T> ColumnPtr<T> {
    /// # Safety
    /// `row < len`, the allocation is still alive, and no other reference to
    /// this slot exists for `'a`.
    #[inline]
    pub(crate) unsafe fn get_mut<'a>(self, row: usize) -> &'a mut T {
        debug_assert!(row < self.len);
        unsafe { &mut *self.ptr.add(row) }
    }

    /// # Safety
    /// `start + len <= self.len`, the allocation is still alive, and the range
    /// is not aliased for `'a`.
    #[inline]
    pub(crate) unsafe fn slice_mut<'a>(self, start: usize, len: usize) -> &'a mut [T] {
        debug_assert!(start + len <= self.len);
        unsafe { slice::from_raw_parts_mut(self.ptr.add(start), len) }
    }

    /// # Safety
    /// As [`ColumnPtr::slice_mut`] over the whole column.
    #[inline]
    pub(crate) unsafe fn raw<'a>(self) -> RawColumn<'a, T> {
        RawColumn {
            ptr: self.ptr,
            len: self.len,
            _marker: PhantomData,
        }
    }
}

/// Unchecked view of a whole column for interop and vectorised code.
///
/// Handed to `raw` callbacks; the lifetime keeps it from escaping the call.
pub struct RawColumn<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: a `RawColumn` is an exclusive view, like `&mut [T]`.
unsafe impl<T: Send> Send for RawColumn<'_, T> {}

impl<'a, T> RawColumn<'a, T> {
    /// Number of elements in the block.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the block is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the block. Valid for `len()` elements during the callback.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr
    }

    /// Reborrows the block as a slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: constructed from a live, exclusively borrowed column range.
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Converts the view into a slice for the rest of the callback.
    #[inline]
    pub fn into_slice(self) -> &'a mut [T] {
        // SAFETY: as `as_mut_slice`; `self` is consumed.
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl<T: bytemuck::Pod> RawColumn<'_, T> {
    /// Byte view of the block for upload or serialization.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: as `as_mut_slice`, read-only.
        let values = unsafe { slice::from_raw_parts(self.ptr as *const T, self.len) };
        bytemuck::cast_slice(values)
    }

    /// Mutable byte view of the block.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(self.as_mut_slice())
    }
}

/// Type-erased interface over [`Column<T>`] used by tables and the archetype graph.
///
/// Implementers must return `self` from `as_any` / `as_any_mut` so callers
/// can downcast back to `Column<T>`. Every mutating method keeps the column
/// dense; row alignment across columns is the table's responsibility.

pub trait TypeErasedColumn: Any + Send + Sync {
    /// Returns an immutable type-erased reference for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable type-erased reference for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Returns the `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Returns the name of the element type.
    fn element_type_name(&self) -> &'static str;

    /// Number of stored values.
    fn len(&self) -> usize;

    /// Returns `true` if the column stores no values.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated slots.
    fn capacity(&self) -> usize;

    /// Grows the allocation to hold at least `capacity` values in total.
    fn reserve_total(&mut self, capacity: usize);

    /// Appends a boxed value of the element type.
    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<(), TypeMismatchError>;

    /// Overwrites the value at `row`.
    fn replace_dyn(&mut self, row: usize, value: Box<dyn Any + Send>) -> Result<(), TypeMismatchError>;

    /// Removes `row`, back-filling it with the last value, and drops it.
    fn swap_remove_drop(&mut self, row: usize);

    /// Swap-removes `row` and appends its value to `destination`.
    fn move_row_into(
        &mut self,
        row: usize,
        destination: &mut dyn TypeErasedColumn,
    ) -> Result<(), TypeMismatchError>;

    /// Shortens the column, dropping the tail.
    fn truncate(&mut self, len: usize);
}

impl<T: Send + Sync + 'static> TypeErasedColumn for Column<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn element_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn capacity(&self) -> usize {
        self.data.capacity()
    }

    fn reserve_total(&mut self, capacity: usize) {
        if capacity > self.data.capacity() {
            self.data.reserve_exact(capacity - self.data.len());
        }
    }

    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<(), TypeMismatchError> {
        let value = value.downcast::<T>().map_err(|_| TypeMismatchError {
            expected: type_name::<T>(),
            found: "a value of another type",
        })?;
        self.data.push(UnsafeCell::new(*value));
        Ok(())
    }

    fn replace_dyn(&mut self, row: usize, value: Box<dyn Any + Send>) -> Result<(), TypeMismatchError> {
        let value = value.downcast::<T>().map_err(|_| TypeMismatchError {
            expected: type_name::<T>(),
            found: "a value of another type",
        })?;
        *self.data[row].get_mut() = *value;
        Ok(())
    }

    fn swap_remove_drop(&mut self, row: usize) {
        self.data.swap_remove(row);
    }

    fn move_row_into(
        &mut self,
        row: usize,
        destination: &mut dyn TypeErasedColumn,
    ) -> Result<(), TypeMismatchError> {
        let found = destination.element_type_name();
        let destination = destination
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .ok_or(TypeMismatchError {
                expected: type_name::<T>(),
                found,
            })?;
        let value = self.data.swap_remove(row);
        destination.data.push(value);
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }
}

//! Archetype tables.
//!
//! A [`Table`] stores every entity whose component-key set equals the table's
//! [`Mask`]. Data is laid out column-major: one [`Column`] per component key
//! plus an identity column naming the entity in each row. All columns share
//! the same length (the table's row count) and the same logical capacity,
//! which grows by doubling from the world's configured initial capacity.
//!
//! Rows are removed by swap-remove. When the removed row was not the last,
//! the last row is moved into the hole and [`RowRemoval::Backfilled`] names
//! the entity whose location the caller must patch.
//!
//! ## Invariants
//! - Every column length equals `identities.len()`.
//! - `component_ids` is sorted ascending and parallel to `columns`.
//! - The identity in row `i` is an alive entity whose recorded location is
//!   `(table id, i)`.

use std::any::Any;

use crate::engine::bundle::Bundle;
use crate::engine::component::{
    component_description, lookup_component, make_empty_column, Component, ComponentKey,
};
use crate::engine::entity::Identity;
use crate::engine::error::{
    ECSError, ECSResult, MoveError, PositionOutOfBoundsError, SpawnError, TypeMismatchError,
};
use crate::engine::mask::Mask;
use crate::engine::storage::{Column, ColumnPtr, TypeErasedColumn};
use crate::engine::types::{ComponentID, RowID, TableID};

/// Outcome of a swap-remove.
#[must_use = "a back-filled row changes another entity's location"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowRemoval {
    /// The removed row was the last one; nothing moved.
    Tail,
    /// The last row was moved into the removed row's slot.
    Backfilled(Identity),
}

/// Column-major storage for all entities sharing one component-key set.
pub struct Table {
    table_id: TableID,
    mask: Mask,
    identities: Vec<Identity>,
    component_ids: Vec<ComponentID>,
    columns: Vec<Box<dyn TypeErasedColumn>>,
    capacity: usize,
    initial_capacity: usize,
}

impl Table {
    /// Creates an empty table with one column per id in `mask`.
    ///
    /// No storage is allocated until the first row arrives.

    pub fn new(table_id: TableID, mask: Mask, initial_capacity: usize) -> ECSResult<Self> {
        let component_ids: Vec<ComponentID> = mask.iter().collect();
        let columns = component_ids
            .iter()
            .map(|&id| make_empty_column(id))
            .collect::<ECSResult<Vec<_>>>()?;

        Ok(Self {
            table_id,
            mask,
            identities: Vec::new(),
            component_ids,
            columns,
            capacity: 0,
            initial_capacity: initial_capacity.max(1),
        })
    }

    /// Position of this table in the archetype graph.
    #[inline]
    pub fn id(&self) -> TableID {
        self.table_id
    }

    /// Component-key set of this table.
    #[inline]
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Number of rows.
    #[inline]
    pub fn count(&self) -> usize {
        self.identities.len()
    }

    /// Returns `true` if the table holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Rows the table can hold before its next growth step.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entity in each row.
    #[inline]
    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Component ids of this table, ascending.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentID] {
        &self.component_ids
    }

    /// Returns `true` if the table carries `component_id`.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        self.mask.has(component_id)
    }

    #[inline]
    fn column_index(&self, component_id: ComponentID) -> Option<usize> {
        self.component_ids.binary_search(&component_id).ok()
    }

    fn mismatch<T>(component_id: ComponentID) -> TypeMismatchError {
        TypeMismatchError {
            expected: component_description(component_id)
                .map(|desc| desc.name)
                .unwrap_or("a registered component"),
            found: std::any::type_name::<T>(),
        }
    }

    /// Typed column for `component_id`.
    ///
    /// ## Errors
    /// [`ECSError::TypeMismatch`] if the table lacks the id or stores another type.

    pub fn column<T: Component>(&self, component_id: ComponentID) -> ECSResult<&Column<T>> {
        let index = self
            .column_index(component_id)
            .ok_or_else(|| Self::mismatch::<T>(component_id))?;
        self.columns[index]
            .as_any()
            .downcast_ref::<Column<T>>()
            .ok_or_else(|| Self::mismatch::<T>(component_id).into())
    }

    /// Mutable slice over the `(T, target)` column, `count()` elements long.
    ///
    /// Pass [`Identity::NONE`] for a plain component.
    ///
    /// ## Errors
    /// [`ECSError::TypeMismatch`] if the table has no such column.

    pub fn get_column<T: Component>(&mut self, target: Identity) -> ECSResult<&mut [T]> {
        let key = ComponentKey::relation::<T>(target);
        let component_id = lookup_component(key).ok_or(TypeMismatchError {
            expected: "a column carried by this table",
            found: std::any::type_name::<T>(),
        })?;
        let index = self
            .column_index(component_id)
            .ok_or_else(|| Self::mismatch::<T>(component_id))?;
        let column = self.columns[index]
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .ok_or_else(|| Self::mismatch::<T>(component_id))?;
        Ok(column.as_mut_slice())
    }

    /// Shared-mutation handle used by query strategies.
    #[inline]
    pub(crate) fn column_ptr<T: Component>(&self, component_id: ComponentID) -> ECSResult<ColumnPtr<T>> {
        Ok(self.column::<T>(component_id)?.column_ptr())
    }

    fn ensure_capacity(&mut self, required: usize) {
        if required <= self.capacity {
            return;
        }
        let mut capacity = self.capacity.max(self.initial_capacity);
        while capacity < required {
            capacity = capacity.saturating_mul(2);
        }
        for column in &mut self.columns {
            column.reserve_total(capacity);
        }
        self.identities
            .reserve_exact(capacity - self.identities.len());
        self.capacity = capacity;
    }

    fn check_row(&self, row: RowID) -> Result<usize, PositionOutOfBoundsError> {
        let index = row as usize;
        if index >= self.count() {
            return Err(PositionOutOfBoundsError {
                table: self.table_id,
                row,
                count: self.count(),
            });
        }
        Ok(index)
    }

    fn missing(component_id: ComponentID) -> SpawnError {
        SpawnError::MissingComponent {
            component_id,
            name: component_description(component_id)
                .map(|desc| desc.name)
                .unwrap_or("unregistered"),
        }
    }

    /// Appends `identity` with values taken from `bundle`.
    ///
    /// ## Behavior
    /// Every column receives exactly one value. Values in `bundle` for ids the
    /// table does not carry are left in the bundle.
    ///
    /// ## Errors
    /// [`SpawnError::MissingComponent`] if the bundle lacks a column's value;
    /// the table is left unchanged.

    pub fn append_row(&mut self, identity: Identity, bundle: &mut Bundle) -> ECSResult<RowID> {
        if let Some(&absent) = self.component_ids.iter().find(|&&id| !bundle.contains(id)) {
            return Err(Self::missing(absent).into());
        }

        let row = self.count();
        self.ensure_capacity(row + 1);

        for index in 0..self.columns.len() {
            let component_id = self.component_ids[index];
            let pushed = match bundle.take(component_id) {
                Some(value) => self.columns[index].push_dyn(value).map_err(|mismatch| {
                    SpawnError::StoragePushFailed { component_id, mismatch }
                }),
                None => Err(Self::missing(component_id)),
            };
            if let Err(e) = pushed {
                for column in &mut self.columns[..index] {
                    column.truncate(row);
                }
                return Err(e.into());
            }
        }

        self.identities.push(identity);
        debug_assert!(self.columns.iter().all(|c| c.len() == self.count()));
        Ok(row as RowID)
    }

    /// Overwrites one value in place.
    pub(crate) fn replace_value(
        &mut self,
        row: RowID,
        component_id: ComponentID,
        value: Box<dyn Any + Send>,
    ) -> ECSResult<()> {
        let row = self.check_row(row)?;
        let index = self
            .column_index(component_id)
            .ok_or_else(|| ECSError::Internal(format!(
                "table {} has no column {component_id}",
                self.table_id
            )))?;
        self.columns[index].replace_dyn(row, value)?;
        Ok(())
    }

    /// Swap-removes `row` from every column, dropping its values.
    ///
    /// ## Errors
    /// [`PositionOutOfBoundsError`] if `row >= count()`.

    pub fn remove_row(&mut self, row: RowID) -> Result<RowRemoval, PositionOutOfBoundsError> {
        let index = self.check_row(row)?;
        for column in &mut self.columns {
            column.swap_remove_drop(index);
        }
        self.identities.swap_remove(index);
        Ok(self.removal_at(index))
    }

    #[inline]
    fn removal_at(&self, index: usize) -> RowRemoval {
        match self.identities.get(index) {
            Some(&moved) => RowRemoval::Backfilled(moved),
            None => RowRemoval::Tail,
        }
    }

    /// Moves `row` into `destination`.
    ///
    /// ## Behavior
    /// - Columns present in both tables transfer their value.
    /// - Columns only in `self` drop their value.
    /// - Columns only in `destination` take their value from `added`.
    ///
    /// Returns the new row in `destination` and the back-fill outcome in `self`.
    ///
    /// ## Errors
    /// Fails before touching either table if `row` is out of bounds or
    /// `added` lacks a destination-only value.

    pub fn move_row(
        &mut self,
        row: RowID,
        destination: &mut Table,
        added: &mut Bundle,
    ) -> ECSResult<(RowID, RowRemoval)> {
        let source_row = self.check_row(row)?;

        if let Some(&absent) = destination
            .component_ids
            .iter()
            .find(|&&id| !self.has(id) && !added.contains(id))
        {
            return Err(Self::missing(absent).into());
        }

        // Shared columns must agree before any of them is touched.
        for (index, column) in self.columns.iter().enumerate() {
            let component_id = self.component_ids[index];
            let Some(target) = destination.column_index(component_id) else {
                continue;
            };
            let target = destination.columns[target].as_ref();
            if target.element_type_id() != column.element_type_id() {
                let mismatch = TypeMismatchError {
                    expected: target.element_type_name(),
                    found: column.element_type_name(),
                };
                return Err(MoveError::ColumnTransfer { component_id, mismatch }.into());
            }
        }

        let destination_row = destination.count();
        destination.ensure_capacity(destination_row + 1);

        for index in 0..destination.columns.len() {
            let component_id = destination.component_ids[index];
            if self.has(component_id) {
                continue;
            }
            let pushed = match added.take(component_id) {
                Some(value) => destination.columns[index].push_dyn(value).map_err(|mismatch| {
                    SpawnError::StoragePushFailed { component_id, mismatch }
                }),
                None => Err(Self::missing(component_id)),
            };
            if let Err(e) = pushed {
                for column in &mut destination.columns {
                    column.truncate(destination_row);
                }
                return Err(e.into());
            }
        }

        for (index, column) in self.columns.iter_mut().enumerate() {
            let component_id = self.component_ids[index];
            match destination.column_index(component_id) {
                Some(target) => column
                    .move_row_into(source_row, destination.columns[target].as_mut())
                    .map_err(|mismatch| MoveError::ColumnTransfer { component_id, mismatch })?,
                None => column.swap_remove_drop(source_row),
            }
        }

        let identity = self.identities.swap_remove(source_row);
        destination.identities.push(identity);

        debug_assert!(self.columns.iter().all(|c| c.len() == self.count()));
        debug_assert!(destination.columns.iter().all(|c| c.len() == destination.count()));
        Ok((destination_row as RowID, self.removal_at(source_row)))
    }
}

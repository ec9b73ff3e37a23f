//! The archetype graph: every table of a world plus the structural edits that
//! move entities between them.
//!
//! Tables are appended as new component-key sets appear and are never
//! removed, so table ids are stable and query caches only need to look at
//! tables created since their last refresh. Each set maps to at most one
//! table through `table_index`.
//!
//! All methods here require exclusive access (`&mut self`). The world holds
//! the graph behind a reader-writer lock and only takes the write side when
//! no iteration is running; edits issued during iteration are queued as
//! [`Command`](crate::engine::commands::Command)s instead.
//!
//! ## Invariants
//! - `tables[i].id() == i`.
//! - Every entity with a location appears in exactly one row, and after any
//!   swap-remove the back-filled entity's location is patched before the
//!   operation returns.

use std::any::Any;
use std::collections::HashMap;

use crate::engine::bundle::Bundle;
use crate::engine::entity::{Entities, EntityLocation, Identity};
use crate::engine::error::{ECSError, ECSResult, MoveError, NotInStorageError};
use crate::engine::mask::Mask;
use crate::engine::pool::MaskPool;
use crate::engine::table::{RowRemoval, Table};
use crate::engine::types::{ComponentID, RowID, TableID};

/// Owner of all tables of one world.
pub struct ArchetypeGraph {
    tables: Vec<Table>,
    table_index: HashMap<Mask, TableID>,
    initial_table_capacity: usize,
}

impl ArchetypeGraph {
    /// Creates a graph containing only the empty-set table.
    pub fn new(initial_table_capacity: usize) -> ECSResult<Self> {
        let mut graph = Self {
            tables: Vec::new(),
            table_index: HashMap::new(),
            initial_table_capacity,
        };
        graph.find_or_create(Mask::new())?;
        Ok(graph)
    }

    /// All tables in creation order.
    #[inline]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Table by id.
    #[inline]
    pub fn table(&self, table_id: TableID) -> Option<&Table> {
        self.tables.get(table_id as usize)
    }

    /// Number of tables ever created.
    #[inline]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Id of the table for `mask`, creating it on first use.
    ///
    /// Takes ownership of `mask`: it becomes the new table's key, or goes
    /// back to the mask pool if the table already exists.

    pub fn find_or_create(&mut self, mask: Mask) -> ECSResult<TableID> {
        if let Some(&table_id) = self.table_index.get(&mask) {
            MaskPool::release(mask);
            return Ok(table_id);
        }

        let table_id = TableID::try_from(self.tables.len())
            .map_err(|_| ECSError::Internal("table id space exhausted".into()))?;
        let table = Table::new(table_id, mask.clone(), self.initial_table_capacity)?;
        tracing::debug!(
            table_id,
            components = ?table.component_ids(),
            "created table"
        );
        self.tables.push(table);
        self.table_index.insert(mask, table_id);
        Ok(table_id)
    }

    fn table_mut(&mut self, table_id: TableID) -> Result<&mut Table, MoveError> {
        self.tables
            .get_mut(table_id as usize)
            .ok_or(MoveError::UnknownTable(table_id))
    }

    /// Mutable access to two distinct tables.
    fn table_pair_mut(
        &mut self,
        source: TableID,
        destination: TableID,
    ) -> Result<(&mut Table, &mut Table), MoveError> {
        if source == destination {
            return Err(MoveError::SameTable(source));
        }
        let count = self.tables.len();
        if source as usize >= count {
            return Err(MoveError::UnknownTable(source));
        }
        if destination as usize >= count {
            return Err(MoveError::UnknownTable(destination));
        }

        let (s, d) = (source as usize, destination as usize);
        if s < d {
            let (left, right) = self.tables.split_at_mut(d);
            Ok((&mut left[s], &mut right[0]))
        } else {
            let (left, right) = self.tables.split_at_mut(s);
            Ok((&mut right[0], &mut left[d]))
        }
    }

    fn require_location(entities: &Entities, identity: Identity) -> ECSResult<EntityLocation> {
        entities.location(identity)?.ok_or_else(|| {
            NotInStorageError {
                entity: identity,
                component: None,
            }
            .into()
        })
    }

    fn patch(
        entities: &mut Entities,
        table: TableID,
        row: RowID,
        removal: RowRemoval,
    ) -> ECSResult<()> {
        if let RowRemoval::Backfilled(moved) = removal {
            entities.set_location(moved, EntityLocation { table, row })?;
        }
        Ok(())
    }

    /// Places a freshly allocated `identity` into the table matching `bundle`.
    pub fn spawn(
        &mut self,
        entities: &mut Entities,
        identity: Identity,
        mut bundle: Bundle,
    ) -> ECSResult<EntityLocation> {
        let table_id = self.find_or_create(bundle.mask())?;
        let row = self.table_mut(table_id)?.append_row(identity, &mut bundle)?;
        let location = EntityLocation { table: table_id, row };
        entities.set_location(identity, location)?;
        Ok(location)
    }

    /// Removes the entity's row and frees its identity.
    pub fn despawn(&mut self, entities: &mut Entities, identity: Identity) -> ECSResult<()> {
        if let Some(location) = entities.location(identity)? {
            let removal = self.table_mut(location.table)?.remove_row(location.row)?;
            Self::patch(entities, location.table, location.row, removal)?;
        }
        entities.free(identity);
        Ok(())
    }

    /// Attaches a value for `component_id`, migrating the entity if needed.
    ///
    /// If the entity already carries the key its value is overwritten in place.

    pub fn add_component(
        &mut self,
        entities: &mut Entities,
        identity: Identity,
        component_id: ComponentID,
        value: Box<dyn Any + Send>,
    ) -> ECSResult<()> {
        let location = Self::require_location(entities, identity)?;
        let source = self.table_mut(location.table)?;
        if source.has(component_id) {
            return source.replace_value(location.row, component_id, value);
        }

        let mut mask = MaskPool::rent();
        mask.copy_from(source.mask());
        mask.add(component_id);
        let destination = self.find_or_create(mask)?;

        let mut added = Bundle::new();
        added.insert_raw(component_id, value);
        self.migrate(entities, identity, location, destination, &mut added)
    }

    /// Detaches `component_id`, migrating the entity. No-op if absent.
    pub fn remove_component(
        &mut self,
        entities: &mut Entities,
        identity: Identity,
        component_id: ComponentID,
    ) -> ECSResult<()> {
        let location = Self::require_location(entities, identity)?;
        let source = self.table_mut(location.table)?;
        if !source.has(component_id) {
            return Ok(());
        }

        let mut mask = MaskPool::rent();
        mask.copy_from(source.mask());
        mask.remove(component_id);
        let destination = self.find_or_create(mask)?;

        self.migrate(entities, identity, location, destination, &mut Bundle::new())
    }

    fn migrate(
        &mut self,
        entities: &mut Entities,
        identity: Identity,
        location: EntityLocation,
        destination_id: TableID,
        added: &mut Bundle,
    ) -> ECSResult<()> {
        let (source, destination) = self.table_pair_mut(location.table, destination_id)?;
        let (row, removal) = source.move_row(location.row, destination, added)?;
        entities.set_location(
            identity,
            EntityLocation {
                table: destination_id,
                row,
            },
        )?;
        Self::patch(entities, location.table, location.row, removal)
    }
}

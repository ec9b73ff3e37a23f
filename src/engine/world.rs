//! The world: archetype graph, entity index, worker pool and the
//! lock/deferral protocol that keeps iteration and structural edits apart.
//!
//! ## Concurrency model
//!
//! * The [`ArchetypeGraph`] lives behind a `parking_lot::RwLock`. Iteration
//!   and single-entity guards hold a [`WorldLock`], which bumps a shared
//!   depth counter and takes a recursive read guard. Structural edits take
//!   the write guard.
//! * A structural edit issued while the depth is non-zero (from a callback,
//!   or from any other thread) is recorded as a [`Command`] and returns
//!   [`EditOutcome::Deferred`]. When the last lock is released the queue is
//!   drained in order under the write guard.
//! * The entity index sits behind its own mutex and is always locked after
//!   the graph.
//! * Component-level aliasing between concurrently running queries and
//!   guards is rejected by the [`BorrowTracker`].
//!
//! ## Safety
//!
//! Column pointers handed to queries and [`ComponentRef`] guards stay valid
//! because tables are only reallocated or reordered under the write guard,
//! which cannot be taken while any [`WorldLock`] is alive.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::engine::borrow::{BorrowGuard, BorrowTracker};
use crate::engine::bundle::IntoBundle;
use crate::engine::commands::Command;
use crate::engine::component::{
    lookup_component, register_component, register_relation, Component, ComponentKey,
};
use crate::engine::config::WorldConfig;
use crate::engine::entity::{Entities, EntityLocation, Identity};
use crate::engine::error::{ECSError, ECSResult, NotInStorageError, StaleEntityError};
use crate::engine::graph::ArchetypeGraph;
use crate::engine::partition::Partition;
use crate::engine::pool::Pool;
use crate::engine::query::{QueryBuilder, QueryData};
use crate::engine::table::Table;
use crate::engine::types::ComponentID;

/// Whether a structural edit took effect immediately.
#[must_use = "a deferred edit is not visible until the world is unlocked"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// The edit is already visible.
    Applied,
    /// The world was locked; the edit is queued.
    Deferred,
}

/// Archetype storage for one simulation.
pub struct World {
    graph: RwLock<ArchetypeGraph>,
    entities: Mutex<Entities>,
    deferred: Mutex<Vec<Command>>,
    lock_depth: AtomicUsize,
    borrows: BorrowTracker,
    thread_pool: rayon::ThreadPool,
    partitions: Pool<Vec<Partition>>,
    max_parallelism: usize,
    config: WorldConfig,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entity_count())
            .field("tables", &self.table_count())
            .field("lock_depth", &self.lock_depth.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish()
    }
}

impl World {
    /// Creates a world with [`WorldConfig::default`].
    pub fn new() -> ECSResult<Self> {
        Self::with_config(WorldConfig::default())
    }

    /// Creates a world and its worker pool.
    ///
    /// ## Errors
    /// [`ECSError::ThreadPool`] if the worker threads cannot be started.

    pub fn with_config(config: WorldConfig) -> ECSResult<Self> {
        let prefix = config.thread_name_prefix.clone();
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(move |index| format!("{prefix}-{index}"));
        if let Some(threads) = config.worker_threads {
            builder = builder.num_threads(threads.max(1));
        }
        let thread_pool = builder.build()?;

        let max_parallelism = config
            .max_degree_of_parallelism
            .unwrap_or_else(|| thread_pool.current_num_threads())
            .max(1);

        let graph = ArchetypeGraph::new(config.initial_table_capacity)?;

        tracing::debug!(
            workers = thread_pool.current_num_threads(),
            max_parallelism,
            initial_table_capacity = config.initial_table_capacity,
            defer_structural_edits = config.defer_structural_edits,
            "built world"
        );

        Ok(Self {
            graph: RwLock::new(graph),
            entities: Mutex::new(Entities::new()),
            deferred: Mutex::new(Vec::new()),
            lock_depth: AtomicUsize::new(0),
            borrows: BorrowTracker::new(),
            thread_pool,
            partitions: Pool::new(),
            max_parallelism,
            config,
        })
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Partition cap used by `run_parallel`.
    #[inline]
    pub fn max_degree_of_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Threads in the worker pool.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    #[inline]
    pub(crate) fn thread_pool(&self) -> &rayon::ThreadPool {
        &self.thread_pool
    }

    #[inline]
    pub(crate) fn partition_pool(&self) -> &Pool<Vec<Partition>> {
        &self.partitions
    }

    #[inline]
    pub(crate) fn borrows(&self) -> &BorrowTracker {
        &self.borrows
    }

    // ── Lock protocol ──────────────────────────────────────────────────────

    /// Locks the world against structural edits until the guard is dropped.
    ///
    /// Locks nest and may be held from several threads at once. Edits issued
    /// meanwhile are queued and applied, in order, when the last lock goes.

    pub fn lock(&self) -> WorldLock<'_> {
        self.lock_depth.fetch_add(1, Ordering::AcqRel);
        let graph = self.graph.read_recursive();
        WorldLock {
            world: self,
            graph: Some(graph),
        }
    }

    /// Returns `true` while any [`WorldLock`] is alive.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock_depth.load(Ordering::Acquire) > 0
    }

    /// Structural edits waiting for the world to be unlocked.
    pub fn pending_commands(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Applies queued edits now if the world is unlocked. Returns how many
    /// succeeded; `0` while locked.
    pub fn apply_deferred(&self) -> usize {
        if self.is_locked() {
            return 0;
        }
        self.flush_deferred()
    }

    fn flush_deferred(&self) -> usize {
        if self.deferred.lock().is_empty() {
            return 0;
        }
        let mut graph = self.graph.write();
        self.apply_pending(&mut graph)
    }

    fn apply_pending(&self, graph: &mut ArchetypeGraph) -> usize {
        let commands = std::mem::take(&mut *self.deferred.lock());
        if commands.is_empty() {
            return 0;
        }

        let total = commands.len();
        let mut applied = 0;
        for command in commands {
            let kind = command.kind();
            let entity = command.identity();
            match self.execute(graph, command) {
                Ok(()) => applied += 1,
                Err(error) => tracing::warn!(%entity, kind, %error, "dropped deferred structural edit"),
            }
        }
        tracing::debug!(applied, total, "applied deferred structural edits");
        applied
    }

    fn execute(&self, graph: &mut ArchetypeGraph, command: Command) -> ECSResult<()> {
        let mut entities = self.entities.lock();
        match command {
            Command::Spawn { identity, bundle } => {
                if let Err(error) = graph.spawn(&mut entities, identity, bundle) {
                    entities.free(identity);
                    return Err(error);
                }
                Ok(())
            }
            Command::Despawn { identity } => graph.despawn(&mut entities, identity),
            Command::Add {
                identity,
                component_id,
                value,
            } => graph.add_component(&mut entities, identity, component_id, value),
            Command::Remove {
                identity,
                component_id,
            } => graph.remove_component(&mut entities, identity, component_id),
        }
    }

    fn edit(&self, command: Command) -> ECSResult<EditOutcome> {
        if self.is_locked() {
            if !self.config.defer_structural_edits {
                return Err(ECSError::ConcurrentStructuralEdit);
            }
            tracing::trace!(kind = command.kind(), entity = %command.identity(), "deferred structural edit");
            self.deferred.lock().push(command);
            // The last lock may have been released while we were queueing.
            if !self.is_locked() {
                self.flush_deferred();
            }
            return Ok(EditOutcome::Deferred);
        }

        let mut graph = self.graph.write();
        self.apply_pending(&mut graph);
        self.execute(&mut graph, command)?;
        Ok(EditOutcome::Applied)
    }

    // ── Structural edits ───────────────────────────────────────────────────

    /// Creates an entity carrying `components`.
    ///
    /// The identity is valid immediately, even when the world is locked and
    /// the row itself is deferred.
    ///
    /// ## Errors
    /// - Capacity or registration failures.
    /// - [`ECSError::StaleEntity`] if a relation in the bundle targets a dead entity.
    /// - [`ECSError::ConcurrentStructuralEdit`] while locked with deferral off.

    pub fn spawn(&self, components: impl IntoBundle) -> ECSResult<Identity> {
        let bundle = components.into_bundle()?;
        for &target in bundle.relation_targets() {
            self.ensure_alive(target)?;
        }
        let identity = self.entities.lock().allocate()?;
        if let Err(error) = self.edit(Command::Spawn { identity, bundle }) {
            self.entities.lock().free(identity);
            return Err(error);
        }
        Ok(identity)
    }

    /// Removes an entity and all of its components.
    ///
    /// ## Errors
    /// [`ECSError::StaleEntity`] if the entity is not alive.

    pub fn despawn(&self, entity: Identity) -> ECSResult<EditOutcome> {
        self.ensure_alive(entity)?;
        self.edit(Command::Despawn { identity: entity })
    }

    /// Attaches `value`, replacing an existing value of the same type.
    pub fn add_component<T: Component>(&self, entity: Identity, value: T) -> ECSResult<EditOutcome> {
        let component_id = register_component::<T>()?;
        self.ensure_alive(entity)?;
        self.edit(Command::Add {
            identity: entity,
            component_id,
            value: Box::new(value),
        })
    }

    /// Attaches the relation `T -> target`.
    ///
    /// ## Errors
    /// [`ECSError::StaleEntity`] if either entity is not alive.

    pub fn add_relation<T: Component>(
        &self,
        entity: Identity,
        target: Identity,
        value: T,
    ) -> ECSResult<EditOutcome> {
        self.ensure_alive(target)?;
        let component_id = register_relation::<T>(target)?;
        self.ensure_alive(entity)?;
        self.edit(Command::Add {
            identity: entity,
            component_id,
            value: Box::new(value),
        })
    }

    /// Detaches `T`. Removing an absent component is a no-op.
    pub fn remove_component<T: Component>(&self, entity: Identity) -> ECSResult<EditOutcome> {
        self.remove_key(entity, ComponentKey::of::<T>())
    }

    /// Detaches the relation `T -> target`.
    pub fn remove_relation<T: Component>(&self, entity: Identity, target: Identity) -> ECSResult<EditOutcome> {
        self.remove_key(entity, ComponentKey::relation::<T>(target))
    }

    fn remove_key(&self, entity: Identity, key: ComponentKey) -> ECSResult<EditOutcome> {
        self.ensure_alive(entity)?;
        match lookup_component(key) {
            Some(component_id) => self.edit(Command::Remove {
                identity: entity,
                component_id,
            }),
            None => Ok(EditOutcome::Applied),
        }
    }

    // ── Entity inspection ──────────────────────────────────────────────────

    /// Returns `true` if `entity` is alive.
    pub fn is_alive(&self, entity: Identity) -> bool {
        self.entities.lock().is_alive(entity)
    }

    fn ensure_alive(&self, entity: Identity) -> Result<(), StaleEntityError> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(StaleEntityError { entity })
        }
    }

    pub(crate) fn locate(&self, entity: Identity) -> ECSResult<EntityLocation> {
        self.entities.lock().location(entity)?.ok_or_else(|| {
            NotInStorageError {
                entity,
                component: None,
            }
            .into()
        })
    }

    /// Live entities, including deferred spawns.
    pub fn entity_count(&self) -> usize {
        self.entities.lock().live_count()
    }

    /// Tables created so far (never shrinks).
    pub fn table_count(&self) -> usize {
        self.graph.read_recursive().table_count()
    }

    fn has_key(&self, entity: Identity, key: ComponentKey) -> ECSResult<bool> {
        let graph = self.graph.read_recursive();
        let location = self.entities.lock().location(entity)?;
        let (Some(location), Some(component_id)) = (location, lookup_component(key)) else {
            return Ok(false);
        };
        Ok(graph
            .table(location.table)
            .is_some_and(|table| table.has(component_id)))
    }

    /// Returns `true` if the entity carries `T`.
    ///
    /// ## Errors
    /// [`ECSError::StaleEntity`] if the entity is not alive.

    pub fn has<T: Component>(&self, entity: Identity) -> ECSResult<bool> {
        self.has_key(entity, ComponentKey::of::<T>())
    }

    /// Returns `true` if the entity carries the relation `T -> target`.
    pub fn has_relation<T: Component>(&self, entity: Identity, target: Identity) -> ECSResult<bool> {
        self.has_key(entity, ComponentKey::relation::<T>(target))
    }

    /// Number of component keys the entity carries.
    pub fn component_count(&self, entity: Identity) -> ECSResult<usize> {
        let graph = self.graph.read_recursive();
        let location = self.entities.lock().location(entity)?;
        Ok(location
            .and_then(|location| graph.table(location.table))
            .map_or(0, |table| table.component_ids().len()))
    }

    fn get_key<T: Component>(&self, entity: Identity, component_id: ComponentID) -> ECSResult<ComponentRef<'_, T>> {
        let borrow = BorrowGuard::new(&self.borrows, &[component_id])?;
        let lock = self.lock();
        let location = self.locate(entity)?;
        let table = lock
            .table(location.table)
            .ok_or_else(|| ECSError::Internal(format!("entity {entity} points at a missing table")))?;
        if !table.has(component_id) {
            return Err(NotInStorageError {
                entity,
                component: Some(component_id),
            }
            .into());
        }
        let column = table.column_ptr::<T>(component_id)?;
        // SAFETY: the row is live, the lock pins the allocation, and the
        // borrow guard makes this the only reference to the column.
        let value = NonNull::from(unsafe { column.get_mut(location.row as usize) });
        Ok(ComponentRef {
            value,
            _borrow: borrow,
            _lock: lock,
            _marker: PhantomData,
        })
    }

    /// Guarded mutable access to one entity's `T`.
    ///
    /// The world stays locked while the guard lives, so structural edits are
    /// deferred until it is dropped.
    ///
    /// ## Errors
    /// - [`ECSError::StaleEntity`] for dead handles.
    /// - [`ECSError::NotInStorage`] if the entity lacks `T`.
    /// - [`ECSError::Execution`] if `T` is borrowed by a running query or guard.

    pub fn get<T: Component>(&self, entity: Identity) -> ECSResult<ComponentRef<'_, T>> {
        let component_id = register_component::<T>()?;
        self.get_key(entity, component_id)
    }

    /// Guarded mutable access to the relation `T -> target`.
    pub fn get_relation<T: Component>(&self, entity: Identity, target: Identity) -> ECSResult<ComponentRef<'_, T>> {
        let component_id = register_relation::<T>(target)?;
        self.get_key(entity, component_id)
    }

    /// Starts a query over the component tuple `Q`.
    ///
    /// ```ignore
    /// let movers = world.query::<(Position, Velocity)>().not::<Frozen>().build()?;
    /// movers.run(|p, v| p.0 += v.0)?;
    /// ```

    pub fn query<Q: QueryData>(&self) -> QueryBuilder<'_, Q> {
        QueryBuilder::new(self)
    }
}

/// Guard that keeps a world locked against structural edits.
pub struct WorldLock<'w> {
    world: &'w World,
    graph: Option<RwLockReadGuard<'w, ArchetypeGraph>>,
}

impl<'w> WorldLock<'w> {
    /// World this lock belongs to.
    #[inline]
    pub fn world(&self) -> &'w World {
        self.world
    }

    #[inline]
    pub(crate) fn graph(&self) -> &ArchetypeGraph {
        match &self.graph {
            Some(graph) => graph,
            None => unreachable!("world lock used after release"),
        }
    }

    /// All tables, in creation order.
    #[inline]
    pub fn tables(&self) -> &[Table] {
        self.graph().tables()
    }

    /// Table by id.
    #[inline]
    pub fn table(&self, table_id: crate::engine::types::TableID) -> Option<&Table> {
        self.graph().table(table_id)
    }
}

impl Drop for WorldLock<'_> {
    fn drop(&mut self) {
        drop(self.graph.take());
        if self.world.lock_depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.world.flush_deferred();
        }
    }
}

/// Guarded mutable reference to one component value.
pub struct ComponentRef<'w, T> {
    value: NonNull<T>,
    _borrow: BorrowGuard<'w>,
    _lock: WorldLock<'w>,
    _marker: PhantomData<&'w mut T>,
}

impl<T> Deref for ComponentRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see `World::get_key`.
        unsafe { self.value.as_ref() }
    }
}

impl<T> DerefMut for ComponentRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `World::get_key`.
        unsafe { self.value.as_mut() }
    }
}

impl<T: fmt::Debug> fmt::Debug for ComponentRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentRef").field(&**self).finish()
    }
}

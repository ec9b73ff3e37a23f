//! Cached, typed queries.
//!
//! A [`Query`] is built from a component tuple `Q` (one to five component
//! types, each accessed mutably) plus optional filters:
//!
//! * `has::<T>()` / `has_relation::<T>(target)`: tables must carry the key;
//! * `not::<T>()` / `not_relation::<T>(target)`: tables must not carry it;
//! * `any::<T>()` / `any_relation::<T>(target)`: tables must carry at least
//!   one key of the any-of set (an empty set matches everything).
//!
//! The query keeps the list of matching table ids. Tables are append-only,
//! so each execution only tests the tables created since the previous one.
//!
//! Every execution strategy (see [`strategies`](crate::engine::strategies))
//! goes through the same protocol: borrow the query's component ids, lock
//! the world, refresh the table cache, visit every non-empty matching table,
//! then release in reverse. Structural edits issued in the meantime are
//! applied when the lock is released.
//!
//! ## Invariants
//! - `ids[i]` is the component id of the `i`-th tuple element.
//! - The cache holds exactly the matching tables among the first `seen`.

use std::marker::PhantomData;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::engine::borrow::BorrowGuard;
use crate::engine::component::{
    register_component, register_relation, Component,
};
use crate::engine::config::WaitPolicy;
use crate::engine::entity::Identity;
use crate::engine::error::{
    ECSError, ECSResult, ExecutionError, InvalidAccessReason, NotInStorageError,
};
use crate::engine::graph::ArchetypeGraph;
use crate::engine::mask::Mask;
use crate::engine::partition::{split_chunks, split_even, Partition};
use crate::engine::pool::{MaskPool, Pool};
use crate::engine::storage::ColumnPtr;
use crate::engine::sync::{fan_out, CountdownEvent, Join};
use crate::engine::table::Table;
use crate::engine::types::{ComponentID, TableID};
use crate::engine::world::{World, WorldLock};

/// Work-item lists a query keeps for reuse. Executions of one query never
/// overlap, since each holds the query's component borrows.
const WORK_POOL_CAPACITY: usize = 2;

/// Component tuples a query can fetch.
///
/// Implemented for tuples of one to five [`Component`] types.
pub trait QueryData: 'static {
    #[doc(hidden)]
    type Columns: Copy + Send + Sync;

    /// Mutable references handed out for one row.
    type Refs<'a>;

    /// Number of components in the tuple.
    const ARITY: usize;

    /// Ids of the tuple's components, in tuple order.
    fn component_ids() -> ECSResult<Vec<ComponentID>>;

    #[doc(hidden)]
    fn columns(table: &Table, ids: &[ComponentID]) -> ECSResult<Self::Columns>;

    #[doc(hidden)]
    /// # Safety
    /// `row` is live in the table the columns came from, the world is
    /// locked, and no other reference to the row exists for `'a`.
    unsafe fn refs<'a>(columns: Self::Columns, row: usize) -> Self::Refs<'a>;
}

macro_rules! impl_query_data {
    ($count:expr; $(($name:ident, $index:tt)),+) => {
        impl<$($name: Component),+> QueryData for ($($name,)+) {
            type Columns = ($(ColumnPtr<$name>,)+);
            type Refs<'a> = ($(&'a mut $name,)+);

            const ARITY: usize = $count;

            fn component_ids() -> ECSResult<Vec<ComponentID>> {
                Ok(vec![$(register_component::<$name>()?),+])
            }

            fn columns(table: &Table, ids: &[ComponentID]) -> ECSResult<Self::Columns> {
                Ok(($(table.column_ptr::<$name>(ids[$index])?,)+))
            }

            unsafe fn refs<'a>(columns: Self::Columns, row: usize) -> Self::Refs<'a> {
                // SAFETY: forwarded from the caller; the ids are distinct, so
                // the columns are distinct allocations.
                unsafe { ($(columns.$index.get_mut(row),)+) }
            }
        }
    };
}

impl_query_data!(1; (A, 0));
impl_query_data!(2; (A, 0), (B, 1));
impl_query_data!(3; (A, 0), (B, 1), (C, 2));
impl_query_data!(4; (A, 0), (B, 1), (C, 2), (D, 3));
impl_query_data!(5; (A, 0), (B, 1), (C, 2), (D, 3), (E, 4));

/// Table filter sets, rented from the mask pool.
#[derive(Default)]
struct QueryFilter {
    required: Mask,
    excluded: Mask,
    any: Mask,
}

impl QueryFilter {
    fn rented() -> Self {
        Self {
            required: MaskPool::rent(),
            excluded: MaskPool::rent(),
            any: MaskPool::rent(),
        }
    }

    #[inline]
    fn accepts(&self, mask: &Mask) -> bool {
        mask.matches(&self.required, &self.excluded) && mask.matches_any(&self.any)
    }
}

impl Drop for QueryFilter {
    fn drop(&mut self) {
        MaskPool::release(std::mem::take(&mut self.required));
        MaskPool::release(std::mem::take(&mut self.excluded));
        MaskPool::release(std::mem::take(&mut self.any));
    }
}

/// One unit of parallel work: a table's columns and a row range of it.
#[derive(Clone, Copy)]
struct WorkItem<C> {
    columns: C,
    rows: Partition,
}

#[derive(Default)]
struct TableCache {
    matched: Vec<TableID>,
    seen: usize,
}

/// Builder for a [`Query`].
///
/// Filter methods never fail; a registration error (for example a filter on
/// the reserved [`Identity`] type) is reported by [`QueryBuilder::build`].
///
/// ## Example
/// ```ignore
/// let q = world
///     .query::<(Position,)>()
///     .has::<Visible>()
///     .not::<Frozen>()
///     .any::<Player>()
///     .any::<Npc>()
///     .build()?;
/// ```

pub struct QueryBuilder<'w, Q: QueryData> {
    world: &'w World,
    filter: QueryFilter,
    error: Option<ECSError>,
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: QueryData> QueryBuilder<'w, Q> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            filter: QueryFilter::rented(),
            error: None,
            _marker: PhantomData,
        }
    }

    fn with(mut self, id: ECSResult<ComponentID>, set: fn(&mut QueryFilter) -> &mut Mask) -> Self {
        match id {
            Ok(id) => set(&mut self.filter).add(id),
            Err(error) => {
                self.error.get_or_insert(error);
            }
        }
        self
    }

    /// Require `T` without fetching it.
    #[must_use]
    pub fn has<T: Component>(self) -> Self {
        self.with(register_component::<T>(), |f| &mut f.required)
    }

    /// Require the relation `T -> target`.
    #[must_use]
    pub fn has_relation<T: Component>(self, target: Identity) -> Self {
        self.with(register_relation::<T>(target), |f| &mut f.required)
    }

    /// Exclude tables carrying `T`.
    #[must_use]
    pub fn not<T: Component>(self) -> Self {
        self.with(register_component::<T>(), |f| &mut f.excluded)
    }

    /// Exclude tables carrying the relation `T -> target`.
    #[must_use]
    pub fn not_relation<T: Component>(self, target: Identity) -> Self {
        self.with(register_relation::<T>(target), |f| &mut f.excluded)
    }

    /// Add `T` to the any-of set.
    #[must_use]
    pub fn any<T: Component>(self) -> Self {
        self.with(register_component::<T>(), |f| &mut f.any)
    }

    /// Add the relation `T -> target` to the any-of set.
    #[must_use]
    pub fn any_relation<T: Component>(self, target: Identity) -> Self {
        self.with(register_relation::<T>(target), |f| &mut f.any)
    }

    /// Finalises the query.
    ///
    /// ## Errors
    /// - The first filter registration error, if any.
    /// - [`ECSError::TypeMismatch`] if `Q` contains [`Identity`].
    /// - [`ExecutionError::InvalidQueryAccess`] if `Q` repeats a type.

    pub fn build(self) -> ECSResult<Query<'w, Q>> {
        let QueryBuilder {
            world,
            mut filter,
            error,
            ..
        } = self;
        if let Some(error) = error {
            return Err(error);
        }

        let ids = Q::component_ids()?;
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ExecutionError::InvalidQueryAccess {
                component_id: pair[0],
                reason: InvalidAccessReason::DuplicateComponent,
            }
            .into());
        }
        for &id in &ids {
            filter.required.add(id);
        }

        Ok(Query {
            world,
            ids,
            filter,
            cache: RwLock::new(TableCache::default()),
            countdown: CountdownEvent::new(1),
            work: Pool::with_capacity(WORK_POOL_CAPACITY),
            _marker: PhantomData,
        })
    }
}

/// A cached query over the component tuple `Q`.
pub struct Query<'w, Q: QueryData> {
    world: &'w World,
    ids: Vec<ComponentID>,
    filter: QueryFilter,
    cache: RwLock<TableCache>,
    countdown: CountdownEvent,
    work: Pool<Vec<WorkItem<Q::Columns>>>,
    _marker: PhantomData<fn() -> Q>,
}

/// Borrow, lock and table cache held for one strategy call.
struct Execution<'q> {
    cache: RwLockReadGuard<'q, TableCache>,
    _borrow: BorrowGuard<'q>,
    lock: WorldLock<'q>,
}

impl Execution<'_> {
    fn tables(&self) -> impl Iterator<Item = &Table> + '_ {
        self.cache
            .matched
            .iter()
            .filter_map(|&table_id| self.lock.table(table_id))
            .filter(|table| !table.is_empty())
    }
}

impl<'w, Q: QueryData> Query<'w, Q> {
    /// World the query reads from.
    #[inline]
    pub fn world(&self) -> &'w World {
        self.world
    }

    /// Component ids of `Q`, in tuple order.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentID] {
        &self.ids
    }

    fn refreshed(&self, graph: &ArchetypeGraph) -> RwLockReadGuard<'_, TableCache> {
        {
            let cache = self.cache.read_recursive();
            if cache.seen == graph.table_count() {
                return cache;
            }
        }

        let mut cache = self.cache.write();
        let seen = cache.seen;
        let before = cache.matched.len();
        for table in &graph.tables()[seen.min(graph.table_count())..] {
            if self.filter.accepts(table.mask()) {
                cache.matched.push(table.id());
            }
        }
        cache.seen = graph.table_count();
        tracing::trace!(
            scanned = cache.seen - seen,
            matched = cache.matched.len() - before,
            "refreshed query table cache"
        );
        parking_lot::RwLockWriteGuard::downgrade(cache)
    }

    fn begin(&self, strategy: &'static str) -> ECSResult<Execution<'_>> {
        let borrow = BorrowGuard::new(self.world.borrows(), &self.ids)?;
        let lock = self.world.lock();
        let cache = self.refreshed(lock.graph());
        tracing::trace!(strategy, tables = cache.matched.len(), "query execution");
        Ok(Execution {
            cache,
            _borrow: borrow,
            lock,
        })
    }

    /// Ids of every matching table, empty ones included.
    pub fn table_ids(&self) -> Vec<TableID> {
        let lock = self.world.lock();
        let cache = self.refreshed(lock.graph());
        cache.matched.clone()
    }

    /// Entities currently matched.
    pub fn count(&self) -> usize {
        let lock = self.world.lock();
        let cache = self.refreshed(lock.graph());
        cache
            .matched
            .iter()
            .filter_map(|&table_id| lock.table(table_id))
            .map(Table::count)
            .sum()
    }

    /// Returns `true` if no entity is matched.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Identities of every matched entity, table by table.
    pub fn entities(&self) -> Vec<Identity> {
        let lock = self.world.lock();
        let cache = self.refreshed(lock.graph());
        cache
            .matched
            .iter()
            .filter_map(|&table_id| lock.table(table_id))
            .flat_map(|table| table.identities().iter().copied())
            .collect()
    }

    /// Returns `true` if `entity` is alive and stored in a matching table.
    pub fn contains(&self, entity: Identity) -> bool {
        let lock = self.world.lock();
        match self.world.locate(entity) {
            Ok(location) => lock
                .table(location.table)
                .is_some_and(|table| self.filter.accepts(table.mask())),
            Err(_) => false,
        }
    }

    /// Guarded mutable access to one entity's `Q` components.
    ///
    /// The entity need not match the query's filters, only carry every
    /// component of `Q`. The world stays locked while the guard lives.
    ///
    /// ## Errors
    /// - [`ECSError::StaleEntity`] for dead handles.
    /// - [`ECSError::NotInStorage`] if a component is missing.
    /// - [`ECSError::Execution`] if a component is borrowed elsewhere.

    pub fn get(&self, entity: Identity) -> ECSResult<QueryRef<'w, Q>> {
        let borrow = BorrowGuard::new(self.world.borrows(), &self.ids)?;
        let lock = self.world.lock();
        let location = self.world.locate(entity)?;
        let table = lock.table(location.table).ok_or_else(|| {
            ECSError::Internal(format!("entity {entity} points at a missing table"))
        })?;
        if let Some(&missing) = self.ids.iter().find(|&&id| !table.has(id)) {
            return Err(NotInStorageError {
                entity,
                component: Some(missing),
            }
            .into());
        }
        let columns = Q::columns(table, &self.ids)?;
        Ok(QueryRef {
            entity,
            columns,
            row: location.row as usize,
            _borrow: borrow,
            _lock: lock,
        })
    }

    // ── Strategy drivers ───────────────────────────────────────────────────

    /// Visits every non-empty matching table on the calling thread.
    pub(crate) fn sequential<K>(&self, strategy: &'static str, mut kernel: K) -> ECSResult<()>
    where
        K: FnMut(Q::Columns, usize),
    {
        let execution = self.begin(strategy)?;
        for table in execution.tables() {
            let columns = Q::columns(table, &self.ids)?;
            kernel(columns, table.count());
        }
        Ok(())
    }

    /// Splits each table into at most `max_degree_of_parallelism` equal
    /// partitions and fans them out over the pool. The table is joined
    /// before the next one starts.
    pub(crate) fn partitioned<K>(&self, chunk_size: usize, kernel: K) -> ECSResult<()>
    where
        K: Fn(Q::Columns, Partition) + Sync,
    {
        let execution = self.begin("run_parallel")?;
        let world = self.world;
        let mut partitions = world.partition_pool().rent();
        let join = Join::new(world.config().parallel_wait, &self.countdown);

        for table in execution.tables() {
            let columns = match Q::columns(table, &self.ids) {
                Ok(columns) => columns,
                Err(error) => {
                    world.partition_pool().release(partitions);
                    return Err(error);
                }
            };
            split_even(
                table.count(),
                chunk_size,
                world.max_degree_of_parallelism(),
                &mut partitions,
            );
            join.enqueue(partitions.len());
            let run = |partition: Partition| {
                let _done = join.guard();
                kernel(columns, partition);
            };
            world.thread_pool().install(|| fan_out(&partitions, &run));
            join.wait();
        }

        world.partition_pool().release(partitions);
        Ok(())
    }

    /// Cuts every table into `chunk_size` chunks, fans all of them out at
    /// once, and blocks on the query's countdown until every chunk has run.
    pub(crate) fn chunked<K>(&self, chunk_size: usize, kernel: K) -> ECSResult<()>
    where
        K: Fn(Q::Columns, Partition) + Sync,
    {
        let execution = self.begin("job")?;
        let mut chunks = self.world.partition_pool().rent();
        let mut items = self.work.rent();

        for table in execution.tables() {
            let columns = match Q::columns(table, &self.ids) {
                Ok(columns) => columns,
                Err(error) => {
                    self.world.partition_pool().release(chunks);
                    self.work.release(items);
                    return Err(error);
                }
            };
            split_chunks(table.count(), chunk_size, &mut chunks);
            items.extend(chunks.iter().map(|&rows| WorkItem { columns, rows }));
        }
        self.dispatch(&items, |item| kernel(item.columns, item.rows));

        self.world.partition_pool().release(chunks);
        self.work.release(items);
        Ok(())
    }

    /// Fans out one work item per non-empty matching table.
    pub(crate) fn per_table<K>(&self, kernel: K) -> ECSResult<()>
    where
        K: Fn(Q::Columns) + Sync,
    {
        let execution = self.begin("raw_parallel")?;
        let mut items = self.work.rent();

        for table in execution.tables() {
            let columns = match Q::columns(table, &self.ids) {
                Ok(columns) => columns,
                Err(error) => {
                    self.work.release(items);
                    return Err(error);
                }
            };
            let rows = Partition {
                start: 0,
                len: table.count(),
            };
            items.push(WorkItem { columns, rows });
        }
        self.dispatch(&items, |item| kernel(item.columns));

        self.work.release(items);
        Ok(())
    }

    /// Runs every item on the pool and blocks on the countdown.
    fn dispatch<K>(&self, items: &[WorkItem<Q::Columns>], kernel: K)
    where
        K: Fn(WorkItem<Q::Columns>) + Sync,
    {
        let join = Join::new(WaitPolicy::Block, &self.countdown);
        join.enqueue(items.len());
        let run = |item: WorkItem<Q::Columns>| {
            let _done = join.guard();
            kernel(item);
        };
        self.world.thread_pool().install(|| fan_out(items, &run));
        join.wait();
    }
}

/// Guarded mutable access to one entity's query components.
///
/// Holds the component borrows and a world lock; structural edits issued
/// while it lives are deferred.
pub struct QueryRef<'w, Q: QueryData> {
    entity: Identity,
    columns: Q::Columns,
    row: usize,
    _borrow: BorrowGuard<'w>,
    _lock: WorldLock<'w>,
}

impl<Q: QueryData> QueryRef<'_, Q> {
    /// Entity this guard points at.
    #[inline]
    pub fn entity(&self) -> Identity {
        self.entity
    }

    /// Mutable references to the entity's components, in tuple order.
    #[inline]
    pub fn refs(&mut self) -> Q::Refs<'_> {
        // SAFETY: the lock pins the row, the borrow guard excludes every
        // other access, and `&mut self` prevents a second `refs` call.
        unsafe { Q::refs(self.columns, self.row) }
    }
}

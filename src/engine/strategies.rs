//! Execution strategies for every query arity.
//!
//! | strategy                 | callback receives        | threads | join            |
//! |--------------------------|--------------------------|---------|-----------------|
//! | `run`, `run_uniform`     | one row of references    | caller  | none            |
//! | `run_parallel[_uniform]` | one row of references    | pool    | `WaitPolicy`    |
//! | `job`, `job_uniform`     | one row of references    | pool    | countdown event |
//! | `run_span`               | whole columns as slices  | caller  | none            |
//! | `raw`                    | whole columns, unchecked | caller  | none            |
//! | `raw_parallel`           | whole columns, unchecked | pool    | countdown event |
//!
//! Sequential strategies visit tables in creation order and rows in
//! ascending order. Parallel strategies give no ordering guarantee, and
//! every partition handed to a worker is a disjoint row range of one table.
//!
//! A panic raised by a callback is re-raised on the caller's thread once
//! every dispatched partition has finished and the world lock is released.
//!
//! None of the strategies allocate per call once the query's work-item
//! lists and the world's partition lists have grown to size.

use crate::engine::component::Component;
use crate::engine::error::ECSResult;
use crate::engine::query::{Query, QueryData};
use crate::engine::storage::RawColumn;

macro_rules! impl_strategies {
    ($(($name:ident, $index:tt)),+) => {
        impl<'w, $($name: Component),+> Query<'w, ($($name,)+)> {
            /// Calls `action` for every matched row on the calling thread, in
            /// table-creation order then ascending row order.
            pub fn run<F>(&self, mut action: F) -> ECSResult<()>
            where
                F: FnMut($(&mut $name),+),
            {
                self.sequential("run", |columns, count| {
                    for row in 0..count {
                        // SAFETY: rows below `count` are live, the world is
                        // locked and the component ids are borrowed.
                        let refs = unsafe { <($($name,)+) as QueryData>::refs(columns, row) };
                        action($(refs.$index),+);
                    }
                })
            }

            /// As [`run`](Self::run), passing `uniform` to every call.
            pub fn run_uniform<U, F>(&self, uniform: &U, mut action: F) -> ECSResult<()>
            where
                U: ?Sized,
                F: FnMut(&U, $(&mut $name),+),
            {
                self.sequential("run_uniform", |columns, count| {
                    for row in 0..count {
                        // SAFETY: as in `run`.
                        let refs = unsafe { <($($name,)+) as QueryData>::refs(columns, row) };
                        action(uniform, $(refs.$index),+);
                    }
                })
            }

            /// Calls `action` for every matched row on the world's pool.
            ///
            /// Each table is split into `clamp(count / chunk_size, 1,
            /// max_degree_of_parallelism)` equal partitions, the last one
            /// absorbing the remainder. The partitions are fanned out over
            /// the pool without allocating, and the caller waits for all of
            /// them before starting the next table.
            pub fn run_parallel<F>(&self, chunk_size: usize, action: F) -> ECSResult<()>
            where
                F: Fn($(&mut $name),+) + Sync,
            {
                self.partitioned(chunk_size, |columns, partition| {
                    for row in partition.start..partition.end() {
                        // SAFETY: partitions of one table never overlap.
                        let refs = unsafe { <($($name,)+) as QueryData>::refs(columns, row) };
                        action($(refs.$index),+);
                    }
                })
            }

            /// As [`run_parallel`](Self::run_parallel), passing `uniform` to
            /// every call.
            pub fn run_parallel_uniform<U, F>(&self, chunk_size: usize, uniform: &U, action: F) -> ECSResult<()>
            where
                U: Sync + ?Sized,
                F: Fn(&U, $(&mut $name),+) + Sync,
            {
                self.partitioned(chunk_size, |columns, partition| {
                    for row in partition.start..partition.end() {
                        // SAFETY: as in `run_parallel`.
                        let refs = unsafe { <($($name,)+) as QueryData>::refs(columns, row) };
                        action(uniform, $(refs.$index),+);
                    }
                })
            }

            /// Queues every `chunk_size` rows of every matched table as one
            /// work item and blocks until all of them have run.
            pub fn job<F>(&self, chunk_size: usize, action: F) -> ECSResult<()>
            where
                F: Fn($(&mut $name),+) + Sync,
            {
                self.chunked(chunk_size, |columns, chunk| {
                    for row in chunk.start..chunk.end() {
                        // SAFETY: chunks of one table never overlap.
                        let refs = unsafe { <($($name,)+) as QueryData>::refs(columns, row) };
                        action($(refs.$index),+);
                    }
                })
            }

            /// As [`job`](Self::job), passing `uniform` to every call.
            pub fn job_uniform<U, F>(&self, chunk_size: usize, uniform: &U, action: F) -> ECSResult<()>
            where
                U: Sync + ?Sized,
                F: Fn(&U, $(&mut $name),+) + Sync,
            {
                self.chunked(chunk_size, |columns, chunk| {
                    for row in chunk.start..chunk.end() {
                        // SAFETY: as in `job`.
                        let refs = unsafe { <($($name,)+) as QueryData>::refs(columns, row) };
                        action(uniform, $(refs.$index),+);
                    }
                })
            }

            /// Calls `action` once per non-empty matched table with the
            /// table's columns as slices of equal length.
            pub fn run_span<F>(&self, mut action: F) -> ECSResult<()>
            where
                F: FnMut($(&mut [$name]),+),
            {
                self.sequential("run_span", |columns, count| {
                    // SAFETY: `0..count` is the live range, the world is locked
                    // and each column is a distinct allocation.
                    unsafe { action($(columns.$index.slice_mut(0, count)),+) }
                })
            }

            /// Calls `action` once per non-empty matched table with raw views
            /// of the table's columns.
            pub fn raw<F>(&self, mut action: F) -> ECSResult<()>
            where
                F: FnMut($(RawColumn<'_, $name>),+),
            {
                self.sequential("raw", |columns, _| {
                    // SAFETY: as in `run_span`, over the whole column.
                    unsafe { action($(columns.$index.raw()),+) }
                })
            }

            /// As [`raw`](Self::raw), with one work item per table on the
            /// world's pool. Blocks until every table has been processed.
            pub fn raw_parallel<F>(&self, action: F) -> ECSResult<()>
            where
                F: Fn($(RawColumn<'_, $name>),+) + Sync,
            {
                self.per_table(|columns| {
                    // SAFETY: one work item per table, so no two items share a
                    // column.
                    unsafe { action($(columns.$index.raw()),+) }
                })
            }
        }
    };
}

impl_strategies!((A, 0));
impl_strategies!((A, 0), (B, 1));
impl_strategies!((A, 0), (B, 1), (C, 2));
impl_strategies!((A, 0), (B, 1), (C, 2), (D, 3));
impl_strategies!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));

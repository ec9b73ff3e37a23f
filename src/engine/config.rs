//! World configuration.

use crate::engine::types::{DEFAULT_SPINS_BEFORE_YIELD, DEFAULT_TABLE_CAPACITY};

/// How a parallel strategy waits for its worker partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Busy-wait on an atomic counter, yielding the thread (and helping the
    /// worker pool when called from inside it) every `spins_before_yield` checks.
    Spin {
        /// Spin iterations between yields.
        spins_before_yield: u32,
    },
    /// Block on a condition variable until every partition has signalled.
    Block,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Spin {
            spins_before_yield: DEFAULT_SPINS_BEFORE_YIELD,
        }
    }
}

/// Configuration for a [`World`](crate::engine::world::World).
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Worker threads in the world's pool; `None` uses one per logical CPU.
    pub worker_threads: Option<usize>,
    /// Upper bound on partitions per table for `run_parallel`; `None` uses
    /// the worker count.
    pub max_degree_of_parallelism: Option<usize>,
    /// Join behaviour of `run_parallel`.
    pub parallel_wait: WaitPolicy,
    /// Row capacity a table allocates on its first insertion.
    pub initial_table_capacity: usize,
    /// Queue structural edits issued while the world is locked. When `false`
    /// such edits fail with `ConcurrentStructuralEdit`.
    pub defer_structural_edits: bool,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_degree_of_parallelism: None,
            parallel_wait: WaitPolicy::default(),
            initial_table_capacity: DEFAULT_TABLE_CAPACITY,
            defer_structural_edits: true,
            thread_name_prefix: "strata-worker".to_string(),
        }
    }
}

impl WorldConfig {
    /// Single worker, blocking joins. Useful for deterministic tests.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self {
            worker_threads: Some(1),
            max_degree_of_parallelism: Some(1),
            parallel_wait: WaitPolicy::Block,
            ..Self::default()
        }
    }

    /// Override the worker thread count.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }

    /// Override the partition cap of `run_parallel`.
    #[must_use]
    pub fn with_max_degree_of_parallelism(mut self, partitions: usize) -> Self {
        self.max_degree_of_parallelism = Some(partitions.max(1));
        self
    }

    /// Override the join behaviour of `run_parallel`.
    #[must_use]
    pub fn with_parallel_wait(mut self, wait: WaitPolicy) -> Self {
        self.parallel_wait = wait;
        self
    }

    /// Override the first-allocation row capacity of tables.
    #[must_use]
    pub fn with_initial_table_capacity(mut self, capacity: usize) -> Self {
        self.initial_table_capacity = capacity.max(1);
        self
    }

    /// Enable or disable deferral of structural edits during iteration.
    #[must_use]
    pub fn with_deferred_structural_edits(mut self, defer: bool) -> Self {
        self.defer_structural_edits = defer;
        self
    }

    /// Override the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

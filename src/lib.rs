//! # Strata
//!
//! Archetype entity-component storage with cached, typed queries.
//!
//! ## Design Goals
//! - Archetype tables with column-major storage for cache efficiency
//! - Generation-checked entity handles
//! - Structural edits deferred while queries run
//! - Sequential, partitioned, job-based and raw-memory execution strategies
//!
//! ## Example
//! ```no_run
//! use strata::prelude::*;
//!
//! struct Position(f32);
//! struct Velocity(f32);
//!
//! # fn main() -> ECSResult<()> {
//! let world = World::new()?;
//! for i in 0..1_000 {
//!     world.spawn((Position(0.0), Velocity(i as f32)))?;
//! }
//!
//! let movers = world.query::<(Position, Velocity)>().build()?;
//! movers.run_parallel(256, |p, v| p.0 += v.0)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::{
    ComponentRef,
    EditOutcome,
    World,
    WorldLock,
};

pub use engine::entity::{
    EntityLocation,
    Identity,
};

pub use engine::component::{
    component_id_of,
    register_component,
    register_relation,
    Component,
    ComponentDesc,
    ComponentKey,
};

pub use engine::bundle::{
    Bundle,
    IntoBundle,
};

pub use engine::query::{
    Query,
    QueryBuilder,
    QueryData,
    QueryRef,
};

pub use engine::config::{
    WaitPolicy,
    WorldConfig,
};

pub use engine::mask::Mask;
pub use engine::pool::MaskPool;
pub use engine::partition::Partition;
pub use engine::storage::RawColumn;
pub use engine::table::{RowRemoval, Table};

pub use engine::error::{
    ECSError,
    ECSResult,
    ExecutionError,
    MoveError,
    SpawnError,
};

pub use engine::types::{
    ComponentID,
    TableID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use strata::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Bundle,
        Component,
        ECSError,
        ECSResult,
        EditOutcome,
        Identity,
        Query,
        RawColumn,
        WaitPolicy,
        World,
        WorldConfig,
    };
}

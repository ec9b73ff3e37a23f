//! Error types for entity bookkeeping, table storage and query execution.
//!
//! This module declares focused, composable error types used across the
//! storage and execution pipeline. Each error carries enough context to make
//! failures actionable while remaining small and cheap to pass around or
//! convert into the aggregate [`ECSError`].
//!
//! ## Goals
//! * **Specificity:** each struct models a single failure mode (stale entity
//!   handles, missing storage, type mismatches, capacity limits).
//! * **Ergonomics:** every type derives [`thiserror::Error`] and converts into
//!   its aggregate through `#[from]`, so `?` bubbles failures upwards.
//! * **Actionability:** structured fields (offending entity, component id,
//!   expected vs. found type names) keep log lines useful on their own.
//!
//! ## Typical flow
//! Low-level table and column operations return dedicated errors such as
//! [`PositionOutOfBoundsError`] or [`TypeMismatchError`]. The archetype graph
//! and world lift these into [`SpawnError`], [`MoveError`] or directly into
//! [`ECSError`], which is what every public operation returns through
//! [`ECSResult`].
//!
//! ```ignore
//! match world.despawn(entity) {
//!     Ok(EditOutcome::Applied) => {}
//!     Ok(EditOutcome::Deferred) => { /* applied when the last lock is released */ }
//!     Err(ECSError::StaleEntity(e)) => tracing::warn!(entity = %e.entity, "already gone"),
//!     Err(other) => return Err(other),
//! }
//! ```

use std::fmt;

use thiserror::Error;

use crate::engine::entity::Identity;
use crate::engine::types::{ComponentID, RowID, TableID};

/// Returned when an entity handle refers to a despawned entity or to a slot
/// that has since been reused by a newer generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stale or dead entity handle {entity}")]
pub struct StaleEntityError {
    /// The handle that failed the liveness check.
    pub entity: Identity,
}

/// Returned when a typed request does not match the stored element type, or
/// when a reserved type is used as a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("type mismatch: expected {expected}, found {found}")]
pub struct TypeMismatchError {
    /// Type (or kind of type) the operation required.
    pub expected: &'static str,
    /// Type the caller actually supplied.
    pub found: &'static str,
}

impl TypeMismatchError {
    pub(crate) fn reserved_identity() -> Self {
        Self {
            expected: "a component type",
            found: std::any::type_name::<Identity>(),
        }
    }
}

/// Returned when an entity is alive but its table does not carry the
/// requested component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("entity {entity} does not store component {component:?}")]
pub struct NotInStorageError {
    /// Entity that was looked up.
    pub entity: Identity,
    /// First missing component, or `None` when the entity has no table yet
    /// (a spawn that is still deferred).
    pub component: Option<ComponentID>,
}

/// Returned when an identifier space is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("capacity exceeded: {needed} requested, limit is {capacity}")]
pub struct CapacityError {
    /// Total number of slots the operation attempted to occupy.
    pub needed: u64,
    /// Upper bound that prevented the operation.
    pub capacity: u64,
}

/// Returned when a row index does not address a live row of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("row {row} out of bounds for table {table} holding {count} rows")]
pub struct PositionOutOfBoundsError {
    /// Table that was addressed.
    pub table: TableID,
    /// Offending row.
    pub row: RowID,
    /// Number of rows currently stored.
    pub count: usize,
}

/// Errors raised while appending a fresh row to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The bundle lacks a value for a column of the destination table.
    #[error("bundle is missing component {component_id} ({name})")]
    MissingComponent {
        /// Component the destination table requires.
        component_id: ComponentID,
        /// Registered type name of that component.
        name: &'static str,
    },

    /// The entity index has no free slots left.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// A value could not be written into its column.
    #[error("failed to write component {component_id}: {mismatch}")]
    StoragePushFailed {
        /// Column that rejected the value.
        component_id: ComponentID,
        /// Underlying type mismatch.
        mismatch: TypeMismatchError,
    },
}

/// Errors raised while moving a row between two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveError {
    /// Source and destination resolve to the same table.
    #[error("source and destination table are both {0}")]
    SameTable(TableID),

    /// A table id does not exist in the graph.
    #[error("unknown table {0}")]
    UnknownTable(TableID),

    /// A shared column failed to transfer its value.
    #[error("failed to move component {component_id}: {mismatch}")]
    ColumnTransfer {
        /// Column that failed.
        component_id: ComponentID,
        /// Underlying type mismatch.
        mismatch: TypeMismatchError,
    },

    /// The source row does not exist.
    #[error(transparent)]
    Position(#[from] PositionOutOfBoundsError),
}

/// Why a query's component list was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidAccessReason {
    /// The same component key appears twice in one query.
    DuplicateComponent,
    /// More component keys than one guard can borrow at once.
    TooManyComponents,
}

impl fmt::Display for InvalidAccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidAccessReason::DuplicateComponent => {
                f.write_str("component requested more than once")
            }
            InvalidAccessReason::TooManyComponents => {
                f.write_str("too many components borrowed at once")
            }
        }
    }
}

/// Errors raised when a query or guard cannot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Another running query or outstanding guard holds this component.
    #[error("component {component_id} is already borrowed by a running query or guard")]
    BorrowConflict {
        /// Component that could not be borrowed.
        component_id: ComponentID,
    },

    /// The query requested an impossible access pattern.
    #[error("invalid access to component {component_id}: {reason}")]
    InvalidQueryAccess {
        /// Offending component.
        component_id: ComponentID,
        /// What was wrong with it.
        reason: InvalidAccessReason,
    },
}

/// Aggregate error returned by every public operation.
#[derive(Debug, Error)]
pub enum ECSError {
    /// Entity handle is stale or was never alive.
    #[error(transparent)]
    StaleEntity(#[from] StaleEntityError),

    /// Typed access disagreed with stored data, or a reserved type was used.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),

    /// The entity exists but does not carry the requested component(s).
    #[error(transparent)]
    NotInStorage(#[from] NotInStorageError),

    /// A structural edit was attempted while iteration holds the world and
    /// deferral is disabled.
    #[error("structural edit attempted while the world is locked for iteration")]
    ConcurrentStructuralEdit,

    /// An identifier space is exhausted.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// Row insertion failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Row migration failed.
    #[error(transparent)]
    Move(#[from] MoveError),

    /// Query or guard could not start.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A bookkeeping invariant did not hold.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl From<PositionOutOfBoundsError> for ECSError {
    fn from(e: PositionOutOfBoundsError) -> Self {
        ECSError::Move(MoveError::Position(e))
    }
}

/// Result alias used throughout the crate.
pub type ECSResult<T> = Result<T, ECSError>;

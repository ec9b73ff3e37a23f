//! Core identifiers, numeric aliases and engine-wide constants.
//!
//! This module defines the small, copyable numeric types shared by every
//! other subsystem: entity slot indices and generations, component keys,
//! table and row positions. Keeping them in one place makes the width of each
//! identifier explicit and lets the storage layer reason about capacities
//! without depending on higher-level types.
//!
//! ## Design Philosophy
//!
//! - **Dense storage**: rows and tables are addressed by plain integers.
//! - **Stable identifiers**: component ids are assigned once per process and
//!   never recycled.
//! - **Explicit limits**: every capacity the engine enforces is a named
//!   constant here.

/// Slot index of an entity inside the entity index.
pub type EntityIndex = u32;
/// Generation counter used to detect stale entity handles.
pub type Generation = u32;

/// Unique identifier for a registered component key (type, optional relation target).
///
/// Every relation target mints its own key, so ids are 32 bits wide.
pub type ComponentID = u32;
/// Position of a table inside the archetype graph. Tables are never removed,
/// so a table id stays valid for the lifetime of its world.
pub type TableID = u32;
/// Row index within a table.
pub type RowID = u32;

/// Maximum number of registered component keys per process.
pub const COMPONENT_CAP: usize = 1 << 24;

/// Borrow flags in the first lazily allocated segment of a borrow tracker.
/// Each later segment is twice the size of the one before it.
pub(crate) const BORROW_SEGMENT_BASE: usize = 64;

/// Most component ids one borrow guard holds: the widest query tuple.
pub const MAX_BORROWED_COMPONENTS: usize = 5;

/// Idle items a [`Pool`](crate::engine::pool::Pool) keeps before dropping
/// released ones.
pub const POOL_CAPACITY: usize = 256;

/// Maximum number of entity slots per world. The last index is reserved for
/// [`Identity::NONE`](crate::engine::entity::Identity::NONE).
pub const ENTITY_CAP: usize = (EntityIndex::MAX - 1) as usize;

/// Number of entity slots added whenever the free list runs dry.
pub const ENTITY_GROWTH: usize = 1024;

/// Row capacity given to a table on its first insertion.
pub const DEFAULT_TABLE_CAPACITY: usize = 16;

/// Number of masks created up front by the shared mask pool.
pub const MASK_POOL_PREWARM: usize = 32;

/// Busy-wait iterations a spinning join performs before yielding its thread.
pub const DEFAULT_SPINS_BEFORE_YIELD: u32 = 64;

/// Number of bits per mask word.
pub(crate) const MASK_WORD_BITS: usize = 64;

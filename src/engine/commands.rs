//! # Commands
//!
//! Deferred structural edits.
//!
//! ## Purpose
//! While any query, strategy or guard holds the world lock, tables must not
//! reallocate or move rows. Structural edits issued in that window (from
//! inside a callback, or from another thread) are recorded as [`Command`]
//! values and applied in issue order when the last lock is released.
//!
//! ## Invariants
//! - Commands are applied in the order they were recorded.
//! - A deferred spawn has already allocated its identity; only its row is
//!   pending.
//! - Component values match the type registered for their component id.

use std::any::Any;

use crate::engine::bundle::Bundle;
use crate::engine::entity::Identity;
use crate::engine::types::ComponentID;

/// A recorded structural edit.
pub enum Command {
    /// Places an already allocated identity into the table matching `bundle`.
    Spawn {
        /// Reserved identity.
        identity: Identity,
        /// Initial component values.
        bundle: Bundle,
    },

    /// Removes the entity's row and frees its identity.
    Despawn {
        /// Entity to remove.
        identity: Identity,
    },

    /// Attaches or overwrites one component value.
    Add {
        /// Target entity.
        identity: Identity,
        /// Key of the value.
        component_id: ComponentID,
        /// Boxed value of the key's type.
        value: Box<dyn Any + Send>,
    },

    /// Detaches one component.
    Remove {
        /// Target entity.
        identity: Identity,
        /// Key to detach.
        component_id: ComponentID,
    },
}

impl Command {
    /// Entity the command targets.
    pub fn identity(&self) -> Identity {
        match self {
            Command::Spawn { identity, .. }
            | Command::Despawn { identity }
            | Command::Add { identity, .. }
            | Command::Remove { identity, .. } => *identity,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Spawn { .. } => "spawn",
            Command::Despawn { .. } => "despawn",
            Command::Add { .. } => "add",
            Command::Remove { .. } => "remove",
        }
    }
}

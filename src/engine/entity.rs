//! Entity identities and the entity index.
//!
//! An [`Identity`] is a `(index, generation)` pair. The index names a slot in
//! the world's entity index; the generation is bumped every time that slot is
//! freed, so handles held across a despawn are detected as stale instead of
//! silently aliasing the slot's next occupant.
//!
//! [`Entities`] owns the per-slot bookkeeping: generation, liveness, and the
//! `(table, row)` location of the entity's data. Locations are optional
//! because a spawn issued while the world is locked allocates its identity
//! immediately but only receives a row once the deferred command is applied.
//!
//! ## Invariants
//! * An identity is alive iff its slot is marked alive and the stored
//!   generation equals the handle's generation.
//! * Every alive entity with a location appears in exactly one table row, and
//!   the identity column of that row holds this identity.
//! * [`Identity::NONE`] is never allocated.

use std::fmt;

use crate::engine::error::{CapacityError, StaleEntityError};
use crate::engine::types::{
    EntityIndex, Generation, RowID, TableID, ENTITY_CAP, ENTITY_GROWTH,
};

/// Generational handle to an entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Identity {
    index: EntityIndex,
    generation: Generation,
}

impl Identity {
    /// The "no entity" value. Plain components use it as their relation target.
    pub const NONE: Identity = Identity {
        index: EntityIndex::MAX,
        generation: 0,
    };

    #[inline]
    pub(crate) const fn new(index: EntityIndex, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the entity index.
    #[inline]
    pub const fn index(self) -> EntityIndex {
        self.index
    }

    /// Generation this handle was issued with.
    #[inline]
    pub const fn generation(self) -> Generation {
        self.generation
    }

    /// Returns `true` for [`Identity::NONE`].
    #[inline]
    pub const fn is_none(self) -> bool {
        self.index == Identity::NONE.index && self.generation == Identity::NONE.generation
    }
}

impl Default for Identity {
    fn default() -> Self {
        Identity::NONE
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("E(none)")
        } else {
            write!(f, "E{}:{}", self.index, self.generation)
        }
    }
}

/// Where an entity's component data lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Table holding the entity.
    pub table: TableID,
    /// Row within that table.
    pub row: RowID,
}

/// Slot-indexed registry of entity generations, liveness and locations.
#[derive(Default)]
pub struct Entities {
    generations: Vec<Generation>,
    alive: Vec<bool>,
    locations: Vec<Option<EntityLocation>>,
    free_store: Vec<EntityIndex>,
    live: usize,
}

impl Entities {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_capacity(&mut self, additional: usize) -> Result<(), CapacityError> {
        let current = self.generations.len();
        let needed = current + additional;
        if needed > ENTITY_CAP {
            return Err(CapacityError {
                needed: needed as u64,
                capacity: ENTITY_CAP as u64,
            });
        }

        self.generations.resize(needed, 0);
        self.alive.resize(needed, false);
        self.locations.resize(needed, None);

        // Reversed so the lowest fresh index is handed out first.
        self.free_store
            .extend((current..needed).rev().map(|index| index as EntityIndex));
        Ok(())
    }

    /// Allocates a live identity with no location yet.
    ///
    /// ## Errors
    /// [`CapacityError`] once [`ENTITY_CAP`] slots are in use.
    pub fn allocate(&mut self) -> Result<Identity, CapacityError> {
        let index = match self.free_store.pop() {
            Some(index) => index,
            None => {
                let growth = ENTITY_GROWTH.min(ENTITY_CAP - self.generations.len());
                self.ensure_capacity(growth.max(1))?;
                match self.free_store.pop() {
                    Some(index) => index,
                    None => {
                        return Err(CapacityError {
                            needed: self.generations.len() as u64 + 1,
                            capacity: ENTITY_CAP as u64,
                        })
                    }
                }
            }
        };

        let slot = index as usize;
        self.alive[slot] = true;
        self.locations[slot] = None;
        self.live += 1;
        Ok(Identity::new(index, self.generations[slot]))
    }

    /// Frees a live identity, bumping its slot's generation.
    ///
    /// Returns `false` if the handle was already stale.
    pub fn free(&mut self, identity: Identity) -> bool {
        if !self.is_alive(identity) {
            return false;
        }
        let slot = identity.index as usize;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.alive[slot] = false;
        self.locations[slot] = None;
        self.free_store.push(identity.index);
        self.live -= 1;
        true
    }

    /// Liveness check by index and generation.
    #[inline]
    pub fn is_alive(&self, identity: Identity) -> bool {
        let slot = identity.index as usize;
        slot < self.generations.len()
            && self.alive[slot]
            && self.generations[slot] == identity.generation
    }

    /// Current location of a live entity. `Ok(None)` means the entity is
    /// alive but its spawn is still deferred.
    pub fn location(&self, identity: Identity) -> Result<Option<EntityLocation>, StaleEntityError> {
        if !self.is_alive(identity) {
            return Err(StaleEntityError { entity: identity });
        }
        Ok(self.locations[identity.index as usize])
    }

    /// Records where a live entity's row now lives.
    pub fn set_location(
        &mut self,
        identity: Identity,
        location: EntityLocation,
    ) -> Result<(), StaleEntityError> {
        if !self.is_alive(identity) {
            return Err(StaleEntityError { entity: identity });
        }
        self.locations[identity.index as usize] = Some(location);
        Ok(())
    }

    /// Number of live entities, including those whose spawn is deferred.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_slots_are_reused_with_a_new_generation() {
        let mut entities = Entities::new();
        let first = entities.allocate().unwrap();
        assert_eq!(first.index(), 0);
        assert!(entities.free(first));
        assert!(!entities.is_alive(first));

        let second = entities.allocate().unwrap();
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert!(entities.is_alive(second));
        assert!(!entities.free(first));
    }

    #[test]
    fn none_is_never_alive() {
        let mut entities = Entities::new();
        let _ = entities.allocate().unwrap();
        assert!(!entities.is_alive(Identity::NONE));
        assert!(entities.location(Identity::NONE).is_err());
    }

    #[test]
    fn locations_track_live_entities_only() {
        let mut entities = Entities::new();
        let id = entities.allocate().unwrap();
        assert_eq!(entities.location(id), Ok(None));

        let location = EntityLocation { table: 3, row: 7 };
        entities.set_location(id, location).unwrap();
        assert_eq!(entities.location(id), Ok(Some(location)));

        entities.free(id);
        assert_eq!(entities.location(id), Err(StaleEntityError { entity: id }));
        assert!(entities.set_location(id, location).is_err());
        assert_eq!(entities.live_count(), 0);
    }
}

//! Type-erased groups of component values.
//!
//! A [`Bundle`] carries the values an entity is spawned with, or the value a
//! single `add_component` attaches. Each value is boxed together with the id
//! of its component key, and the bundle tracks the set of ids it holds so the
//! archetype graph can find the destination table without inspecting values.
//!
//! [`IntoBundle`] lets callers spawn from plain tuples:
//!
//! ```ignore
//! let e = world.spawn((Position(0.0, 0.0), Velocity(1.0, 0.0)))?;
//! ```

use std::any::Any;

use crate::engine::component::{register_component, register_relation, Component};
use crate::engine::entity::Identity;
use crate::engine::error::ECSResult;
use crate::engine::mask::Mask;
use crate::engine::pool::MaskPool;
use crate::engine::types::ComponentID;

/// Type-erased container for component values.
#[derive(Default)]
pub struct Bundle {
    /// Ids present in this bundle.
    ids: Mask,
    /// Sparse storage of component values.
    values: Vec<(ComponentID, Box<dyn Any + Send>)>,
    /// Targets of every relation inserted, checked for liveness at spawn.
    targets: Vec<Identity>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the plain component `value`, replacing an earlier value of the same type.
    ///
    /// ## Errors
    /// Fails if `T` cannot be registered (reserved type or capacity).

    pub fn insert<T: Component>(&mut self, value: T) -> ECSResult<()> {
        let component_id = register_component::<T>()?;
        self.insert_raw(component_id, Box::new(value));
        Ok(())
    }

    /// Adds the relation `T -> target`.
    ///
    /// The bundle has no world to check `target` against; `World::spawn`
    /// rejects the bundle if the target is dead by then.
    pub fn insert_relation<T: Component>(&mut self, target: Identity, value: T) -> ECSResult<()> {
        let component_id = register_relation::<T>(target)?;
        self.insert_raw(component_id, Box::new(value));
        self.targets.push(target);
        Ok(())
    }

    /// Targets of the relations inserted so far.
    #[inline]
    pub fn relation_targets(&self) -> &[Identity] {
        &self.targets
    }

    /// Builder form of [`Bundle::insert`].
    pub fn with<T: Component>(mut self, value: T) -> ECSResult<Self> {
        self.insert(value)?;
        Ok(self)
    }

    pub(crate) fn insert_raw(&mut self, component_id: ComponentID, value: Box<dyn Any + Send>) {
        if let Some(slot) = self.values.iter_mut().find(|(id, _)| *id == component_id) {
            slot.1 = value;
        } else {
            self.ids.add(component_id);
            self.values.push((component_id, value));
        }
    }

    /// Returns `true` if a value for `component_id` is present.
    #[inline]
    pub fn contains(&self, component_id: ComponentID) -> bool {
        self.ids.has(component_id)
    }

    /// Number of values held.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the bundle holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Set of ids held, copied into a pooled mask.
    pub fn mask(&self) -> Mask {
        let mut mask = MaskPool::rent();
        mask.copy_from(&self.ids);
        mask
    }

    /// Removes and returns the value for `component_id`, if present.
    pub fn take(&mut self, component_id: ComponentID) -> Option<Box<dyn Any + Send>> {
        let index = self
            .values
            .iter()
            .position(|(id, _)| *id == component_id)?;
        self.ids.remove(component_id);
        let (_, value) = self.values.swap_remove(index);
        Some(value)
    }
}

/// Conversion into a [`Bundle`], implemented for `()`, `Bundle` and tuples of up to five components.
pub trait IntoBundle {
    /// Boxes every value, registering component types as needed.
    fn into_bundle(self) -> ECSResult<Bundle>;
}

impl IntoBundle for Bundle {
    fn into_bundle(self) -> ECSResult<Bundle> {
        Ok(self)
    }
}

impl IntoBundle for () {
    fn into_bundle(self) -> ECSResult<Bundle> {
        Ok(Bundle::new())
    }
}

macro_rules! impl_into_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> IntoBundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_bundle(self) -> ECSResult<Bundle> {
                let ($($name,)+) = self;
                let mut bundle = Bundle::new();
                $( bundle.insert($name)?; )+
                Ok(bundle)
            }
        }
    };
}

impl_into_bundle!(A);
impl_into_bundle!(A, B);
impl_into_bundle!(A, B, C);
impl_into_bundle!(A, B, C, D);
impl_into_bundle!(A, B, C, D, E);

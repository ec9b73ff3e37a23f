//! Component keys and the global component registry.
//!
//! Components are arbitrary `'static + Send + Sync` value types. Storage is
//! keyed not by type alone but by a [`ComponentKey`]: the value type plus an
//! optional relation target. A plain component uses [`Identity::NONE`] as its
//! target; a relation such as "`Likes` targeting entity 7" is its own key with
//! its own column, so one entity may carry several relations of the same type
//! to different targets.
//!
//! Every key is assigned a compact [`ComponentID`] the first time it is seen.
//! Ids are process-wide, never recycled, and index the bitsets held by
//! [`Mask`](crate::engine::mask::Mask). The registry also installs a column
//! factory per id so the archetype graph can create storage for a table from
//! its mask alone.
//!
//! ## Invariants
//! - Every entry in `by_key` has a matching `by_id[id]` and `factories[id]`.
//! - Ids are dense and below [`COMPONENT_CAP`].
//! - The [`Identity`] type itself is reserved and can never be registered.

use std::{
    any::{type_name, TypeId},
    collections::HashMap,
    fmt,
    mem::{align_of, size_of},
    sync::OnceLock,
};

use parking_lot::RwLock;

use crate::engine::entity::Identity;
use crate::engine::error::{CapacityError, ECSError, ECSResult, TypeMismatchError};
use crate::engine::storage::{Column, TypeErasedColumn};
use crate::engine::types::{ComponentID, COMPONENT_CAP};

/// Marker for types that can be stored as components.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

/// Storage key: value type plus relation target ([`Identity::NONE`] for plain components).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComponentKey {
    type_id: TypeId,
    target: Identity,
}

impl ComponentKey {
    /// Key of the plain component `T`.
    #[inline]
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            target: Identity::NONE,
        }
    }

    /// Key of the relation `T` pointing at `target`.
    #[inline]
    pub fn relation<T: 'static>(target: Identity) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            target,
        }
    }

    /// Value type of the key.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Relation target, or `None` for a plain component.
    #[inline]
    pub fn target(&self) -> Option<Identity> {
        (!self.target.is_none()).then_some(self.target)
    }
}

/// Factory function for constructing an empty type-erased column.
type FactoryFn = fn() -> Box<dyn TypeErasedColumn>;

fn new_column<T: Component>() -> Box<dyn TypeErasedColumn> {
    Box::new(Column::<T>::new())
}

/// Describes a registered component key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this key.
    pub component_id: ComponentID,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the value type.
    pub type_id: TypeId,

    /// Relation target, if this key is a relation.
    pub target: Option<Identity>,

    /// Size of the value type in bytes.
    pub size: usize,

    /// Alignment of the value type in bytes.
    pub align: usize,
}

impl ComponentDesc {
    fn of<T: 'static>(component_id: ComponentID, key: ComponentKey) -> Self {
        Self {
            component_id,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            target: key.target(),
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }

    /// Returns `true` if this descriptor stores values of type `T`.
    #[inline]
    pub fn matches_type<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some(target) => write!(
                f,
                "ComponentDesc {{ id: {}, name: {} -> {}, size: {}, align: {} }}",
                self.component_id, self.name, target, self.size, self.align
            ),
            None => write!(
                f,
                "ComponentDesc {{ id: {}, name: {}, size: {}, align: {} }}",
                self.component_id, self.name, self.size, self.align
            ),
        }
    }
}

/// Global mapping between component keys and compact ids.
///
/// ## Design
/// - `by_key` maps `ComponentKey -> ComponentID`.
/// - `by_id` stores the descriptor of each id.
/// - `factories` stores the column constructor of each id.

struct ComponentRegistry {
    by_key: HashMap<ComponentKey, ComponentID>,
    by_id: Vec<ComponentDesc>,
    factories: Vec<FactoryFn>,
}

static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();

fn component_registry() -> &'static RwLock<ComponentRegistry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(ComponentRegistry {
            by_key: HashMap::new(),
            by_id: Vec::new(),
            factories: Vec::new(),
        })
    })
}

impl ComponentRegistry {
    /// Inserts `key` for value type `T`, returning the existing id if present.
    ///
    /// ## Errors
    /// [`CapacityError`] once [`COMPONENT_CAP`] keys exist.

    fn register<T: Component>(&mut self, key: ComponentKey) -> Result<ComponentID, CapacityError> {
        if let Some(&existing) = self.by_key.get(&key) {
            return Ok(existing);
        }

        let next = self.by_id.len();
        if next >= COMPONENT_CAP {
            return Err(CapacityError {
                needed: next as u64 + 1,
                capacity: COMPONENT_CAP as u64,
            });
        }

        let component_id = next as ComponentID;
        self.by_key.insert(key, component_id);
        self.by_id.push(ComponentDesc::of::<T>(component_id, key));
        self.factories.push(new_column::<T>);

        tracing::trace!(
            component_id,
            name = type_name::<T>(),
            target = ?key.target(),
            "registered component key"
        );
        Ok(component_id)
    }
}

fn register_key<T: Component>(key: ComponentKey) -> ECSResult<ComponentID> {
    if TypeId::of::<T>() == TypeId::of::<Identity>() {
        return Err(TypeMismatchError::reserved_identity().into());
    }

    if let Some(&id) = component_registry().read().by_key.get(&key) {
        return Ok(id);
    }
    Ok(component_registry().write().register::<T>(key)?)
}

/// Registers the plain component `T` and returns its id.
///
/// Registration is idempotent; every typed entry point calls it lazily, so
/// explicit registration is only needed to pin ids in a known order.
///
/// ## Errors
/// - [`ECSError::TypeMismatch`] when `T` is [`Identity`].
/// - [`ECSError::Capacity`] once [`COMPONENT_CAP`] keys exist.

pub fn register_component<T: Component>() -> ECSResult<ComponentID> {
    register_key::<T>(ComponentKey::of::<T>())
}

/// Registers the relation `T -> target` and returns its id.
///
/// ## Errors
/// As [`register_component`].

pub fn register_relation<T: Component>(target: Identity) -> ECSResult<ComponentID> {
    register_key::<T>(ComponentKey::relation::<T>(target))
}

/// Id of the plain component `T`, registering it on first use.
#[inline]
pub fn component_id_of<T: Component>() -> ECSResult<ComponentID> {
    register_component::<T>()
}

/// Id of `key` if it has already been registered.
///
/// Used by read-only checks so that probing an unseen relation does not
/// consume a component id.
pub fn lookup_component(key: ComponentKey) -> Option<ComponentID> {
    component_registry().read().by_key.get(&key).copied()
}

/// Descriptor of a registered id.
pub fn component_description(component_id: ComponentID) -> Option<ComponentDesc> {
    component_registry()
        .read()
        .by_id
        .get(component_id as usize)
        .copied()
}

/// Creates an empty column for a registered id.
///
/// ## Errors
/// [`ECSError::Internal`] if the id was never registered.

pub fn make_empty_column(component_id: ComponentID) -> ECSResult<Box<dyn TypeErasedColumn>> {
    let factory = component_registry()
        .read()
        .factories
        .get(component_id as usize)
        .copied()
        .ok_or_else(|| {
            ECSError::Internal(format!("no column factory for component {component_id}"))
        })?;
    Ok(factory())
}

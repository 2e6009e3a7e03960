//! Persisted world components.
//!
//! A [`World`] owns a [`reference::ReferenceManager`], an SQLite database
//! reached through [`world_query`], and a per-world copy of the
//! [`TypeCatalog`]. Components ([`WorldObject`]s and their
//! [`ObjectSubElement`]s) store their state in per-type tables; a component's
//! soft reference count is mirrored in its table's `RefCount` column so that
//! rows disappear exactly when the last database reference does.
//!
//! Built-in types: [`DummyObject`] (placed by [`DummyNode`]) and the six
//! collision shapes handled by [`CollisionShapeElement`].

mod catalog;
mod collision;
mod component;
mod config;
mod dummy;
mod error;
mod object;
mod schema;
mod sub_element;
mod types;
mod world;

pub use catalog::{
    ElementAllocClone, ElementAllocNew, NodeAllocClone, NodeAllocNew, ObjectAllocClone,
    ObjectAllocNew, ObjectTypeDesc, SubElementTypeDesc, TypeCatalog,
};
pub use collision::{
    shape_schema, CollisionShapeElement, ShapeSchema, COLLISION_SHAPES, OSECID_COLLISION_SHAPES,
    RTID_BOX_COLLISION_SHAPE, RTID_CAPSULE_COLLISION_SHAPE, RTID_COLLISION_SHAPE_ELEMENT,
    RTID_CONE_COLLISION_SHAPE, RTID_CYLINDER_COLLISION_SHAPE, RTID_HULL_COLLISION_SHAPE,
    RTID_SPHERE_COLLISION_SHAPE, SHAPES,
};
pub use component::{ComponentCore, ObjectRef, Spawned, WorldComponent};
pub use config::{Storage, WorldConfig};
pub use dummy::{DummyNode, DummyObject, DEFAULT_DUMMY_SIZE, RTID_DUMMY_NODE, RTID_DUMMY_OBJECT};
pub use error::{WorldError, WorldResult};
pub use object::{
    is_world_object_type, spawn_object, ObjectCore, SubElementCategory, WorldObject, DEFAULT_MASS,
    DEFAULT_MASS_TRANSFORM_AMOUNT,
};
pub use schema::identifier_text;
pub use sub_element::{is_sub_element_type, spawn_element, ElementCore, ObjectSubElement};
pub use types::*;
pub use world::{ElementHandle, NodeHandle, ObjectHandle, World};

/// Registers the dummy object and every collision shape.
pub fn register_builtin_types(catalog: &mut TypeCatalog) {
    dummy::register_dummy(catalog);
    collision::register_collision_shapes(catalog);
}

//! Registered object and sub-element types.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use log::warn;
use reference::{RefId, Reference, Uid};

use crate::{CloneMethod, ObjectHandle, ObjectRef, ObjectSubElement, Spawned, WorldObject};

pub type ObjectAllocNew = fn(type_id: Uid, ref_id: RefId) -> Option<Spawned<dyn WorldObject>>;
pub type ObjectAllocClone = fn(
    type_id: Uid,
    ref_id: RefId,
    init: &dyn WorldObject,
    method: CloneMethod,
) -> Option<Spawned<dyn WorldObject>>;
pub type NodeAllocNew =
    fn(type_id: Uid, ref_id: RefId, object: &ObjectHandle) -> Option<Rc<RefCell<dyn Reference>>>;
pub type NodeAllocClone = fn(
    type_id: Uid,
    ref_id: RefId,
    object: &ObjectHandle,
    init: &dyn Reference,
) -> Option<Rc<RefCell<dyn Reference>>>;
pub type ElementAllocNew =
    fn(type_id: Uid, ref_id: RefId, parent: ObjectRef) -> Option<Spawned<dyn ObjectSubElement>>;
pub type ElementAllocClone = fn(
    type_id: Uid,
    ref_id: RefId,
    parent: ObjectRef,
    init: &dyn ObjectSubElement,
) -> Option<Spawned<dyn ObjectSubElement>>;

#[derive(Clone)]
pub struct ObjectTypeDesc {
    pub global_identifier: Uid,
    /// Row id in the world's `ObjectTypes` table; 0 until the type is used.
    pub local_identifier: u32,
    pub name: String,
    pub alloc_new: ObjectAllocNew,
    pub alloc_clone: ObjectAllocClone,
    pub node_alloc_new: Option<NodeAllocNew>,
    pub node_alloc_clone: Option<NodeAllocClone>,
}

#[derive(Clone)]
pub struct SubElementTypeDesc {
    pub global_identifier: Uid,
    pub local_identifier: u32,
    pub name: String,
    pub alloc_new: ElementAllocNew,
    pub alloc_clone: ElementAllocClone,
}

impl fmt::Debug for ObjectTypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTypeDesc")
            .field("global_identifier", &self.global_identifier)
            .field("local_identifier", &self.local_identifier)
            .field("name", &self.name)
            .field("has_node", &self.node_alloc_new.is_some())
            .finish()
    }
}

impl fmt::Debug for SubElementTypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubElementTypeDesc")
            .field("global_identifier", &self.global_identifier)
            .field("local_identifier", &self.local_identifier)
            .field("name", &self.name)
            .finish()
    }
}

/// Maps type identifiers to their allocators.
///
/// Filled once at startup, then copied into every world, which records the
/// database-local identifiers in its own copy.
#[derive(Clone, Debug, Default)]
pub struct TypeCatalog {
    objects: BTreeMap<Uid, ObjectTypeDesc>,
    elements: BTreeMap<Uid, SubElementTypeDesc>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the dummy object and the collision shapes.
    pub fn with_builtin_types() -> Self {
        let mut catalog = Self::new();
        crate::register_builtin_types(&mut catalog);
        catalog
    }

    pub fn register_object_type(
        &mut self,
        type_id: Uid,
        name: &str,
        alloc_new: ObjectAllocNew,
        alloc_clone: ObjectAllocClone,
        node_alloc_new: Option<NodeAllocNew>,
        node_alloc_clone: Option<NodeAllocClone>,
    ) {
        let desc = ObjectTypeDesc {
            global_identifier: type_id,
            local_identifier: 0,
            name: name.to_owned(),
            alloc_new,
            alloc_clone,
            node_alloc_new,
            node_alloc_clone,
        };
        if self.objects.insert(type_id, desc).is_some() {
            warn!("object type {type_id} ({name}) registered twice; keeping the latest");
        }
    }

    pub fn register_sub_element_type(
        &mut self,
        type_id: Uid,
        name: &str,
        alloc_new: ElementAllocNew,
        alloc_clone: ElementAllocClone,
    ) {
        let desc = SubElementTypeDesc {
            global_identifier: type_id,
            local_identifier: 0,
            name: name.to_owned(),
            alloc_new,
            alloc_clone,
        };
        if self.elements.insert(type_id, desc).is_some() {
            warn!("sub-element type {type_id} ({name}) registered twice; keeping the latest");
        }
    }

    pub fn object_type(&self, type_id: &Uid) -> Option<&ObjectTypeDesc> {
        self.objects.get(type_id)
    }

    pub fn sub_element_type(&self, type_id: &Uid) -> Option<&SubElementTypeDesc> {
        self.elements.get(type_id)
    }

    pub fn object_type_by_local_id(&self, local_id: u32) -> Option<&ObjectTypeDesc> {
        if local_id == 0 {
            return None;
        }
        self.objects
            .values()
            .find(|desc| desc.local_identifier == local_id)
    }

    pub fn sub_element_type_by_local_id(&self, local_id: u32) -> Option<&SubElementTypeDesc> {
        if local_id == 0 {
            return None;
        }
        self.elements
            .values()
            .find(|desc| desc.local_identifier == local_id)
    }

    pub fn object_types(&self) -> impl Iterator<Item = &ObjectTypeDesc> {
        self.objects.values()
    }

    pub fn sub_element_types(&self) -> impl Iterator<Item = &SubElementTypeDesc> {
        self.elements.values()
    }

    /// Returns false for types this catalog does not know.
    pub(crate) fn set_object_local_id(&mut self, type_id: &Uid, local_id: u32) -> bool {
        match self.objects.get_mut(type_id) {
            Some(desc) => {
                desc.local_identifier = local_id;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_sub_element_local_id(&mut self, type_id: &Uid, local_id: u32) -> bool {
        match self.elements.get_mut(type_id) {
            Some(desc) => {
                desc.local_identifier = local_id;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_local_ids(&mut self) {
        for desc in self.objects.values_mut() {
            desc.local_identifier = 0;
        }
        for desc in self.elements.values_mut() {
            desc.local_identifier = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RTID_BOX_COLLISION_SHAPE, RTID_DUMMY_OBJECT};

    #[test]
    fn builtin_catalog_knows_dummy_and_shapes() {
        let catalog = TypeCatalog::with_builtin_types();
        let dummy = catalog.object_type(&RTID_DUMMY_OBJECT).unwrap();
        assert_eq!(dummy.name, "Dummy");
        assert_eq!(dummy.local_identifier, 0);
        assert!(dummy.node_alloc_new.is_some());
        assert_eq!(catalog.sub_element_types().count(), 6);
        assert!(catalog.sub_element_type(&RTID_BOX_COLLISION_SHAPE).is_some());
    }

    #[test]
    fn local_ids_resolve_back_to_types() {
        let mut catalog = TypeCatalog::with_builtin_types();
        assert!(catalog.object_type_by_local_id(0).is_none());
        assert!(catalog.set_object_local_id(&RTID_DUMMY_OBJECT, 4));
        assert!(!catalog.set_object_local_id(&Uid::nil(), 5));
        assert_eq!(
            catalog
                .object_type_by_local_id(4)
                .map(|desc| desc.global_identifier),
            Some(RTID_DUMMY_OBJECT)
        );

        catalog.clear_local_ids();
        assert!(catalog.object_type_by_local_id(4).is_none());
    }
}

//! World objects: base mass data shared by every object and the
//! sub-element lists an object owns.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{trace, warn};
use reference::{Uid, RTID_REFERENCE};
use world_query::IntoParam;

use crate::schema::{
    DELETE_BASE_OBJECT, DELETE_SUB_ELEMENT_LINK, DELETE_SUB_ELEMENT_LINKS, INSERT_BASE_OBJECT,
    INSERT_SUB_ELEMENT_LINK, LOAD_BASE_OBJECT, LOAD_SUB_ELEMENT_LINKS, UPDATE_BASE_OBJECT,
};
use crate::{
    ComponentCore, ComponentCreated, ComponentLoading, ElementHandle, ObjectRef, Spawned, World,
    WorldComponent, WorldError, WorldResult, COLLISION_SHAPES, OSECID_COLLISION_SHAPES,
    RTID_WORLD_COMPONENT, RTID_WORLD_OBJECT,
};

pub const DEFAULT_MASS: f32 = 10.0;
pub const DEFAULT_MASS_TRANSFORM_AMOUNT: f32 = 1.0;

const CREATE_SUB_ELEMENT: &str = "WorldObject::createSubElement";
const CLONE_SUB_ELEMENT: &str = "WorldObject::cloneSubElement";
const DELETE_SUB_ELEMENT: &str = "WorldObject::deleteSubElement";
const INSERT_COMPONENT_DATA: &str = "WorldObject::insertComponentData";

/// A named group of sub-elements an object type accepts.
#[derive(Clone, Copy, Debug)]
pub struct SubElementCategory {
    pub id: Uid,
    pub name: &'static str,
    pub types: &'static [Uid],
}

impl SubElementCategory {
    pub fn accepts(&self, type_id: &Uid) -> bool {
        self.types.contains(type_id)
    }
}

/// "Is-a" answer for the types every object extends.
pub fn is_world_object_type(type_id: &Uid) -> bool {
    *type_id == RTID_WORLD_OBJECT || *type_id == RTID_WORLD_COMPONENT || *type_id == RTID_REFERENCE
}

/// Shares a freshly built object as both trait objects the world needs.
pub fn spawn_object<O: WorldObject + 'static>(object: O) -> Spawned<dyn WorldObject> {
    let cell = Rc::new(RefCell::new(object));
    Spawned::from_parts(cell.clone(), cell)
}

/// State common to every world object.
pub struct ObjectCore {
    component: ComponentCore,
    mass: f32,
    mass_transform_amount: f32,
    sub_elements: BTreeMap<Uid, Vec<ElementHandle>>,
}

impl ObjectCore {
    pub fn new(ref_id: reference::RefId) -> Self {
        Self {
            component: ComponentCore::new(ref_id),
            mass: DEFAULT_MASS,
            mass_transform_amount: DEFAULT_MASS_TRANSFORM_AMOUNT,
            sub_elements: BTreeMap::new(),
        }
    }

    /// Copies the base data of `init`. Sub-elements are cloned separately
    /// once the new object is registered.
    pub fn from_existing(ref_id: reference::RefId, init: &ObjectCore) -> Self {
        Self {
            mass: init.mass,
            mass_transform_amount: init.mass_transform_amount,
            ..Self::new(ref_id)
        }
    }

    pub fn component(&self) -> &ComponentCore {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut ComponentCore {
        &mut self.component
    }

    pub fn object_ref(&self) -> WorldResult<ObjectRef> {
        Ok(ObjectRef {
            key: self.component.require_key()?,
            id: self.component.ref_id(),
        })
    }

    pub fn base_mass(&self) -> f32 {
        self.mass
    }

    pub fn mass_transform_amount(&self) -> f32 {
        self.mass_transform_amount
    }

    pub fn sub_elements(&self, category: &Uid) -> &[ElementHandle] {
        self.sub_elements.get(category).map_or(&[][..], Vec::as_slice)
    }

    /// Every sub-element, grouped by category in identifier order.
    pub fn all_sub_elements(&self) -> Vec<ElementHandle> {
        self.sub_elements.values().flatten().cloned().collect()
    }

    pub fn sub_element_count(&self) -> usize {
        self.sub_elements.values().map(Vec::len).sum()
    }

    fn push_sub_element(&mut self, category: Uid, element: ElementHandle) {
        self.sub_elements.entry(category).or_default().push(element);
    }

    fn take_sub_element(&mut self, category: &Uid, element: &ElementHandle) -> bool {
        let Some(list) = self.sub_elements.get_mut(category) else {
            return false;
        };
        let Some(at) = list.iter().position(|held| held.key() == element.key()) else {
            return false;
        };
        list.remove(at);
        if list.is_empty() {
            self.sub_elements.remove(category);
        }
        true
    }

    /// Links `element` to this object: a link row when both are persisted,
    /// a holder reference, and an entry in the category list.
    fn attach_sub_element(&mut self, world: &mut World, element: &ElementHandle) -> WorldResult<()> {
        let parent = self.object_ref()?;
        let (category, local_type_id) = {
            let element = element.borrow();
            (element.element_category(), element.core().local_type_id())
        };
        if self.component.should_serialize() && !element.is_internal() {
            world.execute_cached(
                INSERT_SUB_ELEMENT_LINK,
                "link sub-element",
                vec![
                    local_type_id.into_param(),
                    parent.id.into_param(),
                    element.id().into_param(),
                ],
            )?;
        }
        world.add_reference(element.key(), Some(parent.key), self.component.is_internal());
        self.push_sub_element(category, element.clone());
        Ok(())
    }

    /// Writes the base row and the links of every persisted sub-element.
    pub fn insert_component_data(&self, world: &mut World) -> WorldResult<()> {
        if !self.component.should_serialize() {
            return Ok(());
        }
        world.begin_transaction(Some(INSERT_COMPONENT_DATA))?;
        let result = self.insert_rows(world);
        world.settle_transaction(INSERT_COMPONENT_DATA, true, &result)?;
        result
    }

    fn insert_rows(&self, world: &mut World) -> WorldResult<()> {
        let ref_id = self.component.ref_id();
        world.execute_cached(
            INSERT_BASE_OBJECT,
            "insert object base data",
            vec![
                ref_id.into_param(),
                self.mass.into_param(),
                self.mass_transform_amount.into_param(),
            ],
        )?;
        for element in self.sub_elements.values().flatten() {
            if element.is_internal() {
                continue;
            }
            let local_type_id = element.borrow().core().local_type_id();
            world.execute_cached(
                INSERT_SUB_ELEMENT_LINK,
                "link sub-element",
                vec![
                    local_type_id.into_param(),
                    ref_id.into_param(),
                    element.id().into_param(),
                ],
            )?;
        }
        Ok(())
    }

    /// Base half of object creation: insert rows, then announce.
    pub fn component_created(&self, world: &mut World, event: &ComponentCreated) -> WorldResult<()> {
        self.insert_component_data(world)?;
        world.component_created(&self.component, event);
        Ok(())
    }

    /// Base half of object loading: reads the base row and reconnects the
    /// stored sub-elements. A cloned load writes fresh rows for the copy.
    pub fn component_loading(
        &mut self,
        world: &mut World,
        table: &str,
        event: &ComponentLoading,
    ) -> WorldResult<()> {
        let source = event.source_ref_id;
        let (mass, amount) = world
            .select_row(LOAD_BASE_OBJECT, vec![source.into_param()], |query| {
                (
                    query.column::<f32>("Mass"),
                    query.column::<f32>("MassTransformAmount"),
                )
            })?
            .ok_or(WorldError::MissingRow(source))?;
        self.mass = mass.unwrap_or(DEFAULT_MASS);
        self.mass_transform_amount = amount.unwrap_or(DEFAULT_MASS_TRANSFORM_AMOUNT);

        let links = world.select_rows(LOAD_SUB_ELEMENT_LINKS, vec![source.into_param()], |query| {
            (
                query.column::<u32>("SubElementTypeId"),
                query.column::<u32>("SubElementId"),
            )
        })?;
        let parent = self.object_ref()?;
        for (local_type_id, element_id) in links {
            let type_id = local_type_id
                .and_then(|local| world.catalog().sub_element_type_by_local_id(local))
                .map(|desc| desc.global_identifier);
            let (Some(type_id), Some(element_id)) = (type_id, element_id) else {
                warn!("object 0x{source:x}: skipping sub-element of unknown type {local_type_id:?}");
                continue;
            };
            let element = world.load_sub_element(type_id, element_id, parent, event.method)?;
            world.add_reference(element.key(), Some(parent.key), true);
            let category = element.borrow().element_category();
            self.push_sub_element(category, element);
        }

        world.component_loading(&self.component, table, event)?;
        if source != self.component.ref_id() {
            self.insert_component_data(world)?;
        }
        Ok(())
    }

    /// Base half of deletion: drops the base and link rows and releases
    /// every sub-element.
    pub fn component_deleted(&mut self, world: &mut World) {
        let ref_id = self.component.ref_id();
        if self.component.should_serialize() {
            for sql in [DELETE_BASE_OBJECT, DELETE_SUB_ELEMENT_LINKS] {
                if let Err(err) = world.execute_cached(sql, "delete object base data", vec![ref_id.into_param()]) {
                    warn!("object 0x{ref_id:x}: {err}");
                }
            }
        }
        let Some(key) = self.component.key() else {
            return;
        };
        let disconnecting = self.component.is_internal();
        for element in std::mem::take(&mut self.sub_elements).into_values().flatten() {
            world.remove_reference(element.key(), Some(key), disconnecting);
        }
    }

    /// Forgets the sub-element lists. The registry releases the held
    /// references itself when the object is torn down.
    pub fn dispose(&mut self) {
        self.sub_elements.clear();
    }

    pub fn rescale_sub_elements(&self, world: &mut World, scale: f32) -> WorldResult<()> {
        for element in self.sub_elements.values().flatten() {
            element.borrow_mut().apply_element_rescale(world, scale)?;
        }
        Ok(())
    }

    fn persist_base(&self, world: &mut World, mass: f32, amount: f32) -> WorldResult<()> {
        if !self.component.should_serialize() {
            return Ok(());
        }
        world.execute_cached(
            UPDATE_BASE_OBJECT,
            "update object base data",
            vec![
                mass.into_param(),
                amount.into_param(),
                self.component.ref_id().into_param(),
            ],
        )
    }
}

/// A placeable, persisted object owning categorised sub-elements.
pub trait WorldObject: WorldComponent {
    fn object(&self) -> &ObjectCore;

    fn object_mut(&mut self) -> &mut ObjectCore;

    /// Categories this object accepts. Collision shapes by default.
    fn sub_element_categories(&self) -> &'static [SubElementCategory] {
        &[COLLISION_SHAPES]
    }

    fn supports_sub_element(&self, category: &Uid, type_id: &Uid) -> bool {
        self.sub_element_categories()
            .iter()
            .any(|supported| supported.id == *category && supported.accepts(type_id))
    }

    /// Creates a sub-element of `type_id` and links it to this object.
    /// The element is internal exactly when the object is.
    fn create_sub_element(
        &mut self,
        world: &mut World,
        category: Uid,
        type_id: Uid,
    ) -> WorldResult<ElementHandle> {
        if !self.supports_sub_element(&category, &type_id) {
            return Err(WorldError::UnsupportedSubElement {
                category,
                element: type_id,
            });
        }
        let parent = self.object().object_ref()?;
        let internal = self.core().is_internal();
        let opened = self.should_serialize();
        if opened {
            world.begin_transaction(Some(CREATE_SUB_ELEMENT))?;
        }
        let result = match world.create_sub_element(internal, type_id, parent) {
            Ok(element) => match self.object_mut().attach_sub_element(world, &element) {
                Ok(()) => Ok(element),
                Err(err) => {
                    world.delete_component(element.key());
                    Err(err)
                }
            },
            Err(err) => Err(err),
        };
        world.settle_transaction(CREATE_SUB_ELEMENT, opened, &result)?;
        let element = result?;
        trace!("object 0x{:x} gained sub-element 0x{:x}", parent.id, element.id());
        if category == OSECID_COLLISION_SHAPES {
            self.on_component_modified(world, "CollisionShapeAdded");
        }
        Ok(element)
    }

    /// Copies `source` (typically owned by another object) into this one.
    fn clone_sub_element(&mut self, world: &mut World, source: &ElementHandle) -> WorldResult<ElementHandle> {
        let (category, type_id) = {
            let source = source.borrow();
            (source.element_category(), source.reference_type())
        };
        if !self.supports_sub_element(&category, &type_id) {
            return Err(WorldError::UnsupportedSubElement {
                category,
                element: type_id,
            });
        }
        let parent = self.object().object_ref()?;
        let internal = self.core().is_internal();
        let opened = self.should_serialize();
        if opened {
            world.begin_transaction(Some(CLONE_SUB_ELEMENT))?;
        }
        let created = {
            let init = source.borrow();
            world.create_sub_element_from(internal, type_id, parent, &*init)
        };
        let result = match created {
            Ok(element) => match self.object_mut().attach_sub_element(world, &element) {
                Ok(()) => Ok(element),
                Err(err) => {
                    world.delete_component(element.key());
                    Err(err)
                }
            },
            Err(err) => Err(err),
        };
        world.settle_transaction(CLONE_SUB_ELEMENT, opened, &result)?;
        let element = result?;
        if category == OSECID_COLLISION_SHAPES {
            self.on_component_modified(world, "CollisionShapeAdded");
        }
        Ok(element)
    }

    /// Unlinks `element` and drops this object's reference on it. Returns
    /// false when the element does not belong to this object.
    fn delete_sub_element(&mut self, world: &mut World, element: &ElementHandle) -> WorldResult<bool> {
        let category = element.borrow().element_category();
        if !self.object_mut().take_sub_element(&category, element) {
            return Ok(false);
        }
        let parent = self.object().object_ref()?;
        let opened = self.should_serialize();
        if opened {
            world.begin_transaction(Some(DELETE_SUB_ELEMENT))?;
        }
        let result = if opened {
            world.execute_cached(
                DELETE_SUB_ELEMENT_LINK,
                "unlink sub-element",
                vec![parent.id.into_param(), element.id().into_param()],
            )
        } else {
            Ok(())
        };
        if result.is_ok() {
            world.remove_reference(element.key(), Some(parent.key), self.core().is_internal());
        }
        world.settle_transaction(DELETE_SUB_ELEMENT, opened, &result)?;
        if let Err(err) = result {
            self.object_mut().push_sub_element(category, element.clone());
            return Err(err);
        }
        if category == OSECID_COLLISION_SHAPES {
            self.on_component_modified(world, "CollisionShapeRemoved");
        }
        Ok(true)
    }

    /// Deletes each element in turn, returning how many were removed.
    fn delete_sub_elements(&mut self, world: &mut World, elements: &[ElementHandle]) -> WorldResult<usize> {
        let mut removed = 0;
        for element in elements {
            if self.delete_sub_element(world, element)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn base_mass(&self) -> f32 {
        self.object().base_mass()
    }

    fn mass_transform_amount(&self) -> f32 {
        self.object().mass_transform_amount()
    }

    fn set_base_mass(&mut self, world: &mut World, mass: f32) -> WorldResult<()> {
        let amount = self.object().mass_transform_amount();
        self.object().persist_base(world, mass, amount)?;
        self.object_mut().mass = mass;
        self.on_component_modified(world, "BaseMass");
        Ok(())
    }

    fn set_mass_transform_amount(&mut self, world: &mut World, amount: f32) -> WorldResult<()> {
        let mass = self.object().base_mass();
        self.object().persist_base(world, mass, amount)?;
        self.object_mut().mass_transform_amount = amount;
        self.on_component_modified(world, "MassTransformAmount");
        Ok(())
    }

    /// Scales the object's sub-elements. Types with their own dimensions
    /// override this and scale those too.
    fn apply_object_rescale(&mut self, world: &mut World, scale: f32) -> WorldResult<()> {
        self.object().rescale_sub_elements(world, scale)
    }
}

//! The dummy object: a sized marker with no behaviour of its own, placed in
//! scenes through [`DummyNode`].

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use reference::{Message, RefId, Reference, ReferenceKey, ReferenceManager, Uid};
use world_query::IntoParam;

use crate::object::{is_world_object_type, spawn_object};
use crate::{
    CloneMethod, ComponentCore, ComponentCreated, ComponentLoading, ObjectCore, ObjectHandle,
    Spawned, TypeCatalog, World, WorldComponent, WorldError, WorldObject, WorldResult,
    RTID_OBJECT_NODE, WORLD_COMPONENT_MODIFIED,
};

pub const RTID_DUMMY_OBJECT: Uid = Uid::from_u128(0x4B6669F2_8213_4ED6_BA4F_651C250A959C);
pub const RTID_DUMMY_NODE: Uid = Uid::from_u128(0x2D239346_1E8A_4F3E_A7D9_7703985A8F6C);

pub const DEFAULT_DUMMY_SIZE: f32 = 3.0;

const TABLE: &str = "Objects::Dummy";
const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS 'Objects::Dummy' (
    RefId INTEGER PRIMARY KEY,
    DisplaySize REAL NOT NULL DEFAULT 3.0,
    RefCount INTEGER NOT NULL DEFAULT 0
);";
const INSERT: &str = "INSERT INTO 'Objects::Dummy' VALUES(?1,?2,?3)";
const UPDATE_SIZE: &str = "UPDATE 'Objects::Dummy' SET DisplaySize=?1 WHERE RefId=?2";
const LOAD: &str = "SELECT * FROM 'Objects::Dummy' WHERE RefId=?1";

pub struct DummyObject {
    object: ObjectCore,
    size: f32,
}

impl DummyObject {
    pub fn new(ref_id: RefId) -> Self {
        Self {
            object: ObjectCore::new(ref_id),
            size: DEFAULT_DUMMY_SIZE,
        }
    }

    /// Display size of the marker.
    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn set_size(&mut self, world: &mut World, size: f32) -> WorldResult<()> {
        if self.should_serialize() {
            world.execute_cached(
                UPDATE_SIZE,
                "update dummy size",
                vec![size.into_param(), self.core().ref_id().into_param()],
            )?;
        }
        self.size = size;
        self.on_component_modified(world, "Size");
        Ok(())
    }

    fn insert_component_data(&self, world: &mut World) -> WorldResult<()> {
        if !self.should_serialize() {
            return Ok(());
        }
        let soft = self
            .core()
            .key()
            .map_or(0, |key| world.manager().reference_count(key, false));
        world.execute_cached(
            INSERT,
            "insert dummy data",
            vec![
                self.core().ref_id().into_param(),
                self.size.into_param(),
                soft.into_param(),
            ],
        )
    }
}

impl Reference for DummyObject {
    fn reference_type(&self) -> Uid {
        RTID_DUMMY_OBJECT
    }

    fn query_reference_type(&self, type_id: &Uid) -> bool {
        *type_id == RTID_DUMMY_OBJECT || is_world_object_type(type_id)
    }

    fn dispose(&mut self, _key: ReferenceKey, _manager: &mut ReferenceManager) {
        self.object.dispose();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl WorldComponent for DummyObject {
    fn core(&self) -> &ComponentCore {
        self.object.component()
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        self.object.component_mut()
    }

    fn database_table(&self) -> &'static str {
        TABLE
    }

    fn type_table_schema(&self) -> &'static str {
        SCHEMA
    }

    fn on_component_created(&mut self, world: &mut World, event: &ComponentCreated) -> WorldResult<()> {
        self.insert_component_data(world)?;
        self.object.component_created(world, event)
    }

    fn on_component_loading(&mut self, world: &mut World, event: &ComponentLoading) -> WorldResult<()> {
        let size = world
            .select_row(LOAD, vec![event.source_ref_id.into_param()], |query| {
                query.column::<f32>("DisplaySize")
            })?
            .ok_or(WorldError::MissingRow(event.source_ref_id))?;
        self.size = size.unwrap_or(DEFAULT_DUMMY_SIZE);

        self.object.component_loading(world, TABLE, event)?;
        if event.source_ref_id != self.core().ref_id() {
            self.insert_component_data(world)?;
        }
        Ok(())
    }

    fn on_component_deleted(&mut self, world: &mut World) {
        self.object.component_deleted(world);
        world.component_deleted(self.object.component(), TABLE);
    }
}

impl WorldObject for DummyObject {
    fn object(&self) -> &ObjectCore {
        &self.object
    }

    fn object_mut(&mut self) -> &mut ObjectCore {
        &mut self.object
    }

    fn apply_object_rescale(&mut self, world: &mut World, scale: f32) -> WorldResult<()> {
        self.object.rescale_sub_elements(world, scale)?;
        self.set_size(world, self.size * scale)
    }
}

/// Places a [`DummyObject`] and records which of its properties changed.
pub struct DummyNode {
    ref_id: RefId,
    object: ObjectHandle,
    modifications: Vec<String>,
}

impl DummyNode {
    pub fn new(ref_id: RefId, object: ObjectHandle) -> Self {
        Self {
            ref_id,
            object,
            modifications: Vec::new(),
        }
    }

    pub fn ref_id(&self) -> RefId {
        self.ref_id
    }

    pub fn object(&self) -> &ObjectHandle {
        &self.object
    }

    /// Property names reported by the object, oldest first.
    pub fn modifications(&self) -> &[String] {
        &self.modifications
    }
}

impl Reference for DummyNode {
    fn reference_type(&self) -> Uid {
        RTID_DUMMY_NODE
    }

    fn query_reference_type(&self, type_id: &Uid) -> bool {
        *type_id == RTID_DUMMY_NODE
            || *type_id == RTID_OBJECT_NODE
            || *type_id == reference::RTID_REFERENCE
    }

    fn process_message(&mut self, message: &Message, _manager: &mut ReferenceManager) -> bool {
        if message.message_id != WORLD_COMPONENT_MODIFIED || message.from_id != self.object.id() {
            return false;
        }
        self.modifications.push(message.context.clone());
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn alloc_dummy(_type_id: Uid, ref_id: RefId) -> Option<Spawned<dyn WorldObject>> {
    Some(spawn_object(DummyObject::new(ref_id)))
}

fn clone_dummy(
    _type_id: Uid,
    ref_id: RefId,
    init: &dyn WorldObject,
    _method: CloneMethod,
) -> Option<Spawned<dyn WorldObject>> {
    let size = init
        .as_any()
        .downcast_ref::<DummyObject>()
        .map_or(DEFAULT_DUMMY_SIZE, DummyObject::size);
    Some(spawn_object(DummyObject {
        object: ObjectCore::from_existing(ref_id, init.object()),
        size,
    }))
}

fn alloc_dummy_node(
    _type_id: Uid,
    ref_id: RefId,
    object: &ObjectHandle,
) -> Option<Rc<RefCell<dyn Reference>>> {
    Some(Rc::new(RefCell::new(DummyNode::new(ref_id, object.clone()))))
}

fn clone_dummy_node(
    _type_id: Uid,
    ref_id: RefId,
    object: &ObjectHandle,
    _init: &dyn Reference,
) -> Option<Rc<RefCell<dyn Reference>>> {
    Some(Rc::new(RefCell::new(DummyNode::new(ref_id, object.clone()))))
}

pub(crate) fn register_dummy(catalog: &mut TypeCatalog) {
    catalog.register_object_type(
        RTID_DUMMY_OBJECT,
        "Dummy",
        alloc_dummy,
        clone_dummy,
        Some(alloc_dummy_node),
        Some(clone_dummy_node),
    );
}

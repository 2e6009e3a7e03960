//! Shared world fixtures for the integration tests.

#![allow(dead_code)]

use std::any::Any;

use reference::{Handle, Message, RefId, Reference, ReferenceManager, Uid};
use rusqlite::OptionalExtension;
use world::{DummyObject, ObjectHandle, TypeCatalog, World, WorldConfig};

pub const RTID_LISTENER: Uid = Uid::from_u128(0x7E57_0000_0000_0000_0000_0000_0000_0002);

/// Records the ids of every message routed to it.
#[derive(Default)]
pub struct Listener {
    pub received: Vec<u32>,
    pub contexts: Vec<String>,
}

impl Reference for Listener {
    fn reference_type(&self) -> Uid {
        RTID_LISTENER
    }

    fn process_message(&mut self, message: &Message, _manager: &mut ReferenceManager) -> bool {
        self.received.push(message.message_id);
        self.contexts.push(message.context.clone());
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn transient_world() -> World {
    init_logging();
    World::create(WorldConfig::transient(), &TypeCatalog::with_builtin_types())
        .expect("create transient world")
}

pub fn listener(world: &mut World) -> Handle<Listener> {
    let id = world.manager_mut().generate_internal_ref_id();
    world.manager_mut().register(id, Listener::default())
}

pub fn rows(world: &World, table: &str) -> i64 {
    let connection = world.connection().expect("world has a database");
    connection
        .query_row(&format!("SELECT COUNT(*) FROM '{table}'"), [], |row| row.get(0))
        .expect("count rows")
}

pub fn stored_ref_count(world: &World, table: &str, ref_id: RefId) -> Option<i32> {
    let connection = world.connection().expect("world has a database");
    connection
        .query_row(
            &format!("SELECT RefCount FROM '{table}' WHERE RefId=?1"),
            [ref_id],
            |row| row.get(0),
        )
        .optional()
        .expect("read RefCount")
}

pub fn stored_real(world: &World, sql: &str, ref_id: RefId) -> f64 {
    let connection = world.connection().expect("world has a database");
    connection
        .query_row(sql, [ref_id], |row| row.get(0))
        .expect("read stored value")
}

/// Runs `f` against the concrete dummy behind `object`.
pub fn with_dummy<R>(object: &ObjectHandle, f: impl FnOnce(&mut DummyObject) -> R) -> R {
    let mut object = object.borrow_mut();
    let dummy = object
        .as_any_mut()
        .downcast_mut::<DummyObject>()
        .expect("object is a dummy");
    f(dummy)
}

/// Runs `f` against the collision shape behind `element`.
pub fn with_shape<R>(
    element: &world::ElementHandle,
    f: impl FnOnce(&mut world::CollisionShapeElement) -> R,
) -> R {
    let mut element = element.borrow_mut();
    let shape = element
        .as_any_mut()
        .downcast_mut::<world::CollisionShapeElement>()
        .expect("element is a collision shape");
    f(shape)
}

pub fn memory_config(file: &str) -> WorldConfig {
    init_logging();
    WorldConfig::memory("world-tests", file)
}

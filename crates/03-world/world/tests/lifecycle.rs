//! Creating, referencing and deleting components in a live world.

mod support;

use reference::{RefId, Uid};
use world::{
    CloneMethod, DummyNode, Spawned, TypeCatalog, World, WorldComponent, WorldConfig, WorldError,
    WorldObject, MGID_WORLD_COMPONENT, RTID_DUMMY_OBJECT, WORLD_COMPONENT_CREATED,
    WORLD_COMPONENT_DELETED, WORLD_COMPONENT_MODIFIED, WORLD_DISPOSING,
};

use support::{listener, rows, stored_real, stored_ref_count, transient_world, with_dummy};

const DUMMY_TABLE: &str = "Objects::Dummy";
const BASE_TABLE: &str = "Objects::Base::All";

/// A persisted object takes the next database id and writes its type row,
/// base row and type-specific row.
#[test]
fn created_object_is_written_to_the_database() {
    let mut world = transient_world();
    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();

    assert_eq!(object.id(), 1);
    assert!(!object.is_internal());
    assert!(object.borrow().should_serialize());
    assert_eq!(rows(&world, DUMMY_TABLE), 1);
    assert_eq!(rows(&world, BASE_TABLE), 1);
    assert_eq!(rows(&world, "ObjectTypes"), 1);
    assert_eq!(stored_ref_count(&world, DUMMY_TABLE, 1), Some(0));

    let local = world
        .catalog()
        .object_type(&RTID_DUMMY_OBJECT)
        .map(|desc| desc.local_identifier);
    assert_eq!(local, Some(1));
    assert_eq!(object.borrow().core().local_type_id(), 1);
    assert_eq!(world.open_transactions(), 0);

    let second = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    assert_eq!(second.id(), 2);
    assert_eq!(rows(&world, "ObjectTypes"), 1);
}

/// Full references are mirrored in the `RefCount` column.
#[test]
fn reference_count_follows_soft_count() {
    let mut world = transient_world();
    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();

    world.add_reference(object.key(), None, false);
    world.add_reference(object.key(), None, false);
    assert_eq!(stored_ref_count(&world, DUMMY_TABLE, object.id()), Some(2));

    assert_eq!(world.remove_reference(object.key(), None, false), 1);
    assert_eq!(stored_ref_count(&world, DUMMY_TABLE, object.id()), Some(1));

    // A disconnect drops the live reference but keeps the stored count.
    world.add_reference(object.key(), None, true);
    assert_eq!(world.remove_reference(object.key(), None, true), 1);
    assert_eq!(stored_ref_count(&world, DUMMY_TABLE, object.id()), Some(1));
}

/// Dropping the last database reference deletes every row the object and
/// its sub-elements own before the object is torn down.
#[test]
fn last_reference_deletes_rows() {
    let mut world = transient_world();
    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    world.add_reference(object.key(), None, false);
    let shape = object
        .borrow_mut()
        .create_sub_element(&mut world, world::OSECID_COLLISION_SHAPES, world::RTID_BOX_COLLISION_SHAPE)
        .unwrap();
    assert_eq!(rows(&world, "ObjectSubElements::BoxCollisionShape"), 1);
    assert_eq!(rows(&world, "Objects::Base::All::SubElements"), 1);

    assert_eq!(world.remove_reference(object.key(), None, false), 0);

    assert_eq!(rows(&world, DUMMY_TABLE), 0);
    assert_eq!(rows(&world, BASE_TABLE), 0);
    assert_eq!(rows(&world, "ObjectSubElements::BoxCollisionShape"), 0);
    assert_eq!(rows(&world, "Objects::Base::All::SubElements"), 0);
    assert!(world.object(1).is_none());
    assert!(!world.manager().is_valid_reference(shape.key()));
    assert_eq!(world.component_count(), 0);
}

/// Internal objects never touch the database.
#[test]
fn internal_objects_are_not_persisted() {
    let mut world = transient_world();
    let object = world.create_object(true, RTID_DUMMY_OBJECT).unwrap();

    assert!(object.is_internal());
    assert!(!object.borrow().should_serialize());
    assert_eq!(object.borrow().core().local_type_id(), 0);
    assert!(!world.table_exists(DUMMY_TABLE).unwrap());
    assert_eq!(rows(&world, BASE_TABLE), 0);
}

/// Outside the sandbox every object is internal, even when persistence
/// is requested.
#[test]
fn sandbox_off_keeps_everything_internal() {
    support::init_logging();
    let config = WorldConfig::transient().with_sandbox(false);
    let mut world = World::create(config, &TypeCatalog::with_builtin_types()).unwrap();

    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    assert!(object.is_internal());
    assert!(!object.borrow().should_serialize());
    assert_eq!(rows(&world, BASE_TABLE), 0);
}

/// Unregistered types are refused before anything is written.
#[test]
fn unknown_type_is_rejected() {
    let mut world = transient_world();
    let err = world.create_object(false, Uid::nil()).unwrap_err();

    assert!(matches!(err, WorldError::UnknownType(id) if id == Uid::nil()));
    assert_eq!(world.open_transactions(), 0);
    assert_eq!(rows(&world, BASE_TABLE), 0);
}

const RTID_REFUSED: Uid = Uid::from_u128(0x7E57_0000_0000_0000_0000_0000_0000_0003);

fn refuse(_type_id: Uid, _ref_id: RefId) -> Option<Spawned<dyn WorldObject>> {
    None
}

fn refuse_clone(
    _type_id: Uid,
    _ref_id: RefId,
    _init: &dyn WorldObject,
    _method: CloneMethod,
) -> Option<Spawned<dyn WorldObject>> {
    None
}

/// A failed creation rolls back its savepoint, including the id it took.
#[test]
fn failed_allocation_rolls_back_the_id() {
    support::init_logging();
    let mut catalog = TypeCatalog::with_builtin_types();
    catalog.register_object_type(RTID_REFUSED, "Refused", refuse, refuse_clone, None, None);
    let mut world = World::create(WorldConfig::transient(), &catalog).unwrap();

    let err = world.create_object(false, RTID_REFUSED).unwrap_err();
    assert!(matches!(err, WorldError::Allocation(id) if id == RTID_REFUSED));
    assert_eq!(world.open_transactions(), 0);

    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    assert_eq!(object.id(), 1);
}

/// Property changes reach the node that placed the object, and deleting
/// the node releases the object's last database reference.
#[test]
fn node_tracks_object_changes() {
    let mut world = transient_world();
    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    let node = world
        .create_object_node(false, RTID_DUMMY_OBJECT, &object)
        .unwrap();
    assert_eq!(node.id(), 2);
    assert_eq!(stored_ref_count(&world, DUMMY_TABLE, object.id()), Some(1));

    with_dummy(&object, |dummy| dummy.set_size(&mut world, 5.0)).unwrap();
    object.borrow_mut().set_base_mass(&mut world, 42.0).unwrap();

    let seen = world
        .manager()
        .with_reference::<DummyNode, _>(node.key(), |node| node.modifications().to_vec())
        .unwrap();
    assert_eq!(seen, vec!["Size".to_owned(), "BaseMass".to_owned()]);
    assert_eq!(
        stored_real(&world, "SELECT DisplaySize FROM 'Objects::Dummy' WHERE RefId=?1", object.id()),
        5.0
    );
    assert_eq!(
        stored_real(&world, "SELECT Mass FROM 'Objects::Base::All' WHERE RefId=?1", object.id()),
        42.0
    );

    assert!(world.delete_object_node(node.key()));
    assert!(!world.manager().is_valid_reference(object.key()));
    assert_eq!(rows(&world, DUMMY_TABLE), 0);
}

/// Group members hear about creation, modification and deletion.
#[test]
fn lifecycle_messages_reach_the_component_group() {
    let mut world = transient_world();
    let watcher = listener(&mut world);
    world
        .manager_mut()
        .subscribe_to_group(watcher.id(), MGID_WORLD_COMPONENT);

    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    world.add_reference(object.key(), None, false);
    object.borrow_mut().set_mass_transform_amount(&mut world, 0.5).unwrap();
    world.remove_reference(object.key(), None, false);

    let watcher = watcher.borrow();
    assert_eq!(
        watcher.received,
        vec![WORLD_COMPONENT_CREATED, WORLD_COMPONENT_MODIFIED, WORLD_COMPONENT_DELETED]
    );
    assert_eq!(watcher.contexts[1], "MassTransformAmount");
}

/// Disposal is announced to every reference, happens once, and leaves the
/// world refusing further work.
#[test]
fn dispose_is_announced_once() {
    let mut world = transient_world();
    let watcher = listener(&mut world);
    world.create_object(false, RTID_DUMMY_OBJECT).unwrap();

    world.dispose();
    world.dispose();

    assert_eq!(watcher.borrow().received, vec![WORLD_DISPOSING]);
    assert!(world.is_disposed());
    assert!(matches!(
        world.create_object(false, RTID_DUMMY_OBJECT),
        Err(WorldError::Disposed)
    ));
    assert!(matches!(world.connection(), Err(WorldError::NoDatabase)));
}

/// Savepoints nest and roll back independently.
#[test]
fn nested_savepoints_roll_back_inner_work() {
    let mut world = transient_world();
    world.begin_transaction(Some("outer")).unwrap();
    world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    world.begin_transaction(Some("inner")).unwrap();
    world
        .execute_query("INSERT INTO 'Objects::Base::All' VALUES(99, 1.0, 1.0)", false)
        .unwrap();
    assert_eq!(world.open_transactions(), 2);

    world.rollback_transaction(Some("inner"), false).unwrap();
    world.commit_transaction(Some("outer")).unwrap();

    assert_eq!(world.open_transactions(), 0);
    assert_eq!(rows(&world, BASE_TABLE), 1);
}

#[cfg(feature = "proptest")]
mod prop {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The stored count tracks the soft count until the rows go away.
        #[test]
        fn stored_count_matches_soft_count(adds in prop::collection::vec(any::<bool>(), 1..32)) {
            let mut world = transient_world();
            let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
            world.add_reference(object.key(), None, false);

            for add in adds {
                if add {
                    world.add_reference(object.key(), None, false);
                } else {
                    world.remove_reference(object.key(), None, false);
                }
                if !world.manager().is_valid_reference(object.key()) {
                    prop_assert_eq!(stored_ref_count(&world, DUMMY_TABLE, object.id()), None);
                    break;
                }
                let soft = world.manager().reference_count(object.key(), false);
                prop_assert_eq!(stored_ref_count(&world, DUMMY_TABLE, object.id()), Some(soft));
            }
        }
    }
}

//! World databases copied between files of the in-memory VFS.

use world::{
    CloneMethod, TypeCatalog, World, WorldConfig, WorldError, WorldObject,
    OSECID_COLLISION_SHAPES, RTID_CONE_COLLISION_SHAPE, RTID_DUMMY_OBJECT,
};
use world_query::MemoryVfs;

const VFS: &str = "scenario-images";

/// A snapshot of one world's database opens as a second, independent world.
#[test]
fn image_copies_open_as_independent_worlds() {
    crate::init_logging();
    let catalog = TypeCatalog::with_builtin_types();
    let vfs = MemoryVfs::register(VFS).unwrap();

    {
        let mut world = World::create(WorldConfig::memory(VFS, "level.db"), &catalog).unwrap();
        let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
        world.add_reference(object.key(), None, false);
        object
            .borrow_mut()
            .create_sub_element(&mut world, OSECID_COLLISION_SHAPES, RTID_CONE_COLLISION_SHAPE)
            .unwrap();
    }
    let image = vfs.file_bytes("level.db").unwrap();
    vfs.insert_file("level-copy.db", image);

    {
        let mut copy = World::open(WorldConfig::memory(VFS, "level-copy.db"), &catalog).unwrap();
        let object = copy
            .load_object(RTID_DUMMY_OBJECT, 1, CloneMethod::None)
            .unwrap();
        assert_eq!(object.borrow().object().sub_element_count(), 1);

        copy.add_reference(object.key(), None, true);
        assert_eq!(copy.remove_reference(object.key(), None, false), 0);
    }

    let mut copy = World::open(WorldConfig::memory(VFS, "level-copy.db"), &catalog).unwrap();
    assert!(matches!(
        copy.load_object(RTID_DUMMY_OBJECT, 1, CloneMethod::None),
        Err(WorldError::MissingRow(1))
    ));

    let mut original = World::open(WorldConfig::memory(VFS, "level.db"), &catalog).unwrap();
    let object = original
        .load_object(RTID_DUMMY_OBJECT, 1, CloneMethod::None)
        .unwrap();
    assert_eq!(original.manager().reference_count(object.key(), false), 1);
    assert_eq!(object.borrow().object().sub_element_count(), 1);
}

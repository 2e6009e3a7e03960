//! Persisted, typed references.

use std::cell::RefCell;
use std::rc::Rc;

use reference::{is_internal_id, Handle, RefId, Reference, ReferenceKey};

use crate::{ComponentCreated, ComponentLoading, World, WorldError, WorldResult};

/// Identity and persistence state every component carries.
#[derive(Clone, Debug)]
pub struct ComponentCore {
    ref_id: RefId,
    key: Option<ReferenceKey>,
    local_type_id: u32,
    serialize: bool,
}

impl ComponentCore {
    pub fn new(ref_id: RefId) -> Self {
        Self {
            ref_id,
            key: None,
            local_type_id: 0,
            serialize: false,
        }
    }

    pub fn ref_id(&self) -> RefId {
        self.ref_id
    }

    /// Arena key, once the world has registered the component.
    pub fn key(&self) -> Option<ReferenceKey> {
        self.key
    }

    pub(crate) fn require_key(&self) -> WorldResult<ReferenceKey> {
        self.key.ok_or(WorldError::Detached(self.ref_id))
    }

    pub fn is_internal(&self) -> bool {
        is_internal_id(self.ref_id)
    }

    /// True when the component's rows live in the world database.
    pub fn should_serialize(&self) -> bool {
        self.serialize
    }

    /// Database-local identifier of the component's type.
    pub fn local_type_id(&self) -> u32 {
        self.local_type_id
    }

    pub(crate) fn attach(&mut self, key: ReferenceKey, sandbox: bool) {
        self.key = Some(key);
        self.serialize = sandbox && !self.is_internal();
    }

    pub(crate) fn set_local_type_id(&mut self, local_type_id: u32) {
        self.local_type_id = local_type_id;
    }
}

/// A [`Reference`] whose state is persisted in the world database.
///
/// Lifecycle hooks receive the owning [`World`]; implementations call the
/// matching `World::component_*` helper last so group listeners hear about
/// the change.
pub trait WorldComponent: Reference {
    fn core(&self) -> &ComponentCore;

    fn core_mut(&mut self) -> &mut ComponentCore;

    /// Table holding the type-specific row, keyed by `RefId` and carrying a
    /// `RefCount` column.
    fn database_table(&self) -> &'static str;

    /// Statements creating the type's tables. Run once per world database.
    fn type_table_schema(&self) -> &'static str;

    fn should_serialize(&self) -> bool {
        self.core().should_serialize()
    }

    /// Writes the first rows for a freshly created component.
    fn on_component_created(&mut self, world: &mut World, event: &ComponentCreated) -> WorldResult<()>;

    /// Reads the component back from the rows of `event.source_ref_id`.
    fn on_component_loading(&mut self, world: &mut World, event: &ComponentLoading) -> WorldResult<()>;

    /// Tells subscribers and the component group that `context` changed.
    fn on_component_modified(&mut self, world: &mut World, context: &str) {
        world.notify_component_modified(self.core().ref_id(), context);
    }

    /// The last database reference is gone; remove every row.
    fn on_component_deleted(&mut self, world: &mut World);
}

/// A freshly allocated component, shared as both its concrete trait object
/// and as a plain [`Reference`] for the registry.
pub struct Spawned<T: ?Sized> {
    pub(crate) reference: Rc<RefCell<dyn Reference>>,
    pub(crate) component: Rc<RefCell<T>>,
}

impl<T: ?Sized> Spawned<T> {
    /// Pairs the two views of one allocation. Both must point at the same
    /// cell; allocators usually go through [`spawn_object`] or
    /// [`spawn_element`] instead.
    ///
    /// [`spawn_object`]: crate::spawn_object
    /// [`spawn_element`]: crate::spawn_element
    pub fn from_parts(reference: Rc<RefCell<dyn Reference>>, component: Rc<RefCell<T>>) -> Self {
        Self {
            reference,
            component,
        }
    }

    pub fn component(&self) -> &Rc<RefCell<T>> {
        &self.component
    }
}

/// Identity of a parent object handed to sub-element allocators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    pub key: ReferenceKey,
    pub id: RefId,
}

impl<T: ?Sized> From<&Handle<T>> for ObjectRef {
    fn from(handle: &Handle<T>) -> Self {
        ObjectRef {
            key: handle.key(),
            id: handle.id(),
        }
    }
}

/// Registers a component with the world's manager and attaches its core.
pub(crate) fn adopt<T: ?Sized + WorldComponent>(
    world: &mut World,
    ref_id: RefId,
    spawned: Spawned<T>,
) -> Handle<T> {
    let key = world.manager_mut().register_shared(ref_id, spawned.reference);
    let sandbox = world.config().sandbox;
    spawned.component.borrow_mut().core_mut().attach(key, sandbox);
    Handle::new(key, ref_id, spawned.component)
}

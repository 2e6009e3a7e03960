//! Sub-elements: components owned by a world object, such as its
//! collision shapes.

use std::cell::RefCell;
use std::rc::Rc;

use reference::{RefId, Uid, RTID_REFERENCE};

use crate::{ComponentCore, ObjectRef, Spawned, World, WorldComponent, WorldResult};
use crate::{RTID_OBJECT_SUB_ELEMENT, RTID_WORLD_COMPONENT};

pub fn is_sub_element_type(type_id: &Uid) -> bool {
    *type_id == RTID_OBJECT_SUB_ELEMENT
        || *type_id == RTID_WORLD_COMPONENT
        || *type_id == RTID_REFERENCE
}

pub fn spawn_element<E: ObjectSubElement + 'static>(element: E) -> Spawned<dyn ObjectSubElement> {
    let cell = Rc::new(RefCell::new(element));
    Spawned::from_parts(cell.clone(), cell)
}

#[derive(Clone, Debug)]
pub struct ElementCore {
    component: ComponentCore,
    parent: ObjectRef,
    selected: bool,
}

impl ElementCore {
    pub fn new(ref_id: RefId, parent: ObjectRef) -> Self {
        Self {
            component: ComponentCore::new(ref_id),
            parent,
            selected: false,
        }
    }

    pub fn component(&self) -> &ComponentCore {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut ComponentCore {
        &mut self.component
    }

    /// The object this element was created for.
    pub fn parent_object(&self) -> ObjectRef {
        self.parent
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }
}

pub trait ObjectSubElement: WorldComponent {
    fn element(&self) -> &ElementCore;

    fn element_mut(&mut self) -> &mut ElementCore;

    /// Category the owning object files this element under.
    fn element_category(&self) -> Uid;

    fn display_name(&self) -> &str {
        "<Unnamed>"
    }

    fn apply_element_rescale(&mut self, _world: &mut World, _scale: f32) -> WorldResult<()> {
        Ok(())
    }
}

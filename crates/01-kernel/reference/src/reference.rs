use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::{is_internal_id, Message, RefId, ReferenceManager, Uid, RTID_REFERENCE};

/// Arena address of a tracked reference.
///
/// Keys are never recycled for a different object: a freed slot bumps its
/// generation, so a stale key can always be told apart from a live one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    index: u32,
    generation: u32,
}

impl ReferenceKey {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Behaviour shared by every object tracked by a [`ReferenceManager`].
///
/// Counting and holder bookkeeping live in the manager; implementors only
/// supply identity, capability queries and the notification hooks.
pub trait Reference: Any {
    /// Concrete type identifier of this object.
    fn reference_type(&self) -> Uid;

    /// "Is-a" query. Implementations check their own identifiers and then
    /// defer to the base they extend.
    fn query_reference_type(&self, type_id: &Uid) -> bool {
        *type_id == self.reference_type() || *type_id == RTID_REFERENCE
    }

    /// Handles a routed message. Returns true when the message was consumed.
    fn process_message(&mut self, _message: &Message, _manager: &mut ReferenceManager) -> bool {
        false
    }

    /// Called after a reference was added. `holder_refs` is the number of
    /// references the holder now has on this object (0 when anonymous).
    fn on_reference_added(
        &mut self,
        _holder: Option<ReferenceKey>,
        _holder_refs: i32,
        _reconnecting: bool,
    ) {
    }

    /// Called after a reference was removed, with the holder's remaining count.
    fn on_reference_removed(
        &mut self,
        _holder: Option<ReferenceKey>,
        _holder_refs: i32,
        _disconnecting: bool,
    ) {
    }

    /// Releases resources before the object leaves the registry. Runs once.
    fn dispose(&mut self, _key: ReferenceKey, _manager: &mut ReferenceManager) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Typed, cloneable access to a tracked object.
///
/// A handle keeps the allocation alive but not the registration; ask the
/// manager (`is_valid_reference`) before trusting it after teardown.
pub struct Handle<T: ?Sized> {
    key: ReferenceKey,
    id: RefId,
    cell: Rc<RefCell<T>>,
}

impl<T: ?Sized> Handle<T> {
    pub fn new(key: ReferenceKey, id: RefId, cell: Rc<RefCell<T>>) -> Self {
        Self { key, id, cell }
    }

    pub fn key(&self) -> ReferenceKey {
        self.key
    }

    pub fn id(&self) -> RefId {
        self.id
    }

    pub fn is_internal(&self) -> bool {
        is_internal_id(self.id)
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.cell.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.cell.borrow_mut()
    }

    pub fn try_borrow_mut(&self) -> Option<RefMut<'_, T>> {
        self.cell.try_borrow_mut().ok()
    }

    pub fn cell(&self) -> &Rc<RefCell<T>> {
        &self.cell
    }

    /// True when both handles name the same allocation.
    pub fn same_object<U: ?Sized>(&self, other: &Handle<U>) -> bool {
        self.key == other.key
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            id: self.id,
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.key)
            .field("id", &format_args!("0x{:x}", self.id))
            .finish()
    }
}

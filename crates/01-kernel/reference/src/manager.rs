use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::messaging::MessageFilter;
use crate::{
    is_internal_id, Clock, Handle, Message, RefId, Reference, ReferenceError, ReferenceKey,
    ReferenceResult, ReferenceState, SystemClock, Uid, INTERNAL_REF_THRESHOLD,
};

/// Tunables for a [`ReferenceManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// First id handed out by [`ReferenceManager::generate_internal_ref_id`].
    /// Clamped into the internal band.
    pub first_internal_id: RefId,
    /// Deliver (rather than drop) pending messages of a reference that is
    /// unregistered as part of its teardown.
    pub flush_on_dispose: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            first_internal_id: INTERNAL_REF_THRESHOLD,
            flush_on_dispose: false,
        }
    }
}

struct Entry {
    id: RefId,
    registered: bool,
    object: Rc<RefCell<dyn Reference>>,
    state: ReferenceState,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Registry, lifetime tracker and message bus for [`Reference`] objects.
///
/// One manager is created per application (or per world) and handed to
/// whatever drives the update loop; nothing here is global.
pub struct ReferenceManager {
    slots: Vec<Slot>,
    free: Vec<u32>,
    serialized: BTreeMap<RefId, ReferenceKey>,
    internal: BTreeMap<RefId, ReferenceKey>,
    pub(crate) groups: HashMap<Uid, BTreeSet<RefId>>,
    /// target id -> ids subscribed to it
    pub(crate) subscribers: HashMap<RefId, BTreeSet<RefId>>,
    /// subscriber id -> ids it listens to
    pub(crate) subscribed_to: HashMap<RefId, BTreeSet<RefId>>,
    pub(crate) queues: [VecDeque<Message>; 4],
    next_internal_id: RefId,
    internal_wrapped: bool,
    config: ManagerConfig,
    pub(crate) clock: Box<dyn Clock>,
}

impl ReferenceManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default(), SystemClock::new())
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self::with_config(ManagerConfig::default(), clock)
    }

    pub fn with_config(mut config: ManagerConfig, clock: impl Clock + 'static) -> Self {
        config.first_internal_id = config.first_internal_id.max(INTERNAL_REF_THRESHOLD);
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            serialized: BTreeMap::new(),
            internal: BTreeMap::new(),
            groups: HashMap::new(),
            subscribers: HashMap::new(),
            subscribed_to: HashMap::new(),
            queues: Default::default(),
            next_internal_id: config.first_internal_id,
            internal_wrapped: false,
            config,
            clock: Box::new(clock),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Current time of the manager's clock, in seconds.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    // ---------------------------------------------------------------------
    // Registry
    // ---------------------------------------------------------------------

    /// Takes ownership of `object`, tracks it under `id` and returns a typed
    /// handle to it.
    pub fn register<R: Reference>(&mut self, id: RefId, object: R) -> Handle<R> {
        let cell = Rc::new(RefCell::new(object));
        let key = self.register_shared(id, cell.clone());
        Handle::new(key, id, cell)
    }

    /// Tracks an object that is already shared behind a `RefCell`.
    pub fn register_shared(&mut self, id: RefId, object: Rc<RefCell<dyn Reference>>) -> ReferenceKey {
        let key = self.allocate(Entry {
            id,
            registered: true,
            object,
            state: ReferenceState::new(),
        });
        if id != 0 {
            if let Some(previous) = self.id_map_mut(id).insert(id, key) {
                warn!("reference id 0x{id:x} re-registered; {previous:?} is no longer reachable by id");
            }
        }
        trace!("registered reference 0x{id:x} as {key:?}");
        key
    }

    /// Removes `id` from the registry, every group and both subscriber tables.
    /// Messages pending for (or from) the id are delivered first when
    /// `flush_messages` is set, dropped otherwise.
    pub fn unregister_reference(&mut self, id: RefId, flush_messages: bool) -> bool {
        match self.get_reference(id) {
            Some(key) => self.unregister_key(key, flush_messages),
            None => false,
        }
    }

    fn unregister_key(&mut self, key: ReferenceKey, flush_messages: bool) -> bool {
        let id = match self.entry(key) {
            Some(entry) if entry.registered => entry.id,
            _ => return false,
        };

        if id != 0 {
            self.pump(MessageFilter::Involving(id), true, flush_messages);

            let map = self.id_map_mut(id);
            if map.get(&id) == Some(&key) {
                map.remove(&id);
            }
            for members in self.groups.values_mut() {
                members.remove(&id);
            }
            if let Some(targets) = self.subscribed_to.remove(&id) {
                for target in targets {
                    if let Some(subscribers) = self.subscribers.get_mut(&target) {
                        subscribers.remove(&id);
                    }
                }
            }
            if let Some(subscribers) = self.subscribers.remove(&id) {
                for subscriber in subscribers {
                    if let Some(targets) = self.subscribed_to.get_mut(&subscriber) {
                        targets.remove(&id);
                    }
                }
            }
        }

        if let Some(entry) = self.entry_mut(key) {
            entry.registered = false;
        }
        trace!("unregistered reference 0x{id:x}");
        true
    }

    /// Next process-local id. Strictly increasing until the band is
    /// exhausted, then wraps and skips ids that are still registered.
    pub fn generate_internal_ref_id(&mut self) -> RefId {
        loop {
            let id = self.next_internal_id;
            if id == RefId::MAX {
                self.next_internal_id = self.config.first_internal_id;
                self.internal_wrapped = true;
                debug!("internal reference id space wrapped");
            } else {
                self.next_internal_id = id + 1;
            }
            if !self.internal_wrapped || !self.internal.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn internal_ids_wrapped(&self) -> bool {
        self.internal_wrapped
    }

    pub fn get_reference(&self, id: RefId) -> Option<ReferenceKey> {
        if id == 0 {
            return None;
        }
        self.id_map(id).get(&id).copied()
    }

    /// True while `key` names a registered object. Stale keys (disposed or
    /// unregistered objects) are never valid, even when a handle still keeps
    /// the allocation alive.
    pub fn is_valid_reference(&self, key: ReferenceKey) -> bool {
        self.entry(key).is_some_and(|entry| entry.registered)
    }

    pub fn object(&self, key: ReferenceKey) -> Option<Rc<RefCell<dyn Reference>>> {
        self.entry(key).map(|entry| Rc::clone(&entry.object))
    }

    pub fn reference_id(&self, key: ReferenceKey) -> Option<RefId> {
        self.entry(key).map(|entry| entry.id)
    }

    pub fn is_internal_reference(&self, key: ReferenceKey) -> bool {
        self.reference_id(key).map_or(true, is_internal_id)
    }

    pub fn reference_type(&self, key: ReferenceKey) -> Option<Uid> {
        let object = self.object(key)?;
        let object = object.try_borrow().ok()?;
        Some(object.reference_type())
    }

    /// Capability query against a tracked object. False for stale keys and
    /// for objects currently mutably borrowed.
    pub fn query_reference_type(&self, key: ReferenceKey, type_id: &Uid) -> bool {
        let Some(object) = self.object(key) else {
            return false;
        };
        let result = match object.try_borrow() {
            Ok(object) => object.query_reference_type(type_id),
            Err(_) => false,
        };
        result
    }

    /// Runs `f` against the concrete type behind `key`.
    pub fn with_reference<T: Reference, R>(
        &self,
        key: ReferenceKey,
        f: impl FnOnce(&T) -> R,
    ) -> ReferenceResult<R> {
        let (id, object) = self.lookup(key)?;
        let object = object
            .try_borrow()
            .map_err(|_| ReferenceError::Busy { id })?;
        match object.as_any().downcast_ref::<T>() {
            Some(concrete) => Ok(f(concrete)),
            None => Err(ReferenceError::type_mismatch(
                id,
                object.reference_type(),
                std::any::type_name::<T>(),
            )),
        }
    }

    /// Mutable counterpart of [`Self::with_reference`].
    pub fn with_reference_mut<T: Reference, R>(
        &self,
        key: ReferenceKey,
        f: impl FnOnce(&mut T) -> R,
    ) -> ReferenceResult<R> {
        let (id, object) = self.lookup(key)?;
        let mut object = object
            .try_borrow_mut()
            .map_err(|_| ReferenceError::Busy { id })?;
        let found = object.reference_type();
        match object.as_any_mut().downcast_mut::<T>() {
            Some(concrete) => Ok(f(concrete)),
            None => Err(ReferenceError::type_mismatch(
                id,
                found,
                std::any::type_name::<T>(),
            )),
        }
    }

    fn lookup(&self, key: ReferenceKey) -> ReferenceResult<(RefId, Rc<RefCell<dyn Reference>>)> {
        self.entry(key)
            .map(|entry| (entry.id, Rc::clone(&entry.object)))
            .ok_or(ReferenceError::Stale(key))
    }

    /// Registered ids, internal band first, each band ascending.
    pub fn registered_ids(&self) -> Vec<RefId> {
        self.internal
            .keys()
            .chain(self.serialized.keys())
            .copied()
            .collect()
    }

    pub fn registered_count(&self) -> usize {
        self.internal.len() + self.serialized.len()
    }

    // ---------------------------------------------------------------------
    // Counting
    // ---------------------------------------------------------------------

    pub fn state(&self, key: ReferenceKey) -> Option<&ReferenceState> {
        self.entry(key).map(|entry| &entry.state)
    }

    pub fn reference_count(&self, key: ReferenceKey, live: bool) -> i32 {
        self.state(key).map_or(0, |state| {
            if live {
                state.live_count()
            } else {
                state.soft_count()
            }
        })
    }

    /// Restores a soft count read back from storage. Returns the count
    /// actually in effect, 0 when the key is stale.
    pub fn restore_soft_count(&mut self, key: ReferenceKey, soft: i32) -> i32 {
        self.entry_mut(key).map_or(0, |entry| {
            entry.state.restore_soft(soft);
            entry.state.soft_count()
        })
    }

    /// Objects holding `key`, with the number of references each holds.
    pub fn reference_holders(&self, key: ReferenceKey) -> Vec<(ReferenceKey, i32)> {
        let mut holders: Vec<_> = self
            .state(key)
            .map(|state| state.holders().collect())
            .unwrap_or_default();
        holders.sort_unstable();
        holders
    }

    /// Objects `key` holds references to.
    pub fn held_references(&self, key: ReferenceKey) -> Vec<(ReferenceKey, i32)> {
        self.state(key)
            .map(ReferenceState::held_snapshot)
            .unwrap_or_default()
    }

    pub fn is_disposed(&self, key: ReferenceKey) -> bool {
        self.state(key).map_or(true, ReferenceState::is_disposed)
    }

    pub fn is_disposing(&self, key: ReferenceKey) -> bool {
        self.state(key).is_some_and(ReferenceState::is_disposing)
    }

    /// Adds a reference to `target` on behalf of `holder` (`None` for an
    /// anonymous reference). Returns the target's live count, 0 when the
    /// target is unknown.
    pub fn add_reference(
        &mut self,
        target: ReferenceKey,
        holder: Option<ReferenceKey>,
        reconnecting: bool,
    ) -> i32 {
        if let Some(holder) = holder {
            if self.entry(holder).is_none() {
                warn!("add_reference: holder {holder:?} is not tracked");
                return self.reference_count(target, true);
            }
        }
        let Some(entry) = self.entry_mut(target) else {
            trace!("add_reference: {target:?} is not tracked");
            return 0;
        };
        let holder_refs = entry.state.acquire(holder, reconnecting);
        let live = entry.state.live_count();
        let object = Rc::clone(&entry.object);

        if let Some(holder) = holder {
            if let Some(holder_entry) = self.entry_mut(holder) {
                holder_entry.state.add_hold(target);
            }
        }
        notify(&object, |object| {
            object.on_reference_added(holder, holder_refs, reconnecting)
        });
        live
    }

    /// Drops a reference previously added by `holder`. Removing a reference
    /// the holder never added is a silent no-op. When the live count reaches
    /// zero the target is deleted and 0 is returned.
    pub fn remove_reference(
        &mut self,
        target: ReferenceKey,
        holder: Option<ReferenceKey>,
        disconnecting: bool,
    ) -> i32 {
        let Some(entry) = self.entry_mut(target) else {
            return 0;
        };
        let Some(remaining) = entry.state.release(holder, disconnecting) else {
            trace!("remove_reference: {holder:?} holds no reference on {target:?}");
            return entry.state.live_count();
        };
        let live = entry.state.live_count();
        let object = Rc::clone(&entry.object);

        if let Some(holder) = holder {
            if let Some(holder_entry) = self.entry_mut(holder) {
                holder_entry.state.remove_hold(target);
            }
        }
        notify(&object, |object| {
            object.on_reference_removed(holder, remaining, disconnecting)
        });

        if live == 0 {
            self.delete_reference(target);
            return 0;
        }
        live
    }

    /// Tears `target` down regardless of its counts. Runs the dispose hook,
    /// detaches it from its holders, soft-releases everything it still holds
    /// (skipping objects already being torn down) and unregisters it.
    /// Returns false when the target was already disposed or disposing.
    pub fn delete_reference(&mut self, target: ReferenceKey) -> bool {
        let Some(entry) = self.entry_mut(target) else {
            return false;
        };
        if !entry.state.begin_dispose() {
            return false;
        }
        let id = entry.id;
        let object = Rc::clone(&entry.object);
        debug!("deleting reference 0x{id:x} ({target:?})");

        match object.try_borrow_mut() {
            Ok(mut object) => object.dispose(target, self),
            Err(_) => warn!("reference 0x{id:x} is borrowed during teardown; dispose hook skipped"),
        }

        let holders = self
            .entry_mut(target)
            .map(|entry| entry.state.take_holders())
            .unwrap_or_default();
        for holder in holders {
            if let Some(holder_entry) = self.entry_mut(holder) {
                holder_entry.state.forget_hold(target);
            }
        }

        for (held, count) in self.held_references(target) {
            if self.is_disposing(held) {
                if let Some(entry) = self.entry_mut(target) {
                    entry.state.forget_hold(held);
                }
                continue;
            }
            for _ in 0..count {
                self.remove_reference(held, Some(target), true);
            }
        }

        let flush = self.config.flush_on_dispose;
        self.unregister_key(target, flush);
        if let Some(entry) = self.entry_mut(target) {
            entry.state.finish_dispose();
        }
        self.release_slot(target);
        true
    }

    /// Flushes (or drops) every pending message, then clears the registry,
    /// groups, subscriber tables and queues. Outstanding keys become stale.
    pub fn shutdown(&mut self, flush_messages: bool) {
        self.pump(MessageFilter::Any, true, flush_messages);
        self.serialized.clear();
        self.internal.clear();
        self.groups.clear();
        self.subscribers.clear();
        self.subscribed_to.clear();
        for queue in &mut self.queues {
            queue.clear();
        }
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        debug!("reference manager shut down");
    }

    // ---------------------------------------------------------------------
    // Arena
    // ---------------------------------------------------------------------

    fn allocate(&mut self, entry: Entry) -> ReferenceKey {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            ReferenceKey::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            ReferenceKey::new(index, 0)
        }
    }

    fn release_slot(&mut self, key: ReferenceKey) {
        let Some(slot) = self.slots.get_mut(key.index()) else {
            return;
        };
        if slot.generation != key.generation() || slot.entry.take().is_none() {
            return;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index() as u32);
    }

    fn entry(&self, key: ReferenceKey) -> Option<&Entry> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, key: ReferenceKey) -> Option<&mut Entry> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.entry.as_mut())
    }

    fn id_map(&self, id: RefId) -> &BTreeMap<RefId, ReferenceKey> {
        if id >= INTERNAL_REF_THRESHOLD {
            &self.internal
        } else {
            &self.serialized
        }
    }

    fn id_map_mut(&mut self, id: RefId) -> &mut BTreeMap<RefId, ReferenceKey> {
        if id >= INTERNAL_REF_THRESHOLD {
            &mut self.internal
        } else {
            &mut self.serialized
        }
    }
}

impl Default for ReferenceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(object: &Rc<RefCell<dyn Reference>>, f: impl FnOnce(&mut dyn Reference)) {
    match object.try_borrow_mut() {
        Ok(mut object) => f(&mut *object),
        Err(_) => trace!("reference hook skipped: object is borrowed"),
    }
}

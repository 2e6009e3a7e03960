//! The world context: database connection, transactions, id allocation, the
//! per-world type catalog and the component lifecycle protocol.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::{debug, error, trace, warn};
use reference::{
    is_internal_id, Handle, Message, RefId, Reference, ReferenceKey, ReferenceManager, Uid,
};
use rusqlite::{Connection, OpenFlags};
use world_query::{quote_literal, IntoParam, MemoryVfs, Value, WorldQuery};

use crate::catalog::{ElementAllocClone, ElementAllocNew, ObjectAllocClone, ObjectAllocNew};
use crate::component::adopt;
use crate::schema::{
    identifier_text, BASE_SCHEMA, INSERT_OBJECT_TYPE, INSERT_SUB_ELEMENT_TYPE, NEXT_REF_ID,
    SELECT_OBJECT_TYPES, SELECT_SUB_ELEMENT_TYPES, TABLE_EXISTS,
};
use crate::{
    CloneMethod, ComponentCore, ComponentCreated, ComponentLoading, ObjectRef, ObjectSubElement,
    Spawned, Storage, TypeCatalog, WorldConfig, WorldError, WorldObject, WorldResult,
    MGID_WORLD_COMPONENT, RTID_WORLD_OBJECT, WORLD_COMPONENT_CREATED, WORLD_COMPONENT_DELETED,
    WORLD_COMPONENT_LOADING, WORLD_COMPONENT_MODIFIED, WORLD_DISPOSING,
};

pub type ObjectHandle = Handle<dyn WorldObject>;
pub type ElementHandle = Handle<dyn ObjectSubElement>;
pub type NodeHandle = Handle<dyn Reference>;

const DEFAULT_TRANSACTION: &str = "WorldTransaction";
const EXECUTE_QUERY: &str = "executeQuery";
const CREATE_OBJECT: &str = "createObject";
const CREATE_SUB_ELEMENT: &str = "createObjectSubElement";

#[derive(Clone)]
enum ComponentSlot {
    Object(ObjectHandle),
    Element(ElementHandle),
}

/// Index entry for a live component. The table and flags are captured at
/// registration so bookkeeping never has to borrow the component.
struct IndexedComponent {
    slot: ComponentSlot,
    table: &'static str,
    serialize: bool,
}

/// Owns everything a running world needs: the reference manager, the
/// database connection and its cached queries, and this world's copy of the
/// type catalog.
pub struct World {
    id: RefId,
    manager: ReferenceManager,
    catalog: TypeCatalog,
    connection: Option<Rc<Connection>>,
    queries: HashMap<String, WorldQuery>,
    /// Types whose tables exist in the database.
    existing_tables: HashSet<Uid>,
    components: HashMap<ReferenceKey, IndexedComponent>,
    /// Open savepoints, innermost last.
    transactions: Vec<String>,
    config: WorldConfig,
    disposed: bool,
}

impl World {
    /// Creates (or re-initialises) a world database and writes the base schema.
    pub fn create(config: WorldConfig, catalog: &TypeCatalog) -> WorldResult<Self> {
        Self::create_with_manager(config, catalog, ReferenceManager::new())
    }

    pub fn create_with_manager(
        config: WorldConfig,
        catalog: &TypeCatalog,
        manager: ReferenceManager,
    ) -> WorldResult<Self> {
        let connection = connect(&config.storage, true)?;
        let mut world = Self::attach(config, catalog, manager, connection);
        world.execute_query(BASE_SCHEMA, true)?;
        world.load_type_tables()?;
        debug!("created world database ({:?})", world.config.storage);
        Ok(world)
    }

    /// Attaches to an existing world database.
    pub fn open(config: WorldConfig, catalog: &TypeCatalog) -> WorldResult<Self> {
        Self::open_with_manager(config, catalog, ReferenceManager::new())
    }

    pub fn open_with_manager(
        config: WorldConfig,
        catalog: &TypeCatalog,
        manager: ReferenceManager,
    ) -> WorldResult<Self> {
        let connection = connect(&config.storage, false)?;
        let mut world = Self::attach(config, catalog, manager, connection);
        if !world.table_exists("Configuration")? {
            return Err(WorldError::corrupt("no 'Configuration' table"));
        }
        world.load_type_tables()?;
        debug!("opened world database ({:?})", world.config.storage);
        Ok(world)
    }

    fn attach(
        config: WorldConfig,
        catalog: &TypeCatalog,
        mut manager: ReferenceManager,
        connection: Connection,
    ) -> Self {
        connection.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
        let mut catalog = catalog.clone();
        catalog.clear_local_ids();
        Self {
            id: manager.generate_internal_ref_id(),
            manager,
            catalog,
            connection: Some(Rc::new(connection)),
            queries: HashMap::new(),
            existing_tables: HashSet::from([RTID_WORLD_OBJECT]),
            components: HashMap::new(),
            transactions: Vec::new(),
            config,
            disposed: false,
        }
    }

    /// Internal id the world sends its own messages from.
    pub fn id(&self) -> RefId {
        self.id
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn manager(&self) -> &ReferenceManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ReferenceManager {
        &mut self.manager
    }

    /// This world's catalog, with database-local identifiers filled in.
    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn connection(&self) -> WorldResult<Rc<Connection>> {
        self.connection.clone().ok_or(WorldError::NoDatabase)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> WorldResult<()> {
        if self.disposed {
            Err(WorldError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Delivers delayed messages that are due.
    pub fn process_messages(&mut self) -> usize {
        self.manager.process_messages()
    }

    // ---------------------------------------------------------------------
    // Queries and transactions
    // ---------------------------------------------------------------------

    /// Returns the prepared query for `sql`, rewound and ready to bind.
    pub fn cached_query(&mut self, sql: &str) -> WorldResult<&mut WorldQuery> {
        let connection = self.connection()?;
        let verbose = self.config.verbose_queries;
        let query = self.queries.entry(sql.to_owned()).or_default();
        if !query.is_prepared() {
            query.prepare(&connection, sql, verbose)?;
        }
        query.reset();
        Ok(query)
    }

    /// Runs a single-statement write through the query cache.
    pub fn execute_cached(&mut self, sql: &str, action: &str, params: Vec<Value>) -> WorldResult<()> {
        let query = self.cached_query(sql)?;
        for (index, value) in params.into_iter().enumerate() {
            query.bind_parameter(index + 1, value)?;
        }
        query
            .step_reset(true)
            .map_err(|err| WorldError::persist(action, err))
    }

    /// Runs a select and reads every returned row.
    pub fn select_rows<R>(
        &mut self,
        sql: &str,
        params: Vec<Value>,
        mut read: impl FnMut(&WorldQuery) -> R,
    ) -> WorldResult<Vec<R>> {
        let query = self.cached_query(sql)?;
        for (index, value) in params.into_iter().enumerate() {
            query.bind_parameter(index + 1, value)?;
        }
        if let Err(err) = query.step() {
            query.reset_with(false);
            return Err(err.into());
        }
        let mut rows = Vec::new();
        while query.next_row() {
            rows.push(read(query));
        }
        query.reset();
        Ok(rows)
    }

    pub fn select_row<R>(
        &mut self,
        sql: &str,
        params: Vec<Value>,
        read: impl FnOnce(&WorldQuery) -> R,
    ) -> WorldResult<Option<R>> {
        let mut read = Some(read);
        let rows = self.select_rows(sql, params, |query| read.take().map(|read| read(query)))?;
        Ok(rows.into_iter().next().flatten())
    }

    /// Executes a script of one or more statements, optionally inside a
    /// savepoint that is rolled back when any statement fails.
    pub fn execute_query(&mut self, statements: &str, as_one_transaction: bool) -> WorldResult<()> {
        let connection = self.connection()?;
        if as_one_transaction {
            self.begin_transaction(Some(EXECUTE_QUERY))?;
        }
        if self.config.verbose_queries {
            debug!("executing script: {statements}");
        }
        let result = connection.execute_batch(statements);
        match result {
            Ok(()) => {
                if as_one_transaction {
                    self.commit_transaction(Some(EXECUTE_QUERY))?;
                }
                Ok(())
            }
            Err(err) => {
                error!("world query failed: {err}");
                if as_one_transaction {
                    self.rollback_quietly(EXECUTE_QUERY);
                }
                Err(err.into())
            }
        }
    }

    /// Opens a savepoint. Savepoints nest.
    pub fn begin_transaction(&mut self, name: Option<&str>) -> WorldResult<()> {
        let name = name.unwrap_or(DEFAULT_TRANSACTION);
        self.connection()?
            .execute_batch(&format!("SAVEPOINT {}", quote_literal(name)))?;
        trace!("savepoint {name} opened");
        self.transactions.push(name.to_owned());
        Ok(())
    }

    pub fn commit_transaction(&mut self, name: Option<&str>) -> WorldResult<()> {
        let name = name.unwrap_or(DEFAULT_TRANSACTION);
        self.connection()?
            .execute_batch(&format!("RELEASE SAVEPOINT {}", quote_literal(name)))?;
        trace!("savepoint {name} released");
        self.forget_transaction(name);
        Ok(())
    }

    /// Undoes everything since the savepoint. With `restart` the savepoint
    /// stays open for another attempt.
    pub fn rollback_transaction(&mut self, name: Option<&str>, restart: bool) -> WorldResult<()> {
        let name = name.unwrap_or(DEFAULT_TRANSACTION);
        let connection = self.connection()?;
        connection.execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_literal(name)))?;
        trace!("savepoint {name} rolled back");
        if !restart {
            connection.execute_batch(&format!("RELEASE SAVEPOINT {}", quote_literal(name)))?;
            self.forget_transaction(name);
        }
        Ok(())
    }

    pub fn open_transactions(&self) -> usize {
        self.transactions.len()
    }

    fn forget_transaction(&mut self, name: &str) {
        if let Some(at) = self.transactions.iter().rposition(|open| open == name) {
            self.transactions.truncate(at);
        }
    }

    fn rollback_quietly(&mut self, name: &str) {
        if let Err(err) = self.rollback_transaction(Some(name), false) {
            error!("failed to roll back savepoint {name}: {err}");
        }
    }

    /// Commits or rolls back a savepoint opened with `opened`, following
    /// `result`.
    pub fn settle_transaction<T>(
        &mut self,
        name: &str,
        opened: bool,
        result: &WorldResult<T>,
    ) -> WorldResult<()> {
        if !opened {
            return Ok(());
        }
        match result {
            Ok(_) => self.commit_transaction(Some(name)),
            Err(_) => {
                self.rollback_quietly(name);
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Identifiers and type tables
    // ---------------------------------------------------------------------

    /// Allocates a reference id. Persisted ids come from the database's
    /// `Configuration` row; internal ids (or every id, outside the sandbox)
    /// come from the reference manager.
    pub fn generate_ref_id(&mut self, internal: bool) -> WorldResult<RefId> {
        self.ensure_live()?;
        if internal || !self.config.sandbox {
            return Ok(self.manager.generate_internal_ref_id());
        }
        let query = self.cached_query(NEXT_REF_ID)?;
        if let Err(err) = query.step() {
            query.reset_with(false);
            return Err(err.into());
        }
        let next = if query.next_row() {
            query.column::<u32>("NextRefId")
        } else {
            None
        };
        let Some(id) = next.filter(|id| !is_internal_id(*id)) else {
            query.reset();
            return Err(WorldError::corrupt(
                "Configuration.NextRefId is missing or outside the persisted id range",
            ));
        };
        let advanced = query.step();
        query.reset_with(false);
        advanced.map_err(|err| WorldError::persist("advance NextRefId", err))?;
        trace!("allocated persisted reference id 0x{id:x}");
        Ok(id)
    }

    pub fn table_exists(&mut self, name: &str) -> WorldResult<bool> {
        let found = self.select_row(TABLE_EXISTS, vec![name.into_param()], |_| ())?;
        Ok(found.is_some())
    }

    pub fn component_tables_exist(&self, type_id: &Uid) -> bool {
        self.existing_tables.contains(type_id)
    }

    pub fn component_tables_created(&mut self, type_id: Uid) {
        self.existing_tables.insert(type_id);
    }

    /// Runs a type's table schema the first time the type is stored.
    pub(crate) fn create_component_tables(&mut self, type_id: Uid, schema: &str) -> WorldResult<()> {
        if self.component_tables_exist(&type_id) {
            return Ok(());
        }
        if !schema.trim().is_empty() {
            self.execute_query(schema, true)?;
        }
        debug!("created tables for component type {type_id}");
        self.component_tables_created(type_id);
        Ok(())
    }

    /// Records an object type in `ObjectTypes`, returning its local id.
    pub fn insert_object_type(&mut self, type_id: &Uid, table: &str) -> WorldResult<u32> {
        let desc = self
            .catalog
            .object_type(type_id)
            .ok_or(WorldError::UnknownType(*type_id))?;
        if desc.local_identifier > 0 {
            return Ok(desc.local_identifier);
        }
        let name = desc.name.clone();
        let local_id = self.insert_type_row(INSERT_OBJECT_TYPE, type_id, &name, table)?;
        self.catalog.set_object_local_id(type_id, local_id);
        Ok(local_id)
    }

    pub fn insert_sub_element_type(&mut self, type_id: &Uid, table: &str) -> WorldResult<u32> {
        let desc = self
            .catalog
            .sub_element_type(type_id)
            .ok_or(WorldError::UnknownType(*type_id))?;
        if desc.local_identifier > 0 {
            return Ok(desc.local_identifier);
        }
        let name = desc.name.clone();
        let local_id = self.insert_type_row(INSERT_SUB_ELEMENT_TYPE, type_id, &name, table)?;
        self.catalog.set_sub_element_local_id(type_id, local_id);
        Ok(local_id)
    }

    fn insert_type_row(&mut self, sql: &str, type_id: &Uid, name: &str, table: &str) -> WorldResult<u32> {
        let query = self.cached_query(sql)?;
        query.bind_parameter(1, identifier_text(type_id))?;
        query.bind_parameter(2, name)?;
        query.bind_parameter(3, table)?;
        query
            .step_reset(true)
            .map_err(|err| WorldError::persist(format!("record type {name}"), err))?;
        let local_id = query.last_insert_id();
        u32::try_from(local_id)
            .map_err(|_| WorldError::corrupt(format!("type row id {local_id} out of range")))
    }

    fn load_type_tables(&mut self) -> WorldResult<()> {
        self.catalog.clear_local_ids();
        for (local_id, identifier) in self.select_rows(SELECT_OBJECT_TYPES, Vec::new(), read_type_row)? {
            let known = Uid::parse_str(&identifier)
                .ok()
                .filter(|type_id| self.catalog.set_object_local_id(type_id, local_id));
            match known {
                Some(type_id) => self.component_tables_created(type_id),
                None => warn!("ignoring unknown object type {identifier} stored in the world database"),
            }
        }
        for (local_id, identifier) in self.select_rows(SELECT_SUB_ELEMENT_TYPES, Vec::new(), read_type_row)? {
            let known = Uid::parse_str(&identifier)
                .ok()
                .filter(|type_id| self.catalog.set_sub_element_local_id(type_id, local_id));
            match known {
                Some(type_id) => self.component_tables_created(type_id),
                None => warn!("ignoring unknown sub-element type {identifier} stored in the world database"),
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Objects
    // ---------------------------------------------------------------------

    /// Builds a new object of a registered type. Serialized objects are
    /// written inside one savepoint; any failure rolls it back and discards
    /// the half-built object.
    pub fn create_object(&mut self, internal: bool, type_id: Uid) -> WorldResult<ObjectHandle> {
        self.spawn_object(internal, type_id, None)
    }

    /// Builds a new object initialised from `init`, copying its sub-elements.
    pub fn create_object_from(
        &mut self,
        internal: bool,
        type_id: Uid,
        method: CloneMethod,
        init: &dyn WorldObject,
    ) -> WorldResult<ObjectHandle> {
        self.spawn_object(internal, type_id, Some((method, init)))
    }

    /// Clones `object` through the allocator registered for its own type.
    pub fn clone_object(
        &mut self,
        object: &ObjectHandle,
        method: CloneMethod,
        internal: bool,
    ) -> WorldResult<ObjectHandle> {
        let source = object.borrow();
        let type_id = source.reference_type();
        self.create_object_from(internal, type_id, method, &*source)
    }

    fn spawn_object(
        &mut self,
        internal: bool,
        type_id: Uid,
        init: Option<(CloneMethod, &dyn WorldObject)>,
    ) -> WorldResult<ObjectHandle> {
        self.ensure_live()?;
        let internal = internal || !self.config.sandbox;
        let desc = self
            .catalog
            .object_type(&type_id)
            .ok_or(WorldError::UnknownType(type_id))?;
        let allocators = (desc.alloc_new, desc.alloc_clone);

        if !internal {
            self.begin_transaction(Some(CREATE_OBJECT))?;
        }
        let mut created = None;
        let result = self.build_object(internal, type_id, allocators, init, &mut created);
        let settled = self.settle_transaction(CREATE_OBJECT, !internal, &result);
        let result = settled.and(result);
        if let Err(err) = &result {
            warn!("failed to create object of type {type_id}: {err}");
            if let Some(key) = created {
                self.discard_component(key);
            }
        }
        result
    }

    fn build_object(
        &mut self,
        internal: bool,
        type_id: Uid,
        (alloc_new, alloc_clone): (ObjectAllocNew, ObjectAllocClone),
        init: Option<(CloneMethod, &dyn WorldObject)>,
        created: &mut Option<ReferenceKey>,
    ) -> WorldResult<ObjectHandle> {
        let ref_id = self.generate_ref_id(internal)?;
        let method = init.map_or(CloneMethod::None, |(method, _)| method);
        let spawned = match init {
            Some((method, source)) => alloc_clone(type_id, ref_id, source, method),
            None => alloc_new(type_id, ref_id),
        }
        .ok_or(WorldError::Allocation(type_id))?;
        let handle = self.adopt_object(ref_id, spawned);
        *created = Some(handle.key());

        let local_type_id = if handle.borrow().should_serialize() {
            let (schema, table) = {
                let object = handle.borrow();
                (object.type_table_schema(), object.database_table())
            };
            self.create_component_tables(type_id, schema)?;
            self.insert_object_type(&type_id, table)?
        } else {
            0
        };
        handle.borrow_mut().core_mut().set_local_type_id(local_type_id);

        let event = ComponentCreated {
            local_type_id,
            method,
        };
        handle.borrow_mut().on_component_created(self, &event)?;

        if let Some((_, source)) = init {
            for element in source.object().all_sub_elements() {
                handle.borrow_mut().clone_sub_element(self, &element)?;
            }
        }
        debug!("created object 0x{ref_id:x} of type {type_id}");
        Ok(handle)
    }

    /// Returns the object stored under `ref_id`, loading it when it is not
    /// resident. Clone methods other than `None`/`ObjectInstance` produce an
    /// internal copy instead.
    pub fn load_object(
        &mut self,
        type_id: Uid,
        ref_id: RefId,
        method: CloneMethod,
    ) -> WorldResult<ObjectHandle> {
        self.ensure_live()?;
        if let Some(key) = self.manager.get_reference(ref_id) {
            let resident = match self.components.get(&key) {
                Some(IndexedComponent {
                    slot: ComponentSlot::Object(handle),
                    ..
                }) if self.manager.query_reference_type(key, &type_id) => handle.clone(),
                _ => {
                    return Err(WorldError::TypeConflict {
                        id: ref_id,
                        expected: type_id,
                    })
                }
            };
            if method.reuses_instance() {
                return Ok(resident);
            }
            let source = resident.borrow();
            return self.create_object_from(true, type_id, method, &*source);
        }

        let desc = self
            .catalog
            .object_type(&type_id)
            .ok_or(WorldError::UnknownType(type_id))?;
        let (alloc_new, local_type_id) = (desc.alloc_new, desc.local_identifier);
        let final_id = if method.reuses_instance() {
            ref_id
        } else {
            self.generate_ref_id(true)?
        };
        let spawned = alloc_new(type_id, final_id).ok_or(WorldError::Allocation(type_id))?;
        let handle = self.adopt_object(final_id, spawned);
        handle.borrow_mut().core_mut().set_local_type_id(local_type_id);

        let event = ComponentLoading {
            source_ref_id: ref_id,
            local_type_id,
            method,
        };
        let loaded = handle.borrow_mut().on_component_loading(self, &event);
        if let Err(err) = loaded {
            warn!("failed to load object 0x{ref_id:x}: {err}");
            self.discard_component(handle.key());
            return Err(err);
        }
        debug!("loaded object 0x{ref_id:x} as 0x{final_id:x}");
        Ok(handle)
    }

    fn adopt_object(&mut self, ref_id: RefId, spawned: Spawned<dyn WorldObject>) -> ObjectHandle {
        let handle = adopt(self, ref_id, spawned);
        let (table, serialize) = {
            let object = handle.borrow();
            (object.database_table(), object.should_serialize())
        };
        self.components.insert(
            handle.key(),
            IndexedComponent {
                slot: ComponentSlot::Object(handle.clone()),
                table,
                serialize,
            },
        );
        handle
    }

    // ---------------------------------------------------------------------
    // Sub-elements
    // ---------------------------------------------------------------------

    /// Builds a sub-element for `parent`. The caller links it to the object.
    pub fn create_sub_element(
        &mut self,
        internal: bool,
        type_id: Uid,
        parent: ObjectRef,
    ) -> WorldResult<ElementHandle> {
        self.spawn_sub_element(internal, type_id, parent, None)
    }

    pub fn create_sub_element_from(
        &mut self,
        internal: bool,
        type_id: Uid,
        parent: ObjectRef,
        init: &dyn ObjectSubElement,
    ) -> WorldResult<ElementHandle> {
        self.spawn_sub_element(internal, type_id, parent, Some(init))
    }

    fn spawn_sub_element(
        &mut self,
        internal: bool,
        type_id: Uid,
        parent: ObjectRef,
        init: Option<&dyn ObjectSubElement>,
    ) -> WorldResult<ElementHandle> {
        self.ensure_live()?;
        let internal = internal || !self.config.sandbox;
        let desc = self
            .catalog
            .sub_element_type(&type_id)
            .ok_or(WorldError::UnknownType(type_id))?;
        let allocators = (desc.alloc_new, desc.alloc_clone);

        if !internal {
            self.begin_transaction(Some(CREATE_SUB_ELEMENT))?;
        }
        let mut created = None;
        let result = self.build_sub_element(internal, type_id, parent, allocators, init, &mut created);
        let settled = self.settle_transaction(CREATE_SUB_ELEMENT, !internal, &result);
        let result = settled.and(result);
        if let Err(err) = &result {
            warn!("failed to create sub-element of type {type_id}: {err}");
            if let Some(key) = created {
                self.discard_component(key);
            }
        }
        result
    }

    fn build_sub_element(
        &mut self,
        internal: bool,
        type_id: Uid,
        parent: ObjectRef,
        (alloc_new, alloc_clone): (ElementAllocNew, ElementAllocClone),
        init: Option<&dyn ObjectSubElement>,
        created: &mut Option<ReferenceKey>,
    ) -> WorldResult<ElementHandle> {
        let ref_id = self.generate_ref_id(internal)?;
        let spawned = match init {
            Some(source) => alloc_clone(type_id, ref_id, parent, source),
            None => alloc_new(type_id, ref_id, parent),
        }
        .ok_or(WorldError::Allocation(type_id))?;
        let handle = self.adopt_element(ref_id, spawned);
        *created = Some(handle.key());

        let local_type_id = if handle.borrow().should_serialize() {
            let (schema, table) = {
                let element = handle.borrow();
                (element.type_table_schema(), element.database_table())
            };
            self.create_component_tables(type_id, schema)?;
            self.insert_sub_element_type(&type_id, table)?
        } else {
            0
        };
        handle.borrow_mut().core_mut().set_local_type_id(local_type_id);

        let event = ComponentCreated {
            local_type_id,
            method: if init.is_some() {
                CloneMethod::Copy
            } else {
                CloneMethod::None
            },
        };
        handle.borrow_mut().on_component_created(self, &event)?;
        debug!("created sub-element 0x{ref_id:x} of type {type_id}");
        Ok(handle)
    }

    /// Sub-element counterpart of [`World::load_object`].
    pub fn load_sub_element(
        &mut self,
        type_id: Uid,
        ref_id: RefId,
        parent: ObjectRef,
        method: CloneMethod,
    ) -> WorldResult<ElementHandle> {
        self.ensure_live()?;
        if let Some(key) = self.manager.get_reference(ref_id) {
            let resident = match self.components.get(&key) {
                Some(IndexedComponent {
                    slot: ComponentSlot::Element(handle),
                    ..
                }) if self.manager.query_reference_type(key, &type_id) => handle.clone(),
                _ => {
                    return Err(WorldError::TypeConflict {
                        id: ref_id,
                        expected: type_id,
                    })
                }
            };
            if method.reuses_instance() {
                return Ok(resident);
            }
            let source = resident.borrow();
            return self.create_sub_element_from(true, type_id, parent, &*source);
        }

        let desc = self
            .catalog
            .sub_element_type(&type_id)
            .ok_or(WorldError::UnknownType(type_id))?;
        let (alloc_new, local_type_id) = (desc.alloc_new, desc.local_identifier);
        let final_id = if method.reuses_instance() {
            ref_id
        } else {
            self.generate_ref_id(true)?
        };
        let spawned =
            alloc_new(type_id, final_id, parent).ok_or(WorldError::Allocation(type_id))?;
        let handle = self.adopt_element(final_id, spawned);
        handle.borrow_mut().core_mut().set_local_type_id(local_type_id);

        let event = ComponentLoading {
            source_ref_id: ref_id,
            local_type_id,
            method,
        };
        let loaded = handle.borrow_mut().on_component_loading(self, &event);
        if let Err(err) = loaded {
            warn!("failed to load sub-element 0x{ref_id:x}: {err}");
            self.discard_component(handle.key());
            return Err(err);
        }
        Ok(handle)
    }

    fn adopt_element(&mut self, ref_id: RefId, spawned: Spawned<dyn ObjectSubElement>) -> ElementHandle {
        let handle = adopt(self, ref_id, spawned);
        let (table, serialize) = {
            let element = handle.borrow();
            (element.database_table(), element.should_serialize())
        };
        self.components.insert(
            handle.key(),
            IndexedComponent {
                slot: ComponentSlot::Element(handle.clone()),
                table,
                serialize,
            },
        );
        handle
    }

    // ---------------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------------

    /// Creates a node placing `object` through the type's node allocator.
    /// The node holds a reference on the object and subscribes to it.
    pub fn create_object_node(
        &mut self,
        internal: bool,
        type_id: Uid,
        object: &ObjectHandle,
    ) -> WorldResult<NodeHandle> {
        self.ensure_live()?;
        let alloc = self
            .catalog
            .object_type(&type_id)
            .ok_or(WorldError::UnknownType(type_id))?
            .node_alloc_new
            .ok_or(WorldError::Allocation(type_id))?;
        let ref_id = self.generate_ref_id(internal)?;
        let node = alloc(type_id, ref_id, object).ok_or(WorldError::Allocation(type_id))?;
        Ok(self.adopt_node(ref_id, node, object))
    }

    pub fn clone_object_node(
        &mut self,
        internal: bool,
        type_id: Uid,
        object: &ObjectHandle,
        init: &NodeHandle,
    ) -> WorldResult<NodeHandle> {
        self.ensure_live()?;
        let alloc = self
            .catalog
            .object_type(&type_id)
            .ok_or(WorldError::UnknownType(type_id))?
            .node_alloc_clone
            .ok_or(WorldError::Allocation(type_id))?;
        let ref_id = self.generate_ref_id(internal)?;
        let node = {
            let source = init.borrow();
            alloc(type_id, ref_id, object, &*source)
        }
        .ok_or(WorldError::Allocation(type_id))?;
        Ok(self.adopt_node(ref_id, node, object))
    }

    fn adopt_node(
        &mut self,
        ref_id: RefId,
        node: Rc<RefCell<dyn Reference>>,
        object: &ObjectHandle,
    ) -> NodeHandle {
        let key = self.manager.register_shared(ref_id, Rc::clone(&node));
        self.add_reference(object.key(), Some(key), is_internal_id(ref_id));
        self.manager.subscribe_to_reference(ref_id, object.id());
        Handle::new(key, ref_id, node)
    }

    /// Releases everything the node holds and tears it down.
    pub fn delete_object_node(&mut self, node: ReferenceKey) -> bool {
        let disconnecting = self.manager.is_internal_reference(node);
        for (held, count) in self.manager.held_references(node) {
            for _ in 0..count {
                self.remove_reference(held, Some(node), disconnecting);
            }
        }
        self.delete_component(node)
    }

    // ---------------------------------------------------------------------
    // Component bookkeeping
    // ---------------------------------------------------------------------

    pub fn object(&self, ref_id: RefId) -> Option<ObjectHandle> {
        let key = self.manager.get_reference(ref_id)?;
        match &self.components.get(&key)?.slot {
            ComponentSlot::Object(handle) => Some(handle.clone()),
            ComponentSlot::Element(_) => None,
        }
    }

    pub fn sub_element(&self, ref_id: RefId) -> Option<ElementHandle> {
        let key = self.manager.get_reference(ref_id)?;
        match &self.components.get(&key)?.slot {
            ComponentSlot::Element(handle) => Some(handle.clone()),
            ComponentSlot::Object(_) => None,
        }
    }

    /// Resident objects, ordered by id.
    pub fn objects(&self) -> Vec<ObjectHandle> {
        let mut objects: Vec<_> = self
            .components
            .iter()
            .filter(|(key, _)| self.manager.is_valid_reference(**key))
            .filter_map(|(_, entry)| match &entry.slot {
                ComponentSlot::Object(handle) => Some(handle.clone()),
                ComponentSlot::Element(_) => None,
            })
            .collect();
        objects.sort_by_key(|handle| handle.id());
        objects
    }

    /// Number of resident objects and sub-elements.
    pub fn component_count(&self) -> usize {
        self.components
            .keys()
            .filter(|key| self.manager.is_valid_reference(**key))
            .count()
    }

    /// Adds a reference to a component. A full (non-reconnecting) reference
    /// is written to the component's `RefCount` column.
    pub fn add_reference(
        &mut self,
        target: ReferenceKey,
        holder: Option<ReferenceKey>,
        reconnecting: bool,
    ) -> i32 {
        let live = self.manager.add_reference(target, holder, reconnecting);
        if !reconnecting {
            self.persist_ref_count(target);
        }
        live
    }

    /// Removes a reference. Dropping the last database reference removes
    /// the component's rows before the kernel releases it.
    pub fn remove_reference(
        &mut self,
        target: ReferenceKey,
        holder: Option<ReferenceKey>,
        disconnecting: bool,
    ) -> i32 {
        let soft_after = self.soft_count_after_release(target, holder);
        let stored = if disconnecting { None } else { self.stored_row(target) };
        if !disconnecting && soft_after == Some(0) {
            self.component_rows_deleted(target);
        }
        let live = self.manager.remove_reference(target, holder, disconnecting);
        // The target may already be gone, so write through the row resolved above.
        if let (Some((table, ref_id)), Some(soft)) = (stored, soft_after) {
            if soft > 0 {
                self.write_ref_count(table, ref_id, soft);
            }
        }
        if live == 0 {
            self.sweep_components();
        }
        live
    }

    /// Forced teardown of any tracked reference.
    pub fn delete_component(&mut self, key: ReferenceKey) -> bool {
        let deleted = self.manager.delete_reference(key);
        self.sweep_components();
        deleted
    }

    fn discard_component(&mut self, key: ReferenceKey) {
        self.components.remove(&key);
        self.delete_component(key);
    }

    /// Soft count a full release by `holder` would leave, or `None` when
    /// `holder` has nothing to release.
    fn soft_count_after_release(&self, target: ReferenceKey, holder: Option<ReferenceKey>) -> Option<i32> {
        let state = self.manager.state(target)?;
        let holds = match holder {
            Some(holder) => state.holder_count(holder) > 0,
            None => state.anonymous_count() > 0,
        };
        holds.then(|| state.soft_count() - 1)
    }

    fn component_rows_deleted(&mut self, key: ReferenceKey) {
        let Some(entry) = self.components.get(&key) else {
            return;
        };
        if !entry.serialize {
            return;
        }
        match entry.slot.clone() {
            ComponentSlot::Object(handle) => match handle.try_borrow_mut() {
                Some(mut object) => object.on_component_deleted(self),
                None => warn!("object 0x{:x} is busy; its rows were not deleted", handle.id()),
            },
            ComponentSlot::Element(handle) => match handle.try_borrow_mut() {
                Some(mut element) => element.on_component_deleted(self),
                None => warn!("sub-element 0x{:x} is busy; its rows were not deleted", handle.id()),
            },
        }
    }

    fn persist_ref_count(&mut self, key: ReferenceKey) {
        if let Some((table, ref_id)) = self.stored_row(key) {
            let soft = self.manager.reference_count(key, false);
            self.write_ref_count(table, ref_id, soft);
        }
    }

    /// Table and row of a serialized component.
    fn stored_row(&self, key: ReferenceKey) -> Option<(&'static str, RefId)> {
        let entry = self.components.get(&key)?;
        if !entry.serialize {
            return None;
        }
        Some((entry.table, self.manager.reference_id(key)?))
    }

    fn write_ref_count(&mut self, table: &str, ref_id: RefId, soft: i32) {
        let sql = format!("UPDATE {} SET RefCount=?1 WHERE RefId=?2", quote_literal(table));
        if let Err(err) = self.execute_cached(
            &sql,
            "update reference count",
            vec![soft.into_param(), ref_id.into_param()],
        ) {
            error!("component 0x{ref_id:x}: {err}");
        }
    }

    fn sweep_components(&mut self) {
        let manager = &self.manager;
        self.components
            .retain(|key, _| manager.is_valid_reference(*key));
    }

    // ---------------------------------------------------------------------
    // Shared component behaviour
    // ---------------------------------------------------------------------

    /// Sends [`WORLD_COMPONENT_MODIFIED`] to the component's subscribers and
    /// to the component group.
    pub fn notify_component_modified(&mut self, ref_id: RefId, context: &str) {
        let message = Message::new(WORLD_COMPONENT_MODIFIED).with_context(context);
        self.manager
            .send_message_to_subscribers(ref_id, message.clone(), 0.0);
        self.manager
            .send_message_to_group(ref_id, MGID_WORLD_COMPONENT, message, 0.0);
    }

    /// Final step of every `on_component_created`.
    pub fn component_created(&mut self, core: &ComponentCore, event: &ComponentCreated) {
        let message = Message::new(WORLD_COMPONENT_CREATED).with_shared(*event);
        self.manager
            .send_message_to_group(core.ref_id(), MGID_WORLD_COMPONENT, message, 0.0);
    }

    /// Final step of every `on_component_loading`: adopts the stored
    /// reference count unless the load produced a clone.
    pub fn component_loading(
        &mut self,
        core: &ComponentCore,
        table: &str,
        event: &ComponentLoading,
    ) -> WorldResult<()> {
        if core.ref_id() == event.source_ref_id && core.should_serialize() {
            let sql = format!("SELECT RefCount FROM {} WHERE RefId=?1", quote_literal(table));
            let count = self
                .select_row(&sql, vec![core.ref_id().into_param()], |query| {
                    query.column::<i32>("RefCount")
                })?
                .flatten()
                .ok_or(WorldError::MissingRow(core.ref_id()))?;
            let key = core.require_key()?;
            self.manager.restore_soft_count(key, count);
        }
        let message = Message::new(WORLD_COMPONENT_LOADING).with_shared(*event);
        self.manager
            .send_message_to_group(core.ref_id(), MGID_WORLD_COMPONENT, message, 0.0);
        Ok(())
    }

    /// Final step of every `on_component_deleted`: removes the row from the
    /// type table.
    pub fn component_deleted(&mut self, core: &ComponentCore, table: &str) {
        if core.should_serialize() {
            let sql = format!("DELETE FROM {} WHERE RefId=?1", quote_literal(table));
            if let Err(err) = self.execute_cached(&sql, "delete component row", vec![core.ref_id().into_param()]) {
                error!("component 0x{:x}: {err}", core.ref_id());
            }
        }
        self.manager.send_message_to_group(
            core.ref_id(),
            MGID_WORLD_COMPONENT,
            Message::new(WORLD_COMPONENT_DELETED),
            0.0,
        );
    }

    // ---------------------------------------------------------------------
    // Teardown
    // ---------------------------------------------------------------------

    /// Announces [`WORLD_DISPOSING`], releases cached queries and shuts the
    /// reference manager down. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.manager
            .send_message_to_all(self.id, Message::new(WORLD_DISPOSING), 0.0);
        self.disposed = true;

        if !self.transactions.is_empty() {
            warn!("disposing world with {} open savepoint(s)", self.transactions.len());
            self.transactions.clear();
        }
        for query in self.queries.values_mut() {
            query.unprepare();
        }
        self.queries.clear();
        self.components.clear();
        let flush = self.manager.config().flush_on_dispose;
        self.manager.shutdown(flush);
        self.connection = None;
        debug!("world disposed");
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn read_type_row(query: &WorldQuery) -> (u32, String) {
    (
        query.column("LocalId").unwrap_or(0),
        query.column("Identifier").unwrap_or_default(),
    )
}

fn connect(storage: &Storage, create: bool) -> WorldResult<Connection> {
    match storage {
        Storage::File { path } => {
            let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            if create {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
            Ok(Connection::open_with_flags(path, flags)?)
        }
        Storage::Memory { vfs, name } => {
            let vfs = MemoryVfs::register(vfs)?;
            Ok(vfs.open_connection(name, create)?)
        }
        Storage::Transient if create => Ok(Connection::open_in_memory()?),
        Storage::Transient => Err(WorldError::config("a transient world cannot be reopened")),
    }
}

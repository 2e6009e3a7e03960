//! Statement batches, parameter binding and result walking against a live
//! SQLite connection.

use std::rc::Rc;

use reference::Uid;
use world_query::{Connection, QueryError, WorldQuery};

fn database() -> Rc<Connection> {
    let _ = env_logger::builder().is_test(true).try_init();
    let connection = Connection::open_in_memory().expect("open in-memory database");
    connection
        .execute_batch(
            "CREATE TABLE Objects(RefId INTEGER PRIMARY KEY, TypeId BLOB, Mass REAL, Flag INTEGER, Name TEXT);",
        )
        .expect("create table");
    Rc::new(connection)
}

/// An insert bound with valid parameters steps and yields a fresh row id.
#[test]
fn insert_returns_new_row_id() {
    let db = database();
    let mut query = WorldQuery::new();
    query
        .prepare(&db, "INSERT INTO Objects(TypeId, Mass, Flag, Name) VALUES(?1, ?2, ?3, ?4)", false)
        .unwrap();

    let mut ids = Vec::new();
    for name in ["first", "second"] {
        query.bind_parameter(1, Uid::from_u128(7)).unwrap();
        query.bind_parameter(2, 10.0f32).unwrap();
        query.bind_parameter(3, true).unwrap();
        query.bind_parameter(4, name).unwrap();
        query.step_reset(true).unwrap();
        ids.push(query.last_insert_id());
    }

    assert!(ids[0] > 0);
    assert!(ids[1] > ids[0]);
}

/// Typed reads come back with the types they were written as.
#[test]
fn typed_columns_round_trip() {
    let db = database();
    let type_id = Uid::from_u128(0xFCC0_2596_AD72_4EDD_A7ED_3233_0F75_9CD1);
    let mut insert = WorldQuery::with_statements(
        &db,
        "INSERT INTO Objects(RefId, TypeId, Mass, Flag, Name) VALUES(?1, ?2, ?3, ?4, ?5)",
        false,
    )
    .unwrap();
    insert.bind_parameter(1, 42u32).unwrap();
    insert.bind_parameter(2, type_id).unwrap();
    insert.bind_parameter(3, 2.5f64).unwrap();
    insert.bind_parameter(4, false).unwrap();
    insert.bind_parameter(5, String::from("crate")).unwrap();
    insert.step().unwrap();

    let mut load = WorldQuery::with_statements(&db, "SELECT * FROM Objects WHERE RefId=?1", false).unwrap();
    load.bind_parameter(1, 42u32).unwrap();
    load.step().unwrap();
    assert!(load.next_row());
    assert_eq!(load.column::<u32>("RefId"), Some(42));
    assert_eq!(load.column::<Uid>("TypeId"), Some(type_id));
    assert_eq!(load.column::<f32>("Mass"), Some(2.5));
    assert_eq!(load.column::<bool>("Flag"), Some(false));
    assert_eq!(load.column::<String>(4).as_deref(), Some("crate"));
    assert_eq!(load.column::<i16>("Name"), None);
    assert!(!load.next_row());
}

/// Batches step statement by statement; bindings target the next one.
#[test]
fn batches_step_in_order() {
    let db = database();
    let mut query = WorldQuery::with_statements(
        &db,
        "INSERT INTO Objects(RefId, Name) VALUES(?1, 'a'); \
         UPDATE Objects SET Name=?1 WHERE RefId=1; \
         SELECT Name FROM Objects WHERE RefId=1",
        false,
    )
    .unwrap();
    assert_eq!(query.statement_count(), 3);

    query.bind_parameter(1, 1).unwrap();
    query.step().unwrap();
    assert!(!query.has_results());

    query.bind_parameter(1, "renamed").unwrap();
    query.step().unwrap();
    query.step().unwrap();
    assert_eq!(query.column::<String>("Name").as_deref(), Some("renamed"));

    assert!(matches!(query.step(), Err(QueryError::Exhausted)));
    assert!(matches!(query.bind_parameter(1, 0), Err(QueryError::Exhausted)));
}

/// `step_all` runs whatever is left and stops at the first failure.
#[test]
fn step_all_stops_on_failure() {
    let db = database();
    let mut query = WorldQuery::with_statements(
        &db,
        "INSERT INTO Objects(RefId) VALUES(1); INSERT INTO Objects(RefId) VALUES(1); INSERT INTO Objects(RefId) VALUES(2)",
        false,
    )
    .unwrap();
    assert!(query.step_all().is_err());
    assert!(query.last_error().unwrap().contains("statement 1"));

    let count: i64 = db
        .query_row("SELECT COUNT(*) FROM Objects", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

/// Unbound parameters execute as NULL.
#[test]
fn unbound_parameters_are_null() {
    let db = database();
    let mut query =
        WorldQuery::with_statements(&db, "INSERT INTO Objects(RefId, Name) VALUES(5, ?1)", false).unwrap();
    query.step().unwrap();

    let mut load = WorldQuery::with_statements(&db, "SELECT Name FROM Objects WHERE RefId=5", false).unwrap();
    load.step().unwrap();
    assert_eq!(load.column::<String>(0), None);
    assert_eq!(load.column::<world_query::Value>(0), Some(world_query::Value::Null));
}

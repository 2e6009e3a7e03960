//! Databases stored in the in-memory VFS.

use std::rc::Rc;

use world_query::{MemoryVfs, WorldQuery};

fn vfs(name: &str) -> &'static MemoryVfs {
    let _ = env_logger::builder().is_test(true).try_init();
    MemoryVfs::register(name).expect("register memory vfs")
}

/// Writes land in the VFS file table and survive the connection.
#[test]
fn database_image_outlives_connection() {
    let vfs = vfs("vfs-image");
    {
        let connection = Rc::new(vfs.open_connection("world.db", true).unwrap());
        let mut query = WorldQuery::with_statements(
            &connection,
            "CREATE TABLE T(Id INTEGER PRIMARY KEY, Name TEXT); INSERT INTO T(Name) VALUES('kept')",
            false,
        )
        .unwrap();
        query.step_all().unwrap();
    }

    let image = vfs.file_bytes("world.db").expect("database file exists");
    assert!(image.starts_with(b"SQLite format 3\0"));
    assert!(!vfs.contains_file("world.db-journal"));

    let connection = Rc::new(vfs.open_connection("world.db", false).unwrap());
    let mut query = WorldQuery::with_statements(&connection, "SELECT Name FROM T", false).unwrap();
    query.step().unwrap();
    assert_eq!(query.column::<String>(0).as_deref(), Some("kept"));
}

/// Opening without the create flag fails for files that do not exist.
#[test]
fn missing_file_without_create_fails() {
    let vfs = vfs("vfs-missing");
    assert!(vfs.open_connection("absent.db", false).is_err());
    assert!(!vfs.contains_file("absent.db"));
}

/// A preloaded image can be opened under another name in another VFS.
#[test]
fn preloaded_image_opens() {
    let source = vfs("vfs-source");
    {
        let connection = source.open_connection("a.db", true).unwrap();
        connection
            .execute_batch("CREATE TABLE Configuration(NextRefId INTEGER); INSERT INTO Configuration VALUES(17);")
            .unwrap();
    }
    let image = source.file_bytes("a.db").unwrap();

    let target = vfs("vfs-target");
    target.insert_file("b.db", image);
    let connection = target.open_connection("b.db", false).unwrap();
    let next: i64 = connection
        .query_row("SELECT NextRefId FROM Configuration", [], |row| row.get(0))
        .unwrap();
    assert_eq!(next, 17);
    assert_eq!(target.file_names(), vec!["b.db".to_owned()]);
}

/// Rolled back transactions leave the image untouched.
#[test]
fn rollback_restores_contents() {
    let vfs = vfs("vfs-rollback");
    let connection = vfs.open_connection("r.db", true).unwrap();
    connection
        .execute_batch("CREATE TABLE T(V INTEGER); INSERT INTO T VALUES(1);")
        .unwrap();
    connection
        .execute_batch("BEGIN; UPDATE T SET V=2; ROLLBACK;")
        .unwrap();
    let value: i64 = connection.query_row("SELECT V FROM T", [], |row| row.get(0)).unwrap();
    assert_eq!(value, 1);
}

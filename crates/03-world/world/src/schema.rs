//! Base tables every world database carries, and the statements the world
//! itself runs against them.

/// Written when a world database is created.
pub const BASE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS 'Configuration' (
    Type TEXT PRIMARY KEY,
    Version INTEGER NOT NULL,
    NextRefId INTEGER NOT NULL
);
INSERT OR IGNORE INTO 'Configuration' VALUES('Primary', 1, 1);
CREATE TABLE IF NOT EXISTS 'ObjectTypes' (
    LocalId INTEGER PRIMARY KEY AUTOINCREMENT,
    Identifier TEXT NOT NULL UNIQUE,
    Name TEXT,
    DatabaseTable TEXT
);
CREATE TABLE IF NOT EXISTS 'ObjectSubElementTypes' (
    LocalId INTEGER PRIMARY KEY AUTOINCREMENT,
    Identifier TEXT NOT NULL UNIQUE,
    Name TEXT,
    DatabaseTable TEXT
);
CREATE TABLE IF NOT EXISTS 'Objects::Base::All' (
    RefId INTEGER PRIMARY KEY,
    Mass REAL NOT NULL DEFAULT 10.0,
    MassTransformAmount REAL NOT NULL DEFAULT 1.0
);
CREATE TABLE IF NOT EXISTS 'Objects::Base::All::SubElements' (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    SubElementTypeId INTEGER NOT NULL,
    ObjectId INTEGER NOT NULL,
    SubElementId INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS 'Objects::Base::All::SubElements::ObjectId'
    ON 'Objects::Base::All::SubElements' (ObjectId);
";

pub const NEXT_REF_ID: &str = "SELECT NextRefId FROM 'Configuration' WHERE Type='Primary'; \
     UPDATE 'Configuration' SET NextRefId=NextRefId+1 WHERE Type='Primary'";
pub const TABLE_EXISTS: &str = "SELECT name FROM sqlite_master WHERE type='table' AND name=?1";

pub const SELECT_OBJECT_TYPES: &str = "SELECT LocalId, Identifier FROM 'ObjectTypes'";
pub const SELECT_SUB_ELEMENT_TYPES: &str = "SELECT LocalId, Identifier FROM 'ObjectSubElementTypes'";
pub const INSERT_OBJECT_TYPE: &str = "INSERT INTO 'ObjectTypes' VALUES(NULL,?1,?2,?3)";
pub const INSERT_SUB_ELEMENT_TYPE: &str = "INSERT INTO 'ObjectSubElementTypes' VALUES(NULL,?1,?2,?3)";

pub const INSERT_BASE_OBJECT: &str = "INSERT INTO 'Objects::Base::All' VALUES(?1,?2,?3)";
pub const UPDATE_BASE_OBJECT: &str =
    "UPDATE 'Objects::Base::All' SET Mass=?1, MassTransformAmount=?2 WHERE RefId=?3";
pub const LOAD_BASE_OBJECT: &str = "SELECT * FROM 'Objects::Base::All' WHERE RefId=?1";
pub const DELETE_BASE_OBJECT: &str = "DELETE FROM 'Objects::Base::All' WHERE RefId=?1";

pub const INSERT_SUB_ELEMENT_LINK: &str =
    "INSERT INTO 'Objects::Base::All::SubElements' VALUES(NULL,?1,?2,?3)";
pub const DELETE_SUB_ELEMENT_LINK: &str =
    "DELETE FROM 'Objects::Base::All::SubElements' WHERE ObjectId=?1 AND SubElementId=?2";
pub const DELETE_SUB_ELEMENT_LINKS: &str =
    "DELETE FROM 'Objects::Base::All::SubElements' WHERE ObjectId=?1";
pub const LOAD_SUB_ELEMENT_LINKS: &str =
    "SELECT * FROM 'Objects::Base::All::SubElements' WHERE ObjectId=?1 ORDER BY Id";

/// Type identifiers are stored as upper-case braced strings.
pub fn identifier_text(type_id: &reference::Uid) -> String {
    format!("{:X}", type_id.braced())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reference::Uid;
    use world_query::split_statements;

    #[test]
    fn base_schema_splits_into_whole_statements() {
        let statements = split_statements(BASE_SCHEMA);
        assert_eq!(statements.len(), 7);
        assert!(statements[1].starts_with("INSERT OR IGNORE"));
        assert_eq!(split_statements(NEXT_REF_ID).len(), 2);
    }

    #[test]
    fn identifiers_are_braced_upper_case() {
        let uid = Uid::from_u128(0x4B6669F2_8213_4ED6_BA4F_651C250A959C);
        let text = identifier_text(&uid);
        assert_eq!(text, "{4B6669F2-8213-4ED6-BA4F-651C250A959C}");
        assert_eq!(Uid::parse_str(&text).unwrap(), uid);
    }
}

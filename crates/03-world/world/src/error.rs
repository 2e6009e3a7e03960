use reference::{RefId, ReferenceError, Uid};
use thiserror::Error;
use world_query::QueryError;

pub type WorldResult<T> = Result<T, WorldError>;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("type {0} has not been registered")]
    UnknownType(Uid),

    #[error("allocator for type {0} produced no object")]
    Allocation(Uid),

    #[error("object 0x{id:x} is resident with an incompatible type (expected {expected})")]
    TypeConflict { id: RefId, expected: Uid },

    #[error("no stored data for component 0x{0:x}")]
    MissingRow(RefId),

    #[error("object does not accept sub-elements of type {element} in category {category}")]
    UnsupportedSubElement { category: Uid, element: Uid },

    #[error("{shape} shapes take {expected} dimensions, got {found}")]
    InvalidDimensions {
        shape: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("component 0x{0:x} is not attached to a world")]
    Detached(RefId),

    #[error("world database is malformed: {0}")]
    Corrupt(String),

    #[error("world has been disposed")]
    Disposed,

    #[error("world has no database attached")]
    NoDatabase,

    #[error("failed to {action}: {source}")]
    Persist {
        action: String,
        #[source]
        source: QueryError,
    },

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WorldError {
    pub fn persist(action: impl Into<String>, source: QueryError) -> Self {
        WorldError::Persist {
            action: action.into(),
            source,
        }
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        WorldError::Corrupt(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        WorldError::Config(msg.into())
    }
}

impl From<serde_json::Error> for WorldError {
    fn from(err: serde_json::Error) -> Self {
        WorldError::Config(err.to_string())
    }
}

use thiserror::Error;

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query has not been prepared")]
    NotPrepared,

    #[error("database connection has been closed")]
    ConnectionClosed,

    #[error("No further statements are available for execution. Make sure that the query has been correctly reset.")]
    Exhausted,

    #[error("statement {index} failed: {source}")]
    Statement {
        index: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("vfs: {0}")]
    Vfs(String),
}

impl QueryError {
    pub fn vfs(msg: impl Into<String>) -> Self {
        QueryError::Vfs(msg.into())
    }

    pub(crate) fn statement(index: usize, source: rusqlite::Error) -> Self {
        QueryError::Statement { index, source }
    }
}

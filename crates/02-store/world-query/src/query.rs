use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use log::{debug, error, trace};
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::{split_statements, ColumnKey, FromColumn, IntoParam, QueryError, QueryResult};

/// Rows produced by the most recently stepped statement.
#[derive(Debug)]
struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: usize,
    first_row_pending: bool,
    names: OnceCell<HashMap<String, usize>>,
}

impl ResultSet {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.names
            .get_or_init(|| {
                self.columns
                    .iter()
                    .enumerate()
                    .map(|(index, name)| (name.clone(), index))
                    .collect()
            })
            .get(name)
            .copied()
    }
}

/// A batch of statements stepped one at a time against a world database.
///
/// Parameters bound with [`WorldQuery::bind_parameter`] apply to the next
/// statement to be stepped. Stepping a statement that returns rows buffers
/// them; the first row is readable straight away and [`WorldQuery::next_row`]
/// walks the rest.
#[derive(Debug, Default)]
pub struct WorldQuery {
    connection: Weak<Connection>,
    statements: Vec<String>,
    /// Index of the last stepped statement, `None` before the first step.
    current: Option<usize>,
    params: BTreeMap<usize, Value>,
    results: Option<ResultSet>,
    prepared: bool,
    verbose: bool,
    last_error: Option<String>,
    last_insert_id: i64,
}

impl WorldQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and prepares a query in one go.
    pub fn with_statements(connection: &Rc<Connection>, text: &str, verbose: bool) -> QueryResult<Self> {
        let mut query = Self::new();
        query.prepare(connection, text, verbose)?;
        Ok(query)
    }

    /// Splits `text` into statements and compiles each of them. Any previous
    /// preparation is discarded first.
    pub fn prepare(&mut self, connection: &Rc<Connection>, text: &str, verbose: bool) -> QueryResult<()> {
        self.unprepare();
        self.verbose = verbose;
        let statements = split_statements(text);
        for (index, statement) in statements.iter().enumerate() {
            if let Err(err) = connection.prepare_cached(statement) {
                let err = QueryError::statement(index, err);
                if verbose {
                    error!("failed to prepare statement '{statement}': {err}");
                }
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        }
        trace!("prepared {} statement(s)", statements.len());
        self.connection = Rc::downgrade(connection);
        self.statements = statements;
        self.prepared = true;
        Ok(())
    }

    /// Releases the statements and detaches from the database.
    pub fn unprepare(&mut self) {
        *self = Self {
            verbose: self.verbose,
            ..Self::default()
        };
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn has_results(&self) -> bool {
        self.results.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Row id of the most recent successful insert on this query's
    /// connection, as observed by the last step.
    pub fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }

    /// Executes the next statement.
    pub fn step(&mut self) -> QueryResult<()> {
        self.last_error = None;
        let result = self.step_inner();
        if let Err(err) = &result {
            if self.verbose {
                error!("world query step failed: {err}");
            }
            self.last_error = Some(err.to_string());
        }
        result
    }

    /// Executes the next statement and, when `auto_reset` is set, rewinds
    /// the whole query afterwards (even on failure), keeping the error.
    pub fn step_reset(&mut self, auto_reset: bool) -> QueryResult<()> {
        let result = self.step();
        if auto_reset {
            self.reset_with(false);
        }
        result
    }

    /// Executes every remaining statement, stopping at the first failure.
    pub fn step_all(&mut self) -> QueryResult<()> {
        while self.current.map_or(0, |current| current + 1) < self.statements.len() {
            self.step()?;
        }
        Ok(())
    }

    fn step_inner(&mut self) -> QueryResult<()> {
        if !self.prepared {
            return Err(QueryError::NotPrepared);
        }
        let connection = self.connection.upgrade().ok_or(QueryError::ConnectionClosed)?;
        let index = self.current.map_or(0, |current| current + 1);
        if index >= self.statements.len() {
            return Err(QueryError::Exhausted);
        }
        self.current = Some(index);
        self.results = None;
        let params = std::mem::take(&mut self.params);

        let text = &self.statements[index];
        if self.verbose {
            debug!("executing: {text}");
        }
        let mut statement = connection
            .prepare_cached(text)
            .map_err(|err| QueryError::statement(index, err))?;
        let parameter_count = statement.parameter_count();
        for slot in 1..=parameter_count {
            let value = params.get(&slot).cloned().unwrap_or(Value::Null);
            statement
                .raw_bind_parameter(slot, value)
                .map_err(|err| QueryError::statement(index, err))?;
        }

        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let mut rows = Vec::new();
        {
            let mut cursor = statement.raw_query();
            while let Some(row) = cursor.next().map_err(|err| QueryError::statement(index, err))? {
                let mut values = Vec::with_capacity(columns.len());
                for column in 0..columns.len() {
                    let value = row
                        .get_ref(column)
                        .map_err(|err| QueryError::statement(index, err))?;
                    values.push(Value::from(value));
                }
                rows.push(values);
            }
        }
        self.last_insert_id = connection.last_insert_rowid();

        if !rows.is_empty() {
            self.results = Some(ResultSet {
                columns,
                rows,
                cursor: 0,
                first_row_pending: true,
                names: OnceCell::new(),
            });
        }
        Ok(())
    }

    /// Moves to the first or next result row. Returns false (and clears the
    /// results) once the rows are exhausted.
    pub fn next_row(&mut self) -> bool {
        let Some(results) = self.results.as_mut() else {
            return false;
        };
        if results.first_row_pending {
            results.first_row_pending = false;
            return true;
        }
        results.cursor += 1;
        if results.cursor >= results.rows.len() {
            self.results = None;
            return false;
        }
        true
    }

    /// Rewinds to the first statement and clears results and bindings.
    pub fn reset(&mut self) {
        self.reset_with(true);
    }

    pub fn reset_with(&mut self, clear_error: bool) {
        if clear_error {
            self.last_error = None;
        }
        self.current = None;
        self.results = None;
        self.params.clear();
    }

    /// Re-arms the most recently stepped statement so it can be stepped
    /// again with fresh bindings.
    pub fn reset_current(&mut self) -> bool {
        self.last_error = None;
        let Some(current) = self.current else {
            return false;
        };
        self.current = current.checked_sub(1);
        self.results = None;
        self.params.clear();
        true
    }

    /// Binds a value to the 1-based parameter `index` of the next statement.
    pub fn bind_parameter(&mut self, index: usize, value: impl IntoParam) -> QueryResult<()> {
        if !self.prepared {
            return Err(QueryError::NotPrepared);
        }
        let next = self.current.map_or(0, |current| current + 1);
        if next >= self.statements.len() {
            return Err(QueryError::Exhausted);
        }
        self.params.insert(index, value.into_param());
        Ok(())
    }

    /// Reads a column of the current row. `None` when there are no results,
    /// the column does not exist or holds an incompatible value.
    pub fn column<T: FromColumn>(&self, key: impl ColumnKey) -> Option<T> {
        let results = self.results.as_ref()?;
        let index = key.resolve(&|name| results.column_index(name))?;
        let value = results.rows.get(results.cursor)?.get(index)?;
        T::from_column(value)
    }

    pub fn column_names(&self) -> &[String] {
        self.results
            .as_ref()
            .map_or(&[][..], |results| results.columns.as_slice())
    }
}

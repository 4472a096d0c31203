//! Database connection and statement execution.
//!
//! Native builds run against SQLite through `rusqlite`, with every statement
//! serialised over one connection. `wasm32` builds run inside a Spin component
//! and talk to the host's SQLite database.

use crate::{DbError, QueryResult, Row, Value};
use serde::de::DeserializeOwned;

/// SQLite database connection.
///
/// Every call is a single statement and is atomic on its own. Callers that need
/// compare-and-set semantics express them as one conditional statement with a
/// `RETURNING` clause and inspect the returned rows.
pub struct Db {
    #[cfg(target_arch = "wasm32")]
    conn: spin_sdk::sqlite::Connection,
    #[cfg(not(target_arch = "wasm32"))]
    conn: parking_lot::Mutex<rusqlite::Connection>,
}

/// How long one native statement waits on another connection's write lock.
///
/// Statements run synchronously on the calling thread, including tokio
/// workers. A caller bounded by a lock wait can therefore overrun that bound by
/// up to this timeout when the file is contended; keep it well below the
/// cache's lock wait.
#[cfg(not(target_arch = "wasm32"))]
pub const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[cfg(target_arch = "wasm32")]
impl Db {
    /// Open the component's default SQLite database.
    pub fn open_default() -> Result<Self, DbError> {
        let conn = spin_sdk::sqlite::Connection::open_default()
            .map_err(|e| DbError::OpenError(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Open a labelled SQLite database.
    pub fn open(label: &str) -> Result<Self, DbError> {
        let conn = spin_sdk::sqlite::Connection::open(label)
            .map_err(|e| DbError::OpenError(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Execute a statement that doesn't return rows.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<(), DbError> {
        self.run(sql, params).map(|_| ())
    }

    /// Execute a statement and return its rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        let result = self.run(sql, params)?;
        let columns: Vec<String> = result.columns.iter().map(|c| c.to_string()).collect();
        let rows = result
            .rows
            .iter()
            .map(|row| {
                let values = row.values.iter().map(from_spin).collect();
                Row::new(columns.clone(), values)
            })
            .collect();
        Ok(QueryResult::new(columns, rows))
    }

    fn run(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<spin_sdk::sqlite::QueryResult, DbError> {
        let spin_params: Vec<spin_sdk::sqlite::Value> = params.iter().map(to_spin).collect();
        self.conn
            .execute(sql, spin_params.as_slice())
            .map_err(|e| DbError::QueryError(e.to_string()))
    }
}

#[cfg(target_arch = "wasm32")]
fn to_spin(value: &Value) -> spin_sdk::sqlite::Value {
    match value {
        Value::Null => spin_sdk::sqlite::Value::Null,
        Value::Integer(i) => spin_sdk::sqlite::Value::Integer(*i),
        Value::Real(f) => spin_sdk::sqlite::Value::Real(*f),
        Value::Text(s) => spin_sdk::sqlite::Value::Text(s.clone()),
        Value::Blob(b) => spin_sdk::sqlite::Value::Blob(b.clone()),
    }
}

#[cfg(target_arch = "wasm32")]
fn from_spin(value: &spin_sdk::sqlite::Value) -> Value {
    match value {
        spin_sdk::sqlite::Value::Null => Value::Null,
        spin_sdk::sqlite::Value::Integer(i) => Value::Integer(*i),
        spin_sdk::sqlite::Value::Real(f) => Value::Real(*f),
        spin_sdk::sqlite::Value::Text(s) => Value::Text(s.clone()),
        spin_sdk::sqlite::Value::Blob(b) => Value::Blob(b.clone()),
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Db {
    /// Open a private in-memory database.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(":memory:")
    }

    /// Open (or create) a database file. `":memory:"` opens a private
    /// in-memory database.
    ///
    /// File databases are switched to WAL so readers never wait on a writer.
    pub fn open(path: &str) -> Result<Self, DbError> {
        Self::open_with_busy_timeout(path, BUSY_TIMEOUT)
    }

    /// Like [`open`](Self::open), with a custom [`BUSY_TIMEOUT`].
    pub fn open_with_busy_timeout(
        path: &str,
        busy_timeout: std::time::Duration,
    ) -> Result<Self, DbError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| DbError::OpenError(format!("{path}: {e}")))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| DbError::OpenError(e.to_string()))?;

        if path != ":memory:" {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(|e| DbError::OpenError(e.to_string()))?;
            tracing::debug!(path, journal_mode = %mode, "opened database");
        }

        Ok(Self {
            conn: parking_lot::Mutex::new(conn),
        })
    }

    /// Execute a statement that doesn't return rows.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(sql, rusqlite::params_from_iter(params.iter()))?;
        Ok(())
    }

    /// Execute a statement and return its rows.
    ///
    /// Works for `SELECT` as well as `INSERT`/`UPDATE`/`DELETE .. RETURNING`.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(from_sql_ref(row.get_ref(i)?));
            }
            out.push(Row::new(columns.clone(), values));
        }

        Ok(QueryResult::new(columns, out))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};

        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn from_sql_ref(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl Db {
    /// Execute a query and deserialize every row.
    pub fn query_as<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<T>, DbError> {
        self.query(sql, params)?.deserialize_all()
    }

    /// Execute a query and deserialize exactly one row.
    ///
    /// Returns [`DbError::NotFound`] if no rows are returned.
    pub fn query_one<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<T, DbError> {
        let result = self.query(sql, params)?;
        result.first().ok_or(DbError::NotFound)?.deserialize()
    }

    /// Execute a query and deserialize the first row, if any.
    pub fn query_optional<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<T>, DbError> {
        let result = self.query(sql, params)?;
        result.first().map(|row| row.deserialize()).transpose()
    }

    /// Create the coherence tables if they don't exist yet.
    pub fn migrate(&self) -> Result<(), DbError> {
        for statement in crate::schema::MIGRATIONS {
            self.execute(statement, &[])?;
        }
        tracing::debug!(statements = crate::schema::MIGRATIONS.len(), "schema ready");
        Ok(())
    }
}

//! # Database Module
//!
//! Owns the SQLite connection. All statements go through a single
//! `tokio-rusqlite` connection, so each call runs to completion on the
//! connection's worker thread before the next one starts.

use crate::error::{is_unique_violation, TrackerError, TrackerResult};
use rusqlite::TransactionBehavior;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Column name / value pairs of a row fetched with [`Store::query`]
pub type RowData = Vec<(String, serde_json::Value)>;

/// Manages the database connection and provides query utilities
pub struct Store {
    conn: Connection,
    path: String,
}

impl Store {
    /// Opens (or creates) the database file at `path`
    pub async fn new<P: AsRef<Path>>(path: P) -> TrackerResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!("Opening database at: {}", path_str);

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| TrackerError::Database(format!("Failed to open database: {}", e)))?;

        Self::initialize_pragmas(&conn, true).await?;

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Creates an in-memory database (useful for testing)
    pub async fn in_memory() -> TrackerResult<Self> {
        debug!("Opening in-memory database");

        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| TrackerError::Database(format!("Failed to create database: {}", e)))?;

        Self::initialize_pragmas(&conn, false).await?;

        Ok(Self {
            conn,
            path: ":memory:".to_string(),
        })
    }

    /// WAL only applies to file-backed databases; foreign keys must be on
    /// for the cascade rules to fire.
    async fn initialize_pragmas(conn: &Connection, wal: bool) -> TrackerResult<()> {
        conn.call(move |conn| {
            if wal {
                conn.execute_batch(
                    "PRAGMA journal_mode=WAL;
                     PRAGMA synchronous=NORMAL;",
                )?;
            }
            conn.execute_batch(
                "PRAGMA foreign_keys=ON;
                 PRAGMA cache_size=-64000;",
            )?;
            Ok(())
        })
        .await
        .map_err(|e| TrackerError::Database(format!("Failed to set pragmas: {}", e)))?;

        debug!("Database pragmas configured");
        Ok(())
    }

    /// Execute a write statement and return the number of affected rows
    pub async fn execute(&self, sql: String, params: Vec<SqlValue>) -> TrackerResult<u64> {
        self.conn
            .call(move |conn| {
                let affected = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
                Ok(affected as u64)
            })
            .await
            .map_err(|e| TrackerError::Database(format!("Execute failed: {}", e)))
    }

    /// Execute an INSERT and return the new row id.
    ///
    /// The id is read inside the same connection call so a concurrent insert
    /// cannot slip in between.
    pub async fn insert(&self, sql: String, params: Vec<SqlValue>) -> TrackerResult<i64> {
        self.conn
            .call(move |conn| {
                conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Rusqlite(e) if is_unique_violation(&e) => {
                    TrackerError::Conflict(e.to_string())
                }
                e => TrackerError::Database(format!("Insert failed: {}", e)),
            })
    }

    pub async fn execute_batch(&self, sql: String) -> TrackerResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(|e| TrackerError::Database(format!("Batch execution failed: {}", e)))
    }

    /// Query and return rows as column/JSON pairs
    pub async fn query(&self, sql: String, params: Vec<SqlValue>) -> TrackerResult<Vec<RowData>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let column_names: Vec<String> = stmt
                    .column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();

                let mut rows_result = Vec::new();
                let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

                while let Some(row) = rows.next()? {
                    let mut row_data = Vec::new();
                    for (i, name) in column_names.iter().enumerate() {
                        row_data.push((name.clone(), Self::get_value_from_row(row, i)));
                    }
                    rows_result.push(row_data);
                }

                Ok(rows_result)
            })
            .await
            .map_err(|e| TrackerError::Database(format!("Query failed: {}", e)))
    }

    /// Query and map every row into a typed value
    pub async fn query_rows<T, F>(
        &self,
        sql: String,
        params: Vec<SqlValue>,
        map: F,
    ) -> TrackerResult<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |row| map(row))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| TrackerError::Database(format!("Query failed: {}", e)))
    }

    /// Like [`Store::query_rows`] but returns only the first row, if any
    pub async fn query_opt<T, F>(
        &self,
        sql: String,
        params: Vec<SqlValue>,
        map: F,
    ) -> TrackerResult<Option<T>>
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        Ok(self.query_rows(sql, params, map).await?.into_iter().next())
    }

    fn get_value_from_row(row: &rusqlite::Row, idx: usize) -> serde_json::Value {
        use rusqlite::types::ValueRef;

        match row.get_ref(idx) {
            Ok(ValueRef::Integer(v)) => serde_json::json!(v),
            Ok(ValueRef::Real(v)) => serde_json::json!(v),
            Ok(ValueRef::Text(v)) => serde_json::json!(String::from_utf8_lossy(v)),
            Ok(ValueRef::Blob(v)) => serde_json::json!(format!("<blob:{} bytes>", v.len())),
            Ok(ValueRef::Null) | Err(_) => serde_json::Value::Null,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }

    /// Get all user table names in the database
    pub async fn list_tables(&self) -> TrackerResult<Vec<String>> {
        self.query_rows(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
                .to_string(),
            vec![],
            |row| row.get(0),
        )
        .await
    }

    /// Run `f` inside an IMMEDIATE transaction; rolled back if `f` fails
    pub async fn with_transaction<F, T>(&self, f: F) -> TrackerResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let result = f(&tx)?;
                tx.commit()?;
                Ok(result)
            })
            .await
            .map_err(TrackerError::from)
    }
}

/// SQL value wrapper for statement parameters
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};

        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_db() {
        let store = Store::in_memory().await.unwrap();
        assert!(store.is_in_memory());

        let tables = store.list_tables().await.unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_insert_and_query() {
        let store = Store::in_memory().await.unwrap();

        store
            .execute_batch("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)".to_string())
            .await
            .unwrap();

        let first = store
            .insert(
                "INSERT INTO test (name) VALUES (?)".to_string(),
                vec!["alpha".into()],
            )
            .await
            .unwrap();
        let second = store
            .insert(
                "INSERT INTO test (name) VALUES (?)".to_string(),
                vec![SqlValue::Null],
            )
            .await
            .unwrap();
        assert_eq!(second, first + 1);

        let rows = store
            .query("SELECT id, name FROM test ORDER BY id".to_string(), vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1].1, serde_json::json!("alpha"));
        assert_eq!(rows[1][1].1, serde_json::Value::Null);

        let names: Vec<Option<String>> = store
            .query_rows(
                "SELECT name FROM test WHERE id = ?".to_string(),
                vec![first.into()],
                |row| row.get(0),
            )
            .await
            .unwrap();
        assert_eq!(names, vec![Some("alpha".to_string())]);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let store = Store::in_memory().await.unwrap();
        store
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL)".to_string())
            .await
            .unwrap();

        let result = store
            .with_transaction(|conn| {
                conn.execute("INSERT INTO t (v) VALUES ('kept?')", [])?;
                conn.execute("INSERT INTO t (v) VALUES (NULL)", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());

        let count: Option<i64> = store
            .query_opt("SELECT COUNT(*) FROM t".to_string(), vec![], |row| row.get(0))
            .await
            .unwrap();
        assert_eq!(count, Some(0));
    }
}

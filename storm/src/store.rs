///
/// SQLite store protocol.
///
/// The narrow surface the mapper needs from the relational store, over
/// rusqlite with bundled SQLite:
///
/// - Connection: open, close, execute (pragmas and DDL), prepare,
///   last_inserted_key
/// - Statement: bind_integer, bind_float, bind_text (by named parameter),
///   execute, query, clear_bindings, finalize
/// - Rows: step, then column_integer / column_float / column_text
///
/// `Statement::execute` steps until done and leaves the statement reset, but
/// bindings survive a reset; callers reusing a statement for another row must
/// call `clear_bindings` first.
///
/// Column reads coerce the way the C API does: NULL reads as 0, 0.0 or "".
///

use std::path::{Path, PathBuf};

use rusqlite::OpenFlags;
use rusqlite::types::ValueRef;
use storm_core::{FieldKind, Result, StormError, Value};
use thiserror::Error;
use tracing::debug;

pub fn sqlite_error_code(e: &rusqlite::Error) -> i64 {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => err.extended_code as i64,
        _ => -1,
    }
}

/// Failure reported by the store before the caller adds operation context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} (code {code})")]
pub struct StoreError {
    pub code: i64,
    pub reason: String,
}

impl StoreError {
    pub fn during(self, operation: &'static str, table: &str) -> StormError {
        StormError::Execution {
            operation,
            table: table.to_string(),
            code: self.code,
            reason: self.reason,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self {
            code: sqlite_error_code(&e),
            reason: e.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub struct Connection {
    inner: rusqlite::Connection,
    path: PathBuf,
}

impl Connection {
    /// Opens `path` read-write; with `create` a missing database file is created.
    pub fn open(path: &Path, create: bool) -> Result<Self> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        match rusqlite::Connection::open_with_flags(path, flags) {
            Ok(inner) => Ok(Self {
                inner,
                path: path.to_path_buf(),
            }),
            Err(e) => Err(StormError::Connection {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs one or more statements that return no rows.
    pub fn execute(&self, sql: &str) -> StoreResult<()> {
        debug!(sql, "execute");
        self.inner.execute_batch(sql)?;
        Ok(())
    }

    pub fn enable_foreign_keys(&self) -> StoreResult<()> {
        self.execute("PRAGMA foreign_keys = ON")
    }

    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        debug!(sql, "prepare");
        match self.inner.prepare(sql) {
            Ok(inner) => Ok(Statement { inner }),
            Err(e) => Err(StormError::Prepare {
                sql: sql.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn last_inserted_key(&self) -> i64 {
        self.inner.last_insert_rowid()
    }

    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.inner.close().map_err(|(_, e)| StormError::Connection {
            path,
            reason: e.to_string(),
        })
    }
}

pub struct Statement<'conn> {
    inner: rusqlite::Statement<'conn>,
}

impl<'conn> Statement<'conn> {
    fn parameter(&self, name: &str) -> StoreResult<usize> {
        let placeholder = format!(":{}", name);
        self.inner.parameter_index(&placeholder)?.ok_or_else(|| StoreError {
            code: -1,
            reason: format!("statement has no parameter named {}", placeholder),
        })
    }

    pub fn bind_integer(&mut self, name: &str, value: i64) -> StoreResult<()> {
        let index = self.parameter(name)?;
        self.inner.raw_bind_parameter(index, value)?;
        Ok(())
    }

    pub fn bind_float(&mut self, name: &str, value: f64) -> StoreResult<()> {
        let index = self.parameter(name)?;
        self.inner.raw_bind_parameter(index, value)?;
        Ok(())
    }

    pub fn bind_text(&mut self, name: &str, value: &str) -> StoreResult<()> {
        let index = self.parameter(name)?;
        self.inner.raw_bind_parameter(index, value)?;
        Ok(())
    }

    /// Binds `value` to the parameter named after its column.
    pub fn bind(&mut self, value: &Value) -> StoreResult<()> {
        match value.kind {
            Some(FieldKind::Integer) => {
                self.bind_integer(&value.name, value.as_integer().unwrap_or_default())
            }
            Some(FieldKind::Float) => {
                self.bind_float(&value.name, value.as_float().unwrap_or_default())
            }
            Some(FieldKind::Text | FieldKind::Timestamp) => {
                self.bind_text(&value.name, &value.to_string())
            }
            None => Err(StoreError {
                code: -1,
                reason: format!("cannot bind empty value for {}", value.name),
            }),
        }
    }

    /// Steps to completion; returns the number of changed rows.
    pub fn execute(&mut self) -> StoreResult<usize> {
        Ok(self.inner.raw_execute()?)
    }

    pub fn query(&mut self) -> Rows<'_> {
        Rows {
            inner: self.inner.raw_query(),
        }
    }

    pub fn clear_bindings(&mut self) {
        self.inner.clear_bindings();
    }

    pub fn finalize(self) -> StoreResult<()> {
        self.inner.finalize()?;
        Ok(())
    }
}

pub struct Rows<'stmt> {
    inner: rusqlite::Rows<'stmt>,
}

impl<'stmt> Rows<'stmt> {
    /// Advances to the next row; `None` once the statement is done.
    pub fn step(&mut self) -> StoreResult<Option<Row<'_, 'stmt>>> {
        Ok(self.inner.next()?.map(|inner| Row { inner }))
    }
}

pub struct Row<'a, 'stmt> {
    inner: &'a rusqlite::Row<'stmt>,
}

impl Row<'_, '_> {
    pub fn column_integer(&self, index: usize) -> StoreResult<i64> {
        Ok(match self.inner.get_ref(index)? {
            ValueRef::Integer(i) => i,
            ValueRef::Real(f) => f as i64,
            ValueRef::Text(t) => std::str::from_utf8(t)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            ValueRef::Null | ValueRef::Blob(_) => 0,
        })
    }

    pub fn column_float(&self, index: usize) -> StoreResult<f64> {
        Ok(match self.inner.get_ref(index)? {
            ValueRef::Real(f) => f,
            ValueRef::Integer(i) => i as f64,
            ValueRef::Text(t) => std::str::from_utf8(t)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0.0),
            ValueRef::Null | ValueRef::Blob(_) => 0.0,
        })
    }

    pub fn column_text(&self, index: usize) -> StoreResult<String> {
        Ok(match self.inner.get_ref(index)? {
            ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
            ValueRef::Integer(i) => i.to_string(),
            ValueRef::Real(f) => f.to_string(),
            ValueRef::Null => String::new(),
        })
    }

    /// Reads column `index` in the encoding `kind` uses, for `set_value`.
    pub fn column_raw(&self, index: usize, kind: FieldKind) -> StoreResult<Vec<u8>> {
        Ok(match kind {
            FieldKind::Integer => self.column_integer(index)?.to_le_bytes().to_vec(),
            FieldKind::Float => self.column_float(index)?.to_le_bytes().to_vec(),
            FieldKind::Text | FieldKind::Timestamp => self.column_text(index)?.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp(dir: &TempDir) -> Connection {
        Connection::open(&dir.path().join("store.db"), true).expect("open store")
    }

    #[test]
    fn test_open_without_create_fails_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Connection::open(&dir.path().join("missing.db"), false).err().unwrap();
        assert!(matches!(err, StormError::Connection { .. }));
    }

    #[test]
    fn test_bind_step_and_read_back() {
        let dir = TempDir::new().unwrap();
        let conn = open_temp(&dir);
        conn.execute("CREATE TABLE t ( id integer PRIMARY KEY NOT NULL, name text, ratio float )")
            .unwrap();

        let mut insert = conn
            .prepare("INSERT INTO t ( id, name, ratio ) VALUES ( :id, :name, :ratio )")
            .unwrap();
        insert.bind_text("name", "first").unwrap();
        insert.bind_float("ratio", 0.25).unwrap();
        assert_eq!(insert.execute().unwrap(), 1);
        let first = conn.last_inserted_key();
        assert!(first > 0);

        insert.clear_bindings();
        insert.bind(&Value::integer("id", 40)).unwrap();
        insert.bind(&Value::text("name", "second")).unwrap();
        insert.execute().unwrap();
        insert.finalize().unwrap();

        let mut select = conn.prepare("SELECT id, name, ratio FROM t ORDER BY id").unwrap();
        let mut rows = select.query();

        let row = rows.step().unwrap().unwrap();
        assert_eq!(row.column_integer(0).unwrap(), first);
        assert_eq!(row.column_text(1).unwrap(), "first");
        assert_eq!(row.column_float(2).unwrap(), 0.25);

        let row = rows.step().unwrap().unwrap();
        assert_eq!(row.column_integer(0).unwrap(), 40);
        assert_eq!(row.column_text(1).unwrap(), "second");
        assert_eq!(row.column_float(2).unwrap(), 0.0);

        assert!(rows.step().unwrap().is_none());
    }

    #[test]
    fn test_unknown_parameter_is_reported() {
        let dir = TempDir::new().unwrap();
        let conn = open_temp(&dir);
        conn.execute("CREATE TABLE t ( id integer, name text )").unwrap();

        let mut stmt = conn.prepare("INSERT INTO t ( id ) VALUES ( :id )").unwrap();
        let err = stmt.bind_text("name", "x").unwrap_err();
        assert!(err.reason.contains(":name"));
    }

    #[test]
    fn test_prepare_error_carries_sql() {
        let dir = TempDir::new().unwrap();
        let conn = open_temp(&dir);

        match conn.prepare("SELECT nothing FROM nowhere") {
            Err(StormError::Prepare { sql, reason }) => {
                assert_eq!(sql, "SELECT nothing FROM nowhere");
                assert!(reason.contains("nowhere"));
            }
            Err(other) => panic!("Expected Prepare error, got {:?}", other),
            Ok(_) => panic!("Expected Prepare error"),
        }
    }

    #[test]
    fn test_constraint_violation_has_extended_code() {
        let dir = TempDir::new().unwrap();
        let conn = open_temp(&dir);
        conn.execute("CREATE TABLE t ( id integer PRIMARY KEY NOT NULL, name text )").unwrap();
        conn.execute("INSERT INTO t VALUES ( 1, 'a' )").unwrap();

        let mut stmt = conn.prepare("INSERT INTO t ( id, name ) VALUES ( :id, :name )").unwrap();
        stmt.bind_integer("id", 1).unwrap();
        let err = stmt.execute().unwrap_err().during("save", "t");
        match err {
            StormError::Execution { operation, table, code, .. } => {
                assert_eq!(operation, "save");
                assert_eq!(table, "t");
                // SQLITE_CONSTRAINT_PRIMARYKEY
                assert_eq!(code, 1555);
            }
            other => panic!("Expected Execution error, got {:?}", other),
        }
    }
}

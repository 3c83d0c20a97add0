///
/// Live schema reconciliation.
///
/// Compares the table layout SQLite reports for a record type with the layout
/// its `Schema` declares, and recreates the table when they disagree. The
/// check covers column count, column names in order, declared types
/// (case-insensitively) and the key column, which must either be flagged as
/// primary key or, when the key is a foreign key, carry the matching
/// reference.
///
/// Recreation drops the table and every row in it.
///

use storm_core::{Result, Schema, StormError};
use tracing::{debug, info};

use crate::sql::create_table_sql;
use crate::store::{Connection, Rows, StoreResult};

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub sql_type: String,
    pub primary_key: bool,
}

/// One row of `PRAGMA foreign_key_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveReference {
    pub from: String,
    pub table: String,
}

pub fn table_info(conn: &Connection, table: &str) -> Result<Vec<LiveColumn>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info('{}')", table))?;
    let mut rows = stmt.query();
    read_columns(&mut rows).map_err(|e| e.during("reconcile", table))
}

fn read_columns(rows: &mut Rows<'_>) -> StoreResult<Vec<LiveColumn>> {
    let mut columns = Vec::new();
    while let Some(row) = rows.step()? {
        columns.push(LiveColumn {
            name: row.column_text(1)?,
            sql_type: row.column_text(2)?,
            primary_key: row.column_integer(5)? != 0,
        });
    }
    Ok(columns)
}

pub fn foreign_keys(conn: &Connection, table: &str) -> Result<Vec<LiveReference>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list('{}')", table))?;
    let mut rows = stmt.query();
    read_references(&mut rows).map_err(|e| e.during("reconcile", table))
}

fn read_references(rows: &mut Rows<'_>) -> StoreResult<Vec<LiveReference>> {
    let mut references = Vec::new();
    while let Some(row) = rows.step()? {
        references.push(LiveReference {
            table: row.column_text(2)?,
            from: row.column_text(3)?,
        });
    }
    Ok(references)
}

/// Describes the first disagreement between `schema` and the live layout.
pub fn inconsistency(
    schema: &Schema,
    columns: &[LiveColumn],
    references: &[LiveReference],
) -> Option<String> {
    if columns.is_empty() {
        return Some("table does not exist".to_string());
    }
    if columns.len() != schema.columns().len() {
        return Some(format!(
            "expected {} columns, found {}",
            schema.columns().len(),
            columns.len()
        ));
    }

    for (declared, live) in schema.columns().iter().zip(columns) {
        if declared.name != live.name {
            return Some(format!("expected column '{}', found '{}'", declared.name, live.name));
        }
        if !declared.kind.sql_type().eq_ignore_ascii_case(&live.sql_type) {
            return Some(format!(
                "column '{}' is declared {}, found '{}'",
                declared.name,
                declared.kind.sql_type(),
                live.sql_type
            ));
        }
    }

    let key = schema.key();
    if key.is_foreign() {
        let referenced = references
            .iter()
            .any(|r| r.from == key.name && r.table.eq_ignore_ascii_case(&key.foreign_table));
        if !referenced {
            return Some(format!(
                "key column '{}' does not reference '{}'",
                key.name, key.foreign_table
            ));
        }
    } else if !columns[0].primary_key {
        return Some(format!("key column '{}' is not a primary key", key.name));
    }

    None
}

pub fn recreate(conn: &Connection, schema: &Schema) -> Result<()> {
    let table = schema.table();
    conn.execute(&create_table_sql(schema))
        .map_err(|e| StormError::SchemaInconsistency {
            table: table.to_string(),
            reason: e.reason,
        })?;

    let columns = table_info(conn, table)?;
    let references = foreign_keys(conn, table)?;
    match inconsistency(schema, &columns, &references) {
        Some(reason) => Err(StormError::SchemaInconsistency {
            table: table.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Brings the table of `schema` in line; returns whether it was recreated.
pub fn reconcile(conn: &Connection, schema: &Schema) -> Result<bool> {
    let table = schema.table();
    let columns = table_info(conn, table)?;
    let references = foreign_keys(conn, table)?;

    match inconsistency(schema, &columns, &references) {
        None => {
            debug!(table, "table layout matches record schema");
            Ok(false)
        }
        Some(reason) => {
            info!(table, %reason, "recreating table");
            recreate(conn, schema)?;
            Ok(true)
        }
    }
}

///
/// SQL synthesis and the per-mapper statement cache.
///
/// Statements are derived from a record type's `Schema` alone. Column order is
/// registration order and every column is bound through a named placeholder
/// `:<column>`. The zeroth column is the key:
///
/// - INSERT lists every column; an unbound key placeholder is NULL, so the
///   store assigns the key.
/// - SELECT lists every column; callers append ` WHERE <predicate>`.
/// - UPDATE sets every non-key column and filters on the key.
/// - DELETE filters on the key and is not cached.
///

use std::collections::HashMap;

use storm_core::{ColumnSchema, FieldKind, Schema, Value};

fn column_names(columns: &[ColumnSchema]) -> String {
    columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
}

fn assignments(columns: &[ColumnSchema]) -> String {
    columns
        .iter()
        .map(|c| format!("{} = :{}", c.name, c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `<key> = :<key>`
pub fn key_predicate(schema: &Schema) -> String {
    let key = &schema.key().name;
    format!("{} = :{}", key, key)
}

pub fn insert_sql(schema: &Schema) -> String {
    let placeholders = schema
        .columns()
        .iter()
        .map(|c| format!(":{}", c.name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ( {} ) VALUES ( {} )",
        schema.table(),
        column_names(schema.columns()),
        placeholders
    )
}

pub fn select_sql(schema: &Schema) -> String {
    format!("SELECT {} FROM {}", column_names(schema.columns()), schema.table())
}

pub fn update_sql(schema: &Schema) -> String {
    format!(
        "UPDATE {} SET {} WHERE {}",
        schema.table(),
        assignments(&schema.columns()[1..]),
        key_predicate(schema)
    )
}

pub fn delete_sql(schema: &Schema) -> String {
    format!("DELETE FROM {} WHERE {}", schema.table(), key_predicate(schema))
}

/// Renders `value` as an inline SQL literal for raw predicates.
pub fn literal(value: &Value) -> String {
    match value.kind {
        Some(FieldKind::Integer | FieldKind::Float) => value.to_string(),
        Some(FieldKind::Text | FieldKind::Timestamp) => {
            format!("'{}'", value.to_string().replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

/// Drops and recreates the table of `schema`.
pub fn create_table_sql(schema: &Schema) -> String {
    let definitions = schema
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut definition = format!("{} {}", c.name, c.kind.sql_type());
            match (i, c.is_foreign()) {
                (0, true) => {
                    definition.push_str(" UNIQUE NOT NULL REFERENCES ");
                    definition.push_str(&c.foreign_table);
                }
                (0, false) => definition.push_str(" PRIMARY KEY NOT NULL"),
                (_, true) => {
                    definition.push_str(" REFERENCES ");
                    definition.push_str(&c.foreign_table);
                }
                (_, false) => {}
            }
            definition
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ( {definitions} );",
        table = schema.table()
    )
}

/// Synthesized INSERT, SELECT and UPDATE text keyed by table name, filled on
/// first use and kept for the owner's lifetime.
#[derive(Debug, Default)]
pub struct StatementCache {
    inserts: HashMap<&'static str, String>,
    selects: HashMap<&'static str, String>,
    updates: HashMap<&'static str, String>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: &Schema) -> &str {
        self.inserts
            .entry(schema.table())
            .or_insert_with(|| insert_sql(schema))
    }

    pub fn select(&mut self, schema: &Schema) -> &str {
        self.selects
            .entry(schema.table())
            .or_insert_with(|| select_sql(schema))
    }

    pub fn update(&mut self, schema: &Schema) -> &str {
        self.updates
            .entry(schema.table())
            .or_insert_with(|| update_sql(schema))
    }

    /// Number of cached statements across all kinds.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.selects.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

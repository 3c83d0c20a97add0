///
/// # Mapper
///
/// The execution engine. A `Mapper` turns records into INSERT, SELECT, UPDATE
/// and DELETE statements, runs them against the configured SQLite database and
/// decodes result rows back into records.
///
/// ## Connection lifecycle
///
/// Every single-record operation opens its own connection, enables foreign key
/// enforcement when configured, prepares, binds, steps, finalizes and closes.
/// Every batch operation does the same on one connection inside one
/// transaction: either every record is written or none is. Statements inside a
/// batch are prepared once per run of consecutive records sharing a table.
///
/// ## Keys
///
/// The zeroth column of a record is its key. `save` leaves an integer key of
/// zero unbound, so SQLite assigns one, and writes the assigned key back into
/// the record. In a batch the write-back happens only after the transaction
/// commits.
///
/// ## State
///
/// A mapper owns its statement cache and, with the `reconcile` feature, the
/// set of tables whose live layout has already been checked. Both live as
/// long as the mapper. Operations take `&mut self`.
///

use std::borrow::Cow;
#[cfg(feature = "reconcile")]
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::slice;
use std::sync::Arc;

use storm_core::{Record, Result, Retrievable, Schema, StormError, Value, registry};
use tracing::{debug, warn};

use crate::config::MapperConfig;
use crate::sql::{self, StatementCache};
use crate::store::{Connection, Row, Statement, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Insert,
    Update,
    Delete,
}

impl Write {
    fn operation(self, batch: bool) -> &'static str {
        match (self, batch) {
            (Write::Insert, false) => "save",
            (Write::Insert, true) => "save_many",
            (Write::Update, false) => "update",
            (Write::Update, true) => "update_many",
            (Write::Delete, false) => "delete",
            (Write::Delete, true) => "delete_many",
        }
    }

    fn sql<'c>(self, cache: &'c mut StatementCache, schema: &Schema) -> Cow<'c, str> {
        match self {
            Write::Insert => Cow::Borrowed(cache.insert(schema)),
            Write::Update => Cow::Borrowed(cache.update(schema)),
            Write::Delete => Cow::Owned(sql::delete_sql(schema)),
        }
    }

    /// Returns whether the key was left for the store to assign.
    fn bind(self, stmt: &mut Statement<'_>, values: &[Value]) -> StoreResult<bool> {
        match self {
            Write::Insert => {
                let auto_key = values[0].is_zero_key();
                let bound = if auto_key { &values[1..] } else { values };
                for value in bound {
                    stmt.bind(value)?;
                }
                Ok(auto_key)
            }
            Write::Update => {
                for value in values {
                    stmt.bind(value)?;
                }
                Ok(false)
            }
            Write::Delete => {
                stmt.bind(&values[0])?;
                Ok(false)
            }
        }
    }
}

/// Decodes every column of `row` into `record`, in schema order. A column
/// that fails to read or parse leaves `record` untouched.
fn decode(
    row: &Row<'_, '_>,
    schema: &Schema,
    record: &mut dyn Retrievable,
    operation: &'static str,
) -> Result<()> {
    let raw = schema
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| row.column_raw(index, column.kind))
        .collect::<StoreResult<Vec<_>>>()
        .map_err(|e| e.during(operation, schema.table()))?;

    let fields: Vec<(&str, &[u8])> = schema
        .columns()
        .iter()
        .zip(&raw)
        .map(|(column, bytes)| (column.name.as_str(), bytes.as_slice()))
        .collect();
    record.set_values(&fields)
}

#[derive(Debug)]
pub struct Mapper {
    config: MapperConfig,
    statements: StatementCache,
    #[cfg(feature = "reconcile")]
    reconciled: HashSet<&'static str>,
}

impl Default for Mapper {
    fn default() -> Self {
        Self::with_config(MapperConfig::default())
    }
}

impl Mapper {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self::with_config(MapperConfig::for_path(database))
    }

    pub fn with_config(config: MapperConfig) -> Self {
        Self {
            config,
            statements: StatementCache::new(),
            #[cfg(feature = "reconcile")]
            reconciled: HashSet::new(),
        }
    }

    pub fn from_config_path(path: &Path) -> Result<Self> {
        Ok(Self::with_config(MapperConfig::from_path(path)?))
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn database(&self) -> &Path {
        &self.config.database.path
    }

    fn open(&self) -> Result<Connection> {
        let database = &self.config.database;
        Connection::open(&database.path, database.create_if_missing)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = self.open()?;
        if self.config.database.foreign_keys {
            conn.enable_foreign_keys().map_err(|e| StormError::Connection {
                path: conn.path().to_path_buf(),
                reason: e.reason,
            })?;
        }
        Ok(conn)
    }

    fn disconnect(conn: Connection) {
        if let Err(e) = conn.close() {
            warn!(error = %e, "failed to close connection");
        }
    }

    /// Inserts `record`. A zero integer key is assigned by the store and
    /// written back.
    pub fn save(&mut self, record: &mut dyn Retrievable) -> Result<()> {
        self.write_one(Write::Insert, record)
    }

    /// Inserts every record in one transaction.
    pub fn save_many(&mut self, records: &mut [&mut dyn Retrievable]) -> Result<()> {
        self.write_many(Write::Insert, records)
    }

    pub fn update(&mut self, record: &mut dyn Retrievable) -> Result<()> {
        self.write_one(Write::Update, record)
    }

    pub fn update_many(&mut self, records: &mut [&mut dyn Retrievable]) -> Result<()> {
        self.write_many(Write::Update, records)
    }

    pub fn delete(&mut self, record: &mut dyn Retrievable) -> Result<()> {
        self.write_one(Write::Delete, record)
    }

    pub fn delete_many(&mut self, records: &mut [&mut dyn Retrievable]) -> Result<()> {
        self.write_many(Write::Delete, records)
    }

    fn write_one(&mut self, write: Write, record: &mut dyn Retrievable) -> Result<()> {
        let operation = write.operation(false);
        let schema = record.schema()?;
        let table = schema.table();
        self.reconcile(slice::from_ref(&schema))?;

        let values = record.get_values()?;
        let conn = self.connect()?;
        debug!(operation, table, "executing");

        let assigned = {
            let mut stmt = conn.prepare(&write.sql(&mut self.statements, &schema))?;
            let auto_key = write
                .bind(&mut stmt, &values)
                .map_err(|e| e.during(operation, table))?;
            stmt.execute().map_err(|e| e.during(operation, table))?;
            stmt.finalize().map_err(|e| e.during(operation, table))?;
            auto_key.then(|| conn.last_inserted_key())
        };
        Self::disconnect(conn);

        if let Some(key) = assigned {
            debug!(table, key, "store assigned key");
            record.set_value(&schema.key().name, &key.to_le_bytes())?;
        }
        Ok(())
    }

    fn write_many(&mut self, write: Write, records: &mut [&mut dyn Retrievable]) -> Result<()> {
        let operation = write.operation(true);
        if records.is_empty() {
            return Err(StormError::EmptyBatch { operation });
        }

        let schemas = records
            .iter()
            .map(|r| r.schema())
            .collect::<Result<Vec<_>>>()?;
        self.reconcile(&schemas)?;
        let values = records
            .iter()
            .map(|r| r.get_values())
            .collect::<Result<Vec<_>>>()?;

        let table = schemas[0].table();
        let conn = self.connect()?;
        conn.execute("BEGIN TRANSACTION")
            .map_err(|e| e.during(operation, table))?;

        let outcome = run_batch(&conn, &mut self.statements, write, &schemas, &values)
            .and_then(|assigned| {
                conn.execute("END TRANSACTION")
                    .map_err(|e| e.during(operation, table))?;
                Ok(assigned)
            });

        let assigned = match outcome {
            Ok(assigned) => assigned,
            Err(e) => {
                if let Err(rollback) = conn.execute("ROLLBACK") {
                    warn!(operation, error = %rollback, "rollback failed");
                }
                Self::disconnect(conn);
                return Err(e);
            }
        };
        Self::disconnect(conn);

        for (index, key) in assigned {
            records[index].set_value(&schemas[index].key().name, &key.to_le_bytes())?;
        }
        Ok(())
    }

    /// Loads the row whose key equals the key currently held by `record`.
    pub fn retrieve_one(&mut self, record: &mut dyn Retrievable) -> Result<()> {
        let schema = record.schema()?;
        let table = schema.table();
        self.reconcile(slice::from_ref(&schema))?;

        let key = record.get_value(&schema.key().name)?;
        let conn = self.connect()?;
        let sql = format!(
            "{} WHERE {}",
            self.statements.select(&schema),
            sql::key_predicate(&schema)
        );

        let found = {
            let mut stmt = conn.prepare(&sql)?;
            stmt.bind(&key).map_err(|e| e.during("retrieve_one", table))?;
            let mut rows = stmt.query();
            match rows.step().map_err(|e| e.during("retrieve_one", table))? {
                Some(row) => {
                    decode(&row, &schema, record, "retrieve_one")?;
                    true
                }
                None => false,
            }
        };
        Self::disconnect(conn);

        if !found {
            return Err(StormError::NotFound {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Loads every `T` matching the raw SQL `predicate`, in store order. An
    /// empty predicate matches every row.
    pub fn retrieve_many<T: Record>(&mut self, predicate: &str) -> Result<Vec<T>> {
        let schema = registry::<T>()?.schema();
        let table = schema.table();
        self.reconcile(slice::from_ref(&schema))?;

        let conn = self.connect()?;
        let select = self.statements.select(&schema);
        let sql = if predicate.trim().is_empty() {
            select.to_string()
        } else {
            format!("{} WHERE {}", select, predicate)
        };

        let records = {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query();
            let mut records = Vec::new();
            while let Some(row) = rows.step().map_err(|e| e.during("retrieve_many", table))? {
                let mut record = T::default();
                decode(&row, &schema, &mut record, "retrieve_many")?;
                records.push(record);
            }
            records
        };
        Self::disconnect(conn);

        debug!(table, count = records.len(), "retrieved");
        Ok(records)
    }

    /// Loads every `T` whose foreign key references `parent`. Empty without
    /// querying when `T` declares no column referencing the parent's table.
    pub fn retrieve_children<T: Record>(&mut self, parent: &dyn Retrievable) -> Result<Vec<T>> {
        let schema = registry::<T>()?.schema();
        let Some(column) = schema.foreign_key_to(parent.table_name()) else {
            debug!(
                table = schema.table(),
                parent = parent.table_name(),
                "no column references parent"
            );
            return Ok(Vec::new());
        };

        let parent_key = parent.get_value(&parent.schema()?.key().name)?;
        let predicate = format!("{} = {}", column.name, sql::literal(&parent_key));
        self.retrieve_many(&predicate)
    }

    /// Whether the live layout of `table` has been checked by this mapper.
    #[cfg(feature = "reconcile")]
    pub fn is_reconciled(&self, table: &str) -> bool {
        self.reconciled.contains(table)
    }

    #[cfg(feature = "reconcile")]
    fn reconcile(&mut self, schemas: &[Arc<Schema>]) -> Result<()> {
        let mut pending: Vec<&Schema> = Vec::new();
        for schema in schemas {
            let table = schema.table();
            if !self.reconciled.contains(table) && !pending.iter().any(|p| p.table() == table) {
                pending.push(schema);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let conn = self.open()?;
        for schema in pending {
            crate::reconcile::reconcile(&conn, schema)?;
            self.reconciled.insert(schema.table());
        }
        Self::disconnect(conn);
        Ok(())
    }

    #[cfg(not(feature = "reconcile"))]
    fn reconcile(&mut self, _schemas: &[Arc<Schema>]) -> Result<()> {
        Ok(())
    }
}

/// Executes one batch inside an open transaction; returns the keys the
/// store assigned, by record index.
fn run_batch(
    conn: &Connection,
    statements: &mut StatementCache,
    write: Write,
    schemas: &[Arc<Schema>],
    values: &[Vec<Value>],
) -> Result<Vec<(usize, i64)>> {
    let operation = write.operation(true);
    let mut assigned = Vec::new();
    let mut offset = 0;

    for run in schemas.chunk_by(|a, b| a.table() == b.table()) {
        let table = run[0].table();
        debug!(operation, table, records = run.len(), "batch run");

        let mut stmt = conn.prepare(&write.sql(statements, &run[0]))?;
        for (index, row) in values.iter().enumerate().skip(offset).take(run.len()) {
            let auto_key = write
                .bind(&mut stmt, row)
                .map_err(|e| e.during(operation, table))?;
            stmt.execute().map_err(|e| e.during(operation, table))?;
            stmt.clear_bindings();
            if auto_key {
                assigned.push((index, conn.last_inserted_key()));
            }
        }
        stmt.finalize().map_err(|e| e.during(operation, table))?;
        offset += run.len();
    }

    Ok(assigned)
}

///
/// # storm-core — Mapping machinery for the storm object-relational mapper
///
/// This crate lets plain Rust structs expose their fields as named, typed
/// columns. It knows nothing about SQL; the `storm` crate builds statements
/// and talks to SQLite on top of it.
///
/// - value: the type-erased, small-buffer `Value` snapshot of one column
/// - field: field descriptors, the per-type `FieldRegistry` and `Schema`
/// - record: the `Record` declaration trait and the `Retrievable` capability
/// - json: JSON rendering of any record
/// - errors: the `StormError` taxonomy shared by the workspace
///

pub mod errors;
pub mod field;
pub mod json;
pub mod record;
pub mod value;

pub use errors::{Result, StormError};
pub use field::{ColumnSchema, ColumnType, FieldDescriptor, FieldRegistry, Schema};
pub use json::{to_json, to_json_string};
pub use record::{Record, Retrievable, registry};
pub use value::{FieldContent, FieldKind, INLINE_CAPACITY, TIMESTAMP_FORMAT, Value};

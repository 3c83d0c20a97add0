///
/// Mapper error types.
///
/// All errors that can occur while declaring record fields, converting values
/// and talking to the store. Store failures carry the operation, the table and
/// the underlying SQLite message so callers can tell a dangling foreign key
/// from a duplicate key without parsing text.
///

use std::path::PathBuf;
use thiserror::Error;

use crate::value::FieldKind;

pub type Result<T> = std::result::Result<T, StormError>;

#[derive(Debug, Error)]
pub enum StormError {
    #[error("Cannot open database {path}: {reason}")]
    Connection { path: PathBuf, reason: String },

    #[error("Cannot prepare statement `{sql}`: {reason}")]
    Prepare { sql: String, reason: String },

    #[error("{operation} on '{table}' failed (code {code}): {reason}")]
    Execution {
        operation: &'static str,
        table: String,
        code: i64,
        reason: String,
    },

    #[error("No row in '{table}' with key {key}")]
    NotFound { table: String, key: String },

    #[error("Field '{field}' is not registered on '{table}'")]
    FieldNotFound { table: String, field: String },

    #[error("Cannot parse {input:?} as {kind} for field '{field}'")]
    Parse {
        field: String,
        kind: FieldKind,
        input: String,
    },

    #[error("Invalid field declaration for '{table}': {reason}")]
    Registration { table: String, reason: String },

    #[error("Schema of '{table}' is inconsistent and could not be recreated: {reason}")]
    SchemaInconsistency { table: String, reason: String },

    #[error("{operation} called with no records")]
    EmptyBatch { operation: &'static str },

    #[error("Failed to load config at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl StormError {
    /// SQLite extended result code for store failures, `None` otherwise.
    pub fn code(&self) -> Option<i64> {
        match self {
            StormError::Execution { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = StormError::Connection {
            path: PathBuf::from("/tmp/storm.db"),
            reason: "unable to open database file".to_string(),
        };
        assert!(err.to_string().contains("Cannot open database"));
        assert!(err.to_string().contains("/tmp/storm.db"));

        let err = StormError::Execution {
            operation: "save",
            table: "Hosts".to_string(),
            code: 1555,
            reason: "UNIQUE constraint failed: Hosts.host_id".to_string(),
        };
        assert!(err.to_string().contains("save on 'Hosts'"));
        assert!(err.to_string().contains("1555"));
        assert!(err.to_string().contains("UNIQUE constraint failed"));
        assert_eq!(err.code(), Some(1555));

        let err = StormError::NotFound {
            table: "Hosts".to_string(),
            key: "7".to_string(),
        };
        assert!(err.to_string().contains("No row in 'Hosts'"));
        assert!(err.to_string().contains("7"));
        assert_eq!(err.code(), None);

        let err = StormError::Parse {
            field: "price".to_string(),
            kind: FieldKind::Float,
            input: "abc".to_string(),
        };
        assert!(err.to_string().contains("\"abc\""));
        assert!(err.to_string().contains("float"));
        assert!(err.to_string().contains("price"));

        let err = StormError::EmptyBatch {
            operation: "save_many",
        };
        assert!(err.to_string().contains("save_many"));
        assert!(err.to_string().contains("no records"));
    }
}

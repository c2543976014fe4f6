//! Execution errors: dataset binding failures and runtime type faults.
//! Undefined values are never errors; they are `Value::Undefined`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("dataset has a table for unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    #[error("duplicate key {key} in '{entity}' table")]
    DuplicateKey { entity: String, key: i64 },

    #[error("'{entity}' table needs foreign keys to '{parent}' but carries none")]
    MissingForeignKeyColumn { entity: String, parent: String },

    #[error("row {key} of '{entity}' points at missing '{parent}' row {fk}")]
    MissingForeignKey { entity: String, key: i64, parent: String, fk: i64 },

    #[error("column '{column}' of '{entity}' has {got} rows, expected {expected}")]
    RowCountMismatch { entity: String, column: String, expected: usize, got: usize },

    #[error("'{entity}' table has no schema field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("type mismatch in '{at}': expected {expected}, got {got}")]
    TypeMismatch { at: String, expected: &'static str, got: &'static str },

    #[error("empty {op} group in '{node}' and the empty-group policy forbids a default")]
    EmptyAggregate { node: String, op: &'static str },
}

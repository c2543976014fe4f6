//! Compile-time errors.
//!
//! Compilation collects every error it can find and returns the whole set;
//! a failed compile never yields a partial IR.

use thiserror::Error;

use crate::schema::SchemaError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("duplicate declaration of '{name}'")]
    DuplicateDeclaration { name: String },

    #[error("cannot {action} '{target}': no such declaration")]
    UnknownTarget { target: String, action: &'static str },

    #[error("undefined reference '{name}' in '{referrer}'")]
    UndefinedReference { name: String, referrer: String },

    #[error("'{referrer}' reads '{name}' across entity scopes; aggregate over it instead")]
    CrossEntityReference { name: String, referrer: String },

    #[error("'{referrer}' is scoped to unknown entity '{entity}'")]
    UnknownEntity { entity: String, referrer: String },

    #[error("scalar '{referrer}' cannot aggregate over '{child}'")]
    ScalarAggregation { referrer: String, child: String },

    #[error("'{referrer}' aggregates over '{child}', which is not a descendant of '{parent}'")]
    InvalidAggregation { referrer: String, child: String, parent: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

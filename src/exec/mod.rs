//! Vectorized execution of compiled IR over relational datasets.

pub mod data;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod value;

pub use data::{Dataset, Table};
pub use engine::{
    execute, execute_many, execute_many_with, execute_with, EntityResults, ExecOptions,
    ExtremumPolicy, Run,
};
pub use error::ExecutionError;
pub use ledger::Column;
pub use value::{BracketSchedule, Value};

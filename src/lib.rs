//! Compiler and vectorized executor for time-varying rule formulas.
//!
//! Rule text declares variables and parameters whose formulas change over
//! time: base clauses carry effective intervals, amendments overlay new
//! clauses (optionally gated on the date they became known), repeals clear
//! them. Compiling for a given `(effective_as_of, known_as_of)` pair
//! resolves every name to the clause in force, resolves references across
//! the declared entity hierarchy, and emits an immutable topologically
//! ordered IR. The executor then evaluates that IR column-wise over
//! relational datasets, one value per entity row, with undefined as a
//! first-class sentinel rather than an error.
//!
//! ```
//! use statute_core::{compile_as_of, execute, parse, Dataset, Table, Value};
//!
//! let module = parse(
//!     "entity person:
//!          income: float
//!      variable gov/rate:
//!          from 2024-01-01: 0.25
//!      variable person/tax:
//!          entity: person
//!          type: money
//!          from 2024-01-01: income * gov/rate",
//! )
//! .unwrap();
//! let ir = compile_as_of(&[module], "2024-06-01".parse().unwrap()).unwrap();
//!
//! let data = Dataset::new().with_table(
//!     "person",
//!     Table::new(vec![1, 2]).with_numbers("income", vec![30000.0, 50000.0]),
//! );
//! let run = execute(&ir, &data).unwrap();
//! assert_eq!(run.value("person", 1, "person/tax"), Some(&Value::Number(7500.0)));
//! ```

pub mod ast;
pub mod compile;
pub mod exec;
pub mod parse;
pub mod schema;
pub mod temporal;

pub use compile::{compile, compile_as_of, CompileError, Ir, NodeId};
pub use exec::{
    execute, execute_many, execute_with, Dataset, ExecOptions, ExecutionError, ExtremumPolicy,
    Run, Table, Value,
};
pub use parse::{parse, SyntaxError};
pub use schema::{Schema, SchemaError};

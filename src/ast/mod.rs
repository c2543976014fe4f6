//! Typed abstract syntax tree for the rule language.
//!
//! The AST is plain data: the parser constructs it, the compiler consumes
//! it. No name resolution or evaluation happens at this level.

pub mod decl;
pub mod expr;

pub use decl::{
    AmendDecl, EntityDecl, FieldDecl, Module, ParameterDecl, ParentLink, RepealDecl, ValueClause,
    ValueType, VariableDecl,
};
pub use expr::{AggregateOp, BinaryOp, Builtin, Expr, UnaryOp};

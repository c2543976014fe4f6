//! Formula expressions.

use serde::{Deserialize, Serialize};

/// Binary operators, in source syntax order of precedence (lowest first:
/// `or`, `and`, comparisons, additive, multiplicative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Reductions over a child entity scope, grouped by foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateOp {
    Sum,
    Any,
    Max,
    Min,
}

/// Element-wise builtin functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Builtin {
    Min,
    Max,
    Abs,
    Round,
    Clip,
    /// `defined(x)` — true unless `x` is the undefined sentinel.
    Defined,
    /// Marginal rate of the bracket containing the amount.
    BracketRate,
    /// Piecewise-linear tax over a bracket schedule.
    BracketTax,
}

impl Builtin {
    pub fn arity(&self) -> usize {
        match self {
            Builtin::Abs | Builtin::Round | Builtin::Defined => 1,
            Builtin::Min | Builtin::Max | Builtin::BracketRate | Builtin::BracketTax => 2,
            Builtin::Clip => 3,
        }
    }
}

/// A formula expression tree.
///
/// References are raw names at this stage: a path (`gov/irs/rate`) or a bare
/// field identifier (`income`). The compiler resolves them to node slots or
/// schema fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    /// Bracket schedule literal: sorted (threshold, rate) pairs.
    /// Only legal as a parameter value clause.
    Brackets(Vec<(f64, f64)>),
    Ref(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
    /// `sum(child: body)` — `body` is evaluated in the child entity's scope.
    Aggregate {
        op: AggregateOp,
        entity: String,
        body: Box<Expr>,
    },
}

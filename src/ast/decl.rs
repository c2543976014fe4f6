//! Top-level declarations: variables, parameters, entities, amendments,
//! repeals.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::expr::Expr;

/// Declared type of a variable, parameter, or entity field.
///
/// `Money` values round to the currency minor unit at the output boundary;
/// everything else passes through unrounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Money,
    Rate,
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::Float
    }
}

/// One time-stamped value clause: `from 2024-01-01 [to 2024-12-31]: expr`.
///
/// `to` is inclusive in source; the parser stores the exclusive end
/// (day after) so intervals compose as `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueClause {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub path: String,
    /// Owning entity; `None` means scalar (cardinality one).
    pub entity: Option<String>,
    pub ty: Option<ValueType>,
    pub citation: Option<String>,
    pub clauses: Vec<ValueClause>,
}

/// A parameter is a scalar value series; clauses may carry bracket literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub path: String,
    pub ty: Option<ValueType>,
    pub citation: Option<String>,
    pub clauses: Vec<ValueClause>,
}

/// Foreign-key link to a parent entity: `parent: household via household_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub entity: String,
    pub fk_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDecl {
    pub name: String,
    /// Primary-key field name. Defaults to `id` when no `key:` clause is given.
    pub key: String,
    pub parent: Option<ParentLink>,
    pub fields: Vec<FieldDecl>,
}

/// `amend target:` — overlays replacement clauses onto an existing name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendDecl {
    pub target: String,
    /// Enactment date of the amendment itself. `None` means always known.
    pub known: Option<NaiveDate>,
    pub clauses: Vec<ValueClause>,
}

/// `repeal target: from DATE` — the value is undefined from that date on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepealDecl {
    pub target: String,
    pub from: NaiveDate,
}

/// One parsed source module. Modules are merged by the compiler; the parser
/// performs no cross-module resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub entities: Vec<EntityDecl>,
    pub variables: Vec<VariableDecl>,
    pub parameters: Vec<ParameterDecl>,
    pub amendments: Vec<AmendDecl>,
    pub repeals: Vec<RepealDecl>,
}

//! The compiled intermediate representation.
//!
//! The IR is immutable once produced: a topologically ordered list of
//! resolved nodes, each either a formula over already-resolved predecessors
//! or the undefined sentinel. Variable references are node slot indices and
//! field references are (entity, field) pairs, so the executor never looks a
//! name up by string. External code generators can traverse the same
//! structure without re-deriving dependency order or temporal resolution.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ast::{AggregateOp, BinaryOp, Builtin, UnaryOp, ValueType};
use crate::schema::Schema;

/// A stable slot index into the IR's evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn new(idx: usize) -> Self {
        Self(idx as u32)
    }
}

/// A fully resolved expression: no names, only slots and schema indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RExpr {
    Number(f64),
    Bool(bool),
    /// Sorted (threshold, rate) pairs of a bracket schedule.
    Brackets(Vec<(f64, f64)>),
    /// A previously evaluated IR node.
    Node(NodeId),
    /// An input field column of an entity table.
    Field { entity: u32, field: String },
    Binary {
        op: BinaryOp,
        left: Box<RExpr>,
        right: Box<RExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<RExpr>,
    },
    If {
        cond: Box<RExpr>,
        then: Box<RExpr>,
        otherwise: Box<RExpr>,
    },
    Call {
        func: Builtin,
        args: Vec<RExpr>,
    },
    Aggregate {
        op: AggregateOp,
        /// The child entity whose rows are grouped up to the node's entity.
        entity: u32,
        body: Box<RExpr>,
    },
}

/// What a node evaluates to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeBody {
    /// The clause active at the reference dates, resolved.
    Expr(RExpr),
    /// No interval was active (never declared for the date, or repealed).
    /// Evaluates to the undefined sentinel, not an error.
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrNode {
    pub path: String,
    /// Owning entity index in the schema; `None` for scalar nodes.
    pub entity: Option<u32>,
    pub ty: ValueType,
    pub citation: Option<String>,
    pub body: NodeBody,
    /// Slots this node reads; all strictly precede it in evaluation order.
    pub deps: SmallVec<[NodeId; 4]>,
}

/// The compiled program for one (effective_as_of, known_as_of) pair.
///
/// The path index is derived state, skipped on the wire and rebuilt by
/// deserialization; a round-tripped `Ir` needs no fix-up before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IrData")]
pub struct Ir {
    nodes: Vec<IrNode>,
    pub schema: Schema,
    pub effective_as_of: NaiveDate,
    pub known_as_of: NaiveDate,
    #[serde(skip)]
    index: HashMap<String, NodeId>,
}

#[derive(Deserialize)]
struct IrData {
    nodes: Vec<IrNode>,
    schema: Schema,
    effective_as_of: NaiveDate,
    known_as_of: NaiveDate,
}

impl From<IrData> for Ir {
    fn from(data: IrData) -> Self {
        Ir::new(data.nodes, data.schema, data.effective_as_of, data.known_as_of)
    }
}

impl Ir {
    pub(crate) fn new(
        nodes: Vec<IrNode>,
        schema: Schema,
        effective_as_of: NaiveDate,
        known_as_of: NaiveDate,
    ) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.path.clone(), NodeId::new(i)))
            .collect();
        Ir { nodes, schema, effective_as_of, known_as_of, index }
    }

    /// Nodes in evaluation order.
    pub fn nodes(&self) -> &[IrNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &IrNode {
        &self.nodes[id.index()]
    }

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    pub fn node(&self, path: &str) -> Option<&IrNode> {
        self.lookup(path).map(|id| self.get(id))
    }
}

//! Dense memo of evaluated node columns.

use std::sync::Arc;

use crate::compile::NodeId;
use crate::exec::value::Value;

/// The evaluated values of one node: a single broadcastable value for scalar
/// nodes (and constants), or one value per entity row.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Uniform(Value),
    Many(Arc<Vec<Value>>),
}

impl Column {
    /// The value at `row`; uniforms broadcast to any row.
    pub fn get(&self, row: usize) -> &Value {
        match self {
            Column::Uniform(v) => v,
            Column::Many(vs) => &vs[row],
        }
    }

    /// Materializes to exactly `rows` values.
    pub fn to_rows(&self, rows: usize) -> Vec<Value> {
        match self {
            Column::Uniform(v) => vec![v.clone(); rows],
            Column::Many(vs) => vs.as_ref().clone(),
        }
    }
}

/// Columns indexed by node slot. Evaluation order guarantees a node's
/// dependencies are present before it reads them.
pub(crate) struct Ledger {
    slots: Vec<Option<Column>>,
}

impl Ledger {
    pub fn new(len: usize) -> Self {
        Ledger { slots: vec![None; len] }
    }

    pub fn insert(&mut self, id: NodeId, column: Column) {
        self.slots[id.index()] = Some(column);
    }

    pub fn get(&self, id: NodeId) -> &Column {
        self.slots[id.index()]
            .as_ref()
            .expect("dependencies evaluate before their readers")
    }
}

//! Runtime values.
//!
//! `Undefined` is a first-class sentinel, not an error: it flows through
//! arithmetic and comparisons Kleene-style and surfaces in results. Formulas
//! branch on it with `defined(x)`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A progressive bracket schedule: ascending thresholds with the marginal
/// rate applying from each threshold up to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketSchedule {
    thresholds: Vec<f64>,
    rates: Vec<f64>,
}

impl BracketSchedule {
    /// Builds from (threshold, rate) pairs. Pairs are sorted by threshold;
    /// the parser already guarantees this for literals.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        let mut pairs = pairs.to_vec();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        BracketSchedule {
            thresholds: pairs.iter().map(|p| p.0).collect(),
            rates: pairs.iter().map(|p| p.1).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Marginal rate of the bracket containing `amount`; 0 below the first
    /// threshold.
    pub fn rate_for(&self, amount: f64) -> f64 {
        let mut rate = 0.0;
        for (threshold, r) in self.thresholds.iter().zip(&self.rates) {
            if amount >= *threshold {
                rate = *r;
            } else {
                break;
            }
        }
        rate
    }

    /// Total tax on `amount`: each bracket's rate applied to the slice of
    /// `amount` falling inside it.
    pub fn tax_for(&self, amount: f64) -> f64 {
        let mut tax = 0.0;
        for (i, (&lo, &rate)) in self.thresholds.iter().zip(&self.rates).enumerate() {
            if amount <= lo {
                break;
            }
            let hi = match self.thresholds.get(i + 1) {
                Some(&next) => next.min(amount),
                None => amount,
            };
            tax += (hi - lo) * rate;
        }
        tax
    }
}

/// One runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Brackets(Arc<BracketSchedule>),
    Undefined,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Brackets(_) => "bracket schedule",
            Value::Undefined => "undefined",
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

//! The evaluation engine.
//!
//! Nodes evaluate strictly in IR order into a dense column ledger, so every
//! shared subexpression is computed exactly once. Scalar nodes produce one
//! broadcastable value; entity-scoped nodes produce one value per table row.
//! Money-typed outputs round to the currency minor unit only when the `Run`
//! is assembled; intermediates are never rounded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ast::{AggregateOp, BinaryOp, Builtin, UnaryOp, ValueType};
use crate::compile::{Ir, IrNode, NodeBody, NodeId, RExpr};
use crate::exec::data::{Bound, Dataset};
use crate::exec::error::ExecutionError;
use crate::exec::ledger::{Column, Ledger};
use crate::exec::value::{BracketSchedule, Value};
use crate::schema::Schema;

/// What `max`/`min` of an empty group yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtremumPolicy {
    /// The undefined sentinel.
    #[default]
    Undefined,
    /// The reduction identity: `-inf` for `max`, `+inf` for `min`.
    Identity,
    /// An `EmptyAggregate` error.
    Fail,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    pub empty_extremum: ExtremumPolicy,
}

/// Evaluates one dataset with default options.
pub fn execute(ir: &Ir, data: &Dataset) -> Result<Run, ExecutionError> {
    execute_with(ir, data, ExecOptions::default())
}

pub fn execute_with(ir: &Ir, data: &Dataset, opts: ExecOptions) -> Result<Run, ExecutionError> {
    let bound = Bound::bind(&ir.schema, data)?;
    let mut ledger = Ledger::new(ir.len());
    for (i, node) in ir.nodes().iter().enumerate() {
        let ctx = Ctx { schema: &ir.schema, opts: &opts, bound: &bound, ledger: &ledger, node };
        let column = match &node.body {
            NodeBody::Undefined => Column::Uniform(Value::Undefined),
            NodeBody::Expr(expr) => ctx.eval(expr, node.entity)?,
        };
        ledger.insert(NodeId::new(i), column);
    }
    assemble(ir, &bound, &ledger)
}

/// Evaluates many datasets in parallel, one result per dataset.
pub fn execute_many(ir: &Ir, datasets: &[Dataset]) -> Vec<Result<Run, ExecutionError>> {
    execute_many_with(ir, datasets, ExecOptions::default())
}

pub fn execute_many_with(
    ir: &Ir,
    datasets: &[Dataset],
    opts: ExecOptions,
) -> Vec<Result<Run, ExecutionError>> {
    datasets.par_iter().map(|data| execute_with(ir, data, opts)).collect()
}

/// The result of one execution: scalar values plus per-entity columns, all
/// keyed by variable path. Money-typed values are already rounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// The IR's effective date: the period these values describe.
    pub period: NaiveDate,
    pub scalars: HashMap<String, Value>,
    pub entities: HashMap<String, EntityResults>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResults {
    pub keys: Vec<i64>,
    pub values: HashMap<String, Vec<Value>>,
}

impl Run {
    pub fn scalar(&self, path: &str) -> Option<&Value> {
        self.scalars.get(path)
    }

    pub fn column(&self, entity: &str, path: &str) -> Option<&[Value]> {
        self.entities.get(entity)?.values.get(path).map(Vec::as_slice)
    }

    /// The value of `path` for the row of `entity` with primary key `key`.
    pub fn value(&self, entity: &str, key: i64, path: &str) -> Option<&Value> {
        let results = self.entities.get(entity)?;
        let row = results.keys.iter().position(|&k| k == key)?;
        results.values.get(path)?.get(row)
    }
}

struct Ctx<'a> {
    schema: &'a Schema,
    opts: &'a ExecOptions,
    bound: &'a Bound,
    ledger: &'a Ledger,
    node: &'a IrNode,
}

impl Ctx<'_> {
    fn rows_of(&self, scope: Option<u32>) -> usize {
        match scope {
            Some(e) => self.bound.entity(e as usize).len,
            None => 1,
        }
    }

    fn at(&self) -> &str {
        &self.node.path
    }

    /// Evaluates `expr` to a column over the rows of `scope` (one value when
    /// scalar). The scope starts as the node's entity; each aggregation body
    /// re-enters with its child entity, so nested aggregations group to the
    /// scope they appear in, not to the node's own entity.
    fn eval(&self, expr: &RExpr, scope: Option<u32>) -> Result<Column, ExecutionError> {
        let rows = self.rows_of(scope);
        match expr {
            RExpr::Number(n) => Ok(Column::Uniform(Value::Number(*n))),
            RExpr::Bool(b) => Ok(Column::Uniform(Value::Bool(*b))),
            RExpr::Brackets(pairs) => Ok(Column::Uniform(Value::Brackets(Arc::new(
                BracketSchedule::from_pairs(pairs),
            )))),
            RExpr::Node(id) => Ok(self.ledger.get(*id).clone()),
            RExpr::Field { entity, field } => {
                match self.bound.entity(*entity as usize).columns.get(field) {
                    Some(column) => Ok(Column::Many(column.clone())),
                    None => Ok(Column::Uniform(Value::Undefined)),
                }
            }
            RExpr::Binary { op, left, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                zip2(&l, &r, rows, |a, b| binary(*op, a, b, self.at()))
            }
            RExpr::Unary { op, operand } => {
                let v = self.eval(operand, scope)?;
                map1(&v, rows, |a| unary(*op, a, self.at()))
            }
            RExpr::If { cond, then, otherwise } => {
                let c = self.eval(cond, scope)?;
                let t = self.eval(then, scope)?;
                let o = self.eval(otherwise, scope)?;
                zip3(&c, &t, &o, rows, |c, t, o| select(c, t, o, self.at()))
            }
            RExpr::Call { func, args } => self.call(*func, args, scope),
            RExpr::Aggregate { op, entity, body } => {
                self.aggregate(*op, *entity as usize, body, scope)
            }
        }
    }

    fn call(
        &self,
        func: Builtin,
        args: &[RExpr],
        scope: Option<u32>,
    ) -> Result<Column, ExecutionError> {
        let at = self.at();
        let rows = self.rows_of(scope);
        match func {
            Builtin::Defined => {
                let v = self.eval(&args[0], scope)?;
                map1(&v, rows, |a| Ok(Value::Bool(a.is_defined())))
            }
            Builtin::Abs => {
                let v = self.eval(&args[0], scope)?;
                map1(&v, rows, |a| numeric1(a, f64::abs, at))
            }
            Builtin::Round => {
                let v = self.eval(&args[0], scope)?;
                map1(&v, rows, |a| numeric1(a, f64::round, at))
            }
            Builtin::Min => {
                let a = self.eval(&args[0], scope)?;
                let b = self.eval(&args[1], scope)?;
                zip2(&a, &b, rows, |x, y| numeric2(x, y, f64::min, at))
            }
            Builtin::Max => {
                let a = self.eval(&args[0], scope)?;
                let b = self.eval(&args[1], scope)?;
                zip2(&a, &b, rows, |x, y| numeric2(x, y, f64::max, at))
            }
            Builtin::Clip => {
                let x = self.eval(&args[0], scope)?;
                let lo = self.eval(&args[1], scope)?;
                let hi = self.eval(&args[2], scope)?;
                zip3(&x, &lo, &hi, rows, |x, lo, hi| {
                    let clamped = numeric2(x, lo, f64::max, at)?;
                    numeric2(&clamped, hi, f64::min, at)
                })
            }
            Builtin::BracketRate => {
                let s = self.eval(&args[0], scope)?;
                let amount = self.eval(&args[1], scope)?;
                zip2(&s, &amount, rows, |s, a| bracket(s, a, BracketSchedule::rate_for, at))
            }
            Builtin::BracketTax => {
                let s = self.eval(&args[0], scope)?;
                let amount = self.eval(&args[1], scope)?;
                zip2(&s, &amount, rows, |s, a| bracket(s, a, BracketSchedule::tax_for, at))
            }
        }
    }

    /// Groups child rows by the foreign-key chain up to the enclosing scope
    /// and reduces each group.
    fn aggregate(
        &self,
        op: AggregateOp,
        child: usize,
        body: &RExpr,
        scope: Option<u32>,
    ) -> Result<Column, ExecutionError> {
        let parent = scope.expect("compiler scopes aggregations") as usize;
        let values = self.eval(body, Some(child as u32))?;
        let groups = self.bound.rows_to_ancestor(self.schema, child, parent);
        let parent_rows = self.bound.entity(parent).len;
        let at = self.at();

        let out = match op {
            AggregateOp::Sum => {
                // None marks a group poisoned by an undefined element.
                let mut acc: Vec<Option<f64>> = vec![Some(0.0); parent_rows];
                for (row, &group) in groups.iter().enumerate() {
                    match values.get(row) {
                        Value::Number(n) => {
                            if let Some(total) = &mut acc[group] {
                                *total += n;
                            }
                        }
                        Value::Undefined => acc[group] = None,
                        other => {
                            return Err(ExecutionError::TypeMismatch {
                                at: at.to_string(),
                                expected: "number",
                                got: other.kind(),
                            })
                        }
                    }
                }
                acc.into_iter().map(|a| a.map_or(Value::Undefined, Value::Number)).collect()
            }
            AggregateOp::Any => {
                let mut acc = vec![Value::Bool(false); parent_rows];
                for (row, &group) in groups.iter().enumerate() {
                    match values.get(row) {
                        Value::Bool(true) => acc[group] = Value::Bool(true),
                        Value::Bool(false) => {}
                        Value::Undefined => {
                            if acc[group] == Value::Bool(false) {
                                acc[group] = Value::Undefined;
                            }
                        }
                        other => {
                            return Err(ExecutionError::TypeMismatch {
                                at: at.to_string(),
                                expected: "boolean",
                                got: other.kind(),
                            })
                        }
                    }
                }
                acc
            }
            AggregateOp::Max | AggregateOp::Min => {
                let mut best: Vec<Option<f64>> = vec![None; parent_rows];
                let mut poisoned = vec![false; parent_rows];
                for (row, &group) in groups.iter().enumerate() {
                    match values.get(row) {
                        Value::Number(n) => {
                            best[group] = Some(match best[group] {
                                Some(b) if op == AggregateOp::Max => b.max(*n),
                                Some(b) => b.min(*n),
                                None => *n,
                            });
                        }
                        Value::Undefined => poisoned[group] = true,
                        other => {
                            return Err(ExecutionError::TypeMismatch {
                                at: at.to_string(),
                                expected: "number",
                                got: other.kind(),
                            })
                        }
                    }
                }
                let op_name = if op == AggregateOp::Max { "max" } else { "min" };
                let identity =
                    if op == AggregateOp::Max { f64::NEG_INFINITY } else { f64::INFINITY };
                let mut out = Vec::with_capacity(parent_rows);
                for (b, p) in best.into_iter().zip(poisoned) {
                    out.push(match (b, p) {
                        (_, true) => Value::Undefined,
                        (Some(b), false) => Value::Number(b),
                        (None, false) => match self.opts.empty_extremum {
                            ExtremumPolicy::Undefined => Value::Undefined,
                            ExtremumPolicy::Identity => Value::Number(identity),
                            ExtremumPolicy::Fail => {
                                return Err(ExecutionError::EmptyAggregate {
                                    node: at.to_string(),
                                    op: op_name,
                                })
                            }
                        },
                    });
                }
                out
            }
        };
        Ok(Column::Many(Arc::new(out)))
    }
}

fn map1(
    v: &Column,
    rows: usize,
    f: impl Fn(&Value) -> Result<Value, ExecutionError>,
) -> Result<Column, ExecutionError> {
    match v {
        Column::Uniform(x) => Ok(Column::Uniform(f(x)?)),
        Column::Many(_) => {
            let mut out = Vec::with_capacity(rows);
            for i in 0..rows {
                out.push(f(v.get(i))?);
            }
            Ok(Column::Many(Arc::new(out)))
        }
    }
}

fn zip2(
    a: &Column,
    b: &Column,
    rows: usize,
    f: impl Fn(&Value, &Value) -> Result<Value, ExecutionError>,
) -> Result<Column, ExecutionError> {
    match (a, b) {
        (Column::Uniform(x), Column::Uniform(y)) => Ok(Column::Uniform(f(x, y)?)),
        _ => {
            let mut out = Vec::with_capacity(rows);
            for i in 0..rows {
                out.push(f(a.get(i), b.get(i))?);
            }
            Ok(Column::Many(Arc::new(out)))
        }
    }
}

fn zip3(
    a: &Column,
    b: &Column,
    c: &Column,
    rows: usize,
    f: impl Fn(&Value, &Value, &Value) -> Result<Value, ExecutionError>,
) -> Result<Column, ExecutionError> {
    match (a, b, c) {
        (Column::Uniform(x), Column::Uniform(y), Column::Uniform(z)) => {
            Ok(Column::Uniform(f(x, y, z)?))
        }
        _ => {
            let mut out = Vec::with_capacity(rows);
            for i in 0..rows {
                out.push(f(a.get(i), b.get(i), c.get(i))?);
            }
            Ok(Column::Many(Arc::new(out)))
        }
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value, at: &str) -> Result<Value, ExecutionError> {
    match op {
        BinaryOp::Add => numeric2(a, b, |x, y| x + y, at),
        BinaryOp::Sub => numeric2(a, b, |x, y| x - y, at),
        BinaryOp::Mul => numeric2(a, b, |x, y| x * y, at),
        BinaryOp::Div => numeric2(a, b, |x, y| x / y, at),
        BinaryOp::Lt => compare(a, b, |x, y| x < y, at),
        BinaryOp::Gt => compare(a, b, |x, y| x > y, at),
        BinaryOp::Le => compare(a, b, |x, y| x <= y, at),
        BinaryOp::Ge => compare(a, b, |x, y| x >= y, at),
        BinaryOp::Eq => equality(a, b, false, at),
        BinaryOp::Ne => equality(a, b, true, at),
        BinaryOp::And | BinaryOp::Or => kleene(op, a, b, at),
    }
}

fn numeric2(
    a: &Value,
    b: &Value,
    f: impl Fn(f64, f64) -> f64,
    at: &str,
) -> Result<Value, ExecutionError> {
    match (a, b) {
        (Value::Undefined, _) | (_, Value::Undefined) => Ok(Value::Undefined),
        (Value::Number(x), Value::Number(y)) => Ok(Value::Number(f(*x, *y))),
        (Value::Number(_), other) | (other, _) => Err(ExecutionError::TypeMismatch {
            at: at.to_string(),
            expected: "number",
            got: other.kind(),
        }),
    }
}

fn numeric1(a: &Value, f: impl Fn(f64) -> f64, at: &str) -> Result<Value, ExecutionError> {
    match a {
        Value::Undefined => Ok(Value::Undefined),
        Value::Number(x) => Ok(Value::Number(f(*x))),
        other => Err(ExecutionError::TypeMismatch {
            at: at.to_string(),
            expected: "number",
            got: other.kind(),
        }),
    }
}

fn compare(
    a: &Value,
    b: &Value,
    f: impl Fn(f64, f64) -> bool,
    at: &str,
) -> Result<Value, ExecutionError> {
    match (a, b) {
        (Value::Undefined, _) | (_, Value::Undefined) => Ok(Value::Undefined),
        (Value::Number(x), Value::Number(y)) => Ok(Value::Bool(f(*x, *y))),
        (Value::Number(_), other) | (other, _) => Err(ExecutionError::TypeMismatch {
            at: at.to_string(),
            expected: "number",
            got: other.kind(),
        }),
    }
}

fn equality(a: &Value, b: &Value, negate: bool, at: &str) -> Result<Value, ExecutionError> {
    let eq = match (a, b) {
        (Value::Undefined, _) | (_, Value::Undefined) => return Ok(Value::Undefined),
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (a, b) => {
            return Err(ExecutionError::TypeMismatch {
                at: at.to_string(),
                expected: a.kind(),
                got: b.kind(),
            })
        }
    };
    Ok(Value::Bool(eq != negate))
}

/// Three-valued logic: `false and undefined` is `false`, `true or undefined`
/// is `true`; undefined decides only when a defined operand cannot.
fn kleene(op: BinaryOp, a: &Value, b: &Value, at: &str) -> Result<Value, ExecutionError> {
    for v in [a, b] {
        if !matches!(v, Value::Bool(_) | Value::Undefined) {
            return Err(ExecutionError::TypeMismatch {
                at: at.to_string(),
                expected: "boolean",
                got: v.kind(),
            });
        }
    }
    let dominant = op == BinaryOp::Or; // the value that decides regardless of the other side
    if a.as_bool() == Some(dominant) || b.as_bool() == Some(dominant) {
        return Ok(Value::Bool(dominant));
    }
    if !a.is_defined() || !b.is_defined() {
        return Ok(Value::Undefined);
    }
    Ok(Value::Bool(!dominant))
}

fn unary(op: UnaryOp, a: &Value, at: &str) -> Result<Value, ExecutionError> {
    match op {
        UnaryOp::Neg => numeric1(a, |x| -x, at),
        UnaryOp::Not => match a {
            Value::Undefined => Ok(Value::Undefined),
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(ExecutionError::TypeMismatch {
                at: at.to_string(),
                expected: "boolean",
                got: other.kind(),
            }),
        },
    }
}

fn select(c: &Value, t: &Value, o: &Value, at: &str) -> Result<Value, ExecutionError> {
    match c {
        Value::Bool(true) => Ok(t.clone()),
        Value::Bool(false) => Ok(o.clone()),
        Value::Undefined => Ok(Value::Undefined),
        other => Err(ExecutionError::TypeMismatch {
            at: at.to_string(),
            expected: "boolean",
            got: other.kind(),
        }),
    }
}

fn bracket(
    schedule: &Value,
    amount: &Value,
    f: impl Fn(&BracketSchedule, f64) -> f64,
    at: &str,
) -> Result<Value, ExecutionError> {
    match (schedule, amount) {
        (Value::Undefined, _) | (_, Value::Undefined) => Ok(Value::Undefined),
        (Value::Brackets(s), Value::Number(x)) => Ok(Value::Number(f(s, *x))),
        (Value::Brackets(_), other) => Err(ExecutionError::TypeMismatch {
            at: at.to_string(),
            expected: "number",
            got: other.kind(),
        }),
        (other, _) => Err(ExecutionError::TypeMismatch {
            at: at.to_string(),
            expected: "bracket schedule",
            got: other.kind(),
        }),
    }
}

fn assemble(ir: &Ir, bound: &Bound, ledger: &Ledger) -> Result<Run, ExecutionError> {
    let mut scalars = HashMap::new();
    let mut entities: HashMap<String, EntityResults> = HashMap::new();

    for (i, node) in ir.nodes().iter().enumerate() {
        let column = ledger.get(NodeId::new(i));
        match node.entity {
            None => {
                scalars.insert(node.path.clone(), finalize(column.get(0).clone(), node.ty));
            }
            Some(e) => {
                let rows = bound.entity(e as usize);
                let values = column
                    .to_rows(rows.len)
                    .into_iter()
                    .map(|v| finalize(v, node.ty))
                    .collect();
                entities
                    .entry(ir.schema.entity_at(e as usize).name.clone())
                    .or_insert_with(|| EntityResults {
                        keys: rows.keys.clone(),
                        values: HashMap::new(),
                    })
                    .values
                    .insert(node.path.clone(), values);
            }
        }
    }

    Ok(Run { period: ir.effective_as_of, scalars, entities })
}

/// Money rounds to the minor unit here and nowhere earlier.
fn finalize(v: Value, ty: ValueType) -> Value {
    match (ty, v) {
        (ValueType::Money, Value::Number(n)) => Value::Number((n * 100.0).round() / 100.0),
        (_, v) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_as_of;
    use crate::exec::data::Table;
    use crate::parse::parse;
    use rstest::rstest;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn build(src: &str, effective: &str) -> Ir {
        compile_as_of(&[parse(src).unwrap()], d(effective)).unwrap()
    }

    fn num(run: &Run, path: &str) -> f64 {
        run.scalar(path).unwrap().as_number().unwrap()
    }

    #[test]
    fn scalar_pipeline_end_to_end() {
        let ir = build(
            "variable gov/base:
                 from 2024-01-01: 1000
             variable gov/rate:
                 from 2024-01-01: 0.25
             variable gov/tax:
                 from 2024-01-01: gov/base * gov/rate + min(5, 10)",
            "2024-06-01",
        );
        let run = execute(&ir, &Dataset::new()).unwrap();
        assert_eq!(run.period, d("2024-06-01"));
        assert_eq!(num(&run, "gov/tax"), 255.0);
    }

    #[test]
    fn entity_rows_evaluate_vectorized() {
        let ir = build(
            "entity person:
                 income: float
             variable gov/rate:
                 from 2024-01-01: 0.2
             variable person/tax:
                 entity: person
                 from 2024-01-01: income * gov/rate",
            "2024-06-01",
        );
        let data = Dataset::new().with_table(
            "person",
            Table::new(vec![1, 2, 3]).with_numbers("income", vec![100.0, 250.0, 0.0]),
        );
        let run = execute(&ir, &data).unwrap();
        assert_eq!(run.value("person", 1, "person/tax"), Some(&Value::Number(20.0)));
        assert_eq!(run.value("person", 2, "person/tax"), Some(&Value::Number(50.0)));
        assert_eq!(run.value("person", 3, "person/tax"), Some(&Value::Number(0.0)));
    }

    #[test]
    fn vectorized_run_matches_row_at_a_time_runs() {
        let src = "entity person:
                       income: float
                   variable person/tax:
                       entity: person
                       from 2024-01-01:
                           if income > 100: income * 0.3
                           else: income * 0.1";
        let ir = build(src, "2024-06-01");
        let incomes = [50.0, 100.0, 101.0, 5000.0];

        let batch = Dataset::new().with_table(
            "person",
            Table::new(vec![1, 2, 3, 4]).with_numbers("income", incomes.to_vec()),
        );
        let batch_run = execute(&ir, &batch).unwrap();

        for (i, &income) in incomes.iter().enumerate() {
            let single = Dataset::new()
                .with_table("person", Table::new(vec![9]).with_numbers("income", vec![income]));
            let single_run = execute(&ir, &single).unwrap();
            assert_eq!(
                batch_run.value("person", i as i64 + 1, "person/tax"),
                single_run.value("person", 9, "person/tax"),
            );
        }
    }

    #[test]
    fn sums_group_by_parent_and_empty_group_is_zero() {
        let ir = build(
            "entity household:
                 size: int
             entity person:
                 parent: household via household_id
                 income: float
             variable household/total:
                 entity: household
                 from 2024-01-01: sum(person: income)
             variable household/working:
                 entity: household
                 from 2024-01-01: any(person: income > 0)",
            "2024-06-01",
        );
        let data = Dataset::new()
            .with_table("household", Table::new(vec![10, 20, 30]))
            .with_table(
                "person",
                Table::new(vec![1, 2, 3])
                    .with_parent_keys(vec![10, 10, 20])
                    .with_numbers("income", vec![100.0, 200.0, 0.0]),
            );
        let run = execute(&ir, &data).unwrap();
        assert_eq!(run.value("household", 10, "household/total"), Some(&Value::Number(300.0)));
        assert_eq!(run.value("household", 20, "household/total"), Some(&Value::Number(0.0)));
        // household 30 has no members at all
        assert_eq!(run.value("household", 30, "household/total"), Some(&Value::Number(0.0)));
        assert_eq!(run.value("household", 10, "household/working"), Some(&Value::Bool(true)));
        assert_eq!(run.value("household", 20, "household/working"), Some(&Value::Bool(false)));
        assert_eq!(run.value("household", 30, "household/working"), Some(&Value::Bool(false)));
    }

    #[test]
    fn aggregation_hops_intermediate_entities() {
        let ir = build(
            "entity household:
                 size: int
             entity tax_unit:
                 parent: household via household_id
                 filing: bool
             entity person:
                 parent: tax_unit via tax_unit_id
                 income: float
             variable household/income:
                 entity: household
                 from 2024-01-01: sum(person: income)",
            "2024-06-01",
        );
        let data = Dataset::new()
            .with_table("household", Table::new(vec![1, 2]))
            .with_table(
                "tax_unit",
                Table::new(vec![100, 101, 102]).with_parent_keys(vec![1, 1, 2]),
            )
            .with_table(
                "person",
                Table::new(vec![1000, 1001, 1002])
                    .with_parent_keys(vec![100, 101, 102])
                    .with_numbers("income", vec![10.0, 20.0, 40.0]),
            );
        let run = execute(&ir, &data).unwrap();
        assert_eq!(run.value("household", 1, "household/income"), Some(&Value::Number(30.0)));
        assert_eq!(run.value("household", 2, "household/income"), Some(&Value::Number(40.0)));
    }

    #[test]
    fn nested_aggregations_group_to_their_enclosing_scope() {
        // The inner sum reduces person rows per tax unit; the outer sum then
        // reduces those per-tax-unit values (capped) per household.
        let ir = build(
            "entity household:
                 size: int
             entity tax_unit:
                 parent: household via household_id
                 filing: bool
             entity person:
                 parent: tax_unit via tax_unit_id
                 income: float
             variable household/income:
                 entity: household
                 from 2024-01-01: sum(tax_unit: sum(person: income))
             variable household/capped:
                 entity: household
                 from 2024-01-01: sum(tax_unit: min(sum(person: income), 12))",
            "2024-06-01",
        );
        let data = Dataset::new()
            .with_table("household", Table::new(vec![1, 2]))
            .with_table(
                "tax_unit",
                Table::new(vec![100, 101, 102]).with_parent_keys(vec![1, 1, 2]),
            )
            .with_table(
                "person",
                Table::new(vec![1000, 1001, 1002, 1003])
                    .with_parent_keys(vec![100, 101, 102, 100])
                    .with_numbers("income", vec![10.0, 20.0, 40.0, 5.0]),
            );
        let run = execute(&ir, &data).unwrap();
        // tax units: 100 -> 15, 101 -> 20, 102 -> 40
        assert_eq!(run.value("household", 1, "household/income"), Some(&Value::Number(35.0)));
        assert_eq!(run.value("household", 2, "household/income"), Some(&Value::Number(40.0)));
        // caps apply per tax unit, so this differs from a flat person sum
        assert_eq!(run.value("household", 1, "household/capped"), Some(&Value::Number(24.0)));
        assert_eq!(run.value("household", 2, "household/capped"), Some(&Value::Number(12.0)));
    }

    #[rstest]
    #[case(ExtremumPolicy::Undefined)]
    #[case(ExtremumPolicy::Identity)]
    fn empty_extremum_follows_policy(#[case] policy: ExtremumPolicy) {
        let ir = build(
            "entity household:
                 size: int
             entity person:
                 parent: household via household_id
                 income: float
             variable household/top:
                 entity: household
                 from 2024-01-01: max(person: income)",
            "2024-06-01",
        );
        let data = Dataset::new().with_table("household", Table::new(vec![10]));
        let opts = ExecOptions { empty_extremum: policy };
        let run = execute_with(&ir, &data, opts).unwrap();
        let want = match policy {
            ExtremumPolicy::Undefined => Value::Undefined,
            ExtremumPolicy::Identity => Value::Number(f64::NEG_INFINITY),
            ExtremumPolicy::Fail => unreachable!(),
        };
        assert_eq!(run.value("household", 10, "household/top"), Some(&want));

        let strict = ExecOptions { empty_extremum: ExtremumPolicy::Fail };
        assert!(matches!(
            execute_with(&ir, &data, strict),
            Err(ExecutionError::EmptyAggregate { .. })
        ));
    }

    #[test]
    fn undefined_propagates_and_defined_guards() {
        let ir = build(
            "entity person:
                 income: float
                 deductions: float
             variable person/net:
                 entity: person
                 from 2024-01-01: income - deductions
             variable person/safe_net:
                 entity: person
                 from 2024-01-01:
                     if defined(deductions): income - deductions
                     else: income",
            "2024-06-01",
        );
        // deductions column omitted entirely
        let data = Dataset::new().with_table(
            "person",
            Table::new(vec![1]).with_numbers("income", vec![100.0]),
        );
        let run = execute(&ir, &data).unwrap();
        assert_eq!(run.value("person", 1, "person/net"), Some(&Value::Undefined));
        assert_eq!(run.value("person", 1, "person/safe_net"), Some(&Value::Number(100.0)));
    }

    #[test]
    fn repealed_variable_surfaces_as_undefined_not_error() {
        let modules = [
            parse("variable gov/credit:\n from 2024-01-01: 500").unwrap(),
            parse("repeal gov/credit:\n from 2025-01-01").unwrap(),
        ];
        let ir = compile_as_of(&modules, d("2025-06-01")).unwrap();
        let run = execute(&ir, &Dataset::new()).unwrap();
        assert_eq!(run.scalar("gov/credit"), Some(&Value::Undefined));
    }

    #[test]
    fn bracket_schedule_drives_rate_and_tax() {
        let ir = build(
            "parameter gov/schedule:
                 from 2024-01-01: { 0: 10%, $11,000: 12%, $44,725: 22% }
             entity person:
                 income: float
             variable person/marginal:
                 entity: person
                 from 2024-01-01: bracket_rate(gov/schedule, income)
             variable person/tax:
                 entity: person
                 type: money
                 from 2024-01-01: bracket_tax(gov/schedule, income)",
            "2024-06-01",
        );
        let data = Dataset::new().with_table(
            "person",
            Table::new(vec![1, 2]).with_numbers("income", vec![5000.0, 20000.0]),
        );
        let run = execute(&ir, &data).unwrap();
        assert_eq!(run.value("person", 1, "person/marginal"), Some(&Value::Number(0.10)));
        assert_eq!(run.value("person", 2, "person/marginal"), Some(&Value::Number(0.12)));
        assert_eq!(run.value("person", 1, "person/tax"), Some(&Value::Number(500.0)));
        assert_eq!(run.value("person", 2, "person/tax"), Some(&Value::Number(2180.0)));
    }

    #[test]
    fn money_rounds_only_at_the_boundary() {
        let ir = build(
            "variable gov/a:
                 from 2024-01-01: 0.155
             variable gov/total:
                 type: money
                 from 2024-01-01: gov/a * 2",
            "2024-06-01",
        );
        let run = execute(&ir, &Dataset::new()).unwrap();
        // 0.155 stays unrounded as an intermediate; 0.31 at the boundary
        assert_eq!(num(&run, "gov/a"), 0.155);
        assert_eq!(num(&run, "gov/total"), 0.31);
    }

    #[test]
    fn arithmetic_on_booleans_is_a_type_error() {
        let ir = build(
            "entity person:
                 disabled: bool
             variable person/bad:
                 entity: person
                 from 2024-01-01: disabled + 1",
            "2024-06-01",
        );
        let data = Dataset::new().with_table(
            "person",
            Table::new(vec![1]).with_column("disabled", vec![Value::Bool(true)]),
        );
        assert!(matches!(
            execute(&ir, &data),
            Err(ExecutionError::TypeMismatch { expected: "number", .. })
        ));
    }

    #[rstest]
    #[case(BinaryOp::And, Value::Bool(false), Value::Undefined, Value::Bool(false))]
    #[case(BinaryOp::And, Value::Bool(true), Value::Undefined, Value::Undefined)]
    #[case(BinaryOp::Or, Value::Bool(true), Value::Undefined, Value::Bool(true))]
    #[case(BinaryOp::Or, Value::Bool(false), Value::Undefined, Value::Undefined)]
    fn boolean_logic_is_three_valued(
        #[case] op: BinaryOp,
        #[case] a: Value,
        #[case] b: Value,
        #[case] want: Value,
    ) {
        assert_eq!(kleene(op, &a, &b, "t").unwrap(), want);
        assert_eq!(kleene(op, &b, &a, "t").unwrap(), want);
    }

    #[test]
    fn datasets_execute_independently_in_parallel() {
        let ir = build(
            "entity person:
                 income: float
             variable person/tax:
                 entity: person
                 from 2024-01-01: income * 0.1",
            "2024-06-01",
        );
        let datasets: Vec<Dataset> = (1..=4)
            .map(|i| {
                Dataset::new().with_table(
                    "person",
                    Table::new(vec![1]).with_numbers("income", vec![i as f64 * 100.0]),
                )
            })
            .collect();
        let runs = execute_many(&ir, &datasets);
        assert_eq!(runs.len(), 4);
        for (i, run) in runs.iter().enumerate() {
            let run = run.as_ref().unwrap();
            assert_eq!(
                run.value("person", 1, "person/tax"),
                Some(&Value::Number((i as f64 + 1.0) * 10.0))
            );
        }
    }
}

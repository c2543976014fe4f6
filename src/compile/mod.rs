//! Compiler: parsed modules + reference dates → immutable IR.
//!
//! Pipeline: merge declarations across modules, assemble each name's overlay
//! set and resolve it bitemporally, resolve references to node slots and
//! schema fields, then build the dependency graph and emit nodes in
//! deterministic topological order. Every error found is collected; a failed
//! compile returns the complete set and no IR.

pub mod error;
pub mod ir;

pub use error::CompileError;
pub use ir::{Ir, IrNode, NodeBody, NodeId, RExpr};

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use petgraph::graph::{DiGraph, NodeIndex};
use smallvec::SmallVec;

use crate::ast::{Expr, Module, ValueType};
use crate::schema::Schema;
use crate::temporal::{Overlay, Temporal};

/// Compiles with `known_as_of` defaulted to the effective date: the law as
/// enacted by that same day.
pub fn compile_as_of(modules: &[Module], effective_as_of: NaiveDate) -> Result<Ir, Vec<CompileError>> {
    compile(modules, effective_as_of, effective_as_of)
}

/// Compiles the merged modules for one (effective, knowledge) date pair.
pub fn compile(
    modules: &[Module],
    effective_as_of: NaiveDate,
    known_as_of: NaiveDate,
) -> Result<Ir, Vec<CompileError>> {
    Compiler::new(modules, effective_as_of, known_as_of).run()
}

/// A merged base declaration plus the overlay clauses targeting it.
struct MergedName<'a> {
    entity: Option<&'a str>,
    ty: ValueType,
    citation: Option<&'a str>,
    overlays: Vec<Overlay<&'a Expr>>,
}

struct ProtoNode {
    path: String,
    entity: Option<u32>,
    ty: ValueType,
    citation: Option<String>,
    body: NodeBody,
    deps: SmallVec<[NodeId; 4]>,
}

struct Compiler<'a> {
    modules: &'a [Module],
    effective_as_of: NaiveDate,
    known_as_of: NaiveDate,
    errors: Vec<CompileError>,
}

impl<'a> Compiler<'a> {
    fn new(modules: &'a [Module], effective_as_of: NaiveDate, known_as_of: NaiveDate) -> Self {
        Compiler { modules, effective_as_of, known_as_of, errors: Vec::new() }
    }

    fn run(mut self) -> Result<Ir, Vec<CompileError>> {
        let schema = self.build_schema();
        let names = self.merge();
        let protos = self.resolve_all(&schema, names);
        let order = self.sort(&protos);

        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        // Re-slot nodes into their topological positions.
        let mut final_slot = vec![0u32; protos.len()];
        for (pos, &prov) in order.iter().enumerate() {
            final_slot[prov] = pos as u32;
        }
        let mut nodes: Vec<Option<IrNode>> = (0..protos.len()).map(|_| None).collect();
        for (prov, proto) in protos.into_iter().enumerate() {
            let body = match proto.body {
                NodeBody::Expr(e) => NodeBody::Expr(remap(e, &final_slot)),
                NodeBody::Undefined => NodeBody::Undefined,
            };
            let deps = proto
                .deps
                .iter()
                .map(|d| NodeId(final_slot[d.index()]))
                .collect();
            nodes[final_slot[prov] as usize] = Some(IrNode {
                path: proto.path,
                entity: proto.entity,
                ty: proto.ty,
                citation: proto.citation,
                body,
                deps,
            });
        }
        let nodes = nodes.into_iter().map(|n| n.expect("every slot assigned")).collect();

        Ok(Ir::new(nodes, schema, self.effective_as_of, self.known_as_of))
    }

    fn build_schema(&mut self) -> Schema {
        let decls: Vec<_> = self
            .modules
            .iter()
            .flat_map(|m| m.entities.iter().cloned())
            .collect();
        match Schema::from_decls(&decls) {
            Ok(schema) => schema,
            Err(errs) => {
                self.errors.extend(errs.into_iter().map(CompileError::from));
                Schema::default()
            }
        }
    }

    /// Unions declarations across modules into one namespace. Duplicate base
    /// declarations error; amendments and repeals accumulate as overlays.
    /// `seq` numbers every clause in declaration order — the tie-break when
    /// knowledge dates are equal.
    fn merge(&mut self) -> BTreeMap<&'a str, MergedName<'a>> {
        let mut names: BTreeMap<&'a str, MergedName<'a>> = BTreeMap::new();
        let mut seq = 0usize;

        for module in self.modules {
            for var in &module.variables {
                if names.contains_key(var.path.as_str()) {
                    self.errors
                        .push(CompileError::DuplicateDeclaration { name: var.path.clone() });
                    continue;
                }
                let mut merged = MergedName {
                    entity: var.entity.as_deref(),
                    ty: var.ty.unwrap_or_default(),
                    citation: var.citation.as_deref(),
                    overlays: Vec::new(),
                };
                for clause in &var.clauses {
                    merged.overlays.push(Overlay {
                        known: None,
                        seq: { seq += 1; seq },
                        from: clause.from,
                        to: clause.to,
                        payload: Some(&clause.expr),
                    });
                }
                names.insert(&var.path, merged);
            }
            for param in &module.parameters {
                if names.contains_key(param.path.as_str()) {
                    self.errors
                        .push(CompileError::DuplicateDeclaration { name: param.path.clone() });
                    continue;
                }
                let mut merged = MergedName {
                    entity: None,
                    ty: param.ty.unwrap_or_default(),
                    citation: param.citation.as_deref(),
                    overlays: Vec::new(),
                };
                for clause in &param.clauses {
                    merged.overlays.push(Overlay {
                        known: None,
                        seq: { seq += 1; seq },
                        from: clause.from,
                        to: clause.to,
                        payload: Some(&clause.expr),
                    });
                }
                names.insert(&param.path, merged);
            }
        }

        // Overlay pass: amendments and repeals see the full namespace, so a
        // module order where an amendment precedes its target still works.
        for module in self.modules {
            for amend in &module.amendments {
                let Some(merged) = names.get_mut(amend.target.as_str()) else {
                    self.errors.push(CompileError::UnknownTarget {
                        target: amend.target.clone(),
                        action: "amend",
                    });
                    continue;
                };
                for clause in &amend.clauses {
                    merged.overlays.push(Overlay {
                        known: amend.known,
                        seq: { seq += 1; seq },
                        from: clause.from,
                        to: clause.to,
                        payload: Some(&clause.expr),
                    });
                }
            }
            for repeal in &module.repeals {
                let Some(merged) = names.get_mut(repeal.target.as_str()) else {
                    self.errors.push(CompileError::UnknownTarget {
                        target: repeal.target.clone(),
                        action: "repeal",
                    });
                    continue;
                };
                merged.overlays.push(Overlay {
                    known: None,
                    seq: { seq += 1; seq },
                    from: repeal.from,
                    to: None,
                    payload: None,
                });
            }
        }

        names
    }

    /// Temporal resolution plus reference resolution for every name, in
    /// sorted order so provisional slots are deterministic.
    fn resolve_all(
        &mut self,
        schema: &Schema,
        names: BTreeMap<&'a str, MergedName<'a>>,
    ) -> Vec<ProtoNode> {
        let mut slot_of: HashMap<&'a str, u32> = HashMap::with_capacity(names.len());
        for (i, path) in names.keys().enumerate() {
            slot_of.insert(*path, i as u32);
        }

        // Entity scope per slot, needed before any expression resolves.
        let mut entity_of: Vec<Option<u32>> = Vec::with_capacity(names.len());
        for (path, merged) in &names {
            let entity = match merged.entity {
                Some(name) => match schema.entity_index(name) {
                    Some(idx) => Some(idx as u32),
                    None => {
                        self.errors.push(CompileError::UnknownEntity {
                            entity: name.to_string(),
                            referrer: path.to_string(),
                        });
                        None
                    }
                },
                None => None,
            };
            entity_of.push(entity);
        }

        let mut protos = Vec::with_capacity(names.len());
        for (slot, (path, merged)) in names.into_iter().enumerate() {
            let history = Temporal::assemble(merged.overlays, self.known_as_of);
            let active = history.resolve(self.effective_as_of).copied();

            let (body, deps) = match active {
                Some(expr) => {
                    let mut resolver = Resolver {
                        schema,
                        slot_of: &slot_of,
                        entity_of: &entity_of,
                        referrer: path,
                        errors: &mut self.errors,
                        deps: SmallVec::new(),
                    };
                    let resolved = resolver.resolve(expr, entity_of[slot]);
                    (NodeBody::Expr(resolved), resolver.deps)
                }
                None => (NodeBody::Undefined, SmallVec::new()),
            };

            protos.push(ProtoNode {
                path: path.to_string(),
                entity: entity_of[slot],
                ty: merged.ty,
                citation: merged.citation.map(str::to_string),
                body,
                deps,
            });
        }
        protos
    }

    /// Cycle-detecting depth-first topological sort over the dependency
    /// graph. Cycles are reported with their full path; independent nodes
    /// keep their sorted-name order, so the result is reproducible.
    fn sort(&mut self, protos: &[ProtoNode]) -> Vec<usize> {
        let mut graph: DiGraph<u32, ()> = DiGraph::with_capacity(protos.len(), protos.len());
        for i in 0..protos.len() {
            graph.add_node(i as u32);
        }
        for (i, proto) in protos.iter().enumerate() {
            for dep in &proto.deps {
                graph.add_edge(NodeIndex::new(i), NodeIndex::new(dep.index()), ());
            }
        }

        let mut state = vec![VisitState::None; protos.len()];
        let mut stack = Vec::new();
        let mut order = Vec::with_capacity(protos.len());
        for i in 0..protos.len() {
            if state[i] == VisitState::None {
                self.visit(i, &graph, protos, &mut state, &mut stack, &mut order);
            }
        }
        order
    }

    fn visit(
        &mut self,
        idx: usize,
        graph: &DiGraph<u32, ()>,
        protos: &[ProtoNode],
        state: &mut Vec<VisitState>,
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) {
        state[idx] = VisitState::Visiting;
        stack.push(idx);

        for neighbor in graph.neighbors(NodeIndex::new(idx)) {
            let n = neighbor.index();
            match state[n] {
                VisitState::Visited => {}
                VisitState::None => self.visit(n, graph, protos, state, stack, order),
                VisitState::Visiting => {
                    // The cycle is the stack suffix starting at the neighbor,
                    // closed back on itself.
                    let start = stack.iter().position(|&s| s == n).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|&s| protos[s].path.clone()).collect();
                    path.push(protos[n].path.clone());
                    self.errors.push(CompileError::Cycle { path });
                }
            }
        }

        stack.pop();
        state[idx] = VisitState::Visited;
        order.push(idx);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting,
    Visited,
}

/// Resolves raw names in one formula to slots and fields, collecting the
/// node's dependency list along the way.
struct Resolver<'a, 'b> {
    schema: &'b Schema,
    slot_of: &'b HashMap<&'a str, u32>,
    entity_of: &'b [Option<u32>],
    referrer: &'a str,
    errors: &'b mut Vec<CompileError>,
    deps: SmallVec<[NodeId; 4]>,
}

impl<'a, 'b> Resolver<'a, 'b> {
    fn resolve(&mut self, expr: &Expr, scope: Option<u32>) -> RExpr {
        match expr {
            Expr::Number(n) => RExpr::Number(*n),
            Expr::Bool(b) => RExpr::Bool(*b),
            Expr::Brackets(pairs) => RExpr::Brackets(pairs.clone()),
            Expr::Ref(name) => self.resolve_ref(name, scope),
            Expr::Binary { op, left, right } => RExpr::Binary {
                op: *op,
                left: Box::new(self.resolve(left, scope)),
                right: Box::new(self.resolve(right, scope)),
            },
            Expr::Unary { op, operand } => RExpr::Unary {
                op: *op,
                operand: Box::new(self.resolve(operand, scope)),
            },
            Expr::If { cond, then, otherwise } => RExpr::If {
                cond: Box::new(self.resolve(cond, scope)),
                then: Box::new(self.resolve(then, scope)),
                otherwise: Box::new(self.resolve(otherwise, scope)),
            },
            Expr::Call { func, args } => RExpr::Call {
                func: *func,
                args: args.iter().map(|a| self.resolve(a, scope)).collect(),
            },
            Expr::Aggregate { op, entity, body } => self.resolve_aggregate(*op, entity, body, scope),
        }
    }

    /// Declared names shadow fields; a bare identifier falls back to a field
    /// of the entity in scope.
    fn resolve_ref(&mut self, name: &str, scope: Option<u32>) -> RExpr {
        if let Some(&slot) = self.slot_of.get(name) {
            let target_scope = self.entity_of[slot as usize];
            if target_scope.is_some() && target_scope != scope {
                self.errors.push(CompileError::CrossEntityReference {
                    name: name.to_string(),
                    referrer: self.referrer.to_string(),
                });
                return RExpr::Number(0.0);
            }
            self.deps.push(NodeId(slot));
            return RExpr::Node(NodeId(slot));
        }

        if let Some(entity_idx) = scope {
            let entity = self.schema.entity_at(entity_idx as usize);
            if entity.field(name).is_some() {
                return RExpr::Field { entity: entity_idx, field: name.to_string() };
            }
        }

        self.errors.push(CompileError::UndefinedReference {
            name: name.to_string(),
            referrer: self.referrer.to_string(),
        });
        RExpr::Number(0.0)
    }

    fn resolve_aggregate(
        &mut self,
        op: crate::ast::AggregateOp,
        child: &str,
        body: &Expr,
        scope: Option<u32>,
    ) -> RExpr {
        let Some(parent_idx) = scope else {
            self.errors.push(CompileError::ScalarAggregation {
                referrer: self.referrer.to_string(),
                child: child.to_string(),
            });
            return RExpr::Number(0.0);
        };
        let Some(child_idx) = self.schema.entity_index(child) else {
            self.errors.push(CompileError::UnknownEntity {
                entity: child.to_string(),
                referrer: self.referrer.to_string(),
            });
            return RExpr::Number(0.0);
        };
        let parent_name = &self.schema.entity_at(parent_idx as usize).name;
        if !self.schema.is_descendant(child, parent_name) {
            self.errors.push(CompileError::InvalidAggregation {
                referrer: self.referrer.to_string(),
                child: child.to_string(),
                parent: parent_name.clone(),
            });
            return RExpr::Number(0.0);
        }
        let body = self.resolve(body, Some(child_idx as u32));
        RExpr::Aggregate { op, entity: child_idx as u32, body: Box::new(body) }
    }
}

/// Rewrites provisional slot references to final topological positions.
fn remap(expr: RExpr, final_slot: &[u32]) -> RExpr {
    match expr {
        RExpr::Node(id) => RExpr::Node(NodeId(final_slot[id.index()])),
        RExpr::Binary { op, left, right } => RExpr::Binary {
            op,
            left: Box::new(remap(*left, final_slot)),
            right: Box::new(remap(*right, final_slot)),
        },
        RExpr::Unary { op, operand } => RExpr::Unary {
            op,
            operand: Box::new(remap(*operand, final_slot)),
        },
        RExpr::If { cond, then, otherwise } => RExpr::If {
            cond: Box::new(remap(*cond, final_slot)),
            then: Box::new(remap(*then, final_slot)),
            otherwise: Box::new(remap(*otherwise, final_slot)),
        },
        RExpr::Call { func, args } => RExpr::Call {
            func,
            args: args.into_iter().map(|a| remap(a, final_slot)).collect(),
        },
        RExpr::Aggregate { op, entity, body } => RExpr::Aggregate {
            op,
            entity,
            body: Box::new(remap(*body, final_slot)),
        },
        leaf @ (RExpr::Number(_) | RExpr::Bool(_) | RExpr::Brackets(_) | RExpr::Field { .. }) => leaf,
    }
}

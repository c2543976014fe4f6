//! Relational schema model: entity types, keys, containment.
//!
//! The schema is pure data plus validation. The compiler reads it to check
//! aggregation scopes; the executor reads it to bind tables and group rows.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::{EntityDecl, FieldDecl, ParentLink};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("entity '{name}' declared more than once")]
    DuplicateEntity { name: String },
    #[error("entity '{entity}' names unknown parent '{parent}'")]
    UnknownParent { entity: String, parent: String },
    #[error("containment cycle among entity types: {}", path.join(" -> "))]
    ParentCycle { path: Vec<String> },
}

/// One entity type: primary key, optional parent link, typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub key: String,
    pub parent: Option<ParentLink>,
    pub fields: Vec<FieldDecl>,
}

impl EntityDef {
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Validated forest of entity types, indexed by name.
///
/// The name index is derived state: it is not serialized, and
/// deserialization rebuilds it, so a round-tripped schema is always usable
/// as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SchemaData")]
pub struct Schema {
    entities: Vec<EntityDef>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct SchemaData {
    entities: Vec<EntityDef>,
}

impl From<SchemaData> for Schema {
    fn from(data: SchemaData) -> Self {
        let index = data
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Schema { entities: data.entities, index }
    }
}

impl Schema {
    /// Builds and validates a schema from entity declarations.
    ///
    /// Checks: no duplicate entities, every parent exists, and the
    /// parent-link graph is a forest (no cycles among entity types).
    /// All violations are reported, not just the first.
    pub fn from_decls(decls: &[EntityDecl]) -> Result<Schema, Vec<SchemaError>> {
        let mut errors = Vec::new();
        let mut entities: Vec<EntityDef> = Vec::with_capacity(decls.len());
        let mut index = HashMap::new();

        for decl in decls {
            if index.contains_key(&decl.name) {
                errors.push(SchemaError::DuplicateEntity { name: decl.name.clone() });
                continue;
            }
            index.insert(decl.name.clone(), entities.len());
            entities.push(EntityDef {
                name: decl.name.clone(),
                key: decl.key.clone(),
                parent: decl.parent.clone(),
                fields: decl.fields.clone(),
            });
        }

        for entity in &entities {
            if let Some(link) = &entity.parent {
                if !index.contains_key(&link.entity) {
                    errors.push(SchemaError::UnknownParent {
                        entity: entity.name.clone(),
                        parent: link.entity.clone(),
                    });
                }
            }
        }

        // Cycle check over parent links. Each entity has at most one parent
        // by construction, so walking up from each node is enough.
        for entity in &entities {
            let mut path = vec![entity.name.clone()];
            let mut current = entity;
            while let Some(link) = &current.parent {
                let Some(&next_idx) = index.get(&link.entity) else { break };
                if link.entity == entity.name {
                    path.push(link.entity.clone());
                    errors.push(SchemaError::ParentCycle { path });
                    break;
                }
                if path.contains(&link.entity) {
                    // Cycle exists but does not pass through `entity`; it is
                    // reported when the walk starts inside it.
                    break;
                }
                path.push(link.entity.clone());
                current = &entities[next_idx];
            }
        }

        if errors.is_empty() {
            Ok(Schema { entities, index })
        } else {
            Err(errors)
        }
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.index.get(name).map(|&i| &self.entities[i])
    }

    pub fn entity_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn entity_at(&self, idx: usize) -> &EntityDef {
        &self.entities[idx]
    }

    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Foreign-key hops from `child` up to `ancestor`, outermost first.
    /// `None` when `ancestor` is not reachable via parent links.
    pub fn chain_to_ancestor(&self, child: &str, ancestor: &str) -> Option<Vec<ParentLink>> {
        let mut hops = Vec::new();
        let mut current = self.entity(child)?;
        while current.name != ancestor {
            let link = current.parent.as_ref()?;
            hops.push(link.clone());
            current = self.entity(&link.entity)?;
        }
        Some(hops)
    }

    /// Whether `child` is a strict descendant of `ancestor` via foreign keys.
    pub fn is_descendant(&self, child: &str, ancestor: &str) -> bool {
        child != ancestor
            && self
                .chain_to_ancestor(child, ancestor)
                .map_or(false, |hops| !hops.is_empty())
    }
}

//! Input datasets and their bound, validated form.
//!
//! A `Dataset` is plain data: one table per entity type. `Bound` is the
//! validated view the engine evaluates against: keys de-duplicated, foreign
//! keys resolved to row indices, field columns checked against the schema.
//! All validation happens before the first node evaluates.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::ValueType;
use crate::exec::error::ExecutionError;
use crate::exec::value::Value;
use crate::schema::Schema;

/// Rows of one entity type: primary keys, optional foreign keys to the
/// parent, named field columns. Columns are parallel to `keys`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub keys: Vec<i64>,
    pub parent_keys: Option<Vec<i64>>,
    pub columns: HashMap<String, Vec<Value>>,
}

impl Table {
    pub fn new(keys: Vec<i64>) -> Self {
        Table { keys, parent_keys: None, columns: HashMap::new() }
    }

    pub fn with_parent_keys(mut self, parent_keys: Vec<i64>) -> Self {
        self.parent_keys = Some(parent_keys);
        self
    }

    pub fn with_column(mut self, name: &str, values: Vec<Value>) -> Self {
        self.columns.insert(name.to_string(), values);
        self
    }

    /// Numeric column shorthand.
    pub fn with_numbers(self, name: &str, values: Vec<f64>) -> Self {
        self.with_column(name, values.into_iter().map(Value::Number).collect())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// One population to evaluate: tables keyed by entity type name. Entities
/// with no table are treated as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub tables: HashMap<String, Table>,
}

impl Dataset {
    pub fn new() -> Self {
        Dataset::default()
    }

    pub fn with_table(mut self, entity: &str, table: Table) -> Self {
        self.tables.insert(entity.to_string(), table);
        self
    }
}

/// One entity's validated rows.
#[derive(Debug)]
pub(crate) struct BoundEntity {
    pub len: usize,
    pub keys: Vec<i64>,
    /// Row index of this row's parent, parallel to `keys`.
    pub parent_row: Option<Vec<usize>>,
    /// Field columns declared in the schema and present in the table.
    /// Absent fields read as `Undefined`.
    pub columns: HashMap<String, Arc<Vec<Value>>>,
}

/// A dataset validated against a schema, indexed like `Schema::entities`.
#[derive(Debug)]
pub(crate) struct Bound {
    entities: Vec<BoundEntity>,
}

impl Bound {
    pub fn bind(schema: &Schema, data: &Dataset) -> Result<Bound, ExecutionError> {
        for name in data.tables.keys() {
            if schema.entity(name).is_none() {
                return Err(ExecutionError::UnknownEntity { entity: name.clone() });
            }
        }

        let empty = Table::default();

        // First pass: keys and field columns, so key indices exist for every
        // entity before any foreign key resolves.
        let mut entities = Vec::with_capacity(schema.len());
        let mut key_index: Vec<HashMap<i64, usize>> = Vec::with_capacity(schema.len());
        for def in schema.entities() {
            let table = data.tables.get(&def.name).unwrap_or(&empty);
            let len = table.keys.len();

            let mut index = HashMap::with_capacity(len);
            for (row, &key) in table.keys.iter().enumerate() {
                if index.insert(key, row).is_some() {
                    return Err(ExecutionError::DuplicateKey { entity: def.name.clone(), key });
                }
            }

            let mut columns = HashMap::with_capacity(table.columns.len());
            for (name, values) in &table.columns {
                let Some(field) = def.field(name) else {
                    return Err(ExecutionError::UnknownField {
                        entity: def.name.clone(),
                        field: name.clone(),
                    });
                };
                if values.len() != len {
                    return Err(ExecutionError::RowCountMismatch {
                        entity: def.name.clone(),
                        column: name.clone(),
                        expected: len,
                        got: values.len(),
                    });
                }
                for value in values {
                    check_field_type(&def.name, name, field.ty, value)?;
                }
                columns.insert(name.clone(), Arc::new(values.clone()));
            }

            entities.push(BoundEntity { len, keys: table.keys.clone(), parent_row: None, columns });
            key_index.push(index);
        }

        // Second pass: resolve foreign keys against the parent's key index.
        for (idx, def) in schema.entities().iter().enumerate() {
            let Some(link) = &def.parent else { continue };
            let table = data.tables.get(&def.name).unwrap_or(&empty);
            if table.is_empty() {
                continue;
            }
            let Some(parent_keys) = &table.parent_keys else {
                return Err(ExecutionError::MissingForeignKeyColumn {
                    entity: def.name.clone(),
                    parent: link.entity.clone(),
                });
            };
            if parent_keys.len() != table.len() {
                return Err(ExecutionError::RowCountMismatch {
                    entity: def.name.clone(),
                    column: link.fk_field.clone(),
                    expected: table.len(),
                    got: parent_keys.len(),
                });
            }
            let parent_idx = schema
                .entity_index(&link.entity)
                .expect("schema validated parent links");
            let mut rows = Vec::with_capacity(parent_keys.len());
            for (row, &fk) in parent_keys.iter().enumerate() {
                let Some(&parent_row) = key_index[parent_idx].get(&fk) else {
                    return Err(ExecutionError::MissingForeignKey {
                        entity: def.name.clone(),
                        key: table.keys[row],
                        parent: link.entity.clone(),
                        fk,
                    });
                };
                rows.push(parent_row);
            }
            entities[idx].parent_row = Some(rows);
        }

        Ok(Bound { entities })
    }

    pub fn entity(&self, idx: usize) -> &BoundEntity {
        &self.entities[idx]
    }

    /// Maps each row of `child` to its row in `ancestor`, hopping parent
    /// links. The compiler only emits aggregations over strict descendants,
    /// and binding resolved every hop, so the walk cannot dead-end while
    /// rows remain.
    pub fn rows_to_ancestor(&self, schema: &Schema, child: usize, ancestor: usize) -> Vec<usize> {
        let mut map: Vec<usize> = (0..self.entities[child].len).collect();
        let mut current = child;
        while current != ancestor && !map.is_empty() {
            let link = schema
                .entity_at(current)
                .parent
                .as_ref()
                .expect("aggregation over a validated descendant chain");
            let rows = self.entities[current]
                .parent_row
                .as_ref()
                .expect("foreign keys bound for non-empty child table");
            for m in &mut map {
                *m = rows[*m];
            }
            current = schema
                .entity_index(&link.entity)
                .expect("schema validated parent links");
        }
        map
    }
}

fn check_field_type(
    entity: &str,
    column: &str,
    ty: ValueType,
    value: &Value,
) -> Result<(), ExecutionError> {
    let ok = match ty {
        ValueType::Bool => matches!(value, Value::Bool(_) | Value::Undefined),
        ValueType::Int | ValueType::Float | ValueType::Money | ValueType::Rate => {
            matches!(value, Value::Number(_) | Value::Undefined)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(ExecutionError::TypeMismatch {
            at: format!("{entity}.{column}"),
            expected: if ty == ValueType::Bool { "boolean" } else { "number" },
            got: value.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EntityDecl, FieldDecl, ParentLink};

    fn schema() -> Schema {
        Schema::from_decls(&[
            EntityDecl {
                name: "household".into(),
                key: "id".into(),
                parent: None,
                fields: vec![],
            },
            EntityDecl {
                name: "person".into(),
                key: "id".into(),
                parent: Some(ParentLink { entity: "household".into(), fk_field: "household_id".into() }),
                fields: vec![FieldDecl { name: "income".into(), ty: ValueType::Float }],
            },
        ])
        .unwrap()
    }

    fn person_table() -> Table {
        Table::new(vec![1, 2, 3])
            .with_parent_keys(vec![10, 10, 20])
            .with_numbers("income", vec![100.0, 200.0, 300.0])
    }

    #[test]
    fn binds_and_resolves_foreign_keys() {
        let data = Dataset::new()
            .with_table("household", Table::new(vec![10, 20]))
            .with_table("person", person_table());
        let bound = Bound::bind(&schema(), &data).unwrap();
        let schema = schema();
        let person = schema.entity_index("person").unwrap();
        let household = schema.entity_index("household").unwrap();
        assert_eq!(bound.entity(person).parent_row, Some(vec![0, 0, 1]));
        assert_eq!(bound.rows_to_ancestor(&schema, person, household), vec![0, 0, 1]);
    }

    #[test]
    fn rejects_unknown_table_and_field() {
        let data = Dataset::new().with_table("ghost", Table::new(vec![1]));
        assert!(matches!(
            Bound::bind(&schema(), &data),
            Err(ExecutionError::UnknownEntity { .. })
        ));

        let data = Dataset::new()
            .with_table("household", Table::new(vec![10]))
            .with_table(
                "person",
                Table::new(vec![1]).with_parent_keys(vec![10]).with_numbers("age", vec![30.0]),
            );
        assert!(matches!(
            Bound::bind(&schema(), &data),
            Err(ExecutionError::UnknownField { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let data = Dataset::new().with_table("household", Table::new(vec![10, 10]));
        assert_eq!(
            Bound::bind(&schema(), &data).unwrap_err(),
            ExecutionError::DuplicateKey { entity: "household".into(), key: 10 }
        );
    }

    #[test]
    fn rejects_unresolved_or_missing_foreign_keys() {
        let data = Dataset::new()
            .with_table("household", Table::new(vec![10]))
            .with_table(
                "person",
                Table::new(vec![1]).with_parent_keys(vec![99]).with_numbers("income", vec![1.0]),
            );
        assert!(matches!(
            Bound::bind(&schema(), &data),
            Err(ExecutionError::MissingForeignKey { fk: 99, .. })
        ));

        let data = Dataset::new()
            .with_table("household", Table::new(vec![10]))
            .with_table("person", Table::new(vec![1]).with_numbers("income", vec![1.0]));
        assert!(matches!(
            Bound::bind(&schema(), &data),
            Err(ExecutionError::MissingForeignKeyColumn { .. })
        ));
    }

    #[test]
    fn rejects_short_columns_and_wrong_types() {
        let data = Dataset::new()
            .with_table("household", Table::new(vec![10]))
            .with_table(
                "person",
                Table::new(vec![1, 2]).with_parent_keys(vec![10, 10]).with_numbers("income", vec![1.0]),
            );
        assert!(matches!(
            Bound::bind(&schema(), &data),
            Err(ExecutionError::RowCountMismatch { expected: 2, got: 1, .. })
        ));

        let data = Dataset::new()
            .with_table("household", Table::new(vec![10]))
            .with_table(
                "person",
                Table::new(vec![1])
                    .with_parent_keys(vec![10])
                    .with_column("income", vec![Value::Bool(true)]),
            );
        assert!(matches!(
            Bound::bind(&schema(), &data),
            Err(ExecutionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn missing_table_and_missing_column_read_as_empty_or_undefined() {
        let data = Dataset::new().with_table("household", Table::new(vec![10]));
        let bound = Bound::bind(&schema(), &data).unwrap();
        let schema = schema();
        let person = schema.entity_index("person").unwrap();
        assert_eq!(bound.entity(person).len, 0);
        assert!(bound.entity(person).columns.get("income").is_none());
    }
}

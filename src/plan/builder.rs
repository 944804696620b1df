//! Validating plan construction.
//!
//! One constructor per operator. Each constructor checks schema agreement
//! and expression well-typing against its children, computes the output
//! schema, and returns a frozen node; no partially-valid plan escapes.

use thiserror::Error;

use crate::catalog::Catalog;

use super::expr::{aggregate_result_type, expr_type, AggregateFunc, Expr};
use super::{AggregateSlot, Direction, Operator, ScalarType, Schema, Side};

/// Plan construction errors. These surface to the API caller and never
/// reach the code generator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("unknown relation: {0}")]
    UnknownRelation(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ScalarType,
        found: ScalarType,
    },

    #[error("arity mismatch: expected {expected} values, found {found}")]
    ArityMismatch { expected: usize, found: usize },
}

/// Constructive plan API over a catalog.
pub struct PlanBuilder<'a> {
    catalog: &'a Catalog,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        PlanBuilder { catalog }
    }

    /// Scan of a registered relation; output schema is the relation schema.
    pub fn scan(&self, relation: &str) -> Result<Operator, PlanError> {
        let table = self
            .catalog
            .table_by_name(relation)
            .ok_or_else(|| PlanError::UnknownRelation(relation.to_string()))?;

        let schema = Schema::new(
            table
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.ty))
                .collect(),
        );
        Ok(Operator::Scan {
            table: table.id,
            relation: relation.to_string(),
            schema,
        })
    }

    /// Filter by a boolean predicate; schema passes through.
    pub fn select(&self, child: Operator, predicate: Expr) -> Result<Operator, PlanError> {
        let ty = expr_type(&predicate, child.schema())?;
        if ty != ScalarType::Bool {
            return Err(PlanError::TypeMismatch {
                expected: ScalarType::Bool,
                found: ty,
            });
        }
        let schema = child.schema().clone();
        Ok(Operator::Select {
            child: Box::new(child),
            predicate,
            schema,
        })
    }

    /// Equi-join on named key columns with an explicit output projection.
    pub fn hash_join(
        &self,
        left: Operator,
        right: Operator,
        left_keys: &[&str],
        right_keys: &[&str],
        projection: &[(Side, &str)],
    ) -> Result<Operator, PlanError> {
        if left_keys.len() != right_keys.len() {
            return Err(PlanError::ArityMismatch {
                expected: left_keys.len(),
                found: right_keys.len(),
            });
        }

        let mut lk = Vec::with_capacity(left_keys.len());
        let mut rk = Vec::with_capacity(right_keys.len());
        for (l, r) in left_keys.iter().zip(right_keys) {
            let (li, lt) = find_column(left.schema(), l)?;
            let (ri, rt) = find_column(right.schema(), r)?;
            if lt != rt {
                return Err(PlanError::TypeMismatch {
                    expected: lt,
                    found: rt,
                });
            }
            lk.push(li);
            rk.push(ri);
        }

        let mut proj = Vec::with_capacity(projection.len());
        let mut columns = Vec::with_capacity(projection.len());
        for (side, name) in projection {
            let schema = match side {
                Side::Left => left.schema(),
                Side::Right => right.schema(),
            };
            let (idx, ty) = find_column(schema, name)?;
            proj.push((*side, idx));
            columns.push(((*name).to_string(), ty));
        }

        Ok(Operator::HashJoin {
            left: Box::new(left),
            right: Box::new(right),
            left_keys: lk,
            right_keys: rk,
            projection: proj,
            schema: Schema::new(columns),
        })
    }

    /// Cartesian product; schema is left columns followed by right columns.
    pub fn cross_product(&self, left: Operator, right: Operator) -> Result<Operator, PlanError> {
        let mut columns = left.schema().columns.clone();
        columns.extend(right.schema().columns.iter().cloned());
        Ok(Operator::CrossProduct {
            left: Box::new(left),
            right: Box::new(right),
            schema: Schema::new(columns),
        })
    }

    /// Group by named key columns and compute aggregate slots; schema is the
    /// key columns followed by the aggregate outputs.
    pub fn group_by_aggregate(
        &self,
        child: Operator,
        group_keys: &[&str],
        aggregates: Vec<(String, AggregateFunc, Option<Expr>)>,
    ) -> Result<Operator, PlanError> {
        let mut keys = Vec::with_capacity(group_keys.len());
        let mut columns = Vec::new();
        for name in group_keys {
            let (idx, ty) = find_column(child.schema(), name)?;
            keys.push(idx);
            columns.push(((*name).to_string(), ty));
        }

        let mut slots = Vec::with_capacity(aggregates.len());
        for (name, func, arg) in aggregates {
            let arg_ty = match &arg {
                Some(expr) => Some(expr_type(expr, child.schema())?),
                None => None,
            };
            if func != AggregateFunc::Count && arg.is_none() {
                return Err(PlanError::ArityMismatch {
                    expected: 1,
                    found: 0,
                });
            }
            let result_ty = aggregate_result_type(func, arg_ty)?;
            columns.push((name.clone(), result_ty));
            slots.push(AggregateSlot { name, func, arg });
        }

        Ok(Operator::GroupByAggregate {
            child: Box::new(child),
            group_keys: keys,
            aggregates: slots,
            schema: Schema::new(columns),
        })
    }

    /// Sort by named key columns; schema passes through.
    pub fn order_by(
        &self,
        child: Operator,
        keys: &[(&str, Direction)],
    ) -> Result<Operator, PlanError> {
        let mut resolved = Vec::with_capacity(keys.len());
        for (name, dir) in keys {
            let (idx, ty) = find_column(child.schema(), name)?;
            if !ty.is_numeric() {
                return Err(PlanError::TypeMismatch {
                    expected: ScalarType::I64,
                    found: ty,
                });
            }
            resolved.push((idx, *dir));
        }
        let schema = child.schema().clone();
        Ok(Operator::OrderBy {
            child: Box::new(child),
            keys: resolved,
            schema,
        })
    }

    /// Root sink: print every tuple through the print runtime.
    pub fn output(&self, child: Operator) -> Result<Operator, PlanError> {
        let schema = child.schema().clone();
        Ok(Operator::Output {
            child: Box::new(child),
            schema,
        })
    }
}

fn find_column(schema: &Schema, name: &str) -> Result<(usize, ScalarType), PlanError> {
    schema
        .find(name)
        .ok_or_else(|| PlanError::UnknownColumn(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BinaryOp;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register_table(
            "lineitem",
            vec![
                ("l_orderkey".to_string(), ScalarType::I64, "l_orderkey.col".into()),
                ("l_quantity".to_string(), ScalarType::I32, "l_quantity.col".into()),
                ("l_price".to_string(), ScalarType::F64, "l_price.col".into()),
            ],
        );
        catalog.register_table(
            "orders",
            vec![
                ("o_orderkey".to_string(), ScalarType::I64, "o_orderkey.col".into()),
                ("o_custkey".to_string(), ScalarType::I64, "o_custkey.col".into()),
            ],
        );
        catalog
    }

    #[test]
    fn test_scan_unknown_relation() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        assert!(matches!(
            builder.scan("nation"),
            Err(PlanError::UnknownRelation(_))
        ));
    }

    #[test]
    fn test_select_requires_boolean_predicate() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("lineitem").unwrap();

        let err = builder
            .select(scan, Expr::column("l_quantity"))
            .unwrap_err();
        assert!(matches!(err, PlanError::TypeMismatch { .. }));
    }

    #[test]
    fn test_select_schema_passthrough() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("lineitem").unwrap();
        let scan_schema = scan.schema().clone();

        let select = builder
            .select(
                scan,
                Expr::binary(BinaryOp::Lt, Expr::column("l_quantity"), Expr::IntLiteral(10)),
            )
            .unwrap();
        assert_eq!(select.schema(), &scan_schema);
    }

    #[test]
    fn test_hash_join_key_arity_and_types() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);

        let left = builder.scan("lineitem").unwrap();
        let right = builder.scan("orders").unwrap();
        let err = builder
            .hash_join(left, right, &["l_orderkey", "l_quantity"], &["o_orderkey"], &[])
            .unwrap_err();
        assert!(matches!(err, PlanError::ArityMismatch { .. }));

        let left = builder.scan("lineitem").unwrap();
        let right = builder.scan("orders").unwrap();
        let err = builder
            .hash_join(left, right, &["l_quantity"], &["o_orderkey"], &[])
            .unwrap_err();
        assert!(matches!(err, PlanError::TypeMismatch { .. }));
    }

    #[test]
    fn test_hash_join_projection_schema() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);

        let left = builder.scan("lineitem").unwrap();
        let right = builder.scan("orders").unwrap();
        let join = builder
            .hash_join(
                left,
                right,
                &["l_orderkey"],
                &["o_orderkey"],
                &[(Side::Left, "l_quantity"), (Side::Right, "o_custkey")],
            )
            .unwrap();

        assert_eq!(
            join.schema().columns,
            vec![
                ("l_quantity".to_string(), ScalarType::I32),
                ("o_custkey".to_string(), ScalarType::I64),
            ]
        );
    }

    #[test]
    fn test_group_by_schema() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("lineitem").unwrap();

        let agg = builder
            .group_by_aggregate(
                scan,
                &["l_orderkey"],
                vec![
                    ("cnt".to_string(), AggregateFunc::Count, None),
                    (
                        "total".to_string(),
                        AggregateFunc::Sum,
                        Some(Expr::column("l_quantity")),
                    ),
                ],
            )
            .unwrap();

        assert_eq!(
            agg.schema().columns,
            vec![
                ("l_orderkey".to_string(), ScalarType::I64),
                ("cnt".to_string(), ScalarType::I64),
                ("total".to_string(), ScalarType::I64),
            ]
        );
    }

    #[test]
    fn test_aggregate_without_argument_rejected() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("lineitem").unwrap();

        let err = builder
            .group_by_aggregate(
                scan,
                &[],
                vec![("s".to_string(), AggregateFunc::Sum, None)],
            )
            .unwrap_err();
        assert!(matches!(err, PlanError::ArityMismatch { .. }));
    }

    #[test]
    fn test_order_by_rejects_text_keys() {
        let mut catalog = catalog();
        catalog.register_table(
            "notes",
            vec![("body".to_string(), ScalarType::Text, "body.col".into())],
        );
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("notes").unwrap();

        let err = builder
            .order_by(scan, &[("body", Direction::Ascending)])
            .unwrap_err();
        assert!(matches!(err, PlanError::TypeMismatch { .. }));
    }

    #[test]
    fn test_cross_product_concatenates_schemas() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let left = builder.scan("lineitem").unwrap();
        let right = builder.scan("orders").unwrap();

        let cross = builder.cross_product(left, right).unwrap();
        assert_eq!(cross.schema().len(), 5);
    }
}

//! # Relational Algebra Plan
//!
//! Immutable operator trees with typed output schemas. Plans are produced by
//! the validating builder (`plan::builder`), never constructed piecemeal:
//! every node that exists has already passed schema and type checking.
//!
//! ```text
//! SQL (parser) -> [Plan Builder] -> Operator tree -> Translator Factory
//! ```

pub mod builder;
pub mod expr;

pub use builder::{PlanBuilder, PlanError};
pub use expr::{expr_type, AggregateFunc, BinaryOp, Expr, StringPredicateOp};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::TableId;

/// Scalar types that flow through plans and generated code.
///
/// `Date` is a unix-millisecond timestamp stored as i64; `Bool` exists only
/// as an expression type (columns are never Bool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F64,
    Text,
    Date,
}

impl ScalarType {
    /// Integer-family types (including Date, which is an i64 on the wire).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarType::I8 | ScalarType::I16 | ScalarType::I32 | ScalarType::I64 | ScalarType::Date
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self == ScalarType::F64
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarType::Bool => "bool",
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F64 => "f64",
            ScalarType::Text => "text",
            ScalarType::Date => "date",
        };
        f.write_str(s)
    }
}

/// Ordered list of (name, type) pairs describing an operator's output tuple.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<(String, ScalarType)>,
}

impl Schema {
    pub fn new(columns: Vec<(String, ScalarType)>) -> Self {
        Schema { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Resolve a column name to (index, type). Duplicate names resolve to
    /// the first occurrence.
    pub fn find(&self, name: &str) -> Option<(usize, ScalarType)> {
        self.columns
            .iter()
            .position(|(n, _)| n == name)
            .map(|i| (i, self.columns[i].1))
    }
}

/// Which input of a binary operator a projected column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Sort direction for an OrderBy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One aggregate slot of a GroupByAggregate: output column name plus the
/// aggregate call that fills it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSlot {
    pub name: String,
    pub func: AggregateFunc,
    /// Argument expression over the child schema. `None` only for COUNT.
    pub arg: Option<Expr>,
}

/// A relational operator node. The tree is frozen once built; children are
/// owned, and the output schema was computed by the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    Scan {
        table: TableId,
        relation: String,
        schema: Schema,
    },
    Select {
        child: Box<Operator>,
        predicate: Expr,
        schema: Schema,
    },
    HashJoin {
        left: Box<Operator>,
        right: Box<Operator>,
        /// Key column indices into the left / right child schemas. Equal
        /// length, pairwise equal types.
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
        /// Output projection over both sides.
        projection: Vec<(Side, usize)>,
        schema: Schema,
    },
    CrossProduct {
        left: Box<Operator>,
        right: Box<Operator>,
        schema: Schema,
    },
    GroupByAggregate {
        child: Box<Operator>,
        /// Group key column indices into the child schema.
        group_keys: Vec<usize>,
        aggregates: Vec<AggregateSlot>,
        schema: Schema,
    },
    OrderBy {
        child: Box<Operator>,
        /// (child column index, direction) sort keys, major first.
        keys: Vec<(usize, Direction)>,
        schema: Schema,
    },
    Output {
        child: Box<Operator>,
        schema: Schema,
    },
}

impl Operator {
    /// The operator's typed output schema.
    pub fn schema(&self) -> &Schema {
        match self {
            Operator::Scan { schema, .. }
            | Operator::Select { schema, .. }
            | Operator::HashJoin { schema, .. }
            | Operator::CrossProduct { schema, .. }
            | Operator::GroupByAggregate { schema, .. }
            | Operator::OrderBy { schema, .. }
            | Operator::Output { schema, .. } => schema,
        }
    }

    /// Child operators in order.
    pub fn children(&self) -> Vec<&Operator> {
        match self {
            Operator::Scan { .. } => vec![],
            Operator::Select { child, .. }
            | Operator::GroupByAggregate { child, .. }
            | Operator::OrderBy { child, .. }
            | Operator::Output { child, .. } => vec![child],
            Operator::HashJoin { left, right, .. }
            | Operator::CrossProduct { left, right, .. } => vec![left, right],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Scan { .. } => "SCAN",
            Operator::Select { .. } => "SELECT",
            Operator::HashJoin { .. } => "HASH JOIN",
            Operator::CrossProduct { .. } => "CROSS PRODUCT",
            Operator::GroupByAggregate { .. } => "GROUP BY AGGREGATE",
            Operator::OrderBy { .. } => "ORDER BY",
            Operator::Output { .. } => "OUTPUT",
        }
    }

    fn print(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            Operator::Scan { relation, .. } => {
                writeln!(f, "{pad}{}: {relation}", self.name())?;
            }
            Operator::Select { predicate, .. } => {
                writeln!(f, "{pad}{}", self.name())?;
                writeln!(f, "{pad}  {predicate}")?;
            }
            Operator::HashJoin {
                left_keys,
                right_keys,
                ..
            } => {
                writeln!(
                    f,
                    "{pad}{} [left keys {left_keys:?}, right keys {right_keys:?}]",
                    self.name()
                )?;
            }
            Operator::GroupByAggregate {
                group_keys,
                aggregates,
                ..
            } => {
                writeln!(f, "{pad}{} [keys {group_keys:?}]", self.name())?;
                for agg in aggregates {
                    match &agg.arg {
                        Some(arg) => writeln!(f, "{pad}  {} = {:?}({arg})", agg.name, agg.func)?,
                        None => writeln!(f, "{pad}  {} = {:?}(*)", agg.name, agg.func)?,
                    }
                }
            }
            Operator::OrderBy { keys, .. } => {
                writeln!(f, "{pad}{} [keys {keys:?}]", self.name())?;
            }
            Operator::CrossProduct { .. } | Operator::Output { .. } => {
                writeln!(f, "{pad}{}", self.name())?;
            }
        }
        for child in self.children() {
            child.print(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_find_first_occurrence() {
        let schema = Schema::new(vec![
            ("a".to_string(), ScalarType::I32),
            ("b".to_string(), ScalarType::I64),
            ("a".to_string(), ScalarType::F64),
        ]);

        assert_eq!(schema.find("a"), Some((0, ScalarType::I32)));
        assert_eq!(schema.find("b"), Some((1, ScalarType::I64)));
        assert_eq!(schema.find("c"), None);
    }

    #[test]
    fn test_scalar_type_families() {
        assert!(ScalarType::Date.is_integer());
        assert!(ScalarType::F64.is_numeric());
        assert!(!ScalarType::Text.is_numeric());
        assert!(!ScalarType::Bool.is_numeric());
    }
}

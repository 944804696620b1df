//! Scalar expression trees and their typing rules.
//!
//! Expressions own their children. Column references are by name and resolve
//! against the schema of the operator that evaluates them; `expr_type` is the
//! single source of truth for expression typing, shared by the plan builder
//! and the translator's expression visitor.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::builder::PlanError;
use super::{ScalarType, Schema};

/// Binary operators over scalar expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
        }
    }
}

/// String predicates evaluated by the string runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringPredicateOp {
    Contains,
    StartsWith,
    EndsWith,
}

/// Aggregate functions usable inside GroupByAggregate slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// A scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    ColumnRef(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    StringPredicate {
        op: StringPredicateOp,
        value: Box<Expr>,
        pattern: Box<Expr>,
    },
    ExtractYear(Box<Expr>),
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn column(name: &str) -> Expr {
        Expr::ColumnRef(name.to_string())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLiteral(v) => write!(f, "{v}"),
            Expr::FloatLiteral(v) => write!(f, "{v}"),
            Expr::StringLiteral(s) => write!(f, "'{s}'"),
            Expr::ColumnRef(name) => f.write_str(name),
            Expr::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            Expr::StringPredicate { op, value, pattern } => {
                write!(f, "{op:?}({value}, {pattern})")
            }
            Expr::ExtractYear(inner) => write!(f, "EXTRACT_YEAR({inner})"),
        }
    }
}

/// Compute the type of `expr` over `schema`, or the reason it is ill-typed.
///
/// Typing rules:
/// - integer literals adapt to the integer type of their peer operand,
///   standing alone they are i64; float literals are f64;
/// - arithmetic requires two operands of one numeric type and yields it;
/// - comparisons require matching numeric types (or text with `=`/`<>`) and
///   yield bool; logical operators require bool operands;
/// - string predicates require text operands; EXTRACT_YEAR requires a date.
pub fn expr_type(expr: &Expr, schema: &Schema) -> Result<ScalarType, PlanError> {
    match expr {
        Expr::IntLiteral(_) => Ok(ScalarType::I64),
        Expr::FloatLiteral(_) => Ok(ScalarType::F64),
        Expr::StringLiteral(_) => Ok(ScalarType::Text),
        Expr::ColumnRef(name) => schema
            .find(name)
            .map(|(_, ty)| ty)
            .ok_or_else(|| PlanError::UnknownColumn(name.clone())),
        Expr::Binary { op, left, right } => {
            let (lt, rt) = unify_operands(left, right, schema)?;
            binary_result_type(*op, lt, rt)
        }
        Expr::StringPredicate { value, pattern, .. } => {
            let vt = expr_type(value, schema)?;
            let pt = expr_type(pattern, schema)?;
            if vt == ScalarType::Text && pt == ScalarType::Text {
                Ok(ScalarType::Bool)
            } else {
                Err(PlanError::TypeMismatch {
                    expected: ScalarType::Text,
                    found: if vt == ScalarType::Text { pt } else { vt },
                })
            }
        }
        Expr::ExtractYear(inner) => {
            let t = expr_type(inner, schema)?;
            if t == ScalarType::Date {
                Ok(ScalarType::I32)
            } else {
                Err(PlanError::TypeMismatch {
                    expected: ScalarType::Date,
                    found: t,
                })
            }
        }
    }
}

/// Type both operands of a binary expression, coercing a bare integer
/// literal to its peer's integer type.
fn unify_operands(
    left: &Expr,
    right: &Expr,
    schema: &Schema,
) -> Result<(ScalarType, ScalarType), PlanError> {
    let lt = expr_type(left, schema)?;
    let rt = expr_type(right, schema)?;

    if matches!(left, Expr::IntLiteral(_)) && rt.is_integer() {
        return Ok((rt, rt));
    }
    if matches!(right, Expr::IntLiteral(_)) && lt.is_integer() {
        return Ok((lt, lt));
    }
    Ok((lt, rt))
}

fn binary_result_type(
    op: BinaryOp,
    lt: ScalarType,
    rt: ScalarType,
) -> Result<ScalarType, PlanError> {
    if lt != rt {
        return Err(PlanError::TypeMismatch {
            expected: lt,
            found: rt,
        });
    }

    if op.is_logical() {
        return if lt == ScalarType::Bool {
            Ok(ScalarType::Bool)
        } else {
            Err(PlanError::TypeMismatch {
                expected: ScalarType::Bool,
                found: lt,
            })
        };
    }

    if op.is_comparison() {
        let comparable = lt.is_numeric()
            || (lt == ScalarType::Text && matches!(op, BinaryOp::Eq | BinaryOp::Neq));
        return if comparable {
            Ok(ScalarType::Bool)
        } else {
            Err(PlanError::TypeMismatch {
                expected: ScalarType::I64,
                found: lt,
            })
        };
    }

    // Arithmetic. Mod is integer-only.
    let ok = match op {
        BinaryOp::Mod => lt.is_integer(),
        _ => lt.is_numeric(),
    };
    if ok {
        Ok(lt)
    } else {
        Err(PlanError::TypeMismatch {
            expected: ScalarType::I64,
            found: lt,
        })
    }
}

/// Result type of an aggregate over an argument of type `arg`.
pub fn aggregate_result_type(
    func: AggregateFunc,
    arg: Option<ScalarType>,
) -> Result<ScalarType, PlanError> {
    match (func, arg) {
        (AggregateFunc::Count, _) => Ok(ScalarType::I64),
        (AggregateFunc::Sum, Some(t)) if t.is_integer() => Ok(ScalarType::I64),
        (AggregateFunc::Sum, Some(ScalarType::F64)) => Ok(ScalarType::F64),
        (AggregateFunc::Min | AggregateFunc::Max, Some(t)) if t.is_numeric() => Ok(t),
        (AggregateFunc::Avg, Some(t)) if t.is_numeric() => Ok(ScalarType::F64),
        (_, Some(t)) => Err(PlanError::TypeMismatch {
            expected: ScalarType::I64,
            found: t,
        }),
        (_, None) => Err(PlanError::ArityMismatch {
            expected: 1,
            found: 0,
        }),
    }
}

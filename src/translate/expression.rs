//! Scalar expression evaluation.
//!
//! A visitor over the expression tree that resolves column references
//! through the caller's schema values and emits IR through the proxy layer,
//! returning a proxy for the expression's value. Typing decisions reuse the
//! plan builder's rules (`plan::expr_type`), so an expression that passed
//! plan validation always evaluates.

use std::rc::Rc;

use crate::codegen::proxy::{Bool, Float64, Int16, Int32, Int64, Int8, ProxyValue, Str};
use crate::codegen::{abi, ProgramBuilder, ProgramRef};
use crate::plan::expr::StringPredicateOp;
use crate::plan::{expr_type, BinaryOp, Expr, PlanError, ScalarType};

use super::schema_values::SchemaValues;
use super::TranslateError;

/// Evaluate `expr` over the current tuple, emitting IR as a side effect.
pub fn eval_expr<B: ProgramBuilder>(
    program: &ProgramRef<B>,
    expr: &Expr,
    values: &SchemaValues<B>,
) -> Result<ProxyValue<B>, TranslateError> {
    match expr {
        Expr::IntLiteral(v) => Ok(ProxyValue::I64(Int64::constant(Rc::clone(program), *v))),
        Expr::FloatLiteral(v) => Ok(ProxyValue::F64(Float64::constant(Rc::clone(program), *v))),
        Expr::StringLiteral(s) => Ok(ProxyValue::Str(Str::literal(Rc::clone(program), s))),
        Expr::ColumnRef(name) => values
            .find(name)
            .map(|v| v.value.clone())
            .ok_or_else(|| TranslateError::Plan(PlanError::UnknownColumn(name.clone()))),
        Expr::ExtractYear(inner) => {
            let date = eval_expr(program, inner, values)?;
            let mut pb = program.borrow_mut();
            let func = abi::declare(&mut *pb, &abi::EXTRACT_YEAR);
            let year = pb.call(func, &[date.value()]);
            drop(pb);
            Ok(ProxyValue::I32(Int32::new(Rc::clone(program), year)))
        }
        Expr::StringPredicate { op, value, pattern } => {
            let value = eval_expr(program, value, values)?;
            let pattern = eval_expr(program, pattern, values)?;
            let (Some(value), Some(pattern)) = (value.as_str_proxy(), pattern.as_str_proxy())
            else {
                return Err(TranslateError::Plan(PlanError::TypeMismatch {
                    expected: ScalarType::Text,
                    found: ScalarType::I64,
                }));
            };
            let result = match op {
                StringPredicateOp::Contains => value.contains(pattern),
                StringPredicateOp::StartsWith => value.starts_with(pattern),
                StringPredicateOp::EndsWith => value.ends_with(pattern),
            };
            Ok(ProxyValue::Bool(result))
        }
        Expr::Binary { op, left, right } => {
            let schema = values.schema();
            let lt = expr_type(left, &schema)?;
            let rt = expr_type(right, &schema)?;

            // Bare integer literals adapt to their peer's integer type,
            // mirroring the plan builder's unification.
            let operand_ty = if matches!(&**left, Expr::IntLiteral(_)) && rt.is_integer() {
                rt
            } else {
                lt
            };

            let l = eval_as(program, left, values, operand_ty)?;
            let r = eval_as(program, right, values, operand_ty)?;

            if op.is_logical() {
                logical(*op, l, r)
            } else if op.is_comparison() {
                comparison(*op, l, r)
            } else {
                arithmetic(*op, l, r)
            }
        }
    }
}

/// Evaluate with an expected scalar type, so integer literals materialize at
/// the right width.
fn eval_as<B: ProgramBuilder>(
    program: &ProgramRef<B>,
    expr: &Expr,
    values: &SchemaValues<B>,
    expected: ScalarType,
) -> Result<ProxyValue<B>, TranslateError> {
    if let Expr::IntLiteral(v) = expr {
        let p = Rc::clone(program);
        return Ok(match expected {
            ScalarType::I8 => ProxyValue::I8(Int8::constant(p, *v as i8)),
            ScalarType::I16 => ProxyValue::I16(Int16::constant(p, *v as i16)),
            ScalarType::I32 => ProxyValue::I32(Int32::constant(p, *v as i32)),
            _ => ProxyValue::I64(Int64::constant(p, *v)),
        });
    }
    eval_expr(program, expr, values)
}

macro_rules! apply_arith {
    ($op:expr, $a:expr, $b:expr) => {
        match $op {
            BinaryOp::Add => &$a + &$b,
            BinaryOp::Sub => &$a - &$b,
            BinaryOp::Mul => &$a * &$b,
            BinaryOp::Div => &$a / &$b,
            BinaryOp::Mod => $a.modulo(&$b),
            _ => unreachable!("arithmetic op expected"),
        }
    };
}

fn arithmetic<B: ProgramBuilder>(
    op: BinaryOp,
    l: ProxyValue<B>,
    r: ProxyValue<B>,
) -> Result<ProxyValue<B>, TranslateError> {
    let result = match (l, r) {
        (ProxyValue::I8(a), ProxyValue::I8(b)) => ProxyValue::I8(apply_arith!(op, a, b)),
        (ProxyValue::I16(a), ProxyValue::I16(b)) => ProxyValue::I16(apply_arith!(op, a, b)),
        (ProxyValue::I32(a), ProxyValue::I32(b)) => ProxyValue::I32(apply_arith!(op, a, b)),
        (ProxyValue::I64(a), ProxyValue::I64(b)) => ProxyValue::I64(apply_arith!(op, a, b)),
        (ProxyValue::F64(a), ProxyValue::F64(b)) => ProxyValue::F64(apply_arith!(op, a, b)),
        _ => {
            return Err(TranslateError::Plan(PlanError::TypeMismatch {
                expected: ScalarType::I64,
                found: ScalarType::Text,
            }))
        }
    };
    Ok(result)
}

macro_rules! apply_cmp {
    ($op:expr, $a:expr, $b:expr) => {
        match $op {
            BinaryOp::Eq => $a.eq(&$b),
            BinaryOp::Neq => $a.neq(&$b),
            BinaryOp::Lt => $a.lt(&$b),
            BinaryOp::Lte => $a.lte(&$b),
            BinaryOp::Gt => $a.gt(&$b),
            BinaryOp::Gte => $a.gte(&$b),
            _ => unreachable!("comparison op expected"),
        }
    };
}

fn comparison<B: ProgramBuilder>(
    op: BinaryOp,
    l: ProxyValue<B>,
    r: ProxyValue<B>,
) -> Result<ProxyValue<B>, TranslateError> {
    let result: Bool<B> = match (l, r) {
        (ProxyValue::I8(a), ProxyValue::I8(b)) => apply_cmp!(op, a, b),
        (ProxyValue::I16(a), ProxyValue::I16(b)) => apply_cmp!(op, a, b),
        (ProxyValue::I32(a), ProxyValue::I32(b)) => apply_cmp!(op, a, b),
        (ProxyValue::I64(a), ProxyValue::I64(b)) => apply_cmp!(op, a, b),
        (ProxyValue::F64(a), ProxyValue::F64(b)) => apply_cmp!(op, a, b),
        (ProxyValue::Str(a), ProxyValue::Str(b)) => match op {
            BinaryOp::Eq => a.eq(&b),
            BinaryOp::Neq => a.neq(&b),
            _ => {
                return Err(TranslateError::Plan(PlanError::TypeMismatch {
                    expected: ScalarType::I64,
                    found: ScalarType::Text,
                }))
            }
        },
        _ => {
            return Err(TranslateError::Plan(PlanError::TypeMismatch {
                expected: ScalarType::I64,
                found: ScalarType::Text,
            }))
        }
    };
    Ok(ProxyValue::Bool(result))
}

fn logical<B: ProgramBuilder>(
    op: BinaryOp,
    l: ProxyValue<B>,
    r: ProxyValue<B>,
) -> Result<ProxyValue<B>, TranslateError> {
    let (ProxyValue::Bool(a), ProxyValue::Bool(b)) = (l, r) else {
        return Err(TranslateError::Plan(PlanError::TypeMismatch {
            expected: ScalarType::Bool,
            found: ScalarType::I64,
        }));
    };
    let result = match op {
        BinaryOp::And => &a & &b,
        BinaryOp::Or => &a | &b,
        BinaryOp::Xor => a.neq(&b),
        _ => unreachable!("logical op expected"),
    };
    Ok(ProxyValue::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{program_ref, SourceProgram};

    fn setup() -> (ProgramRef<SourceProgram>, SchemaValues<SourceProgram>) {
        let mut pb = SourceProgram::new();
        let void = pb.type_void();
        pb.create_public_function("compute", void, &[]);
        let i32t = pb.type_i32();
        let slot = pb.alloca(i32t);
        let raw = pb.load(slot);
        let program = program_ref(pb);

        let mut values = SchemaValues::new();
        values.add_value(
            "qty",
            ScalarType::I32,
            ProxyValue::I32(Int32::new(Rc::clone(&program), raw)),
        );
        (program, values)
    }

    #[test]
    fn test_column_lookup_clones_proxy() {
        let (program, values) = setup();
        let result = eval_expr(&program, &Expr::column("qty"), &values).unwrap();
        assert!(matches!(result, ProxyValue::I32(_)));
    }

    #[test]
    fn test_literal_adapts_to_column_width() {
        let (program, values) = setup();
        let expr = Expr::binary(BinaryOp::Lt, Expr::column("qty"), Expr::IntLiteral(10));
        let result = eval_expr(&program, &expr, &values).unwrap();
        assert!(matches!(result, ProxyValue::Bool(_)));

        program.borrow_mut().ret_void();
        let src = program.borrow().to_source();
        // The literal is emitted as an i32 peer, not an i64.
        assert!(src.contains("int32_t v2;"));
        assert!(src.contains("v2 = 10;"));
    }

    #[test]
    fn test_unknown_column_is_plan_error() {
        let (program, values) = setup();
        let err = eval_expr(&program, &Expr::column("missing"), &values).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::Plan(PlanError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_logical_composition() {
        let (program, values) = setup();
        let lt = Expr::binary(BinaryOp::Lt, Expr::column("qty"), Expr::IntLiteral(10));
        let gt = Expr::binary(BinaryOp::Gt, Expr::column("qty"), Expr::IntLiteral(0));
        let both = Expr::binary(BinaryOp::And, lt, gt);

        let result = eval_expr(&program, &both, &values).unwrap();
        assert!(matches!(result, ProxyValue::Bool(_)));
    }
}

//! # Expression Evaluation
//!
//! Evaluates [`Expr`] trees against a row. Column references resolve by
//! name against the operator's output column list; `table.column`
//! qualification falls back to the bare column name when the qualified
//! form is absent.
//!
//! ## NULL Propagation
//!
//! - Arithmetic and comparisons with a NULL operand yield NULL.
//! - `AND` / `OR` follow Kleene three-valued logic: `FALSE AND NULL` is
//!   FALSE, `TRUE OR NULL` is TRUE, otherwise a NULL operand yields NULL.
//! - `NOT NULL` is NULL.
//!
//! A predicate matches only when it evaluates to `Boolean(true)`; NULL is
//! not a match.
//!
//! ## Typed Arithmetic
//!
//! Integer ⊕ Integer stays integral (with checked overflow and explicit
//! division-by-zero errors); any Float operand promotes the operation to
//! f64. `+` on two TEXT values concatenates. Everything else is a type
//! mismatch error — evaluation never panics.

use eyre::{bail, Result};

use crate::types::Value;

use super::ast::{BinaryOp, ColumnRef, Expr, Literal, UnaryOp};

/// Evaluates `expr` against `row`, whose columns are named by `columns`.
pub fn eval(expr: &Expr, row: &[Value], columns: &[String]) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(literal_value(lit)),
        Expr::Column(col) => {
            let index = resolve_column(col, columns)?;
            Ok(row.get(index).cloned().unwrap_or(Value::Null))
        }
        Expr::Binary { op, left, right } => {
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                return eval_logical(*op, left, right, row, columns);
            }
            let lhs = eval(left, row, columns)?;
            let rhs = eval(right, row, columns)?;
            eval_binary(*op, &lhs, &rhs)
        }
        Expr::Unary { op, expr } => {
            let value = eval(expr, row, columns)?;
            eval_unary(*op, &value)
        }
        Expr::Function { name, args, .. } => eval_function(name, args, row, columns),
        Expr::Star => bail!("'*' is not a value expression"),
    }
}

/// Evaluates `expr` as a predicate: `Some(true)` matches, `Some(false)`
/// does not, `None` is SQL UNKNOWN (also not a match).
pub fn eval_predicate(expr: &Expr, row: &[Value], columns: &[String]) -> Result<Option<bool>> {
    match eval(expr, row, columns)? {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(b)),
        other => bail!(
            "predicate must evaluate to BOOLEAN, got {}",
            other.data_type()
        ),
    }
}

pub fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::Text(s.clone()),
        Literal::Boolean(b) => Value::Boolean(*b),
    }
}

fn resolve_column(col: &ColumnRef, columns: &[String]) -> Result<usize> {
    if let Some(table) = &col.table {
        let qualified = format!("{}.{}", table, col.column);
        if let Some(index) = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&qualified))
        {
            return Ok(index);
        }
    }
    columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(&col.column))
        .ok_or_else(|| eyre::eyre!("unknown column '{}'", col.column))
}

fn eval_logical(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    row: &[Value],
    columns: &[String],
) -> Result<Value> {
    let lhs = truth(eval(left, row, columns)?)?;

    // Short-circuit on the determining operand.
    match (op, lhs) {
        (BinaryOp::And, Some(false)) => return Ok(Value::Boolean(false)),
        (BinaryOp::Or, Some(true)) => return Ok(Value::Boolean(true)),
        _ => {}
    }

    let rhs = truth(eval(right, row, columns)?)?;
    let result = match op {
        BinaryOp::And => match (lhs, rhs) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (lhs, rhs) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!("eval_logical only handles AND/OR"),
    };
    Ok(result.map(Value::Boolean).unwrap_or(Value::Null))
}

fn truth(value: Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(b)),
        other => bail!(
            "logical operand must be BOOLEAN, got {}",
            other.data_type()
        ),
    }
}

fn eval_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }

    if op.is_comparison() {
        let Some(ord) = lhs.compare(rhs) else {
            bail!(
                "cannot compare {} with {}",
                lhs.data_type(),
                rhs.data_type()
            );
        };
        let result = match op {
            BinaryOp::Eq => ord.is_eq(),
            BinaryOp::NotEq => ord.is_ne(),
            BinaryOp::Lt => ord.is_lt(),
            BinaryOp::LtEq => ord.is_le(),
            BinaryOp::Gt => ord.is_gt(),
            BinaryOp::GtEq => ord.is_ge(),
            _ => unreachable!("comparison op"),
        };
        return Ok(Value::Boolean(result));
    }

    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => int_arith(op, *a, *b),
        (Value::Float(a), Value::Float(b)) => float_arith(op, *a, *b),
        (Value::Integer(a), Value::Float(b)) => float_arith(op, *a as f64, *b),
        (Value::Float(a), Value::Integer(b)) => float_arith(op, *a, *b as f64),
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => {
            Ok(Value::Text(format!("{}{}", a, b)))
        }
        _ => bail!(
            "invalid operands for arithmetic: {} and {}",
            lhs.data_type(),
            rhs.data_type()
        ),
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                bail!("division by zero");
            }
            a.checked_div(b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                bail!("modulo by zero");
            }
            a.checked_rem(b)
        }
        _ => unreachable!("arithmetic op"),
    };
    result
        .map(Value::Integer)
        .ok_or_else(|| eyre::eyre!("integer overflow in {} {:?} {}", a, op, b))
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Result<Value> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                bail!("division by zero");
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                bail!("modulo by zero");
            }
            a % b
        }
        _ => unreachable!("arithmetic op"),
    };
    Ok(Value::Float(result))
}

fn eval_unary(op: UnaryOp, value: &Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match (op, value) {
        (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOp::Neg, Value::Integer(i)) => i
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| eyre::eyre!("integer overflow negating {}", i)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (op, value) => bail!("invalid operand for {:?}: {}", op, value.data_type()),
    }
}

fn eval_function(name: &str, args: &[Expr], row: &[Value], columns: &[String]) -> Result<Value> {
    let upper = name.to_ascii_uppercase();

    // COALESCE is variadic and lazily evaluated.
    if upper == "COALESCE" {
        for arg in args {
            let value = eval(arg, row, columns)?;
            if !value.is_null() {
                return Ok(value);
            }
        }
        return Ok(Value::Null);
    }

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, row, columns)?);
    }

    match (upper.as_str(), values.as_slice()) {
        (_, [Value::Null]) => Ok(Value::Null),
        ("ABS", [Value::Integer(i)]) => i
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| eyre::eyre!("integer overflow in ABS({})", i)),
        ("ABS", [Value::Float(f)]) => Ok(Value::Float(f.abs())),
        ("LENGTH", [Value::Text(s)]) => Ok(Value::Integer(s.chars().count() as i64)),
        ("LENGTH", [Value::Blob(b)]) => Ok(Value::Integer(b.len() as i64)),
        ("UPPER", [Value::Text(s)]) => Ok(Value::Text(s.to_uppercase())),
        ("LOWER", [Value::Text(s)]) => Ok(Value::Text(s.to_lowercase())),
        _ => bail!(
            "unknown function or invalid arguments: {}/{}",
            name,
            values.len()
        ),
    }
}

//! Value operations behind the arithmetic, comparison, logic and child
//! instructions.
//!
//! Operands arrive already dereferenced, except for the identity
//! comparisons, which compare pointers by id.

use std::cmp::Ordering;

use datex_types::ast::{BinaryOp, UnaryOp};
use datex_types::{Rational, TargetClause, TypeTag, Value};

use crate::error::{EvalError, EvalResult};

// ══════════════════════════════════════════════════════════════════════════════
// Numbers
// ══════════════════════════════════════════════════════════════════════════════

/// Numeric view of a value: exact where possible, float otherwise.
#[derive(Debug, Clone, Copy)]
enum Number {
    Exact(Rational),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Self::Exact(Rational::from_int(*i))),
            Value::Rational(r) => Some(Self::Exact(*r)),
            Value::Float(x) => Some(Self::Float(*x)),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Self::Exact(r) => r.to_f64(),
            Self::Float(x) => x,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Self::Exact(r) => r.numerator() == 0,
            Self::Float(x) => x == 0.0,
        }
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> EvalResult<Value> {
    // plain integers keep i64 semantics so overflow is reported, not widened
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        let (x, y) = (*x, *y);
        let result = match op {
            BinaryOp::Add => x.checked_add(y).map(Value::Int),
            BinaryOp::Subtract => x.checked_sub(y).map(Value::Int),
            BinaryOp::Multiply => x.checked_mul(y).map(Value::Int),
            _ if y == 0 => return Err(division_by_zero()),
            _ => Rational::new(x, y).map(Value::from_rational),
        };
        return result.ok_or_else(|| overflow(op, a, b));
    }

    let (Some(x), Some(y)) = (Number::of(a), Number::of(b)) else {
        return Err(EvalError::Type(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            a.std_type().name(),
            b.std_type().name()
        )));
    };
    if op == BinaryOp::Divide && y.is_zero() {
        return Err(division_by_zero());
    }
    match (x, y) {
        (Number::Exact(x), Number::Exact(y)) => {
            let result = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Subtract => x.checked_sub(y),
                BinaryOp::Multiply => x.checked_mul(y),
                _ => x.checked_div(y),
            };
            result
                .map(Value::from_rational)
                .ok_or_else(|| overflow(op, a, b))
        }
        (x, y) => {
            let (x, y) = (x.to_f64(), y.to_f64());
            Ok(Value::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Subtract => x - y,
                BinaryOp::Multiply => x * y,
                _ => x / y,
            }))
        }
    }
}

fn division_by_zero() -> EvalError {
    EvalError::Value("division by zero".to_string())
}

fn overflow(op: BinaryOp, a: &Value, b: &Value) -> EvalError {
    EvalError::Value(format!("{a} {} {b} overflows", op.symbol()))
}

// ══════════════════════════════════════════════════════════════════════════════
// Binary operators
// ══════════════════════════════════════════════════════════════════════════════

/// Apply a binary operator to two (dereferenced) operands.
pub fn binary(op: BinaryOp, a: &Value, b: &Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Add => add(a, b),
        BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => arithmetic(op, a, b),
        BinaryOp::Equal => Ok(Value::Bool(loose_eq(a, b))),
        BinaryOp::NotEqual => Ok(Value::Bool(!loose_eq(a, b))),
        BinaryOp::Identical => Ok(Value::Bool(identical(a, b))),
        BinaryOp::NotIdentical => Ok(Value::Bool(!identical(a, b))),
        BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEqual | BinaryOp::GreaterEqual => {
            let ordering = compare(a, b).ok_or_else(|| {
                EvalError::Type(format!(
                    "cannot compare {} with {}",
                    a.std_type().name(),
                    b.std_type().name()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering == Ordering::Less,
                BinaryOp::Greater => ordering == Ordering::Greater,
                BinaryOp::LessEqual => ordering != Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::And | BinaryOp::Or => logic(op, a, b),
    }
}

fn add(a: &Value, b: &Value) -> EvalResult<Value> {
    match (a, b) {
        (Value::Text(x), y) => Ok(Value::Text(format!("{x}{}", y.to_plain_text()))),
        (x, Value::Text(y)) => Ok(Value::Text(format!("{}{y}", x.to_plain_text()))),
        (Value::Array(x), Value::Array(y)) => Ok(Value::Array(x.iter().chain(y).cloned().collect())),
        (Value::Buffer(x), Value::Buffer(y)) => {
            Ok(Value::Buffer(x.iter().chain(y).copied().collect()))
        }
        _ => arithmetic(BinaryOp::Add, a, b),
    }
}

/// `==`: numbers compare by value across Int, Float and Rational;
/// collections compare element-wise; endpoints also match by bound id.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (Number::of(a), Number::of(b)) {
        return match (x, y) {
            (Number::Exact(x), Number::Exact(y)) => x == y,
            (x, y) => x.to_f64() == y.to_f64(),
        };
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((kx, vx), (ky, vy))| kx == ky && loose_eq(vx, vy))
        }
        (Value::Endpoint(x), Value::Endpoint(y)) => {
            x == y || matches!((x.id_endpoint(), y.id_endpoint()), (Some(i), Some(j)) if i == j && x.instance() == y.instance())
        }
        _ => a == b,
    }
}

/// `===`: same type and same value; pointers compare by id.
pub fn identical(a: &Value, b: &Value) -> bool {
    a == b
}

pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (Number::of(a), Number::of(b)) {
        return match (x, y) {
            (Number::Exact(x), Number::Exact(y)) => Some(x.cmp(&y)),
            (x, y) => x.to_f64().partial_cmp(&y.to_f64()),
        };
    }
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Buffer(x), Value::Buffer(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn logic(op: BinaryOp, a: &Value, b: &Value) -> EvalResult<Value> {
    if let (Some(x), Some(y)) = (as_clause(a), as_clause(b)) {
        return Ok(Value::Target(match op {
            BinaryOp::And => x.and(y),
            _ => x.or(y),
        }));
    }
    let (x, y) = (a.is_truthy(), b.is_truthy());
    Ok(Value::Bool(match op {
        BinaryOp::And => x && y,
        _ => x || y,
    }))
}

/// Target clause of an endpoint or clause value.
pub fn as_clause(value: &Value) -> Option<TargetClause> {
    match value {
        Value::Endpoint(endpoint) => Some(TargetClause::Endpoint(endpoint.clone())),
        Value::Target(clause) => Some(clause.clone()),
        _ => None,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Unary operators
// ══════════════════════════════════════════════════════════════════════════════

/// The value-level unary operators. Pointer operators are handled by the
/// interpreter.
pub fn unary(op: UnaryOp, value: &Value) -> EvalResult<Value> {
    match op {
        UnaryOp::Negate => negate(value),
        UnaryOp::Not => Ok(match as_clause(value) {
            Some(clause) => Value::Target(clause.negate()),
            None => Value::Bool(!value.is_truthy()),
        }),
        UnaryOp::Count => count(value).map(|n| Value::Int(n as i64)),
        UnaryOp::TypeOf => Ok(Value::Type(TypeTag::Std(value.std_type()))),
        other => Err(EvalError::Type(format!(
            "{}applies to pointers, got {}",
            other.symbol(),
            value.std_type().name()
        ))),
    }
}

fn negate(value: &Value) -> EvalResult<Value> {
    match value {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| EvalError::Value(format!("-({i}) overflows"))),
        Value::Rational(r) => r
            .checked_neg()
            .map(Value::Rational)
            .ok_or_else(|| EvalError::Value(format!("-({r}) overflows"))),
        Value::Float(x) => Ok(Value::Float(-x)),
        other => Err(EvalError::Type(format!(
            "cannot negate {}",
            other.std_type().name()
        ))),
    }
}

fn count(value: &Value) -> EvalResult<usize> {
    match value {
        Value::Array(items) | Value::Tuple(items) => Ok(items.len()),
        Value::Object(entries) => Ok(entries.len()),
        Value::Text(text) => Ok(text.chars().count()),
        Value::Buffer(bytes) => Ok(bytes.len()),
        Value::Void => Ok(0),
        other => Err(EvalError::Type(format!(
            "cannot count {}",
            other.std_type().name()
        ))),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Children
// ══════════════════════════════════════════════════════════════════════════════

/// `parent.key`. Missing children read as `void`.
pub fn child(parent: &Value, key: &Value) -> EvalResult<Value> {
    match (parent, key) {
        (Value::Object(entries), Value::Text(key)) => {
            Ok(entries.get(key).cloned().unwrap_or(Value::Void))
        }
        (Value::Array(items) | Value::Tuple(items), Value::Int(index)) => Ok(usize::try_from(*index)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Void)),
        (Value::Text(text), Value::Int(index)) => Ok(usize::try_from(*index)
            .ok()
            .and_then(|i| text.chars().nth(i))
            .map(|c| Value::Text(c.to_string()))
            .unwrap_or(Value::Void)),
        (parent, key) => Err(EvalError::Type(format!(
            "{} has no child {key}",
            parent.std_type().name()
        ))),
    }
}

/// Set the child of `target` at `path`. A `void` value removes an object
/// key; an array index equal to the length appends.
pub fn set_child(target: &mut Value, path: &[Value], value: Value) -> EvalResult<()> {
    let Some((last, parents)) = path.split_last() else {
        *target = value;
        return Ok(());
    };
    let mut node = target;
    for key in parents {
        node = child_mut(node, key)?;
    }
    match (node, last) {
        (Value::Object(entries), Value::Text(key)) => {
            if value.is_void() {
                entries.remove(key);
            } else {
                entries.insert(key.clone(), value);
            }
            Ok(())
        }
        (Value::Array(items), Value::Int(index)) => {
            let len = items.len();
            match usize::try_from(*index) {
                Ok(i) if i < len => {
                    items[i] = value;
                    Ok(())
                }
                Ok(i) if i == len => {
                    items.push(value);
                    Ok(())
                }
                _ => Err(EvalError::Value(format!(
                    "index {index} out of range for array of length {len}"
                ))),
            }
        }
        (node, key) => Err(EvalError::Type(format!(
            "cannot set child {key} of {}",
            node.std_type().name()
        ))),
    }
}

fn child_mut<'v>(node: &'v mut Value, key: &Value) -> EvalResult<&'v mut Value> {
    let type_name = node.std_type().name();
    let found = match (node, key) {
        (Value::Object(entries), Value::Text(name)) => entries.get_mut(name),
        (Value::Array(items), Value::Int(index)) => {
            usize::try_from(*index).ok().and_then(move |i| items.get_mut(i))
        }
        _ => None,
    };
    found.ok_or_else(|| EvalError::Reference(format!("{type_name} has no child {key}")))
}

//! Built-in fast-path semantics for operators.
//!
//! Everything here is pure and non-suspending: a helper either produces a
//! result from built-in rules or reports "not applicable", in which case the
//! dispatch layer falls back to metamethods.

use anyhow::{Result, anyhow};

use crate::op::ArithOp;

use super::Val;

/// Raw arithmetic on two operands. `Ok(None)` means no built-in rule
/// applies (a non-numeric operand) and dispatch should try metamethods.
pub fn raw_arith(op: ArithOp, a: &Val, b: &Val) -> Result<Option<Val>> {
    let result = match (a, b) {
        (Val::Int(x), Val::Int(y)) => int_arith(op, *x, *y)?,
        (Val::Int(x), Val::Float(y)) => float_arith(op, *x as f64, *y),
        (Val::Float(x), Val::Int(y)) => float_arith(op, *x, *y as f64),
        (Val::Float(x), Val::Float(y)) => float_arith(op, *x, *y),
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn int_arith(op: ArithOp, x: i64, y: i64) -> Result<Val> {
    let v = match op {
        ArithOp::Add => Val::Int(x.wrapping_add(y)),
        ArithOp::Sub => Val::Int(x.wrapping_sub(y)),
        ArithOp::Mul => Val::Int(x.wrapping_mul(y)),
        // Division and exponentiation always produce floats.
        ArithOp::Div => Val::Float(x as f64 / y as f64),
        ArithOp::Pow => Val::Float((x as f64).powf(y as f64)),
        ArithOp::Mod => {
            if y == 0 {
                return Err(anyhow!("attempt to perform 'n%0'"));
            }
            // Floored modulo: the result takes the divisor's sign.
            let r = x.wrapping_rem(y);
            Val::Int(if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
        }
    };
    Ok(v)
}

fn float_arith(op: ArithOp, x: f64, y: f64) -> Val {
    let v = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Pow => x.powf(y),
        ArithOp::Mod => x - (x / y).floor() * y,
    };
    Val::Float(v)
}

/// Raw unary minus; `None` for non-numbers.
pub fn raw_neg(v: &Val) -> Option<Val> {
    match v {
        Val::Int(i) => Some(Val::Int(i.wrapping_neg())),
        Val::Float(f) => Some(Val::Float(-f)),
        _ => None,
    }
}

/// Raw equality: numeric across Int/Float, content for strings and
/// booleans, identity for reference values. Never consults metamethods.
pub fn raw_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Nil, Val::Nil) => true,
        (Val::Bool(x), Val::Bool(y)) => x == y,
        (Val::Int(x), Val::Int(y)) => x == y,
        (Val::Float(x), Val::Float(y)) => x == y,
        (Val::Int(x), Val::Float(y)) | (Val::Float(y), Val::Int(x)) => (*x as f64) == *y,
        (Val::Str(x), Val::Str(y)) => x == y,
        _ => {
            if a.is_reference() && b.is_reference() {
                a.identity_addr() == b.identity_addr()
            } else {
                false
            }
        }
    }
}

/// Raw ordering for `<`; `None` when the pair has no built-in order.
pub fn raw_lt(a: &Val, b: &Val) -> Option<bool> {
    match (a, b) {
        (Val::Int(x), Val::Int(y)) => Some(x < y),
        (Val::Float(x), Val::Float(y)) => Some(x < y),
        (Val::Int(x), Val::Float(y)) => Some((*x as f64) < *y),
        (Val::Float(x), Val::Int(y)) => Some(*x < *y as f64),
        (Val::Str(x), Val::Str(y)) => Some(x.as_ref() < y.as_ref()),
        _ => None,
    }
}

/// Raw ordering for `<=`.
pub fn raw_le(a: &Val, b: &Val) -> Option<bool> {
    match (a, b) {
        (Val::Int(x), Val::Int(y)) => Some(x <= y),
        (Val::Float(x), Val::Float(y)) => Some(x <= y),
        (Val::Int(x), Val::Float(y)) => Some((*x as f64) <= *y),
        (Val::Float(x), Val::Int(y)) => Some(*x <= *y as f64),
        (Val::Str(x), Val::Str(y)) => Some(x.as_ref() <= y.as_ref()),
        _ => None,
    }
}

/// String coercion used by concat: strings pass through, numbers render
/// via itoa/ryu, everything else has no built-in coercion.
pub fn coerce_to_str(v: &Val) -> Option<String> {
    match v {
        Val::Str(s) => Some(s.as_ref().to_string()),
        Val::Int(i) => {
            let mut buf = itoa::Buffer::new();
            Some(buf.format(*i).to_string())
        }
        Val::Float(f) => {
            let mut buf = ryu::Buffer::new();
            Some(buf.format(*f).to_string())
        }
        _ => None,
    }
}

/// Raw concatenation; `None` when either side needs `__concat`.
pub fn raw_concat(a: &Val, b: &Val) -> Option<Val> {
    let left = coerce_to_str(a)?;
    let right = coerce_to_str(b)?;
    let mut out = String::with_capacity(left.len() + right.len());
    out.push_str(&left);
    out.push_str(&right);
    Some(Val::Str(out.into()))
}

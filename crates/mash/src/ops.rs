use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

use crate::{
    call,
    error::{ErrorKind, ExecResult, MashError, MashResult},
    eval::Interp,
    ir::{BinOp, UnOp},
    symbol_table::Binding,
    value::{Cell, MashStr, Value},
};

fn to_f64(v: &Value) -> MashResult<f64> {
    match v {
        Value::Int(i) => i
            .to_f64()
            .ok_or_else(|| MashError::internal("Integer out of float range")),
        Value::Float(f) => Ok(*f),
        other => Err(MashError::internal(format!(
            "Numeric operation on non-numeric '{}'",
            other.type_name()
        ))),
    }
}

/// Applies an arithmetic operator to two numeric values with Int→Float
/// promotion. Integer division/modulo by zero and oversized exponents are
/// ValueErrors; `/` always produces a Float.
///
/// Shared between the constant folder (which leaves errors unfolded so they
/// surface at runtime) and the evaluator.
pub fn numeric_bin(op: BinOp, a: &Value, b: &Value) -> MashResult<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return int_bin(op, x, y);
    }
    let x = to_f64(a)?;
    let y = to_f64(b)?;
    float_bin(op, x, y)
}

fn int_bin(op: BinOp, x: &BigInt, y: &BigInt) -> MashResult<Value> {
    let value = match op {
        BinOp::Add => Value::Int(x + y),
        BinOp::Sub => Value::Int(x - y),
        BinOp::Mul => Value::Int(x * y),
        BinOp::FDiv => {
            if y.is_zero() {
                return Err(MashError::value_error("Division by zero"));
            }
            let (x, y) = (to_f64(&Value::Int(x.clone()))?, to_f64(&Value::Int(y.clone()))?);
            Value::Float(x / y)
        }
        BinOp::IDiv => {
            if y.is_zero() {
                return Err(MashError::value_error("Division by zero"));
            }
            Value::Int(x.div_floor(y))
        }
        BinOp::Mod => {
            if y.is_zero() {
                return Err(MashError::value_error("Modulo by zero"));
            }
            Value::Int(x.mod_floor(y))
        }
        BinOp::Exp => {
            if x.is_zero() && y.is_negative() {
                return Err(MashError::value_error("Zero cannot be raised to a negative power"));
            }
            if y.is_negative() {
                let (x, y) = (to_f64(&Value::Int(x.clone()))?, to_f64(&Value::Int(y.clone()))?);
                return Ok(Value::Float(x.powf(y)));
            }
            let exp = y
                .to_u32()
                .ok_or_else(|| MashError::value_error("Exponent too large"))?;
            Value::Int(Pow::pow(x, exp))
        }
        other => {
            return Err(MashError::internal(format!(
                "'{}' is not an arithmetic operator",
                other.symbol()
            )));
        }
    };
    Ok(value)
}

fn float_bin(op: BinOp, x: f64, y: f64) -> MashResult<Value> {
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::FDiv => x / y,
        BinOp::IDiv => {
            if y == 0.0 {
                return Err(MashError::value_error("Division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(MashError::value_error("Modulo by zero"));
            }
            // Result takes the divisor's sign, matching floor division.
            x - y * (x / y).floor()
        }
        BinOp::Exp => x.powf(y),
        other => {
            return Err(MashError::internal(format!(
                "'{}' is not an arithmetic operator",
                other.symbol()
            )));
        }
    };
    Ok(Value::Float(value))
}

fn is_numeric(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_))
}

fn type_error_bin(op: BinOp, a: &Binding, b: &Binding) -> MashError {
    let show = |b: &Binding| match b {
        Binding::Funs(funs) => funs.first().map_or_else(String::new, |f| f.header()),
        Binding::Val(v) => v.literal(),
    };
    MashError::type_error(format!(
        "Unsupported types for '{}'. Given values are '{}' and '{}'",
        op.symbol(),
        show(a),
        show(b)
    ))
}

/// Dispatches the operator to the left operand's class method when the left
/// operand is an instance defining it.
fn class_bin(ctx: &mut Interp<'_>, method: &str, lhs: &Binding, rhs: &Binding) -> ExecResult<Option<Value>> {
    let Binding::Val(recv @ Value::Object(_)) = lhs else {
        return Ok(None);
    };
    let arg = match rhs {
        Binding::Val(v) => v.clone(),
        Binding::Funs(_) => return Ok(None),
    };
    call::call_method(ctx, recv, method, vec![Binding::Val(arg)])
}

/// Evaluates a binary operator over resolved operands.
pub fn bin_op(ctx: &mut Interp<'_>, op: BinOp, lhs: &Binding, rhs: &Binding) -> ExecResult<Value> {
    if let Some(result) = class_bin(ctx, &op.method_name(), lhs, rhs)? {
        return Ok(result);
    }
    if op == BinOp::Cat {
        let left = cat_text(ctx, lhs)?;
        let right = cat_text(ctx, rhs)?;
        return Ok(Value::Str(Rc::new(MashStr::resolved(left + &right))));
    }
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::FDiv | BinOp::IDiv | BinOp::Mod | BinOp::Exp => {
            let (Binding::Val(a), Binding::Val(b)) = (lhs, rhs) else {
                return Err(type_error_bin(op, lhs, rhs).into());
            };
            if is_numeric(a) && is_numeric(b) {
                return Ok(numeric_bin(op, a, b)?);
            }
            if op == BinOp::Add {
                if let (Value::Str(x), Value::Str(y)) = (a, b) {
                    return Ok(Value::Str(Rc::new(MashStr::resolved(format!("{}{}", x.value, y.value)))));
                }
                if let (Value::List(_), Value::List(_)) = (a, b) {
                    let Value::List(x) = ctx.update_value(a.clone())? else {
                        return Err(MashError::internal("List update changed type").into());
                    };
                    let Value::List(y) = ctx.update_value(b.clone())? else {
                        return Err(MashError::internal("List update changed type").into());
                    };
                    let mut cells = x.as_ref().clone();
                    cells.extend(y.as_ref().iter().cloned());
                    return Ok(Value::List(Rc::new(cells)));
                }
            }
            Err(type_error_bin(op, lhs, rhs).into())
        }
        BinOp::Eq | BinOp::Neq => {
            let (Binding::Val(a), Binding::Val(b)) = (lhs, rhs) else {
                return Err(type_error_bin(op, lhs, rhs).into());
            };
            let a = ctx.update_value(a.clone())?;
            let b = ctx.update_value(b.clone())?;
            let eq = a.eq_value(&b);
            Ok(Value::Bool(if op == BinOp::Eq { eq } else { !eq }))
        }
        BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
            let (Binding::Val(a), Binding::Val(b)) = (lhs, rhs) else {
                return Err(type_error_bin(op, lhs, rhs).into());
            };
            let Some(ordering) = a.cmp_value(b) else {
                return Err(type_error_bin(op, lhs, rhs).into());
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Lte => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Gte => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::In => {
            let (Binding::Val(needle), Binding::Val(haystack)) = (lhs, rhs) else {
                return Err(type_error_bin(op, lhs, rhs).into());
            };
            value_in(ctx, needle, haystack)
        }
        BinOp::LOr | BinOp::LAnd => {
            let a = logical_operand(ctx, op, lhs)?;
            let b = logical_operand(ctx, op, rhs)?;
            let result = if op == BinOp::LOr { a || b } else { a && b };
            Ok(Value::Bool(result))
        }
        BinOp::Or | BinOp::And => {
            let a = logical_operand(ctx, op, lhs)?;
            let decided = if op == BinOp::Or { a } else { !a };
            if decided {
                return Ok(Value::Bool(a));
            }
            match rhs {
                Binding::Val(v) => Ok(v.clone()),
                Binding::Funs(_) => Err(type_error_bin(op, lhs, rhs).into()),
            }
        }
        BinOp::Cat => unreachable!("handled above"),
    }
}

/// Coerces one operand of a logical operator to a boolean. Nil and numbers
/// convert implicitly; anything else must already be a Bool.
fn logical_operand(ctx: &mut Interp<'_>, op: BinOp, operand: &Binding) -> ExecResult<bool> {
    let Binding::Val(v) = operand else {
        return Err(MashError::type_error(format!(
            "Unsupported type for '{}'. Given value is a function",
            op.symbol()
        ))
        .into());
    };
    if let Some(b) = v.truthy_raw() {
        return Ok(b);
    }
    if let Value::Object(_) = v {
        return ctx.truthy(v, op.symbol());
    }
    Err(MashError::type_error(format!(
        "Unsupported type for '{}'. Given value is '{}'",
        op.symbol(),
        v.literal()
    ))
    .into())
}

fn cat_text(ctx: &mut Interp<'_>, operand: &Binding) -> ExecResult<String> {
    match operand {
        Binding::Funs(funs) => Ok(funs
            .first()
            .map_or_else(String::new, |f| format!("<function '{}'>", f.name))),
        Binding::Val(v) => ctx.str_of_value(v),
    }
}

/// Evaluates a unary operator.
pub fn un_op(ctx: &mut Interp<'_>, op: UnOp, src: &Binding) -> ExecResult<Value> {
    match op {
        UnOp::Neg => match src.as_value() {
            Some(Value::Int(i)) => Ok(Value::Int(-i)),
            Some(Value::Float(f)) => Ok(Value::Float(-f)),
            _ => Err(MashError::type_error("Unsupported type for unary '-'").into()),
        },
        UnOp::LNot => {
            if let Binding::Val(recv @ Value::Object(_)) = src {
                if let Some(result) = call::call_method(ctx, recv, "(!)", vec![])? {
                    return Ok(result);
                }
                let Binding::Val(v) = src else { unreachable!() };
                let truthy = ctx.truthy(v, "not")?;
                return Ok(Value::Bool(!truthy));
            }
            match src.as_value().and_then(Value::truthy_raw) {
                Some(truthy) => Ok(Value::Bool(!truthy)),
                None => Err(MashError::type_error("Unsupported type for 'not'").into()),
            }
        }
        UnOp::Inc | UnOp::Dec => {
            let one = BigInt::from(1);
            match src.as_value() {
                Some(Value::Int(i)) => Ok(Value::Int(if op == UnOp::Inc { i + one } else { i - one })),
                Some(Value::Float(f)) => Ok(Value::Float(if op == UnOp::Inc { f + 1.0 } else { f - 1.0 })),
                _ => Err(MashError::type_error("Unsupported type for increment").into()),
            }
        }
    }
}

fn index_int(index: &Value, what: &str) -> ExecResult<i64> {
    match index {
        Value::Int(i) => i
            .to_i64()
            .ok_or_else(|| MashError::new(ErrorKind::IndexError, format!("{what} index out of range")).into()),
        other => Err(MashError::type_error(format!(
            "{what} indices must be Int, not {}",
            other.type_name()
        ))
        .into()),
    }
}

fn wrap_index(i: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let wrapped = if i < 0 { i + len } else { i };
    (0..len).contains(&wrapped).then_some(wrapped as usize)
}

/// Indexing: `src[index]`.
pub fn value_at(ctx: &mut Interp<'_>, src: &Binding, index: &Value) -> ExecResult<Value> {
    let value = match src {
        Binding::Funs(_) => {
            return Err(MashError::type_error("Functions are not subscriptable").into());
        }
        Binding::Val(v) => v,
    };
    match value {
        Value::List(cells) => {
            let i = index_int(index, "List")?;
            let at = wrap_index(i, cells.len())
                .ok_or_else(|| MashError::new(ErrorKind::IndexError, "List index out of range"))?;
            let cell = cells[at].clone();
            ctx.resolve_cell(&cell)
        }
        Value::Dict(pairs) => {
            let key = ctx.update_value(index.clone())?;
            for (k, v) in pairs.iter() {
                let k = ctx.resolve_cell(k)?;
                if k.eq_value(&key) {
                    return ctx.resolve_cell(&v.clone());
                }
            }
            Err(MashError::new(ErrorKind::KeyError, format!("Key {} not found", key.literal())).into())
        }
        Value::Str(s) => {
            let i = index_int(index, "String")?;
            let chars: Vec<char> = s.value.chars().collect();
            let at = wrap_index(i, chars.len())
                .ok_or_else(|| MashError::new(ErrorKind::IndexError, "String index out of range"))?;
            Ok(Value::Str(Rc::new(MashStr::resolved(chars[at].to_string()))))
        }
        recv @ Value::Object(_) => call::call_method(ctx, recv, "([])", vec![Binding::Val(index.clone())])?
            .ok_or_else(|| {
                MashError::type_error(format!("'{}' object is not subscriptable", recv.type_name())).into()
            }),
        other => Err(MashError::type_error(format!("Type '{}' is not subscriptable", other.type_name())).into()),
    }
}

/// Membership: `needle in haystack`.
fn value_in(ctx: &mut Interp<'_>, needle: &Value, haystack: &Value) -> ExecResult<Value> {
    let needle = ctx.update_value(needle.clone())?;
    match haystack {
        Value::List(cells) => {
            for cell in cells.iter() {
                let v = ctx.resolve_cell(&cell.clone())?;
                if v.eq_value(&needle) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Value::Dict(pairs) => {
            for (k, _) in pairs.iter() {
                let k = ctx.resolve_cell(&k.clone())?;
                if k.eq_value(&needle) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Value::Str(s) => match &needle {
            Value::Str(sub) => Ok(Value::Bool(s.value.contains(&sub.value))),
            other => Err(MashError::type_error(format!(
                "'in <String>' requires a String, not {}",
                other.type_name()
            ))
            .into()),
        },
        recv @ Value::Object(_) => call::call_method(ctx, recv, "(in)", vec![Binding::Val(needle)])?
            .ok_or_else(|| {
                MashError::type_error(format!("Type '{}' does not support 'in'", recv.type_name())).into()
            }),
        other => Err(MashError::type_error(format!("Type '{}' does not support 'in'", other.type_name())).into()),
    }
}

/// Indices selected by `[start:end:step]` over a sequence of length `len`.
/// Missing bounds default to 0, length and 1.
fn slice_positions(len: usize, start: Option<i64>, end: Option<i64>, step: i64) -> MashResult<Vec<usize>> {
    if step == 0 {
        return Err(MashError::value_error("Slice step cannot be zero"));
    }
    let ilen = i64::try_from(len).unwrap_or(i64::MAX);
    let norm = |i: i64| if i < 0 { i + ilen } else { i };
    // Clamping keeps the walk bounded without changing which indices are in
    // range.
    let start = norm(start.unwrap_or(0)).clamp(-1, ilen);
    let end = norm(end.unwrap_or(ilen)).clamp(-1, ilen);
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        if (0..ilen).contains(&i) {
            out.push(i as usize);
        }
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(out)
}

/// Slicing: `src[start:end:step]`.
pub fn value_slice(
    ctx: &mut Interp<'_>,
    src: &Binding,
    start: Option<Value>,
    end: Option<Value>,
    step: Option<Value>,
) -> ExecResult<Value> {
    let value = match src {
        Binding::Funs(_) => {
            return Err(MashError::type_error("Functions cannot be sliced").into());
        }
        Binding::Val(v) => v,
    };
    if let recv @ Value::Object(_) = value {
        let args = vec![
            Binding::Val(start.unwrap_or(Value::Nil)),
            Binding::Val(end.unwrap_or(Value::Nil)),
            Binding::Val(step.unwrap_or(Value::Nil)),
        ];
        return call::call_method(ctx, recv, "([::])", args)?.ok_or_else(|| {
            MashError::type_error(format!("Type '{}' cannot be sliced", recv.type_name())).into()
        });
    }
    let as_bound = |v: Option<Value>, what: &str| -> ExecResult<Option<i64>> {
        match v {
            None => Ok(None),
            Some(v) => Ok(Some(index_int(&v, what)?)),
        }
    };
    match value {
        Value::List(cells) => {
            let start = as_bound(start, "List")?;
            let end = as_bound(end, "List")?;
            let step = as_bound(step, "List")?.unwrap_or(1);
            let positions = slice_positions(cells.len(), start, end, step)?;
            let mut out = Vec::with_capacity(positions.len());
            for p in positions {
                out.push(Cell::Val(ctx.resolve_cell(&cells[p].clone())?));
            }
            Ok(Value::List(Rc::new(out)))
        }
        Value::Str(s) => {
            let start = as_bound(start, "String")?;
            let end = as_bound(end, "String")?;
            let step = as_bound(step, "String")?.unwrap_or(1);
            let chars: Vec<char> = s.value.chars().collect();
            let positions = slice_positions(chars.len(), start, end, step)?;
            let text: String = positions.into_iter().map(|p| chars[p]).collect();
            Ok(Value::Str(Rc::new(MashStr::resolved(text))))
        }
        other => Err(MashError::type_error(format!("Type '{}' cannot be sliced", other.type_name())).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_promotion() {
        let r = numeric_bin(BinOp::Add, &Value::int(2), &Value::Float(0.5)).unwrap();
        assert!(matches!(r, Value::Float(f) if f == 2.5));
    }

    #[test]
    fn true_division_always_floats() {
        let r = numeric_bin(BinOp::FDiv, &Value::int(5), &Value::int(2)).unwrap();
        assert!(matches!(r, Value::Float(f) if f == 2.5));
    }

    #[test]
    fn floor_semantics_for_negative_operands() {
        let r = numeric_bin(BinOp::IDiv, &Value::int(-7), &Value::int(2)).unwrap();
        assert!(matches!(r, Value::Int(i) if i == (-4).into()));
        let r = numeric_bin(BinOp::Mod, &Value::int(-7), &Value::int(2)).unwrap();
        assert!(matches!(r, Value::Int(i) if i == 1.into()));
    }

    #[test]
    fn division_by_zero_is_a_value_error() {
        let err = numeric_bin(BinOp::IDiv, &Value::int(1), &Value::int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        let err = numeric_bin(BinOp::FDiv, &Value::int(1), &Value::int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }

    #[test]
    fn negative_exponent_floats() {
        let r = numeric_bin(BinOp::Exp, &Value::int(2), &Value::int(-1)).unwrap();
        assert!(matches!(r, Value::Float(f) if f == 0.5));
    }

    #[test]
    fn slice_positions_forward_and_reverse() {
        assert_eq!(slice_positions(5, None, None, 1).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_positions(5, Some(1), Some(4), 2).unwrap(), vec![1, 3]);
        assert_eq!(slice_positions(5, Some(4), Some(0), -1).unwrap(), vec![4, 3, 2, 1]);
        assert_eq!(slice_positions(5, Some(-2), None, 1).unwrap(), vec![3, 4]);
        assert!(slice_positions(5, None, None, 0).is_err());
    }
}

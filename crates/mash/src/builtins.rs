use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Num, Signed, ToPrimitive};
use rand::seq::SliceRandom;

use crate::{
    call,
    error::{ErrorKind, ExecResult, MashError},
    eval::Interp,
    ir::BuiltinFn,
    symbol_table::{Binding, NameRef},
    value::{Cell, MashStr, Value, vardump},
};

/// Resolves a host implementation for an `internal` function body.
///
/// Free functions are keyed `<name>_<arity>`, methods and constructors
/// `<ClassName>_<name>_<arity>`, where arity counts declared parameters
/// (including the object).
pub fn lookup(key: &str) -> Option<BuiltinFn> {
    let f: BuiltinFn = match key {
        // type-class constructors (conversions)
        "Int_Int_2" => bi_int,
        "Float_Float_2" => bi_float,
        "String_String_2" => bi_string,
        "Bool_Bool_2" => bi_bool,
        "NilType_NilType_1" => bi_nil,
        "List_List_1" => bi_list_new,
        "Dict_Dict_1" => bi_dict_new,
        // type-class methods
        "String_upper_1" | "upper_1" => bi_upper,
        "String_lower_1" | "lower_1" => bi_lower,
        "String_capitalize_1" | "capitalize_1" => bi_capitalize,
        "String_len_1" | "List_len_1" | "Dict_len_1" | "len_1" => bi_len,
        // reflection
        "type_1" => bi_type,
        "id_1" => bi_id,
        "vardump_1" => bi_vardump,
        "getattr_2" => bi_getattr2,
        "getattr_3" => bi_getattr3,
        "setattr_3" => bi_setattr,
        // collections
        "range_1" => bi_range1,
        "range_2" => bi_range2,
        "range_3" => bi_range3,
        "zip_2" => bi_zip,
        "shuffle_1" => bi_shuffle,
        "reverse_1" => bi_reverse,
        // bit manipulation
        "bitand_2" => bi_bitand,
        "bitor_2" => bi_bitor,
        "bitxor_2" => bi_bitxor,
        "bitnot_1" => bi_bitnot,
        "lshift_2" => bi_lshift,
        "rshift_2" => bi_rshift,
        // math
        "cos_1" => bi_cos,
        "sin_1" => bi_sin,
        "tan_1" => bi_tan,
        "acos_1" => bi_acos,
        "asin_1" => bi_asin,
        "atan_1" => bi_atan,
        "atan_2" => bi_atan2,
        _ => return None,
    };
    Some(f)
}

fn arg<'v>(args: &'v [Binding], index: usize) -> ExecResult<&'v Value> {
    match args.get(index) {
        Some(Binding::Val(v)) => Ok(v),
        Some(Binding::Funs(_)) => {
            Err(MashError::type_error("Function passed where a value is expected").into())
        }
        None => Err(MashError::internal("Missing builtin argument").into()),
    }
}

fn float_arg(args: &[Binding], index: usize, what: &str) -> ExecResult<f64> {
    match arg(args, index)? {
        Value::Int(i) => i
            .to_f64()
            .ok_or_else(|| MashError::value_error("Integer out of float range").into()),
        Value::Float(f) => Ok(*f),
        other => Err(MashError::type_error(format!("{what} accepts only Int or Float, not {}", other.type_name())).into()),
    }
}

fn int_arg<'v>(args: &'v [Binding], index: usize, what: &str) -> ExecResult<&'v BigInt> {
    match arg(args, index)? {
        Value::Int(i) => Ok(i),
        other => Err(MashError::type_error(format!("{what} accepts only Int, not {}", other.type_name())).into()),
    }
}

fn str_arg<'v>(args: &'v [Binding], index: usize, what: &str) -> ExecResult<&'v MashStr> {
    match arg(args, index)? {
        Value::Str(s) => Ok(s),
        other => Err(MashError::type_error(format!("{what} accepts only String, not {}", other.type_name())).into()),
    }
}

// --- conversions ---

fn parse_int(text: &str) -> Option<BigInt> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        BigInt::from_str_radix(hex, 16).ok()?
    } else {
        BigInt::from_str_radix(digits, 10).ok()?
    };
    Some(if negative { -value } else { value })
}

fn bi_int(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let v = arg(&args, 1)?.clone();
    match &v {
        Value::Int(_) => Ok(v),
        Value::Float(f) => BigInt::from_f64(f.trunc())
            .map(Value::Int)
            .ok_or_else(|| MashError::value_error(format!("Cannot convert '{f}' to Int")).into()),
        Value::Bool(b) => Ok(Value::int(i32::from(*b))),
        Value::Str(s) => parse_int(&s.value)
            .map(Value::Int)
            .ok_or_else(|| MashError::value_error(format!("Cannot convert '{}' to Int", s.value)).into()),
        Value::Object(_) => match call::call_method(ctx, &v, "__Int", vec![])? {
            Some(result @ Value::Int(_)) => Ok(result),
            Some(other) => Err(MashError::type_error(format!(
                "__Int has to return an Int, not {}",
                other.type_name()
            ))
            .into()),
            None => Err(MashError::value_error(format!("Cannot convert '{}' to Int", v.type_name())).into()),
        },
        other => Err(MashError::value_error(format!("Cannot convert '{}' to Int", other.literal())).into()),
    }
}

fn bi_float(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let v = arg(&args, 1)?.clone();
    match &v {
        Value::Float(_) => Ok(v),
        Value::Int(i) => i
            .to_f64()
            .map(Value::Float)
            .ok_or_else(|| MashError::value_error("Integer out of float range").into()),
        Value::Bool(b) => Ok(Value::Float(f64::from(i32::from(*b)))),
        Value::Str(s) => s
            .value
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| MashError::value_error(format!("Cannot convert '{}' to Float", s.value)).into()),
        Value::Object(_) => match call::call_method(ctx, &v, "__Float", vec![])? {
            Some(result @ Value::Float(_)) => Ok(result),
            Some(other) => Err(MashError::type_error(format!(
                "__Float has to return a Float, not {}",
                other.type_name()
            ))
            .into()),
            None => Err(MashError::value_error(format!("Cannot convert '{}' to Float", v.type_name())).into()),
        },
        other => Err(MashError::value_error(format!("Cannot convert '{}' to Float", other.literal())).into()),
    }
}

fn bi_string(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let binding = args
        .get(1)
        .cloned()
        .ok_or_else(|| MashError::internal("Missing builtin argument"))?;
    let text = ctx.str_of(&binding)?;
    Ok(Value::Str(Rc::new(MashStr::resolved(text))))
}

fn bi_bool(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let v = arg(&args, 1)?.clone();
    if let Some(b) = v.truthy_raw() {
        return Ok(Value::Bool(b));
    }
    let b = match &v {
        Value::Str(s) => !s.value.is_empty(),
        Value::List(cells) => !cells.is_empty(),
        Value::Dict(pairs) => !pairs.is_empty(),
        Value::Object(_) => ctx.truthy(&v, "Bool conversion")?,
        _ => true,
    };
    Ok(Value::Bool(b))
}

fn bi_nil(_ctx: &mut Interp<'_>, _args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Nil)
}

fn bi_list_new(_ctx: &mut Interp<'_>, _args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::List(Rc::new(vec![])))
}

fn bi_dict_new(_ctx: &mut Interp<'_>, _args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Dict(Rc::new(vec![])))
}

// --- strings ---

fn bi_upper(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let s = str_arg(&args, 0, "upper")?;
    Ok(Value::Str(Rc::new(MashStr::resolved(s.value.to_uppercase()))))
}

fn bi_lower(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let s = str_arg(&args, 0, "lower")?;
    Ok(Value::Str(Rc::new(MashStr::resolved(s.value.to_lowercase()))))
}

fn bi_capitalize(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let s = str_arg(&args, 0, "capitalize")?;
    let mut chars = s.value.chars();
    let text = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    Ok(Value::Str(Rc::new(MashStr::resolved(text))))
}

fn bi_len(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let len = match arg(&args, 0)? {
        Value::Str(s) => s.value.chars().count(),
        Value::List(cells) => cells.len(),
        Value::Dict(pairs) => pairs.len(),
        other => {
            return Err(MashError::type_error(format!(
                "len accepts a String, List or Dict, not {}",
                other.type_name()
            ))
            .into());
        }
    };
    Ok(Value::int(len as u64))
}

// --- reflection ---

fn bi_type(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let type_binding = |ctx: &Interp<'_>, name: &str| -> ExecResult<Value> {
        match ctx.table.get(&NameRef::simple(name))? {
            Binding::Val(v) => Ok(v),
            Binding::Funs(_) => Err(MashError::internal(format!("'{name}' is bound to a function")).into()),
        }
    };
    match &args[0] {
        Binding::Funs(_) => type_binding(ctx, "Type"),
        Binding::Val(Value::Object(o)) => {
            let class = o.borrow().class;
            Ok(Value::Class(class))
        }
        Binding::Val(v) => match v {
            Value::Int(_)
            | Value::Float(_)
            | Value::Bool(_)
            | Value::Nil
            | Value::Str(_)
            | Value::List(_)
            | Value::Dict(_) => type_binding(ctx, &v.type_name()),
            _ => type_binding(ctx, "Type"),
        },
    }
}

fn bi_id(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let id = match &args[0] {
        Binding::Val(v) => v.identity(),
        Binding::Funs(funs) => funs.first().map_or(0, |f| Rc::as_ptr(f) as u64),
    };
    Ok(Value::int(id))
}

fn bi_vardump(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Str(Rc::new(MashStr::resolved(vardump(&args[0])))))
}

fn attr_lookup(ctx: &Interp<'_>, object: &Value, name: &str) -> ExecResult<Option<Binding>> {
    match object {
        Value::Object(o) => Ok(o.borrow().attrs.get(name).cloned()),
        Value::Class(id) | Value::Space(id) => {
            // Documentation attached with d"""…""" is reachable as __doc__.
            if name == "__doc__" {
                let doc = ctx.table.frame(*id).doc.clone();
                return Ok(Some(Binding::Val(doc.map_or(Value::Nil, |text| {
                    Value::Str(Rc::new(MashStr::resolved(text)))
                }))));
            }
            Ok(ctx.table.frame(*id).vars.get(name).cloned())
        }
        other => Err(MashError::type_error(format!(
            "Cannot get attribute of type '{}'",
            other.type_name()
        ))
        .into()),
    }
}

fn bi_getattr2(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let object = arg(&args, 0)?.clone();
    let name = str_arg(&args, 1, "getattr")?.value.clone();
    match attr_lookup(ctx, &object, &name)? {
        Some(Binding::Val(v)) => Ok(v),
        Some(Binding::Funs(_)) => {
            Err(MashError::type_error("Attribute is a function, call it directly").into())
        }
        None => Err(MashError::new(
            ErrorKind::UndefinedReference,
            format!("Undefined reference to '{name}' in '{}'", object.type_name()),
        )
        .into()),
    }
}

fn bi_getattr3(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let object = arg(&args, 0)?.clone();
    let name = str_arg(&args, 1, "getattr")?.value.clone();
    match attr_lookup(ctx, &object, &name)? {
        Some(Binding::Val(v)) => Ok(v),
        Some(Binding::Funs(_)) => {
            Err(MashError::type_error("Attribute is a function, call it directly").into())
        }
        None => Ok(arg(&args, 2)?.clone()),
    }
}

fn bi_setattr(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let object = arg(&args, 0)?.clone();
    let name = str_arg(&args, 1, "setattr")?.value.clone();
    let value = args
        .get(2)
        .cloned()
        .ok_or_else(|| MashError::internal("Missing builtin argument"))?;
    match object {
        Value::Object(o) => {
            o.borrow_mut().attrs.insert(name, value);
        }
        Value::Class(id) | Value::Space(id) => {
            ctx.table.frame_mut(id).vars.insert(name, value);
        }
        other => {
            return Err(MashError::type_error(format!(
                "Cannot set attribute for type '{}'",
                other.type_name()
            ))
            .into());
        }
    }
    Ok(Value::Nil)
}

// --- collections ---

fn range_bound(args: &[Binding], index: usize) -> ExecResult<i64> {
    int_arg(args, index, "range")?
        .to_i64()
        .ok_or_else(|| MashError::value_error("Range bound out of range").into())
}

fn make_range(start: i64, end: i64, step: i64) -> ExecResult<Value> {
    if step == 0 {
        return Err(MashError::value_error("Range step cannot be zero").into());
    }
    let mut cells = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        cells.push(Cell::Val(Value::int(i)));
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::List(Rc::new(cells)))
}

fn bi_range1(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    make_range(0, range_bound(&args, 0)?, 1)
}

fn bi_range2(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    make_range(range_bound(&args, 0)?, range_bound(&args, 1)?, 1)
}

fn bi_range3(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    make_range(range_bound(&args, 0)?, range_bound(&args, 1)?, range_bound(&args, 2)?)
}

fn list_arg(args: &[Binding], index: usize, what: &str) -> ExecResult<Rc<Vec<Cell>>> {
    match arg(args, index)? {
        Value::List(cells) => Ok(cells.clone()),
        other => Err(MashError::type_error(format!("{what} accepts only List, not {}", other.type_name())).into()),
    }
}

fn bi_zip(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let left = list_arg(&args, 0, "zip")?;
    let right = list_arg(&args, 1, "zip")?;
    let mut out = Vec::with_capacity(left.len().min(right.len()));
    for (a, b) in left.iter().zip(right.iter()) {
        let a = ctx.resolve_cell(&a.clone())?;
        let b = ctx.resolve_cell(&b.clone())?;
        out.push(Cell::Val(Value::List(Rc::new(vec![Cell::Val(a), Cell::Val(b)]))));
    }
    Ok(Value::List(Rc::new(out)))
}

/// Shuffles a copy of the list; the original keeps its order.
fn bi_shuffle(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let cells = list_arg(&args, 0, "shuffle")?;
    let mut out = Vec::with_capacity(cells.len());
    for cell in cells.iter() {
        out.push(Cell::Val(ctx.resolve_cell(&cell.clone())?));
    }
    out.shuffle(&mut rand::thread_rng());
    Ok(Value::List(Rc::new(out)))
}

fn bi_reverse(ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    match arg(&args, 0)? {
        Value::List(cells) => {
            let cells = cells.clone();
            let mut out = Vec::with_capacity(cells.len());
            for cell in cells.iter().rev() {
                out.push(Cell::Val(ctx.resolve_cell(&cell.clone())?));
            }
            Ok(Value::List(Rc::new(out)))
        }
        Value::Str(s) => Ok(Value::Str(Rc::new(MashStr::resolved(
            s.value.chars().rev().collect::<String>(),
        )))),
        other => Err(MashError::type_error(format!(
            "reverse accepts a List or String, not {}",
            other.type_name()
        ))
        .into()),
    }
}

// --- bit manipulation ---

fn bi_bitand(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Int(int_arg(&args, 0, "bitand")? & int_arg(&args, 1, "bitand")?))
}

fn bi_bitor(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Int(int_arg(&args, 0, "bitor")? | int_arg(&args, 1, "bitor")?))
}

fn bi_bitxor(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Int(int_arg(&args, 0, "bitxor")? ^ int_arg(&args, 1, "bitxor")?))
}

fn bi_bitnot(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let x = int_arg(&args, 0, "bitnot")?;
    Ok(Value::Int(-(x + BigInt::from(1))))
}

fn shift_amount(args: &[Binding], what: &str) -> ExecResult<usize> {
    let count = int_arg(args, 1, what)?;
    if count.is_negative() {
        return Err(MashError::value_error("Shift count cannot be negative").into());
    }
    count
        .to_usize()
        .ok_or_else(|| MashError::value_error("Shift count too large").into())
}

fn bi_lshift(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let x = int_arg(&args, 0, "lshift")?.clone();
    Ok(Value::Int(x << shift_amount(&args, "lshift")?))
}

fn bi_rshift(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let x = int_arg(&args, 0, "rshift")?.clone();
    Ok(Value::Int(x >> shift_amount(&args, "rshift")?))
}

// --- math ---

fn bi_cos(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Float(float_arg(&args, 0, "cos")?.cos()))
}

fn bi_sin(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Float(float_arg(&args, 0, "sin")?.sin()))
}

fn bi_tan(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Float(float_arg(&args, 0, "tan")?.tan()))
}

fn bi_acos(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Float(float_arg(&args, 0, "acos")?.acos()))
}

fn bi_asin(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Float(float_arg(&args, 0, "asin")?.asin()))
}

fn bi_atan(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    Ok(Value::Float(float_arg(&args, 0, "atan")?.atan()))
}

fn bi_atan2(_ctx: &mut Interp<'_>, args: Vec<Binding>) -> ExecResult<Value> {
    let y = float_arg(&args, 0, "atan")?;
    let x = float_arg(&args, 1, "atan")?;
    Ok(Value::Float(y.atan2(x)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_type_constructors() {
        assert!(lookup("Int_Int_2").is_some());
        assert!(lookup("String_upper_1").is_some());
        assert!(lookup("range_2").is_some());
        assert!(lookup("shuffle_1").is_some());
        assert!(lookup("no_such_builtin_9").is_none());
    }

    #[test]
    fn int_parsing_accepts_hex() {
        assert_eq!(parse_int("0x10"), Some(BigInt::from(16)));
        assert_eq!(parse_int("-42"), Some(BigInt::from(-42)));
        assert_eq!(parse_int("abc"), None);
    }
}

use std::{cmp::Ordering, fmt, rc::Rc};

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::symbol_table::{Binding, FrameId, NameMap, NameRef};

/// A string value.
///
/// Keeps both the textual form as written and the escaped form with
/// `\n \t \\ \" \a \b \f \r \v` resolved. Raw strings skip resolution, so
/// both forms are identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MashStr {
    /// The string as it appeared in the source.
    pub original: String,
    /// The string with escape sequences resolved; this is the display form.
    pub value: String,
}

impl MashStr {
    pub fn new(original: impl Into<String>, escape: bool) -> Self {
        let original = original.into();
        let value = if escape { resolve_escapes(&original) } else { original.clone() };
        Self { original, value }
    }

    /// Wraps an already-resolved string (e.g. one produced by concatenation);
    /// both forms are the given text.
    pub fn resolved(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            original: value.clone(),
            value,
        }
    }
}

fn resolve_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0C}'),
            Some('r') => out.push('\r'),
            Some('v') => out.push('\u{0B}'),
            // Unknown escapes are kept verbatim.
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A collection slot.
///
/// During lowering, list and dict constructors may store unresolved variable
/// names (plain or dotted) for elements whose value is only known at runtime.
/// They are resolved against the symbol table when the collection is read.
#[derive(Debug, Clone)]
pub enum Cell {
    Name(NameRef),
    Val(Value),
}

/// An enumeration type: a named set of enum values.
#[derive(Debug)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<Rc<EnumMember>>,
}

impl EnumType {
    pub fn member(&self, name: &str) -> Option<&Rc<EnumMember>> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// A single enum value; carries its parent enum's name.
/// Equality of enum values is identity.
#[derive(Debug)]
pub struct EnumMember {
    pub enum_name: String,
    pub name: String,
}

/// A class instance: a back-reference to its class frame plus a per-instance
/// attribute map seeded at construction with the class members (inherited
/// members included, constructors excluded).
#[derive(Debug)]
pub struct Instance {
    pub class: FrameId,
    pub class_name: String,
    pub attrs: NameMap,
}

/// Primary runtime value.
///
/// Primitives and collections compare structurally; class instances, frames,
/// enums and enum values compare by identity. Collections, strings, enums and
/// instances are reference-counted so plain assignment preserves identity,
/// frames are owned by the symbol table's arena and referenced by id.
#[derive(Debug, Clone)]
pub enum Value {
    Int(BigInt),
    Float(f64),
    Bool(bool),
    Nil,
    Str(Rc<MashStr>),
    List(Rc<Vec<Cell>>),
    Dict(Rc<Vec<(Cell, Cell)>>),
    Enum(Rc<EnumType>),
    EnumVal(Rc<EnumMember>),
    Object(Rc<std::cell::RefCell<Instance>>),
    Class(FrameId),
    Space(FrameId),
}

impl Value {
    pub fn int(v: impl Into<BigInt>) -> Self {
        Self::Int(v.into())
    }

    /// Canonical type name, as used by typed-argument matching and `type()`.
    ///
    /// Instances answer with their class name so a parameter can be
    /// constrained to a user class.
    pub fn type_name(&self) -> String {
        match self {
            Self::Int(_) => "Int".to_owned(),
            Self::Float(_) => "Float".to_owned(),
            Self::Bool(_) => "Bool".to_owned(),
            Self::Nil => "NilType".to_owned(),
            Self::Str(_) => "String".to_owned(),
            Self::List(_) => "List".to_owned(),
            Self::Dict(_) => "Dict".to_owned(),
            Self::Enum(_) => "Enum".to_owned(),
            Self::EnumVal(m) => m.enum_name.clone(),
            Self::Object(o) => o.borrow().class_name.clone(),
            Self::Class(_) => "Type".to_owned(),
            Self::Space(_) => "Space".to_owned(),
        }
    }

    /// Truthiness for values that convert implicitly: Nil is false, numbers
    /// are non-zero, booleans are themselves. Other types (including class
    /// instances, which go through `__Bool`) answer `None`.
    pub fn truthy_raw(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(!i.is_zero()),
            Self::Float(f) => Some(*f != 0.0),
            Self::Nil => Some(false),
            _ => None,
        }
    }

    /// Structural equality for primitives and collections, identity for
    /// instances, frames, enums and enum values. Mixed Int/Float compares
    /// numerically. Collections must already be resolved.
    pub fn eq_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                a.to_f64().is_some_and(|a| a == *b)
            }
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Nil, Self::Nil) => true,
            (Self::Str(a), Self::Str(b)) => a.value == b.value,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| cell_eq(x, y))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| cell_eq(ka, kb) && cell_eq(va, vb))
            }
            (Self::Enum(a), Self::Enum(b)) => Rc::ptr_eq(a, b),
            (Self::EnumVal(a), Self::EnumVal(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) | (Self::Space(a), Self::Space(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for `< <= > >=`: numbers compare numerically (booleans count
    /// as 0/1), strings lexicographically on the escaped form. Everything
    /// else is unordered.
    pub fn cmp_value(&self, other: &Self) -> Option<Ordering> {
        fn as_float(v: &Value) -> Option<f64> {
            match v {
                Value::Int(i) => i.to_f64(),
                Value::Float(f) => Some(*f),
                Value::Bool(b) => Some(f64::from(i32::from(*b))),
                _ => None,
            }
        }
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.value.cmp(&b.value)),
            _ => {
                let a = as_float(self)?;
                let b = as_float(other)?;
                a.partial_cmp(&b)
            }
        }
    }

    /// Identity for `id()`: the pointer of the shared payload, a stable frame
    /// index for frames, zero for immediate values.
    pub fn identity(&self) -> u64 {
        match self {
            Self::Str(rc) => Rc::as_ptr(rc) as u64,
            Self::List(rc) => Rc::as_ptr(rc) as u64,
            Self::Dict(rc) => Rc::as_ptr(rc) as u64,
            Self::Enum(rc) => Rc::as_ptr(rc) as u64,
            Self::EnumVal(rc) => Rc::as_ptr(rc) as u64,
            Self::Object(rc) => Rc::as_ptr(rc) as u64,
            Self::Class(id) | Self::Space(id) => u64::from(id.index()),
            _ => 0,
        }
    }

    /// Whether a collection still holds unresolved name cells.
    pub fn needs_update(&self) -> bool {
        match self {
            Self::List(cells) => cells.iter().any(|c| matches!(c, Cell::Name(_))),
            Self::Dict(pairs) => pairs
                .iter()
                .any(|(k, v)| matches!(k, Cell::Name(_)) || matches!(v, Cell::Name(_))),
            _ => false,
        }
    }

    /// Literal form used by the IR dump and error messages that have no
    /// access to the symbol table. Strings display quoted, collections show
    /// unresolved names as written.
    pub fn literal(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => float_repr(*f),
            Self::Bool(b) => if *b { "true" } else { "false" }.to_owned(),
            Self::Nil => "nil".to_owned(),
            Self::Str(s) => format!("\"{}\"", s.original),
            Self::List(cells) => {
                let inner: Vec<String> = cells.iter().map(cell_literal).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Dict(pairs) => {
                if pairs.is_empty() {
                    "{,}".to_owned()
                } else {
                    let inner: Vec<String> = pairs
                        .iter()
                        .map(|(k, v)| format!("{}: {}", cell_literal(k), cell_literal(v)))
                        .collect();
                    format!("{{{}}}", inner.join(", "))
                }
            }
            Self::Enum(e) => format!("<enum '{}'>", e.name),
            Self::EnumVal(m) => format!("{}::{}", m.enum_name, m.name),
            Self::Object(o) => format!("<{} object>", o.borrow().class_name),
            Self::Class(_) => "<class>".to_owned(),
            Self::Space(_) => "<space>".to_owned(),
        }
    }
}

fn cell_eq(a: &Cell, b: &Cell) -> bool {
    match (a, b) {
        (Cell::Val(x), Cell::Val(y)) => x.eq_value(y),
        (Cell::Name(x), Cell::Name(y)) => x.to_string() == y.to_string(),
        _ => false,
    }
}

fn cell_literal(cell: &Cell) -> String {
    match cell {
        Cell::Name(name) => name.to_string(),
        Cell::Val(v) => v.literal(),
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&cell_literal(self))
    }
}

/// Shortest round-trip float display; whole floats keep a trailing `.0`.
pub fn float_repr(f: f64) -> String {
    if f.is_finite() {
        let mut buffer = ryu::Buffer::new();
        buffer.format(f).to_owned()
    } else if f.is_nan() {
        "nan".to_owned()
    } else if f > 0.0 {
        "inf".to_owned()
    } else {
        "-inf".to_owned()
    }
}

/// Seeds a fresh instance attribute map entry, cloning bindings cheaply.
pub fn instance_value(instance: Instance) -> Value {
    Value::Object(Rc::new(std::cell::RefCell::new(instance)))
}

/// Debug dump used by the `vardump` builtin.
pub fn vardump(binding: &Binding) -> String {
    match binding {
        Binding::Funs(funs) => {
            let names: Vec<String> = funs.iter().map(|f| f.header()).collect();
            format!("Function[{}]", names.join("; "))
        }
        Binding::Val(v) => match v {
            Value::Int(i) => format!("Int({i})"),
            Value::Float(f) => format!("Float({})", float_repr(*f)),
            Value::Bool(b) => format!("Bool({b})"),
            Value::Nil => "NilType(nil)".to_owned(),
            Value::Str(s) => format!("String(\"{}\")", s.value),
            Value::List(_) | Value::Dict(_) => format!("{}({})", v.type_name(), v.literal()),
            Value::Enum(e) => format!("Enum({})", e.name),
            Value::EnumVal(m) => format!("EnumValue({}::{})", m.enum_name, m.name),
            Value::Object(o) => format!("Class({})", o.borrow().class_name),
            Value::Class(_) => "ClassFrame".to_owned(),
            Value::Space(_) => "SpaceFrame".to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_are_resolved() {
        let s = MashStr::new("a\\tb\\nc\\\"d", true);
        assert_eq!(s.value, "a\tb\nc\"d");
        assert_eq!(s.original, "a\\tb\\nc\\\"d");
    }

    #[test]
    fn raw_strings_keep_backslashes() {
        let s = MashStr::new("a\\tb", false);
        assert_eq!(s.value, "a\\tb");
    }

    #[test]
    fn structural_equality_on_lists() {
        let a = Value::List(Rc::new(vec![
            Cell::Val(Value::int(1)),
            Cell::Val(Value::int(2)),
        ]));
        let b = Value::List(Rc::new(vec![
            Cell::Val(Value::int(1)),
            Cell::Val(Value::int(2)),
        ]));
        assert!(a.eq_value(&b));
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn mixed_numeric_equality() {
        assert!(Value::int(2).eq_value(&Value::Float(2.0)));
        assert!(!Value::int(2).eq_value(&Value::Float(2.5)));
    }

    #[test]
    fn float_display_keeps_fraction_marker() {
        assert_eq!(float_repr(2.0), "2.0");
        assert_eq!(float_repr(1.5), "1.5");
    }

    #[test]
    fn empty_dict_literal() {
        let d = Value::Dict(Rc::new(vec![]));
        assert_eq!(d.literal(), "{,}");
    }
}

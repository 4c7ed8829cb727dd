use std::{
    cell::{Cell as StdCell, RefCell},
    fmt,
    rc::Rc,
};

use strum::Display;

use crate::{
    error::ExecResult,
    eval::Interp,
    symbol_table::{Binding, FrameId, NameRef},
    value::{EnumType, Value},
};

/// An instruction operand: either an embedded constant or a (possibly
/// dotted) name resolved at execution time.
#[derive(Debug, Clone)]
pub enum Operand {
    Val(Value),
    Name(NameRef),
}

impl Operand {
    pub fn nil() -> Self {
        Self::Val(Value::Nil)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Val(v) => f.write_str(&v.literal()),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

/// A declared function parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Permitted type names for typed parameters (`x:[Int, Float]`).
    pub types: Option<Vec<String>>,
    /// Default value; parameters with defaults are optional.
    pub default: Option<Value>,
    /// Trailing variadic parameter, binds a List of remaining positionals.
    pub variadic: bool,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variadic {
            return write!(f, "*{}", self.name);
        }
        f.write_str(&self.name)?;
        if let Some(types) = &self.types {
            write!(f, ":[{}]", types.join(", "))?;
        }
        if let Some(default) = &self.default {
            write!(f, " = {}", default.literal())?;
        }
        Ok(())
    }
}

/// Host callable backing an `internal` function body.
pub type BuiltinFn = fn(&mut Interp<'_>, Vec<Binding>) -> ExecResult<Value>;

/// Function body: lowered instructions, or a host callable for `internal`
/// declarations.
#[derive(Debug, Clone)]
pub enum FunBody {
    Code(Rc<Vec<Instr>>),
    Internal(BuiltinFn),
}

/// A function variant (one overload).
///
/// Registration and dispatch key off `min_args`/`max_args`; `max_args` is
/// `usize::MAX` for variadic functions. The defining frame is recorded when
/// the definition executes so dispatch can relocate the lookup cursor there.
#[derive(Debug, Clone)]
pub struct FunDef {
    pub name: String,
    pub params: Vec<Param>,
    pub min_args: usize,
    pub max_args: usize,
    pub body: FunBody,
    /// Defined inside a class frame; the first parameter is the object.
    pub method: bool,
    pub constructor: bool,
    pub def_frame: StdCell<FrameId>,
    pub doc: RefCell<Option<String>>,
}

impl FunDef {
    pub fn new(name: impl Into<String>, params: Vec<Param>, body: FunBody, method: bool, constructor: bool) -> Self {
        let min_args = params
            .iter()
            .filter(|p| p.default.is_none() && !p.variadic)
            .count();
        let max_args = if params.last().is_some_and(|p| p.variadic) {
            usize::MAX
        } else {
            params.len()
        };
        Self {
            name: name.into(),
            params,
            min_args,
            max_args,
            body,
            method,
            constructor,
            def_frame: StdCell::new(FrameId::GLOBAL),
            doc: RefCell::new(None),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.body, FunBody::Internal(_))
    }

    /// Copy registered at execution time, carrying the frame the definition
    /// executed in.
    pub fn instantiate(self: &Rc<Self>, frame: FrameId) -> Rc<Self> {
        let copy = Self {
            def_frame: StdCell::new(frame),
            doc: RefCell::new(self.doc.borrow().clone()),
            ..Self::clone(self)
        };
        Rc::new(copy)
    }

    /// Per-parameter type annotations, used to detect identical signatures.
    pub fn signature_types(&self) -> Vec<Option<Vec<String>>> {
        self.params.iter().map(|p| p.types.clone()).collect()
    }

    /// Number of typed parameters; dispatch tries more specific overloads first.
    pub fn typed_count(&self) -> usize {
        self.params.iter().filter(|p| p.types.is_some()).count()
    }

    /// Header shown in diagnostics, e.g. `fun f(x:[Int], y = 1, *rest)`.
    pub fn header(&self) -> String {
        let args: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        let keyword = if self.constructor { "new" } else { "fun" };
        let internal = if self.is_internal() { " internal" } else { "" };
        format!("{keyword} {}({}){internal}", self.name, args.join(", "))
    }
}

/// Positional or named call argument.
#[derive(Debug, Clone)]
pub enum CallArg {
    Pos(Operand),
    Named(String, Operand),
}

impl fmt::Display for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pos(op) => write!(f, "{op}"),
            Self::Named(name, op) => write!(f, "{name} = {op}"),
        }
    }
}

/// A function, method or constructor call site.
#[derive(Debug, Clone)]
pub struct FunCall {
    pub target: NameRef,
    pub args: Vec<CallArg>,
}

impl fmt::Display for FunCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(ToString::to_string).collect();
        write!(f, "{}({})", self.target, args.join(", "))
    }
}

/// Binary expression operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinOp {
    #[strum(serialize = "ADD")]
    Add,
    #[strum(serialize = "SUB")]
    Sub,
    #[strum(serialize = "MUL")]
    Mul,
    #[strum(serialize = "FDIV")]
    FDiv,
    #[strum(serialize = "IDIV")]
    IDiv,
    #[strum(serialize = "MOD")]
    Mod,
    #[strum(serialize = "EXP")]
    Exp,
    #[strum(serialize = "CAT")]
    Cat,
    #[strum(serialize = "LOR")]
    LOr,
    #[strum(serialize = "LAND")]
    LAnd,
    #[strum(serialize = "OR")]
    Or,
    #[strum(serialize = "AND")]
    And,
    #[strum(serialize = "LTE")]
    Lte,
    #[strum(serialize = "GTE")]
    Gte,
    #[strum(serialize = "LT")]
    Lt,
    #[strum(serialize = "GT")]
    Gt,
    #[strum(serialize = "EQ")]
    Eq,
    #[strum(serialize = "NEQ")]
    Neq,
    #[strum(serialize = "IN")]
    In,
}

impl BinOp {
    /// Source-level spelling, used in type errors.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::FDiv => "/",
            Self::IDiv => "//",
            Self::Mod => "%",
            Self::Exp => "^",
            Self::Cat => "++",
            Self::LOr => "or",
            Self::LAnd => "and",
            Self::Or => "||",
            Self::And => "&&",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::In => "in",
        }
    }

    /// Class method overriding this operator, e.g. `(+)`.
    pub fn method_name(self) -> String {
        format!("({})", self.symbol())
    }
}

/// Unary expression operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnOp {
    #[strum(serialize = "NEG")]
    Neg,
    #[strum(serialize = "NOT")]
    LNot,
    #[strum(serialize = "INC")]
    Inc,
    #[strum(serialize = "DEC")]
    Dec,
}

/// One IR instruction.
///
/// The program is a linear list of these; composite control instructions own
/// their body lists. Every expression instruction writes a fresh temporary.
#[derive(Debug, Clone)]
pub enum Instr {
    /// `SET value, dst`
    Assign { dst: NameRef, value: Operand },
    /// Unpacks a List into several destinations; the lengths must match.
    AssignMultiple { dsts: Vec<NameRef>, value: Operand },
    /// Prints a value without a trailing newline. `skip_nil` is set for
    /// statement-position call results so a Nil return stays silent.
    Print { value: Operand, skip_nil: bool },
    /// Declares `dst` with the default when unbound, otherwise prints it.
    SetOrPrint { dst: NameRef, value: Value },
    /// Declares `dst` with the value only when unbound.
    SetIfNotSet { dst: NameRef, value: Operand },
    /// Notebook note text.
    Note { text: String },
    /// Documentation attached to the last defined function/space/class.
    Doc { text: String },
    Nop,
    If {
        cond: Operand,
        then_body: Vec<Instr>,
        else_body: Vec<Instr>,
    },
    While {
        cond: Operand,
        /// Re-lowered condition code run before every re-check.
        cond_insts: Vec<Instr>,
        body: Vec<Instr>,
    },
    DoWhile {
        body: Vec<Instr>,
        cond: Operand,
        cond_insts: Vec<Instr>,
    },
    For {
        targets: Vec<NameRef>,
        iter: Operand,
        body: Vec<Instr>,
    },
    Break,
    Continue,
    Return { value: Operand },
    SpacePush { name: String },
    SpacePop,
    ClassPush { name: String, extends: Vec<String> },
    ClassPop,
    /// Registers a function overload in the current frame.
    Fun(Rc<FunDef>),
    FunCall(FunCall),
    /// `dst = src[index]`
    Member {
        src: Operand,
        index: Operand,
        dst: NameRef,
    },
    /// `dst = src[start:end:step]`
    Slice {
        src: Operand,
        start: Option<Operand>,
        end: Option<Operand>,
        step: Option<Operand>,
        dst: NameRef,
    },
    BinOp {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
        dst: NameRef,
    },
    UnOp {
        op: UnOp,
        src: Operand,
        dst: NameRef,
    },
    TernaryIf {
        cond: Operand,
        then_val: Operand,
        else_val: Operand,
        dst: NameRef,
    },
    /// Declares an enumeration in the current frame.
    DefEnum(Rc<EnumType>),
}

const SPCS: &str = "    ";

fn dump_body(f: &mut fmt::Formatter<'_>, body: &[Instr], indent: usize) -> fmt::Result {
    for instr in body {
        instr.dump(f, indent)?;
        writeln!(f)?;
    }
    Ok(())
}

impl Instr {
    /// Printable form used by the `-s` dump mode.
    pub fn dump(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = SPCS.repeat(indent);
        f.write_str(&pad)?;
        match self {
            Self::Assign { dst, value } => write!(f, "SET {value}, {dst}"),
            Self::AssignMultiple { dsts, value } => {
                let names: Vec<String> = dsts.iter().map(ToString::to_string).collect();
                write!(f, "MSET {value}, [{}]", names.join(", "))
            }
            Self::Print { value, .. } => write!(f, "PRINT {value}"),
            Self::SetOrPrint { dst, value } => write!(f, "SETORPRINT {}, {dst}", value.literal()),
            Self::SetIfNotSet { dst, value } => write!(f, "SETIFNOTSET {value}, {dst}"),
            Self::Note { text } => write!(f, "NOTE \"\"\"{text}\"\"\""),
            Self::Doc { text } => write!(f, "DOC \"\"\"{text}\"\"\""),
            Self::Nop => f.write_str("NOP"),
            Self::If {
                cond,
                then_body,
                else_body,
            } => {
                writeln!(f, "IF ({cond}) {{")?;
                dump_body(f, then_body, indent + 1)?;
                writeln!(f, "{pad}}} ELSE {{")?;
                dump_body(f, else_body, indent + 1)?;
                write!(f, "{pad}}}")
            }
            Self::While { cond, body, .. } => {
                writeln!(f, "WHILE ({cond}) {{")?;
                dump_body(f, body, indent + 1)?;
                write!(f, "{pad}}}")
            }
            Self::DoWhile { body, cond, .. } => {
                writeln!(f, "DO {{")?;
                dump_body(f, body, indent + 1)?;
                write!(f, "{pad}}} WHILE ({cond})")
            }
            Self::For { targets, iter, body } => {
                let names: Vec<String> = targets.iter().map(ToString::to_string).collect();
                writeln!(f, "FOR ({} : {iter}) {{", names.join(", "))?;
                dump_body(f, body, indent + 1)?;
                write!(f, "{pad}}}")
            }
            Self::Break => f.write_str("break"),
            Self::Continue => f.write_str("continue"),
            Self::Return { value } => write!(f, "return {value}"),
            Self::SpacePush { name } => write!(f, "SPCPUSH {name}"),
            Self::SpacePop => f.write_str("SPCPOP"),
            Self::ClassPush { name, .. } => write!(f, "CLSPUSH {name}"),
            Self::ClassPop => f.write_str("CLSPOP"),
            Self::Fun(fun) => match &fun.body {
                FunBody::Internal(_) => f.write_str(&fun.header()),
                FunBody::Code(body) => {
                    let args: Vec<String> = fun.params.iter().map(ToString::to_string).collect();
                    let keyword = if fun.constructor { "new" } else { "fun" };
                    writeln!(f, "{keyword} {}({}) {{", fun.name, args.join(", "))?;
                    dump_body(f, body, indent + 1)?;
                    write!(f, "{pad}}}")
                }
            },
            Self::FunCall(call) => write!(f, "{call}"),
            Self::Member { src, index, dst } => write!(f, "AT {src}, {index}, {dst}"),
            Self::Slice {
                src,
                start,
                end,
                step,
                dst,
            } => {
                let part = |o: &Option<Operand>| o.as_ref().map_or_else(|| "nil".to_owned(), ToString::to_string);
                write!(
                    f,
                    "SLICE {src}, {}, {}, {}, {dst}",
                    part(start),
                    part(end),
                    part(step)
                )
            }
            Self::BinOp { op, lhs, rhs, dst } => write!(f, "{op} {lhs}, {rhs}, {dst}"),
            Self::UnOp { op, src, dst } => write!(f, "{op} {src}, {dst}"),
            Self::TernaryIf {
                cond,
                then_val,
                else_val,
                dst,
            } => write!(f, "TIF {cond}, {then_val}, {else_val}, {dst}"),
            Self::DefEnum(def) => {
                let members: Vec<&str> = def.members.iter().map(|m| m.name.as_str()).collect();
                write!(f, "ENUM {} {{{}}}", def.name, members.join(", "))
            }
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dump(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_bounds_from_params() {
        let params = vec![
            Param {
                name: "a".to_owned(),
                types: None,
                default: None,
                variadic: false,
            },
            Param {
                name: "b".to_owned(),
                types: None,
                default: Some(Value::int(1)),
                variadic: false,
            },
        ];
        let fun = FunDef::new("f", params, FunBody::Code(Rc::new(vec![])), false, false);
        assert_eq!(fun.min_args, 1);
        assert_eq!(fun.max_args, 2);
        assert_eq!(fun.header(), "fun f(a, b = 1)");
    }

    #[test]
    fn variadic_lifts_max_args() {
        let params = vec![Param {
            name: "rest".to_owned(),
            types: None,
            default: None,
            variadic: true,
        }];
        let fun = FunDef::new("f", params, FunBody::Code(Rc::new(vec![])), false, false);
        assert_eq!(fun.max_args, usize::MAX);
        assert_eq!(fun.header(), "fun f(*rest)");
    }

    #[test]
    fn dump_shapes() {
        let set = Instr::Assign {
            dst: NameRef::simple("a"),
            value: Operand::Val(Value::int(5)),
        };
        assert_eq!(set.to_string(), "SET 5, a");

        let op = Instr::BinOp {
            op: BinOp::Add,
            lhs: Operand::Name(NameRef::simple("a")),
            rhs: Operand::Val(Value::int(1)),
            dst: NameRef::simple("'i_1"),
        };
        assert_eq!(op.to_string(), "ADD a, 1, 'i_1");
    }
}

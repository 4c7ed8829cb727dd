use std::rc::Rc;

use crate::{
    ir::{BinOp, UnOp},
    lexer::NoteKind,
    ops,
    parse::{CallArgExpr, Expr, ExprS, LambdaDef, ParamSpec, Stmt},
    value::{Cell, Value},
};

/// Bottom-up constant folding over the parse tree.
///
/// Literal arithmetic collapses with Int→Float promotion, logical operators
/// collapse over literal booleans, and list/dict constructors with constant
/// entries become literal values. Anything that could fail at runtime
/// (division by zero, oversized exponents) is left unfolded so the error
/// surfaces during execution. Note/doc text is normalized here as well.
pub fn fold_program(stmts: Vec<Stmt>) -> Vec<Stmt> {
    stmts.into_iter().map(fold_stmt).collect()
}

fn fold_body(stmts: Vec<Stmt>) -> Vec<Stmt> {
    stmts.into_iter().map(fold_stmt).collect()
}

fn fold_stmt(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Expr(e) => Stmt::Expr(fold_expr(e)),
        Stmt::Assign { target, kind, value } => Stmt::Assign {
            target,
            kind,
            value: fold_expr(value),
        },
        Stmt::If { arms, else_body } => Stmt::If {
            arms: arms
                .into_iter()
                .map(|(cond, body)| (fold_expr(cond), fold_body(body)))
                .collect(),
            else_body: else_body.map(fold_body),
        },
        Stmt::While { cond, body } => Stmt::While {
            cond: fold_expr(cond),
            body: fold_body(body),
        },
        Stmt::DoWhile { body, cond } => Stmt::DoWhile {
            body: fold_body(body),
            cond: fold_expr(cond),
        },
        Stmt::For { targets, iter, body } => Stmt::For {
            targets,
            iter: fold_expr(iter),
            body: fold_body(body),
        },
        Stmt::Fun { name, params, body, loc } => Stmt::Fun {
            name,
            params: fold_params(params),
            body: fold_body(body),
            loc,
        },
        Stmt::Constructor { name, params, body, loc } => Stmt::Constructor {
            name,
            params: fold_params(params),
            body: fold_body(body),
            loc,
        },
        Stmt::Space { name, body } => Stmt::Space {
            name,
            body: fold_body(body),
        },
        Stmt::Class { name, extends, body } => Stmt::Class {
            name,
            extends,
            body: fold_body(body),
        },
        Stmt::Note { kind, text } => {
            let text = match kind {
                NoteKind::Note => normalize_note(&text),
                NoteKind::Doc => normalize_doc(&text),
            };
            Stmt::Note { kind, text }
        }
        Stmt::Return(value) => Stmt::Return(value.map(fold_expr)),
        other @ (Stmt::Enum { .. }
        | Stmt::Import { .. }
        | Stmt::Break
        | Stmt::Continue
        | Stmt::Internal) => other,
    }
}

fn fold_params(params: Vec<ParamSpec>) -> Vec<ParamSpec> {
    params
        .into_iter()
        .map(|p| ParamSpec {
            default: p.default.map(fold_expr),
            ..p
        })
        .collect()
}

fn fold_args(args: Vec<CallArgExpr>) -> Vec<CallArgExpr> {
    args.into_iter()
        .map(|arg| match arg {
            CallArgExpr::Pos(e) => CallArgExpr::Pos(fold_expr(e)),
            CallArgExpr::Named(name, e) => CallArgExpr::Named(name, fold_expr(e)),
        })
        .collect()
}

fn is_numeric(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_))
}

fn fold_expr(expr: ExprS) -> ExprS {
    let loc = expr.loc;
    let node = match expr.node {
        Expr::Bin { op, lhs, rhs } => {
            let lhs = fold_expr(*lhs);
            let rhs = fold_expr(*rhs);
            if let (Some(a), Some(b)) = (lhs.lit(), rhs.lit()) {
                if let Some(folded) = fold_bin(op, a, b) {
                    return ExprS::new(Expr::Lit(folded), loc);
                }
            }
            Expr::Bin {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
        Expr::Un { op, expr: inner } => {
            let inner = fold_expr(*inner);
            if let Some(v) = inner.lit() {
                if let Some(folded) = fold_un(op, v) {
                    return ExprS::new(Expr::Lit(folded), loc);
                }
            }
            Expr::Un {
                op,
                expr: Box::new(inner),
            }
        }
        Expr::Ternary {
            cond,
            then_val,
            else_val,
        } => Expr::Ternary {
            cond: Box::new(fold_expr(*cond)),
            then_val: Box::new(fold_expr(*then_val)),
            else_val: Box::new(fold_expr(*else_val)),
        },
        Expr::ListLit(items) => {
            let items: Vec<ExprS> = items.into_iter().map(fold_expr).collect();
            if items.iter().all(|i| i.lit().is_some()) {
                let cells = items
                    .iter()
                    .filter_map(|i| i.lit().cloned())
                    .map(Cell::Val)
                    .collect();
                return ExprS::new(Expr::Lit(Value::List(Rc::new(cells))), loc);
            }
            Expr::ListLit(items)
        }
        Expr::DictLit(pairs) => {
            let pairs: Vec<(ExprS, ExprS)> = pairs
                .into_iter()
                .map(|(k, v)| (fold_expr(k), fold_expr(v)))
                .collect();
            if pairs.iter().all(|(k, v)| k.lit().is_some() && v.lit().is_some()) {
                let cells = pairs
                    .iter()
                    .filter_map(|(k, v)| Some((Cell::Val(k.lit()?.clone()), Cell::Val(v.lit()?.clone()))))
                    .collect();
                return ExprS::new(Expr::Lit(Value::Dict(Rc::new(cells))), loc);
            }
            Expr::DictLit(pairs)
        }
        Expr::Call { target, args } => Expr::Call {
            target,
            args: fold_args(args),
        },
        Expr::MethodCall { recv, name, args } => Expr::MethodCall {
            recv: Box::new(fold_expr(*recv)),
            name,
            args: fold_args(args),
        },
        Expr::CallExpr { callee, args } => Expr::CallExpr {
            callee: Box::new(fold_expr(*callee)),
            args: fold_args(args),
        },
        Expr::Attr { base, name } => Expr::Attr {
            base: Box::new(fold_expr(*base)),
            name,
        },
        Expr::Index { src, index } => Expr::Index {
            src: Box::new(fold_expr(*src)),
            index: Box::new(fold_expr(*index)),
        },
        Expr::SliceOf { src, start, end, step } => Expr::SliceOf {
            src: Box::new(fold_expr(*src)),
            start: start.map(|e| Box::new(fold_expr(*e))),
            end: end.map(|e| Box::new(fold_expr(*e))),
            step: step.map(|e| Box::new(fold_expr(*e))),
        },
        Expr::Lambda(def) => {
            let LambdaDef { params, body } = &*def;
            Expr::Lambda(Rc::new(LambdaDef {
                params: fold_params(params.clone()),
                body: fold_body(body.clone()),
            }))
        }
        lit @ (Expr::Lit(_) | Expr::Name(_)) => lit,
    };
    ExprS::new(node, loc)
}

/// Folds one binary application over literals, or answers `None` to defer it
/// to runtime.
fn fold_bin(op: BinOp, a: &Value, b: &Value) -> Option<Value> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::FDiv | BinOp::IDiv | BinOp::Mod | BinOp::Exp => {
            if is_numeric(a) && is_numeric(b) {
                ops::numeric_bin(op, a, b).ok()
            } else {
                None
            }
        }
        BinOp::LOr | BinOp::Or => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Some(Value::Bool(*x || *y)),
            _ => None,
        },
        BinOp::LAnd | BinOp::And => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Some(Value::Bool(*x && *y)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_un(op: UnOp, v: &Value) -> Option<Value> {
    match (op, v) {
        (UnOp::Neg, Value::Int(i)) => Some(Value::Int(-i)),
        (UnOp::Neg, Value::Float(f)) => Some(Value::Float(-f)),
        (UnOp::LNot, Value::Bool(b)) => Some(Value::Bool(!b)),
        _ => None,
    }
}

/// A note starting on the line after the opening quotes drops that first
/// newline.
fn normalize_note(text: &str) -> String {
    text.strip_prefix('\n').unwrap_or(text).to_owned()
}

/// Docs additionally lose per-line leading whitespace and a whitespace-only
/// trailing line.
fn normalize_doc(text: &str) -> String {
    let text = text.strip_prefix('\n').unwrap_or(text);
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last().is_some_and(|l| !l.is_empty() && l.chars().all(char::is_whitespace)) {
        lines.pop();
    }
    let trimmed: Vec<&str> = lines.iter().map(|l| l.trim_start()).collect();
    trimmed.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn fold_one(src: &str) -> Stmt {
        let mut stmts = fold_program(parse(src).unwrap());
        assert_eq!(stmts.len(), 1);
        stmts.remove(0)
    }

    fn lit_of(stmt: Stmt) -> Value {
        let Stmt::Expr(e) = stmt else {
            panic!("expected expression statement");
        };
        let Expr::Lit(v) = e.node else {
            panic!("expected folded literal, got {:?}", e.node);
        };
        v
    }

    #[test]
    fn folds_integer_arithmetic() {
        assert!(matches!(lit_of(fold_one("1 + 2 * 3")), Value::Int(v) if v == 7.into()));
    }

    #[test]
    fn promotes_to_float() {
        assert!(matches!(lit_of(fold_one("1 + 2.5")), Value::Float(v) if v == 3.5));
    }

    #[test]
    fn true_division_of_ints_folds_to_float() {
        assert!(matches!(lit_of(fold_one("5 / 2")), Value::Float(v) if v == 2.5));
    }

    #[test]
    fn floor_division_stays_integral() {
        assert!(matches!(lit_of(fold_one("7 // 2")), Value::Int(v) if v == 3.into()));
        assert!(matches!(lit_of(fold_one("-7 // 2")), Value::Int(v) if v == (-4).into()));
    }

    #[test]
    fn division_by_zero_is_deferred() {
        let stmt = fold_one("1 / 0");
        let Stmt::Expr(e) = stmt else { panic!() };
        assert!(matches!(e.node, Expr::Bin { op: BinOp::FDiv, .. }));
    }

    #[test]
    fn folds_boolean_logic() {
        assert!(matches!(lit_of(fold_one("true and false")), Value::Bool(false)));
        assert!(matches!(lit_of(fold_one("not false")), Value::Bool(true)));
    }

    #[test]
    fn folds_negative_literals() {
        assert!(matches!(lit_of(fold_one("-3")), Value::Int(v) if v == (-3).into()));
    }

    #[test]
    fn constant_collections_become_literals() {
        assert!(matches!(lit_of(fold_one("[1, 2, 3]")), Value::List(cells) if cells.len() == 3));
        assert!(matches!(lit_of(fold_one("{\"a\": 1}")), Value::Dict(pairs) if pairs.len() == 1));
    }

    #[test]
    fn non_constant_entries_stay_trees() {
        let stmt = fold_one("[1, x]");
        let Stmt::Expr(e) = stmt else { panic!() };
        assert!(matches!(e.node, Expr::ListLit(_)));
    }

    #[test]
    fn doc_normalization() {
        assert_eq!(normalize_doc("\n  first\n  second\n    "), "first\nsecond");
        assert_eq!(normalize_note("\nhello"), "hello");
    }
}

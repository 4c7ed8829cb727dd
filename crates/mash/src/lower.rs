use std::rc::Rc;

use num_traits::One;

use crate::{
    builtins,
    error::{CodeLoc, ErrorKind, MashError, MashResult},
    fold::fold_program,
    import,
    ir::{BinOp, CallArg, FunBody, FunCall, FunDef, Instr, Operand, Param, UnOp},
    parse::{AssignKind, AssignTarget, CallArgExpr, Expr, ExprS, ParamSpec, Stmt, parse},
    run::Options,
    symbol_table::{Binding, NameRef, RETURN_NAME, SymbolTable},
    value::{Cell, EnumMember, EnumType, Value},
};

/// Maximum depth of nested imports before the chain is considered circular.
const MAX_IMPORT_DEPTH: usize = 16;

/// The IR generator.
///
/// Walks the folded parse tree top-down, emitting IR while mutating the
/// symbol table in analyzer mode: names are declared, spaces and classes are
/// opened, and function overloads are registered so later statements lower
/// against the right scopes. Fresh temporaries use the `'` prefix, which the
/// grammar keeps out of user identifiers.
pub struct Lowerer<'a> {
    table: &'a mut SymbolTable,
    opts: &'a Options,
    next_tmp: u64,
    import_depth: usize,
}

impl<'a> Lowerer<'a> {
    pub fn new(table: &'a mut SymbolTable, opts: &'a Options) -> Self {
        table.analyzer = true;
        Self {
            table,
            opts,
            next_tmp: 0,
            import_depth: 0,
        }
    }

    fn tmp(&mut self) -> NameRef {
        self.next_tmp += 1;
        NameRef::simple(format!("'i_{}", self.next_tmp))
    }

    /// Lowers a statement list, appending instructions to `out`.
    pub fn lower_into(&mut self, stmts: &[Stmt], out: &mut Vec<Instr>) -> MashResult<()> {
        for stmt in stmts {
            self.lower_stmt(stmt, out)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt, out: &mut Vec<Instr>) -> MashResult<()> {
        match stmt {
            Stmt::Expr(expr) => self.lower_expr_stmt(expr, out),
            Stmt::Assign { target, kind, value } => self.lower_assign(target, *kind, value, out),
            Stmt::If { arms, else_body } => self.lower_if(arms, else_body.as_deref(), out),
            Stmt::While { cond, body } => {
                let cond_op = self.lower_expr(cond, out)?;
                let mut cond_insts = Vec::new();
                let recompute = self.lower_expr(cond, &mut cond_insts)?;
                sync_cond(&cond_op, recompute, &mut cond_insts);
                let body = self.lower_block(body)?;
                out.push(Instr::While {
                    cond: cond_op,
                    cond_insts,
                    body,
                });
                Ok(())
            }
            Stmt::DoWhile { body, cond } => {
                let body = self.lower_block(body)?;
                let mut cond_insts = Vec::new();
                let cond_op = self.lower_expr(cond, &mut cond_insts)?;
                out.push(Instr::DoWhile {
                    body,
                    cond: cond_op,
                    cond_insts,
                });
                Ok(())
            }
            Stmt::For { targets, iter, body } => {
                let iter_op = self.lower_expr(iter, out)?;
                self.table.push(false);
                for target in targets {
                    let _ = self.table.assign(target, Binding::nil());
                }
                let mut body_instrs = Vec::new();
                let result = self.lower_into(body, &mut body_instrs);
                self.table.pop(1);
                result?;
                out.push(Instr::For {
                    targets: targets.clone(),
                    iter: iter_op,
                    body: body_instrs,
                });
                Ok(())
            }
            Stmt::Fun { name, params, body, loc } => {
                self.lower_fun(name, params, body, false, *loc, out)?;
                Ok(())
            }
            Stmt::Constructor { name, params, body, loc } => {
                self.lower_fun(name, params, body, true, *loc, out)?;
                Ok(())
            }
            Stmt::Space { name, body } => {
                out.push(Instr::SpacePush { name: name.clone() });
                self.table.push_space(name)?;
                let result = self.lower_into(body, out);
                self.table.pop_space();
                result?;
                out.push(Instr::SpacePop);
                Ok(())
            }
            Stmt::Class { name, extends, body } => {
                out.push(Instr::ClassPush {
                    name: name.clone(),
                    extends: extends.clone(),
                });
                self.table.push_class(name, extends)?;
                let result = self.lower_into(body, out);
                self.table.pop_class();
                result?;
                out.push(Instr::ClassPop);
                Ok(())
            }
            Stmt::Enum { name, members } => {
                let def = Rc::new(EnumType {
                    name: name.clone(),
                    members: members
                        .iter()
                        .map(|m| {
                            Rc::new(EnumMember {
                                enum_name: name.clone(),
                                name: m.clone(),
                            })
                        })
                        .collect(),
                });
                let _ = self
                    .table
                    .assign(&NameRef::simple(name.clone()), Binding::Val(Value::Enum(def.clone())));
                out.push(Instr::DefEnum(def));
                Ok(())
            }
            Stmt::Import { path, alias } => self.lower_import(path, alias.as_deref(), out),
            Stmt::Return(value) => {
                let operand = match value {
                    Some(expr) => self.lower_expr(expr, out)?,
                    None => Operand::nil(),
                };
                out.push(Instr::Return { value: operand });
                Ok(())
            }
            Stmt::Break => {
                out.push(Instr::Break);
                Ok(())
            }
            Stmt::Continue => {
                out.push(Instr::Continue);
                Ok(())
            }
            Stmt::Note { kind, text } => {
                if self.table.shadow_depth() > 0 {
                    return Err(MashError::new(
                        ErrorKind::IncorrectDefinition,
                        "Notes can appear only in the global scope",
                    ));
                }
                match kind {
                    crate::lexer::NoteKind::Note => out.push(Instr::Note { text: text.clone() }),
                    crate::lexer::NoteKind::Doc => out.push(Instr::Doc { text: text.clone() }),
                }
                Ok(())
            }
            Stmt::Internal => Err(MashError::new(
                ErrorKind::IncorrectDefinition,
                "'internal' is only valid as a function body",
            )),
        }
    }

    /// A statement-position expression. Bare names declare-or-print, scoped
    /// names and constants print, calls print their non-nil result.
    fn lower_expr_stmt(&mut self, expr: &ExprS, out: &mut Vec<Instr>) -> MashResult<()> {
        match &expr.node {
            Expr::Name(name) if name.is_simple() => {
                if !self.table.exists_top(&name.segs[0].name) {
                    let _ = self.table.declare(&name.segs[0].name, Binding::nil());
                }
                out.push(Instr::SetOrPrint {
                    dst: name.clone(),
                    value: Value::Nil,
                });
                Ok(())
            }
            Expr::Name(name) => {
                out.push(Instr::Print {
                    value: Operand::Name(name.clone()),
                    skip_nil: false,
                });
                Ok(())
            }
            Expr::Lit(value) => {
                out.push(Instr::Print {
                    value: Operand::Val(value.clone()),
                    skip_nil: false,
                });
                Ok(())
            }
            Expr::Call { .. } | Expr::MethodCall { .. } | Expr::CallExpr { .. } => {
                let operand = self.lower_expr(expr, out)?;
                out.push(Instr::Print {
                    value: operand,
                    skip_nil: true,
                });
                Ok(())
            }
            _ => {
                let operand = self.lower_expr(expr, out)?;
                out.push(Instr::Print {
                    value: operand,
                    skip_nil: false,
                });
                Ok(())
            }
        }
    }

    fn lower_assign(
        &mut self,
        target: &AssignTarget,
        kind: AssignKind,
        value: &ExprS,
        out: &mut Vec<Instr>,
    ) -> MashResult<()> {
        match target {
            AssignTarget::Multi(dsts) => {
                let operand = self.lower_expr(value, out)?;
                for dst in dsts {
                    let _ = self.table.assign(dst, Binding::nil());
                }
                out.push(Instr::AssignMultiple {
                    dsts: dsts.clone(),
                    value: operand,
                });
                Ok(())
            }
            AssignTarget::One(dst) => {
                match kind {
                    AssignKind::Set => {
                        let operand = self.lower_expr(value, out)?;
                        // `a = a` has no effect.
                        if matches!(&operand, Operand::Name(name) if name == dst) {
                            out.push(Instr::Nop);
                            return Ok(());
                        }
                        self.record_assign(dst, &operand);
                        out.push(Instr::Assign {
                            dst: dst.clone(),
                            value: operand,
                        });
                    }
                    AssignKind::SetIfNotSet => {
                        let operand = self.lower_expr(value, out)?;
                        self.record_assign(dst, &operand);
                        out.push(Instr::SetIfNotSet {
                            dst: dst.clone(),
                            value: operand,
                        });
                    }
                    AssignKind::Compound(op) => {
                        // `x += 1` / `x -= 1` shrink to INC/DEC.
                        if let (BinOp::Add | BinOp::Sub, Some(Value::Int(step))) = (op, value.lit()) {
                            if step.is_one() {
                                out.push(Instr::UnOp {
                                    op: if op == BinOp::Add { UnOp::Inc } else { UnOp::Dec },
                                    src: Operand::Name(dst.clone()),
                                    dst: dst.clone(),
                                });
                                return Ok(());
                            }
                        }
                        let operand = self.lower_expr(value, out)?;
                        out.push(Instr::BinOp {
                            op,
                            lhs: Operand::Name(dst.clone()),
                            rhs: operand,
                            dst: dst.clone(),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Records the binding in the analyzer table so later lowering decisions
    /// see the name. Dotted destinations are a runtime question.
    fn record_assign(&mut self, dst: &NameRef, operand: &Operand) {
        if dst.is_simple() {
            let binding = match operand {
                Operand::Val(v) => Binding::Val(v.clone()),
                Operand::Name(_) => Binding::nil(),
            };
            let _ = self.table.assign(dst, binding);
        }
    }

    fn lower_block(&mut self, body: &[Stmt]) -> MashResult<Vec<Instr>> {
        self.table.push(false);
        let mut instrs = Vec::new();
        let result = self.lower_into(body, &mut instrs);
        self.table.pop(1);
        result?;
        Ok(instrs)
    }

    fn lower_if(
        &mut self,
        arms: &[(ExprS, Vec<Stmt>)],
        else_body: Option<&[Stmt]>,
        out: &mut Vec<Instr>,
    ) -> MashResult<()> {
        let (cond, body) = &arms[0];
        let cond_op = self.lower_expr(cond, out)?;
        let then_body = self.lower_block(body)?;
        let mut else_instrs = Vec::new();
        if arms.len() > 1 {
            // The elif condition code belongs inside the else branch so it
            // only runs when earlier conditions failed.
            self.lower_if(&arms[1..], else_body, &mut else_instrs)?;
        } else if let Some(body) = else_body {
            else_instrs = self.lower_block(body)?;
        }
        out.push(Instr::If {
            cond: cond_op,
            then_body,
            else_body: else_instrs,
        });
        Ok(())
    }

    fn lower_params(&mut self, params: &[ParamSpec], loc: CodeLoc) -> MashResult<Vec<Param>> {
        let mut out = Vec::with_capacity(params.len());
        for (i, spec) in params.iter().enumerate() {
            if spec.variadic && i + 1 != params.len() {
                return Err(MashError::with_loc(
                    ErrorKind::IncorrectDefinition,
                    format!("Variadic argument '{}' has to be last", spec.name),
                    loc,
                ));
            }
            let default = match &spec.default {
                None => None,
                Some(expr) => match expr.lit() {
                    Some(v) => Some(v.clone()),
                    None => {
                        return Err(MashError::with_loc(
                            ErrorKind::IncorrectDefinition,
                            format!("Default value of argument '{}' has to be a constant", spec.name),
                            loc,
                        ));
                    }
                },
            };
            out.push(Param {
                name: spec.name.clone(),
                types: spec.types.clone(),
                default,
                variadic: spec.variadic,
            });
        }
        Ok(out)
    }

    fn lower_fun(
        &mut self,
        name: &str,
        params: &[ParamSpec],
        body: &[Stmt],
        constructor: bool,
        loc: CodeLoc,
        out: &mut Vec<Instr>,
    ) -> MashResult<Rc<FunDef>> {
        let method = self.table.top_is_class();
        let class_name = self
            .table
            .current_space()
            .and_then(|id| self.table.frame(id).name().map(ToOwned::to_owned));
        if !method && name.starts_with('(') {
            return Err(MashError::type_error(
                "Operator overloading is only possible for class methods, not functions",
            ));
        }
        if constructor {
            if !method {
                return Err(MashError::with_loc(
                    ErrorKind::IncorrectDefinition,
                    "Constructor has to be inside of a class",
                    loc,
                ));
            }
            if class_name.as_deref() != Some(name) {
                return Err(MashError::with_loc(
                    ErrorKind::IncorrectDefinition,
                    "Constructor name has to match the class name",
                    loc,
                ));
            }
            if params.is_empty() {
                return Err(MashError::type_error(
                    "Constructor has to take at least one argument - the object itself",
                ));
            }
        }
        let params = self.lower_params(params, loc)?;

        let fun_body = if matches!(body, [Stmt::Internal]) {
            let key = if method {
                format!("{}_{name}_{}", class_name.as_deref().unwrap_or("?"), params.len())
            } else {
                format!("{name}_{}", params.len())
            };
            let Some(host) = builtins::lookup(&key) else {
                let probe = FunDef::new(name, params, FunBody::Code(Rc::new(vec![])), method, constructor);
                return Err(MashError::new(ErrorKind::UndefinedReference, probe.header()));
            };
            FunBody::Internal(host)
        } else {
            self.table.push(true);
            for param in &params {
                let default = param.default.clone().unwrap_or(Value::Nil);
                let _ = self
                    .table
                    .assign(&NameRef::simple(param.name.clone()), Binding::Val(default));
            }
            let mut instrs = Vec::new();
            let result = self.lower_into(body, &mut instrs);
            self.table.pop(1);
            result?;
            FunBody::Code(Rc::new(instrs))
        };

        let def = Rc::new(FunDef::new(name, params, fun_body, method, constructor));
        out.push(Instr::Fun(def.clone()));
        self.table.define_fun(def.instantiate(self.table.top()))?;
        Ok(def)
    }

    fn lower_import(&mut self, path: &[String], alias: Option<&str>, out: &mut Vec<Instr>) -> MashResult<()> {
        if self.import_depth >= MAX_IMPORT_DEPTH {
            return Err(MashError::new(
                ErrorKind::ImportError,
                format!("Import chain too deep at '{}'", path.join("::")),
            ));
        }
        let module_name = path.last().map(String::as_str).unwrap_or_default();
        let space_name = alias.unwrap_or(module_name).to_owned();
        let source = import::load_module(&self.opts.lib_paths, path)?;
        let stmts = parse(&source).map_err(|err| {
            MashError::new(
                ErrorKind::ImportError,
                format!("In module '{}': {err}", path.join("::")),
            )
        })?;
        let stmts = fold_program(stmts);

        out.push(Instr::SpacePush {
            name: space_name.clone(),
        });
        self.table.push_space(&space_name)?;
        self.import_depth += 1;
        let result = self.lower_into(&stmts, out);
        self.import_depth -= 1;
        self.table.pop_space();
        result?;
        out.push(Instr::SpacePop);
        Ok(())
    }

    fn lower_args(&mut self, args: &[CallArgExpr], out: &mut Vec<Instr>) -> MashResult<Vec<CallArg>> {
        let mut lowered = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                CallArgExpr::Pos(expr) => lowered.push(CallArg::Pos(self.lower_expr(expr, out)?)),
                CallArgExpr::Named(name, expr) => {
                    lowered.push(CallArg::Named(name.clone(), self.lower_expr(expr, out)?));
                }
            }
        }
        Ok(lowered)
    }

    /// Emits a call and captures the return slot into a fresh temporary so
    /// several calls can appear inside one expression.
    fn lower_call(&mut self, target: NameRef, args: Vec<CallArg>, out: &mut Vec<Instr>) -> Operand {
        out.push(Instr::FunCall(FunCall { target, args }));
        let dst = self.tmp();
        out.push(Instr::Assign {
            dst: dst.clone(),
            value: Operand::Name(NameRef::simple(RETURN_NAME)),
        });
        Operand::Name(dst)
    }

    fn lower_expr(&mut self, expr: &ExprS, out: &mut Vec<Instr>) -> MashResult<Operand> {
        match &expr.node {
            Expr::Lit(v) => Ok(Operand::Val(v.clone())),
            Expr::Name(name) => Ok(Operand::Name(name.clone())),
            Expr::Bin { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs, out)?;
                let rhs = self.lower_expr(rhs, out)?;
                let dst = self.tmp();
                out.push(Instr::BinOp {
                    op: *op,
                    lhs,
                    rhs,
                    dst: dst.clone(),
                });
                Ok(Operand::Name(dst))
            }
            Expr::Un { op, expr: inner } => {
                let src = self.lower_expr(inner, out)?;
                let dst = self.tmp();
                out.push(Instr::UnOp {
                    op: *op,
                    src,
                    dst: dst.clone(),
                });
                Ok(Operand::Name(dst))
            }
            Expr::Ternary {
                cond,
                then_val,
                else_val,
            } => {
                let cond = self.lower_expr(cond, out)?;
                let then_val = self.lower_expr(then_val, out)?;
                let else_val = self.lower_expr(else_val, out)?;
                let dst = self.tmp();
                out.push(Instr::TernaryIf {
                    cond,
                    then_val,
                    else_val,
                    dst: dst.clone(),
                });
                Ok(Operand::Name(dst))
            }
            Expr::ListLit(items) => {
                let mut cells = Vec::with_capacity(items.len());
                for item in items {
                    cells.push(self.lower_cell(item, out)?);
                }
                Ok(Operand::Val(Value::List(Rc::new(cells))))
            }
            Expr::DictLit(pairs) => {
                let mut cells = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let k = self.lower_cell(k, out)?;
                    let v = self.lower_cell(v, out)?;
                    cells.push((k, v));
                }
                Ok(Operand::Val(Value::Dict(Rc::new(cells))))
            }
            Expr::Call { target, args } => {
                let args = self.lower_args(args, out)?;
                Ok(self.lower_call(target.clone(), args, out))
            }
            Expr::MethodCall { recv, name, args } => {
                let recv_op = self.lower_expr(recv, out)?;
                match recv_op {
                    // A literal receiver reroutes through its type class with
                    // the value as the leading argument.
                    Operand::Val(v) => {
                        let mut target = NameRef::simple(v.type_name());
                        target.push_scope(name.clone());
                        let mut call_args = vec![CallArg::Pos(Operand::Val(v))];
                        call_args.extend(self.lower_args(args, out)?);
                        Ok(self.lower_call(target, call_args, out))
                    }
                    Operand::Name(mut path) => {
                        path.push_attr(name.clone());
                        let args = self.lower_args(args, out)?;
                        Ok(self.lower_call(path, args, out))
                    }
                }
            }
            Expr::CallExpr { callee, args } => {
                let callee_op = self.lower_expr(callee, out)?;
                match callee_op {
                    Operand::Name(target) => {
                        let args = self.lower_args(args, out)?;
                        Ok(self.lower_call(target, args, out))
                    }
                    Operand::Val(v) => Err(MashError::type_error(format!(
                        "Type '{}' is not callable",
                        v.type_name()
                    ))),
                }
            }
            Expr::Attr { base, name } => {
                let base_op = self.lower_expr(base, out)?;
                let mut path = match base_op {
                    Operand::Name(path) => path,
                    Operand::Val(v) => {
                        let dst = self.tmp();
                        out.push(Instr::Assign {
                            dst: dst.clone(),
                            value: Operand::Val(v),
                        });
                        dst
                    }
                };
                path.push_attr(name.clone());
                Ok(Operand::Name(path))
            }
            Expr::Index { src, index } => {
                let src = self.lower_expr(src, out)?;
                let index = self.lower_expr(index, out)?;
                let dst = self.tmp();
                out.push(Instr::Member {
                    src,
                    index,
                    dst: dst.clone(),
                });
                Ok(Operand::Name(dst))
            }
            Expr::SliceOf { src, start, end, step } => {
                let src = self.lower_expr(src, out)?;
                let start = self.lower_opt(start.as_deref(), out)?;
                let end = self.lower_opt(end.as_deref(), out)?;
                let step = self.lower_opt(step.as_deref(), out)?;
                let dst = self.tmp();
                out.push(Instr::Slice {
                    src,
                    start,
                    end,
                    step,
                    dst: dst.clone(),
                });
                Ok(Operand::Name(dst))
            }
            Expr::Lambda(def) => {
                self.next_tmp += 1;
                let name = format!("'lam_{}", self.next_tmp);
                self.lower_fun(&name, &def.params, &def.body, false, expr.loc, out)?;
                Ok(Operand::Name(NameRef::simple(name)))
            }
        }
    }

    fn lower_opt(&mut self, expr: Option<&ExprS>, out: &mut Vec<Instr>) -> MashResult<Option<Operand>> {
        match expr {
            None => Ok(None),
            Some(e) => Ok(Some(self.lower_expr(e, out)?)),
        }
    }

    /// Collection entries: constants stay values, everything else leaves a
    /// name to be resolved when the collection is read.
    fn lower_cell(&mut self, expr: &ExprS, out: &mut Vec<Instr>) -> MashResult<Cell> {
        match self.lower_expr(expr, out)? {
            Operand::Val(v) => Ok(Cell::Val(v)),
            Operand::Name(name) => Ok(Cell::Name(name)),
        }
    }
}

/// Re-lowering a loop condition lands in a fresh temporary; keep the loop's
/// condition slot in sync by copying the recomputed value over.
fn sync_cond(cond: &Operand, recompute: Operand, cond_insts: &mut Vec<Instr>) {
    if let (Operand::Name(target), Operand::Name(source)) = (cond, &recompute) {
        if target != source {
            cond_insts.push(Instr::Assign {
                dst: target.clone(),
                value: recompute,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fold::fold_program, parse::parse};

    fn lower_src(src: &str) -> Vec<Instr> {
        let mut table = SymbolTable::new();
        let opts = Options::default();
        let stmts = fold_program(parse(src).unwrap());
        let mut out = Vec::new();
        Lowerer::new(&mut table, &opts).lower_into(&stmts, &mut out).unwrap();
        out
    }

    fn dump(instrs: &[Instr]) -> Vec<String> {
        instrs.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn bare_name_becomes_set_or_print() {
        let ir = lower_src("a");
        assert_eq!(dump(&ir), vec!["SETORPRINT nil, a"]);
    }

    #[test]
    fn assignment_with_expression_goes_through_a_temp() {
        let ir = lower_src("a = 1\nb = a + 1");
        let lines = dump(&ir);
        assert_eq!(lines[0], "SET 1, a");
        assert_eq!(lines[1], "ADD a, 1, 'i_1");
        assert_eq!(lines[2], "SET 'i_1, b");
    }

    #[test]
    fn constant_folding_reaches_the_ir() {
        let ir = lower_src("a = 2 + 3 * 4");
        assert_eq!(dump(&ir), vec!["SET 14, a"]);
    }

    #[test]
    fn compound_add_one_peepholes_to_inc() {
        let ir = lower_src("a = 0\na += 1\na -= 1\na += 2");
        let lines = dump(&ir);
        assert_eq!(lines[1], "INC a, a");
        assert_eq!(lines[2], "DEC a, a");
        assert_eq!(lines[3], "ADD a, 2, a");
    }

    #[test]
    fn call_result_is_captured_into_a_temp() {
        let ir = lower_src("fun f(x) { return x }\nb = f(1) + f(2)");
        let lines = dump(&ir);
        assert!(lines.iter().any(|l| l == "f(1)"));
        assert!(lines.iter().any(|l| l.starts_with("SET $ret, 'i_")));
    }

    #[test]
    fn statement_call_prints_result() {
        let ir = lower_src("fun f(x) { return x }\nf(1)");
        let lines = dump(&ir);
        assert!(lines.iter().any(|l| l.starts_with("PRINT 'i_")));
    }

    #[test]
    fn spaces_emit_push_and_pop() {
        let ir = lower_src("space A { a = 1 }");
        let lines = dump(&ir);
        assert_eq!(lines[0], "SPCPUSH A");
        assert_eq!(lines[1], "SET 1, a");
        assert_eq!(lines[2], "SPCPOP");
    }

    #[test]
    fn operator_overload_outside_class_is_rejected() {
        let mut table = SymbolTable::new();
        let opts = Options::default();
        let stmts = fold_program(parse("fun (+)(a, b) { return 1 }").unwrap());
        let mut out = Vec::new();
        let err = Lowerer::new(&mut table, &opts)
            .lower_into(&stmts, &mut out)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn constructor_outside_class_is_rejected() {
        let mut table = SymbolTable::new();
        let opts = Options::default();
        let stmts = fold_program(parse("new P(self) { }").unwrap());
        let mut out = Vec::new();
        let err = Lowerer::new(&mut table, &opts)
            .lower_into(&stmts, &mut out)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncorrectDefinition);
    }

    #[test]
    fn list_with_runtime_entry_keeps_a_name_cell() {
        let ir = lower_src("x = 1\nl = [1, x + 1]");
        let lines = dump(&ir);
        assert!(lines.iter().any(|l| l.starts_with("ADD x, 1, 'i_")));
        assert!(lines.iter().any(|l| l.starts_with("SET [1, 'i_")));
    }
}

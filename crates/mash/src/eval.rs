use std::rc::Rc;

use crate::{
    call,
    error::{ExecResult, MashError, MashResult, Signal, Unwind},
    io::PrintWriter,
    ir::{Instr, Operand},
    notebook::Notebook,
    ops,
    symbol_table::{Binding, NameRef, SymbolTable},
    value::{Cell, Value, float_repr},
};

/// The tree-walking evaluator.
///
/// Owns the symbol table and the output sink for one execution. Instructions
/// execute in program order; composite control instructions push a block
/// frame around their bodies and translate control-flow signals according to
/// their kind.
pub struct Interp<'a> {
    pub table: SymbolTable,
    out: &'a mut dyn PrintWriter,
    notebook: Option<Notebook>,
    print_notes: bool,
}

impl<'a> Interp<'a> {
    pub fn new(
        table: SymbolTable,
        out: &'a mut dyn PrintWriter,
        notebook: Option<Notebook>,
        print_notes: bool,
    ) -> Self {
        Self {
            table,
            out,
            notebook,
            print_notes,
        }
    }

    /// Executes a complete program. Control-flow signals escaping all scopes
    /// become user-facing errors here.
    pub fn run(&mut self, program: &[Instr]) -> MashResult<()> {
        for instr in program {
            self.exec(instr).map_err(Unwind::into_error)?;
        }
        if let Some(notebook) = self.notebook.as_mut() {
            notebook.finish()?;
        }
        Ok(())
    }

    fn write_out(&mut self, text: &str) -> MashResult<()> {
        self.out.write(text)?;
        if let Some(notebook) = self.notebook.as_mut() {
            notebook.on_print(text);
        }
        Ok(())
    }

    pub fn exec_block(&mut self, body: &[Instr]) -> ExecResult<()> {
        for instr in body {
            self.exec(instr)?;
        }
        Ok(())
    }

    /// Runs `f` inside a fresh block frame. The frame is popped on every exit
    /// except a `Return`, which instead increments its frame counter so the
    /// catching call site pops the exact number of leaked frames.
    fn run_block_frame(&mut self, f: impl FnOnce(&mut Self) -> ExecResult<()>) -> ExecResult<()> {
        self.table.push(false);
        match f(self) {
            Ok(()) => {
                self.table.pop(1);
                Ok(())
            }
            Err(Unwind::Signal(Signal::Return { value, frames })) => Err(Unwind::Signal(Signal::Return {
                value,
                frames: frames + 1,
            })),
            Err(other) => {
                self.table.pop(1);
                Err(other)
            }
        }
    }

    // --- operand resolution ---

    pub fn resolve(&mut self, operand: &Operand) -> ExecResult<Binding> {
        match operand {
            Operand::Val(v) => Ok(Binding::Val(v.clone())),
            Operand::Name(name) => Ok(self.table.get(name)?),
        }
    }

    /// Resolves an operand that must be a plain value.
    pub fn resolve_value(&mut self, operand: &Operand) -> ExecResult<Value> {
        match self.resolve(operand)? {
            Binding::Val(v) => self.update_value(v),
            Binding::Funs(funs) => Err(MashError::type_error(format!(
                "Function '{}' used where a value is expected",
                funs.first().map_or("?", |f| f.name.as_str())
            ))
            .into()),
        }
    }

    /// Resolves a collection cell to a concrete value.
    pub fn resolve_cell(&mut self, cell: &Cell) -> ExecResult<Value> {
        match cell {
            Cell::Val(v) => self.update_value(v.clone()),
            Cell::Name(name) => match self.table.get(name)? {
                Binding::Val(v) => self.update_value(v),
                Binding::Funs(_) => {
                    Err(MashError::type_error("Functions cannot be stored in collections").into())
                }
            },
        }
    }

    /// Resolves any unresolved name cells inside a collection, producing a
    /// fresh value. Identity is preserved when nothing needs resolving.
    pub fn update_value(&mut self, value: Value) -> ExecResult<Value> {
        if !value.needs_update() {
            return Ok(value);
        }
        match value {
            Value::List(cells) => {
                let mut out = Vec::with_capacity(cells.len());
                for cell in cells.iter() {
                    out.push(Cell::Val(self.resolve_cell(&cell.clone())?));
                }
                Ok(Value::List(Rc::new(out)))
            }
            Value::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs.iter() {
                    let k = self.resolve_cell(&k.clone())?;
                    let v = self.resolve_cell(&v.clone())?;
                    out.push((Cell::Val(k), Cell::Val(v)));
                }
                Ok(Value::Dict(Rc::new(out)))
            }
            other => Ok(other),
        }
    }

    fn update_binding(&mut self, binding: Binding) -> ExecResult<Binding> {
        match binding {
            Binding::Val(v) => Ok(Binding::Val(self.update_value(v)?)),
            funs @ Binding::Funs(_) => Ok(funs),
        }
    }

    // --- display ---

    pub fn str_of(&mut self, binding: &Binding) -> ExecResult<String> {
        match binding {
            Binding::Funs(funs) => {
                let name = funs.first().map_or("?", |f| f.name.as_str());
                if funs.len() > 1 {
                    Ok(format!("<function '{name}' with {} signatures>", funs.len()))
                } else {
                    Ok(format!("<function '{name}'>"))
                }
            }
            Binding::Val(v) => self.str_of_value(v),
        }
    }

    /// Display form. Class instances go through `__String` when defined.
    pub fn str_of_value(&mut self, value: &Value) -> ExecResult<String> {
        match value {
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(float_repr(*f)),
            Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_owned()),
            Value::Nil => Ok("nil".to_owned()),
            Value::Str(s) => Ok(s.value.clone()),
            Value::List(cells) => {
                let mut parts = Vec::with_capacity(cells.len());
                for cell in cells.iter() {
                    let v = self.resolve_cell(&cell.clone())?;
                    parts.push(self.fstr_of_value(&v)?);
                }
                Ok(format!("[{}]", parts.join(", ")))
            }
            Value::Dict(pairs) => {
                if pairs.is_empty() {
                    return Ok("{,}".to_owned());
                }
                let mut parts = Vec::with_capacity(pairs.len());
                for (k, v) in pairs.iter() {
                    let k = self.resolve_cell(&k.clone())?;
                    let v = self.resolve_cell(&v.clone())?;
                    parts.push(format!("{}: {}", self.fstr_of_value(&k)?, self.fstr_of_value(&v)?));
                }
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            Value::Enum(e) => Ok(format!("<enum '{}'>", e.name)),
            Value::EnumVal(m) => Ok(format!("{}::{}", m.enum_name, m.name)),
            Value::Class(id) => Ok(format!(
                "<class '{}'>",
                self.table.frame(*id).name().unwrap_or("?")
            )),
            Value::Space(id) => Ok(format!(
                "<space '{}'>",
                self.table.frame(*id).name().unwrap_or("?")
            )),
            Value::Object(o) => {
                if let Some(result) = call::call_method(self, value, "__String", vec![])? {
                    return match result {
                        Value::Str(s) => Ok(s.value.clone()),
                        other => Err(MashError::type_error(format!(
                            "__String has to return a String, not {}",
                            other.type_name()
                        ))
                        .into()),
                    };
                }
                Ok(format!("<{} object>", o.borrow().class_name))
            }
        }
    }

    /// Display form inside containers: strings keep their quotes.
    pub fn fstr_of_value(&mut self, value: &Value) -> ExecResult<String> {
        match value {
            Value::Str(s) => Ok(format!("\"{}\"", s.original)),
            other => self.str_of_value(other),
        }
    }

    /// Boolean coercion for conditions. Nil and numbers convert implicitly;
    /// class instances call `__Bool`.
    pub fn truthy(&mut self, value: &Value, what: &str) -> ExecResult<bool> {
        if let Some(b) = value.truthy_raw() {
            return Ok(b);
        }
        if let Value::Object(_) = value {
            if let Some(result) = call::call_method(self, value, "__Bool", vec![])? {
                return match result {
                    Value::Bool(b) => Ok(b),
                    other => Err(MashError::type_error(format!(
                        "__Bool has to return a Bool, not {}",
                        other.type_name()
                    ))
                    .into()),
                };
            }
        }
        Err(MashError::type_error(format!(
            "Unexpected expression type '{}' in {} condition",
            value.type_name(),
            what
        ))
        .into())
    }

    fn is_stop_iteration(&self, value: &Value) -> bool {
        match value {
            Value::Class(id) => self.table.frame(*id).name() == Some("StopIteration"),
            Value::Object(o) => o.borrow().class_name == "StopIteration",
            _ => false,
        }
    }

    // --- instruction execution ---

    pub fn exec(&mut self, instr: &Instr) -> ExecResult<()> {
        match instr {
            Instr::Nop => Ok(()),
            Instr::Assign { dst, value } => {
                // Self-assignment is a no-op the generator occasionally emits.
                if let Operand::Name(name) = value {
                    if name == dst {
                        return Ok(());
                    }
                }
                let binding = self.resolve(value)?;
                let binding = self.update_binding(binding)?;
                self.table.assign(dst, binding)?;
                Ok(())
            }
            Instr::AssignMultiple { dsts, value } => {
                let value = self.resolve_value(value)?;
                self.unpack_into(dsts, &value)
            }
            Instr::Print { value, skip_nil } => {
                let binding = self.resolve(value)?;
                if *skip_nil && matches!(binding, Binding::Val(Value::Nil)) {
                    return Ok(());
                }
                let text = self.str_of(&binding)?;
                self.write_out(&text)?;
                Ok(())
            }
            Instr::SetOrPrint { dst, value } => {
                if self.table.exists(dst) {
                    let binding = self.table.get(dst)?;
                    let text = self.str_of(&binding)?;
                    self.write_out(&text)?;
                } else {
                    let default = self.update_value(value.clone())?;
                    self.table.assign(dst, Binding::Val(default))?;
                }
                Ok(())
            }
            Instr::SetIfNotSet { dst, value } => {
                if !self.table.exists(dst) {
                    let binding = self.resolve(value)?;
                    let binding = self.update_binding(binding)?;
                    self.table.assign(dst, binding)?;
                }
                Ok(())
            }
            Instr::Note { text } => {
                if self.print_notes {
                    self.out.write(text)?;
                    self.out.write("\n")?;
                }
                if let Some(notebook) = self.notebook.as_mut() {
                    notebook.on_note(text)?;
                }
                Ok(())
            }
            Instr::Doc { text } => {
                self.table.attach_doc(text);
                Ok(())
            }
            Instr::If {
                cond,
                then_body,
                else_body,
            } => self.run_block_frame(|ctx| {
                let value = ctx.resolve_value(cond)?;
                if ctx.truthy(&value, "if statement")? {
                    ctx.exec_block(then_body)
                } else {
                    ctx.exec_block(else_body)
                }
            }),
            Instr::While {
                cond,
                cond_insts,
                body,
            } => self.run_block_frame(|ctx| {
                let value = ctx.resolve_value(cond)?;
                let mut keep_going = ctx.truthy(&value, "while statement")?;
                while keep_going {
                    match ctx.exec_block(body) {
                        Ok(()) => {}
                        Err(Unwind::Signal(Signal::Break)) => break,
                        Err(Unwind::Signal(Signal::Continue)) => {}
                        Err(other) => return Err(other),
                    }
                    ctx.exec_block(cond_insts)?;
                    let value = ctx.resolve_value(cond)?;
                    keep_going = ctx.truthy(&value, "while statement")?;
                }
                Ok(())
            }),
            Instr::DoWhile {
                body,
                cond,
                cond_insts,
            } => self.run_block_frame(|ctx| {
                loop {
                    match ctx.exec_block(body) {
                        Ok(()) => {}
                        Err(Unwind::Signal(Signal::Break)) => break,
                        Err(Unwind::Signal(Signal::Continue)) => {}
                        Err(other) => return Err(other),
                    }
                    ctx.exec_block(cond_insts)?;
                    let value = ctx.resolve_value(cond)?;
                    if !ctx.truthy(&value, "do while statement")? {
                        break;
                    }
                }
                Ok(())
            }),
            Instr::For { targets, iter, body } => self.run_block_frame(|ctx| ctx.exec_for(targets, iter, body)),
            Instr::Break => Err(Unwind::Signal(Signal::Break)),
            Instr::Continue => Err(Unwind::Signal(Signal::Continue)),
            Instr::Return { value } => {
                let binding = self.resolve(value)?;
                let binding = self.update_binding(binding)?;
                Err(Unwind::Signal(Signal::Return {
                    value: binding,
                    frames: 1,
                }))
            }
            Instr::SpacePush { name } => {
                self.table.push_space(name)?;
                Ok(())
            }
            Instr::SpacePop => {
                self.table.pop_space();
                Ok(())
            }
            Instr::ClassPush { name, extends } => {
                // Parents must be known classes before the subclass exists.
                if !self.table.analyzer {
                    for parent in extends {
                        match self.table.get(&NameRef::simple(parent.clone()))? {
                            Binding::Val(Value::Class(_)) => {}
                            _ => {
                                return Err(MashError::type_error(format!(
                                    "'{parent}' is not a class and cannot be extended"
                                ))
                                .into());
                            }
                        }
                    }
                }
                self.table.push_class(name, extends)?;
                Ok(())
            }
            Instr::ClassPop => {
                self.table.pop_class();
                Ok(())
            }
            Instr::Fun(def) => {
                let instance = def.instantiate(self.table.top());
                self.table.define_fun(instance)?;
                Ok(())
            }
            Instr::FunCall(call) => call::exec_call(self, call),
            Instr::Member { src, index, dst } => {
                let src = self.resolve(src)?;
                let index = self.resolve_value(index)?;
                let value = ops::value_at(self, &src, &index)?;
                self.table.assign(dst, Binding::Val(value))?;
                Ok(())
            }
            Instr::Slice {
                src,
                start,
                end,
                step,
                dst,
            } => {
                let src = self.resolve(src)?;
                let start = self.resolve_opt(start)?;
                let end = self.resolve_opt(end)?;
                let step = self.resolve_opt(step)?;
                let value = ops::value_slice(self, &src, start, end, step)?;
                self.table.assign(dst, Binding::Val(value))?;
                Ok(())
            }
            Instr::BinOp { op, lhs, rhs, dst } => {
                let lhs = self.resolve(lhs)?;
                let rhs = self.resolve(rhs)?;
                let value = ops::bin_op(self, *op, &lhs, &rhs)?;
                self.table.assign(dst, Binding::Val(value))?;
                Ok(())
            }
            Instr::UnOp { op, src, dst } => {
                let src = self.resolve(src)?;
                let value = ops::un_op(self, *op, &src)?;
                self.table.assign(dst, Binding::Val(value))?;
                Ok(())
            }
            Instr::TernaryIf {
                cond,
                then_val,
                else_val,
                dst,
            } => {
                let value = self.resolve_value(cond)?;
                let branch = if self.truthy(&value, "ternary if")? {
                    then_val
                } else {
                    else_val
                };
                let binding = self.resolve(branch)?;
                let binding = self.update_binding(binding)?;
                self.table.assign(dst, binding)?;
                Ok(())
            }
            Instr::DefEnum(def) => {
                self.table
                    .assign(&NameRef::simple(def.name.clone()), Binding::Val(Value::Enum(def.clone())))?;
                Ok(())
            }
        }
    }

    fn resolve_opt(&mut self, operand: &Option<Operand>) -> ExecResult<Option<Value>> {
        match operand {
            None => Ok(None),
            Some(op) => Ok(Some(self.resolve_value(op)?)),
        }
    }

    /// Binds loop targets from one iteration item, unpacking when the loop
    /// declares several names.
    fn unpack_into(&mut self, dsts: &[NameRef], value: &Value) -> ExecResult<()> {
        if dsts.len() == 1 {
            self.table.assign(&dsts[0], Binding::Val(value.clone()))?;
            return Ok(());
        }
        let Value::List(cells) = value else {
            return Err(MashError::type_error(format!("Cannot unpack type {}", value.type_name())).into());
        };
        if dsts.len() > cells.len() {
            return Err(MashError::type_error(format!(
                "Not enough values to unpack. Expected {}, but got {}",
                dsts.len(),
                cells.len()
            ))
            .into());
        }
        if dsts.len() < cells.len() {
            return Err(MashError::type_error(format!(
                "Too many values to unpack. Expected {}, but got {}",
                dsts.len(),
                cells.len()
            ))
            .into());
        }
        for (dst, cell) in dsts.iter().zip(cells.iter()) {
            let v = self.resolve_cell(&cell.clone())?;
            self.table.assign(dst, Binding::Val(v))?;
        }
        Ok(())
    }

    fn exec_for(&mut self, targets: &[NameRef], iter: &Operand, body: &[Instr]) -> ExecResult<()> {
        let iterable = self.resolve_value(iter)?;
        match &iterable {
            Value::List(cells) => {
                let mut items = Vec::with_capacity(cells.len());
                for cell in cells.iter() {
                    items.push(self.resolve_cell(&cell.clone())?);
                }
                self.for_over_items(targets, items, body)
            }
            Value::Dict(pairs) => {
                let mut items = Vec::with_capacity(pairs.len());
                for (k, v) in pairs.iter() {
                    let k = self.resolve_cell(&k.clone())?;
                    let v = self.resolve_cell(&v.clone())?;
                    items.push(Value::List(Rc::new(vec![Cell::Val(k), Cell::Val(v)])));
                }
                self.for_over_items(targets, items, body)
            }
            Value::Object(_) => self.for_over_object(targets, &iterable, body),
            other => {
                Err(MashError::type_error(format!("Cannot iterate over {}", other.type_name())).into())
            }
        }
    }

    fn for_over_items(&mut self, targets: &[NameRef], items: Vec<Value>, body: &[Instr]) -> ExecResult<()> {
        for item in items {
            self.unpack_into(targets, &item)?;
            match self.exec_block(body) {
                Ok(()) => {}
                Err(Unwind::Signal(Signal::Break)) => break,
                Err(Unwind::Signal(Signal::Continue)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Class iteration: `__next` is called until it answers the
    /// `StopIteration` sentinel (the class itself or any instance of it).
    fn for_over_object(&mut self, targets: &[NameRef], iterable: &Value, body: &[Instr]) -> ExecResult<()> {
        loop {
            let Some(item) = call::call_method(self, iterable, "__next", vec![])? else {
                return Err(MashError::type_error(format!(
                    "Cannot iterate over {}: no __next method",
                    iterable.type_name()
                ))
                .into());
            };
            if self.is_stop_iteration(&item) {
                return Ok(());
            }
            self.unpack_into(targets, &item)?;
            match self.exec_block(body) {
                Ok(()) => {}
                Err(Unwind::Signal(Signal::Break)) => return Ok(()),
                Err(Unwind::Signal(Signal::Continue)) => {}
                Err(other) => return Err(other),
            }
        }
    }
}

impl std::fmt::Debug for Interp<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interp")
            .field("analyzer", &self.table.analyzer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, io::CollectStringPrint};

    #[test]
    fn print_writes_without_newline() {
        let mut out = CollectStringPrint::new();
        let mut interp = Interp::new(SymbolTable::new(), &mut out, None, false);
        let program = vec![
            Instr::Assign {
                dst: NameRef::simple("a"),
                value: Operand::Val(Value::int(5)),
            },
            Instr::Print {
                value: Operand::Name(NameRef::simple("a")),
                skip_nil: false,
            },
        ];
        interp.run(&program).unwrap();
        drop(interp);
        assert_eq!(out.output(), "5");
    }

    #[test]
    fn stray_break_is_reported() {
        let mut out = CollectStringPrint::new();
        let mut interp = Interp::new(SymbolTable::new(), &mut out, None, false);
        let err = interp.run(&[Instr::Break]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FlowControl);
    }
}

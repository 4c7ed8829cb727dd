use std::rc::Rc;

use crate::{
    error::{ErrorKind, ExecResult, MashError, MashResult, Signal, Unwind},
    eval::Interp,
    ir::{CallArg, FunBody, FunCall, FunDef},
    symbol_table::{Binding, FrameId, FrameKind, FunList, NameMap, NameRef, RETURN_NAME, SymbolTable},
    value::{Cell, Instance, Value, instance_value},
};

/// A callee after name resolution, ready for overload selection.
struct ResolvedCallee {
    overloads: FunList,
    /// Value bound as the implicit leading object argument (method receiver
    /// or the freshly constructed instance).
    receiver: Option<Binding>,
    /// Set for a constructor-less class call: the produced instance.
    direct_instance: Option<Value>,
    is_constructor: bool,
}

/// Executes a call instruction and stores the result in the return slot.
pub fn exec_call(ctx: &mut Interp<'_>, call: &FunCall) -> ExecResult<()> {
    let (pos, named) = resolve_args(ctx, &call.args)?;
    let callee = resolve_callee(ctx, &call.target)?;
    let display = call.target.to_string();
    let result = invoke(ctx, callee, pos, named, &display)?;
    ctx.table.assign(&NameRef::simple(RETURN_NAME), result)?;
    Ok(())
}

/// Calls a method on a value by name with already-resolved arguments.
///
/// Answers `None` when the receiver has no such method, letting operator
/// dispatch fall back to the built-in rule. Non-instances never have methods
/// here; primitives reach their type classes through call-site paths instead.
pub fn call_method(
    ctx: &mut Interp<'_>,
    recv: &Value,
    name: &str,
    args: Vec<Binding>,
) -> ExecResult<Option<Value>> {
    let Value::Object(instance) = recv else {
        return Ok(None);
    };
    let method = {
        let instance = instance.borrow();
        instance.attrs.get(name).cloned()
    };
    let Some(Binding::Funs(overloads)) = method else {
        return Ok(None);
    };
    let callee = ResolvedCallee {
        overloads,
        receiver: Some(Binding::Val(recv.clone())),
        direct_instance: None,
        is_constructor: false,
    };
    let display = format!("{}.{name}", recv.type_name());
    match invoke(ctx, callee, args, vec![], &display)? {
        Binding::Val(v) => Ok(Some(v)),
        Binding::Funs(_) => Ok(Some(Value::Nil)),
    }
}

fn resolve_args(ctx: &mut Interp<'_>, args: &[CallArg]) -> ExecResult<(Vec<Binding>, Vec<(String, Binding)>)> {
    let mut pos = Vec::new();
    let mut named = Vec::new();
    for arg in args {
        match arg {
            CallArg::Pos(op) => {
                let binding = ctx.resolve(op)?;
                pos.push(update(ctx, binding)?);
            }
            CallArg::Named(name, op) => {
                let binding = ctx.resolve(op)?;
                named.push((name.clone(), update(ctx, binding)?));
            }
        }
    }
    Ok((pos, named))
}

fn update(ctx: &mut Interp<'_>, binding: Binding) -> ExecResult<Binding> {
    match binding {
        Binding::Val(v) => Ok(Binding::Val(ctx.update_value(v)?)),
        funs @ Binding::Funs(_) => Ok(funs),
    }
}

fn class_frame_name(table: &SymbolTable, id: FrameId) -> String {
    table.frame(id).name().unwrap_or("?").to_owned()
}

/// Builds a fresh instance of the class, seeding its attribute map with the
/// class members: parents first (recursively, so inheritance is transitive),
/// each class's own constructor list excluded.
fn new_instance(table: &SymbolTable, class: FrameId) -> MashResult<Value> {
    let mut attrs = NameMap::default();
    seed_attrs(table, class, &mut attrs)?;
    let class_name = class_frame_name(table, class);
    Ok(instance_value(Instance {
        class,
        class_name,
        attrs,
    }))
}

fn seed_attrs(table: &SymbolTable, class: FrameId, attrs: &mut NameMap) -> MashResult<()> {
    let frame = table.frame(class);
    let FrameKind::Class { name, extends } = &frame.kind else {
        return Err(MashError::internal("Instance construction on a non-class frame"));
    };
    for parent in extends {
        match table.get(&NameRef::simple(parent.clone()))? {
            Binding::Val(Value::Class(parent_id)) => seed_attrs(table, parent_id, attrs)?,
            _ => {
                return Err(MashError::type_error(format!("'{parent}' is not a class and cannot be extended")));
            }
        }
    }
    for (key, binding) in &frame.vars {
        if key != name {
            attrs.insert(key.clone(), binding.clone());
        }
    }
    Ok(())
}

fn not_callable(target: &NameRef, value: &Value) -> MashError {
    if target.is_temporary() {
        MashError::type_error(format!("Type '{}' is not callable", value.type_name()))
    } else {
        MashError::type_error(format!("'{target}' is not callable"))
    }
}

fn resolve_callee(ctx: &mut Interp<'_>, target: &NameRef) -> ExecResult<ResolvedCallee> {
    if target.ends_with_attr() {
        return resolve_method_callee(ctx, target);
    }
    match ctx.table.get(target)? {
        Binding::Funs(overloads) => Ok(ResolvedCallee {
            overloads,
            receiver: None,
            direct_instance: None,
            is_constructor: false,
        }),
        Binding::Val(Value::Class(class)) => resolve_constructor(ctx, class),
        Binding::Val(other) => Err(not_callable(target, &other).into()),
    }
}

fn resolve_constructor(ctx: &mut Interp<'_>, class: FrameId) -> ExecResult<ResolvedCallee> {
    let class_name = class_frame_name(&ctx.table, class);
    let constructors = ctx.table.frame(class).vars.get(&class_name).cloned();
    let instance = new_instance(&ctx.table, class)?;
    match constructors {
        Some(Binding::Funs(overloads)) => Ok(ResolvedCallee {
            overloads,
            receiver: Some(Binding::Val(instance)),
            direct_instance: None,
            is_constructor: true,
        }),
        // No explicit constructor: the call produces a bare instance.
        _ => Ok(ResolvedCallee {
            overloads: vec![],
            receiver: None,
            direct_instance: Some(instance),
            is_constructor: true,
        }),
    }
}

/// Resolves `recv.method(…)` shapes: the second-to-last path component is the
/// receiver, the method comes from its attribute map (instances), member
/// frame (spaces/classes) or type class (primitives).
fn resolve_method_callee(ctx: &mut Interp<'_>, target: &NameRef) -> ExecResult<ResolvedCallee> {
    let Some((parent, last)) = target.parent() else {
        return Err(MashError::internal(format!("Malformed call path '{target}'")).into());
    };
    let recv = ctx.table.get(&parent)?;
    let recv = match recv {
        Binding::Funs(_) => {
            return Err(MashError::type_error(format!("'{parent}' is a function and has no methods")).into());
        }
        Binding::Val(v) => v,
    };
    match &recv {
        Value::Object(instance) => {
            let method = {
                let instance = instance.borrow();
                instance.attrs.get(&last.name).cloned()
            };
            match method {
                Some(Binding::Funs(overloads)) => {
                    // Plain function values stored on the instance are called
                    // without the implicit receiver.
                    let is_method = overloads.first().is_some_and(|f| f.method);
                    Ok(ResolvedCallee {
                        overloads,
                        receiver: is_method.then(|| Binding::Val(recv.clone())),
                        direct_instance: None,
                        is_constructor: false,
                    })
                }
                Some(Binding::Val(Value::Class(class))) => resolve_constructor(ctx, class),
                Some(Binding::Val(other)) => Err(not_callable(target, &other).into()),
                None => Err(MashError::new(
                    ErrorKind::UndefinedReference,
                    format!(
                        "Undefined reference to '{}' in instance of class '{}'",
                        last.name,
                        recv.type_name()
                    ),
                )
                .into()),
            }
        }
        Value::Space(id) | Value::Class(id) => {
            let binding = ctx.table.frame(*id).vars.get(&last.name).cloned();
            match binding {
                Some(Binding::Funs(overloads)) => Ok(ResolvedCallee {
                    overloads,
                    receiver: None,
                    direct_instance: None,
                    is_constructor: false,
                }),
                Some(Binding::Val(Value::Class(class))) => resolve_constructor(ctx, class),
                Some(Binding::Val(other)) => Err(not_callable(target, &other).into()),
                None => Err(MashError::undefined(target).into()),
            }
        }
        // Method call on a primitive: reroute to its type class with the
        // receiver prepended, so `"hi".upper()` becomes `String::upper("hi")`.
        primitive => {
            let type_name = primitive.type_name();
            let mut class_path = NameRef::simple(type_name.clone());
            class_path.push_scope(last.name.clone());
            let overloads = match ctx.table.get(&class_path) {
                Ok(Binding::Funs(overloads)) => overloads,
                _ => {
                    return Err(MashError::new(
                        ErrorKind::UndefinedReference,
                        format!("Undefined reference to '{}' for type '{type_name}'", last.name),
                    )
                    .into());
                }
            };
            Ok(ResolvedCallee {
                overloads,
                receiver: Some(Binding::Val(recv.clone())),
                direct_instance: None,
                is_constructor: false,
            })
        }
    }
}

fn binding_type_name(binding: &Binding) -> String {
    match binding {
        Binding::Val(v) => v.type_name(),
        Binding::Funs(_) => "Function".to_owned(),
    }
}

fn bindings_to_list(args: &[Binding]) -> ExecResult<Value> {
    let mut cells = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Binding::Val(v) => cells.push(Cell::Val(v.clone())),
            Binding::Funs(_) => {
                return Err(MashError::type_error("Functions cannot be stored in collections").into());
            }
        }
    }
    Ok(Value::List(Rc::new(cells)))
}

/// Selects an overload, binds arguments, and executes the function.
fn invoke(
    ctx: &mut Interp<'_>,
    callee: ResolvedCallee,
    pos: Vec<Binding>,
    named: Vec<(String, Binding)>,
    display: &str,
) -> ExecResult<Binding> {
    if let Some(instance) = callee.direct_instance {
        return Ok(Binding::Val(instance));
    }

    let implicit = callee.receiver.is_some();
    let mut candidates: Vec<&Rc<FunDef>> = callee
        .overloads
        .iter()
        .filter(|f| {
            let max = if implicit { f.max_args.saturating_sub(1) } else { f.max_args };
            max >= pos.len()
        })
        .collect();
    if candidates.is_empty() {
        let message = if callee.is_constructor {
            format!("Arguments do not match any class '{display}' constructors")
        } else {
            format!("Arguments do not match any function's '{display}' signatures")
        };
        return Err(MashError::new(ErrorKind::UndefinedReference, message).into());
    }
    if !callee.is_constructor && candidates.iter().any(|f| f.constructor) {
        return Err(MashError::type_error("Constructor cannot be called as a function").into());
    }
    // Most specific first: overloads with more typed parameters win ties.
    candidates.sort_by_key(|f| std::cmp::Reverse(f.typed_count()));

    let mut chosen: Option<(Rc<FunDef>, Vec<(String, Binding)>)> = None;
    let mut last_err: Option<MashError> = None;
    'candidates: for fun in candidates {
        let mut bound: Vec<(String, Binding)> = Vec::with_capacity(fun.params.len());
        let params = if implicit {
            let Some(object_param) = fun.params.first() else {
                return Err(
                    MashError::type_error("Class methods have to take the object as its first attribute").into(),
                );
            };
            if object_param.types.is_some() {
                return Err(MashError::type_error("Object argument (self) cannot be type constrained").into());
            }
            let receiver = callee
                .receiver
                .clone()
                .unwrap_or_else(Binding::nil);
            if object_param.variadic {
                let Binding::Val(recv_value) = receiver else {
                    return Err(MashError::type_error("Object argument cannot be a function").into());
                };
                let mut cells = vec![Cell::Val(recv_value)];
                let Value::List(rest) = bindings_to_list(&pos)? else {
                    return Err(MashError::internal("Argument packing failed").into());
                };
                cells.extend(rest.iter().cloned());
                bound.push((object_param.name.clone(), Binding::Val(Value::List(Rc::new(cells)))));
                chosen = Some((fun.clone(), bound));
                break 'candidates;
            }
            bound.push((object_param.name.clone(), receiver));
            &fun.params[1..]
        } else {
            &fun.params[..]
        };

        for (i, param) in params.iter().enumerate() {
            if param.variadic {
                let rest = bindings_to_list(&pos[i.min(pos.len())..])?;
                bound.push((param.name.clone(), Binding::Val(rest)));
                break;
            }
            if i >= pos.len() {
                if param.default.is_some() {
                    break;
                }
                last_err = Some(MashError::type_error(format!(
                    "Function call to '{}' is missing required positional argument '{}'",
                    fun.header(),
                    param.name
                )));
                continue 'candidates;
            }
            let arg = pos[i].clone();
            if let Some(types) = &param.types {
                let type_name = binding_type_name(&arg);
                if !types.contains(&type_name) {
                    last_err = Some(MashError::type_error(format!(
                        "Passed in value for argument {} has unexpected type ({type_name}). \
                         Value should be of following type: {}",
                        param.name,
                        types.join(", ")
                    )));
                    continue 'candidates;
                }
            }
            bound.push((param.name.clone(), arg));
        }
        chosen = Some((fun.clone(), bound));
        break 'candidates;
    }

    let Some((fun, mut bound)) = chosen else {
        let err = last_err
            .unwrap_or_else(|| MashError::type_error(format!("Arguments do not match '{display}'")));
        return Err(err.into());
    };

    for (name, value) in named {
        if fun.params.iter().any(|p| p.default.is_some() && p.name == name) {
            bound.push((name, value));
        } else {
            return Err(MashError::type_error(format!(
                "Argument named '{name}' in function call to '{display}' not found"
            ))
            .into());
        }
    }

    execute_fun(ctx, &fun, bound)
}

/// Runs a selected overload: relocates the cursor to the defining frame,
/// pushes the shadowing call frame, binds defaults then actuals, executes the
/// body, and restores the caller's cursor.
fn execute_fun(ctx: &mut Interp<'_>, fun: &Rc<FunDef>, bound: Vec<(String, Binding)>) -> ExecResult<Binding> {
    let prev_top = ctx.table.top();
    let def_frame = fun.def_frame.get();
    if ctx.table.stack_position(def_frame).is_some() {
        ctx.table.move_top(def_frame);
    }
    ctx.table.push(true);

    for param in &fun.params {
        if let Some(default) = &param.default {
            ctx.table
                .assign(&NameRef::simple(param.name.clone()), Binding::Val(default.clone()))?;
        }
    }
    for (name, binding) in bound {
        ctx.table.assign(&NameRef::simple(name), binding)?;
    }

    let mut explicit_return = false;
    let (result, frames) = match &fun.body {
        FunBody::Internal(host) => {
            let mut args = Vec::with_capacity(fun.params.len());
            for param in &fun.params {
                args.push(ctx.table.get(&NameRef::simple(param.name.clone()))?);
            }
            let value = host(ctx, args)?;
            (Binding::Val(value), 1)
        }
        FunBody::Code(body) => {
            let body = body.clone();
            let mut caught: Option<(Binding, usize)> = None;
            for instr in body.iter() {
                match ctx.exec(instr) {
                    Ok(()) => {}
                    Err(Unwind::Signal(Signal::Return { value, frames })) => {
                        explicit_return = true;
                        caught = Some((value, frames));
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
            caught.unwrap_or((Binding::Val(Value::Nil), 1))
        }
    };

    // User-defined constructors return the object implicitly; an explicit
    // return may only produce nil.
    let result = if fun.constructor && !fun.is_internal() {
        if explicit_return && !matches!(result, Binding::Val(Value::Nil)) {
            return Err(MashError::type_error("Constructor has to return nil").into());
        }
        let object_param = fun
            .params
            .first()
            .ok_or_else(|| MashError::internal("Constructor without an object parameter"))?;
        let object = ctx.table.get(&NameRef::simple(object_param.name.clone()))?;
        if object_param.variadic {
            match object {
                Binding::Val(Value::List(cells)) => match cells.first() {
                    Some(Cell::Val(first)) => Binding::Val(first.clone()),
                    _ => return Err(MashError::internal("Variadic constructor lost its object").into()),
                },
                _ => return Err(MashError::internal("Variadic constructor lost its object").into()),
            }
        } else {
            object
        }
    } else {
        result
    };

    ctx.table.pop(frames);
    ctx.table.move_top(prev_top);
    Ok(result)
}

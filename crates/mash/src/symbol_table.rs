use std::{fmt, rc::Rc};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    error::{ErrorKind, MashError, MashResult},
    ir::FunDef,
    value::Value,
};

/// Well-known slot written by every call and read by the caller immediately
/// after return. The `$` prefix cannot appear in user identifiers.
pub const RETURN_NAME: &str = "$ret";

/// Ordered name→binding map used by frames and instance attribute maps.
pub type NameMap = IndexMap<String, Binding, ahash::RandomState>;

/// Overload set for a single name: non-empty, sorted ascending by `max_args`
/// so dispatch scans the smallest compatible overload first.
pub type FunList = Vec<Rc<FunDef>>;

/// What a name is bound to inside a frame.
#[derive(Debug, Clone)]
pub enum Binding {
    Val(Value),
    Funs(FunList),
}

impl Binding {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Val(v) => Some(v),
            Self::Funs(_) => None,
        }
    }

    pub fn nil() -> Self {
        Self::Val(Value::Nil)
    }
}

/// Stable identifier of a frame in the symbol table's arena.
///
/// Frames for spaces and classes outlive their time on the active stack: they
/// stay in the arena and are referenced by `Value::Space`/`Value::Class`
/// bindings and by class instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

impl FrameId {
    /// The root (global) frame of a fresh table.
    pub const GLOBAL: Self = Self(0);

    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("frame arena exceeded u32 indices"))
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// Leading scope marker of a dotted name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Prefix {
    #[default]
    None,
    /// `@name`: skip the function-local frame window, force enclosing search.
    NonLocal,
    /// `::name`: restrict the search to the global frame.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegKind {
    /// `::` separator, descends into a space/class frame or enum.
    Scope,
    /// `.` separator, descends into an instance attribute map.
    Attr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seg {
    pub kind: SegKind,
    pub name: String,
}

/// A possibly-dotted name: a scope prefix plus one or more segments.
///
/// The first segment is always resolved through the enclosing scope chain;
/// later segments descend left-to-right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRef {
    pub prefix: Prefix,
    pub segs: SmallVec<[Seg; 2]>,
}

impl NameRef {
    pub fn simple(name: impl Into<String>) -> Self {
        Self::prefixed(Prefix::None, name)
    }

    pub fn prefixed(prefix: Prefix, name: impl Into<String>) -> Self {
        let mut segs = SmallVec::new();
        segs.push(Seg {
            kind: SegKind::Scope,
            name: name.into(),
        });
        Self { prefix, segs }
    }

    pub fn push_scope(&mut self, name: impl Into<String>) {
        self.segs.push(Seg {
            kind: SegKind::Scope,
            name: name.into(),
        });
    }

    pub fn push_attr(&mut self, name: impl Into<String>) {
        self.segs.push(Seg {
            kind: SegKind::Attr,
            name: name.into(),
        });
    }

    pub fn is_simple(&self) -> bool {
        self.prefix == Prefix::None && self.segs.len() == 1
    }

    /// Whether the final segment is an attribute access (`a.b` shape), which
    /// makes a call on this name a method call.
    pub fn ends_with_attr(&self) -> bool {
        self.segs.last().is_some_and(|s| s.kind == SegKind::Attr)
    }

    /// Splits off the last segment, leaving the receiver path.
    pub fn parent(&self) -> Option<(Self, &Seg)> {
        if self.segs.len() < 2 {
            return None;
        }
        let (last, rest) = self.segs.split_last()?;
        Some((
            Self {
                prefix: self.prefix,
                segs: rest.iter().cloned().collect(),
            },
            last,
        ))
    }

    /// Whether this is a generator- or runtime-created temporary.
    pub fn is_temporary(&self) -> bool {
        self.segs[0].name.starts_with(['\'', '$'])
    }
}

impl fmt::Display for NameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix {
            Prefix::None => {}
            Prefix::NonLocal => f.write_str("@")?,
            Prefix::Global => f.write_str("::")?,
        }
        for (i, seg) in self.segs.iter().enumerate() {
            if i > 0 {
                f.write_str(match seg.kind {
                    SegKind::Scope => "::",
                    SegKind::Attr => ".",
                })?;
            }
            f.write_str(&seg.name)?;
        }
        Ok(())
    }
}

/// Frame flavors. Space and class frames are always shadowing and carry a
/// name; block frames shadow only when entered by a function call.
#[derive(Debug, Clone)]
pub enum FrameKind {
    Block { shadowing: bool },
    Space { name: String },
    Class { name: String, extends: Vec<String> },
}

#[derive(Debug)]
pub struct Frame {
    pub kind: FrameKind,
    pub vars: NameMap,
    pub doc: Option<String>,
}

impl Frame {
    fn block(shadowing: bool) -> Self {
        Self {
            kind: FrameKind::Block { shadowing },
            vars: NameMap::default(),
            doc: None,
        }
    }

    pub fn is_shadowing(&self) -> bool {
        match &self.kind {
            FrameKind::Block { shadowing } => *shadowing,
            FrameKind::Space { .. } | FrameKind::Class { .. } => true,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::Block { .. } => None,
            FrameKind::Space { name } | FrameKind::Class { name, .. } => Some(name),
        }
    }
}

/// Target of a trailing documentation string.
#[derive(Debug, Clone)]
pub enum DocTarget {
    Frame(FrameId),
    Fun(Rc<FunDef>),
}

/// The multi-layer symbol table.
///
/// Holds an arena of every frame ever created plus the active stack of frame
/// ids with a cursor marking the current top. Lookups walk from the cursor
/// downward; dispatch relocates the cursor to a callee's defining frame so
/// the function body sees its defining scope chain rather than its caller's.
#[derive(Debug)]
pub struct SymbolTable {
    frames: Vec<Frame>,
    stack: Vec<FrameId>,
    cursor: usize,
    shadow_depth: usize,
    /// Space/class frames currently being defined, innermost last.
    spaces: Vec<FrameId>,
    /// Analyzer mode: bindings accumulate during lowering, side effects and
    /// attribute resolution are off.
    pub analyzer: bool,
    last_defined: Option<DocTarget>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::block(false)],
            stack: vec![FrameId(0)],
            cursor: 0,
            shadow_depth: 0,
            spaces: vec![],
            analyzer: false,
            last_defined: None,
        }
    }

    /// Resets to a single empty global frame, invalidating all frame ids.
    /// Used between the analyzer pass and runtime execution.
    pub fn clear(&mut self) {
        self.frames = vec![Frame::block(false)];
        self.stack = vec![FrameId(0)];
        self.cursor = 0;
        self.shadow_depth = 0;
        self.spaces.clear();
        self.last_defined = None;
    }

    fn alloc(&mut self, frame: Frame) -> FrameId {
        let id = FrameId::new(self.frames.len());
        self.frames.push(frame);
        id
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0 as usize]
    }

    pub fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0 as usize]
    }

    pub fn top(&self) -> FrameId {
        self.stack[self.cursor]
    }

    pub fn top_is_class(&self) -> bool {
        matches!(self.frame(self.top()).kind, FrameKind::Class { .. })
    }

    pub fn shadow_depth(&self) -> usize {
        self.shadow_depth
    }

    /// Innermost space/class frame currently being defined.
    pub fn current_space(&self) -> Option<FrameId> {
        self.spaces.last().copied()
    }

    pub fn stack_position(&self, id: FrameId) -> Option<usize> {
        self.stack.iter().position(|f| *f == id)
    }

    /// Moves the cursor to the given frame if it is on the active stack.
    pub fn move_top(&mut self, id: FrameId) -> bool {
        match self.stack_position(id) {
            Some(pos) => {
                self.cursor = pos;
                true
            }
            None => false,
        }
    }

    /// Inserts a fresh block frame above the cursor and advances it.
    pub fn push(&mut self, shadowing: bool) {
        let id = self.alloc(Frame::block(shadowing));
        self.stack.insert(self.cursor + 1, id);
        self.cursor += 1;
        if shadowing {
            self.shadow_depth += 1;
        }
    }

    /// Removes the cursor frame `n` times.
    pub fn pop(&mut self, n: usize) {
        for _ in 0..n {
            debug_assert!(self.cursor > 0, "attempted to pop the global frame");
            if self.cursor == 0 {
                return;
            }
            let id = self.stack.remove(self.cursor);
            if self.frame(id).is_shadowing() {
                self.shadow_depth -= 1;
            }
            self.cursor -= 1;
        }
    }

    /// Opens (or re-opens) the named space in the current top frame.
    pub fn push_space(&mut self, name: &str) -> MashResult<FrameId> {
        let top = self.top();
        let id = match self.frame(top).vars.get(name) {
            Some(Binding::Val(Value::Space(id))) => *id,
            Some(_) => return Err(MashError::redefinition(name)),
            None => {
                let id = self.alloc(Frame {
                    kind: FrameKind::Space { name: name.to_owned() },
                    vars: NameMap::default(),
                    doc: None,
                });
                self.frame_mut(top)
                    .vars
                    .insert(name.to_owned(), Binding::Val(Value::Space(id)));
                id
            }
        };
        self.stack.insert(self.cursor + 1, id);
        self.cursor += 1;
        self.shadow_depth += 1;
        self.spaces.push(id);
        self.last_defined = Some(DocTarget::Frame(id));
        Ok(id)
    }

    pub fn pop_space(&mut self) {
        self.pop(1);
        self.spaces.pop();
    }

    /// Opens a new class frame bound in the current top frame.
    pub fn push_class(&mut self, name: &str, extends: &[String]) -> MashResult<FrameId> {
        let top = self.top();
        if self.frame(top).vars.contains_key(name) {
            return Err(MashError::redefinition(name));
        }
        let id = self.alloc(Frame {
            kind: FrameKind::Class {
                name: name.to_owned(),
                extends: extends.to_vec(),
            },
            vars: NameMap::default(),
            doc: None,
        });
        self.frame_mut(top)
            .vars
            .insert(name.to_owned(), Binding::Val(Value::Class(id)));
        self.stack.insert(self.cursor + 1, id);
        self.cursor += 1;
        self.shadow_depth += 1;
        self.spaces.push(id);
        self.last_defined = Some(DocTarget::Frame(id));
        Ok(id)
    }

    pub fn pop_class(&mut self) {
        self.pop(1);
        self.spaces.pop();
    }

    /// Binds a name in the cursor-top frame, failing on a collision there.
    pub fn declare(&mut self, name: &str, binding: Binding) -> MashResult<()> {
        if self.exists_top(name) {
            return Err(MashError::redefinition(name));
        }
        let top = self.top();
        self.frame_mut(top).vars.insert(name.to_owned(), binding);
        Ok(())
    }

    pub fn exists_top(&self, name: &str) -> bool {
        self.frame(self.top()).vars.contains_key(name)
    }

    /// Highest stack position the walk for the first segment may start from,
    /// or `None` when the prefix leaves nothing to search.
    fn search_start(&self, prefix: Prefix) -> Option<usize> {
        match prefix {
            Prefix::None | Prefix::Global => Some(self.cursor),
            Prefix::NonLocal => {
                // Skip everything down to and including the nearest shadowing
                // frame (the current function-local window).
                let mut i = self.cursor;
                loop {
                    if self.frame(self.stack[i]).is_shadowing() {
                        return i.checked_sub(1);
                    }
                    if i == 0 {
                        return Some(self.cursor);
                    }
                    i -= 1;
                }
            }
        }
    }

    /// Finds the frame holding `name`, walking from the cursor downward.
    fn lookup_scope(&self, name: &str, prefix: Prefix) -> Option<FrameId> {
        if prefix == Prefix::Global {
            let id = self.stack[0];
            return self.frame(id).vars.contains_key(name).then_some(id);
        }
        let start = self.search_start(prefix)?;
        for pos in (0..=start).rev() {
            let id = self.stack[pos];
            if self.frame(id).vars.contains_key(name) {
                return Some(id);
            }
        }
        None
    }

    fn descend(&self, owner: &Binding, seg: &Seg, full: &NameRef) -> MashResult<Binding> {
        let value = match owner {
            Binding::Funs(_) => {
                return Err(MashError::type_error(format!("Cannot scope into a function in '{full}'")));
            }
            Binding::Val(v) => v,
        };
        match value {
            Value::Space(id) | Value::Class(id) => self
                .frame(*id)
                .vars
                .get(&seg.name)
                .cloned()
                .ok_or_else(|| MashError::undefined(full)),
            Value::Enum(e) => e
                .member(&seg.name)
                .map(|m| Binding::Val(Value::EnumVal(m.clone())))
                .ok_or_else(|| MashError::undefined(full)),
            Value::Object(o) => {
                if self.analyzer {
                    return Err(MashError::undefined(full));
                }
                o.borrow()
                    .attrs
                    .get(&seg.name)
                    .cloned()
                    .ok_or_else(|| {
                        MashError::new(
                            ErrorKind::UndefinedReference,
                            format!("Undefined reference to '{}' in instance of class '{}'", seg.name, o.borrow().class_name),
                        )
                    })
            }
            other => Err(MashError::type_error(format!(
                "Cannot scope into type '{}' in '{full}'",
                other.type_name()
            ))),
        }
    }

    /// Reads a name or dotted path.
    pub fn get(&self, name: &NameRef) -> MashResult<Binding> {
        let first = &name.segs[0];
        let frame = self
            .lookup_scope(&first.name, name.prefix)
            .ok_or_else(|| MashError::undefined(name))?;
        let mut binding = self
            .frame(frame)
            .vars
            .get(&first.name)
            .cloned()
            .ok_or_else(|| MashError::undefined(name))?;
        for seg in &name.segs[1..] {
            binding = self.descend(&binding, seg, name)?;
        }
        Ok(binding)
    }

    pub fn exists(&self, name: &NameRef) -> bool {
        if self.analyzer && !name.is_simple() {
            // Dotted existence checks are a runtime question.
            return false;
        }
        self.get(name).is_ok()
    }

    /// Writes a name or dotted path.
    ///
    /// For plain names the frame chosen is the one that already contains the
    /// name walking downward, where a shadowing frame blocks the walk from
    /// crossing into enclosing scope; with no match the cursor-top frame is
    /// used. Dotted paths resolve their owner first and write into it.
    pub fn assign(&mut self, name: &NameRef, binding: Binding) -> MashResult<()> {
        if name.segs.len() > 1 {
            return self.assign_path(name, binding);
        }
        let key = name.segs[0].name.clone();
        if name.prefix == Prefix::Global {
            let id = self.stack[0];
            self.frame_mut(id).vars.insert(key, binding);
            return Ok(());
        }
        let start = self.search_start(name.prefix).unwrap_or(0);
        for pos in (0..=start).rev() {
            let id = self.stack[pos];
            if self.frame(id).vars.contains_key(&key) {
                self.frame_mut(id).vars.insert(key, binding);
                return Ok(());
            }
            if self.frame(id).is_shadowing() {
                break;
            }
        }
        let target = match name.prefix {
            Prefix::NonLocal => self.stack[start],
            _ => self.stack[self.cursor],
        };
        self.frame_mut(target).vars.insert(key, binding);
        Ok(())
    }

    fn assign_path(&mut self, name: &NameRef, binding: Binding) -> MashResult<()> {
        let (parent, last) = name
            .parent()
            .ok_or_else(|| MashError::internal(format!("Malformed path '{name}'")))?;
        let owner = self.get(&parent)?;
        match owner {
            Binding::Val(Value::Space(id)) | Binding::Val(Value::Class(id)) => {
                self.frame_mut(id).vars.insert(last.name.clone(), binding);
                Ok(())
            }
            Binding::Val(Value::Object(o)) => {
                o.borrow_mut().attrs.insert(last.name.clone(), binding);
                Ok(())
            }
            Binding::Val(other) => Err(MashError::type_error(format!(
                "Cannot assign into type '{}' in '{name}'",
                other.type_name()
            ))),
            Binding::Funs(_) => Err(MashError::type_error(format!(
                "Cannot assign into a function in '{name}'"
            ))),
        }
    }

    /// Registers a function overload in the cursor-top frame.
    ///
    /// Overlapping arity ranges with a different maximum are ambiguous; an
    /// overload with the same maximum arity and an identical typed-argument
    /// signature replaces the old one in place; anything else is inserted
    /// preserving ascending `max_args` order.
    pub fn define_fun(&mut self, fun: Rc<FunDef>) -> MashResult<()> {
        let top = self.top();
        let existing = self.frame_mut(top).vars.get_mut(&fun.name);
        match existing {
            Some(Binding::Funs(list)) => {
                let mut replace_at = None;
                for (i, other) in list.iter().enumerate() {
                    if fun.max_args == other.max_args {
                        if fun.signature_types() == other.signature_types() {
                            replace_at = Some(i);
                        }
                        continue;
                    }
                    let overlap = fun.min_args.max(other.min_args) <= fun.max_args.min(other.max_args);
                    if overlap {
                        return Err(MashError::new(
                            ErrorKind::AmbiguousRedefinition,
                            format!(
                                "Function '{}' overloads have overlapping argument ranges",
                                fun.name
                            ),
                        ));
                    }
                }
                if let Some(i) = replace_at {
                    list[i] = fun.clone();
                } else {
                    let at = list
                        .iter()
                        .position(|other| other.max_args > fun.max_args)
                        .unwrap_or(list.len());
                    list.insert(at, fun.clone());
                }
            }
            Some(slot @ Binding::Val(_)) => {
                *slot = Binding::Funs(vec![fun.clone()]);
            }
            None => {
                self.frame_mut(top)
                    .vars
                    .insert(fun.name.clone(), Binding::Funs(vec![fun.clone()]));
            }
        }
        self.last_defined = Some(DocTarget::Fun(fun));
        Ok(())
    }

    /// Attaches a doc string to the most recently defined function, space or
    /// class. A doc with no target is dropped.
    pub fn attach_doc(&mut self, text: &str) {
        match self.last_defined.clone() {
            Some(DocTarget::Frame(id)) => self.frame_mut(id).doc = Some(text.to_owned()),
            Some(DocTarget::Fun(fun)) => *fun.doc.borrow_mut() = Some(text.to_owned()),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunBody, FunDef, Param};

    fn fun(name: &str, min: usize, max: usize) -> Rc<FunDef> {
        let params = (0..max.min(8))
            .map(|i| Param {
                name: format!("a{i}"),
                types: None,
                default: (i >= min).then_some(Value::Nil),
                variadic: false,
            })
            .collect();
        Rc::new(FunDef::new(name, params, FunBody::Code(Rc::new(vec![])), false, false))
    }

    #[test]
    fn declare_then_get() {
        let mut table = SymbolTable::new();
        table.declare("a", Binding::Val(Value::int(5))).unwrap();
        assert!(table.exists_top("a"));
        let got = table.get(&NameRef::simple("a")).unwrap();
        assert!(matches!(got, Binding::Val(Value::Int(i)) if i == 5.into()));
        assert!(table.declare("a", Binding::nil()).is_err());
    }

    #[test]
    fn shadowing_frame_blocks_writes_but_not_reads() {
        let mut table = SymbolTable::new();
        table.assign(&NameRef::simple("x"), Binding::Val(Value::int(1))).unwrap();
        table.push(true);
        // Read still sees the enclosing binding.
        assert!(table.get(&NameRef::simple("x")).is_ok());
        // A write lands in the shadowing frame instead of crossing it.
        table.assign(&NameRef::simple("x"), Binding::Val(Value::int(2))).unwrap();
        table.pop(1);
        let got = table.get(&NameRef::simple("x")).unwrap();
        assert!(matches!(got, Binding::Val(Value::Int(i)) if i == 1.into()));
    }

    #[test]
    fn non_shadowing_frame_lets_writes_through() {
        let mut table = SymbolTable::new();
        table.assign(&NameRef::simple("x"), Binding::Val(Value::int(1))).unwrap();
        table.push(false);
        table.assign(&NameRef::simple("x"), Binding::Val(Value::int(2))).unwrap();
        table.pop(1);
        let got = table.get(&NameRef::simple("x")).unwrap();
        assert!(matches!(got, Binding::Val(Value::Int(i)) if i == 2.into()));
    }

    #[test]
    fn global_prefix_writes_to_root_frame() {
        let mut table = SymbolTable::new();
        table.push(true);
        table
            .assign(&NameRef::prefixed(Prefix::Global, "x"), Binding::Val(Value::int(10)))
            .unwrap();
        table.pop(1);
        let got = table.get(&NameRef::simple("x")).unwrap();
        assert!(matches!(got, Binding::Val(Value::Int(i)) if i == 10.into()));
    }

    #[test]
    fn space_paths_resolve() {
        let mut table = SymbolTable::new();
        table.push_space("A").unwrap();
        table.declare("a", Binding::Val(Value::int(1))).unwrap();
        table.pop_space();

        let mut path = NameRef::simple("A");
        path.push_scope("a");
        assert!(table.exists(&path));
        table.assign(&path, Binding::Val(Value::int(2))).unwrap();
        let got = table.get(&path).unwrap();
        assert!(matches!(got, Binding::Val(Value::Int(i)) if i == 2.into()));
    }

    #[test]
    fn overlapping_overloads_are_ambiguous() {
        let mut table = SymbolTable::new();
        table.define_fun(fun("f", 1, 1)).unwrap();
        // f(a) vs f(a, b = nil): a one-argument call would match both.
        let err = table.define_fun(fun("f", 1, 2)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AmbiguousRedefinition);
    }

    #[test]
    fn disjoint_overloads_sort_by_max_args() {
        let mut table = SymbolTable::new();
        table.define_fun(fun("f", 2, 2)).unwrap();
        table.define_fun(fun("f", 1, 1)).unwrap();
        let Binding::Funs(list) = table.get(&NameRef::simple("f")).unwrap() else {
            panic!("expected overload list");
        };
        assert_eq!(list.len(), 2);
        assert!(list[0].max_args < list[1].max_args);
    }

    #[test]
    fn same_arity_same_signature_replaces() {
        let mut table = SymbolTable::new();
        table.define_fun(fun("f", 1, 1)).unwrap();
        table.define_fun(fun("f", 1, 1)).unwrap();
        let Binding::Funs(list) = table.get(&NameRef::simple("f")).unwrap() else {
            panic!("expected overload list");
        };
        assert_eq!(list.len(), 1);
    }
}

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::symbol_table::Binding;

/// Result type alias for operations that can fail with a language error.
pub type MashResult<T> = Result<T, MashError>;

/// Result type alias for evaluator operations.
///
/// The error channel carries both real errors and control-flow signals
/// (`break`/`continue`/`return`), so `?` unwinds either kind through nested
/// instruction execution. Loops and calls catch the signals they understand
/// and let everything else propagate.
pub type ExecResult<T> = Result<T, Unwind>;

/// Error categories reported to the user.
///
/// Uses strum derives so the rendered kind text stays next to the variant.
/// Kinds are distinct (not a single code): callers match on them in tests and
/// the CLI picks the output shape based on whether a location is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ErrorKind {
    /// Malformed source, reported by the lexer/parser or string-prefix checks.
    #[strum(serialize = "Syntax error")]
    SyntaxError,
    /// Name not found in any visible scope.
    #[strum(serialize = "Undefined reference")]
    UndefinedReference,
    /// Declaration of a name already bound in the same frame.
    #[strum(serialize = "Redefinition")]
    Redefinition,
    /// Function-overload arity ranges overlap.
    #[strum(serialize = "Ambiguous redefinition")]
    AmbiguousRedefinition,
    /// Operator/argument/iteration type mismatch, "not callable", unpack shape mismatch.
    #[strum(serialize = "Type error")]
    TypeError,
    /// Failed conversions and invalid operands (e.g. zero slice step).
    #[strum(serialize = "Value error")]
    ValueError,
    /// Dictionary access with a missing key.
    #[strum(serialize = "Key error")]
    KeyError,
    /// Out-of-range sequence access.
    #[strum(serialize = "Index error")]
    IndexError,
    /// Module not found, permission denied, or unreadable.
    #[strum(serialize = "Import error")]
    ImportError,
    /// Structural misuse: constructor outside a class, note outside global
    /// scope, constructor with the wrong name.
    #[strum(serialize = "Incorrect definition")]
    IncorrectDefinition,
    /// A `break`/`continue`/`return` that escaped every scope.
    #[strum(serialize = "Flow control")]
    FlowControl,
    /// Feature placeholder, treated as a hard error.
    #[strum(serialize = "Unimplemented")]
    Unimplemented,
    /// Invariant violation inside the interpreter itself.
    #[strum(serialize = "Internal error")]
    Internal,
}

/// A position in the source text, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLoc {
    pub line: u32,
    pub col: u32,
}

impl CodeLoc {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// An error produced anywhere in the pipeline.
///
/// Lexer/parser errors carry a `loc` so the CLI can render the offending line
/// with a caret; lowering and runtime errors have no location, matching the
/// `<file>: Error: <message>` shape.
#[derive(Debug, Clone)]
pub struct MashError {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Option<CodeLoc>,
}

impl MashError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: None,
        }
    }

    pub fn with_loc(kind: ErrorKind, message: impl Into<String>, loc: CodeLoc) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: Some(loc),
        }
    }

    pub fn syntax(message: impl Into<String>, loc: CodeLoc) -> Self {
        Self::with_loc(ErrorKind::SyntaxError, message, loc)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn undefined(name: impl fmt::Display) -> Self {
        Self::new(ErrorKind::UndefinedReference, format!("Undefined reference to '{name}'"))
    }

    pub fn redefinition(name: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Redefinition, format!("Redefinition of '{name}'"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for MashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for MashError {}

/// Control-flow signals raised by `break`, `continue` and `return`.
///
/// These are not errors: they ride a separate channel and are caught by the
/// innermost construct that understands them. A `Return` counts the block
/// frames it has crossed so the call site can pop exactly that many.
#[derive(Debug, Clone)]
pub enum Signal {
    Break,
    Continue,
    Return {
        value: Binding,
        /// Number of symbol-table frames pushed since the function call frame,
        /// inclusive. Starts at 1 and is incremented by every block construct
        /// the signal unwinds through.
        frames: usize,
    },
}

/// Combined unwinding channel for the evaluator.
#[derive(Debug, Clone)]
pub enum Unwind {
    Error(MashError),
    Signal(Signal),
}

impl From<MashError> for Unwind {
    fn from(err: MashError) -> Self {
        Self::Error(err)
    }
}

impl Unwind {
    /// Converts an escaped signal into the user-facing error the top-level
    /// driver reports.
    pub fn into_error(self) -> MashError {
        match self {
            Self::Error(err) => err,
            Self::Signal(Signal::Break) => MashError::new(ErrorKind::FlowControl, "'break' outside of a loop"),
            Self::Signal(Signal::Continue) => MashError::new(ErrorKind::FlowControl, "'continue' outside of a loop"),
            Self::Signal(Signal::Return { .. }) => {
                MashError::new(ErrorKind::FlowControl, "'return' outside of a function")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_matches_user_text() {
        assert_eq!(ErrorKind::TypeError.to_string(), "Type error");
        assert_eq!(ErrorKind::UndefinedReference.to_string(), "Undefined reference");
        assert_eq!(ErrorKind::Internal.to_string(), "Internal error");
    }

    #[test]
    fn error_display_includes_kind() {
        let err = MashError::type_error("Cannot add these");
        assert_eq!(err.to_string(), "Type error: Cannot add these");
    }

    #[test]
    fn escaped_signals_become_flow_errors() {
        let err = Unwind::Signal(Signal::Break).into_error();
        assert_eq!(err.kind, ErrorKind::FlowControl);
        assert_eq!(err.message, "'break' outside of a loop");
    }
}

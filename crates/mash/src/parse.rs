use std::rc::Rc;

use crate::{
    error::{CodeLoc, MashError, MashResult},
    ir::{BinOp, UnOp},
    lexer::{NoteKind, Tok, Token, tokenize},
    symbol_table::{NameRef, Prefix},
    value::{MashStr, Value},
};

/// Maximum expression nesting depth accepted by the parser, guarding against
/// stack overflow on pathological input like `((((…))))`.
const MAX_NESTING_DEPTH: u16 = 200;

/// A parsed expression with its source location.
#[derive(Debug, Clone)]
pub struct ExprS {
    pub node: Expr,
    pub loc: CodeLoc,
}

impl ExprS {
    pub fn new(node: Expr, loc: CodeLoc) -> Self {
        Self { node, loc }
    }

    pub fn lit(&self) -> Option<&Value> {
        match &self.node {
            Expr::Lit(v) => Some(v),
            _ => None,
        }
    }
}

/// Call argument in the parse tree.
#[derive(Debug, Clone)]
pub enum CallArgExpr {
    Pos(ExprS),
    Named(String, ExprS),
}

/// Expression nodes.
///
/// Literal tokens arrive already wrapped as `Lit` values; the constant
/// folder collapses operator applications over literals bottom-up, and the
/// generator lowers whatever remains.
#[derive(Debug, Clone)]
pub enum Expr {
    Lit(Value),
    Name(NameRef),
    ListLit(Vec<ExprS>),
    DictLit(Vec<(ExprS, ExprS)>),
    Bin {
        op: BinOp,
        lhs: Box<ExprS>,
        rhs: Box<ExprS>,
    },
    Un {
        op: UnOp,
        expr: Box<ExprS>,
    },
    Ternary {
        cond: Box<ExprS>,
        then_val: Box<ExprS>,
        else_val: Box<ExprS>,
    },
    /// Call through a (possibly dotted) name.
    Call {
        target: NameRef,
        args: Vec<CallArgExpr>,
    },
    /// Method call on a computed receiver, e.g. `f()[0].trim()` or a literal.
    MethodCall {
        recv: Box<ExprS>,
        name: String,
        args: Vec<CallArgExpr>,
    },
    /// Call on a computed callee, e.g. `(pick())(1)`.
    CallExpr {
        callee: Box<ExprS>,
        args: Vec<CallArgExpr>,
    },
    /// Attribute read on a computed base.
    Attr {
        base: Box<ExprS>,
        name: String,
    },
    Index {
        src: Box<ExprS>,
        index: Box<ExprS>,
    },
    SliceOf {
        src: Box<ExprS>,
        start: Option<Box<ExprS>>,
        end: Option<Box<ExprS>>,
        step: Option<Box<ExprS>>,
    },
    /// Anonymous function expression.
    Lambda(Rc<LambdaDef>),
}

#[derive(Debug)]
pub struct LambdaDef {
    pub params: Vec<ParamSpec>,
    pub body: Vec<Stmt>,
}

/// A declared parameter before lowering; the default is still a tree.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub types: Option<Vec<String>>,
    pub default: Option<ExprS>,
    pub variadic: bool,
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    One(NameRef),
    Multi(Vec<NameRef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignKind {
    /// `=`
    Set,
    /// Compound operators such as `+=`; the destination doubles as the left
    /// operand.
    Compound(BinOp),
    /// `?=` — assign only when the name is unbound.
    SetIfNotSet,
}

/// Statement nodes.
#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(ExprS),
    Assign {
        target: AssignTarget,
        kind: AssignKind,
        value: ExprS,
    },
    If {
        /// `(condition, body)` for the `if` and every `elif`, in order.
        arms: Vec<(ExprS, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        cond: ExprS,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: ExprS,
    },
    For {
        targets: Vec<NameRef>,
        iter: ExprS,
        body: Vec<Stmt>,
    },
    Fun {
        name: String,
        params: Vec<ParamSpec>,
        body: Vec<Stmt>,
        loc: CodeLoc,
    },
    Constructor {
        name: String,
        params: Vec<ParamSpec>,
        body: Vec<Stmt>,
        loc: CodeLoc,
    },
    Space {
        name: String,
        body: Vec<Stmt>,
    },
    Class {
        name: String,
        extends: Vec<String>,
        body: Vec<Stmt>,
    },
    Enum {
        name: String,
        members: Vec<String>,
    },
    Import {
        path: Vec<String>,
        alias: Option<String>,
    },
    Return(Option<ExprS>),
    Break,
    Continue,
    Note {
        kind: NoteKind,
        text: String,
    },
    /// `internal` marker body of a host-implemented function.
    Internal,
}

/// Parses Mash source text into a statement list.
pub fn parse(src: &str) -> MashResult<Vec<Stmt>> {
    let tokens = tokenize(src)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: u16,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map_or(&Tok::Eof, |t| &t.tok)
    }

    fn loc(&self) -> CodeLoc {
        self.tokens[self.pos].loc
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> MashResult<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("Expected '{tok}'")))
        }
    }

    fn expect_ident(&mut self) -> MashResult<String> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.unexpected(&format!("Expected a name, but got '{other}'"))),
        }
    }

    fn unexpected(&self, message: &str) -> MashError {
        MashError::syntax(message, self.loc())
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Tok::Newline | Tok::Semicolon) {
            self.advance();
        }
    }

    fn program(&mut self) -> MashResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if matches!(self.peek(), Tok::Eof) {
                return Ok(stmts);
            }
            stmts.push(self.stmt()?);
        }
    }

    fn block(&mut self) -> MashResult<Vec<Stmt>> {
        self.skip_newlines();
        self.expect(&Tok::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&Tok::RBrace) {
                return Ok(stmts);
            }
            if matches!(self.peek(), Tok::Eof) {
                return Err(self.unexpected("Expected '}'"));
            }
            stmts.push(self.stmt()?);
        }
    }

    /// A braced block, or a single statement for `if`/loop bodies.
    fn block_or_single(&mut self) -> MashResult<Vec<Stmt>> {
        self.skip_newlines();
        if matches!(self.peek(), Tok::LBrace) {
            self.block()
        } else {
            Ok(vec![self.stmt()?])
        }
    }

    fn stmt(&mut self) -> MashResult<Stmt> {
        match self.peek().clone() {
            Tok::Note { kind, text } => {
                self.advance();
                Ok(Stmt::Note { kind, text })
            }
            Tok::KwImport => self.import_stmt(),
            Tok::KwSpace => {
                self.advance();
                let name = self.expect_ident()?;
                let body = self.block()?;
                Ok(Stmt::Space { name, body })
            }
            Tok::KwClass => self.class_stmt(),
            Tok::KwEnum => self.enum_stmt(),
            Tok::KwFun if !self.lambda_follows() => self.fun_stmt(),
            Tok::KwNew => self.constructor_stmt(),
            Tok::KwIf => self.if_stmt(),
            Tok::KwWhile => {
                self.advance();
                self.expect(&Tok::LParen)?;
                let cond = self.expr()?;
                self.expect(&Tok::RParen)?;
                let body = self.block_or_single()?;
                Ok(Stmt::While { cond, body })
            }
            Tok::KwDo => {
                self.advance();
                let body = self.block()?;
                self.skip_newlines();
                self.expect(&Tok::KwWhile)?;
                self.expect(&Tok::LParen)?;
                let cond = self.expr()?;
                self.expect(&Tok::RParen)?;
                Ok(Stmt::DoWhile { body, cond })
            }
            Tok::KwFor => self.for_stmt(),
            Tok::KwReturn => {
                self.advance();
                let value = if matches!(self.peek(), Tok::Newline | Tok::Semicolon | Tok::RBrace | Tok::Eof) {
                    None
                } else {
                    Some(self.expr()?)
                };
                Ok(Stmt::Return(value))
            }
            Tok::KwBreak => {
                self.advance();
                Ok(Stmt::Break)
            }
            Tok::KwContinue => {
                self.advance();
                Ok(Stmt::Continue)
            }
            Tok::KwInternal => {
                self.advance();
                Ok(Stmt::Internal)
            }
            Tok::LParen => {
                if let Some(names) = self.try_multi_assign_heads() {
                    let value = self.expr()?;
                    return Ok(Stmt::Assign {
                        target: AssignTarget::Multi(names),
                        kind: AssignKind::Set,
                        value,
                    });
                }
                self.expr_or_assign_stmt()
            }
            _ => self.expr_or_assign_stmt(),
        }
    }

    /// Detects `(a, b, …) = value` and consumes through the `=` when found.
    fn try_multi_assign_heads(&mut self) -> Option<Vec<NameRef>> {
        let mut offset = 1;
        let mut names = Vec::new();
        loop {
            match self.peek_at(offset) {
                Tok::Ident(name) => {
                    names.push(NameRef::simple(name.clone()));
                    offset += 1;
                }
                _ => return None,
            }
            match self.peek_at(offset) {
                Tok::Comma => offset += 1,
                Tok::RParen => {
                    offset += 1;
                    break;
                }
                _ => return None,
            }
        }
        if names.len() < 2 || !matches!(self.peek_at(offset), Tok::Assign) {
            return None;
        }
        for _ in 0..=offset {
            self.advance();
        }
        Some(names)
    }

    fn expr_or_assign_stmt(&mut self) -> MashResult<Stmt> {
        let expr = self.expr()?;
        let kind = match self.peek() {
            Tok::Assign => AssignKind::Set,
            Tok::QuestionEq => AssignKind::SetIfNotSet,
            Tok::PlusEq => AssignKind::Compound(BinOp::Add),
            Tok::MinusEq => AssignKind::Compound(BinOp::Sub),
            Tok::StarEq => AssignKind::Compound(BinOp::Mul),
            Tok::SlashEq => AssignKind::Compound(BinOp::FDiv),
            Tok::SlashSlashEq => AssignKind::Compound(BinOp::IDiv),
            Tok::PercentEq => AssignKind::Compound(BinOp::Mod),
            Tok::CaretEq => AssignKind::Compound(BinOp::Exp),
            Tok::PlusPlusEq => AssignKind::Compound(BinOp::Cat),
            _ => return Ok(Stmt::Expr(expr)),
        };
        self.advance();
        let Expr::Name(target) = expr.node else {
            return Err(MashError::syntax("Invalid assignment target", expr.loc));
        };
        self.skip_newlines();
        let value = self.expr()?;
        Ok(Stmt::Assign {
            target: AssignTarget::One(target),
            kind,
            value,
        })
    }

    fn import_stmt(&mut self) -> MashResult<Stmt> {
        self.advance();
        let mut path = vec![self.expect_ident()?];
        while self.eat(&Tok::ColonColon) {
            path.push(self.expect_ident()?);
        }
        let alias = if self.eat(&Tok::KwAs) {
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok(Stmt::Import { path, alias })
    }

    fn class_stmt(&mut self) -> MashResult<Stmt> {
        self.advance();
        let name = self.expect_ident()?;
        let mut extends = Vec::new();
        if self.eat(&Tok::Colon) {
            extends.push(self.expect_ident()?);
            while self.eat(&Tok::Comma) {
                extends.push(self.expect_ident()?);
            }
        }
        let body = self.block()?;
        Ok(Stmt::Class { name, extends, body })
    }

    fn enum_stmt(&mut self) -> MashResult<Stmt> {
        self.advance();
        let name = self.expect_ident()?;
        self.skip_newlines();
        self.expect(&Tok::LBrace)?;
        let mut members = Vec::new();
        loop {
            self.skip_separators();
            while self.eat(&Tok::Comma) {
                self.skip_newlines();
            }
            if self.eat(&Tok::RBrace) {
                break;
            }
            members.push(self.expect_ident()?);
        }
        Ok(Stmt::Enum { name, members })
    }

    /// Whether the `fun` at the cursor starts an anonymous function
    /// expression rather than a named definition.
    fn lambda_follows(&self) -> bool {
        if !matches!(self.peek_at(1), Tok::LParen) {
            // `fun name(…)` — or garbage that fun_stmt will report.
            return false;
        }
        // `fun (op)(…)` defines an operator method; anything else after
        // `fun (` is a lambda parameter list.
        !matches!(
            self.peek_at(2),
            Tok::Plus
                | Tok::Minus
                | Tok::Star
                | Tok::Slash
                | Tok::SlashSlash
                | Tok::Percent
                | Tok::Caret
                | Tok::PlusPlus
                | Tok::EqEq
                | Tok::NotEq
                | Tok::Lt
                | Tok::Lte
                | Tok::Gt
                | Tok::Gte
                | Tok::AndAnd
                | Tok::OrOr
                | Tok::Bang
                | Tok::KwAnd
                | Tok::KwOr
                | Tok::KwIn
                | Tok::LBracket
        )
    }

    fn operator_method_name(&mut self) -> MashResult<String> {
        self.expect(&Tok::LParen)?;
        let symbol = match self.peek().clone() {
            Tok::Plus => "+",
            Tok::Minus => "-",
            Tok::Star => "*",
            Tok::Slash => "/",
            Tok::SlashSlash => "//",
            Tok::Percent => "%",
            Tok::Caret => "^",
            Tok::PlusPlus => "++",
            Tok::EqEq => "==",
            Tok::NotEq => "!=",
            Tok::Lt => "<",
            Tok::Lte => "<=",
            Tok::Gt => ">",
            Tok::Gte => ">=",
            Tok::AndAnd => "&&",
            Tok::OrOr => "||",
            Tok::Bang => "!",
            Tok::KwAnd => "and",
            Tok::KwOr => "or",
            Tok::KwIn => "in",
            Tok::LBracket => {
                self.advance();
                let sliced = self.eat(&Tok::ColonColon);
                self.expect(&Tok::RBracket)?;
                self.expect(&Tok::RParen)?;
                return Ok(if sliced { "([::])".to_owned() } else { "([])".to_owned() });
            }
            other => return Err(self.unexpected(&format!("'{other}' is not an overloadable operator"))),
        };
        self.advance();
        self.expect(&Tok::RParen)?;
        Ok(format!("({symbol})"))
    }

    fn fun_stmt(&mut self) -> MashResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let name = if matches!(self.peek(), Tok::LParen) {
            self.operator_method_name()?
        } else {
            self.expect_ident()?
        };
        let params = self.params()?;
        let body = self.block()?;
        Ok(Stmt::Fun { name, params, body, loc })
    }

    fn constructor_stmt(&mut self) -> MashResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let name = self.expect_ident()?;
        let params = self.params()?;
        let body = self.block()?;
        Ok(Stmt::Constructor { name, params, body, loc })
    }

    fn if_stmt(&mut self) -> MashResult<Stmt> {
        let mut arms = Vec::new();
        let mut else_body = None;
        self.advance();
        loop {
            self.expect(&Tok::LParen)?;
            let cond = self.expr()?;
            self.expect(&Tok::RParen)?;
            let body = self.block_or_single()?;
            arms.push((cond, body));

            let checkpoint = self.pos;
            self.skip_newlines();
            if self.eat(&Tok::KwElif) {
                continue;
            }
            if self.eat(&Tok::KwElse) {
                else_body = Some(self.block_or_single()?);
            } else {
                self.pos = checkpoint;
            }
            return Ok(Stmt::If { arms, else_body });
        }
    }

    fn for_stmt(&mut self) -> MashResult<Stmt> {
        self.advance();
        let mut targets = Vec::new();
        if self.eat(&Tok::LParen) {
            targets.push(NameRef::simple(self.expect_ident()?));
            while self.eat(&Tok::Comma) {
                targets.push(NameRef::simple(self.expect_ident()?));
            }
            self.expect(&Tok::RParen)?;
        } else {
            targets.push(NameRef::simple(self.expect_ident()?));
        }
        self.expect(&Tok::Colon)?;
        let iter = self.expr()?;
        let body = self.block_or_single()?;
        Ok(Stmt::For { targets, iter, body })
    }

    fn params(&mut self) -> MashResult<Vec<ParamSpec>> {
        self.expect(&Tok::LParen)?;
        let mut params = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&Tok::RParen) {
                return Ok(params);
            }
            if !params.is_empty() {
                self.expect(&Tok::Comma)?;
                self.skip_newlines();
            }
            if self.eat(&Tok::Star) {
                let name = self.expect_ident()?;
                params.push(ParamSpec {
                    name,
                    types: None,
                    default: None,
                    variadic: true,
                });
                continue;
            }
            let name = self.expect_ident()?;
            let types = if self.eat(&Tok::Colon) {
                Some(self.type_spec()?)
            } else {
                None
            };
            let default = if self.eat(&Tok::Assign) {
                Some(self.expr()?)
            } else {
                None
            };
            params.push(ParamSpec {
                name,
                types,
                default,
                variadic: false,
            });
        }
    }

    fn type_spec(&mut self) -> MashResult<Vec<String>> {
        if self.eat(&Tok::LBracket) {
            let mut types = vec![self.expect_ident()?];
            while self.eat(&Tok::Comma) {
                types.push(self.expect_ident()?);
            }
            self.expect(&Tok::RBracket)?;
            Ok(types)
        } else {
            Ok(vec![self.expect_ident()?])
        }
    }

    fn call_args(&mut self) -> MashResult<Vec<CallArgExpr>> {
        self.expect(&Tok::LParen)?;
        let mut args = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&Tok::RParen) {
                return Ok(args);
            }
            if !args.is_empty() {
                self.expect(&Tok::Comma)?;
                self.skip_newlines();
            }
            if let Tok::Ident(name) = self.peek().clone() {
                if matches!(self.peek_at(1), Tok::Assign) {
                    self.advance();
                    self.advance();
                    args.push(CallArgExpr::Named(name, self.expr()?));
                    continue;
                }
            }
            args.push(CallArgExpr::Pos(self.expr()?));
        }
    }

    // --- expressions ---

    fn expr(&mut self) -> MashResult<ExprS> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.unexpected("Expression nesting too deep"));
        }
        self.depth += 1;
        let result = self.ternary();
        self.depth -= 1;
        result
    }

    fn ternary(&mut self) -> MashResult<ExprS> {
        let loc = self.loc();
        let cond = self.logic_or()?;
        if !self.eat(&Tok::Question) {
            return Ok(cond);
        }
        let then_val = self.expr()?;
        self.expect(&Tok::Colon)?;
        let else_val = self.expr()?;
        Ok(ExprS::new(
            Expr::Ternary {
                cond: Box::new(cond),
                then_val: Box::new(then_val),
                else_val: Box::new(else_val),
            },
            loc,
        ))
    }

    fn bin_level(
        &mut self,
        next: fn(&mut Self) -> MashResult<ExprS>,
        table: &[(Tok, BinOp)],
    ) -> MashResult<ExprS> {
        let loc = self.loc();
        let mut lhs = next(self)?;
        'outer: loop {
            for (tok, op) in table {
                if self.eat(tok) {
                    self.skip_newlines();
                    let rhs = next(self)?;
                    lhs = ExprS::new(
                        Expr::Bin {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        loc,
                    );
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn logic_or(&mut self) -> MashResult<ExprS> {
        self.bin_level(Self::logic_and, &[(Tok::KwOr, BinOp::LOr)])
    }

    fn logic_and(&mut self) -> MashResult<ExprS> {
        self.bin_level(Self::logic_not, &[(Tok::KwAnd, BinOp::LAnd)])
    }

    fn logic_not(&mut self) -> MashResult<ExprS> {
        let loc = self.loc();
        if self.eat(&Tok::KwNot) || self.eat(&Tok::Bang) {
            let expr = self.logic_not()?;
            return Ok(ExprS::new(
                Expr::Un {
                    op: UnOp::LNot,
                    expr: Box::new(expr),
                },
                loc,
            ));
        }
        self.short_or()
    }

    fn short_or(&mut self) -> MashResult<ExprS> {
        self.bin_level(Self::short_and, &[(Tok::OrOr, BinOp::Or)])
    }

    fn short_and(&mut self) -> MashResult<ExprS> {
        self.bin_level(Self::comparison, &[(Tok::AndAnd, BinOp::And)])
    }

    fn comparison(&mut self) -> MashResult<ExprS> {
        self.bin_level(
            Self::concat,
            &[
                (Tok::EqEq, BinOp::Eq),
                (Tok::NotEq, BinOp::Neq),
                (Tok::Lte, BinOp::Lte),
                (Tok::Gte, BinOp::Gte),
                (Tok::Lt, BinOp::Lt),
                (Tok::Gt, BinOp::Gt),
                (Tok::KwIn, BinOp::In),
            ],
        )
    }

    fn concat(&mut self) -> MashResult<ExprS> {
        self.bin_level(Self::additive, &[(Tok::PlusPlus, BinOp::Cat)])
    }

    fn additive(&mut self) -> MashResult<ExprS> {
        self.bin_level(Self::term, &[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)])
    }

    fn term(&mut self) -> MashResult<ExprS> {
        self.bin_level(
            Self::unary,
            &[
                (Tok::Star, BinOp::Mul),
                (Tok::SlashSlash, BinOp::IDiv),
                (Tok::Slash, BinOp::FDiv),
                (Tok::Percent, BinOp::Mod),
            ],
        )
    }

    fn unary(&mut self) -> MashResult<ExprS> {
        let loc = self.loc();
        if self.eat(&Tok::Minus) {
            let expr = self.unary()?;
            return Ok(ExprS::new(
                Expr::Un {
                    op: UnOp::Neg,
                    expr: Box::new(expr),
                },
                loc,
            ));
        }
        self.power()
    }

    fn power(&mut self) -> MashResult<ExprS> {
        let loc = self.loc();
        let base = self.postfix()?;
        if self.eat(&Tok::Caret) {
            let exp = self.unary()?;
            return Ok(ExprS::new(
                Expr::Bin {
                    op: BinOp::Exp,
                    lhs: Box::new(base),
                    rhs: Box::new(exp),
                },
                loc,
            ));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> MashResult<ExprS> {
        let loc = self.loc();
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = match expr.node {
                        Expr::Name(mut path) => {
                            path.push_attr(name);
                            ExprS::new(Expr::Name(path), loc)
                        }
                        _ => ExprS::new(
                            Expr::Attr {
                                base: Box::new(expr),
                                name,
                            },
                            loc,
                        ),
                    };
                }
                Tok::ColonColon => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = match expr.node {
                        Expr::Name(mut path) => {
                            path.push_scope(name);
                            ExprS::new(Expr::Name(path), loc)
                        }
                        _ => return Err(MashError::syntax("'::' can only follow a name", loc)),
                    };
                }
                Tok::LParen => {
                    let args = self.call_args()?;
                    expr = match expr.node {
                        Expr::Name(target) => ExprS::new(Expr::Call { target, args }, loc),
                        Expr::Attr { base, name } => ExprS::new(
                            Expr::MethodCall {
                                recv: base,
                                name,
                                args,
                            },
                            loc,
                        ),
                        _ => ExprS::new(
                            Expr::CallExpr {
                                callee: Box::new(expr),
                                args,
                            },
                            loc,
                        ),
                    };
                }
                Tok::LBracket => {
                    expr = self.index_or_slice(expr, loc)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn index_or_slice(&mut self, src: ExprS, loc: CodeLoc) -> MashResult<ExprS> {
        self.expect(&Tok::LBracket)?;
        self.skip_newlines();
        let start = if matches!(self.peek(), Tok::Colon) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        if !self.eat(&Tok::Colon) {
            self.expect(&Tok::RBracket)?;
            let index = start.ok_or_else(|| MashError::syntax("Empty index", loc))?;
            return Ok(ExprS::new(
                Expr::Index {
                    src: Box::new(src),
                    index,
                },
                loc,
            ));
        }
        let end = if matches!(self.peek(), Tok::Colon | Tok::RBracket) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        let step = if self.eat(&Tok::Colon) {
            if matches!(self.peek(), Tok::RBracket) {
                None
            } else {
                Some(Box::new(self.expr()?))
            }
        } else {
            None
        };
        self.expect(&Tok::RBracket)?;
        Ok(ExprS::new(
            Expr::SliceOf {
                src: Box::new(src),
                start,
                end,
                step,
            },
            loc,
        ))
    }

    fn string_literal(&self, text: String, prefix: Option<&str>, loc: CodeLoc) -> MashResult<Value> {
        let escape = match prefix {
            None => true,
            // Raw strings skip escape resolution; formatted strings are
            // accepted but not interpolated.
            Some("r" | "f") => false,
            Some("n") => {
                return Err(MashError::syntax(
                    "Unsupported string prefix 'n'. Perhaps you meant to create a note using n\"\"\"...\"\"\"?",
                    loc,
                ));
            }
            Some(other) => {
                return Err(MashError::syntax(format!("Unsupported string prefix '{other}'"), loc));
            }
        };
        Ok(Value::Str(Rc::new(MashStr::new(text, escape))))
    }

    fn primary(&mut self) -> MashResult<ExprS> {
        let loc = self.loc();
        match self.peek().clone() {
            Tok::Int(value) => {
                self.advance();
                Ok(ExprS::new(Expr::Lit(Value::Int(value)), loc))
            }
            Tok::Float(value) => {
                self.advance();
                Ok(ExprS::new(Expr::Lit(Value::Float(value)), loc))
            }
            Tok::Str { text, prefix } => {
                self.advance();
                let value = self.string_literal(text, prefix.as_deref(), loc)?;
                Ok(ExprS::new(Expr::Lit(value), loc))
            }
            Tok::KwTrue => {
                self.advance();
                Ok(ExprS::new(Expr::Lit(Value::Bool(true)), loc))
            }
            Tok::KwFalse => {
                self.advance();
                Ok(ExprS::new(Expr::Lit(Value::Bool(false)), loc))
            }
            Tok::KwNil => {
                self.advance();
                Ok(ExprS::new(Expr::Lit(Value::Nil), loc))
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(ExprS::new(Expr::Name(NameRef::simple(name)), loc))
            }
            Tok::At => {
                self.advance();
                let name = self.expect_ident()?;
                Ok(ExprS::new(Expr::Name(NameRef::prefixed(Prefix::NonLocal, name)), loc))
            }
            Tok::ColonColon => {
                self.advance();
                let name = self.expect_ident()?;
                Ok(ExprS::new(Expr::Name(NameRef::prefixed(Prefix::Global, name)), loc))
            }
            Tok::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.expr()?;
                self.skip_newlines();
                self.expect(&Tok::RParen)?;
                Ok(ExprS::new(inner.node, loc))
            }
            Tok::LBracket => self.list_literal(loc),
            Tok::LBrace => self.dict_literal(loc),
            Tok::KwFun => {
                self.advance();
                let params = self.params()?;
                let body = self.block()?;
                Ok(ExprS::new(Expr::Lambda(Rc::new(LambdaDef { params, body })), loc))
            }
            other => Err(self.unexpected(&format!("Unexpected token '{other}'"))),
        }
    }

    fn list_literal(&mut self, loc: CodeLoc) -> MashResult<ExprS> {
        self.expect(&Tok::LBracket)?;
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&Tok::RBracket) {
                return Ok(ExprS::new(Expr::ListLit(items), loc));
            }
            if !items.is_empty() {
                self.expect(&Tok::Comma)?;
                self.skip_newlines();
                // Trailing comma.
                if self.eat(&Tok::RBracket) {
                    return Ok(ExprS::new(Expr::ListLit(items), loc));
                }
            }
            items.push(self.expr()?);
        }
    }

    fn dict_literal(&mut self, loc: CodeLoc) -> MashResult<ExprS> {
        self.expect(&Tok::LBrace)?;
        self.skip_newlines();
        // `{,}` (and bare `{}`) is the empty dict.
        if self.eat(&Tok::Comma) {
            self.skip_newlines();
            self.expect(&Tok::RBrace)?;
            return Ok(ExprS::new(Expr::DictLit(vec![]), loc));
        }
        let mut pairs = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&Tok::RBrace) {
                return Ok(ExprS::new(Expr::DictLit(pairs), loc));
            }
            if !pairs.is_empty() {
                self.expect(&Tok::Comma)?;
                self.skip_newlines();
                if self.eat(&Tok::RBrace) {
                    return Ok(ExprS::new(Expr::DictLit(pairs), loc));
                }
            }
            let key = self.expr()?;
            self.expect(&Tok::Colon)?;
            self.skip_newlines();
            let value = self.expr()?;
            pairs.push((key, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;

    use super::*;

    fn parse_one(src: &str) -> Stmt {
        let mut stmts = parse(src).unwrap();
        assert_eq!(stmts.len(), 1, "expected one statement from {src:?}");
        stmts.remove(0)
    }

    #[test]
    fn assignment_shapes() {
        let Stmt::Assign { target, kind, .. } = parse_one("a = 5") else {
            panic!("expected assignment");
        };
        assert!(matches!(target, AssignTarget::One(name) if name.to_string() == "a"));
        assert_eq!(kind, AssignKind::Set);

        let Stmt::Assign { kind, .. } = parse_one("a += 1") else {
            panic!("expected assignment");
        };
        assert_eq!(kind, AssignKind::Compound(BinOp::Add));
    }

    #[test]
    fn multi_assign_vs_parenthesized_expr() {
        assert!(matches!(
            parse_one("(a, b) = [1, 2]"),
            Stmt::Assign {
                target: AssignTarget::Multi(names),
                ..
            } if names.len() == 2
        ));
        assert!(matches!(parse_one("(a == b)"), Stmt::Expr(_)));
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let Stmt::Expr(expr) = parse_one("1 + 2 * 3") else {
            panic!("expected expression");
        };
        let Expr::Bin { op: BinOp::Add, rhs, .. } = expr.node else {
            panic!("expected addition at the top");
        };
        assert!(matches!(rhs.node, Expr::Bin { op: BinOp::Mul, .. }));
    }

    #[test]
    fn scope_paths_fold_into_names() {
        let Stmt::Expr(expr) = parse_one("A::b.c") else {
            panic!("expected expression");
        };
        let Expr::Name(path) = expr.node else {
            panic!("expected a name path");
        };
        assert_eq!(path.to_string(), "A::b.c");
    }

    #[test]
    fn method_call_on_literal_receiver() {
        let Stmt::Expr(expr) = parse_one("\"hi\".upper()") else {
            panic!("expected expression");
        };
        assert!(matches!(expr.node, Expr::MethodCall { name, .. } if name == "upper"));
    }

    #[test]
    fn if_elif_else_chain() {
        let stmt = parse_one("if (a) { 1 } elif (b) { 2 } else { 3 }");
        let Stmt::If { arms, else_body } = stmt else {
            panic!("expected if");
        };
        assert_eq!(arms.len(), 2);
        assert!(else_body.is_some());
    }

    #[test]
    fn operator_method_names() {
        let stmt = parse_one("fun (+)(self, other) { return 1 }");
        assert!(matches!(stmt, Stmt::Fun { name, .. } if name == "(+)"));
        let stmt = parse_one("fun ([])(self, i) { return 1 }");
        assert!(matches!(stmt, Stmt::Fun { name, .. } if name == "([])"));
        let stmt = parse_one("fun ([::])(self, a, b, c) { return 1 }");
        assert!(matches!(stmt, Stmt::Fun { name, .. } if name == "([::])"));
    }

    #[test]
    fn lambda_expression() {
        let stmt = parse_one("g = fun (x) { return x }");
        let Stmt::Assign { value, .. } = stmt else {
            panic!("expected assignment");
        };
        assert!(matches!(value.node, Expr::Lambda(_)));
    }

    #[test]
    fn slices() {
        let Stmt::Expr(expr) = parse_one("l[1:5:2]") else {
            panic!("expected expression");
        };
        let Expr::SliceOf { start, end, step, .. } = expr.node else {
            panic!("expected slice");
        };
        assert!(start.is_some() && end.is_some() && step.is_some());

        let Stmt::Expr(expr) = parse_one("l[::2]") else {
            panic!("expected expression");
        };
        let Expr::SliceOf { start, end, step, .. } = expr.node else {
            panic!("expected slice");
        };
        assert!(start.is_none() && end.is_none() && step.is_some());
    }

    #[test]
    fn empty_dict_literal() {
        let Stmt::Expr(expr) = parse_one("{,}") else {
            panic!("expected expression");
        };
        assert!(matches!(expr.node, Expr::DictLit(pairs) if pairs.is_empty()));
    }

    #[test]
    fn variadic_and_typed_params() {
        let stmt = parse_one("fun f(a:[Int, Float], b = 2, *rest) { return a }");
        let Stmt::Fun { params, .. } = stmt else {
            panic!("expected fun");
        };
        assert_eq!(params[0].types.as_deref(), Some(["Int".to_owned(), "Float".to_owned()].as_slice()));
        assert!(params[1].default.is_some());
        assert!(params[2].variadic);
    }

    #[test]
    fn bad_prefix_reports_syntax_error() {
        let err = parse("x\"abc\"").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SyntaxError);
        assert!(err.message.contains("Unsupported string prefix"));
    }

    #[test]
    fn hex_literal_parses_to_int() {
        let Stmt::Expr(expr) = parse_one("0x10") else {
            panic!("expected expression");
        };
        assert!(matches!(expr.node, Expr::Lit(Value::Int(v)) if v == BigInt::from(16)));
    }
}

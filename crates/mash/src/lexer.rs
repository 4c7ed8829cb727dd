use std::fmt;

use num_bigint::BigInt;
use num_traits::Num;

use crate::error::{CodeLoc, MashError, MashResult};

/// Kind of a triple-quoted text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    /// `n"""…"""` — notebook note.
    Note,
    /// `d"""…"""` — documentation for the last definition.
    Doc,
}

/// One lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int(BigInt),
    Float(f64),
    /// String literal; the text is raw (escapes unresolved), the prefix (if
    /// any) is validated by the parser.
    Str { text: String, prefix: Option<String> },
    /// Triple-quoted note or doc block, raw inner text.
    Note { kind: NoteKind, text: String },

    KwIf,
    KwElif,
    KwElse,
    KwWhile,
    KwDo,
    KwFor,
    KwBreak,
    KwContinue,
    KwReturn,
    KwFun,
    KwNew,
    KwSpace,
    KwClass,
    KwEnum,
    KwImport,
    KwAs,
    KwIn,
    KwAnd,
    KwOr,
    KwNot,
    KwNil,
    KwTrue,
    KwFalse,
    KwInternal,

    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Caret,
    PlusPlus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    SlashSlashEq,
    PercentEq,
    CaretEq,
    PlusPlusEq,
    QuestionEq,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,
    AndAnd,
    OrOr,
    Bang,
    Question,
    Colon,
    ColonColon,
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    At,

    Newline,
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ident(name) => return write!(f, "{name}"),
            Self::Int(v) => return write!(f, "{v}"),
            Self::Float(v) => return write!(f, "{v}"),
            Self::Str { text, .. } => return write!(f, "\"{text}\""),
            Self::Note { .. } => "note",
            Self::KwIf => "if",
            Self::KwElif => "elif",
            Self::KwElse => "else",
            Self::KwWhile => "while",
            Self::KwDo => "do",
            Self::KwFor => "for",
            Self::KwBreak => "break",
            Self::KwContinue => "continue",
            Self::KwReturn => "return",
            Self::KwFun => "fun",
            Self::KwNew => "new",
            Self::KwSpace => "space",
            Self::KwClass => "class",
            Self::KwEnum => "enum",
            Self::KwImport => "import",
            Self::KwAs => "as",
            Self::KwIn => "in",
            Self::KwAnd => "and",
            Self::KwOr => "or",
            Self::KwNot => "not",
            Self::KwNil => "nil",
            Self::KwTrue => "true",
            Self::KwFalse => "false",
            Self::KwInternal => "internal",
            Self::Assign => "=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::SlashSlash => "//",
            Self::Percent => "%",
            Self::Caret => "^",
            Self::PlusPlus => "++",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::SlashEq => "/=",
            Self::SlashSlashEq => "//=",
            Self::PercentEq => "%=",
            Self::CaretEq => "^=",
            Self::PlusPlusEq => "++=",
            Self::QuestionEq => "?=",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Bang => "!",
            Self::Question => "?",
            Self::Colon => ":",
            Self::ColonColon => "::",
            Self::Dot => ".",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::At => "@",
            Self::Newline => "newline",
            Self::Eof => "end of input",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub loc: CodeLoc,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn loc(&self) -> CodeLoc {
        CodeLoc::new(self.line, self.col)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn starts_with(&self, text: &str) -> bool {
        self.src[self.pos..].starts_with(text.as_bytes())
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn error(&self, message: impl Into<String>) -> MashError {
        MashError::syntax(message, self.loc())
    }

    /// Reads the body of a triple-quoted block, starting after the opening
    /// quotes; the raw inner text keeps newlines as written.
    fn triple_quoted(&mut self) -> MashResult<String> {
        let start_loc = self.loc();
        let mut bytes = Vec::new();
        loop {
            if self.starts_with("\"\"\"") {
                self.bump_n(3);
                return String::from_utf8(bytes)
                    .map_err(|_| MashError::syntax("Invalid UTF-8 in text block", start_loc));
            }
            match self.bump() {
                Some(c) => bytes.push(c),
                None => {
                    return Err(MashError::syntax("Unterminated triple-quoted text", start_loc));
                }
            }
        }
    }

    /// Reads a single-quoted string body after the opening quote. Escape
    /// sequences are kept verbatim; only `\"` and `\\` matter for finding
    /// the closing quote.
    fn quoted(&mut self) -> MashResult<String> {
        let start_loc = self.loc();
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => {
                    return String::from_utf8(bytes)
                        .map_err(|_| MashError::syntax("Invalid UTF-8 in string", start_loc));
                }
                Some(b'\n') | None => {
                    return Err(MashError::syntax("Unterminated string", start_loc));
                }
                Some(b'\\') => {
                    bytes.push(b'\\');
                    if let Some(next) = self.bump() {
                        bytes.push(next);
                    }
                }
                Some(c) => bytes.push(c),
            }
        }
    }

    fn string_token(&mut self, prefix: Option<String>, loc: CodeLoc) -> MashResult<Token> {
        if self.starts_with("\"\"\"") {
            self.bump_n(3);
            let text = self.triple_quoted()?;
            let kind = match prefix.as_deref() {
                Some("n" | "note") => Some(NoteKind::Note),
                Some("d" | "doc") => Some(NoteKind::Doc),
                Some(other) => {
                    return Err(MashError::syntax(format!("Unsupported note prefix '{other}'"), loc));
                }
                // A plain triple-quoted block is an ordinary multiline string.
                None => None,
            };
            let tok = match kind {
                Some(kind) => Tok::Note { kind, text },
                None => Tok::Str { text, prefix: None },
            };
            return Ok(Token { tok, loc });
        }
        self.bump(); // opening quote
        let text = self.quoted()?;
        Ok(Token {
            tok: Tok::Str { text, prefix },
            loc,
        })
    }

    fn number(&mut self, loc: CodeLoc) -> MashResult<Token> {
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.bump_n(2);
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit() || c == b'_') {
                self.bump();
            }
            let digits = std::str::from_utf8(&self.src[start..self.pos])
                .map_err(|_| self.error("Invalid hexadecimal literal"))?
                .replace('_', "");
            if digits.is_empty() {
                return Err(MashError::syntax("Invalid hexadecimal literal", loc));
            }
            let value = BigInt::from_str_radix(&digits, 16)
                .map_err(|_| MashError::syntax("Invalid hexadecimal literal", loc))?;
            return Ok(Token {
                tok: Tok::Int(value),
                loc,
            });
        }

        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.bump_n(lookahead);
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).map_err(|_| self.error("Invalid number"))?;
        let tok = if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| MashError::syntax(format!("Invalid float literal '{text}'"), loc))?;
            Tok::Float(value)
        } else {
            let value = BigInt::from_str_radix(text, 10)
                .map_err(|_| MashError::syntax(format!("Invalid integer literal '{text}'"), loc))?;
            Tok::Int(value)
        };
        Ok(Token { tok, loc })
    }

    fn ident_or_keyword(&mut self, loc: CodeLoc) -> MashResult<Token> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.error("Invalid identifier"))?
            .to_owned();

        // A quote directly after an identifier makes it a string prefix.
        if self.peek() == Some(b'"') {
            return self.string_token(Some(text), loc);
        }

        let tok = match text.as_str() {
            "if" => Tok::KwIf,
            "elif" => Tok::KwElif,
            "else" => Tok::KwElse,
            "while" => Tok::KwWhile,
            "do" => Tok::KwDo,
            "for" => Tok::KwFor,
            "break" => Tok::KwBreak,
            "continue" => Tok::KwContinue,
            "return" => Tok::KwReturn,
            "fun" => Tok::KwFun,
            "new" => Tok::KwNew,
            "space" => Tok::KwSpace,
            "class" => Tok::KwClass,
            "enum" => Tok::KwEnum,
            "import" => Tok::KwImport,
            "as" => Tok::KwAs,
            "in" => Tok::KwIn,
            "and" => Tok::KwAnd,
            "or" => Tok::KwOr,
            "not" => Tok::KwNot,
            "nil" => Tok::KwNil,
            "true" => Tok::KwTrue,
            "false" => Tok::KwFalse,
            "internal" => Tok::KwInternal,
            _ => Tok::Ident(text),
        };
        Ok(Token { tok, loc })
    }

    fn operator(&mut self, loc: CodeLoc) -> MashResult<Token> {
        // Longest match first.
        const TABLE: &[(&str, Tok)] = &[
            ("//=", Tok::SlashSlashEq),
            ("++=", Tok::PlusPlusEq),
            ("==", Tok::EqEq),
            ("!=", Tok::NotEq),
            ("<=", Tok::Lte),
            (">=", Tok::Gte),
            ("&&", Tok::AndAnd),
            ("||", Tok::OrOr),
            ("//", Tok::SlashSlash),
            ("++", Tok::PlusPlus),
            ("+=", Tok::PlusEq),
            ("-=", Tok::MinusEq),
            ("*=", Tok::StarEq),
            ("/=", Tok::SlashEq),
            ("%=", Tok::PercentEq),
            ("^=", Tok::CaretEq),
            ("?=", Tok::QuestionEq),
            ("::", Tok::ColonColon),
            ("=", Tok::Assign),
            ("+", Tok::Plus),
            ("-", Tok::Minus),
            ("*", Tok::Star),
            ("/", Tok::Slash),
            ("%", Tok::Percent),
            ("^", Tok::Caret),
            ("<", Tok::Lt),
            (">", Tok::Gt),
            ("!", Tok::Bang),
            ("?", Tok::Question),
            (":", Tok::Colon),
            (".", Tok::Dot),
            (",", Tok::Comma),
            (";", Tok::Semicolon),
            ("(", Tok::LParen),
            (")", Tok::RParen),
            ("{", Tok::LBrace),
            ("}", Tok::RBrace),
            ("[", Tok::LBracket),
            ("]", Tok::RBracket),
            ("@", Tok::At),
        ];
        for (text, tok) in TABLE {
            if self.starts_with(text) {
                self.bump_n(text.len());
                return Ok(Token {
                    tok: tok.clone(),
                    loc,
                });
            }
        }
        let c = self.peek().map_or(' ', |c| c as char);
        Err(MashError::syntax(format!("Unexpected character '{c}'"), loc))
    }
}

/// Tokenizes Mash source text.
///
/// Newlines are kept as tokens (they terminate statements); `#` starts a
/// line comment. The stream always ends with a single `Eof` token.
pub fn tokenize(src: &str) -> MashResult<Vec<Token>> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        match lexer.peek() {
            None => break,
            Some(b' ' | b'\t' | b'\r') => {
                lexer.bump();
            }
            Some(b'#') => {
                while lexer.peek().is_some_and(|c| c != b'\n') {
                    lexer.bump();
                }
            }
            Some(b'\n') => {
                let loc = lexer.loc();
                lexer.bump();
                tokens.push(Token {
                    tok: Tok::Newline,
                    loc,
                });
            }
            Some(b'"') => {
                let loc = lexer.loc();
                let token = lexer.string_token(None, loc)?;
                tokens.push(token);
            }
            Some(c) if c.is_ascii_digit() => {
                let loc = lexer.loc();
                let token = lexer.number(loc)?;
                tokens.push(token);
            }
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let loc = lexer.loc();
                let token = lexer.ident_or_keyword(loc)?;
                tokens.push(token);
            }
            Some(_) => {
                let loc = lexer.loc();
                let token = lexer.operator(loc)?;
                tokens.push(token);
            }
        }
    }
    tokens.push(Token {
        tok: Tok::Eof,
        loc: lexer.loc(),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn basic_statement() {
        assert_eq!(
            kinds("a = 5"),
            vec![
                Tok::Ident("a".to_owned()),
                Tok::Assign,
                Tok::Int(5.into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn maximal_munch_operators() {
        assert_eq!(
            kinds("a //= b ++ c"),
            vec![
                Tok::Ident("a".to_owned()),
                Tok::SlashSlashEq,
                Tok::Ident("b".to_owned()),
                Tok::PlusPlus,
                Tok::Ident("c".to_owned()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn string_prefixes() {
        let toks = kinds("r\"a\\tb\"");
        assert_eq!(
            toks[0],
            Tok::Str {
                text: "a\\tb".to_owned(),
                prefix: Some("r".to_owned())
            }
        );
    }

    #[test]
    fn note_blocks() {
        let toks = kinds("n\"\"\"hello\nworld\"\"\"");
        assert_eq!(
            toks[0],
            Tok::Note {
                kind: NoteKind::Note,
                text: "hello\nworld".to_owned()
            }
        );
    }

    #[test]
    fn hex_and_float_literals() {
        assert_eq!(kinds("0x1F")[0], Tok::Int(31.into()));
        assert_eq!(kinds("1.5")[0], Tok::Float(1.5));
        assert_eq!(kinds("2e3")[0], Tok::Float(2000.0));
    }

    #[test]
    fn comments_are_skipped() {
        let toks = kinds("a # trailing\nb");
        assert_eq!(
            toks,
            vec![
                Tok::Ident("a".to_owned()),
                Tok::Newline,
                Tok::Ident("b".to_owned()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = tokenize("\"abc").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SyntaxError);
        assert!(err.loc.is_some());
    }

    #[test]
    fn line_and_column_tracking() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!(tokens[0].loc, CodeLoc::new(1, 1));
        assert_eq!(tokens[2].loc, CodeLoc::new(2, 3));
    }
}

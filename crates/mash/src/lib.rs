#![doc = include_str!("../../../README.md")]

mod builtins;
mod call;
mod error;
mod eval;
mod fold;
mod import;
mod io;
mod ir;
mod lexer;
mod lower;
mod notebook;
mod ops;
mod parse;
mod run;
mod symbol_table;
mod value;

pub use crate::{
    error::{CodeLoc, ErrorKind, MashError, MashResult},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    run::{Interpreter, Options, VERSION},
};

//! Public interface for running Mash code.
use std::{fmt::Display, path::PathBuf};

use crate::{
    error::{ErrorKind, MashError, MashResult},
    eval::Interp,
    fold::fold_program,
    io::PrintWriter,
    lower::Lowerer,
    notebook::Notebook,
    parse::parse,
    symbol_table::SymbolTable,
};

/// Interpreter version, printed by `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bundled standard library source, loaded ahead of user code unless
/// `no_libmash` is set.
const LIBMASH: &str = include_str!("../lib/libmash.ms");

/// Parsed command-line options consumed by the core.
///
/// The CLI (or an embedding host) fills this in; the core never reads
/// `std::env` itself.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Source file name used in diagnostics; `None` for `-e`/stdin input.
    pub file: Option<PathBuf>,
    /// `-v` — debug traces on stderr.
    pub verbose: bool,
    /// `-s` — lower only and print the IR dump instead of executing.
    pub dump_ir: bool,
    /// `--parse-only` — stop after parsing.
    pub parse_only: bool,
    /// `--no-libmash` — skip loading the bundled standard library.
    pub no_libmash: bool,
    /// `-l` — module search directories, in order.
    pub lib_paths: Vec<PathBuf>,
    /// `-o` — notebook/markdown output path.
    pub output: Option<PathBuf>,
    /// `-p` — echo notes to stdout as well.
    pub print_notes: bool,
    /// Arguments following the script name, visible to the program.
    pub program_args: Vec<String>,
}

impl Options {
    /// Display name of the input for error messages.
    #[must_use]
    pub fn file_display(&self) -> String {
        self.file
            .as_ref()
            .map_or_else(String::new, |p| p.display().to_string())
    }
}

/// Writes a debug trace to stderr in verbose mode.
pub(crate) fn debug(opts: &Options, message: impl Display) {
    if opts.verbose {
        eprintln!("DEBUG: {message}.");
    }
}

/// The interpreter pipeline: parse → fold → lower → evaluate.
///
/// # Example
/// ```
/// use mash::{CollectStringPrint, Interpreter, Options};
///
/// let mut out = CollectStringPrint::new();
/// Interpreter::new(Options::default())
///     .run("a = 5 a", &mut out)
///     .unwrap();
/// assert_eq!(out.output(), "5");
/// ```
#[derive(Debug, Clone)]
pub struct Interpreter {
    opts: Options,
}

impl Interpreter {
    #[must_use]
    pub fn new(opts: Options) -> Self {
        Self { opts }
    }

    #[must_use]
    pub fn opts(&self) -> &Options {
        &self.opts
    }

    /// Runs a complete program from source text, writing program output to
    /// `out`. Errors carry the taxonomy kind; the caller decides exit codes
    /// and formatting.
    pub fn run(&self, code: &str, out: &mut dyn PrintWriter) -> MashResult<()> {
        debug(&self.opts, "Parser started");
        let user_stmts = parse(code)?;
        debug(&self.opts, "Parser finished");
        if self.opts.parse_only {
            return Ok(());
        }
        let user_stmts = fold_program(user_stmts);

        let mut table = SymbolTable::new();
        let mut program = Vec::new();
        let user_start;
        {
            let mut lowerer = Lowerer::new(&mut table, &self.opts);
            if !self.opts.no_libmash {
                let lib_stmts = fold_program(parse(LIBMASH)?);
                lowerer.lower_into(&lib_stmts, &mut program)?;
            }
            user_start = program.len();
            lowerer.lower_into(&user_stmts, &mut program)?;
        }
        debug(&self.opts, "IR generation done");

        if self.opts.dump_ir {
            for instr in &program[user_start..] {
                out.write(&format!("{instr}\n"))?;
            }
            return Ok(());
        }

        table.clear();
        table.analyzer = false;
        let notebook = match &self.opts.output {
            Some(path) => {
                // The output format is chosen from the extension; markdown is
                // the only one implemented.
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("md");
                if !matches!(ext, "md" | "markdown") {
                    return Err(MashError::new(
                        ErrorKind::Unimplemented,
                        format!("Notebook output format '{ext}'"),
                    ));
                }
                Some(Notebook::create(path, code)?)
            }
            None => None,
        };
        debug(&self.opts, "Running IR");
        let mut interp = Interp::new(table, out, notebook, self.opts.print_notes);
        let result = interp.run(&program);
        debug(&self.opts, "Finished running IR");
        result
    }
}

use std::{
    env, fs,
    io::Read as _,
    path::PathBuf,
    process::ExitCode,
};

use mash::{Interpreter, MashError, Options, StdPrint, VERSION};

/// Where the source comes from.
enum Input {
    /// `-e <code>`
    Inline(String),
    File(PathBuf),
    Stdin,
}

struct Cli {
    opts: Options,
    input: Input,
    print_version: bool,
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut opts = Options::default();
    let mut input = None;
    let mut print_version = false;
    let mut code = None;

    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" => print_version = true,
            "-e" => {
                let value = iter.next().ok_or("'-e' expects Mash code")?;
                code = Some(value.clone());
            }
            "-v" => opts.verbose = true,
            "-s" => opts.dump_ir = true,
            "--parse-only" => opts.parse_only = true,
            "--no-libmash" => opts.no_libmash = true,
            "-l" | "--lib-path" => {
                let value = iter.next().ok_or("'-l' expects a directory")?;
                opts.lib_paths.push(PathBuf::from(value));
            }
            "-o" => {
                let value = iter.next().ok_or("'-o' expects a file path")?;
                opts.output = Some(PathBuf::from(value));
            }
            "-p" | "--print-notes" => opts.print_notes = true,
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(format!("Unknown option '{other}'"));
            }
            file => {
                opts.file = Some(PathBuf::from(file));
                input = Some(Input::File(PathBuf::from(file)));
                // Everything after the script name belongs to the program.
                opts.program_args = iter.cloned().collect();
                break;
            }
        }
    }
    if opts.lib_paths.is_empty() {
        opts.lib_paths.push(PathBuf::from("."));
    }
    let input = match (code, input) {
        (Some(code), _) => Input::Inline(code),
        (None, Some(file)) => file,
        (None, None) => Input::Stdin,
    };
    Ok(Cli {
        opts,
        input,
        print_version,
    })
}

fn read_source(input: &Input) -> Result<String, String> {
    match input {
        Input::Inline(code) => Ok(code.clone()),
        Input::File(path) => {
            fs::read_to_string(path).map_err(|err| format!("Cannot read '{}': {err}", path.display()))
        }
        Input::Stdin => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .map_err(|err| format!("Cannot read stdin: {err}"))?;
            Ok(code)
        }
    }
}

/// Parse errors show the offending line with a caret; everything else is a
/// single `<file>: Error: <message>.` line.
fn report(err: &MashError, code: &str, file: &str) {
    if let Some(loc) = err.loc {
        let line_text = code.lines().nth(loc.line as usize - 1).unwrap_or("");
        let mut caret = " ".repeat(loc.col.saturating_sub(1) as usize);
        caret.push('^');
        eprintln!(
            "{file}:{}:{}: Error: {err}\n{:>5} | {line_text}\n      | {caret}",
            loc.line, loc.col, loc.line
        );
    } else {
        eprintln!("{file}: Error: {err}.");
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("Error: {message}.");
            return ExitCode::FAILURE;
        }
    };
    if cli.print_version {
        println!("Mash {VERSION}");
        return ExitCode::SUCCESS;
    }
    let code = match read_source(&cli.input) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("Error: {message}.");
            return ExitCode::FAILURE;
        }
    };

    let file = cli.opts.file_display();
    let interpreter = Interpreter::new(cli.opts);
    match interpreter.run(&code, &mut StdPrint) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err, &code, &file);
            ExitCode::FAILURE
        }
    }
}

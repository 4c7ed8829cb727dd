use std::{env, fs};

use mash::{CollectStringPrint, ErrorKind, Interpreter, MashError, Options};
use pretty_assertions::assert_eq;

fn run(code: &str) -> String {
    let mut out = CollectStringPrint::new();
    Interpreter::new(Options::default())
        .run(code, &mut out)
        .unwrap_or_else(|err| panic!("program failed: {err}\n{code}"));
    out.into_output()
}

fn run_err(code: &str) -> MashError {
    let mut out = CollectStringPrint::new();
    Interpreter::new(Options::default())
        .run(code, &mut out)
        .expect_err("program should have failed")
}

/// The interpreter is reusable across runs.
#[test]
fn repeat_run() {
    let interpreter = Interpreter::new(Options::default());

    let mut out = CollectStringPrint::new();
    interpreter.run("1 + 2", &mut out).unwrap();
    assert_eq!(out.output(), "3");

    let mut out = CollectStringPrint::new();
    interpreter.run("1 + 2", &mut out).unwrap();
    assert_eq!(out.output(), "3");
}

#[test]
fn prints_have_no_implicit_newline() {
    assert_eq!(run("1 2 3"), "123");
}

#[test]
fn first_bare_reference_declares_silently() {
    assert_eq!(run("q\nq"), "nil");
}

#[test]
fn string_escapes_resolve_on_display() {
    assert_eq!(run("\"a\\tb\""), "a\tb");
    assert_eq!(run("r\"a\\tb\""), "a\\tb");
}

#[test]
fn collection_display_forms() {
    assert_eq!(run("[1, \"a\", nil]"), "[1, \"a\", nil]");
    assert_eq!(run("{,}"), "{,}");
    assert_eq!(run("{\"a\": 1}"), "{\"a\": 1}");
    assert_eq!(run("2.0"), "2.0");
    assert_eq!(run("true"), "true");
}

#[test]
fn dump_mode_prints_ir_instead_of_executing() {
    let mut out = CollectStringPrint::new();
    let opts = Options {
        dump_ir: true,
        ..Options::default()
    };
    Interpreter::new(opts).run("a = 5\na", &mut out).unwrap();
    let dump = out.into_output();
    assert!(dump.contains("SET 5, a"), "unexpected dump: {dump}");
    assert!(dump.contains("SETORPRINT nil, a"), "unexpected dump: {dump}");
}

#[test]
fn parse_only_mode_stops_before_lowering() {
    let mut out = CollectStringPrint::new();
    let opts = Options {
        parse_only: true,
        ..Options::default()
    };
    Interpreter::new(opts).run("a = 5\na", &mut out).unwrap();
    assert_eq!(out.output(), "");
}

#[test]
fn parse_errors_carry_a_location() {
    let err = run_err("a = ");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.loc.is_some());
}

#[test]
fn no_libmash_drops_the_builtin_library() {
    let mut out = CollectStringPrint::new();
    let opts = Options {
        no_libmash: true,
        ..Options::default()
    };
    let err = Interpreter::new(opts)
        .run("range(3)", &mut out)
        .expect_err("range should be unknown without libmash");
    assert_eq!(err.kind, ErrorKind::UndefinedReference);
}

#[test]
fn imports_load_modules_from_the_search_path() {
    let dir = env::temp_dir().join(format!("mash-import-test-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("util.ms"), "fun twice(x) { return x * 2 }\n").unwrap();

    let mut out = CollectStringPrint::new();
    let opts = Options {
        lib_paths: vec![dir.clone()],
        ..Options::default()
    };
    Interpreter::new(opts)
        .run("import util\nutil::twice(21)", &mut out)
        .unwrap();
    assert_eq!(out.output(), "42");

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_import_is_an_import_error() {
    let err = run_err("import definitely_not_a_module");
    assert_eq!(err.kind, ErrorKind::ImportError);
}

#[test]
fn notebook_interleaves_code_output_and_notes() {
    let dir = env::temp_dir();
    let path = dir.join(format!("mash-notebook-test-{}.md", std::process::id()));

    let mut out = CollectStringPrint::new();
    let opts = Options {
        output: Some(path.clone()),
        ..Options::default()
    };
    let code = "n\"\"\"Intro\"\"\"\na = 1\na\nn\"\"\"End\"\"\"\n";
    Interpreter::new(opts).run(code, &mut out).unwrap();
    // Program output still reaches stdout.
    assert_eq!(out.output(), "1");

    let notebook = fs::read_to_string(&path).unwrap();
    assert!(notebook.contains("Intro"), "notebook: {notebook}");
    assert!(notebook.contains("```\na = 1\na\n```"), "notebook: {notebook}");
    assert!(notebook.contains("_[Output]:_"), "notebook: {notebook}");
    assert!(notebook.contains("```\n1\n```"), "notebook: {notebook}");
    assert!(notebook.contains("End"), "notebook: {notebook}");

    fs::remove_file(&path).ok();
}

#[test]
fn print_notes_echoes_notes_to_stdout() {
    let mut out = CollectStringPrint::new();
    let opts = Options {
        print_notes: true,
        ..Options::default()
    };
    Interpreter::new(opts)
        .run("n\"\"\"A note\"\"\"\n1", &mut out)
        .unwrap();
    assert_eq!(out.output(), "A note\n1");
}

#[test]
fn notes_are_rejected_outside_the_global_scope() {
    let err = run_err("fun f() { n\"\"\"inside\"\"\" }");
    assert_eq!(err.kind, ErrorKind::IncorrectDefinition);
}

#[test]
fn docs_attach_to_the_last_definition() {
    // The doc statement must lower and execute without touching output.
    assert_eq!(run("fun f(x) { return x }\nd\"\"\"Doubles nothing.\"\"\"\nf(1)"), "1");
}

//! End-to-end language scenarios: whole programs in, stdout out.

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

#[test]
fn assignment_and_print() {
    assert_eq!(run("a = 5; a"), "5");
}

#[test]
fn function_call_with_return() {
    assert_eq!(run("fun f(x) { return x + 1 } f(2)"), "3");
}

#[test]
fn arity_overloads_dispatch_separately() {
    assert_eq!(
        run("fun f(x) { return 1 } fun f(x, y) { return 2 } f(1) f(1, 2)"),
        "12"
    );
}

#[test]
fn typed_overloads_pick_the_matching_signature() {
    assert_eq!(
        run("fun f(x:[Int]) { return 1 } fun f(x:[String]) { return 2 } f(\"hi\") f(7)"),
        "21"
    );
}

#[test]
fn inherited_methods_are_callable() {
    assert_eq!(
        run("class P { fun show(self) { \"P\" } } class C : P { } c = C() c.show()"),
        "P"
    );
}

#[test]
fn for_loop_accumulates() {
    assert_eq!(run("l = [1, 2, 3] s = 0 for i : l { s += i } s"), "6");
}

#[test]
fn space_members_are_assignable_from_outside() {
    assert_eq!(run("space A { a = 1 } A::a = 2 A::a"), "2");
}

#[test]
fn global_prefix_writes_from_inside_a_function() {
    assert_eq!(run("fun f() { ::x = 10 } x = 0 f() x"), "10");
}

#[test]
fn division_by_zero_fails_at_runtime() {
    let err = run_err("1 / 0");
    assert_eq!(err.kind, ErrorKind::ValueError);
    let err = run_err("1 // 0");
    assert_eq!(err.kind, ErrorKind::ValueError);
}

#[test]
fn list_equality_is_structural_but_identity_differs() {
    assert_eq!(run("a = [1, 2] b = [1, 2] (a == b)"), "true");
    assert_eq!(run("a = [1, 2] b = [1, 2] (id(a) == id(b))"), "false");
    assert_eq!(run("a = [1, 2] b = a (id(a) == id(b))"), "true");
}

// --- control flow ---

#[test]
fn if_elif_else_chains() {
    let code = "fun grade(x) {
        if (x > 2) { return \"big\" }
        elif (x > 1) { return \"mid\" }
        else { return \"small\" }
    }
    grade(3) grade(2) grade(0)";
    assert_eq!(run(code), "bigmidsmall");
}

#[test]
fn while_loop_with_break_and_continue() {
    let code = "x = 0
    s = 0
    while (x < 10) {
        x += 1
        if (x == 3) { continue }
        if (x > 5) { break }
        s += x
    }
    s";
    // 1 + 2 + 4 + 5
    assert_eq!(run(code), "12");
}

#[test]
fn do_while_runs_the_body_first() {
    assert_eq!(run("x = 10 do { x += 1 } while (x < 3) x"), "11");
}

#[test]
fn return_unwinds_nested_blocks_without_leaking_frames() {
    let code = "fun f() {
        while (true) {
            if (true) {
                return 7
            }
        }
    }
    f() f()";
    assert_eq!(run(code), "77");
}

#[test]
fn recursion() {
    let code = "fun fact(n) {
        if (n <= 1) { return 1 }
        return n * fact(n - 1)
    }
    fact(6)";
    assert_eq!(run(code), "720");
}

#[test]
fn ternary_expression() {
    assert_eq!(run("x = 1 > 2 ? \"y\" : \"n\" x"), "n");
}

#[test]
fn stray_break_is_a_flow_control_error() {
    assert_eq!(run_err("break").kind, ErrorKind::FlowControl);
    assert_eq!(run_err("return 1").kind, ErrorKind::FlowControl);
}

// --- values and operators ---

#[test]
fn concatenation_stringifies_both_sides() {
    assert_eq!(run("\"a\" ++ 1"), "a1");
    assert_eq!(run("1 ++ 2"), "12");
}

#[test]
fn arbitrary_precision_integers() {
    assert_eq!(run("2 ^ 100"), "1267650600228229401496703205376");
}

#[test]
fn short_circuit_or_keeps_the_right_value() {
    assert_eq!(run("(false || 5)"), "5");
    assert_eq!(run("(true || 5)"), "true");
    assert_eq!(run("(false && 5)"), "false");
}

#[test]
fn membership_tests() {
    assert_eq!(run("l = [1, 2] (1 in l) (3 in l)"), "truefalse");
    assert_eq!(run("d = {\"a\": 1} (\"a\" in d)"), "true");
    assert_eq!(run("(\"ell\" in \"hello\")"), "true");
}

#[test]
fn indexing_and_slicing() {
    assert_eq!(run("l = [10, 20, 30] l[1]"), "20");
    assert_eq!(run("l = [10, 20, 30] l[-1]"), "30");
    assert_eq!(run("l = [1, 2, 3, 4] l[1:3]"), "[2, 3]");
    assert_eq!(run("\"hello\"[1]"), "e");
    assert_eq!(run("\"hello\"[1:4]"), "ell");
    assert_eq!(run("\"hello\"[4:0:-1]"), "olle");
    assert_eq!(run("d = {\"a\": 1} d[\"a\"]"), "1");
}

#[test]
fn bad_container_access_error_kinds() {
    assert_eq!(run_err("l = [1] l[5]").kind, ErrorKind::IndexError);
    assert_eq!(run_err("d = {\"a\": 1} d[\"b\"]").kind, ErrorKind::KeyError);
    assert_eq!(run_err("l = [1] l[::0]").kind, ErrorKind::ValueError);
    assert_eq!(run_err("(1 + \"a\")").kind, ErrorKind::TypeError);
}

#[test]
fn multi_assignment_unpacks_lists() {
    assert_eq!(run("(a, b) = [1, 2] a b"), "12");
    assert_eq!(run_err("(a, b) = [1, 2, 3]").kind, ErrorKind::TypeError);
}

#[test]
fn for_loop_destructures_pairs() {
    assert_eq!(run("s = 0 for (k, v) : {\"a\": 1, \"b\": 2} { s += v } s"), "3");
}

#[test]
fn set_if_not_set_only_binds_once() {
    assert_eq!(run("a ?= 1 a ?= 2 a"), "1");
}

// --- functions ---

#[test]
fn default_arguments_and_named_arguments() {
    assert_eq!(run("fun f(a, b = 2) { return a + b } f(1) f(1, b = 5)"), "36");
}

#[test]
fn unknown_named_argument_is_a_type_error() {
    assert_eq!(
        run_err("fun f(a, b = 2) { return a } f(1, c = 5)").kind,
        ErrorKind::TypeError
    );
}

#[test]
fn variadic_binds_the_remaining_positionals() {
    assert_eq!(run("fun f(first, *rest) { return rest } f(1, 2, 3)"), "[2, 3]");
    assert_eq!(run("fun f(*rest) { return rest } f()"), "[]");
}

#[test]
fn overlapping_overload_ranges_are_ambiguous() {
    let err = run_err("fun f(x) { return 1 } fun f(x, y = 1) { return 2 }");
    assert_eq!(err.kind, ErrorKind::AmbiguousRedefinition);
}

#[test]
fn functions_are_printable_values() {
    assert_eq!(run("fun f(x) { return x } f"), "<function 'f'>");
    assert_eq!(
        run("fun f(x) { return x } fun f(x, y) { return x } f"),
        "<function 'f' with 2 signatures>"
    );
}

#[test]
fn lambdas_bind_through_assignment() {
    assert_eq!(run("g = fun (x) { return x * 2 } g(4)"), "8");
}

#[test]
fn calling_a_non_callable_is_a_type_error() {
    assert_eq!(run_err("a = 5 a(1)").kind, ErrorKind::TypeError);
}

// --- classes, spaces, enums ---

#[test]
fn constructors_set_instance_attributes() {
    let code = "class Point {
        new Point(self, x, y) {
            self.x = x
            self.y = y
        }
    }
    p = Point(1, 2)
    p.x p.y";
    assert_eq!(run(code), "12");
}

#[test]
fn operator_overloading_and_custom_display() {
    let code = "class Vec {
        new Vec(self, x) { self.x = x }
        fun (+)(self, other) { return Vec(self.x + other.x) }
        fun __String(self) { return \"V\" ++ self.x }
    }
    v = Vec(1) + Vec(2)
    v";
    assert_eq!(run(code), "V3");
}

#[test]
fn classes_without_a_constructor_instantiate_bare() {
    assert_eq!(run("class Empty { } e = Empty() e"), "<Empty object>");
}

#[test]
fn constructor_must_return_nil() {
    let code = "class C { new C(self) { return 5 } } C()";
    assert_eq!(run_err(code).kind, ErrorKind::TypeError);
}

#[test]
fn constructor_name_must_match_the_class() {
    let code = "class C { new D(self) { } }";
    assert_eq!(run_err(code).kind, ErrorKind::IncorrectDefinition);
}

#[test]
fn class_iteration_stops_on_the_sentinel() {
    let code = "class Counter {
        new Counter(self, limit) {
            self.i = 0
            self.limit = limit
        }
        fun __next(self) {
            if (self.i >= self.limit) { return StopIteration }
            self.i += 1
            return self.i
        }
    }
    s = 0
    for v : Counter(3) { s += v }
    s";
    assert_eq!(run(code), "6");
}

#[test]
fn spaces_nest_and_reopen() {
    let code = "space A { space B { b = 1 } }
    space A { c = 2 }
    A::B::b A::c";
    assert_eq!(run(code), "12");
}

#[test]
fn namespace_functions_are_reachable_by_path() {
    assert_eq!(run("space M { fun inc(x) { return x + 1 } } M::inc(41)"), "42");
}

#[test]
fn enums_compare_by_identity() {
    let code = "enum Color { RED, GREEN, BLUE }
    c = Color::RED
    (c == Color::RED) (c == Color::GREEN) c";
    assert_eq!(run(code), "truefalseColor::RED");
}

#[test]
fn nonlocal_prefix_skips_the_function_frame() {
    assert_eq!(run("y = 0 fun f() { @y = 9 } f() y"), "9");
}

#[test]
fn methods_resolve_on_primitive_receivers() {
    assert_eq!(run("\"hi\".upper()"), "HI");
    assert_eq!(run("s = \"Ab\" s.lower()"), "ab");
    assert_eq!(run("[1, 2, 3].len()"), "3");
}

// --- builtins ---

#[test]
fn conversions() {
    assert_eq!(run("Int(\"42\") + 1"), "43");
    assert_eq!(run("Int(\"0x10\")"), "16");
    assert_eq!(run("Float(\"1.5\")"), "1.5");
    assert_eq!(run("String(12) ++ \"!\""), "12!");
    assert_eq!(run("Bool(0) Bool(3)"), "falsetrue");
    assert_eq!(run_err("Int(\"abc\")").kind, ErrorKind::ValueError);
}

#[test]
fn type_answers_the_type_class() {
    assert_eq!(run("(type(5) == Int)"), "true");
    assert_eq!(run("(type(\"s\") == String)"), "true");
    assert_eq!(run("class C { } c = C() (type(c) == C)"), "true");
}

#[test]
fn range_zip_reverse() {
    assert_eq!(run("range(4)"), "[0, 1, 2, 3]");
    assert_eq!(run("range(1, 7, 2)"), "[1, 3, 5]");
    assert_eq!(run("zip([1, 2], [\"a\", \"b\"])"), "[[1, \"a\"], [2, \"b\"]]");
    assert_eq!(run("reverse([1, 2, 3])"), "[3, 2, 1]");
    assert_eq!(run("reverse(\"abc\")"), "cba");
}

#[test]
fn shuffle_permutes_a_copy() {
    let code = "l = [1, 2, 3]
    s = shuffle(l)
    len(s) (1 in s) (2 in s) (3 in s)
    l";
    // The shuffled copy holds the same elements; the original is untouched.
    assert_eq!(run(code), "3truetruetrue[1, 2, 3]");
}

#[test]
fn bit_manipulation() {
    assert_eq!(run("bitand(6, 3) bitor(4, 1) bitxor(6, 3)"), "255");
    assert_eq!(run("lshift(1, 4) rshift(16, 2)"), "164");
    assert_eq!(run("bitnot(0)"), "-1");
}

#[test]
fn getattr_and_setattr() {
    let code = "class C { new C(self) { self.x = 1 } }
    c = C()
    getattr(c, \"x\")
    setattr(c, \"y\", 9)
    c.y
    getattr(c, \"missing\", 0)";
    assert_eq!(run(code), "190");
}

#[test]
fn docs_are_reachable_through_getattr() {
    let code = "space M { }
    d\"\"\"Module M.\"\"\"
    getattr(M, \"__doc__\")";
    assert_eq!(run(code), "Module M.");
}

#[test]
fn undefined_reference_reports_the_name() {
    let err = run_err("zzz + 1");
    assert_eq!(err.kind, ErrorKind::UndefinedReference);
    assert!(err.message.contains("zzz"));
}

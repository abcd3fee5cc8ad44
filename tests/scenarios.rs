//! End-to-end scenarios and the cross-cutting testable properties from
//! spec.md §8, run against the whole lex → parse → compile → execute
//! pipeline rather than any single module in isolation.

use std::io::Write as _;
use std::path::PathBuf;

use rill::front;
use rill::pipeline;
use rill::vm::Vm;
use rill::RillError;

fn run(source: &str) -> String {
    let binary = pipeline::compile_source(source, "<scenario>").expect("compiles");
    let mut out = Vec::new();
    {
        let mut vm = Vm::new(binary, &mut out, PathBuf::from("."));
        vm.run().expect("runs");
    }
    String::from_utf8(out).expect("utf8 output")
}

#[test]
fn scenario_1_operator_precedence() {
    assert_eq!(run("print(1 + 2 * 3)"), "7\n");
}

#[test]
fn scenario_2_variable_mutation() {
    assert_eq!(run("var x = 2\nx = x + 40\nprint(x)"), "42\n");
}

#[test]
fn scenario_3_function_call() {
    assert_eq!(run("fn add(a, b) { return a + b }\nprint(add(3, 4))"), "7\n");
}

#[test]
fn scenario_4_recursive_fibonacci() {
    let src = "fn fib(n) { if n < 2 { return n }\nreturn fib(n-1) + fib(n-2) }\nprint(fib(10))";
    assert_eq!(run(src), "55\n");
}

#[test]
fn scenario_5_for_over_inclusive_range() {
    assert_eq!(run("for i in 1..3 { print(i) }"), "1\n2\n3\n");
}

#[test]
fn scenario_6_tuple_printing() {
    assert_eq!(run("print((1, 2, 3))"), "(1, 2, 3)\n");
}

#[test]
fn scenario_7_string_concat_and_immutability() {
    assert_eq!(run("let s = \"foo\" + \"bar\"\nprint(s)"), "foobar\n");

    let err = pipeline::compile_source("let s = \"foo\"\ns = \"x\"", "<scenario>").unwrap_err();
    assert!(format!("{err}").contains("immutable"), "error was: {err}");
}

#[test]
fn arity_mismatch_is_a_compile_time_error() {
    let err = pipeline::compile_source("fn add(a, b) { return a + b }\nadd(1)", "<scenario>").unwrap_err();
    match err {
        RillError::Semantic(d) => assert!(d.message.contains("argument")),
        other => panic!("expected a semantic error, got {other:?}"),
    }
}

#[test]
fn boolean_identity_not_not_equals_truthiness() {
    assert_eq!(run("print(!!1)"), "true\n");
    assert_eq!(run("print(!!0)"), "false\n");
    assert_eq!(run("print(!!\"\")"), "false\n");
    assert_eq!(run("print(!!\"x\")"), "true\n");
}

#[test]
fn iteration_returns_n_values_then_nil() {
    // Three-element tuple: DEREF should yield 1, 2, 3, then stop the loop
    // (observed indirectly — the loop body runs exactly 3 times).
    assert_eq!(run("for x in (10, 20, 30) { print(x) }"), "10\n20\n30\n");
}

#[test]
fn round_trip_lex_parse_print_parse_is_structurally_equal() {
    let sources = [
        "print(1 + 2 * 3)",
        "var x = 2\nx = x + 40\nprint(x)",
        "fn add(a, b) { return a + b }\nprint(add(3, 4))",
        "if 1 < 2 { print(1) }",
        "for i in 1..3 { print(i) }",
        "print((1, 2, 3))",
        "let s = \"foo\" + \"bar\"\nprint(s)",
    ];
    for source in sources {
        let first = front::parse("<round-trip>", source).expect("first parse");
        let reprinted = first.to_string();
        let second = front::parse("<round-trip>", &reprinted).unwrap_or_else(|e| {
            panic!("reprinted source failed to re-parse: {reprinted:?}\n{e}")
        });
        assert_eq!(first, second, "round trip mismatch for {source:?}\nreprinted: {reprinted:?}");
    }
}

#[test]
fn modules_expose_only_exported_functions() {
    let dir = std::env::temp_dir().join("rill_scenario_modules");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("util.rill"),
        "exported fn add(a, b) { return a + b }\nfn secret() { return 1 }\n",
    )
    .unwrap();
    std::fs::write(dir.join("main.rill"), "import \"util\"\nprint(type(util.add))\n").unwrap();

    let mut out = Vec::new();
    pipeline::run_file(&dir.join("main.rill"), &mut out).expect("runs");
    assert_eq!(String::from_utf8(out).unwrap(), "function\n");

    std::fs::write(dir.join("main2.rill"), "import \"util\"\nprint(type(util.secret))\n").unwrap();
    let mut out = Vec::new();
    let err = pipeline::run_file(&dir.join("main2.rill"), &mut out).unwrap_err();
    assert!(matches!(err, RillError::Runtime(_)));
    assert!(format!("{err}").contains("secret"));
}

#[test]
fn self_import_is_a_cyclic_import_error() {
    let dir = std::env::temp_dir().join("rill_scenario_cycle");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("loop.rill"), "import \"loop\"\n").unwrap();

    let mut out = Vec::new();
    let err = pipeline::run_file(&dir.join("loop.rill"), &mut out).unwrap_err();
    assert!(matches!(err, RillError::Runtime(_)));
    assert!(format!("{err}").contains("cyclic"));
}

#[test]
fn call_dynamic_leaves_the_stack_depth_unchanged_per_call() {
    // Two sequential built-in calls with different arities shouldn't leak
    // or underflow the evaluation stack across calls.
    let out = run("print(1)\nprint(type(2))\nprint(tuple(1, 2, 3))");
    let mut expected = Vec::new();
    writeln!(expected, "1").unwrap();
    writeln!(expected, "int").unwrap();
    writeln!(expected, "(1, 2, 3)").unwrap();
    assert_eq!(out.into_bytes(), expected);
}

#[test]
fn division_always_yields_a_float() {
    assert_eq!(run("print(type(4 / 2))"), "float\n");
}

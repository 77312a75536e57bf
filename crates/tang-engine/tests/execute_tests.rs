//! End-to-end execution tests.
//!
//! Every program runs on the bytecode interpreter, and — where the platform
//! has the native backend — again through the native generator, asserting
//! both paths agree. The bytecode VM is the canonical semantics.

use tang_engine::{ExecutionContext, Program, ProgramFlags};

fn run_bytecode(source: &str) -> ExecutionContext {
    let program = Program::with_flags(source, ProgramFlags::DISABLE_NATIVE)
        .unwrap_or_else(|e| panic!("compile failed for {source:?}: {e}"));
    let mut context = program.create_context();
    assert!(program.execute(&mut context), "execution failed");
    context
}

/// Execute on both paths and return the (agreed) rendered output.
fn output_of(source: &str) -> String {
    let context = run_bytecode(source);
    let bytecode_output = context.render_output();

    #[cfg(all(unix, target_arch = "x86_64"))]
    {
        let program = Program::with_flags(source, ProgramFlags::empty())
            .unwrap_or_else(|e| panic!("compile failed for {source:?}: {e}"));
        let mut context = program.create_context();
        assert!(program.execute(&mut context), "native execution failed");
        assert_eq!(
            context.render_output(),
            bytecode_output,
            "native and bytecode outputs disagree for {source:?}"
        );
    }

    bytecode_output
}

// -- the canonical scenarios ------------------------------------------------

#[test]
fn test_if_else_branches() {
    assert_eq!(
        output_of(
            r#"print("start "); if (true) { print("true"); } else { print("false"); } print(" end");"#
        ),
        "start true end"
    );
    assert_eq!(
        output_of(
            r#"print("start "); if (false) { print("true"); } else { print("false"); } print(" end");"#
        ),
        "start false end"
    );
}

#[test]
fn test_while_loop_counts() {
    assert_eq!(output_of("i=0; while(i<3){print(i); i=i+1;}"), "012");
    assert_eq!(output_of("i=3; while(i<3){print(i); i=i+1;}"), "");
}

#[test]
fn test_recursive_fibonacci() {
    assert_eq!(
        output_of(
            "function fib(n){ if(n<=0){return 0;} else if(n<=2){return 1;} return fib(n-1)+fib(n-2); } print(fib(10));"
        ),
        "55"
    );
}

#[test]
fn test_function_reads_outer_global() {
    assert_eq!(
        output_of("x=3; function f(z){y=x+1; y=y+z; return y;} print(f(4));"),
        "8"
    );
}

#[test]
fn test_array_size_and_negative_index() {
    assert_eq!(
        output_of(r#"print([1,2,3].size); print(" "); print([1,2,3][-1]);"#),
        "3 3"
    );
}

#[test]
fn test_html_rendering_policy() {
    assert_eq!(output_of(r#"print("a&b".html);"#), "a&amp;b");
    // Untagged strings render verbatim.
    assert_eq!(output_of(r#"print("a&b");"#), "a&b");
}

// -- control flow -----------------------------------------------------------

#[test]
fn test_do_while() {
    assert_eq!(
        output_of("i = 0; do { print(i); i = i + 1; } while (i < 3);"),
        "012"
    );
    // The body always runs once.
    assert_eq!(
        output_of("i = 3; do { print(i); i = i + 1; } while (i < 3);"),
        "3"
    );
}

#[test]
fn test_for_loop() {
    assert_eq!(
        output_of("for (i = 0; i < 3; i = i + 1) { print(i); }"),
        "012"
    );
    assert_eq!(
        output_of("for (i = 3; i < 3; i = i + 1) { print(i); }"),
        ""
    );
}

#[test]
fn test_ranged_for() {
    assert_eq!(output_of("for (v : [0, 1, 2]) { print(v); }"), "012");
    assert_eq!(output_of("for (v : []) { print(v); }"), "");
    assert_eq!(output_of(r#"for (g : "abc") { print(g); }"#), "abc");
}

#[test]
fn test_break() {
    assert_eq!(
        output_of(
            "i = 0; while (i < 4) { i = i + 1; if (i == 3) { break; } print(i); }"
        ),
        "12"
    );
}

#[test]
fn test_continue() {
    assert_eq!(
        output_of(
            "i = 0; while (i < 3) { i = i + 1; if (i == 2) { continue; } print(i); }"
        ),
        "13"
    );
}

#[test]
fn test_break_outside_loop_ends_program() {
    assert_eq!(output_of(r#"print("a"); break; print("b");"#), "a");
}

#[test]
fn test_continue_in_function_skips_rest() {
    assert_eq!(
        output_of(
            r#"print("start "); function foo() { print("foo"); continue; print("bar"); } foo(); print(" end");"#
        ),
        "start foo end"
    );
}

#[test]
fn test_nested_loops_restore_labels() {
    assert_eq!(
        output_of(
            "for (i = 0; i < 2; i = i + 1) { for (j = 0; j < 3; j = j + 1) { if (j == 1) { break; } print(j); } print(i); }"
        ),
        "0001"
    );
}

#[test]
fn test_ternary() {
    assert_eq!(output_of("print(1 < 2 ? \"yes\" : \"no\");"), "yes");
    assert_eq!(output_of("print(2 < 1 ? \"yes\" : \"no\");"), "no");
}

// -- scope ------------------------------------------------------------------

#[test]
fn test_function_local_shadows_global() {
    assert_eq!(
        output_of(
            r#"print("start "); a = 1; function foo() { a = 2; print(a); } print(a); foo(); print(a); print(" end");"#
        ),
        "start 121 end"
    );
}

#[test]
fn test_global_statement_binds_outer() {
    assert_eq!(
        output_of(
            r#"print("start "); a = 1; function foo() { global a; print(a); a = 2; print(a); } print(a); foo(); print(a); print(" end");"#
        ),
        "start 1122 end"
    );
    assert_eq!(
        output_of(
            r#"print("start "); a = 1; function foo() { global a = 2; print(a); } print(a); foo(); print(a); print(" end");"#
        ),
        "start 122 end"
    );
}

// -- values and operators ---------------------------------------------------

#[test]
fn test_arithmetic_and_precedence() {
    assert_eq!(output_of("print(2 + 3 * 4);"), "14");
    assert_eq!(output_of("print((2 + 3) * 4);"), "20");
    assert_eq!(output_of("print(7 / 2);"), "3");
    assert_eq!(output_of("print(7 % 3);"), "1");
    assert_eq!(output_of("print(1 + 2.5);"), "3.5");
    assert_eq!(output_of("print(-3);"), "-3");
}

#[test]
fn test_division_by_zero_is_an_error_value() {
    // Printing an error renders nothing; the error propagates as a value.
    assert_eq!(output_of(r#"print(1 / 0); print("x");"#), "x");
    let context = run_bytecode("1 / 0;");
    assert!(context.result_is_error());
}

#[test]
fn test_string_concat_and_compare() {
    assert_eq!(output_of(r#"print("foo" + "bar");"#), "foobar");
    assert_eq!(output_of(r#"print("a" < "b");"#), "true");
    assert_eq!(output_of(r#"a = "x"; print(a + a);"#), "xx");
}

#[test]
fn test_string_length_and_index() {
    assert_eq!(output_of(r#"print("héllo".length);"#), "5");
    assert_eq!(output_of(r#"print("hello"[1]);"#), "e");
    assert_eq!(output_of(r#"print("hello"[-1]);"#), "o");
}

#[test]
fn test_casts() {
    assert_eq!(output_of("print(3.7 as int);"), "3");
    assert_eq!(output_of("print(3 as float);"), "3");
    assert_eq!(output_of("print(0 as bool);"), "false");
    assert_eq!(output_of("print((3 as string) + \"!\");"), "3!");
    assert_eq!(output_of(r#"x = "42"; print((x + "1") as int);"#), "421");
}

#[test]
fn test_short_circuit_yields_operand() {
    assert_eq!(output_of("print(true && 3);"), "3");
    assert_eq!(output_of("print(false && 3);"), "false");
    assert_eq!(output_of("print(false || 5);"), "5");
    assert_eq!(output_of("print(0 || \"fallback\");"), "fallback");
}

#[test]
fn test_short_circuit_skips_side_effects() {
    assert_eq!(output_of(r#"x = 0; false && (x = 1); print(x);"#), "0");
    assert_eq!(output_of(r#"x = 0; true || (x = 1); print(x);"#), "0");
}

#[test]
fn test_equality_across_kinds() {
    assert_eq!(output_of("print(1 == 1.0);"), "true");
    assert_eq!(output_of("print(1 == \"1\");"), "false");
    assert_eq!(output_of("print(null == null);"), "true");
    assert_eq!(output_of("print(1 != 2);"), "true");
}

// -- collections ------------------------------------------------------------

#[test]
fn test_array_assignment_has_value_semantics() {
    assert_eq!(
        output_of("x = [1, 2]; y = x; y[0] = 9; print(x[0]); print(y[0]);"),
        "19"
    );
}

#[test]
fn test_array_index_assignment() {
    assert_eq!(output_of("a = [1, 2, 3]; a[1] = 9; print(a[1]);"), "9");
    assert_eq!(output_of("a = [1, 2, 3]; a[-1] = 7; print(a[2]);"), "7");
}

#[test]
fn test_slices() {
    assert_eq!(output_of("a = [0,1,2,3,4]; print(a[1:3].size);"), "2");
    assert_eq!(output_of("a = [0,1,2,3,4]; print(a[1:3][0]);"), "1");
    assert_eq!(output_of("a = [0,1,2,3,4]; print(a[::2].size);"), "3");
    assert_eq!(output_of("a = [0,1,2,3,4]; print(a[::-1][0]);"), "4");
    assert_eq!(output_of(r#"print("hello"[1:4]);"#), "ell");
    assert_eq!(output_of(r#"print("hello"[::-1]);"#), "olleh");
}

#[test]
fn test_maps() {
    assert_eq!(
        output_of(r#"m = {"a": 1, "b": 2}; print(m["a"]); print(m.size);"#),
        "12"
    );
    assert_eq!(
        output_of(r#"m = {"a": 1}; m["c"] = 3; print(m["c"]); print(m.size);"#),
        "32"
    );
    // A missing key is an error value: printed as nothing.
    assert_eq!(output_of(r#"m = {"a": 1}; print(m["zz"]); print("!");"#), "!");
}

#[test]
fn test_array_concat() {
    assert_eq!(output_of("print(([1] + [2, 3]).size);"), "3");
}

// -- functions --------------------------------------------------------------

#[test]
fn test_function_argument_order() {
    assert_eq!(
        output_of("function sub(a, b) { return a - b; } print(sub(10, 4));"),
        "6"
    );
}

#[test]
fn test_function_implicit_return_is_null() {
    assert_eq!(
        output_of(r#"function f() { 1; } print(f()); print("x");"#),
        "nullx"
    );
}

#[test]
fn test_wrong_argument_count_is_an_error() {
    assert_eq!(
        output_of(r#"function f(a) { return a; } print(f(1, 2)); print("x");"#),
        "x"
    );
}

#[test]
fn test_calling_a_non_function_is_an_error() {
    assert_eq!(output_of(r#"x = 3; print(x(1)); print("!");"#), "!");
}

#[test]
fn test_nested_calls() {
    assert_eq!(
        output_of(
            "function double(n) { return n * 2; } function inc(n) { return n + 1; } print(double(inc(4)));"
        ),
        "10"
    );
}

#[test]
fn test_function_declared_after_call_site() {
    // Declarations hoist, so the call resolves.
    assert_eq!(
        output_of("function main() { return helper() + 1; } function helper() { return 41; } print(main());"),
        "42"
    );
}

// -- folding ----------------------------------------------------------------

#[test]
fn test_simplified_programs_preserve_meaning() {
    // The simplifier folds these completely; execution must not change.
    assert_eq!(output_of("print(1 + 2 * 3);"), "7");
    assert_eq!(output_of(r#"print("a" + "b");"#), "ab");
    assert_eq!(output_of("x = 4; print(x * x);"), "16");
    assert_eq!(output_of("print(!0);"), "true");
    assert_eq!(output_of("print(3.7 as int);"), "3");
    assert_eq!(output_of("print(true && 7);"), "7");
}

#[test]
fn test_result_is_last_statement_value() {
    let context = run_bytecode("1; 2; 40 + 2;");
    assert_eq!(context.result_display(), "42");
    assert!(!context.result_is_error());
}

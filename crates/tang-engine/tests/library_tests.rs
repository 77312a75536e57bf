//! Host library registration and native-function values.

use tang_core::value::{null_singleton, Value};
use tang_core::ExecutionContext;
use tang_engine::{Program, ProgramFlags};

fn make_int_3(context: *mut ExecutionContext) -> *mut Value {
    unsafe { &mut *context }.new_integer(3)
}

fn add_callback(
    _bound: *mut Value,
    args: &[*mut Value],
    context: *mut ExecutionContext,
) -> *mut Value {
    let a = unsafe { &*args[0] }.as_integer().unwrap_or(0);
    let b = unsafe { &*args[1] }.as_integer().unwrap_or(0);
    unsafe { &mut *context }.new_integer(a + b)
}

fn make_add(context: *mut ExecutionContext) -> *mut Value {
    unsafe { &mut *context }.new_native_function(add_callback, null_singleton())
}

fn bound_len_callback(
    bound: *mut Value,
    _args: &[*mut Value],
    context: *mut ExecutionContext,
) -> *mut Value {
    let length = unsafe { &*bound }
        .as_string()
        .map(|s| s.grapheme_length() as i64)
        .unwrap_or(0);
    unsafe { &mut *context }.new_integer(length)
}

fn make_bound_len(context: *mut ExecutionContext) -> *mut Value {
    let context = unsafe { &mut *context };
    let text = context.new_string_from("abc", tang_core::RenderType::Trusted);
    context.new_native_function(bound_len_callback, text)
}

fn run_with_libraries(source: &str, flags: ProgramFlags) -> String {
    let program = Program::with_flags(source, flags).unwrap();
    let mut context = program.create_context();
    context.library_add("three", make_int_3);
    context.library_add("add", make_add);
    context.library_add("strlen", make_bound_len);
    assert!(program.execute(&mut context));
    context.render_output()
}

#[test]
fn test_library_value_loads_on_first_reference() {
    assert_eq!(
        run_with_libraries(
            r#"use three; print("start "); print(three); print(" end");"#,
            ProgramFlags::DISABLE_NATIVE
        ),
        "start 3 end"
    );
}

#[test]
fn test_native_function_receives_arguments_in_order() {
    assert_eq!(
        run_with_libraries(
            r#"use add; print("start "); print(add(1, 2)); print(" end");"#,
            ProgramFlags::DISABLE_NATIVE
        ),
        "start 3 end"
    );
}

#[test]
fn test_native_function_with_bound_object() {
    assert_eq!(
        run_with_libraries(
            r#"use strlen; print(strlen());"#,
            ProgramFlags::DISABLE_NATIVE
        ),
        "3"
    );
}

#[cfg(all(unix, target_arch = "x86_64"))]
#[test]
fn test_native_path_calls_host_functions() {
    assert_eq!(
        run_with_libraries(r#"use add; print(add(20, 22));"#, ProgramFlags::empty()),
        "42"
    );
}

#[test]
fn test_unknown_library_loads_null() {
    assert_eq!(
        run_with_libraries(
            r#"use missing; print(missing); print("x");"#,
            ProgramFlags::DISABLE_NATIVE
        ),
        "nullx"
    );
}

#[test]
fn test_duplicate_use_is_rejected() {
    assert!(Program::with_flags("use a; use a;", ProgramFlags::DISABLE_NATIVE).is_err());
}

#[test]
fn test_builtin_random_library() {
    assert_eq!(
        run_with_libraries(
            "use random; b = random.next_bool(); print(b == true || b == false);",
            ProgramFlags::DISABLE_NATIVE
        ),
        "true"
    );
    // The global generator refuses reseeding; the error prints as nothing.
    assert_eq!(
        run_with_libraries(
            r#"use random; print(random.set_seed(42)); print("x");"#,
            ProgramFlags::DISABLE_NATIVE
        ),
        "x"
    );
}

#[test]
fn test_random_values_are_in_range() {
    let program = Program::with_flags(
        "use random; f = random.next_float(); (f >= 0.0) && (f < 1.0);",
        ProgramFlags::DISABLE_NATIVE,
    )
    .unwrap();
    let mut context = program.create_context();
    assert!(program.execute(&mut context));
    assert_eq!(context.result_display(), "true");
}

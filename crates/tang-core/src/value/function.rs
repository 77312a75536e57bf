//! Script-function and native-function kinds.
//!
//! A script function is a (body offset, arity) pair; actually entering it is
//! the interpreter's job, so calling one through the dispatch table is an
//! invalid-function-call error. A native function wraps a host callback and
//! an optional bound object.

use crate::context::ExecutionContext;
use crate::error::RuntimeError;

use super::{error_singleton, Value, ValueData, ValueVTable, DEFAULT_VTABLE};

fn function_to_display(value: &Value) -> String {
    match value.data {
        ValueData::Function { argument_count, .. } => {
            format!("function({} arguments)", argument_count)
        }
        _ => String::new(),
    }
}

fn function_deep_copy(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    match unsafe { &(*value).data } {
        ValueData::Function {
            argument_count,
            offset,
        } => unsafe { &mut *context }.new_function(*argument_count, *offset),
        _ => error_singleton(RuntimeError::NotImplemented),
    }
}

pub static FUNCTION_VTABLE: ValueVTable = ValueVTable {
    name: "function",
    to_display: function_to_display,
    deep_copy: function_deep_copy,
    ..DEFAULT_VTABLE
};

fn native_function_to_display(_value: &Value) -> String {
    "native function".to_string()
}

fn native_function_deep_copy(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    match unsafe { &(*value).data } {
        ValueData::NativeFunction { callback, bound } => {
            unsafe { &mut *context }.new_native_function(*callback, *bound)
        }
        _ => error_singleton(RuntimeError::NotImplemented),
    }
}

fn native_function_call(
    value: *mut Value,
    args: &[*mut Value],
    context: *mut ExecutionContext,
) -> *mut Value {
    match unsafe { &(*value).data } {
        ValueData::NativeFunction { callback, bound } => callback(*bound, args, context),
        _ => error_singleton(RuntimeError::InvalidFunctionCall),
    }
}

pub static NATIVE_FUNCTION_VTABLE: ValueVTable = ValueVTable {
    name: "native function",
    to_display: native_function_to_display,
    deep_copy: native_function_deep_copy,
    call: native_function_call,
    ..DEFAULT_VTABLE
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::value_call;
    use std::ptr;

    fn double_first(
        _bound: *mut Value,
        args: &[*mut Value],
        context: *mut ExecutionContext,
    ) -> *mut Value {
        if args.len() != 1 {
            return error_singleton(RuntimeError::ArgumentCountMismatch);
        }
        let Some(v) = (unsafe { &*args[0] }).as_integer() else {
            return error_singleton(RuntimeError::NotSupported);
        };
        unsafe { &mut *context }.new_integer(v * 2)
    }

    #[test]
    fn test_native_function_call() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let callee = context.new_native_function(double_first, ptr::null_mut());
        let arg = context.new_integer(21);
        let args = [arg];
        let result = value_call(callee, args.as_ptr(), 1, ctx);
        unsafe {
            assert_eq!((*result).as_integer(), Some(42));
        }
    }

    #[test]
    fn test_calling_a_non_function() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let not_callable = context.new_integer(1);
        let result = value_call(not_callable, ptr::null(), 0, ctx);
        assert!(crate::value::is_error_kind(
            result,
            RuntimeError::InvalidFunctionCall
        ));
    }
}

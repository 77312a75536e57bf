//! Null, boolean, integer, float and error kinds.

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::unicode::{RenderType, UnicodeString};

use super::{
    boolean_singleton, error_singleton, CastTarget, Number, Value, ValueData, ValueVTable,
    DEFAULT_VTABLE,
};

// ---------------------------------------------------------------------------
// Null
// ---------------------------------------------------------------------------

fn null_to_display(_value: &Value) -> String {
    "null".to_string()
}

fn null_cast(
    _value: *mut Value,
    target: CastTarget,
    context: *mut ExecutionContext,
) -> *mut Value {
    let context = unsafe { &mut *context };
    match target {
        CastTarget::Boolean => boolean_singleton(false),
        CastTarget::Integer => context.new_integer(0),
        CastTarget::Float => context.new_float(0.0),
        CastTarget::String => context.new_string(UnicodeString::new("null", RenderType::Trusted)),
    }
}

pub static NULL_VTABLE: ValueVTable = ValueVTable {
    name: "null",
    to_display: null_to_display,
    cast: null_cast,
    ..DEFAULT_VTABLE
};

// ---------------------------------------------------------------------------
// Boolean
// ---------------------------------------------------------------------------

fn boolean_to_display(value: &Value) -> String {
    match value.data {
        ValueData::Boolean(true) => "true".to_string(),
        _ => "false".to_string(),
    }
}

fn boolean_cast(
    value: *mut Value,
    target: CastTarget,
    context: *mut ExecutionContext,
) -> *mut Value {
    let context = unsafe { &mut *context };
    let truthy = unsafe { (*value).is_true };
    match target {
        CastTarget::Boolean => value,
        CastTarget::Integer => context.new_integer(truthy as i64),
        CastTarget::Float => context.new_float(if truthy { 1.0 } else { 0.0 }),
        CastTarget::String => context.new_string(UnicodeString::new(
            if truthy { "true" } else { "false" },
            RenderType::Trusted,
        )),
    }
}

pub static BOOLEAN_VTABLE: ValueVTable = ValueVTable {
    name: "boolean",
    to_display: boolean_to_display,
    cast: boolean_cast,
    ..DEFAULT_VTABLE
};

// ---------------------------------------------------------------------------
// Numeric helpers shared by integer and float
// ---------------------------------------------------------------------------

/// Resolve the operand pair in source order. `None` when the other operand
/// is not numeric, which lets the dispatch retry protocol run.
fn numeric_operands(
    this: *mut Value,
    other: *mut Value,
    self_is_lhs: bool,
) -> Option<(Number, Number)> {
    let this = unsafe { &*this }.as_number()?;
    let other = unsafe { &*other }.as_number()?;
    Some(if self_is_lhs { (this, other) } else { (other, this) })
}

macro_rules! numeric_binary {
    ($name:ident, $int_op:expr, $float_op:expr) => {
        fn $name(
            this: *mut Value,
            other: *mut Value,
            self_is_lhs: bool,
            context: *mut ExecutionContext,
        ) -> *mut Value {
            let Some((lhs, rhs)) = numeric_operands(this, other, self_is_lhs) else {
                return error_singleton(RuntimeError::NotImplemented);
            };
            let context = unsafe { &mut *context };
            match (lhs, rhs) {
                (Number::Integer(a), Number::Integer(b)) => $int_op(context, a, b),
                (a, b) => $float_op(context, a.as_f64(), b.as_f64()),
            }
        }
    };
}

macro_rules! numeric_compare {
    ($name:ident, $op:tt) => {
        fn $name(
            this: *mut Value,
            other: *mut Value,
            self_is_lhs: bool,
            _context: *mut ExecutionContext,
        ) -> *mut Value {
            let Some((lhs, rhs)) = numeric_operands(this, other, self_is_lhs) else {
                return error_singleton(RuntimeError::NotImplemented);
            };
            let result = match (lhs, rhs) {
                (Number::Integer(a), Number::Integer(b)) => a $op b,
                (a, b) => a.as_f64() $op b.as_f64(),
            };
            boolean_singleton(result)
        }
    };
}

numeric_binary!(
    numeric_add,
    |ctx: &mut ExecutionContext, a: i64, b: i64| ctx.new_integer(a.wrapping_add(b)),
    |ctx: &mut ExecutionContext, a: f64, b: f64| ctx.new_float(a + b)
);
numeric_binary!(
    numeric_subtract,
    |ctx: &mut ExecutionContext, a: i64, b: i64| ctx.new_integer(a.wrapping_sub(b)),
    |ctx: &mut ExecutionContext, a: f64, b: f64| ctx.new_float(a - b)
);
numeric_binary!(
    numeric_multiply,
    |ctx: &mut ExecutionContext, a: i64, b: i64| ctx.new_integer(a.wrapping_mul(b)),
    |ctx: &mut ExecutionContext, a: f64, b: f64| ctx.new_float(a * b)
);
numeric_binary!(
    numeric_divide,
    |ctx: &mut ExecutionContext, a: i64, b: i64| {
        if b == 0 {
            error_singleton(RuntimeError::DivideByZero)
        } else {
            ctx.new_integer(a.wrapping_div(b))
        }
    },
    |ctx: &mut ExecutionContext, a: f64, b: f64| {
        if b == 0.0 {
            error_singleton(RuntimeError::DivideByZero)
        } else {
            ctx.new_float(a / b)
        }
    }
);

/// Modulo is integer-only; a float operand falls through to not-supported.
fn numeric_modulo(
    this: *mut Value,
    other: *mut Value,
    self_is_lhs: bool,
    context: *mut ExecutionContext,
) -> *mut Value {
    let Some((lhs, rhs)) = numeric_operands(this, other, self_is_lhs) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let context = unsafe { &mut *context };
    match (lhs, rhs) {
        (Number::Integer(a), Number::Integer(b)) => {
            if b == 0 {
                error_singleton(RuntimeError::ModuloByZero)
            } else {
                context.new_integer(a.wrapping_rem(b))
            }
        }
        _ => error_singleton(RuntimeError::NotImplemented),
    }
}

numeric_compare!(numeric_less_than, <);
numeric_compare!(numeric_less_than_equal, <=);
numeric_compare!(numeric_greater_than, >);
numeric_compare!(numeric_greater_than_equal, >=);

// ---------------------------------------------------------------------------
// Integer
// ---------------------------------------------------------------------------

fn integer_to_display(value: &Value) -> String {
    match value.data {
        ValueData::Integer(v) => v.to_string(),
        _ => String::new(),
    }
}

fn integer_negative(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    let context = unsafe { &mut *context };
    match unsafe { &*value }.data {
        ValueData::Integer(v) => context.new_integer(v.wrapping_neg()),
        _ => error_singleton(RuntimeError::NotImplemented),
    }
}

fn integer_cast(
    value: *mut Value,
    target: CastTarget,
    context: *mut ExecutionContext,
) -> *mut Value {
    let context = unsafe { &mut *context };
    let v = match unsafe { &*value }.data {
        ValueData::Integer(v) => v,
        _ => return error_singleton(RuntimeError::NotImplemented),
    };
    match target {
        CastTarget::Boolean => boolean_singleton(v != 0),
        CastTarget::Integer => value,
        CastTarget::Float => context.new_float(v as f64),
        CastTarget::String => {
            context.new_string(UnicodeString::new(v.to_string(), RenderType::Trusted))
        }
    }
}

pub static INTEGER_VTABLE: ValueVTable = ValueVTable {
    name: "integer",
    to_display: integer_to_display,
    add: numeric_add,
    subtract: numeric_subtract,
    multiply: numeric_multiply,
    divide: numeric_divide,
    modulo: numeric_modulo,
    negative: integer_negative,
    less_than: numeric_less_than,
    less_than_equal: numeric_less_than_equal,
    greater_than: numeric_greater_than,
    greater_than_equal: numeric_greater_than_equal,
    cast: integer_cast,
    ..DEFAULT_VTABLE
};

// ---------------------------------------------------------------------------
// Float
// ---------------------------------------------------------------------------

fn float_to_display(value: &Value) -> String {
    match value.data {
        ValueData::Float(v) => v.to_string(),
        _ => String::new(),
    }
}

fn float_negative(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    let context = unsafe { &mut *context };
    match unsafe { &*value }.data {
        ValueData::Float(v) => context.new_float(-v),
        _ => error_singleton(RuntimeError::NotImplemented),
    }
}

fn float_cast(
    value: *mut Value,
    target: CastTarget,
    context: *mut ExecutionContext,
) -> *mut Value {
    let context = unsafe { &mut *context };
    let v = match unsafe { &*value }.data {
        ValueData::Float(v) => v,
        _ => return error_singleton(RuntimeError::NotImplemented),
    };
    match target {
        CastTarget::Boolean => boolean_singleton(v != 0.0 && !v.is_nan()),
        CastTarget::Integer => context.new_integer(v as i64),
        CastTarget::Float => value,
        CastTarget::String => {
            context.new_string(UnicodeString::new(v.to_string(), RenderType::Trusted))
        }
    }
}

pub static FLOAT_VTABLE: ValueVTable = ValueVTable {
    name: "float",
    to_display: float_to_display,
    add: numeric_add,
    subtract: numeric_subtract,
    multiply: numeric_multiply,
    divide: numeric_divide,
    negative: float_negative,
    less_than: numeric_less_than,
    less_than_equal: numeric_less_than_equal,
    greater_than: numeric_greater_than,
    greater_than_equal: numeric_greater_than_equal,
    cast: float_cast,
    ..DEFAULT_VTABLE
};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

fn error_to_display(value: &Value) -> String {
    match value.data {
        ValueData::Error(kind) => format!("error: {}", kind),
        _ => String::new(),
    }
}

/// Errors render nothing; printing one is not itself an error.
fn error_print(_value: *mut Value, _context: *mut ExecutionContext) -> Option<UnicodeString> {
    None
}

fn error_deep_copy(value: *mut Value, _context: *mut ExecutionContext) -> *mut Value {
    // Error values only exist as singletons.
    value
}

pub static ERROR_VTABLE: ValueVTable = ValueVTable {
    name: "error",
    to_display: error_to_display,
    print: error_print,
    deep_copy: error_deep_copy,
    ..DEFAULT_VTABLE
};

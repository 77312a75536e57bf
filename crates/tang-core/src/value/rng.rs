//! The random-number-generator kind, backing the built-in `random` library.
//!
//! One process-wide generator exists behind a lock; it may be entered from
//! any thread. Its seed cannot be changed.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;

use super::{boolean_singleton, error_singleton, string_hash, Value, ValueVTable, DEFAULT_VTABLE};

static GLOBAL_RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

struct RngAttributes {
    next_bool: u64,
    next_int: u64,
    next_float: u64,
    set_seed: u64,
}

static ATTRIBUTES: Lazy<RngAttributes> = Lazy::new(|| RngAttributes {
    next_bool: string_hash("next_bool"),
    next_int: string_hash("next_int"),
    next_float: string_hash("next_float"),
    set_seed: string_hash("set_seed"),
});

fn rng_to_display(_value: &Value) -> String {
    "random number generator".to_string()
}

fn next_bool_callback(
    _bound: *mut Value,
    _args: &[*mut Value],
    _context: *mut ExecutionContext,
) -> *mut Value {
    boolean_singleton(GLOBAL_RNG.lock().gen::<bool>())
}

fn next_int_callback(
    _bound: *mut Value,
    _args: &[*mut Value],
    context: *mut ExecutionContext,
) -> *mut Value {
    let value = GLOBAL_RNG.lock().gen::<i64>();
    unsafe { &mut *context }.new_integer(value)
}

fn next_float_callback(
    _bound: *mut Value,
    _args: &[*mut Value],
    context: *mut ExecutionContext,
) -> *mut Value {
    let value = GLOBAL_RNG.lock().gen::<f64>();
    unsafe { &mut *context }.new_float(value)
}

fn set_seed_callback(
    _bound: *mut Value,
    _args: &[*mut Value],
    _context: *mut ExecutionContext,
) -> *mut Value {
    error_singleton(RuntimeError::GlobalRngSeedNotChangeable)
}

fn rng_period(value: *mut Value, hash: u64, context: *mut ExecutionContext) -> *mut Value {
    let context = unsafe { &mut *context };
    let attributes = &*ATTRIBUTES;
    if hash == attributes.next_bool {
        context.new_native_function(next_bool_callback, value)
    } else if hash == attributes.next_int {
        context.new_native_function(next_int_callback, value)
    } else if hash == attributes.next_float {
        context.new_native_function(next_float_callback, value)
    } else if hash == attributes.set_seed {
        context.new_native_function(set_seed_callback, value)
    } else {
        error_singleton(RuntimeError::NotSupported)
    }
}

pub static RNG_VTABLE: ValueVTable = ValueVTable {
    name: "rng",
    to_display: rng_to_display,
    period: rng_period,
    ..DEFAULT_VTABLE
};

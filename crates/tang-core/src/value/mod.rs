//! The runtime value model.
//!
//! Every runtime value is a heap-allocated [`Value`] owned by an execution
//! context's garbage-collection list (or a process-wide singleton). The
//! header is `#[repr(C)]` because JIT-emitted native code reads the flag
//! bytes at fixed offsets and calls the `extern "C"` dispatch helpers in
//! this module.
//!
//! Operator dispatch goes through an explicit table of function pointers
//! ([`ValueVTable`]), one static instance per kind. A binary helper first
//! asks the left operand's table; if that reports not-implemented it retries
//! with the right operand (`self_is_lhs = false`); if both decline, the
//! result is the not-supported error singleton.

mod collection;
mod function;
mod rng;
mod scalar;
mod string;

use std::hash::Hasher;

use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHasher};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::unicode::UnicodeString;

pub use collection::{ARRAY_VTABLE, ITERATOR_VTABLE, MAP_VTABLE, MapData, MapEntry};
pub use function::{FUNCTION_VTABLE, NATIVE_FUNCTION_VTABLE};
pub use rng::RNG_VTABLE;
pub use scalar::{BOOLEAN_VTABLE, FLOAT_VTABLE, INTEGER_VTABLE, NULL_VTABLE};
pub use string::STRING_VTABLE;

/// Stable identifier hash used for scope tables, attribute lookup and the
/// simplifier's bindings map.
pub fn string_hash(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(text.as_bytes());
    hasher.finish()
}

/// Host callback backing a native-function value.
pub type NativeFunctionCallback =
    fn(bound: *mut Value, args: &[*mut Value], context: *mut ExecutionContext) -> *mut Value;

/// Host callback producing a library value on first reference.
pub type LibraryLoader = fn(context: *mut ExecutionContext) -> *mut Value;

/// Target of a cast operation. The discriminants are bytecode immediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum CastTarget {
    Boolean = 0,
    Integer = 1,
    Float = 2,
    String = 3,
}

impl CastTarget {
    pub fn from_u64(raw: u64) -> Option<CastTarget> {
        match raw {
            0 => Some(CastTarget::Boolean),
            1 => Some(CastTarget::Integer),
            2 => Some(CastTarget::Float),
            3 => Some(CastTarget::String),
            _ => None,
        }
    }
}

/// Binary operator: `self`, `other`, whether `self` was the left operand.
pub type BinaryFn =
    fn(*mut Value, *mut Value, bool, *mut ExecutionContext) -> *mut Value;
/// Unary operator.
pub type UnaryFn = fn(*mut Value, *mut ExecutionContext) -> *mut Value;

/// Per-kind operator table.
///
/// Kept as a plain struct of function pointers (rather than a trait object)
/// so the table's identity doubles as the runtime type tag and the layout
/// stays friendly to code that treats values as raw pointers.
pub struct ValueVTable {
    pub name: &'static str,
    pub deep_copy: fn(*mut Value, *mut ExecutionContext) -> *mut Value,
    pub to_display: fn(&Value) -> String,
    pub print: fn(*mut Value, *mut ExecutionContext) -> Option<UnicodeString>,
    pub assign_index: fn(*mut Value, *mut Value, *mut Value, *mut ExecutionContext) -> *mut Value,
    pub add: BinaryFn,
    pub subtract: BinaryFn,
    pub multiply: BinaryFn,
    pub divide: BinaryFn,
    pub modulo: BinaryFn,
    pub negative: UnaryFn,
    pub logical_not: UnaryFn,
    pub less_than: BinaryFn,
    pub less_than_equal: BinaryFn,
    pub greater_than: BinaryFn,
    pub greater_than_equal: BinaryFn,
    pub equal: BinaryFn,
    pub not_equal: BinaryFn,
    pub period: fn(*mut Value, u64, *mut ExecutionContext) -> *mut Value,
    pub index: fn(*mut Value, *mut Value, *mut ExecutionContext) -> *mut Value,
    pub slice:
        fn(*mut Value, *mut Value, *mut Value, *mut Value, *mut ExecutionContext) -> *mut Value,
    pub iterator_get: UnaryFn,
    pub iterator_next: UnaryFn,
    pub cast: fn(*mut Value, CastTarget, *mut ExecutionContext) -> *mut Value,
    pub call: fn(*mut Value, &[*mut Value], *mut ExecutionContext) -> *mut Value,
}

/// A runtime value.
///
/// The field order up to `is_a_reference` is load-bearing: native code
/// reads the flag bytes via `mem::offset_of!`-derived displacements.
#[repr(C)]
pub struct Value {
    /// Operator table; also the runtime type tag.
    pub vtable: &'static ValueVTable,
    /// Owning execution context; null for singletons.
    pub context: *mut ExecutionContext,
    /// Truthiness shortcut, kept in sync with the payload.
    pub is_true: bool,
    pub is_error: bool,
    /// Owned by the context's GC list and eligible for adoption.
    pub is_temporary: bool,
    /// Process-wide constant; never destroyed, never mutated.
    pub is_singleton: bool,
    /// Shares storage with another value. Nothing sets this today; the
    /// field stays for layout fidelity with the dispatch ABI.
    pub is_a_reference: bool,
    /// Per-instance attribute overrides, keyed by name hash.
    pub attributes: Option<Box<FxHashMap<u64, *mut Value>>>,
    pub data: ValueData,
}

/// Variant payloads.
pub enum ValueData {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(UnicodeString),
    Array(Vec<*mut Value>),
    Map(MapData),
    /// A script function: bytecode offset of the body plus arity.
    Function { argument_count: u64, offset: usize },
    NativeFunction {
        callback: NativeFunctionCallback,
        bound: *mut Value,
    },
    Iterator { collection: *mut Value, position: usize },
    Error(RuntimeError),
    /// The process-wide random number generator.
    Rng,
}

impl Value {
    /// Kind name, taken from the vtable.
    pub fn kind_name(&self) -> &'static str {
        self.vtable.name
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.data {
            ValueData::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.data {
            ValueData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self.data {
            ValueData::Boolean(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&UnicodeString> {
        match &self.data {
            ValueData::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<RuntimeError> {
        match self.data {
            ValueData::Error(kind) => Some(kind),
            _ => None,
        }
    }

    /// Install a per-instance attribute override.
    pub fn set_attribute(&mut self, name: &str, value: *mut Value) {
        self.attributes
            .get_or_insert_with(Default::default)
            .insert(string_hash(name), value);
    }

    /// Numeric view used by the arithmetic and comparison operators.
    fn as_number(&self) -> Option<Number> {
        match self.data {
            ValueData::Integer(v) => Some(Number::Integer(v)),
            ValueData::Float(v) => Some(Number::Float(v)),
            _ => None,
        }
    }
}

/// Integer-or-float pair used when promoting mixed arithmetic.
#[derive(Clone, Copy)]
pub(crate) enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Number::Integer(v) => v as f64,
            Number::Float(v) => v,
        }
    }
}

// ---------------------------------------------------------------------------
// Default vtable entries
// ---------------------------------------------------------------------------

fn default_deep_copy(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    // Covers the scalar kinds; collections override.
    let context = unsafe { &mut *context };
    unsafe {
        match &(*value).data {
            ValueData::Null => null_singleton(),
            ValueData::Boolean(b) => boolean_singleton(*b),
            ValueData::Integer(v) => context.new_integer(*v),
            ValueData::Float(v) => context.new_float(*v),
            ValueData::Error(kind) => error_singleton(*kind),
            _ => error_singleton(RuntimeError::NotImplemented),
        }
    }
}

fn default_to_display(_value: &Value) -> String {
    String::new()
}

fn default_print(value: *mut Value, _context: *mut ExecutionContext) -> Option<UnicodeString> {
    let value = unsafe { &*value };
    Some(UnicodeString::new(
        (value.vtable.to_display)(value),
        crate::unicode::RenderType::Trusted,
    ))
}

fn not_implemented_binary(
    _self: *mut Value,
    _other: *mut Value,
    _self_is_lhs: bool,
    _context: *mut ExecutionContext,
) -> *mut Value {
    error_singleton(RuntimeError::NotImplemented)
}

fn not_implemented_unary(_self: *mut Value, _context: *mut ExecutionContext) -> *mut Value {
    error_singleton(RuntimeError::NotImplemented)
}

fn default_logical_not(value: *mut Value, _context: *mut ExecutionContext) -> *mut Value {
    // Logical not only consults the truthiness flag, so every kind shares it.
    boolean_singleton(!unsafe { (*value).is_true })
}

fn default_equal(
    this: *mut Value,
    other: *mut Value,
    _self_is_lhs: bool,
    _context: *mut ExecutionContext,
) -> *mut Value {
    boolean_singleton(values_equal(this, other))
}

fn default_not_equal(
    this: *mut Value,
    other: *mut Value,
    _self_is_lhs: bool,
    _context: *mut ExecutionContext,
) -> *mut Value {
    boolean_singleton(!values_equal(this, other))
}

fn default_period(
    _self: *mut Value,
    _hash: u64,
    _context: *mut ExecutionContext,
) -> *mut Value {
    error_singleton(RuntimeError::NotSupported)
}

fn default_index(
    _self: *mut Value,
    _index: *mut Value,
    _context: *mut ExecutionContext,
) -> *mut Value {
    error_singleton(RuntimeError::NotSupported)
}

fn default_slice(
    _self: *mut Value,
    _start: *mut Value,
    _end: *mut Value,
    _step: *mut Value,
    _context: *mut ExecutionContext,
) -> *mut Value {
    error_singleton(RuntimeError::NotSupported)
}

fn default_assign_index(
    _self: *mut Value,
    _index: *mut Value,
    _other: *mut Value,
    _context: *mut ExecutionContext,
) -> *mut Value {
    error_singleton(RuntimeError::NotSupported)
}

fn default_cast(
    _self: *mut Value,
    _target: CastTarget,
    _context: *mut ExecutionContext,
) -> *mut Value {
    error_singleton(RuntimeError::NotSupported)
}

fn default_call(
    _self: *mut Value,
    _args: &[*mut Value],
    _context: *mut ExecutionContext,
) -> *mut Value {
    error_singleton(RuntimeError::InvalidFunctionCall)
}

/// Baseline table; concrete kinds override the operations they support.
pub const DEFAULT_VTABLE: ValueVTable = ValueVTable {
    name: "value",
    deep_copy: default_deep_copy,
    to_display: default_to_display,
    print: default_print,
    assign_index: default_assign_index,
    add: not_implemented_binary,
    subtract: not_implemented_binary,
    multiply: not_implemented_binary,
    divide: not_implemented_binary,
    modulo: not_implemented_binary,
    negative: not_implemented_unary,
    logical_not: default_logical_not,
    less_than: not_implemented_binary,
    less_than_equal: not_implemented_binary,
    greater_than: not_implemented_binary,
    greater_than_equal: not_implemented_binary,
    equal: default_equal,
    not_equal: default_not_equal,
    period: default_period,
    index: default_index,
    slice: default_slice,
    iterator_get: not_implemented_unary,
    iterator_next: not_implemented_unary,
    cast: default_cast,
    call: default_call,
};

/// Structural equality across kinds: numerics compare numerically, strings
/// bytewise, booleans and null by identity of kind; mismatches are unequal.
pub(crate) fn values_equal(lhs: *mut Value, rhs: *mut Value) -> bool {
    let (lhs, rhs) = unsafe { (&*lhs, &*rhs) };
    match (&lhs.data, &rhs.data) {
        (ValueData::Null, ValueData::Null) => true,
        (ValueData::Boolean(a), ValueData::Boolean(b)) => a == b,
        (ValueData::String(a), ValueData::String(b)) => a.as_str() == b.as_str(),
        (ValueData::Error(a), ValueData::Error(b)) => a == b,
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(Number::Integer(a)), Some(Number::Integer(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => false,
        },
    }
}

// ---------------------------------------------------------------------------
// Singletons
// ---------------------------------------------------------------------------

struct StaticValue(Value);

// Singleton values are immutable after construction and every mutation path
// checks `is_singleton` first.
unsafe impl Sync for StaticValue {}
unsafe impl Send for StaticValue {}

fn make_singleton(
    vtable: &'static ValueVTable,
    is_true: bool,
    is_error: bool,
    data: ValueData,
) -> StaticValue {
    StaticValue(Value {
        vtable,
        context: std::ptr::null_mut(),
        is_true,
        is_error,
        is_temporary: false,
        is_singleton: true,
        is_a_reference: false,
        attributes: None,
        data,
    })
}

static NULL_SINGLETON: Lazy<StaticValue> =
    Lazy::new(|| make_singleton(&NULL_VTABLE, false, false, ValueData::Null));

static TRUE_SINGLETON: Lazy<StaticValue> =
    Lazy::new(|| make_singleton(&BOOLEAN_VTABLE, true, false, ValueData::Boolean(true)));

static FALSE_SINGLETON: Lazy<StaticValue> =
    Lazy::new(|| make_singleton(&BOOLEAN_VTABLE, false, false, ValueData::Boolean(false)));

static ERROR_SINGLETONS: Lazy<Vec<StaticValue>> = Lazy::new(|| {
    RuntimeError::ALL
        .iter()
        .map(|kind| make_singleton(&scalar::ERROR_VTABLE, false, true, ValueData::Error(*kind)))
        .collect()
});

/// The shared null value.
pub fn null_singleton() -> *mut Value {
    (&NULL_SINGLETON.0 as *const Value).cast_mut()
}

/// The shared true/false values.
pub fn boolean_singleton(value: bool) -> *mut Value {
    let cell = if value { &TRUE_SINGLETON } else { &FALSE_SINGLETON };
    (&cell.0 as *const Value).cast_mut()
}

/// The shared error value for `kind`.
pub fn error_singleton(kind: RuntimeError) -> *mut Value {
    (&ERROR_SINGLETONS[kind as usize].0 as *const Value).cast_mut()
}

/// Whether `value` is the error singleton of the given kind.
pub fn is_error_kind(value: *mut Value, kind: RuntimeError) -> bool {
    unsafe { matches!((*value).data, ValueData::Error(k) if k == kind) }
}

// ---------------------------------------------------------------------------
// Uniform dispatch helpers
//
// These are the only entry points the interpreter and JIT-emitted code use;
// they implement the lhs-then-rhs retry protocol. `extern "C"` so native
// code can call them by absolute address.
// ---------------------------------------------------------------------------

macro_rules! binary_dispatch {
    ($name:ident, $op:ident) => {
        pub extern "C" fn $name(
            lhs: *mut Value,
            rhs: *mut Value,
            context: *mut ExecutionContext,
        ) -> *mut Value {
            let result = unsafe { ((*lhs).vtable.$op)(lhs, rhs, true, context) };
            if !is_error_kind(result, RuntimeError::NotImplemented) {
                return result;
            }
            let result = unsafe { ((*rhs).vtable.$op)(rhs, lhs, false, context) };
            if !is_error_kind(result, RuntimeError::NotImplemented) {
                return result;
            }
            error_singleton(RuntimeError::NotSupported)
        }
    };
}

binary_dispatch!(value_add, add);
binary_dispatch!(value_subtract, subtract);
binary_dispatch!(value_multiply, multiply);
binary_dispatch!(value_divide, divide);
binary_dispatch!(value_modulo, modulo);
binary_dispatch!(value_less_than, less_than);
binary_dispatch!(value_less_than_equal, less_than_equal);
binary_dispatch!(value_greater_than, greater_than);
binary_dispatch!(value_greater_than_equal, greater_than_equal);
binary_dispatch!(value_equal, equal);
binary_dispatch!(value_not_equal, not_equal);

pub extern "C" fn value_negative(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    let result = unsafe { ((*value).vtable.negative)(value, context) };
    if is_error_kind(result, RuntimeError::NotImplemented) {
        return error_singleton(RuntimeError::NotSupported);
    }
    result
}

pub extern "C" fn value_logical_not(
    value: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe { ((*value).vtable.logical_not)(value, context) }
}

pub extern "C" fn value_index(
    collection: *mut Value,
    index: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe { ((*collection).vtable.index)(collection, index, context) }
}

pub extern "C" fn value_slice(
    collection: *mut Value,
    start: *mut Value,
    end: *mut Value,
    step: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe { ((*collection).vtable.slice)(collection, start, end, step, context) }
}

pub extern "C" fn value_assign_index(
    collection: *mut Value,
    index: *mut Value,
    other: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe { ((*collection).vtable.assign_index)(collection, index, other, context) }
}

/// Attribute lookup: per-instance overrides first, then the kind's table.
pub extern "C" fn value_period(
    value: *mut Value,
    hash: u64,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe {
        if let Some(attributes) = &(*value).attributes {
            if let Some(&attribute) = attributes.get(&hash) {
                return attribute;
            }
        }
        ((*value).vtable.period)(value, hash, context)
    }
}

pub extern "C" fn value_iterator_get(
    collection: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    let result = unsafe { ((*collection).vtable.iterator_get)(collection, context) };
    if is_error_kind(result, RuntimeError::NotImplemented) {
        return error_singleton(RuntimeError::NotSupported);
    }
    result
}

pub extern "C" fn value_iterator_next(
    iterator: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    let result = unsafe { ((*iterator).vtable.iterator_next)(iterator, context) };
    if is_error_kind(result, RuntimeError::NotImplemented) {
        return error_singleton(RuntimeError::NotSupported);
    }
    result
}

pub extern "C" fn value_cast(
    value: *mut Value,
    target: u64,
    context: *mut ExecutionContext,
) -> *mut Value {
    let Some(target) = CastTarget::from_u64(target) else {
        return error_singleton(RuntimeError::InvalidBytecode);
    };
    unsafe { ((*value).vtable.cast)(value, target, context) }
}

pub extern "C" fn value_call(
    value: *mut Value,
    args: *const *mut Value,
    argc: u64,
    context: *mut ExecutionContext,
) -> *mut Value {
    let args: &[*mut Value] = if argc == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(args, argc as usize) }
    };
    unsafe { ((*value).vtable.call)(value, args, context) }
}

/// Deep-copy: always a fresh GC-registered temporary.
pub extern "C" fn value_deep_copy(
    value: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe { ((*value).vtable.deep_copy)(value, context) }
}

/// Prepare a value for storage in a named location: temporaries and
/// singletons are adopted in place (clearing the temporary flag); anything
/// else is deep-copied first so the slot owns an independent value.
pub extern "C" fn value_adopt(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    unsafe {
        if (*value).is_singleton {
            return value;
        }
        if (*value).is_temporary {
            (*value).is_temporary = false;
            return value;
        }
        let copy = value_deep_copy(value, context);
        if !(*copy).is_singleton {
            (*copy).is_temporary = false;
        }
        copy
    }
}

/// Clear the temporary flag (no-op on singletons).
pub extern "C" fn value_set_not_temporary(value: *mut Value) {
    unsafe {
        if !(*value).is_singleton {
            (*value).is_temporary = false;
        }
    }
}

/// Render `value` and append it to the context output. Error values render
/// nothing but are not themselves an error. Returns the null singleton.
pub extern "C" fn value_print(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    unsafe {
        if (*value).is_error {
            return null_singleton();
        }
        if let Some(text) = ((*value).vtable.print)(value, context) {
            let context = &mut *context;
            context.output = context.output.concat(&text);
        }
    }
    null_singleton()
}

/// Human-readable rendering used by casts to string and debug output.
pub fn value_display(value: *mut Value) -> String {
    let value = unsafe { &*value };
    (value.vtable.to_display)(value)
}

// ---------------------------------------------------------------------------
// Allocation entry points for native code
//
// The native generator cannot construct values itself; it calls these to
// materialize literals and composites, checking the returned pointer
// against zero before using it.
// ---------------------------------------------------------------------------

pub extern "C" fn value_new_integer(value: i64, context: *mut ExecutionContext) -> *mut Value {
    unsafe { &mut *context }.new_integer(value)
}

/// Float immediates travel as raw bits so the call stays in integer
/// registers.
pub extern "C" fn value_new_float_bits(bits: u64, context: *mut ExecutionContext) -> *mut Value {
    unsafe { &mut *context }.new_float(f64::from_bits(bits))
}

/// `text` points into the program's constant pool, which outlives every
/// execution.
pub extern "C" fn value_new_string_pooled(
    text: *const UnicodeString,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe { &mut *context }.new_string(unsafe { &*text }.clone())
}

pub extern "C" fn value_new_array_with_capacity(
    capacity: u64,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe { &mut *context }.new_array(Vec::with_capacity(capacity as usize))
}

/// Adopt `element` and append it. Errors propagate in place of the array.
pub extern "C" fn value_array_append(
    array: *mut Value,
    element: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe {
        if (*array).is_error {
            return array;
        }
        let element = value_adopt(element, context);
        match &mut (*array).data {
            ValueData::Array(elements) => elements.push(element),
            _ => return error_singleton(RuntimeError::NotSupported),
        }
        (*array).is_true = true;
        array
    }
}

pub extern "C" fn value_new_map(context: *mut ExecutionContext) -> *mut Value {
    unsafe { &mut *context }.new_map(MapData::new())
}

/// Adopt `key` and `value` and insert. A non-string key replaces the map
/// with the map-key error; later inserts then propagate it.
pub extern "C" fn value_map_insert(
    map: *mut Value,
    key: *mut Value,
    value: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe {
        if (*map).is_error {
            return map;
        }
        let Some(text) = (*key).as_string() else {
            return error_singleton(RuntimeError::MapKeyNotString);
        };
        let hash = string_hash(text.as_str());
        let key = value_adopt(key, context);
        let value = value_adopt(value, context);
        match &mut (*map).data {
            ValueData::Map(data) => data.set(hash, key, value),
            _ => return error_singleton(RuntimeError::NotSupported),
        }
        (*map).is_true = true;
        map
    }
}

/// Run a host library loader by name hash.
pub extern "C" fn value_library_load(
    name_hash: u64,
    context: *mut ExecutionContext,
) -> *mut Value {
    unsafe { &mut *context }.library_load(name_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;

    #[test]
    fn test_singletons_are_flagged() {
        unsafe {
            assert!((*null_singleton()).is_singleton);
            assert!(!(*null_singleton()).is_true);
            assert!((*boolean_singleton(true)).is_true);
            assert!(!(*boolean_singleton(false)).is_true);
            let err = error_singleton(RuntimeError::DivideByZero);
            assert!((*err).is_error);
            assert!(!(*err).is_true);
            assert!((*err).is_singleton);
        }
    }

    #[test]
    fn test_singleton_identity() {
        assert_eq!(null_singleton(), null_singleton());
        assert_eq!(boolean_singleton(true), boolean_singleton(true));
        assert_ne!(boolean_singleton(true), boolean_singleton(false));
        assert_eq!(
            error_singleton(RuntimeError::IteratorEnd),
            error_singleton(RuntimeError::IteratorEnd)
        );
    }

    #[test]
    fn test_dispatch_retry_protocol() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let lhs = context.new_integer(2);
        let rhs = context.new_float(0.5);
        // Integer + Float promotes through the retry-capable dispatch.
        let sum = value_add(lhs, rhs, ctx);
        unsafe {
            assert_eq!((*sum).as_float(), Some(2.5));
        }
    }

    #[test]
    fn test_unsupported_operation() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let lhs = context.new_boolean(true);
        let rhs = context.new_integer(1);
        let result = value_subtract(lhs, rhs, ctx);
        assert!(is_error_kind(result, RuntimeError::NotSupported));
    }

    #[test]
    fn test_adopt_clears_temporary() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let value = context.new_integer(7);
        unsafe {
            assert!((*value).is_temporary);
            let adopted = value_adopt(value, ctx);
            assert_eq!(adopted, value);
            assert!(!(*value).is_temporary);

            // A second adoption of the now-permanent value deep-copies.
            let copy = value_adopt(value, ctx);
            assert_ne!(copy, value);
            assert_eq!((*copy).as_integer(), Some(7));
            assert!(!(*copy).is_temporary);
        }
    }

    #[test]
    fn test_adopt_singleton_untouched() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let adopted = value_adopt(null_singleton(), ctx);
        assert_eq!(adopted, null_singleton());
        unsafe {
            assert!(!(*null_singleton()).is_temporary);
        }
    }
}

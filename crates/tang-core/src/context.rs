//! Per-execution state.
//!
//! A context owns the rendered output, the final result slot, the operand
//! stack with its frame pointer, the pc/fp stacks used by the bytecode
//! interpreter, and the garbage-collection list. Allocation is arena-style:
//! every non-singleton value is registered on the GC list at creation and
//! the whole list is destroyed with the context. There is no reference
//! counting and no scanning.
//!
//! The layout is `#[repr(C)]` because JIT-emitted code holds the context
//! pointer in a pinned register and addresses the result slot directly.

use rustc_hash::FxHashMap;

use crate::error::RuntimeError;
use crate::unicode::{RenderType, UnicodeString};
use crate::value::{
    error_singleton, null_singleton, string_hash, LibraryLoader, MapData, NativeFunctionCallback,
    Value, ValueData, ValueVTable, ARRAY_VTABLE, FLOAT_VTABLE, FUNCTION_VTABLE, INTEGER_VTABLE,
    ITERATOR_VTABLE, MAP_VTABLE, NATIVE_FUNCTION_VTABLE, RNG_VTABLE, STRING_VTABLE,
};

/// Per-run execution state. Confine one context to one thread.
#[repr(C)]
pub struct ExecutionContext {
    /// Final result of the run; may be an error singleton.
    pub result: *mut Value,
    /// Base of the current call's local area on the operand stack.
    pub fp: usize,
    /// Operand stack of borrowed value pointers.
    pub stack: Vec<*mut Value>,
    /// Return addresses, used only while interpreting bytecode.
    pub pc_stack: Vec<usize>,
    /// Saved frame pointers, parallel to `pc_stack`.
    pub fp_stack: Vec<usize>,
    /// Accumulated output with render tags.
    pub output: UnicodeString,
    /// Every temporary value allocated during the run.
    gc: Vec<*mut Value>,
    /// Host libraries, keyed by name hash.
    libraries: FxHashMap<u64, LibraryLoader>,
}

fn random_library(context: *mut ExecutionContext) -> *mut Value {
    unsafe { &mut *context }.new_rng()
}

impl ExecutionContext {
    pub fn new() -> Self {
        let mut context = ExecutionContext {
            result: null_singleton(),
            fp: 0,
            stack: Vec::with_capacity(32),
            pc_stack: Vec::new(),
            fp_stack: Vec::new(),
            output: UnicodeString::empty(),
            gc: Vec::with_capacity(64),
            libraries: FxHashMap::default(),
        };
        context.library_add("random", random_library);
        context
    }

    /// Register a host library. The loader runs on first reference during
    /// program startup; its value is stored in the global frame.
    pub fn library_add(&mut self, name: &str, loader: LibraryLoader) {
        self.libraries.insert(string_hash(name), loader);
    }

    /// Look up and run a library loader. A missing library yields null.
    pub fn library_load(&mut self, name_hash: u64) -> *mut Value {
        let Some(&loader) = self.libraries.get(&name_hash) else {
            return null_singleton();
        };
        loader(self as *mut ExecutionContext)
    }

    /// Allocate a value, register it with the GC list, and hand back the
    /// pointer. The value starts out temporary.
    pub fn alloc(
        &mut self,
        vtable: &'static ValueVTable,
        is_true: bool,
        data: ValueData,
    ) -> *mut Value {
        let value = Box::into_raw(Box::new(Value {
            vtable,
            context: self as *mut ExecutionContext,
            is_true,
            is_error: false,
            is_temporary: true,
            is_singleton: false,
            is_a_reference: false,
            attributes: None,
            data,
        }));
        self.gc.push(value);
        value
    }

    pub fn new_integer(&mut self, value: i64) -> *mut Value {
        self.alloc(&INTEGER_VTABLE, value != 0, ValueData::Integer(value))
    }

    pub fn new_float(&mut self, value: f64) -> *mut Value {
        self.alloc(
            &FLOAT_VTABLE,
            value != 0.0 && !value.is_nan(),
            ValueData::Float(value),
        )
    }

    /// Booleans normally come from [`crate::value::boolean_singleton`]; a
    /// heap boolean only exists where a context-owned value is required.
    pub fn new_boolean(&mut self, value: bool) -> *mut Value {
        self.alloc(&crate::value::BOOLEAN_VTABLE, value, ValueData::Boolean(value))
    }

    pub fn new_string(&mut self, value: UnicodeString) -> *mut Value {
        let is_true = !value.is_empty();
        self.alloc(&STRING_VTABLE, is_true, ValueData::String(value))
    }

    pub fn new_string_from(&mut self, text: &str, render_type: RenderType) -> *mut Value {
        self.new_string(UnicodeString::new(text, render_type))
    }

    pub fn new_array(&mut self, elements: Vec<*mut Value>) -> *mut Value {
        let is_true = !elements.is_empty();
        self.alloc(&ARRAY_VTABLE, is_true, ValueData::Array(elements))
    }

    pub fn new_map(&mut self, map: MapData) -> *mut Value {
        let is_true = !map.is_empty();
        self.alloc(&MAP_VTABLE, is_true, ValueData::Map(map))
    }

    pub fn new_function(&mut self, argument_count: u64, offset: usize) -> *mut Value {
        self.alloc(
            &FUNCTION_VTABLE,
            true,
            ValueData::Function {
                argument_count,
                offset,
            },
        )
    }

    pub fn new_native_function(
        &mut self,
        callback: NativeFunctionCallback,
        bound: *mut Value,
    ) -> *mut Value {
        self.alloc(
            &NATIVE_FUNCTION_VTABLE,
            true,
            ValueData::NativeFunction { callback, bound },
        )
    }

    pub fn new_iterator(&mut self, collection: *mut Value) -> *mut Value {
        self.alloc(
            &ITERATOR_VTABLE,
            true,
            ValueData::Iterator {
                collection,
                position: 0,
            },
        )
    }

    pub fn new_rng(&mut self) -> *mut Value {
        self.alloc(&RNG_VTABLE, true, ValueData::Rng)
    }

    pub fn new_error(&mut self, kind: RuntimeError) -> *mut Value {
        // Errors are shared singletons; nothing context-owned to allocate.
        error_singleton(kind)
    }

    /// Number of live GC-registered allocations. Exposed for leak tests.
    pub fn allocation_count(&self) -> usize {
        self.gc.len()
    }

    /// Whether the run finished with an error value.
    pub fn result_is_error(&self) -> bool {
        unsafe { (*self.result).is_error }
    }

    /// Human-readable rendering of the result.
    pub fn result_display(&self) -> String {
        crate::value::value_display(self.result)
    }

    /// The final output with every range's escape policy applied.
    pub fn render_output(&self) -> String {
        self.output.render()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        ExecutionContext::new()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // The GC list is the sole owner of every temporary; values never
        // free their children, so a single pass cannot double-free.
        for value in self.gc.drain(..) {
            debug_assert!(!unsafe { (*value).is_singleton });
            drop(unsafe { Box::from_raw(value) });
        }
    }
}

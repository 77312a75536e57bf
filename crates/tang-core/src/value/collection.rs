//! Array, map and iterator kinds.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::context::ExecutionContext;
use crate::error::RuntimeError;

use super::{
    error_singleton, string_hash, value_deep_copy, Value, ValueData, ValueVTable, DEFAULT_VTABLE,
};

static SIZE_ATTRIBUTE: Lazy<u64> = Lazy::new(|| string_hash("size"));

/// An insertion-ordered string-keyed map.
pub struct MapData {
    pub entries: Vec<MapEntry>,
    /// key hash → position in `entries`.
    pub index: FxHashMap<u64, usize>,
}

pub struct MapEntry {
    pub hash: u64,
    pub key: *mut Value,
    pub value: *mut Value,
}

impl MapData {
    pub fn new() -> Self {
        MapData {
            entries: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hash: u64) -> Option<*mut Value> {
        self.index.get(&hash).map(|&i| self.entries[i].value)
    }

    /// Insert or overwrite; insertion order is preserved on overwrite.
    pub fn set(&mut self, hash: u64, key: *mut Value, value: *mut Value) {
        match self.index.get(&hash) {
            Some(&i) => self.entries[i].value = value,
            None => {
                self.index.insert(hash, self.entries.len());
                self.entries.push(MapEntry { hash, key, value });
            }
        }
    }
}

impl Default for MapData {
    fn default() -> Self {
        MapData::new()
    }
}

/// Resolve slice operands against a collection length, producing the visited
/// positions. Omitted parts arrive as the null singleton.
pub(crate) fn slice_positions(
    len: usize,
    start: *mut Value,
    end: *mut Value,
    step: *mut Value,
) -> Result<Vec<usize>, RuntimeError> {
    let len = len as i64;
    let step = match unsafe { &(*step).data } {
        ValueData::Null => 1,
        ValueData::Integer(v) if *v != 0 => *v,
        _ => return Err(RuntimeError::InvalidIndex),
    };
    let normalize = |v: i64| if v < 0 { len + v } else { v };
    let start = match unsafe { &(*start).data } {
        ValueData::Null => {
            if step > 0 {
                0
            } else {
                len - 1
            }
        }
        ValueData::Integer(v) => normalize(*v),
        _ => return Err(RuntimeError::InvalidIndex),
    };
    let end = match unsafe { &(*end).data } {
        ValueData::Null => {
            if step > 0 {
                len
            } else {
                -1
            }
        }
        ValueData::Integer(v) => normalize(*v),
        _ => return Err(RuntimeError::InvalidIndex),
    };
    let mut positions = Vec::new();
    if step > 0 {
        let mut i = start.max(0);
        let end = end.min(len);
        while i < end {
            positions.push(i as usize);
            i += step;
        }
    } else {
        let mut i = start.min(len - 1);
        let end = end.max(-1);
        while i > end {
            positions.push(i as usize);
            i += step;
        }
    }
    Ok(positions)
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

fn array_elements<'a>(value: *mut Value) -> Option<&'a mut Vec<*mut Value>> {
    match unsafe { &mut (*value).data } {
        ValueData::Array(elements) => Some(elements),
        _ => None,
    }
}

fn array_deep_copy(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    let Some(elements) = array_elements(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let mut copies = Vec::with_capacity(elements.len());
    for &element in elements.iter() {
        let copy = value_deep_copy(element, context);
        super::value_set_not_temporary(copy);
        copies.push(copy);
    }
    unsafe { &mut *context }.new_array(copies)
}

fn array_to_display(value: &Value) -> String {
    match &value.data {
        ValueData::Array(elements) => {
            let rendered: Vec<String> = elements
                .iter()
                .map(|&e| super::value_display(e))
                .collect();
            format!("[{}]", rendered.join(", "))
        }
        _ => String::new(),
    }
}

/// `+` concatenates arrays; elements are copied so the result is independent.
fn array_add(
    this: *mut Value,
    other: *mut Value,
    self_is_lhs: bool,
    context: *mut ExecutionContext,
) -> *mut Value {
    // Shared views: both operands may be the same array (`x + x`).
    let a = match unsafe { &(*this).data } {
        ValueData::Array(elements) => elements,
        _ => return error_singleton(RuntimeError::NotImplemented),
    };
    let b = match unsafe { &(*other).data } {
        ValueData::Array(elements) => elements,
        _ => return error_singleton(RuntimeError::NotImplemented),
    };
    let (lhs, rhs) = if self_is_lhs { (a, b) } else { (b, a) };
    let mut elements = Vec::with_capacity(lhs.len() + rhs.len());
    for &element in lhs.iter().chain(rhs.iter()) {
        let copy = value_deep_copy(element, context);
        super::value_set_not_temporary(copy);
        elements.push(copy);
    }
    unsafe { &mut *context }.new_array(elements)
}

fn array_index(
    value: *mut Value,
    index: *mut Value,
    _context: *mut ExecutionContext,
) -> *mut Value {
    // Read the index before borrowing the elements; operands may alias.
    let Some(raw) = (unsafe { &*index }).as_integer() else {
        return error_singleton(RuntimeError::InvalidIndex);
    };
    let Some(elements) = array_elements(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let len = elements.len() as i64;
    let position = if raw < 0 { len + raw } else { raw };
    if position < 0 || position >= len {
        return error_singleton(RuntimeError::InvalidIndex);
    }
    elements[position as usize]
}

fn array_assign_index(
    value: *mut Value,
    index: *mut Value,
    other: *mut Value,
    _context: *mut ExecutionContext,
) -> *mut Value {
    let Some(raw) = (unsafe { &*index }).as_integer() else {
        return error_singleton(RuntimeError::InvalidIndex);
    };
    let Some(elements) = array_elements(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let len = elements.len() as i64;
    let position = if raw < 0 { len + raw } else { raw };
    if position < 0 || position >= len {
        return error_singleton(RuntimeError::InvalidIndex);
    }
    elements[position as usize] = other;
    other
}

fn array_slice(
    value: *mut Value,
    start: *mut Value,
    end: *mut Value,
    step: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    let len = match unsafe { &(*value).data } {
        ValueData::Array(elements) => elements.len(),
        _ => return error_singleton(RuntimeError::NotImplemented),
    };
    let positions = match slice_positions(len, start, end, step) {
        Ok(positions) => positions,
        Err(kind) => return error_singleton(kind),
    };
    let sources: Vec<*mut Value> = match unsafe { &(*value).data } {
        ValueData::Array(elements) => positions.iter().map(|&i| elements[i]).collect(),
        _ => return error_singleton(RuntimeError::NotImplemented),
    };
    let mut out = Vec::with_capacity(sources.len());
    for source in sources {
        let copy = value_deep_copy(source, context);
        super::value_set_not_temporary(copy);
        out.push(copy);
    }
    unsafe { &mut *context }.new_array(out)
}

fn array_period(value: *mut Value, hash: u64, context: *mut ExecutionContext) -> *mut Value {
    let Some(elements) = array_elements(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    if hash == *SIZE_ATTRIBUTE {
        return unsafe { &mut *context }.new_integer(elements.len() as i64);
    }
    error_singleton(RuntimeError::NotSupported)
}

fn array_iterator_get(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    unsafe { &mut *context }.new_iterator(value)
}

pub static ARRAY_VTABLE: ValueVTable = ValueVTable {
    name: "array",
    deep_copy: array_deep_copy,
    to_display: array_to_display,
    add: array_add,
    index: array_index,
    assign_index: array_assign_index,
    slice: array_slice,
    period: array_period,
    iterator_get: array_iterator_get,
    ..DEFAULT_VTABLE
};

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

fn map_data<'a>(value: *mut Value) -> Option<&'a mut MapData> {
    match unsafe { &mut (*value).data } {
        ValueData::Map(map) => Some(map),
        _ => None,
    }
}

fn map_deep_copy(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    let Some(map) = map_data(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let mut copy = MapData::new();
    for entry in &map.entries {
        let key = value_deep_copy(entry.key, context);
        super::value_set_not_temporary(key);
        let val = value_deep_copy(entry.value, context);
        super::value_set_not_temporary(val);
        copy.set(entry.hash, key, val);
    }
    unsafe { &mut *context }.new_map(copy)
}

fn map_to_display(value: &Value) -> String {
    match &value.data {
        ValueData::Map(map) => {
            let rendered: Vec<String> = map
                .entries
                .iter()
                .map(|entry| {
                    format!(
                        "{}: {}",
                        super::value_display(entry.key),
                        super::value_display(entry.value)
                    )
                })
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        _ => String::new(),
    }
}

fn map_index(value: *mut Value, index: *mut Value, _context: *mut ExecutionContext) -> *mut Value {
    // Hash the key before borrowing the map; the operands may alias.
    let hash = match unsafe { (*index).as_string() } {
        Some(key) => string_hash(key.as_str()),
        None => return error_singleton(RuntimeError::MapKeyNotString),
    };
    let Some(map) = map_data(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    match map.get(hash) {
        Some(found) => found,
        None => error_singleton(RuntimeError::MapKeyNotFound),
    }
}

fn map_assign_index(
    value: *mut Value,
    index: *mut Value,
    other: *mut Value,
    _context: *mut ExecutionContext,
) -> *mut Value {
    let hash = match unsafe { (*index).as_string() } {
        Some(key) => string_hash(key.as_str()),
        None => return error_singleton(RuntimeError::MapKeyNotString),
    };
    super::value_set_not_temporary(index);
    let Some(map) = map_data(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    map.set(hash, index, other);
    other
}

fn map_period(value: *mut Value, hash: u64, context: *mut ExecutionContext) -> *mut Value {
    let Some(map) = map_data(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    if hash == *SIZE_ATTRIBUTE {
        return unsafe { &mut *context }.new_integer(map.len() as i64);
    }
    error_singleton(RuntimeError::NotSupported)
}

pub static MAP_VTABLE: ValueVTable = ValueVTable {
    name: "map",
    deep_copy: map_deep_copy,
    to_display: map_to_display,
    index: map_index,
    assign_index: map_assign_index,
    period: map_period,
    ..DEFAULT_VTABLE
};

// ---------------------------------------------------------------------------
// Iterator
// ---------------------------------------------------------------------------

fn iterator_to_display(_value: &Value) -> String {
    "iterator".to_string()
}

/// Advance the iterator. Exhaustion is signaled with the iterator-end
/// singleton, which the interpreter lifts into a loop-exit discriminant.
fn iterator_next(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    let (collection, position) = match unsafe { &mut (*value).data } {
        ValueData::Iterator {
            collection,
            position,
        } => (*collection, position),
        _ => return error_singleton(RuntimeError::NotImplemented),
    };
    match unsafe { &(*collection).data } {
        ValueData::Array(elements) => {
            if *position >= elements.len() {
                return error_singleton(RuntimeError::IteratorEnd);
            }
            let element = elements[*position];
            *position += 1;
            element
        }
        ValueData::String(s) => match s.grapheme_at(*position) {
            Some(grapheme) => {
                *position += 1;
                unsafe { &mut *context }.new_string(grapheme)
            }
            None => error_singleton(RuntimeError::IteratorEnd),
        },
        _ => error_singleton(RuntimeError::NotSupported),
    }
}

pub static ITERATOR_VTABLE: ValueVTable = ValueVTable {
    name: "iterator",
    to_display: iterator_to_display,
    iterator_next,
    ..DEFAULT_VTABLE
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unicode::{RenderType, UnicodeString};
    use crate::value::{
        is_error_kind, value_index, value_iterator_get, value_iterator_next, value_period,
        value_slice, null_singleton,
    };

    fn int_array(context: &mut ExecutionContext, values: &[i64]) -> *mut Value {
        let elements: Vec<*mut Value> = values.iter().map(|&v| context.new_integer(v)).collect();
        context.new_array(elements)
    }

    #[test]
    fn test_array_index_negative() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let array = int_array(&mut context, &[1, 2, 3]);
        let last = context.new_integer(-1);
        unsafe {
            assert_eq!((*value_index(array, last, ctx)).as_integer(), Some(3));
        }
        let oob = context.new_integer(3);
        assert!(is_error_kind(
            value_index(array, oob, ctx),
            RuntimeError::InvalidIndex
        ));
    }

    #[test]
    fn test_array_size_attribute() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let array = int_array(&mut context, &[1, 2, 3]);
        let size = value_period(array, string_hash("size"), ctx);
        unsafe {
            assert_eq!((*size).as_integer(), Some(3));
        }
    }

    #[test]
    fn test_array_slice_with_step() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let array = int_array(&mut context, &[0, 1, 2, 3, 4, 5]);
        let start = context.new_integer(1);
        let step = context.new_integer(2);
        let sliced = value_slice(array, start, null_singleton(), step, ctx);
        unsafe {
            match &(*sliced).data {
                ValueData::Array(elements) => {
                    let values: Vec<i64> =
                        elements.iter().map(|&e| (*e).as_integer().unwrap()).collect();
                    assert_eq!(values, vec![1, 3, 5]);
                }
                _ => panic!("expected array"),
            }
        }
    }

    #[test]
    fn test_reverse_slice() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let array = int_array(&mut context, &[0, 1, 2]);
        let step = context.new_integer(-1);
        let sliced = value_slice(array, null_singleton(), null_singleton(), step, ctx);
        unsafe {
            match &(*sliced).data {
                ValueData::Array(elements) => {
                    let values: Vec<i64> =
                        elements.iter().map(|&e| (*e).as_integer().unwrap()).collect();
                    assert_eq!(values, vec![2, 1, 0]);
                }
                _ => panic!("expected array"),
            }
        }
    }

    #[test]
    fn test_array_iteration() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let array = int_array(&mut context, &[10, 20]);
        let iterator = value_iterator_get(array, ctx);
        unsafe {
            assert_eq!((*value_iterator_next(iterator, ctx)).as_integer(), Some(10));
            assert_eq!((*value_iterator_next(iterator, ctx)).as_integer(), Some(20));
        }
        assert!(is_error_kind(
            value_iterator_next(iterator, ctx),
            RuntimeError::IteratorEnd
        ));
    }

    #[test]
    fn test_map_roundtrip() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let map = context.new_map(MapData::new());
        let key = context.new_string(UnicodeString::new("a", RenderType::Trusted));
        let one = context.new_integer(1);
        crate::value::value_assign_index(map, key, one, ctx);
        unsafe {
            assert_eq!((*value_index(map, key, ctx)).as_integer(), Some(1));
        }

        let missing = context.new_string(UnicodeString::new("b", RenderType::Trusted));
        assert!(is_error_kind(
            value_index(map, missing, ctx),
            RuntimeError::MapKeyNotFound
        ));

        let bad_key = context.new_integer(9);
        assert!(is_error_kind(
            value_index(map, bad_key, ctx),
            RuntimeError::MapKeyNotString
        ));
    }

    #[test]
    fn test_map_preserves_insertion_order() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let map = context.new_map(MapData::new());
        for name in ["z", "a", "m"] {
            let key = context.new_string(UnicodeString::new(name, RenderType::Trusted));
            let value = context.new_integer(1);
            crate::value::value_assign_index(map, key, value, ctx);
        }
        unsafe {
            match &(*map).data {
                ValueData::Map(data) => {
                    let keys: Vec<String> = data
                        .entries
                        .iter()
                        .map(|e| (*e.key).as_string().unwrap().as_str().to_string())
                        .collect();
                    assert_eq!(keys, vec!["z", "a", "m"]);
                }
                _ => panic!("expected map"),
            }
        }
    }
}

//! The string kind: an owned [`UnicodeString`] with render-policy tags.

use once_cell::sync::Lazy;

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::unicode::{RenderType, UnicodeString};

use super::collection::slice_positions;
use super::{
    boolean_singleton, error_singleton, null_singleton, string_hash, CastTarget, Value, ValueData,
    ValueVTable, DEFAULT_VTABLE,
};

struct StringAttributes {
    length: u64,
    html: u64,
    html_attribute: u64,
    javascript: u64,
    percent: u64,
    trusted: u64,
}

static ATTRIBUTES: Lazy<StringAttributes> = Lazy::new(|| StringAttributes {
    length: string_hash("length"),
    html: string_hash("html"),
    html_attribute: string_hash("html_attribute"),
    javascript: string_hash("javascript"),
    percent: string_hash("percent"),
    trusted: string_hash("trusted"),
});

fn string_value<'a>(value: *mut Value) -> Option<&'a UnicodeString> {
    // The arena keeps every value alive for the whole execution.
    match unsafe { &(*value).data } {
        ValueData::String(s) => Some(s),
        _ => None,
    }
}

fn string_deep_copy(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    let context = unsafe { &mut *context };
    match string_value(value) {
        Some(s) => context.new_string(s.clone()),
        None => error_singleton(RuntimeError::NotImplemented),
    }
}

fn string_to_display(value: &Value) -> String {
    match &value.data {
        ValueData::String(s) => s.as_str().to_string(),
        _ => String::new(),
    }
}

/// Printing a string preserves its render tags; escaping happens when the
/// context output is finally rendered.
fn string_print(value: *mut Value, _context: *mut ExecutionContext) -> Option<UnicodeString> {
    string_value(value).cloned()
}

/// `+` concatenates two strings, tags preserved.
fn string_add(
    this: *mut Value,
    other: *mut Value,
    self_is_lhs: bool,
    context: *mut ExecutionContext,
) -> *mut Value {
    let (Some(a), Some(b)) = (string_value(this), string_value(other)) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let context = unsafe { &mut *context };
    let joined = if self_is_lhs { a.concat(b) } else { b.concat(a) };
    context.new_string(joined)
}

macro_rules! string_compare {
    ($name:ident, $op:tt) => {
        fn $name(
            this: *mut Value,
            other: *mut Value,
            self_is_lhs: bool,
            _context: *mut ExecutionContext,
        ) -> *mut Value {
            let (Some(a), Some(b)) = (string_value(this), string_value(other)) else {
                return error_singleton(RuntimeError::NotImplemented);
            };
            let (lhs, rhs) = if self_is_lhs { (a, b) } else { (b, a) };
            boolean_singleton(lhs.as_str() $op rhs.as_str())
        }
    };
}

string_compare!(string_less_than, <);
string_compare!(string_less_than_equal, <=);
string_compare!(string_greater_than, >);
string_compare!(string_greater_than_equal, >=);

/// Integer index addresses grapheme clusters; negative counts from the end.
fn string_index(
    value: *mut Value,
    index: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    let Some(s) = string_value(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let Some(raw) = (unsafe { &*index }).as_integer() else {
        return error_singleton(RuntimeError::InvalidIndex);
    };
    let len = s.grapheme_length() as i64;
    let position = if raw < 0 { len + raw } else { raw };
    if position < 0 || position >= len {
        return error_singleton(RuntimeError::InvalidIndex);
    }
    match s.grapheme_at(position as usize) {
        Some(grapheme) => unsafe { &mut *context }.new_string(grapheme),
        None => error_singleton(RuntimeError::InvalidIndex),
    }
}

fn string_slice(
    value: *mut Value,
    start: *mut Value,
    end: *mut Value,
    step: *mut Value,
    context: *mut ExecutionContext,
) -> *mut Value {
    let Some(s) = string_value(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let positions = match slice_positions(s.grapheme_length(), start, end, step) {
        Ok(positions) => positions,
        Err(kind) => return error_singleton(kind),
    };
    let mut out = UnicodeString::empty();
    for position in positions {
        if let Some(grapheme) = s.grapheme_at(position) {
            out = out.concat(&grapheme);
        }
    }
    unsafe { &mut *context }.new_string(out)
}

/// Re-tagging attributes plus `length`.
fn string_period(value: *mut Value, hash: u64, context: *mut ExecutionContext) -> *mut Value {
    let Some(s) = string_value(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let context = unsafe { &mut *context };
    let attributes = &*ATTRIBUTES;
    if hash == attributes.length {
        context.new_integer(s.grapheme_length() as i64)
    } else if hash == attributes.html {
        context.new_string(s.retag(RenderType::Html))
    } else if hash == attributes.html_attribute {
        context.new_string(s.retag(RenderType::HtmlAttribute))
    } else if hash == attributes.javascript {
        context.new_string(s.retag(RenderType::Javascript))
    } else if hash == attributes.percent {
        context.new_string(s.retag(RenderType::Percent))
    } else if hash == attributes.trusted {
        context.new_string(s.retag(RenderType::Trusted))
    } else {
        error_singleton(RuntimeError::NotSupported)
    }
}

fn string_iterator_get(value: *mut Value, context: *mut ExecutionContext) -> *mut Value {
    let context = unsafe { &mut *context };
    context.new_iterator(value)
}

/// A string-to-numeric cast succeeds only when the whole buffer parses.
fn string_cast(
    value: *mut Value,
    target: CastTarget,
    context: *mut ExecutionContext,
) -> *mut Value {
    let Some(s) = string_value(value) else {
        return error_singleton(RuntimeError::NotImplemented);
    };
    let context = unsafe { &mut *context };
    match target {
        CastTarget::Boolean => boolean_singleton(!s.is_empty()),
        CastTarget::Integer => match s.as_str().parse::<i64>() {
            Ok(v) => context.new_integer(v),
            Err(_) => null_singleton(),
        },
        CastTarget::Float => match s.as_str().parse::<f64>() {
            Ok(v) => context.new_float(v),
            Err(_) => null_singleton(),
        },
        CastTarget::String => value,
    }
}

pub static STRING_VTABLE: ValueVTable = ValueVTable {
    name: "string",
    deep_copy: string_deep_copy,
    to_display: string_to_display,
    print: string_print,
    add: string_add,
    less_than: string_less_than,
    less_than_equal: string_less_than_equal,
    greater_than: string_greater_than,
    greater_than_equal: string_greater_than_equal,
    period: string_period,
    index: string_index,
    slice: string_slice,
    iterator_get: string_iterator_get,
    cast: string_cast,
    ..DEFAULT_VTABLE
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{is_error_kind, value_add, value_cast, value_index, value_period};

    fn make(context: &mut ExecutionContext, text: &str) -> *mut Value {
        context.new_string(UnicodeString::new(text, RenderType::Trusted))
    }

    #[test]
    fn test_concat() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let a = make(&mut context, "foo");
        let b = make(&mut context, "bar");
        let joined = value_add(a, b, ctx);
        unsafe {
            assert_eq!((*joined).as_string().unwrap().as_str(), "foobar");
        }
    }

    #[test]
    fn test_index_graphemes() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let s = make(&mut context, "héllo");
        let one = context.new_integer(1);
        let last = context.new_integer(-1);
        unsafe {
            assert_eq!(
                (*value_index(s, one, ctx)).as_string().unwrap().as_str(),
                "é"
            );
            assert_eq!(
                (*value_index(s, last, ctx)).as_string().unwrap().as_str(),
                "o"
            );
        }
        let oob = context.new_integer(5);
        assert!(is_error_kind(
            value_index(s, oob, ctx),
            RuntimeError::InvalidIndex
        ));
    }

    #[test]
    fn test_html_attribute_retags() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let s = make(&mut context, "a&b");
        let tagged = value_period(s, string_hash("html"), ctx);
        unsafe {
            assert_eq!((*tagged).as_string().unwrap().render(), "a&amp;b");
        }
        let length = value_period(s, string_hash("length"), ctx);
        unsafe {
            assert_eq!((*length).as_integer(), Some(3));
        }
        assert!(is_error_kind(
            value_period(s, string_hash("nope"), ctx),
            RuntimeError::NotSupported
        ));
    }

    #[test]
    fn test_whole_buffer_casts() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let number = make(&mut context, "42");
        unsafe {
            assert_eq!(
                (*value_cast(number, CastTarget::Integer as u64, ctx)).as_integer(),
                Some(42)
            );
        }
        // Trailing garbage rejects the whole cast.
        let junk = make(&mut context, "42x");
        let result = value_cast(junk, CastTarget::Integer as u64, ctx);
        unsafe {
            assert!(matches!((*result).data, ValueData::Null));
        }
    }

    #[test]
    fn test_string_comparisons() {
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let a = make(&mut context, "abc");
        let b = make(&mut context, "abd");
        unsafe {
            assert!((*crate::value::value_less_than(a, b, ctx)).is_true);
            assert!(!(*crate::value::value_less_than(b, a, ctx)).is_true);
        }
    }
}

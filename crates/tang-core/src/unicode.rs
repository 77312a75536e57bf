//! Unicode-aware strings with per-range rendering policies.
//!
//! A [`UnicodeString`] owns a UTF-8 buffer partitioned at grapheme-cluster
//! boundaries. Every grapheme range carries a [`RenderType`] describing how
//! that range must be escaped when the string is finally rendered for the
//! host. Concatenation and substring extraction preserve the tags, so a
//! template can safely interleave trusted literal text with values that
//! must be HTML- or percent-escaped.

use std::fmt;

use unicode_segmentation::UnicodeSegmentation;

/// Escape policy applied to a character range at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderType {
    /// Emitted verbatim.
    Trusted,
    /// HTML body text: `&`, `<`, `>`, `"`, `'` are entity-escaped.
    Html,
    /// HTML attribute value: like [`RenderType::Html`] plus control bytes.
    HtmlAttribute,
    /// JavaScript string contents: quotes, backslash, angle brackets and
    /// line terminators become `\xNN` escapes.
    Javascript,
    /// RFC 3986 percent-encoding; unreserved characters pass through.
    Percent,
}

/// A `(first grapheme, policy)` pair. The range extends to the start of the
/// next tag, or the end of the string for the last tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TypeRange {
    grapheme_start: usize,
    render_type: RenderType,
}

/// An owned string with grapheme-boundary offsets and render tags.
#[derive(Debug, Clone, PartialEq)]
pub struct UnicodeString {
    buffer: String,
    /// Byte offset of each grapheme start, plus a final sentinel equal to
    /// the buffer length.
    grapheme_offsets: Vec<usize>,
    ranges: Vec<TypeRange>,
}

impl UnicodeString {
    /// Create a string whose entire contents share one render type.
    pub fn new(text: impl Into<String>, render_type: RenderType) -> Self {
        let buffer = text.into();
        let grapheme_offsets = boundary_offsets(&buffer);
        let ranges = if buffer.is_empty() {
            Vec::new()
        } else {
            vec![TypeRange {
                grapheme_start: 0,
                render_type,
            }]
        };
        UnicodeString {
            buffer,
            grapheme_offsets,
            ranges,
        }
    }

    /// The empty trusted string.
    pub fn empty() -> Self {
        UnicodeString::new(String::new(), RenderType::Trusted)
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn byte_length(&self) -> usize {
        self.buffer.len()
    }

    /// Number of grapheme clusters.
    pub fn grapheme_length(&self) -> usize {
        self.grapheme_offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Render type of the first range, or trusted for the empty string.
    pub fn leading_render_type(&self) -> RenderType {
        self.ranges
            .first()
            .map(|r| r.render_type)
            .unwrap_or(RenderType::Trusted)
    }

    /// Return a copy of this string with every range re-tagged.
    pub fn retag(&self, render_type: RenderType) -> Self {
        UnicodeString::new(self.buffer.clone(), render_type)
    }

    /// Concatenate two strings, preserving the render tags of both sides.
    /// Adjacent ranges with the same policy are merged.
    pub fn concat(&self, other: &UnicodeString) -> UnicodeString {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let mut buffer = String::with_capacity(self.buffer.len() + other.buffer.len());
        buffer.push_str(&self.buffer);
        buffer.push_str(&other.buffer);
        let grapheme_offsets = boundary_offsets(&buffer);
        let shift = self.grapheme_length();
        let mut ranges = self.ranges.clone();
        for range in &other.ranges {
            let shifted = TypeRange {
                grapheme_start: range.grapheme_start + shift,
                render_type: range.render_type,
            };
            match ranges.last() {
                Some(last) if last.render_type == shifted.render_type => {}
                _ => ranges.push(shifted),
            }
        }
        UnicodeString {
            buffer,
            grapheme_offsets,
            ranges,
        }
    }

    /// The grapheme cluster at `index`, as a new string with the covering
    /// range's render type. Returns `None` when out of bounds.
    pub fn grapheme_at(&self, index: usize) -> Option<UnicodeString> {
        if index >= self.grapheme_length() {
            return None;
        }
        Some(self.substring(index, index + 1))
    }

    /// Substring covering graphemes `[start, end)`, tags preserved.
    /// Out-of-range bounds are clamped; an inverted range is empty.
    pub fn substring(&self, start: usize, end: usize) -> UnicodeString {
        let count = self.grapheme_length();
        let start = start.min(count);
        let end = end.min(count);
        if start >= end {
            return UnicodeString::empty();
        }
        let byte_start = self.grapheme_offsets[start];
        let byte_end = self.grapheme_offsets[end];
        let buffer = self.buffer[byte_start..byte_end].to_string();
        let grapheme_offsets = boundary_offsets(&buffer);
        let mut ranges = Vec::new();
        for (i, range) in self.ranges.iter().enumerate() {
            let range_end = self
                .ranges
                .get(i + 1)
                .map(|r| r.grapheme_start)
                .unwrap_or(count);
            if range_end <= start || range.grapheme_start >= end {
                continue;
            }
            let from = range.grapheme_start.max(start) - start;
            match ranges.last() {
                Some(TypeRange { render_type, .. }) if *render_type == range.render_type => {}
                _ => ranges.push(TypeRange {
                    grapheme_start: from,
                    render_type: range.render_type,
                }),
            }
        }
        UnicodeString {
            buffer,
            grapheme_offsets,
            ranges,
        }
    }

    /// Apply each range's escape policy and produce the final host-visible
    /// string.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.buffer.len());
        let count = self.grapheme_length();
        for (i, range) in self.ranges.iter().enumerate() {
            let range_end = self
                .ranges
                .get(i + 1)
                .map(|r| r.grapheme_start)
                .unwrap_or(count);
            let byte_start = self.grapheme_offsets[range.grapheme_start];
            let byte_end = self.grapheme_offsets[range_end];
            let slice = &self.buffer[byte_start..byte_end];
            match range.render_type {
                RenderType::Trusted => out.push_str(slice),
                RenderType::Html => html_escape(slice, false, &mut out),
                RenderType::HtmlAttribute => html_escape(slice, true, &mut out),
                RenderType::Javascript => javascript_escape(slice, &mut out),
                RenderType::Percent => percent_escape(slice, &mut out),
            }
        }
        out
    }
}

impl fmt::Display for UnicodeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buffer)
    }
}

fn boundary_offsets(buffer: &str) -> Vec<usize> {
    let mut offsets: Vec<usize> = buffer.grapheme_indices(true).map(|(i, _)| i).collect();
    offsets.push(buffer.len());
    offsets
}

fn html_escape(slice: &str, attribute: bool, out: &mut String) {
    for ch in slice.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c if attribute && (c as u32) < 0x20 => {
                out.push_str(&format!("&#{};", c as u32));
            }
            c => out.push(c),
        }
    }
}

fn javascript_escape(slice: &str, out: &mut String) {
    for ch in slice.chars() {
        match ch {
            '"' | '\'' | '\\' | '<' | '>' | '&' | '=' | '-' | ';' => {
                out.push_str(&format!("\\x{:02X}", ch as u32));
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
}

fn percent_escape(slice: &str, out: &mut String) {
    for byte in slice.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            b => out.push_str(&format!("%{:02X}", b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grapheme_length() {
        let s = UnicodeString::new("abc", RenderType::Trusted);
        assert_eq!(s.grapheme_length(), 3);
        assert_eq!(s.byte_length(), 3);

        // Family emoji: one grapheme cluster, many bytes.
        let family = UnicodeString::new("\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F466}", RenderType::Trusted);
        assert_eq!(family.grapheme_length(), 1);
    }

    #[test]
    fn test_concat_preserves_types() {
        let a = UnicodeString::new("start ", RenderType::Trusted);
        let b = UnicodeString::new("a&b", RenderType::Html);
        let c = UnicodeString::new(" end", RenderType::Trusted);
        let all = a.concat(&b).concat(&c);
        assert_eq!(all.as_str(), "start a&b end");
        assert_eq!(all.render(), "start a&amp;b end");
    }

    #[test]
    fn test_concat_merges_equal_types() {
        let a = UnicodeString::new("ab", RenderType::Trusted);
        let b = UnicodeString::new("cd", RenderType::Trusted);
        let joined = a.concat(&b);
        assert_eq!(joined.ranges.len(), 1);
        assert_eq!(joined.as_str(), "abcd");
    }

    #[test]
    fn test_concat_empty() {
        let a = UnicodeString::empty();
        let b = UnicodeString::new("x", RenderType::Html);
        assert_eq!(a.concat(&b).render(), "x");
        assert_eq!(b.concat(&a).render(), "x");
    }

    #[test]
    fn test_substring_tags() {
        let s = UnicodeString::new("abc", RenderType::Trusted)
            .concat(&UnicodeString::new("def", RenderType::Html));
        let mid = s.substring(2, 4);
        assert_eq!(mid.as_str(), "cd");
        assert_eq!(mid.ranges.len(), 2);

        let clamped = s.substring(4, 100);
        assert_eq!(clamped.as_str(), "ef");
        let empty = s.substring(5, 2);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_html_escape() {
        let s = UnicodeString::new("<a href=\"x\">&</a>", RenderType::Html);
        assert_eq!(
            s.render(),
            "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_percent_escape() {
        let s = UnicodeString::new("a b/c~", RenderType::Percent);
        assert_eq!(s.render(), "a%20b%2Fc~");
    }

    #[test]
    fn test_javascript_escape() {
        let s = UnicodeString::new("a\"b\nc", RenderType::Javascript);
        assert_eq!(s.render(), "a\\x22b\\nc");
    }

    #[test]
    fn test_grapheme_at() {
        let s = UnicodeString::new("héllo", RenderType::Trusted);
        assert_eq!(s.grapheme_at(1).unwrap().as_str(), "é");
        assert!(s.grapheme_at(5).is_none());
    }
}

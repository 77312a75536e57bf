//! Token definitions and lexing.
//!
//! Script sources lex directly with the [`Token`] definitions. Template
//! sources (`IS_TEMPLATE`) are first split into literal-text segments and
//! `<% … %>` / `<%= … %>` islands; the parser turns text segments into
//! trusted print statements and lexes each island with this lexer.

use logos::Logos;

use crate::ast::Location;

fn lex_integer(lex: &mut logos::Lexer<Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn lex_float(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn lex_identifier(lex: &mut logos::Lexer<Token>) -> String {
    lex.slice().to_string()
}

/// Strip the quotes and process escapes.
fn lex_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let raw = lex.slice();
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
pub enum Token {
    // Keywords
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("use")]
    Use,
    #[token("global")]
    Global,
    #[token("print")]
    Print,
    #[token("as")]
    As,
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Cast type names
    #[token("int")]
    TypeInt,
    #[token("float")]
    TypeFloat,
    #[token("bool")]
    TypeBool,
    #[token("string")]
    TypeString,

    // Literals
    #[regex(r"[0-9]+\.[0-9]*|\.[0-9]+", lex_float)]
    Float(f64),
    #[regex(r"[0-9]+", lex_integer)]
    Integer(i64),
    #[regex(r#""([^"\\]|\\.)*""#, lex_string)]
    String(String),
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", lex_identifier)]
    Identifier(String),

    // Punctuation and operators
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token(".")]
    Period,
    #[token("=")]
    Assign,
    #[token("==")]
    Equal,
    #[token("!=")]
    NotEqual,
    #[token("<")]
    LessThan,
    #[token("<=")]
    LessThanEqual,
    #[token(">")]
    GreaterThan,
    #[token(">=")]
    GreaterThanEqual,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,
    #[token("&&")]
    And,
    #[token("||")]
    Or,
}

/// A token with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub location: Location,
}

/// Lexing failure: the offending location and a short description.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub location: Location,
    pub text: String,
}

/// Byte offset → line/column conversion table.
pub struct LineMap {
    line_starts: Vec<usize>,
}

impl LineMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        LineMap { line_starts }
    }

    pub fn location(&self, offset: usize) -> Location {
        let line = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        Location::new((line + 1) as u32, (offset - self.line_starts[line] + 1) as u32)
    }
}

/// Lex a script source into located tokens. `line_offset` shifts reported
/// line numbers, which keeps template-island diagnostics accurate.
pub fn lex(source: &str, line_offset: u32) -> Result<Vec<SpannedToken>, LexError> {
    let map = LineMap::new(source);
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let mut location = map.location(lexer.span().start);
        location.line += line_offset;
        match result {
            Ok(token) => tokens.push(SpannedToken { token, location }),
            Err(()) => {
                return Err(LexError {
                    location,
                    text: lexer.slice().to_string(),
                })
            }
        }
    }
    Ok(tokens)
}

/// One piece of a template source.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    /// Literal text, printed verbatim (trusted).
    Text(String),
    /// A `<% … %>` island of statements. The line offset locates the
    /// island's first line within the template.
    Code { source: String, line_offset: u32 },
    /// A `<%= expr %>` island printing one expression.
    Expression { source: String, line_offset: u32 },
}

/// Split a template into text and code segments. An unterminated island is
/// reported with the position of its opener.
pub fn split_template(source: &str) -> Result<Vec<TemplateSegment>, LexError> {
    let map = LineMap::new(source);
    let mut segments = Vec::new();
    let mut rest = source;
    let mut offset = 0;
    while let Some(open) = rest.find("<%") {
        if open > 0 {
            segments.push(TemplateSegment::Text(rest[..open].to_string()));
        }
        let after_open = &rest[open + 2..];
        let (is_expression, body_start) = match after_open.strip_prefix('=') {
            Some(_) => (true, open + 3),
            None => (false, open + 2),
        };
        let body = &rest[body_start..];
        let Some(close) = body.find("%>") else {
            return Err(LexError {
                location: map.location(offset + open),
                text: "<%".to_string(),
            });
        };
        let island = body[..close].to_string();
        let line_offset = map.location(offset + body_start).line - 1;
        segments.push(if is_expression {
            TemplateSegment::Expression {
                source: island,
                line_offset,
            }
        } else {
            TemplateSegment::Code {
                source: island,
                line_offset,
            }
        });
        let consumed = body_start + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    if !rest.is_empty() {
        segments.push(TemplateSegment::Text(rest.to_string()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source, 0).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("if ifx use"),
            vec![
                Token::If,
                Token::Identifier("ifx".to_string()),
                Token::Use
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("3 3.14 2. .5"),
            vec![
                Token::Integer(3),
                Token::Float(3.14),
                Token::Float(2.0),
                Token::Float(0.5)
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n""#),
            vec![Token::String("a\"b\n".to_string())]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("<= == != && || ="),
            vec![
                Token::LessThanEqual,
                Token::Equal,
                Token::NotEqual,
                Token::And,
                Token::Or,
                Token::Assign
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("1 // comment\n2 /* block */ 3"),
            vec![Token::Integer(1), Token::Integer(2), Token::Integer(3)]
        );
    }

    #[test]
    fn test_locations() {
        let tokens = lex("a =\n  b;", 0).unwrap();
        assert_eq!(tokens[0].location, Location::new(1, 1));
        assert_eq!(tokens[1].location, Location::new(1, 3));
        assert_eq!(tokens[2].location, Location::new(2, 3));
    }

    #[test]
    fn test_lex_error() {
        let error = lex("a @ b", 0).unwrap_err();
        assert_eq!(error.text, "@");
        assert_eq!(error.location, Location::new(1, 3));
    }

    #[test]
    fn test_template_split() {
        let segments =
            split_template("Hello <% print(name); %>!\nTotal: <%= 1 + 2 %>").unwrap();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], TemplateSegment::Text("Hello ".to_string()));
        assert!(matches!(
            &segments[1],
            TemplateSegment::Code { source, .. } if source.trim() == "print(name);"
        ));
        assert_eq!(segments[2], TemplateSegment::Text("!\nTotal: ".to_string()));
        assert!(matches!(
            &segments[3],
            TemplateSegment::Expression { source, line_offset }
                if source.trim() == "1 + 2" && *line_offset == 1
        ));
    }

    #[test]
    fn test_template_unterminated() {
        assert!(split_template("a <% b").is_err());
    }
}

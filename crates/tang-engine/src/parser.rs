//! Recursive-descent parser.
//!
//! Produces the AST from a token stream. The first error aborts the parse;
//! there is no recovery.

use tang_core::unicode::RenderType;
use tang_core::value::CastTarget;

use crate::ast::{
    BinaryOp, FunctionData, IdentifierData, Location, Node, NodeKind, UnaryOp,
};
use crate::error::CompileError;
use crate::lexer::{self, SpannedToken, TemplateSegment, Token};

pub struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
    /// Nesting depth of function bodies; `return` is only legal inside one.
    function_depth: usize,
}

/// Parse a script source into a root block node.
pub fn parse(source: &str) -> Result<Node, CompileError> {
    parse_with_offset(source, 0)
}

fn parse_with_offset(source: &str, line_offset: u32) -> Result<Node, CompileError> {
    let tokens = lexer::lex(source, line_offset).map_err(|e| {
        CompileError::parse(format!("unexpected character `{}`", e.text), e.location)
    })?;
    Parser::new(tokens).parse_program()
}

/// Parse a template source. Literal text becomes a trusted print statement
/// and `<%= … %>` a print of the expression; `<% … %>` splices raw tokens,
/// so a control structure may span several islands
/// (`<% for (…) { %>x<% } %>`).
pub fn parse_template(source: &str) -> Result<Node, CompileError> {
    let segments = lexer::split_template(source).map_err(|e| {
        CompileError::parse("unterminated template expression".to_string(), e.location)
    })?;
    let lex_island = |source: &str, line_offset: u32| {
        lexer::lex(source, line_offset).map_err(|e| {
            CompileError::parse(format!("unexpected character `{}`", e.text), e.location)
        })
    };
    let mut tokens: Vec<SpannedToken> = Vec::new();
    let mut synthesize = |tokens: &mut Vec<SpannedToken>, location: Location, list: Vec<Token>| {
        tokens.extend(
            list.into_iter()
                .map(|token| SpannedToken { token, location }),
        );
    };
    for segment in segments {
        match segment {
            TemplateSegment::Text(text) => {
                let location = tokens
                    .last()
                    .map(|t| t.location)
                    .unwrap_or(Location::new(1, 1));
                synthesize(
                    &mut tokens,
                    location,
                    vec![
                        Token::Print,
                        Token::LeftParen,
                        Token::String(text),
                        Token::RightParen,
                        Token::Semicolon,
                    ],
                );
            }
            TemplateSegment::Code {
                source,
                line_offset,
            } => tokens.extend(lex_island(&source, line_offset)?),
            TemplateSegment::Expression {
                source,
                line_offset,
            } => {
                let inner = lex_island(&source, line_offset)?;
                let location = inner
                    .first()
                    .map(|t| t.location)
                    .unwrap_or(Location::new(line_offset + 1, 1));
                synthesize(
                    &mut tokens,
                    location,
                    vec![Token::Print, Token::LeftParen],
                );
                tokens.extend(inner);
                synthesize(
                    &mut tokens,
                    location,
                    vec![Token::RightParen, Token::Semicolon],
                );
            }
        }
    }
    Parser::new(tokens).parse_program()
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser {
            tokens,
            position: 0,
            function_depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|t| &t.token)
    }

    fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.position + n).map(|t| &t.token)
    }

    fn current_location(&self) -> Location {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|t| t.location)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn check(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<Location, CompileError> {
        let location = self.current_location();
        match self.peek() {
            Some(token) if *token == expected => {
                self.position += 1;
                Ok(location)
            }
            Some(token) => Err(CompileError::parse(
                format!("expected {what}, found {token:?}"),
                location,
            )),
            None => Err(CompileError::parse(
                format!("expected {what}, found end of input"),
                location,
            )),
        }
    }

    fn expect_end(&mut self) -> Result<(), CompileError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(CompileError::parse(
                format!("unexpected trailing {token:?}"),
                self.current_location(),
            )),
        }
    }

    fn parse_program(mut self) -> Result<Node, CompileError> {
        let location = self.current_location();
        let mut statements = Vec::new();
        while self.peek().is_some() {
            statements.push(self.parse_statement()?);
        }
        Ok(Node::new(NodeKind::Block(statements), location))
    }

    // -- statements ---------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Node, CompileError> {
        // Stray semicolons are empty statements.
        let location = self.current_location();
        if self.check(&Token::Semicolon) {
            return Ok(Node::new(NodeKind::Null, location));
        }
        match self.peek() {
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::Do) => self.parse_do_while(),
            Some(Token::For) => self.parse_for(),
            Some(Token::Function) => self.parse_function(),
            Some(Token::Return) => self.parse_return(),
            Some(Token::Break) => {
                self.advance();
                self.expect(Token::Semicolon, "`;` after `break`")?;
                Ok(Node::new(NodeKind::Break, location))
            }
            Some(Token::Continue) => {
                self.advance();
                self.expect(Token::Semicolon, "`;` after `continue`")?;
                Ok(Node::new(NodeKind::Continue, location))
            }
            Some(Token::Use) => self.parse_use(),
            Some(Token::Global) => self.parse_global(),
            Some(Token::LeftBrace) => self.parse_block(),
            _ => {
                let expression = self.parse_expression()?;
                self.expect(Token::Semicolon, "`;` after expression")?;
                Ok(expression)
            }
        }
    }

    fn parse_block(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::LeftBrace, "`{`")?;
        let mut statements = Vec::new();
        while self.peek().is_some() && self.peek() != Some(&Token::RightBrace) {
            statements.push(self.parse_statement()?);
        }
        self.expect(Token::RightBrace, "`}`")?;
        Ok(Node::new(NodeKind::Block(statements), location))
    }

    /// Loop and branch bodies: a braced block or a single statement.
    fn parse_body(&mut self) -> Result<Node, CompileError> {
        if self.peek() == Some(&Token::LeftBrace) {
            self.parse_block()
        } else {
            self.parse_statement()
        }
    }

    fn parse_if(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::If, "`if`")?;
        self.expect(Token::LeftParen, "`(` after `if`")?;
        let condition = self.parse_expression()?;
        self.expect(Token::RightParen, "`)` after condition")?;
        let then_block = self.parse_body()?;
        let else_block = if self.check(&Token::Else) {
            Some(Box::new(self.parse_body()?))
        } else {
            None
        };
        Ok(Node::new(
            NodeKind::If {
                condition: Box::new(condition),
                then_block: Box::new(then_block),
                else_block,
            },
            location,
        ))
    }

    fn parse_while(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::While, "`while`")?;
        self.expect(Token::LeftParen, "`(` after `while`")?;
        let condition = self.parse_expression()?;
        self.expect(Token::RightParen, "`)` after condition")?;
        let block = self.parse_body()?;
        Ok(Node::new(
            NodeKind::While {
                condition: Box::new(condition),
                block: Box::new(block),
            },
            location,
        ))
    }

    fn parse_do_while(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::Do, "`do`")?;
        let block = self.parse_body()?;
        self.expect(Token::While, "`while` after `do` body")?;
        self.expect(Token::LeftParen, "`(`")?;
        let condition = self.parse_expression()?;
        self.expect(Token::RightParen, "`)` after condition")?;
        self.expect(Token::Semicolon, "`;` after `do … while`")?;
        Ok(Node::new(
            NodeKind::DoWhile {
                block: Box::new(block),
                condition: Box::new(condition),
            },
            location,
        ))
    }

    fn parse_for(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::For, "`for`")?;
        self.expect(Token::LeftParen, "`(` after `for`")?;

        // `for (x : collection)` is the ranged form.
        if matches!(self.peek(), Some(Token::Identifier(_)))
            && self.peek_ahead(1) == Some(&Token::Colon)
        {
            let Some(SpannedToken {
                token: Token::Identifier(name),
                ..
            }) = self.advance()
            else {
                unreachable!()
            };
            self.advance(); // `:`
            let collection = self.parse_expression()?;
            self.expect(Token::RightParen, "`)` after collection")?;
            let block = self.parse_body()?;
            return Ok(Node::new(
                NodeKind::RangedFor {
                    identifier: IdentifierData::new(name),
                    collection: Box::new(collection),
                    block: Box::new(block),
                    iterator_slot: 0,
                },
                location,
            ));
        }

        let init = if self.peek() == Some(&Token::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(Token::Semicolon, "`;` after `for` initializer")?;
        let condition = if self.peek() == Some(&Token::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(Token::Semicolon, "`;` after `for` condition")?;
        let update = if self.peek() == Some(&Token::RightParen) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(Token::RightParen, "`)` after `for` update")?;
        let block = self.parse_body()?;
        Ok(Node::new(
            NodeKind::For {
                init,
                condition,
                update,
                block: Box::new(block),
            },
            location,
        ))
    }

    fn parse_function(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::Function, "`function`")?;
        let name = self.parse_identifier_name("function name")?;
        self.expect(Token::LeftParen, "`(` after function name")?;
        let mut parameters = Vec::new();
        if self.peek() != Some(&Token::RightParen) {
            loop {
                parameters.push(self.parse_identifier_name("parameter name")?);
                if !self.check(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RightParen, "`)` after parameters")?;
        self.function_depth += 1;
        let block = self.parse_block();
        self.function_depth -= 1;
        let block = block?;
        let hash = tang_core::string_hash(&name);
        Ok(Node::new(
            NodeKind::Function(FunctionData {
                name,
                hash,
                parameters,
                block: Box::new(block),
                mangled_hash: 0,
                scope_index: 0,
                local_count: 0,
            }),
            location,
        ))
    }

    fn parse_return(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::Return, "`return`")?;
        if self.function_depth == 0 {
            return Err(CompileError::parse("`return` outside a function", location));
        }
        let value = if self.peek() == Some(&Token::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect(Token::Semicolon, "`;` after `return`")?;
        Ok(Node::new(NodeKind::Return(value), location))
    }

    fn parse_use(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::Use, "`use`")?;
        let name = self.parse_identifier_name("library name")?;
        self.expect(Token::Semicolon, "`;` after `use`")?;
        let hash = tang_core::string_hash(&name);
        Ok(Node::new(NodeKind::Use { name, hash }, location))
    }

    fn parse_global(&mut self) -> Result<Node, CompileError> {
        let location = self.expect(Token::Global, "`global`")?;
        let name = self.parse_identifier_name("global name")?;
        let value = if self.check(&Token::Assign) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect(Token::Semicolon, "`;` after `global`")?;
        let hash = tang_core::string_hash(&name);
        Ok(Node::new(
            NodeKind::Global {
                name,
                hash,
                value,
                position: 0,
            },
            location,
        ))
    }

    fn parse_identifier_name(&mut self, what: &str) -> Result<String, CompileError> {
        let location = self.current_location();
        match self.advance() {
            Some(SpannedToken {
                token: Token::Identifier(name),
                ..
            }) => Ok(name),
            Some(SpannedToken { token, .. }) => Err(CompileError::parse(
                format!("expected {what}, found {token:?}"),
                location,
            )),
            None => Err(CompileError::parse(
                format!("expected {what}, found end of input"),
                location,
            )),
        }
    }

    // -- expressions --------------------------------------------------------

    pub(crate) fn parse_expression(&mut self) -> Result<Node, CompileError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Node, CompileError> {
        let expression = self.parse_ternary()?;
        if self.peek() != Some(&Token::Assign) {
            return Ok(expression);
        }
        let location = self.current_location();
        self.advance();
        match expression.kind {
            NodeKind::Identifier(_) | NodeKind::Index { .. } => {}
            _ => {
                return Err(CompileError::parse(
                    "invalid assignment target",
                    expression.location,
                ))
            }
        }
        let value = self.parse_assignment()?;
        Ok(Node::new(
            NodeKind::Assign {
                target: Box::new(expression),
                value: Box::new(value),
            },
            location,
        ))
    }

    fn parse_ternary(&mut self) -> Result<Node, CompileError> {
        let condition = self.parse_or()?;
        if !self.check(&Token::Question) {
            return Ok(condition);
        }
        let location = condition.location;
        let when_true = self.parse_ternary()?;
        self.expect(Token::Colon, "`:` in ternary")?;
        let when_false = self.parse_ternary()?;
        Ok(Node::new(
            NodeKind::Ternary {
                condition: Box::new(condition),
                when_true: Box::new(when_true),
                when_false: Box::new(when_false),
            },
            location,
        ))
    }

    fn parse_binary_level(
        &mut self,
        operators: &[(Token, BinaryOp)],
        next: fn(&mut Parser) -> Result<Node, CompileError>,
    ) -> Result<Node, CompileError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, op) in operators {
                if self.peek() == Some(token) {
                    let location = self.current_location();
                    self.advance();
                    let rhs = next(self)?;
                    lhs = Node::new(
                        NodeKind::Binary {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        location,
                    );
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_or(&mut self) -> Result<Node, CompileError> {
        self.parse_binary_level(&[(Token::Or, BinaryOp::Or)], Parser::parse_and)
    }

    fn parse_and(&mut self) -> Result<Node, CompileError> {
        self.parse_binary_level(&[(Token::And, BinaryOp::And)], Parser::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Node, CompileError> {
        self.parse_binary_level(
            &[
                (Token::Equal, BinaryOp::Equal),
                (Token::NotEqual, BinaryOp::NotEqual),
            ],
            Parser::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Node, CompileError> {
        self.parse_binary_level(
            &[
                (Token::LessThanEqual, BinaryOp::LessThanEqual),
                (Token::LessThan, BinaryOp::LessThan),
                (Token::GreaterThanEqual, BinaryOp::GreaterThanEqual),
                (Token::GreaterThan, BinaryOp::GreaterThan),
            ],
            Parser::parse_cast,
        )
    }

    fn parse_cast(&mut self) -> Result<Node, CompileError> {
        let mut expression = self.parse_additive()?;
        while self.peek() == Some(&Token::As) {
            let location = self.current_location();
            self.advance();
            let target = match self.advance() {
                Some(SpannedToken {
                    token: Token::TypeInt,
                    ..
                }) => CastTarget::Integer,
                Some(SpannedToken {
                    token: Token::TypeFloat,
                    ..
                }) => CastTarget::Float,
                Some(SpannedToken {
                    token: Token::TypeBool,
                    ..
                }) => CastTarget::Boolean,
                Some(SpannedToken {
                    token: Token::TypeString,
                    ..
                }) => CastTarget::String,
                _ => {
                    return Err(CompileError::parse(
                        "expected `int`, `float`, `bool` or `string` after `as`",
                        location,
                    ))
                }
            };
            expression = Node::new(
                NodeKind::Cast {
                    target,
                    operand: Box::new(expression),
                },
                location,
            );
        }
        Ok(expression)
    }

    fn parse_additive(&mut self) -> Result<Node, CompileError> {
        self.parse_binary_level(
            &[
                (Token::Plus, BinaryOp::Add),
                (Token::Minus, BinaryOp::Subtract),
            ],
            Parser::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Node, CompileError> {
        self.parse_binary_level(
            &[
                (Token::Star, BinaryOp::Multiply),
                (Token::Slash, BinaryOp::Divide),
                (Token::Percent, BinaryOp::Modulo),
            ],
            Parser::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Node, CompileError> {
        let location = self.current_location();
        if self.check(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Node::new(
                NodeKind::Unary {
                    op: UnaryOp::Negative,
                    operand: Box::new(operand),
                },
                location,
            ));
        }
        if self.check(&Token::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Node::new(
                NodeKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                location,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node, CompileError> {
        let mut expression = self.parse_primary()?;
        loop {
            let location = self.current_location();
            if self.check(&Token::LeftParen) {
                let mut arguments = Vec::new();
                if self.peek() != Some(&Token::RightParen) {
                    loop {
                        arguments.push(self.parse_expression()?);
                        if !self.check(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Token::RightParen, "`)` after arguments")?;
                expression = Node::new(
                    NodeKind::FunctionCall {
                        callee: Box::new(expression),
                        arguments,
                    },
                    location,
                );
            } else if self.check(&Token::LeftBracket) {
                expression = self.parse_index_or_slice(expression, location)?;
            } else if self.check(&Token::Period) {
                let name = self.parse_identifier_name("attribute name")?;
                let hash = tang_core::string_hash(&name);
                expression = Node::new(
                    NodeKind::Period {
                        object: Box::new(expression),
                        name,
                        hash,
                    },
                    location,
                );
            } else {
                return Ok(expression);
            }
        }
    }

    /// After `[`: either `collection[index]` or `collection[a:b:c]` with any
    /// part omitted.
    fn parse_index_or_slice(
        &mut self,
        collection: Node,
        location: Location,
    ) -> Result<Node, CompileError> {
        let start = if matches!(self.peek(), Some(Token::Colon | Token::RightBracket)) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        if self.check(&Token::RightBracket) {
            let Some(index) = start else {
                return Err(CompileError::parse("empty index", location));
            };
            return Ok(Node::new(
                NodeKind::Index {
                    collection: Box::new(collection),
                    index,
                },
                location,
            ));
        }
        self.expect(Token::Colon, "`:` or `]` in index")?;
        let end = if matches!(self.peek(), Some(Token::Colon | Token::RightBracket)) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if self.check(&Token::Colon) {
            if self.peek() == Some(&Token::RightBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            }
        } else {
            None
        };
        self.expect(Token::RightBracket, "`]` after slice")?;
        Ok(Node::new(
            NodeKind::Slice {
                collection: Box::new(collection),
                start,
                end,
                step,
            },
            location,
        ))
    }

    fn parse_primary(&mut self) -> Result<Node, CompileError> {
        let location = self.current_location();
        match self.advance() {
            Some(SpannedToken {
                token: Token::Integer(value),
                ..
            }) => Ok(Node::new(NodeKind::Integer(value), location)),
            Some(SpannedToken {
                token: Token::Float(value),
                ..
            }) => Ok(Node::new(NodeKind::Float(value), location)),
            Some(SpannedToken {
                token: Token::String(value),
                ..
            }) => Ok(Node::new(
                NodeKind::String {
                    value,
                    render_type: RenderType::Trusted,
                },
                location,
            )),
            Some(SpannedToken {
                token: Token::True, ..
            }) => Ok(Node::new(NodeKind::Boolean(true), location)),
            Some(SpannedToken {
                token: Token::False,
                ..
            }) => Ok(Node::new(NodeKind::Boolean(false), location)),
            Some(SpannedToken {
                token: Token::Null, ..
            }) => Ok(Node::new(NodeKind::Null, location)),
            Some(SpannedToken {
                token: Token::Identifier(name),
                ..
            }) => Ok(Node::new(
                NodeKind::Identifier(IdentifierData::new(name)),
                location,
            )),
            Some(SpannedToken {
                token: Token::Print,
                ..
            }) => {
                self.expect(Token::LeftParen, "`(` after `print`")?;
                let value = self.parse_expression()?;
                self.expect(Token::RightParen, "`)` after `print` argument")?;
                Ok(Node::new(NodeKind::Print(Box::new(value)), location))
            }
            Some(SpannedToken {
                token: Token::LeftParen,
                ..
            }) => {
                let expression = self.parse_expression()?;
                self.expect(Token::RightParen, "`)`")?;
                Ok(expression)
            }
            Some(SpannedToken {
                token: Token::LeftBracket,
                ..
            }) => {
                let mut elements = Vec::new();
                if self.peek() != Some(&Token::RightBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.check(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Token::RightBracket, "`]` after array elements")?;
                Ok(Node::new(NodeKind::Array(elements), location))
            }
            Some(SpannedToken {
                token: Token::LeftBrace,
                ..
            }) => {
                let mut entries = Vec::new();
                if self.peek() != Some(&Token::RightBrace) {
                    loop {
                        let key = self.parse_expression()?;
                        self.expect(Token::Colon, "`:` after map key")?;
                        let value = self.parse_expression()?;
                        entries.push((key, value));
                        if !self.check(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Token::RightBrace, "`}` after map entries")?;
                Ok(Node::new(NodeKind::Map(entries), location))
            }
            Some(SpannedToken { token, .. }) => Err(CompileError::parse(
                format!("unexpected {token:?}"),
                location,
            )),
            None => Err(CompileError::parse(
                "unexpected end of input",
                location,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_statements() {
        let root = parse("x = 3; y = x + x * x;").unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!("expected block");
        };
        assert_eq!(statements.len(), 2);
        assert!(matches!(statements[0].kind, NodeKind::Assign { .. }));
        // Precedence: x + (x * x)
        let NodeKind::Assign { value, .. } = &statements[1].kind else {
            panic!("expected assign");
        };
        let NodeKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            NodeKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_cast_binds_between_additive_and_comparison() {
        let root = parse("x = 3 + 5 as float;").unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!()
        };
        let NodeKind::Assign { value, .. } = &statements[0].kind else {
            panic!()
        };
        // (3 + 5) as float
        let NodeKind::Cast { target, operand } = &value.kind else {
            panic!("expected cast, got {:?}", value.kind)
        };
        assert_eq!(*target, CastTarget::Float);
        assert!(matches!(
            operand.kind,
            NodeKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));

        // Comparisons see the cast result: (1 + 2.) == 3 parses with the
        // addition on the left.
        let root = parse("b = 1 + 2. == 3;").unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!()
        };
        let NodeKind::Assign { value, .. } = &statements[0].kind else {
            panic!()
        };
        assert!(matches!(
            value.kind,
            NodeKind::Binary {
                op: BinaryOp::Equal,
                ..
            }
        ));
    }

    #[test]
    fn test_control_flow_forms() {
        let source = r#"
            if (true) { print("a"); } else { print("b"); }
            while (x < 3) { x = x + 1; }
            do { x = x - 1; } while (x);
            for (i = 0; i < 3; i = i + 1) { print(i); }
            for (v : [1, 2]) { print(v); }
        "#;
        let root = parse(source).unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!()
        };
        assert!(matches!(statements[0].kind, NodeKind::If { .. }));
        assert!(matches!(statements[1].kind, NodeKind::While { .. }));
        assert!(matches!(statements[2].kind, NodeKind::DoWhile { .. }));
        assert!(matches!(statements[3].kind, NodeKind::For { .. }));
        assert!(matches!(statements[4].kind, NodeKind::RangedFor { .. }));
    }

    #[test]
    fn test_function_and_return() {
        let root = parse("function add(a, b) { return a + b; }").unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!()
        };
        let NodeKind::Function(data) = &statements[0].kind else {
            panic!()
        };
        assert_eq!(data.name, "add");
        assert_eq!(data.parameters, vec!["a", "b"]);
    }

    #[test]
    fn test_return_outside_function_rejected() {
        assert!(parse("return 3;").is_err());
    }

    #[test]
    fn test_slice_forms() {
        for source in ["a[1:2];", "a[:2];", "a[1:];", "a[::2];", "a[::-1];"] {
            let root = parse(source).unwrap();
            let NodeKind::Block(statements) = &root.kind else {
                panic!()
            };
            assert!(
                matches!(statements[0].kind, NodeKind::Slice { .. }),
                "{source} should parse as a slice"
            );
        }
        let root = parse("a[-1];").unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!()
        };
        assert!(matches!(statements[0].kind, NodeKind::Index { .. }));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse("1 = 2;").is_err());
        assert!(parse("a.b = 2;").is_err());
        assert!(parse("a[0] = 2;").is_ok());
    }

    #[test]
    fn test_ternary() {
        let root = parse("x = a ? 1 : 2;").unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!()
        };
        let NodeKind::Assign { value, .. } = &statements[0].kind else {
            panic!()
        };
        assert!(matches!(value.kind, NodeKind::Ternary { .. }));
    }

    #[test]
    fn test_parse_error_reports_location() {
        let error = parse("x = ;").unwrap_err();
        match error {
            CompileError::Parse { location, .. } => {
                assert_eq!(location.line, 1);
                assert_eq!(location.column, 5);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_template_parse() {
        let root = parse_template("Hi <%= 1 + 2 %>!").unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!()
        };
        assert_eq!(statements.len(), 3);
        assert!(matches!(statements[0].kind, NodeKind::Print(_)));
        assert!(matches!(statements[1].kind, NodeKind::Print(_)));
        assert!(matches!(statements[2].kind, NodeKind::Print(_)));
    }

    #[test]
    fn test_map_literal() {
        let root = parse(r#"m = {"a": 1, "b": 2};"#).unwrap();
        let NodeKind::Block(statements) = &root.kind else {
            panic!()
        };
        let NodeKind::Assign { value, .. } = &statements[0].kind else {
            panic!()
        };
        let NodeKind::Map(entries) = &value.kind else {
            panic!()
        };
        assert_eq!(entries.len(), 2);
    }
}

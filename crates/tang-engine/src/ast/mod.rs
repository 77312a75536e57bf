//! The abstract syntax tree.
//!
//! Every syntactic form is one [`NodeKind`] variant wrapped in a [`Node`]
//! carrying its source location and a possible-result-type mask. The uniform
//! node protocol is a fixed set of operations dispatched from `Node`
//! methods: `dump` (the printable tree, here), `simplify`
//! (`crate::simplify`), `analyze` (`crate::analyze`), `emit_bytecode`
//! (`crate::emit`) and `emit_native` (`crate::jit`). Destruction is the
//! `Drop` of the owning node; children are owned boxes and vectors.

use std::fmt;

use bitflags::bitflags;
use tang_core::unicode::RenderType;
use tang_core::value::CastTarget;

bitflags! {
    /// Possible runtime result types of an expression; empty means unknown.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeMask: u8 {
        const NULL = 1 << 0;
        const BOOLEAN = 1 << 1;
        const INTEGER = 1 << 2;
        const FLOAT = 1 << 3;
        const STRING = 1 << 4;
        const ERROR = 1 << 5;
    }
}

impl TypeMask {
    pub const UNKNOWN: TypeMask = TypeMask::empty();
    pub const NUMERIC: TypeMask = TypeMask::INTEGER.union(TypeMask::FLOAT);
}

/// Source position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Location { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// How the analyzer classified an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentClass {
    Local,
    Global,
    Library,
    Function,
}

/// An identifier occurrence. The resolution fields are filled in by the
/// analyzer; until then `class` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierData {
    pub name: String,
    /// Hash of the bare name.
    pub hash: u64,
    pub class: Option<IdentClass>,
    /// Hash of `<scope>/<name>`, unique across the program.
    pub mangled_hash: u64,
    /// Slot within the local or global frame, per `class`.
    pub position: usize,
    /// Declared arity when `class` is `Function`.
    pub argument_count: u64,
}

impl IdentifierData {
    pub fn new(name: String) -> Self {
        let hash = tang_core::string_hash(&name);
        IdentifierData {
            name,
            hash,
            class: None,
            mangled_hash: hash,
            position: 0,
            argument_count: 0,
        }
    }
}

/// A function declaration. Scope fields are filled in by the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionData {
    pub name: String,
    pub hash: u64,
    pub parameters: Vec<String>,
    pub block: Box<Node>,
    pub mangled_hash: u64,
    /// Index of the function's scope in the program's scope arena.
    pub scope_index: usize,
    /// Total local slots (parameters included).
    pub local_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negative,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negative => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// One node kind per syntactic form.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String {
        value: String,
        render_type: RenderType,
    },
    Identifier(IdentifierData),
    Array(Vec<Node>),
    Map(Vec<(Node, Node)>),
    Assign {
        target: Box<Node>,
        value: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Cast {
        target: CastTarget,
        operand: Box<Node>,
    },
    Index {
        collection: Box<Node>,
        index: Box<Node>,
    },
    Slice {
        collection: Box<Node>,
        start: Option<Box<Node>>,
        end: Option<Box<Node>>,
        step: Option<Box<Node>>,
    },
    Period {
        object: Box<Node>,
        name: String,
        hash: u64,
    },
    FunctionCall {
        callee: Box<Node>,
        arguments: Vec<Node>,
    },
    Function(FunctionData),
    Return(Option<Box<Node>>),
    Print(Box<Node>),
    Use {
        name: String,
        hash: u64,
    },
    Global {
        name: String,
        hash: u64,
        value: Option<Box<Node>>,
        /// Global-frame slot, filled in by the analyzer.
        position: usize,
    },
    If {
        condition: Box<Node>,
        then_block: Box<Node>,
        else_block: Option<Box<Node>>,
    },
    Ternary {
        condition: Box<Node>,
        when_true: Box<Node>,
        when_false: Box<Node>,
    },
    While {
        condition: Box<Node>,
        block: Box<Node>,
    },
    DoWhile {
        block: Box<Node>,
        condition: Box<Node>,
    },
    For {
        init: Option<Box<Node>>,
        condition: Option<Box<Node>>,
        update: Option<Box<Node>>,
        block: Box<Node>,
    },
    RangedFor {
        identifier: IdentifierData,
        collection: Box<Node>,
        block: Box<Node>,
        /// Hidden local slot holding the loop's iterator.
        iterator_slot: usize,
    },
    Break,
    Continue,
    Block(Vec<Node>),
    ParseError {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub location: Location,
    pub possible_type: TypeMask,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(kind: NodeKind, location: Location) -> Self {
        let possible_type = initial_type_mask(&kind);
        Node {
            location,
            possible_type,
            kind,
        }
    }

    /// Whether this node is a literal the simplifier can fold.
    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Null
                | NodeKind::Boolean(_)
                | NodeKind::Integer(_)
                | NodeKind::Float(_)
                | NodeKind::String { .. }
        )
    }

    /// Literal truthiness, mirroring the runtime rules.
    pub fn literal_truthiness(&self) -> Option<bool> {
        match &self.kind {
            NodeKind::Null => Some(false),
            NodeKind::Boolean(b) => Some(*b),
            NodeKind::Integer(v) => Some(*v != 0),
            NodeKind::Float(v) => Some(*v != 0.0 && !v.is_nan()),
            NodeKind::String { value, .. } => Some(!value.is_empty()),
            _ => None,
        }
    }

    /// Human-readable tree dump used by tests and debug mode.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(0, &mut out);
        out
    }

    fn dump_into(&self, indent: usize, out: &mut String) {
        use std::fmt::Write;
        let pad = "  ".repeat(indent);
        match &self.kind {
            NodeKind::Null => writeln!(out, "{pad}null").unwrap(),
            NodeKind::Boolean(v) => writeln!(out, "{pad}boolean {v}").unwrap(),
            NodeKind::Integer(v) => writeln!(out, "{pad}integer {v}").unwrap(),
            NodeKind::Float(v) => writeln!(out, "{pad}float {v}").unwrap(),
            NodeKind::String { value, .. } => writeln!(out, "{pad}string {value:?}").unwrap(),
            NodeKind::Identifier(data) => {
                let class = data
                    .class
                    .map(|c| format!(" ({c:?} @ {})", data.position))
                    .unwrap_or_default();
                writeln!(out, "{pad}identifier {}{class}", data.name).unwrap();
            }
            NodeKind::Array(elements) => {
                writeln!(out, "{pad}array").unwrap();
                for element in elements {
                    element.dump_into(indent + 1, out);
                }
            }
            NodeKind::Map(entries) => {
                writeln!(out, "{pad}map").unwrap();
                for (key, value) in entries {
                    key.dump_into(indent + 1, out);
                    value.dump_into(indent + 2, out);
                }
            }
            NodeKind::Assign { target, value } => {
                writeln!(out, "{pad}assign").unwrap();
                target.dump_into(indent + 1, out);
                value.dump_into(indent + 1, out);
            }
            NodeKind::Binary { op, lhs, rhs } => {
                writeln!(out, "{pad}binary {}", op.symbol()).unwrap();
                lhs.dump_into(indent + 1, out);
                rhs.dump_into(indent + 1, out);
            }
            NodeKind::Unary { op, operand } => {
                writeln!(out, "{pad}unary {}", op.symbol()).unwrap();
                operand.dump_into(indent + 1, out);
            }
            NodeKind::Cast { target, operand } => {
                writeln!(out, "{pad}cast {target:?}").unwrap();
                operand.dump_into(indent + 1, out);
            }
            NodeKind::Index { collection, index } => {
                writeln!(out, "{pad}index").unwrap();
                collection.dump_into(indent + 1, out);
                index.dump_into(indent + 1, out);
            }
            NodeKind::Slice {
                collection,
                start,
                end,
                step,
            } => {
                writeln!(out, "{pad}slice").unwrap();
                collection.dump_into(indent + 1, out);
                for part in [start, end, step].into_iter().flatten() {
                    part.dump_into(indent + 1, out);
                }
            }
            NodeKind::Period { object, name, .. } => {
                writeln!(out, "{pad}period .{name}").unwrap();
                object.dump_into(indent + 1, out);
            }
            NodeKind::FunctionCall { callee, arguments } => {
                writeln!(out, "{pad}call").unwrap();
                callee.dump_into(indent + 1, out);
                for argument in arguments {
                    argument.dump_into(indent + 1, out);
                }
            }
            NodeKind::Function(data) => {
                writeln!(
                    out,
                    "{pad}function {}({})",
                    data.name,
                    data.parameters.join(", ")
                )
                .unwrap();
                data.block.dump_into(indent + 1, out);
            }
            NodeKind::Return(value) => {
                writeln!(out, "{pad}return").unwrap();
                if let Some(value) = value {
                    value.dump_into(indent + 1, out);
                }
            }
            NodeKind::Print(value) => {
                writeln!(out, "{pad}print").unwrap();
                value.dump_into(indent + 1, out);
            }
            NodeKind::Use { name, .. } => writeln!(out, "{pad}use {name}").unwrap(),
            NodeKind::Global { name, value, .. } => {
                writeln!(out, "{pad}global {name}").unwrap();
                if let Some(value) = value {
                    value.dump_into(indent + 1, out);
                }
            }
            NodeKind::If {
                condition,
                then_block,
                else_block,
            } => {
                writeln!(out, "{pad}if").unwrap();
                condition.dump_into(indent + 1, out);
                then_block.dump_into(indent + 1, out);
                if let Some(else_block) = else_block {
                    writeln!(out, "{pad}else").unwrap();
                    else_block.dump_into(indent + 1, out);
                }
            }
            NodeKind::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                writeln!(out, "{pad}ternary").unwrap();
                condition.dump_into(indent + 1, out);
                when_true.dump_into(indent + 1, out);
                when_false.dump_into(indent + 1, out);
            }
            NodeKind::While { condition, block } => {
                writeln!(out, "{pad}while").unwrap();
                condition.dump_into(indent + 1, out);
                block.dump_into(indent + 1, out);
            }
            NodeKind::DoWhile { block, condition } => {
                writeln!(out, "{pad}do-while").unwrap();
                block.dump_into(indent + 1, out);
                condition.dump_into(indent + 1, out);
            }
            NodeKind::For {
                init,
                condition,
                update,
                block,
            } => {
                writeln!(out, "{pad}for").unwrap();
                for part in [init, condition, update].into_iter().flatten() {
                    part.dump_into(indent + 1, out);
                }
                block.dump_into(indent + 1, out);
            }
            NodeKind::RangedFor {
                identifier,
                collection,
                block,
                ..
            } => {
                writeln!(out, "{pad}ranged-for {}", identifier.name).unwrap();
                collection.dump_into(indent + 1, out);
                block.dump_into(indent + 1, out);
            }
            NodeKind::Break => writeln!(out, "{pad}break").unwrap(),
            NodeKind::Continue => writeln!(out, "{pad}continue").unwrap(),
            NodeKind::Block(statements) => {
                writeln!(out, "{pad}block").unwrap();
                for statement in statements {
                    statement.dump_into(indent + 1, out);
                }
            }
            NodeKind::ParseError { message } => {
                writeln!(out, "{pad}parse error: {message}").unwrap()
            }
        }
    }
}

fn initial_type_mask(kind: &NodeKind) -> TypeMask {
    match kind {
        NodeKind::Null => TypeMask::NULL,
        NodeKind::Boolean(_) => TypeMask::BOOLEAN,
        NodeKind::Integer(_) => TypeMask::INTEGER,
        NodeKind::Float(_) => TypeMask::FLOAT,
        NodeKind::String { .. } => TypeMask::STRING,
        NodeKind::Binary { op, .. } => match op {
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulo => TypeMask::NUMERIC
                .union(TypeMask::STRING)
                .union(TypeMask::ERROR),
            BinaryOp::LessThan
            | BinaryOp::LessThanEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanEqual
            | BinaryOp::Equal
            | BinaryOp::NotEqual => TypeMask::BOOLEAN.union(TypeMask::ERROR),
            BinaryOp::And | BinaryOp::Or => TypeMask::UNKNOWN,
        },
        NodeKind::Unary { op, .. } => match op {
            UnaryOp::Negative => TypeMask::NUMERIC.union(TypeMask::ERROR),
            UnaryOp::Not => TypeMask::BOOLEAN,
        },
        NodeKind::Cast { target, .. } => match target {
            CastTarget::Boolean => TypeMask::BOOLEAN.union(TypeMask::ERROR),
            CastTarget::Integer => TypeMask::INTEGER
                .union(TypeMask::NULL)
                .union(TypeMask::ERROR),
            CastTarget::Float => TypeMask::FLOAT.union(TypeMask::NULL).union(TypeMask::ERROR),
            CastTarget::String => TypeMask::STRING.union(TypeMask::ERROR),
        },
        NodeKind::Print(_) => TypeMask::NULL.union(TypeMask::ERROR),
        _ => TypeMask::UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::new(1, 1)
    }

    #[test]
    fn test_literal_masks() {
        assert_eq!(
            Node::new(NodeKind::Integer(1), loc()).possible_type,
            TypeMask::INTEGER
        );
        assert_eq!(
            Node::new(NodeKind::Null, loc()).possible_type,
            TypeMask::NULL
        );
    }

    #[test]
    fn test_literal_truthiness() {
        assert_eq!(
            Node::new(NodeKind::Integer(0), loc()).literal_truthiness(),
            Some(false)
        );
        assert_eq!(
            Node::new(NodeKind::Integer(3), loc()).literal_truthiness(),
            Some(true)
        );
        assert_eq!(
            Node::new(NodeKind::Null, loc()).literal_truthiness(),
            Some(false)
        );
        assert_eq!(
            Node::new(
                NodeKind::String {
                    value: String::new(),
                    render_type: tang_core::RenderType::Trusted
                },
                loc()
            )
            .literal_truthiness(),
            Some(false)
        );
    }

    #[test]
    fn test_dump_shape() {
        let node = Node::new(
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Node::new(NodeKind::Integer(1), loc())),
                rhs: Box::new(Node::new(NodeKind::Integer(2), loc())),
            },
            loc(),
        );
        let dump = node.dump();
        assert!(dump.contains("binary +"));
        assert!(dump.contains("integer 1"));
        assert!(dump.contains("integer 2"));
    }
}

//! Constant folding.
//!
//! A tree-to-tree rewrite driven by a bindings map from identifier hash to
//! the identifier's last-assigned literal. Folding must never change
//! observable behavior when a variable might be reassigned on some execution
//! path, so loops and conditional branches simplify against independent
//! clones of the map and only entries every branch agrees on survive.

use rustc_hash::{FxHashMap, FxHashSet};

use tang_core::unicode::RenderType;
use tang_core::value::CastTarget;

use crate::ast::{BinaryOp, Node, NodeKind, UnaryOp};

/// identifier mangled-hash → last-assigned literal.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    map: FxHashMap<u64, Node>,
}

impl Bindings {
    pub fn new() -> Self {
        Bindings::default()
    }

    fn get(&self, hash: u64) -> Option<&Node> {
        self.map.get(&hash)
    }

    /// Record an assignment. Only primitive literals are worth keeping;
    /// anything else clears the entry.
    fn record(&mut self, hash: u64, value: &Node) {
        match value.kind {
            NodeKind::Null
            | NodeKind::Boolean(_)
            | NodeKind::Integer(_)
            | NodeKind::Float(_) => {
                self.map.insert(hash, value.clone());
            }
            _ => {
                self.map.remove(&hash);
            }
        }
    }

    fn remove(&mut self, hash: u64) {
        self.map.remove(&hash);
    }

    /// Drop everything. Used when a subtree may have arbitrary effects
    /// (function calls) and on any failure path.
    pub fn invalidate_all(&mut self) {
        self.map.clear();
    }

    /// Keep only entries on which every branch clone agrees. Agreement is
    /// on the literal itself; source locations are irrelevant.
    fn intersect(&mut self, branches: &[Bindings]) {
        match branches.split_first() {
            None => self.invalidate_all(),
            Some((first, rest)) => {
                let mut agreed = first.map.clone();
                agreed.retain(|hash, value| {
                    rest.iter().all(|branch| {
                        branch
                            .map
                            .get(hash)
                            .is_some_and(|other| other.kind == value.kind)
                    })
                });
                self.map = agreed;
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Simplify the whole tree in place.
pub fn simplify(node: &mut Node, bindings: &mut Bindings) {
    let location = node.location;
    match &mut node.kind {
        NodeKind::Identifier(data) => {
            if let Some(literal) = bindings.get(data.mangled_hash) {
                debug_assert!(literal.is_literal());
                let mut replacement = literal.clone();
                replacement.location = location;
                *node = replacement;
            }
        }
        NodeKind::Assign { target, value } => {
            simplify(value, bindings);
            match &mut target.kind {
                NodeKind::Identifier(data) => {
                    bindings.record(data.mangled_hash, value);
                }
                NodeKind::Index { collection, index } => {
                    // Index targets fold their subexpressions but never
                    // update the bindings map.
                    simplify(collection, bindings);
                    simplify(index, bindings);
                }
                _ => {}
            }
        }
        NodeKind::Binary { op, lhs, rhs } => {
            let op = *op;
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                // The right side may never run; treat it like a branch.
                simplify(lhs, bindings);
                let unchanged = bindings.clone();
                let mut rhs_bindings = bindings.clone();
                simplify(rhs, &mut rhs_bindings);
                bindings.intersect(&[rhs_bindings, unchanged]);
            } else {
                simplify(lhs, bindings);
                simplify(rhs, bindings);
            }
            if let Some(folded) = fold_binary(op, lhs, rhs, location) {
                *node = folded;
            }
        }
        NodeKind::Unary { op, operand } => {
            let op = *op;
            simplify(operand, bindings);
            if let Some(folded) = fold_unary(op, operand, location) {
                *node = folded;
            }
        }
        NodeKind::Cast { target, operand } => {
            let target = *target;
            simplify(operand, bindings);
            if let Some(folded) = fold_cast(target, operand, location) {
                *node = folded;
            }
        }
        NodeKind::FunctionCall { callee, arguments } => {
            for argument in arguments {
                simplify(argument, bindings);
            }
            simplify(callee, bindings);
            // The callee may reassign globals; nothing can be trusted after.
            bindings.invalidate_all();
        }
        NodeKind::Function(data) => {
            // A function body runs in its own frame at some later time;
            // fold it against a fresh map.
            let mut inner = Bindings::new();
            simplify(&mut data.block, &mut inner);
        }
        NodeKind::If {
            condition,
            then_block,
            else_block,
        } => {
            simplify(condition, bindings);
            let mut then_bindings = bindings.clone();
            simplify(then_block, &mut then_bindings);
            match else_block {
                Some(else_block) => {
                    let mut else_bindings = bindings.clone();
                    simplify(else_block, &mut else_bindings);
                    bindings.intersect(&[then_bindings, else_bindings]);
                }
                None => {
                    // The untaken branch leaves the map as-is.
                    let unchanged = bindings.clone();
                    bindings.intersect(&[then_bindings, unchanged]);
                }
            }
        }
        NodeKind::Ternary {
            condition,
            when_true,
            when_false,
        } => {
            simplify(condition, bindings);
            let mut true_bindings = bindings.clone();
            simplify(when_true, &mut true_bindings);
            let mut false_bindings = bindings.clone();
            simplify(when_false, &mut false_bindings);
            bindings.intersect(&[true_bindings, false_bindings]);
        }
        NodeKind::While { condition, block } => {
            let mut assigned = FxHashSet::default();
            collect_assigned(condition, &mut assigned);
            collect_assigned(block, &mut assigned);
            for hash in &assigned {
                bindings.remove(*hash);
            }
            let mut condition_bindings = bindings.clone();
            simplify(condition, &mut condition_bindings);
            let mut block_bindings = bindings.clone();
            simplify(block, &mut block_bindings);
            bindings.intersect(&[condition_bindings, block_bindings]);
        }
        NodeKind::DoWhile { block, condition } => {
            let mut assigned = FxHashSet::default();
            collect_assigned(block, &mut assigned);
            collect_assigned(condition, &mut assigned);
            for hash in &assigned {
                bindings.remove(*hash);
            }
            let mut block_bindings = bindings.clone();
            simplify(block, &mut block_bindings);
            let mut condition_bindings = bindings.clone();
            simplify(condition, &mut condition_bindings);
            bindings.intersect(&[block_bindings, condition_bindings]);
        }
        NodeKind::For {
            init,
            condition,
            update,
            block,
        } => {
            if let Some(init) = init {
                simplify(init, bindings);
            }
            let mut assigned = FxHashSet::default();
            if let Some(condition) = condition.as_deref() {
                collect_assigned(condition, &mut assigned);
            }
            if let Some(update) = update.as_deref() {
                collect_assigned(update, &mut assigned);
            }
            collect_assigned(block, &mut assigned);
            for hash in &assigned {
                bindings.remove(*hash);
            }
            let mut branches = Vec::with_capacity(3);
            if let Some(condition) = condition {
                let mut clone = bindings.clone();
                simplify(condition, &mut clone);
                branches.push(clone);
            }
            if let Some(update) = update {
                let mut clone = bindings.clone();
                simplify(update, &mut clone);
                branches.push(clone);
            }
            let mut block_bindings = bindings.clone();
            simplify(block, &mut block_bindings);
            branches.push(block_bindings);
            bindings.intersect(&branches);
        }
        NodeKind::RangedFor {
            identifier,
            collection,
            block,
            ..
        } => {
            simplify(collection, bindings);
            bindings.remove(identifier.mangled_hash);
            let mut assigned = FxHashSet::default();
            collect_assigned(block, &mut assigned);
            for hash in &assigned {
                bindings.remove(*hash);
            }
            let unchanged = bindings.clone();
            let mut block_bindings = bindings.clone();
            simplify(block, &mut block_bindings);
            bindings.intersect(&[block_bindings, unchanged]);
        }
        NodeKind::Block(statements) => {
            for statement in statements {
                simplify(statement, bindings);
            }
        }
        NodeKind::Print(value) | NodeKind::Return(Some(value)) => simplify(value, bindings),
        NodeKind::Global { hash, value, .. } => {
            let hash = *hash;
            if let Some(value) = value {
                simplify(value, bindings);
                bindings.record(hash, value);
            }
        }
        NodeKind::Array(elements) => {
            for element in elements {
                simplify(element, bindings);
            }
        }
        NodeKind::Map(entries) => {
            for (key, value) in entries {
                simplify(key, bindings);
                simplify(value, bindings);
            }
        }
        NodeKind::Index { collection, index } => {
            simplify(collection, bindings);
            simplify(index, bindings);
        }
        NodeKind::Slice {
            collection,
            start,
            end,
            step,
        } => {
            simplify(collection, bindings);
            for part in [start, end, step].into_iter().flatten() {
                simplify(part, bindings);
            }
        }
        NodeKind::Period { object, .. } => simplify(object, bindings),
        _ => {}
    }
}

/// Record the mangled hash of every identifier assigned anywhere in the
/// subtree: assignment targets, ranged-for loop variables and `global`
/// statements.
fn collect_assigned(node: &Node, out: &mut FxHashSet<u64>) {
    match &node.kind {
        NodeKind::Assign { target, value } => {
            if let NodeKind::Identifier(data) = &target.kind {
                out.insert(data.mangled_hash);
            } else {
                collect_assigned(target, out);
            }
            collect_assigned(value, out);
        }
        NodeKind::Array(elements) => {
            for element in elements {
                collect_assigned(element, out);
            }
        }
        NodeKind::Map(entries) => {
            for (key, value) in entries {
                collect_assigned(key, out);
                collect_assigned(value, out);
            }
        }
        NodeKind::Binary { lhs, rhs, .. } => {
            collect_assigned(lhs, out);
            collect_assigned(rhs, out);
        }
        NodeKind::Unary { operand, .. } | NodeKind::Cast { operand, .. } => {
            collect_assigned(operand, out)
        }
        NodeKind::Index { collection, index } => {
            collect_assigned(collection, out);
            collect_assigned(index, out);
        }
        NodeKind::Slice {
            collection,
            start,
            end,
            step,
        } => {
            collect_assigned(collection, out);
            for part in [start, end, step].into_iter().flatten() {
                collect_assigned(part, out);
            }
        }
        NodeKind::Period { object, .. } => collect_assigned(object, out),
        NodeKind::FunctionCall { callee, arguments } => {
            collect_assigned(callee, out);
            for argument in arguments {
                collect_assigned(argument, out);
            }
        }
        NodeKind::Return(Some(value)) | NodeKind::Print(value) => collect_assigned(value, out),
        NodeKind::Global { hash, value, .. } => {
            out.insert(*hash);
            if let Some(value) = value {
                collect_assigned(value, out);
            }
        }
        NodeKind::If {
            condition,
            then_block,
            else_block,
        } => {
            collect_assigned(condition, out);
            collect_assigned(then_block, out);
            if let Some(else_block) = else_block {
                collect_assigned(else_block, out);
            }
        }
        NodeKind::Ternary {
            condition,
            when_true,
            when_false,
        } => {
            collect_assigned(condition, out);
            collect_assigned(when_true, out);
            collect_assigned(when_false, out);
        }
        NodeKind::While { condition, block } => {
            collect_assigned(condition, out);
            collect_assigned(block, out);
        }
        NodeKind::DoWhile { block, condition } => {
            collect_assigned(block, out);
            collect_assigned(condition, out);
        }
        NodeKind::For {
            init,
            condition,
            update,
            block,
        } => {
            for part in [init, condition, update].into_iter().flatten() {
                collect_assigned(part, out);
            }
            collect_assigned(block, out);
        }
        NodeKind::RangedFor {
            identifier,
            collection,
            block,
            ..
        } => {
            out.insert(identifier.mangled_hash);
            collect_assigned(collection, out);
            collect_assigned(block, out);
        }
        NodeKind::Block(statements) => {
            for statement in statements {
                collect_assigned(statement, out);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Folds
// ---------------------------------------------------------------------------

enum LiteralNumber {
    Integer(i64),
    Float(f64),
}

fn literal_number(node: &Node) -> Option<LiteralNumber> {
    match node.kind {
        NodeKind::Integer(v) => Some(LiteralNumber::Integer(v)),
        NodeKind::Float(v) => Some(LiteralNumber::Float(v)),
        _ => None,
    }
}

fn integer(value: i64, location: crate::ast::Location) -> Node {
    Node::new(NodeKind::Integer(value), location)
}

fn float(value: f64, location: crate::ast::Location) -> Node {
    Node::new(NodeKind::Float(value), location)
}

fn boolean(value: bool, location: crate::ast::Location) -> Node {
    Node::new(NodeKind::Boolean(value), location)
}

fn fold_binary(
    op: BinaryOp,
    lhs: &Node,
    rhs: &Node,
    location: crate::ast::Location,
) -> Option<Node> {
    // Short-circuit operators need only a literal-truthy left side and
    // produce operand values, matching the runtime.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let truthy = lhs.literal_truthiness()?;
        let take_rhs = match op {
            BinaryOp::And => truthy,
            _ => !truthy,
        };
        return Some(if take_rhs { rhs.clone() } else { lhs.clone() });
    }

    if !lhs.is_literal() || !rhs.is_literal() {
        return None;
    }

    // String concatenation; both sides must share the trusted default for
    // the fold to preserve rendering.
    if op == BinaryOp::Add {
        if let (
            NodeKind::String {
                value: a,
                render_type: RenderType::Trusted,
            },
            NodeKind::String {
                value: b,
                render_type: RenderType::Trusted,
            },
        ) = (&lhs.kind, &rhs.kind)
        {
            return Some(Node::new(
                NodeKind::String {
                    value: format!("{a}{b}"),
                    render_type: RenderType::Trusted,
                },
                location,
            ));
        }
    }

    // String comparisons.
    if let (NodeKind::String { value: a, .. }, NodeKind::String { value: b, .. }) =
        (&lhs.kind, &rhs.kind)
    {
        let result = match op {
            BinaryOp::LessThan => a < b,
            BinaryOp::LessThanEqual => a <= b,
            BinaryOp::GreaterThan => a > b,
            BinaryOp::GreaterThanEqual => a >= b,
            BinaryOp::Equal => a == b,
            BinaryOp::NotEqual => a != b,
            _ => return None,
        };
        return Some(boolean(result, location));
    }

    // Equality folds across literal kinds, mirroring the runtime rules.
    if matches!(op, BinaryOp::Equal | BinaryOp::NotEqual) {
        let equal = literal_equals(lhs, rhs)?;
        return Some(boolean(
            if op == BinaryOp::Equal { equal } else { !equal },
            location,
        ));
    }

    let a = literal_number(lhs)?;
    let b = literal_number(rhs)?;
    match (a, b) {
        (LiteralNumber::Integer(a), LiteralNumber::Integer(b)) => match op {
            BinaryOp::Add => Some(integer(a.wrapping_add(b), location)),
            BinaryOp::Subtract => Some(integer(a.wrapping_sub(b), location)),
            BinaryOp::Multiply => Some(integer(a.wrapping_mul(b), location)),
            // Division and modulo by zero stay in the tree so the runtime
            // raises the error.
            BinaryOp::Divide if b != 0 => Some(integer(a.wrapping_div(b), location)),
            BinaryOp::Modulo if b != 0 => Some(integer(a.wrapping_rem(b), location)),
            BinaryOp::LessThan => Some(boolean(a < b, location)),
            BinaryOp::LessThanEqual => Some(boolean(a <= b, location)),
            BinaryOp::GreaterThan => Some(boolean(a > b, location)),
            BinaryOp::GreaterThanEqual => Some(boolean(a >= b, location)),
            _ => None,
        },
        (a, b) => {
            let a = match a {
                LiteralNumber::Integer(v) => v as f64,
                LiteralNumber::Float(v) => v,
            };
            let b = match b {
                LiteralNumber::Integer(v) => v as f64,
                LiteralNumber::Float(v) => v,
            };
            match op {
                BinaryOp::Add => Some(float(a + b, location)),
                BinaryOp::Subtract => Some(float(a - b, location)),
                BinaryOp::Multiply => Some(float(a * b, location)),
                BinaryOp::Divide if b != 0.0 => Some(float(a / b, location)),
                BinaryOp::LessThan => Some(boolean(a < b, location)),
                BinaryOp::LessThanEqual => Some(boolean(a <= b, location)),
                BinaryOp::GreaterThan => Some(boolean(a > b, location)),
                BinaryOp::GreaterThanEqual => Some(boolean(a >= b, location)),
                _ => None,
            }
        }
    }
}

/// Runtime equality over literals. `None` when the pair cannot fold.
fn literal_equals(lhs: &Node, rhs: &Node) -> Option<bool> {
    Some(match (&lhs.kind, &rhs.kind) {
        (NodeKind::Null, NodeKind::Null) => true,
        (NodeKind::Boolean(a), NodeKind::Boolean(b)) => a == b,
        (NodeKind::String { value: a, .. }, NodeKind::String { value: b, .. }) => a == b,
        _ => match (literal_number(lhs), literal_number(rhs)) {
            (Some(LiteralNumber::Integer(a)), Some(LiteralNumber::Integer(b))) => a == b,
            (Some(a), Some(b)) => {
                let a = match a {
                    LiteralNumber::Integer(v) => v as f64,
                    LiteralNumber::Float(v) => v,
                };
                let b = match b {
                    LiteralNumber::Integer(v) => v as f64,
                    LiteralNumber::Float(v) => v,
                };
                a == b
            }
            _ => {
                if lhs.is_literal() && rhs.is_literal() {
                    false
                } else {
                    return None;
                }
            }
        },
    })
}

fn fold_unary(op: UnaryOp, operand: &Node, location: crate::ast::Location) -> Option<Node> {
    match op {
        UnaryOp::Not => operand
            .literal_truthiness()
            .map(|truthy| boolean(!truthy, location)),
        UnaryOp::Negative => match operand.kind {
            NodeKind::Integer(v) => Some(integer(v.wrapping_neg(), location)),
            NodeKind::Float(v) => Some(float(-v, location)),
            _ => None,
        },
    }
}

fn fold_cast(
    target: CastTarget,
    operand: &Node,
    location: crate::ast::Location,
) -> Option<Node> {
    if !operand.is_literal() {
        return None;
    }
    match target {
        CastTarget::Boolean => operand
            .literal_truthiness()
            .map(|truthy| boolean(truthy, location)),
        CastTarget::Integer => match &operand.kind {
            NodeKind::Integer(_) => Some(operand.clone()),
            NodeKind::Float(v) => Some(integer(*v as i64, location)),
            NodeKind::Boolean(b) => Some(integer(*b as i64, location)),
            NodeKind::Null => Some(integer(0, location)),
            // The whole buffer must parse or the cast stays.
            NodeKind::String { value, .. } => {
                value.parse::<i64>().ok().map(|v| integer(v, location))
            }
            _ => None,
        },
        CastTarget::Float => match &operand.kind {
            NodeKind::Float(_) => Some(operand.clone()),
            NodeKind::Integer(v) => Some(float(*v as f64, location)),
            NodeKind::Boolean(b) => Some(float(if *b { 1.0 } else { 0.0 }, location)),
            NodeKind::Null => Some(float(0.0, location)),
            NodeKind::String { value, .. } => {
                value.parse::<f64>().ok().map(|v| float(v, location))
            }
            _ => None,
        },
        CastTarget::String => {
            let text = match &operand.kind {
                NodeKind::String { .. } => return Some(operand.clone()),
                NodeKind::Integer(v) => v.to_string(),
                NodeKind::Float(v) => v.to_string(),
                NodeKind::Boolean(b) => b.to_string(),
                NodeKind::Null => "null".to_string(),
                _ => return None,
            };
            Some(Node::new(
                NodeKind::String {
                    value: text,
                    render_type: RenderType::Trusted,
                },
                location,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::parser::parse;

    fn simplified(source: &str) -> Node {
        let mut root = parse(source).unwrap();
        analyze(&mut root).unwrap();
        let mut bindings = Bindings::new();
        simplify(&mut root, &mut bindings);
        root
    }

    fn statements(root: &Node) -> &[Node] {
        match &root.kind {
            NodeKind::Block(statements) => statements,
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn test_arithmetic_folds() {
        let root = simplified("x = 1 + 2 * 3;");
        let NodeKind::Assign { value, .. } = &statements(&root)[0].kind else {
            panic!()
        };
        assert_eq!(value.kind, NodeKind::Integer(7));
    }

    #[test]
    fn test_mixed_arithmetic_promotes() {
        let root = simplified("x = 1 + 2.5;");
        let NodeKind::Assign { value, .. } = &statements(&root)[0].kind else {
            panic!()
        };
        assert_eq!(value.kind, NodeKind::Float(3.5));
    }

    #[test]
    fn test_divide_by_zero_is_left_intact() {
        let root = simplified("x = 1 / 0; y = 1.1 / 0;");
        for statement in statements(&root) {
            let NodeKind::Assign { value, .. } = &statement.kind else {
                panic!()
            };
            assert!(
                matches!(value.kind, NodeKind::Binary { .. }),
                "division by literal zero must not fold"
            );
        }
    }

    #[test]
    fn test_string_concat_folds() {
        let root = simplified(r#"x = "foo" + "bar";"#);
        let NodeKind::Assign { value, .. } = &statements(&root)[0].kind else {
            panic!()
        };
        assert!(matches!(
            &value.kind,
            NodeKind::String { value, .. } if value == "foobar"
        ));
    }

    #[test]
    fn test_short_circuit_folds() {
        let root = simplified("a = true && 3; b = false && 3; c = false || 5;");
        let folded: Vec<&NodeKind> = statements(&root)
            .iter()
            .map(|s| match &s.kind {
                NodeKind::Assign { value, .. } => &value.kind,
                _ => panic!(),
            })
            .collect();
        assert_eq!(*folded[0], NodeKind::Integer(3));
        assert_eq!(*folded[1], NodeKind::Boolean(false));
        assert_eq!(*folded[2], NodeKind::Integer(5));
    }

    #[test]
    fn test_identifier_propagation() {
        let root = simplified("x = 3; y = x + x * x;");
        let NodeKind::Assign { value, .. } = &statements(&root)[1].kind else {
            panic!()
        };
        assert_eq!(value.kind, NodeKind::Integer(12));
    }

    #[test]
    fn test_string_bindings_not_propagated() {
        let root = simplified(r#"x = "abc"; y = x;"#);
        let NodeKind::Assign { value, .. } = &statements(&root)[1].kind else {
            panic!()
        };
        // Strings are excluded from identifier rewriting.
        assert!(matches!(value.kind, NodeKind::Identifier(_)));
    }

    #[test]
    fn test_branch_assignment_blocks_folding() {
        // x is reassigned only in one branch; the use after the `if` must
        // not fold to either constant.
        let root = simplified("x = 1; if (c) { x = 2; } y = x;");
        let NodeKind::Assign { value, .. } = &statements(&root)[2].kind else {
            panic!()
        };
        assert!(matches!(value.kind, NodeKind::Identifier(_)));
    }

    #[test]
    fn test_agreeing_branches_fold() {
        let root = simplified("x = 1; if (c) { x = 2; } else { x = 2; } y = x;");
        let NodeKind::Assign { value, .. } = &statements(&root)[2].kind else {
            panic!()
        };
        assert_eq!(value.kind, NodeKind::Integer(2));
    }

    #[test]
    fn test_loop_assignment_blocks_folding_inside_body() {
        // i is reassigned in the loop body, so neither the condition nor
        // the body may fold it.
        let root = simplified("i = 0; while (i < 3) { print(i); i = i + 1; }");
        let NodeKind::While { condition, .. } = &statements(&root)[1].kind else {
            panic!()
        };
        assert!(matches!(condition.kind, NodeKind::Binary { .. }));
        let NodeKind::Binary { lhs, .. } = &condition.kind else {
            panic!()
        };
        assert!(matches!(lhs.kind, NodeKind::Identifier(_)));
    }

    #[test]
    fn test_loop_invariant_still_folds_after_loop() {
        let root = simplified("k = 7; i = 0; while (i < 3) { i = i + 1; } y = k;");
        let NodeKind::Assign { value, .. } = &statements(&root)[3].kind else {
            panic!()
        };
        assert_eq!(value.kind, NodeKind::Integer(7));
    }

    #[test]
    fn test_call_invalidates_bindings() {
        let root =
            simplified("function f() { global x; x = 9; } x = 1; f(); y = x;");
        let NodeKind::Assign { value, .. } = &statements(&root)[3].kind else {
            panic!()
        };
        assert!(matches!(value.kind, NodeKind::Identifier(_)));
    }

    #[test]
    fn test_cast_folds() {
        let root = simplified(r#"a = 3.7 as int; b = "42" as int; c = "4x" as int;"#);
        let values: Vec<&NodeKind> = statements(&root)
            .iter()
            .map(|s| match &s.kind {
                NodeKind::Assign { value, .. } => &value.kind,
                _ => panic!(),
            })
            .collect();
        assert_eq!(*values[0], NodeKind::Integer(3));
        assert_eq!(*values[1], NodeKind::Integer(42));
        assert!(matches!(values[2], NodeKind::Cast { .. }));
    }

    #[test]
    fn test_unary_folds() {
        let root = simplified("a = -3; b = !0; c = !3.3;");
        let values: Vec<&NodeKind> = statements(&root)
            .iter()
            .map(|s| match &s.kind {
                NodeKind::Assign { value, .. } => &value.kind,
                _ => panic!(),
            })
            .collect();
        assert_eq!(*values[0], NodeKind::Integer(-3));
        assert_eq!(*values[1], NodeKind::Boolean(true));
        assert_eq!(*values[2], NodeKind::Boolean(false));
    }

    #[test]
    fn test_ternary_branches_intersect() {
        let root = simplified("x = 1; t = c ? (x = 2) : (x = 3); y = x;");
        let NodeKind::Assign { value, .. } = &statements(&root)[2].kind else {
            panic!()
        };
        assert!(matches!(value.kind, NodeKind::Identifier(_)));
    }

    #[test]
    fn test_bindings_intersect_helper() {
        let mut base = Bindings::new();
        let loc = crate::ast::Location::default();
        base.record(1, &integer(10, loc));
        base.record(2, &integer(20, loc));
        let mut b1 = base.clone();
        let mut b2 = base.clone();
        b1.record(1, &integer(11, loc));
        b2.record(1, &integer(11, loc));
        b2.record(2, &integer(99, loc));
        base.intersect(&[b1, b2]);
        assert_eq!(base.len(), 1);
        assert_eq!(base.get(1).unwrap().kind, NodeKind::Integer(11));
    }
}

//! Variable scopes and the semantic analyzer.
//!
//! Scopes live in an arena owned by the analysis result; parent links are
//! indices, so the outermost scope is always index zero. Analysis runs in
//! two passes: the first hoists function declarations and `use` libraries,
//! the second classifies every identifier as local, global, library or
//! function and assigns frame slots.

use rustc_hash::FxHashMap;

use tang_core::{string_hash, RuntimeError};

use crate::ast::{IdentClass, IdentifierData, Location, Node, NodeKind};
use crate::error::CompileError;

/// Resolution result for one declared name.
#[derive(Debug, Clone, Copy)]
pub struct IdentInfo {
    pub class: IdentClass,
    pub mangled_hash: u64,
    pub position: usize,
    pub argument_count: u64,
}

/// One lexical scope. The outermost scope is named `""`; a function scope
/// is named `<parent>/<function>`.
#[derive(Debug, Default)]
pub struct VariableScope {
    pub name: String,
    pub parent: Option<usize>,
    /// Names resolved within this scope, keyed by bare-name hash.
    pub local_declarations: FxHashMap<u64, IdentInfo>,
    /// Local frame slots, keyed by mangled hash.
    pub local_positions: FxHashMap<u64, usize>,
    /// Global names (outermost scope only), keyed by bare-name hash.
    pub global_declarations: FxHashMap<u64, IdentInfo>,
    /// Global frame slots, keyed by mangled hash.
    pub global_positions: FxHashMap<u64, usize>,
    /// Functions declared in this scope: mangled hash → scope index.
    pub function_scopes: FxHashMap<u64, usize>,
    /// Every resolved name by mangled hash (outermost scope only).
    pub identified_variables: FxHashMap<u64, IdentInfo>,
    /// `use` declarations (outermost scope only): bare hash → name.
    pub library_declarations: FxHashMap<u64, String>,
}

/// What a global frame slot holds at program start.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    /// Load the named host library.
    Library { name: String },
    /// A plain variable; initialized to null.
    Variable,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionInfo {
    pub argument_count: u64,
}

/// Output of the semantic pass.
#[derive(Debug)]
pub struct Analysis {
    pub scopes: Vec<VariableScope>,
    /// Global frame initializers, ordered by slot.
    pub globals: Vec<GlobalInit>,
    /// Declared functions by mangled hash.
    pub functions: FxHashMap<u64, FunctionInfo>,
    /// Local slots of the outermost frame (hidden iterator slots).
    pub top_local_count: usize,
}

fn mangle(scope_name: &str, name: &str) -> String {
    if scope_name.is_empty() {
        name.to_string()
    } else {
        format!("{scope_name}/{name}")
    }
}

struct Analyzer {
    scopes: Vec<VariableScope>,
    functions: FxHashMap<u64, FunctionInfo>,
    hidden_counter: usize,
}

/// Run both analysis passes over the tree.
pub fn analyze(root: &mut Node) -> Result<Analysis, CompileError> {
    let mut analyzer = Analyzer {
        scopes: vec![VariableScope {
            name: String::new(),
            ..VariableScope::default()
        }],
        functions: FxHashMap::default(),
        hidden_counter: 0,
    };
    analyzer.collect(root, 0)?;
    analyzer.resolve(root, 0)?;

    let outermost = &analyzer.scopes[0];
    let mut globals = vec![GlobalInit::Variable; outermost.global_positions.len()];
    for (&mangled_hash, &position) in &outermost.global_positions {
        let info = outermost
            .identified_variables
            .get(&mangled_hash)
            .copied()
            .expect("positioned global must be identified");
        if info.class == IdentClass::Library {
            let name = outermost
                .library_declarations
                .get(&mangled_hash)
                .cloned()
                .expect("library global must be declared");
            globals[position] = GlobalInit::Library { name };
        }
    }

    let top_local_count = analyzer.scopes[0].local_positions.len();
    Ok(Analysis {
        globals,
        functions: analyzer.functions,
        top_local_count,
        scopes: analyzer.scopes,
    })
}

impl Analyzer {
    fn error(kind: RuntimeError, name: &str, location: Location) -> CompileError {
        CompileError::Analyze {
            kind,
            name: name.to_string(),
            location,
        }
    }

    // -- pass one: hoist functions and libraries ----------------------------

    fn collect(&mut self, node: &mut Node, scope: usize) -> Result<(), CompileError> {
        let location = node.location;
        match &mut node.kind {
            NodeKind::Function(data) => {
                let mangled_name = mangle(&self.scopes[scope].name, &data.name);
                let mangled_hash = string_hash(&mangled_name);
                if self.functions.contains_key(&mangled_hash) {
                    return Err(Self::error(
                        RuntimeError::FunctionRedeclared,
                        &data.name,
                        location,
                    ));
                }
                let child = self.scopes.len();
                self.scopes.push(VariableScope {
                    name: mangled_name,
                    parent: Some(scope),
                    ..VariableScope::default()
                });
                self.scopes[scope].function_scopes.insert(mangled_hash, child);
                self.functions.insert(
                    mangled_hash,
                    FunctionInfo {
                        argument_count: data.parameters.len() as u64,
                    },
                );
                data.mangled_hash = mangled_hash;
                data.scope_index = child;
                self.collect(&mut data.block, child)?;
            }
            NodeKind::Use { name, hash } => {
                let outermost = &mut self.scopes[0];
                if outermost.library_declarations.contains_key(hash) {
                    return Err(Self::error(
                        RuntimeError::IdentifierRedeclared,
                        name,
                        location,
                    ));
                }
                outermost.library_declarations.insert(*hash, name.clone());
            }
            _ => {
                let mut walker = |child: &mut Node| self.collect(child, scope);
                walk_children(node, &mut walker)?;
            }
        }
        Ok(())
    }

    // -- pass two: classify identifiers and assign slots --------------------

    fn resolve(&mut self, node: &mut Node, scope: usize) -> Result<(), CompileError> {
        let location = node.location;
        match &mut node.kind {
            NodeKind::Identifier(data) => {
                self.resolve_identifier(data, scope, false);
            }
            NodeKind::Assign { target, value } => {
                self.resolve(value, scope)?;
                if let NodeKind::Identifier(data) = &mut target.kind {
                    // A plain assignment declares in the current scope; it
                    // does not write through to an enclosing global unless
                    // a `global` statement bound the name first.
                    self.resolve_identifier(data, scope, true);
                    if data.class == Some(IdentClass::Function) {
                        return Err(Self::error(
                            RuntimeError::IdentifierRedeclared,
                            &data.name,
                            location,
                        ));
                    }
                } else {
                    self.resolve(target, scope)?;
                }
            }
            NodeKind::Function(data) => {
                let child = data.scope_index;
                for parameter in data.parameters.clone() {
                    self.declare_local(child, &parameter);
                }
                let mut block = std::mem::replace(
                    &mut data.block,
                    Box::new(Node::new(NodeKind::Null, location)),
                );
                self.resolve(&mut block, child)?;
                // Re-borrow: the block was detached while the arena mutated.
                if let NodeKind::Function(data) = &mut node.kind {
                    data.block = block;
                    data.local_count = self.scopes[child].local_positions.len();
                }
            }
            NodeKind::RangedFor {
                identifier,
                collection,
                block,
                iterator_slot,
            } => {
                self.resolve(collection, scope)?;
                self.resolve_identifier(identifier, scope, true);
                if identifier.class == Some(IdentClass::Function) {
                    return Err(Self::error(
                        RuntimeError::IdentifierRedeclared,
                        &identifier.name,
                        location,
                    ));
                }
                *iterator_slot = self.declare_hidden_local(scope);
                self.resolve(block, scope)?;
            }
            NodeKind::Global {
                name,
                hash,
                value,
                position,
            } => {
                if let Some(value) = value {
                    self.resolve(value, scope)?;
                }
                if let Some(existing) = self.scopes[scope].local_declarations.get(hash) {
                    if existing.class == IdentClass::Local {
                        return Err(Self::error(
                            RuntimeError::IdentifierRedeclared,
                            name,
                            location,
                        ));
                    }
                }
                let info = self.declare_global(*hash, name);
                *position = info.position;
                self.scopes[scope].local_declarations.insert(*hash, info);
            }
            _ => {
                let mut walker = |child: &mut Node| self.resolve(child, scope);
                walk_children(node, &mut walker)?;
            }
        }
        Ok(())
    }

    /// The five-step resolution order: current scope, globals, libraries,
    /// enclosing function declarations, then declare a new slot. Assignment
    /// targets in inner scopes skip the global and library steps, so a
    /// plain write declares a local while a bare read still sees the
    /// outermost frame.
    fn resolve_identifier(&mut self, data: &mut IdentifierData, scope: usize, is_target: bool) {
        // 1. Already resolved in this scope.
        if let Some(info) = self.scopes[scope].local_declarations.get(&data.hash) {
            apply(data, *info);
            return;
        }
        if scope == 0 || !is_target {
            // 2. A known global.
            if let Some(info) = self.scopes[0].global_declarations.get(&data.hash) {
                apply(data, *info);
                return;
            }
            // 3. A declared library: reserve its global slot on first use.
            if self.scopes[0].library_declarations.contains_key(&data.hash) {
                let position = self.scopes[0].global_positions.len();
                let info = IdentInfo {
                    class: IdentClass::Library,
                    mangled_hash: data.hash,
                    position,
                    argument_count: 0,
                };
                let outermost = &mut self.scopes[0];
                outermost.global_positions.insert(data.hash, position);
                outermost.global_declarations.insert(data.hash, info);
                outermost.identified_variables.insert(data.hash, info);
                apply(data, info);
                return;
            }
        }
        // 4. A function declared in an enclosing scope.
        let mut current = Some(scope);
        while let Some(index) = current {
            let candidate = string_hash(&mangle(&self.scopes[index].name, &data.name));
            if self.scopes[index].function_scopes.contains_key(&candidate) {
                let info = IdentInfo {
                    class: IdentClass::Function,
                    mangled_hash: candidate,
                    position: 0,
                    argument_count: self.functions[&candidate].argument_count,
                };
                self.scopes[scope].local_declarations.insert(data.hash, info);
                apply(data, info);
                return;
            }
            current = self.scopes[index].parent;
        }
        // 5. A new declaration: global in the outermost scope, local
        //    elsewhere.
        let info = if scope == 0 {
            self.declare_global(data.hash, &data.name)
        } else {
            self.declare_local(scope, &data.name)
        };
        apply(data, info);
    }

    fn declare_global(&mut self, hash: u64, _name: &str) -> IdentInfo {
        if let Some(info) = self.scopes[0].global_declarations.get(&hash) {
            return *info;
        }
        let position = self.scopes[0].global_positions.len();
        let info = IdentInfo {
            class: IdentClass::Global,
            mangled_hash: hash,
            position,
            argument_count: 0,
        };
        let outermost = &mut self.scopes[0];
        outermost.global_positions.insert(hash, position);
        outermost.global_declarations.insert(hash, info);
        outermost.identified_variables.insert(hash, info);
        info
    }

    fn declare_local(&mut self, scope: usize, name: &str) -> IdentInfo {
        let bare_hash = string_hash(name);
        if let Some(info) = self.scopes[scope].local_declarations.get(&bare_hash) {
            return *info;
        }
        let mangled_hash = string_hash(&mangle(&self.scopes[scope].name, name));
        let position = self.scopes[scope].local_positions.len();
        let info = IdentInfo {
            class: IdentClass::Local,
            mangled_hash,
            position,
            argument_count: 0,
        };
        let target = &mut self.scopes[scope];
        target.local_positions.insert(mangled_hash, position);
        target.local_declarations.insert(bare_hash, info);
        info
    }

    /// Reserve an anonymous local slot (ranged-for iterators).
    fn declare_hidden_local(&mut self, scope: usize) -> usize {
        let name = format!(".iterator{}", self.hidden_counter);
        self.hidden_counter += 1;
        let mangled_hash = string_hash(&mangle(&self.scopes[scope].name, &name));
        let position = self.scopes[scope].local_positions.len();
        self.scopes[scope]
            .local_positions
            .insert(mangled_hash, position);
        position
    }
}

fn apply(data: &mut IdentifierData, info: IdentInfo) {
    data.class = Some(info.class);
    data.mangled_hash = info.mangled_hash;
    data.position = info.position;
    data.argument_count = info.argument_count;
}

/// Visit every child node once, in evaluation order.
fn walk_children<E>(
    node: &mut Node,
    visit: &mut impl FnMut(&mut Node) -> Result<(), E>,
) -> Result<(), E> {
    match &mut node.kind {
        NodeKind::Array(elements) => {
            for element in elements {
                visit(element)?;
            }
        }
        NodeKind::Map(entries) => {
            for (key, value) in entries {
                visit(key)?;
                visit(value)?;
            }
        }
        NodeKind::Assign { target, value } => {
            visit(value)?;
            visit(target)?;
        }
        NodeKind::Binary { lhs, rhs, .. } => {
            visit(lhs)?;
            visit(rhs)?;
        }
        NodeKind::Unary { operand, .. } | NodeKind::Cast { operand, .. } => visit(operand)?,
        NodeKind::Index { collection, index } => {
            visit(collection)?;
            visit(index)?;
        }
        NodeKind::Slice {
            collection,
            start,
            end,
            step,
        } => {
            visit(collection)?;
            for part in [start, end, step].into_iter().flatten() {
                visit(part)?;
            }
        }
        NodeKind::Period { object, .. } => visit(object)?,
        NodeKind::FunctionCall { callee, arguments } => {
            for argument in arguments {
                visit(argument)?;
            }
            visit(callee)?;
        }
        NodeKind::Function(data) => visit(&mut data.block)?,
        NodeKind::Return(Some(value)) | NodeKind::Print(value) => visit(value)?,
        NodeKind::Global {
            value: Some(value), ..
        } => visit(value)?,
        NodeKind::If {
            condition,
            then_block,
            else_block,
        } => {
            visit(condition)?;
            visit(then_block)?;
            if let Some(else_block) = else_block {
                visit(else_block)?;
            }
        }
        NodeKind::Ternary {
            condition,
            when_true,
            when_false,
        } => {
            visit(condition)?;
            visit(when_true)?;
            visit(when_false)?;
        }
        NodeKind::While { condition, block } => {
            visit(condition)?;
            visit(block)?;
        }
        NodeKind::DoWhile { block, condition } => {
            visit(block)?;
            visit(condition)?;
        }
        NodeKind::For {
            init,
            condition,
            update,
            block,
        } => {
            for part in [init, condition, update].into_iter().flatten() {
                visit(part)?;
            }
            visit(block)?;
        }
        NodeKind::RangedFor {
            collection, block, ..
        } => {
            visit(collection)?;
            visit(block)?;
        }
        NodeKind::Block(statements) => {
            for statement in statements {
                visit(statement)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn analyzed(source: &str) -> (Node, Analysis) {
        let mut root = parse(source).unwrap();
        let analysis = analyze(&mut root).unwrap();
        (root, analysis)
    }

    fn find_identifiers<'a>(node: &'a Node, name: &str, out: &mut Vec<&'a IdentifierData>) {
        if let NodeKind::Identifier(data) = &node.kind {
            if data.name == name {
                out.push(data);
            }
        }
        // A read-only walk is enough for tests.
        match &node.kind {
            NodeKind::Block(statements) => {
                for s in statements {
                    find_identifiers(s, name, out);
                }
            }
            NodeKind::Assign { target, value } => {
                find_identifiers(target, name, out);
                find_identifiers(value, name, out);
            }
            NodeKind::Binary { lhs, rhs, .. } => {
                find_identifiers(lhs, name, out);
                find_identifiers(rhs, name, out);
            }
            NodeKind::Print(value) | NodeKind::Return(Some(value)) => {
                find_identifiers(value, name, out)
            }
            NodeKind::Function(data) => find_identifiers(&data.block, name, out),
            NodeKind::FunctionCall { callee, arguments } => {
                find_identifiers(callee, name, out);
                for a in arguments {
                    find_identifiers(a, name, out);
                }
            }
            NodeKind::If {
                condition,
                then_block,
                else_block,
            } => {
                find_identifiers(condition, name, out);
                find_identifiers(then_block, name, out);
                if let Some(e) = else_block {
                    find_identifiers(e, name, out);
                }
            }
            _ => {}
        }
    }

    #[test]
    fn test_outermost_variables_are_globals() {
        let (root, analysis) = analyzed("x = 3; print(x);");
        let mut found = Vec::new();
        find_identifiers(&root, "x", &mut found);
        assert_eq!(found.len(), 2);
        for data in found {
            assert_eq!(data.class, Some(IdentClass::Global));
            assert_eq!(data.position, 0);
        }
        assert_eq!(analysis.globals, vec![GlobalInit::Variable]);
    }

    #[test]
    fn test_function_reads_outer_global() {
        let (root, _) =
            analyzed("x = 3; function f(z) { y = x + 1; y = y + z; return y; } print(f(4));");
        let mut xs = Vec::new();
        find_identifiers(&root, "x", &mut xs);
        // Both the top-level declaration and the read inside `f`.
        assert!(xs.iter().all(|d| d.class == Some(IdentClass::Global)));

        let mut ys = Vec::new();
        find_identifiers(&root, "y", &mut ys);
        assert!(ys.iter().all(|d| d.class == Some(IdentClass::Local)));

        let mut zs = Vec::new();
        find_identifiers(&root, "z", &mut zs);
        assert_eq!(zs[0].class, Some(IdentClass::Local));
        assert_eq!(zs[0].position, 0); // first parameter

        // y lands after the parameter slot.
        assert_eq!(ys[0].position, 1);
    }

    #[test]
    fn test_function_identifier_class() {
        let (root, analysis) = analyzed("function f() { return 1; } print(f());");
        let mut fs = Vec::new();
        find_identifiers(&root, "f", &mut fs);
        assert_eq!(fs.len(), 1);
        assert_eq!(fs[0].class, Some(IdentClass::Function));
        assert_eq!(analysis.functions.len(), 1);
    }

    #[test]
    fn test_library_reference_reserves_slot() {
        let (root, analysis) = analyzed("use random; print(random);");
        let mut rs = Vec::new();
        find_identifiers(&root, "random", &mut rs);
        assert_eq!(rs[0].class, Some(IdentClass::Library));
        assert_eq!(
            analysis.globals,
            vec![GlobalInit::Library {
                name: "random".to_string()
            }]
        );
    }

    #[test]
    fn test_unreferenced_library_gets_no_slot() {
        let (_, analysis) = analyzed("use random; x = 1;");
        // Only the variable slot; the library was never referenced.
        assert_eq!(analysis.globals, vec![GlobalInit::Variable]);
    }

    #[test]
    fn test_function_redeclaration() {
        let mut root = parse("function f() { return 1; } function f() { return 2; }").unwrap();
        let error = analyze(&mut root).unwrap_err();
        assert!(matches!(
            error,
            CompileError::Analyze {
                kind: RuntimeError::FunctionRedeclared,
                ..
            }
        ));
    }

    #[test]
    fn test_assignment_to_function_rejected() {
        let mut root = parse("function f() { return 1; } f = 3;").unwrap();
        let error = analyze(&mut root).unwrap_err();
        assert!(matches!(
            error,
            CompileError::Analyze {
                kind: RuntimeError::IdentifierRedeclared,
                ..
            }
        ));
    }

    #[test]
    fn test_recursion_resolves() {
        let (root, _) = analyzed(
            "function fib(n) { if (n <= 2) { return 1; } return fib(n - 1) + fib(n - 2); } print(fib(10));",
        );
        let mut fibs = Vec::new();
        find_identifiers(&root, "fib", &mut fibs);
        assert!(fibs.len() >= 3);
        assert!(fibs.iter().all(|d| d.class == Some(IdentClass::Function)));
        assert!(fibs.iter().all(|d| d.argument_count == 1));
    }

    #[test]
    fn test_ranged_for_reserves_hidden_slot() {
        let (root, analysis) = analyzed("for (v : [1, 2]) { print(v); }");
        assert_eq!(analysis.top_local_count, 1);
        fn find_ranged(node: &Node) -> Option<&Node> {
            match &node.kind {
                NodeKind::RangedFor { .. } => Some(node),
                NodeKind::Block(statements) => statements.iter().find_map(find_ranged),
                _ => None,
            }
        }
        let ranged = find_ranged(&root).unwrap();
        let NodeKind::RangedFor { identifier, .. } = &ranged.kind else {
            unreachable!()
        };
        // The loop variable itself is a global at top level.
        assert_eq!(identifier.class, Some(IdentClass::Global));
    }

    #[test]
    fn test_global_statement_in_function() {
        let (root, _) = analyzed("a = 1; function foo() { global a; a = 2; } foo();");
        let mut all = Vec::new();
        find_identifiers(&root, "a", &mut all);
        assert!(all.iter().all(|d| d.class == Some(IdentClass::Global)));
        assert!(all.iter().all(|d| d.position == 0));
    }

    #[test]
    fn test_scope_positions_are_disjoint() {
        let (_, analysis) = analyzed(
            "function f(a, b) { c = 1; return a + b + c; } function g(x) { return x; } f(1, 2); g(3);",
        );
        // f: a, b, c. g: x.
        let f_scope = analysis
            .scopes
            .iter()
            .find(|s| s.name == "f")
            .expect("scope for f");
        assert_eq!(f_scope.local_positions.len(), 3);
        let g_scope = analysis
            .scopes
            .iter()
            .find(|s| s.name == "g")
            .expect("scope for g");
        assert_eq!(g_scope.local_positions.len(), 1);
        let positions: Vec<usize> = f_scope.local_positions.values().copied().collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);
    }
}

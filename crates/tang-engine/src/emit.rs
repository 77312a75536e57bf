//! Single-pass bytecode emission.
//!
//! Statements leave exactly one value on the operand stack; blocks keep the
//! last statement's value and pop the rest. Conditional jumps test the top
//! of stack without consuming it, so every branch emits an explicit `Pop`
//! on the path it takes and control-flow constructs always leave a valid
//! value. `break` and `continue` push null before jumping so the stack
//! stays balanced; outside a loop both jump to the end of the current
//! compilation unit.

use rustc_hash::FxHashMap;
use tang_core::unicode::RenderType;

use crate::analyze::{Analysis, GlobalInit};
use crate::ast::{BinaryOp, IdentClass, IdentifierData, Node, NodeKind, UnaryOp};
use crate::bytecode::{Bytecode, ConstantPool, LabelTable, Opcode, Word};

pub struct BytecodeCompiler<'p> {
    code: Vec<Word>,
    labels: LabelTable,
    /// Function body labels by mangled hash; created on first reference.
    function_labels: FxHashMap<u64, usize>,
    /// Absolute-offset patch sites (function value immediates).
    function_refs: Vec<(usize, usize)>,
    break_label: Option<usize>,
    continue_label: Option<usize>,
    /// End of the current compilation unit (program or function body).
    end_label: usize,
    pool: &'p mut ConstantPool,
}

/// Compile the analyzed program to bytecode. `None` on failure.
pub fn compile_bytecode(
    root: &Node,
    analysis: &Analysis,
    pool: &mut ConstantPool,
) -> Option<Bytecode> {
    let mut labels = LabelTable::new();
    let end_label = labels.get_label();
    let mut compiler = BytecodeCompiler {
        code: Vec::with_capacity(256),
        labels,
        function_labels: FxHashMap::default(),
        function_refs: Vec::new(),
        break_label: None,
        continue_label: None,
        end_label,
        pool,
    };

    // Global frame: libraries load on first reference, everything else
    // starts null.
    for global in &analysis.globals {
        match global {
            GlobalInit::Library { name } => {
                let index = compiler.pool.intern(name, RenderType::Trusted);
                compiler.op(Opcode::LoadLibrary);
                compiler.uint(index as u64);
                compiler.op(Opcode::SetNotTemp);
            }
            GlobalInit::Variable => compiler.op(Opcode::PushNull),
        }
    }
    compiler.op(Opcode::MarkFp);
    for _ in 0..analysis.top_local_count {
        compiler.op(Opcode::PushNull);
    }

    if !compiler.emit(root) {
        return None;
    }
    let here = compiler.here();
    compiler.labels.set_label(end_label, here);
    compiler.op(Opcode::Return);

    let BytecodeCompiler {
        mut code,
        labels,
        function_refs,
        ..
    } = compiler;

    // Relative jump displacements: target − operand-site − word-size.
    if !labels.finalize(|site, target| {
        code[site] = Word::Int(target as i64 - site as i64 - 1);
        true
    }) {
        return None;
    }
    // Function immediates are absolute body offsets.
    for (site, label) in function_refs {
        let target = labels.target_of(label)?;
        code[site] = Word::UInt(target as u64);
    }
    Some(Bytecode { code })
}

impl<'p> BytecodeCompiler<'p> {
    fn op(&mut self, op: Opcode) {
        self.code.push(Word::Op(op));
    }

    fn uint(&mut self, value: u64) {
        self.code.push(Word::UInt(value));
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    /// Emit a jump with a placeholder displacement to be backpatched.
    fn jump(&mut self, op: Opcode, label: usize) {
        self.op(op);
        let site = self.code.len();
        self.code.push(Word::Int(0));
        self.labels.add_jump(label, site);
    }

    fn function_label(&mut self, mangled_hash: u64) -> usize {
        if let Some(&label) = self.function_labels.get(&mangled_hash) {
            return label;
        }
        let label = self.labels.get_label();
        self.function_labels.insert(mangled_hash, label);
        label
    }

    fn intern(&mut self, text: &str) -> u64 {
        self.pool.intern(text, RenderType::Trusted) as u64
    }

    /// Store the top of stack into the identifier's slot (value stays).
    fn store(&mut self, data: &IdentifierData) -> bool {
        match data.class {
            Some(IdentClass::Local) => {
                self.op(Opcode::PokeLocal);
                self.uint(data.position as u64);
                true
            }
            Some(IdentClass::Global) | Some(IdentClass::Library) => {
                self.op(Opcode::PokeGlobal);
                self.uint(data.position as u64);
                true
            }
            _ => false,
        }
    }

    pub fn emit(&mut self, node: &Node) -> bool {
        match &node.kind {
            NodeKind::Null => {
                self.op(Opcode::PushNull);
                true
            }
            NodeKind::Boolean(value) => {
                self.op(Opcode::PushBoolean);
                self.uint(*value as u64);
                true
            }
            NodeKind::Integer(value) => {
                self.op(Opcode::PushInteger);
                self.code.push(Word::Int(*value));
                true
            }
            NodeKind::Float(value) => {
                self.op(Opcode::PushFloat);
                self.code.push(Word::Float(*value));
                true
            }
            NodeKind::String { value, render_type } => {
                let index = self.pool.intern(value, *render_type) as u64;
                self.op(Opcode::PushString);
                self.uint(index);
                true
            }
            NodeKind::Identifier(data) => match data.class {
                Some(IdentClass::Local) => {
                    self.op(Opcode::PeekLocal);
                    self.uint(data.position as u64);
                    true
                }
                Some(IdentClass::Global) | Some(IdentClass::Library) => {
                    self.op(Opcode::PeekGlobal);
                    self.uint(data.position as u64);
                    true
                }
                Some(IdentClass::Function) => {
                    let label = self.function_label(data.mangled_hash);
                    self.op(Opcode::PushFunction);
                    self.uint(data.argument_count);
                    let site = self.code.len();
                    self.code.push(Word::UInt(0));
                    self.function_refs.push((site, label));
                    true
                }
                None => false,
            },
            NodeKind::Array(elements) => {
                for element in elements {
                    if !self.emit(element) {
                        return false;
                    }
                }
                self.op(Opcode::PushArray);
                self.uint(elements.len() as u64);
                true
            }
            NodeKind::Map(entries) => {
                for (key, value) in entries {
                    if !self.emit(key) || !self.emit(value) {
                        return false;
                    }
                }
                self.op(Opcode::PushMap);
                self.uint(entries.len() as u64);
                true
            }
            NodeKind::Assign { target, value } => match &target.kind {
                NodeKind::Identifier(data) => {
                    if !self.emit(value) {
                        return false;
                    }
                    self.op(Opcode::Adopt);
                    self.store(data)
                }
                NodeKind::Index { collection, index } => {
                    if !self.emit(value) {
                        return false;
                    }
                    self.op(Opcode::Adopt);
                    if !self.emit(collection) || !self.emit(index) {
                        return false;
                    }
                    self.op(Opcode::AssignIndex);
                    true
                }
                _ => false,
            },
            NodeKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    if !self.emit(lhs) {
                        return false;
                    }
                    let end = self.labels.get_label();
                    self.jump(Opcode::Jmpf, end);
                    self.op(Opcode::Pop);
                    if !self.emit(rhs) {
                        return false;
                    }
                    let here = self.here();
                    self.labels.set_label(end, here);
                    true
                }
                BinaryOp::Or => {
                    if !self.emit(lhs) {
                        return false;
                    }
                    let end = self.labels.get_label();
                    self.jump(Opcode::Jmpt, end);
                    self.op(Opcode::Pop);
                    if !self.emit(rhs) {
                        return false;
                    }
                    let here = self.here();
                    self.labels.set_label(end, here);
                    true
                }
                _ => {
                    if !self.emit(lhs) || !self.emit(rhs) {
                        return false;
                    }
                    self.op(match op {
                        BinaryOp::Add => Opcode::Add,
                        BinaryOp::Subtract => Opcode::Subtract,
                        BinaryOp::Multiply => Opcode::Multiply,
                        BinaryOp::Divide => Opcode::Divide,
                        BinaryOp::Modulo => Opcode::Modulo,
                        BinaryOp::LessThan => Opcode::LessThan,
                        BinaryOp::LessThanEqual => Opcode::LessThanEqual,
                        BinaryOp::GreaterThan => Opcode::GreaterThan,
                        BinaryOp::GreaterThanEqual => Opcode::GreaterThanEqual,
                        BinaryOp::Equal => Opcode::Equal,
                        BinaryOp::NotEqual => Opcode::NotEqual,
                        BinaryOp::And | BinaryOp::Or => unreachable!(),
                    });
                    true
                }
            },
            NodeKind::Unary { op, operand } => {
                if !self.emit(operand) {
                    return false;
                }
                self.op(match op {
                    UnaryOp::Negative => Opcode::Negative,
                    UnaryOp::Not => Opcode::Not,
                });
                true
            }
            NodeKind::Cast { target, operand } => {
                if !self.emit(operand) {
                    return false;
                }
                self.op(Opcode::Cast);
                self.uint(*target as u64);
                true
            }
            NodeKind::Index { collection, index } => {
                if !self.emit(collection) || !self.emit(index) {
                    return false;
                }
                self.op(Opcode::Index);
                true
            }
            NodeKind::Slice {
                collection,
                start,
                end,
                step,
            } => {
                if !self.emit(collection) {
                    return false;
                }
                for part in [start, end, step] {
                    match part {
                        Some(part) => {
                            if !self.emit(part) {
                                return false;
                            }
                        }
                        None => self.op(Opcode::PushNull),
                    }
                }
                self.op(Opcode::Slice);
                true
            }
            NodeKind::Period { object, name, .. } => {
                if !self.emit(object) {
                    return false;
                }
                let index = self.intern(name);
                self.op(Opcode::Period);
                self.uint(index);
                true
            }
            NodeKind::FunctionCall { callee, arguments } => {
                for argument in arguments {
                    if !self.emit(argument) {
                        return false;
                    }
                }
                if !self.emit(callee) {
                    return false;
                }
                self.op(Opcode::CallFunc);
                self.uint(arguments.len() as u64);
                true
            }
            NodeKind::Function(data) => {
                let after = self.labels.get_label();
                self.jump(Opcode::Jmp, after);

                let body_label = self.function_label(data.mangled_hash);
                let here = self.here();
                self.labels.set_label(body_label, here);
                // Parameters occupy the first slots; reserve the rest.
                for _ in data.parameters.len()..data.local_count {
                    self.op(Opcode::PushNull);
                }

                let saved = (self.end_label, self.break_label, self.continue_label);
                let function_end = self.labels.get_label();
                self.end_label = function_end;
                self.break_label = None;
                self.continue_label = None;
                let ok = self.emit(&data.block);
                let here = self.here();
                self.labels.set_label(function_end, here);
                self.op(Opcode::Pop);
                self.op(Opcode::PushNull);
                self.op(Opcode::Return);
                (self.end_label, self.break_label, self.continue_label) = saved;
                if !ok {
                    return false;
                }

                let here = self.here();
                self.labels.set_label(after, here);
                // The declaration itself evaluates to null.
                self.op(Opcode::PushNull);
                true
            }
            NodeKind::Return(value) => {
                match value {
                    Some(value) => {
                        if !self.emit(value) {
                            return false;
                        }
                    }
                    None => self.op(Opcode::PushNull),
                }
                self.op(Opcode::Return);
                true
            }
            NodeKind::Print(value) => {
                if !self.emit(value) {
                    return false;
                }
                self.op(Opcode::Print);
                true
            }
            // Libraries load during the global prologue.
            NodeKind::Use { .. } => {
                self.op(Opcode::PushNull);
                true
            }
            NodeKind::Global { value, position, .. } => {
                match value {
                    Some(value) => {
                        if !self.emit(value) {
                            return false;
                        }
                        self.op(Opcode::Adopt);
                        self.op(Opcode::PokeGlobal);
                        self.uint(*position as u64);
                    }
                    None => self.op(Opcode::PushNull),
                }
                true
            }
            NodeKind::If {
                condition,
                then_block,
                else_block,
            } => {
                if !self.emit(condition) {
                    return false;
                }
                let else_label = self.labels.get_label();
                let end = self.labels.get_label();
                self.jump(Opcode::Jmpf, else_label);
                self.op(Opcode::Pop);
                if !self.emit(then_block) {
                    return false;
                }
                self.jump(Opcode::Jmp, end);
                let here = self.here();
                self.labels.set_label(else_label, here);
                self.op(Opcode::Pop);
                match else_block {
                    Some(else_block) => {
                        if !self.emit(else_block) {
                            return false;
                        }
                    }
                    None => self.op(Opcode::PushNull),
                }
                let here = self.here();
                self.labels.set_label(end, here);
                true
            }
            NodeKind::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                if !self.emit(condition) {
                    return false;
                }
                let false_label = self.labels.get_label();
                let end = self.labels.get_label();
                self.jump(Opcode::Jmpf, false_label);
                self.op(Opcode::Pop);
                if !self.emit(when_true) {
                    return false;
                }
                self.jump(Opcode::Jmp, end);
                let here = self.here();
                self.labels.set_label(false_label, here);
                self.op(Opcode::Pop);
                if !self.emit(when_false) {
                    return false;
                }
                let here = self.here();
                self.labels.set_label(end, here);
                true
            }
            NodeKind::While { condition, block } => {
                let start = self.labels.get_label();
                let end = self.labels.get_label();
                self.op(Opcode::PushNull);
                let here = self.here();
                self.labels.set_label(start, here);
                self.op(Opcode::Pop);
                if !self.emit(condition) {
                    return false;
                }
                self.jump(Opcode::Jmpf, end);
                self.op(Opcode::Pop);
                let ok = self.loop_body(block, end, start);
                if !ok {
                    return false;
                }
                self.jump(Opcode::Jmp, start);
                let here = self.here();
                self.labels.set_label(end, here);
                true
            }
            NodeKind::DoWhile { block, condition } => {
                let start = self.labels.get_label();
                let continue_label = self.labels.get_label();
                let end = self.labels.get_label();
                self.op(Opcode::PushNull);
                let here = self.here();
                self.labels.set_label(start, here);
                self.op(Opcode::Pop);
                if !self.loop_body(block, end, continue_label) {
                    return false;
                }
                let here = self.here();
                self.labels.set_label(continue_label, here);
                self.op(Opcode::Pop);
                if !self.emit(condition) {
                    return false;
                }
                self.jump(Opcode::Jmpt, start);
                let here = self.here();
                self.labels.set_label(end, here);
                true
            }
            NodeKind::For {
                init,
                condition,
                update,
                block,
            } => {
                if let Some(init) = init {
                    if !self.emit(init) {
                        return false;
                    }
                    self.op(Opcode::Pop);
                }
                let start = self.labels.get_label();
                let continue_label = self.labels.get_label();
                let end = self.labels.get_label();
                self.op(Opcode::PushNull);
                let here = self.here();
                self.labels.set_label(start, here);
                self.op(Opcode::Pop);
                match condition {
                    Some(condition) => {
                        if !self.emit(condition) {
                            return false;
                        }
                    }
                    None => {
                        self.op(Opcode::PushBoolean);
                        self.uint(1);
                    }
                }
                self.jump(Opcode::Jmpf, end);
                self.op(Opcode::Pop);
                if !self.loop_body(block, end, continue_label) {
                    return false;
                }
                let here = self.here();
                self.labels.set_label(continue_label, here);
                self.op(Opcode::Pop);
                match update {
                    Some(update) => {
                        if !self.emit(update) {
                            return false;
                        }
                    }
                    None => self.op(Opcode::PushNull),
                }
                self.jump(Opcode::Jmp, start);
                let here = self.here();
                self.labels.set_label(end, here);
                true
            }
            NodeKind::RangedFor {
                identifier,
                collection,
                block,
                iterator_slot,
            } => {
                if !self.emit(collection) {
                    return false;
                }
                let start = self.labels.get_label();
                let cleanup = self.labels.get_label();
                let after = self.labels.get_label();
                self.op(Opcode::Iterator);
                self.uint(*iterator_slot as u64);
                // Not iterable: the false discriminant becomes the value.
                self.jump(Opcode::Jmpf, after);
                self.op(Opcode::Pop);
                self.op(Opcode::PushNull);
                let here = self.here();
                self.labels.set_label(start, here);
                self.op(Opcode::Pop);
                self.op(Opcode::IteratorNext);
                self.uint(*iterator_slot as u64);
                self.jump(Opcode::Jmpf, cleanup);
                self.op(Opcode::Pop);
                self.op(Opcode::Adopt);
                if !self.store(identifier) {
                    return false;
                }
                self.op(Opcode::Pop);
                if !self.loop_body(block, after, start) {
                    return false;
                }
                self.jump(Opcode::Jmp, start);
                let here = self.here();
                self.labels.set_label(cleanup, here);
                self.op(Opcode::Pop);
                self.op(Opcode::Pop);
                self.op(Opcode::PushNull);
                let here = self.here();
                self.labels.set_label(after, here);
                true
            }
            NodeKind::Break => {
                self.op(Opcode::PushNull);
                let target = self.break_label.unwrap_or(self.end_label);
                self.jump(Opcode::Jmp, target);
                true
            }
            NodeKind::Continue => {
                self.op(Opcode::PushNull);
                let target = self.continue_label.unwrap_or(self.end_label);
                self.jump(Opcode::Jmp, target);
                true
            }
            NodeKind::Block(statements) => {
                if statements.is_empty() {
                    self.op(Opcode::PushNull);
                    return true;
                }
                let last = statements.len() - 1;
                for (i, statement) in statements.iter().enumerate() {
                    if !self.emit(statement) {
                        return false;
                    }
                    if i < last {
                        self.op(Opcode::Pop);
                    }
                }
                true
            }
            NodeKind::ParseError { .. } => false,
        }
    }

    /// Emit a loop body with the break/continue labels installed, restoring
    /// the surrounding pair afterwards.
    fn loop_body(&mut self, block: &Node, break_label: usize, continue_label: usize) -> bool {
        let saved = (self.break_label, self.continue_label);
        self.break_label = Some(break_label);
        self.continue_label = Some(continue_label);
        let ok = self.emit(block);
        (self.break_label, self.continue_label) = saved;
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::parser::parse;

    fn compile(source: &str) -> Bytecode {
        let mut root = parse(source).unwrap();
        let analysis = analyze(&mut root).unwrap();
        let mut pool = ConstantPool::new();
        compile_bytecode(&root, &analysis, &mut pool).unwrap()
    }

    fn jump_displacements(bytecode: &Bytecode) -> Vec<(usize, i64)> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytecode.code.len() {
            if let Word::Op(op) = bytecode.code[i] {
                if matches!(op, Opcode::Jmp | Opcode::Jmpf | Opcode::Jmpt) {
                    if let Word::Int(d) = bytecode.code[i + 1] {
                        out.push((i + 1, d));
                    }
                }
                i += 1 + crate::bytecode::operand_count(op);
            } else {
                i += 1;
            }
        }
        out
    }

    #[test]
    fn test_program_ends_with_return() {
        let bytecode = compile("1;");
        assert_eq!(*bytecode.code.last().unwrap(), Word::Op(Opcode::Return));
    }

    #[test]
    fn test_every_jump_lands_on_an_instruction_boundary() {
        let bytecode = compile(
            "i = 0; while (i < 3) { if (i == 1) { print(i); } i = i + 1; } print(\"done\");",
        );
        // Collect the set of instruction-start offsets.
        let mut starts = std::collections::HashSet::new();
        let mut i = 0;
        while i < bytecode.code.len() {
            starts.insert(i);
            match bytecode.code[i] {
                Word::Op(op) => i += 1 + crate::bytecode::operand_count(op),
                _ => panic!("stray operand at {i}"),
            }
        }
        starts.insert(bytecode.code.len());
        for (site, displacement) in jump_displacements(&bytecode) {
            let target = (site as i64 + 1 + displacement) as usize;
            assert!(
                starts.contains(&target),
                "jump at {site} lands inside an instruction (target {target})"
            );
        }
    }

    #[test]
    fn test_assignment_adopts_before_store() {
        let bytecode = compile("x = 3;");
        let ops: Vec<Opcode> = bytecode
            .code
            .iter()
            .filter_map(|w| match w {
                Word::Op(op) => Some(*op),
                _ => None,
            })
            .collect();
        let adopt = ops.iter().position(|&o| o == Opcode::Adopt).unwrap();
        let poke = ops.iter().position(|&o| o == Opcode::PokeGlobal).unwrap();
        assert!(adopt < poke);
    }

    #[test]
    fn test_library_prologue() {
        let bytecode = compile("use random; print(random);");
        assert_eq!(bytecode.code[0], Word::Op(Opcode::LoadLibrary));
        assert_eq!(bytecode.code[2], Word::Op(Opcode::SetNotTemp));
    }

    #[test]
    fn test_function_emits_jump_over_body() {
        let bytecode = compile("function f() { return 1; } print(f());");
        assert!(bytecode
            .code
            .iter()
            .any(|w| matches!(w, Word::Op(Opcode::PushFunction))));
        assert!(bytecode
            .code
            .iter()
            .any(|w| matches!(w, Word::Op(Opcode::CallFunc))));
    }
}

//! The x86_64 native code generator.
//!
//! The same single-pass AST traversal as the bytecode generator, emitting
//! machine code instead of tagged words. Register discipline, fixed in the
//! prologue: `r15` holds the execution context, `r14` the address of the
//! context's result slot, `r13` the global frame base and `r12` the local
//! frame base. Globals and locals live on the machine stack below their
//! base registers; every value-producing node ends with its result in
//! `rax`; every runtime call is bracketed with a 16-byte stack alignment.
//!
//! Script function declarations and calls are declined: `emit` returns
//! false, the caller discards the buffer, and the program runs on the
//! bytecode path instead.

mod asm;
mod memory;

pub use memory::{ExecutableMemory, NativeEntry};

use std::mem::offset_of;

use tang_core::context::ExecutionContext;
use tang_core::error::RuntimeError;
use tang_core::unicode::UnicodeString;
use tang_core::value::{
    self, boolean_singleton, error_singleton, null_singleton, string_hash, Value,
};

use crate::analyze::{Analysis, GlobalInit};
use crate::ast::{BinaryOp, IdentClass, IdentifierData, Node, NodeKind, UnaryOp};
use crate::bytecode::ConstantPool;

use asm::{Assembler, Reg};

// Typed address takers; a fn item only converts to an integer through its
// fn-pointer type.
fn addr_unary(f: extern "C" fn(*mut Value, *mut ExecutionContext) -> *mut Value) -> u64 {
    f as usize as u64
}

fn addr_binary(
    f: extern "C" fn(*mut Value, *mut Value, *mut ExecutionContext) -> *mut Value,
) -> u64 {
    f as usize as u64
}

fn addr_with_u64(
    f: extern "C" fn(*mut Value, u64, *mut ExecutionContext) -> *mut Value,
) -> u64 {
    f as usize as u64
}

fn addr_new_i64(f: extern "C" fn(i64, *mut ExecutionContext) -> *mut Value) -> u64 {
    f as usize as u64
}

fn addr_new_u64(f: extern "C" fn(u64, *mut ExecutionContext) -> *mut Value) -> u64 {
    f as usize as u64
}

fn addr_new_string(
    f: extern "C" fn(*const UnicodeString, *mut ExecutionContext) -> *mut Value,
) -> u64 {
    f as usize as u64
}

fn addr_three(
    f: extern "C" fn(*mut Value, *mut Value, *mut Value, *mut ExecutionContext) -> *mut Value,
) -> u64 {
    f as usize as u64
}

fn addr_slice(
    f: extern "C" fn(
        *mut Value,
        *mut Value,
        *mut Value,
        *mut Value,
        *mut ExecutionContext,
    ) -> *mut Value,
) -> u64 {
    f as usize as u64
}

fn addr_call(
    f: extern "C" fn(*mut Value, *const *mut Value, u64, *mut ExecutionContext) -> *mut Value,
) -> u64 {
    f as usize as u64
}

const IS_TRUE: u8 = offset_of!(Value, is_true) as u8;
const IS_ERROR: u8 = offset_of!(Value, is_error) as u8;
const IS_TEMPORARY: u8 = offset_of!(Value, is_temporary) as u8;
const IS_SINGLETON: u8 = offset_of!(Value, is_singleton) as u8;

fn slot_displacement(position: usize) -> i32 {
    -8 * (position as i32 + 1)
}

pub struct NativeCompiler<'p> {
    asm: Assembler,
    pool: &'p mut ConstantPool,
    break_label: Option<usize>,
    continue_label: Option<usize>,
    end_label: usize,
    oom_label: usize,
}

/// Compile the analyzed program to native code. `None` when the program
/// uses a construct the generator declines or the buffer cannot be made
/// executable; the caller then falls back to bytecode.
pub fn compile_native(
    root: &Node,
    analysis: &Analysis,
    pool: &mut ConstantPool,
) -> Option<ExecutableMemory> {
    let mut asm = Assembler::new();
    let end_label = asm.get_label();
    let oom_label = asm.get_label();
    let mut compiler = NativeCompiler {
        asm,
        pool,
        break_label: None,
        continue_label: None,
        end_label,
        oom_label,
    };

    // Prologue: save callee-saved registers, pin the context registers.
    let asm = &mut compiler.asm;
    asm.push(Reg::Rbp);
    asm.mov_reg_reg(Reg::Rbp, Reg::Rsp);
    asm.push(Reg::Rbx);
    asm.push(Reg::R12);
    asm.push(Reg::R13);
    asm.push(Reg::R14);
    asm.push(Reg::R15);
    asm.mov_reg_reg(Reg::R15, Reg::Rdi);
    asm.lea(
        Reg::R14,
        Reg::R15,
        offset_of!(ExecutionContext, result) as i32,
    );
    asm.mov_reg_reg(Reg::R13, Reg::Rsp);

    // Global frame, pushed below r13 in slot order.
    for global in &analysis.globals {
        match global {
            GlobalInit::Library { name } => {
                let hash = string_hash(name);
                let asm = &mut compiler.asm;
                asm.mov_reg_imm64(Reg::Rdi, hash);
                asm.mov_reg_reg(Reg::Rsi, Reg::R15);
                asm.call_absolute(addr_new_u64(value::value_library_load));
                compiler.clear_temporary_flag();
                compiler.asm.push(Reg::Rax);
            }
            GlobalInit::Variable => {
                let asm = &mut compiler.asm;
                asm.mov_reg_imm64(Reg::Rax, null_singleton() as u64);
                asm.push(Reg::Rax);
            }
        }
    }

    // Local frame base, then the outermost frame's hidden slots.
    compiler.asm.mov_reg_reg(Reg::R12, Reg::Rsp);
    if analysis.top_local_count > 0 {
        compiler
            .asm
            .mov_reg_imm64(Reg::Rax, null_singleton() as u64);
        for _ in 0..analysis.top_local_count {
            compiler.asm.push(Reg::Rax);
        }
    }

    if !compiler.emit(root) {
        return None;
    }

    // Epilogue: publish the result, drop the frames, restore registers.
    let asm = &mut compiler.asm;
    asm.bind(end_label);
    asm.store_rax_at_r14();
    asm.mov_reg_reg(Reg::Rsp, Reg::R13);
    asm.pop(Reg::R15);
    asm.pop(Reg::R14);
    asm.pop(Reg::R13);
    asm.pop(Reg::R12);
    asm.pop(Reg::Rbx);
    asm.pop(Reg::Rbp);
    asm.ret();

    // Shared out-of-memory stub.
    asm.bind(oom_label);
    asm.mov_reg_imm64(
        Reg::Rax,
        error_singleton(RuntimeError::OutOfMemory) as u64,
    );
    asm.jmp(end_label);

    let code = compiler.asm.finalize()?;
    ExecutableMemory::new(&code)
}

impl<'p> NativeCompiler<'p> {
    /// rdi ← rax, rsi ← context, call.
    fn unary_call(&mut self, target: u64) {
        self.asm.mov_reg_reg(Reg::Rdi, Reg::Rax);
        self.asm.mov_reg_reg(Reg::Rsi, Reg::R15);
        self.asm.call_absolute(target);
    }

    /// Left operand on the machine stack, right in rax.
    fn binary_call(&mut self, target: u64) {
        self.asm.mov_reg_reg(Reg::Rsi, Reg::Rax);
        self.asm.pop(Reg::Rdi);
        self.asm.mov_reg_reg(Reg::Rdx, Reg::R15);
        self.asm.call_absolute(target);
    }

    fn oom_check(&mut self) {
        self.asm.test_rax_rax();
        self.asm.je(self.oom_label);
    }

    /// Clear the temporary flag on the value in rax unless it is a
    /// singleton. The mov is four bytes, hence the short skip.
    fn clear_temporary_flag(&mut self) {
        self.asm.cmp_byte_rax(IS_SINGLETON, 0);
        self.asm.jne_short(4);
        self.asm.mov_byte_rax(IS_TEMPORARY, 0);
    }

    /// Jump when the value in rax is falsy.
    fn jump_if_false(&mut self, label: usize) {
        self.asm.cmp_byte_rax(IS_TRUE, 0);
        self.asm.je(label);
    }

    fn load_null(&mut self) {
        self.asm.mov_reg_imm64(Reg::Rax, null_singleton() as u64);
    }

    fn load_identifier(&mut self, data: &IdentifierData) -> bool {
        match data.class {
            Some(IdentClass::Local) => {
                self.asm
                    .load(Reg::Rax, Reg::R12, slot_displacement(data.position));
                true
            }
            Some(IdentClass::Global) | Some(IdentClass::Library) => {
                self.asm
                    .load(Reg::Rax, Reg::R13, slot_displacement(data.position));
                true
            }
            _ => false,
        }
    }

    /// Store rax into the identifier's frame slot.
    fn store_identifier(&mut self, data: &IdentifierData) -> bool {
        match data.class {
            Some(IdentClass::Local) => {
                self.asm
                    .store(Reg::R12, slot_displacement(data.position), Reg::Rax);
                true
            }
            Some(IdentClass::Global) | Some(IdentClass::Library) => {
                self.asm
                    .store(Reg::R13, slot_displacement(data.position), Reg::Rax);
                true
            }
            _ => false,
        }
    }

    pub fn emit(&mut self, node: &Node) -> bool {
        match &node.kind {
            NodeKind::Null => {
                self.load_null();
                true
            }
            NodeKind::Boolean(value) => {
                self.asm
                    .mov_reg_imm64(Reg::Rax, boolean_singleton(*value) as u64);
                true
            }
            NodeKind::Integer(value) => {
                self.asm.mov_reg_imm64(Reg::Rdi, *value as u64);
                self.asm.mov_reg_reg(Reg::Rsi, Reg::R15);
                self.asm
                    .call_absolute(addr_new_i64(value::value_new_integer));
                self.oom_check();
                true
            }
            NodeKind::Float(value) => {
                self.asm.mov_reg_imm64(Reg::Rdi, value.to_bits());
                self.asm.mov_reg_reg(Reg::Rsi, Reg::R15);
                self.asm
                    .call_absolute(addr_new_u64(value::value_new_float_bits));
                self.oom_check();
                true
            }
            NodeKind::String { value, render_type } => {
                let index = self.pool.intern(value, *render_type);
                let address = self.pool.address_of(index) as u64;
                self.asm.mov_reg_imm64(Reg::Rdi, address);
                self.asm.mov_reg_reg(Reg::Rsi, Reg::R15);
                self.asm
                    .call_absolute(addr_new_string(value::value_new_string_pooled));
                self.oom_check();
                true
            }
            NodeKind::Identifier(data) => self.load_identifier(data),
            NodeKind::Array(elements) => {
                self.asm.mov_reg_imm64(Reg::Rdi, elements.len() as u64);
                self.asm.mov_reg_reg(Reg::Rsi, Reg::R15);
                self.asm
                    .call_absolute(addr_new_u64(value::value_new_array_with_capacity));
                self.oom_check();
                self.asm.push(Reg::Rax);
                for element in elements {
                    if !self.emit(element) {
                        return false;
                    }
                    self.asm.mov_reg_reg(Reg::Rsi, Reg::Rax);
                    self.asm.load(Reg::Rdi, Reg::Rsp, 0);
                    self.asm.mov_reg_reg(Reg::Rdx, Reg::R15);
                    self.asm
                        .call_absolute(addr_binary(value::value_array_append));
                    self.asm.store(Reg::Rsp, 0, Reg::Rax);
                }
                self.asm.pop(Reg::Rax);
                true
            }
            NodeKind::Map(entries) => {
                self.asm.mov_reg_reg(Reg::Rdi, Reg::R15);
                self.asm.call_absolute(addr_unary_ctx(value::value_new_map));
                self.oom_check();
                self.asm.push(Reg::Rax);
                for (key, value) in entries {
                    if !self.emit(key) {
                        return false;
                    }
                    self.asm.push(Reg::Rax);
                    if !self.emit(value) {
                        return false;
                    }
                    self.asm.mov_reg_reg(Reg::Rdx, Reg::Rax);
                    self.asm.pop(Reg::Rsi);
                    self.asm.load(Reg::Rdi, Reg::Rsp, 0);
                    self.asm.mov_reg_reg(Reg::Rcx, Reg::R15);
                    self.asm.call_absolute(addr_three(value::value_map_insert));
                    self.asm.store(Reg::Rsp, 0, Reg::Rax);
                }
                self.asm.pop(Reg::Rax);
                true
            }
            NodeKind::Assign { target, value } => match &target.kind {
                NodeKind::Identifier(data) => {
                    if !self.emit(value) {
                        return false;
                    }
                    self.unary_call(addr_unary(value::value_adopt));
                    self.oom_check();
                    self.store_identifier(data)
                }
                NodeKind::Index { collection, index } => {
                    if !self.emit(value) {
                        return false;
                    }
                    self.unary_call(addr_unary(value::value_adopt));
                    self.oom_check();
                    self.asm.push(Reg::Rax);
                    if !self.emit(collection) {
                        return false;
                    }
                    self.asm.push(Reg::Rax);
                    if !self.emit(index) {
                        return false;
                    }
                    self.asm.mov_reg_reg(Reg::Rsi, Reg::Rax);
                    self.asm.pop(Reg::Rdi);
                    self.asm.pop(Reg::Rdx);
                    self.asm.mov_reg_reg(Reg::Rcx, Reg::R15);
                    self.asm
                        .call_absolute(addr_three(value::value_assign_index));
                    true
                }
                _ => false,
            },
            NodeKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    if !self.emit(lhs) {
                        return false;
                    }
                    let end = self.asm.get_label();
                    self.jump_if_false(end);
                    if !self.emit(rhs) {
                        return false;
                    }
                    self.asm.bind(end);
                    true
                }
                BinaryOp::Or => {
                    if !self.emit(lhs) {
                        return false;
                    }
                    let end = self.asm.get_label();
                    self.asm.cmp_byte_rax(IS_TRUE, 0);
                    self.asm.jne(end);
                    if !self.emit(rhs) {
                        return false;
                    }
                    self.asm.bind(end);
                    true
                }
                _ => {
                    if !self.emit(lhs) {
                        return false;
                    }
                    self.asm.push(Reg::Rax);
                    if !self.emit(rhs) {
                        return false;
                    }
                    let target = addr_binary(match op {
                        BinaryOp::Add => value::value_add,
                        BinaryOp::Subtract => value::value_subtract,
                        BinaryOp::Multiply => value::value_multiply,
                        BinaryOp::Divide => value::value_divide,
                        BinaryOp::Modulo => value::value_modulo,
                        BinaryOp::LessThan => value::value_less_than,
                        BinaryOp::LessThanEqual => value::value_less_than_equal,
                        BinaryOp::GreaterThan => value::value_greater_than,
                        BinaryOp::GreaterThanEqual => value::value_greater_than_equal,
                        BinaryOp::Equal => value::value_equal,
                        BinaryOp::NotEqual => value::value_not_equal,
                        BinaryOp::And | BinaryOp::Or => unreachable!(),
                    });
                    self.binary_call(target);
                    true
                }
            },
            NodeKind::Unary { op, operand } => {
                if !self.emit(operand) {
                    return false;
                }
                let target = addr_unary(match op {
                    UnaryOp::Negative => value::value_negative,
                    UnaryOp::Not => value::value_logical_not,
                });
                self.unary_call(target);
                true
            }
            NodeKind::Cast { target, operand } => {
                if !self.emit(operand) {
                    return false;
                }
                self.asm.mov_reg_reg(Reg::Rdi, Reg::Rax);
                self.asm.mov_reg_imm64(Reg::Rsi, *target as u64);
                self.asm.mov_reg_reg(Reg::Rdx, Reg::R15);
                self.asm.call_absolute(addr_with_u64(value::value_cast));
                true
            }
            NodeKind::Index { collection, index } => {
                if !self.emit(collection) {
                    return false;
                }
                self.asm.push(Reg::Rax);
                if !self.emit(index) {
                    return false;
                }
                self.binary_call(addr_binary(value::value_index));
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
                self.asm.push(Reg::Rax);
                for part in [start, end] {
                    match part {
                        Some(part) => {
                            if !self.emit(part) {
                                return false;
                            }
                        }
                        None => self.load_null(),
                    }
                    self.asm.push(Reg::Rax);
                }
                match step {
                    Some(step) => {
                        if !self.emit(step) {
                            return false;
                        }
                    }
                    None => self.load_null(),
                }
                self.asm.mov_reg_reg(Reg::Rcx, Reg::Rax);
                self.asm.pop(Reg::Rdx);
                self.asm.pop(Reg::Rsi);
                self.asm.pop(Reg::Rdi);
                self.asm.mov_reg_reg(Reg::R8, Reg::R15);
                self.asm.call_absolute(addr_slice(value::value_slice));
                true
            }
            NodeKind::Period { object, hash, .. } => {
                if !self.emit(object) {
                    return false;
                }
                self.asm.mov_reg_reg(Reg::Rdi, Reg::Rax);
                self.asm.mov_reg_imm64(Reg::Rsi, *hash);
                self.asm.mov_reg_reg(Reg::Rdx, Reg::R15);
                self.asm.call_absolute(addr_with_u64(value::value_period));
                true
            }
            NodeKind::FunctionCall { callee, arguments } => {
                // Script functions need the interpreter's frame discipline.
                if let NodeKind::Identifier(data) = &callee.kind {
                    if data.class == Some(IdentClass::Function) {
                        return false;
                    }
                }
                let argc = arguments.len();
                if argc > 0 {
                    self.asm.sub_rsp(8 * argc as i32);
                }
                for (i, argument) in arguments.iter().enumerate() {
                    if !self.emit(argument) {
                        return false;
                    }
                    self.asm.store(Reg::Rsp, 8 * i as i32, Reg::Rax);
                }
                if !self.emit(callee) {
                    return false;
                }
                self.asm.mov_reg_reg(Reg::Rdi, Reg::Rax);
                if argc > 0 {
                    self.asm.mov_reg_reg(Reg::Rsi, Reg::Rsp);
                } else {
                    self.asm.mov_reg_imm64(Reg::Rsi, 0);
                }
                self.asm.mov_reg_imm64(Reg::Rdx, argc as u64);
                self.asm.mov_reg_reg(Reg::Rcx, Reg::R15);
                self.asm.call_absolute(addr_call(value::value_call));
                if argc > 0 {
                    self.asm.add_rsp(8 * argc as i32);
                }
                true
            }
            // The interpreter owns script-function semantics.
            NodeKind::Function(_) | NodeKind::Return(_) => false,
            NodeKind::Print(value) => {
                if !self.emit(value) {
                    return false;
                }
                self.unary_call(addr_unary(value::value_print));
                true
            }
            NodeKind::Use { .. } => {
                self.load_null();
                true
            }
            NodeKind::Global { value, position, .. } => {
                match value {
                    Some(value) => {
                        if !self.emit(value) {
                            return false;
                        }
                        self.unary_call(addr_unary(value::value_adopt));
                        self.oom_check();
                        self.asm
                            .store(Reg::R13, slot_displacement(*position), Reg::Rax);
                    }
                    None => self.load_null(),
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
                let else_label = self.asm.get_label();
                let end = self.asm.get_label();
                self.jump_if_false(else_label);
                if !self.emit(then_block) {
                    return false;
                }
                self.asm.jmp(end);
                self.asm.bind(else_label);
                match else_block {
                    Some(else_block) => {
                        if !self.emit(else_block) {
                            return false;
                        }
                    }
                    None => self.load_null(),
                }
                self.asm.bind(end);
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
                let false_label = self.asm.get_label();
                let end = self.asm.get_label();
                self.jump_if_false(false_label);
                if !self.emit(when_true) {
                    return false;
                }
                self.asm.jmp(end);
                self.asm.bind(false_label);
                if !self.emit(when_false) {
                    return false;
                }
                self.asm.bind(end);
                true
            }
            NodeKind::While { condition, block } => {
                let start = self.asm.get_label();
                let end = self.asm.get_label();
                self.asm.bind(start);
                if !self.emit(condition) {
                    return false;
                }
                self.jump_if_false(end);
                if !self.loop_body(block, end, start) {
                    return false;
                }
                self.asm.jmp(start);
                self.asm.bind(end);
                true
            }
            NodeKind::DoWhile { block, condition } => {
                let start = self.asm.get_label();
                let continue_label = self.asm.get_label();
                let end = self.asm.get_label();
                self.asm.bind(start);
                if !self.loop_body(block, end, continue_label) {
                    return false;
                }
                self.asm.bind(continue_label);
                if !self.emit(condition) {
                    return false;
                }
                self.asm.cmp_byte_rax(IS_TRUE, 0);
                self.asm.jne(start);
                self.asm.bind(end);
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
                }
                let start = self.asm.get_label();
                let continue_label = self.asm.get_label();
                let end = self.asm.get_label();
                self.asm.bind(start);
                match condition {
                    Some(condition) => {
                        if !self.emit(condition) {
                            return false;
                        }
                    }
                    None => self
                        .asm
                        .mov_reg_imm64(Reg::Rax, boolean_singleton(true) as u64),
                }
                self.jump_if_false(end);
                if !self.loop_body(block, end, continue_label) {
                    return false;
                }
                self.asm.bind(continue_label);
                if let Some(update) = update {
                    if !self.emit(update) {
                        return false;
                    }
                }
                self.asm.jmp(start);
                self.asm.bind(end);
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
                let start = self.asm.get_label();
                let end_loop = self.asm.get_label();
                let not_iterable = self.asm.get_label();
                let after = self.asm.get_label();
                self.unary_call(addr_unary(value::value_iterator_get));
                self.asm.cmp_byte_rax(IS_ERROR, 0);
                self.asm.jne(not_iterable);
                self.clear_temporary_flag();
                self.asm
                    .store(Reg::R12, slot_displacement(*iterator_slot), Reg::Rax);
                self.asm.bind(start);
                self.asm
                    .load(Reg::Rax, Reg::R12, slot_displacement(*iterator_slot));
                self.unary_call(addr_unary(value::value_iterator_next));
                self.asm.cmp_byte_rax(IS_ERROR, 0);
                self.asm.jne(end_loop);
                self.unary_call(addr_unary(value::value_adopt));
                self.oom_check();
                if !self.store_identifier(identifier) {
                    return false;
                }
                if !self.loop_body(block, after, start) {
                    return false;
                }
                self.asm.jmp(start);
                self.asm.bind(end_loop);
                self.load_null();
                self.asm.jmp(after);
                self.asm.bind(not_iterable);
                self.asm
                    .mov_reg_imm64(Reg::Rax, boolean_singleton(false) as u64);
                self.asm.bind(after);
                true
            }
            NodeKind::Break => {
                self.load_null();
                let target = self.break_label.unwrap_or(self.end_label);
                self.asm.jmp(target);
                true
            }
            NodeKind::Continue => {
                self.load_null();
                let target = self.continue_label.unwrap_or(self.end_label);
                self.asm.jmp(target);
                true
            }
            NodeKind::Block(statements) => {
                if statements.is_empty() {
                    self.load_null();
                    return true;
                }
                for statement in statements {
                    if !self.emit(statement) {
                        return false;
                    }
                }
                true
            }
            NodeKind::ParseError { .. } => false,
        }
    }

    fn loop_body(&mut self, block: &Node, break_label: usize, continue_label: usize) -> bool {
        let saved = (self.break_label, self.continue_label);
        self.break_label = Some(break_label);
        self.continue_label = Some(continue_label);
        let ok = self.emit(block);
        (self.break_label, self.continue_label) = saved;
        ok
    }
}

fn addr_unary_ctx(f: extern "C" fn(*mut ExecutionContext) -> *mut Value) -> u64 {
    f as usize as u64
}

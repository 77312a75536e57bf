//! Bytecode representation.
//!
//! The instruction stream is a vector of machine-word-sized tagged entries:
//! opcode words followed by their immediate operands. The stream is internal
//! to one process and never written to disk; the enum is closed and new
//! opcodes append.
//!
//! The label/backpatch table in this module is shared by both code
//! generators; only the per-jump fix-up width differs (one tagged word here,
//! four bytes of rel32 in the native generator).

use std::fmt;

use rustc_hash::FxHashMap;
use tang_core::unicode::{RenderType, UnicodeString};

/// The instruction set, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Literal pushes
    /// Push the null singleton.
    PushNull,
    /// Operand: 0 or 1. Push a boolean singleton.
    PushBoolean,
    /// Operand: f64 bits. Push a float.
    PushFloat,
    /// Operand: i64. Push an integer.
    PushInteger,
    /// Operand: constant-pool index. Push a string.
    PushString,
    /// Operand: element count. Pop that many values into a new array.
    PushArray,
    /// Operand: pair count. Pop key/value pairs into a new map.
    PushMap,
    /// Operands: argument count, body offset. Push a function value.
    PushFunction,

    // Stack maintenance
    /// Drop the top of stack.
    Pop,
    /// Operand: slot. Push `stack[fp + slot]`.
    PeekLocal,
    /// Operand: slot. Push `stack[slot]`.
    PeekGlobal,
    /// Operand: slot. `stack[fp + slot] = top` (top stays).
    PokeLocal,
    /// Operand: slot. `stack[slot] = top` (top stays).
    PokeGlobal,
    /// `fp = stack.len()`.
    MarkFp,
    /// Save `fp` on the fp stack.
    PushFp,
    /// Restore `fp` from the fp stack.
    PopFp,
    /// Prepare the top of stack for storage in a named slot.
    Adopt,
    /// Clear the temporary flag on the top of stack.
    SetNotTemp,

    // Control flow. Operand: relative displacement. The conditional forms
    // test the top of stack without popping it.
    Jmp,
    Jmpf,
    Jmpt,

    // Arithmetic and comparison; all dispatch through the value vtable.
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negative,
    Not,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Equal,
    NotEqual,

    // Object access
    /// Pop index, pop collection, push `collection[index]`.
    Index,
    /// Pop step, end, start, collection; push the slice.
    Slice,
    /// Pop index, collection, value; push `collection[index] = value`.
    AssignIndex,
    /// Operand: slot. Pop a collection, store its iterator at `fp + slot`,
    /// push whether an iterator was produced.
    Iterator,
    /// Operand: slot. Advance the iterator at `fp + slot`; push the next
    /// value, then push the has-next discriminant.
    IteratorNext,
    /// Operand: cast-target discriminant. Replace the top with the cast.
    Cast,
    /// Operand: constant-pool index of the attribute name.
    Period,

    /// Pop a value, render it into the context output, push null.
    Print,
    /// Operand: argument count. Pop the callee and enter it.
    CallFunc,
    /// Operand: constant-pool index of the library name. Run the loader and
    /// push its value.
    LoadLibrary,
    /// Pop the result; return from the current call or halt the program.
    Return,
}

/// One tagged word of the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Word {
    Op(Opcode),
    UInt(u64),
    Int(i64),
    Float(f64),
}

/// A compiled bytecode program.
#[derive(Debug, Default)]
pub struct Bytecode {
    pub code: Vec<Word>,
}

impl Bytecode {
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

impl fmt::Display for Bytecode {
    /// Disassembly used by debug mode.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut i = 0;
        while i < self.code.len() {
            write!(f, "{i:6}  ")?;
            match self.code[i] {
                Word::Op(op) => {
                    write!(f, "{op:?}")?;
                    for _ in 0..operand_count(op) {
                        i += 1;
                        match self.code.get(i) {
                            Some(Word::UInt(v)) => write!(f, " {v}")?,
                            Some(Word::Int(v)) => write!(f, " {v}")?,
                            Some(Word::Float(v)) => write!(f, " {v}")?,
                            Some(Word::Op(op)) => write!(f, " <op {op:?}?>")?,
                            None => write!(f, " <truncated>")?,
                        }
                    }
                }
                word => write!(f, "<stray {word:?}>")?,
            }
            writeln!(f)?;
            i += 1;
        }
        Ok(())
    }
}

/// Immediate operand count per opcode.
pub fn operand_count(op: Opcode) -> usize {
    match op {
        Opcode::PushBoolean
        | Opcode::PushFloat
        | Opcode::PushInteger
        | Opcode::PushString
        | Opcode::PushArray
        | Opcode::PushMap
        | Opcode::PeekLocal
        | Opcode::PeekGlobal
        | Opcode::PokeLocal
        | Opcode::PokeGlobal
        | Opcode::Jmp
        | Opcode::Jmpf
        | Opcode::Jmpt
        | Opcode::Iterator
        | Opcode::IteratorNext
        | Opcode::Cast
        | Opcode::Period
        | Opcode::CallFunc
        | Opcode::LoadLibrary => 1,
        Opcode::PushFunction => 2,
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Labels and backpatching
// ---------------------------------------------------------------------------

/// Forward-jump bookkeeping shared by both code generators.
///
/// A label is an opaque integer handed out before its target is known.
/// Emitting a jump writes a placeholder and records the operand's offset;
/// reaching the target records its offset; a final pass rewrites every
/// placeholder. The rewrite width is the caller's concern, which is the
/// only difference between the bytecode and native users.
#[derive(Debug, Default)]
pub struct LabelTable {
    targets: Vec<Option<usize>>,
    jumps: Vec<(usize, usize)>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable::default()
    }

    /// Allocate a fresh label.
    pub fn get_label(&mut self) -> usize {
        self.targets.push(None);
        self.targets.len() - 1
    }

    /// Record that the jump operand at `site` targets `label`.
    pub fn add_jump(&mut self, label: usize, site: usize) {
        self.jumps.push((label, site));
    }

    /// Pin `label` to `position`.
    pub fn set_label(&mut self, label: usize, position: usize) {
        self.targets[label] = Some(position);
    }

    pub fn target_of(&self, label: usize) -> Option<usize> {
        self.targets.get(label).copied().flatten()
    }

    /// Rewrite every recorded jump. `patch(site, target)` returns false to
    /// abort (an unset label aborts unconditionally).
    pub fn finalize(&self, mut patch: impl FnMut(usize, usize) -> bool) -> bool {
        for &(label, site) in &self.jumps {
            let Some(target) = self.targets[label] else {
                return false;
            };
            if !patch(site, target) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Constant pool
// ---------------------------------------------------------------------------

/// Interned strings shared by both compiled forms. Entries are boxed so
/// their addresses stay valid for the program's lifetime; native code embeds
/// them as immediates.
#[derive(Default)]
pub struct ConstantPool {
    entries: Vec<Box<UnicodeString>>,
    interned: FxHashMap<(String, u8), usize>,
}

fn render_type_tag(render_type: RenderType) -> u8 {
    match render_type {
        RenderType::Trusted => 0,
        RenderType::Html => 1,
        RenderType::HtmlAttribute => 2,
        RenderType::Javascript => 3,
        RenderType::Percent => 4,
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        ConstantPool::default()
    }

    pub fn intern(&mut self, text: &str, render_type: RenderType) -> usize {
        let key = (text.to_string(), render_type_tag(render_type));
        if let Some(&index) = self.interned.get(&key) {
            return index;
        }
        let index = self.entries.len();
        self.entries
            .push(Box::new(UnicodeString::new(text, render_type)));
        self.interned.insert(key, index);
        index
    }

    pub fn get(&self, index: usize) -> Option<&UnicodeString> {
        self.entries.get(index).map(|b| b.as_ref())
    }

    /// Stable address for embedding into native code.
    pub fn address_of(&self, index: usize) -> *const UnicodeString {
        &*self.entries[index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

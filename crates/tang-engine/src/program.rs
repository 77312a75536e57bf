//! The program façade: parse → analyze → simplify → compile → execute.
//!
//! Native code is preferred; if the native generator declines the program
//! (or the platform has no backend), the bytecode path is used. A program
//! outlives any number of executions, each against its own context.

use std::borrow::Cow;

use bitflags::bitflags;

use tang_core::context::ExecutionContext;

use crate::analyze::{self, Analysis};
use crate::ast::Node;
use crate::bytecode::{Bytecode, ConstantPool};
use crate::emit;
use crate::error::CompileError;
use crate::parser;
use crate::simplify::{self, Bindings};
use crate::vm;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProgramFlags: u32 {
        /// Dump the AST and bytecode to stderr during compilation.
        const DEBUG = 1 << 0;
        /// Copy the source instead of borrowing it.
        const DUPLICATE_SOURCE = 1 << 1;
        const DISABLE_BYTECODE = 1 << 2;
        const DISABLE_NATIVE = 1 << 3;
        /// The source is a template: literal text with `<% … %>` islands.
        const IS_TEMPLATE = 1 << 4;
    }
}

impl ProgramFlags {
    /// Flag defaults taken from the environment.
    pub fn from_env() -> ProgramFlags {
        let mut flags = ProgramFlags::empty();
        if std::env::var_os("TANG_DEBUG").is_some() {
            flags |= ProgramFlags::DEBUG;
        }
        if std::env::var_os("TANG_DISABLE_BYTECODE").is_some() {
            flags |= ProgramFlags::DISABLE_BYTECODE;
        }
        if std::env::var_os("TANG_DISABLE_BINARY").is_some() {
            flags |= ProgramFlags::DISABLE_NATIVE;
        }
        flags
    }
}

pub struct Program<'s> {
    source: Cow<'s, str>,
    flags: ProgramFlags,
    ast: Node,
    analysis: Analysis,
    pool: ConstantPool,
    bytecode: Option<Bytecode>,
    #[cfg(all(unix, target_arch = "x86_64"))]
    native: Option<crate::jit::ExecutableMemory>,
}

impl<'s> Program<'s> {
    /// Compile with flag defaults from the environment.
    pub fn new(source: &'s str) -> Result<Self, CompileError> {
        Program::with_flags(source, ProgramFlags::from_env())
    }

    pub fn with_flags(source: &'s str, flags: ProgramFlags) -> Result<Self, CompileError> {
        let mut ast = if flags.contains(ProgramFlags::IS_TEMPLATE) {
            parser::parse_template(source)?
        } else {
            parser::parse(source)?
        };
        let analysis = analyze::analyze(&mut ast)?;
        simplify::simplify(&mut ast, &mut Bindings::new());
        if flags.contains(ProgramFlags::DEBUG) {
            eprintln!("--- ast\n{}", ast.dump());
        }

        let mut pool = ConstantPool::new();

        #[cfg(all(unix, target_arch = "x86_64"))]
        let native = if flags.contains(ProgramFlags::DISABLE_NATIVE) {
            None
        } else {
            crate::jit::compile_native(&ast, &analysis, &mut pool)
        };
        #[cfg(all(unix, target_arch = "x86_64"))]
        let have_native = native.is_some();
        #[cfg(not(all(unix, target_arch = "x86_64")))]
        let have_native = false;

        let bytecode = if !have_native && !flags.contains(ProgramFlags::DISABLE_BYTECODE) {
            emit::compile_bytecode(&ast, &analysis, &mut pool)
        } else {
            None
        };

        if let (Some(bytecode), true) = (&bytecode, flags.contains(ProgramFlags::DEBUG)) {
            eprintln!("--- bytecode\n{bytecode}");
        }

        if !have_native && bytecode.is_none() {
            return Err(CompileError::NoArtifact);
        }

        let source = if flags.contains(ProgramFlags::DUPLICATE_SOURCE) {
            Cow::Owned(source.to_string())
        } else {
            Cow::Borrowed(source)
        };
        Ok(Program {
            source,
            flags,
            ast,
            analysis,
            pool,
            bytecode,
            #[cfg(all(unix, target_arch = "x86_64"))]
            native,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn flags(&self) -> ProgramFlags {
        self.flags
    }

    pub fn ast(&self) -> &Node {
        &self.ast
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    pub fn bytecode(&self) -> Option<&Bytecode> {
        self.bytecode.as_ref()
    }

    /// Whether the native path will run this program.
    pub fn has_native(&self) -> bool {
        #[cfg(all(unix, target_arch = "x86_64"))]
        {
            self.native.is_some()
        }
        #[cfg(not(all(unix, target_arch = "x86_64")))]
        {
            false
        }
    }

    /// A fresh execution context for this program.
    pub fn create_context(&self) -> ExecutionContext {
        ExecutionContext::new()
    }

    /// Run the program. The result lands in `context.result` and rendered
    /// output in `context.render_output()`. Returns false when no artifact
    /// could run or the bytecode was malformed.
    pub fn execute(&self, context: &mut ExecutionContext) -> bool {
        #[cfg(all(unix, target_arch = "x86_64"))]
        if let Some(native) = &self.native {
            let entry = native.entry();
            // Safety: the buffer holds a complete function produced by the
            // native generator for this exact program.
            let result = unsafe { entry(context as *mut ExecutionContext) };
            context.result = result;
            return true;
        }
        match &self.bytecode {
            Some(bytecode) => vm::run(bytecode, &self.pool, context),
            None => false,
        }
    }
}

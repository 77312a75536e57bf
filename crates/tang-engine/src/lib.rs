//! The Tang language engine.
//!
//! Source text goes in; an executable artifact comes out. The pipeline is
//! lexer → parser → AST ([`ast`]), the two-pass scope analyzer
//! ([`analyze`]), the constant-folding simplifier ([`simplify`]), and two
//! code generators sharing one label/backpatch mechanism: a portable
//! bytecode stream interpreted by [`vm`], and (on x86_64 Unix) a native
//! buffer assembled by [`jit`]. The [`program::Program`] façade ties them
//! together; the runtime value model lives in `tang-core`.

pub mod analyze;
pub mod ast;
pub mod bytecode;
pub mod emit;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod program;
pub mod simplify;
pub mod vm;

#[cfg(all(unix, target_arch = "x86_64"))]
pub mod jit;

pub use error::CompileError;
pub use program::{Program, ProgramFlags};

pub use tang_core::{ExecutionContext, RuntimeError};

//! Core runtime for the Tang scripting language.
//!
//! This crate holds everything a compiled Tang program needs at run time:
//! the tagged value model with its per-kind operator dispatch table
//! ([`value`]), the per-run execution context with arena garbage collection
//! ([`context`]), render-tagged Unicode strings ([`unicode`]), and the
//! enumerated runtime error kinds ([`error`]).
//!
//! The compile pipeline (AST, analyzer, code generators, interpreter) lives
//! in the `tang-engine` crate.

pub mod context;
pub mod error;
pub mod unicode;
pub mod value;

pub use context::ExecutionContext;
pub use error::RuntimeError;
pub use unicode::{RenderType, UnicodeString};
pub use value::{string_hash, Value, ValueData};

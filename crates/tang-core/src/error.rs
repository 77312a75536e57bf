//! Runtime error kinds.
//!
//! Every kind is also exposed as a process-wide singleton value (see
//! [`crate::value::error_singleton`]) so failing operations can return a
//! shared constant instead of allocating.

use thiserror::Error;

/// The closed set of runtime errors.
///
/// The discriminants are stable; new kinds append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u8)]
pub enum RuntimeError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("divide by zero")]
    DivideByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("invalid index")]
    InvalidIndex,
    #[error("invalid function call")]
    InvalidFunctionCall,
    #[error("argument count mismatch")]
    ArgumentCountMismatch,
    #[error("not implemented")]
    NotImplemented,
    #[error("not supported")]
    NotSupported,
    #[error("invalid bytecode")]
    InvalidBytecode,
    #[error("iterator end")]
    IteratorEnd,
    #[error("map key not found")]
    MapKeyNotFound,
    #[error("map key is not a string")]
    MapKeyNotString,
    #[error("function redeclared")]
    FunctionRedeclared,
    #[error("identifier redeclared")]
    IdentifierRedeclared,
    #[error("the global random number generator seed cannot be changed")]
    GlobalRngSeedNotChangeable,
    #[error("out of memory while reporting a parse error")]
    ParseErrorOutOfMemory,
}

impl RuntimeError {
    /// All kinds, in declaration order. Used to build the singleton table.
    pub const ALL: [RuntimeError; 16] = [
        RuntimeError::OutOfMemory,
        RuntimeError::DivideByZero,
        RuntimeError::ModuloByZero,
        RuntimeError::InvalidIndex,
        RuntimeError::InvalidFunctionCall,
        RuntimeError::ArgumentCountMismatch,
        RuntimeError::NotImplemented,
        RuntimeError::NotSupported,
        RuntimeError::InvalidBytecode,
        RuntimeError::IteratorEnd,
        RuntimeError::MapKeyNotFound,
        RuntimeError::MapKeyNotString,
        RuntimeError::FunctionRedeclared,
        RuntimeError::IdentifierRedeclared,
        RuntimeError::GlobalRngSeedNotChangeable,
        RuntimeError::ParseErrorOutOfMemory,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_table_matches_discriminants() {
        for (i, kind) in RuntimeError::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, i);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(RuntimeError::DivideByZero.to_string(), "divide by zero");
    }
}

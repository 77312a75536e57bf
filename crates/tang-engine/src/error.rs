//! Compile-time errors.

use thiserror::Error;

use crate::ast::Location;
use tang_core::RuntimeError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("parse error at {location}: {message}")]
    Parse { message: String, location: Location },

    #[error("{kind} at {location}: `{name}`")]
    Analyze {
        kind: RuntimeError,
        name: String,
        location: Location,
    },

    #[error("no executable artifact: every enabled code generator declined the program")]
    NoArtifact,
}

impl CompileError {
    pub fn parse(message: impl Into<String>, location: Location) -> Self {
        CompileError::Parse {
            message: message.into(),
            location,
        }
    }
}

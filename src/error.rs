//! Compiler invariant violations.
//!
//! These never describe a problem in the user's program; a diagnosable
//! problem is reported through [`crate::diagnostics`] instead.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InternalError {
    #[error("fused type '{name}' reached code generation unspecialized ({context})")]
    UnspecializedFused { name: String, context: String },

    #[error("utility snippet '{catalog}::{name}' is not in the catalog")]
    UnknownUtility { catalog: String, name: String },

    #[error("utility snippet '{0}' depends on itself")]
    UtilityCycle(String),

    #[error("type declarations embed each other by value: {0}")]
    TypeDependencyCycle(String),

    #[error("temporary #{0} referenced outside the expression that binds it")]
    DanglingTemp(usize),

    #[error("'{0}' emitted outside of a loop")]
    LoopControlOutsideLoop(&'static str),

    #[error("'return' emitted outside of a function body")]
    ReturnOutsideFunction,

    #[error("symbol table has no entry #{0}")]
    UnknownEntry(usize),

    #[error("cannot emit {what} for type '{ty}'")]
    UnsupportedType { what: String, ty: String },
}

pub type InternalResult<T> = Result<T, InternalError>;

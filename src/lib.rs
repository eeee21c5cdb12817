//! cextc - a C code generator for CPython extension modules
//!
//! Takes a module tree that a front end has already parsed and analyzed,
//! lowers it with a few tree rewrites and emits C source against the
//! CPython C-API, plus optional public and API headers.

pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod naming;
pub mod optimize;
pub mod options;
pub mod semantic;
pub mod types;

// Re-export commonly used types
pub use diagnostics::{Diagnostic, DiagnosticLevel, DiagnosticReporter};
pub use driver::{compile, compile_with_reporter, CompilationInput, CompileOutput, Driver};
pub use error::{InternalError, InternalResult};
pub use options::CompileOptions;

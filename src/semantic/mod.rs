//! Declarations produced by the analysis phase.

mod symbol_table;

pub use symbol_table::{Entry, EntryId, EntryKind, Storage, SymbolTable, Visibility};

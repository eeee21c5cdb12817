//! Symbol table for declared entries.
//!
//! Scope resolution happens before this crate runs; what arrives here is an
//! arena of entries that tree nodes refer to by [`EntryId`], plus the
//! module-level name map.

use crate::ast::{ConstValue, Pos};
use crate::types::TypeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index of an entry in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub usize);

/// Linkage of a declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Declared here, defined by external C code.
    Extern,
    /// Exported through the public header.
    Public,
    #[default]
    Private,
}

/// Kind of entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Variable,
    Function,
    Type,
    /// Compile-time constant such as an enum member.
    Constant(ConstValue),
    Builtin,
}

/// Where the value lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    /// C local of the enclosing function.
    #[default]
    Local,
    /// C static at module level.
    ModuleStatic,
    /// Attribute of the module object, looked up by name.
    ModuleDict,
    /// Looked up in the builtins module.
    Builtin,
}

/// A declared name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub cname: String,
    pub ty: TypeRef,
    pub kind: EntryKind,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub storage: Storage,
    /// Exported through the API header's function import table.
    #[serde(default)]
    pub api: bool,
    /// Other functions sharing this name; resolved per call.
    #[serde(default)]
    pub overloads: Vec<EntryId>,
    /// Function parameter rather than a plain local.
    #[serde(default)]
    pub is_arg: bool,
    #[serde(default)]
    pub pos: Pos,
}

impl Entry {
    pub fn new(name: impl Into<String>, cname: impl Into<String>, ty: TypeRef, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            cname: cname.into(),
            ty,
            kind,
            visibility: Visibility::Private,
            storage: Storage::Local,
            api: false,
            overloads: Vec::new(),
            is_arg: false,
            pos: Pos::default(),
        }
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn is_builtin(&self) -> bool {
        self.storage == Storage::Builtin || self.kind == EntryKind::Builtin
    }
}

/// Arena of entries with module-level lookup
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SymbolTable {
    entries: Vec<Entry>,
    /// Module-level names
    #[serde(default)]
    module_scope: HashMap<String, EntryId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a module-level entry; a second definition of the same name is
    /// handed back.
    pub fn define(&mut self, entry: Entry) -> Result<EntryId, Entry> {
        if self.module_scope.contains_key(&entry.name) {
            return Err(entry);
        }
        let name = entry.name.clone();
        let id = self.push(entry);
        self.module_scope.insert(name, id);
        Ok(id)
    }

    /// Add an entry that is not visible by name at module level (locals,
    /// parameters, overloads).
    pub fn push(&mut self, entry: Entry) -> EntryId {
        self.entries.push(entry);
        EntryId(self.entries.len() - 1)
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.get_mut(id.0)
    }

    /// Look up a module-level name
    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.lookup_id(name).and_then(|id| self.get(id))
    }

    pub fn lookup_id(&self, name: &str) -> Option<EntryId> {
        self.module_scope.get(name).copied()
    }

    /// Entries in definition order
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.entries.iter().enumerate().map(|(i, e)| (EntryId(i), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Module-level entries in definition order
    pub fn module_entries(&self) -> Vec<(EntryId, &Entry)> {
        let mut ids: Vec<EntryId> = self.module_scope.values().copied().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.get(id).map(|e| (id, e)))
            .collect()
    }

    /// Whether `id` names the builtin `name` and is not shadowed.
    pub fn is_builtin_named(&self, id: EntryId, name: &str) -> bool {
        self.get(id).is_some_and(|e| e.is_builtin() && e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn duplicate_module_names_are_rejected() {
        let mut table = SymbolTable::new();
        let e = Entry::new("x", "__cx_v_x", Type::c_int(), EntryKind::Variable);
        assert!(table.define(e.clone()).is_ok());
        assert!(table.define(e).is_err());
        let local = table.push(Entry::new("x", "x", Type::c_int(), EntryKind::Variable));
        assert_eq!(table.lookup_id("x"), Some(EntryId(0)));
        assert_eq!(local, EntryId(1));
    }
}

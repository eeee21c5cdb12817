//! Registry of C helper snippets shared by the emitted code.
//!
//! A snippet is emitted at most once per compilation no matter how many
//! sites ask for it. Requesting a snippet first requests everything it
//! depends on, so dependencies always come earlier in the output.

pub mod catalog;

use super::buffer::{Section, SectionedOutput};
use crate::error::{InternalError, InternalResult};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// `(catalog, name)` identifying a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UtilityKey {
    pub catalog: String,
    pub name: String,
}

impl UtilityKey {
    pub fn new(catalog: impl Into<String>, name: impl Into<String>) -> Self {
        Self { catalog: catalog.into(), name: name.into() }
    }
}

impl fmt::Display for UtilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.catalog, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct UtilitySnippet {
    pub key: UtilityKey,
    pub proto: Option<String>,
    pub implementation: String,
    /// Statements run by the constant initialization function.
    pub init: Option<String>,
    pub requires: Vec<UtilityKey>,
}

impl UtilitySnippet {
    pub fn new(catalog: &str, name: &str, implementation: impl Into<String>) -> Self {
        Self {
            key: UtilityKey::new(catalog, name),
            proto: None,
            implementation: implementation.into(),
            init: None,
            requires: Vec::new(),
        }
    }

    pub fn with_proto(mut self, proto: impl Into<String>) -> Self {
        self.proto = Some(proto.into());
        self
    }

    pub fn with_init(mut self, init: impl Into<String>) -> Self {
        self.init = Some(init.into());
        self
    }

    pub fn requires(mut self, catalog: &str, name: &str) -> Self {
        self.requires.push(UtilityKey::new(catalog, name));
        self
    }
}

pub type UtilityHandle = Rc<UtilitySnippet>;

/// Append-only, deduplicated by key.
#[derive(Debug, Default)]
pub struct UtilityRegistry {
    snippets: Vec<UtilityHandle>,
    index: HashMap<UtilityKey, usize>,
    pending: Vec<UtilityKey>,
}

impl UtilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a catalog snippet by name.
    pub fn require(&mut self, catalog: &str, name: &str) -> InternalResult<UtilityHandle> {
        let key = UtilityKey::new(catalog, name);
        if let Some(&i) = self.index.get(&key) {
            return Ok(self.snippets[i].clone());
        }
        if self.pending.contains(&key) {
            return Err(InternalError::UtilityCycle(key.to_string()));
        }
        let snippet = catalog::lookup(catalog, name).ok_or_else(|| InternalError::UnknownUtility {
            catalog: catalog.to_string(),
            name: name.to_string(),
        })?;
        self.insert(snippet)
    }

    /// Adds a snippet built by the caller, such as a per-type conversion
    /// helper. A snippet whose key is already present is not replaced.
    pub fn insert(&mut self, snippet: UtilitySnippet) -> InternalResult<UtilityHandle> {
        if let Some(&i) = self.index.get(&snippet.key) {
            return Ok(self.snippets[i].clone());
        }
        if self.pending.contains(&snippet.key) {
            return Err(InternalError::UtilityCycle(snippet.key.to_string()));
        }
        self.pending.push(snippet.key.clone());
        for dep in &snippet.requires {
            if let Err(e) = self.require(&dep.catalog, &dep.name) {
                self.pending.pop();
                return Err(e);
            }
        }
        self.pending.pop();
        trace!(key = %snippet.key, "utility snippet registered");
        let handle = Rc::new(snippet);
        self.index.insert(handle.key.clone(), self.snippets.len());
        self.snippets.push(handle.clone());
        Ok(handle)
    }

    pub fn contains(&self, catalog: &str, name: &str) -> bool {
        self.index.contains_key(&UtilityKey::new(catalog, name))
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UtilityHandle> {
        self.snippets.iter()
    }

    /// Writes prototypes, bodies and init statements in insertion order.
    /// Init statements go to `init`, which the caller places inside the
    /// constant initialization function.
    pub fn emit(&self, out: &mut SectionedOutput, init: &mut super::buffer::CodeWriter) {
        for snippet in &self.snippets {
            if let Some(proto) = &snippet.proto {
                out.section(Section::UtilityProto).writeln(&format!("/* {} */", snippet.key));
                out.section(Section::UtilityProto).put_raw(proto);
            }
            let def = out.section(Section::UtilityDef);
            def.writeln(&format!("/* {} */", snippet.key));
            def.put_raw(&snippet.implementation);
            def.newline();
            if let Some(text) = &snippet.init {
                init.append(&text_writer(text));
            }
        }
    }
}

fn text_writer(text: &str) -> super::buffer::CodeWriter {
    let mut w = super::buffer::CodeWriter::new();
    w.put_raw(text);
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_come_first() {
        let mut reg = UtilityRegistry::new();
        reg.require("ObjectHandling", "GetModuleGlobalName").unwrap();
        let names: Vec<&str> = reg.iter().map(|s| s.key.name.as_str()).collect();
        assert_eq!(names, ["PyObjectGetAttrStr", "GetBuiltinName", "GetModuleGlobalName"]);
    }

    #[test]
    fn cycles_are_internal_errors() {
        let mut reg = UtilityRegistry::new();
        let a = UtilitySnippet::new("Test", "A", "").requires("Test", "A");
        assert!(matches!(reg.insert(a), Err(InternalError::UtilityCycle(_))));
        assert!(reg.is_empty());
    }

    #[test]
    fn unknown_snippet_is_reported() {
        let mut reg = UtilityRegistry::new();
        let err = reg.require("ObjectHandling", "NoSuchThing").unwrap_err();
        assert!(matches!(err, InternalError::UnknownUtility { .. }));
    }
}

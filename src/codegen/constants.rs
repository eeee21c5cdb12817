//! Python constants shared by the whole module: interned identifiers,
//! string and bytes literals, integers and floats.
//!
//! Each distinct value gets one module-level `PyObject *` that is created by
//! `__cx_InitGlobals` and released by the level 3 cleanup.

use super::buffer::{escape_string, CodeWriter};
use crate::ast::StrKind;
use crate::naming;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct StringConst {
    cname: String,
    value: String,
    kind: StrKind,
    intern: bool,
}

#[derive(Debug, Default)]
pub struct ConstantTable {
    strings: Vec<StringConst>,
    string_index: HashMap<(String, StrKind), usize>,
    ints: Vec<(i64, String)>,
    int_index: HashMap<i64, usize>,
    floats: Vec<(String, String)>,
    float_index: HashMap<String, usize>,
    used_cnames: HashSet<String>,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ConstantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.ints.is_empty() && self.floats.is_empty()
    }

    fn unique(&mut self, base: String) -> String {
        let mut cname = base.clone();
        let mut n = 1;
        while !self.used_cnames.insert(cname.clone()) {
            cname = format!("{}_{}", base, n);
            n += 1;
        }
        cname
    }

    /// An interned `str` for an attribute or global name.
    pub fn intern(&mut self, name: &str) -> String {
        let key = (name.to_string(), StrKind::Unicode);
        if let Some(&i) = self.string_index.get(&key) {
            return self.strings[i].cname.clone();
        }
        let cname = self.unique(format!("{}{}", naming::INTERNED_PREFIX, naming::sanitize(name).replace('.', "_")));
        self.string_index.insert(key, self.strings.len());
        self.strings.push(StringConst { cname: cname.clone(), value: name.to_string(), kind: StrKind::Unicode, intern: true });
        cname
    }

    /// A string or bytes literal. Identifier-like text shares the interned
    /// entry.
    pub fn string(&mut self, value: &str, kind: StrKind) -> String {
        if kind == StrKind::Unicode && is_identifier(value) {
            return self.intern(value);
        }
        let key = (value.to_string(), kind);
        if let Some(&i) = self.string_index.get(&key) {
            return self.strings[i].cname.clone();
        }
        let tag = match kind {
            StrKind::Unicode => "s",
            StrKind::Bytes => "b",
        };
        let cname = self.unique(format!("{}{}_{}", naming::STRING_PREFIX, tag, self.strings.len()));
        self.string_index.insert(key, self.strings.len());
        self.strings.push(StringConst { cname: cname.clone(), value: value.to_string(), kind, intern: false });
        cname
    }

    pub fn int(&mut self, value: i64) -> String {
        if let Some(&i) = self.int_index.get(&value) {
            return self.ints[i].1.clone();
        }
        let base = if value < 0 {
            format!("{}neg_{}", naming::INT_PREFIX, value.unsigned_abs())
        } else {
            format!("{}{}", naming::INT_PREFIX, value)
        };
        let cname = self.unique(base);
        self.int_index.insert(value, self.ints.len());
        self.ints.push((value, cname.clone()));
        cname
    }

    /// `text` is the literal as written; underscores are dropped.
    pub fn float(&mut self, text: &str) -> String {
        let text = text.replace('_', "");
        if let Some(&i) = self.float_index.get(&text) {
            return self.floats[i].1.clone();
        }
        let cname = self.unique(format!("{}{}", naming::FLOAT_PREFIX, self.floats.len()));
        self.float_index.insert(text.clone(), self.floats.len());
        self.floats.push((text, cname.clone()));
        cname
    }

    fn cnames(&self) -> impl Iterator<Item = &str> {
        self.strings
            .iter()
            .map(|s| s.cname.as_str())
            .chain(self.ints.iter().map(|(_, c)| c.as_str()))
            .chain(self.floats.iter().map(|(_, c)| c.as_str()))
    }

    pub fn emit_declarations(&self, w: &mut CodeWriter) {
        for cname in self.cnames() {
            w.writeln(&format!("static PyObject *{};", cname));
        }
    }

    /// Whether the string table has any entry; the caller then needs the
    /// `InitStrings` helper.
    pub fn has_strings(&self) -> bool {
        !self.strings.is_empty()
    }

    pub fn emit_string_table(&self, w: &mut CodeWriter) {
        if self.strings.is_empty() {
            return;
        }
        w.open_block(&format!("static __cx_StringTabEntry {}[] =", naming::STRING_TABLE_CNAME));
        for s in &self.strings {
            let literal = escape_string(&s.value);
            w.writeln(&format!(
                "{{&{}, \"{}\", sizeof(\"{}\"), {}, {}}},",
                s.cname,
                literal,
                literal,
                u8::from(s.kind == StrKind::Unicode),
                u8::from(s.intern)
            ));
        }
        w.writeln("{0, 0, 0, 0, 0}");
        w.close_block(";");
    }

    /// Creation statements for the body of `__cx_InitGlobals`. Returns
    /// whether any of them can jump to the error label.
    pub fn emit_init(&self, w: &mut CodeWriter, error_label: &str) -> bool {
        let mut jumps = false;
        if !self.strings.is_empty() {
            w.writeln(&format!(
                "if (unlikely(__cx_InitStrings({}) < 0)) goto {};",
                naming::STRING_TABLE_CNAME,
                error_label
            ));
            jumps = true;
        }
        for (value, cname) in &self.ints {
            let create = if i32::try_from(*value).is_ok() {
                format!("PyLong_FromLong({})", value)
            } else if *value == i64::MIN {
                "PyLong_FromLongLong(-9223372036854775807LL - 1)".to_string()
            } else {
                format!("PyLong_FromLongLong({}LL)", value)
            };
            w.writeln(&format!("{} = {}; if (unlikely(!{})) goto {};", cname, create, cname, error_label));
            jumps = true;
        }
        for (text, cname) in &self.floats {
            w.writeln(&format!(
                "{} = PyFloat_FromDouble({}); if (unlikely(!{})) goto {};",
                cname, text, cname, error_label
            ));
            jumps = true;
        }
        jumps
    }

    pub fn emit_cleanup(&self, w: &mut CodeWriter) {
        for cname in self.cnames() {
            w.writeln(&format!("Py_CLEAR({});", cname));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_strings_are_interned_once() {
        let mut t = ConstantTable::new();
        let a = t.intern("append");
        let b = t.string("append", StrKind::Unicode);
        assert_eq!(a, b);
        assert_eq!(a, "__cx_n_s_append");
        let text = t.string("hello world", StrKind::Unicode);
        let bytes = t.string("hello world", StrKind::Bytes);
        assert_ne!(text, bytes);
        let mut w = CodeWriter::new();
        t.emit_string_table(&mut w);
        assert!(w.as_str().contains("{&__cx_n_s_append, \"append\", sizeof(\"append\"), 1, 1},"));
        assert!(w.as_str().contains("{0, 0, 0, 0, 0}"));
    }

    #[test]
    fn negative_and_wide_ints() {
        let mut t = ConstantTable::new();
        assert_eq!(t.int(-3), "__cx_int_neg_3");
        assert_eq!(t.int(-3), "__cx_int_neg_3");
        t.int(1 << 40);
        let mut w = CodeWriter::new();
        assert!(t.emit_init(&mut w, "__cx_L1_error"));
        assert!(w.as_str().contains("PyLong_FromLong(-3)"));
        assert!(w.as_str().contains("PyLong_FromLongLong(1099511627776LL)"));
    }
}

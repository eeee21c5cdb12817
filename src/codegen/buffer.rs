//! Output buffers: an indenting writer and the sectioned main unit.

use std::collections::BTreeMap;

/// Parts of the main translation unit, declared in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Preamble,
    TypeDeclarations,
    UtilityProto,
    ModuleDeclarations,
    GlobalVars,
    Definitions,
    TypeObjects,
    InitGlobals,
    ModuleInit,
    Cleanup,
    MainEntrypoint,
    UtilityDef,
    FilenameTable,
}

impl Section {
    pub const ORDER: [Section; 13] = [
        Section::Preamble,
        Section::TypeDeclarations,
        Section::UtilityProto,
        Section::ModuleDeclarations,
        Section::GlobalVars,
        Section::Definitions,
        Section::TypeObjects,
        Section::InitGlobals,
        Section::ModuleInit,
        Section::Cleanup,
        Section::MainEntrypoint,
        Section::UtilityDef,
        Section::FilenameTable,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Section::Preamble => "Preamble",
            Section::TypeDeclarations => "Type declarations",
            Section::UtilityProto => "Utility prototypes",
            Section::ModuleDeclarations => "Module declarations",
            Section::GlobalVars => "Global variables and constants",
            Section::Definitions => "Function definitions",
            Section::TypeObjects => "Type objects",
            Section::InitGlobals => "Constant initialization",
            Section::ModuleInit => "Module initialization",
            Section::Cleanup => "Module cleanup",
            Section::MainEntrypoint => "Embedded main",
            Section::UtilityDef => "Utility definitions",
            Section::FilenameTable => "Filename table",
        }
    }
}

/// Line-oriented C writer
#[derive(Debug, Clone, Default)]
pub struct CodeWriter {
    output: String,
    indent: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw text without indentation.
    pub fn write(&mut self, s: &str) {
        self.output.push_str(s);
    }

    /// Writes one indented line.
    pub fn writeln(&mut self, s: &str) {
        self.write_indent();
        self.output.push_str(s);
        self.output.push('\n');
    }

    pub fn newline(&mut self) {
        self.output.push('\n');
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.output.push_str("  ");
        }
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// `header {` and one level deeper.
    pub fn open_block(&mut self, header: &str) {
        if header.is_empty() {
            self.writeln("{");
        } else {
            self.writeln(&format!("{} {{", header));
        }
        self.indent();
    }

    /// Closes a block opened with [`open_block`](Self::open_block); `trailer`
    /// follows the brace, e.g. `;` or ` else {`.
    pub fn close_block(&mut self, trailer: &str) {
        self.dedent();
        self.writeln(&format!("}}{}", trailer));
    }

    /// A label sits one level left of the code around it.
    pub fn label(&mut self, name: &str) {
        let saved = self.indent;
        self.indent = saved.saturating_sub(1);
        self.writeln(&format!("{}:;", name));
        self.indent = saved;
    }

    /// Appends another writer's text, re-indented to the current level.
    pub fn append(&mut self, other: &CodeWriter) {
        for line in other.output.lines() {
            if line.is_empty() {
                self.newline();
            } else {
                self.writeln(line);
            }
        }
    }

    /// Appends multi-line text verbatim.
    pub fn put_raw(&mut self, text: &str) {
        self.output.push_str(text);
        if !text.ends_with('\n') {
            self.output.push('\n');
        }
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.output
    }

    pub fn into_string(self) -> String {
        self.output
    }
}

/// The main unit, built section by section and joined in [`Section::ORDER`].
#[derive(Debug, Default)]
pub struct SectionedOutput {
    sections: BTreeMap<Section, CodeWriter>,
}

impl SectionedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&mut self, section: Section) -> &mut CodeWriter {
        self.sections.entry(section).or_default()
    }

    pub fn get(&self, section: Section) -> Option<&str> {
        self.sections.get(&section).map(CodeWriter::as_str)
    }

    pub fn finish(self) -> String {
        let mut out = String::new();
        for section in Section::ORDER {
            let Some(body) = self.sections.get(&section) else {
                continue;
            };
            if body.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("/* --- {} --- */\n", section.title()));
            out.push_str(body.as_str());
        }
        out
    }
}

/// Escapes text for a C string literal. Bytes outside printable ASCII are
/// written as three-digit octal escapes so a following digit cannot extend
/// them.
pub fn escape_string(s: &str) -> String {
    escape_bytes(s.as_bytes())
}

pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut result = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\n' => result.push_str("\\n"),
            b'\r' => result.push_str("\\r"),
            b'\t' => result.push_str("\\t"),
            b'\\' => result.push_str("\\\\"),
            b'"' => result.push_str("\\\""),
            // `??x` would start a trigraph.
            b'?' => result.push_str("\\?"),
            0x20..=0x7e => result.push(char::from(b)),
            _ => result.push_str(&format!("\\{:03o}", b)),
        }
    }
    result
}

/// A C character constant.
pub fn escape_char(c: u8) -> String {
    match c {
        b'\n' => "'\\n'".to_string(),
        b'\r' => "'\\r'".to_string(),
        b'\t' => "'\\t'".to_string(),
        b'\\' => "'\\\\'".to_string(),
        b'\'' => "'\\''".to_string(),
        0 => "'\\0'".to_string(),
        0x20..=0x7e => format!("'{}'", char::from(c)),
        _ => format!("'\\{:03o}'", c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_join_in_fixed_order() {
        let mut out = SectionedOutput::new();
        out.section(Section::ModuleInit).writeln("init();");
        out.section(Section::Preamble).writeln("#include \"Python.h\"");
        out.section(Section::Definitions).writeln("static int f(void);");
        let text = out.finish();
        let pre = text.find("Python.h").unwrap();
        let def = text.find("static int f").unwrap();
        let init = text.find("init();").unwrap();
        assert!(pre < def && def < init);
        assert!(!text.contains("Cleanup"));
    }

    #[test]
    fn non_ascii_is_octal_escaped() {
        assert_eq!(escape_string("a\"b\n"), "a\\\"b\\n");
        assert_eq!(escape_string("é1"), "\\303\\2511");
        assert_eq!(escape_char(b'\''), "'\\''");
        assert_eq!(escape_char(200), "'\\310'");
    }

    #[test]
    fn blocks_and_labels_indent() {
        let mut w = CodeWriter::new();
        w.open_block("if (x)");
        w.writeln("y();");
        w.label("L1");
        w.close_block("");
        assert_eq!(w.as_str(), "if (x) {\n  y();\nL1:;\n}\n");
    }
}

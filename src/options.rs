//! Compile options. Built once per compilation and passed by reference.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Emit `#line` directives mapping C lines back to the source.
    pub emit_line_directives: bool,
    /// Add a `main()` that initializes the interpreter and imports the module.
    pub embed_main_entrypoint: bool,
    pub generate_cleanup_code: CleanupLevel,
    /// Freelist size for types that do not request one explicitly; 0 disables.
    pub freelist_size_default: usize,
    pub default_string_encoding: StringEncoding,
    pub cyclic_gc_enabled: bool,
    pub optimize: OptimizeOptions,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            emit_line_directives: false,
            embed_main_entrypoint: false,
            generate_cleanup_code: CleanupLevel::NONE,
            freelist_size_default: 0,
            default_string_encoding: StringEncoding::Default,
            cyclic_gc_enabled: true,
            optimize: OptimizeOptions::default(),
        }
    }
}

/// How much module state the generated `m_free` function tears down.
///
/// 1 releases module globals, 2 also drops type references and freelists,
/// 3 also releases cached constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CleanupLevel(u8);

#[derive(Debug, Error)]
#[error("cleanup level must be between 0 and 3, got {0}")]
pub struct InvalidCleanupLevel(pub u8);

impl CleanupLevel {
    pub const NONE: CleanupLevel = CleanupLevel(0);
    pub const GLOBALS: CleanupLevel = CleanupLevel(1);
    pub const TYPES: CleanupLevel = CleanupLevel(2);
    pub const CONSTANTS: CleanupLevel = CleanupLevel(3);

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn enabled(self) -> bool {
        self.0 > 0
    }
}

impl TryFrom<u8> for CleanupLevel {
    type Error = InvalidCleanupLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= 3 {
            Ok(CleanupLevel(value))
        } else {
            Err(InvalidCleanupLevel(value))
        }
    }
}

impl From<CleanupLevel> for u8 {
    fn from(level: CleanupLevel) -> u8 {
        level.0
    }
}

/// Encoding used to turn C strings and string literals into `str` objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StringEncoding {
    /// The interpreter's default (UTF-8).
    #[default]
    Default,
    Ascii,
    Named(String),
}

impl StringEncoding {
    /// Codec name passed to the C-API, or `None` for the default.
    pub fn codec(&self) -> Option<&str> {
        match self {
            StringEncoding::Default => None,
            StringEncoding::Ascii => Some("ascii"),
            StringEncoding::Named(name) => Some(name),
        }
    }
}

impl From<String> for StringEncoding {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "" | "default" => StringEncoding::Default,
            "ascii" | "us-ascii" => StringEncoding::Ascii,
            _ => StringEncoding::Named(value),
        }
    }
}

impl From<StringEncoding> for String {
    fn from(value: StringEncoding) -> String {
        value.to_string()
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringEncoding::Default => write!(f, "default"),
            StringEncoding::Ascii => write!(f, "ascii"),
            StringEncoding::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Per-pass switches for the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeOptions {
    pub constant_folding: bool,
    pub builtin_calls: bool,
    pub loop_lowering: bool,
    pub switch_lowering: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            constant_folding: true,
            builtin_calls: true,
            loop_lowering: true,
            switch_lowering: true,
        }
    }
}

impl OptimizeOptions {
    pub fn none() -> Self {
        Self {
            constant_folding: false,
            builtin_calls: false,
            loop_lowering: false,
            switch_lowering: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: CompileOptions =
            serde_json::from_str(r#"{"generate_cleanup_code": 2, "default_string_encoding": "ascii"}"#)
                .expect("valid options");
        assert_eq!(opts.generate_cleanup_code, CleanupLevel::TYPES);
        assert_eq!(opts.default_string_encoding, StringEncoding::Ascii);
        assert!(opts.cyclic_gc_enabled);
        assert!(opts.optimize.loop_lowering);
    }

    #[test]
    fn cleanup_level_is_bounded() {
        assert!(serde_json::from_str::<CompileOptions>(r#"{"generate_cleanup_code": 4}"#).is_err());
    }
}

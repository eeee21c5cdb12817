//! Driver that orchestrates the compilation pipeline.

use crate::ast::Module;
use crate::codegen::{GeneratedModule, ModuleGenerator};
use crate::diagnostics::{codes, Diagnostic, DiagnosticReporter};
use crate::optimize::Pipeline;
use crate::options::{CleanupLevel, CompileOptions, StringEncoding};
use crate::semantic::SymbolTable;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Everything produced for one module. The main unit is `None` when an
/// error was reported.
#[derive(Debug, Default)]
pub struct CompileOutput {
    pub main_unit: Option<String>,
    pub header: Option<String>,
    pub api_header: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Optimizes and generates one analyzed module.
pub fn compile(module: Module, symbols: &SymbolTable, options: &CompileOptions) -> CompileOutput {
    let reporter = DiagnosticReporter::new(&module.filename_table);
    compile_with_reporter(module, symbols, options, reporter)
}

/// [`compile`], reporting into a reporter the caller prepared.
pub fn compile_with_reporter(
    module: Module,
    symbols: &SymbolTable,
    options: &CompileOptions,
    reporter: DiagnosticReporter,
) -> CompileOutput {
    info!(module = %module.name, "compiling");

    let pipeline = Pipeline::new(&options.optimize);
    debug!(passes = ?pipeline.pass_names(), "optimizer pipeline");
    let module = pipeline.run(module, symbols);

    let mut generator = ModuleGenerator::new(symbols, options, reporter);
    let generated = generator.generate(&module);
    let reporter = generator.into_reporter();

    match generated {
        Ok(GeneratedModule { main_unit, header, api_header }) if !reporter.has_errors() => CompileOutput {
            main_unit: Some(main_unit),
            header,
            api_header,
            diagnostics: reporter.take_diagnostics(),
        },
        Ok(_) => {
            warn!(errors = reporter.error_count(), "output suppressed");
            CompileOutput { diagnostics: reporter.take_diagnostics(), ..CompileOutput::default() }
        }
        Err(err) => {
            warn!(error = %err, "internal error");
            CompileOutput { diagnostics: reporter.take_diagnostics(), ..CompileOutput::default() }
        }
    }
}

/// The serialized form a front end hands to the compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationInput {
    pub module: Module,
    #[serde(default)]
    pub symbols: SymbolTable,
    #[serde(default)]
    pub options: Option<CompileOptions>,
}

/// Option values given on the command line; they win over the input's.
#[derive(Debug, Clone, Default)]
pub struct OptionOverrides {
    pub line_directives: bool,
    pub embed_main: bool,
    pub cleanup_level: Option<CleanupLevel>,
    pub freelist: Option<usize>,
    pub string_encoding: Option<StringEncoding>,
    pub no_gc: bool,
}

impl OptionOverrides {
    pub fn apply(&self, options: &mut CompileOptions) {
        options.emit_line_directives |= self.line_directives;
        options.embed_main_entrypoint |= self.embed_main;
        if let Some(level) = self.cleanup_level {
            options.generate_cleanup_code = level;
        }
        if let Some(size) = self.freelist {
            options.freelist_size_default = size;
        }
        if let Some(encoding) = &self.string_encoding {
            options.default_string_encoding = encoding.clone();
        }
        if self.no_gc {
            options.cyclic_gc_enabled = false;
        }
    }
}

/// The compilation driver
pub struct Driver {
    file: String,
    source: String,
    overrides: OptionOverrides,
    dump_tree: bool,
}

impl Driver {
    /// `source` is the JSON text of a [`CompilationInput`].
    pub fn new(file: String, source: String) -> Self {
        Self {
            file,
            source,
            overrides: OptionOverrides::default(),
            dump_tree: false,
        }
    }

    /// Reads the input from disk.
    pub fn from_path(path: &Path) -> Result<Self, Diagnostic> {
        match std::fs::read_to_string(path) {
            Ok(source) => Ok(Self::new(path.to_string_lossy().to_string(), source)),
            Err(e) => Err(Diagnostic::error(
                codes::UNREADABLE_INPUT,
                format!("could not read file '{}'", path.display()),
            )
            .with_note(e.to_string())),
        }
    }

    pub fn set_overrides(&mut self, overrides: OptionOverrides) {
        self.overrides = overrides;
    }

    pub fn set_dump_tree(&mut self, enabled: bool) {
        self.dump_tree = enabled;
    }

    /// Run the compilation pipeline
    pub fn compile(&mut self) -> Result<CompileOutput, Vec<Diagnostic>> {
        let input: CompilationInput = serde_json::from_str(&self.source).map_err(|e| {
            vec![Diagnostic::error(codes::INVALID_INPUT, format!("{}: malformed compilation input", self.file))
                .with_note(e.to_string())]
        })?;

        let mut options = input.options.unwrap_or_default();
        self.overrides.apply(&mut options);
        debug!(?options, "effective options");

        if self.dump_tree {
            eprintln!("=== Module ===");
            eprintln!("{:#?}", input.module);
            eprintln!();
        }

        let reporter = self.reporter_for(&input.module.filename_table);
        let output = compile_with_reporter(input.module, &input.symbols, &options, reporter);
        if output.main_unit.is_none() {
            return Err(output.diagnostics);
        }
        Ok(output)
    }

    /// Source files named by the filename table are looked up next to the
    /// input so diagnostics can quote them. Missing ones are skipped.
    fn reporter_for(&self, files: &[String]) -> DiagnosticReporter {
        let dir = Path::new(&self.file).parent().unwrap_or_else(|| Path::new(""));
        files.iter().enumerate().fold(DiagnosticReporter::new(files), |reporter, (index, name)| {
            match std::fs::read_to_string(dir.join(name)) {
                Ok(text) => reporter.with_source(index, &text),
                Err(e) => {
                    debug!(file = %name, error = %e, "source not available for quoting");
                    reporter
                }
            }
        })
    }
}

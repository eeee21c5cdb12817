//! C code generation for an analyzed module.
//!
//! [`ModuleGenerator`] drives the emitters in a fixed order, each writing
//! into its own [`Section`] of the main unit. Shared state (constants,
//! utility snippets, the fused-type specializer and the diagnostic
//! reporter) lives in one [`Context`] threaded through every emitter.

pub mod buffer;
pub mod constants;
pub mod expr;
pub mod function;
pub mod header;
pub mod lifecycle;
pub mod module_init;
pub mod stmt;
pub mod typedecl;
pub mod utility;
pub mod wrappers;

use crate::ast::visit::{self, Visitor};
use crate::ast::{Expr, FuncDef, Module};
use crate::diagnostics::{Diagnostic, DiagnosticReporter};
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::options::{CompileOptions, StringEncoding};
use crate::semantic::SymbolTable;
use crate::types::{Specializer, TypeRef};
use buffer::{escape_string, Section, SectionedOutput};
use constants::ConstantTable;
use tracing::{debug, info};
use utility::UtilityRegistry;

/// State shared by every emitter of one module.
pub struct Context<'a> {
    pub symbols: &'a SymbolTable,
    pub options: &'a CompileOptions,
    pub module_name: String,
    pub filenames: Vec<String>,
    pub reporter: DiagnosticReporter,
    pub utility: UtilityRegistry,
    pub constants: ConstantTable,
    pub specializer: Specializer,
    pub out: SectionedOutput,
}

impl<'a> Context<'a> {
    pub fn new(symbols: &'a SymbolTable, options: &'a CompileOptions, reporter: DiagnosticReporter) -> Self {
        Self {
            symbols,
            options,
            module_name: String::new(),
            filenames: Vec::new(),
            reporter,
            utility: UtilityRegistry::new(),
            constants: ConstantTable::new(),
            specializer: Specializer::new(),
            out: SectionedOutput::new(),
        }
    }
}

/// Text produced for one module.
#[derive(Debug, Clone, Default)]
pub struct GeneratedModule {
    pub main_unit: String,
    pub header: Option<String>,
    pub api_header: Option<String>,
}

const PREAMBLE: &str = r#"#define PY_SSIZE_T_CLEAN
#include "Python.h"
#include <stdio.h>
#include <string.h>
#include <stddef.h>
#if PY_VERSION_HEX < 0x03070000
  #error "requires Python 3.7 or newer"
#endif

#ifndef CX_INLINE
  #if defined(__GNUC__)
    #define CX_INLINE __inline__
  #elif defined(_MSC_VER)
    #define CX_INLINE __inline
  #else
    #define CX_INLINE
  #endif
#endif
#ifndef CX_UNUSED
  #if defined(__GNUC__)
    #define CX_UNUSED __attribute__((__unused__))
  #else
    #define CX_UNUSED
  #endif
#endif
#if defined(__GNUC__) && (__GNUC__ > 2 || (__GNUC__ == 2 && (__GNUC_MINOR__ > 95)))
  #define likely(x)   __builtin_expect(!!(x), 1)
  #define unlikely(x) __builtin_expect(!!(x), 0)
#else
  #define likely(x)   (x)
  #define unlikely(x) (x)
#endif
#ifndef CX_EXTERN_C
  #ifdef __cplusplus
    #define CX_EXTERN_C extern "C"
  #else
    #define CX_EXTERN_C extern
  #endif
#endif
#ifndef DL_IMPORT
  #define DL_IMPORT(t) t
#endif
#ifndef DL_EXPORT
  #define DL_EXPORT(t) t
#endif"#;

/// Fails on an expression or declaration whose type still holds a fused
/// placeholder outside a fused function body.
struct FusedCheck {
    found: Option<InternalError>,
    context: String,
}

impl FusedCheck {
    fn new() -> Self {
        Self { found: None, context: String::new() }
    }

    fn check_type(&mut self, ty: &TypeRef, context: &str) {
        if self.found.is_some() || !ty.contains_fused() {
            return;
        }
        let mut names = Vec::new();
        ty.fused_names(&mut names);
        self.found = Some(InternalError::UnspecializedFused {
            name: names.join(", "),
            context: context.to_string(),
        });
    }

    fn check_function(&mut self, def: &FuncDef) {
        let signature_fused =
            def.return_type.contains_fused() || def.params.iter().any(|p| p.ty.contains_fused());
        // Fused cdef bodies are specialized per combination; the others are rejected with a diagnostic.
        if signature_fused {
            return;
        }
        self.context = format!("function '{}'", def.name);
        self.visit_body(&def.body);
    }

    fn run(mut self, module: &Module, symbols: &SymbolTable) -> InternalResult<()> {
        for g in &module.globals {
            if let Some(entry) = symbols.get(g.entry) {
                self.check_type(&entry.ty, &format!("global '{}'", entry.name));
            }
        }
        for s in &module.structs {
            if let Some(st) = s.ty.as_struct() {
                for field in &st.fields {
                    self.check_type(&field.ty, &format!("field '{}.{}'", st.name, field.name));
                }
            }
        }
        for class in &module.classes {
            if let Some(c) = class.ty.as_class() {
                for field in &c.fields {
                    self.check_type(&field.ty, &format!("attribute '{}.{}'", c.name, field.name));
                }
            }
            for method in &class.methods {
                self.check_function(method);
            }
            for prop in &class.properties {
                for accessor in prop.getter.iter().chain(prop.setter.iter()) {
                    self.check_function(accessor);
                }
            }
        }
        for def in &module.functions {
            self.check_function(def);
        }
        self.context = "module body".to_string();
        self.visit_body(&module.body);
        match self.found {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Visitor for FusedCheck {
    fn visit_expr(&mut self, expr: &Expr) {
        let context = self.context.clone();
        self.check_type(&expr.ty, &context);
        if self.found.is_none() {
            visit::super_expr(self, expr);
        }
    }
}

/// Generates the main unit and headers for one module.
pub struct ModuleGenerator<'a> {
    cx: Context<'a>,
}

impl<'a> ModuleGenerator<'a> {
    pub fn new(symbols: &'a SymbolTable, options: &'a CompileOptions, reporter: DiagnosticReporter) -> Self {
        Self { cx: Context::new(symbols, options, reporter) }
    }

    pub fn reporter(&self) -> &DiagnosticReporter {
        &self.cx.reporter
    }

    pub fn into_reporter(self) -> DiagnosticReporter {
        self.cx.reporter
    }

    /// Runs every emitter. An internal error is also recorded as an `E900` diagnostic.
    pub fn generate(&mut self, module: &Module) -> InternalResult<GeneratedModule> {
        let result = self.generate_inner(module);
        if let Err(err) = &result {
            self.cx.reporter.add(Diagnostic::internal(err));
        }
        result
    }

    fn generate_inner(&mut self, module: &Module) -> InternalResult<GeneratedModule> {
        info!(module = %module.name, "generating C code");
        let cx = &mut self.cx;
        cx.module_name = module.name.clone();
        cx.filenames = module.filename_table.clone();

        FusedCheck::new().run(module, cx.symbols)?;

        emit_preamble(cx);
        emit_filename_table(cx);
        typedecl::emit_type_declarations(cx, module)?;
        module_init::emit_global_declarations(cx, module)?;

        let mut rows = Vec::new();
        for def in &module.functions {
            if let Some(row) = wrappers::emit_module_function(cx, def)? {
                rows.push(row);
            }
        }
        debug!(functions = module.functions.len(), wrapped = rows.len(), "emitted functions");

        let mut classes = Vec::with_capacity(module.classes.len());
        for class in &module.classes {
            if class.ty.as_class().map_or(false, |c| c.is_external) {
                continue;
            }
            classes.push(lifecycle::emit_class(cx, class)?);
        }
        debug!(classes = classes.len(), "emitted extension types");

        module_init::emit_module_def(cx, module, &rows);
        module_init::emit_module_init(cx, module)?;
        module_init::emit_cleanup(cx, module, &classes)?;
        module_init::emit_main(cx, module);
        // Every utility requirement is known only after the other emitters ran.
        module_init::emit_init_globals(cx)?;

        let header = header::public_header(cx, module)?;
        let api_header = header::api_header(cx, module)?;
        debug!(
            utilities = cx.utility.len(),
            header = header.is_some(),
            api_header = api_header.is_some(),
            "generation finished"
        );

        let out = std::mem::take(&mut cx.out);
        Ok(GeneratedModule { main_unit: out.finish(), header, api_header })
    }
}

fn emit_preamble(cx: &mut Context<'_>) {
    let encoding = &cx.options.default_string_encoding;
    let w = cx.out.section(Section::Preamble);
    w.writeln(&format!("/* Generated by cextc {} */", env!("CARGO_PKG_VERSION")));
    w.newline();
    w.put_raw(PREAMBLE);
    w.newline();
    let is_ascii = matches!(encoding, StringEncoding::Ascii) as u8;
    let is_default = matches!(encoding, StringEncoding::Default) as u8;
    w.writeln(&format!("#define __CX_DEFAULT_STRING_ENCODING_IS_ASCII {}", is_ascii));
    w.writeln(&format!("#define __CX_DEFAULT_STRING_ENCODING_IS_DEFAULT {}", is_default));
    w.writeln(&format!(
        "#define __CX_DEFAULT_STRING_ENCODING \"{}\"",
        escape_string(encoding.codec().unwrap_or("utf-8"))
    ));
    w.newline();
    w.writeln(&format!("static PyObject *{};", naming::MODULE_CNAME));
    w.writeln(&format!("static PyObject *{};", naming::MODULE_DICT_CNAME));
    w.writeln(&format!("static PyObject *{};", naming::BUILTINS_CNAME));
    w.writeln(&format!("static PyObject *{};", naming::EMPTY_TUPLE_CNAME));
    w.writeln(&format!("static int {} = 0;", naming::LINENO_CNAME));
    w.writeln(&format!("static int {} = 0;", naming::CLINENO_CNAME));
    w.writeln(&format!("static const char *{} = 0;", naming::FILENAME_CNAME));
    w.writeln(&format!("static const char *{}[];", naming::FILENAME_TABLE_CNAME));
}

fn emit_filename_table(cx: &mut Context<'_>) {
    let w = cx.out.section(Section::FilenameTable);
    w.open_block(&format!("static const char *{}[] =", naming::FILENAME_TABLE_CNAME));
    for file in &cx.filenames {
        w.writeln(&format!("\"{}\",", escape_string(file)));
    }
    w.writeln("0");
    w.close_block(";");
}

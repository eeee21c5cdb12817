//! The public declarations header and the C API import header.
//!
//! The public header declares everything marked `public` with
//! `DL_IMPORT` linkage for C code linking against the extension. The API
//! header lets another extension call `api` functions through the capsule
//! table published at module init.

use super::buffer::CodeWriter;
use super::module_init::api_signature;
use super::typedecl::{collect_classes, declaration_nodes, emit_definition, sort_declarations};
use super::utility::catalog;
use super::Context;
use crate::ast::{FuncKind, Module};
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::semantic::{Storage, Visibility};
use crate::types::{DeclOptions, Type};
use tracing::debug;

const LINKAGE_MACROS: &str = r#"#ifndef CX_EXTERN_C
  #ifdef __cplusplus
    #define CX_EXTERN_C extern "C"
  #else
    #define CX_EXTERN_C extern
  #endif
#endif
#ifndef DL_IMPORT
  #define DL_IMPORT(_T) _T
#endif"#;

fn open_guard(w: &mut CodeWriter, guard: &str) {
    w.writeln(&format!("#ifndef {}", guard));
    w.writeln(&format!("#define {}", guard));
    w.newline();
    w.writeln("#include \"Python.h\"");
    w.newline();
}

fn close_guard(w: &mut CodeWriter, guard: &str) {
    w.newline();
    w.writeln(&format!("#endif /* !{} */", guard));
}

/// The public header, or `None` when nothing is public.
pub fn public_header(cx: &Context<'_>, module: &Module) -> InternalResult<Option<String>> {
    let symbols = cx.symbols;
    let mut decls = Vec::new();
    for f in module.functions.iter().filter(|f| f.kind != FuncKind::Def) {
        let entry = symbols.get(f.entry).ok_or(InternalError::UnknownEntry(f.entry.0))?;
        if entry.visibility == Visibility::Public {
            decls.push(entry.ty.declaration_code(&entry.cname, &DeclOptions::with_linkage("DL_IMPORT")));
        }
    }
    for g in &module.globals {
        let entry = symbols.get(g.entry).ok_or(InternalError::UnknownEntry(g.entry.0))?;
        if entry.visibility == Visibility::Public && entry.storage == Storage::ModuleStatic {
            decls.push(entry.ty.declaration_code(&entry.cname, &DeclOptions::with_linkage("DL_IMPORT")));
        }
    }
    for class in &module.classes {
        let entry = symbols.get(class.entry).ok_or(InternalError::UnknownEntry(class.entry.0))?;
        if let (Visibility::Public, Some(c)) = (entry.visibility, class.ty.as_class()) {
            decls.push(format!("DL_IMPORT(PyTypeObject) {}", c.typeobj_cname()));
        }
    }
    if decls.is_empty() {
        return Ok(None);
    }
    debug!(declarations = decls.len(), "emitting public header");

    let guard = naming::header_guard(&cx.module_name, false);
    let mut w = CodeWriter::new();
    open_guard(&mut w, &guard);
    let nodes = sort_declarations(declaration_nodes(module, &collect_classes(module)))?;
    for node in &nodes {
        emit_definition(node, &mut w);
    }
    w.put_raw(LINKAGE_MACROS);
    w.newline();
    for decl in decls {
        w.writeln(&format!("CX_EXTERN_C {};", decl));
    }
    w.newline();
    w.writeln(&format!("PyMODINIT_FUNC {}(void);", naming::init_function_name(&cx.module_name)));
    close_guard(&mut w, &guard);
    Ok(Some(w.into_string()))
}

/// The API header, or `None` when the module exports no C functions.
pub fn api_header(cx: &Context<'_>, module: &Module) -> InternalResult<Option<String>> {
    let symbols = cx.symbols;
    let mut exported = Vec::new();
    for f in module.functions.iter().filter(|f| f.kind != FuncKind::Def) {
        let entry = symbols.get(f.entry).ok_or(InternalError::UnknownEntry(f.entry.0))?;
        if entry.api {
            exported.push((f.name.as_str(), entry));
        }
    }
    if exported.is_empty() {
        return Ok(None);
    }
    debug!(functions = exported.len(), "emitting api header");

    let mangled = naming::mangle(&cx.module_name, "");
    let importer = format!("__cx_ImportFunction_{}", mangled.trim_end_matches('_'));
    let guard = naming::header_guard(&cx.module_name, true);
    let mut w = CodeWriter::new();
    open_guard(&mut w, &guard);
    let nodes = sort_declarations(declaration_nodes(module, &collect_classes(module)))?;
    for node in &nodes {
        emit_definition(node, &mut w);
    }

    let mut slots = Vec::with_capacity(exported.len());
    for (name, entry) in &exported {
        let pointer = format!("{}{}", naming::API_FUNC_PREFIX, naming::mangle(&cx.module_name, name));
        let ptr_ty = match entry.ty.as_function() {
            Some(f) => Type::pointer(Type::function(f.clone())),
            None => entry.ty.clone(),
        };
        w.writeln(&format!("static {} = 0;", ptr_ty.declaration_code(&pointer, &DeclOptions::code())));
        w.writeln(&format!("#define {} {}", name, pointer));
        slots.push((name.to_string(), pointer, api_signature(&entry.ty)));
    }
    w.newline();

    let import_function = catalog::lookup(catalog::MODULE_SETUP, "ImportFunction")
        .ok_or_else(|| InternalError::UnknownUtility { catalog: catalog::MODULE_SETUP.into(), name: "ImportFunction".into() })?;
    w.put_raw(&import_function.implementation.replace("__cx_ImportFunction", &importer));
    w.newline();

    w.open_block(&format!("static int import_{}(void)", mangled.trim_end_matches('_')));
    w.writeln("PyObject *module = 0;");
    w.writeln(&format!("module = PyImport_ImportModule(\"{}\");", cx.module_name));
    w.writeln("if (!module) goto bad;");
    for (name, pointer, sig) in &slots {
        w.writeln(&format!(
            "if ({}(module, \"{}\", (void (**)(void))&{}, \"{}\") < 0) goto bad;",
            importer, name, pointer, sig
        ));
    }
    w.writeln("Py_DECREF(module); module = 0;");
    w.writeln("return 0;");
    w.label("bad");
    w.writeln("Py_XDECREF(module);");
    w.writeln("return -1;");
    w.close_block("");
    close_guard(&mut w, &guard);
    Ok(Some(w.into_string()))
}

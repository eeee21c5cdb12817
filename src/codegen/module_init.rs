//! Module globals, the `PyInit_<module>` function, constant setup,
//! teardown and the optional embedded `main`.
//!
//! Module init is one straight chain of fallible steps sharing a single
//! error label. Each step relies on the ones before it: types are imported
//! before local types that derive from them are readied, vtables are filled
//! before any type is published, and top-level code runs last.

use super::buffer::{escape_string, CodeWriter, Section};
use super::expr::base_path;
use super::function::{BodyEmitter, FunctionState, Operand, ERROR_LABEL};
use super::lifecycle::EmittedClass;
use super::typedecl::collect_classes;
use super::utility::catalog;
use super::wrappers::MethodEntry;
use super::Context;
use crate::ast::{Expr, ExprKind, FuncKind, Module};
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::options::CleanupLevel;
use crate::semantic::{Storage, Visibility};
use crate::types::{ClassType, DeclOptions, Type, TypeRef};
use tracing::debug;

/// Signature text stored with exported C functions; importers must compute
/// the same text from their declaration.
pub fn api_signature(ty: &TypeRef) -> String {
    match ty.as_function() {
        Some(f) => Type::function(f.clone()).empty_declaration_code(),
        None => ty.empty_declaration_code(),
    }
}

/// Declares C-level module globals and the pointers of imported functions.
pub fn emit_global_declarations(cx: &mut Context<'_>, module: &Module) -> InternalResult<()> {
    let symbols = cx.symbols;
    for g in &module.globals {
        let entry = symbols.get(g.entry).ok_or(InternalError::UnknownEntry(g.entry.0))?;
        if entry.storage != Storage::ModuleStatic {
            continue;
        }
        if entry.ty.contains_fused() {
            return Err(InternalError::UnspecializedFused { name: entry.ty.to_string(), context: entry.name.clone() });
        }
        let line = match entry.visibility {
            Visibility::Public => entry.ty.declaration_code(&entry.cname, &DeclOptions::with_linkage("DL_EXPORT")),
            _ => format!("static {}", entry.ty.declaration_code(&entry.cname, &DeclOptions::code())),
        };
        let init = if entry.ty.is_pyobject() { " = 0" } else { "" };
        cx.out.section(Section::GlobalVars).writeln(&format!("{}{};", line, init));
    }
    for import in &module.function_imports {
        let entry = symbols.get(import.entry).ok_or(InternalError::UnknownEntry(import.entry.0))?;
        let pointer = match entry.ty.strip() {
            Type::Pointer(_) => entry.ty.clone(),
            _ => Type::pointer(entry.ty.clone()),
        };
        let decl = pointer.declaration_code(&entry.cname, &DeclOptions::code());
        cx.out.section(Section::ModuleDeclarations).writeln(&format!("static {} = 0;", decl));
    }
    Ok(())
}

/// The module method table and `PyModuleDef`.
pub fn emit_module_def(cx: &mut Context<'_>, module: &Module, rows: &[MethodEntry]) {
    let cleanup = cx.options.generate_cleanup_code.enabled();
    if cleanup {
        cx.out
            .section(Section::ModuleDeclarations)
            .writeln(&format!("static void {}(void *self);", naming::CLEANUP_CNAME));
    }
    let w = cx.out.section(Section::ModuleInit);
    w.open_block(&format!("static PyMethodDef {}[] =", naming::MODULE_METHODS_CNAME));
    for row in rows {
        w.writeln(&row.table_row());
    }
    w.writeln("{0, 0, 0, 0}");
    w.close_block(";");
    w.newline();
    let doc = match &module.doc {
        Some(d) => format!("\"{}\"", escape_string(d)),
        None => "0".to_string(),
    };
    w.open_block(&format!("static struct PyModuleDef {} =", naming::MODULEDEF_CNAME));
    w.writeln("PyModuleDef_HEAD_INIT,");
    w.writeln(&format!("\"{}\", /*m_name*/", escape_string(&module.name)));
    w.writeln(&format!("{}, /*m_doc*/", doc));
    w.writeln("-1, /*m_size*/");
    w.writeln(&format!("{}, /*m_methods*/", naming::MODULE_METHODS_CNAME));
    w.writeln("0, /*m_slots*/");
    w.writeln("0, /*m_traverse*/");
    w.writeln("0, /*m_clear*/");
    let free = if cleanup { naming::CLEANUP_CNAME } else { "0" };
    w.writeln(&format!("{} /*m_free*/", free));
    w.close_block(";");
    w.newline();
}

fn own_class_tags(module: &Module) -> Vec<String> {
    module
        .classes
        .iter()
        .filter_map(|c| c.ty.as_class())
        .filter(|c| !c.is_external)
        .map(ClassType::objstruct_cname)
        .collect()
}

impl<'c, 'a> BodyEmitter<'c, 'a> {
    fn import_types(&mut self, module: &Module) -> InternalResult<()> {
        let own = own_class_tags(module);
        for ty in collect_classes(module) {
            let Some(c) = ty.as_class() else { continue };
            if own.contains(&c.objstruct_cname()) {
                continue;
            }
            self.require(catalog::MODULE_SETUP, "ImportType")?;
            let from = module
                .type_imports
                .iter()
                .find(|i| i.ty.as_class().is_some_and(|ic| ic.same_class(c)))
                .map(|i| i.module.clone())
                .unwrap_or_else(|| c.module.clone());
            let ptype = c.typeptr_cname();
            self.w.writeln(&format!(
                "{} = __cx_ImportType(\"{}\", \"{}\", sizeof(struct {}));",
                ptype,
                escape_string(&from),
                escape_string(&c.name),
                c.objstruct_cname()
            ));
            self.error_if_null(&ptype, Default::default());
            if c.has_vtable() {
                self.require(catalog::EXTENSION_TYPE, "GetVtable")?;
                let vtabptr = c.vtabptr_cname();
                self.w.writeln(&format!(
                    "{} = (struct {} *)__cx_GetVtable({}->tp_dict);",
                    vtabptr,
                    c.vtabstruct_cname(),
                    ptype
                ));
                self.error_if_null(&vtabptr, Default::default());
            }
        }
        Ok(())
    }

    fn import_functions(&mut self, module: &Module) -> InternalResult<()> {
        for import in &module.function_imports {
            let entry = self.entry(import.entry)?;
            self.require(catalog::MODULE_SETUP, "ImportFunction")?;
            let temp = self.allocate_temp(&Type::object())?;
            self.w.writeln(&format!("{} = PyImport_ImportModule(\"{}\");", temp, escape_string(&import.module)));
            self.error_if_null(&temp, entry.pos);
            self.error_if(
                &format!(
                    "__cx_ImportFunction({}, \"{}\", (void (**)(void))&{}, \"{}\") < 0",
                    temp,
                    escape_string(&import.name),
                    entry.cname,
                    escape_string(&api_signature(&entry.ty))
                ),
                entry.pos,
            );
            self.release(Operand::owned(temp, Type::object()));
        }
        Ok(())
    }

    fn fill_vtable(&mut self, c: &ClassType) {
        let vtable = c.vtable_cname();
        self.w.writeln(&format!("{} = &{};", c.vtabptr_cname(), vtable));
        if let Some(base) = c.base_class().filter(|b| b.has_vtable()) {
            self.w.writeln(&format!("{}.{} = *{};", vtable, naming::BASE_MEMBER, base.vtabptr_cname()));
        }
        for slot in &c.vtable {
            let Some((depth, _, declared)) = c.slot_declarer(&slot.name) else { continue };
            let cast = Type::pointer(declared.ty.clone()).empty_declaration_code();
            self.w.writeln(&format!(
                "{}.{}{} = ({}){};",
                vtable,
                base_path(depth),
                naming::sanitize(&slot.name),
                cast,
                slot.cname
            ));
        }
    }

    fn ready_types(&mut self, module: &Module) -> InternalResult<()> {
        let own = own_class_tags(module);
        for ty in collect_classes(module) {
            let Some(c) = ty.as_class() else { continue };
            if !own.contains(&c.objstruct_cname()) {
                continue;
            }
            debug!(class = %c.qualified_name(), "readying type");
            let pos = module
                .classes
                .iter()
                .find(|d| d.ty.as_class().is_some_and(|dc| dc.same_class(c)))
                .map(|d| d.pos)
                .unwrap_or_default();
            let typeobj = c.typeobj_cname();
            if c.has_vtable() {
                self.fill_vtable(c);
            }
            if let Some(base) = c.base_class() {
                self.w.writeln(&format!("{}.tp_base = {};", typeobj, base.typeptr_cname()));
            }
            self.error_if(&format!("PyType_Ready(&{}) < 0", typeobj), pos);
            if c.has_vtable() {
                self.require(catalog::EXTENSION_TYPE, "SetVtable")?;
                self.error_if(&format!("__cx_SetVtable({}.tp_dict, {}) < 0", typeobj, c.vtabptr_cname()), pos);
            }
            self.error_if(
                &format!(
                    "PyObject_SetAttrString({}, \"{}\", (PyObject *)&{}) < 0",
                    naming::MODULE_CNAME,
                    escape_string(&c.name),
                    typeobj
                ),
                pos,
            );
            self.w.writeln(&format!("{} = &{};", c.typeptr_cname(), typeobj));
        }
        Ok(())
    }

    fn export_functions(&mut self, module: &Module) -> InternalResult<()> {
        for f in module.functions.iter().filter(|f| f.kind != FuncKind::Def) {
            let entry = self.entry(f.entry)?;
            if !entry.api {
                continue;
            }
            self.require(catalog::MODULE_SETUP, "ExportFunction")?;
            self.error_if(
                &format!(
                    "__cx_ExportFunction(\"{}\", (void (*)(void)){}, \"{}\") < 0",
                    escape_string(&f.name),
                    entry.cname,
                    escape_string(&api_signature(&entry.ty))
                ),
                f.pos,
            );
        }
        Ok(())
    }

    fn init_globals(&mut self, module: &Module) -> InternalResult<()> {
        for g in &module.globals {
            let entry = self.entry(g.entry)?;
            if entry.storage == Storage::ModuleStatic && entry.ty.is_pyobject() {
                let ty = entry.ty.clone();
                self.store(&entry.cname, &ty, Operand::borrowed("Py_None", Type::object()));
            }
        }
        for g in &module.globals {
            let Some(init) = &g.init else { continue };
            let entry = self.entry(g.entry)?;
            self.mark_position(g.pos);
            let value = self.expr(init)?;
            let target = Expr::new(
                ExprKind::Name { name: entry.name.clone(), entry: g.entry },
                entry.ty.clone(),
                g.pos,
            );
            self.assign_to(&target, value, g.pos)?;
        }
        Ok(())
    }
}

/// Emits `PyInit_<module>`.
pub fn emit_module_init(cx: &mut Context<'_>, module: &Module) -> InternalResult<()> {
    let init_name = naming::init_function_name(&module.name);
    let qualname = format!("init {}", module.name);
    let mut em = BodyEmitter::new(cx, FunctionState::new(qualname.clone(), None));
    let m = naming::MODULE_CNAME;
    em.w.writeln(&format!("{} = PyModule_Create(&{});", m, naming::MODULEDEF_CNAME));
    em.error_if_null(m, Default::default());
    em.w.writeln(&format!("{} = PyModule_GetDict({});", naming::MODULE_DICT_CNAME, m));
    em.error_if_null(naming::MODULE_DICT_CNAME, Default::default());
    em.w.writeln(&format!("{} = PyImport_AddModule(\"builtins\");", naming::BUILTINS_CNAME));
    em.error_if_null(naming::BUILTINS_CNAME, Default::default());
    em.w.writeln(&format!("Py_INCREF({});", naming::BUILTINS_CNAME));
    em.error_if(
        &format!("PyObject_SetAttrString({}, \"__builtins__\", {}) < 0", m, naming::BUILTINS_CNAME),
        Default::default(),
    );
    em.w.writeln(&format!("{} = PyTuple_New(0);", naming::EMPTY_TUPLE_CNAME));
    em.error_if_null(naming::EMPTY_TUPLE_CNAME, Default::default());
    em.error_if(&format!("{}() < 0", naming::INIT_GLOBALS_CNAME), Default::default());

    em.w.writeln("/* type imports */");
    em.import_types(module)?;
    em.w.writeln("/* function imports */");
    em.import_functions(module)?;
    em.w.writeln("/* type init */");
    em.ready_types(module)?;
    em.w.writeln("/* function exports */");
    em.export_functions(module)?;
    em.w.writeln("/* module globals */");
    em.init_globals(module)?;
    em.w.writeln("/* module body */");
    em.stmts(&module.body)?;
    em.require(catalog::EXCEPTIONS, "AddTraceback")?;

    let BodyEmitter { state, w: body, .. } = em;
    let w = cx.out.section(Section::ModuleInit);
    w.writeln(&format!("PyMODINIT_FUNC {}(void); /*proto*/", init_name));
    w.open_block(&format!("PyMODINIT_FUNC {}(void)", init_name));
    for decl in state.temp_declarations() {
        w.writeln(&decl);
    }
    w.append(&body);
    w.writeln(&format!("return {};", m));
    w.label(ERROR_LABEL);
    for temp in state.object_temps() {
        w.writeln(&format!("Py_XDECREF({});", temp));
    }
    w.open_block(&format!("if ({})", m));
    w.writeln(&format!(
        "if ({}) __cx_AddTraceback(\"{}\", {}, {}, {});",
        naming::MODULE_DICT_CNAME,
        escape_string(&qualname),
        naming::CLINENO_CNAME,
        naming::LINENO_CNAME,
        naming::FILENAME_CNAME
    ));
    w.writeln(&format!("Py_CLEAR({});", m));
    w.close_block(" else if (!PyErr_Occurred()) {");
    w.indent();
    w.writeln(&format!("PyErr_SetString(PyExc_ImportError, \"{}\");", escape_string(&qualname)));
    w.close_block("");
    w.writeln("return NULL;");
    w.close_block("");
    w.newline();
    Ok(())
}

/// Emits `__cx_InitGlobals`, which creates every cached constant and runs
/// the init statements of utility snippets. Must run after all other
/// emission so every constant and snippet is known.
pub fn emit_init_globals(cx: &mut Context<'_>) -> InternalResult<()> {
    if cx.constants.has_strings() {
        cx.utility.require(catalog::MODULE_SETUP, "InitStrings")?;
    }
    let mut snippet_init = CodeWriter::new();
    cx.utility.emit(&mut cx.out, &mut snippet_init);

    let mut body = CodeWriter::new();
    body.indent();
    let mut jumps = cx.constants.emit_init(&mut body, catalog::INIT_ERROR_LABEL);
    if !snippet_init.is_empty() {
        body.append(&snippet_init);
        jumps = true;
    }

    let decls = cx.out.section(Section::GlobalVars);
    cx.constants.emit_declarations(decls);
    cx.constants.emit_string_table(decls);

    let w = cx.out.section(Section::InitGlobals);
    w.writeln(&format!("static int {}(void) {{", naming::INIT_GLOBALS_CNAME));
    w.put_raw(body.as_str());
    w.indent();
    w.writeln("return 0;");
    if jumps {
        w.label(catalog::INIT_ERROR_LABEL);
        w.writeln("return -1;");
    }
    w.close_block("");
    w.newline();
    Ok(())
}

/// Emits the `m_free` function for the configured cleanup level.
pub fn emit_cleanup(cx: &mut Context<'_>, module: &Module, classes: &[EmittedClass]) -> InternalResult<()> {
    let level = cx.options.generate_cleanup_code;
    if !level.enabled() {
        return Ok(());
    }
    let symbols = cx.symbols;
    let mut w = CodeWriter::new();
    w.open_block(&format!("static void {}(CX_UNUSED void *self)", naming::CLEANUP_CNAME));
    w.writeln("/* globals */");
    for g in &module.globals {
        let entry = symbols.get(g.entry).ok_or(InternalError::UnknownEntry(g.entry.0))?;
        if entry.storage == Storage::ModuleStatic && entry.ty.is_pyobject() {
            w.writeln(&format!("Py_CLEAR({});", entry.cname));
        }
    }
    if level >= CleanupLevel::TYPES {
        w.writeln("/* types */");
        for emitted in classes {
            let Some(c) = emitted.class() else { continue };
            if emitted.freelist.is_some() {
                let suffix = c.slot_suffix();
                let count = format!("{}{}", naming::FREECOUNT_PREFIX, suffix);
                w.open_block(&format!("while ({} > 0)", count));
                w.writeln(&format!(
                    "PyObject *o = (PyObject *){}{}[--{}];",
                    naming::FREELIST_PREFIX,
                    suffix,
                    count
                ));
                w.writeln("(*Py_TYPE(o)->tp_free)(o);");
                w.close_block("");
            }
        }
        let own = own_class_tags(module);
        for ty in collect_classes(module) {
            let Some(c) = ty.as_class() else { continue };
            if own.contains(&c.objstruct_cname()) {
                w.writeln(&format!("{} = 0;", c.typeptr_cname()));
            } else {
                w.writeln(&format!("Py_CLEAR({});", c.typeptr_cname()));
            }
        }
    }
    if level >= CleanupLevel::CONSTANTS {
        w.writeln("/* constants */");
        cx.constants.emit_cleanup(&mut w);
        w.writeln(&format!("Py_CLEAR({});", naming::EMPTY_TUPLE_CNAME));
        w.writeln(&format!("Py_CLEAR({});", naming::BUILTINS_CNAME));
    }
    w.writeln(&format!("{} = 0;", naming::MODULE_DICT_CNAME));
    w.writeln(&format!("{} = 0;", naming::MODULE_CNAME));
    w.close_block("");
    let out = cx.out.section(Section::Cleanup);
    out.put_raw(w.as_str());
    out.newline();
    Ok(())
}

/// A `main()` that registers the module as builtin, starts the interpreter
/// and imports it.
pub fn emit_main(cx: &mut Context<'_>, module: &Module) {
    if !cx.options.embed_main_entrypoint {
        return;
    }
    let name = escape_string(&module.name);
    let w = cx.out.section(Section::MainEntrypoint);
    w.open_block("int main(CX_UNUSED int argc, CX_UNUSED char **argv)");
    w.writeln("PyObject *m = NULL;");
    w.writeln("int r = 0;");
    w.open_block(&format!(
        "if (PyImport_AppendInittab(\"{}\", {}) < 0)",
        name,
        naming::init_function_name(&module.name)
    ));
    w.writeln(&format!("fprintf(stderr, \"could not register module {}\\n\");", name));
    w.writeln("return 1;");
    w.close_block("");
    w.writeln("Py_Initialize();");
    w.writeln(&format!("m = PyImport_ImportModule(\"{}\");", name));
    w.open_block("if (!m)");
    w.writeln("PyErr_Print();");
    w.writeln("r = 1;");
    w.close_block(" else {");
    w.indent();
    w.writeln("Py_DECREF(m);");
    w.close_block("");
    w.writeln("if (Py_FinalizeEx() < 0) r = 120;");
    w.writeln("return r;");
    w.close_block("");
    w.newline();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FuncParam, FunctionType};

    #[test]
    fn api_signature_ignores_pointer_wrapper() {
        let f = FunctionType::new(Type::c_int(), vec![FuncParam::new("x", Type::c_double())]);
        let direct = api_signature(&Type::function(f.clone()));
        let through_pointer = api_signature(&Type::pointer(Type::function(f)));
        assert_eq!(direct, through_pointer);
        assert!(direct.starts_with("int"));
        assert!(direct.ends_with("(double)"));
    }
}

//! C functions and the Python-callable wrappers around them.
//!
//! Every definition gets a C implementation. `def` functions return a new
//! reference and `cdef`/`cpdef` functions keep their declared C signature.
//! `def` and `cpdef` definitions additionally get a wrapper that unpacks
//! Python arguments, converts them and calls the implementation.

use super::buffer::{escape_string, Section};
use super::function::{object_cast, BodyEmitter, FunctionExit, FunctionState, Operand};
use super::utility::catalog;
use super::Context;
use crate::ast::{ClassDef, Expr, ExprKind, FuncDef, FuncKind, Pos};
use crate::diagnostics::{codes, Diagnostic};
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::semantic::Visibility;
use crate::types::{
    DeclOptions, ExceptionSpec, FuncParam, FunctionType, FusedType, Substitution, Type, TypeRef,
};
use tracing::debug;

const SELF_CNAME: &str = "__cx_self";
const ARGS_CNAME: &str = "__cx_args";
const KWDS_CNAME: &str = "__cx_kwds";
const ARG_CNAME: &str = "__cx_arg";
const VALUES_CNAME: &str = "__cx_values";
const ARGNAMES_CNAME: &str = "__cx_argnames";

/// Methods the type object calls through a slot instead of the method table.
pub const SPECIAL_METHODS: &[&str] = &["__init__", "__cinit__", "__dealloc__", "__repr__", "__str__", "__len__"];

/// Signature of a Python wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    /// `PyCFunction` in a method table.
    Method,
    /// `initproc`, also used for `__cinit__` from `tp_new`.
    Init,
    /// `reprfunc`
    Unary,
    /// `lenfunc`
    Len,
}

impl WrapperKind {
    pub fn for_method(name: &str) -> Self {
        match name {
            "__init__" | "__cinit__" => WrapperKind::Init,
            "__repr__" | "__str__" => WrapperKind::Unary,
            "__len__" => WrapperKind::Len,
            _ => WrapperKind::Method,
        }
    }
}

/// A row of a `PyMethodDef` table.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub name: String,
    pub wrapper: String,
    pub flags: &'static str,
    pub doc: Option<String>,
}

impl MethodEntry {
    pub fn table_row(&self) -> String {
        let doc = match &self.doc {
            Some(d) => format!("\"{}\"", escape_string(d)),
            None => "0".to_string(),
        };
        format!(
            "{{\"{}\", (PyCFunction)(void (*)(void)){}, {}, {}}},",
            self.name, self.wrapper, self.flags, doc
        )
    }
}

/// C names generated for one definition.
#[derive(Debug, Clone)]
pub struct FunctionNames {
    pub implementation: String,
    pub wrapper: String,
}

pub fn function_names(cx: &Context, def: &FuncDef, class: Option<&ClassDef>) -> InternalResult<FunctionNames> {
    let local = match class {
        Some(c) => format!("{}_{}", c.name, def.name),
        None => def.name.clone(),
    };
    let mangled = naming::mangle(&cx.module_name, &local);
    let implementation = if def.kind == FuncKind::Def {
        format!("{}{}", naming::PYFUNC_PREFIX, mangled)
    } else {
        let entry = cx.symbols.get(def.entry).ok_or(InternalError::UnknownEntry(def.entry.0))?;
        entry.cname.clone()
    };
    Ok(FunctionNames { implementation, wrapper: format!("{}{}", naming::PYWRAP_PREFIX, mangled) })
}

fn qualified_name(cx: &Context, def: &FuncDef, class: Option<&ClassDef>) -> String {
    match class {
        Some(c) => format!("{}.{}.{}", cx.module_name, c.name, def.name),
        None => format!("{}.{}", cx.module_name, def.name),
    }
}

fn collect_fused(ty: &Type, out: &mut Vec<FusedType>) {
    match ty {
        Type::Fused(f) => {
            if !out.iter().any(|g| g.name == f.name) {
                out.push(f.clone());
            }
        }
        Type::Pointer(b) | Type::Reference(b) | Type::Const(b) => collect_fused(b, out),
        Type::Array { base, .. } | Type::Typedef { base, .. } => collect_fused(base, out),
        Type::Function(f) => {
            collect_fused(&f.return_type, out);
            for p in &f.params {
                collect_fused(&p.ty, out);
            }
        }
        _ => {}
    }
}

/// Every combination of alternatives for the fused types in `ty`; a
/// single empty substitution when there are none.
pub fn specializations(ty: &TypeRef) -> Vec<Substitution> {
    let mut fused = Vec::new();
    collect_fused(ty, &mut fused);
    let mut result = vec![Substitution::new()];
    for f in &fused {
        result = result
            .into_iter()
            .flat_map(|s| {
                f.alternatives.iter().map(move |alt| {
                    let mut s = s.clone();
                    s.insert(f.name.clone(), alt.clone());
                    s
                })
            })
            .collect();
    }
    result
}

/// The function type of a definition's C implementation.
pub(super) fn implementation_signature(em: &mut BodyEmitter<'_, '_>, def: &FuncDef) -> FunctionType {
    let ret = if def.kind == FuncKind::Def { Type::object() } else { em.ty(&def.return_type) };
    let params = def
        .params
        .iter()
        .map(|p| {
            let ty = em.ty(&p.ty);
            FuncParam::new(p.name.clone(), ty)
        })
        .collect();
    let exception = if def.kind == FuncKind::Def { ExceptionSpec::None } else { def.exception.clone() };
    FunctionType::new(ret, params).with_exception(exception)
}

fn zero_value(ty: &TypeRef) -> Option<String> {
    if ty.is_numeric() {
        Some("0".to_string())
    } else if ty.is_ptr() {
        Some("NULL".to_string())
    } else {
        None
    }
}

/// Emits the C implementation of `def` under `subs`, with its prototype.
pub fn emit_implementation(
    cx: &mut Context<'_>,
    def: &FuncDef,
    class: Option<&ClassDef>,
    cname: &str,
    subs: Option<Substitution>,
) -> InternalResult<()> {
    let qualname = qualified_name(cx, def, class);
    let symbols = cx.symbols;
    let entry = symbols.get(def.entry).ok_or(InternalError::UnknownEntry(def.entry.0))?;
    let public = class.is_none() && entry.visibility == Visibility::Public && def.kind != FuncKind::Def;
    debug!(function = %qualname, cname, "emitting function");

    let mut em = BodyEmitter::new(cx, FunctionState::new(qualname, None));
    em.subs = subs;
    let sig = implementation_signature(&mut em, def);
    let ret = sig.return_type.clone();
    em.state.return_type = Some(ret.clone());

    let mut params = Vec::with_capacity(def.params.len());
    let mut release = Vec::new();
    for p in &def.params {
        let pe = em.entry(p.entry)?;
        let pty = em.ty(&p.ty);
        params.push(pty.declaration_code(&pe.cname, &DeclOptions::code()));
        if pty.is_pyobject() {
            em.w.writeln(&format!("Py_INCREF({});", pe.cname));
            release.push(pe.cname.clone());
        }
    }
    let mut locals = Vec::with_capacity(def.locals.len());
    for id in &def.locals {
        let le = em.entry(*id)?;
        let lty = em.ty(&le.ty);
        if lty.contains_fused() {
            return Err(InternalError::UnspecializedFused { name: lty.to_string(), context: le.name.clone() });
        }
        let mut decl = lty.declaration_code(&le.cname, &DeclOptions::code());
        if lty.is_pyobject() {
            decl.push_str(" = NULL");
            em.w.writeln(&format!("{} = {}Py_None; Py_INCREF(Py_None);", le.cname, object_cast(&lty)));
            release.push(le.cname.clone());
        }
        decl.push(';');
        locals.push(decl);
    }

    let arglist = if params.is_empty() { "void".to_string() } else { params.join(", ") };
    let entity = format!("{}({})", cname, arglist);
    let header = if public {
        ret.declaration_code(&entity, &DeclOptions::with_linkage("DL_EXPORT"))
    } else {
        format!("static {}", ret.declaration_code(&entity, &DeclOptions::code()))
    };

    em.stmts(&def.body)?;
    if ret.is_pyobject() {
        em.store(naming::RETVAL_CNAME, &ret, Operand::borrowed("Py_None", Type::object()));
    } else if let Some(zero) = zero_value(&ret) {
        em.w.writeln(&format!("{} = {};", naming::RETVAL_CNAME, zero));
    }

    let (error_value, unraisable) = if ret.is_pyobject() {
        (Some("NULL".to_string()), false)
    } else {
        match &sig.exception {
            ExceptionSpec::Value(v) | ExceptionSpec::ValueOrCheck(v) => (Some(v.clone()), false),
            ExceptionSpec::Check => (zero_value(&ret), false),
            ExceptionSpec::None => (zero_value(&ret), true),
        }
    };
    let exit = FunctionExit { retval: (!ret.is_void()).then(|| ret.clone()), error_value, unraisable, release };
    let text = em.finish(&header, &locals, &exit)?;
    cx.out.section(Section::ModuleDeclarations).writeln(&format!("{};", header));
    let defs = cx.out.section(Section::Definitions);
    defs.put_raw(&text);
    defs.newline();
    Ok(())
}

/// Emits every C implementation of `def`: one per fused specialization.
/// Returns the specialized C names.
pub fn emit_function(cx: &mut Context<'_>, def: &FuncDef, class: Option<&ClassDef>) -> InternalResult<Vec<String>> {
    let names = function_names(cx, def, class)?;
    let symbols = cx.symbols;
    let entry = symbols.get(def.entry).ok_or(InternalError::UnknownEntry(def.entry.0))?;
    if !entry.ty.contains_fused() {
        emit_implementation(cx, def, class, &names.implementation, None)?;
        return Ok(vec![names.implementation]);
    }
    if def.kind != FuncKind::Cdef {
        let msg = format!("fused types are only supported in cdef functions, not in '{}'", def.name);
        cx.reporter.report(Diagnostic::error(codes::UNSUPPORTED_CONSTRUCT, msg), def.pos);
        return Ok(Vec::new());
    }
    let mut cnames = Vec::new();
    for subs in specializations(&entry.ty) {
        let cname = format!("{}{}", names.implementation, subs.cname_suffix());
        emit_implementation(cx, def, class, &cname, Some(subs))?;
        cnames.push(cname);
    }
    Ok(cnames)
}

impl<'c, 'a> BodyEmitter<'c, 'a> {
    /// Checks and converts a borrowed argument object to parameter type
    /// `ty`.
    pub(super) fn convert_arg(&mut self, raw: Operand, ty: &TypeRef, name: &str, pos: Pos) -> InternalResult<Operand> {
        let type_object = match (ty.as_class(), ty.builtin_kind()) {
            (Some(c), _) => Some(c.typeptr_cname()),
            (None, Some(b)) => Some(format!("&{}", b.type_cname())),
            (None, None) => None,
        };
        if let Some(type_object) = type_object {
            self.require(catalog::EXCEPTIONS, "ArgTypeTest")?;
            self.error_if(
                &format!("!__cx_ArgTypeTest({}, {}, 1, \"{}\")", raw.code, type_object, escape_string(name)),
                pos,
            );
            let code = format!("({}{})", object_cast(ty), raw.code);
            return Ok(Operand { code, ty: ty.clone(), temp: raw.temp });
        }
        if ty.is_pyobject() {
            return Ok(Operand { ty: ty.clone(), ..raw });
        }
        self.coerce_to(raw, ty, pos)
    }

    fn default_arg(&mut self, default: &Expr, ty: &TypeRef, name: &str, pos: Pos) -> InternalResult<Operand> {
        if !default.is_literal() && !matches!(default.kind, ExprKind::Coerce(ref inner) if inner.is_literal()) {
            let msg = format!("default value of parameter '{}' must be a literal", name);
            return Ok(self.report(Diagnostic::error(codes::UNSUPPORTED_CONSTRUCT, msg), pos));
        }
        let op = self.expr(default)?;
        self.coerce_to(op, ty, pos)
    }
}

/// Emits the Python-callable wrapper of `def`. Returns the method table
/// flags for [`WrapperKind::Method`].
pub fn emit_wrapper(
    cx: &mut Context<'_>,
    def: &FuncDef,
    class: Option<&ClassDef>,
    kind: WrapperKind,
) -> InternalResult<&'static str> {
    let names = function_names(cx, def, class)?;
    let qualname = qualified_name(cx, def, class);
    let is_method = class.is_some();
    if is_method && def.params.is_empty() {
        return Err(InternalError::UnsupportedType { what: format!("method '{}' without self", def.name), ty: "void".into() });
    }
    let py_params = &def.params[usize::from(is_method)..];
    let wrapper_ret = match kind {
        WrapperKind::Method | WrapperKind::Unary => Type::object(),
        WrapperKind::Init => Type::c_int(),
        WrapperKind::Len => Type::py_ssize_t(),
    };
    let noargs = kind == WrapperKind::Method && py_params.is_empty();
    let single = kind == WrapperKind::Method && py_params.len() == 1 && py_params[0].default.is_none();
    let parse = kind == WrapperKind::Init || (kind == WrapperKind::Method && !noargs && !single);
    if matches!(kind, WrapperKind::Unary | WrapperKind::Len) && !py_params.is_empty() {
        let msg = format!("special method '{}' takes no arguments", def.name);
        cx.reporter.report(Diagnostic::error(codes::ARGUMENT_COUNT_MISMATCH, msg), def.pos);
        return Ok("");
    }

    let (flags, header) = match kind {
        WrapperKind::Method if noargs => (
            "METH_NOARGS",
            format!("static PyObject *{}(PyObject *{}, CX_UNUSED PyObject *unused)", names.wrapper, SELF_CNAME),
        ),
        WrapperKind::Method if single => (
            "METH_O",
            format!("static PyObject *{}(PyObject *{}, PyObject *{})", names.wrapper, SELF_CNAME, ARG_CNAME),
        ),
        WrapperKind::Method => (
            "METH_VARARGS|METH_KEYWORDS",
            format!(
                "static PyObject *{}(PyObject *{}, PyObject *{}, PyObject *{})",
                names.wrapper, SELF_CNAME, ARGS_CNAME, KWDS_CNAME
            ),
        ),
        WrapperKind::Init => (
            "",
            format!("static int {}(PyObject *{}, PyObject *{}, PyObject *{})", names.wrapper, SELF_CNAME, ARGS_CNAME, KWDS_CNAME),
        ),
        WrapperKind::Unary => ("", format!("static PyObject *{}(PyObject *{})", names.wrapper, SELF_CNAME)),
        WrapperKind::Len => ("", format!("static Py_ssize_t {}(PyObject *{})", names.wrapper, SELF_CNAME)),
    };

    let mut em = BodyEmitter::new(cx, FunctionState::new(qualname, Some(wrapper_ret.clone())));
    let sig = implementation_signature(&mut em, def);
    let mut locals = Vec::new();
    let mut ops = Vec::with_capacity(def.params.len());
    if let Some(c) = class {
        let self_code = format!("({}{})", object_cast(&c.ty), SELF_CNAME);
        ops.push(Operand::borrowed(self_code, c.ty.clone()));
    }
    if parse {
        em.require(catalog::EXCEPTIONS, "ParseArgs")?;
        let mut argnames: Vec<String> = py_params.iter().map(|p| format!("\"{}\"", escape_string(&p.name))).collect();
        argnames.push("0".to_string());
        locals.push(format!("static const char *const {}[] = {{{}}};", ARGNAMES_CNAME, argnames.join(", ")));
        locals.push(format!("PyObject *{}[{}] = {{0}};", VALUES_CNAME, py_params.len().max(1)));
        let required = py_params.iter().take_while(|p| p.default.is_none()).count();
        em.error_if(
            &format!(
                "__cx_ParseArgs({}, {}, \"{}\", {}, {}, {}, {}) < 0",
                ARGS_CNAME,
                KWDS_CNAME,
                escape_string(&def.name),
                ARGNAMES_CNAME,
                VALUES_CNAME,
                required,
                py_params.len()
            ),
            def.pos,
        );
    }
    for (i, p) in py_params.iter().enumerate() {
        let raw = if single { ARG_CNAME.to_string() } else { format!("{}[{}]", VALUES_CNAME, i) };
        let pty = em.ty(&p.ty);
        let op = match &p.default {
            Some(default) => {
                let temp = em.allocate_temp(&pty)?;
                em.w.open_block(&format!("if ({})", raw));
                let given = em.convert_arg(Operand::borrowed(raw.clone(), Type::object()), &pty, &p.name, def.pos)?;
                em.store(&temp, &pty, given);
                em.w.close_block(" else {");
                em.w.indent();
                let fallback = em.default_arg(default, &pty, &p.name, def.pos)?;
                em.store(&temp, &pty, fallback);
                em.w.close_block("");
                Operand::owned(temp, pty)
            }
            None => em.convert_arg(Operand::borrowed(raw, Type::object()), &pty, &p.name, def.pos)?,
        };
        ops.push(op);
    }

    let result = em.emit_c_call(&names.implementation, &sig, ops, def.pos)?;
    let error_value = match kind {
        WrapperKind::Method | WrapperKind::Unary => {
            let op = em.coerce_to(result, &Type::object(), def.pos)?;
            if op.is_void() {
                em.store(naming::RETVAL_CNAME, &wrapper_ret, Operand::borrowed("Py_None", Type::object()));
            } else {
                em.store(naming::RETVAL_CNAME, &wrapper_ret, op);
            }
            "NULL"
        }
        WrapperKind::Init => {
            em.release(result);
            em.w.writeln(&format!("{} = 0;", naming::RETVAL_CNAME));
            "-1"
        }
        WrapperKind::Len => {
            let op = em.coerce_to(result, &wrapper_ret, def.pos)?;
            em.store(naming::RETVAL_CNAME, &wrapper_ret, op);
            "-1"
        }
    };
    let exit = FunctionExit {
        retval: Some(wrapper_ret),
        error_value: Some(error_value.to_string()),
        unraisable: false,
        release: Vec::new(),
    };
    let text = em.finish(&header, &locals, &exit)?;
    cx.out.section(Section::ModuleDeclarations).writeln(&format!("{};", header));
    let defs = cx.out.section(Section::Definitions);
    defs.put_raw(&text);
    defs.newline();
    Ok(flags)
}

/// Emits implementation and wrapper of a module-level function. Returns its
/// method table row when it is callable from Python.
pub fn emit_module_function(cx: &mut Context<'_>, def: &FuncDef) -> InternalResult<Option<MethodEntry>> {
    let emitted = emit_function(cx, def, None)?;
    if def.kind == FuncKind::Cdef || emitted.is_empty() {
        return Ok(None);
    }
    let flags = emit_wrapper(cx, def, None, WrapperKind::Method)?;
    let names = function_names(cx, def, None)?;
    Ok(Some(MethodEntry { name: def.name.clone(), wrapper: names.wrapper, flags, doc: def.doc.clone() }))
}

/// Emits the methods of a class. Returns the method table rows.
pub fn emit_class_methods(cx: &mut Context<'_>, class: &ClassDef) -> InternalResult<Vec<MethodEntry>> {
    let mut rows = Vec::new();
    for m in &class.methods {
        let emitted = emit_function(cx, m, Some(class))?;
        if m.kind == FuncKind::Cdef || emitted.is_empty() {
            continue;
        }
        let special = SPECIAL_METHODS.contains(&m.name.as_str());
        if m.name == "__dealloc__" {
            continue;
        }
        let kind = if special { WrapperKind::for_method(&m.name) } else { WrapperKind::Method };
        let flags = emit_wrapper(cx, m, Some(class), kind)?;
        if !special {
            let names = function_names(cx, m, Some(class))?;
            rows.push(MethodEntry { name: m.name.clone(), wrapper: names.wrapper, flags, doc: m.doc.clone() });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn fused_combinations_cover_every_alternative() {
        let number = Type::Fused(FusedType {
            name: "number".into(),
            alternatives: vec![Type::c_int(), Type::c_double()],
        });
        let flag = Type::Fused(FusedType { name: "flag".into(), alternatives: vec![Type::bint(), Type::c_long()] });
        let f = FunctionType::new(
            Type::void(),
            vec![FuncParam::new("a", Rc::new(number)), FuncParam::new("b", Rc::new(flag))],
        );
        let subs = specializations(&Type::function(f));
        assert_eq!(subs.len(), 4);
        let mut suffixes: Vec<String> = subs.iter().map(|s| s.cname_suffix()).collect();
        suffixes.sort();
        suffixes.dedup();
        assert_eq!(suffixes.len(), 4);
        assert!(suffixes.iter().all(|s| s.starts_with("__fuse_")));
    }

    #[test]
    fn plain_types_have_one_empty_specialization() {
        let subs = specializations(&Type::c_long());
        assert_eq!(subs.len(), 1);
        assert!(subs[0].is_empty());
    }

    #[test]
    fn special_methods_pick_slot_signatures() {
        assert_eq!(WrapperKind::for_method("__cinit__"), WrapperKind::Init);
        assert_eq!(WrapperKind::for_method("__str__"), WrapperKind::Unary);
        assert_eq!(WrapperKind::for_method("__len__"), WrapperKind::Len);
        assert_eq!(WrapperKind::for_method("area"), WrapperKind::Method);
    }
}

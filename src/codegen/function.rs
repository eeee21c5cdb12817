//! Per-function emission state.
//!
//! Every function body is written into its own [`CodeWriter`] while temps
//! are handed out; the declarations are only known once the body is done,
//! so [`BodyEmitter::finish`] assembles header, declarations, body and the
//! shared exit path at the end.
//!
//! All exits go through two labels. `__cx_L1_error` records a traceback
//! entry and falls into `__cx_L0`, which releases temps and the function's
//! own references and returns `__cx_r`.

use super::buffer::CodeWriter;
use super::utility::catalog;
use super::Context;
use crate::ast::{Pos, TempId};
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::semantic::{Entry, EntryId, SymbolTable};
use crate::types::{DeclOptions, Substitution, Type, TypeRef};
use std::collections::HashMap;
use tracing::trace;

pub const ERROR_LABEL: &str = "__cx_L1_error";
pub const RETURN_LABEL: &str = "__cx_L0";

/// The C text of an evaluated expression.
///
/// An operand with `temp` set owns that temporary: for objects it holds a
/// new reference that must be released or handed on. Without `temp` the
/// code refers to storage that outlives the operand.
#[derive(Debug, Clone)]
pub struct Operand {
    pub code: String,
    pub ty: TypeRef,
    pub temp: Option<String>,
}

impl Operand {
    pub fn borrowed(code: impl Into<String>, ty: TypeRef) -> Self {
        Self { code: code.into(), ty, temp: None }
    }

    pub fn owned(temp: String, ty: TypeRef) -> Self {
        Self { code: temp.clone(), ty, temp: Some(temp) }
    }

    /// Stand-in after a reported error; emission continues so later errors
    /// are still found.
    pub fn error() -> Self {
        Self::borrowed("0", Type::error())
    }

    pub fn is_void(&self) -> bool {
        self.ty.is_void()
    }
}

#[derive(Debug)]
struct TempSlot {
    cname: String,
    ty: TypeRef,
    decl: String,
    in_use: bool,
}

#[derive(Debug)]
pub struct LoopLabels {
    pub brk: String,
    pub cont: String,
    pub brk_used: bool,
    pub cont_used: bool,
}

#[derive(Debug, Clone)]
struct Binding {
    cname: String,
    ty: TypeRef,
}

#[derive(Debug)]
pub struct FunctionState {
    /// Name shown in tracebacks.
    pub qualname: String,
    /// `None` outside a function body (module initialization).
    pub return_type: Option<TypeRef>,
    temps: Vec<TempSlot>,
    next_label: usize,
    error_used: bool,
    return_used: bool,
    loops: Vec<LoopLabels>,
    bindings: HashMap<TempId, Binding>,
    last_line: Option<(usize, usize)>,
}

impl FunctionState {
    pub fn new(qualname: impl Into<String>, return_type: Option<TypeRef>) -> Self {
        Self {
            qualname: qualname.into(),
            return_type,
            temps: Vec::new(),
            next_label: 2,
            error_used: false,
            return_used: false,
            loops: Vec::new(),
            bindings: HashMap::new(),
            last_line: None,
        }
    }

    pub fn error_used(&self) -> bool {
        self.error_used
    }

    pub fn temp_declarations(&self) -> Vec<String> {
        self.temps.iter().map(|t| t.decl.clone()).collect()
    }

    pub fn object_temps(&self) -> Vec<String> {
        self.temps.iter().filter(|t| t.ty.is_pyobject()).map(|t| t.cname.clone()).collect()
    }
}

/// What the shared exit path of a function returns and releases.
#[derive(Debug, Default)]
pub struct FunctionExit {
    /// Type of `__cx_r`; `None` for void functions.
    pub retval: Option<TypeRef>,
    /// Assigned to `__cx_r` on the error path.
    pub error_value: Option<String>,
    /// The error cannot propagate and is printed instead.
    pub unraisable: bool,
    /// Variables holding references released at `__cx_L0`.
    pub release: Vec<String>,
}

pub struct BodyEmitter<'c, 'a> {
    pub cx: &'c mut Context<'a>,
    pub state: FunctionState,
    pub w: CodeWriter,
    /// Active when emitting a specialization of a fused function.
    pub subs: Option<Substitution>,
}

fn is_identifier(code: &str) -> bool {
    let mut chars = code.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_number(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

impl<'c, 'a> BodyEmitter<'c, 'a> {
    pub fn new(cx: &'c mut Context<'a>, state: FunctionState) -> Self {
        Self { cx, state, w: CodeWriter::new(), subs: None }
    }

    pub fn symbols(&self) -> &'a SymbolTable {
        self.cx.symbols
    }

    pub fn entry(&self, id: EntryId) -> InternalResult<&'a Entry> {
        let symbols: &'a SymbolTable = self.cx.symbols;
        symbols.get(id).ok_or(InternalError::UnknownEntry(id.0))
    }

    /// `ty` under the active fused substitution.
    pub fn ty(&mut self, ty: &TypeRef) -> TypeRef {
        match &self.subs {
            Some(subs) => self.cx.specializer.specialize(ty, subs),
            None => ty.clone(),
        }
    }

    pub fn require(&mut self, catalog: &str, name: &str) -> InternalResult<()> {
        self.cx.utility.require(catalog, name).map(|_| ())
    }

    // Temporaries

    /// A free temp of C type `ty`, reusing a released one when possible.
    /// Object temps always hold NULL while free.
    pub fn allocate_temp(&mut self, ty: &TypeRef) -> InternalResult<String> {
        let ty = self.ty(ty);
        if ty.contains_fused() {
            return Err(InternalError::UnspecializedFused {
                name: ty.to_string(),
                context: format!("temporary in {}", self.state.qualname),
            });
        }
        if ty.is_void() || ty.is_error() {
            return Err(InternalError::UnsupportedType { what: "a temporary".into(), ty: ty.to_string() });
        }
        let ctype = ty.empty_declaration_code();
        if let Some(slot) = self
            .state
            .temps
            .iter_mut()
            .find(|t| !t.in_use && t.ty.empty_declaration_code() == ctype)
        {
            slot.in_use = true;
            return Ok(slot.cname.clone());
        }
        let cname = format!("{}{}", naming::TEMP_PREFIX, self.state.temps.len());
        let mut decl = ty.declaration_code(&cname, &DeclOptions::code());
        if ty.is_pyobject() {
            decl.push_str(" = NULL");
        }
        decl.push(';');
        trace!(temp = %cname, ty = %ty, "allocated temp");
        self.state.temps.push(TempSlot { cname: cname.clone(), ty, decl, in_use: true });
        Ok(cname)
    }

    pub fn release_temp(&mut self, cname: &str) {
        if let Some(slot) = self.state.temps.iter_mut().find(|t| t.cname == cname) {
            slot.in_use = false;
        }
    }

    /// Drops whatever `op` owns.
    pub fn release(&mut self, op: Operand) {
        if let Some(temp) = op.temp {
            if op.ty.is_pyobject() {
                self.w.writeln(&format!("Py_DECREF({}); {} = 0;", temp, temp));
            }
            self.release_temp(&temp);
        }
    }

    /// `op` as a `PyObject *` expression.
    pub fn pyobj(&self, op: &Operand) -> String {
        if op.ty.is_extension_type() {
            format!("((PyObject *){})", op.code)
        } else {
            op.code.clone()
        }
    }

    /// Hands a new reference to a consumer that steals it. The returned
    /// temp, if any, must be passed to [`gave`](Self::gave) right after the
    /// stealing statement.
    pub fn give_ref(&mut self, op: Operand) -> (String, Option<String>) {
        let code = self.pyobj(&op);
        match op.temp {
            Some(temp) => (code, Some(temp)),
            None => {
                self.w.writeln(&format!("Py_INCREF({});", code));
                (code, None)
            }
        }
    }

    pub fn gave(&mut self, temp: Option<String>) {
        if let Some(temp) = temp {
            self.w.writeln(&format!("{} = 0;", temp));
            self.release_temp(&temp);
        }
    }

    /// Stores `op` into the object variable `lhs`, releasing the previous
    /// value.
    pub fn assign_object(&mut self, lhs: &str, lhs_ty: &TypeRef, op: Operand) {
        let cast = object_cast(lhs_ty);
        match op.temp {
            Some(temp) => {
                self.w.writeln(&format!("Py_XDECREF({});", lhs));
                self.w.writeln(&format!("{} = {}{};", lhs, cast, op.code));
                self.w.writeln(&format!("{} = 0;", temp));
                self.release_temp(&temp);
            }
            None => {
                self.w.writeln(&format!("Py_INCREF({});", op.code));
                self.w.writeln(&format!("Py_XDECREF({});", lhs));
                self.w.writeln(&format!("{} = {}{};", lhs, cast, op.code));
            }
        }
    }

    /// `op` in a form that can be evaluated more than once.
    pub fn stable(&mut self, op: Operand) -> InternalResult<Operand> {
        if op.temp.is_some() || is_identifier(&op.code) || is_number(&op.code) || op.ty.is_error() {
            return Ok(op);
        }
        let temp = self.allocate_temp(&op.ty)?;
        self.w.writeln(&format!("{} = {};", temp, op.code));
        if op.ty.is_pyobject() {
            self.w.writeln(&format!("Py_INCREF({});", temp));
        }
        Ok(Operand::owned(temp, op.ty))
    }

    // Temporaries bound by the tree

    pub fn bind(&mut self, id: TempId, cname: String, ty: TypeRef) {
        self.state.bindings.insert(id, Binding { cname, ty });
    }

    pub fn binding(&self, id: TempId) -> InternalResult<(String, TypeRef)> {
        self.state
            .bindings
            .get(&id)
            .map(|b| (b.cname.clone(), b.ty.clone()))
            .ok_or(InternalError::DanglingTemp(id.0))
    }

    /// Ends a binding and takes over the reference its temp holds.
    pub fn take_binding(&mut self, id: TempId) -> InternalResult<Operand> {
        let b = self.state.bindings.remove(&id).ok_or(InternalError::DanglingTemp(id.0))?;
        Ok(Operand::owned(b.cname, b.ty))
    }

    // Labels and control flow

    pub fn new_label(&mut self, what: &str) -> String {
        let n = self.state.next_label;
        self.state.next_label += 1;
        format!("{}{}_{}", naming::LABEL_PREFIX, n, what)
    }

    pub fn push_loop(&mut self) -> usize {
        let brk = self.new_label("break");
        let cont = self.new_label("continue");
        self.state.loops.push(LoopLabels { brk, cont, brk_used: false, cont_used: false });
        self.state.loops.len()
    }

    /// Writes the innermost loop's `continue` label if anything jumps to it.
    pub fn continue_label(&mut self) {
        if let Some(l) = self.state.loops.last() {
            if l.cont_used {
                let name = l.cont.clone();
                self.w.label(&name);
            }
        }
    }

    /// Ends the innermost loop, writing its `break` label if used.
    pub fn end_loop(&mut self) {
        if let Some(l) = self.state.loops.pop() {
            if l.brk_used {
                self.w.label(&l.brk);
            }
        }
    }

    pub fn break_target(&mut self) -> InternalResult<String> {
        let l = self.state.loops.last_mut().ok_or(InternalError::LoopControlOutsideLoop("break"))?;
        l.brk_used = true;
        Ok(l.brk.clone())
    }

    pub fn continue_target(&mut self) -> InternalResult<String> {
        let l = self.state.loops.last_mut().ok_or(InternalError::LoopControlOutsideLoop("continue"))?;
        l.cont_used = true;
        Ok(l.cont.clone())
    }

    pub fn return_goto(&mut self) -> String {
        self.state.return_used = true;
        format!("goto {};", RETURN_LABEL)
    }

    /// Statement that records the position and jumps to the error label.
    pub fn error_goto(&mut self, pos: Pos) -> String {
        self.state.error_used = true;
        format!(
            "{{ {} = {}[{}]; {} = {}; {} = __LINE__; goto {}; }}",
            naming::FILENAME_CNAME,
            naming::FILENAME_TABLE_CNAME,
            pos.file,
            naming::LINENO_CNAME,
            pos.line,
            naming::CLINENO_CNAME,
            ERROR_LABEL
        )
    }

    pub fn error_if(&mut self, cond: &str, pos: Pos) {
        let goto = self.error_goto(pos);
        self.w.writeln(&format!("if (unlikely({})) {}", cond, goto));
    }

    pub fn error_if_null(&mut self, code: &str, pos: Pos) {
        self.error_if(&format!("!{}", code), pos);
    }

    /// Raises `exc` with a fixed message and jumps to the error label.
    pub fn raise_if(&mut self, cond: &str, exc: &str, message: &str, pos: Pos) {
        let goto = self.error_goto(pos);
        self.w.open_block(&format!("if (unlikely({}))", cond));
        self.w.writeln(&format!("PyErr_SetString({}, \"{}\");", exc, message));
        self.w.writeln(&goto);
        self.w.close_block("");
    }

    /// `#line` for a statement starting a new source line.
    pub fn mark_position(&mut self, pos: Pos) {
        if !self.cx.options.emit_line_directives || pos.line == 0 {
            return;
        }
        if self.state.last_line == Some((pos.file, pos.line)) {
            return;
        }
        self.state.last_line = Some((pos.file, pos.line));
        let file = self.cx.filenames.get(pos.file).cloned().unwrap_or_default();
        self.w.write(&format!("#line {} \"{}\"\n", pos.line, super::buffer::escape_string(&file)));
    }

    /// Assembles the complete function definition.
    pub fn finish(mut self, header: &str, locals: &[String], exit: &FunctionExit) -> InternalResult<String> {
        let mut out = CodeWriter::new();
        out.open_block(header);
        for decl in locals {
            out.writeln(decl);
        }
        for decl in self.state.temp_declarations() {
            out.writeln(&decl);
        }
        if let Some(ty) = &exit.retval {
            let mut decl = ty.declaration_code(naming::RETVAL_CNAME, &DeclOptions::code());
            if ty.is_pyobject() {
                decl.push_str(" = NULL");
            }
            out.writeln(&format!("{};", decl));
        }
        out.append(&self.w);

        let object_temps = self.state.object_temps();
        if self.state.error_used {
            out.writeln(&format!("goto {};", RETURN_LABEL));
            out.label(ERROR_LABEL);
            let name = super::buffer::escape_string(&self.state.qualname);
            if exit.unraisable {
                self.require(catalog::EXCEPTIONS, "WriteUnraisable")?;
                out.writeln(&format!("__cx_WriteUnraisable(\"{}\");", name));
            } else {
                self.require(catalog::EXCEPTIONS, "AddTraceback")?;
                out.writeln(&format!(
                    "__cx_AddTraceback(\"{}\", {}, {}, {});",
                    name,
                    naming::CLINENO_CNAME,
                    naming::LINENO_CNAME,
                    naming::FILENAME_CNAME
                ));
            }
            if let (Some(ty), Some(value)) = (&exit.retval, &exit.error_value) {
                if ty.is_pyobject() {
                    out.writeln(&format!("Py_CLEAR({});", naming::RETVAL_CNAME));
                } else {
                    out.writeln(&format!("{} = {};", naming::RETVAL_CNAME, value));
                }
            }
        }
        if self.state.error_used || self.state.return_used {
            out.label(RETURN_LABEL);
        }
        for t in &object_temps {
            out.writeln(&format!("Py_XDECREF({});", t));
        }
        for var in &exit.release {
            out.writeln(&format!("Py_XDECREF({});", var));
        }
        match &exit.retval {
            Some(_) => out.writeln(&format!("return {};", naming::RETVAL_CNAME)),
            None => out.writeln("return;"),
        }
        out.close_block("");
        Ok(out.into_string())
    }
}

/// Cast needed to store a `PyObject *` into a variable of type `ty`.
pub fn object_cast(ty: &TypeRef) -> String {
    match ty.as_class() {
        Some(c) => format!("(struct {} *)", c.objstruct_cname()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticReporter;
    use crate::options::CompileOptions;

    #[test]
    fn released_temps_are_reused_by_type() {
        let symbols = SymbolTable::new();
        let options = CompileOptions::default();
        let mut cx = Context::new(&symbols, &options, DiagnosticReporter::new(&[]));
        let mut em = BodyEmitter::new(&mut cx, FunctionState::new("m.f", None));
        let a = em.allocate_temp(&Type::object()).unwrap();
        let b = em.allocate_temp(&Type::c_int()).unwrap();
        em.release_temp(&a);
        let c = em.allocate_temp(&Type::object()).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(em.state.temp_declarations(), ["PyObject *__cx_t_0 = NULL;", "int __cx_t_1;"]);
    }

    #[test]
    fn error_path_only_when_used() {
        let symbols = SymbolTable::new();
        let options = CompileOptions::default();
        let mut cx = Context::new(&symbols, &options, DiagnosticReporter::new(&[]));
        let em = BodyEmitter::new(&mut cx, FunctionState::new("m.f", Some(Type::c_int())));
        let exit = FunctionExit { retval: Some(Type::c_int()), ..FunctionExit::default() };
        let text = em.finish("static int f(void)", &[], &exit).unwrap();
        assert!(!text.contains(ERROR_LABEL));
        assert!(!text.contains(RETURN_LABEL));
        assert!(text.contains("return __cx_r;"));
    }
}

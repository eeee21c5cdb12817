//! Statement emission.
//!
//! Loops follow one layout: the loop itself, then its `else` body, then the
//! `break` label, then whatever the loop held on to is released. Python's
//! `break` and `continue` always jump to labels so they work from inside a
//! C `switch`.

use super::expr::{base_path, int_text};
use super::function::{BodyEmitter, Operand};
use super::utility::catalog;
use crate::ast::{BinOp, CompKind, DictIterKind, Expr, ExprKind, IfClause, Pos, SeqKind, Stmt, StmtKind, SwitchCase, UnaryOp};
use crate::diagnostics::{codes, Diagnostic};
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::semantic::Storage;
use crate::types::{Builtin, Type};

impl<'c, 'a> BodyEmitter<'c, 'a> {
    /// Emits a body, dropping whatever follows a jump out of it.
    pub fn stmts(&mut self, body: &[Stmt]) -> InternalResult<()> {
        for (i, s) in body.iter().enumerate() {
            self.stmt(s)?;
            if !matches!(s.kind, StmtKind::Break | StmtKind::Continue | StmtKind::Return(_) | StmtKind::Raise(_)) {
                continue;
            }
            if let Some(next) = body.get(i + 1) {
                let diag = Diagnostic::warning(codes::UNREACHABLE_CODE, "unreachable code");
                self.cx.reporter.report(diag, next.pos);
            }
            break;
        }
        Ok(())
    }

    pub fn stmt(&mut self, s: &Stmt) -> InternalResult<()> {
        self.mark_position(s.pos);
        let pos = s.pos;
        match &s.kind {
            StmtKind::Expr(e) => {
                let op = self.expr(e)?;
                self.release(op);
                Ok(())
            }
            StmtKind::Assign { target, value } => {
                let op = self.expr(value)?;
                self.assign_to(target, op, pos)
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, pos),
            StmtKind::If { clauses, orelse } => self.if_stmt(clauses, orelse.as_deref(), pos),
            StmtKind::While { condition, body, orelse } => self.while_loop(condition, body, orelse.as_deref(), pos),
            StmtKind::ForIn { target, iter, body, orelse } => self.for_in(target, iter, body, orelse.as_deref(), pos),
            StmtKind::CountedLoop { target, start, stop, step, body, orelse } => {
                self.counted_loop(target, start, stop, *step, body, orelse.as_deref(), pos)
            }
            StmtKind::PointerLoop { target, base, length, reversed, body, orelse } => {
                self.pointer_loop(target, base, length, *reversed, body, orelse.as_deref(), pos)
            }
            StmtKind::SequenceLoop { target, seq, kind, reversed, body, orelse } => {
                self.sequence_loop(target, seq, *kind, *reversed, body, orelse.as_deref(), pos)
            }
            StmtKind::DictLoop { dict, method, view_call, key, value, body, orelse } => {
                let method = (*view_call).then_some(*method);
                self.dict_loop(dict, method, key.as_ref(), value.as_ref(), body, orelse.as_deref(), pos)
            }
            StmtKind::Switch { subject, cases, default } => self.switch(subject, cases, default.as_deref()),
            StmtKind::Break => {
                let label = self.break_target()?;
                self.w.writeln(&format!("goto {};", label));
                Ok(())
            }
            StmtKind::Continue => {
                let label = self.continue_target()?;
                self.w.writeln(&format!("goto {};", label));
                Ok(())
            }
            StmtKind::Return(value) => self.return_stmt(value.as_ref(), pos),
            StmtKind::Raise(exc) => {
                self.require(catalog::EXCEPTIONS, "Raise")?;
                match exc {
                    Some(e) => {
                        let op = self.expr(e)?;
                        let op = self.coerce_to(op, &Type::object(), pos)?;
                        let code = self.pyobj(&op);
                        self.w.writeln(&format!("__cx_Raise({});", code));
                        self.release(op);
                    }
                    None => self.w.writeln("__cx_Raise(NULL);"),
                }
                let goto = self.error_goto(pos);
                self.w.writeln(&goto);
                Ok(())
            }
            StmtKind::Pass => Ok(()),
            StmtKind::Block(body) => self.stmts(body),
            StmtKind::LetTemp { id, ty, value } => {
                let ty = self.ty(ty);
                let temp = self.allocate_temp(&ty)?;
                if let Some(v) = value {
                    let op = self.expr(v)?;
                    let op = self.coerce_to(op, &ty, pos)?;
                    self.store(&temp, &ty, op);
                }
                self.bind(*id, temp, ty);
                Ok(())
            }
            StmtKind::ComprehensionAppend { kind, result, key, value } => {
                self.comprehension_append(*kind, *result, key.as_ref(), value, pos)
            }
        }
    }

    /// Stores `value` into an assignment target.
    pub fn assign_to(&mut self, target: &Expr, value: Operand, pos: Pos) -> InternalResult<()> {
        if value.ty.is_error() {
            return Ok(());
        }
        match &target.kind {
            ExprKind::Tuple(items) | ExprKind::List(items) => self.unpack(items, value, pos),
            ExprKind::Name { name, entry } => {
                let entry = self.entry(*entry)?;
                match entry.storage {
                    Storage::ModuleDict => {
                        let op = self.coerce_to(value, &Type::object(), pos)?;
                        let interned = self.cx.constants.intern(name);
                        let code = self.pyobj(&op);
                        self.error_if(
                            &format!("PyDict_SetItem({}, {}, {}) < 0", naming::MODULE_DICT_CNAME, interned, code),
                            pos,
                        );
                        self.release(op);
                    }
                    Storage::Builtin => {
                        self.release(value);
                        let msg = format!("cannot assign to builtin '{}'", name);
                        self.report(Diagnostic::error(codes::UNSUPPORTED_CONSTRUCT, msg), pos);
                    }
                    Storage::Local | Storage::ModuleStatic => {
                        let ty = self.ty(&entry.ty);
                        let op = self.coerce_to(value, &ty, pos)?;
                        self.store(&entry.cname, &ty, op);
                    }
                }
                Ok(())
            }
            ExprKind::TempRef(id) => {
                let (cname, ty) = self.binding(*id)?;
                let op = self.coerce_to(value, &ty, pos)?;
                self.store(&cname, &ty, op);
                Ok(())
            }
            ExprKind::Attribute { obj, attr } => self.assign_attribute(obj, attr, value, pos),
            ExprKind::Index { obj, index } => self.assign_index(obj, index, value, pos),
            ExprKind::Unary { op: UnaryOp::Deref, operand } => {
                let ptr = self.expr(operand)?;
                let ptr = self.stable(ptr)?;
                let Some(elem) = ptr.ty.element_type().cloned() else {
                    self.release(ptr);
                    self.release(value);
                    return Ok(());
                };
                let op = self.coerce_to(value, &elem, pos)?;
                self.store(&format!("(*{})", ptr.code), &elem, op);
                self.release(ptr);
                Ok(())
            }
            _ => {
                self.release(value);
                let msg = "cannot assign to this expression";
                self.report(Diagnostic::error(codes::UNSUPPORTED_CONSTRUCT, msg), pos);
                Ok(())
            }
        }
    }

    fn assign_attribute(&mut self, obj: &Expr, attr: &str, value: Operand, pos: Pos) -> InternalResult<()> {
        let holder = self.expr(obj)?;
        let holder = self.stable(holder)?;
        let hty = holder.ty.clone();
        let member = if let Some((depth, field)) = hty.as_class().and_then(|c| c.lookup_field(attr)) {
            Some((format!("{}->{}{}", holder.code, base_path(depth), field.cname), field.ty.clone()))
        } else if let Some(s) = hty.as_struct() {
            s.fields.iter().find(|f| f.name == attr).map(|f| (format!("{}.{}", holder.code, f.cname), f.ty.clone()))
        } else if let Some(s) = hty.element_type().and_then(|e| e.as_struct()) {
            s.fields.iter().find(|f| f.name == attr).map(|f| (format!("{}->{}", holder.code, f.cname), f.ty.clone()))
        } else {
            None
        };
        if let Some((lhs, fty)) = member {
            let fty = self.ty(&fty);
            let op = self.coerce_to(value, &fty, pos)?;
            self.store(&lhs, &fty, op);
        } else if hty.is_pyobject() {
            let op = self.coerce_to(value, &Type::object(), pos)?;
            let interned = self.cx.constants.intern(attr);
            let (target, code) = (self.pyobj(&holder), self.pyobj(&op));
            self.error_if(&format!("PyObject_SetAttr({}, {}, {}) < 0", target, interned, code), pos);
            self.release(op);
        } else {
            self.release(value);
            let msg = format!("'{}' has no member '{}'", hty, attr);
            self.report(Diagnostic::error(codes::TYPE_MISMATCH, msg), pos);
        }
        self.release(holder);
        Ok(())
    }

    fn assign_index(&mut self, obj: &Expr, index: &Expr, value: Operand, pos: Pos) -> InternalResult<()> {
        let base = self.expr(obj)?;
        let idx = self.expr(index)?;
        if let Some(elem) = base.ty.element_type().cloned() {
            let elem = self.ty(&elem);
            let op = self.coerce_to(value, &elem, pos)?;
            self.store(&format!("{}[{}]", base.code, idx.code), &elem, op);
        } else if base.ty.is_pyobject() {
            let key = self.coerce_to(idx, &Type::object(), pos)?;
            let op = self.coerce_to(value, &Type::object(), pos)?;
            let (b, k, v) = (self.pyobj(&base), self.pyobj(&key), self.pyobj(&op));
            self.error_if(&format!("PyObject_SetItem({}, {}, {}) < 0", b, k, v), pos);
            self.release(op);
            self.release(key);
            self.release(base);
            return Ok(());
        } else {
            self.release(value);
            self.report(Diagnostic::error(codes::TYPE_MISMATCH, "value does not support item assignment"), pos);
        }
        self.release(idx);
        self.release(base);
        Ok(())
    }

    /// `a, b = value`
    fn unpack(&mut self, items: &[Expr], value: Operand, pos: Pos) -> InternalResult<()> {
        let source = self.coerce_to(value, &Type::object(), pos)?;
        self.require(catalog::OBJECT_HANDLING, "UnpackIterable")?;
        let iter = self.allocate_temp(&Type::object())?;
        let code = self.pyobj(&source);
        self.w.writeln(&format!("{} = PyObject_GetIter({});", iter, code));
        self.error_if_null(&iter, pos);
        self.release(source);
        let n = items.len();
        let mut values = Vec::with_capacity(n);
        for i in 0..n {
            let temp = self.allocate_temp(&Type::object())?;
            self.w.writeln(&format!("{} = __cx_UnpackItem({}, {}, {});", temp, iter, i, n));
            self.error_if_null(&temp, pos);
            values.push(Operand::owned(temp, Type::object()));
        }
        self.error_if(&format!("__cx_UnpackEnd({}, {}) < 0", iter, n), pos);
        self.release(Operand::owned(iter, Type::object()));
        for (item, value) in items.iter().zip(values) {
            self.assign_to(item, value, pos)?;
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr, pos: Pos) -> InternalResult<()> {
        let tty = self.ty(&target.ty);
        let simple_c_op = !tty.is_pyobject()
            && tty.is_numeric()
            && !matches!(op, BinOp::Pow | BinOp::Div | BinOp::FloorDiv | BinOp::Mod);
        if simple_c_op {
            let lhs = match &target.kind {
                ExprKind::Name { entry, .. } => {
                    let entry = self.entry(*entry)?;
                    matches!(entry.storage, Storage::Local | Storage::ModuleStatic).then(|| entry.cname.clone())
                }
                ExprKind::TempRef(id) => Some(self.binding(*id)?.0),
                _ => None,
            };
            if let Some(lhs) = lhs {
                let rhs = self.expr(value)?;
                let rhs = self.coerce_to(rhs, &tty, pos)?;
                self.w.writeln(&format!("{} {}= {};", lhs, op.to_c_str(), rhs.code));
                self.release(rhs);
                return Ok(());
            }
        }
        let current = self.expr(target)?;
        let rhs = self.expr(value)?;
        let result = self.binary(op, current, rhs, &tty, tty.is_pyobject(), pos)?;
        self.assign_to(target, result, pos)
    }

    fn if_stmt(&mut self, clauses: &[IfClause], orelse: Option<&[Stmt]>, pos: Pos) -> InternalResult<()> {
        let mut nested = 0;
        for (i, clause) in clauses.iter().enumerate() {
            let cond = self.expr(&clause.condition)?;
            let cond = self.truth(cond, pos)?;
            self.w.open_block(&format!("if ({})", cond.code));
            self.release(cond);
            self.stmts(&clause.body)?;
            if i + 1 < clauses.len() || orelse.is_some() {
                self.w.close_block(" else {");
                self.w.indent();
                nested += 1;
            } else {
                self.w.close_block("");
            }
        }
        if let Some(body) = orelse {
            self.stmts(body)?;
        }
        for _ in 0..nested {
            self.w.close_block("");
        }
        Ok(())
    }

    fn while_loop(&mut self, condition: &Expr, body: &[Stmt], orelse: Option<&[Stmt]>, pos: Pos) -> InternalResult<()> {
        self.push_loop();
        self.w.open_block("while (1)");
        let cond = self.expr(condition)?;
        let cond = self.truth(cond, pos)?;
        self.w.writeln(&format!("if (!{}) break;", cond.code));
        self.release(cond);
        self.stmts(body)?;
        self.continue_label();
        self.w.close_block("");
        if let Some(orelse) = orelse {
            self.stmts(orelse)?;
        }
        self.end_loop();
        Ok(())
    }

    fn for_in(&mut self, target: &Expr, iter: &Expr, body: &[Stmt], orelse: Option<&[Stmt]>, pos: Pos) -> InternalResult<()> {
        let iterable = self.expr(iter)?;
        let iterable = self.coerce_to(iterable, &Type::object(), pos)?;
        let it = self.allocate_temp(&Type::object())?;
        let code = self.pyobj(&iterable);
        self.w.writeln(&format!("{} = PyObject_GetIter({});", it, code));
        self.error_if_null(&it, pos);
        self.release(iterable);

        self.push_loop();
        self.w.open_block("for (;;)");
        let item = self.allocate_temp(&Type::object())?;
        self.w.writeln(&format!("{} = PyIter_Next({});", item, it));
        self.w.open_block(&format!("if (unlikely(!{}))", item));
        self.error_if("PyErr_Occurred()", pos);
        self.w.writeln("break;");
        self.w.close_block("");
        self.assign_to(target, Operand::owned(item, Type::object()), pos)?;
        self.stmts(body)?;
        self.continue_label();
        self.w.close_block("");
        if let Some(orelse) = orelse {
            self.stmts(orelse)?;
        }
        self.end_loop();
        self.release(Operand::owned(it, Type::object()));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn counted_loop(
        &mut self,
        target: &Expr,
        start: &Expr,
        stop: &Expr,
        step: i64,
        body: &[Stmt],
        orelse: Option<&[Stmt]>,
        pos: Pos,
    ) -> InternalResult<()> {
        let ty = self.ty(&target.ty);
        let ty = if ty.is_int() { ty } else { Type::py_ssize_t() };
        let first = self.expr(start)?;
        let first = self.coerce_to(first, &ty, pos)?;
        let last = self.expr(stop)?;
        let last = self.coerce_to(last, &ty, pos)?;
        let bound = self.allocate_temp(&ty)?;
        self.w.writeln(&format!("{} = {};", bound, last.code));
        self.release(last);
        let counter = self.allocate_temp(&ty)?;
        self.w.writeln(&format!("{} = {};", counter, first.code));
        self.release(first);

        self.push_loop();
        let cmp = if step > 0 { "<" } else { ">" };
        self.w.open_block(&format!("for (; {} {} {}; {} += {})", counter, cmp, bound, counter, int_text(step)));
        self.assign_to(target, Operand::borrowed(counter.clone(), ty.clone()), pos)?;
        self.stmts(body)?;
        self.continue_label();
        self.w.close_block("");
        if let Some(orelse) = orelse {
            self.stmts(orelse)?;
        }
        self.end_loop();
        self.release_temp(&counter);
        self.release_temp(&bound);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn pointer_loop(
        &mut self,
        target: &Expr,
        base: &Expr,
        length: &Expr,
        reversed: bool,
        body: &[Stmt],
        orelse: Option<&[Stmt]>,
        pos: Pos,
    ) -> InternalResult<()> {
        let start = self.expr(base)?;
        let start = self.stable(start)?;
        let Some(elem) = start.ty.element_type().cloned() else {
            return Err(InternalError::UnsupportedType { what: "a pointer loop".into(), ty: start.ty.to_string() });
        };
        let elem = self.ty(&elem);
        let len = self.expr(length)?;
        let len = self.coerce_to(len, &Type::py_ssize_t(), pos)?;
        let ptr_ty = Type::pointer(elem.clone());
        let cursor = self.allocate_temp(&ptr_ty)?;
        let end = self.allocate_temp(&ptr_ty)?;

        self.push_loop();
        if reversed {
            self.w.writeln(&format!("{} = {};", end, start.code));
            self.w.open_block(&format!("for ({} = {} + {}; {} > {}; )", cursor, start.code, len.code, cursor, end));
            self.w.writeln(&format!("{}--;", cursor));
        } else {
            self.w.writeln(&format!("{} = {} + {};", end, start.code, len.code));
            self.w.open_block(&format!("for ({} = {}; {} < {}; {}++)", cursor, start.code, cursor, end, cursor));
        }
        self.release(len);
        self.assign_to(target, Operand::borrowed(format!("(*{})", cursor), elem), pos)?;
        self.stmts(body)?;
        self.continue_label();
        self.w.close_block("");
        if let Some(orelse) = orelse {
            self.stmts(orelse)?;
        }
        self.end_loop();
        self.release_temp(&cursor);
        self.release_temp(&end);
        self.release(start);
        Ok(())
    }

    /// A reference of our own to an object, so rebinding the source
    /// variable inside a loop does not free what the loop walks.
    fn hold_object(&mut self, op: Operand) -> InternalResult<Operand> {
        if op.temp.is_some() {
            return Ok(op);
        }
        let temp = self.allocate_temp(&Type::object())?;
        let code = self.pyobj(&op);
        self.w.writeln(&format!("{} = {}; Py_INCREF({});", temp, code, temp));
        Ok(Operand::owned(temp, Type::object()))
    }

    #[allow(clippy::too_many_arguments)]
    fn sequence_loop(
        &mut self,
        target: &Expr,
        seq: &Expr,
        kind: SeqKind,
        reversed: bool,
        body: &[Stmt],
        orelse: Option<&[Stmt]>,
        pos: Pos,
    ) -> InternalResult<()> {
        let (size, get, builtin) = match kind {
            SeqKind::List => ("PyList_GET_SIZE", "PyList_GET_ITEM", Builtin::List),
            SeqKind::Tuple => ("PyTuple_GET_SIZE", "PyTuple_GET_ITEM", Builtin::Tuple),
        };
        let value = self.expr(seq)?;
        let value = self.coerce_to(value, &Type::builtin(builtin), pos)?;
        let held = self.hold_object(value)?;
        let s = held.code.clone();
        self.raise_if(&format!("{} == Py_None", s), "PyExc_TypeError", "'NoneType' object is not iterable", pos);
        let index = self.allocate_temp(&Type::py_ssize_t())?;

        self.push_loop();
        if reversed {
            self.w.open_block(&format!("for ({} = {}({}) - 1; {} >= 0; {}--)", index, size, s, index, index));
            self.w.writeln(&format!("if (unlikely({} >= {}({}))) break;", index, size, s));
        } else {
            self.w.open_block(&format!("for ({} = 0; {} < {}({}); {}++)", index, index, size, s, index));
        }
        let item = Operand::borrowed(format!("{}({}, {})", get, s, index), Type::object());
        self.assign_to(target, item, pos)?;
        self.stmts(body)?;
        self.continue_label();
        self.w.close_block("");
        if let Some(orelse) = orelse {
            self.stmts(orelse)?;
        }
        self.end_loop();
        self.release_temp(&index);
        self.release(held);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn dict_loop(
        &mut self,
        dict: &Expr,
        method: Option<DictIterKind>,
        key: Option<&Expr>,
        value: Option<&Expr>,
        body: &[Stmt],
        orelse: Option<&[Stmt]>,
        pos: Pos,
    ) -> InternalResult<()> {
        self.require(catalog::OBJECT_HANDLING, "DictIterNext")?;
        let d = self.expr(dict)?;
        let d = self.coerce_to(d, &Type::object(), pos)?;
        let held = self.hold_object(d)?;
        let dcode = held.code.clone();
        let (exc, message) = match method {
            Some(method) => {
                let name = match method {
                    DictIterKind::Keys => "keys",
                    DictIterKind::Values => "values",
                    DictIterKind::Items => "items",
                };
                ("PyExc_AttributeError", format!("'NoneType' object has no attribute '{}'", name))
            }
            None => ("PyExc_TypeError", "'NoneType' object is not iterable".to_string()),
        };
        self.raise_if(&format!("{} == Py_None", dcode), exc, &message, pos);
        let length = self.allocate_temp(&Type::py_ssize_t())?;
        let position = self.allocate_temp(&Type::py_ssize_t())?;
        self.w.writeln(&format!("{} = PyDict_Size({}); {} = 0;", length, dcode, position));

        self.push_loop();
        self.w.open_block("for (;;)");
        let key_temp = match key {
            Some(_) => Some(self.allocate_temp(&Type::object())?),
            None => None,
        };
        let value_temp = match value {
            Some(_) => Some(self.allocate_temp(&Type::object())?),
            None => None,
        };
        let status = self.allocate_temp(&Type::c_int())?;
        let out = |t: &Option<String>| t.as_ref().map_or_else(|| "NULL".to_string(), |t| format!("&{}", t));
        self.w.writeln(&format!(
            "{} = __cx_dict_iter_next({}, {}, &{}, {}, {});",
            status,
            dcode,
            length,
            position,
            out(&key_temp),
            out(&value_temp)
        ));
        self.w.writeln(&format!("if (unlikely({} == 0)) break;", status));
        self.error_if(&format!("{} < 0", status), pos);
        self.release_temp(&status);
        if let (Some(target), Some(temp)) = (key, key_temp) {
            self.assign_to(target, Operand::owned(temp, Type::object()), pos)?;
        }
        if let (Some(target), Some(temp)) = (value, value_temp) {
            self.assign_to(target, Operand::owned(temp, Type::object()), pos)?;
        }
        self.stmts(body)?;
        self.continue_label();
        self.w.close_block("");
        if let Some(orelse) = orelse {
            self.stmts(orelse)?;
        }
        self.end_loop();
        self.release_temp(&length);
        self.release_temp(&position);
        self.release(held);
        Ok(())
    }

    fn switch(&mut self, subject: &Expr, cases: &[SwitchCase], default: Option<&[Stmt]>) -> InternalResult<()> {
        let value = self.expr(subject)?;
        self.w.open_block(&format!("switch ({})", value.code));
        for case in cases {
            for v in &case.values {
                let label = self.expr(v)?;
                self.w.writeln(&format!("case {}:", label.code));
            }
            self.w.indent();
            self.stmts(&case.body)?;
            self.w.writeln("break;");
            self.w.dedent();
        }
        if let Some(body) = default {
            self.w.writeln("default:");
            self.w.indent();
            self.stmts(body)?;
            self.w.writeln("break;");
            self.w.dedent();
        }
        self.w.close_block("");
        self.release(value);
        Ok(())
    }

    fn return_stmt(&mut self, value: Option<&Expr>, pos: Pos) -> InternalResult<()> {
        let Some(ret_ty) = self.state.return_type.clone() else {
            return Err(InternalError::ReturnOutsideFunction);
        };
        let retval = naming::RETVAL_CNAME;
        match value {
            Some(v) => {
                let op = self.expr(v)?;
                if ret_ty.is_void() {
                    self.release(op);
                } else {
                    let op = self.coerce_to(op, &ret_ty, pos)?;
                    self.store(retval, &ret_ty, op);
                }
            }
            None if ret_ty.is_pyobject() => {
                self.store(retval, &ret_ty, Operand::borrowed("Py_None", Type::object()));
            }
            None => {}
        }
        let goto = self.return_goto();
        self.w.writeln(&goto);
        Ok(())
    }

    fn comprehension_append(
        &mut self,
        kind: CompKind,
        result: crate::ast::TempId,
        key: Option<&Expr>,
        value: &Expr,
        pos: Pos,
    ) -> InternalResult<()> {
        let (acc, _) = self.binding(result)?;
        let key_op = match (kind, key) {
            (CompKind::Dict, Some(k)) => {
                let op = self.expr(k)?;
                Some(self.coerce_to(op, &Type::object(), pos)?)
            }
            (CompKind::Dict, None) => {
                return Err(InternalError::UnsupportedType { what: "a dict comprehension without key".into(), ty: "dict".into() })
            }
            _ => None,
        };
        let item = self.expr(value)?;
        let item = self.coerce_to(item, &Type::object(), pos)?;
        let v = self.pyobj(&item);
        match (kind, key_op) {
            (CompKind::List, _) => {
                self.require(catalog::OBJECT_HANDLING, "ListAppend")?;
                self.error_if(&format!("__cx_PyList_Append({}, {}) < 0", acc, v), pos);
            }
            (CompKind::Set, _) => self.error_if(&format!("PySet_Add({}, {}) < 0", acc, v), pos),
            (CompKind::Dict, key_op) => {
                if let Some(key_op) = key_op {
                    let kc = self.pyobj(&key_op);
                    self.error_if(&format!("PyDict_SetItem({}, {}, {}) < 0", acc, kc, v), pos);
                    self.release(key_op);
                }
            }
        }
        self.release(item);
        Ok(())
    }
}


//! Expression emission.
//!
//! Every expression becomes an [`Operand`]. Side effects are written to the
//! body as statements before the operand is returned, so an operand's code
//! is always free of side effects and safe to evaluate more than once.

use super::buffer::{escape_char, escape_string};
use super::function::{object_cast, BodyEmitter, Operand};
use super::utility::catalog;
use crate::ast::{
    BinOp, BoolOpKind, BuiltinFn, CmpOp, CompKind, ConstValue, Expr, ExprKind, Pos, StrKind, UnaryOp,
};
use crate::diagnostics::{codes, Diagnostic};
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::semantic::{Entry, EntryKind, Storage};
use crate::types::{best_match, Builtin, Candidate, ExceptionSpec, FunctionType, NumericKind, Type, TypeRef};
use tracing::debug;

/// `__cx_base.` once per inheritance step between a class and the ancestor
/// that declares a member.
pub fn base_path(depth: usize) -> String {
    format!("{}.", naming::BASE_MEMBER).repeat(depth)
}

/// Exact type check macro for a builtin.
pub fn builtin_check(b: Builtin) -> &'static str {
    match b {
        Builtin::List => "PyList_CheckExact",
        Builtin::Tuple => "PyTuple_CheckExact",
        Builtin::Dict => "PyDict_CheckExact",
        Builtin::Set => "PySet_CheckExact",
        Builtin::Str => "PyUnicode_CheckExact",
        Builtin::Bytes => "PyBytes_CheckExact",
        Builtin::Int => "PyLong_CheckExact",
        Builtin::Float => "PyFloat_CheckExact",
        Builtin::Bool => "PyBool_Check",
        Builtin::Type => "PyType_Check",
    }
}

/// A C integer literal that keeps its value in any context.
pub fn int_text(value: i64) -> String {
    if value == i64::MIN {
        "(-9223372036854775807LL - 1)".to_string()
    } else if i32::try_from(value).is_err() {
        if value < 0 {
            format!("({}LL)", value)
        } else {
            format!("{}LL", value)
        }
    } else if value < 0 {
        format!("({})", value)
    } else {
        value.to_string()
    }
}

/// C text of a compile-time constant.
pub fn const_text(value: &ConstValue) -> String {
    match value {
        ConstValue::Int(v) => int_text(*v),
        ConstValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        ConstValue::Float(f) => format!("{:?}", f),
        ConstValue::Str(s) => format!("\"{}\"", escape_string(s)),
        ConstValue::None => "NULL".to_string(),
    }
}

fn int_boxer(kind: NumericKind, signed: bool) -> &'static str {
    match kind {
        NumericKind::SSize => "PyLong_FromSsize_t",
        NumericKind::Size => "PyLong_FromSize_t",
        NumericKind::LongLong if signed => "PyLong_FromLongLong",
        NumericKind::LongLong => "PyLong_FromUnsignedLongLong",
        _ if signed => "PyLong_FromLong",
        _ => "PyLong_FromUnsignedLong",
    }
}

impl<'c, 'a> BodyEmitter<'c, 'a> {
    /// Reports a problem in the module and continues with a poison operand.
    pub fn report(&mut self, diag: Diagnostic, pos: Pos) -> Operand {
        self.cx.reporter.report(diag, pos);
        Operand::error()
    }

    pub fn expr(&mut self, e: &Expr) -> InternalResult<Operand> {
        let ty = self.ty(&e.ty);
        let pos = e.pos;
        match &e.kind {
            ExprKind::Int { value, .. } => Ok(if ty.is_pyobject() {
                Operand::borrowed(self.cx.constants.int(*value), ty)
            } else {
                Operand::borrowed(int_text(*value), ty)
            }),
            ExprKind::Float { text } => Ok(if ty.is_pyobject() {
                Operand::borrowed(self.cx.constants.float(text), ty)
            } else {
                Operand::borrowed(text.replace('_', ""), ty)
            }),
            ExprKind::Bool(b) => Ok(match (ty.is_pyobject(), *b) {
                (true, true) => Operand::borrowed("Py_True", ty),
                (true, false) => Operand::borrowed("Py_False", ty),
                (false, b) => Operand::borrowed(if b { "1" } else { "0" }, ty),
            }),
            ExprKind::None => Ok(if ty.is_ptr() {
                Operand::borrowed("NULL", ty)
            } else {
                Operand::borrowed("Py_None", Type::object())
            }),
            ExprKind::Str { value, kind } => Ok(if ty.is_pyobject() {
                Operand::borrowed(self.cx.constants.string(value, *kind), ty)
            } else {
                Operand::borrowed(format!("\"{}\"", escape_string(value)), ty)
            }),
            ExprKind::Char(c) => Ok(Operand::borrowed(escape_char(*c), ty)),
            ExprKind::Name { name, entry } => {
                let entry = self.entry(*entry)?;
                self.name(name, entry, &ty, pos)
            }
            ExprKind::Attribute { obj, attr } => self.attribute(obj, attr, &ty, pos),
            ExprKind::Index { obj, index } => self.index(obj, index, &ty, pos),
            ExprKind::Slice { obj, start, stop } => self.slice(obj, start.as_deref(), stop.as_deref(), &ty, pos),
            ExprKind::Call { func, args } => self.call(func, args, &ty, pos),
            ExprKind::Binary { op, left, right } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                self.binary(*op, l, r, &ty, false, pos)
            }
            ExprKind::Unary { op, operand } => self.unary(*op, operand, &ty, pos),
            ExprKind::Compare { first, rest } => self.compare(first, rest, &ty, pos),
            ExprKind::BoolOp { op, left, right } => self.bool_op(*op, left, right, &ty, pos),
            ExprKind::Cond { test, then, orelse } => self.conditional(test, then, orelse, &ty, pos),
            ExprKind::Tuple(items) => self.sequence("PyTuple_New", "PyTuple_SET_ITEM", items, &ty, pos),
            ExprKind::List(items) => self.sequence("PyList_New", "PyList_SET_ITEM", items, &ty, pos),
            ExprKind::Dict(items) => self.dict(items, &ty, pos),
            ExprKind::CArray(items) => self.c_array(items, &ty, pos),
            ExprKind::Coerce(inner) => {
                let op = self.expr(inner)?;
                self.coerce_to(op, &ty, pos)
            }
            ExprKind::TypeTest { expr, class } => self.type_test(expr, class, &ty, pos),
            ExprKind::Generator { .. } => Ok(self.report(
                Diagnostic::error(
                    codes::UNSUPPORTED_CONSTRUCT,
                    "generator expressions are only supported as the argument of sum(), any(), all(), sorted() or a container constructor",
                ),
                pos,
            )),
            ExprKind::Comprehension { kind, result, body } => {
                let temp = self.allocate_temp(&Type::object())?;
                let create = match kind {
                    CompKind::List => "PyList_New(0)",
                    CompKind::Set => "PySet_New(NULL)",
                    CompKind::Dict => "PyDict_New()",
                };
                self.w.writeln(&format!("{} = {};", temp, create));
                self.error_if_null(&temp, pos);
                self.bind(*result, temp, ty.clone());
                self.stmt(body)?;
                let op = self.take_binding(*result)?;
                Ok(Operand { ty, ..op })
            }
            ExprKind::StatResult { result, body } => {
                self.stmt(body)?;
                self.take_binding(*result)
            }
            ExprKind::TempRef(id) => {
                let (cname, bound) = self.binding(*id)?;
                Ok(Operand::borrowed(cname, bound))
            }
            ExprKind::BuiltinCall { func, args } => self.builtin_call(*func, args, &ty, pos),
        }
    }

    /// Builds a C expression over `parts`. When any part owns a temp the
    /// value is copied out first, so the parts can be released at once.
    pub fn compose(&mut self, code: String, ty: TypeRef, parts: Vec<Operand>) -> InternalResult<Operand> {
        if parts.iter().all(|p| p.temp.is_none()) {
            return Ok(Operand::borrowed(code, ty));
        }
        let temp = self.allocate_temp(&ty)?;
        self.w.writeln(&format!("{} = {};", temp, code));
        if ty.is_pyobject() {
            self.w.writeln(&format!("Py_INCREF({});", temp));
        }
        for p in parts {
            self.release(p);
        }
        Ok(Operand::owned(temp, ty))
    }

    /// Writes `op` into `lhs`, which has type `lhs_ty`.
    pub fn store(&mut self, lhs: &str, lhs_ty: &TypeRef, op: Operand) {
        if lhs_ty.is_pyobject() {
            self.assign_object(lhs, lhs_ty, op);
        } else {
            self.w.writeln(&format!("{} = {};", lhs, op.code));
            self.release(op);
        }
    }

    /// `op` converted to a C truth value.
    pub fn truth(&mut self, op: Operand, pos: Pos) -> InternalResult<Operand> {
        if op.ty.is_error() || !op.ty.is_pyobject() {
            return Ok(op);
        }
        let temp = self.allocate_temp(&Type::c_int())?;
        let code = self.pyobj(&op);
        self.w.writeln(&format!("{} = PyObject_IsTrue({});", temp, code));
        self.error_if(&format!("{} < 0", temp), pos);
        self.release(op);
        Ok(Operand::owned(temp, Type::bint()))
    }

    fn name(&mut self, name: &str, entry: &'a Entry, ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        if let EntryKind::Constant(value) = &entry.kind {
            let code = if entry.cname.is_empty() { const_text(value) } else { entry.cname.clone() };
            let op = Operand::borrowed(code, self.ty(&entry.ty));
            return self.coerce_to(op, ty, pos);
        }
        if entry.kind == EntryKind::Type {
            if let Some(class) = entry.ty.as_class() {
                let code = format!("((PyObject *){})", class.typeptr_cname());
                return Ok(Operand::borrowed(code, Type::builtin(Builtin::Type)));
            }
        }
        let op = match entry.storage {
            Storage::Local | Storage::ModuleStatic => Operand::borrowed(entry.cname.clone(), self.ty(&entry.ty)),
            Storage::ModuleDict | Storage::Builtin => {
                let (helper, getter) = if entry.storage == Storage::Builtin {
                    ("GetBuiltinName", "__cx_GetBuiltinName")
                } else {
                    ("GetModuleGlobalName", "__cx_GetModuleGlobalName")
                };
                self.require(catalog::OBJECT_HANDLING, helper)?;
                let interned = self.cx.constants.intern(name);
                let temp = self.allocate_temp(&Type::object())?;
                self.w.writeln(&format!("{} = {}({});", temp, getter, interned));
                self.error_if_null(&temp, pos);
                Operand::owned(temp, Type::object())
            }
        };
        self.coerce_to(op, ty, pos)
    }

    fn attribute(&mut self, obj: &Expr, attr: &str, ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let holder = self.expr(obj)?;
        if holder.ty.is_error() {
            return Ok(holder);
        }
        let hty = holder.ty.clone();
        if let Some(class) = hty.as_class() {
            if let Some((depth, field)) = class.lookup_field(attr) {
                let code = format!("{}->{}{}", holder.code, base_path(depth), field.cname);
                let fty = self.ty(&field.ty);
                let op = self.compose(code, fty, vec![holder])?;
                return self.coerce_to(op, ty, pos);
            }
        }
        let (strukt, access) = match hty.as_struct() {
            Some(s) => (Some(s), "."),
            None => (hty.element_type().and_then(|e| e.as_struct()), "->"),
        };
        if let Some(s) = strukt {
            let Some(field) = s.fields.iter().find(|f| f.name == attr) else {
                self.release(holder);
                let msg = format!("'{}' has no member '{}'", s.name, attr);
                return Ok(self.report(Diagnostic::error(codes::TYPE_MISMATCH, msg), pos));
            };
            let code = format!("{}{}{}", holder.code, access, field.cname);
            let fty = self.ty(&field.ty);
            let op = self.compose(code, fty, vec![holder])?;
            return self.coerce_to(op, ty, pos);
        }
        if !hty.is_pyobject() {
            self.release(holder);
            let msg = format!("cannot access attribute '{}' of C value of type '{}'", attr, hty);
            return Ok(self.report(Diagnostic::error(codes::TYPE_MISMATCH, msg), pos));
        }
        self.require(catalog::OBJECT_HANDLING, "PyObjectGetAttrStr")?;
        let interned = self.cx.constants.intern(attr);
        let temp = self.allocate_temp(&Type::object())?;
        let obj_code = self.pyobj(&holder);
        self.w.writeln(&format!("{} = __cx_PyObject_GetAttrStr({}, {});", temp, obj_code, interned));
        self.error_if_null(&temp, pos);
        self.release(holder);
        self.coerce_to(Operand::owned(temp, Type::object()), ty, pos)
    }

    fn index(&mut self, obj: &Expr, index: &Expr, ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let base = self.expr(obj)?;
        let idx = self.expr(index)?;
        if base.ty.is_error() || idx.ty.is_error() {
            self.release(base);
            self.release(idx);
            return Ok(Operand::error());
        }
        if let Some(elem) = base.ty.element_type().cloned() {
            let code = format!("{}[{}]", base.code, idx.code);
            let elem = self.ty(&elem);
            let op = self.compose(code, elem, vec![base, idx])?;
            return self.coerce_to(op, ty, pos);
        }
        if !base.ty.is_pyobject() {
            self.release(base);
            self.release(idx);
            let msg = "value is not indexable".to_string();
            return Ok(self.report(Diagnostic::error(codes::TYPE_MISMATCH, msg), pos));
        }
        let temp = self.allocate_temp(&Type::object())?;
        let obj_code = self.pyobj(&base);
        if idx.ty.is_int() {
            self.require(catalog::OBJECT_HANDLING, "GetItemInt")?;
            self.w.writeln(&format!("{} = __cx_GetItemInt_Fast({}, (Py_ssize_t){});", temp, obj_code, idx.code));
            self.error_if_null(&temp, pos);
            self.release(idx);
        } else {
            let key = self.coerce_to(idx, &Type::object(), pos)?;
            let key_code = self.pyobj(&key);
            self.w.writeln(&format!("{} = PyObject_GetItem({}, {});", temp, obj_code, key_code));
            self.error_if_null(&temp, pos);
            self.release(key);
        }
        self.release(base);
        self.coerce_to(Operand::owned(temp, Type::object()), ty, pos)
    }

    fn slice(
        &mut self,
        obj: &Expr,
        start: Option<&Expr>,
        stop: Option<&Expr>,
        ty: &TypeRef,
        pos: Pos,
    ) -> InternalResult<Operand> {
        let base = self.expr(obj)?;
        if !base.ty.is_pyobject() {
            self.release(base);
            let msg = "slicing is only supported on Python objects";
            return Ok(self.report(Diagnostic::error(codes::UNSUPPORTED_CONSTRUCT, msg), pos));
        }
        let bound = |em: &mut Self, e: Option<&Expr>, default: &str| -> InternalResult<Operand> {
            match e {
                Some(e) => {
                    let op = em.expr(e)?;
                    em.coerce_to(op, &Type::py_ssize_t(), pos)
                }
                None => Ok(Operand::borrowed(default, Type::py_ssize_t())),
            }
        };
        let lo = bound(self, start, "0")?;
        let hi = bound(self, stop, "PY_SSIZE_T_MAX")?;
        let temp = self.allocate_temp(&Type::object())?;
        let obj_code = self.pyobj(&base);
        self.w.writeln(&format!("{} = PySequence_GetSlice({}, {}, {});", temp, obj_code, lo.code, hi.code));
        self.error_if_null(&temp, pos);
        self.release(lo);
        self.release(hi);
        self.release(base);
        self.coerce_to(Operand::owned(temp, Type::object()), ty, pos)
    }

    /// Applies a binary operator to evaluated operands. `inplace` selects
    /// the in-place object protocol for augmented assignment.
    pub fn binary(
        &mut self,
        op: BinOp,
        l: Operand,
        r: Operand,
        ty: &TypeRef,
        inplace: bool,
        pos: Pos,
    ) -> InternalResult<Operand> {
        if l.ty.is_error() || r.ty.is_error() || ty.is_error() {
            self.release(l);
            self.release(r);
            return Ok(Operand::error());
        }
        if ty.is_pyobject() {
            let l = self.coerce_to(l, &Type::object(), pos)?;
            let r = self.coerce_to(r, &Type::object(), pos)?;
            let func = op.number_function(inplace);
            let (a, b) = (self.pyobj(&l), self.pyobj(&r));
            let call = if op == BinOp::Pow {
                format!("{}({}, {}, Py_None)", func, a, b)
            } else {
                format!("{}({}, {})", func, a, b)
            };
            let temp = self.allocate_temp(&Type::object())?;
            self.w.writeln(&format!("{} = {};", temp, call));
            self.error_if_null(&temp, pos);
            self.release(l);
            self.release(r);
            let result = Operand::owned(temp, Type::object());
            return if ty.builtin_kind().is_some() { Ok(Operand { ty: ty.clone(), ..result }) } else { self.coerce_to(result, ty, pos) };
        }
        let Some(n) = ty.as_numeric() else {
            let code = format!("({} {} {})", l.code, op.to_c_str(), r.code);
            return self.compose(code, ty.clone(), vec![l, r]);
        };
        let ctype = n.c_name();
        let h = n.helper_name();
        let code = match op {
            BinOp::Pow if n.is_int() => {
                self.cx.utility.insert(catalog::int_pow(n))?;
                format!("__cx_pow_{}(({}){}, ({}){})", h, ctype, l.code, ctype, r.code)
            }
            BinOp::Pow if n.complex => format!("cpow({}, {})", l.code, r.code),
            BinOp::Pow => {
                let f = match n.kind {
                    NumericKind::Float => "powf",
                    NumericKind::LongDouble => "powl",
                    _ => "pow",
                };
                format!("{}({}, {})", f, l.code, r.code)
            }
            BinOp::Div if n.is_int() => {
                self.raise_if(&format!("{} == 0", r.code), "PyExc_ZeroDivisionError", "integer division by zero", pos);
                format!("({} / {})", l.code, r.code)
            }
            BinOp::Div => {
                if !n.complex {
                    self.raise_if(&format!("{} == 0", r.code), "PyExc_ZeroDivisionError", "float division by zero", pos);
                }
                format!("(({}){} / ({}){})", ctype, l.code, ctype, r.code)
            }
            BinOp::FloorDiv | BinOp::Mod if n.is_int() => {
                self.raise_if(
                    &format!("{} == 0", r.code),
                    "PyExc_ZeroDivisionError",
                    "integer division or modulo by zero",
                    pos,
                );
                if !n.is_signed() {
                    format!("({} {} {})", l.code, if op == BinOp::Mod { "%" } else { "/" }, r.code)
                } else {
                    self.cx.utility.insert(catalog::int_div_mod(n))?;
                    if op == BinOp::FloorDiv {
                        if let Some(min) = catalog::int_min_macro(n) {
                            self.raise_if(
                                &format!("{} == -1 && {} == {}", r.code, l.code, min),
                                "PyExc_OverflowError",
                                "value too large to perform division",
                                pos,
                            );
                        }
                        format!("__cx_div_{}({}, {})", h, l.code, r.code)
                    } else {
                        format!("__cx_mod_{}({}, {})", h, l.code, r.code)
                    }
                }
            }
            BinOp::FloorDiv | BinOp::Mod if !n.complex => {
                let message = if op == BinOp::Mod { "float modulo" } else { "float floor division by zero" };
                self.raise_if(&format!("{} == 0", r.code), "PyExc_ZeroDivisionError", message, pos);
                self.cx.utility.insert(catalog::float_div_mod(n))?;
                let f = if op == BinOp::Mod { "mod" } else { "floordiv" };
                format!("__cx_{}_{}({}, {})", f, h, l.code, r.code)
            }
            _ => format!("({} {} {})", l.code, op.to_c_str(), r.code),
        };
        self.compose(code, ty.clone(), vec![l, r])
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let value = self.expr(operand)?;
        if value.ty.is_error() {
            return Ok(value);
        }
        match op {
            UnaryOp::Not => {
                let cond = self.truth(value, pos)?;
                let code = format!("(!{})", cond.code);
                let op = self.compose(code, Type::bint(), vec![cond])?;
                self.coerce_to(op, ty, pos)
            }
            UnaryOp::AddressOf => self.compose(format!("(&{})", value.code), ty.clone(), vec![value]),
            UnaryOp::Deref => self.compose(format!("(*{})", value.code), ty.clone(), vec![value]),
            UnaryOp::Neg | UnaryOp::Pos | UnaryOp::Invert if value.ty.is_pyobject() => {
                let func = match op {
                    UnaryOp::Neg => "PyNumber_Negative",
                    UnaryOp::Pos => "PyNumber_Positive",
                    _ => "PyNumber_Invert",
                };
                let temp = self.allocate_temp(&Type::object())?;
                let code = self.pyobj(&value);
                self.w.writeln(&format!("{} = {}({});", temp, func, code));
                self.error_if_null(&temp, pos);
                self.release(value);
                self.coerce_to(Operand::owned(temp, Type::object()), ty, pos)
            }
            _ => {
                let code = format!("({}{})", op.to_c_str(), value.code);
                let result_ty = value.ty.clone();
                let op = self.compose(code, result_ty, vec![value])?;
                self.coerce_to(op, ty, pos)
            }
        }
    }

    /// One comparison link as an int temp. Neither operand is released.
    fn compare_link(&mut self, l: &Operand, op: CmpOp, r: &Operand, pos: Pos) -> InternalResult<Operand> {
        let temp = self.allocate_temp(&Type::c_int())?;
        let objects = l.ty.is_pyobject() || r.ty.is_pyobject();
        match op {
            CmpOp::Is | CmpOp::IsNot => {
                let (a, b) = if objects { (self.pyobj(l), self.pyobj(r)) } else { (l.code.clone(), r.code.clone()) };
                self.w.writeln(&format!("{} = ({} {} {});", temp, a, op.to_c_str(), b));
            }
            CmpOp::In | CmpOp::NotIn => {
                if !r.ty.is_pyobject() {
                    self.release_temp(&temp);
                    let msg = "'in' needs a Python container on the right";
                    return Ok(self.report(Diagnostic::error(codes::UNSUPPORTED_CONSTRUCT, msg), pos));
                }
                let item = self.coerce_to(Operand::borrowed(l.code.clone(), l.ty.clone()), &Type::object(), pos)?;
                let (container, needle) = (self.pyobj(r), self.pyobj(&item));
                self.w.writeln(&format!("{} = PySequence_Contains({}, {});", temp, container, needle));
                self.error_if(&format!("{} < 0", temp), pos);
                if op == CmpOp::NotIn {
                    self.w.writeln(&format!("{} = ({} == 0);", temp, temp));
                }
                self.release(item);
            }
            _ if objects => {
                let a = self.coerce_to(Operand::borrowed(l.code.clone(), l.ty.clone()), &Type::object(), pos)?;
                let b = self.coerce_to(Operand::borrowed(r.code.clone(), r.ty.clone()), &Type::object(), pos)?;
                let rich = op.rich_compare_op().unwrap_or("Py_EQ");
                let (ac, bc) = (self.pyobj(&a), self.pyobj(&b));
                self.w.writeln(&format!("{} = PyObject_RichCompareBool({}, {}, {});", temp, ac, bc, rich));
                self.error_if(&format!("{} < 0", temp), pos);
                self.release(a);
                self.release(b);
            }
            _ => {
                self.w.writeln(&format!("{} = ({} {} {});", temp, l.code, op.to_c_str(), r.code));
            }
        }
        Ok(Operand::owned(temp, Type::bint()))
    }

    fn compare(&mut self, first: &Expr, rest: &[(CmpOp, Expr)], ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        if let [(op, other)] = rest {
            let l = self.expr(first)?;
            let r = self.expr(other)?;
            if l.ty.is_error() || r.ty.is_error() {
                self.release(l);
                self.release(r);
                return Ok(Operand::error());
            }
            if ty.is_pyobject() && l.ty.is_pyobject() && r.ty.is_pyobject() {
                if let Some(rich) = op.rich_compare_op() {
                    let temp = self.allocate_temp(&Type::object())?;
                    let (a, b) = (self.pyobj(&l), self.pyobj(&r));
                    self.w.writeln(&format!("{} = PyObject_RichCompare({}, {}, {});", temp, a, b, rich));
                    self.error_if_null(&temp, pos);
                    self.release(l);
                    self.release(r);
                    return Ok(Operand::owned(temp, Type::object()));
                }
            }
            let c = self.compare_link(&l, *op, &r, pos)?;
            self.release(l);
            self.release(r);
            return self.coerce_to(c, ty, pos);
        }

        // a < b < c: every middle operand is evaluated once and kept until
        // the whole chain is done.
        let result = self.allocate_temp(&Type::bint())?;
        let mut left = self.expr(first)?;
        let mut middles = Vec::new();
        let mut opened = 0;
        for (i, (op, next)) in rest.iter().enumerate() {
            let last = i + 1 == rest.len();
            let right = self.expr(next)?;
            let right = if last { right } else { self.stable(right)? };
            let c = self.compare_link(&left, *op, &right, pos)?;
            self.w.writeln(&format!("{} = {};", result, c.code));
            self.release(c);
            if i == 0 {
                self.release(left);
            } else {
                middles.push(left);
            }
            if !last {
                self.w.open_block(&format!("if ({})", result));
                opened += 1;
            }
            left = right;
        }
        self.release(left);
        for _ in 0..opened {
            self.w.close_block("");
        }
        for m in middles {
            if let Some(temp) = &m.temp {
                if m.ty.is_pyobject() {
                    self.w.writeln(&format!("Py_XDECREF({}); {} = 0;", temp, temp));
                }
                self.release_temp(temp);
            }
        }
        self.coerce_to(Operand::owned(result, Type::bint()), ty, pos)
    }

    fn bool_op(&mut self, op: BoolOpKind, left: &Expr, right: &Expr, ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let result = self.allocate_temp(ty)?;
        let l = self.expr(left)?;
        let l = self.coerce_to(l, ty, pos)?;
        self.store(&result, ty, l);
        let test = self.truth(Operand::borrowed(result.clone(), ty.clone()), pos)?;
        let cond = match op {
            BoolOpKind::And => test.code.clone(),
            BoolOpKind::Or => format!("!{}", test.code),
        };
        self.w.open_block(&format!("if ({})", cond));
        self.release(test);
        let r = self.expr(right)?;
        let r = self.coerce_to(r, ty, pos)?;
        self.store(&result, ty, r);
        self.w.close_block("");
        Ok(Operand::owned(result, ty.clone()))
    }

    fn conditional(&mut self, test: &Expr, then: &Expr, orelse: &Expr, ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let result = self.allocate_temp(ty)?;
        let cond = self.expr(test)?;
        let cond = self.truth(cond, pos)?;
        self.w.open_block(&format!("if ({})", cond.code));
        self.release(cond);
        let a = self.expr(then)?;
        let a = self.coerce_to(a, ty, pos)?;
        self.store(&result, ty, a);
        self.w.close_block(" else {");
        self.w.indent();
        let b = self.expr(orelse)?;
        let b = self.coerce_to(b, ty, pos)?;
        self.store(&result, ty, b);
        self.w.close_block("");
        Ok(Operand::owned(result, ty.clone()))
    }

    fn sequence(&mut self, create: &str, set_item: &str, items: &[Expr], ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let temp = self.allocate_temp(&Type::object())?;
        self.w.writeln(&format!("{} = {}({});", temp, create, items.len()));
        self.error_if_null(&temp, pos);
        for (i, item) in items.iter().enumerate() {
            let op = self.expr(item)?;
            let op = self.coerce_to(op, &Type::object(), pos)?;
            let (code, given) = self.give_ref(op);
            self.w.writeln(&format!("{}({}, {}, {});", set_item, temp, i, code));
            self.gave(given);
        }
        Ok(Operand::owned(temp, ty.clone()))
    }

    fn dict(&mut self, items: &[(Expr, Expr)], ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let temp = self.allocate_temp(&Type::object())?;
        self.w.writeln(&format!("{} = PyDict_New();", temp));
        self.error_if_null(&temp, pos);
        for (k, v) in items {
            let key = self.expr(k)?;
            let key = self.coerce_to(key, &Type::object(), pos)?;
            let value = self.expr(v)?;
            let value = self.coerce_to(value, &Type::object(), pos)?;
            let (kc, vc) = (self.pyobj(&key), self.pyobj(&value));
            self.error_if(&format!("PyDict_SetItem({}, {}, {}) < 0", temp, kc, vc), pos);
            self.release(key);
            self.release(value);
        }
        Ok(Operand::owned(temp, ty.clone()))
    }

    fn c_array(&mut self, items: &[Expr], ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let Some(elem) = ty.element_type().cloned() else {
            return Err(InternalError::UnsupportedType { what: "an array literal".into(), ty: ty.to_string() });
        };
        let temp = self.allocate_temp(ty)?;
        for (i, item) in items.iter().enumerate() {
            let op = self.expr(item)?;
            let op = self.coerce_to(op, &elem, pos)?;
            self.w.writeln(&format!("{}[{}] = {};", temp, i, op.code));
            self.release(op);
        }
        Ok(Operand::owned(temp, ty.clone()))
    }

    fn type_test(&mut self, expr: &Expr, class: &TypeRef, ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let value = self.expr(expr)?;
        let Some(c) = class.as_class() else {
            return Err(InternalError::UnsupportedType { what: "a type test".into(), ty: class.to_string() });
        };
        let code = format!("PyObject_TypeCheck({}, {})", self.pyobj(&value), c.typeptr_cname());
        let op = self.compose(code, Type::bint(), vec![value])?;
        self.coerce_to(op, ty, pos)
    }

    // Calls

    fn call(&mut self, func: &Expr, args: &[Expr], ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        if let ExprKind::Attribute { obj, attr } = &func.kind {
            let oty = self.ty(&obj.ty);
            if oty.as_class().is_some_and(|c| c.slot_impl(attr).is_some()) {
                return self.method_call(obj, &oty, attr, args, pos);
            }
        }
        if let ExprKind::Name { entry, .. } = &func.kind {
            let entry = self.entry(*entry)?;
            if entry.kind == EntryKind::Function
                && entry.ty.as_function().is_some()
                && !matches!(entry.storage, Storage::ModuleDict | Storage::Builtin)
            {
                return self.c_function_call(entry, args, pos);
            }
            if entry.kind == EntryKind::Type && entry.ty.as_class().is_some() {
                let callee = self.expr(func)?;
                let result = self.object_call(callee, args, pos)?;
                // Calling an extension type yields an instance of it.
                return Ok(if self.ty(&entry.ty).same_as(ty) { Operand { ty: ty.clone(), ..result } } else { self.coerce_to(result, ty, pos)? });
            }
        }
        let callee = self.expr(func)?;
        let result = self.object_call(callee, args, pos)?;
        self.coerce_to(result, ty, pos)
    }

    fn c_function_call(&mut self, entry: &'a Entry, args: &[Expr], pos: Pos) -> InternalResult<Operand> {
        let mut ops = Vec::with_capacity(args.len());
        for a in args {
            ops.push(self.expr(a)?);
        }
        if ops.iter().any(|o| o.ty.is_error()) {
            for o in ops {
                self.release(o);
            }
            return Ok(Operand::error());
        }
        let fty = self.ty(&entry.ty);
        let (cname, sig) = if !entry.overloads.is_empty() || fty.contains_fused() {
            let mut candidates = vec![Candidate::new(entry.name.clone(), entry.cname.clone(), fty)];
            for id in &entry.overloads {
                let other = self.entry(*id)?;
                let oty = self.ty(&other.ty);
                candidates.push(Candidate::new(other.name.clone(), other.cname.clone(), oty));
            }
            let arg_types: Vec<TypeRef> = ops.iter().map(|o| o.ty.clone()).collect();
            match best_match(&arg_types, &candidates, &mut self.cx.specializer) {
                Ok(m) => {
                    debug!(callee = %entry.name, chosen = %m.candidate.cname, "resolved overloaded call");
                    (m.candidate.cname, m.signature)
                }
                Err(err) => {
                    for o in ops {
                        self.release(o);
                    }
                    return Ok(self.report(Diagnostic::from_overload(&err), pos));
                }
            }
        } else {
            let Some(sig) = fty.as_function().cloned() else {
                for o in ops {
                    self.release(o);
                }
                let msg = format!("'{}' is not callable", entry.name);
                return Ok(self.report(Diagnostic::error(codes::NOT_CALLABLE, msg), pos));
            };
            if !sig.accepts_arg_count(ops.len()) {
                for o in ops {
                    self.release(o);
                }
                let msg = format!(
                    "'{}' takes {} arguments but {} were given",
                    entry.name,
                    sig.params.len(),
                    args.len()
                );
                return Ok(self.report(Diagnostic::error(codes::ARGUMENT_COUNT_MISMATCH, msg), pos));
            }
            (entry.cname.clone(), sig)
        };
        self.emit_c_call(&cname, &sig, ops, pos)
    }

    /// C text passing `op` where `target` is expected.
    fn arg_code(&self, op: &Operand, target: &TypeRef) -> String {
        if op.ty.is_pyobject() && target.is_pyobject() {
            match target.as_class() {
                Some(c) if !op.ty.as_class().is_some_and(|s| s.same_class(c)) => {
                    format!("((struct {} *){})", c.objstruct_cname(), op.code)
                }
                Some(_) => op.code.clone(),
                None => self.pyobj(op),
            }
        } else {
            op.code.clone()
        }
    }

    /// Calls a C function and checks its error indicator.
    pub fn emit_c_call(&mut self, callee: &str, sig: &FunctionType, args: Vec<Operand>, pos: Pos) -> InternalResult<Operand> {
        let mut codes = Vec::with_capacity(sig.params.len().max(args.len()));
        let mut held = Vec::with_capacity(args.len());
        for (i, a) in args.into_iter().enumerate() {
            let a = match sig.params.get(i) {
                Some(p) => {
                    let pty = self.ty(&p.ty);
                    let a = self.coerce_to(a, &pty, pos)?;
                    codes.push(self.arg_code(&a, &pty));
                    a
                }
                None => {
                    codes.push(a.code.clone());
                    a
                }
            };
            held.push(a);
        }
        for p in sig.params.iter().skip(codes.len()) {
            match &p.default {
                Some(d) => codes.push(d.clone()),
                None => {
                    return Err(InternalError::UnsupportedType {
                        what: format!("a call to {} without argument '{}'", callee, p.name),
                        ty: p.ty.to_string(),
                    })
                }
            }
        }
        let call = format!("{}({})", callee, codes.join(", "));
        let ret = self.ty(&sig.return_type);
        let result = if ret.is_void() {
            self.w.writeln(&format!("{};", call));
            if matches!(sig.exception, ExceptionSpec::Check | ExceptionSpec::ValueOrCheck(_)) {
                self.error_if("PyErr_Occurred()", pos);
            }
            Operand::borrowed("", Type::void())
        } else {
            let temp = self.allocate_temp(&ret)?;
            self.w.writeln(&format!("{} = {};", temp, call));
            if ret.is_pyobject() {
                self.error_if_null(&temp, pos);
            } else {
                match &sig.exception {
                    ExceptionSpec::None => {}
                    ExceptionSpec::Value(v) => self.error_if(&format!("{} == {}", temp, v), pos),
                    ExceptionSpec::ValueOrCheck(v) => {
                        self.error_if(&format!("{} == {} && PyErr_Occurred()", temp, v), pos)
                    }
                    ExceptionSpec::Check => self.error_if("PyErr_Occurred()", pos),
                }
            }
            Operand::owned(temp, ret)
        };
        for a in held {
            self.release(a);
        }
        Ok(result)
    }

    /// `obj.attr(args)` on an extension type with a C method `attr`:
    /// through the vtable, or directly when the class cannot be subclassed.
    fn method_call(&mut self, obj: &Expr, oty: &TypeRef, attr: &str, args: &[Expr], pos: Pos) -> InternalResult<Operand> {
        let Some(class) = oty.as_class() else {
            return Err(InternalError::UnsupportedType { what: "a method call".into(), ty: oty.to_string() });
        };
        let target = self.expr(obj)?;
        let target = self.stable(target)?;
        let (callee, slot_ty) = match (class.is_final, class.slot_impl(attr), class.slot_declarer(attr)) {
            (true, Some(imp), _) | (_, Some(imp), None) => (imp.cname.clone(), imp.ty.clone()),
            (false, _, Some((_, declarer, slot))) => {
                let depth = class.vtab_owner_depth().unwrap_or(0);
                let callee = format!(
                    "((struct {} *){}->{}{})->{}",
                    declarer.vtabstruct_cname(),
                    target.code,
                    base_path(depth),
                    naming::VTAB_MEMBER,
                    naming::sanitize(&slot.name)
                );
                (callee, slot.ty.clone())
            }
            _ => {
                return Err(InternalError::UnsupportedType { what: format!("method '{}'", attr), ty: oty.to_string() })
            }
        };
        let slot_ty = self.ty(&slot_ty);
        let Some(sig) = slot_ty.as_function().cloned() else {
            return Err(InternalError::UnsupportedType { what: format!("method '{}'", attr), ty: slot_ty.to_string() });
        };
        let self_ty = sig.params.first().map(|p| p.ty.clone()).unwrap_or_else(|| oty.clone());
        let self_code = match self_ty.as_class() {
            Some(c) => format!("((struct {} *){})", c.objstruct_cname(), target.code),
            None => self.pyobj(&target),
        };
        let mut ops = vec![Operand::borrowed(self_code, self_ty)];
        for a in args {
            ops.push(self.expr(a)?);
        }
        if !sig.accepts_arg_count(ops.len()) {
            for o in ops {
                self.release(o);
            }
            self.release(target);
            let expected = sig.params.len().saturating_sub(1);
            let msg = format!("method '{}' takes {} arguments but {} were given", attr, expected, args.len());
            return Ok(self.report(Diagnostic::error(codes::ARGUMENT_COUNT_MISMATCH, msg), pos));
        }
        let result = self.emit_c_call(&callee, &sig, ops, pos)?;
        self.release(target);
        Ok(result)
    }

    /// Calls a Python object.
    fn object_call(&mut self, callee: Operand, args: &[Expr], pos: Pos) -> InternalResult<Operand> {
        let callee = self.coerce_to(callee, &Type::object(), pos)?;
        let mut ops = Vec::with_capacity(args.len());
        for a in args {
            let op = self.expr(a)?;
            ops.push(self.coerce_to(op, &Type::object(), pos)?);
        }
        if callee.ty.is_error() || ops.iter().any(|o| o.ty.is_error()) {
            self.release(callee);
            for o in ops {
                self.release(o);
            }
            return Ok(Operand::error());
        }
        let temp = self.allocate_temp(&Type::object())?;
        let f = self.pyobj(&callee);
        match ops.len() {
            0 => {
                self.require(catalog::OBJECT_HANDLING, "PyObjectCallNoArg")?;
                self.w.writeln(&format!("{} = __cx_PyObject_CallNoArg({});", temp, f));
                self.error_if_null(&temp, pos);
            }
            1 => {
                self.require(catalog::OBJECT_HANDLING, "PyObjectCallOneArg")?;
                let a = self.pyobj(&ops[0]);
                self.w.writeln(&format!("{} = __cx_PyObject_CallOneArg({}, {});", temp, f, a));
                self.error_if_null(&temp, pos);
            }
            n => {
                self.require(catalog::OBJECT_HANDLING, "PyObjectCall")?;
                let tuple = self.allocate_temp(&Type::object())?;
                let items: Vec<String> = ops.iter().map(|o| self.pyobj(o)).collect();
                self.w.writeln(&format!("{} = PyTuple_Pack({}, {});", tuple, n, items.join(", ")));
                self.error_if_null(&tuple, pos);
                self.w.writeln(&format!("{} = __cx_PyObject_Call({}, {}, NULL);", temp, f, tuple));
                self.error_if_null(&temp, pos);
                self.release(Operand::owned(tuple, Type::object()));
            }
        }
        self.release(callee);
        for o in ops {
            self.release(o);
        }
        Ok(Operand::owned(temp, Type::object()))
    }

    fn builtin_call(&mut self, func: BuiltinFn, args: &[Expr], ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let mut ops = Vec::with_capacity(args.len());
        for a in args {
            ops.push(self.expr(a)?);
        }
        let Some(arg) = ops.into_iter().next() else {
            return Err(InternalError::UnsupportedType { what: format!("{:?} without arguments", func), ty: ty.to_string() });
        };
        if arg.ty.is_error() {
            return Ok(arg);
        }
        let size = |f: BuiltinFn| match f {
            BuiltinFn::ListSize => Some("PyList_GET_SIZE"),
            BuiltinFn::TupleSize => Some("PyTuple_GET_SIZE"),
            BuiltinFn::BytesSize => Some("PyBytes_GET_SIZE"),
            BuiltinFn::UnicodeLength => Some("PyUnicode_GET_LENGTH"),
            BuiltinFn::DictSize => Some("PyDict_Size"),
            BuiltinFn::SetSize => Some("PySet_GET_SIZE"),
            _ => None,
        };
        if let Some(macro_name) = size(func) {
            let obj = self.stable(arg)?;
            let code = self.pyobj(&obj);
            self.raise_if(
                &format!("{} == Py_None", code),
                "PyExc_TypeError",
                "object of type 'NoneType' has no len()",
                pos,
            );
            let temp = self.allocate_temp(&Type::py_ssize_t())?;
            self.w.writeln(&format!("{} = {}({});", temp, macro_name, code));
            self.release(obj);
            return self.coerce_to(Operand::owned(temp, Type::py_ssize_t()), ty, pos);
        }
        match func {
            BuiltinFn::CStrLen => {
                let code = format!("((Py_ssize_t)strlen({}))", arg.code);
                let op = self.compose(code, Type::py_ssize_t(), vec![arg])?;
                self.coerce_to(op, ty, pos)
            }
            BuiltinFn::ListSort => {
                let code = self.pyobj(&arg);
                self.error_if(&format!("PyList_Sort({}) < 0", code), pos);
                self.release(arg);
                Ok(if ty.is_void() { Operand::borrowed("", Type::void()) } else { Operand::borrowed("0", ty.clone()) })
            }
            BuiltinFn::ListAsTuple => {
                let temp = self.allocate_temp(&Type::object())?;
                let code = self.pyobj(&arg);
                self.w.writeln(&format!("{} = PyList_AsTuple({});", temp, code));
                self.error_if_null(&temp, pos);
                self.release(arg);
                Ok(Operand::owned(temp, Type::builtin(Builtin::Tuple)))
            }
            BuiltinFn::CAbs => self.c_abs(arg, ty, pos),
            BuiltinFn::ObjectIsTrue => {
                let op = self.truth(arg, pos)?;
                self.coerce_to(op, ty, pos)
            }
            _ => Err(InternalError::UnsupportedType { what: format!("{:?}", func), ty: ty.to_string() }),
        }
    }

    fn c_abs(&mut self, arg: Operand, ty: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let Some(n) = arg.ty.as_numeric() else {
            return Err(InternalError::UnsupportedType { what: "abs()".into(), ty: arg.ty.to_string() });
        };
        let value = self.stable(arg)?;
        let v = value.code.clone();
        let code = if n.complex {
            let f = match n.kind {
                NumericKind::Float => "cabsf",
                NumericKind::LongDouble => "cabsl",
                _ => "cabs",
            };
            format!("{}({})", f, v)
        } else if n.is_float() {
            let f = match n.kind {
                NumericKind::Float => "fabsf",
                NumericKind::LongDouble => "fabsl",
                _ => "fabs",
            };
            format!("{}({})", f, v)
        } else if !n.is_signed() || n.is_bint() {
            v.clone()
        } else {
            if let Some(min) = catalog::int_min_macro(n) {
                self.raise_if(&format!("{} == {}", v, min), "PyExc_OverflowError", "value too large to perform abs", pos);
            }
            match n.kind {
                NumericKind::Long => format!("labs({})", v),
                NumericKind::LongLong => format!("llabs({})", v),
                NumericKind::Char | NumericKind::Short | NumericKind::Int => format!("abs({})", v),
                _ => format!("(({} < 0) ? -{} : {})", v, v, v),
            }
        };
        let result_ty = if n.complex { Type::numeric(n.real_part()) } else { value.ty.clone() };
        let op = self.compose(code, result_ty, vec![value])?;
        self.coerce_to(op, ty, pos)
    }

    // Conversions

    /// Converts `op` to `target`, inserting type checks, boxing or
    /// unboxing as needed.
    pub fn coerce_to(&mut self, op: Operand, target: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let target = self.ty(target);
        if op.ty.is_error() || target.is_error() || target.is_void() || op.ty.same_as(&target) {
            return Ok(op);
        }
        match (op.ty.is_pyobject(), target.is_pyobject()) {
            (true, true) => self.object_to_object(op, &target, pos),
            (false, true) => self.box_value(op, &target, pos),
            (true, false) => self.unbox_value(op, &target, pos),
            (false, false) => self.c_to_c(op, &target, pos),
        }
    }

    fn object_to_object(&mut self, op: Operand, target: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        if let Some(dst) = target.as_class() {
            let known = op.ty.as_class().is_some_and(|s| s.is_subclass_of(dst));
            let op = if known {
                op
            } else {
                let op = self.stable(op)?;
                self.require(catalog::EXCEPTIONS, "TypeTest")?;
                let code = self.pyobj(&op);
                self.error_if(&format!("!__cx_TypeTest({}, {})", code, dst.typeptr_cname()), pos);
                op
            };
            let code = format!("({}{})", object_cast(target), op.code);
            return Ok(Operand { code, ty: target.clone(), temp: op.temp });
        }
        let mut op = op;
        if let Some(b) = target.builtin_kind() {
            if op.ty.builtin_kind() != Some(b) {
                op = self.stable(op)?;
                let code = self.pyobj(&op);
                let goto = self.error_goto(pos);
                self.w.open_block(&format!("if (unlikely(!({}({}) || {} == Py_None)))", builtin_check(b), code, code));
                self.w.writeln(&format!(
                    "PyErr_Format(PyExc_TypeError, \"Expected %s, got %.200s\", \"{}\", Py_TYPE({})->tp_name);",
                    b.name(),
                    code
                ));
                self.w.writeln(&goto);
                self.w.close_block("");
            }
        }
        let code = self.pyobj(&op);
        Ok(Operand { code, ty: target.clone(), temp: op.temp })
    }

    fn box_value(&mut self, op: Operand, target: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let src = op.ty.clone();
        let v = &op.code;
        let call = if target.is_extension_type() {
            None
        } else if let Some(n) = src.as_numeric() {
            Some(if n.complex {
                self.require(catalog::TYPE_CONVERSION, "ComplexSupport")?;
                format!("PyComplex_FromDoubles((double)creal({}), (double)cimag({}))", v, v)
            } else if n.is_bint() {
                format!("PyBool_FromLong({})", v)
            } else if n.is_float() {
                format!("PyFloat_FromDouble({})", v)
            } else {
                format!("{}({})", int_boxer(n.kind, n.is_signed()), v)
            })
        } else if src.is_c_string() {
            Some(if target.is_builtin(Builtin::Str) {
                let snippet = catalog::c_string_conversion(&self.cx.options.default_string_encoding);
                self.cx.utility.insert(snippet)?;
                format!("__cx_PyUnicode_FromCString({})", v)
            } else {
                format!("PyBytes_FromString({})", v)
            })
        } else {
            None
        };
        let Some(call) = call else {
            self.release(op);
            let msg = format!("cannot convert '{}' to Python object '{}'", src, target);
            return Ok(self.report(Diagnostic::error(codes::INVALID_COERCION, msg), pos));
        };
        let temp = self.allocate_temp(&Type::object())?;
        self.w.writeln(&format!("{} = {};", temp, call));
        self.error_if_null(&temp, pos);
        self.release(op);
        Ok(Operand::owned(temp, target.clone()))
    }

    fn unbox_value(&mut self, op: Operand, target: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        let obj = self.pyobj(&op);
        if let Some(n) = target.as_numeric() {
            let ctype = target.empty_declaration_code();
            let temp = self.allocate_temp(target)?;
            if n.complex {
                self.cx.utility.insert(catalog::complex_from_py(n))?;
                self.w.writeln(&format!("{} = {}({});", temp, catalog::complex_from_py_name(n), obj));
                self.error_if("PyErr_Occurred()", pos);
            } else if n.is_bint() {
                self.w.writeln(&format!("{} = PyObject_IsTrue({});", temp, obj));
                self.error_if(&format!("{} < 0", temp), pos);
            } else if n.is_float() {
                self.w.writeln(&format!("{} = ({})PyFloat_AsDouble({});", temp, ctype, obj));
                self.error_if(&format!("{} == ({})-1 && PyErr_Occurred()", temp, ctype), pos);
            } else {
                self.cx.utility.insert(catalog::int_from_py(n))?;
                self.w.writeln(&format!("{} = {}({});", temp, catalog::int_from_py_name(n), obj));
                self.error_if(&format!("{} == ({})-1 && PyErr_Occurred()", temp, ctype), pos);
            }
            self.release(op);
            return Ok(Operand::owned(temp, target.clone()));
        }
        if target.is_c_string() {
            if op.temp.is_some() {
                self.release(op);
                let msg = "obtaining a 'char *' from a temporary Python value is unsafe";
                let diag = Diagnostic::error(codes::INVALID_COERCION, msg)
                    .with_help("assign the value to a variable first so it outlives the pointer");
                return Ok(self.report(diag, pos));
            }
            let snippet = catalog::c_string_conversion(&self.cx.options.default_string_encoding);
            self.cx.utility.insert(snippet)?;
            let temp = self.allocate_temp(target)?;
            let ctype = target.empty_declaration_code();
            self.w.writeln(&format!("{} = ({})__cx_PyObject_AsCString({});", temp, ctype, obj));
            self.error_if_null(&temp, pos);
            return Ok(Operand::owned(temp, target.clone()));
        }
        self.release(op.clone());
        let msg = format!("cannot convert Python object '{}' to '{}'", op.ty, target);
        Ok(self.report(Diagnostic::error(codes::INVALID_COERCION, msg), pos))
    }

    fn c_to_c(&mut self, op: Operand, target: &TypeRef, pos: Pos) -> InternalResult<Operand> {
        if op.ty.is_array() && target.is_ptr() {
            return Ok(Operand { ty: target.clone(), ..op });
        }
        let convertible = target.assignable_from(&op.ty)
            || (op.ty.is_numeric() && target.is_numeric())
            || (op.ty.is_ptr() && target.is_ptr());
        if !convertible {
            self.release(op.clone());
            let msg = format!("cannot convert '{}' to '{}'", op.ty, target);
            return Ok(self.report(Diagnostic::error(codes::INVALID_COERCION, msg), pos));
        }
        if op.ty.as_struct().is_some() {
            return Ok(Operand { ty: target.clone(), ..op });
        }
        let code = format!("(({}){})", target.empty_declaration_code(), op.code);
        Ok(Operand { code, ty: target.clone(), temp: op.temp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_text_keeps_width() {
        assert_eq!(int_text(5), "5");
        assert_eq!(int_text(-5), "(-5)");
        assert_eq!(int_text(1 << 40), "1099511627776LL");
        assert_eq!(int_text(i64::MIN), "(-9223372036854775807LL - 1)");
    }

    #[test]
    fn base_path_repeats_per_level() {
        assert_eq!(base_path(0), "");
        assert_eq!(base_path(2), "__cx_base.__cx_base.");
    }
}

//! Lowers `for ... in` loops over statically known iterables.
//!
//! The lowered forms keep the `else` clause attached to the loop that
//! replaces the original, so it still runs only when no `break` happened.

use super::{retype, Pass, TempAllocator};
use crate::ast::visit::{self, Transform};
use crate::ast::{build, BinOp, DictIterKind, Expr, ExprKind, Module, Pos, SeqKind, Stmt, StmtKind};
use crate::semantic::SymbolTable;
use crate::types::{Builtin, Type};
use tracing::debug;

pub struct LoopLowering;

impl Pass for LoopLowering {
    fn name(&self) -> &'static str {
        "loop-lowering"
    }

    fn run(&self, module: Module, symbols: &SymbolTable) -> Module {
        let mut lowering = Lowering {
            symbols,
            temps: TempAllocator::new(&module),
            lowered: 0,
        };
        let mut module = visit::transform_module(&mut lowering, module);
        debug!(lowered = lowering.lowered, "loop lowering finished");
        lowering.temps.finish(&mut module);
        module
    }
}

struct Lowering<'a> {
    symbols: &'a SymbolTable,
    temps: TempAllocator,
    lowered: usize,
}

impl Transform for Lowering<'_> {
    fn transform_stmt(&mut self, stmt: Stmt) -> Stmt {
        let stmt = visit::walk_stmt(self, stmt);
        let pos = stmt.pos;
        match stmt.kind {
            StmtKind::ForIn { target, iter, body, orelse } => {
                self.lower_for(Loop { target, iter, body, orelse, pos })
            }
            kind => Stmt::new(kind, pos),
        }
    }
}

/// A `for` loop taken apart.
struct Loop {
    target: Expr,
    iter: Expr,
    body: Vec<Stmt>,
    orelse: Option<Vec<Stmt>>,
    pos: Pos,
}

impl Loop {
    fn unchanged(self) -> Stmt {
        Stmt::new(
            StmtKind::ForIn { target: self.target, iter: self.iter, body: self.body, orelse: self.orelse },
            self.pos,
        )
    }
}

/// Takes the arguments out of a call expression.
fn into_args(expr: Expr) -> Vec<Expr> {
    match expr.kind {
        ExprKind::Call { args, .. } => args,
        _ => Vec::new(),
    }
}

fn const_int(expr: &Expr) -> Option<i64> {
    expr.const_value().and_then(|v| v.as_int())
}

/// C integer lvalue or value.
fn is_c_int(expr: &Expr) -> bool {
    expr.ty.is_int()
}

impl Lowering<'_> {
    fn builtin_args<'e>(&self, expr: &'e Expr, name: &str) -> Option<&'e [Expr]> {
        match &expr.kind {
            ExprKind::Call { func, args } => match &func.kind {
                ExprKind::Name { name: n, entry } if n == name && self.symbols.is_builtin_named(*entry, name) => {
                    Some(args.as_slice())
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn lower_for(&mut self, lp: Loop) -> Stmt {
        if self.is_enumerate(&lp) {
            return self.lower_enumerate(lp);
        }
        let reversed = self
            .builtin_args(&lp.iter, "reversed")
            .is_some_and(|args| args.len() == 1);
        let subject = if reversed {
            match &lp.iter.kind {
                ExprKind::Call { args, .. } => &args[0],
                _ => return lp.unchanged(),
            }
        } else {
            &lp.iter
        };
        let shape = self.classify(&lp.target, subject, reversed);
        let Some(shape) = shape else {
            return lp.unchanged();
        };
        self.lowered += 1;
        debug!(line = lp.pos.line, ?shape, reversed, "lowered for loop");
        let Loop { target, iter, body, orelse, pos } = lp;
        let subject = if reversed {
            into_args(iter).pop().unwrap_or_else(build::none)
        } else {
            iter
        };
        let kind = match shape {
            Shape::Range => Self::counted(target, subject, reversed, body, orelse),
            Shape::Array(length) => {
                let length = build::int_typed(length as i64, Type::py_ssize_t());
                StmtKind::PointerLoop { target, base: subject, length, reversed, body, orelse }
            }
            Shape::Slice => {
                let ExprKind::Slice { obj, start, stop } = subject.kind else {
                    return Stmt::new(StmtKind::Pass, pos);
                };
                let obj = *obj;
                let stop = stop.map(|s| *s).unwrap_or_else(|| build::int(0));
                let (base, length) = match start {
                    Some(start) => {
                        let start = *start;
                        let elem_ptr = Type::pointer(obj.ty.element_type().cloned().unwrap_or_else(Type::void));
                        let base = build::binary(BinOp::Add, obj, start.clone(), elem_ptr);
                        let length = build::binary(BinOp::Sub, stop, start, Type::py_ssize_t());
                        (base, length)
                    }
                    None => (obj, stop),
                };
                StmtKind::PointerLoop { target, base, length, reversed, body, orelse }
            }
            Shape::Literal => {
                let items = match subject.kind {
                    ExprKind::Tuple(items) | ExprKind::List(items) => items,
                    _ => Vec::new(),
                };
                let n = items.len();
                let item_ty = target.ty.clone();
                let items: Vec<Expr> = items.into_iter().map(|e| retype(e, &item_ty)).collect();
                let base = Expr::new(ExprKind::CArray(items), Type::array(item_ty, Some(n)), subject.pos);
                let length = build::int_typed(n as i64, Type::py_ssize_t());
                StmtKind::PointerLoop { target, base, length, reversed, body, orelse }
            }
            Shape::Sequence(kind) => StmtKind::SequenceLoop { target, seq: subject, kind, reversed, body, orelse },
            Shape::Dict(method) => Self::dict_loop(target, subject, method, body, orelse),
        };
        Stmt::new(kind, pos)
    }

    /// Decides how `subject` can be iterated, without consuming anything.
    fn classify(&self, target: &Expr, subject: &Expr, reversed: bool) -> Option<Shape> {
        if let Some(args) = self.builtin_args(subject, "range") {
            return self.range_applies(target, args, reversed).then_some(Shape::Range);
        }
        if !reversed {
            if let Some(method) = dict_method(subject) {
                let fits = method != DictIterKind::Items || matches!(&target.kind, ExprKind::Tuple(t) if t.len() == 2);
                return fits.then_some(Shape::Dict(method));
            }
        }
        match subject.ty.strip() {
            Type::Array { base, size: Some(n) } if target.ty.assignable_from(base) => {
                return Some(Shape::Array(*n));
            }
            _ => {}
        }
        if let ExprKind::Slice { obj, start, stop: Some(stop) } = &subject.kind {
            let elem_ok = obj.ty.element_type().is_some_and(|e| target.ty.assignable_from(e));
            let start_ok = start.as_ref().map_or(true, |s| is_c_int(s) && s.is_simple());
            if elem_ok && start_ok && is_c_int(stop) && (obj.ty.is_ptr() || obj.ty.is_array()) {
                return Some(Shape::Slice);
            }
            return None;
        }
        if let ExprKind::Tuple(items) | ExprKind::List(items) = &subject.kind {
            let all_c = !items.is_empty()
                && target.ty.is_numeric()
                && items.iter().all(|i| i.ty.is_numeric() && target.ty.assignable_from(&i.ty));
            if all_c {
                return Some(Shape::Literal);
            }
        }
        match subject.ty.builtin_kind() {
            Some(Builtin::List) => Some(Shape::Sequence(SeqKind::List)),
            Some(Builtin::Tuple) => Some(Shape::Sequence(SeqKind::Tuple)),
            Some(Builtin::Dict) if !reversed => Some(Shape::Dict(DictIterKind::Keys)),
            _ => None,
        }
    }

    fn range_applies(&self, target: &Expr, args: &[Expr], reversed: bool) -> bool {
        if !is_c_int(target) || args.is_empty() || args.len() > 3 || !args.iter().all(is_c_int) {
            return false;
        }
        let step = match args.get(2) {
            Some(s) => match const_int(s) {
                Some(v) if v != 0 => v,
                _ => return false,
            },
            None => 1,
        };
        !reversed || step.abs() == 1
    }

    fn counted(target: Expr, range: Expr, reversed: bool, body: Vec<Stmt>, orelse: Option<Vec<Stmt>>) -> StmtKind {
        let mut args = into_args(range).into_iter();
        let (start, stop, step) = match (args.next(), args.next(), args.next()) {
            (Some(stop), None, _) => (build::int_typed(0, stop.ty.clone()), stop, 1),
            (Some(start), Some(stop), step) => {
                let step = step.as_ref().and_then(const_int).unwrap_or(1);
                (start, stop, step)
            }
            (None, _, _) => (build::int(0), build::int(0), 1),
        };
        if !reversed {
            return StmtKind::CountedLoop { target, start, stop, step, body, orelse };
        }
        // reversed(range(a, b, 1)) is range(b - 1, a - 1, -1) and
        // reversed(range(a, b, -1)) is range(b + 1, a + 1, 1).
        let op = if step > 0 { BinOp::Sub } else { BinOp::Add };
        let shift = |e: Expr| {
            let ty = e.ty.clone();
            build::binary(op, e, build::int_typed(1, ty.clone()), ty)
        };
        StmtKind::CountedLoop {
            target,
            start: shift(stop),
            stop: shift(start),
            step: -step,
            body,
            orelse,
        }
    }

    fn dict_loop(target: Expr, subject: Expr, method: DictIterKind, body: Vec<Stmt>, orelse: Option<Vec<Stmt>>) -> StmtKind {
        let view_call = dict_method(&subject).is_some();
        let dict = match subject.kind {
            ExprKind::Call { func, .. } if view_call => match func.kind {
                ExprKind::Attribute { obj, .. } => *obj,
                kind => Expr::new(kind, func.ty, func.pos),
            },
            kind => Expr::new(kind, subject.ty, subject.pos),
        };
        let (key, value) = match method {
            DictIterKind::Keys => (Some(target), None),
            DictIterKind::Values => (None, Some(target)),
            DictIterKind::Items => match target.kind {
                ExprKind::Tuple(mut pair) if pair.len() == 2 => {
                    let v = pair.pop();
                    let k = pair.pop();
                    (k, v)
                }
                kind => (Some(Expr::new(kind, target.ty, target.pos)), None),
            },
        };
        StmtKind::DictLoop { dict, method, view_call, key, value, body, orelse }
    }

    fn is_enumerate(&self, lp: &Loop) -> bool {
        let Some(args) = self.builtin_args(&lp.iter, "enumerate") else {
            return false;
        };
        let index_ok = matches!(&lp.target.kind, ExprKind::Tuple(t) if t.len() == 2 && is_c_int(&t[0]));
        index_ok && (args.len() == 1 || (args.len() == 2 && is_c_int(&args[1])))
    }

    /// `for i, x in enumerate(seq, start)` becomes a counter temporary and a
    /// loop over `seq` into a slot temporary. The body assigns `i` before `x`,
    /// as unpacking the `(i, x)` pair would.
    fn lower_enumerate(&mut self, lp: Loop) -> Stmt {
        let Loop { target, iter, body, orelse, pos } = lp;
        let mut pair = match target.kind {
            ExprKind::Tuple(pair) => pair,
            _ => Vec::new(),
        };
        let mut args = into_args(iter);
        let (Some(item), Some(index)) = (pair.pop(), pair.pop()) else {
            return Stmt::new(StmtKind::Pass, pos);
        };
        let start = if args.len() == 2 { args.pop() } else { None };
        let Some(seq) = args.pop() else {
            return Stmt::new(StmtKind::Pass, pos);
        };
        let counter_ty = index.ty.clone();
        let counter = self.temps.fresh();
        let init = start.map_or_else(|| build::int_typed(0, counter_ty.clone()), |s| retype(s, &counter_ty));
        let slot_ty = match item.kind {
            ExprKind::Tuple(_) | ExprKind::List(_) => Type::object(),
            _ => item.ty.clone(),
        };
        let slot = self.temps.fresh();

        let mut new_body = vec![
            build::assign(index, build::temp(counter, counter_ty.clone())).at(pos),
            build::aug_assign(
                build::temp(counter, counter_ty.clone()),
                BinOp::Add,
                build::int_typed(1, counter_ty.clone()),
            )
            .at(pos),
            build::assign(item, build::temp(slot, slot_ty.clone())).at(pos),
        ];
        new_body.extend(body);
        self.lowered += 1;
        debug!(line = pos.line, "lowered enumerate loop");
        let target = build::temp(slot, slot_ty.clone());
        let inner = self.lower_for(Loop { target, iter: seq, body: new_body, orelse, pos });
        build::block(vec![
            build::let_temp(counter, counter_ty, Some(init)).at(pos),
            build::let_temp(slot, slot_ty, None).at(pos),
            inner,
        ])
        .at(pos)
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Range,
    /// C array of known length.
    Array(usize),
    Slice,
    /// Tuple or list display of C values.
    Literal,
    Sequence(SeqKind),
    Dict(DictIterKind),
}

/// `d.keys()`, `d.values()` or `d.items()` on a dict-typed `d`.
fn dict_method(expr: &Expr) -> Option<DictIterKind> {
    let ExprKind::Call { func, args } = &expr.kind else {
        return None;
    };
    let ExprKind::Attribute { obj, attr } = &func.kind else {
        return None;
    };
    if !args.is_empty() || !obj.ty.is_builtin(Builtin::Dict) {
        return None;
    }
    match attr.as_str() {
        "keys" => Some(DictIterKind::Keys),
        "values" => Some(DictIterKind::Values),
        "items" => Some(DictIterKind::Items),
        _ => None,
    }
}

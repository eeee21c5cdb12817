//! Compile-time evaluation with Python semantics.
//!
//! Integer, boolean and string results replace the node with a literal.
//! Floating point results are only recorded in [`Expr::constant`]: the
//! node keeps its source form so that rounding happens where it would at
//! run time. Anything that would raise (overflow of a 64-bit value,
//! division by zero, mixed-type ordering) is left for run time.

use super::{retype, Pass};
use crate::ast::visit::{self, Transform};
use crate::ast::{BinOp, BoolOpKind, CmpOp, ConstValue, Expr, ExprKind, IfClause, Module, Pos, Stmt, StmtKind, StrKind, UnaryOp};
use crate::semantic::{EntryKind, SymbolTable};
use crate::types::TypeRef;
use tracing::debug;

/// Longest string a constant `*` may produce.
const MAX_REPEATED_STR: usize = 256;

pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&self, module: Module, symbols: &SymbolTable) -> Module {
        let mut folder = Folder { symbols, folded: 0 };
        let module = visit::transform_module(&mut folder, module);
        debug!(folded = folder.folded, "constant folding finished");
        module
    }
}

struct Folder<'a> {
    symbols: &'a SymbolTable,
    folded: usize,
}

impl Transform for Folder<'_> {
    fn transform_expr(&mut self, expr: Expr) -> Expr {
        let expr = visit::walk_expr(self, expr);
        self.fold_expr(expr)
    }

    fn transform_stmt(&mut self, stmt: Stmt) -> Stmt {
        let stmt = visit::walk_stmt(self, stmt);
        self.fold_stmt(stmt)
    }
}

/// Compile-time value of `expr`, parsing float literals on the fly.
fn value_of(expr: &Expr) -> Option<ConstValue> {
    match &expr.kind {
        ExprKind::Float { text } => parse_float(text).map(ConstValue::Float),
        _ => expr.const_value(),
    }
}

fn parse_float(text: &str) -> Option<f64> {
    text.replace('_', "").parse::<f64>().ok()
}

fn as_float(value: &ConstValue) -> Option<f64> {
    match value {
        ConstValue::Float(f) => Some(*f),
        ConstValue::Int(v) => Some(*v as f64),
        ConstValue::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

fn str_kind(expr: &Expr) -> Option<StrKind> {
    match &expr.kind {
        ExprKind::Str { kind, .. } => Some(*kind),
        _ => None,
    }
}

impl Folder<'_> {
    fn fold_expr(&mut self, expr: Expr) -> Expr {
        let Expr { kind, ty, pos, constant } = expr;
        match kind {
            ExprKind::Float { text } => {
                let constant = constant.or_else(|| parse_float(&text).map(ConstValue::Float));
                Expr { kind: ExprKind::Float { text }, ty, pos, constant }
            }
            ExprKind::Name { name, entry } => {
                let constant = match self.symbols.get(entry) {
                    Some(e) => match &e.kind {
                        EntryKind::Constant(v) => Some(v.clone()),
                        _ => constant,
                    },
                    None => constant,
                };
                Expr { kind: ExprKind::Name { name, entry }, ty, pos, constant }
            }
            ExprKind::Unary { op, operand } => self.fold_unary(op, *operand, ty, pos),
            ExprKind::Binary { op, left, right } => self.fold_binary(op, *left, *right, ty, pos),
            ExprKind::Compare { first, rest } => self.fold_compare(*first, rest, ty, pos),
            ExprKind::BoolOp { op, left, right } => {
                let Some(known) = value_of(&left) else {
                    return Expr { kind: ExprKind::BoolOp { op, left, right }, ty, pos, constant };
                };
                let keep_left = match op {
                    BoolOpKind::And => !known.truthy(),
                    BoolOpKind::Or => known.truthy(),
                };
                self.folded += 1;
                debug!(line = pos.line, ?op, "short-circuited boolean operator");
                retype(if keep_left { *left } else { *right }, &ty)
            }
            ExprKind::Cond { test, then, orelse } => match value_of(&test) {
                Some(v) => {
                    self.folded += 1;
                    debug!(line = pos.line, "folded conditional expression");
                    retype(if v.truthy() { *then } else { *orelse }, &ty)
                }
                None => Expr { kind: ExprKind::Cond { test, then, orelse }, ty, pos, constant },
            },
            kind => Expr { kind, ty, pos, constant },
        }
    }

    fn literal(&mut self, value: ConstValue, str_kind: StrKind, ty: TypeRef, pos: Pos) -> Option<Expr> {
        let kind = match value {
            ConstValue::Int(v) => ExprKind::Int { value: v, text: v.to_string() },
            ConstValue::Bool(b) => ExprKind::Bool(b),
            ConstValue::Str(s) => ExprKind::Str { value: s, kind: str_kind },
            ConstValue::None => ExprKind::None,
            ConstValue::Float(_) => return None,
        };
        self.folded += 1;
        debug!(line = pos.line, col = pos.col, "folded to literal");
        Some(Expr::new(kind, ty, pos))
    }

    fn fold_unary(&mut self, op: UnaryOp, operand: Expr, ty: TypeRef, pos: Pos) -> Expr {
        let result = value_of(&operand).and_then(|v| match (op, v) {
            (UnaryOp::Not, v) => Some(ConstValue::Bool(!v.truthy())),
            (UnaryOp::Neg, ConstValue::Float(f)) => Some(ConstValue::Float(-f)),
            (UnaryOp::Pos, ConstValue::Float(f)) => Some(ConstValue::Float(f)),
            (UnaryOp::Neg, v) => v.as_int().and_then(i64::checked_neg).map(ConstValue::Int),
            (UnaryOp::Pos, v) => v.as_int().map(ConstValue::Int),
            (UnaryOp::Invert, v) => v.as_int().map(|i| ConstValue::Int(!i)),
            _ => None,
        });
        let kind = ExprKind::Unary { op, operand: Box::new(operand) };
        self.finish(kind, result, StrKind::Unicode, ty, pos)
    }

    fn fold_binary(&mut self, op: BinOp, left: Expr, right: Expr, ty: TypeRef, pos: Pos) -> Expr {
        let kinds = (str_kind(&left), str_kind(&right));
        let result = match (value_of(&left), value_of(&right)) {
            (Some(l), Some(r)) => match kinds {
                (Some(a), Some(b)) if a != b => None,
                _ => eval_binary(op, &l, &r),
            },
            _ => None,
        };
        let str_kind = kinds.0.or(kinds.1).unwrap_or(StrKind::Unicode);
        let kind = ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) };
        self.finish(kind, result, str_kind, ty, pos)
    }

    /// Replaces the node by a literal when possible, otherwise records a
    /// float result on it.
    fn finish(&mut self, kind: ExprKind, result: Option<ConstValue>, str_kind: StrKind, ty: TypeRef, pos: Pos) -> Expr {
        match result {
            Some(ConstValue::Float(f)) => {
                debug!(line = pos.line, value = f, "recorded float constant");
                Expr { kind, ty, pos, constant: Some(ConstValue::Float(f)) }
            }
            Some(value) => match self.literal(value, str_kind, ty.clone(), pos) {
                Some(lit) => lit,
                None => Expr::new(kind, ty, pos),
            },
            None => Expr::new(kind, ty, pos),
        }
    }

    fn fold_compare(&mut self, first: Expr, mut rest: Vec<(CmpOp, Expr)>, ty: TypeRef, pos: Pos) -> Expr {
        let mut first = first;
        while let Some((op, next)) = rest.first() {
            let outcome = match (value_of(&first), value_of(next)) {
                (Some(l), Some(r)) => eval_compare(*op, &l, &r),
                _ => None,
            };
            match outcome {
                Some(false) => {
                    // The links after a false one are never evaluated.
                    return self
                        .literal(ConstValue::Bool(false), StrKind::Unicode, ty.clone(), pos)
                        .unwrap_or_else(|| Expr::new(ExprKind::Bool(false), ty, pos));
                }
                Some(true) => {
                    let (_, next) = rest.remove(0);
                    first = next;
                }
                None => break,
            }
        }
        if rest.is_empty() {
            return self
                .literal(ConstValue::Bool(true), StrKind::Unicode, ty.clone(), pos)
                .unwrap_or_else(|| Expr::new(ExprKind::Bool(true), ty, pos));
        }
        Expr::new(ExprKind::Compare { first: Box::new(first), rest }, ty, pos)
    }

    fn fold_stmt(&mut self, stmt: Stmt) -> Stmt {
        let pos = stmt.pos;
        match stmt.kind {
            StmtKind::If { clauses, orelse } => self.prune_if(clauses, orelse, pos),
            StmtKind::While { condition, body, orelse } => match value_of(&condition) {
                Some(v) if !v.truthy() => {
                    self.folded += 1;
                    debug!(line = pos.line, "removed loop with false condition");
                    Stmt::new(orelse.map_or(StmtKind::Pass, StmtKind::Block), pos)
                }
                _ => Stmt::new(StmtKind::While { condition, body, orelse }, pos),
            },
            kind => Stmt::new(kind, pos),
        }
    }

    fn prune_if(&mut self, clauses: Vec<IfClause>, mut orelse: Option<Vec<Stmt>>, pos: Pos) -> Stmt {
        let before = clauses.len();
        let mut kept: Vec<IfClause> = Vec::with_capacity(clauses.len());
        for clause in clauses {
            match value_of(&clause.condition) {
                Some(v) if !v.truthy() => continue,
                Some(_) => {
                    if kept.is_empty() {
                        self.folded += 1;
                        debug!(line = pos.line, "if condition is always true");
                        return Stmt::new(StmtKind::Block(clause.body), pos);
                    }
                    orelse = Some(clause.body);
                    break;
                }
                None => kept.push(clause),
            }
        }
        if kept.is_empty() {
            self.folded += 1;
            debug!(line = pos.line, "if conditions are always false");
            return Stmt::new(orelse.map_or(StmtKind::Pass, StmtKind::Block), pos);
        }
        if kept.len() != before {
            self.folded += 1;
            debug!(line = pos.line, removed = before - kept.len(), "pruned if clauses");
        }
        Stmt::new(StmtKind::If { clauses: kept, orelse }, pos)
    }
}

fn eval_binary(op: BinOp, l: &ConstValue, r: &ConstValue) -> Option<ConstValue> {
    match (l, r) {
        (ConstValue::Str(a), ConstValue::Str(b)) => {
            return (op == BinOp::Add).then(|| ConstValue::Str(format!("{}{}", a, b)));
        }
        (ConstValue::Str(s), n) | (n, ConstValue::Str(s)) => {
            if op != BinOp::Mul {
                return None;
            }
            let count = usize::try_from(n.as_int()?).unwrap_or(0);
            if s.len().checked_mul(count)? > MAX_REPEATED_STR {
                return None;
            }
            return Some(ConstValue::Str(s.repeat(count)));
        }
        (ConstValue::None, _) | (_, ConstValue::None) => return None,
        (ConstValue::Bool(a), ConstValue::Bool(b)) => match op {
            BinOp::BitAnd => return Some(ConstValue::Bool(*a & *b)),
            BinOp::BitOr => return Some(ConstValue::Bool(*a | *b)),
            BinOp::BitXor => return Some(ConstValue::Bool(*a ^ *b)),
            _ => {}
        },
        _ => {}
    }
    if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
        return eval_int(op, a, b);
    }
    eval_float(op, as_float(l)?, as_float(r)?).map(ConstValue::Float)
}

fn eval_int(op: BinOp, a: i64, b: i64) -> Option<ConstValue> {
    let value = match op {
        BinOp::Add => a.checked_add(b)?,
        BinOp::Sub => a.checked_sub(b)?,
        BinOp::Mul => a.checked_mul(b)?,
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            return Some(ConstValue::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            let q = a.checked_div(b)?;
            let r = a.checked_rem(b)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            let r = a.checked_rem(b)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return None;
                }
                return Some(ConstValue::Float((a as f64).powf(b as f64)));
            }
            a.checked_pow(u32::try_from(b).ok()?)?
        }
        BinOp::LShift => {
            if !(0..64).contains(&b) {
                return (b >= 64 && a == 0).then_some(ConstValue::Int(0));
            }
            let shifted = a << b;
            if shifted >> b != a {
                return None;
            }
            shifted
        }
        BinOp::RShift => {
            if b < 0 {
                return None;
            }
            if b >= 64 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            }
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
    };
    Some(ConstValue::Int(value))
}

fn eval_float(op: BinOp, a: f64, b: f64) -> Option<f64> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b != 0.0 => a / b,
        BinOp::FloorDiv if b != 0.0 => (a / b).floor(),
        BinOp::Mod if b != 0.0 => {
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a < 0.0 && b.fract() != 0.0 {
                return None;
            }
            a.powf(b)
        }
        _ => return None,
    };
    (value.is_finite() || !(a.is_finite() && b.is_finite())).then_some(value)
}

fn eval_compare(op: CmpOp, l: &ConstValue, r: &ConstValue) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (l, r) {
        (ConstValue::Str(a), ConstValue::Str(b)) => Some(a.cmp(b)),
        (ConstValue::None, ConstValue::None) => {
            // Only equality is defined for None.
            return match op {
                CmpOp::Eq => Some(true),
                CmpOp::Ne => Some(false),
                _ => None,
            };
        }
        (ConstValue::Str(_) | ConstValue::None, _) | (_, ConstValue::Str(_) | ConstValue::None) => {
            return match op {
                CmpOp::Eq => Some(false),
                CmpOp::Ne => Some(true),
                _ => None,
            };
        }
        _ => match (l.as_int(), r.as_int()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => as_float(l)?.partial_cmp(&as_float(r)?),
        },
    };
    let Some(ordering) = ordering else {
        // NaN compares unequal to everything.
        return match op {
            CmpOp::Ne => Some(true),
            CmpOp::Eq | CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => Some(false),
            _ => None,
        };
    };
    match op {
        CmpOp::Eq => Some(ordering == Ordering::Equal),
        CmpOp::Ne => Some(ordering != Ordering::Equal),
        CmpOp::Lt => Some(ordering == Ordering::Less),
        CmpOp::Le => Some(ordering != Ordering::Greater),
        CmpOp::Gt => Some(ordering == Ordering::Greater),
        CmpOp::Ge => Some(ordering != Ordering::Less),
        CmpOp::In | CmpOp::NotIn | CmpOp::Is | CmpOp::IsNot => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_floor_division_and_modulo() {
        assert_eq!(eval_int(BinOp::FloorDiv, -7, 2), Some(ConstValue::Int(-4)));
        assert_eq!(eval_int(BinOp::Mod, -7, 2), Some(ConstValue::Int(1)));
        assert_eq!(eval_int(BinOp::Mod, 7, -2), Some(ConstValue::Int(-1)));
        assert_eq!(eval_int(BinOp::FloorDiv, 1, 0), None);
    }

    #[test]
    fn overflow_is_left_unfolded() {
        assert_eq!(eval_int(BinOp::Mul, i64::MAX, 2), None);
        assert_eq!(eval_int(BinOp::Pow, 2, 64), None);
        assert_eq!(eval_int(BinOp::LShift, 1, 63), None);
        assert_eq!(eval_int(BinOp::Pow, 2, 10), Some(ConstValue::Int(1024)));
    }

    #[test]
    fn mixed_comparisons() {
        assert_eq!(eval_compare(CmpOp::Lt, &ConstValue::Int(1), &ConstValue::Float(1.5)), Some(true));
        assert_eq!(eval_compare(CmpOp::Eq, &ConstValue::Str("a".into()), &ConstValue::Int(1)), Some(false));
        assert_eq!(eval_compare(CmpOp::Lt, &ConstValue::Str("a".into()), &ConstValue::Int(1)), None);
        assert_eq!(eval_compare(CmpOp::Eq, &ConstValue::Float(f64::NAN), &ConstValue::Float(f64::NAN)), Some(false));
    }
}

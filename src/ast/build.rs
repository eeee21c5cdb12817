//! Shorthand constructors for building trees in code.
//!
//! Rewrites and tests use these; nodes get a default position unless
//! [`Expr::at`] or [`Stmt::at`] moves them.

use super::{
    BinOp, BoolOpKind, CmpOp, Expr, ExprKind, IfClause, Pos, Stmt, StmtKind, StrKind, TempId, UnaryOp,
};
use crate::semantic::EntryId;
use crate::types::{Builtin, Type, TypeRef};

impl Expr {
    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }

    /// Same node with a different static type.
    pub fn with_type(mut self, ty: TypeRef) -> Self {
        self.ty = ty;
        self
    }
}

impl Stmt {
    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }
}

fn expr(kind: ExprKind, ty: TypeRef) -> Expr {
    Expr::new(kind, ty, Pos::default())
}

fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Pos::default())
}

/// Integer literal typed as a C `long`.
pub fn int(value: i64) -> Expr {
    int_typed(value, Type::c_long())
}

pub fn int_typed(value: i64, ty: TypeRef) -> Expr {
    expr(ExprKind::Int { value, text: value.to_string() }, ty)
}

pub fn float(text: &str) -> Expr {
    expr(ExprKind::Float { text: text.to_string() }, Type::c_double())
}

pub fn boolean(value: bool) -> Expr {
    expr(ExprKind::Bool(value), Type::bint())
}

pub fn none() -> Expr {
    expr(ExprKind::None, Type::object())
}

pub fn string(value: &str) -> Expr {
    expr(
        ExprKind::Str { value: value.to_string(), kind: StrKind::Unicode },
        Type::builtin(Builtin::Str),
    )
}

pub fn bytes(value: &str) -> Expr {
    expr(
        ExprKind::Str { value: value.to_string(), kind: StrKind::Bytes },
        Type::builtin(Builtin::Bytes),
    )
}

pub fn char(value: u8) -> Expr {
    expr(ExprKind::Char(value), Type::c_char())
}

pub fn name(name: &str, entry: EntryId, ty: TypeRef) -> Expr {
    expr(ExprKind::Name { name: name.to_string(), entry }, ty)
}

pub fn attr(obj: Expr, attr: &str, ty: TypeRef) -> Expr {
    expr(ExprKind::Attribute { obj: Box::new(obj), attr: attr.to_string() }, ty)
}

pub fn index(obj: Expr, idx: Expr, ty: TypeRef) -> Expr {
    expr(ExprKind::Index { obj: Box::new(obj), index: Box::new(idx) }, ty)
}

pub fn slice(obj: Expr, start: Option<Expr>, stop: Option<Expr>, ty: TypeRef) -> Expr {
    expr(
        ExprKind::Slice { obj: Box::new(obj), start: start.map(Box::new), stop: stop.map(Box::new) },
        ty,
    )
}

pub fn call(func: Expr, args: Vec<Expr>, ty: TypeRef) -> Expr {
    expr(ExprKind::Call { func: Box::new(func), args }, ty)
}

pub fn binary(op: BinOp, left: Expr, right: Expr, ty: TypeRef) -> Expr {
    expr(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, ty)
}

pub fn unary(op: UnaryOp, operand: Expr, ty: TypeRef) -> Expr {
    expr(ExprKind::Unary { op, operand: Box::new(operand) }, ty)
}

/// Single comparison typed as `bint`.
pub fn compare(left: Expr, op: CmpOp, right: Expr) -> Expr {
    chain(left, vec![(op, right)], Type::bint())
}

pub fn chain(first: Expr, rest: Vec<(CmpOp, Expr)>, ty: TypeRef) -> Expr {
    expr(ExprKind::Compare { first: Box::new(first), rest }, ty)
}

pub fn bool_op(op: BoolOpKind, left: Expr, right: Expr, ty: TypeRef) -> Expr {
    expr(ExprKind::BoolOp { op, left: Box::new(left), right: Box::new(right) }, ty)
}

pub fn cond(test: Expr, then: Expr, orelse: Expr, ty: TypeRef) -> Expr {
    expr(
        ExprKind::Cond { test: Box::new(test), then: Box::new(then), orelse: Box::new(orelse) },
        ty,
    )
}

pub fn tuple(items: Vec<Expr>) -> Expr {
    expr(ExprKind::Tuple(items), Type::builtin(Builtin::Tuple))
}

pub fn list(items: Vec<Expr>) -> Expr {
    expr(ExprKind::List(items), Type::builtin(Builtin::List))
}

pub fn coerce(operand: Expr, ty: TypeRef) -> Expr {
    expr(ExprKind::Coerce(Box::new(operand)), ty)
}

pub fn temp(id: TempId, ty: TypeRef) -> Expr {
    expr(ExprKind::TempRef(id), ty)
}

pub fn generator(target: Expr, iter: Expr, condition: Option<Expr>, element: Expr) -> Expr {
    expr(
        ExprKind::Generator {
            target: Box::new(target),
            iter: Box::new(iter),
            condition: condition.map(Box::new),
            element: Box::new(element),
        },
        Type::object(),
    )
}

pub fn expr_stmt(e: Expr) -> Stmt {
    let pos = e.pos;
    stmt(StmtKind::Expr(e)).at(pos)
}

pub fn assign(target: Expr, value: Expr) -> Stmt {
    let pos = target.pos;
    stmt(StmtKind::Assign { target, value }).at(pos)
}

pub fn aug_assign(target: Expr, op: BinOp, value: Expr) -> Stmt {
    let pos = target.pos;
    stmt(StmtKind::AugAssign { target, op, value }).at(pos)
}

pub fn if_else(condition: Expr, body: Vec<Stmt>, orelse: Option<Vec<Stmt>>) -> Stmt {
    let pos = condition.pos;
    stmt(StmtKind::If { clauses: vec![IfClause { condition, body }], orelse }).at(pos)
}

pub fn if_chain(clauses: Vec<(Expr, Vec<Stmt>)>, orelse: Option<Vec<Stmt>>) -> Stmt {
    let clauses = clauses
        .into_iter()
        .map(|(condition, body)| IfClause { condition, body })
        .collect();
    stmt(StmtKind::If { clauses, orelse })
}

pub fn while_loop(condition: Expr, body: Vec<Stmt>, orelse: Option<Vec<Stmt>>) -> Stmt {
    let pos = condition.pos;
    stmt(StmtKind::While { condition, body, orelse }).at(pos)
}

pub fn for_in(target: Expr, iter: Expr, body: Vec<Stmt>, orelse: Option<Vec<Stmt>>) -> Stmt {
    let pos = target.pos;
    stmt(StmtKind::ForIn { target, iter, body, orelse }).at(pos)
}

pub fn break_stmt() -> Stmt {
    stmt(StmtKind::Break)
}

pub fn continue_stmt() -> Stmt {
    stmt(StmtKind::Continue)
}

pub fn return_stmt(value: Option<Expr>) -> Stmt {
    stmt(StmtKind::Return(value))
}

pub fn raise_stmt(value: Option<Expr>) -> Stmt {
    stmt(StmtKind::Raise(value))
}

pub fn pass() -> Stmt {
    stmt(StmtKind::Pass)
}

pub fn block(body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Block(body))
}

pub fn let_temp(id: TempId, ty: TypeRef, value: Option<Expr>) -> Stmt {
    stmt(StmtKind::LetTemp { id, ty, value })
}

//! Tree traversal.
//!
//! [`Transform`] rebuilds the tree by value: an override returns the node
//! that replaces the one it was given. [`Visitor`] only reads. Both default
//! to visiting children; overrides call `walk_*`/`super_*` to keep going.

use super::{ClassDef, Expr, ExprKind, FuncDef, IfClause, Module, Stmt, StmtKind, SwitchCase};

pub trait Transform {
    fn transform_expr(&mut self, expr: Expr) -> Expr {
        walk_expr(self, expr)
    }

    fn transform_stmt(&mut self, stmt: Stmt) -> Stmt {
        walk_stmt(self, stmt)
    }

    fn transform_body(&mut self, body: Vec<Stmt>) -> Vec<Stmt> {
        body.into_iter().map(|s| self.transform_stmt(s)).collect()
    }
}

fn boxed<T: Transform + ?Sized>(t: &mut T, expr: Box<Expr>) -> Box<Expr> {
    Box::new(t.transform_expr(*expr))
}

fn opt_boxed<T: Transform + ?Sized>(t: &mut T, expr: Option<Box<Expr>>) -> Option<Box<Expr>> {
    expr.map(|e| boxed(t, e))
}

fn opt_body<T: Transform + ?Sized>(t: &mut T, body: Option<Vec<Stmt>>) -> Option<Vec<Stmt>> {
    body.map(|b| t.transform_body(b))
}

fn exprs<T: Transform + ?Sized>(t: &mut T, items: Vec<Expr>) -> Vec<Expr> {
    items.into_iter().map(|e| t.transform_expr(e)).collect()
}

/// Rebuilds `expr` with every child transformed.
pub fn walk_expr<T: Transform + ?Sized>(t: &mut T, expr: Expr) -> Expr {
    let Expr { kind, ty, pos, constant } = expr;
    let kind = match kind {
        ExprKind::Attribute { obj, attr } => ExprKind::Attribute { obj: boxed(t, obj), attr },
        ExprKind::Index { obj, index } => ExprKind::Index { obj: boxed(t, obj), index: boxed(t, index) },
        ExprKind::Slice { obj, start, stop } => ExprKind::Slice {
            obj: boxed(t, obj),
            start: opt_boxed(t, start),
            stop: opt_boxed(t, stop),
        },
        ExprKind::Call { func, args } => ExprKind::Call { func: boxed(t, func), args: exprs(t, args) },
        ExprKind::Binary { op, left, right } => ExprKind::Binary {
            op,
            left: boxed(t, left),
            right: boxed(t, right),
        },
        ExprKind::Unary { op, operand } => ExprKind::Unary { op, operand: boxed(t, operand) },
        ExprKind::Compare { first, rest } => ExprKind::Compare {
            first: boxed(t, first),
            rest: rest.into_iter().map(|(op, e)| (op, t.transform_expr(e))).collect(),
        },
        ExprKind::BoolOp { op, left, right } => ExprKind::BoolOp {
            op,
            left: boxed(t, left),
            right: boxed(t, right),
        },
        ExprKind::Cond { test, then, orelse } => ExprKind::Cond {
            test: boxed(t, test),
            then: boxed(t, then),
            orelse: boxed(t, orelse),
        },
        ExprKind::Tuple(items) => ExprKind::Tuple(exprs(t, items)),
        ExprKind::List(items) => ExprKind::List(exprs(t, items)),
        ExprKind::CArray(items) => ExprKind::CArray(exprs(t, items)),
        ExprKind::Dict(pairs) => ExprKind::Dict(
            pairs
                .into_iter()
                .map(|(k, v)| (t.transform_expr(k), t.transform_expr(v)))
                .collect(),
        ),
        ExprKind::Coerce(inner) => ExprKind::Coerce(boxed(t, inner)),
        ExprKind::TypeTest { expr, class } => ExprKind::TypeTest { expr: boxed(t, expr), class },
        ExprKind::Generator { target, iter, condition, element } => ExprKind::Generator {
            target: boxed(t, target),
            iter: boxed(t, iter),
            condition: opt_boxed(t, condition),
            element: boxed(t, element),
        },
        ExprKind::Comprehension { kind, result, body } => ExprKind::Comprehension {
            kind,
            result,
            body: Box::new(t.transform_stmt(*body)),
        },
        ExprKind::StatResult { result, body } => ExprKind::StatResult {
            result,
            body: Box::new(t.transform_stmt(*body)),
        },
        ExprKind::BuiltinCall { func, args } => ExprKind::BuiltinCall { func, args: exprs(t, args) },
        leaf @ (ExprKind::Int { .. }
        | ExprKind::Float { .. }
        | ExprKind::Bool(_)
        | ExprKind::None
        | ExprKind::Str { .. }
        | ExprKind::Char(_)
        | ExprKind::Name { .. }
        | ExprKind::TempRef(_)) => leaf,
    };
    Expr { kind, ty, pos, constant }
}

/// Rebuilds `stmt` with every child transformed.
pub fn walk_stmt<T: Transform + ?Sized>(t: &mut T, stmt: Stmt) -> Stmt {
    let Stmt { kind, pos } = stmt;
    let kind = match kind {
        StmtKind::Expr(e) => StmtKind::Expr(t.transform_expr(e)),
        StmtKind::Assign { target, value } => StmtKind::Assign {
            target: t.transform_expr(target),
            value: t.transform_expr(value),
        },
        StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
            target: t.transform_expr(target),
            op,
            value: t.transform_expr(value),
        },
        StmtKind::If { clauses, orelse } => StmtKind::If {
            clauses: clauses
                .into_iter()
                .map(|c| IfClause {
                    condition: t.transform_expr(c.condition),
                    body: t.transform_body(c.body),
                })
                .collect(),
            orelse: opt_body(t, orelse),
        },
        StmtKind::While { condition, body, orelse } => StmtKind::While {
            condition: t.transform_expr(condition),
            body: t.transform_body(body),
            orelse: opt_body(t, orelse),
        },
        StmtKind::ForIn { target, iter, body, orelse } => StmtKind::ForIn {
            target: t.transform_expr(target),
            iter: t.transform_expr(iter),
            body: t.transform_body(body),
            orelse: opt_body(t, orelse),
        },
        StmtKind::CountedLoop { target, start, stop, step, body, orelse } => StmtKind::CountedLoop {
            target: t.transform_expr(target),
            start: t.transform_expr(start),
            stop: t.transform_expr(stop),
            step,
            body: t.transform_body(body),
            orelse: opt_body(t, orelse),
        },
        StmtKind::PointerLoop { target, base, length, reversed, body, orelse } => StmtKind::PointerLoop {
            target: t.transform_expr(target),
            base: t.transform_expr(base),
            length: t.transform_expr(length),
            reversed,
            body: t.transform_body(body),
            orelse: opt_body(t, orelse),
        },
        StmtKind::SequenceLoop { target, seq, kind, reversed, body, orelse } => StmtKind::SequenceLoop {
            target: t.transform_expr(target),
            seq: t.transform_expr(seq),
            kind,
            reversed,
            body: t.transform_body(body),
            orelse: opt_body(t, orelse),
        },
        StmtKind::DictLoop { dict, method, view_call, key, value, body, orelse } => StmtKind::DictLoop {
            dict: t.transform_expr(dict),
            method,
            view_call,
            key: key.map(|k| t.transform_expr(k)),
            value: value.map(|v| t.transform_expr(v)),
            body: t.transform_body(body),
            orelse: opt_body(t, orelse),
        },
        StmtKind::Switch { subject, cases, default } => StmtKind::Switch {
            subject: t.transform_expr(subject),
            cases: cases
                .into_iter()
                .map(|c| SwitchCase { values: exprs(t, c.values), body: t.transform_body(c.body) })
                .collect(),
            default: opt_body(t, default),
        },
        StmtKind::Return(value) => StmtKind::Return(value.map(|v| t.transform_expr(v))),
        StmtKind::Raise(value) => StmtKind::Raise(value.map(|v| t.transform_expr(v))),
        StmtKind::Block(body) => StmtKind::Block(t.transform_body(body)),
        StmtKind::LetTemp { id, ty, value } => StmtKind::LetTemp {
            id,
            ty,
            value: value.map(|v| t.transform_expr(v)),
        },
        StmtKind::ComprehensionAppend { kind, result, key, value } => StmtKind::ComprehensionAppend {
            kind,
            result,
            key: key.map(|k| t.transform_expr(k)),
            value: t.transform_expr(value),
        },
        leaf @ (StmtKind::Break | StmtKind::Continue | StmtKind::Pass) => leaf,
    };
    Stmt { kind, pos }
}

fn transform_function<T: Transform + ?Sized>(t: &mut T, mut func: FuncDef) -> FuncDef {
    func.params = func
        .params
        .into_iter()
        .map(|mut p| {
            p.default = p.default.map(|d| t.transform_expr(d));
            p
        })
        .collect();
    func.body = t.transform_body(func.body);
    func
}

fn transform_class<T: Transform + ?Sized>(t: &mut T, mut class: ClassDef) -> ClassDef {
    class.methods = class.methods.into_iter().map(|m| transform_function(t, m)).collect();
    for prop in &mut class.properties {
        prop.getter = prop.getter.take().map(|g| transform_function(t, g));
        prop.setter = prop.setter.take().map(|s| transform_function(t, s));
    }
    class
}

/// Applies `t` to every body and initializer in the module.
pub fn transform_module<T: Transform + ?Sized>(t: &mut T, mut module: Module) -> Module {
    module.functions = std::mem::take(&mut module.functions)
        .into_iter()
        .map(|f| transform_function(t, f))
        .collect();
    module.classes = std::mem::take(&mut module.classes)
        .into_iter()
        .map(|c| transform_class(t, c))
        .collect();
    for global in &mut module.globals {
        global.init = global.init.take().map(|e| t.transform_expr(e));
    }
    module.body = t.transform_body(std::mem::take(&mut module.body));
    module
}

pub trait Visitor {
    fn visit_expr(&mut self, expr: &Expr) {
        super_expr(self, expr);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        super_stmt(self, stmt);
    }

    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }
}

pub fn super_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Attribute { obj, .. } => v.visit_expr(obj),
        ExprKind::Index { obj, index } => {
            v.visit_expr(obj);
            v.visit_expr(index);
        }
        ExprKind::Slice { obj, start, stop } => {
            v.visit_expr(obj);
            for e in start.iter().chain(stop.iter()) {
                v.visit_expr(e);
            }
        }
        ExprKind::Call { func, args } => {
            v.visit_expr(func);
            args.iter().for_each(|a| v.visit_expr(a));
        }
        ExprKind::Binary { left, right, .. } | ExprKind::BoolOp { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        ExprKind::Unary { operand, .. } => v.visit_expr(operand),
        ExprKind::Compare { first, rest } => {
            v.visit_expr(first);
            rest.iter().for_each(|(_, e)| v.visit_expr(e));
        }
        ExprKind::Cond { test, then, orelse } => {
            v.visit_expr(test);
            v.visit_expr(then);
            v.visit_expr(orelse);
        }
        ExprKind::Tuple(items) | ExprKind::List(items) | ExprKind::CArray(items) => {
            items.iter().for_each(|e| v.visit_expr(e));
        }
        ExprKind::BuiltinCall { args, .. } => args.iter().for_each(|e| v.visit_expr(e)),
        ExprKind::Dict(pairs) => {
            for (k, val) in pairs {
                v.visit_expr(k);
                v.visit_expr(val);
            }
        }
        ExprKind::Coerce(inner) | ExprKind::TypeTest { expr: inner, .. } => v.visit_expr(inner),
        ExprKind::Generator { target, iter, condition, element } => {
            v.visit_expr(target);
            v.visit_expr(iter);
            if let Some(c) = condition {
                v.visit_expr(c);
            }
            v.visit_expr(element);
        }
        ExprKind::Comprehension { body, .. } | ExprKind::StatResult { body, .. } => v.visit_stmt(body),
        ExprKind::Int { .. }
        | ExprKind::Float { .. }
        | ExprKind::Bool(_)
        | ExprKind::None
        | ExprKind::Str { .. }
        | ExprKind::Char(_)
        | ExprKind::Name { .. }
        | ExprKind::TempRef(_) => {}
    }
}

pub fn super_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    let visit_opt = |v: &mut V, body: &Option<Vec<Stmt>>| {
        if let Some(b) = body {
            v.visit_body(b);
        }
    };
    match &stmt.kind {
        StmtKind::Expr(e) => v.visit_expr(e),
        StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        StmtKind::If { clauses, orelse } => {
            for c in clauses {
                v.visit_expr(&c.condition);
                v.visit_body(&c.body);
            }
            visit_opt(v, orelse);
        }
        StmtKind::While { condition, body, orelse } => {
            v.visit_expr(condition);
            v.visit_body(body);
            visit_opt(v, orelse);
        }
        StmtKind::ForIn { target, iter, body, orelse } => {
            v.visit_expr(target);
            v.visit_expr(iter);
            v.visit_body(body);
            visit_opt(v, orelse);
        }
        StmtKind::CountedLoop { target, start, stop, body, orelse, .. } => {
            v.visit_expr(target);
            v.visit_expr(start);
            v.visit_expr(stop);
            v.visit_body(body);
            visit_opt(v, orelse);
        }
        StmtKind::PointerLoop { target, base, length, body, orelse, .. } => {
            v.visit_expr(target);
            v.visit_expr(base);
            v.visit_expr(length);
            v.visit_body(body);
            visit_opt(v, orelse);
        }
        StmtKind::SequenceLoop { target, seq, body, orelse, .. } => {
            v.visit_expr(target);
            v.visit_expr(seq);
            v.visit_body(body);
            visit_opt(v, orelse);
        }
        StmtKind::DictLoop { dict, key, value, body, orelse, .. } => {
            v.visit_expr(dict);
            for e in key.iter().chain(value.iter()) {
                v.visit_expr(e);
            }
            v.visit_body(body);
            visit_opt(v, orelse);
        }
        StmtKind::Switch { subject, cases, default } => {
            v.visit_expr(subject);
            for c in cases {
                c.values.iter().for_each(|e| v.visit_expr(e));
                v.visit_body(&c.body);
            }
            visit_opt(v, default);
        }
        StmtKind::Return(value) | StmtKind::Raise(value) => {
            if let Some(e) = value {
                v.visit_expr(e);
            }
        }
        StmtKind::Block(body) => v.visit_body(body),
        StmtKind::LetTemp { value, .. } => {
            if let Some(e) = value {
                v.visit_expr(e);
            }
        }
        StmtKind::ComprehensionAppend { key, value, .. } => {
            if let Some(k) = key {
                v.visit_expr(k);
            }
            v.visit_expr(value);
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
    }
}

fn visit_function<V: Visitor + ?Sized>(v: &mut V, func: &FuncDef) {
    for p in &func.params {
        if let Some(d) = &p.default {
            v.visit_expr(d);
        }
    }
    v.visit_body(&func.body);
}

/// Visits every body and initializer in the module.
pub fn visit_module<V: Visitor + ?Sized>(v: &mut V, module: &Module) {
    for f in &module.functions {
        visit_function(v, f);
    }
    for c in &module.classes {
        for m in &c.methods {
            visit_function(v, m);
        }
        for p in &c.properties {
            for f in p.getter.iter().chain(p.setter.iter()) {
                visit_function(v, f);
            }
        }
    }
    for g in &module.globals {
        if let Some(e) = &g.init {
            v.visit_expr(e);
        }
    }
    v.visit_body(&module.body);
}

//! Turns equality chains on one integer operand into `switch` dispatch.
//!
//! Applies to `if`/`elif` statements whose conditions are `x == k`,
//! `x == k1 or x == k2` or `x in (k1, k2)` with integer or character
//! constants, and to conditional and boolean expressions of the same shape.
//! Duplicate case values, differing operands and fewer than two values all
//! leave the code as it was.

use super::{same_location, Pass, TempAllocator};
use crate::ast::visit::{self, Transform};
use crate::ast::{
    build, BoolOpKind, CmpOp, Expr, ExprKind, IfClause, Module, Pos, Stmt, StmtKind, SwitchCase,
};
use crate::semantic::SymbolTable;
use crate::types::Type;
use std::collections::HashSet;
use tracing::debug;

pub struct SwitchLowering;

impl Pass for SwitchLowering {
    fn name(&self) -> &'static str {
        "switch-lowering"
    }

    fn run(&self, module: Module, _symbols: &SymbolTable) -> Module {
        let mut lowering = Lowering { temps: TempAllocator::new(&module), lowered: 0 };
        let mut module = visit::transform_module(&mut lowering, module);
        debug!(lowered = lowering.lowered, "switch lowering finished");
        lowering.temps.finish(&mut module);
        module
    }
}

struct Lowering {
    temps: TempAllocator,
    lowered: usize,
}

/// The operand and case values one condition tests for.
struct Tests<'e> {
    subject: &'e Expr,
    values: Vec<&'e Expr>,
}

fn is_case_value(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Int { .. } | ExprKind::Char(_))
        || (matches!(expr.kind, ExprKind::Name { .. }) && expr.ty.is_int() && expr.constant.is_some())
}

fn is_subject(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Name { .. } | ExprKind::Attribute { .. })
        && expr.ty.is_int()
        && !expr.ty.is_bint()
        && expr.is_simple()
}

/// Extracts the tested values from `cond`. `negated` accepts `!=` links
/// joined by `and` instead of `==` links joined by `or`.
fn extract(cond: &Expr, negated: bool) -> Option<Tests<'_>> {
    let (eq, not_in, joiner) = if negated {
        (CmpOp::Ne, CmpOp::NotIn, BoolOpKind::And)
    } else {
        (CmpOp::Eq, CmpOp::In, BoolOpKind::Or)
    };
    match &cond.kind {
        ExprKind::Compare { first, rest } if rest.len() == 1 => {
            let (op, other) = &rest[0];
            if *op == eq {
                if is_subject(first) && is_case_value(other) {
                    return Some(Tests { subject: first, values: vec![other] });
                }
                if is_subject(other) && is_case_value(first) {
                    return Some(Tests { subject: other, values: vec![first] });
                }
                return None;
            }
            if *op == not_in && is_subject(first) {
                if let ExprKind::Tuple(items) | ExprKind::List(items) = &other.kind {
                    if !items.is_empty() && items.iter().all(is_case_value) {
                        return Some(Tests { subject: first, values: items.iter().collect() });
                    }
                }
            }
            None
        }
        ExprKind::BoolOp { op, left, right } if *op == joiner => {
            let mut l = extract(left, negated)?;
            let r = extract(right, negated)?;
            if !same_location(l.subject, r.subject) {
                return None;
            }
            l.values.extend(r.values);
            Some(l)
        }
        _ => None,
    }
}

/// Adds `values` to `seen`, failing on a repeated value.
fn all_distinct(values: &[&Expr], seen: &mut HashSet<i64>) -> bool {
    values.iter().all(|v| match v.const_value().and_then(|c| c.as_int()) {
        Some(k) => seen.insert(k),
        None => false,
    })
}

impl Transform for Lowering {
    fn transform_stmt(&mut self, stmt: Stmt) -> Stmt {
        let pos = stmt.pos;
        let stmt = match stmt.kind {
            StmtKind::If { clauses, orelse } if switchable_if(&clauses) => {
                let clauses = clauses
                    .into_iter()
                    .map(|c| IfClause { condition: c.condition, body: self.transform_body(c.body) })
                    .collect();
                let orelse = orelse.map(|b| self.transform_body(b));
                return self.if_to_switch(clauses, orelse, pos);
            }
            kind => Stmt::new(kind, pos),
        };
        visit::walk_stmt(self, stmt)
    }

    fn transform_expr(&mut self, expr: Expr) -> Expr {
        if let ExprKind::Cond { test, .. } = &expr.kind {
            if switchable_test(test) {
                return self.cond_to_switch(expr);
            }
        }
        if switchable_test(&expr) && expr.ty.is_int() {
            return self.bool_to_switch(expr, false);
        }
        if negated_test(&expr) && expr.ty.is_int() {
            return self.bool_to_switch(expr, true);
        }
        visit::walk_expr(self, expr)
    }
}

fn switchable_if(clauses: &[IfClause]) -> bool {
    let mut seen = HashSet::new();
    let mut subject: Option<&Expr> = None;
    let mut count = 0;
    for clause in clauses {
        let Some(tests) = extract(&clause.condition, false) else {
            return false;
        };
        if let Some(s) = subject {
            if !same_location(s, tests.subject) {
                return false;
            }
        }
        subject = Some(tests.subject);
        if !all_distinct(&tests.values, &mut seen) {
            return false;
        }
        count += tests.values.len();
    }
    count >= 2
}

fn switchable_test(expr: &Expr) -> bool {
    extract(expr, false).is_some_and(|t| t.values.len() >= 2 && all_distinct(&t.values, &mut HashSet::new()))
}

fn negated_test(expr: &Expr) -> bool {
    extract(expr, true).is_some_and(|t| t.values.len() >= 2 && all_distinct(&t.values, &mut HashSet::new()))
}

/// Moves the subject and case values out of a condition already known to
/// match `extract`.
fn take_tests(cond: Expr) -> (Option<Expr>, Vec<Expr>) {
    match cond.kind {
        ExprKind::Compare { first, mut rest } => {
            let Some((op, other)) = rest.pop() else {
                return (None, Vec::new());
            };
            match op {
                CmpOp::In | CmpOp::NotIn => match other.kind {
                    ExprKind::Tuple(items) | ExprKind::List(items) => (Some(*first), items),
                    _ => (Some(*first), Vec::new()),
                },
                _ if is_subject(&first) && is_case_value(&other) => (Some(*first), vec![other]),
                _ => (Some(other), vec![*first]),
            }
        }
        ExprKind::BoolOp { left, right, .. } => {
            let (subject, mut values) = take_tests(*left);
            let (_, more) = take_tests(*right);
            values.extend(more);
            (subject, values)
        }
        _ => (None, Vec::new()),
    }
}

impl Lowering {
    fn if_to_switch(&mut self, clauses: Vec<IfClause>, orelse: Option<Vec<Stmt>>, pos: Pos) -> Stmt {
        let mut subject = None;
        let mut cases = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let (s, values) = take_tests(clause.condition);
            subject = subject.or(s);
            cases.push(SwitchCase { values, body: clause.body });
        }
        let Some(subject) = subject else {
            return Stmt::new(StmtKind::Pass, pos);
        };
        self.lowered += 1;
        debug!(line = pos.line, cases = cases.len(), "lowered if chain to switch");
        Stmt::new(StmtKind::Switch { subject, cases, default: orelse }, pos)
    }

    /// `a if x == 1 or x == 2 else b` evaluates through a temporary.
    fn cond_to_switch(&mut self, expr: Expr) -> Expr {
        let Expr { kind, ty, pos, constant } = expr;
        let ExprKind::Cond { test, then, orelse } = kind else {
            return Expr { kind, ty, pos, constant };
        };
        let (then, orelse) = (self.transform_expr(*then), self.transform_expr(*orelse));
        let (Some(subject), values) = take_tests(*test) else {
            let kind = ExprKind::Cond {
                test: Box::new(build::boolean(false)),
                then: Box::new(then),
                orelse: Box::new(orelse),
            };
            return Expr::new(kind, ty, pos);
        };
        let result = self.temps.fresh();
        let switch = Stmt::new(
            StmtKind::Switch {
                subject,
                cases: vec![SwitchCase {
                    values,
                    body: vec![build::assign(build::temp(result, ty.clone()), then).at(pos)],
                }],
                default: Some(vec![build::assign(build::temp(result, ty.clone()), orelse).at(pos)]),
            },
            pos,
        );
        self.lowered += 1;
        debug!(line = pos.line, "lowered conditional expression to switch");
        let body = build::block(vec![build::let_temp(result, ty.clone(), None).at(pos), switch]).at(pos);
        Expr::new(ExprKind::StatResult { result, body: Box::new(body) }, ty, pos)
    }

    /// `x == 1 or x == 2` (or `x != 1 and x != 2` when `negated`) as a
    /// switch that sets a flag.
    fn bool_to_switch(&mut self, expr: Expr, negated: bool) -> Expr {
        let (ty, pos) = (expr.ty.clone(), expr.pos);
        let (Some(subject), values) = take_tests(expr) else {
            return build::boolean(false).at(pos);
        };
        let flag = self.temps.fresh();
        let set = |value: bool| vec![build::assign(build::temp(flag, Type::bint()), build::boolean(value)).at(pos)];
        let switch = Stmt::new(
            StmtKind::Switch {
                subject,
                cases: vec![SwitchCase { values, body: set(!negated) }],
                default: Some(set(negated)),
            },
            pos,
        );
        self.lowered += 1;
        debug!(line = pos.line, negated, "lowered boolean test to switch");
        let body = build::block(vec![build::let_temp(flag, Type::bint(), None).at(pos), switch]).at(pos);
        let result = Expr::new(ExprKind::StatResult { result: flag, body: Box::new(body) }, Type::bint(), pos);
        super::retype(result, &ty)
    }
}

mod common;

use cextc::ast::{
    build, BinOp, BoolOpKind, BuiltinFn, CmpOp, CompKind, ConstValue, DictIterKind, Expr, ExprKind, SeqKind, Stmt,
    StmtKind, TempId,
};
use cextc::optimize::{BuiltinCalls, ConstantFolding, LoopLowering, Pass, Pipeline, SwitchLowering};
use cextc::options::OptimizeOptions;
use cextc::semantic::EntryId;
use cextc::types::{Builtin, ClassType, NumericKind, NumericType, Type, TypeRef};
use common::Fixture;

fn x(id: EntryId) -> cextc::ast::Expr {
    build::name("x", id, Type::c_long())
}

fn is_x(id: EntryId, value: i64) -> cextc::ast::Expr {
    build::compare(x(id), CmpOp::Eq, build::int(value))
}

fn assigned_value(stmt: &Stmt) -> &cextc::ast::Expr {
    match &stmt.kind {
        StmtKind::Assign { value, .. } => value,
        other => panic!("expected an assignment, got {:?}", other),
    }
}

#[test]
fn integer_arithmetic_folds_to_a_literal() {
    let mut fx = Fixture::new();
    let id = fx.local("x", Type::c_long());
    let value = build::binary(
        BinOp::Add,
        build::int(2),
        build::binary(BinOp::Mul, build::int(3), build::int(4), Type::c_long()),
        Type::c_long(),
    );
    fx.module.body.push(build::assign(x(id), value));

    let module = ConstantFolding.run(fx.module, &fx.symbols);
    match &assigned_value(&module.body[0]).kind {
        ExprKind::Int { value, text } => {
            assert_eq!(*value, 14);
            assert_eq!(text, "14");
        }
        other => panic!("expected a folded literal, got {:?}", other),
    }
}

#[test]
fn float_results_keep_the_source_expression() {
    let mut fx = Fixture::new();
    let id = fx.local("y", Type::c_double());
    let value = build::binary(BinOp::Add, build::float("1.0"), build::int(2), Type::c_double());
    fx.module.body.push(build::assign(build::name("y", id, Type::c_double()), value));

    let module = ConstantFolding.run(fx.module, &fx.symbols);
    let folded = assigned_value(&module.body[0]);
    assert!(matches!(folded.kind, ExprKind::Binary { op: BinOp::Add, .. }));
    assert_eq!(folded.constant, Some(ConstValue::Float(3.0)));
}

#[test]
fn constant_false_branch_is_pruned() {
    let mut fx = Fixture::new();
    let id = fx.local("x", Type::c_long());
    let test = build::compare(build::int(1), CmpOp::Gt, build::int(2));
    fx.module.body.push(build::if_else(
        test,
        vec![build::assign(x(id), build::int(1))],
        Some(vec![build::assign(x(id), build::int(2))]),
    ));

    let module = ConstantFolding.run(fx.module, &fx.symbols);
    match &module.body[0].kind {
        StmtKind::Block(body) => match &assigned_value(&body[0]).kind {
            ExprKind::Int { value, .. } => assert_eq!(*value, 2),
            other => panic!("unexpected value {:?}", other),
        },
        other => panic!("expected the else body, got {:?}", other),
    }
}

#[test]
fn repeated_case_value_is_not_switched() {
    let mut fx = Fixture::new();
    let id = fx.local("x", Type::c_long());
    let cond = build::bool_op(BoolOpKind::Or, is_x(id, 1), is_x(id, 1), Type::bint());
    fx.module.body.push(build::if_else(cond, vec![build::pass()], None));

    let module = SwitchLowering.run(fx.module, &fx.symbols);
    assert!(matches!(module.body[0].kind, StmtKind::If { .. }));
}

#[test]
fn equality_chain_becomes_a_switch() {
    let mut fx = Fixture::new();
    let id = fx.local("x", Type::c_long());
    let y = fx.local("y", Type::c_long());
    let set = |v: i64| vec![build::assign(build::name("y", y, Type::c_long()), build::int(v))];
    let second = build::bool_op(BoolOpKind::Or, is_x(id, 2), is_x(id, 3), Type::bint());
    fx.module.body.push(build::if_chain(vec![(is_x(id, 1), set(10)), (second, set(20))], Some(set(30))));

    let module = SwitchLowering.run(fx.module, &fx.symbols);
    let StmtKind::Switch { subject, cases, default } = &module.body[0].kind else {
        panic!("expected a switch, got {:?}", module.body[0].kind);
    };
    assert!(matches!(&subject.kind, ExprKind::Name { entry, .. } if *entry == id));
    let values: Vec<Vec<i64>> = cases
        .iter()
        .map(|c| c.values.iter().filter_map(|v| v.const_value().and_then(|k| k.as_int())).collect())
        .collect();
    assert_eq!(values, vec![vec![1], vec![2, 3]]);
    assert!(default.is_some());
}

#[test]
fn literal_tuple_loop_keeps_its_else_clause() {
    let mut fx = Fixture::new();
    let id = fx.local("x", Type::c_long());
    let items = build::tuple(vec![build::int(1), build::int(2), build::int(3)]);
    fx.module.body.push(build::for_in(x(id), items, vec![build::break_stmt()], Some(vec![build::pass()])));

    let module = LoopLowering.run(fx.module, &fx.symbols);
    let StmtKind::PointerLoop { base, length, reversed, body, orelse, .. } = &module.body[0].kind else {
        panic!("expected a pointer loop, got {:?}", module.body[0].kind);
    };
    assert!(matches!(&base.kind, ExprKind::CArray(items) if items.len() == 3));
    assert!(base.ty.is_array());
    assert_eq!(length.const_value(), Some(ConstValue::Int(3)));
    assert!(!reversed);
    assert!(matches!(body[0].kind, StmtKind::Break));
    assert!(orelse.is_some());
}

#[test]
fn object_tuple_loop_indexes_the_tuple() {
    let mut fx = Fixture::new();
    let id = fx.local("o", Type::object());
    let items = build::tuple(vec![build::string("a"), build::string("b")]);
    fx.module.body.push(build::for_in(build::name("o", id, Type::object()), items, vec![build::pass()], None));

    let module = LoopLowering.run(fx.module, &fx.symbols);
    assert!(matches!(
        module.body[0].kind,
        StmtKind::SequenceLoop { kind: SeqKind::Tuple, reversed: false, .. }
    ));
}

#[test]
fn pipeline_is_idempotent() {
    let mut fx = Fixture::new();
    let id = fx.local("x", Type::c_long());
    let y = fx.local("y", Type::c_double());
    fx.module.body.push(build::assign(
        build::name("y", y, Type::c_double()),
        build::binary(BinOp::Add, build::float("1.5"), build::int(2), Type::c_double()),
    ));
    fx.module.body.push(build::if_chain(
        vec![(is_x(id, 1), vec![build::pass()]), (is_x(id, 2), vec![build::pass()])],
        None,
    ));
    let items = build::tuple(vec![build::int(4), build::int(5)]);
    fx.module.body.push(build::for_in(x(id), items, vec![build::pass()], None));

    let pipeline = Pipeline::new(&OptimizeOptions::default());
    assert_eq!(
        pipeline.pass_names(),
        vec!["constant-folding", "builtin-calls", "loop-lowering", "switch-lowering"]
    );
    let once = pipeline.run(fx.module, &fx.symbols);
    let twice = pipeline.run(once.clone(), &fx.symbols);
    assert_eq!(format!("{:?}", once), format!("{:?}", twice));
}

/// `y = <value>` run through one pass, returning the rewritten value.
fn rewrite(mut fx: Fixture, pass: &dyn Pass, value: Expr) -> Expr {
    let y = fx.local("y", value.ty.clone());
    fx.module.body.push(build::assign(build::name("y", y, value.ty.clone()), value));
    let mut module = pass.run(fx.module, &fx.symbols);
    match module.body.remove(0).kind {
        StmtKind::Assign { value, .. } => value,
        other => panic!("expected an assignment, got {:?}", other),
    }
}

fn lower(mut fx: Fixture, stmt: Stmt) -> Stmt {
    fx.module.body.push(stmt);
    let mut module = LoopLowering.run(fx.module, &fx.symbols);
    module.body.remove(0)
}

fn without_coerce(expr: &Expr) -> &Expr {
    match &expr.kind {
        ExprKind::Coerce(inner) => inner,
        _ => expr,
    }
}

fn stat_body(expr: &Expr) -> &[Stmt] {
    match &without_coerce(expr).kind {
        ExprKind::StatResult { body, .. } => match &body.kind {
            StmtKind::Block(stmts) => stmts,
            other => panic!("expected a block, got {:?}", other),
        },
        other => panic!("expected a statement expression, got {:?}", other),
    }
}

fn temp_type(stmt: &Stmt) -> NumericType {
    match &stmt.kind {
        StmtKind::LetTemp { ty, .. } => ty.as_numeric().expect("numeric temporary"),
        other => panic!("expected a temporary, got {:?}", other),
    }
}

/// `<call>(<element> for x in a)` with `a` an array of five `elem`s.
fn over_array(fx: &mut Fixture, func: &str, elem: TypeRef, element: impl Fn(Expr) -> Expr, ty: TypeRef) -> Expr {
    let callee = fx.builtin(func);
    let a = fx.local("a", Type::array(elem.clone(), Some(5)));
    let x = fx.local("x", elem.clone());
    let gen = build::generator(
        build::name("x", x, elem.clone()),
        build::name("a", a, Type::array(elem.clone(), Some(5))),
        None,
        element(build::name("x", x, elem)),
    );
    build::call(build::name(func, callee, Type::object()), vec![gen], ty)
}

#[test]
fn sum_of_comparisons_accumulates_in_py_ssize_t() {
    let mut fx = Fixture::new();
    let call = over_array(&mut fx, "sum", Type::c_int(), |x| build::compare(x, CmpOp::Gt, build::int(0)), Type::object());
    let value = rewrite(fx, &BuiltinCalls, call);

    let body = stat_body(&value);
    assert_eq!(temp_type(&body[0]), NumericType::py_ssize_t());
    let StmtKind::ForIn { body: inner, .. } = &body[1].kind else {
        panic!("expected the generator loop, got {:?}", body[1].kind);
    };
    let StmtKind::AugAssign { op: BinOp::Add, value: added, .. } = &inner[0].kind else {
        panic!("expected an accumulation, got {:?}", inner[0].kind);
    };
    assert!(matches!(added.kind, ExprKind::Coerce(_)));
    assert_eq!(added.ty.as_numeric(), Some(NumericType::py_ssize_t()));
}

#[test]
fn sum_keeps_wide_element_types() {
    let mut fx = Fixture::new();
    let call = over_array(&mut fx, "sum", Type::c_double(), |x| x, Type::c_double());
    let value = rewrite(fx, &BuiltinCalls, call);
    assert_eq!(temp_type(&stat_body(&value)[0]), NumericType::c_double());

    let mut fx = Fixture::new();
    let long_long = NumericType::signed(NumericKind::LongLong);
    let call = over_array(&mut fx, "sum", Type::numeric(long_long), |x| x, Type::object());
    let value = rewrite(fx, &BuiltinCalls, call);
    assert_eq!(temp_type(&stat_body(&value)[0]), long_long);
}

#[test]
fn len_of_builtin_containers_reads_the_size_directly() {
    let cases = [
        (Type::builtin(Builtin::List), BuiltinFn::ListSize),
        (Type::builtin(Builtin::Tuple), BuiltinFn::TupleSize),
        (Type::builtin(Builtin::Dict), BuiltinFn::DictSize),
        (Type::builtin(Builtin::Str), BuiltinFn::UnicodeLength),
        (Type::pointer(Type::c_char()), BuiltinFn::CStrLen),
    ];
    for (ty, expected) in cases {
        let mut fx = Fixture::new();
        let len = fx.builtin("len");
        let s = fx.local("s", ty.clone());
        let call = build::call(build::name("len", len, Type::object()), vec![build::name("s", s, ty)], Type::py_ssize_t());
        let value = rewrite(fx, &BuiltinCalls, call);
        match &value.kind {
            ExprKind::BuiltinCall { func, args } => {
                assert_eq!(*func, expected);
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
        assert_eq!(value.ty.as_numeric(), Some(NumericType::py_ssize_t()));
    }
}

#[test]
fn len_of_an_untyped_object_stays_a_call() {
    let mut fx = Fixture::new();
    let len = fx.builtin("len");
    let o = fx.local("o", Type::object());
    let call = build::call(build::name("len", len, Type::object()), vec![build::name("o", o, Type::object())], Type::py_ssize_t());
    let value = rewrite(fx, &BuiltinCalls, call);
    assert!(matches!(value.kind, ExprKind::Call { .. }));
}

#[test]
fn shadowed_len_is_not_specialized() {
    let mut fx = Fixture::new();
    let len = fx.local("len", Type::object());
    let l = fx.local("l", Type::builtin(Builtin::List));
    let arg = build::name("l", l, Type::builtin(Builtin::List));
    let call = build::call(build::name("len", len, Type::object()), vec![arg], Type::object());
    let value = rewrite(fx, &BuiltinCalls, call);
    assert!(matches!(value.kind, ExprKind::Call { .. }));
}

#[test]
fn generator_arguments_become_comprehensions() {
    let mut fx = Fixture::new();
    let call = over_array(&mut fx, "list", Type::c_int(), |x| x, Type::builtin(Builtin::List));
    let value = rewrite(fx, &BuiltinCalls, call);
    assert!(matches!(value.kind, ExprKind::Comprehension { kind: CompKind::List, .. }));

    let mut fx = Fixture::new();
    let call = over_array(&mut fx, "set", Type::c_int(), |x| x, Type::builtin(Builtin::Set));
    let value = rewrite(fx, &BuiltinCalls, call);
    assert!(matches!(value.kind, ExprKind::Comprehension { kind: CompKind::Set, .. }));

    let mut fx = Fixture::new();
    let call = over_array(&mut fx, "tuple", Type::c_int(), |x| x, Type::builtin(Builtin::Tuple));
    let value = rewrite(fx, &BuiltinCalls, call);
    let ExprKind::BuiltinCall { func: BuiltinFn::ListAsTuple, args } = &value.kind else {
        panic!("expected a list-to-tuple conversion, got {:?}", value.kind);
    };
    assert!(matches!(args[0].kind, ExprKind::Comprehension { kind: CompKind::List, .. }));
}

#[test]
fn sorted_sorts_a_fresh_list_in_place() {
    let mut fx = Fixture::new();
    let call = over_array(&mut fx, "sorted", Type::c_int(), |x| x, Type::builtin(Builtin::List));
    let value = rewrite(fx, &BuiltinCalls, call);
    let body = stat_body(&value);
    assert!(matches!(
        &body[0].kind,
        StmtKind::LetTemp { value: Some(Expr { kind: ExprKind::Comprehension { kind: CompKind::List, .. }, .. }), .. }
    ));
    assert!(matches!(
        &body[1].kind,
        StmtKind::Expr(Expr { kind: ExprKind::BuiltinCall { func: BuiltinFn::ListSort, .. }, .. })
    ));
}

/// Initial accumulator value and the value stored on a hit.
fn short_circuit(func: &str) -> (bool, bool) {
    let mut fx = Fixture::new();
    let call = over_array(&mut fx, func, Type::c_int(), |x| build::compare(x, CmpOp::Gt, build::int(0)), Type::bint());
    let value = rewrite(fx, &BuiltinCalls, call);
    assert!(value.ty.is_bint());
    let body = stat_body(&value);
    let StmtKind::LetTemp { value: Some(Expr { kind: ExprKind::Bool(initial), .. }), .. } = &body[0].kind else {
        panic!("expected a bint accumulator, got {:?}", body[0].kind);
    };
    let StmtKind::ForIn { body: inner, .. } = &body[1].kind else {
        panic!("expected the generator loop, got {:?}", body[1].kind);
    };
    let StmtKind::If { clauses, .. } = &inner[0].kind else {
        panic!("expected the test, got {:?}", inner[0].kind);
    };
    let hit = &clauses[0].body;
    assert!(matches!(hit[1].kind, StmtKind::Break));
    let StmtKind::Assign { value: Expr { kind: ExprKind::Bool(stored), .. }, .. } = &hit[0].kind else {
        panic!("expected the result store, got {:?}", hit[0].kind);
    };
    (*initial, *stored)
}

#[test]
fn any_and_all_stop_at_the_deciding_element() {
    assert_eq!(short_circuit("any"), (false, true));
    assert_eq!(short_circuit("all"), (true, false));
}

#[test]
fn numeric_builtins_become_c_operations() {
    let mut fx = Fixture::new();
    let abs = fx.builtin("abs");
    let n = fx.local("n", Type::c_int());
    let call = build::call(build::name("abs", abs, Type::object()), vec![build::name("n", n, Type::c_int())], Type::c_int());
    let value = rewrite(fx, &BuiltinCalls, call);
    assert!(matches!(value.kind, ExprKind::BuiltinCall { func: BuiltinFn::CAbs, .. }));

    let mut fx = Fixture::new();
    let abs = fx.builtin("abs");
    let uint = Type::numeric(NumericType::unsigned(NumericKind::Int));
    let u = fx.local("u", uint.clone());
    let call = build::call(build::name("abs", abs, Type::object()), vec![build::name("u", u, uint.clone())], uint);
    let value = rewrite(fx, &BuiltinCalls, call);
    assert!(matches!(&value.kind, ExprKind::Name { entry, .. } if *entry == u));

    let mut fx = Fixture::new();
    let float = fx.builtin("float");
    let n = fx.local("n", Type::c_int());
    let call = build::call(build::name("float", float, Type::object()), vec![build::name("n", n, Type::c_int())], Type::c_double());
    let value = rewrite(fx, &BuiltinCalls, call);
    assert!(matches!(value.kind, ExprKind::Coerce(_)));
    assert!(value.ty.is_float());

    let mut fx = Fixture::new();
    let boolean = fx.builtin("bool");
    let n = fx.local("n", Type::c_int());
    let call = build::call(build::name("bool", boolean, Type::object()), vec![build::name("n", n, Type::c_int())], Type::bint());
    let value = rewrite(fx, &BuiltinCalls, call);
    let ExprKind::Compare { rest, .. } = &value.kind else {
        panic!("expected a comparison, got {:?}", value.kind);
    };
    assert_eq!(rest[0].0, CmpOp::Ne);
    assert_eq!(rest[0].1.const_value(), Some(ConstValue::Int(0)));
}

#[test]
fn isinstance_of_an_extension_type_is_a_type_test() {
    let mut fx = Fixture::new();
    let isinstance = fx.builtin("isinstance");
    let shape = fx.class(ClassType::new("demo", "Shape"));
    let o = fx.local("o", Type::object());
    let args = vec![build::name("o", o, Type::object()), build::name("Shape", shape.entry, Type::builtin(Builtin::Type))];
    let call = build::call(build::name("isinstance", isinstance, Type::object()), args, Type::bint());
    let value = rewrite(fx, &BuiltinCalls, call);
    let ExprKind::TypeTest { class, .. } = &value.kind else {
        panic!("expected a type test, got {:?}", value.kind);
    };
    assert!(class.same_as(&shape.ty));
    assert!(value.ty.is_bint());
}

/// `for i in <iter>: pass` with `i` a C long.
fn range_loop(iter: impl FnOnce(&mut Fixture) -> Expr) -> Stmt {
    let mut fx = Fixture::new();
    let i = fx.local("i", Type::c_long());
    let iter = iter(&mut fx);
    lower(fx, build::for_in(build::name("i", i, Type::c_long()), iter, vec![build::pass()], None))
}

fn range_call(fx: &mut Fixture, args: Vec<Expr>) -> Expr {
    let range = fx.builtin("range");
    build::call(build::name("range", range, Type::object()), args, Type::object())
}

fn reversed_call(fx: &mut Fixture, arg: Expr) -> Expr {
    let reversed = fx.builtin("reversed");
    build::call(build::name("reversed", reversed, Type::object()), vec![arg], Type::object())
}

fn shifted(expr: &Expr, op: BinOp, of: EntryId) -> bool {
    match &expr.kind {
        ExprKind::Binary { op: o, left, right } => {
            *o == op
                && matches!(&left.kind, ExprKind::Name { entry, .. } if *entry == of)
                && right.const_value() == Some(ConstValue::Int(1))
        }
        _ => false,
    }
}

#[test]
fn range_becomes_a_counted_loop() {
    let lowered = range_loop(|fx| {
        let n = fx.local("n", Type::c_long());
        range_call(fx, vec![build::name("n", n, Type::c_long())])
    });
    let StmtKind::CountedLoop { start, stop, step, .. } = &lowered.kind else {
        panic!("expected a counted loop, got {:?}", lowered.kind);
    };
    assert_eq!(start.const_value(), Some(ConstValue::Int(0)));
    assert!(matches!(stop.kind, ExprKind::Name { .. }));
    assert_eq!(*step, 1);
}

#[test]
fn reversed_range_shifts_both_bounds() {
    let mut ids = (EntryId(0), EntryId(0));
    let lowered = range_loop(|fx| {
        let a = fx.local("a", Type::c_long());
        let b = fx.local("b", Type::c_long());
        ids = (a, b);
        let range = range_call(fx, vec![build::name("a", a, Type::c_long()), build::name("b", b, Type::c_long())]);
        reversed_call(fx, range)
    });
    let StmtKind::CountedLoop { start, stop, step, .. } = &lowered.kind else {
        panic!("expected a counted loop, got {:?}", lowered.kind);
    };
    assert!(shifted(start, BinOp::Sub, ids.1));
    assert!(shifted(stop, BinOp::Sub, ids.0));
    assert_eq!(*step, -1);

    let lowered = range_loop(|fx| {
        let a = fx.local("a", Type::c_long());
        let b = fx.local("b", Type::c_long());
        ids = (a, b);
        let args = vec![build::name("a", a, Type::c_long()), build::name("b", b, Type::c_long()), build::int(-1)];
        let range = range_call(fx, args);
        reversed_call(fx, range)
    });
    let StmtKind::CountedLoop { start, stop, step, .. } = &lowered.kind else {
        panic!("expected a counted loop, got {:?}", lowered.kind);
    };
    assert!(shifted(start, BinOp::Add, ids.1));
    assert!(shifted(stop, BinOp::Add, ids.0));
    assert_eq!(*step, 1);
}

#[test]
fn reversed_range_with_a_wide_step_is_left_alone() {
    let lowered = range_loop(|fx| {
        let range = range_call(fx, vec![build::int(0), build::int(10), build::int(2)]);
        reversed_call(fx, range)
    });
    assert!(matches!(lowered.kind, StmtKind::ForIn { .. }));
}

#[test]
fn array_slice_walks_a_pointer() {
    let mut fx = Fixture::new();
    let arr_ty = Type::array(Type::c_int(), Some(10));
    let a = fx.local("a", arr_ty.clone());
    let lo = fx.local("lo", Type::c_long());
    let hi = fx.local("hi", Type::c_long());
    let x = fx.local("x", Type::c_int());
    let slice = build::slice(
        build::name("a", a, arr_ty),
        Some(build::name("lo", lo, Type::c_long())),
        Some(build::name("hi", hi, Type::c_long())),
        Type::pointer(Type::c_int()),
    );
    let lowered = lower(fx, build::for_in(build::name("x", x, Type::c_int()), slice, vec![build::pass()], None));
    let StmtKind::PointerLoop { base, length, reversed, .. } = &lowered.kind else {
        panic!("expected a pointer loop, got {:?}", lowered.kind);
    };
    assert!(matches!(base.kind, ExprKind::Binary { op: BinOp::Add, .. }));
    assert!(base.ty.is_ptr());
    assert!(matches!(length.kind, ExprKind::Binary { op: BinOp::Sub, .. }));
    assert!(!reversed);
}

#[test]
fn enumerate_assigns_the_index_before_the_item() {
    let mut fx = Fixture::new();
    let enumerate = fx.builtin("enumerate");
    let arr_ty = Type::array(Type::c_int(), Some(5));
    let a = fx.local("a", arr_ty.clone());
    let i = fx.local("i", Type::c_long());
    let x = fx.local("x", Type::c_int());
    let target = build::tuple(vec![build::name("i", i, Type::c_long()), build::name("x", x, Type::c_int())]);
    let iter = build::call(build::name("enumerate", enumerate, Type::object()), vec![build::name("a", a, arr_ty)], Type::object());
    let lowered = lower(fx, build::for_in(target, iter, vec![build::pass()], None));

    let StmtKind::Block(stmts) = &lowered.kind else {
        panic!("expected a block, got {:?}", lowered.kind);
    };
    let StmtKind::LetTemp { id: counter, .. } = &stmts[0].kind else {
        panic!("expected the counter, got {:?}", stmts[0].kind);
    };
    let StmtKind::LetTemp { id: slot, value: None, .. } = &stmts[1].kind else {
        panic!("expected the item slot, got {:?}", stmts[1].kind);
    };
    let StmtKind::PointerLoop { target, body, .. } = &stmts[2].kind else {
        panic!("expected a pointer loop, got {:?}", stmts[2].kind);
    };
    assert!(matches!(target.kind, ExprKind::TempRef(t) if t == *slot));

    let assigned = |stmt: &Stmt| -> (EntryId, TempId) {
        match &stmt.kind {
            StmtKind::Assign { target: Expr { kind: ExprKind::Name { entry, .. }, .. }, value: Expr { kind: ExprKind::TempRef(t), .. } } => {
                (*entry, *t)
            }
            other => panic!("expected a name assignment, got {:?}", other),
        }
    };
    assert_eq!(assigned(&body[0]), (i, *counter));
    assert!(matches!(body[1].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
    assert_eq!(assigned(&body[2]), (x, *slot));
    assert!(matches!(body[3].kind, StmtKind::Pass));
}

/// `for <target> in <iter>: pass` over a dict-typed local `d`.
fn dict_loop(target: impl FnOnce(&mut Fixture) -> Expr, method: Option<&str>) -> Stmt {
    let mut fx = Fixture::new();
    let dict_ty = Type::builtin(Builtin::Dict);
    let d = fx.local("d", dict_ty.clone());
    let target = target(&mut fx);
    let subject = build::name("d", d, dict_ty);
    let iter = match method {
        Some(m) => build::call(build::attr(subject, m, Type::object()), vec![], Type::object()),
        None => subject,
    };
    lower(fx, build::for_in(target, iter, vec![build::pass()], None))
}

fn object_name(fx: &mut Fixture, name: &str) -> Expr {
    let id = fx.local(name, Type::object());
    build::name(name, id, Type::object())
}

#[test]
fn dict_iteration_becomes_a_guarded_dict_loop() {
    let bare = dict_loop(|fx| object_name(fx, "k"), None);
    assert!(matches!(
        bare.kind,
        StmtKind::DictLoop { method: DictIterKind::Keys, view_call: false, key: Some(_), value: None, .. }
    ));

    let keys = dict_loop(|fx| object_name(fx, "k"), Some("keys"));
    let StmtKind::DictLoop { dict, method: DictIterKind::Keys, view_call: true, .. } = &keys.kind else {
        panic!("expected a keys loop, got {:?}", keys.kind);
    };
    assert!(dict.ty.is_builtin(Builtin::Dict));

    let values = dict_loop(|fx| object_name(fx, "v"), Some("values"));
    assert!(matches!(
        values.kind,
        StmtKind::DictLoop { method: DictIterKind::Values, view_call: true, key: None, value: Some(_), .. }
    ));

    let items = dict_loop(|fx| build::tuple(vec![object_name(fx, "k"), object_name(fx, "v")]), Some("items"));
    assert!(matches!(
        items.kind,
        StmtKind::DictLoop { method: DictIterKind::Items, view_call: true, key: Some(_), value: Some(_), .. }
    ));
}

#[test]
fn items_into_a_single_name_is_not_lowered() {
    let lowered = dict_loop(|fx| object_name(fx, "kv"), Some("items"));
    assert!(matches!(lowered.kind, StmtKind::ForIn { .. }));
}

#[test]
fn every_pass_is_idempotent() {
    let build_module = || {
        let mut fx = Fixture::new();
        let x_id = fx.local("x", Type::c_long());
        let y = fx.local("y", Type::c_double());
        fx.module.body.push(build::assign(
            build::name("y", y, Type::c_double()),
            build::binary(BinOp::Mul, build::int(2), build::int(3), Type::c_long()),
        ));
        let sum = over_array(&mut fx, "sum", Type::c_int(), |e| e, Type::c_double());
        fx.module.body.push(build::assign(build::name("y", y, Type::c_double()), sum));
        let range = range_call(&mut fx, vec![build::int(10)]);
        fx.module.body.push(build::for_in(x(x_id), range, vec![build::pass()], None));
        fx.module.body.push(build::if_chain(
            vec![(is_x(x_id, 1), vec![build::pass()]), (is_x(x_id, 2), vec![build::pass()])],
            None,
        ));
        fx
    };
    let passes: [&dyn Pass; 4] = [&ConstantFolding, &BuiltinCalls, &LoopLowering, &SwitchLowering];
    for pass in passes {
        let fx = build_module();
        let once = pass.run(fx.module, &fx.symbols);
        let twice = pass.run(once.clone(), &fx.symbols);
        assert_eq!(format!("{:?}", once), format!("{:?}", twice), "{} is not idempotent", pass.name());
    }
}

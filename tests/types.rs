use cextc::diagnostics::codes;
use cextc::types::{
    best_match, widest_numeric_type, Candidate, DeclOptions, FuncParam, FunctionType, FusedType, NumericKind,
    NumericType, OverloadError, Specializer, Type, TypeRef,
};
use cextc::Diagnostic;
use std::rc::Rc;

fn unary(ret: TypeRef, arg: TypeRef) -> TypeRef {
    Type::function(FunctionType::new(ret, vec![FuncParam::new("x", arg)]))
}

#[test]
fn widest_numeric_type_follows_rank_then_signedness() {
    let long = NumericType::c_long();
    let uint = NumericType::unsigned(NumericKind::Int);
    assert_eq!(widest_numeric_type(long, uint), long);
    assert_eq!(widest_numeric_type(NumericType::c_int(), NumericType::c_double()), NumericType::c_double());
    assert_eq!(widest_numeric_type(NumericType::bint(), NumericType::c_int()), NumericType::c_int());
    assert_eq!(widest_numeric_type(NumericType::c_int(), NumericType::bint()), NumericType::c_int());
}

#[test]
fn array_of_function_pointers_declares_inside_out() {
    let f = Type::function(FunctionType::new(Type::c_int(), vec![FuncParam::new("x", Type::c_double())]));
    let table = Type::array(Type::pointer(f), Some(4));
    assert_eq!(table.declaration_code("cbs", &DeclOptions::code()), "int (*cbs[4])(double)");
    assert_eq!(table.empty_declaration_code(), "int (*[4])(double)");
}

#[test]
fn object_pointer_and_void_function() {
    let f = Type::function(FunctionType::new(Type::void(), vec![]));
    assert_eq!(f.declaration_code("run", &DeclOptions::code()), "void run(void)");
    let pp = Type::pointer(Type::object());
    assert_eq!(pp.declaration_code("out", &DeclOptions::code()), "PyObject **out");
}

#[test]
fn single_exact_candidate_wins_at_index_zero() {
    let cands = vec![Candidate::new("area", "area_d", unary(Type::c_double(), Type::c_double()))];
    let m = best_match(&[Type::c_double()], &cands, &mut Specializer::new()).expect("resolves");
    assert_eq!(m.index, 0);
    assert!(m.score.is_exact());
    assert!(m.coercions.iter().all(Option::is_none));
}

#[test]
fn exact_match_beats_promotion_in_either_order() {
    let exact = Candidate::new("f", "f_int", unary(Type::void(), Type::c_int()));
    let wider = Candidate::new("f", "f_long", unary(Type::void(), Type::c_long()));

    let m = best_match(&[Type::c_int()], &[exact.clone(), wider.clone()], &mut Specializer::new())
        .expect("resolves");
    assert_eq!(m.candidate.cname, "f_int");
    assert_eq!(m.index, 0);

    let m = best_match(&[Type::c_int()], &[wider, exact], &mut Specializer::new()).expect("resolves");
    assert_eq!(m.candidate.cname, "f_int");
    assert_eq!(m.index, 1);
}

#[test]
fn equal_scores_are_ambiguous() {
    let a = Candidate::new("f", "f_a", unary(Type::void(), Type::c_long()));
    let b = Candidate::new("f", "f_b", unary(Type::void(), Type::c_long()));
    for cands in [vec![a.clone(), b.clone()], vec![b, a]] {
        match best_match(&[Type::c_int()], &cands, &mut Specializer::new()) {
            Err(OverloadError::Ambiguous { name, candidates }) => {
                assert_eq!(name, "f");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }
}

#[test]
fn wrong_arity_is_reported_per_candidate() {
    let cands = vec![Candidate::new("f", "f", unary(Type::void(), Type::c_int()))];
    let err = best_match(&[Type::c_int(), Type::c_int()], &cands, &mut Specializer::new())
        .expect_err("no candidate takes two arguments");
    let diag = Diagnostic::from_overload(&err);
    assert_eq!(diag.code, codes::NO_MATCHING_OVERLOAD);
    assert!(diag.notes[0].contains("wrong number of arguments"));
}

#[test]
fn fused_candidate_is_specialized_for_the_call() {
    let number: TypeRef = Rc::new(Type::Fused(FusedType {
        name: "number".into(),
        alternatives: vec![Type::c_int(), Type::c_double()],
    }));
    let cands = vec![Candidate::new("twice", "twice", unary(number.clone(), number))];
    let mut spec = Specializer::new();
    let m = best_match(&[Type::c_double()], &cands, &mut spec).expect("resolves");
    assert_eq!(m.candidate.cname, "twice__fuse_double");
    assert!(!m.candidate.ty.contains_fused());
    assert_eq!(m.candidate.ty.to_string(), "double (double)");
    assert!(m.score.is_exact());
}

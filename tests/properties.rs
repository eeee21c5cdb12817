use cextc::types::{
    best_match, widest_numeric_type, Candidate, DeclOptions, FuncParam, FunctionType, NumericKind, NumericType,
    OverloadError, Signedness, Specializer, Type, TypeRef,
};
use proptest::prelude::*;

fn numeric() -> impl Strategy<Value = NumericType> {
    let integer = prop_oneof![
        Just(NumericKind::Char),
        Just(NumericKind::Short),
        Just(NumericKind::Int),
        Just(NumericKind::Long),
        Just(NumericKind::SSize),
        Just(NumericKind::Size),
        Just(NumericKind::LongLong),
    ];
    let sign = prop_oneof![Just(Signedness::Signed), Just(Signedness::Unsigned)];
    prop_oneof![
        (integer, sign).prop_map(|(k, s)| NumericType::new(k, s)),
        Just(NumericType::bint()),
        Just(NumericType::signed(NumericKind::Float)),
        Just(NumericType::signed(NumericKind::Double)),
        Just(NumericType::signed(NumericKind::LongDouble)),
    ]
}

fn declarable() -> impl Strategy<Value = TypeRef> {
    let leaf = prop_oneof![
        Just(Type::c_int()),
        Just(Type::c_double()),
        Just(Type::object()),
        Just(Type::void()),
    ];
    leaf.prop_recursive(4, 16, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(Type::pointer),
            (inner.clone(), 1usize..8).prop_map(|(t, n)| Type::array(t, Some(n))),
            (inner.clone(), prop::collection::vec(inner, 0..3)).prop_map(|(ret, args)| {
                let params = args.into_iter().enumerate().map(|(i, t)| FuncParam::new(format!("a{}", i), t)).collect();
                Type::function(FunctionType::new(ret, params))
            }),
        ]
    })
}

fn resolve(arg: NumericType, sigs: &[(usize, NumericType)]) -> Result<String, &'static str> {
    let cands: Vec<Candidate> = sigs
        .iter()
        .map(|(i, p)| {
            let ty = Type::function(FunctionType::new(Type::void(), vec![FuncParam::new("x", Type::numeric(*p))]));
            Candidate::new("f", format!("f{}", i), ty)
        })
        .collect();
    match best_match(&[Type::numeric(arg)], &cands, &mut Specializer::new()) {
        Ok(m) => Ok(m.candidate.cname),
        Err(OverloadError::Ambiguous { .. }) => Err("ambiguous"),
        Err(OverloadError::NoMatch { .. }) => Err("no match"),
    }
}

proptest! {
    #[test]
    fn widest_is_symmetric_and_never_narrower(a in numeric(), b in numeric()) {
        let w = widest_numeric_type(a, b);
        prop_assert_eq!(w, widest_numeric_type(b, a));
        prop_assert!(w.rank() >= a.rank());
        prop_assert!(w.rank() >= b.rank());
    }

    #[test]
    fn pointer_declarator_wraps_the_name(t in declarable()) {
        let opts = DeclOptions::code();
        let inner = if t.as_function().is_some() || t.is_array() { "(*x)" } else { "*x" };
        prop_assert_eq!(Type::pointer(t.clone()).declaration_code("x", &opts), t.declaration_code(inner, &opts));
    }

    #[test]
    fn overload_choice_ignores_candidate_order(arg in numeric(), params in prop::collection::vec(numeric(), 1..5)) {
        let forward: Vec<(usize, NumericType)> = params.iter().copied().enumerate().collect();
        let mut backward = forward.clone();
        backward.reverse();
        prop_assert_eq!(resolve(arg, &forward), resolve(arg, &backward));
    }
}

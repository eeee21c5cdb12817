//! Structural compatibility between types and the spanning-type lattice.

use super::numeric::widest_numeric_type;
use super::{Builtin, ClassType, Type, TypeRef};

/// Type identity: structural for everything except classes and structs,
/// which compare by qualified name. Typedefs are transparent and the
/// poison type matches anything.
pub fn same_as(a: &Type, b: &Type) -> bool {
    let (a, b) = (a.resolve(), b.resolve());
    match (a, b) {
        (Type::Error, _) | (_, Type::Error) => true,
        (Type::Void, Type::Void) => true,
        (Type::Numeric(x), Type::Numeric(y)) => x == y,
        (Type::Pointer(x), Type::Pointer(y))
        | (Type::Reference(x), Type::Reference(y))
        | (Type::Const(x), Type::Const(y)) => same_as(x, y),
        (Type::Array { base: x, size: n }, Type::Array { base: y, size: m }) => n == m && same_as(x, y),
        (Type::Function(f), Type::Function(g)) => {
            same_as(&f.return_type, &g.return_type)
                && f.params.len() == g.params.len()
                && f.params.iter().zip(&g.params).all(|(p, q)| same_as(&p.ty, &q.ty))
                && f.variadic == g.variadic
                && f.exception == g.exception
                && f.calling_convention.equivalent(g.calling_convention)
        }
        (Type::Struct(x), Type::Struct(y)) => x.name == y.name && x.cname == y.cname && x.kind == y.kind,
        (Type::Class(x), Type::Class(y)) => x.same_class(y),
        (Type::Object(x), Type::Object(y)) => x == y,
        (Type::Fused(x), Type::Fused(y)) => {
            x.name == y.name
                && x.alternatives.len() == y.alternatives.len()
                && x.alternatives.iter().zip(&y.alternatives).all(|(p, q)| same_as(p, q))
        }
        _ => false,
    }
}

/// Whether a value of type `src` may be stored in a location of type `dst`
/// at the C level, possibly through an implicit conversion.
pub fn assignable_from(dst: &Type, src: &Type) -> bool {
    let (dst, src) = (dst.resolve(), src.resolve());
    if dst.is_error() || src.is_error() {
        return true;
    }
    if let Type::Const(base) = dst {
        return assignable_from(base, src);
    }
    if let Type::Const(base) = src {
        if !matches!(dst, Type::Pointer(_)) {
            return assignable_from(dst, base);
        }
    }
    match dst {
        Type::Numeric(d) => match src.strip() {
            Type::Numeric(s) => d.complex || !s.complex,
            _ => false,
        },
        Type::Pointer(dbase) => pointer_assignable(dbase, src),
        Type::Array { .. } => same_as(dst, src),
        Type::Reference(base) => same_as(base, src),
        Type::Fused(f) => f.alternatives.iter().any(|alt| assignable_from(alt, src)),
        Type::Function(_) | Type::Struct(_) => same_as(dst, src),
        Type::Class(d) => match src.strip() {
            Type::Class(s) => s.is_subclass_of(d),
            _ => false,
        },
        Type::Object(None) => match src.strip() {
            Type::Object(_) | Type::Class(_) | Type::Numeric(_) => true,
            Type::Pointer(_) => src.is_c_string(),
            _ => false,
        },
        Type::Object(Some(b)) => match src.strip() {
            Type::Object(s) => s.is_none() || *s == Some(*b),
            Type::Numeric(n) => match b {
                Builtin::Int => n.is_int(),
                Builtin::Float => !n.complex,
                Builtin::Bool => n.is_bint(),
                _ => false,
            },
            Type::Pointer(_) => *b == Builtin::Bytes && src.is_c_string(),
            _ => false,
        },
        Type::Void | Type::Error | Type::Const(_) | Type::Typedef { .. } => false,
    }
}

fn pointer_assignable(dbase: &TypeRef, src: &Type) -> bool {
    match src.strip() {
        Type::Pointer(sbase) => {
            if dbase.is_void() || sbase.is_void() {
                return true;
            }
            if same_as(dbase, sbase) {
                return true;
            }
            // Adding `const` to the pointee is allowed, removing it is not.
            match dbase.resolve() {
                Type::Const(inner) => same_as(inner, sbase.strip()),
                _ => false,
            }
        }
        Type::Array { base, .. } => same_as(dbase.strip(), base.strip()) || dbase.is_void(),
        Type::Function(_) => same_as(dbase, src),
        _ => false,
    }
}

/// Nearest common ancestor of two extension types. Returns the generic
/// object type once the chains only meet outside this module's knowledge.
pub fn widest_extension_type(a: &TypeRef, b: &TypeRef) -> TypeRef {
    let (Some(ca), Some(cb)) = (a.as_class(), b.as_class()) else {
        return Type::object();
    };
    if ca.is_external || cb.is_external {
        if ca.same_class(cb) {
            return a.clone();
        }
        return Type::object();
    }
    let mut ancestors: Vec<TypeRef> = Vec::new();
    let mut cur = Some(a.clone());
    while let Some(t) = cur {
        ancestors.push(t.clone());
        cur = t.as_class().and_then(|c| c.base.clone());
    }
    let mut cur = Some(b.clone());
    while let Some(t) = cur {
        if let Some(c) = t.as_class() {
            if ancestors.iter().any(|x| x.as_class().is_some_and(|y| y.same_class(c))) {
                return t;
            }
            cur = c.base.clone();
        } else {
            break;
        }
    }
    Type::object()
}

/// A type that can hold values of both `a` and `b`, preferring C types.
pub fn spanning_type(a: &TypeRef, b: &TypeRef) -> TypeRef {
    let result = raw_spanning_type(a, b);
    if result.is_error() {
        return Type::object();
    }
    result
}

/// Like [`spanning_type`], but never merges `bint` with another numeric type:
/// the merged C integer could not coerce back to a Python `bool`.
pub fn independent_spanning_type(a: &TypeRef, b: &TypeRef) -> TypeRef {
    if same_as(a, b) {
        return a.clone();
    }
    if (a.is_bint() && b.is_numeric()) || (b.is_bint() && a.is_numeric()) {
        return Type::object();
    }
    raw_spanning_type(a, b)
}

fn raw_spanning_type(a: &TypeRef, b: &TypeRef) -> TypeRef {
    if a.is_error() || b.is_error() {
        return Type::error();
    }
    if same_as(a, b) {
        return a.clone();
    }
    if a.is_generic_object() || b.is_generic_object() {
        return Type::object();
    }
    if let (Some(x), Some(y)) = (a.as_numeric(), b.as_numeric()) {
        return Type::numeric(widest_numeric_type(x, y));
    }
    if a.is_builtin(Builtin::Float) && b.is_numeric() {
        return spanning_type(&Type::c_double(), b);
    }
    if b.is_builtin(Builtin::Float) && a.is_numeric() {
        return spanning_type(a, &Type::c_double());
    }
    if a.is_extension_type() && b.is_extension_type() {
        return widest_extension_type(a, b);
    }
    if a.is_pyobject() || b.is_pyobject() {
        if a.is_pyobject() && assignable_from(a, b) {
            return a.clone();
        }
        if b.is_pyobject() && assignable_from(b, a) {
            return b.clone();
        }
        return Type::object();
    }
    if a.is_ptr() && b.is_ptr() {
        if assignable_from(a, b) && !a.is_void_ptr() {
            return a.clone();
        }
        if assignable_from(b, a) && !b.is_void_ptr() {
            return b.clone();
        }
        return Type::pointer(Type::void());
    }
    if assignable_from(a, b) {
        return a.clone();
    }
    if assignable_from(b, a) {
        return b.clone();
    }
    Type::error()
}

/// Number of inheritance steps from `src` up to `dst`, for overload scoring.
pub(crate) fn subclass_distance(dst: &ClassType, src: &ClassType) -> Option<usize> {
    src.distance_to(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NumericType;

    #[test]
    fn bint_and_int_do_not_collapse_independently() {
        let r = independent_spanning_type(&Type::bint(), &Type::c_int());
        assert!(r.is_generic_object());
        let r = spanning_type(&Type::bint(), &Type::c_int());
        assert!(r.same_as(&Type::c_int()));
    }

    #[test]
    fn pointers_meet_at_void() {
        let a = Type::pointer(Type::c_int());
        let b = Type::pointer(Type::c_double());
        assert!(spanning_type(&a, &b).is_void_ptr());
        assert!(assignable_from(&Type::pointer(Type::void()), &a));
        assert!(assignable_from(&a, &Type::pointer(Type::void())));
    }

    #[test]
    fn complex_accepts_real() {
        let c = Type::numeric(NumericType::complex_of(NumericType::c_double()));
        assert!(assignable_from(&c, &Type::c_int()));
        assert!(!assignable_from(&Type::c_double(), &c));
    }
}

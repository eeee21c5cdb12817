//! Substitution of fused placeholders by concrete types.

use super::declarator::DeclOptions;
use super::{FuncParam, FunctionType, Type, TypeRef};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::trace;

/// Fused type name to the concrete alternative chosen for it.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    map: BTreeMap<String, TypeRef>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&TypeRef> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn insert(&mut self, name: impl Into<String>, ty: TypeRef) {
        self.map.insert(name.into(), ty);
    }

    /// Adds every binding of `other`. Returns the conflicting name if both
    /// bind it to different types.
    pub fn merge(&mut self, other: Substitution) -> Result<(), String> {
        for (name, ty) in other.map {
            match self.map.get(&name) {
                Some(existing) if !existing.same_as(&ty) => return Err(name),
                Some(_) => {}
                None => {
                    self.map.insert(name, ty);
                }
            }
        }
        Ok(())
    }

    /// Stable text identifying this substitution.
    pub fn key(&self) -> String {
        self.map
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.declaration_code("", &DeclOptions::display())))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Identifier fragment appended to specialized C names.
    pub fn cname_suffix(&self) -> String {
        let parts: Vec<String> = self
            .map
            .values()
            .map(|t| {
                t.declaration_code("", &DeclOptions::display())
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect()
            })
            .collect();
        format!("__fuse_{}", parts.join("__"))
    }
}

/// Produces and caches specialized types. Asking twice for the same type
/// under the same substitution returns the same `Rc`.
#[derive(Debug, Default)]
pub struct Specializer {
    cache: HashMap<String, TypeRef>,
}

impl Specializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn specialize(&mut self, ty: &TypeRef, subs: &Substitution) -> TypeRef {
        if !ty.contains_fused() {
            return ty.clone();
        }
        let key = format!("{}|{}", ty.declaration_code("", &DeclOptions::display()), subs.key());
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let result = substitute(ty, subs);
        trace!(%key, result = %result, "specialized type");
        self.cache.insert(key, result.clone());
        result
    }
}

fn substitute(ty: &TypeRef, subs: &Substitution) -> TypeRef {
    if !ty.contains_fused() {
        return ty.clone();
    }
    match ty.as_ref() {
        Type::Fused(f) => match subs.get(&f.name) {
            Some(concrete) => concrete.clone(),
            None => ty.clone(),
        },
        Type::Pointer(b) => Type::pointer(substitute(b, subs)),
        Type::Reference(b) => Rc::new(Type::Reference(substitute(b, subs))),
        Type::Const(b) => Type::constant(substitute(b, subs)),
        Type::Array { base, size } => Type::array(substitute(base, subs), *size),
        Type::Typedef { name, cname, base } => Rc::new(Type::Typedef {
            name: name.clone(),
            cname: cname.clone(),
            base: substitute(base, subs),
        }),
        Type::Function(f) => Type::function(FunctionType {
            return_type: substitute(&f.return_type, subs),
            params: f
                .params
                .iter()
                .map(|p| FuncParam { ty: substitute(&p.ty, subs), ..p.clone() })
                .collect(),
            ..f.clone()
        }),
        _ => ty.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FusedType;

    fn number() -> TypeRef {
        Rc::new(Type::Fused(FusedType {
            name: "number".into(),
            alternatives: vec![Type::c_int(), Type::c_double()],
        }))
    }

    #[test]
    fn repeated_requests_share_representation() {
        let f = Type::function(FunctionType::new(number(), vec![FuncParam::new("x", number())]));
        let mut subs = Substitution::new();
        subs.insert("number", Type::c_double());
        let mut spec = Specializer::new();
        let a = spec.specialize(&f, &subs);
        let b = spec.specialize(&f, &subs);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!a.contains_fused());
        assert_eq!(a.to_string(), "double (double)");
        assert_eq!(spec.cached_count(), 1);
    }

    #[test]
    fn merge_detects_conflicts() {
        let mut a = Substitution::new();
        a.insert("T", Type::c_int());
        let mut b = Substitution::new();
        b.insert("T", Type::c_double());
        assert_eq!(a.merge(b), Err("T".to_string()));
    }
}

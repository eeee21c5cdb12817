//! Overload resolution for C-level function calls.
//!
//! Every viable candidate gets a [`Score`]; bands are compared
//! lexicographically, most significant first. The lowest score wins and a
//! tie for the lowest score is an ambiguity.

use super::compat::subclass_distance;
use super::declarator::DeclOptions;
use super::numeric::{is_promotion, rank_distance};
use super::specialize::{Specializer, Substitution};
use super::{FunctionType, Type, TypeRef};
use thiserror::Error;
use tracing::debug;

/// One function an overloaded name may refer to.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub cname: String,
    pub ty: TypeRef,
}

impl Candidate {
    pub fn new(name: impl Into<String>, cname: impl Into<String>, ty: TypeRef) -> Self {
        Self { name: name.into(), cname: cname.into(), ty }
    }

    pub fn signature(&self) -> String {
        self.ty.declaration_code(&self.name, &DeclOptions::display())
    }
}

/// Conversion cost of a call, field order is significance order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Score {
    /// Python object to a more specific object type (runtime checked).
    pub object_conversions: u32,
    /// C value to Python object or back.
    pub native_conversions: u32,
    /// Promotions count 1; other numeric conversions their rank distance + 1.
    pub numeric: u32,
    pub void_pointer: u32,
    pub pointer: u32,
    /// Inheritance steps between an argument's class and the parameter's.
    pub subclass: u32,
}

impl Score {
    pub fn is_exact(&self) -> bool {
        *self == Score::default()
    }

    fn add(&mut self, other: Score) {
        self.object_conversions += other.object_conversions;
        self.native_conversions += other.native_conversions;
        self.numeric += other.numeric;
        self.void_pointer += other.void_pointer;
        self.pointer += other.pointer;
        self.subclass += other.subclass;
    }
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    /// The winning candidate; specialized if it was generic.
    pub candidate: Candidate,
    /// Position of the winner in the candidate list.
    pub index: usize,
    pub score: Score,
    pub signature: FunctionType,
    /// Per argument, the parameter type it must be coerced to, if any.
    pub coercions: Vec<Option<TypeRef>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub candidate: String,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
pub enum OverloadError {
    #[error("no suitable method found for call to '{name}'")]
    NoMatch { name: String, rejections: Vec<Rejection> },

    #[error("ambiguous overloaded method '{name}'")]
    Ambiguous { name: String, candidates: Vec<String> },
}

impl OverloadError {
    /// Signatures to list under the diagnostic.
    pub fn notes(&self) -> Vec<String> {
        match self {
            OverloadError::NoMatch { rejections, .. } => rejections
                .iter()
                .map(|r| format!("candidate '{}': {}", r.candidate, r.reason))
                .collect(),
            OverloadError::Ambiguous { candidates, .. } => {
                candidates.iter().map(|c| format!("candidate: {}", c)).collect()
            }
        }
    }
}

pub fn best_match(
    args: &[TypeRef],
    candidates: &[Candidate],
    specializer: &mut Specializer,
) -> Result<MatchResult, OverloadError> {
    let name = candidates.first().map(|c| c.name.clone()).unwrap_or_default();
    let mut viable: Vec<MatchResult> = Vec::new();
    let mut rejections = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        match evaluate(args, candidate, index, specializer) {
            Ok(found) => viable.push(found),
            Err(reason) => rejections.push(Rejection { candidate: candidate.signature(), reason }),
        }
    }

    if viable.is_empty() {
        return Err(OverloadError::NoMatch { name, rejections });
    }

    viable.sort_by(|a, b| a.score.cmp(&b.score).then(a.index.cmp(&b.index)));
    let best = viable[0].score;
    if viable.len() > 1 && viable[1].score == best {
        let mut tied: Vec<String> = viable
            .iter()
            .take_while(|m| m.score == best)
            .map(|m| m.candidate.signature())
            .collect();
        tied.sort();
        debug!(%name, count = tied.len(), "ambiguous overload");
        return Err(OverloadError::Ambiguous { name, candidates: tied });
    }
    let winner = viable.swap_remove(0);
    debug!(%name, cname = %winner.candidate.cname, score = ?winner.score, "resolved overload");
    Ok(winner)
}

fn evaluate(
    args: &[TypeRef],
    candidate: &Candidate,
    index: usize,
    specializer: &mut Specializer,
) -> Result<MatchResult, String> {
    let Some(func) = candidate.ty.as_function() else {
        return Err(format!("'{}' is not callable", candidate.ty));
    };
    if !func.accepts_arg_count(args.len()) {
        let expected = if func.variadic {
            format!("at least {}", func.required_arg_count())
        } else if func.required_arg_count() == func.params.len() {
            func.params.len().to_string()
        } else {
            format!("{} to {}", func.required_arg_count(), func.params.len())
        };
        return Err(format!(
            "call with wrong number of arguments (expected {}, got {})",
            expected,
            args.len()
        ));
    }

    let mut fused = Vec::new();
    candidate.ty.fused_names(&mut fused);
    let chosen = if fused.is_empty() {
        candidate.clone()
    } else {
        let mut subs = Substitution::new();
        for (param, arg) in func.params.iter().zip(args) {
            let found = deduce(&param.ty, arg)?;
            subs.merge(found)
                .map_err(|n| format!("conflicting types deduced for '{}'", n))?;
        }
        if let Some(missing) = fused.iter().find(|n| !subs.contains(n)) {
            return Err(format!("unable to deduce type parameter '{}'", missing));
        }
        Candidate {
            name: candidate.name.clone(),
            cname: format!("{}{}", candidate.cname, subs.cname_suffix()),
            ty: specializer.specialize(&candidate.ty, &subs),
        }
    };
    let Some(signature) = chosen.ty.as_function().cloned() else {
        return Err(format!("'{}' is not callable", chosen.ty));
    };

    let mut score = Score::default();
    let mut coercions = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let Some(param) = signature.params.get(i) else {
            // Extra variadic arguments are passed through unconverted.
            coercions.push(None);
            continue;
        };
        let (s, coercion) = score_argument(&param.ty, arg, signature.strict_signature)?;
        score.add(s);
        coercions.push(coercion);
    }
    Ok(MatchResult { candidate: chosen, index, score, signature, coercions })
}

/// Finds the alternative each fused placeholder in `pattern` takes for an
/// argument of type `actual`.
fn deduce(pattern: &TypeRef, actual: &TypeRef) -> Result<Substitution, String> {
    let mut subs = Substitution::new();
    match pattern.resolve() {
        Type::Fused(f) => {
            let pick = f
                .alternatives
                .iter()
                .find(|alt| alt.same_as(actual))
                .or_else(|| f.alternatives.iter().find(|alt| alt.assignable_from(actual)));
            match pick {
                Some(alt) => subs.insert(f.name.clone(), alt.clone()),
                None => {
                    return Err(format!("no alternative of '{}' accepts '{}'", f.name, actual));
                }
            }
        }
        Type::Pointer(base) | Type::Array { base, .. } => {
            if let Some(elem) = actual.element_type() {
                return deduce(base, elem);
            }
        }
        Type::Const(base) | Type::Reference(base) => return deduce(base, actual),
        _ => {}
    }
    Ok(subs)
}

fn invalid(dst: &TypeRef, src: &TypeRef) -> String {
    format!("invalid conversion from '{}' to '{}'", src, dst)
}

fn score_argument(dst: &TypeRef, src: &TypeRef, strict: bool) -> Result<(Score, Option<TypeRef>), String> {
    let mut score = Score::default();
    if dst.same_as(src) {
        return Ok((score, None));
    }
    if strict {
        return Err(invalid(dst, src));
    }

    let mut src = src.clone();
    let mut coercion = None;
    if !dst.assignable_from(&src) {
        if src.is_pyobject() && !dst.is_pyobject() {
            let default_ctype = src.builtin_kind().and_then(|b| b.default_coerced_ctype());
            match default_ctype {
                Some(ctype) if dst.assignable_from(&ctype) => {
                    coercion = Some(dst.clone());
                    src = ctype;
                    if dst.same_as(&src) {
                        return Ok((score, coercion));
                    }
                }
                _ if dst.is_numeric() || dst.is_c_string() => {
                    score.native_conversions += 1;
                    return Ok((score, Some(dst.clone())));
                }
                _ => return Err(invalid(dst, &src)),
            }
        } else if src.is_generic_object() && dst.is_pyobject() {
            score.object_conversions += 1;
            return Ok((score, Some(dst.clone())));
        } else {
            return Err(invalid(dst, &src));
        }
    }

    if src.is_pyobject() {
        match (dst.as_class(), src.as_class()) {
            (Some(d), Some(s)) => {
                let steps = subclass_distance(d, s).unwrap_or(0);
                score.subclass += u32::try_from(steps).unwrap_or(u32::MAX);
            }
            _ => score.object_conversions += 1,
        }
    } else if dst.is_pyobject() {
        score.native_conversions += 1;
        coercion = Some(dst.clone());
    } else if let (Some(d), Some(s)) = (dst.as_numeric(), src.as_numeric()) {
        if is_promotion(s, d) {
            score.numeric += 1;
        } else {
            score.numeric += rank_distance(s, d) + 1;
            if d.complex != s.complex {
                score.numeric += 1;
            }
        }
    } else if dst.is_void_ptr() {
        score.void_pointer += 1;
    } else {
        score.pointer += 1;
    }
    Ok((score, coercion))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FuncParam, NumericKind, NumericType};

    fn unary(ret: TypeRef, arg: TypeRef) -> TypeRef {
        Type::function(FunctionType::new(ret, vec![FuncParam::new("x", arg)]))
    }

    #[test]
    fn object_argument_prefers_object_parameter() {
        let cands = vec![
            Candidate::new("f", "f_int", unary(Type::void(), Type::c_int())),
            Candidate::new("f", "f_obj", unary(Type::void(), Type::object())),
        ];
        let mut spec = Specializer::new();
        let m = best_match(&[Type::object()], &cands, &mut spec).expect("resolves");
        assert_eq!(m.candidate.cname, "f_obj");
    }

    #[test]
    fn narrowing_costs_more_than_promotion() {
        let short = Type::numeric(NumericType::signed(NumericKind::Short));
        let (promo, _) = score_argument(&Type::c_int(), &short, false).expect("viable");
        let (narrow, _) = score_argument(&short, &Type::c_long(), false).expect("viable");
        assert!(promo < narrow);
    }
}

//! C declarator synthesis.
//!
//! A declarator grows outward from the entity name: pointers wrap it on the
//! left, arrays and parameter lists on the right. Postfix operators bind
//! tighter than `*`, so applying one to a pointer-rooted declarator needs
//! parentheses: `int (*fp)(int)`, `double (*rows)[4]`.

use super::{Type, TypeRef};

/// Rendering options for [`Type::declaration_code`].
#[derive(Debug, Clone, Default)]
pub struct DeclOptions {
    /// Render the source-language spelling used in diagnostics.
    pub for_display: bool,
    /// Wrap the base type in a linkage macro, e.g. `DL_EXPORT(int) f(void)`.
    pub dll_linkage: Option<String>,
    /// Source-language declaration syntax (`const int`, `object`).
    pub pyrex: bool,
}

impl DeclOptions {
    pub fn code() -> Self {
        Self::default()
    }

    pub fn display() -> Self {
        Self { for_display: true, ..Self::default() }
    }

    pub fn with_linkage(linkage: impl Into<String>) -> Self {
        Self { dll_linkage: Some(linkage.into()), ..Self::default() }
    }

    fn source_syntax(&self) -> bool {
        self.for_display || self.pyrex
    }
}

/// How tightly the outermost operator of a declarator binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    /// A bare name or nothing.
    Atom,
    /// `*`, `&` and qualifiers to the left.
    Prefix,
    /// `[]` and `()` to the right.
    Postfix,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    text: String,
    precedence: Precedence,
}

impl Declarator {
    pub fn name(entity: &str) -> Self {
        Self { text: entity.to_string(), precedence: Precedence::Atom }
    }

    pub fn prefix(self, op: &str) -> Self {
        Self { text: format!("{}{}", op, self.text), precedence: Precedence::Prefix }
    }

    pub fn postfix(self, op: &str) -> Self {
        let inner = if self.precedence == Precedence::Prefix {
            format!("({})", self.text)
        } else {
            self.text
        };
        Self { text: format!("{}{}", inner, op), precedence: Precedence::Postfix }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl Type {
    /// Declares `entity` with this type. An empty entity gives the abstract
    /// declarator used in casts.
    pub fn declaration_code(&self, entity: &str, opts: &DeclOptions) -> String {
        build(self, Declarator::name(entity), opts)
    }
}

fn join(base: String, decl: &Declarator) -> String {
    if decl.is_empty() {
        base
    } else {
        format!("{} {}", base, decl.text())
    }
}

fn base_text(name: String, opts: &DeclOptions) -> String {
    match &opts.dll_linkage {
        Some(link) if !opts.source_syntax() => format!("{}({})", link, name),
        _ => name,
    }
}

fn build(ty: &Type, decl: Declarator, opts: &DeclOptions) -> String {
    match ty {
        Type::Pointer(base) => build(base, decl.prefix("*"), opts),
        Type::Reference(base) => build(base, decl.prefix("&"), opts),
        Type::Const(base) => build_const(base, decl, opts),
        Type::Array { base, size } => {
            let dim = size.map(|n| n.to_string()).unwrap_or_default();
            build(base, decl.postfix(&format!("[{}]", dim)), opts)
        }
        Type::Function(f) => {
            let mut args: Vec<String> = f
                .params
                .iter()
                .map(|p| {
                    if opts.for_display && p.is_optional() {
                        format!("{} = *", p.ty.declaration_code("", opts))
                    } else {
                        p.ty.declaration_code("", opts)
                    }
                })
                .collect();
            if f.variadic {
                args.push("...".to_string());
            }
            if args.is_empty() && !opts.source_syntax() {
                args.push("void".to_string());
            }
            let mut trailer = String::new();
            if opts.for_display {
                trailer.push_str(&f.exception_display());
                if f.nogil {
                    trailer.push_str(" nogil");
                }
            }
            let cc = f.calling_convention.keyword();
            let decl = if cc.is_empty() {
                decl
            } else if decl.precedence() == Precedence::Prefix {
                // `int (__stdcall *f)(int)`
                Declarator::name(format!("{} {}", cc, decl.text()).trim_end()).prefix("")
            } else {
                Declarator::name(format!("{} {}", cc, decl.text()).trim_end())
            };
            let decl = decl.postfix(&format!("({}){}", args.join(", "), trailer));
            build(&f.return_type, decl, opts)
        }
        Type::Class(c) => {
            if opts.source_syntax() {
                join(base_text(c.name.clone(), opts), &decl)
            } else {
                let decl = decl.prefix("*");
                join(base_text(format!("struct {}", c.objstruct_cname()), opts), &decl)
            }
        }
        Type::Object(b) => {
            if opts.source_syntax() {
                let name = b.map(|b| b.name()).unwrap_or("object");
                join(base_text(name.to_string(), opts), &decl)
            } else {
                join(base_text("PyObject".to_string(), opts), &decl.prefix("*"))
            }
        }
        Type::Struct(s) => {
            let name = if opts.source_syntax() {
                s.name.clone()
            } else if s.typedef_flag {
                s.cname.clone()
            } else {
                format!("{} {}", s.kind.keyword(), s.cname)
            };
            join(base_text(name, opts), &decl)
        }
        Type::Typedef { name, cname, .. } => {
            let name = if opts.source_syntax() { name.clone() } else { cname.clone() };
            join(base_text(name, opts), &decl)
        }
        Type::Numeric(n) => {
            let name = if opts.source_syntax() { n.display_name() } else { n.c_name() };
            join(base_text(name, opts), &decl)
        }
        Type::Fused(f) => join(base_text(f.name.clone(), opts), &decl),
        Type::Void => join(base_text("void".to_string(), opts), &decl),
        Type::Error => join("<error>".to_string(), &decl),
    }
}

fn build_const(base: &TypeRef, decl: Declarator, opts: &DeclOptions) -> String {
    match base.as_ref() {
        // A const array is an array of const elements.
        Type::Array { base: elem, size } => {
            let elem = Type::constant(elem.clone());
            build(&Type::Array { base: elem, size: *size }, decl, opts)
        }
        Type::Function(_) => build(base, decl, opts),
        _ if opts.source_syntax() => format!("const {}", build(base, decl, opts)),
        Type::Pointer(_) | Type::Reference(_) => build(base, decl.prefix("const "), opts),
        _ if decl.is_empty() => format!("{} const", build(base, decl, opts)),
        _ => build(base, decl.prefix("const ").flatten_prefix(), opts),
    }
}

impl Declarator {
    /// A qualifier directly on a base type does not need to bind as a
    /// pointer would, so postfix operators applied later stay unparenthesized.
    fn flatten_prefix(self) -> Self {
        Self { precedence: Precedence::Atom, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FuncParam, FunctionType};

    #[test]
    fn pointer_to_function_is_parenthesized() {
        let f = Type::function(FunctionType::new(Type::c_int(), vec![FuncParam::new("x", Type::c_double())]));
        let fp = Type::pointer(f);
        assert_eq!(fp.declaration_code("cb", &DeclOptions::code()), "int (*cb)(double)");
        assert_eq!(fp.empty_declaration_code(), "int (*)(double)");
    }

    #[test]
    fn array_of_pointers_is_not_parenthesized() {
        let t = Type::array(Type::pointer(Type::c_int()), Some(3));
        assert_eq!(t.declaration_code("a", &DeclOptions::code()), "int *a[3]");
        let p = Type::pointer(Type::array(Type::c_int(), Some(3)));
        assert_eq!(p.declaration_code("a", &DeclOptions::code()), "int (*a)[3]");
    }

    #[test]
    fn object_and_const_spellings() {
        assert_eq!(Type::object().declaration_code("o", &DeclOptions::code()), "PyObject *o");
        assert_eq!(Type::object().to_string(), "object");
        let cp = Type::pointer(Type::constant(Type::c_char()));
        assert_eq!(cp.declaration_code("s", &DeclOptions::code()), "char const *s");
        assert_eq!(cp.to_string(), "const char *");
    }

    #[test]
    fn linkage_wraps_base() {
        let f = Type::function(FunctionType::new(Type::c_int(), vec![]));
        assert_eq!(f.declaration_code("f", &DeclOptions::with_linkage("DL_EXPORT")), "DL_EXPORT(int) f(void)");
    }
}

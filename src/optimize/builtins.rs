//! Specializes calls to well-known builtins.
//!
//! A call is only rewritten when its callee is the unshadowed builtin and
//! the argument types make the cheaper form equivalent.

use super::{retype, Pass, TempAllocator};
use crate::ast::visit::{self, Transform};
use crate::ast::{
    build, BinOp, BuiltinFn, CmpOp, CompKind, Expr, ExprKind, Module, Pos, Stmt, StmtKind, TempId, UnaryOp,
};
use crate::semantic::{EntryKind, SymbolTable};
use crate::types::{widest_numeric_type, Builtin, NumericType, Type, TypeRef};
use tracing::debug;

pub struct BuiltinCalls;

impl Pass for BuiltinCalls {
    fn name(&self) -> &'static str {
        "builtin-calls"
    }

    fn run(&self, module: Module, symbols: &SymbolTable) -> Module {
        let mut rewriter = Rewriter {
            symbols,
            temps: TempAllocator::new(&module),
            rewritten: 0,
        };
        let mut module = visit::transform_module(&mut rewriter, module);
        debug!(rewritten = rewriter.rewritten, "builtin call specialization finished");
        rewriter.temps.finish(&mut module);
        module
    }
}

struct Rewriter<'a> {
    symbols: &'a SymbolTable,
    temps: TempAllocator,
    rewritten: usize,
}

impl Transform for Rewriter<'_> {
    fn transform_expr(&mut self, expr: Expr) -> Expr {
        let expr = visit::walk_expr(self, expr);
        self.rewrite_call(expr)
    }
}

/// The pieces of a generator expression argument.
struct GenParts {
    target: Expr,
    iter: Expr,
    condition: Option<Expr>,
    element: Expr,
}

fn is_generator(args: &[Expr]) -> bool {
    matches!(args, [Expr { kind: ExprKind::Generator { .. }, .. }])
}

fn into_generator(mut args: Vec<Expr>) -> Option<GenParts> {
    match args.pop()?.kind {
        ExprKind::Generator { target, iter, condition, element } => Some(GenParts {
            target: *target,
            iter: *iter,
            condition: condition.map(|c| *c),
            element: *element,
        }),
        _ => None,
    }
}

/// C numeric that is not complex.
fn is_c_real(ty: &Type) -> bool {
    ty.is_numeric() && !ty.is_complex()
}

fn is_unsigned_int(ty: &Type) -> bool {
    ty.as_numeric().is_some_and(|n| n.is_int() && !n.is_signed())
}

fn len_function(ty: &Type) -> Option<BuiltinFn> {
    if ty.is_c_string() {
        return Some(BuiltinFn::CStrLen);
    }
    match ty.builtin_kind()? {
        Builtin::List => Some(BuiltinFn::ListSize),
        Builtin::Tuple => Some(BuiltinFn::TupleSize),
        Builtin::Bytes => Some(BuiltinFn::BytesSize),
        Builtin::Str => Some(BuiltinFn::UnicodeLength),
        Builtin::Dict => Some(BuiltinFn::DictSize),
        Builtin::Set => Some(BuiltinFn::SetSize),
        _ => None,
    }
}

/// Type `sum()` accumulates in. Python adds bools as integers and never
/// wraps, so integers widen to at least `Py_ssize_t` and floats to `double`.
fn sum_accumulator(element: &Type) -> TypeRef {
    let floor = match element.as_numeric() {
        Some(n) if n.is_float() => NumericType::c_double(),
        _ => NumericType::py_ssize_t(),
    };
    match element.as_numeric() {
        Some(n) if !n.is_bint() => Type::numeric(widest_numeric_type(floor, n)),
        _ => Type::numeric(floor),
    }
}

impl Rewriter<'_> {
    fn rewrite_call(&mut self, expr: Expr) -> Expr {
        let builtin = match &expr.kind {
            ExprKind::Call { func, .. } => match &func.kind {
                ExprKind::Name { name, entry } if self.symbols.is_builtin_named(*entry, name) => Some(name.clone()),
                _ => None,
            },
            _ => None,
        };
        let Some(builtin) = builtin else {
            return expr;
        };
        let Expr { kind, ty, pos, constant } = expr;
        let ExprKind::Call { func, args } = kind else {
            return Expr { kind, ty, pos, constant };
        };
        if !self.applies(&builtin, &args) {
            return Expr { kind: ExprKind::Call { func, args }, ty, pos, constant };
        }
        let Some(replacement) = self.specialize(&builtin, args.clone(), pos) else {
            return Expr { kind: ExprKind::Call { func, args }, ty, pos, constant };
        };
        self.rewritten += 1;
        debug!(line = pos.line, builtin = %builtin, "specialized builtin call");
        retype(replacement, &ty)
    }

    /// Whether `specialize` will succeed for these arguments.
    fn applies(&self, builtin: &str, args: &[Expr]) -> bool {
        match builtin {
            "len" => args.len() == 1 && len_function(&args[0].ty).is_some(),
            "list" | "set" | "tuple" | "sorted" | "any" | "all" => is_generator(args),
            "sum" => {
                is_generator(args)
                    && matches!(&args[0].kind, ExprKind::Generator { element, .. } if is_c_real(&element.ty))
            }
            "abs" | "float" | "bool" => args.len() == 1 && is_c_real(&args[0].ty),
            "isinstance" => match args {
                [obj, Expr { kind: ExprKind::Name { entry, .. }, .. }] => {
                    obj.ty.is_pyobject()
                        && self
                            .symbols
                            .get(*entry)
                            .is_some_and(|e| e.kind == EntryKind::Type && e.ty.is_extension_type())
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn specialize(&mut self, builtin: &str, mut args: Vec<Expr>, pos: Pos) -> Option<Expr> {
        let expr = match builtin {
            "len" => {
                let func = len_function(&args[0].ty)?;
                Expr::new(ExprKind::BuiltinCall { func, args }, Type::py_ssize_t(), pos)
            }
            "list" => self.comprehension(CompKind::List, into_generator(args)?, pos),
            "set" => self.comprehension(CompKind::Set, into_generator(args)?, pos),
            "tuple" => {
                let list = self.comprehension(CompKind::List, into_generator(args)?, pos);
                Expr::new(
                    ExprKind::BuiltinCall { func: BuiltinFn::ListAsTuple, args: vec![list] },
                    Type::builtin(Builtin::Tuple),
                    pos,
                )
            }
            "sorted" => self.sorted(into_generator(args)?, pos),
            "sum" => self.sum(into_generator(args)?, pos),
            "any" => self.any_all(into_generator(args)?, true, pos),
            "all" => self.any_all(into_generator(args)?, false, pos),
            "abs" => {
                let arg = args.pop()?;
                if is_unsigned_int(&arg.ty) {
                    return Some(arg);
                }
                let ty = arg.ty.clone();
                Expr::new(ExprKind::BuiltinCall { func: BuiltinFn::CAbs, args: vec![arg] }, ty, pos)
            }
            "float" => build::coerce(args.pop()?, Type::c_double()).at(pos),
            "bool" => {
                let arg = args.pop()?;
                let zero = build::int_typed(0, arg.ty.clone());
                build::compare(arg, CmpOp::Ne, zero).at(pos)
            }
            "isinstance" => {
                let class = args.pop()?;
                let obj = args.pop()?;
                let class_ty = match &class.kind {
                    ExprKind::Name { entry, .. } => self.symbols.get(*entry)?.ty.clone(),
                    _ => return None,
                };
                Expr::new(
                    ExprKind::TypeTest { expr: Box::new(obj), class: class_ty },
                    Type::bint(),
                    pos,
                )
            }
            _ => return None,
        };
        Some(expr)
    }

    /// `for target in iter: [if condition:] <inner>`
    fn generator_loop(target: Expr, iter: Expr, condition: Option<Expr>, inner: Vec<Stmt>, pos: Pos) -> Stmt {
        let body = match condition {
            Some(c) => vec![build::if_else(c, inner, None)],
            None => inner,
        };
        build::for_in(target, iter, body, None).at(pos)
    }

    fn comprehension(&mut self, kind: CompKind, parts: GenParts, pos: Pos) -> Expr {
        let result = self.temps.fresh();
        let append = Stmt::new(
            StmtKind::ComprehensionAppend { kind, result, key: None, value: parts.element },
            pos,
        );
        let body = Self::generator_loop(parts.target, parts.iter, parts.condition, vec![append], pos);
        let ty = match kind {
            CompKind::List => Type::builtin(Builtin::List),
            CompKind::Set => Type::builtin(Builtin::Set),
            CompKind::Dict => Type::builtin(Builtin::Dict),
        };
        Expr::new(ExprKind::Comprehension { kind, result, body: Box::new(body) }, ty, pos)
    }

    fn stat_result(result: TempId, body: Vec<Stmt>, ty: TypeRef, pos: Pos) -> Expr {
        Expr::new(
            ExprKind::StatResult { result, body: Box::new(build::block(body).at(pos)) },
            ty,
            pos,
        )
    }

    fn sorted(&mut self, parts: GenParts, pos: Pos) -> Expr {
        let list = self.comprehension(CompKind::List, parts, pos);
        let ty = list.ty.clone();
        let result = self.temps.fresh();
        let sort = Expr::new(
            ExprKind::BuiltinCall { func: BuiltinFn::ListSort, args: vec![build::temp(result, ty.clone())] },
            Type::c_int(),
            pos,
        );
        let body = vec![build::let_temp(result, ty.clone(), Some(list)), build::expr_stmt(sort)];
        Self::stat_result(result, body, ty, pos)
    }

    fn sum(&mut self, parts: GenParts, pos: Pos) -> Expr {
        let ty = sum_accumulator(&parts.element.ty);
        let acc = self.temps.fresh();
        let element = retype(parts.element, &ty);
        let add = build::aug_assign(build::temp(acc, ty.clone()), BinOp::Add, element);
        let body = vec![
            build::let_temp(acc, ty.clone(), Some(build::int_typed(0, ty.clone()))),
            Self::generator_loop(parts.target, parts.iter, parts.condition, vec![add], pos),
        ];
        Self::stat_result(acc, body, ty, pos)
    }

    /// `any` stops at the first true element, `all` at the first false one.
    fn any_all(&mut self, parts: GenParts, is_any: bool, pos: Pos) -> Expr {
        let acc = self.temps.fresh();
        let test = if is_any {
            parts.element
        } else {
            build::unary(UnaryOp::Not, parts.element, Type::bint())
        };
        let hit = build::if_else(
            test,
            vec![build::assign(build::temp(acc, Type::bint()), build::boolean(is_any)), build::break_stmt()],
            None,
        );
        let body = vec![
            build::let_temp(acc, Type::bint(), Some(build::boolean(!is_any))),
            Self::generator_loop(parts.target, parts.iter, parts.condition, vec![hit], pos),
        ];
        Self::stat_result(acc, body, Type::bint(), pos)
    }
}

//! Tree-to-tree rewrites run between analysis and code generation.
//!
//! Each pass takes the module by value and returns the rewritten module.
//! A pass either replaces a subtree with an equivalent lower-level form or
//! leaves it untouched, and running it again on its own output changes
//! nothing.

mod builtins;
mod const_fold;
mod loops;
mod switch;

pub use builtins::BuiltinCalls;
pub use const_fold::ConstantFolding;
pub use loops::LoopLowering;
pub use switch::SwitchLowering;

use crate::ast::{build, Expr, ExprKind, Module, TempId};
use crate::options::OptimizeOptions;
use crate::semantic::SymbolTable;
use crate::types::TypeRef;
use tracing::debug;

/// A single rewrite pass
pub trait Pass {
    fn name(&self) -> &'static str;

    fn run(&self, module: Module, symbols: &SymbolTable) -> Module;
}

/// Runs the enabled passes in their fixed order.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new(options: &OptimizeOptions) -> Self {
        let mut passes: Vec<Box<dyn Pass>> = Vec::new();
        if options.constant_folding {
            passes.push(Box::new(ConstantFolding));
        }
        if options.builtin_calls {
            passes.push(Box::new(BuiltinCalls));
        }
        if options.loop_lowering {
            passes.push(Box::new(LoopLowering));
        }
        if options.switch_lowering {
            passes.push(Box::new(SwitchLowering));
        }
        Self { passes }
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(&self, mut module: Module, symbols: &SymbolTable) -> Module {
        for pass in &self.passes {
            debug!(pass = pass.name(), module = %module.name, "running pass");
            module = pass.run(module, symbols);
        }
        module
    }
}

/// Hands out temporaries for one pass run; the counter is written back to
/// the module afterwards.
#[derive(Debug)]
pub(crate) struct TempAllocator {
    next: usize,
}

impl TempAllocator {
    pub(crate) fn new(module: &Module) -> Self {
        Self { next: module.next_temp }
    }

    pub(crate) fn fresh(&mut self) -> TempId {
        let id = TempId(self.next);
        self.next += 1;
        id
    }

    pub(crate) fn finish(self, module: &mut Module) {
        module.next_temp = module.next_temp.max(self.next);
    }
}

/// Gives `expr` the static type `ty`, wrapping it in a coercion unless the
/// types already agree. Literals are simply re-typed.
pub(crate) fn retype(expr: Expr, ty: &TypeRef) -> Expr {
    if expr.ty.same_as(ty) {
        return expr;
    }
    if expr.is_literal() && !matches!(expr.kind, ExprKind::None) {
        return expr.with_type(ty.clone());
    }
    let pos = expr.pos;
    build::coerce(expr, ty.clone()).at(pos)
}

/// Whether two scrutinee expressions denote the same storage location.
pub(crate) fn same_location(a: &Expr, b: &Expr) -> bool {
    match (&a.kind, &b.kind) {
        (ExprKind::Name { entry: ea, .. }, ExprKind::Name { entry: eb, .. }) => ea == eb,
        (ExprKind::TempRef(ta), ExprKind::TempRef(tb)) => ta == tb,
        (
            ExprKind::Attribute { obj: oa, attr: aa },
            ExprKind::Attribute { obj: ob, attr: ab },
        ) => aa == ab && same_location(oa, ob),
        _ => false,
    }
}

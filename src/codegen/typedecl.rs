//! C declarations of structs, unions, object structs and vtable structs.
//!
//! A type that embeds another by value must follow it. Declarations are
//! ordered with a stable topological sort; everything else keeps the order
//! in which the module declared it.

use super::buffer::{CodeWriter, Section};
use super::Context;
use crate::ast::Module;
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::semantic::Visibility;
use crate::types::{ClassType, DeclOptions, StructType, Type, TypeRef};
use std::collections::HashMap;
use tracing::{debug, trace};

/// One C declaration in the type declaration section.
#[derive(Debug, Clone)]
pub enum DeclNode {
    Struct(TypeRef),
    Object(TypeRef),
    Vtable(TypeRef),
}

impl DeclNode {
    /// The C tag this node defines.
    pub fn tag(&self) -> String {
        match self {
            DeclNode::Struct(t) => t.as_struct().map(|s| s.cname.clone()).unwrap_or_default(),
            DeclNode::Object(t) => t.as_class().map(ClassType::objstruct_cname).unwrap_or_default(),
            DeclNode::Vtable(t) => t.as_class().map(ClassType::vtabstruct_cname).unwrap_or_default(),
        }
    }

    /// Tags of the declarations embedded by value.
    fn dependencies(&self) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            DeclNode::Struct(t) => {
                if let Some(s) = t.as_struct() {
                    for f in &s.fields {
                        embedded_tags(&f.ty, &mut out);
                    }
                }
            }
            DeclNode::Object(t) => {
                if let Some(c) = t.as_class() {
                    if let Some(base) = c.base_class() {
                        out.push(base.objstruct_cname());
                    }
                    for f in &c.fields {
                        embedded_tags(&f.ty, &mut out);
                    }
                }
            }
            DeclNode::Vtable(t) => {
                if let Some(base) = t.as_class().and_then(ClassType::base_class) {
                    if base.has_vtable() {
                        out.push(base.vtabstruct_cname());
                    }
                }
            }
        }
        out
    }
}

fn embedded_tags(ty: &Type, out: &mut Vec<String>) {
    match ty {
        Type::Struct(s) => out.push(s.cname.clone()),
        Type::Array { base, .. } | Type::Typedef { base, .. } => embedded_tags(base, out),
        Type::Const(b) => embedded_tags(b, out),
        _ => {}
    }
}

/// Every class the module refers to, ancestors before the classes listing
/// them, without duplicates.
pub fn collect_classes(module: &Module) -> Vec<TypeRef> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    let listed = module.type_imports.iter().map(|i| &i.ty).chain(module.classes.iter().map(|c| &c.ty));
    for ty in listed {
        let mut lineage = Vec::new();
        let mut cur = Some(ty.clone());
        while let Some(t) = cur {
            cur = t.as_class().and_then(|c| c.base.clone());
            lineage.push(t);
        }
        for t in lineage.into_iter().rev() {
            let Some(c) = t.as_class() else { continue };
            let tag = c.objstruct_cname();
            if !seen.contains(&tag) {
                seen.push(tag);
                out.push(t);
            }
        }
    }
    out
}

/// All declaration nodes of `module` in declaration order.
pub fn declaration_nodes(module: &Module, classes: &[TypeRef]) -> Vec<DeclNode> {
    let mut nodes: Vec<DeclNode> = module.structs.iter().map(|s| DeclNode::Struct(s.ty.clone())).collect();
    for ty in classes {
        nodes.push(DeclNode::Object(ty.clone()));
        if ty.as_class().is_some_and(ClassType::has_vtable) {
            nodes.push(DeclNode::Vtable(ty.clone()));
        }
    }
    nodes
}

/// Orders `nodes` so that every embedded declaration precedes its user.
/// Among ready nodes the earliest declared goes first.
pub fn sort_declarations(nodes: Vec<DeclNode>) -> InternalResult<Vec<DeclNode>> {
    let index: HashMap<String, usize> = nodes.iter().enumerate().map(|(i, n)| (n.tag(), i)).collect();
    let deps: Vec<Vec<usize>> = nodes
        .iter()
        .map(|n| {
            let mut d: Vec<usize> = n.dependencies().iter().filter_map(|t| index.get(t).copied()).collect();
            d.sort_unstable();
            d.dedup();
            d
        })
        .collect();
    let mut pending: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut done = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    while order.len() < nodes.len() {
        let Some(next) = (0..nodes.len()).find(|&i| !done[i] && pending[i] == 0) else {
            let stuck: Vec<String> = (0..nodes.len()).filter(|&i| !done[i]).map(|i| nodes[i].tag()).collect();
            return Err(InternalError::TypeDependencyCycle(stuck.join(", ")));
        };
        done[next] = true;
        order.push(next);
        for (i, d) in deps.iter().enumerate() {
            if !done[i] && d.contains(&next) {
                pending[i] -= 1;
            }
        }
    }
    trace!(count = order.len(), "sorted type declarations");
    let mut slots: Vec<Option<DeclNode>> = nodes.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

fn struct_keyword(s: &StructType) -> &'static str {
    s.kind.keyword()
}

fn forward_declaration(node: &DeclNode, w: &mut CodeWriter) {
    match node {
        DeclNode::Struct(t) => {
            if let Some(s) = t.as_struct() {
                if s.typedef_flag {
                    w.writeln(&format!("typedef {} {} {};", struct_keyword(s), s.cname, s.cname));
                } else {
                    w.writeln(&format!("{} {};", struct_keyword(s), s.cname));
                }
            }
        }
        DeclNode::Object(_) | DeclNode::Vtable(_) => w.writeln(&format!("struct {};", node.tag())),
    }
}

fn field_line(ty: &TypeRef, cname: &str) -> String {
    format!("{};", ty.declaration_code(cname, &DeclOptions::code()))
}

/// Writes the full definition of one node.
pub fn emit_definition(node: &DeclNode, w: &mut CodeWriter) {
    match node {
        DeclNode::Struct(t) => {
            let Some(s) = t.as_struct() else { return };
            if s.packed {
                w.writeln("#pragma pack(push, 1)");
            }
            w.open_block(&format!("{} {}", struct_keyword(s), s.cname));
            for f in &s.fields {
                w.writeln(&field_line(&f.ty, &f.cname));
            }
            w.close_block(";");
            if s.packed {
                w.writeln("#pragma pack(pop)");
            }
        }
        DeclNode::Object(t) => {
            let Some(c) = t.as_class() else { return };
            w.open_block(&format!("struct {}", c.objstruct_cname()));
            match c.base_class() {
                Some(base) => w.writeln(&format!("struct {} {};", base.objstruct_cname(), naming::BASE_MEMBER)),
                None => w.writeln("PyObject_HEAD"),
            }
            if c.vtab_owner_depth() == Some(0) {
                w.writeln(&format!("struct {} *{};", c.vtabstruct_cname(), naming::VTAB_MEMBER));
            }
            for f in &c.fields {
                w.writeln(&field_line(&f.ty, &f.cname));
            }
            w.close_block(";");
        }
        DeclNode::Vtable(t) => {
            let Some(c) = t.as_class() else { return };
            w.open_block(&format!("struct {}", c.vtabstruct_cname()));
            if let Some(base) = c.base_class().filter(|b| b.has_vtable()) {
                w.writeln(&format!("struct {} {};", base.vtabstruct_cname(), naming::BASE_MEMBER));
            }
            for slot in c.vtable.iter().filter(|s| !s.overrides) {
                w.writeln(&field_line(&Type::pointer(slot.ty.clone()), &naming::sanitize(&slot.name)));
            }
            w.close_block(";");
        }
    }
    w.newline();
}

/// Emits every type declaration of the module and the per-class
/// `PyTypeObject` and vtable variables.
pub fn emit_type_declarations(cx: &mut Context<'_>, module: &Module) -> InternalResult<()> {
    let classes = collect_classes(module);
    let nodes = sort_declarations(declaration_nodes(module, &classes))?;
    debug!(declarations = nodes.len(), classes = classes.len(), "emitting type declarations");
    let w = cx.out.section(Section::TypeDeclarations);
    for node in &nodes {
        forward_declaration(node, w);
    }
    if !nodes.is_empty() {
        w.newline();
    }
    for node in &nodes {
        emit_definition(node, w);
    }

    let own: Vec<String> = module
        .classes
        .iter()
        .filter_map(|c| c.ty.as_class())
        .filter(|c| !c.is_external)
        .map(ClassType::objstruct_cname)
        .collect();
    let public: Vec<String> = module
        .classes
        .iter()
        .filter(|c| cx.symbols.get(c.entry).is_some_and(|e| e.visibility == Visibility::Public))
        .filter_map(|c| c.ty.as_class().map(ClassType::typeobj_cname))
        .collect();
    let decls = cx.out.section(Section::ModuleDeclarations);
    for ty in &classes {
        let Some(c) = ty.as_class() else { continue };
        let local = own.contains(&c.objstruct_cname());
        if local {
            let storage = if public.contains(&c.typeobj_cname()) { "DL_EXPORT(PyTypeObject)" } else { "static PyTypeObject" };
            decls.writeln(&format!("{} {};", storage, c.typeobj_cname()));
        }
        decls.writeln(&format!("static PyTypeObject *{} = 0;", c.typeptr_cname()));
        if c.has_vtable() {
            decls.writeln(&format!("static struct {} *{};", c.vtabstruct_cname(), c.vtabptr_cname()));
            if local {
                decls.writeln(&format!("static struct {} {};", c.vtabstruct_cname(), c.vtable_cname()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, FunctionType, StructKind, VtableSlot};

    fn class(name: &str, base: Option<TypeRef>) -> ClassType {
        let mut c = ClassType::new("shapes", name);
        c.base = base;
        c
    }

    fn plain_struct(name: &str, fields: Vec<Field>) -> TypeRef {
        std::rc::Rc::new(Type::Struct(StructType {
            name: name.into(),
            cname: name.into(),
            kind: StructKind::Struct,
            fields,
            packed: false,
            typedef_flag: false,
        }))
    }

    #[test]
    fn base_object_struct_precedes_derived_even_when_declared_later() {
        let base = Type::class(class("Shape", None));
        let derived = Type::class(class("Square", Some(base.clone())));
        let nodes = vec![DeclNode::Object(derived), DeclNode::Object(base)];
        let sorted = sort_declarations(nodes).unwrap();
        let tags: Vec<String> = sorted.iter().map(DeclNode::tag).collect();
        assert_eq!(tags, vec!["__cx_obj_shapes_Shape".to_string(), "__cx_obj_shapes_Square".to_string()]);
    }

    #[test]
    fn independent_declarations_keep_their_order() {
        let a = plain_struct("a_t", vec![]);
        let b = plain_struct("b_t", vec![]);
        let sorted = sort_declarations(vec![DeclNode::Struct(b), DeclNode::Struct(a)]).unwrap();
        let tags: Vec<String> = sorted.iter().map(DeclNode::tag).collect();
        assert_eq!(tags, vec!["b_t", "a_t"]);
    }

    #[test]
    fn value_embedding_cycle_is_internal_error() {
        let a = plain_struct("a_t", vec![Field::new("b", plain_struct("b_t", vec![]))]);
        let b = plain_struct("b_t", vec![Field::new("a", plain_struct("a_t", vec![]))]);
        let err = sort_declarations(vec![DeclNode::Struct(a), DeclNode::Struct(b)]).unwrap_err();
        assert!(matches!(err, InternalError::TypeDependencyCycle(_)));
    }

    #[test]
    fn pointers_do_not_order_declarations() {
        let a = plain_struct("a_t", vec![Field::new("next", Type::pointer(plain_struct("b_t", vec![])))]);
        let b = plain_struct("b_t", vec![Field::new("prev", Type::pointer(plain_struct("a_t", vec![])))]);
        assert_eq!(sort_declarations(vec![DeclNode::Struct(a), DeclNode::Struct(b)]).unwrap().len(), 2);
    }

    #[test]
    fn vtable_pointer_lives_in_root_declaring_class() {
        let mut shape = class("Shape", None);
        let area = FunctionType::new(Type::c_double(), vec![]);
        shape.vtable.push(VtableSlot {
            name: "area".into(),
            cname: "__cx_f_shapes_Shape_area".into(),
            ty: Type::function(area),
            overrides: false,
        });
        let base = Type::class(shape);
        let derived = Type::class(class("Square", Some(base.clone())));

        let mut w = CodeWriter::new();
        emit_definition(&DeclNode::Object(base.clone()), &mut w);
        emit_definition(&DeclNode::Object(derived.clone()), &mut w);
        emit_definition(&DeclNode::Vtable(derived), &mut w);
        let text = w.into_string();
        assert_eq!(text.matches("*__cx_vtab;").count(), 1);
        assert!(text.contains("struct __cx_obj_shapes_Shape __cx_base;"));
        assert!(text.contains("struct __cx_vtabstruct_shapes_Shape __cx_base;"));
    }
}

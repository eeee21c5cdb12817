//! Shared fixtures for building analyzed modules by hand.

#![allow(dead_code)]

use cextc::ast::{ClassDef, FuncDef, FuncKind, GlobalVar, Module, Param, Pos, Stmt};
use cextc::semantic::{Entry, EntryId, EntryKind, Storage, SymbolTable, Visibility};
use cextc::types::{ClassType, FuncParam, FunctionType, Type, TypeRef};

pub const MODULE: &str = "demo";

/// A module under construction together with its symbol table.
pub struct Fixture {
    pub module: Module,
    pub symbols: SymbolTable,
}

impl Fixture {
    pub fn new() -> Self {
        Self { module: Module::new(MODULE, "demo.pyx"), symbols: SymbolTable::new() }
    }

    pub fn local(&mut self, name: &str, ty: TypeRef) -> EntryId {
        self.symbols.push(Entry::new(name, format!("__cx_v_{}", name), ty, EntryKind::Variable))
    }

    pub fn param(&mut self, name: &str, ty: TypeRef) -> Param {
        let mut entry = Entry::new(name, format!("__cx_v_{}", name), ty.clone(), EntryKind::Variable);
        entry.is_arg = true;
        let id = self.symbols.push(entry);
        Param { name: name.to_string(), entry: id, ty, default: None }
    }

    /// A C-level module global.
    pub fn global(&mut self, name: &str, ty: TypeRef) -> EntryId {
        let entry = Entry::new(name, format!("__cx_v_{}_{}", MODULE, name), ty, EntryKind::Variable)
            .with_storage(Storage::ModuleStatic);
        let id = self.symbols.define(entry).expect("fresh global name");
        self.module.globals.push(GlobalVar { entry: id, init: None, pos: Pos::default() });
        id
    }

    /// Defines a function entry and returns the matching definition with an
    /// empty body.
    pub fn function(&mut self, name: &str, kind: FuncKind, params: Vec<Param>, ret: TypeRef) -> FuncDef {
        let sig = FunctionType::new(
            ret.clone(),
            params.iter().map(|p| FuncParam::new(p.name.clone(), p.ty.clone())).collect(),
        );
        let cname = format!("__cx_f_{}_{}", MODULE, name);
        let entry = Entry::new(name, cname, Type::function(sig), EntryKind::Function);
        let id = self.symbols.push(entry);
        FuncDef {
            name: name.to_string(),
            entry: id,
            kind,
            params,
            return_type: ret,
            exception: Default::default(),
            body: Vec::new(),
            locals: Vec::new(),
            doc: None,
            pos: Pos::new(0, 1, 1),
        }
    }

    /// An unshadowed builtin such as `len` or `sum`.
    pub fn builtin(&mut self, name: &str) -> EntryId {
        let entry = Entry::new(name, name, Type::object(), EntryKind::Builtin).with_storage(Storage::Builtin);
        self.symbols.push(entry)
    }

    pub fn set_visibility(&mut self, id: EntryId, visibility: Visibility) {
        if let Some(entry) = self.symbols.get_mut(id) {
            entry.visibility = visibility;
        }
    }

    pub fn set_api(&mut self, id: EntryId) {
        if let Some(entry) = self.symbols.get_mut(id) {
            entry.api = true;
        }
    }

    pub fn class(&mut self, c: ClassType) -> ClassDef {
        let name = c.name.clone();
        let ty = Type::class(c);
        let entry = Entry::new(name.clone(), String::new(), ty.clone(), EntryKind::Type);
        let id = self.symbols.push(entry);
        ClassDef { name, entry: id, ty, methods: Vec::new(), properties: Vec::new(), doc: None, pos: Pos::new(0, 1, 1) }
    }

    pub fn with_body(mut def: FuncDef, body: Vec<Stmt>) -> FuncDef {
        def.body = body;
        def
    }
}

/// The text of the top-level C function defined by `header`.
pub fn function_text<'a>(unit: &'a str, header: &str) -> &'a str {
    let opening = format!("{} {{", header);
    let start = unit.find(&opening).unwrap_or_else(|| panic!("no function '{}' in:\n{}", header, unit));
    let rest = &unit[start..];
    let end = rest.find("\n}\n").map(|i| i + 3).unwrap_or(rest.len());
    &rest[..end]
}

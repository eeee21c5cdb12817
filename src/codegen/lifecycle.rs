//! Extension type support: allocation, destruction, GC callbacks,
//! attribute access and the `PyTypeObject` record.
//!
//! Construction starts from zeroed memory (from `tp_alloc`, a cleared
//! freelist entry, or the base `tp_new`), so an object that fails in
//! `__cinit__` can be destroyed safely. Destruction untracks the object,
//! runs `__dealloc__` with the current exception saved, releases owned
//! fields in reverse layout order and hands the memory to the base type.

use super::buffer::{escape_string, CodeWriter, Section};
use super::function::{BodyEmitter, FunctionExit, FunctionState, Operand};
use super::utility::catalog;
use super::wrappers::{self, implementation_signature, MethodEntry};
use super::Context;
use crate::ast::{ClassDef, FuncDef, FuncKind, Pos};
use crate::error::{InternalError, InternalResult};
use crate::naming;
use crate::semantic::Visibility;
use crate::types::{ClassType, Field, FieldVisibility, Type, TypeRef};
use tracing::debug;

/// What module init and cleanup need to know about an emitted class.
#[derive(Debug, Clone)]
pub struct EmittedClass {
    pub ty: TypeRef,
    pub freelist: Option<usize>,
    pub gc: bool,
}

impl EmittedClass {
    pub fn class(&self) -> Option<&ClassType> {
        self.ty.as_class()
    }
}

/// Effective freelist size. Only root classes keep a freelist; a derived
/// object is released by its base `tp_dealloc`.
pub fn freelist_size(c: &ClassType, default: usize) -> Option<usize> {
    if c.base.is_some() {
        return None;
    }
    c.freelist.or(Some(default)).filter(|n| *n > 0)
}

fn object_fields(c: &ClassType) -> impl Iterator<Item = &Field> {
    c.fields.iter().filter(|f| f.ty.is_pyobject())
}

fn python_method<'d>(class: &'d ClassDef, name: &str) -> Option<&'d FuncDef> {
    class.method(name).filter(|m| m.kind != FuncKind::Cdef)
}

struct ClassNames {
    objstruct: String,
    suffix: String,
}

impl ClassNames {
    fn new(c: &ClassType) -> Self {
        Self { objstruct: c.objstruct_cname(), suffix: c.slot_suffix() }
    }

    fn tp(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.suffix)
    }

    fn cast(&self, code: &str) -> String {
        format!("((struct {} *){})", self.objstruct, code)
    }
}

fn emit_freelist(w: &mut CodeWriter, names: &ClassNames, size: usize) {
    w.writeln(&format!(
        "static struct {} *{}[{}];",
        names.objstruct,
        names.tp(naming::FREELIST_PREFIX),
        size
    ));
    w.writeln(&format!("static int {} = 0;", names.tp(naming::FREECOUNT_PREFIX)));
    w.newline();
}

fn emit_tp_new(
    w: &mut CodeWriter,
    c: &ClassType,
    names: &ClassNames,
    cinit: Option<&str>,
    freelist: Option<usize>,
    gc: bool,
) {
    let own_objects: Vec<&Field> = object_fields(c).collect();
    let vtab_depth = if c.has_vtable() { c.vtab_owner_depth() } else { None };
    let needs_p = vtab_depth.is_some() || !own_objects.is_empty();
    w.open_block(&format!(
        "static PyObject *{}(PyTypeObject *t, CX_UNUSED PyObject *a, CX_UNUSED PyObject *k)",
        names.tp(naming::TP_NEW_PREFIX)
    ));
    if needs_p {
        w.writeln(&format!("struct {} *p;", names.objstruct));
    }
    w.writeln("PyObject *o;");
    let allocate = |w: &mut CodeWriter| {
        match c.base_class() {
            Some(base) => w.writeln(&format!("o = {}->tp_new(t, a, k);", base.typeptr_cname())),
            None => w.writeln("o = (*t->tp_alloc)(t, 0);"),
        }
        w.writeln("if (unlikely(!o)) return 0;");
    };
    match freelist {
        Some(_) => {
            let count = names.tp(naming::FREECOUNT_PREFIX);
            w.open_block(&format!(
                "if (likely(({} > 0) & (t->tp_basicsize == sizeof(struct {}))))",
                count, names.objstruct
            ));
            w.writeln(&format!("o = (PyObject *){}[--{}];", names.tp(naming::FREELIST_PREFIX), count));
            w.writeln(&format!("memset(o, 0, sizeof(struct {}));", names.objstruct));
            w.writeln("(void)PyObject_INIT(o, t);");
            if gc {
                w.writeln("PyObject_GC_Track(o);");
            }
            w.close_block(" else {");
            w.indent();
            allocate(w);
            w.close_block("");
        }
        None => allocate(w),
    }
    if needs_p {
        w.writeln(&format!("p = {};", names.cast("o")));
    }
    if let Some(depth) = vtab_depth {
        let owner = c.chain()[depth];
        w.writeln(&format!(
            "p->{}{} = (struct {} *){};",
            super::expr::base_path(depth),
            naming::VTAB_MEMBER,
            owner.vtabstruct_cname(),
            c.vtabptr_cname()
        ));
    }
    for f in &own_objects {
        let cast = super::function::object_cast(&f.ty);
        w.writeln(&format!("p->{} = {}Py_None; Py_INCREF(Py_None);", f.cname, cast));
    }
    if let Some(cinit) = cinit {
        w.writeln(&format!("if (unlikely({}(o, a, k) < 0)) goto bad;", cinit));
    }
    w.writeln("return o;");
    if cinit.is_some() {
        w.label("bad");
        w.writeln("Py_DECREF(o); o = 0;");
        w.writeln("return NULL;");
    }
    w.close_block("");
    w.newline();
}

fn emit_tp_dealloc(
    cx: &mut Context<'_>,
    class: &ClassDef,
    c: &ClassType,
    names: &ClassNames,
    freelist: Option<usize>,
    gc: bool,
) -> InternalResult<()> {
    let user = class.method("__dealloc__");
    let own_objects: Vec<&Field> = object_fields(c).collect();
    let needs_p = user.is_some() || !own_objects.is_empty() || freelist.is_some();
    let dealloc = names.tp(naming::TP_DEALLOC_PREFIX);
    if user.is_some() {
        cx.utility.require(catalog::EXCEPTIONS, "WriteUnraisable")?;
    }
    if c.base_class().is_some_and(|b| b.is_external) {
        cx.utility.require(catalog::EXTENSION_TYPE, "CallNextTpDealloc")?;
    }
    let impl_name = match user {
        Some(def) => Some(wrappers::function_names(cx, def, Some(class))?.implementation),
        None => None,
    };
    let qualname = format!("{}.{}.__dealloc__", cx.module_name, class.name);

    let w = cx.out.section(Section::Definitions);
    w.open_block(&format!("static void {}(PyObject *o)", dealloc));
    if needs_p {
        w.writeln(&format!("struct {} *p = {};", names.objstruct, names.cast("o")));
    }
    if gc {
        w.writeln("PyObject_GC_UnTrack(o);");
    }
    if let (Some(def), Some(impl_name)) = (user, impl_name) {
        w.open_block("");
        w.writeln("PyObject *etype, *eval, *etb;");
        w.writeln("PyErr_Fetch(&etype, &eval, &etb);");
        w.writeln("Py_SET_REFCNT(o, Py_REFCNT(o) + 1);");
        if def.kind == FuncKind::Def {
            w.writeln(&format!("PyObject *r = {}(p);", impl_name));
            w.writeln(&format!(
                "if (unlikely(!r)) __cx_WriteUnraisable(\"{}\"); else Py_DECREF(r);",
                escape_string(&qualname)
            ));
        } else {
            w.writeln(&format!("(void){}(p);", impl_name));
            w.writeln(&format!(
                "if (unlikely(PyErr_Occurred())) __cx_WriteUnraisable(\"{}\");",
                escape_string(&qualname)
            ));
        }
        w.writeln("Py_SET_REFCNT(o, Py_REFCNT(o) - 1);");
        w.writeln("PyErr_Restore(etype, eval, etb);");
        w.close_block("");
    }
    for f in own_objects.iter().rev() {
        w.writeln(&format!("Py_CLEAR(p->{});", f.cname));
    }
    match c.base_class() {
        Some(base) => {
            let ptype = base.typeptr_cname();
            if gc {
                w.writeln("if (PyType_IS_GC(Py_TYPE(o)->tp_base)) PyObject_GC_Track(o);");
            }
            if base.is_external {
                w.writeln(&format!(
                    "if (likely({})) {}->tp_dealloc(o); else __cx_call_next_tp_dealloc(o, {});",
                    ptype, ptype, dealloc
                ));
            } else {
                w.writeln(&format!("{}->tp_dealloc(o);", ptype));
            }
        }
        None => match freelist {
            Some(size) => {
                let count = names.tp(naming::FREECOUNT_PREFIX);
                w.open_block(&format!(
                    "if (({} < {}) & (Py_TYPE(o)->tp_basicsize == sizeof(struct {})))",
                    count, size, names.objstruct
                ));
                w.writeln(&format!("{}[{}++] = p;", names.tp(naming::FREELIST_PREFIX), count));
                w.close_block(" else {");
                w.indent();
                w.writeln("(*Py_TYPE(o)->tp_free)(o);");
                w.close_block("");
            }
            None => w.writeln("(*Py_TYPE(o)->tp_free)(o);"),
        },
    }
    w.close_block("");
    w.newline();
    Ok(())
}

fn emit_tp_traverse(cx: &mut Context<'_>, c: &ClassType, names: &ClassNames) -> InternalResult<()> {
    let traverse = names.tp(naming::TP_TRAVERSE_PREFIX);
    let base = c.base_class().filter(|b| b.has_object_fields());
    if base.is_some_and(|b| b.is_external) {
        cx.utility.require(catalog::EXTENSION_TYPE, "CallNextTpTraverse")?;
    }
    let own_objects: Vec<&Field> = object_fields(c).collect();
    let w = cx.out.section(Section::Definitions);
    w.open_block(&format!("static int {}(PyObject *o, visitproc v, void *a)", traverse));
    w.writeln("int e;");
    if !own_objects.is_empty() {
        w.writeln(&format!("struct {} *p = {};", names.objstruct, names.cast("o")));
    }
    if let Some(base) = base {
        let ptype = base.typeptr_cname();
        if base.is_external {
            w.writeln(&format!(
                "e = ((likely({p})) ? (({p}->tp_traverse) ? {p}->tp_traverse(o, v, a) : 0) : __cx_call_next_tp_traverse(o, v, a, {t})); if (e) return e;",
                p = ptype,
                t = traverse
            ));
        } else {
            w.writeln(&format!("if ({p}->tp_traverse) {{ e = {p}->tp_traverse(o, v, a); if (e) return e; }}", p = ptype));
        }
    }
    for f in &own_objects {
        w.open_block(&format!("if (p->{})", f.cname));
        w.writeln(&format!("e = (*v)(((PyObject *)p->{}), a); if (e) return e;", f.cname));
        w.close_block("");
    }
    w.writeln("(void)e;");
    w.writeln("return 0;");
    w.close_block("");
    w.newline();
    Ok(())
}

fn emit_tp_clear(cx: &mut Context<'_>, c: &ClassType, names: &ClassNames) -> InternalResult<()> {
    let clear = names.tp(naming::TP_CLEAR_PREFIX);
    let base = c.base_class().filter(|b| b.has_object_fields());
    if base.is_some_and(|b| b.is_external) {
        cx.utility.require(catalog::EXTENSION_TYPE, "CallNextTpClear")?;
    }
    let own_objects: Vec<&Field> = object_fields(c).collect();
    let w = cx.out.section(Section::Definitions);
    w.open_block(&format!("static int {}(PyObject *o)", clear));
    if !own_objects.is_empty() {
        w.writeln("PyObject *tmp;");
        w.writeln(&format!("struct {} *p = {};", names.objstruct, names.cast("o")));
    }
    if let Some(base) = base {
        let ptype = base.typeptr_cname();
        if base.is_external {
            w.writeln(&format!(
                "if (likely({p})) {{ if ({p}->tp_clear) {p}->tp_clear(o); }} else __cx_call_next_tp_clear(o, {c});",
                p = ptype,
                c = clear
            ));
        } else {
            w.writeln(&format!("if ({p}->tp_clear) {p}->tp_clear(o);", p = ptype));
        }
    }
    for f in &own_objects {
        let cast = super::function::object_cast(&f.ty);
        w.writeln(&format!("tmp = ((PyObject *)p->{});", f.cname));
        w.writeln(&format!("p->{} = {}Py_None; Py_INCREF(Py_None);", f.cname, cast));
        w.writeln("Py_XDECREF(tmp);");
    }
    w.writeln("return 0;");
    w.close_block("");
    w.newline();
    Ok(())
}

/// Where a getset entry reads and writes its value.
enum Accessor<'d> {
    Field(&'d Field),
    Method(FuncDef),
}

fn accessor_method(cx: &mut Context<'_>, class: &ClassDef, def: &FuncDef, suffix: &str, name: &str) -> InternalResult<FuncDef> {
    let mut def = def.clone();
    def.name = format!("{}__{}", name, suffix);
    wrappers::emit_function(cx, &def, Some(class))?;
    Ok(def)
}

fn emit_getter(cx: &mut Context<'_>, class: &ClassDef, name: &str, source: &Accessor<'_>) -> InternalResult<String> {
    let c = class.ty.as_class().ok_or_else(|| not_a_class(class))?;
    let names = ClassNames::new(c);
    let cname = format!("{}{}_{}", naming::GETTER_PREFIX, names.suffix, naming::sanitize(name));
    let header = format!("static PyObject *{}(PyObject *o, CX_UNUSED void *x)", cname);
    let qualname = format!("{}.{}.{}.__get__", cx.module_name, class.name, name);
    let object = Type::object();
    let mut em = BodyEmitter::new(cx, FunctionState::new(qualname, Some(object.clone())));
    let value = match source {
        Accessor::Field(f) => {
            let fty = em.ty(&f.ty);
            Operand::borrowed(format!("{}->{}", names.cast("o"), f.cname), fty)
        }
        Accessor::Method(def) => {
            let sig = implementation_signature(&mut em, def);
            let callee = wrappers::function_names(em.cx, def, Some(class))?.implementation;
            let this = Operand::borrowed(names.cast("o"), class.ty.clone());
            em.emit_c_call(&callee, &sig, vec![this], def.pos)?
        }
    };
    let boxed = em.coerce_to(value, &object, Pos::default())?;
    em.store(naming::RETVAL_CNAME, &object, boxed);
    let exit = FunctionExit {
        retval: Some(object),
        error_value: Some("NULL".to_string()),
        unraisable: false,
        release: Vec::new(),
    };
    let text = em.finish(&header, &[], &exit)?;
    let defs = cx.out.section(Section::Definitions);
    defs.put_raw(&text);
    defs.newline();
    Ok(cname)
}

fn emit_setter(cx: &mut Context<'_>, class: &ClassDef, name: &str, target: &Accessor<'_>) -> InternalResult<String> {
    let c = class.ty.as_class().ok_or_else(|| not_a_class(class))?;
    let names = ClassNames::new(c);
    let cname = format!("{}{}_{}", naming::SETTER_PREFIX, names.suffix, naming::sanitize(name));
    let header = format!("static int {}(PyObject *o, PyObject *v, CX_UNUSED void *x)", cname);
    let qualname = format!("{}.{}.{}.__set__", cx.module_name, class.name, name);
    let int = Type::c_int();
    let mut em = BodyEmitter::new(cx, FunctionState::new(qualname, Some(int.clone())));
    let value = Operand::borrowed("v", Type::object());
    em.w.open_block("if (v)");
    match target {
        Accessor::Field(f) => {
            let fty = em.ty(&f.ty);
            let converted = em.convert_arg(value, &fty, name, Pos::default())?;
            em.store(&format!("{}->{}", names.cast("o"), f.cname), &fty, converted);
        }
        Accessor::Method(def) => {
            let sig = implementation_signature(&mut em, def);
            let callee = wrappers::function_names(em.cx, def, Some(class))?.implementation;
            let vty = sig.params.get(1).map(|p| p.ty.clone()).unwrap_or_else(Type::object);
            let converted = em.convert_arg(value, &vty, name, def.pos)?;
            let this = Operand::borrowed(names.cast("o"), class.ty.clone());
            let result = em.emit_c_call(&callee, &sig, vec![this, converted], def.pos)?;
            em.release(result);
        }
    }
    em.w.close_block(" else {");
    em.w.indent();
    match target {
        Accessor::Field(f) if f.ty.is_pyobject() => {
            let fty = em.ty(&f.ty);
            em.store(&format!("{}->{}", names.cast("o"), f.cname), &fty, Operand::borrowed("Py_None", Type::object()));
        }
        _ => em.raise_if("1", "PyExc_NotImplementedError", "__del__", Pos::default()),
    }
    em.w.close_block("");
    em.w.writeln(&format!("{} = 0;", naming::RETVAL_CNAME));
    let exit = FunctionExit {
        retval: Some(int),
        error_value: Some("-1".to_string()),
        unraisable: false,
        release: Vec::new(),
    };
    let text = em.finish(&header, &[], &exit)?;
    let defs = cx.out.section(Section::Definitions);
    defs.put_raw(&text);
    defs.newline();
    Ok(cname)
}

fn not_a_class(class: &ClassDef) -> InternalError {
    InternalError::UnsupportedType { what: format!("class '{}'", class.name), ty: class.ty.to_string() }
}

/// A row of a `PyGetSetDef` table.
struct GetSetEntry {
    name: String,
    getter: String,
    setter: Option<String>,
    doc: Option<String>,
}

impl GetSetEntry {
    fn table_row(&self) -> String {
        let doc = match &self.doc {
            Some(d) => format!("(char *)\"{}\"", escape_string(d)),
            None => "0".to_string(),
        };
        format!(
            "{{(char *)\"{}\", {}, {}, {}, 0}},",
            self.name,
            self.getter,
            self.setter.as_deref().unwrap_or("0"),
            doc
        )
    }
}

fn emit_getsets(cx: &mut Context<'_>, class: &ClassDef, c: &ClassType) -> InternalResult<Vec<GetSetEntry>> {
    let mut entries = Vec::new();
    for f in c.fields.iter().filter(|f| f.visibility != FieldVisibility::Private) {
        let access = Accessor::Field(f);
        let getter = emit_getter(cx, class, &f.name, &access)?;
        let setter = match f.visibility {
            FieldVisibility::Public => Some(emit_setter(cx, class, &f.name, &access)?),
            _ => None,
        };
        entries.push(GetSetEntry { name: f.name.clone(), getter, setter, doc: None });
    }
    for prop in &class.properties {
        let Some(get) = &prop.getter else {
            return Err(InternalError::UnsupportedType {
                what: format!("property '{}' without a getter", prop.name),
                ty: class.ty.to_string(),
            });
        };
        let get = accessor_method(cx, class, get, "get", &prop.name)?;
        let getter = emit_getter(cx, class, &prop.name, &Accessor::Method(get))?;
        let setter = match &prop.setter {
            Some(set) => {
                let set = accessor_method(cx, class, set, "set", &prop.name)?;
                Some(emit_setter(cx, class, &prop.name, &Accessor::Method(set))?)
            }
            None => None,
        };
        entries.push(GetSetEntry { name: prop.name.clone(), getter, setter, doc: prop.doc.clone() });
    }
    Ok(entries)
}

struct TypeSlots {
    init: Option<String>,
    repr: Option<String>,
    str: Option<String>,
    sequence: Option<String>,
    traverse: Option<String>,
    clear: Option<String>,
    getsets: Option<String>,
}

#[allow(clippy::too_many_arguments)]
fn emit_type_object(
    w: &mut CodeWriter,
    module: &str,
    class: &ClassDef,
    c: &ClassType,
    names: &ClassNames,
    slots: &TypeSlots,
    storage: &str,
    gc: bool,
) {
    let or_zero = |s: &Option<String>| s.clone().unwrap_or_else(|| "0".to_string());
    let mut flags = String::from("Py_TPFLAGS_DEFAULT");
    if !c.is_final {
        flags.push_str("|Py_TPFLAGS_BASETYPE");
    }
    if gc {
        flags.push_str("|Py_TPFLAGS_HAVE_GC");
    }
    let doc = match &class.doc {
        Some(d) => format!("\"{}\"", escape_string(d)),
        None => "0".to_string(),
    };
    let rows = [
        (format!("\"{}.{}\"", module, class.name), "tp_name"),
        (format!("sizeof(struct {})", names.objstruct), "tp_basicsize"),
        ("0".to_string(), "tp_itemsize"),
        (names.tp(naming::TP_DEALLOC_PREFIX), "tp_dealloc"),
        ("0".to_string(), "tp_vectorcall_offset"),
        ("0".to_string(), "tp_getattr"),
        ("0".to_string(), "tp_setattr"),
        ("0".to_string(), "tp_as_async"),
        (or_zero(&slots.repr), "tp_repr"),
        ("0".to_string(), "tp_as_number"),
        (slots.sequence.as_ref().map(|s| format!("&{}", s)).unwrap_or_else(|| "0".to_string()), "tp_as_sequence"),
        ("0".to_string(), "tp_as_mapping"),
        ("0".to_string(), "tp_hash"),
        ("0".to_string(), "tp_call"),
        (or_zero(&slots.str), "tp_str"),
        ("0".to_string(), "tp_getattro"),
        ("0".to_string(), "tp_setattro"),
        ("0".to_string(), "tp_as_buffer"),
        (flags, "tp_flags"),
        (doc, "tp_doc"),
        (or_zero(&slots.traverse), "tp_traverse"),
        (or_zero(&slots.clear), "tp_clear"),
        ("0".to_string(), "tp_richcompare"),
        ("0".to_string(), "tp_weaklistoffset"),
        ("0".to_string(), "tp_iter"),
        ("0".to_string(), "tp_iternext"),
        (names.tp(naming::METHODS_PREFIX), "tp_methods"),
        ("0".to_string(), "tp_members"),
        (or_zero(&slots.getsets), "tp_getset"),
        ("0".to_string(), "tp_base"),
        ("0".to_string(), "tp_dict"),
        ("0".to_string(), "tp_descr_get"),
        ("0".to_string(), "tp_descr_set"),
        ("0".to_string(), "tp_dictoffset"),
        (or_zero(&slots.init), "tp_init"),
        ("0".to_string(), "tp_alloc"),
        (names.tp(naming::TP_NEW_PREFIX), "tp_new"),
    ];
    w.open_block(&format!("{} {} =", storage, c.typeobj_cname()));
    w.writeln("PyVarObject_HEAD_INIT(0, 0)");
    for (value, slot) in rows {
        w.writeln(&format!("{}, /*{}*/", value, slot));
    }
    w.close_block(";");
    w.newline();
}

fn emit_method_table(w: &mut CodeWriter, names: &ClassNames, rows: &[MethodEntry]) {
    w.open_block(&format!("static PyMethodDef {}[] =", names.tp(naming::METHODS_PREFIX)));
    for row in rows {
        w.writeln(&row.table_row());
    }
    w.writeln("{0, 0, 0, 0}");
    w.close_block(";");
    w.newline();
}

/// Emits everything an extension type implemented by this module needs.
pub fn emit_class(cx: &mut Context<'_>, class: &ClassDef) -> InternalResult<EmittedClass> {
    let c = class.ty.as_class().ok_or_else(|| not_a_class(class))?;
    let names = ClassNames::new(c);
    let freelist = freelist_size(c, cx.options.freelist_size_default);
    let gc = cx.options.cyclic_gc_enabled && c.has_object_fields();
    debug!(class = %c.qualified_name(), gc, freelist = ?freelist, "emitting extension type");

    let rows = wrappers::emit_class_methods(cx, class)?;
    let slot_wrapper = |cx: &Context<'_>, name: &str| -> InternalResult<Option<String>> {
        match python_method(class, name) {
            Some(def) => Ok(Some(wrappers::function_names(cx, def, Some(class))?.wrapper)),
            None => Ok(None),
        }
    };
    let cinit = slot_wrapper(cx, "__cinit__")?;
    let len = slot_wrapper(cx, "__len__")?;
    let mut slots = TypeSlots {
        init: slot_wrapper(cx, "__init__")?,
        repr: slot_wrapper(cx, "__repr__")?,
        str: slot_wrapper(cx, "__str__")?,
        sequence: None,
        traverse: None,
        clear: None,
        getsets: None,
    };

    {
        let w = cx.out.section(Section::Definitions);
        if let Some(size) = freelist {
            emit_freelist(w, &names, size);
        }
        emit_tp_new(w, c, &names, cinit.as_deref(), freelist, gc);
    }
    emit_tp_dealloc(cx, class, c, &names, freelist, gc)?;
    if gc {
        emit_tp_traverse(cx, c, &names)?;
        emit_tp_clear(cx, c, &names)?;
        slots.traverse = Some(names.tp(naming::TP_TRAVERSE_PREFIX));
        slots.clear = Some(names.tp(naming::TP_CLEAR_PREFIX));
    }
    let getsets = emit_getsets(cx, class, c)?;

    let w = cx.out.section(Section::TypeObjects);
    if let Some(len) = len {
        let table = format!("__cx_tp_as_sequence_{}", names.suffix);
        w.open_block(&format!("static PySequenceMethods {} =", table));
        w.writeln(&format!("{}, /*sq_length*/", len));
        w.close_block(";");
        w.newline();
        slots.sequence = Some(table);
    }
    emit_method_table(w, &names, &rows);
    if !getsets.is_empty() {
        let table = names.tp(naming::GETSETS_PREFIX);
        w.open_block(&format!("static struct PyGetSetDef {}[] =", table));
        for entry in &getsets {
            w.writeln(&entry.table_row());
        }
        w.writeln("{0, 0, 0, 0, 0}");
        w.close_block(";");
        w.newline();
        slots.getsets = Some(table);
    }
    let module = cx.module_name.clone();
    let storage = match cx.symbols.get(class.entry) {
        Some(entry) if entry.visibility == Visibility::Public => "DL_EXPORT(PyTypeObject)",
        _ => "static PyTypeObject",
    };
    let w = cx.out.section(Section::TypeObjects);
    emit_type_object(w, &module, class, c, &names, &slots, storage, gc);
    Ok(EmittedClass { ty: class.ty.clone(), freelist, gc })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> ClassType {
        ClassType::new("shapes", "Shape")
    }

    #[test]
    fn freelist_defaults_only_apply_to_root_classes() {
        let mut c = root();
        assert_eq!(freelist_size(&c, 0), None);
        assert_eq!(freelist_size(&c, 8), Some(8));
        c.freelist = Some(4);
        assert_eq!(freelist_size(&c, 8), Some(4));
        let mut derived = ClassType::new("shapes", "Square");
        derived.base = Some(Type::class(c));
        derived.freelist = Some(4);
        assert_eq!(freelist_size(&derived, 8), None);
    }

    #[test]
    fn tp_new_sets_vtable_and_object_fields() {
        let mut c = root();
        c.fields.push(Field::new("name", Type::object()));
        c.fields.push(Field::new("sides", Type::c_int()));
        let names = ClassNames::new(&c);
        let mut w = CodeWriter::new();
        emit_tp_new(&mut w, &c, &names, Some("__cx_pw_shapes_Shape___cinit__"), Some(4), true);
        let text = w.into_string();
        assert!(text.contains("p->name = Py_None; Py_INCREF(Py_None);"));
        assert!(!text.contains("p->sides"));
        assert!(text.contains("memset(o, 0, sizeof(struct __cx_obj_shapes_Shape));"));
        assert!(text.contains("PyObject_GC_Track(o);"));
        assert!(text.contains("if (unlikely(__cx_pw_shapes_Shape___cinit__(o, a, k) < 0)) goto bad;"));
        assert!(text.contains("Py_DECREF(o); o = 0;"));
    }
}

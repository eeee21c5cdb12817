mod common;

use cextc::ast::{build, CmpOp, Expr, FuncKind, Pos, TypeImport};
use cextc::diagnostics::{codes, DiagnosticLevel};
use cextc::options::{CleanupLevel, CompileOptions};
use cextc::semantic::Visibility;
use cextc::types::{Builtin, ClassType, Field, NumericKind, NumericType, Type, TypeRef};
use cextc::{compile, CompileOutput};
use common::{function_text, Fixture};

fn generate(fx: Fixture, options: &CompileOptions) -> CompileOutput {
    compile(fx.module, &fx.symbols, options)
}

fn main_unit(out: &CompileOutput) -> &str {
    match &out.main_unit {
        Some(text) => text,
        None => panic!("no main unit, diagnostics: {:#?}", out.diagnostics),
    }
}

fn position(text: &str, needle: &str) -> usize {
    text.find(needle).unwrap_or_else(|| panic!("'{}' not found in:\n{}", needle, text))
}

#[test]
fn empty_module_layout() {
    let out = generate(Fixture::new(), &CompileOptions::default());
    let unit = main_unit(&out);
    assert!(out.diagnostics.is_empty());
    assert!(out.header.is_none());
    assert!(out.api_header.is_none());

    let preamble = position(unit, "/* --- Preamble --- */");
    let init_globals = position(unit, "static int __cx_InitGlobals(void) {");
    let init = position(unit, "PyMODINIT_FUNC PyInit_demo(void) {");
    let table = position(unit, "/* --- Filename table --- */");
    assert!(preamble < init_globals && init_globals < init && init < table);
    assert_eq!(unit.rfind("/* --- "), Some(table));

    assert!(unit.contains("static const char *__cx_f[];"));
    assert!(unit.contains("  \"demo.pyx\",\n  0\n};"));
    assert!(unit.contains("\"demo\", /*m_name*/"));
    assert!(unit.contains("0 /*m_free*/"));
    assert!(unit.contains("__cx_m = PyModule_Create(&__cx_moduledef);"));
    assert!(!unit.contains("int main("));
}

#[test]
fn derived_dealloc_chains_to_local_base() {
    let mut fx = Fixture::new();
    let mut shape = ClassType::new("demo", "Shape");
    shape.fields.push(Field::new("name", Type::object()));
    let mut square = ClassType::new("demo", "Square");
    square.base = Some(Type::class(shape.clone()));
    square.fields.push(Field::new("label", Type::object()));
    let shape_def = fx.class(shape);
    let square_def = fx.class(square);
    fx.module.classes.push(shape_def);
    fx.module.classes.push(square_def);

    let out = generate(fx, &CompileOptions::default());
    let unit = main_unit(&out);

    let base = function_text(unit, "static void __cx_tp_dealloc_demo_Shape(PyObject *o)");
    assert!(base.contains("Py_CLEAR(p->name);"));
    assert!(base.contains("(*Py_TYPE(o)->tp_free)(o);"));

    let derived = function_text(unit, "static void __cx_tp_dealloc_demo_Square(PyObject *o)");
    assert!(derived.contains("Py_CLEAR(p->label);"));
    assert!(!derived.contains("p->name"));
    assert!(derived.contains("__cx_ptype_demo_Shape->tp_dealloc(o);"));
    assert!(!derived.contains("__cx_call_next_tp_dealloc"));

    let ready_base = position(unit, "PyType_Ready(&__cx_type_demo_Shape)");
    let set_base = position(unit, "__cx_type_demo_Square.tp_base = __cx_ptype_demo_Shape;");
    assert!(ready_base < set_base);
}

#[test]
fn external_base_falls_back_to_next_dealloc() {
    let mut fx = Fixture::new();
    let mut node = ClassType::new("lib", "Node");
    node.is_external = true;
    let node_ty = Type::class(node.clone());
    fx.module.type_imports.push(TypeImport { module: "lib".into(), ty: node_ty.clone() });
    let mut leaf = ClassType::new("demo", "Leaf");
    leaf.base = Some(node_ty);
    let leaf_def = fx.class(leaf);
    fx.module.classes.push(leaf_def);

    let out = generate(fx, &CompileOptions::default());
    let unit = main_unit(&out);

    let dealloc = function_text(unit, "static void __cx_tp_dealloc_demo_Leaf(PyObject *o)");
    assert!(dealloc.contains(
        "if (likely(__cx_ptype_lib_Node)) __cx_ptype_lib_Node->tp_dealloc(o); \
         else __cx_call_next_tp_dealloc(o, __cx_tp_dealloc_demo_Leaf);"
    ));
    assert!(unit.contains("static void __cx_call_next_tp_dealloc(PyObject *obj, destructor current_tp_dealloc) {"));
    assert!(unit.contains(
        "__cx_ptype_lib_Node = __cx_ImportType(\"lib\", \"Node\", sizeof(struct __cx_obj_lib_Node));"
    ));
    assert!(!unit.contains("PyType_Ready(&__cx_type_lib_Node)"));
}

#[test]
fn shared_snippet_is_emitted_once() {
    let mut fx = Fixture::new();
    for i in 0..3 {
        let a = fx.param("a", Type::object());
        let b = fx.param("b", Type::object());
        let def = fx.function(&format!("f{}", i), FuncKind::Def, vec![a, b], Type::object());
        fx.module.functions.push(def);
    }

    let out = generate(fx, &CompileOptions::default());
    let unit = main_unit(&out);
    // Prototype plus definition.
    assert_eq!(unit.matches("static int __cx_ParseArgs(PyObject *args").count(), 2);
    assert_eq!(unit.matches("__cx_ParseArgs(__cx_args, __cx_kwds, ").count(), 3);
    for i in 0..3 {
        assert!(unit.contains(&format!(
            "{{\"f{i}\", (PyCFunction)(void (*)(void))__cx_pw_demo_f{i}, METH_VARARGS|METH_KEYWORDS, 0}},"
        )));
    }
}

#[test]
fn public_declarations_go_to_the_header() {
    let mut fx = Fixture::new();
    let x = fx.param("x", Type::c_double());
    let area = fx.function("area", FuncKind::Cdef, vec![x], Type::c_double());
    fx.set_visibility(area.entry, Visibility::Public);
    fx.module.functions.push(area);
    let counter = fx.global("counter", Type::c_int());
    fx.set_visibility(counter, Visibility::Public);

    let out = generate(fx, &CompileOptions::default());
    let unit = main_unit(&out);
    assert!(unit.contains("DL_EXPORT(double) __cx_f_demo_area(double __cx_v_x) {"));
    assert!(unit.contains("DL_EXPORT(int) __cx_v_demo_counter;"));

    let header = out.header.as_deref().expect("public header");
    assert!(header.starts_with("#ifndef __CX_HAVE__demo\n#define __CX_HAVE__demo\n"));
    assert!(header.contains("CX_EXTERN_C DL_IMPORT(double) __cx_f_demo_area(double);"));
    assert!(header.contains("CX_EXTERN_C DL_IMPORT(int) __cx_v_demo_counter;"));
    assert!(header.contains("PyMODINIT_FUNC PyInit_demo(void);"));
    assert!(header.trim_end().ends_with("#endif /* !__CX_HAVE__demo */"));
    assert!(out.api_header.is_none());
}

#[test]
fn api_functions_are_exported_and_importable() {
    let mut fx = Fixture::new();
    let x = fx.param("x", Type::c_double());
    let scale = fx.function("scale", FuncKind::Cdef, vec![x], Type::c_double());
    fx.set_api(scale.entry);
    fx.module.functions.push(scale);

    let out = generate(fx, &CompileOptions::default());
    let unit = main_unit(&out);
    assert!(unit.contains(
        "__cx_ExportFunction(\"scale\", (void (*)(void))__cx_f_demo_scale, \"double (double)\") < 0"
    ));

    let api = out.api_header.as_deref().expect("api header");
    assert!(api.contains("#ifndef __CX_HAVE_API__demo"));
    assert!(api.contains("static double (*__cx_api_f_demo_scale)(double) = 0;"));
    assert!(api.contains("#define scale __cx_api_f_demo_scale"));
    assert!(api.contains("static int import_demo(void) {"));
    assert!(api.contains(
        "if (__cx_ImportFunction_demo(module, \"scale\", (void (**)(void))&__cx_api_f_demo_scale, \"double (double)\") < 0) goto bad;"
    ));
    assert!(!api.contains("__cx_ImportFunction("));
}

#[test]
fn full_cleanup_releases_globals_and_constants() {
    let mut fx = Fixture::new();
    fx.global("cache", Type::object());
    let options = CompileOptions { generate_cleanup_code: CleanupLevel::CONSTANTS, ..CompileOptions::default() };

    let out = generate(fx, &options);
    let unit = main_unit(&out);
    assert!(unit.contains("static void __cx_module_cleanup(void *self);"));
    assert!(unit.contains("__cx_module_cleanup /*m_free*/"));
    let cleanup = function_text(unit, "static void __cx_module_cleanup(CX_UNUSED void *self)");
    assert!(cleanup.contains("Py_CLEAR(__cx_v_demo_cache);"));
    assert!(cleanup.contains("Py_CLEAR(__cx_empty_tuple);"));
    assert!(cleanup.contains("__cx_m = 0;"));
}

#[test]
fn globals_only_cleanup_keeps_constants() {
    let mut fx = Fixture::new();
    fx.global("cache", Type::object());
    let options = CompileOptions { generate_cleanup_code: CleanupLevel::GLOBALS, ..CompileOptions::default() };

    let out = generate(fx, &options);
    let cleanup = function_text(main_unit(&out), "static void __cx_module_cleanup(CX_UNUSED void *self)");
    assert!(cleanup.contains("Py_CLEAR(__cx_v_demo_cache);"));
    assert!(!cleanup.contains("/* constants */"));
    assert!(!cleanup.contains("/* types */"));
}

#[test]
fn embedded_main_imports_the_module() {
    let options = CompileOptions { embed_main_entrypoint: true, ..CompileOptions::default() };
    let out = generate(Fixture::new(), &options);
    let unit = main_unit(&out);
    let main = function_text(unit, "int main(CX_UNUSED int argc, CX_UNUSED char **argv)");
    assert!(main.contains("PyImport_AppendInittab(\"demo\", PyInit_demo) < 0"));
    assert!(main.contains("m = PyImport_ImportModule(\"demo\");"));
    assert!(position(unit, "PyMODINIT_FUNC PyInit_demo(void) {") < position(unit, "int main("));
}

#[test]
fn loop_else_runs_before_the_break_label() {
    let mut fx = Fixture::new();
    let n = fx.param("n", Type::c_long());
    let n_id = n.entry;
    let def = fx.function("first", FuncKind::Cdef, vec![n], Type::c_long());
    let var = || build::name("n", n_id, Type::c_long());
    let body = vec![
        build::while_loop(
            build::compare(var(), CmpOp::Gt, build::int(0)),
            vec![build::break_stmt()],
            Some(vec![build::assign(var(), build::int(5))]),
        ),
        build::return_stmt(Some(var())),
    ];
    fx.module.functions.push(Fixture::with_body(def, body));

    let out = generate(fx, &CompileOptions::default());
    let func = function_text(main_unit(&out), "static long __cx_f_demo_first(long __cx_v_n)");
    let jump = position(func, "_break;");
    let orelse = position(func, "__cx_v_n = 5;");
    let label = position(func, "_break:;");
    assert!(jump < orelse && orelse < label);
    assert!(func.contains("while (1) {"));
}

fn five_item_loop(breaks: bool) -> String {
    let mut fx = Fixture::new();
    let n = fx.param("n", Type::c_long());
    let n_id = n.entry;
    let x_id = fx.local("x", Type::c_long());
    let mut def = fx.function("pick", FuncKind::Cdef, vec![n], Type::c_long());
    def.locals.push(x_id);
    let n_var = || build::name("n", n_id, Type::c_long());
    let x_var = || build::name("x", x_id, Type::c_long());
    let body = if breaks {
        vec![build::if_else(build::compare(x_var(), CmpOp::Eq, n_var()), vec![build::break_stmt()], None)]
    } else {
        vec![build::assign(n_var(), x_var())]
    };
    let items = build::tuple((1..=5).map(build::int).collect());
    let stmts = vec![
        build::for_in(x_var(), items, body, Some(vec![build::assign(n_var(), build::int(0))])),
        build::return_stmt(Some(n_var())),
    ];
    fx.module.functions.push(Fixture::with_body(def, stmts));

    let out = generate(fx, &CompileOptions::default());
    function_text(main_unit(&out), "static long __cx_f_demo_pick(long __cx_v_n)").to_string()
}

#[test]
fn breaking_fixed_loop_skips_its_else() {
    let func = five_item_loop(true);
    assert!(!func.contains("PyObject_GetIter"));
    let jump = position(&func, "goto __cx_L");
    let orelse = position(&func, "__cx_v_n = 0;");
    let label = position(&func, "_break:;");
    assert!(jump < orelse && orelse < label);
}

#[test]
fn completing_fixed_loop_falls_into_its_else() {
    let func = five_item_loop(false);
    assert!(!func.contains("PyObject_GetIter"));
    assert!(!func.contains("_break"));
    let store = position(&func, "__cx_v_n = __cx_v_x;");
    let orelse = position(&func, "__cx_v_n = 0;");
    assert!(store < orelse);
}

/// `return sum(<element> for x in a)` with `a` a five-element C array.
fn sum_over_array(elem: TypeRef, element: impl Fn(Expr) -> Expr) -> String {
    let mut fx = Fixture::new();
    let sum = fx.builtin("sum");
    let a_id = fx.local("a", Type::array(elem.clone(), Some(5)));
    let x_id = fx.local("x", elem.clone());
    let mut def = fx.function("total", FuncKind::Cdef, vec![], Type::object());
    def.locals.extend([a_id, x_id]);
    let x = || build::name("x", x_id, elem.clone());
    let gen = build::generator(x(), build::name("a", a_id, Type::array(elem.clone(), Some(5))), None, element(x()));
    let call = build::call(build::name("sum", sum, Type::object()), vec![gen], Type::object());
    fx.module.functions.push(Fixture::with_body(def, vec![build::return_stmt(Some(call))]));

    let out = generate(fx, &CompileOptions::default());
    function_text(main_unit(&out), "static PyObject *__cx_f_demo_total(void)").to_string()
}

#[test]
fn sum_of_comparisons_counts_in_an_integer() {
    let func = sum_over_array(Type::c_int(), |x| build::compare(x, CmpOp::Gt, build::int(0)));
    assert!(!func.contains("PyObject_GetIter"));
    assert!(func.contains("Py_ssize_t __cx_t_"));
    assert!(func.contains("PyLong_FromSsize_t("));
    assert!(!func.contains("PyBool_FromLong"));
}

#[test]
fn sum_of_small_unsigned_values_does_not_wrap() {
    let uchar = Type::numeric(NumericType::unsigned(NumericKind::Char));
    let func = sum_over_array(uchar, |x| x);
    assert!(func.contains("Py_ssize_t __cx_t_"));
    assert!(!func.contains("unsigned char __cx_t_"));
    assert!(func.contains("PyLong_FromSsize_t("));
}

/// `for k in d` or `for k in d.<method>()` over a dict parameter.
fn dict_walk(method: Option<&str>) -> (String, String) {
    let mut fx = Fixture::new();
    let dict_ty = Type::builtin(Builtin::Dict);
    let d = fx.param("d", dict_ty.clone());
    let d_id = d.entry;
    let k = fx.local("k", Type::object());
    let mut def = fx.function("walk", FuncKind::Cdef, vec![d], Type::object());
    def.locals.push(k);
    let subject = build::name("d", d_id, dict_ty);
    let iter = match method {
        Some(m) => build::call(build::attr(subject, m, Type::object()), vec![], Type::object()),
        None => subject,
    };
    let body = vec![build::for_in(build::name("k", k, Type::object()), iter, vec![build::pass()], None)];
    fx.module.functions.push(Fixture::with_body(def, body));

    let out = generate(fx, &CompileOptions::default());
    let unit = main_unit(&out).to_string();
    let func = function_text(&unit, "static PyObject *__cx_f_demo_walk(PyObject *__cx_v_d)").to_string();
    (unit, func)
}

#[test]
fn dict_loop_checks_the_size_snapshot_every_step() {
    let (unit, func) = dict_walk(None);
    assert_eq!(unit.matches("static CX_INLINE int __cx_dict_iter_next(PyObject *dict, Py_ssize_t orig_length").count(), 2);
    assert!(!func.contains("PyObject_GetIter"));

    let size_line = func.lines().find(|l| l.contains("= PyDict_Size(")).expect("size snapshot");
    let snapshot = size_line.trim().split(" = ").next().expect("snapshot temp");
    let step = func.lines().find(|l| l.contains("__cx_dict_iter_next(")).expect("iteration step");
    assert!(step.contains(&format!(", {}, &", snapshot)), "{}", step);
    assert!(position(&func, "= PyDict_Size(") < position(&func, "for (;;)"));
    assert!(position(&func, "for (;;)") < position(&func, "__cx_dict_iter_next("));
}

#[test]
fn iterating_none_as_a_dict_is_a_type_error() {
    let (_, func) = dict_walk(None);
    assert!(func.contains("PyErr_SetString(PyExc_TypeError, \"'NoneType' object is not iterable\");"));
    assert!(!func.contains("PyExc_AttributeError"));
}

#[test]
fn none_dict_view_call_is_an_attribute_error() {
    let (_, func) = dict_walk(Some("keys"));
    assert!(func.contains("PyErr_SetString(PyExc_AttributeError, \"'NoneType' object has no attribute 'keys'\");"));
    assert!(!func.contains("PyExc_TypeError"));
}

#[test]
fn code_after_return_is_dropped_with_a_warning() {
    let mut fx = Fixture::new();
    let def = fx.function("early", FuncKind::Cdef, vec![], Type::c_int());
    let body = vec![
        build::return_stmt(Some(build::int(1))),
        build::return_stmt(Some(build::int(2))).at(Pos::new(0, 7, 5)),
    ];
    fx.module.functions.push(Fixture::with_body(def, body));

    let out = generate(fx, &CompileOptions::default());
    let unit = main_unit(&out);
    assert!(unit.contains("static int __cx_f_demo_early(void) {"));
    assert_eq!(out.diagnostics.len(), 1);
    let warning = &out.diagnostics[0];
    assert_eq!(warning.level, DiagnosticLevel::Warning);
    assert_eq!(warning.code, codes::UNREACHABLE_CODE);
    assert_eq!(warning.location.as_ref().map(|l| (l.file.as_str(), l.line)), Some(("demo.pyx", 7)));
}

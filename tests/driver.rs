mod common;

use cextc::ast::FuncKind;
use cextc::diagnostics::codes;
use cextc::driver::OptionOverrides;
use cextc::options::{CleanupLevel, CompileOptions};
use cextc::types::{FusedType, Type, TypeRef};
use cextc::{compile, CompilationInput, Driver};
use common::Fixture;
use std::path::Path;
use std::rc::Rc;

fn number() -> TypeRef {
    Rc::new(Type::Fused(FusedType { name: "number".into(), alternatives: vec![Type::c_int(), Type::c_double()] }))
}

fn to_json(fx: Fixture, options: Option<CompileOptions>) -> String {
    let input = CompilationInput { module: fx.module, symbols: fx.symbols, options };
    serde_json::to_string(&input).expect("input serializes")
}

#[test]
fn minimal_input_compiles() {
    let json = r#"{"module": {"name": "demo", "filename_table": ["demo.pyx"]}}"#;
    let mut driver = Driver::new("demo.json".into(), json.into());
    let out = driver.compile().expect("compiles");
    let unit = out.main_unit.expect("main unit");
    assert!(unit.contains("PyMODINIT_FUNC PyInit_demo(void) {"));
    assert!(unit.contains("\"demo.pyx\","));
}

#[test]
fn serialized_input_keeps_its_options() {
    let mut fx = Fixture::new();
    fx.global("cache", Type::object());
    let options = CompileOptions { generate_cleanup_code: CleanupLevel::GLOBALS, ..CompileOptions::default() };
    let mut driver = Driver::new("demo.json".into(), to_json(fx, Some(options)));

    let out = driver.compile().expect("compiles");
    let unit = out.main_unit.expect("main unit");
    assert!(unit.contains("static PyObject *__cx_v_demo_cache = 0;"));
    assert!(unit.contains("__cx_module_cleanup /*m_free*/"));
}

#[test]
fn malformed_json_is_an_input_error() {
    let mut driver = Driver::new("broken.json".into(), "{\"module\": ".into());
    let diags = driver.compile().expect_err("rejected");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, codes::INVALID_INPUT);
    assert!(diags[0].message.contains("broken.json"));
}

#[test]
fn command_line_overrides_win() {
    let options = CompileOptions { embed_main_entrypoint: false, ..CompileOptions::default() };
    let mut driver = Driver::new("demo.json".into(), to_json(Fixture::new(), Some(options)));
    driver.set_overrides(OptionOverrides {
        embed_main: true,
        cleanup_level: Some(CleanupLevel::CONSTANTS),
        ..OptionOverrides::default()
    });

    let unit = driver.compile().expect("compiles").main_unit.expect("main unit");
    assert!(unit.contains("int main(CX_UNUSED int argc, CX_UNUSED char **argv) {"));
    assert!(unit.contains("/* constants */"));
}

#[test]
fn fused_def_is_rejected() {
    let mut fx = Fixture::new();
    let x = fx.param("x", number());
    let def = fx.function("twice", FuncKind::Def, vec![x], number());
    fx.module.functions.push(def);

    let out = compile(fx.module, &fx.symbols, &CompileOptions::default());
    assert!(out.main_unit.is_none());
    assert!(out.has_errors());
    assert!(out.diagnostics.iter().any(|d| d.code == codes::UNSUPPORTED_CONSTRUCT));
}

#[test]
fn fused_global_is_an_internal_error() {
    let mut fx = Fixture::new();
    fx.global("value", number());
    let mut driver = Driver::new("demo.json".into(), to_json(fx, None));

    let diags = driver.compile().expect_err("no output");
    assert!(diags.iter().any(|d| d.code == codes::INTERNAL_ERROR));
}

#[test]
fn missing_input_file_is_unreadable() {
    let err = Driver::from_path(Path::new("no/such/dir/demo.json")).err().expect("read fails");
    assert_eq!(err.code, codes::UNREADABLE_INPUT);
    assert!(err.message.contains("demo.json"));
    assert_eq!(err.notes.len(), 1);
}

#[test]
fn diagnostics_quote_the_source_next_to_the_input() {
    let dir = std::env::temp_dir().join(format!("cextc-driver-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    std::fs::write(dir.join("demo.pyx"), "def twice(x):\n    return x + x\n").expect("source written");

    let mut fx = Fixture::new();
    let x = fx.param("x", number());
    let def = fx.function("twice", FuncKind::Def, vec![x], number());
    fx.module.functions.push(def);
    let input = dir.join("demo.json");
    std::fs::write(&input, to_json(fx, None)).expect("input written");

    let mut driver = Driver::from_path(&input).expect("input readable");
    let diags = driver.compile().expect_err("rejected");
    let _ = std::fs::remove_dir_all(&dir);

    let diag = diags.iter().find(|d| d.code == codes::UNSUPPORTED_CONSTRUCT).expect("fused def reported");
    assert_eq!(diag.source_line.as_deref(), Some("def twice(x):"));
    assert_eq!(diag.location.as_ref().map(|l| l.line), Some(1));
}

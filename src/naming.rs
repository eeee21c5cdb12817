//! C identifiers reserved by the generated code.

pub const PREFIX: &str = "__cx_";

pub const OBJSTRUCT_PREFIX: &str = "__cx_obj_";
pub const TYPEOBJ_PREFIX: &str = "__cx_type_";
pub const TYPEPTR_PREFIX: &str = "__cx_ptype_";
pub const VTABSTRUCT_PREFIX: &str = "__cx_vtabstruct_";
pub const VTABPTR_PREFIX: &str = "__cx_vtabptr_";
pub const VTABLE_PREFIX: &str = "__cx_vtable_";

pub const FUNC_PREFIX: &str = "__cx_f_";
pub const PYFUNC_PREFIX: &str = "__cx_pf_";
pub const PYWRAP_PREFIX: &str = "__cx_pw_";
pub const METHDEF_PREFIX: &str = "__cx_mdef_";
pub const GETTER_PREFIX: &str = "__cx_getprop_";
pub const SETTER_PREFIX: &str = "__cx_setprop_";
pub const TP_NEW_PREFIX: &str = "__cx_tp_new_";
pub const TP_DEALLOC_PREFIX: &str = "__cx_tp_dealloc_";
pub const TP_TRAVERSE_PREFIX: &str = "__cx_tp_traverse_";
pub const TP_CLEAR_PREFIX: &str = "__cx_tp_clear_";
pub const METHODS_PREFIX: &str = "__cx_methods_";
pub const GETSETS_PREFIX: &str = "__cx_getsets_";
pub const FREELIST_PREFIX: &str = "__cx_freelist_";
pub const FREECOUNT_PREFIX: &str = "__cx_freecount_";

pub const VAR_PREFIX: &str = "__cx_v_";
pub const TEMP_PREFIX: &str = "__cx_t_";
pub const LABEL_PREFIX: &str = "__cx_L";
pub const INTERNED_PREFIX: &str = "__cx_n_s_";
pub const STRING_PREFIX: &str = "__cx_kp_";
pub const INT_PREFIX: &str = "__cx_int_";
pub const FLOAT_PREFIX: &str = "__cx_float_";
pub const API_FUNC_PREFIX: &str = "__cx_api_f_";

/// Struct member holding the embedded base object or vtable.
pub const BASE_MEMBER: &str = "__cx_base";
/// Object struct member pointing at the vtable.
pub const VTAB_MEMBER: &str = "__cx_vtab";

pub const MODULE_CNAME: &str = "__cx_m";
pub const MODULE_DICT_CNAME: &str = "__cx_d";
pub const BUILTINS_CNAME: &str = "__cx_b";
pub const EMPTY_TUPLE_CNAME: &str = "__cx_empty_tuple";
pub const MODULEDEF_CNAME: &str = "__cx_moduledef";
pub const MODULE_METHODS_CNAME: &str = "__cx_module_methods";
pub const STRING_TABLE_CNAME: &str = "__cx_string_tab";
pub const FILENAME_TABLE_CNAME: &str = "__cx_f";
pub const FILENAME_CNAME: &str = "__cx_filename";
pub const LINENO_CNAME: &str = "__cx_lineno";
pub const CLINENO_CNAME: &str = "__cx_clineno";
pub const RETVAL_CNAME: &str = "__cx_r";
pub const INIT_GLOBALS_CNAME: &str = "__cx_InitGlobals";
pub const CLEANUP_CNAME: &str = "__cx_module_cleanup";
pub const CAPI_DICT_NAME: &str = "__cx_capi__";
pub const VTABLE_DICT_KEY: &str = "__cx_vtable__";

/// Joins a module and a local name into one C-safe identifier.
pub fn mangle(module: &str, name: &str) -> String {
    format!("{}_{}", sanitize(module).replace('.', "__"), sanitize(name))
}

/// Replaces every character that is not valid in a C identifier.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

pub fn init_function_name(module: &str) -> String {
    format!("PyInit_{}", module_leaf(module))
}

/// The last dotted component of a module name.
pub fn module_leaf(module: &str) -> &str {
    module.rsplit('.').next().unwrap_or(module)
}

pub fn header_guard(module: &str, api: bool) -> String {
    let kind = if api { "HAVE_API" } else { "HAVE" };
    format!("__CX_{}__{}", kind, sanitize(module).replace('.', "__"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangles_dotted_modules() {
        assert_eq!(mangle("pkg.mod", "Foo"), "pkg__mod_Foo");
        assert_eq!(init_function_name("pkg.mod"), "PyInit_mod");
    }
}

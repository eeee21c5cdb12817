//! Bundled C helpers.
//!
//! Fixed helpers are looked up by `(catalog, name)`; helpers that depend
//! on a C type or an option are built by the functions at the bottom and
//! registered under a name that includes the parameter.

use super::UtilitySnippet;
use crate::options::StringEncoding;
use crate::types::{NumericKind, NumericType, Signedness};

pub const OBJECT_HANDLING: &str = "ObjectHandling";
pub const EXCEPTIONS: &str = "Exceptions";
pub const MODULE_SETUP: &str = "ModuleSetup";
pub const EXTENSION_TYPE: &str = "ExtensionType";
pub const TYPE_CONVERSION: &str = "TypeConversion";
pub const ARITHMETIC: &str = "Arithmetic";

/// Label the constant initialization function jumps to on failure; init
/// text of snippets may use it.
pub const INIT_ERROR_LABEL: &str = "__cx_L1_error";

pub fn lookup(catalog: &str, name: &str) -> Option<UtilitySnippet> {
    let snippet = match (catalog, name) {
        (OBJECT_HANDLING, "PyObjectGetAttrStr") => UtilitySnippet::new(catalog, name, GET_ATTR_STR)
            .with_proto("static CX_INLINE PyObject *__cx_PyObject_GetAttrStr(PyObject *obj, PyObject *attr_name);"),
        (OBJECT_HANDLING, "GetBuiltinName") => UtilitySnippet::new(catalog, name, GET_BUILTIN_NAME)
            .with_proto("static PyObject *__cx_GetBuiltinName(PyObject *name);")
            .requires(OBJECT_HANDLING, "PyObjectGetAttrStr"),
        (OBJECT_HANDLING, "GetModuleGlobalName") => UtilitySnippet::new(catalog, name, GET_MODULE_GLOBAL_NAME)
            .with_proto("static PyObject *__cx_GetModuleGlobalName(PyObject *name);")
            .requires(OBJECT_HANDLING, "GetBuiltinName"),
        (OBJECT_HANDLING, "PyObjectCall") => UtilitySnippet::new(catalog, name, OBJECT_CALL)
            .with_proto("static CX_INLINE PyObject *__cx_PyObject_Call(PyObject *func, PyObject *args, PyObject *kw);"),
        (OBJECT_HANDLING, "PyObjectCallNoArg") => UtilitySnippet::new(catalog, name, OBJECT_CALL_NO_ARG)
            .with_proto("static CX_INLINE PyObject *__cx_PyObject_CallNoArg(PyObject *func);")
            .requires(OBJECT_HANDLING, "PyObjectCall"),
        (OBJECT_HANDLING, "PyObjectCallOneArg") => UtilitySnippet::new(catalog, name, OBJECT_CALL_ONE_ARG)
            .with_proto("static PyObject *__cx_PyObject_CallOneArg(PyObject *func, PyObject *arg);")
            .requires(OBJECT_HANDLING, "PyObjectCall"),
        (OBJECT_HANDLING, "GetItemInt") => UtilitySnippet::new(catalog, name, GET_ITEM_INT)
            .with_proto("static PyObject *__cx_GetItemInt_Fast(PyObject *o, Py_ssize_t i);"),
        (OBJECT_HANDLING, "ListAppend") => UtilitySnippet::new(catalog, name, LIST_APPEND)
            .with_proto("static CX_INLINE int __cx_PyList_Append(PyObject *list, PyObject *x);"),
        (OBJECT_HANDLING, "DictIterNext") => UtilitySnippet::new(catalog, name, DICT_ITER_NEXT).with_proto(
            "static CX_INLINE int __cx_dict_iter_next(PyObject *dict, Py_ssize_t orig_length, Py_ssize_t *ppos, PyObject **pkey, PyObject **pvalue);",
        ),
        (OBJECT_HANDLING, "UnpackIterable") => UtilitySnippet::new(catalog, name, UNPACK_ITERABLE).with_proto(
            "static PyObject *__cx_UnpackItem(PyObject *iter, Py_ssize_t index, Py_ssize_t expected);\nstatic int __cx_UnpackEnd(PyObject *iter, Py_ssize_t expected);",
        ),

        (EXCEPTIONS, "RaiseArgtupleInvalid") => UtilitySnippet::new(catalog, name, RAISE_ARGTUPLE_INVALID).with_proto(
            "static void __cx_RaiseArgtupleInvalid(const char *func_name, int exact, Py_ssize_t num_min, Py_ssize_t num_max, Py_ssize_t num_found);",
        ),
        (EXCEPTIONS, "ParseArgs") => UtilitySnippet::new(catalog, name, PARSE_ARGS)
            .with_proto(
                "static int __cx_ParseArgs(PyObject *args, PyObject *kwds, const char *func_name, const char *const *names, PyObject **values, Py_ssize_t num_required, Py_ssize_t num_total);",
            )
            .requires(EXCEPTIONS, "RaiseArgtupleInvalid"),
        (EXCEPTIONS, "ArgTypeTest") => UtilitySnippet::new(catalog, name, ARG_TYPE_TEST).with_proto(
            "static int __cx_ArgTypeTest(PyObject *obj, PyTypeObject *type, int none_allowed, const char *name);",
        ),
        (EXCEPTIONS, "TypeTest") => UtilitySnippet::new(catalog, name, TYPE_TEST)
            .with_proto("static CX_INLINE int __cx_TypeTest(PyObject *obj, PyTypeObject *type);"),
        (EXCEPTIONS, "Raise") => {
            UtilitySnippet::new(catalog, name, RAISE).with_proto("static void __cx_Raise(PyObject *exc);")
        }
        (EXCEPTIONS, "AddTraceback") => UtilitySnippet::new(catalog, name, ADD_TRACEBACK).with_proto(
            "static void __cx_AddTraceback(const char *funcname, int c_line, int py_line, const char *filename);",
        ),
        (EXCEPTIONS, "WriteUnraisable") => UtilitySnippet::new(catalog, name, WRITE_UNRAISABLE)
            .with_proto("static void __cx_WriteUnraisable(const char *name);"),

        (MODULE_SETUP, "InitStrings") => UtilitySnippet::new(catalog, name, INIT_STRINGS).with_proto(STRING_TAB_PROTO),
        (MODULE_SETUP, "ImportType") => UtilitySnippet::new(catalog, name, IMPORT_TYPE).with_proto(
            "static PyTypeObject *__cx_ImportType(const char *module_name, const char *class_name, size_t size);",
        ),
        (MODULE_SETUP, "ImportFunction") => UtilitySnippet::new(catalog, name, IMPORT_FUNCTION).with_proto(
            "static int __cx_ImportFunction(PyObject *module, const char *funcname, void (**f)(void), const char *sig);",
        ),
        (MODULE_SETUP, "ExportFunction") => UtilitySnippet::new(catalog, name, EXPORT_FUNCTION)
            .with_proto("static int __cx_ExportFunction(const char *name, void (*f)(void), const char *sig);"),

        (EXTENSION_TYPE, "SetVtable") => UtilitySnippet::new(catalog, name, SET_VTABLE)
            .with_proto("static int __cx_SetVtable(PyObject *dict, void *vtable);"),
        (EXTENSION_TYPE, "GetVtable") => UtilitySnippet::new(catalog, name, GET_VTABLE)
            .with_proto("static void *__cx_GetVtable(PyObject *dict);"),
        (EXTENSION_TYPE, "CallNextTpDealloc") => UtilitySnippet::new(catalog, name, CALL_NEXT_TP_DEALLOC)
            .with_proto("static void __cx_call_next_tp_dealloc(PyObject *obj, destructor current_tp_dealloc);"),
        (EXTENSION_TYPE, "CallNextTpTraverse") => UtilitySnippet::new(catalog, name, CALL_NEXT_TP_TRAVERSE).with_proto(
            "static int __cx_call_next_tp_traverse(PyObject *obj, visitproc v, void *a, traverseproc current_tp_traverse);",
        ),
        (EXTENSION_TYPE, "CallNextTpClear") => UtilitySnippet::new(catalog, name, CALL_NEXT_TP_CLEAR)
            .with_proto("static void __cx_call_next_tp_clear(PyObject *obj, inquiry current_tp_clear);"),

        (TYPE_CONVERSION, "ComplexSupport") => {
            UtilitySnippet::new(catalog, name, "").with_proto("#include <complex.h>")
        }
        _ => return None,
    };
    Some(snippet)
}

const GET_ATTR_STR: &str = r#"static CX_INLINE PyObject *__cx_PyObject_GetAttrStr(PyObject *obj, PyObject *attr_name) {
  PyTypeObject *tp = Py_TYPE(obj);
  if (likely(tp->tp_getattro))
    return tp->tp_getattro(obj, attr_name);
  return PyObject_GetAttr(obj, attr_name);
}"#;

const GET_BUILTIN_NAME: &str = r#"static PyObject *__cx_GetBuiltinName(PyObject *name) {
  PyObject *result = __cx_PyObject_GetAttrStr(__cx_b, name);
  if (unlikely(!result) && PyErr_ExceptionMatches(PyExc_AttributeError)) {
    PyErr_Format(PyExc_NameError, "name '%U' is not defined", name);
  }
  return result;
}"#;

const GET_MODULE_GLOBAL_NAME: &str = r#"static PyObject *__cx_GetModuleGlobalName(PyObject *name) {
  PyObject *result = PyDict_GetItemWithError(__cx_d, name);
  if (likely(result)) {
    Py_INCREF(result);
    return result;
  }
  if (unlikely(PyErr_Occurred()))
    return NULL;
  return __cx_GetBuiltinName(name);
}"#;

const OBJECT_CALL: &str = r#"static CX_INLINE PyObject *__cx_PyObject_Call(PyObject *func, PyObject *args, PyObject *kw) {
  PyObject *result;
  ternaryfunc call = Py_TYPE(func)->tp_call;
  if (unlikely(!call))
    return PyObject_Call(func, args, kw);
  if (unlikely(Py_EnterRecursiveCall(" while calling a Python object")))
    return NULL;
  result = (*call)(func, args, kw);
  Py_LeaveRecursiveCall();
  if (unlikely(!result) && unlikely(!PyErr_Occurred())) {
    PyErr_SetString(PyExc_SystemError, "NULL result without error in PyObject_Call");
  }
  return result;
}"#;

const OBJECT_CALL_NO_ARG: &str = r#"static CX_INLINE PyObject *__cx_PyObject_CallNoArg(PyObject *func) {
  return __cx_PyObject_Call(func, __cx_empty_tuple, NULL);
}"#;

const OBJECT_CALL_ONE_ARG: &str = r#"static PyObject *__cx_PyObject_CallOneArg(PyObject *func, PyObject *arg) {
  PyObject *result;
  PyObject *args = PyTuple_New(1);
  if (unlikely(!args))
    return NULL;
  Py_INCREF(arg);
  PyTuple_SET_ITEM(args, 0, arg);
  result = __cx_PyObject_Call(func, args, NULL);
  Py_DECREF(args);
  return result;
}"#;

const GET_ITEM_INT: &str = r#"static PyObject *__cx_GetItemInt_Fast(PyObject *o, Py_ssize_t i) {
  if (PyList_CheckExact(o)) {
    Py_ssize_t n = likely(i >= 0) ? i : i + PyList_GET_SIZE(o);
    if (likely(n >= 0 && n < PyList_GET_SIZE(o))) {
      PyObject *r = PyList_GET_ITEM(o, n);
      Py_INCREF(r);
      return r;
    }
  } else if (PyTuple_CheckExact(o)) {
    Py_ssize_t n = likely(i >= 0) ? i : i + PyTuple_GET_SIZE(o);
    if (likely(n >= 0 && n < PyTuple_GET_SIZE(o))) {
      PyObject *r = PyTuple_GET_ITEM(o, n);
      Py_INCREF(r);
      return r;
    }
  }
  {
    PyObject *r;
    PyObject *j = PyLong_FromSsize_t(i);
    if (unlikely(!j))
      return NULL;
    r = PyObject_GetItem(o, j);
    Py_DECREF(j);
    return r;
  }
}"#;

const LIST_APPEND: &str = r#"static CX_INLINE int __cx_PyList_Append(PyObject *list, PyObject *x) {
  PyListObject *L = (PyListObject *)list;
  Py_ssize_t len = Py_SIZE(list);
  if (likely(L->allocated > len) && likely(len > (L->allocated >> 1))) {
    Py_INCREF(x);
    PyList_SET_ITEM(list, len, x);
    Py_SET_SIZE(list, len + 1);
    return 0;
  }
  return PyList_Append(list, x);
}"#;

const DICT_ITER_NEXT: &str = r#"static CX_INLINE int __cx_dict_iter_next(PyObject *dict, Py_ssize_t orig_length, Py_ssize_t *ppos, PyObject **pkey, PyObject **pvalue) {
  PyObject *key, *value;
  if (unlikely(orig_length != PyDict_Size(dict))) {
    PyErr_SetString(PyExc_RuntimeError, "dictionary changed size during iteration");
    return -1;
  }
  if (unlikely(!PyDict_Next(dict, ppos, &key, &value)))
    return 0;
  if (pkey) {
    Py_INCREF(key);
    *pkey = key;
  }
  if (pvalue) {
    Py_INCREF(value);
    *pvalue = value;
  }
  return 1;
}"#;

const UNPACK_ITERABLE: &str = r#"static PyObject *__cx_UnpackItem(PyObject *iter, Py_ssize_t index, Py_ssize_t expected) {
  PyObject *item = PyIter_Next(iter);
  if (unlikely(!item) && !PyErr_Occurred()) {
    PyErr_Format(PyExc_ValueError, "not enough values to unpack (expected %zd, got %zd)", expected, index);
  }
  return item;
}

static int __cx_UnpackEnd(PyObject *iter, Py_ssize_t expected) {
  PyObject *extra = PyIter_Next(iter);
  if (unlikely(extra)) {
    Py_DECREF(extra);
    PyErr_Format(PyExc_ValueError, "too many values to unpack (expected %zd)", expected);
    return -1;
  }
  return PyErr_Occurred() ? -1 : 0;
}"#;

const RAISE_ARGTUPLE_INVALID: &str = r#"static void __cx_RaiseArgtupleInvalid(const char *func_name, int exact, Py_ssize_t num_min, Py_ssize_t num_max, Py_ssize_t num_found) {
  Py_ssize_t num_expected;
  const char *more_or_less;
  if (num_found < num_min) {
    num_expected = num_min;
    more_or_less = "at least";
  } else {
    num_expected = num_max;
    more_or_less = "at most";
  }
  if (exact)
    more_or_less = "exactly";
  PyErr_Format(PyExc_TypeError, "%.200s() takes %.8s %zd positional argument%.1s (%zd given)",
               func_name, more_or_less, num_expected, (num_expected == 1) ? "" : "s", num_found);
}"#;

const PARSE_ARGS: &str = r#"static int __cx_ParseArgs(PyObject *args, PyObject *kwds, const char *func_name, const char *const *names, PyObject **values, Py_ssize_t num_required, Py_ssize_t num_total) {
  Py_ssize_t nargs = PyTuple_GET_SIZE(args);
  Py_ssize_t i;
  if (unlikely(nargs > num_total)) {
    __cx_RaiseArgtupleInvalid(func_name, num_required == num_total, num_required, num_total, nargs);
    return -1;
  }
  for (i = 0; i < nargs; i++)
    values[i] = PyTuple_GET_ITEM(args, i);
  for (; i < num_total; i++)
    values[i] = NULL;
  if (kwds) {
    PyObject *key, *value;
    Py_ssize_t pos = 0;
    while (PyDict_Next(kwds, &pos, &key, &value)) {
      Py_ssize_t j;
      if (unlikely(!PyUnicode_Check(key))) {
        PyErr_Format(PyExc_TypeError, "%.200s() keywords must be strings", func_name);
        return -1;
      }
      for (j = 0; j < num_total; j++) {
        if (PyUnicode_CompareWithASCIIString(key, names[j]) == 0)
          break;
      }
      if (unlikely(j == num_total)) {
        PyErr_Format(PyExc_TypeError, "%.200s() got an unexpected keyword argument '%U'", func_name, key);
        return -1;
      }
      if (unlikely(values[j])) {
        PyErr_Format(PyExc_TypeError, "%.200s() got multiple values for argument '%s'", func_name, names[j]);
        return -1;
      }
      values[j] = value;
    }
  }
  for (i = 0; i < num_required; i++) {
    if (unlikely(!values[i])) {
      PyErr_Format(PyExc_TypeError, "%.200s() missing required argument '%s' (pos %zd)", func_name, names[i], i + 1);
      return -1;
    }
  }
  return 0;
}"#;

const ARG_TYPE_TEST: &str = r#"static int __cx_ArgTypeTest(PyObject *obj, PyTypeObject *type, int none_allowed, const char *name) {
  if (unlikely(!type)) {
    PyErr_SetString(PyExc_SystemError, "Missing type object");
    return 0;
  }
  if (none_allowed && obj == Py_None)
    return 1;
  if (likely(PyObject_TypeCheck(obj, type)))
    return 1;
  PyErr_Format(PyExc_TypeError, "Argument '%.200s' has incorrect type (expected %.200s, got %.200s)",
               name, type->tp_name, Py_TYPE(obj)->tp_name);
  return 0;
}"#;

const TYPE_TEST: &str = r#"static CX_INLINE int __cx_TypeTest(PyObject *obj, PyTypeObject *type) {
  if (unlikely(!type)) {
    PyErr_SetString(PyExc_SystemError, "Missing type object");
    return 0;
  }
  if (likely(obj == Py_None || PyObject_TypeCheck(obj, type)))
    return 1;
  PyErr_Format(PyExc_TypeError, "Cannot convert %.200s to %.200s", Py_TYPE(obj)->tp_name, type->tp_name);
  return 0;
}"#;

const RAISE: &str = r#"static void __cx_Raise(PyObject *exc) {
  if (!exc) {
    PyErr_SetString(PyExc_RuntimeError, "No active exception to reraise");
  } else if (PyExceptionClass_Check(exc)) {
    PyErr_SetNone(exc);
  } else if (PyExceptionInstance_Check(exc)) {
    PyErr_SetObject((PyObject *)Py_TYPE(exc), exc);
  } else {
    PyErr_SetString(PyExc_TypeError, "exceptions must derive from BaseException");
  }
}"#;

const ADD_TRACEBACK: &str = r#"static void __cx_AddTraceback(const char *funcname, int c_line, int py_line, const char *filename) {
  PyCodeObject *code = NULL;
  PyFrameObject *frame = NULL;
  PyObject *globals = NULL;
  PyObject *etype, *eval, *etb;
  (void)c_line;
  PyErr_Fetch(&etype, &eval, &etb);
  code = PyCode_NewEmpty(filename, funcname, py_line);
  if (code)
    globals = PyDict_New();
  if (globals)
    frame = PyFrame_New(PyThreadState_Get(), code, globals, NULL);
  PyErr_Restore(etype, eval, etb);
  if (frame)
    PyTraceBack_Here(frame);
  Py_XDECREF(frame);
  Py_XDECREF(globals);
  Py_XDECREF(code);
}"#;

const WRITE_UNRAISABLE: &str = r#"static void __cx_WriteUnraisable(const char *name) {
  PyObject *etype, *eval, *etb, *ctx;
  PyErr_Fetch(&etype, &eval, &etb);
  ctx = PyUnicode_FromString(name);
  PyErr_Restore(etype, eval, etb);
  PyErr_WriteUnraisable(ctx ? ctx : Py_None);
  Py_XDECREF(ctx);
}"#;

const STRING_TAB_PROTO: &str = r#"typedef struct {
  PyObject **p;
  const char *s;
  Py_ssize_t n;
  char is_unicode;
  char intern;
} __cx_StringTabEntry;
static int __cx_InitStrings(__cx_StringTabEntry *t);"#;

const INIT_STRINGS: &str = r#"static int __cx_InitStrings(__cx_StringTabEntry *t) {
  while (t->p) {
    if (t->intern) {
      *t->p = PyUnicode_InternFromString(t->s);
    } else if (t->is_unicode) {
      *t->p = PyUnicode_DecodeUTF8(t->s, t->n - 1, NULL);
    } else {
      *t->p = PyBytes_FromStringAndSize(t->s, t->n - 1);
    }
    if (unlikely(!*t->p))
      return -1;
    if (unlikely(PyObject_Hash(*t->p) == -1))
      return -1;
    ++t;
  }
  return 0;
}"#;

const IMPORT_TYPE: &str = r#"static PyTypeObject *__cx_ImportType(const char *module_name, const char *class_name, size_t size) {
  PyObject *module = NULL;
  PyObject *result = NULL;
  module = PyImport_ImportModule(module_name);
  if (!module)
    goto bad;
  result = PyObject_GetAttrString(module, class_name);
  if (!result)
    goto bad;
  if (!PyType_Check(result)) {
    PyErr_Format(PyExc_TypeError, "%.200s.%.200s is not a type object", module_name, class_name);
    goto bad;
  }
  if ((size_t)((PyTypeObject *)result)->tp_basicsize < size) {
    PyErr_Format(PyExc_ValueError,
                 "%.200s.%.200s size changed, may indicate binary incompatibility. Expected %zd from C header, got %zd from PyObject",
                 module_name, class_name, (Py_ssize_t)size, ((PyTypeObject *)result)->tp_basicsize);
    goto bad;
  }
  Py_DECREF(module);
  return (PyTypeObject *)result;
bad:
  Py_XDECREF(module);
  Py_XDECREF(result);
  return NULL;
}"#;

const IMPORT_FUNCTION: &str = r#"static int __cx_ImportFunction(PyObject *module, const char *funcname, void (**f)(void), const char *sig) {
  PyObject *d = NULL;
  PyObject *cobj = NULL;
  d = PyObject_GetAttrString(module, "__cx_capi__");
  if (!d)
    goto bad;
  cobj = PyDict_GetItemString(d, funcname);
  if (!cobj) {
    PyErr_Format(PyExc_ImportError, "%.200s does not export expected C function %.200s",
                 PyModule_GetName(module), funcname);
    goto bad;
  }
  if (!PyCapsule_IsValid(cobj, sig)) {
    PyErr_Format(PyExc_TypeError, "C function %.200s.%.200s has wrong signature (expected %.500s, got %.500s)",
                 PyModule_GetName(module), funcname, sig, PyCapsule_GetName(cobj));
    goto bad;
  }
  *f = (void (*)(void))PyCapsule_GetPointer(cobj, sig);
  if (!(*f))
    goto bad;
  Py_DECREF(d);
  return 0;
bad:
  Py_XDECREF(d);
  return -1;
}"#;

const EXPORT_FUNCTION: &str = r#"static int __cx_ExportFunction(const char *name, void (*f)(void), const char *sig) {
  PyObject *d = NULL;
  PyObject *cobj = NULL;
  d = PyObject_GetAttrString(__cx_m, "__cx_capi__");
  if (!d) {
    PyErr_Clear();
    d = PyDict_New();
    if (!d)
      goto bad;
    Py_INCREF(d);
    if (PyModule_AddObject(__cx_m, "__cx_capi__", d) < 0)
      goto bad;
  }
  cobj = PyCapsule_New((void *)f, sig, 0);
  if (!cobj)
    goto bad;
  if (PyDict_SetItemString(d, name, cobj) < 0)
    goto bad;
  Py_DECREF(cobj);
  Py_DECREF(d);
  return 0;
bad:
  Py_XDECREF(cobj);
  Py_XDECREF(d);
  return -1;
}"#;

const SET_VTABLE: &str = r#"static int __cx_SetVtable(PyObject *dict, void *vtable) {
  PyObject *ob = PyCapsule_New(vtable, 0, 0);
  if (!ob)
    goto bad;
  if (PyDict_SetItemString(dict, "__cx_vtable__", ob) < 0)
    goto bad;
  Py_DECREF(ob);
  return 0;
bad:
  Py_XDECREF(ob);
  return -1;
}"#;

const GET_VTABLE: &str = r#"static void *__cx_GetVtable(PyObject *dict) {
  void *ptr;
  PyObject *ob = PyDict_GetItemString(dict, "__cx_vtable__");
  if (!ob) {
    PyErr_SetString(PyExc_AttributeError, "type has no vtable");
    return NULL;
  }
  ptr = PyCapsule_GetPointer(ob, 0);
  if (!ptr && !PyErr_Occurred())
    PyErr_SetString(PyExc_RuntimeError, "invalid vtable found for imported type");
  return ptr;
}"#;

const CALL_NEXT_TP_DEALLOC: &str = r#"static void __cx_call_next_tp_dealloc(PyObject *obj, destructor current_tp_dealloc) {
  PyTypeObject *type = Py_TYPE(obj);
  while (type && type->tp_dealloc != current_tp_dealloc)
    type = type->tp_base;
  while (type && type->tp_dealloc == current_tp_dealloc)
    type = type->tp_base;
  if (type)
    type->tp_dealloc(obj);
}"#;

const CALL_NEXT_TP_TRAVERSE: &str = r#"static int __cx_call_next_tp_traverse(PyObject *obj, visitproc v, void *a, traverseproc current_tp_traverse) {
  PyTypeObject *type = Py_TYPE(obj);
  while (type && type->tp_traverse != current_tp_traverse)
    type = type->tp_base;
  while (type && type->tp_traverse == current_tp_traverse)
    type = type->tp_base;
  if (type && type->tp_traverse)
    return type->tp_traverse(obj, v, a);
  return 0;
}"#;

const CALL_NEXT_TP_CLEAR: &str = r#"static void __cx_call_next_tp_clear(PyObject *obj, inquiry current_tp_clear) {
  PyTypeObject *type = Py_TYPE(obj);
  while (type && type->tp_clear != current_tp_clear)
    type = type->tp_base;
  while (type && type->tp_clear == current_tp_clear)
    type = type->tp_base;
  if (type && type->tp_clear)
    type->tp_clear(obj);
}"#;

/// `(min, max)` limit macros of a C integer type; `min` is `None` for
/// unsigned types. `None` overall means the type covers the full 64-bit
/// conversion range and needs no check.
fn int_limits(n: NumericType) -> Option<(Option<&'static str>, &'static str)> {
    let unsigned = n.signedness == Signedness::Unsigned;
    let limits = match (n.kind, unsigned) {
        (NumericKind::Char, true) => (None, "UCHAR_MAX"),
        (NumericKind::Char, false) if n.signedness == Signedness::Signed => (Some("SCHAR_MIN"), "SCHAR_MAX"),
        (NumericKind::Char, false) => (Some("CHAR_MIN"), "CHAR_MAX"),
        (NumericKind::Short, true) => (None, "USHRT_MAX"),
        (NumericKind::Short, false) => (Some("SHRT_MIN"), "SHRT_MAX"),
        (NumericKind::Int | NumericKind::Bint, true) => (None, "UINT_MAX"),
        (NumericKind::Int | NumericKind::Bint, false) => (Some("INT_MIN"), "INT_MAX"),
        (NumericKind::Long, true) => (None, "ULONG_MAX"),
        (NumericKind::Long, false) => (Some("LONG_MIN"), "LONG_MAX"),
        (NumericKind::SSize, _) => (Some("PY_SSIZE_T_MIN"), "PY_SSIZE_T_MAX"),
        (NumericKind::Size, _) => (None, "SIZE_MAX"),
        _ => return None,
    };
    Some(limits)
}

/// The smallest value of a signed C integer type, when it has a macro.
pub fn int_min_macro(n: NumericType) -> Option<&'static str> {
    match n.kind {
        NumericKind::LongLong if n.is_signed() => Some("PY_LLONG_MIN"),
        _ => int_limits(n).and_then(|(min, _)| min),
    }
}

/// Name of the object-to-integer helper for `n`.
pub fn int_from_py_name(n: NumericType) -> String {
    format!("__cx_PyInt_As_{}", n.helper_name())
}

/// Converts a Python integer to the C integer type `n`, raising
/// `OverflowError` when the value does not fit.
pub fn int_from_py(n: NumericType) -> UtilitySnippet {
    let ctype = n.c_name();
    let func = int_from_py_name(n);
    let display = n.display_name();
    let unsigned = !n.is_signed() || n.kind == NumericKind::Size;
    let mut body = String::new();
    if unsigned {
        body.push_str(&format!(
            "static CX_INLINE {ctype} {func}(PyObject *x) {{\n  unsigned PY_LONG_LONG v;\n  PyObject *i = PyNumber_Index(x);\n  if (unlikely(!i))\n    return ({ctype}) -1;\n  v = PyLong_AsUnsignedLongLong(i);\n  Py_DECREF(i);\n  if (unlikely(v == (unsigned PY_LONG_LONG) -1 && PyErr_Occurred()))\n    return ({ctype}) -1;\n"
        ));
        if let Some((_, max)) = int_limits(n) {
            body.push_str(&format!(
                "  if (unlikely(v > (unsigned PY_LONG_LONG) {max})) {{\n    PyErr_SetString(PyExc_OverflowError, \"value too large to convert to {display}\");\n    return ({ctype}) -1;\n  }}\n"
            ));
        }
    } else {
        body.push_str(&format!(
            "static CX_INLINE {ctype} {func}(PyObject *x) {{\n  PY_LONG_LONG v = PyLong_AsLongLong(x);\n  if (unlikely(v == -1 && PyErr_Occurred()))\n    return ({ctype}) -1;\n"
        ));
        if let Some((Some(min), max)) = int_limits(n) {
            body.push_str(&format!(
                "  if (unlikely(v < (PY_LONG_LONG) {min} || v > (PY_LONG_LONG) {max})) {{\n    PyErr_SetString(PyExc_OverflowError, \"value too large to convert to {display}\");\n    return ({ctype}) -1;\n  }}\n"
            ));
        }
    }
    body.push_str(&format!("  return ({ctype}) v;\n}}"));
    UtilitySnippet::new(TYPE_CONVERSION, &format!("CIntFromPy_{}", n.helper_name()), body)
        .with_proto(format!("static CX_INLINE {ctype} {func}(PyObject *x);"))
}

pub fn complex_from_py_name(n: NumericType) -> String {
    format!("__cx_PyComplex_As_{}", n.helper_name())
}

pub fn complex_from_py(n: NumericType) -> UtilitySnippet {
    let ctype = n.c_name();
    let func = complex_from_py_name(n);
    let body = format!(
        "static CX_INLINE {ctype} {func}(PyObject *o) {{\n  Py_complex c = PyComplex_AsCComplex(o);\n  return ({ctype})(c.real + c.imag * _Complex_I);\n}}"
    );
    UtilitySnippet::new(TYPE_CONVERSION, &format!("ComplexFromPy_{}", n.helper_name()), body)
        .with_proto(format!("static CX_INLINE {ctype} {func}(PyObject *o);"))
        .requires(TYPE_CONVERSION, "ComplexSupport")
}

/// Floor division and modulo with Python's sign rules for a signed C
/// integer type.
pub fn int_div_mod(n: NumericType) -> UtilitySnippet {
    let t = n.c_name();
    let h = n.helper_name();
    let body = format!(
        "static CX_INLINE {t} __cx_div_{h}({t} a, {t} b) {{\n  {t} q = a / b;\n  {t} r = a - q * b;\n  q -= ((r != 0) & ((r ^ b) < 0));\n  return q;\n}}\n\nstatic CX_INLINE {t} __cx_mod_{h}({t} a, {t} b) {{\n  {t} r = a % b;\n  r += ((r != 0) & ((r ^ b) < 0)) * b;\n  return r;\n}}"
    );
    UtilitySnippet::new(ARITHMETIC, &format!("IntDivMod_{}", h), body).with_proto(format!(
        "static CX_INLINE {t} __cx_div_{h}({t} a, {t} b);\nstatic CX_INLINE {t} __cx_mod_{h}({t} a, {t} b);"
    ))
}

/// Integer power by squaring; a negative exponent gives the truncated
/// result.
pub fn int_pow(n: NumericType) -> UtilitySnippet {
    let t = n.c_name();
    let h = n.helper_name();
    let negative = if n.is_signed() {
        "  if (unlikely(e < 0)) {\n    if (b == 1)\n      return 1;\n    if (b == -1)\n      return (e & 1) ? -1 : 1;\n    return 0;\n  }\n"
    } else {
        ""
    };
    let body = format!(
        "static CX_INLINE {t} __cx_pow_{h}({t} b, {t} e) {{\n  {t} t = 1;\n{negative}  while (e) {{\n    if (e & 1)\n      t *= b;\n    b *= b;\n    e >>= 1;\n  }}\n  return t;\n}}"
    );
    UtilitySnippet::new(ARITHMETIC, &format!("IntPow_{}", h), body)
        .with_proto(format!("static CX_INLINE {t} __cx_pow_{h}({t} b, {t} e);"))
}

/// Floor division and modulo with Python's sign rules for a C float type.
pub fn float_div_mod(n: NumericType) -> UtilitySnippet {
    let t = n.c_name();
    let h = n.helper_name();
    let suffix = match n.kind {
        NumericKind::Float => "f",
        NumericKind::LongDouble => "l",
        _ => "",
    };
    let body = format!(
        "static CX_INLINE {t} __cx_floordiv_{h}({t} a, {t} b) {{\n  return floor{suffix}(a / b);\n}}\n\nstatic CX_INLINE {t} __cx_mod_{h}({t} a, {t} b) {{\n  {t} r = fmod{suffix}(a, b);\n  if (r != 0 && ((r < 0) != (b < 0)))\n    r += b;\n  return r;\n}}"
    );
    UtilitySnippet::new(ARITHMETIC, &format!("FloatDivMod_{}", h), body).with_proto(format!(
        "static CX_INLINE {t} __cx_floordiv_{h}({t} a, {t} b);\nstatic CX_INLINE {t} __cx_mod_{h}({t} a, {t} b);"
    ))
}

/// `char *` to and from `str`/`bytes` under the configured encoding.
pub fn c_string_conversion(encoding: &StringEncoding) -> UtilitySnippet {
    let decode = match encoding {
        StringEncoding::Default => "return PyUnicode_FromString(s);".to_string(),
        StringEncoding::Ascii => "return PyUnicode_DecodeASCII(s, (Py_ssize_t)strlen(s), NULL);".to_string(),
        StringEncoding::Named(name) => format!(
            "return PyUnicode_Decode(s, (Py_ssize_t)strlen(s), \"{}\", NULL);",
            super::super::buffer::escape_string(name)
        ),
    };
    let from_unicode = match encoding {
        StringEncoding::Default => "    return PyUnicode_AsUTF8(o);\n",
        StringEncoding::Ascii => {
            "    if (likely(PyUnicode_IS_ASCII(o)))\n      return PyUnicode_AsUTF8(o);\n    Py_XDECREF(PyUnicode_AsASCIIString(o));\n    return NULL;\n"
        }
        StringEncoding::Named(_) => "",
    };
    let unicode_branch = if from_unicode.is_empty() {
        String::new()
    } else {
        format!("  if (PyUnicode_Check(o)) {{\n{}  }}\n", from_unicode)
    };
    let body = format!(
        "static CX_INLINE PyObject *__cx_PyUnicode_FromCString(const char *s) {{\n  {decode}\n}}\n\nstatic CX_INLINE const char *__cx_PyObject_AsCString(PyObject *o) {{\n  if (PyBytes_Check(o))\n    return PyBytes_AS_STRING(o);\n{unicode_branch}  PyErr_Format(PyExc_TypeError, \"expected bytes, %.200s found\", Py_TYPE(o)->tp_name);\n  return NULL;\n}}"
    );
    let mut snippet = UtilitySnippet::new(TYPE_CONVERSION, "CStringConversion", body).with_proto(
        "static CX_INLINE PyObject *__cx_PyUnicode_FromCString(const char *s);\nstatic CX_INLINE const char *__cx_PyObject_AsCString(PyObject *o);",
    );
    if let StringEncoding::Named(name) = encoding {
        snippet = snippet.with_init(format!(
            "{{\n  PyObject *codec = PyCodec_Encoder(\"{}\");\n  if (unlikely(!codec))\n    goto {};\n  Py_DECREF(codec);\n}}",
            super::super::buffer::escape_string(name),
            INIT_ERROR_LABEL
        ));
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_conversion_checks_both_limits() {
        let s = int_from_py(NumericType::c_int());
        assert_eq!(s.key.name, "CIntFromPy_int");
        assert!(s.implementation.contains("v < (PY_LONG_LONG) INT_MIN || v > (PY_LONG_LONG) INT_MAX"));
    }

    #[test]
    fn named_encoding_checks_codec_at_init() {
        let s = c_string_conversion(&StringEncoding::Named("latin-1".into()));
        assert!(s.implementation.contains("\"latin-1\""));
        assert!(s.init.as_deref().is_some_and(|i| i.contains("PyCodec_Encoder")));
        assert!(c_string_conversion(&StringEncoding::Default).init.is_none());
    }
}

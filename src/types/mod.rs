//! Type descriptors for the C and Python object worlds.
//!
//! A [`Type`] is immutable once built and shared through [`TypeRef`]. Every
//! consumer matches on the variant; there are no capability flags.

pub mod compat;
pub mod declarator;
pub mod numeric;
pub mod overload;
pub mod specialize;

use crate::naming;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

pub use compat::{independent_spanning_type, spanning_type, widest_extension_type};
pub use declarator::DeclOptions;
pub use numeric::{widest_numeric_type, NumericKind, NumericRank, NumericType, Signedness};
pub use overload::{best_match, Candidate, MatchResult, OverloadError, Score};
pub use specialize::{Specializer, Substitution};

pub type TypeRef = Rc<Type>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Void,
    /// Poison type produced after a reported error.
    Error,
    Numeric(NumericType),
    Pointer(TypeRef),
    Array {
        base: TypeRef,
        #[serde(default)]
        size: Option<usize>,
    },
    Reference(TypeRef),
    Function(FunctionType),
    Struct(StructType),
    Class(ClassType),
    /// A Python object, optionally known to be an instance of a builtin type.
    Object(Option<Builtin>),
    Fused(FusedType),
    Const(TypeRef),
    Typedef {
        name: String,
        cname: String,
        base: TypeRef,
    },
}

/// Builtin Python types the compiler knows the C-API of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    List,
    Tuple,
    Dict,
    Set,
    Str,
    Bytes,
    Int,
    Float,
    Bool,
    Type,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::Str => "str",
            Builtin::Bytes => "bytes",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::Type => "type",
        }
    }

    /// The `PyTypeObject` this builtin is an instance of.
    pub fn type_cname(self) -> &'static str {
        match self {
            Builtin::List => "PyList_Type",
            Builtin::Tuple => "PyTuple_Type",
            Builtin::Dict => "PyDict_Type",
            Builtin::Set => "PySet_Type",
            Builtin::Str => "PyUnicode_Type",
            Builtin::Bytes => "PyBytes_Type",
            Builtin::Int => "PyLong_Type",
            Builtin::Float => "PyFloat_Type",
            Builtin::Bool => "PyBool_Type",
            Builtin::Type => "PyType_Type",
        }
    }

    /// The C type a value of this builtin converts to by default, if any.
    pub fn default_coerced_ctype(self) -> Option<TypeRef> {
        match self {
            Builtin::Int => Some(Type::numeric(NumericType::c_long())),
            Builtin::Float => Some(Type::numeric(NumericType::c_double())),
            Builtin::Bool => Some(Type::bint()),
            Builtin::Bytes => Some(Type::c_char_ptr()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallingConvention {
    #[default]
    Default,
    Cdecl,
    Stdcall,
    Fastcall,
}

impl CallingConvention {
    pub fn keyword(self) -> &'static str {
        match self {
            CallingConvention::Default => "",
            CallingConvention::Cdecl => "__cdecl",
            CallingConvention::Stdcall => "__stdcall",
            CallingConvention::Fastcall => "__fastcall",
        }
    }

    /// `cdecl` is the default on every supported target.
    pub fn equivalent(self, other: CallingConvention) -> bool {
        let norm = |c| match c {
            CallingConvention::Cdecl => CallingConvention::Default,
            c => c,
        };
        norm(self) == norm(other)
    }
}

/// How a C function signals that it raised a Python exception.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionSpec {
    /// Errors cannot propagate; they are printed as unraisable.
    #[default]
    None,
    /// `except <value>`
    Value(String),
    /// `except? <value>`: the value may also be a legitimate result.
    ValueOrCheck(String),
    /// `except *`
    Check,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncParam {
    pub name: String,
    pub ty: TypeRef,
    /// C text substituted when a call omits this argument.
    #[serde(default)]
    pub default: Option<String>,
}

impl FuncParam {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self { name: name.into(), ty, default: None }
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionType {
    pub return_type: TypeRef,
    pub params: Vec<FuncParam>,
    #[serde(default)]
    pub variadic: bool,
    #[serde(default)]
    pub exception: ExceptionSpec,
    #[serde(default)]
    pub calling_convention: CallingConvention,
    #[serde(default)]
    pub nogil: bool,
    /// Arguments must match exactly; no conversion is scored.
    #[serde(default)]
    pub strict_signature: bool,
}

impl FunctionType {
    pub fn new(return_type: TypeRef, params: Vec<FuncParam>) -> Self {
        Self {
            return_type,
            params,
            variadic: false,
            exception: ExceptionSpec::None,
            calling_convention: CallingConvention::Default,
            nogil: false,
            strict_signature: false,
        }
    }

    pub fn with_exception(mut self, exception: ExceptionSpec) -> Self {
        self.exception = exception;
        self
    }

    pub fn required_arg_count(&self) -> usize {
        self.params.iter().filter(|p| !p.is_optional()).count()
    }

    pub fn accepts_arg_count(&self, n: usize) -> bool {
        n >= self.required_arg_count() && (self.variadic || n <= self.params.len())
    }

    /// Text that `except` clauses print in the display form.
    pub(crate) fn exception_display(&self) -> String {
        match &self.exception {
            ExceptionSpec::None => String::new(),
            ExceptionSpec::Value(v) => format!(" except {}", v),
            ExceptionSpec::ValueOrCheck(v) => format!(" except? {}", v),
            ExceptionSpec::Check => " except *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructKind {
    Struct,
    Union,
}

impl StructKind {
    pub fn keyword(self) -> &'static str {
        match self {
            StructKind::Struct => "struct",
            StructKind::Union => "union",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldVisibility {
    #[default]
    Private,
    Readonly,
    Public,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub cname: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub visibility: FieldVisibility,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        let name = name.into();
        Self { cname: name.clone(), name, ty, visibility: FieldVisibility::Private }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub cname: String,
    pub kind: StructKind,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub packed: bool,
    /// Declared through a typedef, so referenced without the `struct` keyword.
    #[serde(default)]
    pub typedef_flag: bool,
}

/// One virtual method of an extension type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VtableSlot {
    pub name: String,
    /// The implementing C function.
    pub cname: String,
    /// Signature including the leading `self` parameter.
    pub ty: TypeRef,
    /// Re-implements a slot declared by an ancestor instead of adding one.
    #[serde(default)]
    pub overrides: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassType {
    pub name: String,
    pub module: String,
    #[serde(default)]
    pub base: Option<TypeRef>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub vtable: Vec<VtableSlot>,
    #[serde(default)]
    pub is_final: bool,
    /// Declared here but implemented by another module.
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub freelist: Option<usize>,
    #[serde(default)]
    pub objstruct_cname: Option<String>,
    #[serde(default)]
    pub typeobj_cname: Option<String>,
}

impl ClassType {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            base: None,
            fields: Vec::new(),
            vtable: Vec::new(),
            is_final: false,
            is_external: false,
            freelist: None,
            objstruct_cname: None,
            typeobj_cname: None,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    fn mangled(&self) -> String {
        naming::mangle(&self.module, &self.name)
    }

    pub fn objstruct_cname(&self) -> String {
        self.objstruct_cname
            .clone()
            .unwrap_or_else(|| format!("{}{}", naming::OBJSTRUCT_PREFIX, self.mangled()))
    }

    /// The static `PyTypeObject` defined by the implementing module.
    pub fn typeobj_cname(&self) -> String {
        self.typeobj_cname
            .clone()
            .unwrap_or_else(|| format!("{}{}", naming::TYPEOBJ_PREFIX, self.mangled()))
    }

    /// The `PyTypeObject *` variable every module uses to reach the type.
    pub fn typeptr_cname(&self) -> String {
        format!("{}{}", naming::TYPEPTR_PREFIX, self.mangled())
    }

    pub fn vtabstruct_cname(&self) -> String {
        format!("{}{}", naming::VTABSTRUCT_PREFIX, self.mangled())
    }

    pub fn vtabptr_cname(&self) -> String {
        format!("{}{}", naming::VTABPTR_PREFIX, self.mangled())
    }

    pub fn vtable_cname(&self) -> String {
        format!("{}{}", naming::VTABLE_PREFIX, self.mangled())
    }

    /// Prefix for the lifecycle functions and tables of this type.
    pub fn slot_suffix(&self) -> String {
        self.mangled()
    }

    pub fn base_class(&self) -> Option<&ClassType> {
        self.base.as_deref().and_then(Type::as_class)
    }

    /// This class followed by its ancestors, nearest first.
    pub fn chain(&self) -> Vec<&ClassType> {
        let mut out = vec![self];
        let mut cur = self.base_class();
        while let Some(c) = cur {
            out.push(c);
            cur = c.base_class();
        }
        out
    }

    pub fn same_class(&self, other: &ClassType) -> bool {
        self.module == other.module && self.name == other.name
    }

    /// Number of inheritance steps from `self` up to `ancestor`.
    pub fn distance_to(&self, ancestor: &ClassType) -> Option<usize> {
        self.chain().iter().position(|c| c.same_class(ancestor))
    }

    pub fn is_subclass_of(&self, ancestor: &ClassType) -> bool {
        self.distance_to(ancestor).is_some()
    }

    /// Whether any class in the chain declares a virtual method.
    pub fn has_vtable(&self) -> bool {
        self.chain().iter().any(|c| c.vtable.iter().any(|s| !s.overrides))
    }

    /// Whether this class adds slots to the vtable struct.
    pub fn declares_slots(&self) -> bool {
        self.vtable.iter().any(|s| !s.overrides)
    }

    /// Distance from `self` to the class whose object struct holds the
    /// vtable pointer (the root-most class with virtual methods).
    pub fn vtab_owner_depth(&self) -> Option<usize> {
        self.chain().iter().rposition(|c| c.declares_slots())
    }

    /// The ancestor (or self) that introduced slot `name`, with its distance.
    pub fn slot_declarer(&self, name: &str) -> Option<(usize, &ClassType, &VtableSlot)> {
        self.chain().into_iter().enumerate().find_map(|(depth, class)| {
            class
                .vtable
                .iter()
                .find(|s| s.name == name && !s.overrides)
                .map(|s| (depth, class, s))
        })
    }

    /// The most derived implementation of slot `name` visible from `self`.
    pub fn slot_impl(&self, name: &str) -> Option<&VtableSlot> {
        self.chain()
            .into_iter()
            .find_map(|class| class.vtable.iter().find(|s| s.name == name))
    }

    /// Finds an attribute in the layout, returning the depth of the class
    /// that declares it.
    pub fn lookup_field(&self, name: &str) -> Option<(usize, &Field)> {
        self.chain()
            .into_iter()
            .enumerate()
            .find_map(|(depth, class)| class.fields.iter().find(|f| f.name == name).map(|f| (depth, f)))
    }

    /// Whether instances own references the cyclic GC must see.
    pub fn has_object_fields(&self) -> bool {
        self.chain()
            .iter()
            .any(|c| c.fields.iter().any(|f| f.ty.is_pyobject()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedType {
    pub name: String,
    pub alternatives: Vec<TypeRef>,
}

impl Type {
    pub fn void() -> TypeRef {
        Rc::new(Type::Void)
    }

    pub fn error() -> TypeRef {
        Rc::new(Type::Error)
    }

    pub fn numeric(n: NumericType) -> TypeRef {
        Rc::new(Type::Numeric(n))
    }

    pub fn bint() -> TypeRef {
        Type::numeric(NumericType::bint())
    }

    pub fn c_int() -> TypeRef {
        Type::numeric(NumericType::c_int())
    }

    pub fn c_long() -> TypeRef {
        Type::numeric(NumericType::c_long())
    }

    pub fn c_double() -> TypeRef {
        Type::numeric(NumericType::c_double())
    }

    pub fn py_ssize_t() -> TypeRef {
        Type::numeric(NumericType::py_ssize_t())
    }

    pub fn c_char() -> TypeRef {
        Type::numeric(NumericType::new(NumericKind::Char, Signedness::Unspecified))
    }

    pub fn c_char_ptr() -> TypeRef {
        Type::pointer(Type::c_char())
    }

    pub fn object() -> TypeRef {
        Rc::new(Type::Object(None))
    }

    pub fn builtin(b: Builtin) -> TypeRef {
        Rc::new(Type::Object(Some(b)))
    }

    pub fn pointer(base: TypeRef) -> TypeRef {
        Rc::new(Type::Pointer(base))
    }

    pub fn array(base: TypeRef, size: Option<usize>) -> TypeRef {
        Rc::new(Type::Array { base, size })
    }

    pub fn constant(base: TypeRef) -> TypeRef {
        Rc::new(Type::Const(base))
    }

    pub fn function(f: FunctionType) -> TypeRef {
        Rc::new(Type::Function(f))
    }

    pub fn class(c: ClassType) -> TypeRef {
        Rc::new(Type::Class(c))
    }

    /// Looks through typedefs.
    pub fn resolve(&self) -> &Type {
        match self {
            Type::Typedef { base, .. } => base.resolve(),
            t => t,
        }
    }

    /// Looks through typedefs and `const`.
    pub fn strip(&self) -> &Type {
        match self {
            Type::Typedef { base, .. } | Type::Const(base) => base.strip(),
            t => t,
        }
    }

    pub fn as_numeric(&self) -> Option<NumericType> {
        match self.strip() {
            Type::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassType> {
        match self.strip() {
            Type::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self.strip() {
            Type::Function(f) => Some(f),
            Type::Pointer(base) => match base.strip() {
                Type::Function(f) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self.strip() {
            Type::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn builtin_kind(&self) -> Option<Builtin> {
        match self.strip() {
            Type::Object(b) => *b,
            _ => None,
        }
    }

    /// Element type of a pointer or array.
    pub fn element_type(&self) -> Option<&TypeRef> {
        match self.strip() {
            Type::Pointer(base) | Type::Array { base, .. } => Some(base),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.strip(), Type::Void)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.strip(), Type::Error)
    }

    pub fn is_numeric(&self) -> bool {
        self.as_numeric().is_some()
    }

    pub fn is_int(&self) -> bool {
        self.as_numeric().is_some_and(|n| n.is_int())
    }

    pub fn is_float(&self) -> bool {
        self.as_numeric().is_some_and(|n| n.is_float() && !n.complex)
    }

    pub fn is_complex(&self) -> bool {
        self.as_numeric().is_some_and(|n| n.complex)
    }

    pub fn is_bint(&self) -> bool {
        self.as_numeric().is_some_and(|n| n.is_bint())
    }

    /// A reference-counted `PyObject *` at the C level.
    pub fn is_pyobject(&self) -> bool {
        matches!(self.strip(), Type::Object(_) | Type::Class(_))
    }

    pub fn is_generic_object(&self) -> bool {
        matches!(self.strip(), Type::Object(None))
    }

    pub fn is_extension_type(&self) -> bool {
        matches!(self.strip(), Type::Class(_))
    }

    pub fn is_builtin(&self, b: Builtin) -> bool {
        self.builtin_kind() == Some(b)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self.strip(), Type::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.strip(), Type::Array { .. })
    }

    pub fn is_void_ptr(&self) -> bool {
        matches!(self.strip(), Type::Pointer(b) if b.is_void())
    }

    /// `char *` or `const char *`.
    pub fn is_c_string(&self) -> bool {
        match self.strip() {
            Type::Pointer(b) => b
                .as_numeric()
                .is_some_and(|n| n.kind == NumericKind::Char && !n.complex),
            _ => false,
        }
    }

    pub fn is_cfunction(&self) -> bool {
        matches!(self.strip(), Type::Function(_))
    }

    pub fn is_fused(&self) -> bool {
        matches!(self.strip(), Type::Fused(_))
    }

    /// Whether a fused placeholder appears anywhere inside this type.
    pub fn contains_fused(&self) -> bool {
        match self {
            Type::Fused(_) => true,
            Type::Pointer(b) | Type::Reference(b) | Type::Const(b) => b.contains_fused(),
            Type::Array { base, .. } | Type::Typedef { base, .. } => base.contains_fused(),
            Type::Function(f) => {
                f.return_type.contains_fused() || f.params.iter().any(|p| p.ty.contains_fused())
            }
            _ => false,
        }
    }

    /// Collects the fused placeholders inside this type, in first-seen order.
    pub fn fused_names(&self, out: &mut Vec<String>) {
        match self {
            Type::Fused(f) => {
                if !out.contains(&f.name) {
                    out.push(f.name.clone());
                }
            }
            Type::Pointer(b) | Type::Reference(b) | Type::Const(b) => b.fused_names(out),
            Type::Array { base, .. } | Type::Typedef { base, .. } => base.fused_names(out),
            Type::Function(f) => {
                f.return_type.fused_names(out);
                for p in &f.params {
                    p.ty.fused_names(out);
                }
            }
            _ => {}
        }
    }

    /// C text usable as a cast target or in `sizeof`.
    pub fn empty_declaration_code(&self) -> String {
        self.declaration_code("", &DeclOptions::code())
    }

    pub fn same_as(&self, other: &Type) -> bool {
        compat::same_as(self, other)
    }

    pub fn assignable_from(&self, src: &Type) -> bool {
        compat::assignable_from(self, src)
    }

    /// Value returned on the error path of a function with this return type.
    pub fn error_value(&self) -> Option<String> {
        match self.strip() {
            Type::Object(_) | Type::Class(_) | Type::Pointer(_) => Some("NULL".to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.declaration_code("", &DeclOptions::display()))
    }
}

//! Analyzed module tree.
//!
//! Every node carries its resolved type and source position. A node owns
//! its children; the only non-owning link is [`ExprKind::TempRef`], which
//! names a temporary bound by an enclosing [`ExprKind::StatResult`],
//! [`ExprKind::Comprehension`] or [`StmtKind::LetTemp`].

pub mod build;
pub mod visit;

use crate::semantic::EntryId;
use crate::types::{ExceptionSpec, TypeRef};
use serde::{Deserialize, Serialize};

/// Position in source: `file` indexes the module's filename table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub file: usize,
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(file: usize, line: usize, col: usize) -> Self {
        Self { file, line, col }
    }
}

/// Identifies a temporary introduced by a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TempId(pub usize);

/// A value known at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

impl ConstValue {
    /// Python truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            ConstValue::Int(v) => *v != 0,
            ConstValue::Float(v) => *v != 0.0,
            ConstValue::Bool(b) => *b,
            ConstValue::Str(s) => !s.is_empty(),
            ConstValue::None => false,
        }
    }

    /// Integer view; booleans count as 0 and 1.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(*v),
            ConstValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// `/`, true division.
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn to_c_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div | BinOp::FloorDiv => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }

    /// C-API function implementing the operator on objects.
    pub fn number_function(&self, inplace: bool) -> &'static str {
        match (self, inplace) {
            (BinOp::Add, false) => "PyNumber_Add",
            (BinOp::Sub, false) => "PyNumber_Subtract",
            (BinOp::Mul, false) => "PyNumber_Multiply",
            (BinOp::Div, false) => "PyNumber_TrueDivide",
            (BinOp::FloorDiv, false) => "PyNumber_FloorDivide",
            (BinOp::Mod, false) => "PyNumber_Remainder",
            (BinOp::Pow, false) => "PyNumber_Power",
            (BinOp::LShift, false) => "PyNumber_Lshift",
            (BinOp::RShift, false) => "PyNumber_Rshift",
            (BinOp::BitAnd, false) => "PyNumber_And",
            (BinOp::BitOr, false) => "PyNumber_Or",
            (BinOp::BitXor, false) => "PyNumber_Xor",
            (BinOp::Add, true) => "PyNumber_InPlaceAdd",
            (BinOp::Sub, true) => "PyNumber_InPlaceSubtract",
            (BinOp::Mul, true) => "PyNumber_InPlaceMultiply",
            (BinOp::Div, true) => "PyNumber_InPlaceTrueDivide",
            (BinOp::FloorDiv, true) => "PyNumber_InPlaceFloorDivide",
            (BinOp::Mod, true) => "PyNumber_InPlaceRemainder",
            (BinOp::Pow, true) => "PyNumber_InPlacePower",
            (BinOp::LShift, true) => "PyNumber_InPlaceLshift",
            (BinOp::RShift, true) => "PyNumber_InPlaceRshift",
            (BinOp::BitAnd, true) => "PyNumber_InPlaceAnd",
            (BinOp::BitOr, true) => "PyNumber_InPlaceOr",
            (BinOp::BitXor, true) => "PyNumber_InPlaceXor",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
    AddressOf,
    Deref,
}

impl UnaryOp {
    pub fn to_c_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Invert => "~",
            UnaryOp::Not => "!",
            UnaryOp::AddressOf => "&",
            UnaryOp::Deref => "*",
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn to_c_str(&self) -> &'static str {
        match self {
            CmpOp::Eq | CmpOp::Is => "==",
            CmpOp::Ne | CmpOp::IsNot => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In | CmpOp::NotIn => "in",
        }
    }

    /// Rich comparison opcode, for the six ordering operators.
    pub fn rich_compare_op(&self) -> Option<&'static str> {
        match self {
            CmpOp::Eq => Some("Py_EQ"),
            CmpOp::Ne => Some("Py_NE"),
            CmpOp::Lt => Some("Py_LT"),
            CmpOp::Le => Some("Py_LE"),
            CmpOp::Gt => Some("Py_GT"),
            CmpOp::Ge => Some("Py_GE"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolOpKind {
    And,
    Or,
}

/// Container built by a comprehension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompKind {
    List,
    Set,
    Dict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrKind {
    /// `str`
    Unicode,
    Bytes,
}

/// Builtin sequence iterated by index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqKind {
    List,
    Tuple,
}

/// What a dict loop binds per step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictIterKind {
    Keys,
    Values,
    Items,
}

/// Direct C-API operations that builtin calls are rewritten into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinFn {
    ListSize,
    TupleSize,
    BytesSize,
    UnicodeLength,
    DictSize,
    SetSize,
    CStrLen,
    /// In-place sort of a list temporary.
    ListSort,
    ListAsTuple,
    /// `abs()` of a C integer or float.
    CAbs,
    /// Truth value of an object as a C int.
    ObjectIsTrue,
}

/// An expression node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeRef,
    #[serde(default)]
    pub pos: Pos,
    /// Value computed by constant folding when the node itself is kept.
    #[serde(default)]
    pub constant: Option<ConstValue>,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: TypeRef, pos: Pos) -> Self {
        Self { kind, ty, pos, constant: None }
    }

    /// Value if this node is a literal or was folded.
    pub fn const_value(&self) -> Option<ConstValue> {
        match &self.kind {
            ExprKind::Int { value, .. } => Some(ConstValue::Int(*value)),
            ExprKind::Bool(b) => Some(ConstValue::Bool(*b)),
            ExprKind::Str { value, .. } => Some(ConstValue::Str(value.clone())),
            ExprKind::None => Some(ConstValue::None),
            ExprKind::Char(c) => Some(ConstValue::Int(i64::from(*c))),
            _ => self.constant.clone(),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int { .. }
                | ExprKind::Float { .. }
                | ExprKind::Bool(_)
                | ExprKind::Str { .. }
                | ExprKind::Char(_)
                | ExprKind::None
        )
    }

    /// Evaluating this node twice is unobservable.
    pub fn is_simple(&self) -> bool {
        match &self.kind {
            ExprKind::Name { .. } | ExprKind::TempRef(_) => true,
            ExprKind::Attribute { obj, .. } => !obj.ty.is_generic_object() && obj.is_simple(),
            _ => self.is_literal(),
        }
    }
}

/// Expression kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    /// Integer literal. `text` is kept so emission reproduces the source.
    Int { value: i64, text: String },
    /// Float literal; never re-rendered from a computed value.
    Float { text: String },
    Bool(bool),
    None,
    Str { value: String, kind: StrKind },
    Char(u8),
    Name { name: String, entry: EntryId },
    Attribute { obj: Box<Expr>, attr: String },
    Index { obj: Box<Expr>, index: Box<Expr> },
    /// `obj[start:stop]`
    Slice {
        obj: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
    },
    Call { func: Box<Expr>, args: Vec<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// `first op0 rest0 op1 rest1 ...`, each link evaluated once.
    Compare { first: Box<Expr>, rest: Vec<(CmpOp, Expr)> },
    BoolOp { op: BoolOpKind, left: Box<Expr>, right: Box<Expr> },
    Cond { test: Box<Expr>, then: Box<Expr>, orelse: Box<Expr> },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// C array literal; only produced by loop lowering.
    CArray(Vec<Expr>),
    /// Convert the operand to this node's type.
    Coerce(Box<Expr>),
    /// `isinstance(expr, class)` against an extension type.
    TypeTest { expr: Box<Expr>, class: TypeRef },
    /// Generator expression `(element for target in iter if condition)`.
    Generator {
        target: Box<Expr>,
        iter: Box<Expr>,
        condition: Option<Box<Expr>>,
        element: Box<Expr>,
    },
    /// Builds a container into `result`, filled by `ComprehensionAppend`s in `body`.
    Comprehension { kind: CompKind, result: TempId, body: Box<Stmt> },
    /// Runs `body`, then yields the temporary it assigned.
    StatResult { result: TempId, body: Box<Stmt> },
    TempRef(TempId),
    BuiltinCall { func: BuiltinFn, args: Vec<Expr> },
}

/// A statement node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    #[serde(default)]
    pub pos: Pos,
}

impl Stmt {
    pub fn new(kind: StmtKind, pos: Pos) -> Self {
        Self { kind, pos }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfClause {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub body: Vec<Stmt>,
}

/// Statement kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StmtKind {
    Expr(Expr),
    Assign { target: Expr, value: Expr },
    AugAssign { target: Expr, op: BinOp, value: Expr },
    If { clauses: Vec<IfClause>, orelse: Option<Vec<Stmt>> },
    While { condition: Expr, body: Vec<Stmt>, orelse: Option<Vec<Stmt>> },
    ForIn { target: Expr, iter: Expr, body: Vec<Stmt>, orelse: Option<Vec<Stmt>> },
    /// `for target in range(start, stop, step)` over C integers.
    CountedLoop {
        target: Expr,
        start: Expr,
        stop: Expr,
        step: i64,
        body: Vec<Stmt>,
        orelse: Option<Vec<Stmt>>,
    },
    /// Steps a pointer over `length` elements starting at `base`.
    PointerLoop {
        target: Expr,
        base: Expr,
        length: Expr,
        reversed: bool,
        body: Vec<Stmt>,
        orelse: Option<Vec<Stmt>>,
    },
    /// Indexes a list or tuple, re-reading its size every step.
    SequenceLoop {
        target: Expr,
        seq: Expr,
        kind: SeqKind,
        reversed: bool,
        body: Vec<Stmt>,
        orelse: Option<Vec<Stmt>>,
    },
    /// Iterates a dict, failing if its size changes during the loop.
    DictLoop {
        dict: Expr,
        method: DictIterKind,
        /// Reached through `.keys()`, `.values()` or `.items()` rather than the dict itself.
        #[serde(default)]
        view_call: bool,
        key: Option<Expr>,
        value: Option<Expr>,
        body: Vec<Stmt>,
        orelse: Option<Vec<Stmt>>,
    },
    Switch { subject: Expr, cases: Vec<SwitchCase>, default: Option<Vec<Stmt>> },
    Break,
    Continue,
    Return(Option<Expr>),
    Raise(Option<Expr>),
    Pass,
    Block(Vec<Stmt>),
    /// Declares a temporary visible to `TempRef`s that follow it.
    LetTemp { id: TempId, ty: TypeRef, value: Option<Expr> },
    ComprehensionAppend { kind: CompKind, result: TempId, key: Option<Expr>, value: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuncKind {
    /// Python function: only callable through the object protocol.
    Def,
    /// C function.
    Cdef,
    /// C function with a Python wrapper.
    Cpdef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub entry: EntryId,
    pub ty: TypeRef,
    #[serde(default)]
    pub default: Option<Expr>,
}

/// A function or method definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncDef {
    pub name: String,
    pub entry: EntryId,
    pub kind: FuncKind,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    #[serde(default)]
    pub exception: ExceptionSpec,
    pub body: Vec<Stmt>,
    /// Locals declared at the top of the C function, parameters excluded.
    #[serde(default)]
    pub locals: Vec<EntryId>,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub pos: Pos,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(default)]
    pub getter: Option<FuncDef>,
    #[serde(default)]
    pub setter: Option<FuncDef>,
    #[serde(default)]
    pub doc: Option<String>,
}

/// An extension type definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub entry: EntryId,
    /// Always a `Type::Class`.
    pub ty: TypeRef,
    #[serde(default)]
    pub methods: Vec<FuncDef>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub pos: Pos,
}

impl ClassDef {
    pub fn method(&self, name: &str) -> Option<&FuncDef> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDecl {
    pub ty: TypeRef,
    #[serde(default)]
    pub pos: Pos,
}

/// A C-level module global
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVar {
    pub entry: EntryId,
    #[serde(default)]
    pub init: Option<Expr>,
    #[serde(default)]
    pub pos: Pos,
}

/// An extension type implemented by another module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeImport {
    pub module: String,
    pub ty: TypeRef,
}

/// A C function exported by another module's API table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionImport {
    pub module: String,
    pub name: String,
    pub entry: EntryId,
}

/// The root of the tree: one compiled module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub filename_table: Vec<String>,
    #[serde(default)]
    pub doc: Option<String>,
    /// Top-level statements, run by the module init function.
    #[serde(default)]
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub functions: Vec<FuncDef>,
    #[serde(default)]
    pub classes: Vec<ClassDef>,
    #[serde(default)]
    pub structs: Vec<StructDecl>,
    #[serde(default)]
    pub globals: Vec<GlobalVar>,
    #[serde(default)]
    pub type_imports: Vec<TypeImport>,
    #[serde(default)]
    pub function_imports: Vec<FunctionImport>,
    #[serde(default)]
    pub next_temp: usize,
}

impl Module {
    pub fn new(name: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename_table: vec![filename.into()],
            doc: None,
            body: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            structs: Vec::new(),
            globals: Vec::new(),
            type_imports: Vec::new(),
            function_imports: Vec::new(),
            next_temp: 0,
        }
    }

    pub fn fresh_temp(&mut self) -> TempId {
        let id = TempId(self.next_temp);
        self.next_temp += 1;
        id
    }
}

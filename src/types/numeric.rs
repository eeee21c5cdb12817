//! Numeric type descriptors, rank ordering and promotion rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The C numeric kinds the language can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericKind {
    /// Boolean int (`bint`): an `int` that coerces to a Python `bool`.
    Bint,
    Char,
    Short,
    Int,
    Long,
    /// `Py_ssize_t`
    SSize,
    /// `size_t`
    Size,
    LongLong,
    Float,
    Double,
    LongDouble,
}

/// Signedness of an integer type. Ordered so that `Unsigned` sorts first,
/// which is what lets an unsigned type win a tie at equal rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signedness {
    Unsigned,
    /// Plain `char`: signedness is implementation defined.
    Unspecified,
    Signed,
}

/// Total rank order used for promotion. `Py_ssize_t` and `size_t` share a
/// rank between `long` and `long long`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumericRank {
    Char,
    Short,
    Int,
    Long,
    PySsize,
    LongLong,
    Float,
    Double,
    LongDouble,
}

impl NumericRank {
    /// Position on a doubled scale so that half-ranks stay integral.
    pub fn value(self) -> u32 {
        match self {
            NumericRank::Char => 0,
            NumericRank::Short => 2,
            NumericRank::Int => 4,
            NumericRank::Long => 6,
            NumericRank::PySsize => 7,
            NumericRank::LongLong => 8,
            NumericRank::Float => 10,
            NumericRank::Double => 12,
            NumericRank::LongDouble => 14,
        }
    }
}

/// A numeric type: kind, signedness and whether it is the complex variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumericType {
    pub kind: NumericKind,
    pub signedness: Signedness,
    #[serde(default)]
    pub complex: bool,
}

impl NumericType {
    pub const fn new(kind: NumericKind, signedness: Signedness) -> Self {
        Self { kind, signedness, complex: false }
    }

    pub const fn signed(kind: NumericKind) -> Self {
        Self::new(kind, Signedness::Signed)
    }

    pub const fn unsigned(kind: NumericKind) -> Self {
        Self::new(kind, Signedness::Unsigned)
    }

    pub const fn bint() -> Self {
        Self::signed(NumericKind::Bint)
    }

    pub const fn c_int() -> Self {
        Self::signed(NumericKind::Int)
    }

    pub const fn c_long() -> Self {
        Self::signed(NumericKind::Long)
    }

    pub const fn c_double() -> Self {
        Self::signed(NumericKind::Double)
    }

    pub const fn py_ssize_t() -> Self {
        Self::signed(NumericKind::SSize)
    }

    /// The complex counterpart of a floating point type.
    pub fn complex_of(real: NumericType) -> Self {
        let real = real.real_part();
        let kind = if real.is_float() { real.kind } else { NumericKind::Double };
        Self { kind, signedness: Signedness::Signed, complex: true }
    }

    /// Strip the complex flag.
    pub fn real_part(self) -> Self {
        Self { complex: false, ..self }
    }

    pub fn rank(&self) -> NumericRank {
        match self.kind {
            NumericKind::Char => NumericRank::Char,
            NumericKind::Short => NumericRank::Short,
            NumericKind::Bint | NumericKind::Int => NumericRank::Int,
            NumericKind::Long => NumericRank::Long,
            NumericKind::SSize | NumericKind::Size => NumericRank::PySsize,
            NumericKind::LongLong => NumericRank::LongLong,
            NumericKind::Float => NumericRank::Float,
            NumericKind::Double => NumericRank::Double,
            NumericKind::LongDouble => NumericRank::LongDouble,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self.kind,
            NumericKind::Float | NumericKind::Double | NumericKind::LongDouble
        )
    }

    pub fn is_int(&self) -> bool {
        !self.is_float() && !self.complex
    }

    pub fn is_bint(&self) -> bool {
        self.kind == NumericKind::Bint && !self.complex
    }

    pub fn is_signed(&self) -> bool {
        self.signedness != Signedness::Unsigned
    }

    /// The C spelling of this type.
    pub fn c_name(&self) -> String {
        if self.complex {
            return format!("{} _Complex", self.real_part().c_name());
        }
        let unsigned = self.signedness == Signedness::Unsigned;
        let base = match self.kind {
            NumericKind::Bint => "int",
            NumericKind::Char => match self.signedness {
                Signedness::Signed => return "signed char".to_string(),
                Signedness::Unspecified => "char",
                Signedness::Unsigned => "char",
            },
            NumericKind::Short => "short",
            NumericKind::Int => "int",
            NumericKind::Long => "long",
            NumericKind::SSize => return "Py_ssize_t".to_string(),
            NumericKind::Size => return "size_t".to_string(),
            NumericKind::LongLong => "PY_LONG_LONG",
            NumericKind::Float => return "float".to_string(),
            NumericKind::Double => return "double".to_string(),
            NumericKind::LongDouble => return "long double".to_string(),
        };
        if unsigned {
            format!("unsigned {}", base)
        } else {
            base.to_string()
        }
    }

    /// The name used in diagnostics and in the source language.
    pub fn display_name(&self) -> String {
        if self.complex {
            return format!("{} complex", self.real_part().display_name());
        }
        let base = match self.kind {
            NumericKind::Bint => "bint",
            NumericKind::Char => "char",
            NumericKind::Short => "short",
            NumericKind::Int => "int",
            NumericKind::Long => "long",
            NumericKind::SSize => "Py_ssize_t",
            NumericKind::Size => "size_t",
            NumericKind::LongLong => "long long",
            NumericKind::Float => "float",
            NumericKind::Double => "double",
            NumericKind::LongDouble => "long double",
        };
        match (self.kind, self.signedness) {
            (NumericKind::Size | NumericKind::SSize | NumericKind::Bint, _) => base.to_string(),
            (_, Signedness::Unsigned) if self.is_int() => format!("unsigned {}", base),
            (NumericKind::Char, Signedness::Signed) => "signed char".to_string(),
            _ => base.to_string(),
        }
    }

    /// Name fragment used to pick conversion helpers (`__cx_PyInt_As_<name>`).
    pub fn helper_name(&self) -> String {
        self.c_name().replace(' ', "_")
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Narrowest numeric type that can hold values of both operands.
///
/// Complex dominates real, higher rank dominates lower, an unsigned type
/// wins at equal rank, and a plain integer wins over `bint`. The remaining
/// ties are identical types, so the result does not depend on operand order.
pub fn widest_numeric_type(a: NumericType, b: NumericType) -> NumericType {
    if a == b {
        return a;
    }
    if a.complex || b.complex {
        return NumericType::complex_of(widest_numeric_type(a.real_part(), b.real_part()));
    }
    match a.rank().cmp(&b.rank()) {
        std::cmp::Ordering::Less => return b,
        std::cmp::Ordering::Greater => return a,
        std::cmp::Ordering::Equal => {}
    }
    match a.signedness.cmp(&b.signedness) {
        std::cmp::Ordering::Less => return a,
        std::cmp::Ordering::Greater => return b,
        std::cmp::Ordering::Equal => {}
    }
    if a.is_bint() {
        return b;
    }
    if b.is_bint() {
        return a;
    }
    // Same rank and signedness but different kinds: SSize/Size never share
    // a signedness, so order by kind to keep this symmetric.
    if (a.kind as u8) <= (b.kind as u8) {
        a
    } else {
        b
    }
}

/// Whether converting `src` to `dst` is an implicit, information-preserving
/// promotion: small integers to `int`, `float` to `double`.
pub fn is_promotion(src: NumericType, dst: NumericType) -> bool {
    if src.complex || dst.complex {
        return false;
    }
    if dst == NumericType::c_int() {
        let unsigned = if src.is_signed() { 0 } else { 2 };
        return src.is_int() && !src.is_bint() && unsigned + src.rank().value() < dst.rank().value();
    }
    if dst == NumericType::c_double() {
        return src.is_float() && src.rank() <= dst.rank();
    }
    false
}

/// Distance between two integer (or two floating point) types used by
/// overload scoring. Unsigned types sit half a rank above their signed
/// counterpart.
pub fn rank_distance(src: NumericType, dst: NumericType) -> u32 {
    let adjusted = |t: NumericType| t.rank().value() * 2 + u32::from(!t.is_signed());
    adjusted(dst).abs_diff(adjusted(src))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_wins_at_equal_rank() {
        let a = NumericType::signed(NumericKind::Long);
        let b = NumericType::unsigned(NumericKind::Long);
        assert_eq!(widest_numeric_type(a, b), b);
        assert_eq!(widest_numeric_type(b, a), b);
    }

    #[test]
    fn complex_dominates() {
        let c = NumericType::complex_of(NumericType::signed(NumericKind::Float));
        let w = widest_numeric_type(NumericType::c_double(), c);
        assert!(w.complex);
        assert_eq!(w.kind, NumericKind::Double);
    }

    #[test]
    fn promotion_rules() {
        assert!(is_promotion(NumericType::signed(NumericKind::Short), NumericType::c_int()));
        assert!(is_promotion(NumericType::unsigned(NumericKind::Char), NumericType::c_int()));
        assert!(!is_promotion(NumericType::unsigned(NumericKind::Short), NumericType::c_int()));
        assert!(is_promotion(NumericType::signed(NumericKind::Float), NumericType::c_double()));
        assert!(!is_promotion(NumericType::c_long(), NumericType::c_int()));
    }

    #[test]
    fn c_names() {
        assert_eq!(NumericType::unsigned(NumericKind::Int).c_name(), "unsigned int");
        assert_eq!(NumericType::py_ssize_t().c_name(), "Py_ssize_t");
        assert_eq!(NumericType::bint().display_name(), "bint");
    }
}

//! Computation expressions.
//!
//! [`Expr`] is the right-hand side of a computation: constants, variables
//! (iterators, parameters and invariants), operators, selects, casts and
//! reads of other computations. Every pass that consumes expressions
//! (access extraction, lowering, printing) matches on it exhaustively.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

use crate::polyhedral::{ceil_div, floor_div, AffineExpr};

/// Scalar element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimType {
    /// Boolean
    Bool,
    /// Unsigned 8-bit integer
    UInt8,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
}

impl PrimType {
    /// Width in bits.
    pub fn bits(&self) -> u32 {
        match self {
            PrimType::Bool => 1,
            PrimType::UInt8 => 8,
            PrimType::Int32 | PrimType::Float32 => 32,
            PrimType::Int64 | PrimType::Float64 => 64,
        }
    }

    /// True for floating-point types.
    pub fn is_float(&self) -> bool {
        matches!(self, PrimType::Float32 | PrimType::Float64)
    }
}

impl fmt::Display for PrimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimType::Bool => "bool",
            PrimType::UInt8 => "uint8",
            PrimType::Int32 => "int32",
            PrimType::Int64 => "int64",
            PrimType::Float32 => "float32",
            PrimType::Float64 => "float64",
        };
        write!(f, "{}", s)
    }
}

/// A typed constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Boolean constant
    Bool(bool),
    /// 8-bit unsigned constant
    UInt8(u8),
    /// 32-bit integer constant
    Int32(i32),
    /// 64-bit integer constant
    Int64(i64),
    /// 32-bit float constant
    Float32(f32),
    /// 64-bit float constant
    Float64(f64),
}

impl Literal {
    /// Element type of the constant.
    pub fn prim_type(&self) -> PrimType {
        match self {
            Literal::Bool(_) => PrimType::Bool,
            Literal::UInt8(_) => PrimType::UInt8,
            Literal::Int32(_) => PrimType::Int32,
            Literal::Int64(_) => PrimType::Int64,
            Literal::Float32(_) => PrimType::Float32,
            Literal::Float64(_) => PrimType::Float64,
        }
    }

    /// Integer value, for integer and boolean constants.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Literal::Bool(b) => Some(b as i64),
            Literal::UInt8(v) => Some(v as i64),
            Literal::Int32(v) => Some(v as i64),
            Literal::Int64(v) => Some(v),
            Literal::Float32(_) | Literal::Float64(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::UInt8(v) => write!(f, "(uint8){}", v),
            Literal::Int32(v) => write!(f, "{}", v),
            Literal::Int64(v) => write!(f, "(int64){}", v),
            Literal::Float32(v) => write!(f, "{:?}f", v),
            Literal::Float64(v) => write!(f, "{:?}", v),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Logical not
    Not,
    /// Absolute value
    Abs,
    /// Floor
    Floor,
    /// Square root
    Sqrt,
}

impl UnaryOp {
    /// Name used when printing.
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::Abs => "abs",
            UnaryOp::Floor => "floor",
            UnaryOp::Sqrt => "sqrt",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Remainder
    Mod,
    /// Minimum
    Min,
    /// Maximum
    Max,
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less or equal
    Le,
    /// Greater than
    Gt,
    /// Greater or equal
    Ge,
    /// Logical and
    And,
    /// Logical or
    Or,
}

impl BinaryOp {
    /// Operator text used when printing.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// True for operators printed as function calls.
    pub fn is_call(&self) -> bool {
        matches!(self, BinaryOp::Min | BinaryOp::Max)
    }
}

/// A computation expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Typed constant
    Const(Literal),
    /// Iterator, parameter or invariant
    Var(String),
    /// Unary operation
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : else`
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Conversion to another element type
    Cast(PrimType, Box<Expr>),
    /// Read of another computation at the given iteration point
    Access {
        /// Name of the computation being read
        comp: String,
        /// One index expression per iterator of that computation
        indices: Vec<Expr>,
    },
}

impl Expr {
    /// 32-bit integer constant.
    pub fn int(v: i32) -> Self {
        Expr::Const(Literal::Int32(v))
    }

    /// 64-bit integer constant.
    pub fn int64(v: i64) -> Self {
        Expr::Const(Literal::Int64(v))
    }

    /// 32-bit float constant.
    pub fn f32(v: f32) -> Self {
        Expr::Const(Literal::Float32(v))
    }

    /// 64-bit float constant.
    pub fn f64(v: f64) -> Self {
        Expr::Const(Literal::Float64(v))
    }

    /// Boolean constant.
    pub fn bool(v: bool) -> Self {
        Expr::Const(Literal::Bool(v))
    }

    /// Variable reference.
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    /// Read of computation `comp` at `indices`.
    pub fn access(comp: impl Into<String>, indices: Vec<Expr>) -> Self {
        Expr::Access { comp: comp.into(), indices }
    }

    /// Binary operation.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Unary operation.
    pub fn unary(op: UnaryOp, e: Expr) -> Self {
        Expr::Unary(op, Box::new(e))
    }

    /// `cond ? a : b`.
    pub fn select(cond: Expr, a: Expr, b: Expr) -> Self {
        Expr::Select(Box::new(cond), Box::new(a), Box::new(b))
    }

    /// Type conversion.
    pub fn cast(ty: PrimType, e: Expr) -> Self {
        Expr::Cast(ty, Box::new(e))
    }

    /// Minimum of two expressions.
    pub fn min(a: Expr, b: Expr) -> Self {
        Self::binary(BinaryOp::Min, a, b)
    }

    /// Maximum of two expressions.
    pub fn max(a: Expr, b: Expr) -> Self {
        Self::binary(BinaryOp::Max, a, b)
    }

    /// `self < rhs`.
    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs.into())
    }

    /// `self <= rhs`.
    pub fn le(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Le, self, rhs.into())
    }

    /// `self > rhs`.
    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Gt, self, rhs.into())
    }

    /// `self >= rhs`.
    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Ge, self, rhs.into())
    }

    /// `self == rhs`.
    pub fn eq_to(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs.into())
    }

    /// Every computation read in the expression, outermost first.
    pub fn accesses(&self) -> Vec<(&str, &[Expr])> {
        let mut out = Vec::new();
        self.collect_accesses(&mut out);
        out
    }

    fn collect_accesses<'a>(&'a self, out: &mut Vec<(&'a str, &'a [Expr])>) {
        match self {
            Expr::Const(_) | Expr::Var(_) => {}
            Expr::Unary(_, e) | Expr::Cast(_, e) => e.collect_accesses(out),
            Expr::Binary(_, a, b) => {
                a.collect_accesses(out);
                b.collect_accesses(out);
            }
            Expr::Select(c, a, b) => {
                c.collect_accesses(out);
                a.collect_accesses(out);
                b.collect_accesses(out);
            }
            Expr::Access { comp, indices } => {
                out.push((comp.as_str(), indices.as_slice()));
                for i in indices {
                    i.collect_accesses(out);
                }
            }
        }
    }

    /// Replace variables by expressions.
    pub fn substitute(&self, bindings: &[(String, Expr)]) -> Expr {
        match self {
            Expr::Var(name) => bindings
                .iter()
                .find(|(n, _)| n == name)
                .map_or_else(|| self.clone(), |(_, e)| e.clone()),
            Expr::Const(_) => self.clone(),
            Expr::Unary(op, e) => Expr::unary(*op, e.substitute(bindings)),
            Expr::Cast(ty, e) => Expr::cast(*ty, e.substitute(bindings)),
            Expr::Binary(op, a, b) => Expr::binary(*op, a.substitute(bindings), b.substitute(bindings)),
            Expr::Select(c, a, b) => {
                Expr::select(c.substitute(bindings), a.substitute(bindings), b.substitute(bindings))
            }
            Expr::Access { comp, indices } => Expr::Access {
                comp: comp.clone(),
                indices: indices.iter().map(|i| i.substitute(bindings)).collect(),
            },
        }
    }
}

/// Integer constant, 32-bit when it fits.
pub fn index_const(v: i64) -> Expr {
    match i32::try_from(v) {
        Ok(v) => Expr::int(v),
        Err(_) => Expr::int64(v),
    }
}

impl Expr {
    /// Rebuild an affine expression over named columns and parameters.
    pub fn from_affine(e: &AffineExpr, names: &[String], params: &[String]) -> Expr {
        let terms = e
            .coeffs
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != 0)
            .map(|(k, &c)| (c, names.get(k).cloned().unwrap_or_else(|| format!("e{}", k))))
            .chain(
                e.param_coeffs
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| **c != 0)
                    .map(|(k, &c)| (c, params.get(k).cloned().unwrap_or_else(|| format!("p{}", k)))),
            );
        let mut out: Option<Expr> = None;
        for (c, name) in terms {
            let magnitude = if c.abs() == 1 { Expr::var(name) } else { index_const(c.abs()) * Expr::var(name) };
            out = Some(match (out, c > 0) {
                (None, true) => magnitude,
                (None, false) => -magnitude,
                (Some(acc), true) => acc + magnitude,
                (Some(acc), false) => acc - magnitude,
            });
        }
        match out {
            None => index_const(e.constant),
            Some(acc) if e.constant > 0 => acc + index_const(e.constant),
            Some(acc) if e.constant < 0 => acc - index_const(-e.constant),
            Some(acc) => acc,
        }
    }

    /// `floor(e / div)` (or `ceil` when `ceil` is set) for a positive divisor.
    pub fn from_affine_div(e: &AffineExpr, div: i64, names: &[String], params: &[String], ceil: bool) -> Expr {
        if div == 1 {
            return Self::from_affine(e, names, params);
        }
        if let Some(c) = e.as_constant() {
            let v = if ceil { ceil_div(c, div) } else { floor_div(c, div) };
            return index_const(v);
        }
        let mut num = e.clone();
        if ceil {
            num.constant += div - 1;
        }
        Expr::unary(UnaryOp::Floor, Self::from_affine(&num, names, params) / index_const(div))
    }

    /// Fold integer arithmetic on constants and drop `+ 0`, `* 1`.
    pub fn fold(&self) -> Expr {
        match self {
            Expr::Binary(op, a, b) => {
                let (a, b) = (a.fold(), b.fold());
                let ints = match (&a, &b) {
                    (Expr::Const(x), Expr::Const(y)) => x.as_int().zip(y.as_int()),
                    _ => None,
                };
                if let Some((x, y)) = ints {
                    let v = match op {
                        BinaryOp::Add => Some(x + y),
                        BinaryOp::Sub => Some(x - y),
                        BinaryOp::Mul => Some(x * y),
                        BinaryOp::Min => Some(x.min(y)),
                        BinaryOp::Max => Some(x.max(y)),
                        _ => None,
                    };
                    if let Some(v) = v {
                        return index_const(v);
                    }
                }
                let is = |e: &Expr, v: i64| matches!(e, Expr::Const(l) if l.as_int() == Some(v));
                match op {
                    BinaryOp::Add if is(&b, 0) => a,
                    BinaryOp::Add if is(&a, 0) => b,
                    BinaryOp::Sub if is(&b, 0) => a,
                    BinaryOp::Mul if is(&b, 1) => a,
                    BinaryOp::Mul if is(&a, 1) => b,
                    BinaryOp::Mul if is(&a, 0) || is(&b, 0) => Expr::int(0),
                    _ => Expr::binary(*op, a, b),
                }
            }
            Expr::Unary(op, e) => Expr::unary(*op, e.fold()),
            Expr::Cast(ty, e) => Expr::cast(*ty, e.fold()),
            Expr::Select(c, a, b) => Expr::select(c.fold(), a.fold(), b.fold()),
            Expr::Access { comp, indices } => Expr::access(comp.clone(), indices.iter().map(Expr::fold).collect()),
            Expr::Const(_) | Expr::Var(_) => self.clone(),
        }
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::int(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::int64(v)
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::f64(v)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::var(name)
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self, rhs.into())
            }
        }
    };
}

impl_binary_operator!(Add, add, BinaryOp::Add);
impl_binary_operator!(Sub, sub, BinaryOp::Sub);
impl_binary_operator!(Mul, mul, BinaryOp::Mul);
impl_binary_operator!(Div, div, BinaryOp::Div);
impl_binary_operator!(Rem, rem, BinaryOp::Mod);

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(l) => write!(f, "{}", l),
            Expr::Var(n) => write!(f, "{}", n),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "(-{})", e),
            Expr::Unary(UnaryOp::Not, e) => write!(f, "!({})", e),
            Expr::Unary(op, e) => write!(f, "{}({})", op.symbol(), e),
            Expr::Binary(op, a, b) if op.is_call() => write!(f, "{}({}, {})", op.symbol(), a, b),
            Expr::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            Expr::Select(c, a, b) => write!(f, "select({}, {}, {})", c, a, b),
            Expr::Cast(ty, e) => write!(f, "({}){}", ty, e),
            Expr::Access { comp, indices } => {
                let idx: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
                write!(f, "{}({})", comp, idx.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_overloading() {
        let i = Expr::var("i");
        let e = (i.clone() - 1) * 2 + Expr::var("N");
        assert_eq!(e.to_string(), "(((i - 1) * 2) + N)");
        assert_eq!((-i).to_string(), "(-i)");
    }

    #[test]
    fn test_accesses_collects_nested_reads() {
        let e = Expr::access("A", vec![Expr::var("i")]) + Expr::access("B", vec![Expr::access("C", vec![Expr::int(0)])]);
        let names: Vec<&str> = e.accesses().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_substitute() {
        let e = Expr::var("i") + Expr::var("j");
        let s = e.substitute(&[("i".to_string(), Expr::int(3))]);
        assert_eq!(s.to_string(), "(3 + j)");
    }

    #[test]
    fn test_from_affine_and_fold() {
        let names = vec!["i".to_string(), "j".to_string()];
        let params = vec!["N".to_string()];
        let e = AffineExpr { constant: -1, coeffs: vec![1, -2], param_coeffs: vec![1] };
        assert_eq!(Expr::from_affine(&e, &names, &params).to_string(), "(((i - (2 * j)) + N) - 1)");
        let c = AffineExpr { constant: 7, coeffs: vec![0, 0], param_coeffs: vec![0] };
        assert_eq!(Expr::from_affine_div(&c, 2, &names, &params, true).to_string(), "4");
        let folded = (Expr::int(2) * Expr::int(3) + Expr::var("i") * 1).fold();
        assert_eq!(folded.to_string(), "(6 + i)");
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(Literal::Float64(0.5).prim_type(), PrimType::Float64);
        assert_eq!(Literal::Int32(7).as_int(), Some(7));
        assert_eq!(Literal::Float32(1.0).as_int(), None);
        assert_eq!(PrimType::Float32.bits(), 32);
        assert_eq!(Expr::f64(0.5).to_string(), "0.5");
    }
}

//! Lowered statements.
//!
//! The output of lowering: a tree of unit-stride loops, conditionals, lets
//! and stores over flat buffers. Every buffer access carries one linear
//! index, so a backend only needs pointer arithmetic.

use serde::{Serialize, Deserialize};
use std::fmt;

use crate::ir::expr::{BinaryOp, Literal, PrimType, UnaryOp};
use crate::utils::pretty::{CodeFormatter, PrettyPrint};

/// How a loop is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForKind {
    /// Sequential
    Serial,
    /// Iterations run on parallel threads
    Parallel,
    /// Iterations map to vector lanes of the given width
    Vectorized(u32),
    /// Fully unrolled
    Unrolled,
    /// Iterations are spread over distributed nodes
    Distributed,
    /// GPU block dimension (0 = x, 1 = y, 2 = z)
    GpuBlock(usize),
    /// GPU thread dimension (0 = x, 1 = y, 2 = z)
    GpuThread(usize),
}

impl ForKind {
    fn prefix(&self) -> String {
        match self {
            ForKind::Serial => String::new(),
            ForKind::Parallel => "parallel ".to_string(),
            ForKind::Vectorized(w) => format!("vectorized<{}> ", w),
            ForKind::Unrolled => "unrolled ".to_string(),
            ForKind::Distributed => "distributed ".to_string(),
            ForKind::GpuBlock(d) => format!("gpu_block<{}> ", d),
            ForKind::GpuThread(d) => format!("gpu_thread<{}> ", d),
        }
    }
}

/// Where a loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceApi {
    /// The host CPU
    Host,
    /// A GPU
    Gpu,
}

/// A lowered scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrExpr {
    /// Constant of a fixed width
    Const(Literal),
    /// Loop variable, let-bound name or parameter
    Var(String),
    /// Unary operation
    Unary(UnaryOp, Box<IrExpr>),
    /// Binary operation
    Binary(BinaryOp, Box<IrExpr>, Box<IrExpr>),
    /// `cond ? a : b`
    Select(Box<IrExpr>, Box<IrExpr>, Box<IrExpr>),
    /// Type conversion
    Cast(PrimType, Box<IrExpr>),
    /// Read of a flat buffer
    Load {
        /// Buffer name
        buffer: String,
        /// Linear offset
        index: Box<IrExpr>,
        /// Element type
        ty: PrimType,
    },
}

impl IrExpr {
    /// Variable reference.
    pub fn var(name: impl Into<String>) -> Self {
        IrExpr::Var(name.into())
    }

    /// Binary operation.
    pub fn binary(op: BinaryOp, a: IrExpr, b: IrExpr) -> Self {
        IrExpr::Binary(op, Box::new(a), Box::new(b))
    }

    /// Every buffer loaded in the expression.
    pub fn loads(&self) -> Vec<(&str, &IrExpr)> {
        let mut out = Vec::new();
        self.collect_loads(&mut out);
        out
    }

    fn collect_loads<'a>(&'a self, out: &mut Vec<(&'a str, &'a IrExpr)>) {
        match self {
            IrExpr::Const(_) | IrExpr::Var(_) => {}
            IrExpr::Unary(_, e) | IrExpr::Cast(_, e) => e.collect_loads(out),
            IrExpr::Binary(_, a, b) => {
                a.collect_loads(out);
                b.collect_loads(out);
            }
            IrExpr::Select(c, a, b) => {
                c.collect_loads(out);
                a.collect_loads(out);
                b.collect_loads(out);
            }
            IrExpr::Load { buffer, index, .. } => {
                out.push((buffer.as_str(), index));
                index.collect_loads(out);
            }
        }
    }
}

impl fmt::Display for IrExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrExpr::Const(l) => write!(f, "{}", l),
            IrExpr::Var(n) => write!(f, "{}", n),
            IrExpr::Unary(UnaryOp::Neg, e) => write!(f, "(-{})", e),
            IrExpr::Unary(UnaryOp::Not, e) => write!(f, "!({})", e),
            IrExpr::Unary(op, e) => write!(f, "{}({})", op.symbol(), e),
            IrExpr::Binary(op, a, b) if op.is_call() => write!(f, "{}({}, {})", op.symbol(), a, b),
            IrExpr::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            IrExpr::Select(c, a, b) => write!(f, "select({}, {}, {})", c, a, b),
            IrExpr::Cast(ty, e) => write!(f, "({}){}", ty, e),
            IrExpr::Load { buffer, index, .. } => write!(f, "{}[{}]", buffer, index),
        }
    }
}

/// A lowered statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `for var in [min, min + extent)`, step 1
    For {
        /// Loop variable
        var: String,
        /// First value
        min: IrExpr,
        /// Trip count
        extent: IrExpr,
        /// Execution kind
        kind: ForKind,
        /// Device the loop runs on
        device: DeviceApi,
        /// Loop body
        body: Box<Stmt>,
    },
    /// Conditional
    IfThenElse {
        /// Condition
        cond: IrExpr,
        /// Taken when the condition holds
        then_case: Box<Stmt>,
        /// Taken otherwise
        else_case: Option<Box<Stmt>>,
    },
    /// Statements in order
    Block(Vec<Stmt>),
    /// Scalar binding visible in `body`
    LetStmt {
        /// Bound name
        name: String,
        /// Bound value
        value: IrExpr,
        /// Scope of the binding
        body: Box<Stmt>,
    },
    /// `buffer[index] = value`
    Store {
        /// Buffer name
        buffer: String,
        /// Linear offset
        index: IrExpr,
        /// Stored value
        value: IrExpr,
    },
    /// Storage for a temporary buffer, live in `body`
    Allocate {
        /// Buffer name
        buffer: String,
        /// Element type
        elem_type: PrimType,
        /// Extent of each dimension
        extents: Vec<IrExpr>,
        /// Scope of the allocation
        body: Box<Stmt>,
    },
    /// Expression evaluated for its side effects
    Evaluate(IrExpr),
}

impl Stmt {
    /// Empty block.
    pub fn no_op() -> Self {
        Stmt::Block(Vec::new())
    }

    /// Sequence two statements, flattening nested blocks.
    pub fn then(self, next: Stmt) -> Self {
        let mut items = match self {
            Stmt::Block(items) => items,
            other => vec![other],
        };
        match next {
            Stmt::Block(more) => items.extend(more),
            other => items.push(other),
        }
        Stmt::Block(items)
    }

    /// Visit every statement, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Stmt)) {
        visit(self);
        match self {
            Stmt::For { body, .. } | Stmt::LetStmt { body, .. } | Stmt::Allocate { body, .. } => body.walk(visit),
            Stmt::IfThenElse { then_case, else_case, .. } => {
                then_case.walk(visit);
                if let Some(e) = else_case {
                    e.walk(visit);
                }
            }
            Stmt::Block(items) => items.iter().for_each(|s| s.walk(visit)),
            Stmt::Store { .. } | Stmt::Evaluate(_) => {}
        }
    }

    /// All loops, outermost first.
    pub fn loops(&self) -> Vec<&Stmt> {
        let mut out = Vec::new();
        self.walk(&mut |s| {
            if matches!(s, Stmt::For { .. }) {
                out.push(s);
            }
        });
        out
    }

    /// All stores in program order.
    pub fn stores(&self) -> Vec<&Stmt> {
        let mut out = Vec::new();
        self.walk(&mut |s| {
            if matches!(s, Stmt::Store { .. }) {
                out.push(s);
            }
        });
        out
    }
}

impl PrettyPrint for Stmt {
    fn pretty_into(&self, f: &mut CodeFormatter) {
        match self {
            Stmt::For { var, min, extent, kind, device, body } => {
                let device = match device {
                    DeviceApi::Host => "",
                    DeviceApi::Gpu => " on gpu",
                };
                f.block(&format!("{}for ({}, {}, {}){}", kind.prefix(), var, min, extent, device), |f| {
                    body.pretty_into(f)
                });
            }
            Stmt::IfThenElse { cond, then_case, else_case } => {
                f.writeln(&format!("if ({}) {{", cond));
                f.indent();
                then_case.pretty_into(f);
                f.dedent();
                if let Some(e) = else_case {
                    f.writeln("} else {");
                    f.indent();
                    e.pretty_into(f);
                    f.dedent();
                }
                f.writeln("}");
            }
            Stmt::Block(items) => items.iter().for_each(|s| s.pretty_into(f)),
            Stmt::LetStmt { name, value, body } => {
                f.writeln(&format!("let {} = {}", name, value));
                body.pretty_into(f);
            }
            Stmt::Store { buffer, index, value } => f.writeln(&format!("{}[{}] = {}", buffer, index, value)),
            Stmt::Allocate { buffer, elem_type, extents, body } => {
                let dims: Vec<String> = extents.iter().map(|e| e.to_string()).collect();
                f.writeln(&format!("allocate {}[{} * {}]", buffer, elem_type, dims.join(" * ")));
                body.pretty_into(f);
                f.writeln(&format!("free {}", buffer));
            }
            Stmt::Evaluate(e) => f.writeln(&e.to_string()),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i32) -> IrExpr {
        IrExpr::Const(Literal::Int32(v))
    }

    fn store(i: &str) -> Stmt {
        Stmt::Store { buffer: "A".into(), index: IrExpr::var(i), value: int(1) }
    }

    #[test]
    fn test_print_loop_nest() {
        let inner = Stmt::For {
            var: "c3".into(),
            min: int(0),
            extent: IrExpr::var("M"),
            kind: ForKind::Vectorized(8),
            device: DeviceApi::Host,
            body: Box::new(store("c3")),
        };
        let outer = Stmt::For {
            var: "c1".into(),
            min: int(0),
            extent: IrExpr::var("N"),
            kind: ForKind::Parallel,
            device: DeviceApi::Host,
            body: Box::new(inner),
        };
        let text = outer.to_string();
        assert_eq!(
            text,
            "parallel for (c1, 0, N) {\n  vectorized<8> for (c3, 0, M) {\n    A[c3] = 1\n  }\n}\n"
        );
        assert_eq!(outer.loops().len(), 2);
        assert_eq!(outer.stores().len(), 1);
    }

    #[test]
    fn test_then_flattens_blocks() {
        let s = store("i").then(store("j")).then(Stmt::Block(vec![store("k")]));
        match s {
            Stmt::Block(items) => assert_eq!(items.len(), 3),
            other => panic!("expected a block, got {:?}", other),
        }
    }

    #[test]
    fn test_loads() {
        let e = IrExpr::binary(
            BinaryOp::Add,
            IrExpr::Load { buffer: "B".into(), index: Box::new(IrExpr::var("i")), ty: PrimType::Float32 },
            int(1),
        );
        assert_eq!(e.to_string(), "(B[i] + 1)");
        assert_eq!(e.loads().len(), 1);
    }

    #[test]
    fn test_allocate_and_let_print() {
        let s = Stmt::LetStmt {
            name: "N".into(),
            value: int(16),
            body: Box::new(Stmt::Allocate {
                buffer: "tmp".into(),
                elem_type: PrimType::Float32,
                extents: vec![IrExpr::var("N")],
                body: Box::new(store("i")),
            }),
        };
        let text = s.to_string();
        assert!(text.starts_with("let N = 16\nallocate tmp[float32 * N]\n"));
        assert!(text.ends_with("free tmp\n"));
    }
}

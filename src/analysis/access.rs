//! Access relation extraction.
//!
//! Index expressions of reads and writes are turned into affine functions of
//! the enclosing computation's iterators and the function parameters. Only
//! sums, differences, integer constants, iterators, parameters and constant
//! multiples are accepted.

use crate::ir::expr::{BinaryOp, Expr, UnaryOp};
use crate::polyhedral::{AffineExpr, BasicMap, Tuple};
use crate::utils::errors::{AnalysisError, AnalysisErrorKind, PolyResult};

fn unsupported(what: impl Into<String>, e: &Expr) -> AnalysisError {
    AnalysisError::new(
        AnalysisErrorKind::UnsupportedAccess,
        format!("unsupported {} in access index `{}`", what.into(), e),
    )
}

/// Affine form of an index expression. Names that are not iterators are
/// treated as parameters and appended to `params` when new.
pub fn to_affine(e: &Expr, iterators: &[String], params: &mut Vec<String>) -> PolyResult<AffineExpr> {
    let mut out = build(e, iterators, params)?;
    out.param_coeffs.resize(params.len(), 0);
    Ok(out)
}

fn build(e: &Expr, iterators: &[String], params: &mut Vec<String>) -> PolyResult<AffineExpr> {
    let n = iterators.len();
    match e {
        Expr::Const(lit) => match lit.as_int() {
            Some(v) => Ok(AffineExpr::constant(v, n, params.len())),
            None => Err(unsupported("floating-point constant", e).into()),
        },
        Expr::Var(name) => {
            if let Some(k) = iterators.iter().position(|it| it == name) {
                return Ok(AffineExpr::var(k, n, params.len()));
            }
            let idx = match params.iter().position(|p| p == name) {
                Some(idx) => idx,
                None => {
                    params.push(name.clone());
                    params.len() - 1
                }
            };
            Ok(AffineExpr::param(idx, n, params.len()))
        }
        Expr::Unary(UnaryOp::Neg, inner) => Ok(-build(inner, iterators, params)?),
        Expr::Binary(op @ (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul), a, b) => {
            let mut x = build(a, iterators, params)?;
            let mut y = build(b, iterators, params)?;
            x.param_coeffs.resize(params.len(), 0);
            y.param_coeffs.resize(params.len(), 0);
            match op {
                BinaryOp::Add => Ok(x + y),
                BinaryOp::Sub => Ok(x - y),
                _ => match (x.as_constant(), y.as_constant()) {
                    (Some(c), _) => Ok(y.scale(c)),
                    (_, Some(c)) => Ok(x.scale(c)),
                    _ => Err(unsupported("product of two non-constant terms", e).into()),
                },
            }
        }
        Expr::Cast(ty, inner) if !ty.is_float() => build(inner, iterators, params),
        Expr::Unary(op, _) => Err(unsupported(format!("operator `{}`", op.symbol()), e).into()),
        Expr::Binary(op, _, _) => Err(unsupported(format!("operator `{}`", op.symbol()), e).into()),
        Expr::Select(..) => Err(unsupported("select", e).into()),
        Expr::Cast(..) => Err(unsupported("cast", e).into()),
        Expr::Access { .. } => Err(unsupported("indirect access", e).into()),
    }
}

/// `{ source[iterators] -> target[indices] }`.
pub fn access_relation(source: &Tuple, params: &[String], target: Tuple, indices: &[Expr]) -> PolyResult<BasicMap> {
    let mut params = params.to_vec();
    let mut outputs = Vec::with_capacity(indices.len());
    for idx in indices {
        outputs.push(to_affine(idx, &source.dims, &mut params)?);
    }
    for o in &mut outputs {
        o.param_coeffs.resize(params.len(), 0);
    }
    Ok(BasicMap::from_outputs(source.clone(), target, params, &outputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::PolyError;

    fn iters() -> Vec<String> {
        vec!["i".to_string(), "j".to_string()]
    }

    #[test]
    fn test_affine_index() {
        let mut params = vec![];
        let e = Expr::var("i") * 2 - Expr::var("j") + Expr::var("N") - 1;
        let a = to_affine(&e, &iters(), &mut params).unwrap();
        assert_eq!(params, vec!["N".to_string()]);
        assert_eq!(a.coeffs, vec![2, -1]);
        assert_eq!(a.param_coeffs, vec![1]);
        assert_eq!(a.constant, -1);
    }

    #[test]
    fn test_rejects_nonlinear_index() {
        let mut params = vec![];
        let e = Expr::var("i") * Expr::var("j");
        let err = to_affine(&e, &iters(), &mut params).unwrap_err();
        match err {
            PolyError::Analysis(a) => assert_eq!(a.kind, AnalysisErrorKind::UnsupportedAccess),
            other => panic!("unexpected error {other}"),
        }
        let e = Expr::var("i") % 2;
        let err = to_affine(&e, &iters(), &mut params).unwrap_err();
        assert!(err.to_string().contains("`%`"));
    }

    #[test]
    fn test_access_relation() {
        let src = Tuple::named("S", iters());
        let dst = Tuple::named("A", vec!["a".into(), "b".into()]);
        let m = access_relation(&src, &[], dst, &[Expr::var("i") + 1, Expr::var("j")]).unwrap();
        assert!(m.contains_point(&[1, 2, 2, 2], &[]));
        assert!(!m.contains_point(&[1, 2, 1, 2], &[]));
    }
}

//! Affine expressions over tuple dimensions, locals and parameters.
//!
//! An affine expression is a linear combination of variables plus a constant:
//! `aff(x) = c0 + c1*x1 + c2*x2 + ... + cn*xn + p1*N1 + ...`
//!
//! Variable columns are laid out by the owning [`Space`](super::Space) as
//! `[input dims | output dims | locals]`; parameters live in their own vector.

use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::fmt;
use std::ops::{Add, Sub, Neg};

/// Integer floor division (rounds toward negative infinity).
pub fn floor_div(a: i64, b: i64) -> i64 {
    Integer::div_floor(&a, &b)
}

/// Integer ceiling division.
pub fn ceil_div(a: i64, b: i64) -> i64 {
    -Integer::div_floor(&-a, &b)
}

/// An affine expression: constant + sum(coeff[i] * var[i]) + sum(p[j] * param[j])
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffineExpr {
    /// Constant term
    pub constant: i64,
    /// Coefficients for each variable column
    pub coeffs: Vec<i64>,
    /// Coefficients for parameters (index = parameter index)
    pub param_coeffs: Vec<i64>,
}

impl AffineExpr {
    /// Create a zero expression.
    pub fn zero(n_var: usize, n_param: usize) -> Self {
        Self {
            constant: 0,
            coeffs: vec![0; n_var],
            param_coeffs: vec![0; n_param],
        }
    }

    /// Create a constant expression.
    pub fn constant(value: i64, n_var: usize, n_param: usize) -> Self {
        Self { constant: value, ..Self::zero(n_var, n_param) }
    }

    /// Create an expression for a single variable column.
    pub fn var(col: usize, n_var: usize, n_param: usize) -> Self {
        let mut e = Self::zero(n_var, n_param);
        e.set_coeff(col, 1);
        e
    }

    /// Create an expression for a parameter.
    pub fn param(idx: usize, n_var: usize, n_param: usize) -> Self {
        let mut e = Self::zero(n_var, n_param);
        e.set_param_coeff(idx, 1);
        e
    }

    /// True when no variable or parameter appears.
    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0) && self.param_coeffs.iter().all(|&c| c == 0)
    }

    /// Get the constant value if this is a constant expression.
    pub fn as_constant(&self) -> Option<i64> {
        self.is_constant().then_some(self.constant)
    }

    /// Number of variable columns.
    pub fn n_var(&self) -> usize {
        self.coeffs.len()
    }

    /// Number of parameters.
    pub fn n_param(&self) -> usize {
        self.param_coeffs.len()
    }

    /// Coefficient of a variable column (0 when out of range).
    pub fn coeff(&self, col: usize) -> i64 {
        self.coeffs.get(col).copied().unwrap_or(0)
    }

    /// Coefficient of a parameter (0 when out of range).
    pub fn param_coeff(&self, idx: usize) -> i64 {
        self.param_coeffs.get(idx).copied().unwrap_or(0)
    }

    /// Set the coefficient of a variable column.
    pub fn set_coeff(&mut self, col: usize, value: i64) {
        if col < self.coeffs.len() {
            self.coeffs[col] = value;
        }
    }

    /// Set the coefficient of a parameter.
    pub fn set_param_coeff(&mut self, idx: usize, value: i64) {
        if idx < self.param_coeffs.len() {
            self.param_coeffs[idx] = value;
        }
    }

    /// Columns with a non-zero coefficient.
    pub fn support(&self) -> impl Iterator<Item = usize> + '_ {
        self.coeffs.iter().enumerate().filter(|(_, &c)| c != 0).map(|(i, _)| i)
    }

    /// Evaluate the expression given concrete values.
    pub fn evaluate(&self, vars: &[i64], params: &[i64]) -> i64 {
        let mut result = self.constant;
        for (i, &c) in self.coeffs.iter().enumerate() {
            result += c * vars.get(i).copied().unwrap_or(0);
        }
        for (i, &c) in self.param_coeffs.iter().enumerate() {
            result += c * params.get(i).copied().unwrap_or(0);
        }
        result
    }

    /// Scale the expression by a constant.
    pub fn scale(&self, factor: i64) -> Self {
        Self {
            constant: self.constant * factor,
            coeffs: self.coeffs.iter().map(|&c| c * factor).collect(),
            param_coeffs: self.param_coeffs.iter().map(|&c| c * factor).collect(),
        }
    }

    /// GCD of the variable and parameter coefficients (constant excluded).
    /// Returns 0 for a constant expression.
    pub fn coeff_gcd(&self) -> i64 {
        self.coeffs
            .iter()
            .chain(self.param_coeffs.iter())
            .fold(0i64, |g, &c| g.gcd(&c))
    }

    /// Exact division of every term; `None` if some term is not divisible.
    pub fn exact_div(&self, divisor: i64) -> Option<Self> {
        if divisor == 0 {
            return None;
        }
        let divides = |c: &i64| c % divisor == 0;
        if !divides(&self.constant)
            || !self.coeffs.iter().all(divides)
            || !self.param_coeffs.iter().all(divides)
        {
            return None;
        }
        Some(Self {
            constant: self.constant / divisor,
            coeffs: self.coeffs.iter().map(|&c| c / divisor).collect(),
            param_coeffs: self.param_coeffs.iter().map(|&c| c / divisor).collect(),
        })
    }

    /// Replace variable `col` by `value`, where `value` does not mention `col`.
    pub fn substitute(&self, col: usize, value: &AffineExpr) -> Self {
        let c = self.coeff(col);
        if c == 0 {
            return self.clone();
        }
        let mut out = self.clone();
        out.set_coeff(col, 0);
        &out + &value.scale(c)
    }

    /// Insert `n` zero columns at position `pos`.
    pub fn insert_vars(&mut self, pos: usize, n: usize) {
        let pos = pos.min(self.coeffs.len());
        self.coeffs.splice(pos..pos, std::iter::repeat(0).take(n));
    }

    /// Drop a column; its coefficient must already be zero for the result to
    /// be meaningful.
    pub fn remove_var(&mut self, col: usize) {
        if col < self.coeffs.len() {
            self.coeffs.remove(col);
        }
    }

    /// Rebuild the variable vector: column `i` moves to `mapping[i]` in a
    /// vector of length `n_new`.
    pub fn remap_vars(&self, mapping: &[usize], n_new: usize) -> Self {
        let mut coeffs = vec![0; n_new];
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                coeffs[mapping[i]] += c;
            }
        }
        Self { constant: self.constant, coeffs, param_coeffs: self.param_coeffs.clone() }
    }

    /// Rebuild the parameter vector: parameter `i` moves to `mapping[i]`.
    pub fn remap_params(&self, mapping: &[usize], n_new: usize) -> Self {
        let mut param_coeffs = vec![0; n_new];
        for (i, &c) in self.param_coeffs.iter().enumerate() {
            if c != 0 {
                param_coeffs[mapping[i]] += c;
            }
        }
        Self { constant: self.constant, coeffs: self.coeffs.clone(), param_coeffs }
    }

    /// Convert to string with the given variable and parameter names.
    pub fn to_string_with_names(&self, var_names: &[String], param_names: &[String]) -> String {
        let mut terms: Vec<(i64, String)> = Vec::new();
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                let name = var_names.get(i).cloned().unwrap_or_else(|| format!("v{}", i));
                terms.push((c, name));
            }
        }
        for (i, &c) in self.param_coeffs.iter().enumerate() {
            if c != 0 {
                let name = param_names.get(i).cloned().unwrap_or_else(|| format!("p{}", i));
                terms.push((c, name));
            }
        }

        let mut out = String::new();
        for (k, (c, name)) in terms.iter().enumerate() {
            let mag = c.abs();
            if k == 0 {
                if *c < 0 {
                    out.push('-');
                }
            } else {
                out.push_str(if *c < 0 { " - " } else { " + " });
            }
            if mag != 1 {
                out.push_str(&format!("{}", mag));
            }
            out.push_str(name);
        }
        if terms.is_empty() {
            out = format!("{}", self.constant);
        } else if self.constant > 0 {
            out.push_str(&format!(" + {}", self.constant));
        } else if self.constant < 0 {
            out.push_str(&format!(" - {}", -self.constant));
        }
        out
    }
}

impl Add for &AffineExpr {
    type Output = AffineExpr;

    fn add(self, other: &AffineExpr) -> AffineExpr {
        let n_var = self.coeffs.len().max(other.coeffs.len());
        let n_param = self.param_coeffs.len().max(other.param_coeffs.len());
        AffineExpr {
            constant: self.constant + other.constant,
            coeffs: (0..n_var).map(|i| self.coeff(i) + other.coeff(i)).collect(),
            param_coeffs: (0..n_param)
                .map(|i| self.param_coeff(i) + other.param_coeff(i))
                .collect(),
        }
    }
}

impl Add for AffineExpr {
    type Output = AffineExpr;

    fn add(self, other: AffineExpr) -> AffineExpr {
        &self + &other
    }
}

impl Sub for &AffineExpr {
    type Output = AffineExpr;

    fn sub(self, other: &AffineExpr) -> AffineExpr {
        self + &(-other)
    }
}

impl Sub for AffineExpr {
    type Output = AffineExpr;

    fn sub(self, other: AffineExpr) -> AffineExpr {
        &self - &other
    }
}

impl Neg for &AffineExpr {
    type Output = AffineExpr;

    fn neg(self) -> AffineExpr {
        self.scale(-1)
    }
}

impl Neg for AffineExpr {
    type Output = AffineExpr;

    fn neg(self) -> AffineExpr {
        self.scale(-1)
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_names(&[], &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_floor_and_ceil_div() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(ceil_div(7, 2), 4);
        assert_eq!(ceil_div(-7, 2), -3);
    }

    #[test]
    fn test_arithmetic() {
        let i = AffineExpr::var(0, 2, 1);
        let n = AffineExpr::param(0, 2, 1);
        let e = &(&i.scale(2) + &n) - &AffineExpr::constant(3, 2, 1);
        assert_eq!(e.coeff(0), 2);
        assert_eq!(e.param_coeff(0), 1);
        assert_eq!(e.constant, -3);
        assert_eq!(e.evaluate(&[5, 0], &[10]), 17);
    }

    #[test]
    fn test_substitute() {
        // e = 3i + j, i := j + 1  =>  4j + 3
        let mut e = AffineExpr::zero(2, 0);
        e.set_coeff(0, 3);
        e.set_coeff(1, 1);
        let mut v = AffineExpr::var(1, 2, 0);
        v.constant = 1;
        let r = e.substitute(0, &v);
        assert_eq!(r.coeff(0), 0);
        assert_eq!(r.coeff(1), 4);
        assert_eq!(r.constant, 3);
    }

    #[test]
    fn test_remap_and_gcd() {
        let mut e = AffineExpr::zero(3, 0);
        e.set_coeff(0, 4);
        e.set_coeff(2, 6);
        assert_eq!(e.coeff_gcd(), 2);
        let r = e.remap_vars(&[2, 0, 1], 3);
        assert_eq!(r.coeffs, vec![0, 6, 4]);
    }

    #[test]
    fn test_display() {
        let mut e = AffineExpr::zero(2, 1);
        e.set_coeff(0, 1);
        e.set_coeff(1, -2);
        e.set_param_coeff(0, 1);
        e.constant = -1;
        assert_eq!(e.to_string_with_names(&names(&["i", "j"]), &names(&["N"])), "i - 2j + N - 1");
        assert_eq!(AffineExpr::constant(4, 0, 0).to_string(), "4");
    }
}

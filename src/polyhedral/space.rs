//! Polyhedral spaces describe the tuples of a set or relation.
//!
//! A space holds:
//! - Parameter names (symbolic constants shared by name across spaces)
//! - An optional input tuple (relations only)
//! - An output tuple (the set tuple for sets)
//!
//! Each tuple has an optional name (a computation or buffer name) and named
//! dimensions.

use serde::{Serialize, Deserialize};
use std::fmt;

/// A named tuple of dimensions, e.g. `S0[i, j]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tuple {
    /// Tuple identifier (`None` for anonymous time tuples)
    pub name: Option<String>,
    /// Dimension names
    pub dims: Vec<String>,
}

impl Tuple {
    /// Create a named tuple.
    pub fn named(name: impl Into<String>, dims: Vec<String>) -> Self {
        Self { name: Some(name.into()), dims }
    }

    /// Create an anonymous tuple.
    pub fn anonymous(dims: Vec<String>) -> Self {
        Self { name: None, dims }
    }

    /// Anonymous tuple with generated dimension names `<prefix>0..`.
    pub fn anonymous_n(prefix: &str, n: usize) -> Self {
        Self::anonymous((0..n).map(|i| format!("{}{}", prefix, i)).collect())
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    /// True for a zero-dimensional tuple.
    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Same name and arity (dimension names are not significant).
    pub fn matches(&self, other: &Tuple) -> bool {
        self.name == other.name && self.dims.len() == other.dims.len()
    }

    /// Tuple name or the empty string.
    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name_str(), self.dims.join(", "))
    }
}

/// A polyhedral space describes the dimensionality and structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Space {
    /// Names of parameters
    pub params: Vec<String>,
    /// Input tuple (`None` for sets)
    pub input: Option<Tuple>,
    /// Output tuple (the set tuple for sets)
    pub output: Tuple,
}

impl Space {
    /// Create a set space.
    pub fn set(tuple: Tuple, params: Vec<String>) -> Self {
        Self { params, input: None, output: tuple }
    }

    /// Create a map space.
    pub fn map(input: Tuple, output: Tuple, params: Vec<String>) -> Self {
        Self { params, input: Some(input), output }
    }

    /// Check if this is a set space.
    pub fn is_set(&self) -> bool {
        self.input.is_none()
    }

    /// Number of input dimensions (0 for sets).
    pub fn n_in(&self) -> usize {
        self.input.as_ref().map_or(0, Tuple::len)
    }

    /// Number of output (set) dimensions.
    pub fn n_out(&self) -> usize {
        self.output.len()
    }

    /// Number of tuple dimensions (input plus output).
    pub fn n_dims(&self) -> usize {
        self.n_in() + self.n_out()
    }

    /// Number of parameters.
    pub fn n_param(&self) -> usize {
        self.params.len()
    }

    /// Column of output dimension `k`.
    pub fn out_col(&self, k: usize) -> usize {
        self.n_in() + k
    }

    /// Index of a parameter by name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p == name)
    }

    /// Input tuple, or an empty anonymous tuple for sets.
    pub fn input_tuple(&self) -> Tuple {
        self.input.clone().unwrap_or_default()
    }

    /// Same kind and matching tuples (parameters are aligned separately).
    pub fn matches(&self, other: &Space) -> bool {
        match (&self.input, &other.input) {
            (None, None) => self.output.matches(&other.output),
            (Some(a), Some(b)) => a.matches(b) && self.output.matches(&other.output),
            _ => false,
        }
    }

    /// Swap input and output tuples.
    pub fn reverse(&self) -> Self {
        Self::map(self.output.clone(), self.input_tuple(), self.params.clone())
    }

    /// Set space over the input tuple.
    pub fn domain(&self) -> Self {
        Self::set(self.input_tuple(), self.params.clone())
    }

    /// Set space over the output tuple.
    pub fn range(&self) -> Self {
        Self::set(self.output.clone(), self.params.clone())
    }

    /// Names of the tuple dimension columns (`[input | output]`).
    pub fn dim_names(&self) -> Vec<String> {
        let mut names = self.input_tuple().dims;
        names.extend(self.output.dims.iter().cloned());
        names
    }

    /// Union of two parameter lists, preserving first-seen order.
    pub fn merge_params(a: &[String], b: &[String]) -> Vec<String> {
        let mut merged = a.to_vec();
        for p in b {
            if !merged.contains(p) {
                merged.push(p.clone());
            }
        }
        merged
    }

    /// Positions of this space's parameters inside `target`.
    pub fn param_mapping(&self, target: &[String]) -> Vec<usize> {
        self.params
            .iter()
            .map(|p| target.iter().position(|t| t == p).unwrap_or(0))
            .collect()
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.params.is_empty() {
            write!(f, "[{}] -> ", self.params.join(", "))?;
        }
        match &self.input {
            Some(input) => write!(f, "{{ {} -> {} }}", input, self.output),
            None => write!(f, "{{ {} }}", self.output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_and_map_spaces() {
        let s = Space::set(Tuple::named("S", dims(&["i", "j"])), dims(&["N"]));
        assert!(s.is_set());
        assert_eq!(s.n_dims(), 2);
        assert_eq!(s.to_string(), "[N] -> { S[i, j] }");

        let m = Space::map(Tuple::named("S", dims(&["i"])), Tuple::named("A", dims(&["a", "b"])), vec![]);
        assert_eq!(m.n_in(), 1);
        assert_eq!(m.out_col(1), 2);
        assert_eq!(m.reverse().output.name_str(), "S");
        assert!(m.domain().output.matches(&Tuple::named("S", dims(&["x"]))));
    }

    #[test]
    fn test_merge_params() {
        let merged = Space::merge_params(&dims(&["N", "M"]), &dims(&["M", "K"]));
        assert_eq!(merged, dims(&["N", "M", "K"]));
        let s = Space::set(Tuple::anonymous(vec![]), dims(&["K", "N"]));
        assert_eq!(s.param_mapping(&merged), vec![2, 0]);
    }
}

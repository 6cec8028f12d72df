//! Finite unions of basic sets and relations.
//!
//! Pieces may live in different spaces (one per computation or buffer
//! tuple); binary operations only combine pieces whose tuples match.

use serde::{Serialize, Deserialize};
use std::fmt;

use super::basic::{BasicMap, Inexact};

/// A union of basic relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionMap {
    /// Disjuncts
    pub pieces: Vec<BasicMap>,
}

/// A union of basic sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionSet {
    /// Disjuncts
    pub pieces: Vec<BasicMap>,
}

fn nonempty(pieces: impl IntoIterator<Item = BasicMap>) -> Vec<BasicMap> {
    pieces.into_iter().filter(|p| !p.is_empty()).collect()
}

fn subtract_pieces(a: &[BasicMap], b: &[BasicMap]) -> Result<Vec<BasicMap>, Inexact> {
    let mut out = Vec::new();
    for piece in a {
        let mut current = vec![piece.clone()];
        for other in b.iter().filter(|o| o.space.matches(&piece.space)) {
            let mut next = Vec::new();
            for c in &current {
                next.extend(c.subtract(other)?);
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        out.extend(current);
    }
    Ok(out)
}

fn intersect_pieces(a: &[BasicMap], b: &[BasicMap]) -> Vec<BasicMap> {
    let mut out = Vec::new();
    for p in a {
        for q in b.iter().filter(|q| q.space.matches(&p.space)) {
            let r = p.intersect(q);
            if !r.is_empty() {
                out.push(r.simplify());
            }
        }
    }
    out
}

fn body(piece: &BasicMap) -> String {
    let text = piece.to_string();
    let start = text.find("{ ").map_or(0, |i| i + 2);
    let end = text.rfind(" }").unwrap_or(text.len());
    text[start..end].to_string()
}

fn write_union(f: &mut fmt::Formatter<'_>, pieces: &[BasicMap]) -> fmt::Result {
    let mut params: Vec<String> = Vec::new();
    for p in pieces {
        for name in &p.space.params {
            if !params.contains(name) {
                params.push(name.clone());
            }
        }
    }
    if !params.is_empty() {
        write!(f, "[{}] -> ", params.join(", "))?;
    }
    let bodies: Vec<String> = pieces.iter().map(body).collect();
    if bodies.is_empty() {
        write!(f, "{{  }}")
    } else {
        write!(f, "{{ {} }}", bodies.join("; "))
    }
}

impl UnionMap {
    /// The empty union.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Union with a single piece.
    pub fn from_basic(piece: BasicMap) -> Self {
        Self { pieces: vec![piece] }
    }

    /// Union of the given pieces.
    pub fn from_pieces(pieces: Vec<BasicMap>) -> Self {
        Self { pieces }
    }

    /// Add a piece.
    pub fn add(&mut self, piece: BasicMap) {
        self.pieces.push(piece);
    }

    /// True if no piece has an integer point.
    pub fn is_empty(&self) -> bool {
        self.pieces.iter().all(BasicMap::is_empty)
    }

    /// Number of stored pieces.
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Simplify each piece and drop the empty ones.
    pub fn simplify(&self) -> Self {
        Self { pieces: nonempty(self.pieces.iter().map(BasicMap::simplify)) }
    }

    /// Union of two unions.
    pub fn union(&self, other: &Self) -> Self {
        let mut pieces = self.pieces.clone();
        pieces.extend(other.pieces.iter().cloned());
        Self { pieces }
    }

    /// Pairwise intersection of matching pieces.
    pub fn intersect(&self, other: &Self) -> Self {
        Self { pieces: intersect_pieces(&self.pieces, &other.pieces) }
    }

    /// Set difference; fails when a subtracted piece keeps existentials.
    pub fn subtract(&self, other: &Self) -> Result<Self, Inexact> {
        Ok(Self { pieces: subtract_pieces(&self.pieces, &other.pieces)? })
    }

    /// Union of the piece domains.
    pub fn domain(&self) -> UnionSet {
        UnionSet { pieces: nonempty(self.pieces.iter().map(BasicMap::domain)) }
    }

    /// Union of the piece ranges.
    pub fn range(&self) -> UnionSet {
        UnionSet { pieces: nonempty(self.pieces.iter().map(BasicMap::range)) }
    }

    /// Reverse every piece.
    pub fn reverse(&self) -> Self {
        Self { pieces: self.pieces.iter().map(BasicMap::reverse).collect() }
    }

    /// Compose with `other` wherever the middle tuples match.
    pub fn apply_range(&self, other: &Self) -> Self {
        let mut pieces = Vec::new();
        for p in &self.pieces {
            for q in &other.pieces {
                if let Some(r) = p.apply_range(q) {
                    if !r.is_empty() {
                        pieces.push(r);
                    }
                }
            }
        }
        Self { pieces }
    }

    /// Restrict inputs to `set`.
    pub fn intersect_domain(&self, set: &UnionSet) -> Self {
        let mut pieces = Vec::new();
        for p in &self.pieces {
            for s in &set.pieces {
                if let Some(r) = p.intersect_domain(s) {
                    if !r.is_empty() {
                        pieces.push(r.simplify());
                    }
                }
            }
        }
        Self { pieces }
    }

    /// Restrict outputs to `set`.
    pub fn intersect_range(&self, set: &UnionSet) -> Self {
        let mut pieces = Vec::new();
        for p in &self.pieces {
            for s in &set.pieces {
                if let Some(r) = p.intersect_range(s) {
                    if !r.is_empty() {
                        pieces.push(r.simplify());
                    }
                }
            }
        }
        Self { pieces }
    }

    /// Pieces whose input and output tuples carry the given names.
    pub fn between(&self, src: &str, dst: &str) -> Self {
        Self {
            pieces: self
                .pieces
                .iter()
                .filter(|p| p.space.input_tuple().name_str() == src && p.space.output.name_str() == dst)
                .cloned()
                .collect(),
        }
    }

    /// Pieces satisfying a predicate.
    pub fn filter(&self, pred: impl Fn(&BasicMap) -> bool) -> Self {
        Self { pieces: self.pieces.iter().filter(|p| pred(p)).cloned().collect() }
    }
}

impl UnionSet {
    /// The empty union.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Union with a single piece.
    pub fn from_basic(piece: BasicMap) -> Self {
        Self { pieces: vec![piece] }
    }

    /// Union of the given pieces.
    pub fn from_pieces(pieces: Vec<BasicMap>) -> Self {
        Self { pieces }
    }

    /// Add a piece.
    pub fn add(&mut self, piece: BasicMap) {
        self.pieces.push(piece);
    }

    /// True if no piece has an integer point.
    pub fn is_empty(&self) -> bool {
        self.pieces.iter().all(BasicMap::is_empty)
    }

    /// Simplify each piece and drop the empty ones.
    pub fn simplify(&self) -> Self {
        Self { pieces: nonempty(self.pieces.iter().map(BasicMap::simplify)) }
    }

    /// Union of two unions.
    pub fn union(&self, other: &Self) -> Self {
        let mut pieces = self.pieces.clone();
        pieces.extend(other.pieces.iter().cloned());
        Self { pieces }
    }

    /// Pairwise intersection of matching pieces.
    pub fn intersect(&self, other: &Self) -> Self {
        Self { pieces: intersect_pieces(&self.pieces, &other.pieces) }
    }

    /// Set difference; fails when a subtracted piece keeps existentials.
    pub fn subtract(&self, other: &Self) -> Result<Self, Inexact> {
        Ok(Self { pieces: subtract_pieces(&self.pieces, &other.pieces)? })
    }

    /// Image under a union relation.
    pub fn apply(&self, map: &UnionMap) -> Self {
        let mut pieces = Vec::new();
        for s in &self.pieces {
            for m in &map.pieces {
                if let Some(r) = s.apply_to_set(m) {
                    if !r.is_empty() {
                        pieces.push(r);
                    }
                }
            }
        }
        Self { pieces }
    }

    /// Pieces whose tuple carries the given name.
    pub fn named(&self, name: &str) -> Self {
        Self {
            pieces: self.pieces.iter().filter(|p| p.space.output.name_str() == name).cloned().collect(),
        }
    }

    /// Membership of a point in a piece with the given tuple name.
    pub fn contains_point(&self, name: &str, point: &[i64], params: &[i64]) -> bool {
        self.pieces
            .iter()
            .any(|p| p.space.output.name_str() == name && p.contains_point(point, params))
    }
}

impl fmt::Display for UnionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_union(f, &self.pieces)
    }
}

impl fmt::Display for UnionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_union(f, &self.pieces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::{Constraint, Space, Tuple};

    fn interval(name: &str, lo: i64, hi: i64) -> BasicMap {
        let mut s = BasicMap::universe(Space::set(Tuple::named(name, vec!["i".into()]), vec![]));
        s.add_constraint(Constraint::lower_bound(0, lo, 1, 0));
        s.add_constraint(Constraint::upper_bound(0, hi - 1, 1, 0));
        s
    }

    #[test]
    fn test_union_subtract_by_tuple() {
        let a = UnionSet::from_pieces(vec![interval("S", 0, 10), interval("T", 0, 10)]);
        let b = UnionSet::from_basic(interval("S", 0, 5));
        let d = a.subtract(&b).unwrap();
        assert!(!d.contains_point("S", &[3], &[]));
        assert!(d.contains_point("S", &[7], &[]));
        assert!(d.contains_point("T", &[3], &[]));
    }

    #[test]
    fn test_intersect_only_matching_tuples() {
        let a = UnionSet::from_basic(interval("S", 0, 10));
        let b = UnionSet::from_basic(interval("T", 0, 10));
        assert!(a.intersect(&b).is_empty());
        assert!(!a.intersect(&a).is_empty());
    }

    #[test]
    fn test_display() {
        let a = UnionSet::from_pieces(vec![interval("S", 0, 2), interval("T", 1, 3)]);
        assert_eq!(a.to_string(), "{ S[i] : i >= 0 and 1 >= i; T[i] : i >= 1 and 2 >= i }");
        assert_eq!(UnionSet::empty().to_string(), "{  }");
    }
}

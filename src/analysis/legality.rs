//! Legality of schedules.
//!
//! Both checks project the computed dependences through the *current*
//! schedules, turning every dependence into a pair of time vectors, and are
//! recomputed from scratch on every call.

use log::debug;

use crate::ir::{CompId, Function};
use crate::polyhedral::{lex_ge, BasicMap, Constraint, Tuple, UnionMap};
use crate::utils::errors::PolyResult;

/// Schedules of `ids` as one union, `{ S[...] -> [time] }`.
fn schedules_of(f: &Function, ids: &[CompId]) -> UnionMap {
    UnionMap::from_pieces(ids.iter().map(|&id| f.comp(id).schedule.clone()).collect())
}

/// `{ time(src) -> time(dst) }` for every dependence between `ids`.
fn time_dependences(f: &Function, deps: &UnionMap, ids: &[CompId]) -> UnionMap {
    let sched = schedules_of(f, ids);
    sched.reverse().apply_range(deps).apply_range(&sched).simplify()
}

/// True if some pair in `piece` has different coordinates at `dim`.
fn differs_at(piece: &BasicMap, dim: usize) -> bool {
    let x = piece.var(dim);
    let y = piece.var(piece.out_col(dim));
    let lt = piece.clone().with_constraint(Constraint::lt(x.clone(), y.clone()));
    let gt = piece.clone().with_constraint(Constraint::lt(y, x));
    !lt.is_empty() || !gt.is_empty()
}

impl Function {
    /// Order and align every schedule, as legality checks require.
    pub fn prepare_schedules_for_legality_checks(&mut self) -> PolyResult<()> {
        self.gen_ordering_schedules()?;
        self.align_schedules();
        Ok(())
    }

    /// Can loop `level` run in parallel for the fused computations `comps`?
    ///
    /// Dependences among `comps` are mapped to time. Each dimension before
    /// the loop is equated in turn; once no pair is left, every dependence is
    /// carried by an outer loop and the loop is parallel. Otherwise the loop
    /// is parallel only if every remaining pair has the same coordinate at
    /// the loop.
    pub fn is_parallel_legal(&mut self, level: usize, comps: &[CompId]) -> PolyResult<bool> {
        self.require_dependences()?;
        for &id in comps {
            self.check_level(id, level)?;
        }
        self.prepare_schedules_for_legality_checks()?;
        let deps = self.require_dependences()?.all();
        let time = time_dependences(self, &deps, comps);
        debug!("time dependences among {} computation(s): {}", comps.len(), time);
        if time.is_empty() {
            return Ok(true);
        }

        let par_dim = 2 * level + 1;
        let mut pieces: Vec<BasicMap> = time.pieces;
        for d in 0..par_dim {
            pieces = pieces.iter().map(|p| p.equate(d, d)).filter(|p| !p.is_empty()).collect();
            if pieces.is_empty() {
                debug!("every dependence is carried before dimension {}, level {} is parallel", d + 1, level);
                return Ok(true);
            }
        }
        let equated_empty = pieces.iter().all(|p| p.equate(par_dim, par_dim).is_empty());
        let carried = pieces.iter().any(|p| differs_at(p, par_dim));
        let legal = !equated_empty && !carried;
        debug!("level {} is {}", level, if legal { "parallel" } else { "not parallel" });
        Ok(legal)
    }

    /// [`is_parallel_legal`](Self::is_parallel_legal) with the loop named
    /// after a dynamic dimension of the first computation.
    pub fn is_parallel_legal_named(&mut self, name: &str, comps: &[CompId]) -> PolyResult<bool> {
        let Some(&first) = comps.first() else { return Ok(true) };
        let level = self.level_of(first, name)?;
        self.is_parallel_legal(level, comps)
    }

    /// Does every dependence still go forward in time under the current
    /// schedules?
    pub fn check_legality_for_function(&mut self) -> PolyResult<bool> {
        self.require_dependences()?;
        self.prepare_schedules_for_legality_checks()?;
        let deps = self.require_dependences()?.all();
        let ids = self.scheduled();
        let time = time_dependences(self, &deps, &ids);
        let Some(n) = time.pieces.first().map(BasicMap::n_out) else {
            return Ok(true);
        };
        let t = Tuple::anonymous_n("t", n);
        let backward = time.intersect(&lex_ge(&t, &t, &self.params()));
        if backward.is_empty() {
            Ok(true)
        } else {
            debug!("dependences violated by the current schedules: {}", backward);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgumentRole, Expr, PrimType};
    use crate::transform::Level;
    use crate::utils::errors::{AnalysisErrorKind, PolyError};

    fn recurrence() -> (Function, CompId) {
        let mut f = Function::new("recurrence");
        f.buffer("bA", vec![Expr::int(16), Expr::int(16)], PrimType::Int32, ArgumentRole::Output);
        let a = f
            .computation(
                "A",
                "{ A[i, j] : 1 <= i < 16 and 0 <= j < 16 }",
                Expr::access("A", vec![Expr::var("i") - 1, Expr::var("j")]) + 1,
                PrimType::Int32,
            )
            .unwrap();
        f.store_in(a, "bA").unwrap();
        (f, a)
    }

    #[test]
    fn test_carried_dependence() {
        let (mut f, a) = recurrence();
        f.compute_dependences().unwrap();
        assert!(!f.is_parallel_legal(0, &[a]).unwrap());
        assert!(f.is_parallel_legal(1, &[a]).unwrap());
        assert!(f.is_parallel_legal_named("j", &[a]).unwrap());
        assert!(f.check_legality_for_function().unwrap());
    }

    #[test]
    fn test_interchange_keeps_inner_parallel() {
        let (mut f, a) = recurrence();
        f.compute_dependences().unwrap();
        f.interchange(a, 0, 1).unwrap();
        assert!(f.is_parallel_legal(0, &[a]).unwrap());
        assert!(!f.is_parallel_legal(1, &[a]).unwrap());
        assert!(f.check_legality_for_function().unwrap());
    }

    #[test]
    fn test_reversal_is_illegal() {
        let (mut f, a) = recurrence();
        f.compute_dependences().unwrap();
        f.reverse(a, 0).unwrap();
        assert!(!f.check_legality_for_function().unwrap());
    }

    #[test]
    fn test_independent_computations() {
        let mut f = Function::new("independent");
        f.buffer("b0", vec![Expr::int(8)], PrimType::Int32, ArgumentRole::Output);
        f.buffer("b1", vec![Expr::int(8)], PrimType::Int32, ArgumentRole::Output);
        let s0 = f.computation("S0", "{ S0[i] : 0 <= i < 8 }", Expr::int(0), PrimType::Int32).unwrap();
        let s1 = f.computation("S1", "{ S1[i] : 0 <= i < 8 }", Expr::int(1), PrimType::Int32).unwrap();
        f.store_in(s0, "b0").unwrap();
        f.store_in(s1, "b1").unwrap();
        f.then(s0, s1, Level::Loop(0)).unwrap();
        f.compute_dependences().unwrap();
        assert!(f.is_parallel_legal(0, &[s0, s1]).unwrap());
        let first = f.is_parallel_legal(0, &[s0, s1]).unwrap();
        let second = f.is_parallel_legal(0, &[s0, s1]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_requires_dependences() {
        let (mut f, a) = recurrence();
        match f.is_parallel_legal(0, &[a]).unwrap_err() {
            PolyError::Analysis(e) => assert_eq!(e.kind, AnalysisErrorKind::DependencesNotComputed),
            other => panic!("unexpected error {other}"),
        }
        f.compute_dependences().unwrap();
        assert!(f.is_parallel_legal(2, &[a]).is_err());
    }
}

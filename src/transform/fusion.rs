//! Loop fusion and fusion repair by shifting.
//!
//! Fusing two computations at a loop level is an ordering edge. When the
//! fused schedule breaks a dependence, shifting the later computation along
//! some of the shared loops can make it legal again;
//! [`Function::fuse_repair_shifting`] searches for such shifts.

use log::{debug, info};

use crate::ir::{CompId, Function};
use crate::transform::{Level, Transform};
use crate::utils::errors::PolyResult;

/// Loop fusion transformation.
#[derive(Debug, Clone)]
pub struct Fusion {
    /// Computation that runs first
    pub previous: CompId,
    /// Computation fused after it
    pub current: CompId,
    /// Innermost shared loop level
    pub level: usize,
    /// Shift `current` to restore legality when the fusion breaks a dependence
    pub repair: bool,
}

impl Fusion {
    /// Fuse `current` after `previous` up to `level`.
    pub fn new(previous: CompId, current: CompId, level: usize) -> Self {
        Self { previous, current, level, repair: false }
    }

    /// Also search for repairing shifts when applied.
    pub fn with_repair(mut self) -> Self {
        self.repair = true;
        self
    }
}

impl Transform for Fusion {
    fn apply(&self, f: &mut Function) -> PolyResult<()> {
        f.after(self.current, self.previous, Level::Loop(self.level))?;
        if !self.repair || f.dependences().is_none() {
            return Ok(());
        }
        let levels: Vec<usize> = (0..=self.level).collect();
        let bound = f.config().fuse_repair_bound;
        if let Some(shifts) = f.fuse_repair_shifting(self.previous, self.current, &levels, bound)? {
            for (level, amount) in shifts {
                if amount != 0 {
                    f.shift(self.current, level, amount)?;
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fusion"
    }
}

/// Integer vectors of length `n` with `sum |x_k| == total`, small
/// magnitudes and positive values first.
fn shift_vectors(n: usize, total: i64) -> Vec<Vec<i64>> {
    if n == 0 {
        return if total == 0 { vec![Vec::new()] } else { Vec::new() };
    }
    let mut out = Vec::new();
    for a in 0..=total {
        let firsts: &[i64] = if a == 0 { &[0] } else { &[a, -a] };
        for &first in firsts {
            for mut rest in shift_vectors(n - 1, total - a) {
                rest.insert(0, first);
                out.push(rest);
            }
        }
    }
    out
}

impl Function {
    /// Find shifts of `current` along `levels` that make the function legal
    /// after `current` was fused with `previous`. Candidates are tried by
    /// increasing total shift up to `bound`; the first legal one is returned
    /// as `(level, amount)` pairs without being applied. `None` means no
    /// candidate within the bound is legal. Dependences must be computed.
    pub fn fuse_repair_shifting(
        &mut self,
        previous: CompId,
        current: CompId,
        levels: &[usize],
        bound: i64,
    ) -> PolyResult<Option<Vec<(usize, i64)>>> {
        for &l in levels {
            self.check_level(previous, l)?;
            self.check_level(current, l)?;
        }
        for total in 0..=bound.max(0) {
            for shifts in shift_vectors(levels.len(), total) {
                let mut trial = self.clone();
                for (&level, &amount) in levels.iter().zip(&shifts) {
                    if amount != 0 {
                        trial.shift(current, level, amount)?;
                    }
                }
                if trial.check_legality_for_function()? {
                    let pairs: Vec<(usize, i64)> = levels.iter().copied().zip(shifts).collect();
                    info!("fusion of {} repaired with shifts {:?}", self.comp(current).name, pairs);
                    return Ok(Some(pairs));
                }
                debug!("shifts {:?} do not repair the fusion", shifts);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgumentRole, Expr, PrimType};

    fn producer_consumer() -> (Function, CompId, CompId) {
        let mut f = Function::new("fusion");
        f.buffer("bA", vec![Expr::int(11)], PrimType::Int32, ArgumentRole::Input);
        f.buffer("bP", vec![Expr::int(11)], PrimType::Int32, ArgumentRole::Temporary);
        f.buffer("bC", vec![Expr::int(10)], PrimType::Int32, ArgumentRole::Output);
        let a = f.input("A", "{ A[i] : 0 <= i < 11 }", PrimType::Int32).unwrap();
        let p = f
            .computation("P", "{ P[i] : 0 <= i < 11 }", Expr::access("A", vec![Expr::var("i")]), PrimType::Int32)
            .unwrap();
        let c = f
            .computation(
                "C",
                "{ C[i] : 0 <= i < 10 }",
                Expr::access("P", vec![Expr::var("i") + Expr::int(1)]),
                PrimType::Int32,
            )
            .unwrap();
        f.store_in(a, "bA").unwrap();
        f.store_in(p, "bP").unwrap();
        f.store_in(c, "bC").unwrap();
        f.after(c, p, Level::Root).unwrap();
        (f, p, c)
    }

    #[test]
    fn test_shift_vectors() {
        assert_eq!(shift_vectors(1, 0), vec![vec![0]]);
        assert_eq!(shift_vectors(1, 2), vec![vec![2], vec![-2]]);
        assert_eq!(shift_vectors(2, 1), vec![vec![0, 1], vec![0, -1], vec![1, 0], vec![-1, 0]]);
    }

    #[test]
    fn test_fuse_repair_finds_shift() {
        let (mut f, p, c) = producer_consumer();
        f.compute_dependences().unwrap();
        f.after(c, p, Level::Loop(0)).unwrap();
        assert!(!f.check_legality_for_function().unwrap());
        assert_eq!(f.fuse_repair_shifting(p, c, &[0], 0).unwrap(), None);
        assert_eq!(f.fuse_repair_shifting(p, c, &[0], 2).unwrap(), Some(vec![(0, 1)]));
    }

    #[test]
    fn test_fusion_transform_repairs() {
        let (mut f, p, c) = producer_consumer();
        f.compute_dependences().unwrap();
        let fusion = Fusion::new(p, c, 0);
        assert!(!fusion.is_legal(&f).unwrap());
        fusion.with_repair().apply(&mut f).unwrap();
        assert!(f.check_legality_for_function().unwrap());
    }
}

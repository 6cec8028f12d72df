//! Loop interchange transformation.
//!
//! Interchange swaps two loops in a loop nest, which can improve
//! memory access patterns or expose parallelism.
//!
//! Example:
//! ```text
//! for i = 0 to N:
//!   for j = 0 to M:
//!     A[i][j] = B[j][i]
//! ```
//! becomes (after interchange(0, 1)):
//! ```text
//! for j = 0 to M:
//!   for i = 0 to N:
//!     A[i][j] = B[j][i]
//! ```

use log::debug;

use crate::ir::{CompId, Function};
use crate::transform::{keep_dim, time_map, Transform};
use crate::utils::errors::PolyResult;

/// Loop interchange transformation.
#[derive(Debug, Clone)]
pub struct Interchange {
    /// Computation whose loops are swapped
    pub comp: CompId,
    /// First loop level
    pub l0: usize,
    /// Second loop level
    pub l1: usize,
}

impl Interchange {
    /// Create a new interchange transformation.
    pub fn new(comp: CompId, l0: usize, l1: usize) -> Self {
        Self { comp, l0, l1 }
    }
}

impl Transform for Interchange {
    fn apply(&self, f: &mut Function) -> PolyResult<()> {
        f.interchange(self.comp, self.l0, self.l1)
    }

    fn name(&self) -> &str {
        "interchange"
    }
}

impl Function {
    /// Swap loop levels `l0` and `l1` of `id`, names included.
    pub fn interchange(&mut self, id: CompId, l0: usize, l1: usize) -> PolyResult<()> {
        self.check_level(id, l0)?;
        self.check_level(id, l1)?;
        if l0 == l1 {
            return Ok(());
        }
        let sched = &self.comp(id).schedule;
        let (d0, d1) = (2 * l0 + 1, 2 * l1 + 1);
        let mut names = sched.space.output.dims.clone();
        names.swap(d0, d1);
        let mut t = time_map(sched, names);
        for p in 0..sched.n_out() {
            let q = if p == d0 {
                d1
            } else if p == d1 {
                d0
            } else {
                p
            };
            keep_dim(&mut t, p, q);
        }
        debug!("interchange {} levels {} and {}", self.comp(id).name, l0, l1);
        self.transform_schedule(id, &t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, PrimType};

    #[test]
    fn test_interchange() {
        let mut f = Function::new("interchange");
        let s = f
            .computation("S", "[N, M] -> { S[i, j] : 0 <= i < N and 0 <= j < M }", Expr::int(0), PrimType::Int32)
            .unwrap();
        Interchange::new(s, 0, 1).apply(&mut f).unwrap();
        let c = f.comp(s);
        assert_eq!(c.loop_level_names(), vec!["j", "i"]);
        assert!(c.schedule.contains_point(&[1, 7, 0, 7, 0, 1, 0], &[4, 8]));
        assert!(f.interchange(s, 0, 2).is_err());
    }
}

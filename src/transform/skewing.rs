//! Loop skewing, shifting and reversal.
//!
//! All three rewrite a single dynamic dimension of a schedule and leave the
//! static dimensions alone. Loop level `l` is schedule dimension `2l + 1`:
//!
//! - `skew(outer, inner, f)` maps `c_inner` to `c_inner + f * c_outer`;
//! - `shift(level, k)` maps `c_level` to `c_level + k`;
//! - `reverse(level)` maps `c_level` to `-c_level`.
//!
//! For `S[t, i] -> [0, t, 0, i, 0]`, skewing level 1 by level 0 gives
//! `S[t, i] -> [0, t, 0, i + t, 0]`. None of them check dependences;
//! callers run [`Function::check_legality_for_function`] afterwards.

use log::debug;

use crate::ir::{CompId, Function};
use crate::polyhedral::{BasicMap, Constraint};
use crate::transform::{keep_dim, time_map, Transform};
use crate::utils::errors::{PolyResult, ScheduleError, ScheduleErrorKind};

/// Loop skewing transformation.
#[derive(Debug, Clone)]
pub struct Skewing {
    /// Computation to skew
    pub comp: CompId,
    /// Source level to skew by
    pub outer: usize,
    /// Target level (`inner' = inner + factor * outer`)
    pub inner: usize,
    /// Skewing factor
    pub factor: i64,
}

impl Skewing {
    /// Create a new skewing transformation.
    pub fn new(comp: CompId, outer: usize, inner: usize, factor: i64) -> Self {
        Self { comp, outer, inner, factor }
    }

    /// Skewing for wavefront parallelization: `j' = j + i`.
    pub fn wavefront(comp: CompId, outer: usize) -> Self {
        Self::new(comp, outer, outer + 1, 1)
    }
}

impl Transform for Skewing {
    fn apply(&self, f: &mut Function) -> PolyResult<()> {
        f.skew(self.comp, self.outer, self.inner, self.factor)
    }

    fn name(&self) -> &str {
        "skewing"
    }
}

/// Loop shifting transformation.
#[derive(Debug, Clone)]
pub struct Shifting {
    /// Computation to shift
    pub comp: CompId,
    /// Shifted level
    pub level: usize,
    /// Amount added to the loop iterator
    pub amount: i64,
}

impl Shifting {
    /// Create a new shifting transformation.
    pub fn new(comp: CompId, level: usize, amount: i64) -> Self {
        Self { comp, level, amount }
    }
}

impl Transform for Shifting {
    fn apply(&self, f: &mut Function) -> PolyResult<()> {
        f.shift(self.comp, self.level, self.amount)
    }

    fn name(&self) -> &str {
        "shifting"
    }
}

/// Loop reversal transformation.
#[derive(Debug, Clone)]
pub struct Reversal {
    /// Computation to reverse
    pub comp: CompId,
    /// Reversed level
    pub level: usize,
}

impl Reversal {
    /// Create a new reversal transformation.
    pub fn new(comp: CompId, level: usize) -> Self {
        Self { comp, level }
    }
}

impl Transform for Reversal {
    fn apply(&self, f: &mut Function) -> PolyResult<()> {
        f.reverse(self.comp, self.level)
    }

    fn name(&self) -> &str {
        "reversal"
    }
}

impl Function {
    /// Time map of `id` that keeps every dimension except `d`.
    fn map_all_but(&self, id: CompId, d: usize) -> BasicMap {
        let sched = &self.comp(id).schedule;
        let mut t = time_map(sched, sched.space.output.dims.clone());
        for p in (0..sched.n_out()).filter(|&p| p != d) {
            keep_dim(&mut t, p, p);
        }
        t
    }

    /// Replace loop `inner` of `id` by `inner + factor * outer`.
    pub fn skew(&mut self, id: CompId, outer: usize, inner: usize, factor: i64) -> PolyResult<()> {
        self.check_level(id, outer)?;
        self.check_level(id, inner)?;
        if outer >= inner {
            return Err(ScheduleError::new(
                ScheduleErrorKind::UnknownDimension,
                format!("skewed level {} must be inside level {}", inner, outer),
            )
            .for_computation(self.comp(id).name.as_str())
            .into());
        }
        let (d0, d1) = (2 * outer + 1, 2 * inner + 1);
        let mut t = self.map_all_but(id, d1);
        let c = Constraint::eq(t.var(t.out_col(d1)), t.var(d1) + t.var(d0).scale(factor));
        t.add_constraint(c);
        debug!("skew {} level {} by {} x level {}", self.comp(id).name, inner, factor, outer);
        self.transform_schedule(id, &t)
    }

    /// Add `amount` to loop `level` of `id`.
    pub fn shift(&mut self, id: CompId, level: usize, amount: i64) -> PolyResult<()> {
        self.check_level(id, level)?;
        let d = 2 * level + 1;
        let mut t = self.map_all_but(id, d);
        let c = Constraint::eq(t.var(t.out_col(d)), t.var(d) + t.constant(amount));
        t.add_constraint(c);
        debug!("shift {} level {} by {}", self.comp(id).name, level, amount);
        self.transform_schedule(id, &t)
    }

    /// Run loop `level` of `id` backwards.
    pub fn reverse(&mut self, id: CompId, level: usize) -> PolyResult<()> {
        self.check_level(id, level)?;
        let d = 2 * level + 1;
        let mut t = self.map_all_but(id, d);
        let c = Constraint::eq(t.var(t.out_col(d)), -t.var(d));
        t.add_constraint(c);
        debug!("reverse {} level {}", self.comp(id).name, level);
        self.transform_schedule(id, &t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, PrimType};

    fn function() -> (Function, CompId) {
        let mut f = Function::new("skewing");
        let s = f
            .computation("S", "{ S[i, j] : 0 <= i < 10 and 0 <= j < 10 }", Expr::int(0), PrimType::Int32)
            .unwrap();
        (f, s)
    }

    #[test]
    fn test_skew() {
        let (mut f, s) = function();
        Skewing::wavefront(s, 0).apply(&mut f).unwrap();
        assert!(f.comp(s).schedule.contains_point(&[2, 3, 0, 2, 0, 5, 0], &[]));
        assert!(!f.comp(s).schedule.contains_point(&[2, 3, 0, 2, 0, 3, 0], &[]));
        assert!(f.skew(s, 1, 0, 1).is_err());
    }

    #[test]
    fn test_shift_and_reverse() {
        let (mut f, s) = function();
        f.shift(s, 1, 3).unwrap();
        assert!(f.comp(s).schedule.contains_point(&[2, 3, 0, 2, 0, 6, 0], &[]));
        f.reverse(s, 0).unwrap();
        assert!(f.comp(s).schedule.contains_point(&[2, 3, 0, -2, 0, 6, 0], &[]));
        assert_eq!(f.comp(s).loop_level_names(), vec!["i", "j"]);
    }
}

//! Loop splitting and tiling.
//!
//! Splitting replaces one dynamic dimension `i` by an outer and an inner
//! dimension with `i = size * i0 + i1` and `0 <= i1 < size`. Tiling is two or
//! three splits followed by interchanges that move the tile loops outward.
//!
//! Example (tile of `i` and `j` by 32):
//! ```text
//! for i = 0 to N:
//!   for j = 0 to M:
//!     A[i][j] = ...
//! ```
//! becomes:
//! ```text
//! for i0 = 0 to N / 32:
//!   for j0 = 0 to M / 32:
//!     for i1 = 0 to 32:
//!       for j1 = 0 to 32:
//!         A[32 * i0 + i1][32 * j0 + j1] = ...
//! ```

use log::debug;

use crate::ir::{CompId, Function};
use crate::polyhedral::Constraint;
use crate::transform::{keep_dim, time_map, Transform};
use crate::utils::errors::{PolyResult, ScheduleError, ScheduleErrorKind};

/// Loop tiling transformation.
#[derive(Debug, Clone)]
pub struct Tiling {
    /// Computation to tile
    pub comp: CompId,
    /// Consecutive loop levels, outermost first (1 to 3 of them)
    pub levels: Vec<usize>,
    /// Tile size for each level
    pub sizes: Vec<i64>,
}

impl Tiling {
    /// Create a new tiling transformation.
    pub fn new(comp: CompId, levels: Vec<usize>, sizes: Vec<i64>) -> Self {
        Self { comp, levels, sizes }
    }

    /// Square 2-D tiling of levels `l0` and `l0 + 1`.
    pub fn square(comp: CompId, l0: usize, size: i64) -> Self {
        Self::new(comp, vec![l0, l0 + 1], vec![size, size])
    }
}

impl Transform for Tiling {
    fn apply(&self, f: &mut Function) -> PolyResult<()> {
        match (self.levels.as_slice(), self.sizes.as_slice()) {
            ([l0], [s0]) => f.split(self.comp, *l0, *s0),
            ([l0, l1], [s0, s1]) => f.tile(self.comp, *l0, *l1, *s0, *s1),
            ([l0, l1, l2], [s0, s1, s2]) => f.tile3(self.comp, *l0, *l1, *l2, *s0, *s1, *s2),
            _ => Err(ScheduleError::new(
                ScheduleErrorKind::InvalidSize,
                format!("cannot tile {} levels with {} sizes", self.levels.len(), self.sizes.len()),
            )
            .into()),
        }
    }

    fn name(&self) -> &str {
        "tiling"
    }
}

impl Function {
    fn check_size(&self, id: CompId, size: i64) -> PolyResult<()> {
        if size <= 0 {
            return Err(ScheduleError::new(
                ScheduleErrorKind::InvalidSize,
                format!("split size must be positive, got {}", size),
            )
            .for_computation(self.comp(id).name.as_str())
            .into());
        }
        Ok(())
    }

    fn check_consecutive(&self, id: CompId, levels: &[usize]) -> PolyResult<()> {
        for &l in levels {
            self.check_level(id, l)?;
        }
        if levels.windows(2).any(|w| w[1] != w[0] + 1) {
            return Err(ScheduleError::new(
                ScheduleErrorKind::UnknownDimension,
                format!("tiled levels {:?} are not consecutive", levels),
            )
            .for_computation(self.comp(id).name.as_str())
            .into());
        }
        Ok(())
    }

    /// Split loop `level` of `id` into an outer loop `<name>0` and an inner
    /// loop `<name>1` of `size` iterations. Later levels shift by one.
    pub fn split(&mut self, id: CompId, level: usize, size: i64) -> PolyResult<()> {
        self.check_level(id, level)?;
        self.check_size(id, size)?;
        let sched = &self.comp(id).schedule;
        let n = sched.n_out();
        let d = 2 * level + 1;
        let name = sched.space.output.dims[d].clone();
        let mut names = sched.space.output.dims.clone();
        names.splice(d..=d, [format!("{}0", name), String::new(), format!("{}1", name)]);

        let mut t = time_map(sched, names);
        for p in (0..n).filter(|&p| p != d) {
            keep_dim(&mut t, p, if p < d { p } else { p + 2 });
        }
        let outer = t.var(t.out_col(d));
        let inner = t.var(t.out_col(d + 2));
        let c = Constraint::eq(t.var(d), outer.scale(size) + inner.clone());
        t.add_constraint(c);
        let c = Constraint::ge(inner.clone(), t.constant(0));
        t.add_constraint(c);
        let c = Constraint::lt(inner, t.constant(size));
        t.add_constraint(c);
        let t = t.fix_out(d + 1, 0);

        debug!("split {} level {} by {}", self.comp(id).name, level, size);
        self.transform_schedule(id, &t)
    }

    /// Tile levels `l0` and `l1 = l0 + 1` by `s0 x s1`. The resulting loop
    /// order is `l0 outer, l1 outer, l0 inner, l1 inner`.
    pub fn tile(&mut self, id: CompId, l0: usize, l1: usize, s0: i64, s1: i64) -> PolyResult<()> {
        self.check_consecutive(id, &[l0, l1])?;
        self.check_size(id, s0)?;
        self.check_size(id, s1)?;
        self.split(id, l1, s1)?;
        self.split(id, l0, s0)?;
        self.interchange(id, l0 + 1, l0 + 2)
    }

    /// Tile three consecutive levels. The three tile loops end up outermost,
    /// followed by the three point loops.
    #[allow(clippy::too_many_arguments)]
    pub fn tile3(&mut self, id: CompId, l0: usize, l1: usize, l2: usize, s0: i64, s1: i64, s2: i64) -> PolyResult<()> {
        self.check_consecutive(id, &[l0, l1, l2])?;
        for s in [s0, s1, s2] {
            self.check_size(id, s)?;
        }
        self.split(id, l2, s2)?;
        self.split(id, l1, s1)?;
        self.split(id, l0, s0)?;
        self.interchange(id, l0 + 1, l0 + 2)?;
        self.interchange(id, l0 + 3, l0 + 4)?;
        self.interchange(id, l0 + 2, l0 + 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, PrimType};
    use crate::utils::errors::PolyError;

    fn function(domain: &str) -> (Function, CompId) {
        let mut f = Function::new("tiling");
        let id = f.computation("S", domain, Expr::int(0), PrimType::Int32).unwrap();
        (f, id)
    }

    #[test]
    fn test_split() {
        let (mut f, s) = function("{ S[i] : 0 <= i < 10 }");
        f.split(s, 0, 4).unwrap();
        let c = f.comp(s);
        assert_eq!(c.schedule.n_out(), 5);
        assert_eq!(c.loop_level_names(), vec!["i0", "i1"]);
        assert!(c.schedule.contains_point(&[5, 0, 1, 0, 1, 0], &[]));
        assert!(!c.schedule.contains_point(&[5, 0, 0, 0, 5, 0], &[]));
    }

    #[test]
    fn test_tile() {
        let (mut f, s) = function("[N] -> { S[i, j] : 0 <= i < N and 0 <= j < N }");
        f.tile(s, 0, 1, 4, 4).unwrap();
        let c = f.comp(s);
        assert_eq!(c.loop_level_names(), vec!["i0", "j0", "i1", "j1"]);
        assert!(c.schedule.contains_point(&[5, 6, 0, 1, 0, 1, 0, 1, 0, 2, 0], &[10]));
    }

    #[test]
    fn test_tile3_order() {
        let (mut f, s) = function("{ S[i, j, k] : 0 <= i < 8 and 0 <= j < 8 and 0 <= k < 8 }");
        Tiling::new(s, vec![0, 1, 2], vec![2, 2, 2]).apply(&mut f).unwrap();
        assert_eq!(f.comp(s).loop_level_names(), vec!["i0", "j0", "k0", "i1", "j1", "k1"]);
    }

    #[test]
    fn test_invalid_arguments() {
        let (mut f, s) = function("{ S[i, j] : 0 <= i < 8 and 0 <= j < 8 }");
        let err = f.split(s, 0, 0).unwrap_err();
        assert!(matches!(err, PolyError::Schedule(ScheduleError { kind: ScheduleErrorKind::InvalidSize, .. })));
        let err = f.split(s, 2, 4).unwrap_err();
        assert!(matches!(err, PolyError::Schedule(ScheduleError { kind: ScheduleErrorKind::UnknownDimension, .. })));
        assert!(f.tile(s, 1, 0, 2, 2).is_err());
        assert_eq!(f.comp(s).n_loop_levels(), 2);
    }
}

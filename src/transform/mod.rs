//! Schedule transformations.
//!
//! Geometric transformations (split, tile, interchange, skew, shift,
//! reverse) rewrite the schedule of one computation by composing it with an
//! affine map from its current time space to a new one. Ordering between
//! computations and loop tags live in [`ordering`] and [`tags`].

pub mod ordering;
pub mod tags;
pub mod tiling;
pub mod interchange;
pub mod skewing;
pub mod fusion;

pub use ordering::{Level, SchedGraph};
pub use tags::{LoopTag, TagTable};
pub use tiling::Tiling;
pub use interchange::Interchange;
pub use skewing::{Reversal, Shifting, Skewing};
pub use fusion::Fusion;

use log::debug;

use crate::ir::computation::static_dim_name;
use crate::ir::{CompId, Function};
use crate::polyhedral::{BasicMap, Constraint, Space, Tuple};
use crate::utils::errors::{PolyError, PolyResult};

/// Transformation pass trait.
pub trait Transform {
    /// Apply the transformation.
    fn apply(&self, f: &mut Function) -> PolyResult<()>;

    /// Check whether the transformed function still respects every
    /// dependence. Dependences must have been computed on `f`.
    fn is_legal(&self, f: &Function) -> PolyResult<bool> {
        let mut trial = f.clone();
        self.apply(&mut trial)?;
        trial.check_legality_for_function()
    }

    /// Get transformation name.
    fn name(&self) -> &str;
}

/// Unconstrained map from the time space of `sched` to a time space with
/// dimensions `out_dims`. Even positions are renamed as static dimensions.
pub(crate) fn time_map(sched: &BasicMap, mut out_dims: Vec<String>) -> BasicMap {
    for (p, name) in out_dims.iter_mut().enumerate().step_by(2) {
        *name = static_dim_name(p / 2);
    }
    let space = Space::map(
        sched.space.output.clone(),
        Tuple::anonymous(out_dims),
        sched.space.params.clone(),
    );
    BasicMap::universe(space)
}

/// Add `out_q = in_p` to a time map.
pub(crate) fn keep_dim(map: &mut BasicMap, p: usize, q: usize) {
    let c = Constraint::eq(map.var(map.out_col(q)), map.var(p));
    map.add_constraint(c);
}

impl Function {
    /// Compose the schedule of `id` with a time-to-time map.
    pub(crate) fn transform_schedule(&mut self, id: CompId, map: &BasicMap) -> PolyResult<()> {
        let comp = self.comp_mut(id);
        let composed = comp.schedule.apply_range(map).ok_or_else(|| {
            PolyError::Internal(format!("time map does not match the schedule of {}", comp.name))
        })?;
        comp.schedule = composed.without_locals().unwrap_or(composed);
        debug!("schedule of {} is now {}", comp.name, comp.schedule);
        Ok(())
    }
}

//! Loop tags.
//!
//! Tags say how a loop level of a computation should execute (parallel,
//! vector, unrolled, GPU, distributed). They are kept next to the schedules,
//! never inside them, and are read and consumed by lowering.

use log::debug;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

use crate::ir::{CompId, Function};
use crate::utils::errors::{PolyResult, ScheduleError, ScheduleErrorKind};

/// Execution tag of one loop level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopTag {
    /// Run iterations on parallel threads
    Parallel,
    /// Map iterations to vector lanes
    Vector(u32),
    /// Unroll by a factor
    Unroll(u32),
    /// GPU block axis (0 = x, 1 = y, 2 = z)
    GpuBlock(usize),
    /// GPU thread axis (0 = x, 1 = y, 2 = z)
    GpuThread(usize),
    /// Spread iterations over distributed nodes
    Distributed,
}

const AXES: [&str; 3] = ["x", "y", "z"];

/// Axis of the `k`-th listed GPU level: `z`, then `y`, then `x`.
fn gpu_axis(k: usize) -> usize {
    2 - k.min(2)
}

/// Tags keyed by computation name and loop level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagTable {
    tags: BTreeMap<(String, usize), Vec<LoopTag>>,
}

impl TagTable {
    /// Add a tag, replacing a tag of the same kind on the same loop.
    pub fn add(&mut self, comp: &str, level: usize, tag: LoopTag) {
        let entry = self.tags.entry((comp.to_string(), level)).or_default();
        entry.retain(|t| std::mem::discriminant(t) != std::mem::discriminant(&tag));
        entry.push(tag);
    }

    /// Tags of one loop.
    pub fn get(&self, comp: &str, level: usize) -> &[LoopTag] {
        self.tags.get(&(comp.to_string(), level)).map_or(&[], Vec::as_slice)
    }

    /// Remove and return the tags of one loop.
    pub fn take(&mut self, comp: &str, level: usize) -> Vec<LoopTag> {
        self.tags.remove(&(comp.to_string(), level)).unwrap_or_default()
    }

    /// Drop every tag.
    pub fn clear(&mut self) {
        self.tags.clear();
    }

    /// True if no tag is recorded.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// All tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, &LoopTag)> {
        self.tags
            .iter()
            .flat_map(|((c, l), tags)| tags.iter().map(move |t| (c.as_str(), *l, t)))
    }
}

/// Name bound to the hardware index of a GPU-mapped loop.
pub fn gpu_iterator_name(tag: LoopTag) -> Option<String> {
    match tag {
        LoopTag::GpuBlock(axis) => Some(format!("__block_id_{}", AXES[axis.min(2)])),
        LoopTag::GpuThread(axis) => Some(format!("__thread_id_{}", AXES[axis.min(2)])),
        _ => None,
    }
}

impl Function {
    /// Loop level of the dynamic dimension called `name`.
    pub fn level_of(&self, id: CompId, name: &str) -> PolyResult<usize> {
        let comp = self.comp(id);
        comp.loop_level_names().iter().position(|n| n == name).ok_or_else(|| {
            ScheduleError::new(ScheduleErrorKind::UnknownDimension, format!("no loop named `{}`", name))
                .for_computation(comp.name.as_str())
                .into()
        })
    }

    /// Fail with `UnknownDimension` unless `level` is a loop level of `id`.
    pub(crate) fn check_level(&self, id: CompId, level: usize) -> PolyResult<()> {
        let comp = self.comp(id);
        if level >= comp.n_loop_levels() {
            return Err(ScheduleError::new(
                ScheduleErrorKind::UnknownDimension,
                format!("no loop level {}, the computation has {}", level, comp.n_loop_levels()),
            )
            .for_computation(comp.name.as_str())
            .into());
        }
        Ok(())
    }

    fn tag(&mut self, id: CompId, level: usize, tag: LoopTag) -> PolyResult<()> {
        self.check_level(id, level)?;
        let name = self.comp(id).name.clone();
        debug!("tagging {} level {} as {:?}", name, level, tag);
        self.tags.add(&name, level, tag);
        Ok(())
    }

    /// Run loop `level` of `id` in parallel.
    pub fn parallelize(&mut self, id: CompId, level: usize) -> PolyResult<()> {
        self.tag(id, level, LoopTag::Parallel)
    }

    /// Vectorize loop `level` with `len` lanes. Unless disabled in the
    /// configuration, the loop is first split by `len` and the inner loop
    /// (level + 1) is the one tagged.
    pub fn vectorize(&mut self, id: CompId, level: usize, len: u32) -> PolyResult<()> {
        self.check_level(id, level)?;
        if len == 0 {
            return Err(ScheduleError::new(ScheduleErrorKind::InvalidSize, "vector length must be positive")
                .for_computation(self.comp(id).name.as_str())
                .into());
        }
        if self.config().vectorize_splits && self.loop_is_longer_than(id, level, len as i64) {
            self.split(id, level, len as i64)?;
            return self.tag(id, level + 1, LoopTag::Vector(len));
        }
        self.tag(id, level, LoopTag::Vector(len))
    }

    /// Unroll loop `level` by `factor`.
    pub fn unroll(&mut self, id: CompId, level: usize, factor: u32) -> PolyResult<()> {
        if factor == 0 {
            return Err(ScheduleError::new(ScheduleErrorKind::InvalidSize, "unroll factor must be positive")
                .for_computation(self.comp(id).name.as_str())
                .into());
        }
        self.tag(id, level, LoopTag::Unroll(factor))
    }

    /// Map up to three loop levels to GPU blocks, outermost listed first.
    pub fn gpu_block(&mut self, id: CompId, levels: &[usize]) -> PolyResult<()> {
        self.check_gpu_levels(id, levels)?;
        for (k, &l) in levels.iter().enumerate() {
            self.tag(id, l, LoopTag::GpuBlock(gpu_axis(k)))?;
        }
        Ok(())
    }

    /// Map up to three loop levels to GPU threads, outermost listed first.
    pub fn gpu_thread(&mut self, id: CompId, levels: &[usize]) -> PolyResult<()> {
        self.check_gpu_levels(id, levels)?;
        for (k, &l) in levels.iter().enumerate() {
            self.tag(id, l, LoopTag::GpuThread(gpu_axis(k)))?;
        }
        Ok(())
    }

    /// Map block levels and thread levels in one call.
    pub fn tag_gpu(&mut self, id: CompId, blocks: &[usize], threads: &[usize]) -> PolyResult<()> {
        self.gpu_block(id, blocks)?;
        self.gpu_thread(id, threads)
    }

    /// Distribute loop `level` across nodes.
    pub fn distribute(&mut self, id: CompId, level: usize) -> PolyResult<()> {
        self.tag(id, level, LoopTag::Distributed)
    }

    fn check_gpu_levels(&self, id: CompId, levels: &[usize]) -> PolyResult<()> {
        if levels.is_empty() || levels.len() > 3 {
            return Err(ScheduleError::new(
                ScheduleErrorKind::UnknownDimension,
                format!("GPU mapping takes one to three loop levels, got {}", levels.len()),
            )
            .for_computation(self.comp(id).name.as_str())
            .into());
        }
        Ok(())
    }

    /// True if loop `level` of the named computation is tagged parallel.
    pub fn should_parallelize(&self, comp: &str, level: usize) -> bool {
        self.tags.get(comp, level).contains(&LoopTag::Parallel)
    }

    /// Vector width of loop `level`, if vectorized.
    pub fn vector_length(&self, comp: &str, level: usize) -> Option<u32> {
        self.tags.get(comp, level).iter().find_map(|t| match t {
            LoopTag::Vector(len) => Some(*len),
            _ => None,
        })
    }

    /// Unroll factor of loop `level`, if unrolled.
    pub fn unroll_factor(&self, comp: &str, level: usize) -> Option<u32> {
        self.tags.get(comp, level).iter().find_map(|t| match t {
            LoopTag::Unroll(f) => Some(*f),
            _ => None,
        })
    }

    /// Hardware block index name of loop `level`, if mapped to GPU blocks.
    pub fn gpu_block_iterator(&self, comp: &str, level: usize) -> Option<String> {
        self.tags
            .get(comp, level)
            .iter()
            .find(|t| matches!(t, LoopTag::GpuBlock(_)))
            .and_then(|t| gpu_iterator_name(*t))
    }

    /// Hardware thread index name of loop `level`, if mapped to GPU threads.
    pub fn gpu_thread_iterator(&self, comp: &str, level: usize) -> Option<String> {
        self.tags
            .get(comp, level)
            .iter()
            .find(|t| matches!(t, LoopTag::GpuThread(_)))
            .and_then(|t| gpu_iterator_name(*t))
    }

    /// True if loop `level` of the named computation is distributed.
    pub fn should_distribute(&self, comp: &str, level: usize) -> bool {
        self.tags.get(comp, level).contains(&LoopTag::Distributed)
    }

    /// All recorded tags.
    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    /// True when the loop may run more than `len` iterations (or its trip
    /// count is unknown).
    fn loop_is_longer_than(&self, id: CompId, level: usize, len: i64) -> bool {
        let Ok(tp) = self.comp_time_processor_domain(id) else { return true };
        let dim = 2 * level + 1;
        let others: Vec<usize> = (0..tp.n_out()).filter(|&d| d != dim).collect();
        let single = tp.project_out_outputs(&others).drop_locals_approx();
        let bounds = crate::polyhedral::dim_bounds(&single, single.out_col(0));
        let lo = bounds.lower.iter().filter_map(|b| b.expr.as_constant().map(|c| crate::polyhedral::ceil_div(c, b.div))).max();
        let hi = bounds.upper.iter().filter_map(|b| b.expr.as_constant().map(|c| crate::polyhedral::floor_div(c, b.div))).min();
        match (lo, hi) {
            (Some(lo), Some(hi)) => hi - lo + 1 > len,
            _ => true,
        }
    }
}

//! Ordering of computations.
//!
//! `after`/`before`/`then` record edges of the schedule graph: "run `b`
//! after `a`, fused with it up to a loop level". When the graph is a tree,
//! [`Function::gen_ordering_schedules`] turns the edges into values of the
//! static schedule dimensions. Users may instead set static dimensions
//! directly (low-level mode), which disables the automatic pass.

use log::{debug, info};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet, VecDeque};
use std::fmt;

use crate::ir::computation::static_dim_name;
use crate::ir::{CompId, Function};
use crate::polyhedral::BasicMap;
use crate::utils::errors::{PolyResult, ScheduleError, ScheduleErrorKind};

/// Nesting level an ordering edge fuses at.
///
/// `Root` orders two computations in separate outermost loop nests;
/// `Loop(l)` shares loops `0..=l` and orders inside loop `l`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    /// Outside every loop
    Root,
    /// Inside loop level `l` (dynamic schedule dimension `2l + 1`)
    Loop(usize),
}

impl Level {
    /// Index of the first static dimension that differs between the two
    /// ordered computations.
    pub fn static_index(self) -> usize {
        match self {
            Level::Root => 0,
            Level::Loop(l) => l + 1,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Root => write!(f, "root"),
            Level::Loop(l) => write!(f, "L{}", l),
        }
    }
}

/// Directed "after" edges between computations.
#[derive(Debug, Clone, Default)]
pub struct SchedGraph {
    edges: BTreeMap<CompId, Vec<(CompId, Level)>>,
    starting: BTreeSet<CompId>,
    low_level: bool,
}

impl SchedGraph {
    /// Register a schedulable computation (a root until ordered).
    pub fn add_node(&mut self, id: CompId) {
        self.starting.insert(id);
    }

    /// Forget a computation and every edge touching it.
    pub fn remove_node(&mut self, id: CompId) {
        self.starting.remove(&id);
        self.edges.remove(&id);
        for succ in self.edges.values_mut() {
            succ.retain(|(to, _)| *to != id);
        }
    }

    /// Order `to` after `from` at `level`, replacing any earlier predecessor
    /// of `to`.
    pub fn add_edge(&mut self, from: CompId, to: CompId, level: Level) {
        for succ in self.edges.values_mut() {
            succ.retain(|(t, _)| *t != to);
        }
        self.starting.remove(&to);
        self.edges.entry(from).or_default().push((to, level));
    }

    /// Successors of a computation in insertion order.
    pub fn successors(&self, id: CompId) -> &[(CompId, Level)] {
        self.edges.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Computations without a predecessor.
    pub fn roots(&self) -> impl Iterator<Item = CompId> + '_ {
        self.starting.iter().copied()
    }

    /// Exactly one root, and no computation reachable twice from it.
    pub fn is_tree(&self) -> bool {
        if self.starting.len() != 1 {
            return false;
        }
        let mut visited = HashSet::new();
        self.starting.iter().all(|&root| self.dfs_unique(root, &mut visited))
    }

    fn dfs_unique(&self, id: CompId, visited: &mut HashSet<CompId>) -> bool {
        if !visited.insert(id) {
            return false;
        }
        self.successors(id).iter().all(|&(to, _)| self.dfs_unique(to, visited))
    }

    /// `id` and every computation sharing loops `0..=level` with it,
    /// following edges in either direction.
    pub fn fused_group(&self, id: CompId, level: usize) -> Vec<CompId> {
        let shares = |l: &Level| matches!(l, Level::Loop(k) if *k >= level);
        let mut group = BTreeSet::from([id]);
        let mut pending = vec![id];
        while let Some(cur) = pending.pop() {
            let succ = self.successors(cur).iter().filter(|(_, l)| shares(l)).map(|&(to, _)| to);
            let pred = self
                .edges
                .iter()
                .filter(|(_, s)| s.iter().any(|(to, l)| *to == cur && shares(l)))
                .map(|(&from, _)| from);
            for next in succ.chain(pred).collect::<Vec<_>>() {
                if group.insert(next) {
                    pending.push(next);
                }
            }
        }
        group.into_iter().collect()
    }

    /// True once static dimensions were set by hand.
    pub fn is_low_level(&self) -> bool {
        self.low_level
    }

    fn dump(&self) -> String {
        let mut out = String::new();
        for (from, succ) in &self.edges {
            for (to, level) in succ {
                out.push_str(&format!("{} -> {} @ {}; ", from, to, level));
            }
        }
        out
    }
}

impl Function {
    fn check_ordering_level(&self, id: CompId, level: Level) -> PolyResult<()> {
        if let Level::Loop(l) = level {
            let comp = self.comp(id);
            if l >= comp.n_loop_levels() {
                return Err(ScheduleError::new(
                    ScheduleErrorKind::UnknownDimension,
                    format!("cannot order at loop level {}, the computation has {} loop level(s)", l, comp.n_loop_levels()),
                )
                .for_computation(comp.name.as_str())
                .into());
            }
        }
        Ok(())
    }

    /// Schedule `b` after `a`, sharing loops up to `level`.
    pub fn after(&mut self, b: CompId, a: CompId, level: Level) -> PolyResult<()> {
        self.check_ordering_level(a, level)?;
        self.check_ordering_level(b, level)?;
        debug!("ordering {} after {} at {}", self.comp(b).name, self.comp(a).name, level);
        self.sched_graph.add_edge(a, b, level);
        Ok(())
    }

    /// Schedule `a` before `b`, sharing loops up to `level`.
    pub fn before(&mut self, a: CompId, b: CompId, level: Level) -> PolyResult<()> {
        self.after(b, a, level)
    }

    /// Schedule `b` after `a` and return `b` for chaining.
    pub fn then(&mut self, a: CompId, b: CompId, level: Level) -> PolyResult<CompId> {
        self.after(b, a, level)?;
        Ok(b)
    }

    /// Computations fused with `id` down to loop `level`, `id` included.
    /// A loop transformation at or above `level` has to be applied to the
    /// whole group to keep its ordering.
    pub fn fused_computations(&self, id: CompId, level: usize) -> Vec<CompId> {
        self.sched_graph.fused_group(id, level)
    }

    /// See [`SchedGraph::is_tree`].
    pub fn is_sched_graph_tree(&self) -> bool {
        self.sched_graph.is_tree()
    }

    /// Give `id` the static coordinates of `prev` up to `level`, one more at
    /// the next static dimension, and zero afterwards.
    fn order_statics_after(&mut self, id: CompId, prev: CompId, level: Level) {
        let prev_statics = self.comp(prev).static_dims();
        let bump = level.static_index();
        let comp = self.comp_mut(id);
        let n_static = comp.schedule.n_out() / 2 + 1;
        let mut sched = comp.schedule.clone();
        for k in 0..n_static {
            let inherited = prev_statics.get(k).copied().unwrap_or(0);
            let value = match k.cmp(&bump) {
                std::cmp::Ordering::Less => inherited,
                std::cmp::Ordering::Equal => inherited + 1,
                std::cmp::Ordering::Greater => 0,
            };
            sched = sched.fix_out(2 * k, value);
        }
        comp.schedule = sched;
        debug!("static dims of {} now {:?}", comp.name, comp.static_dims());
    }

    /// Low-level ordering: set the static dimensions of `id` directly so it
    /// runs after `prev` at `level`. Disables [`gen_ordering_schedules`](Self::gen_ordering_schedules).
    pub fn after_low_level(&mut self, id: CompId, prev: CompId, level: Level) -> PolyResult<()> {
        self.check_ordering_level(prev, level)?;
        self.check_ordering_level(id, level)?;
        self.sched_graph.low_level = true;
        self.order_statics_after(id, prev, level);
        Ok(())
    }

    /// Replace the schedule of `id` with a user relation. Disables
    /// [`gen_ordering_schedules`](Self::gen_ordering_schedules).
    pub fn set_low_level_schedule(&mut self, id: CompId, schedule: BasicMap) -> PolyResult<()> {
        let comp = self.comp(id);
        let input = schedule.space.input_tuple();
        if schedule.space.is_set() || input.len() != comp.n_iterators() {
            return Err(ScheduleError::new(
                ScheduleErrorKind::InvalidSchedule,
                format!("schedule {} does not take the iteration domain as input", schedule),
            )
            .for_computation(comp.name.as_str())
            .into());
        }
        if schedule.n_out() % 2 == 0 {
            return Err(ScheduleError::new(
                ScheduleErrorKind::InvalidSchedule,
                "schedule must alternate static and dynamic dimensions and end with a static one",
            )
            .for_computation(comp.name.as_str())
            .into());
        }
        let name = Some(comp.name.clone());
        self.comp_mut(id).schedule = schedule.with_input_name(name).with_output_name(None);
        self.sched_graph.low_level = true;
        Ok(())
    }

    /// Derive static schedule dimensions from the ordering edges.
    ///
    /// Walks the tree from its root, visiting pending successors deepest
    /// fusion level first and, within a level, in the order the edges were
    /// recorded. Each visited computation is placed right after the
    /// previously visited one at its edge level.
    pub fn gen_ordering_schedules(&mut self) -> PolyResult<()> {
        if self.sched_graph.low_level {
            debug!("low-level ordering in use, skipping ordering edges");
            return Ok(());
        }
        if self.scheduled().len() <= 1 && self.sched_graph.edges.is_empty() {
            return Ok(());
        }
        debug!("schedule graph: {}", self.sched_graph.dump());
        if !self.sched_graph.is_tree() {
            return Err(ScheduleError::new(
                ScheduleErrorKind::NotATree,
                "the schedule graph is not a tree; order every computation or set low-level schedules",
            )
            .into());
        }
        let Some(mut current) = self.sched_graph.roots().next() else {
            return Ok(());
        };
        let mut levels: BinaryHeap<Level> = BinaryHeap::new();
        let mut queues: BTreeMap<Level, VecDeque<CompId>> = BTreeMap::new();
        loop {
            for &(to, level) in self.sched_graph.successors(current) {
                let queue = queues.entry(level).or_default();
                if queue.is_empty() {
                    levels.push(level);
                }
                queue.push_back(to);
            }
            let Some(&level) = levels.peek() else { break };
            let queue = queues.entry(level).or_default();
            let Some(next) = queue.pop_front() else {
                levels.pop();
                continue;
            };
            if queue.is_empty() {
                levels.pop();
            }
            self.order_statics_after(next, current, level);
            current = next;
        }
        info!("generated ordering schedules for {}", self.name());
        Ok(())
    }

    /// Pad every schedule to the largest output arity; padded dimensions are
    /// fixed to 0.
    pub fn align_schedules(&mut self) {
        let ids = self.scheduled();
        let max = ids.iter().map(|&id| self.comp(id).schedule.n_out()).max().unwrap_or(0);
        for id in ids {
            let comp = self.comp_mut(id);
            let n = comp.schedule.n_out();
            if n == max {
                continue;
            }
            let names: Vec<String> = (n..max)
                .map(|p| if p % 2 == 0 { static_dim_name(p / 2) } else { format!("_d{}", p / 2) })
                .collect();
            let mut sched = comp.schedule.insert_out_dims(n, &names);
            for p in n..max {
                sched = sched.fix_out(p, 0);
            }
            debug!("aligned schedule of {} from {} to {} dims", comp.name, n, max);
            comp.schedule = sched;
        }
    }
}

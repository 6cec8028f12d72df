//! Exact integer feasibility and variable elimination.
//!
//! The solver works on a flat system of rows `sum(a_i * x_i) + c (>= | =) 0`
//! where parameters have already been turned into ordinary variables.
//! Feasibility follows the Omega test:
//! 1. equalities are eliminated by unit-coefficient substitution, or reduced
//!    with the symmetric-modulo ("mod hat") step until a unit coefficient
//!    appears;
//! 2. inequalities are projected with Fourier-Motzkin when the projection is
//!    exact over the integers (every lower/upper pair has a unit coefficient);
//! 3. otherwise the real shadow refutes, the dark shadow proves, and the
//!    remaining gap is closed by enumerating splinters.

use log::warn;
use num_integer::Integer;

use super::expr::floor_div;

/// Work limit for one feasibility query. Exceeding it answers "feasible",
/// which is the conservative outcome for every caller in this crate.
const DEFAULT_BUDGET: usize = 20_000;

/// A combined coefficient left the `i64` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Overflow;

type Checked<T> = Result<T, Overflow>;

fn mul(a: i64, b: i64) -> Checked<i64> {
    a.checked_mul(b).ok_or(Overflow)
}

fn add(a: i64, b: i64) -> Checked<i64> {
    a.checked_add(b).ok_or(Overflow)
}

/// One linear row: `sum(coeffs[i] * x_i) + constant`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Row {
    /// Variable coefficients
    pub coeffs: Vec<i64>,
    /// Constant term
    pub constant: i64,
}

impl Row {
    /// Build a row from its parts.
    pub fn new(coeffs: Vec<i64>, constant: i64) -> Self {
        Self { coeffs, constant }
    }

    fn coeff(&self, k: usize) -> i64 {
        self.coeffs.get(k).copied().unwrap_or(0)
    }

    fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }

    fn scale(&self, f: i64) -> Checked<Row> {
        let coeffs = self.coeffs.iter().map(|&c| mul(c, f)).collect::<Checked<Vec<_>>>()?;
        Ok(Row::new(coeffs, mul(self.constant, f)?))
    }

    fn add(&self, other: &Row) -> Checked<Row> {
        let n = self.coeffs.len().max(other.coeffs.len());
        let coeffs = (0..n).map(|i| add(self.coeff(i), other.coeff(i))).collect::<Checked<Vec<_>>>()?;
        Ok(Row::new(coeffs, add(self.constant, other.constant)?))
    }

    /// Replace `x_k` by `value` (which must not mention `x_k`).
    fn substitute(&self, k: usize, value: &Row) -> Checked<Row> {
        let c = self.coeff(k);
        if c == 0 {
            return Ok(self.clone());
        }
        let mut base = self.clone();
        base.coeffs[k] = 0;
        base.add(&value.scale(c)?)
    }

    fn gcd(&self) -> i64 {
        self.coeffs.iter().fold(0i64, |g, &c| g.gcd(&c))
    }
}

/// A conjunction of equalities and inequalities over `n_var` variables.
#[derive(Debug, Clone, Default)]
pub struct System {
    /// Number of variables
    pub n_var: usize,
    /// Rows that must equal zero
    pub eqs: Vec<Row>,
    /// Rows that must be non-negative
    pub ineqs: Vec<Row>,
}

/// Result of trying to project a variable out of a system.
#[derive(Debug, Clone)]
pub enum Projection {
    /// The projection is exact over the integers.
    Exact(System),
    /// Only the rational shadow could be computed (an over-approximation).
    Shadow(System),
}

impl System {
    /// Create an unconstrained system.
    pub fn new(n_var: usize) -> Self {
        Self { n_var, eqs: Vec::new(), ineqs: Vec::new() }
    }

    /// Normalize every row. Returns `false` when a row has no integer
    /// solution.
    fn normalize(&mut self) -> Checked<bool> {
        let mut eqs = Vec::with_capacity(self.eqs.len());
        for row in self.eqs.drain(..) {
            let g = row.gcd();
            if g == 0 {
                if row.constant != 0 {
                    return Ok(false);
                }
                continue;
            }
            if row.constant % g != 0 {
                return Ok(false);
            }
            let row = if g > 1 {
                Row::new(row.coeffs.iter().map(|c| c / g).collect(), row.constant / g)
            } else {
                row
            };
            if !eqs.contains(&row) && !eqs.contains(&row.scale(-1)?) {
                eqs.push(row);
            }
        }
        self.eqs = eqs;

        let mut ineqs: Vec<Row> = Vec::with_capacity(self.ineqs.len());
        for row in self.ineqs.drain(..) {
            let g = row.gcd();
            if g == 0 {
                if row.constant < 0 {
                    return Ok(false);
                }
                continue;
            }
            let row = if g > 1 {
                Row::new(row.coeffs.iter().map(|c| c / g).collect(), floor_div(row.constant, g))
            } else {
                row
            };
            // keep only the tightest of parallel rows
            if let Some(existing) = ineqs.iter_mut().find(|r| r.coeffs == row.coeffs) {
                existing.constant = existing.constant.min(row.constant);
            } else {
                ineqs.push(row);
            }
        }

        // opposite rows: a + c1 >= 0 and -a + c2 >= 0
        let mut promoted = Vec::new();
        for i in 0..ineqs.len() {
            for j in (i + 1)..ineqs.len() {
                let opposite = ineqs[i]
                    .coeffs
                    .iter()
                    .zip(ineqs[j].coeffs.iter())
                    .all(|(a, b)| a.checked_neg() == Some(*b));
                if opposite {
                    let sum = add(ineqs[i].constant, ineqs[j].constant)?;
                    if sum < 0 {
                        return Ok(false);
                    }
                    if sum == 0 {
                        promoted.push((i, j));
                    }
                }
            }
        }
        if !promoted.is_empty() {
            let mut drop = vec![false; ineqs.len()];
            for (i, j) in promoted {
                if !drop[i] && !drop[j] {
                    self.eqs.push(ineqs[i].clone());
                    drop[i] = true;
                    drop[j] = true;
                }
            }
            ineqs = ineqs
                .into_iter()
                .zip(drop)
                .filter_map(|(r, d)| (!d).then_some(r))
                .collect();
        }
        self.ineqs = ineqs;
        Ok(true)
    }

    fn substitute_everywhere(&mut self, k: usize, value: &Row) -> Checked<()> {
        for row in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            *row = row.substitute(k, value)?;
        }
        Ok(())
    }

    fn add_var(&mut self) -> usize {
        let k = self.n_var;
        self.n_var += 1;
        for row in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            row.coeffs.resize(self.n_var, 0);
        }
        k
    }

    /// Split the inequalities on `k` into lower bounds, upper bounds and rows
    /// not mentioning it.
    fn partition(&self, k: usize) -> (Vec<Row>, Vec<Row>, Vec<Row>) {
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        let mut rest = Vec::new();
        for row in &self.ineqs {
            match row.coeff(k) {
                c if c > 0 => lower.push(row.clone()),
                c if c < 0 => upper.push(row.clone()),
                _ => rest.push(row.clone()),
            }
        }
        (lower, upper, rest)
    }

    /// Fourier-Motzkin step on `k`; `dark` tightens each combination to the
    /// dark shadow.
    fn combine(&self, k: usize, dark: bool) -> Checked<System> {
        let (lower, upper, rest) = self.partition(k);
        let mut out = System { n_var: self.n_var, eqs: self.eqs.clone(), ineqs: rest };
        for l in &lower {
            let a = l.coeff(k);
            for u in &upper {
                let b = u.coeff(k).checked_neg().ok_or(Overflow)?;
                let mut row = l.scale(b)?.add(&u.scale(a)?)?;
                if dark {
                    row.constant = row.constant.checked_sub(mul(a - 1, b - 1)?).ok_or(Overflow)?;
                }
                out.ineqs.push(row);
            }
        }
        Ok(out)
    }

    fn exact_pairs(&self, k: usize) -> bool {
        let (lower, upper, _) = self.partition(k);
        lower.iter().all(|l| l.coeff(k) == 1) || upper.iter().all(|u| u.coeff(k) == -1)
            || lower.iter().all(|l| upper.iter().all(|u| l.coeff(k) == 1 || u.coeff(k) == -1))
    }

    /// Eliminate one equality. Returns `false` on a contradiction.
    fn eliminate_equality(&mut self, row: Row) -> Checked<bool> {
        if let Some(k) = (0..row.coeffs.len()).find(|&k| row.coeff(k).unsigned_abs() == 1) {
            // x_k = -a_k * (rest + c)
            let a = row.coeff(k);
            let mut value = row.scale(-a)?;
            value.coeffs[k] = 0;
            self.substitute_everywhere(k, &value)?;
            return Ok(true);
        }
        let Some(k) = (0..row.coeffs.len())
            .filter(|&k| row.coeff(k) != 0)
            .min_by_key(|&k| row.coeff(k).unsigned_abs())
        else {
            return Ok(row.constant == 0);
        };
        let row = if row.coeff(k) < 0 { row.scale(-1)? } else { row };
        let m = add(row.coeff(k), 1)?;
        let sigma = self.add_var();
        let mut row = row;
        row.coeffs.resize(self.n_var, 0);
        // x_k = sum_{i != k} mod_hat(a_i) x_i + mod_hat(c) - m * sigma
        let mut value = Row::new(
            row.coeffs.iter().map(|&a| mod_hat(a, m)).collect(),
            mod_hat(row.constant, m),
        );
        value.coeffs[k] = 0;
        value.coeffs[sigma] = -m;
        self.substitute_everywhere(k, &value)?;
        self.eqs.push(row.substitute(k, &value)?);
        Ok(true)
    }

    /// Project variable `k` out. Exact when the variable is fixed by a
    /// unit-coefficient equality, bounded on one side only, or when every
    /// lower/upper pair has a unit coefficient.
    ///
    /// If a combined coefficient overflows, every row mentioning the
    /// variable is dropped and the result is reported as a shadow.
    pub fn project_out(&self, k: usize) -> Projection {
        match self.try_project_out(k) {
            Ok(p) => p,
            Err(Overflow) => {
                warn!("coefficient overflow while projecting x{}; dropping its constraints", k);
                let mut sys = self.clone();
                sys.eqs.retain(|r| r.coeff(k) == 0);
                sys.ineqs.retain(|r| r.coeff(k) == 0);
                Projection::Shadow(sys)
            }
        }
    }

    fn try_project_out(&self, k: usize) -> Checked<Projection> {
        let mut sys = self.clone();
        if let Some(pos) = sys.eqs.iter().position(|r| r.coeff(k).unsigned_abs() == 1) {
            let row = sys.eqs.remove(pos);
            let a = row.coeff(k);
            let mut value = row.scale(-a)?;
            value.coeffs[k] = 0;
            sys.substitute_everywhere(k, &value)?;
            return Ok(Projection::Exact(sys));
        }
        if sys.eqs.iter().any(|r| r.coeff(k) != 0) {
            // a stride equality: drop it and fall back to the rational shadow
            let (with_k, without): (Vec<Row>, Vec<Row>) =
                sys.eqs.into_iter().partition(|r| r.coeff(k) != 0);
            sys.eqs = without;
            for r in with_k {
                sys.ineqs.push(r.scale(-1)?);
                sys.ineqs.push(r);
            }
            return Ok(Projection::Shadow(sys.combine(k, false)?));
        }
        let exact = sys.exact_pairs(k);
        let out = sys.combine(k, false)?;
        Ok(if exact { Projection::Exact(out) } else { Projection::Shadow(out) })
    }

    /// True if the system has an integer solution.
    ///
    /// Running out of work budget or overflowing a coefficient both answer
    /// `true`.
    pub fn is_feasible(&self) -> bool {
        let mut budget = DEFAULT_BUDGET;
        let result = match feasible(self.clone(), &mut budget) {
            Ok(found) => found,
            Err(Overflow) => {
                warn!("coefficient overflow in integer feasibility test; assuming a solution exists");
                return true;
            }
        };
        if budget == 0 {
            warn!("integer feasibility budget exhausted; assuming a solution exists");
        }
        result
    }
}

/// Symmetric remainder used by the equality reduction step. Computed in
/// `i128`; the result lies within `m / 2` of zero.
fn mod_hat(a: i64, m: i64) -> i64 {
    let (a, m) = (i128::from(a), i128::from(m));
    (a - m * (2 * a + m).div_floor(&(2 * m))) as i64
}

fn feasible(mut sys: System, budget: &mut usize) -> Checked<bool> {
    loop {
        if *budget == 0 {
            return Ok(true);
        }
        *budget -= 1;

        if !sys.normalize()? {
            return Ok(false);
        }
        if let Some(row) = sys.eqs.pop() {
            if !sys.eliminate_equality(row)? {
                return Ok(false);
            }
            continue;
        }
        if sys.ineqs.iter().all(Row::is_constant) {
            return Ok(sys.ineqs.iter().all(|r| r.constant >= 0));
        }

        let mut best_exact: Option<(usize, usize)> = None;
        let mut best_any: Option<(usize, usize)> = None;
        let mut unbounded = None;
        for k in 0..sys.n_var {
            let (lower, upper, _) = sys.partition(k);
            if lower.is_empty() && upper.is_empty() {
                continue;
            }
            if lower.is_empty() || upper.is_empty() {
                unbounded = Some(k);
                break;
            }
            let cost = lower.len() * upper.len();
            if sys.exact_pairs(k) {
                if best_exact.map_or(true, |(_, c)| cost < c) {
                    best_exact = Some((k, cost));
                }
            } else if best_any.map_or(true, |(_, c)| cost < c) {
                best_any = Some((k, cost));
            }
        }

        if let Some(k) = unbounded {
            sys.ineqs.retain(|r| r.coeff(k) == 0);
            continue;
        }
        if let Some((k, _)) = best_exact {
            sys = sys.combine(k, false)?;
            continue;
        }
        let Some((k, _)) = best_any else {
            return Ok(true);
        };

        let real = sys.combine(k, false)?;
        if !feasible(real, budget)? {
            return Ok(false);
        }
        let dark = sys.combine(k, true)?;
        if feasible(dark, budget)? {
            return Ok(true);
        }
        let (lower, upper, _) = sys.partition(k);
        let amax = upper.iter().map(|u| u.coeff(k).saturating_neg()).max().unwrap_or(1);
        for l in &lower {
            let a = l.coeff(k);
            let limit = (mul(amax, a)? - a - amax) / amax;
            for j in 0..=limit.max(0) {
                let mut splinter = sys.clone();
                let mut eq = l.clone();
                eq.constant = eq.constant.checked_sub(j).ok_or(Overflow)?;
                splinter.eqs.push(eq);
                if feasible(splinter, budget)? {
                    return Ok(true);
                }
            }
        }
        return Ok(false);
    }
}

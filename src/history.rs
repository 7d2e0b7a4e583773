//! Existence-over-history cache — the "D/R seconds ago" disjunctions shared
//! by [`crate::network`] and [`crate::controller`].
//!
//! Both modules need, for a given observation `t` and a fixed offset (`D`
//! for propagation delay, `R` for the controller's RTT), the set of earlier
//! observations `pt` whose timestamp could equal `time[t] - offset`. Each is
//! an O(t) set of equalities; building it is cheap, but both the coupling
//! invariant at `t` and the existence disjunction at `t` want the *same*
//! per-`pt` equality terms, so this cache computes them once per `(t,
//! offset)` pair and hands back the list, per the design note on memoizing
//! history lookups.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use crate::expr::{BoolExpr, Rational, RealExpr};
use crate::vars::TraceVars;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Offset {
    D,
    R,
}

/// Memoizes, per observation index and offset kind, the per-`pt` equalities
/// `time[pt] == time[t] - offset`.
pub struct HistoryCache {
    d: Rational,
    r: Rational,
    entries: HashMap<(usize, Offset), Vec<BoolExpr>>,
}

impl HistoryCache {
    pub fn new(d: f64, r: f64) -> Self {
        HistoryCache {
            d: Rational::approx(d, 1_000_000),
            r: Rational::approx(r, 1_000_000),
            entries: HashMap::new(),
        }
    }

    /// Per-`pt` equalities `time[pt] == time[t] - D`, for `pt in 0..t`.
    pub fn d_ago_eqs(&mut self, vars: &TraceVars, t: usize) -> Vec<BoolExpr> {
        let offset = self.d;
        self.eqs(vars, t, Offset::D, offset)
    }

    /// Per-`pt` equalities `time[pt] == time[t] - R`, for `pt in 0..t`.
    pub fn r_ago_eqs(&mut self, vars: &TraceVars, t: usize) -> Vec<BoolExpr> {
        let offset = self.r;
        self.eqs(vars, t, Offset::R, offset)
    }

    fn eqs(&mut self, vars: &TraceVars, t: usize, kind: Offset, offset: Rational) -> Vec<BoolExpr> {
        self.entries
            .entry((t, kind))
            .or_insert_with(|| {
                let target = RealExpr::from(vars.obs[t].time) - RealExpr::konst(offset);
                (0..t)
                    .map(|pt| RealExpr::from(vars.obs[pt].time).eq_expr(target.clone()))
                    .collect()
            })
            .clone()
    }
}

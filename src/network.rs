//! Network invariants — the link's physical and FIFO-ordering laws.
//!
//! Everything here is emitted over an already-declared [`TraceVars`]; this
//! module allocates no per-observation state of its own beyond the `Δt`
//! witnesses. See [`crate::controller`] for the sending-side coupling.

#![forbid(unsafe_code)]

use crate::expr::{and_all, or_all, BoolExpr, Rational, RealExpr, RealVar};
use crate::history::HistoryCache;
use crate::params::Params;
use crate::piecewise::{self, LinearPiece};
use crate::solver::SolverBackend;
use crate::vars::TraceVars;

/// One `Δt[t] = time[t] - time[t-1]` witness per `t in 1..T`, indexed so
/// `delta_ts.get(t)` is `Δt[t]`.
#[derive(Clone, Debug)]
pub struct DeltaTs {
    pub breakpoints: Vec<Rational>,
    vars: Vec<RealVar>,
}

impl DeltaTs {
    /// `Δt[t]` for `t in 1..T`. Panics if `t == 0` — there is no gap before
    /// the first observation.
    pub fn get(&self, t: usize) -> RealVar {
        self.vars[t - 1]
    }
}

/// Declare the piecewise `Δt[t]` witness for every `t in 1..T`.
pub fn declare_delta_ts(
    backend: &mut dyn SolverBackend,
    params: &Params,
    vars: &TraceVars,
) -> DeltaTs {
    let breakpoints = piecewise::delta_t_breakpoints(params.d);
    let pieces: Vec<LinearPiece> = (0..breakpoints.len() - 1)
        .map(|_| LinearPiece::diagonal())
        .collect();

    let delta_vars = (1..vars.t())
        .map(|t| {
            let x = RealExpr::from(vars.obs[t].time) - RealExpr::from(vars.obs[t - 1].time);
            piecewise::declare(backend, &format!("delta_t{t}"), x, &breakpoints, &pieces)
                .expect("delta_t envelope is well-formed by construction")
        })
        .collect();

    DeltaTs {
        breakpoints,
        vars: delta_vars,
    }
}

/// Emit every §4.5 invariant: per-flow physical law, aggregate capacity
/// bound, propagation-delay coupling, waste/arrival coupling, buffering and
/// loss, and (when `F>1`) multi-flow FIFO consistency.
pub fn emit(
    backend: &mut dyn SolverBackend,
    params: &Params,
    vars: &TraceVars,
    history: &mut HistoryCache,
) {
    let c = Rational::approx(params.c, 1_000_000);
    let d = Rational::approx(params.d, 1_000_000);

    for t in 0..vars.t() {
        emit_physical_law(backend, vars, t);
        emit_capacity_bound(backend, vars, t, c);
        emit_propagation_delay(backend, vars, history, t, c, d);
        if t > 0 {
            emit_waste_arrival(backend, params, vars, t, c);
        }
        emit_buffering_and_loss(backend, vars, t, c);
    }

    if params.f > 1 {
        emit_fifo_consistency(backend, vars);
    }
}

fn emit_physical_law(backend: &mut dyn SolverBackend, vars: &TraceVars, t: usize) {
    let obs = &vars.obs[t];
    for (f, flow) in obs.flows.iter().enumerate() {
        backend.assert_labeled(
            &format!("phys_law_{t}_f{f}"),
            RealExpr::from(flow.s).le(RealExpr::from(flow.a) - RealExpr::from(flow.l)),
        );
    }
}

fn emit_capacity_bound(backend: &mut dyn SolverBackend, vars: &TraceVars, t: usize, c: Rational) {
    let obs = &vars.obs[t];
    let capacity = RealExpr::from(obs.time) * c;
    backend.assert_labeled(
        &format!("capacity_{t}"),
        RealExpr::from(obs.s).le(capacity - RealExpr::from(obs.w)),
    );
}

fn emit_propagation_delay(
    backend: &mut dyn SolverBackend,
    vars: &TraceVars,
    history: &mut HistoryCache,
    t: usize,
    c: Rational,
    d: Rational,
) {
    let obs = &vars.obs[t];
    let eqs = history.d_ago_eqs(vars, t);

    // Existence: either we're still within the first D of the trace, or
    // some earlier observation sits exactly D seconds back.
    let too_early = RealExpr::from(obs.time).lt(RealExpr::konst(d));
    backend.assert_labeled(
        &format!("d_ago_existence_{t}"),
        if eqs.is_empty() {
            too_early
        } else {
            too_early | or_all(eqs.clone())
        },
    );

    // Loosest slack, valid unconditionally (tight only when no better
    // per-pt bound below applies).
    let first = &vars.obs[0];
    let loose = (RealExpr::from(obs.time) - RealExpr::konst(d)) * c - RealExpr::from(first.w);
    backend.assert_labeled(&format!("d_ago_loose_{t}"), loose.le(RealExpr::from(obs.s)));

    for (pt, eq) in eqs.into_iter().enumerate() {
        let earlier = &vars.obs[pt];
        let bound = RealExpr::from(earlier.time) * c - RealExpr::from(earlier.w);
        backend.assert_labeled(
            &format!("d_ago_tight_{t}_{pt}"),
            eq.implies(bound.le(RealExpr::from(obs.s))),
        );
    }
}

fn emit_waste_arrival(
    backend: &mut dyn SolverBackend,
    params: &Params,
    vars: &TraceVars,
    t: usize,
    c: Rational,
) {
    let (prev, obs) = (&vars.obs[t - 1], &vars.obs[t]);
    let wasted_more = RealExpr::from(prev.w).lt(RealExpr::from(obs.w));
    let arrival_minus_loss = RealExpr::from(obs.a) - RealExpr::from(obs.l);

    let bound = if params.compose {
        RealExpr::from(obs.time) * c - RealExpr::from(obs.w)
    } else {
        let epsilon = vars
            .epsilon
            .expect("epsilon must be declared when compose is false");
        RealExpr::from(obs.s) + RealExpr::from(epsilon)
    };

    backend.assert_labeled(&format!("waste_arrival_{t}"), wasted_more.implies(arrival_minus_loss.le(bound)));
}

fn emit_buffering_and_loss(backend: &mut dyn SolverBackend, vars: &TraceVars, t: usize, c: Rational) {
    let obs = &vars.obs[t];

    match vars.buf {
        None => {
            let first = &vars.obs[0];
            backend.assert_labeled(
                &format!("inf_buf_no_loss_{t}"),
                RealExpr::from(obs.l).eq_expr(RealExpr::from(first.l)),
            );
        }
        Some(buf) => {
            let headroom = RealExpr::from(obs.time) * c - RealExpr::from(obs.w) + RealExpr::from(buf);
            let arrival_minus_loss = RealExpr::from(obs.a) - RealExpr::from(obs.l);
            backend.assert_labeled(
                &format!("buf_headroom_{t}"),
                arrival_minus_loss.clone().le(headroom.clone()),
            );

            if t > 0 {
                let prev = &vars.obs[t - 1];
                let lost_more = RealExpr::from(prev.l).lt(RealExpr::from(obs.l));
                backend.assert_labeled(
                    &format!("buf_loss_tight_{t}"),
                    lost_more.implies(arrival_minus_loss.eq_expr(headroom)),
                );
            }
        }
    }
}

fn emit_fifo_consistency(backend: &mut dyn SolverBackend, vars: &TraceVars) {
    let first = &vars.obs[0];
    let first_level = RealExpr::from(first.a) - RealExpr::from(first.l);

    for t in 1..vars.t() {
        let obs = &vars.obs[t];
        let eqs: Vec<BoolExpr> = (0..t)
            .map(|pt| {
                let earlier = &vars.obs[pt];
                let level = RealExpr::from(earlier.a) - RealExpr::from(earlier.l);
                RealExpr::from(obs.s).eq_expr(level)
            })
            .collect();

        let reached = first_level.clone().le(RealExpr::from(obs.s));
        backend.assert_labeled(&format!("fifo_existence_{t}"), reached.implies(or_all(eqs.clone())));

        for (pt, eq) in eqs.into_iter().enumerate() {
            let earlier = &vars.obs[pt];
            let per_flow: Vec<BoolExpr> = obs
                .flows
                .iter()
                .zip(earlier.flows.iter())
                .map(|(f_t, f_pt)| {
                    let level = RealExpr::from(f_pt.a) - RealExpr::from(f_pt.l);
                    RealExpr::from(f_t.s).eq_expr(level)
                })
                .collect();
            backend.assert_labeled(&format!("fifo_per_flow_{t}_{pt}"), eq.implies(and_all(per_flow)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BackendError, Model, SatOutcome};
    use crate::vars;

    struct CountingBackend {
        next_id: u32,
        asserted: usize,
    }
    impl SolverBackend for CountingBackend {
        fn fresh_real(&mut self, _name: &str) -> RealVar {
            let id = RealVar(self.next_id);
            self.next_id += 1;
            id
        }
        fn assert(&mut self, _c: BoolExpr) {
            self.asserted += 1;
        }
        fn assert_labeled(&mut self, _l: &str, c: BoolExpr) {
            self.assert(c)
        }
        fn check(&mut self) -> Result<SatOutcome, BackendError> {
            Ok(SatOutcome::Sat(Model::new(Default::default(), Default::default())))
        }
    }

    #[test]
    fn declares_one_delta_t_per_gap() {
        let params = Params {
            t: 5,
            ..Params::default()
        };
        let mut backend = CountingBackend {
            next_id: 0,
            asserted: 0,
        };
        let vars = vars::declare(&mut backend, &params);
        let deltas = declare_delta_ts(&mut backend, &params, &vars);
        for t in 1..5 {
            let _ = deltas.get(t);
        }
    }

    #[test]
    fn emits_without_panicking_across_regimes() {
        for (compose, inf_buf, f) in [(true, true, 1), (false, false, 2)] {
            let params = Params {
                t: 4,
                f,
                compose,
                inf_buf,
                buf_size: if inf_buf { None } else { Some(2.0) },
                ..Params::default()
            };
            let mut backend = CountingBackend {
                next_id: 0,
                asserted: 0,
            };
            let vars = vars::declare(&mut backend, &params);
            let mut history = HistoryCache::new(params.d, params.r);
            emit(&mut backend, &params, &vars, &mut history);
            assert!(backend.asserted > 0);
        }
    }
}

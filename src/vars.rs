//! State declaration — allocates the symbolic variables of the trace.
//!
//! Mirrors the historical source's `Variables`/`Timestep`/`Flow` classes:
//! one record per observation point, each holding one record per flow plus
//! aggregates. Only *structural* constraints are emitted here — the
//! aggregate-equals-sum summation, the optional `epsilon`/`buf`
//! declarations, monotonicity, and the initial conditions. Dynamical
//! invariants belong to [`crate::network`] and [`crate::controller`].

#![forbid(unsafe_code)]

use crate::expr::{and_all, RealExpr, RealVar};
use crate::params::Params;
use crate::solver::SolverBackend;

/// Index of an observation point `t ∈ {0..T-1}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObsIdx(pub usize);
impl ObsIdx {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Index of a flow `f ∈ {0..F-1}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowIdx(pub usize);
impl FlowIdx {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Per-flow, per-observation state: `§3` "per-flow per-observation state"
/// plus the controller inputs.
#[derive(Clone, Copy, Debug)]
pub struct FlowState {
    pub a: RealVar,
    pub s: RealVar,
    pub l: RealVar,
    pub l_d: RealVar,
    pub rtt: RealVar,
    pub rate: RealVar,
    pub cwnd: RealVar,
}

/// Per-observation state: the aggregates plus one [`FlowState`] per flow.
#[derive(Clone, Debug)]
pub struct ObsState {
    pub time: RealVar,
    pub w: RealVar,
    pub a: RealVar,
    pub s: RealVar,
    pub l: RealVar,
    pub flows: Vec<FlowState>,
}

/// The whole trace: `T` [`ObsState`]s plus the optional `epsilon`/`buf`.
#[derive(Clone, Debug)]
pub struct TraceVars {
    pub obs: Vec<ObsState>,
    /// Present iff `compose` is false (§3 "Optional state").
    pub epsilon: Option<RealVar>,
    /// Present iff `inf_buf` is false.
    pub buf: Option<RealVar>,
}

impl TraceVars {
    pub fn t(&self) -> usize {
        self.obs.len()
    }

    pub fn f(&self) -> usize {
        self.obs.first().map(|o| o.flows.len()).unwrap_or(0)
    }
}

fn declare_flow(backend: &mut dyn SolverBackend, prefix: &str) -> FlowState {
    FlowState {
        a: backend.fresh_real(&format!("{prefix}_A")),
        s: backend.fresh_real(&format!("{prefix}_S")),
        l: backend.fresh_real(&format!("{prefix}_L")),
        l_d: backend.fresh_real(&format!("{prefix}_Ld")),
        rtt: backend.fresh_real(&format!("{prefix}_rtt")),
        rate: backend.fresh_real(&format!("{prefix}_rate")),
        cwnd: backend.fresh_real(&format!("{prefix}_cwnd")),
    }
}

fn declare_obs(backend: &mut dyn SolverBackend, params: &Params, t: ObsIdx) -> ObsState {
    let prefix = format!("t{}", t.as_usize());
    let flows: Vec<FlowState> = (0..params.f)
        .map(|f| declare_flow(backend, &format!("{prefix}_f{f}")))
        .collect();

    let obs = ObsState {
        time: backend.fresh_real(&format!("{prefix}_time")),
        w: backend.fresh_real(&format!("{prefix}_W")),
        a: backend.fresh_real(&format!("{prefix}_A")),
        s: backend.fresh_real(&format!("{prefix}_S")),
        l: backend.fresh_real(&format!("{prefix}_L")),
        flows,
    };

    // Aggregate equals sum of flows (structural, not dynamical).
    let sum_a = sum_exprs(obs.flows.iter().map(|fl| fl.a));
    let sum_s = sum_exprs(obs.flows.iter().map(|fl| fl.s));
    let sum_l = sum_exprs(obs.flows.iter().map(|fl| fl.l));
    backend.assert_labeled(&format!("{prefix}_agg_A"), RealExpr::from(obs.a).eq_expr(sum_a));
    backend.assert_labeled(&format!("{prefix}_agg_S"), RealExpr::from(obs.s).eq_expr(sum_s));
    backend.assert_labeled(&format!("{prefix}_agg_L"), RealExpr::from(obs.l).eq_expr(sum_l));

    obs
}

fn sum_exprs(vars: impl Iterator<Item = RealVar>) -> RealExpr {
    vars.map(RealExpr::from)
        .fold(RealExpr::konst(crate::expr::Rational::ZERO), |acc, e| {
            acc + e
        })
}

/// Allocate the whole trace and emit its structural constraints: the
/// per-observation summations, the optional `epsilon`/`buf` declarations,
/// monotonicity of every cumulant, and the initial conditions
/// (`time[0] = 0`, `S[0] = 0`, `L[0] >= 0`, `L_d[0] >= 0`).
pub fn declare(backend: &mut dyn SolverBackend, params: &Params) -> TraceVars {
    let obs: Vec<ObsState> = (0..params.t)
        .map(|t| declare_obs(backend, params, ObsIdx(t)))
        .collect();

    let epsilon = if !params.compose {
        let e = backend.fresh_real("epsilon");
        backend.assert_labeled(
            "epsilon_nonneg",
            RealExpr::from(e).ge(RealExpr::konst(crate::expr::Rational::ZERO)),
        );
        Some(e)
    } else {
        None
    };

    let buf = if !params.inf_buf {
        let b = backend.fresh_real("buf");
        if let Some(size) = params.buf_size {
            let size = crate::expr::Rational::approx(size, 1_000_000);
            backend.assert_labeled("buf_fixed", RealExpr::from(b).eq_expr(RealExpr::konst(size)));
        }
        backend.assert_labeled(
            "buf_positive",
            RealExpr::from(b).gt(RealExpr::konst(crate::expr::Rational::ZERO)),
        );
        Some(b)
    } else {
        None
    };

    emit_monotonicity(backend, &obs);
    emit_initial_conditions(backend, &obs);

    TraceVars { obs, epsilon, buf }
}

fn emit_monotonicity(backend: &mut dyn SolverBackend, obs: &[ObsState]) {
    for t in 1..obs.len() {
        let (pre, nex) = (&obs[t - 1], &obs[t]);
        backend.assert_labeled(&format!("mono_W_{t}"), RealExpr::from(pre.w).le(RealExpr::from(nex.w)));
        backend.assert_labeled(
            &format!("mono_time_{t}"),
            RealExpr::from(pre.time).lt(RealExpr::from(nex.time)),
        );
        backend.assert_labeled(&format!("mono_A_{t}"), RealExpr::from(pre.a).le(RealExpr::from(nex.a)));
        backend.assert_labeled(&format!("mono_S_{t}"), RealExpr::from(pre.s).le(RealExpr::from(nex.s)));
        backend.assert_labeled(&format!("mono_L_{t}"), RealExpr::from(pre.l).le(RealExpr::from(nex.l)));

        for f in 0..pre.flows.len() {
            let (pre_f, nex_f) = (pre.flows[f], nex.flows[f]);
            backend.assert_labeled(
                &format!("mono_A_{t}_f{f}"),
                RealExpr::from(pre_f.a).le(RealExpr::from(nex_f.a)),
            );
            backend.assert_labeled(
                &format!("mono_S_{t}_f{f}"),
                RealExpr::from(pre_f.s).le(RealExpr::from(nex_f.s)),
            );
            backend.assert_labeled(
                &format!("mono_L_{t}_f{f}"),
                RealExpr::from(pre_f.l).le(RealExpr::from(nex_f.l)),
            );
            backend.assert_labeled(
                &format!("mono_Ld_{t}_f{f}"),
                RealExpr::from(pre_f.l_d).le(RealExpr::from(nex_f.l_d)),
            );
        }
    }
}

fn emit_initial_conditions(backend: &mut dyn SolverBackend, obs: &[ObsState]) {
    let zero = RealExpr::konst(crate::expr::Rational::ZERO);
    let first = &obs[0];
    backend.assert_labeled("init_time0", RealExpr::from(first.time).eq_expr(zero.clone()));
    // S[0] = 0 is a free y-origin: the model is shift-invariant, but fixing
    // one origin keeps extracted traces comparable across queries.
    backend.assert_labeled("init_S0", RealExpr::from(first.s).eq_expr(zero.clone()));

    let terms: Vec<_> = first
        .flows
        .iter()
        .flat_map(|fl| {
            vec![
                RealExpr::from(fl.l).ge(zero.clone()),
                RealExpr::from(fl.l_d).ge(zero.clone()),
            ]
        })
        .collect();
    if !terms.is_empty() {
        backend.assert_labeled("init_L_Ld_nonneg", and_all(terms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BackendError, Model, SatOutcome};
    use std::collections::HashMap;

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
        fn assert(&mut self, _constraint: crate::expr::BoolExpr) {
            self.asserted += 1;
        }
        fn assert_labeled(&mut self, _label: &str, constraint: crate::expr::BoolExpr) {
            self.assert(constraint)
        }
        fn check(&mut self) -> Result<SatOutcome, BackendError> {
            Ok(SatOutcome::Sat(Model::new(HashMap::new(), HashMap::new())))
        }
    }

    #[test]
    fn declares_t_observations_with_f_flows_each() {
        let params = Params {
            t: 5,
            f: 3,
            ..Params::default()
        };
        let mut backend = CountingBackend {
            next_id: 0,
            asserted: 0,
        };
        let vars = declare(&mut backend, &params);
        assert_eq!(vars.t(), 5);
        assert_eq!(vars.f(), 3);
        assert!(vars.epsilon.is_none());
        assert!(vars.buf.is_none());
    }

    #[test]
    fn optional_vars_follow_regime() {
        let params = Params {
            compose: false,
            inf_buf: false,
            buf_size: Some(2.0),
            ..Params::default()
        };
        let mut backend = CountingBackend {
            next_id: 0,
            asserted: 0,
        };
        let vars = declare(&mut backend, &params);
        assert!(vars.epsilon.is_some());
        assert!(vars.buf.is_some());
    }
}

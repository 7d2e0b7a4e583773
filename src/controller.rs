//! Controller coupling — sending-side rate/window envelopes and the
//! loss-delay/RTT inference machinery of §4.6.
//!
//! Depends on [`crate::network::DeltaTs`] for the rate envelope's `Δt`
//! witnesses and on [`crate::history::HistoryCache`] for the "R seconds
//! ago" existence disjunctions, exactly the way [`crate::network`] reuses
//! the same cache for its "D seconds ago" ones.

#![forbid(unsafe_code)]

use crate::expr::{and_all, or_all, BoolExpr, Rational, RealExpr};
use crate::history::HistoryCache;
use crate::network::DeltaTs;
use crate::params::Params;
use crate::piecewise;
use crate::solver::SolverBackend;
use crate::vars::TraceVars;

/// Emit every §4.6 invariant for every flow: the non-negativity domain
/// constraint the rate envelope's linearization depends on, the R-ago
/// existence requirement, the rate/window envelopes, their combination,
/// and the loss-delay/RTT machinery.
pub fn emit(
    backend: &mut dyn SolverBackend,
    params: &Params,
    vars: &TraceVars,
    history: &mut HistoryCache,
    delta_ts: &DeltaTs,
) {
    let r = Rational::approx(params.r, 1_000_000);

    emit_rate_nonnegativity(backend, vars);

    for t in 1..vars.t() {
        emit_existence(backend, vars, history, t, r);
        for f in 0..vars.f() {
            emit_rate_and_window_envelope(backend, vars, history, delta_ts, t, f, r);
        }
    }

    for t in 0..vars.t() {
        for f in 0..vars.f() {
            emit_loss_delay(backend, vars, t, f, r);
        }
    }
}

/// `rate[t,f] >= 0` for every `t,f` — required for the bound-based product
/// linearization in [`crate::piecewise::declare_product`] to be sound.
fn emit_rate_nonnegativity(backend: &mut dyn SolverBackend, vars: &TraceVars) {
    let zero = RealExpr::konst(Rational::ZERO);
    for (t, obs) in vars.obs.iter().enumerate() {
        for (f, flow) in obs.flows.iter().enumerate() {
            backend.assert_labeled(
                &format!("rate_nonneg_{t}_f{f}"),
                RealExpr::from(flow.rate).ge(zero.clone()),
            );
        }
    }
}

fn emit_existence(
    backend: &mut dyn SolverBackend,
    vars: &TraceVars,
    history: &mut HistoryCache,
    t: usize,
    r: Rational,
) {
    let obs = &vars.obs[t];
    let first = &vars.obs[0];
    let no_history =
        (RealExpr::from(obs.time) - RealExpr::from(first.time)).lt(RealExpr::konst(r));
    let eqs = history.r_ago_eqs(vars, t);
    backend.assert_labeled(
        &format!("r_ago_existence_{t}"),
        if eqs.is_empty() {
            no_history
        } else {
            no_history | or_all(eqs)
        },
    );
}

fn emit_rate_and_window_envelope(
    backend: &mut dyn SolverBackend,
    vars: &TraceVars,
    history: &mut HistoryCache,
    delta_ts: &DeltaTs,
    t: usize,
    f: usize,
    r: Rational,
) {
    let obs = &vars.obs[t];
    let prev = &vars.obs[t - 1];
    let flow = obs.flows[f];
    let flow_prev = prev.flows[f];

    // Rate envelope: A[t-1,f] + Δt[t]*rate[t-1,f], via the piecewise
    // product linearization (Δt[t] is already bounded to [0,D]).
    let delta_t = delta_ts.get(t);
    let product = piecewise::declare_product(
        backend,
        &format!("t{t}_f{f}_rate_product"),
        RealExpr::from(delta_t),
        &delta_ts.breakpoints,
        RealExpr::from(flow_prev.rate),
    )
    .expect("delta_t breakpoints are well-formed by construction");
    let rate_a = RealExpr::from(flow_prev.a) + RealExpr::from(product);

    // Window envelope: for the (at most one, by strict time monotonicity)
    // earlier observation R seconds back, cwnd_A := S[tp,f]+L_d[tp,f]+cwnd[t,f];
    // otherwise the loosest bound anchored at t=0.
    let first = &vars.obs[0];
    let first_flow = first.flows[f];
    let no_history =
        (RealExpr::from(obs.time) - RealExpr::from(first.time)).lt(RealExpr::konst(r));
    let fallback_bound =
        RealExpr::from(first_flow.s) + RealExpr::from(first_flow.l_d) + RealExpr::from(flow.cwnd);
    backend.assert_labeled(
        &format!("window_fallback_{t}_f{f}"),
        no_history
            .clone()
            .implies(RealExpr::from(flow.a).le(fallback_bound)),
    );

    let eqs = history.r_ago_eqs(vars, t);
    for (pt, eq) in eqs.into_iter().enumerate() {
        let earlier_flow = vars.obs[pt].flows[f];
        let tight_bound = RealExpr::from(earlier_flow.s)
            + RealExpr::from(earlier_flow.l_d)
            + RealExpr::from(flow.cwnd);
        backend.assert_labeled(
            &format!("window_tight_{t}_f{f}_{pt}"),
            eq.implies(RealExpr::from(flow.a).le(tight_bound)),
        );
    }

    // Combined: A[t,f] is either the rate-envelope value or unchanged from
    // t-1 (a pause).
    let via_rate = RealExpr::from(flow.a).eq_expr(rate_a);
    let paused = RealExpr::from(flow.a).eq_expr(RealExpr::from(flow_prev.a));
    backend.assert_labeled(&format!("rate_or_pause_{t}_f{f}"), via_rate | paused);
}

fn emit_loss_delay(
    backend: &mut dyn SolverBackend,
    vars: &TraceVars,
    t: usize,
    f: usize,
    r: Rational,
) {
    let obs = &vars.obs[t];
    let flow = obs.flows[f];
    let first = &vars.obs[0];
    let first_flow = first.flows[f];

    let too_small =
        RealExpr::from(flow.s).lt(RealExpr::from(first_flow.a) - RealExpr::from(first_flow.l));

    let eqs: Vec<BoolExpr> = (0..t)
        .map(|pt| {
            let earlier_flow = vars.obs[pt].flows[f];
            let level = RealExpr::from(earlier_flow.a) - RealExpr::from(earlier_flow.l);
            RealExpr::from(flow.s).eq_expr(level)
        })
        .collect();

    backend.assert_labeled(
        &format!("loss_delay_existence_{t}_f{f}"),
        if eqs.is_empty() {
            too_small.clone()
        } else {
            too_small.clone() | or_all(eqs.clone())
        },
    );

    backend.assert_labeled(
        &format!("loss_delay_rtt_floor_{t}_f{f}"),
        too_small.implies(RealExpr::from(flow.rtt).ge(
            RealExpr::konst(r) + RealExpr::from(obs.time) - RealExpr::from(first.time),
        )),
    );

    // Earliest-match tie-break: the first pt (ascending) whose A-L level
    // matches S[t,f] wins; later ties are shadowed since A-L is monotone.
    let mut already_matched = BoolExpr::False;
    for (pt, eq) in eqs.into_iter().enumerate() {
        let earlier = &vars.obs[pt];
        let first_hit = and_all(vec![eq.clone(), !already_matched.clone()]);
        let earlier_flow = earlier.flows[f];
        let consequence = and_all(vec![
            RealExpr::from(flow.l_d).eq_expr(RealExpr::from(earlier_flow.l)),
            RealExpr::from(flow.rtt).eq_expr(
                RealExpr::konst(r) + RealExpr::from(obs.time) - RealExpr::from(earlier.time),
            ),
        ]);
        backend.assert_labeled(
            &format!("loss_delay_match_{t}_f{f}_{pt}"),
            first_hit.implies(consequence),
        );
        already_matched = already_matched | eq;
    }
}

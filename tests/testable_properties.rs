//! End-to-end tests against the bundled Z3 backend, exercising the
//! testable properties and seed scenarios.
//!
//! Each property test asserts the *negation* of an invariant and expects
//! `Unsat` — the solver is asked to find a counterexample and fails to.

use ccac::{piecewise, ModelBuilder, Params, QueryResult, Rational, RealExpr, SatOutcome, SolverBackend, Z3Backend};
use z3::{Config, Context};

fn builder(params: Params) -> ModelBuilder<Z3Backend<'static>> {
    // Leaking the context is fine here: each test builds exactly one model
    // and the process exits after the test, matching the crate's
    // one-scope-per-query resource model without fighting lifetimes across
    // a short-lived `Context`.
    let ctx: &'static Context = Box::leak(Box::new(Context::new(&Config::new())));
    let backend = Z3Backend::new(ctx, params.unsat_core);
    ModelBuilder::new(backend, params).expect("valid params")
}

#[test]
fn bounded_inter_observation_gap() {
    for (r, d) in [(1.0, 1.0), (1.0, 2.0), (2.0, 0.5)] {
        let params = Params {
            r,
            d,
            ..Params::default()
        };
        let min_rd = Rational::approx(r.min(d), 1_000_000);
        let mut b = builder(params);
        // Pick a mid-trace gap and assert it exceeds min(R,D).
        let t = b.vars().t() / 2;
        let delta = RealExpr::from(b.vars().obs[t].time) - RealExpr::from(b.vars().obs[t - 1].time);
        let counterexample = delta.gt(RealExpr::konst(min_rd));
        let result = b
            .query_with(vec![counterexample])
            .expect("query should not error");
        assert!(matches!(result, QueryResult::Unsat(_)));
    }
}

/// Property 2: every Δt variable respects its envelope across [0,D]. Here
/// the envelope is diagonal (`y == x` on every piece), so forcing `y` below
/// `x` inside a pinned interval must be unsat regardless of which piece is
/// active.
#[test]
fn piecewise_envelope_is_sound() {
    let ctx = Context::new(&Config::new());
    let mut backend = Z3Backend::new(&ctx, false);

    let x = backend.fresh_real("x");
    let breakpoints = piecewise::delta_t_breakpoints(1.0);
    let pieces: Vec<_> = (0..breakpoints.len() - 1)
        .map(|_| piecewise::LinearPiece::diagonal())
        .collect();
    let y = piecewise::declare(&mut backend, "y", RealExpr::from(x), &breakpoints, &pieces)
        .expect("well-formed envelope");

    // Pin x inside the third interval, [0.5, 0.75].
    backend.assert(RealExpr::from(x).eq_expr(RealExpr::konst(Rational::new(6, 10))));
    let counterexample = RealExpr::from(y).lt(RealExpr::from(x));
    backend.assert(counterexample);

    match backend.check().expect("check should not error") {
        SatOutcome::Unsat(_) => {}
        other => panic!("expected unsat, got {other:?}"),
    }
}

#[test]
fn a_minus_l_monotone() {
    let mut b = builder(Params::default());
    let t = b.vars().t() / 2;
    let prev = &b.vars().obs[t - 1];
    let cur = &b.vars().obs[t];
    let prev_level = RealExpr::from(prev.a) - RealExpr::from(prev.l);
    let cur_level = RealExpr::from(cur.a) - RealExpr::from(cur.l);
    let counterexample = cur_level.lt(prev_level);
    let result = b
        .query_with(vec![counterexample])
        .expect("query should not error");
    assert!(matches!(result, QueryResult::Unsat(_)));
}

#[test]
fn aggregate_equals_sum_of_flows() {
    let params = Params {
        f: 2,
        ..Params::default()
    };
    let mut b = builder(params);
    let obs = &b.vars().obs[3];
    let sum_a = RealExpr::from(obs.flows[0].a) + RealExpr::from(obs.flows[1].a);
    let counterexample = !RealExpr::from(obs.a).eq_expr(sum_a);
    let result = b
        .query_with(vec![counterexample])
        .expect("query should not error");
    assert!(matches!(result, QueryResult::Unsat(_)));
}

#[test]
fn service_never_exceeds_arrivals_minus_loss() {
    let mut b = builder(Params::default());
    let obs = &b.vars().obs[5];
    let counterexample = RealExpr::from(obs.s).gt(RealExpr::from(obs.a) - RealExpr::from(obs.l));
    let result = b
        .query_with(vec![counterexample])
        .expect("query should not error");
    assert!(matches!(result, QueryResult::Unsat(_)));
}

#[test]
fn observed_loss_never_exceeds_loss() {
    let mut b = builder(Params::default());
    let flow = b.vars().obs[4].flows[0];
    let counterexample = RealExpr::from(flow.l_d).gt(RealExpr::from(flow.l));
    let result = b
        .query_with(vec![counterexample])
        .expect("query should not error");
    assert!(matches!(result, QueryResult::Unsat(_)));
}

#[test]
fn fifo_consistency_holds_with_two_flows() {
    let params = Params {
        f: 2,
        ..Params::default()
    };
    let mut b = builder(params);
    let t = 5;
    let pt = 2;
    let obs_t = &b.vars().obs[t];
    let obs_pt = &b.vars().obs[pt];

    let aggregate_eq = RealExpr::from(obs_t.s)
        .eq_expr(RealExpr::from(obs_pt.a) - RealExpr::from(obs_pt.l));
    let per_flow_mismatch = !RealExpr::from(obs_t.flows[0].s)
        .eq_expr(RealExpr::from(obs_pt.flows[0].a) - RealExpr::from(obs_pt.flows[0].l));

    let result = b
        .query_with(vec![aggregate_eq, per_flow_mismatch])
        .expect("query should not error");
    assert!(matches!(result, QueryResult::Unsat(_)));
}

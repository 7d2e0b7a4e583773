//! Illustration only, not a CLI surface: runs seed scenario E1 from the
//! testable-properties list against the bundled Z3 backend and prints the
//! resulting trace. `cargo run --example seed_scenarios`.

use ccac::{BoolExpr, ModelBuilder, Params, QueryResult, Rational, RealExpr, Z3Backend};
use tracing::info;
use z3::Context;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let params = Params::default();
    let ctx = Context::new(&z3::Config::new());
    let backend = Z3Backend::new(&ctx, params.unsat_core);

    let mut builder = ModelBuilder::new(backend, params).expect("default params are valid");

    let t_last = builder.vars().obs.len() - 1;
    let mut extra: Vec<BoolExpr> = Vec::new();

    extra.push(
        RealExpr::from(builder.vars().obs[t_last].time).ge(RealExpr::konst(Rational::new(5, 1))),
    );
    for obs in &builder.vars().obs {
        let flow = obs.flows[0];
        extra.push(RealExpr::from(flow.cwnd).eq_expr(RealExpr::konst(Rational::ONE)));
        extra.push(RealExpr::from(flow.rate).eq_expr(RealExpr::konst(Rational::new(1, 2))));
    }

    match builder.query_with(extra).expect("query should not error") {
        QueryResult::Sat(trace) => {
            info!(observations = trace.obs.len(), "scenario E1: sat");
            for (t, obs) in trace.obs.iter().enumerate() {
                println!(
                    "t={t} time={:?} W={:?} A={:?} S={:?} L={:?}",
                    obs.time, obs.w, obs.a, obs.s, obs.l
                );
            }
        }
        QueryResult::Unsat(core) => {
            println!("scenario E1: unsat (unexpected) core={core:?}");
        }
        QueryResult::Unknown => {
            println!("scenario E1: solver returned unknown");
        }
    }
}

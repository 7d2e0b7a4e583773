//! Composition and the query entry point — §4.7/§4.8.
//!
//! [`ModelBuilder`] is the single place that owns a solver backend end to
//! end: it declares the trace, emits every invariant in the fixed order
//! the spec lays out (structural first, then network, then controller),
//! and exposes `query`/`query_with` to run the satisfiability check and
//! read a witness back into a plain [`TraceRecord`].

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::controller;
use crate::error::Error;
use crate::expr::{BoolExpr, Rational};
use crate::history::HistoryCache;
use crate::network::{self, DeltaTs};
use crate::params::Params;
use crate::piecewise;
use crate::solver::{Model, SatOutcome, SolverBackend, UnsatCore};
use crate::vars::{self, TraceVars};

/// A flow's state at one observation, read back from a satisfying model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowRecord {
    pub a: Rational,
    pub s: Rational,
    pub l: Rational,
    pub l_d: Rational,
    pub rtt: Rational,
    pub rate: Rational,
    pub cwnd: Rational,
}

/// One observation's aggregates plus every flow's [`FlowRecord`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObsRecord {
    pub time: Rational,
    pub w: Rational,
    pub a: Rational,
    pub s: Rational,
    pub l: Rational,
    pub flows: Vec<FlowRecord>,
}

/// A full trace read back from a satisfying model, plus the optional
/// `buf`/`epsilon` values and, for debugging, which `Δt` piece was active
/// at each gap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceRecord {
    pub obs: Vec<ObsRecord>,
    pub buf: Option<Rational>,
    pub epsilon: Option<Rational>,
    /// `delta_t_pieces[i]` is the interval index active for `Δt[i+1]`.
    pub delta_t_pieces: Vec<usize>,
}

/// The outcome of a [`ModelBuilder::query`].
#[derive(Debug)]
pub enum QueryResult {
    Sat(TraceRecord),
    Unsat(Option<UnsatCore>),
    Unknown,
}

/// Owns one solver backend's worth of declared variables and emitted
/// constraints for one parameter block.
pub struct ModelBuilder<B: SolverBackend> {
    params: Params,
    backend: B,
    vars: TraceVars,
    delta_ts: DeltaTs,
}

impl<B: SolverBackend> ModelBuilder<B> {
    /// Validate `params`, declare the trace, and emit every invariant.
    /// Fails only on [`crate::params::ConfigError`] — nothing is allocated
    /// on the backend until validation passes.
    pub fn new(mut backend: B, params: Params) -> Result<Self, Error> {
        params.validate()?;
        info!(
            c = params.c,
            r = params.r,
            d = params.d,
            t = params.t,
            f = params.f,
            compose = params.compose,
            inf_buf = params.inf_buf,
            "building trace model"
        );

        let vars = vars::declare(&mut backend, &params);
        let delta_ts = network::declare_delta_ts(&mut backend, &params, &vars);
        let mut history = HistoryCache::new(params.d, params.r);
        network::emit(&mut backend, &params, &vars, &mut history);
        controller::emit(&mut backend, &params, &vars, &mut history, &delta_ts);

        debug!(
            reals = estimate_real_var_count(&params),
            "emitted all structural, network, and controller constraints"
        );

        Ok(ModelBuilder {
            params,
            backend,
            vars,
            delta_ts,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The declared variable handles, for callers who want to pin or query
    /// extra constraints against specific flows/observations.
    pub fn vars(&self) -> &TraceVars {
        &self.vars
    }

    /// Run the satisfiability check against everything emitted so far.
    pub fn query(&mut self) -> Result<QueryResult, Error> {
        match self.backend.check()? {
            SatOutcome::Sat(model) => {
                info!("query result: sat");
                let record = extract(&self.vars, &self.delta_ts, &model)?;
                Ok(QueryResult::Sat(record))
            }
            SatOutcome::Unsat(core) => {
                info!(has_core = core.is_some(), "query result: unsat");
                Ok(QueryResult::Unsat(core))
            }
            SatOutcome::Unknown => {
                warn!("query result: unknown (solver resource limit reached)");
                Ok(QueryResult::Unknown)
            }
        }
    }

    /// As [`Self::query`], but first asserts `extra` caller-supplied
    /// constraints (e.g. pinning `time[T-1] >= 5`).
    pub fn query_with(&mut self, extra: Vec<BoolExpr>) -> Result<QueryResult, Error> {
        for (i, constraint) in extra.into_iter().enumerate() {
            self.backend.assert_labeled(&format!("extra_{i}"), constraint);
        }
        self.query()
    }
}

fn estimate_real_var_count(params: &Params) -> usize {
    let per_obs = 5 + params.f * 7;
    let mut total = params.t * per_obs;
    total += params.t.saturating_sub(1); // delta_t witnesses
    total += params.t.saturating_sub(1) * params.f; // rate-envelope products
    if !params.compose {
        total += 1;
    }
    if !params.inf_buf {
        total += 1;
    }
    total
}

fn extract(vars: &TraceVars, delta_ts: &DeltaTs, model: &Model) -> Result<TraceRecord, Error> {
    let mut obs = Vec::with_capacity(vars.t());
    for o in &vars.obs {
        let mut flows = Vec::with_capacity(o.flows.len());
        for fl in &o.flows {
            flows.push(FlowRecord {
                a: model.get(fl.a)?,
                s: model.get(fl.s)?,
                l: model.get(fl.l)?,
                l_d: model.get(fl.l_d)?,
                rtt: model.get(fl.rtt)?,
                rate: model.get(fl.rate)?,
                cwnd: model.get(fl.cwnd)?,
            });
        }
        obs.push(ObsRecord {
            time: model.get(o.time)?,
            w: model.get(o.w)?,
            a: model.get(o.a)?,
            s: model.get(o.s)?,
            l: model.get(o.l)?,
            flows,
        });
    }

    let buf = vars.buf.map(|b| model.get(b)).transpose()?;
    let epsilon = vars.epsilon.map(|e| model.get(e)).transpose()?;

    let mut delta_t_pieces = Vec::with_capacity(vars.t().saturating_sub(1));
    for t in 1..vars.t() {
        let value = model.get(delta_ts.get(t))?;
        delta_t_pieces.push(piecewise::active_piece(&delta_ts.breakpoints, value).unwrap_or(usize::MAX));
    }

    Ok(TraceRecord {
        obs,
        buf,
        epsilon,
        delta_t_pieces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::RealVar;
    use crate::solver::BackendError;
    use std::collections::HashMap;

    /// A backend that always reports `Unknown`, used to check that
    /// `ModelBuilder` surfaces it without retrying.
    struct UnknownBackend {
        next_id: u32,
    }
    impl SolverBackend for UnknownBackend {
        fn fresh_real(&mut self, _name: &str) -> RealVar {
            let id = RealVar(self.next_id);
            self.next_id += 1;
            id
        }
        fn assert(&mut self, _c: BoolExpr) {}
        fn assert_labeled(&mut self, _l: &str, _c: BoolExpr) {}
        fn check(&mut self) -> Result<SatOutcome, BackendError> {
            Ok(SatOutcome::Unknown)
        }
    }

    #[test]
    fn rejects_invalid_params_before_allocating() {
        let mut params = Params::default();
        params.t = 1;
        let backend = UnknownBackend { next_id: 0 };
        let err = ModelBuilder::new(backend, params).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_outcome_is_surfaced_verbatim() {
        let backend = UnknownBackend { next_id: 0 };
        let mut builder = ModelBuilder::new(backend, Params::default()).unwrap();
        let result = builder.query().unwrap();
        assert!(matches!(result, QueryResult::Unknown));
    }

    #[test]
    fn estimate_matches_manual_count_for_defaults() {
        let params = Params::default();
        // T=10, F=1: 10*(5+7) + 9 delta_ts + 9 products = 120+9+9 = 138
        assert_eq!(estimate_real_var_count(&params), 138);
    }

    #[test]
    fn sat_outcome_with_missing_variable_surfaces_model_error() {
        struct SatButEmptyBackend {
            next_id: u32,
        }
        impl SolverBackend for SatButEmptyBackend {
            fn fresh_real(&mut self, _name: &str) -> RealVar {
                let id = RealVar(self.next_id);
                self.next_id += 1;
                id
            }
            fn assert(&mut self, _c: BoolExpr) {}
            fn assert_labeled(&mut self, _l: &str, _c: BoolExpr) {}
            fn check(&mut self) -> Result<SatOutcome, BackendError> {
                Ok(SatOutcome::Sat(Model::new(HashMap::new(), HashMap::new())))
            }
        }
        let backend = SatButEmptyBackend { next_id: 0 };
        let mut builder = ModelBuilder::new(backend, Params::default()).unwrap();
        let err = builder.query().unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }
}

//! Solver facade — the trait boundary between the model and an LRA solver.
//!
//! [`SolverBackend`] is deliberately the *only* thing `vars`, `piecewise`,
//! `network`, `controller`, and `model` depend on. None of those modules
//! import a concrete SMT library; they build [`crate::expr::BoolExpr`]
//! trees and hand them to whatever implements this trait. The `z3-backend`
//! feature supplies one concrete implementation so the crate is runnable
//! end to end without a caller bringing their own binding.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use crate::expr::{BoolExpr, Rational, RealVar};

/// Errors the concrete solver library can raise while discharging a query,
/// distinct from an ordinary `unsat`/`unknown` verdict (those are
/// [`SatOutcome`] variants, not errors).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("solver backend error: {0}")]
    Backend(String),
}

/// Raised when a satisfying model is missing a value for a variable the
/// model builder declared. Per the error-handling design, this is surfaced
/// rather than papered over with a default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("model is missing a value for declared variable `{0}`")]
    MissingVariable(String),
}

/// A satisfying assignment: every declared [`RealVar`] mapped to an exact
/// rational. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Model {
    values: HashMap<RealVar, Rational>,
    names: HashMap<RealVar, String>,
}

impl Model {
    pub fn new(values: HashMap<RealVar, Rational>, names: HashMap<RealVar, String>) -> Self {
        Model { values, names }
    }

    /// Look up the value of `var`. Returns [`ModelError::MissingVariable`]
    /// rather than substituting a default if the backend's model omitted it
    /// — a known quirk of some solver bindings.
    pub fn get(&self, var: RealVar) -> Result<Rational, ModelError> {
        self.values.get(&var).copied().ok_or_else(|| {
            let name = self
                .names
                .get(&var)
                .cloned()
                .unwrap_or_else(|| format!("{var:?}"));
            ModelError::MissingVariable(name)
        })
    }
}

/// An unsat core: the labels of the top-level assertions the solver used to
/// derive unsatisfiability. Only populated when `unsat_core` was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatCore(pub Vec<String>);

/// The three-way verdict a satisfiability check can return.
#[derive(Debug, Clone)]
pub enum SatOutcome {
    /// The constraints are jointly satisfiable; carries the witness model.
    Sat(Model),
    /// Jointly infeasible; carries an unsat core if the backend was asked
    /// to track one.
    Unsat(Option<UnsatCore>),
    /// The backend could not decide within its resource budget. Surfaced
    /// verbatim; the core never retries on the caller's behalf.
    Unknown,
}

/// The trait boundary every model-construction module talks to.
///
/// Implementors own a solver context (and therefore a lifetime/resource
/// scope equal to one query, per the concurrency model): variables are
/// allocated once and never deleted, constraints are appended, and
/// `check` may be called exactly once per query (calling it again after
/// adding more constraints is fine and just re-solves).
pub trait SolverBackend {
    /// Allocate a fresh real variable. `name` need not be unique on its own
    /// — callers are expected to thread a naming prefix through the
    /// observation/flow hierarchy (see `vars::declare`) so the backend can
    /// still disambiguate, but implementations must not silently collide
    /// two different variables onto the same solver symbol.
    fn fresh_real(&mut self, name: &str) -> RealVar;

    /// Add an unlabeled constraint.
    fn assert(&mut self, constraint: BoolExpr);

    /// Add a constraint labeled for unsat-core extraction. Implementations
    /// that don't support unsat cores (or when the backend wasn't
    /// configured to track one) may treat this identically to `assert`.
    fn assert_labeled(&mut self, label: &str, constraint: BoolExpr);

    /// Run the satisfiability check.
    fn check(&mut self) -> Result<SatOutcome, BackendError>;
}

#[cfg(feature = "z3-backend")]
pub mod z3_backend {
    //! Concrete [`SolverBackend`] over the `z3` crate's Z3 bindings.
    //!
    //! Translation is purely structural: [`crate::expr::RealExpr`] and
    //! [`crate::expr::BoolExpr`] trees are lowered to Z3 ASTs node by node,
    //! with no algebraic simplification (the solver does that). Rational
    //! constants are passed through as exact Z3 reals, so nothing here
    //! reintroduces floating point.

    use super::*;
    use crate::expr::RealExpr;
    use z3::ast::{Ast, Bool as Z3Bool, Real as Z3Real};
    use z3::{Context, SatResult as Z3SatResult, Solver};

    /// Z3-backed implementation of [`SolverBackend`]. Owns the [`Solver`]
    /// and a name/value table for every variable it has allocated; the
    /// borrowed [`Context`] outlives the backend, matching the crate's
    /// one-scope-per-query resource model.
    pub struct Z3Backend<'ctx> {
        ctx: &'ctx Context,
        solver: Solver<'ctx>,
        next_id: u32,
        names: HashMap<RealVar, String>,
        reals: HashMap<RealVar, Z3Real<'ctx>>,
        track_unsat_core: bool,
    }

    impl<'ctx> Z3Backend<'ctx> {
        pub fn new(ctx: &'ctx Context, track_unsat_core: bool) -> Self {
            Z3Backend {
                ctx,
                solver: Solver::new(ctx),
                next_id: 0,
                names: HashMap::new(),
                reals: HashMap::new(),
                track_unsat_core,
            }
        }

        fn lower_real(&self, e: &RealExpr) -> Z3Real<'ctx> {
            match e {
                RealExpr::Var(v) => self
                    .reals
                    .get(v)
                    .expect("RealVar used before it was declared on this backend")
                    .clone(),
                RealExpr::Const(r) => {
                    Z3Real::from_real(self.ctx, r.numerator() as i32, r.denominator() as i32)
                }
                RealExpr::Add(a, b) => {
                    Z3Real::add(self.ctx, &[&self.lower_real(a), &self.lower_real(b)])
                }
                RealExpr::Sub(a, b) => {
                    Z3Real::sub(self.ctx, &[&self.lower_real(a), &self.lower_real(b)])
                }
                RealExpr::Scale(k, inner) => {
                    let c = Z3Real::from_real(self.ctx, k.numerator() as i32, k.denominator() as i32);
                    Z3Real::mul(self.ctx, &[&c, &self.lower_real(inner)])
                }
            }
        }

        fn lower_bool(&self, e: &BoolExpr) -> Z3Bool<'ctx> {
            match e {
                BoolExpr::True => Z3Bool::from_bool(self.ctx, true),
                BoolExpr::False => Z3Bool::from_bool(self.ctx, false),
                BoolExpr::Le(a, b) => self.lower_real(a).le(&self.lower_real(b)),
                BoolExpr::Lt(a, b) => self.lower_real(a).lt(&self.lower_real(b)),
                BoolExpr::Eq(a, b) => self.lower_real(a)._eq(&self.lower_real(b)),
                BoolExpr::And(terms) => {
                    let lowered: Vec<Z3Bool<'ctx>> = terms.iter().map(|t| self.lower_bool(t)).collect();
                    let refs: Vec<&Z3Bool<'ctx>> = lowered.iter().collect();
                    Z3Bool::and(self.ctx, &refs)
                }
                BoolExpr::Or(terms) => {
                    let lowered: Vec<Z3Bool<'ctx>> = terms.iter().map(|t| self.lower_bool(t)).collect();
                    let refs: Vec<&Z3Bool<'ctx>> = lowered.iter().collect();
                    Z3Bool::or(self.ctx, &refs)
                }
                BoolExpr::Not(inner) => self.lower_bool(inner).not(),
                BoolExpr::Implies(a, b) => self.lower_bool(a).implies(&self.lower_bool(b)),
            }
        }
    }

    impl<'ctx> SolverBackend for Z3Backend<'ctx> {
        fn fresh_real(&mut self, name: &str) -> RealVar {
            let id = RealVar(self.next_id);
            self.next_id += 1;
            let full_name = format!("{name}${}", id.0);
            let real = Z3Real::new_const(self.ctx, full_name.clone());
            self.reals.insert(id, real);
            self.names.insert(id, full_name);
            id
        }

        fn assert(&mut self, constraint: BoolExpr) {
            let lowered = self.lower_bool(&constraint);
            self.solver.assert(&lowered);
        }

        fn assert_labeled(&mut self, label: &str, constraint: BoolExpr) {
            if !self.track_unsat_core {
                self.assert(constraint);
                return;
            }
            let lowered = self.lower_bool(&constraint);
            let tracker = Z3Bool::new_const(self.ctx, format!("label!{label}"));
            self.solver.assert_and_track(&lowered, &tracker);
        }

        fn check(&mut self) -> Result<SatOutcome, BackendError> {
            match self.solver.check() {
                Z3SatResult::Sat => {
                    let model = self
                        .solver
                        .get_model()
                        .ok_or_else(|| BackendError::Backend("sat result but no model".into()))?;
                    let mut values = HashMap::with_capacity(self.reals.len());
                    for (id, real) in &self.reals {
                        let evaluated = model.eval(real, true).ok_or_else(|| {
                            BackendError::Backend(format!(
                                "model did not evaluate variable {:?}",
                                self.names.get(id)
                            ))
                        })?;
                        let (num, den) = evaluated.as_real().ok_or_else(|| {
                            BackendError::Backend("model value was not a rational real".into())
                        })?;
                        values.insert(*id, Rational::new(num, den));
                    }
                    Ok(SatOutcome::Sat(Model::new(values, self.names.clone())))
                }
                Z3SatResult::Unsat => {
                    let core = if self.track_unsat_core {
                        Some(UnsatCore(
                            self.solver
                                .get_unsat_core()
                                .iter()
                                .map(|b| b.to_string())
                                .collect(),
                        ))
                    } else {
                        None
                    };
                    Ok(SatOutcome::Unsat(core))
                }
                Z3SatResult::Unknown => Ok(SatOutcome::Unknown),
            }
        }
    }
}

//! Crate root: public surface and module wiring for a fluid-model SMT
//! encoding of congestion-controlled network links.
//!
//! This module is the single canonical entry point for downstream users.
//! It re-exports the parameter block, the expression algebra, the solver
//! facade, and the [`model::ModelBuilder`] that composes every invariant
//! into one query.
//!
//! ## Invariants
//!
//! - **Linear arithmetic only.** [`expr::RealExpr`] never multiplies two
//!   unknowns together; every product of two free variables (`Δt·rate`) is
//!   routed through [`piecewise::declare_product`]'s bound-based
//!   linearization instead. The model never leaves LRA.
//! - **Exact rationals.** Configuration scalars and piecewise breakpoints
//!   enter the solver as [`expr::Rational`]s via continued-fraction
//!   approximation; floating point never reaches a constraint.
//! - **Backend independence.** `vars`, `piecewise`, `network`, `controller`,
//!   and `model` depend only on the [`solver::SolverBackend`] trait. The
//!   `z3-backend` feature supplies one concrete implementation so the
//!   crate is runnable without a caller bringing their own binding.
//!
//! Failure modes are precise errors (see [`error::Error`]), never a
//! silently wrong model.

#![forbid(unsafe_code)]

/// Crate-wide error type unifying every module's structured error.
pub mod error;
/// Parameter block (`Params`) and its validation.
pub mod params;
/// Real-valued expression algebra (`RealExpr`/`BoolExpr`/`Rational`).
pub mod expr;
/// Solver facade trait and the optional Z3-backed implementation.
pub mod solver;
/// State declaration: allocates the trace's symbolic variables.
pub mod vars;
/// Piecewise-linear multiplier, used for `Δt` and `Δt·rate` linearization.
pub mod piecewise;
/// Memoized "D/R seconds ago" existence disjunctions shared by `network`
/// and `controller`.
pub mod history;
/// Network invariants: physical law, capacity, propagation delay, FIFO.
pub mod network;
/// Controller coupling: rate/window envelopes and loss-delay/RTT inference.
pub mod controller;
/// Composition and the query entry point.
pub mod model;

pub use error::Error;
pub use expr::{and_all, or_all, BoolExpr, Rational, RealExpr, RealVar};
pub use model::{FlowRecord, ModelBuilder, ObsRecord, QueryResult, TraceRecord};
pub use params::{ConfigError, Params};
pub use solver::{BackendError, Model, ModelError, SatOutcome, SolverBackend, UnsatCore};
pub use vars::{FlowIdx, FlowState, ObsIdx, ObsState, TraceVars};

#[cfg(feature = "z3-backend")]
pub use solver::z3_backend::Z3Backend;

//! Parameter block — immutable scalar configuration for a trace model.
//!
//! Mirrors the historical source's `Config` class: a small struct of
//! defaults plus a single `validate` gate that must pass before any
//! symbol is allocated. Nothing downstream re-checks these invariants;
//! `Params::validate` is the one place they're asserted.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Immutable configuration for one model instance.
///
/// All quantities are plain `f64`s at the API boundary; they are converted
/// to exact [`crate::expr::Rational`] constants (see
/// [`crate::expr::Rational::approx`]) wherever they enter a constraint, so
/// the solver never sees floating point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Link capacity `C` (data units per time unit). Must be positive.
    pub c: f64,
    /// Propagation delay `R`. Must be positive.
    pub r: f64,
    /// Maximum inter-observation gap `D`. Must be positive.
    pub d: f64,
    /// Number of observation points `T`. Must be at least 2.
    pub t: usize,
    /// Number of flows `F`. Must be at least 1.
    pub f: usize,
    /// Selects the waste-vs-arrival regime (see module `network`).
    pub compose: bool,
    /// Whether the link has an infinite buffer (no loss).
    pub inf_buf: bool,
    /// Fixed buffer size, meaningful only when `inf_buf` is false. `None`
    /// leaves the buffer symbolic (solver-chosen, still `> 0`).
    pub buf_size: Option<f64>,
    /// Whether to label every top-level assertion so an `Unsat` result can
    /// carry an unsat core. Off by default since it slows assertion.
    pub unsat_core: bool,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            c: 1.0,
            r: 1.0,
            d: 1.0,
            t: 10,
            f: 1,
            compose: true,
            inf_buf: true,
            buf_size: None,
            unsat_core: false,
        }
    }
}

/// Reasons a [`Params`] block is unusable. Rejected before any solver
/// variable is allocated; a model is never partially built on bad config.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("link capacity C must be positive (got {0})")]
    NonPositiveCapacity(String),
    #[error("propagation delay R must be positive (got {0})")]
    NonPositiveDelay(String),
    #[error("max inter-observation gap D must be positive (got {0})")]
    NonPositiveGap(String),
    #[error("observation count T must be at least 2 (got {0})")]
    TooFewObservations(usize),
    #[error("flow count F must be at least 1 (got {0})")]
    NoFlows,
    #[error("inf_buf is set but a buf_size was also supplied")]
    InfiniteBufferWithSize,
    #[error("buf_size must be positive when supplied (got {0})")]
    NonPositiveBufferSize(String),
}

impl Params {
    /// Sanity-check this block. Should be called and its result asserted
    /// before constructing a model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.c > 0.0) {
            return Err(ConfigError::NonPositiveCapacity(self.c.to_string()));
        }
        if !(self.r > 0.0) {
            return Err(ConfigError::NonPositiveDelay(self.r.to_string()));
        }
        if !(self.d > 0.0) {
            return Err(ConfigError::NonPositiveGap(self.d.to_string()));
        }
        if self.t < 2 {
            return Err(ConfigError::TooFewObservations(self.t));
        }
        if self.f < 1 {
            return Err(ConfigError::NoFlows);
        }
        if self.inf_buf && self.buf_size.is_some() {
            return Err(ConfigError::InfiniteBufferWithSize);
        }
        if let Some(b) = self.buf_size {
            if !(b > 0.0) {
                return Err(ConfigError::NonPositiveBufferSize(b.to_string()));
            }
        }
        Ok(())
    }
}

//! Piecewise-linear multiplier — linearizing a product of two unknowns.
//!
//! Contract (see module docs in the full design): given an expression `x`,
//! a strictly increasing partition of breakpoints, and a lower/upper
//! envelope pair of linear pieces on each interval, produce a fresh
//! variable `y` that lies between the envelopes evaluated at `x` in every
//! satisfying model, with `x` itself bounded to `[b0, bk]`.
//!
//! This crate uses it for exactly one purpose: representing `Δt[t] =
//! time[t] - time[t-1]` over the partition `{0, 0.25D, 0.5D, 0.75D, D}` with
//! the *diagonal* envelope (`y = x` on every piece). The indirection isn't
//! approximating `Δt` — it's exposing a variable the solver can multiply by
//! a rate without leaving linear arithmetic: picking which interval `x`
//! falls in fixes a single linear piece.

#![forbid(unsafe_code)]

use crate::expr::{or_all, Rational, RealExpr, RealVar};
use crate::solver::SolverBackend;

/// A single interval's lower/upper envelope, `slope * x + intercept` each.
#[derive(Clone, Copy, Debug)]
pub struct LinearPiece {
    pub lower_slope: Rational,
    pub lower_intercept: Rational,
    pub upper_slope: Rational,
    pub upper_intercept: Rational,
}

impl LinearPiece {
    /// The envelope used for `Δt`: `y = x` exactly, both bounds coincide.
    pub fn diagonal() -> Self {
        LinearPiece {
            lower_slope: Rational::ONE,
            lower_intercept: Rational::ZERO,
            upper_slope: Rational::ONE,
            upper_intercept: Rational::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PiecewiseError {
    #[error("a piecewise envelope needs at least two breakpoints (got {0})")]
    TooFewBreakpoints(usize),
    #[error("expected {breakpoints}-1={expected} pieces, got {got}")]
    PieceCountMismatch {
        breakpoints: usize,
        expected: usize,
        got: usize,
    },
    #[error("breakpoints must be strictly increasing")]
    BreakpointsNotIncreasing,
}

/// Declare a piecewise variable `y` for `x` over `breakpoints`/`pieces`.
///
/// Emits: `b0 <= x <= bk`; for each interval `i`, `guard_i => lower_i(x) <=
/// y <= upper_i(x)` where `guard_i` is `b_i <= x <= b_{i+1}`; and coverage
/// `Or(guard_i for all i)` so some piece is always selected. The active
/// piece isn't tracked by a dedicated solver variable — it's recovered
/// post-hoc from the extracted value of `x` against `breakpoints` (see
/// [`active_piece`]), which is all a model reader needs.
pub fn declare(
    backend: &mut dyn SolverBackend,
    name: &str,
    x: RealExpr,
    breakpoints: &[Rational],
    pieces: &[LinearPiece],
) -> Result<RealVar, PiecewiseError> {
    if breakpoints.len() < 2 {
        return Err(PiecewiseError::TooFewBreakpoints(breakpoints.len()));
    }
    if pieces.len() + 1 != breakpoints.len() {
        return Err(PiecewiseError::PieceCountMismatch {
            breakpoints: breakpoints.len(),
            expected: breakpoints.len() - 1,
            got: pieces.len(),
        });
    }
    for w in breakpoints.windows(2) {
        if !(w[1] > w[0]) {
            return Err(PiecewiseError::BreakpointsNotIncreasing);
        }
    }

    let y = backend.fresh_real(name);
    let y_expr = RealExpr::from(y);

    backend.assert_labeled(
        &format!("{name}_lo"),
        x.clone().ge(RealExpr::konst(breakpoints[0])),
    );
    backend.assert_labeled(
        &format!("{name}_hi"),
        x.clone().le(RealExpr::konst(breakpoints[breakpoints.len() - 1])),
    );

    let mut guards = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let lo = breakpoints[i];
        let hi = breakpoints[i + 1];
        let guard = x.clone().ge(RealExpr::konst(lo)) & x.clone().le(RealExpr::konst(hi));

        let lower_bound = x.clone() * piece.lower_slope + RealExpr::konst(piece.lower_intercept);
        let upper_bound = x.clone() * piece.upper_slope + RealExpr::konst(piece.upper_intercept);

        backend.assert_labeled(
            &format!("{name}_piece{i}_lower"),
            guard.clone().implies(y_expr.clone().ge(lower_bound)),
        );
        backend.assert_labeled(
            &format!("{name}_piece{i}_upper"),
            guard.clone().implies(y_expr.clone().le(upper_bound)),
        );
        guards.push(guard);
    }
    backend.assert_labeled(&format!("{name}_coverage"), or_all(guards));

    Ok(y)
}

/// The standard partition used for `Δt[t]` over `[0, D]`.
pub fn delta_t_breakpoints(d: f64) -> Vec<Rational> {
    let d = Rational::approx(d, 1_000_000);
    vec![
        Rational::ZERO,
        d * Rational::new(1, 4),
        d * Rational::new(1, 2),
        d * Rational::new(3, 4),
        d,
    ]
}

/// Declare a piecewise-linearized product `selector * multiplicand`, where
/// `selector` (here always `Δt[t]`) ranges over `breakpoints` and
/// `multiplicand` (here always a flow's `rate`) is an unconstrained linear
/// expression assumed non-negative.
///
/// This is the construction the rate envelope actually needs: `Δt[t] *
/// rate[t-1,f]` is bilinear in two unknowns, which [`declare`] alone can't
/// express (its envelope is a function of `x` only). Instead, on each
/// interval `[lo, hi]` of `selector`'s partition, `lo * multiplicand <=
/// selector * multiplicand <= hi * multiplicand` — a sound bound because
/// `multiplicand >= 0`, and linear because `lo`/`hi` are constants fixed by
/// the breakpoint partition, not by the solver's choice of `multiplicand`.
pub fn declare_product(
    backend: &mut dyn SolverBackend,
    name: &str,
    selector: RealExpr,
    breakpoints: &[Rational],
    multiplicand: RealExpr,
) -> Result<RealVar, PiecewiseError> {
    if breakpoints.len() < 2 {
        return Err(PiecewiseError::TooFewBreakpoints(breakpoints.len()));
    }
    for w in breakpoints.windows(2) {
        if !(w[1] > w[0]) {
            return Err(PiecewiseError::BreakpointsNotIncreasing);
        }
    }

    let y = backend.fresh_real(name);
    let y_expr = RealExpr::from(y);

    backend.assert_labeled(
        &format!("{name}_lo"),
        selector.clone().ge(RealExpr::konst(breakpoints[0])),
    );
    backend.assert_labeled(
        &format!("{name}_hi"),
        selector.clone().le(RealExpr::konst(breakpoints[breakpoints.len() - 1])),
    );

    let mut guards = Vec::with_capacity(breakpoints.len() - 1);
    for i in 0..breakpoints.len() - 1 {
        let lo = breakpoints[i];
        let hi = breakpoints[i + 1];
        let guard =
            selector.clone().ge(RealExpr::konst(lo)) & selector.clone().le(RealExpr::konst(hi));

        let lower = multiplicand.clone() * lo;
        let upper = multiplicand.clone() * hi;

        backend.assert_labeled(
            &format!("{name}_piece{i}_lower"),
            guard.clone().implies(y_expr.clone().ge(lower)),
        );
        backend.assert_labeled(
            &format!("{name}_piece{i}_upper"),
            guard.clone().implies(y_expr.clone().le(upper)),
        );
        guards.push(guard);
    }
    backend.assert_labeled(&format!("{name}_coverage"), or_all(guards));

    Ok(y)
}

/// Post-hoc: which interval (by lower index) does `x` fall in, given the
/// same breakpoints used at declaration time. Returns `None` if `x` falls
/// outside `[b0, bk]` (shouldn't happen in any valid model).
pub fn active_piece(breakpoints: &[Rational], x: Rational) -> Option<usize> {
    for i in 0..breakpoints.len().saturating_sub(1) {
        if x >= breakpoints[i] && x <= breakpoints[i + 1] {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BackendError, Model, SatOutcome};
    use std::collections::HashMap;

    struct RecordingBackend {
        next_id: u32,
        asserted: Vec<crate::expr::BoolExpr>,
    }
    impl SolverBackend for RecordingBackend {
        fn fresh_real(&mut self, _name: &str) -> RealVar {
            let id = RealVar(self.next_id);
            self.next_id += 1;
            id
        }
        fn assert(&mut self, constraint: crate::expr::BoolExpr) {
            self.asserted.push(constraint);
        }
        fn assert_labeled(&mut self, _label: &str, constraint: crate::expr::BoolExpr) {
            self.assert(constraint)
        }
        fn check(&mut self) -> Result<SatOutcome, BackendError> {
            Ok(SatOutcome::Sat(Model::new(HashMap::new(), HashMap::new())))
        }
    }

    #[test]
    fn rejects_malformed_partitions() {
        let mut backend = RecordingBackend {
            next_id: 0,
            asserted: Vec::new(),
        };
        let x = RealVar(99).expr();
        assert!(matches!(
            declare(&mut backend, "y", x.clone(), &[Rational::ZERO], &[]),
            Err(PiecewiseError::TooFewBreakpoints(1))
        ));
        assert!(matches!(
            declare(
                &mut backend,
                "y",
                x.clone(),
                &[Rational::ZERO, Rational::ONE],
                &[LinearPiece::diagonal(), LinearPiece::diagonal()]
            ),
            Err(PiecewiseError::PieceCountMismatch { .. })
        ));
        assert!(matches!(
            declare(
                &mut backend,
                "y",
                x,
                &[Rational::ONE, Rational::ZERO],
                &[LinearPiece::diagonal()]
            ),
            Err(PiecewiseError::BreakpointsNotIncreasing)
        ));
    }

    #[test]
    fn declares_one_variable_and_asserts_envelope() {
        let mut backend = RecordingBackend {
            next_id: 0,
            asserted: Vec::new(),
        };
        let x = RealVar(0).expr();
        let bps = delta_t_breakpoints(1.0);
        let pieces: Vec<_> = (0..bps.len() - 1).map(|_| LinearPiece::diagonal()).collect();
        let y = declare(&mut backend, "delta_t1", x, &bps, &pieces).unwrap();
        assert_eq!(y, RealVar(1));
        // bounds + 2 per piece * 4 pieces + coverage = 2 + 8 + 1
        assert_eq!(backend.asserted.len(), 11);
    }

    #[test]
    fn declare_product_bounds_every_interval() {
        let mut backend = RecordingBackend {
            next_id: 0,
            asserted: Vec::new(),
        };
        let selector = RealVar(0).expr();
        let multiplicand = RealVar(1).expr();
        let bps = delta_t_breakpoints(1.0);
        let y = declare_product(&mut backend, "product", selector, &bps, multiplicand).unwrap();
        assert_eq!(y, RealVar(2));
        // bounds (2) + 2 per interval * 4 intervals + coverage (1) = 11
        assert_eq!(backend.asserted.len(), 11);
    }

    #[test]
    fn active_piece_matches_breakpoint_membership() {
        let bps = delta_t_breakpoints(1.0);
        assert_eq!(active_piece(&bps, Rational::ZERO), Some(0));
        assert_eq!(active_piece(&bps, Rational::new(1, 2)), Some(1));
        assert_eq!(active_piece(&bps, Rational::ONE), Some(3));
    }
}

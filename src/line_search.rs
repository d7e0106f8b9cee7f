//! Safeguarded backtracking shared by the outer solver and the SPG
//! subproblem solver.
//!
//! Trial steps are accepted on the Armijo condition against a reference
//! value (the current value for a monotone search, the window maximum for a
//! non-monotone one). Rejected steps are shortened by halving or by
//! polynomial interpolation, and every new step is kept inside
//! `[1e-3, 0.6]` times the previous one.

use crate::error::PqnResult;
use crate::interp::{InterpPoint, polyinterp};
use crate::legality::is_legal;
use crate::options::Interpolation;
use ndarray::Array1;

/// Norm used for the "step became too small" test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepNorm {
    L1,
    Inf,
}

impl StepNorm {
    fn of_scaled(self, t: f64, d: &Array1<f64>) -> f64 {
        match self {
            StepNorm::L1 => d.iter().map(|v| (t * v).abs()).sum(),
            StepNorm::Inf => d.iter().fold(0.0, |m, v| m.max((t * v).abs())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LineSearch {
    pub suff_dec: f64,
    pub prog_tol: f64,
    pub interp: Interpolation,
    pub step_norm: StepNorm,
    pub verbose: u8,
}

/// Where the search starts: current point, its value and gradient, the
/// search direction, `gᵀd`, and the acceptance reference value.
pub(crate) struct LineStart<'a> {
    pub x: &'a Array1<f64>,
    pub f: f64,
    pub g: &'a Array1<f64>,
    pub d: &'a Array1<f64>,
    pub gtd: f64,
    pub f_ref: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct LineSearchOutcome {
    pub t: f64,
    pub x: Array1<f64>,
    pub f: f64,
    pub g: Array1<f64>,
    pub evals: usize,
    /// The step shrank below `prog_tol`; `x`, `f`, `g` are the start values.
    pub failed: bool,
}

impl LineSearch {
    /// Backtracks from `t0`. `point(t)` maps a step length to a trial point
    /// (plain `x + t d`, or a projected point for curvilinear searches) and
    /// `eval` returns `(f, g)` there.
    pub(crate) fn backtrack<P, E>(
        &self,
        start: &LineStart<'_>,
        t0: f64,
        mut point: P,
        mut eval: E,
    ) -> PqnResult<LineSearchOutcome>
    where
        P: FnMut(f64) -> PqnResult<Array1<f64>>,
        E: FnMut(&Array1<f64>) -> PqnResult<(f64, Array1<f64>)>,
    {
        let mut t = t0;
        let mut x_new = point(t)?;
        let (mut f_new, mut g_new) = eval(&x_new)?;
        let mut evals = 1;
        let mut iters = 1;
        let mut prev: Option<(f64, f64)> = None;

        while !self.acceptable(start, &x_new, f_new, &g_new) {
            let temp = t;
            t = self.next_step(start, t, f_new, &g_new, prev, iters);
            if !t.is_finite() {
                t = 0.5 * temp;
            }

            if t < temp * 1e-3 {
                if self.verbose >= 3 {
                    log::debug!("[LineSearch] Interpolated value too small, adjusting.");
                }
                t = temp * 1e-3;
            } else if t > temp * 0.6 {
                if self.verbose >= 3 {
                    log::debug!("[LineSearch] Interpolated value too large, adjusting.");
                }
                t = temp * 0.6;
            }

            if t == 0.0 || self.step_norm.of_scaled(t, start.d) < self.prog_tol {
                if self.verbose >= 3 {
                    log::debug!("[LineSearch] Line search failed at t = {:.3e}.", t);
                }
                return Ok(LineSearchOutcome {
                    t: 0.0,
                    x: start.x.clone(),
                    f: start.f,
                    g: start.g.clone(),
                    evals,
                    failed: true,
                });
            }

            prev = Some((temp, f_new));
            x_new = point(t)?;
            let (f_next, g_next) = eval(&x_new)?;
            f_new = f_next;
            g_new = g_next;
            evals += 1;
            iters += 1;
        }

        Ok(LineSearchOutcome {
            t,
            x: x_new,
            f: f_new,
            g: g_new,
            evals,
            failed: false,
        })
    }

    // Illegal values are rejected before any numeric comparison.
    fn acceptable(
        &self,
        start: &LineStart<'_>,
        x_new: &Array1<f64>,
        f_new: f64,
        g_new: &Array1<f64>,
    ) -> bool {
        if !is_legal(&f_new) || !is_legal(g_new) {
            return false;
        }
        let decrease = start.g.dot(&(x_new - start.x));
        f_new <= start.f_ref + self.suff_dec * decrease
    }

    fn next_step(
        &self,
        start: &LineStart<'_>,
        t: f64,
        f_new: f64,
        g_new: &Array1<f64>,
        prev: Option<(f64, f64)>,
        iters: usize,
    ) -> f64 {
        let origin = InterpPoint::with_slope(0.0, start.f, start.gtd);
        if !is_legal(&f_new) || self.interp == Interpolation::Halving {
            if self.verbose >= 3 {
                log::debug!("[LineSearch] Halving step size.");
            }
            return 0.5 * t;
        }
        if is_legal(g_new) {
            if self.verbose >= 3 {
                log::debug!("[LineSearch] Cubic backtracking.");
            }
            let gtd_new = g_new.dot(start.d);
            return polyinterp(&[origin, InterpPoint::with_slope(t, f_new, gtd_new)], None);
        }
        match prev {
            Some((t_prev, f_prev)) if iters >= 2 && is_legal(&f_prev) => {
                if self.verbose >= 3 {
                    log::debug!("[LineSearch] Cubic backtracking on function values.");
                }
                polyinterp(
                    &[
                        origin,
                        InterpPoint::value_only(t, f_new),
                        InterpPoint::value_only(t_prev, f_prev),
                    ],
                    None,
                )
            }
            _ => {
                if self.verbose >= 3 {
                    log::debug!("[LineSearch] Quadratic backtracking.");
                }
                polyinterp(&[origin, InterpPoint::value_only(t, f_new)], None)
            }
        }
    }
}

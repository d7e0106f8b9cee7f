//! Spectral projected gradient (SPG).
//!
//! Each iteration scales the negative gradient by a Barzilai-Borwein step,
//! projects it onto the feasible set and backtracks along the resulting
//! direction with a non-monotone Armijo test: a trial point only has to beat
//! the largest of the last `memory` objective values. The same routine
//! serves as a standalone solver ([`Spg`]) and as the inner solver of
//! [`crate::Pqn`], where it minimizes a quadratic model of the objective.

use crate::Status;
use crate::error::{PqnError, PqnResult};
use crate::lbfgs::CompactHessian;
use crate::line_search::{LineSearch, LineStart, StepNorm};
use crate::linalg::{norm_inf, norm_l1};
use crate::oracle::{Objective, Projection, evaluate_checked, project_checked};
use crate::options::{BbType, SpgOptions};
use ndarray::Array1;
use std::collections::VecDeque;

/// Result of an SPG run.
#[derive(Debug, Clone)]
pub struct SpgSolution {
    pub final_point: Array1<f64>,
    pub final_value: f64,
    /// Objective evaluations, not scaled by the numerical differentiation
    /// cost.
    pub func_evals: usize,
    pub projections: usize,
    pub iterations: usize,
    pub status: Status,
}

/// Standalone spectral projected gradient solver.
///
/// ```
/// use pqn::{BoxProjection, Spg, Status};
/// use ndarray::{array, Array1};
///
/// let target = array![2.0, -1.0, 0.5];
/// let objective = move |x: &Array1<f64>| {
///     let r = x - &target;
///     (r.dot(&r), 2.0 * r)
/// };
/// let bounds = BoxProjection::uniform(3, 0.0, 1.0).unwrap();
///
/// let solution = Spg::new(array![0.5, 0.5, 0.5], objective, bounds)
///     .with_verbosity(0)
///     .run()
///     .unwrap();
/// assert_eq!(solution.status, Status::Converged);
/// assert!((solution.final_point[0] - 1.0).abs() < 1e-8);
/// assert!(solution.final_point[1].abs() < 1e-8);
/// ```
pub struct Spg<ObjFn, ProjFn> {
    x0: Array1<f64>,
    obj_fn: ObjFn,
    proj_fn: ProjFn,
    options: SpgOptions,
}

impl<ObjFn, ProjFn> Spg<ObjFn, ProjFn>
where
    ObjFn: Objective,
    ProjFn: Projection,
{
    pub fn new(x0: Array1<f64>, obj_fn: ObjFn, proj_fn: ProjFn) -> Self {
        Self {
            x0,
            obj_fn,
            proj_fn,
            options: SpgOptions::default(),
        }
    }

    /// Replaces every option at once.
    pub fn with_options(mut self, options: SpgOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the optimality tolerance (default: 1e-5).
    pub fn with_tolerance(mut self, opt_tol: f64) -> Self {
        self.options.opt_tol = opt_tol;
        self
    }

    /// Sets the budget on objective evaluations (default: 500).
    pub fn with_max_evaluations(mut self, max_iter: usize) -> Self {
        self.options.max_iter = max_iter;
        self
    }

    /// Sets the non-monotone window length (default: 10).
    pub fn with_memory(mut self, memory: usize) -> Self {
        self.options.memory = memory;
        self
    }

    pub fn with_curvilinear(mut self, enable: bool) -> Self {
        self.options.curvilinear = enable;
        self
    }

    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.options.verbose = verbose;
        self
    }

    pub fn run(&mut self) -> PqnResult<SpgSolution> {
        minimize(&self.x0, &mut self.obj_fn, &mut self.proj_fn, &self.options)
    }
}

// Acceptance reference for the SPG line search: a trial point passes the
// Armijo test against the largest of the last `memory` values, the current
// one included. With `memory == 1` the search is monotone.
struct NonmonotoneWindow {
    recent: VecDeque<f64>,
    memory: usize,
}

impl NonmonotoneWindow {
    fn new(memory: usize) -> Self {
        let memory = memory.max(1);
        Self {
            recent: VecDeque::with_capacity(memory),
            memory,
        }
    }

    fn record(&mut self, f: f64) {
        if self.recent.len() == self.memory {
            self.recent.pop_front();
        }
        self.recent.push_back(f);
    }

    fn reference(&self) -> f64 {
        self.recent.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Barzilai-Borwein scalar step from `s = x - x_old`, `y = g - g_old`.
/// Unusable values (non-positive curvature, NaN, outside `[1e-10, 1e10]`)
/// fall back to 1.
pub(crate) fn spectral_step(s: &Array1<f64>, y: &Array1<f64>, bb_type: BbType) -> f64 {
    let alpha = match bb_type {
        BbType::Long => s.dot(s) / s.dot(y),
        BbType::Short => s.dot(y) / y.dot(y),
    };
    if alpha > 1e-10 && alpha <= 1e10 {
        alpha
    } else {
        1.0
    }
}

/// The local quadratic model `m(p) = gᵀ(p - x) + ½ (p - x)ᵀ B (p - x)`.
pub(crate) struct QuadraticModel<'a> {
    pub x: &'a Array1<f64>,
    pub g: &'a Array1<f64>,
    pub hessian: &'a CompactHessian,
}

impl Objective for QuadraticModel<'_> {
    fn evaluate(&mut self, p: &Array1<f64>) -> (f64, Array1<f64>) {
        let d = p - self.x;
        let hd = self.hessian.hv(&d);
        let f = self.g.dot(&d) + 0.5 * d.dot(&hd);
        (f, self.g + &hd)
    }
}

pub(crate) fn minimize<O, P>(
    x0: &Array1<f64>,
    obj_fn: &mut O,
    proj_fn: &mut P,
    options: &SpgOptions,
) -> PqnResult<SpgSolution>
where
    O: Objective + ?Sized,
    P: Projection + ?Sized,
{
    options.validate()?;
    let n = x0.len();
    if n == 0 {
        return Err(PqnError::EmptyStartingPoint);
    }
    let verbose = options.verbose;
    let num_diff = options.num_diff;
    let multiplier = num_diff.calls_per_evaluation(n);

    if verbose >= 3 {
        log::debug!("[SPG] Options: {:?}", options);
    }

    let mut projections = 0;
    let mut x = if options.feasible_init {
        x0.clone()
    } else {
        projections += 1;
        project_checked(proj_fn, x0)?
    };
    let (mut f, mut g) = evaluate_checked(obj_fn, &x, num_diff)?;
    let mut func_evals = 1;

    if options.test_opt {
        projections += 1;
        let opt = norm_inf(&(project_checked(proj_fn, &(&x - &g))? - &x));
        if opt < options.opt_tol {
            if verbose >= 1 {
                log::info!("[SPG] {}", Status::AlreadyOptimal);
            }
            return Ok(SpgSolution {
                final_point: x,
                final_value: f,
                func_evals,
                projections,
                iterations: 0,
                status: Status::AlreadyOptimal,
            });
        }
    }

    if verbose >= 2 {
        log::info!(
            "[SPG] {:>9} {:>9} {:>11} {:>14} {:>14} {:>14}",
            "Iteration",
            "FunEvals",
            "Projections",
            "Step Length",
            "Function Val",
            "Opt Cond"
        );
    }

    let search = LineSearch {
        suff_dec: options.suff_dec,
        prog_tol: options.prog_tol,
        interp: options.interp,
        step_norm: StepNorm::Inf,
        verbose,
    };
    let mut window = NonmonotoneWindow::new(options.memory);
    let mut previous: Option<(Array1<f64>, Array1<f64>)> = None;
    let mut iterations = 0;

    let status = loop {
        if func_evals * multiplier > options.max_iter {
            break Status::BudgetExceeded;
        }
        iterations += 1;

        let alpha = match &previous {
            Some((x_old, g_old)) if options.use_spectral => {
                spectral_step(&(&x - x_old), &(&g - g_old), options.bb_type)
            }
            _ => 1.0,
        };
        let mut d = g.mapv(|v| -alpha * v);
        if !options.curvilinear {
            d = project_checked(proj_fn, &(&x + &d))? - &x;
            projections += 1;
        }

        let gtd = g.dot(&d);
        if gtd > -options.prog_tol {
            break Status::NoProgress;
        }

        let t0 = if iterations == 1 {
            (1.0 / norm_l1(&g)).min(1.0)
        } else {
            1.0
        };

        window.record(f);
        let start = LineStart {
            x: &x,
            f,
            g: &g,
            d: &d,
            gtd,
            f_ref: window.reference(),
        };
        let curvilinear = options.curvilinear;
        let mut search_projections = 0;
        let outcome = search.backtrack(
            &start,
            t0,
            |t| {
                let trial = &x + &(t * &d);
                if curvilinear {
                    search_projections += 1;
                    project_checked(proj_fn, &trial)
                } else {
                    Ok(trial)
                }
            },
            |p| evaluate_checked(obj_fn, p, num_diff),
        )?;
        projections += search_projections;
        func_evals += outcome.evals;

        let t = outcome.t;
        let f_old = f;
        previous = Some((x, g));
        x = outcome.x;
        f = outcome.f;
        g = outcome.g;

        let opt_cond = if options.test_opt {
            projections += 1;
            Some(norm_inf(&(project_checked(proj_fn, &(&x - &g))? - &x)))
        } else {
            None
        };

        if verbose >= 2 {
            log::info!(
                "[SPG] {:>9} {:>9} {:>11} {:>14.5e} {:>14.5e} {:>14}",
                iterations,
                func_evals * multiplier,
                projections,
                t,
                f,
                opt_cond.map_or_else(|| "-".to_string(), |o| format!("{o:.5e}"))
            );
        }

        if opt_cond.is_some_and(|o| o < options.opt_tol) {
            break Status::Converged;
        }
        if norm_inf(&d) * t < options.prog_tol {
            break Status::StepTooSmall;
        }
        if (f - f_old).abs() < options.prog_tol {
            break Status::NoImprovement;
        }
        if func_evals * multiplier > options.max_iter {
            break Status::BudgetExceeded;
        }
    };

    if verbose >= 1 {
        log::info!("[SPG] {}", status);
    }

    Ok(SpgSolution {
        final_point: x,
        final_value: f,
        func_evals,
        projections,
        iterations,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::{NonmonotoneWindow, QuadraticModel, Spg, minimize, spectral_step};
    use crate::Status;
    use crate::error::{Oracle, PqnError};
    use crate::lbfgs::LbfgsMemory;
    use crate::options::{BbType, NumDiff, SpgOptions};
    use crate::oracle::{BoxProjection, Objective, SimplexProjection, Unconstrained};
    use ndarray::{Array1, array};
    use spectral::prelude::*;

    fn max_abs_diff(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        (a - b).iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    fn distance_to(target: Array1<f64>) -> impl FnMut(&Array1<f64>) -> (f64, Array1<f64>) {
        move |x: &Array1<f64>| {
            let r = x - &target;
            (r.dot(&r), 2.0 * r)
        }
    }

    fn quiet() -> SpgOptions {
        SpgOptions {
            verbose: 0,
            ..SpgOptions::default()
        }
    }

    #[test]
    fn window_reports_max_of_recent_values() {
        let mut w = NonmonotoneWindow::new(3);
        for f in [5.0, 1.0, 2.0] {
            w.record(f);
        }
        assert_that!(&w.reference()).is_close_to(5.0, 0.0);
        w.record(0.5);
        assert_that!(&w.reference()).is_close_to(2.0, 0.0);

        let mut single = NonmonotoneWindow::new(1);
        single.record(4.0);
        single.record(3.0);
        assert_that!(&single.reference()).is_close_to(3.0, 0.0);
    }

    #[test]
    fn spectral_step_formulas_and_safeguard() {
        let s = array![1.0, 0.0];
        let y = array![2.0, 1.0];
        assert_that!(&spectral_step(&s, &y, BbType::Long)).is_close_to(0.5, 1e-15);
        assert_that!(&spectral_step(&s, &y, BbType::Short)).is_close_to(0.4, 1e-15);
        // Negative curvature and a zero step both reset to 1.
        assert_that!(&spectral_step(&s, &array![-1.0, 0.0], BbType::Long)).is_close_to(1.0, 0.0);
        let zero = Array1::<f64>::zeros(2);
        assert_that!(&spectral_step(&zero, &zero, BbType::Long)).is_close_to(1.0, 0.0);
    }

    #[test]
    fn box_constrained_quadratic_reaches_corner() {
        let bounds = BoxProjection::uniform(3, 0.0, 1.0).unwrap();
        let sol = Spg::new(array![0.5, 0.5, 0.5], distance_to(array![2.0, -1.0, 0.5]), bounds)
            .with_options(quiet())
            .run()
            .unwrap();
        assert_eq!(sol.status, Status::Converged);
        assert_eq!(sol.iterations, 2);
        assert_that!(&max_abs_diff(&sol.final_point, &array![1.0, 0.0, 0.5])).is_less_than(1e-12);
        assert_that!(&sol.final_value).is_close_to(2.0, 1e-12);
    }

    #[test]
    fn curvilinear_search_also_converges() {
        let bounds = BoxProjection::uniform(3, 0.0, 1.0).unwrap();
        let sol = Spg::new(array![0.5, 0.5, 0.5], distance_to(array![2.0, -1.0, 0.5]), bounds)
            .with_options(quiet())
            .with_curvilinear(true)
            .run()
            .unwrap();
        assert_eq!(sol.status, Status::Converged);
        assert_that!(&max_abs_diff(&sol.final_point, &array![1.0, 0.0, 0.5])).is_less_than(1e-6);
    }

    #[test]
    fn simplex_constrained_least_squares() {
        let sol = Spg::new(
            array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
            distance_to(array![0.5, 0.2, 0.0]),
            SimplexProjection,
        )
        .with_options(quiet())
        .run()
        .unwrap();
        assert_eq!(sol.status, Status::Converged);
        assert_that!(&max_abs_diff(&sol.final_point, &array![0.6, 0.3, 0.1])).is_less_than(1e-5);
        assert_that!(&sol.final_point.sum()).is_close_to(1.0, 1e-12);
    }

    #[test]
    fn optimal_start_is_detected() {
        let bounds = BoxProjection::uniform(2, 0.0, 1.0).unwrap();
        let sol = Spg::new(array![1.0, 0.0], distance_to(array![2.0, -1.0]), bounds)
            .with_options(quiet())
            .run()
            .unwrap();
        assert_eq!(sol.status, Status::AlreadyOptimal);
        assert_eq!(sol.func_evals, 1);
        assert_eq!(sol.projections, 2);
        assert_eq!(sol.final_point, array![1.0, 0.0]);
    }

    #[test]
    fn without_optimality_test_a_stationary_start_makes_no_progress() {
        let bounds = BoxProjection::uniform(2, 0.0, 1.0).unwrap();
        let opts = SpgOptions {
            test_opt: false,
            ..quiet()
        };
        let sol = Spg::new(array![1.0, 0.0], distance_to(array![2.0, -1.0]), bounds)
            .with_options(opts)
            .run()
            .unwrap();
        assert_eq!(sol.status, Status::NoProgress);
        assert_eq!(sol.func_evals, 1);
        assert_eq!(sol.iterations, 1);
    }

    #[test]
    fn evaluation_budget_stops_the_run() {
        let ill_conditioned = |x: &Array1<f64>| {
            let f = x[0] * x[0] + 10.0 * x[1] * x[1];
            (f, array![2.0 * x[0], 20.0 * x[1]])
        };
        let sol = Spg::new(array![3.0, 1.0], ill_conditioned, Unconstrained)
            .with_options(quiet())
            .with_max_evaluations(1)
            .run()
            .unwrap();
        assert_eq!(sol.status, Status::BudgetExceeded);
        assert_eq!(sol.iterations, 1);
        assert_that!(&sol.final_value).is_less_than(19.0);
    }

    #[test]
    fn numerical_gradient_matches_analytic_run() {
        let target = array![2.0, -1.0, 0.5];
        let value_only = move |x: &Array1<f64>| {
            let r = x - &target;
            (r.dot(&r), Array1::<f64>::zeros(0))
        };
        let opts = SpgOptions {
            num_diff: NumDiff::CentralDifference,
            ..quiet()
        };
        let bounds = BoxProjection::uniform(3, 0.0, 1.0).unwrap();
        let sol = Spg::new(array![0.5, 0.5, 0.5], value_only, bounds)
            .with_options(opts)
            .run()
            .unwrap();
        assert_eq!(sol.status, Status::Converged);
        assert_that!(&max_abs_diff(&sol.final_point, &array![1.0, 0.0, 0.5])).is_less_than(1e-6);
    }

    #[test]
    fn projection_of_wrong_length_is_fatal() {
        let bad = |x: &Array1<f64>| Array1::<f64>::zeros(x.len() - 1);
        let err = Spg::new(array![0.5, 0.5], distance_to(array![1.0, 1.0]), bad)
            .with_options(quiet())
            .run()
            .unwrap_err();
        assert!(matches!(
            err,
            PqnError::DimensionMismatch {
                oracle: Oracle::Projection,
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn invalid_options_and_empty_start_are_rejected() {
        let opts = SpgOptions {
            memory: 0,
            ..quiet()
        };
        let err = Spg::new(array![1.0], distance_to(array![0.0]), Unconstrained)
            .with_options(opts)
            .run()
            .unwrap_err();
        assert!(matches!(err, PqnError::InvalidOption { name: "memory", .. }));

        let err = Spg::new(Array1::<f64>::zeros(0), distance_to(Array1::zeros(0)), Unconstrained)
            .with_options(quiet())
            .run()
            .unwrap_err();
        assert!(matches!(err, PqnError::EmptyStartingPoint));
    }

    #[test]
    fn quadratic_model_value_and_gradient() {
        let mut mem = LbfgsMemory::new(2, 3);
        mem.update(&array![2.0, 0.0], &array![1.0, 0.0]);
        let hessian = mem.compact();
        let x = array![1.0, 1.0];
        let g = array![1.0, -1.0];
        let mut model = QuadraticModel {
            x: &x,
            g: &g,
            hessian: &hessian,
        };
        let (f, grad) = model.evaluate(&x);
        assert_that!(&f).is_close_to(0.0, 0.0);
        assert_eq!(grad, g);

        // B = diag(2, 2) after one pair with y = 2s and hdiag = 1/2.
        let p = array![2.0, 1.0];
        let (f, grad) = model.evaluate(&p);
        assert_that!(&f).is_close_to(1.0 + 1.0, 1e-12);
        assert_that!(&max_abs_diff(&grad, &array![3.0, -1.0])).is_less_than(1e-12);
    }

    #[test]
    fn minimizes_quadratic_model_over_box() {
        // Model with B = 2I around x = 0 and g = (-4, 1): unconstrained
        // minimizer (2, -0.5), clipped by [-1, 1]^2 to (1, -0.5).
        let mut mem = LbfgsMemory::new(2, 3);
        mem.update(&array![2.0, 0.0], &array![1.0, 0.0]);
        let hessian = mem.compact();
        let x = Array1::<f64>::zeros(2);
        let g = array![-4.0, 1.0];
        let mut model = QuadraticModel {
            x: &x,
            g: &g,
            hessian: &hessian,
        };
        let mut bounds = BoxProjection::uniform(2, -1.0, 1.0).unwrap();
        let opts = SpgOptions {
            opt_tol: 1e-10,
            ..quiet()
        };
        let sol = minimize(&x, &mut model, &mut bounds, &opts).unwrap();
        assert_that!(&max_abs_diff(&sol.final_point, &array![1.0, -0.5])).is_less_than(1e-8);
    }
}

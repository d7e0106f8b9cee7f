//! Limited-memory projected quasi-Newton optimization over convex sets.
//!
//! This crate minimizes a smooth objective `f(x)` subject to `x ∈ C`, where
//! the feasible set `C` is known only through a Euclidean projection. Each
//! outer iteration builds a compact L-BFGS model of the objective, minimizes
//! that quadratic model over `C` with a spectral projected gradient (SPG)
//! inner solver, and backtracks along the resulting feasible direction on the
//! true objective (Schmidt, van den Berg, Friedlander & Murphy, 2009).
//!
//! # Features
//! - Compact limited-memory BFGS Hessian, factored once per iteration and
//!   reused by every Hessian-vector product of the subproblem.
//! - Spectral projected gradient with Barzilai-Borwein steps and a
//!   non-monotone Armijo test, usable on its own through [`Spg`].
//! - Backtracking with cubic or quadratic interpolation, safeguarded against
//!   NaN and infinite objective values.
//! - Optional forward or central finite-difference gradients.
//! - Stock projections for boxes and the probability simplex; any closure
//!   `FnMut(&Array1<f64>) -> Array1<f64>` works as well.
//! - All recoverable outcomes are reported through [`Status`]; only broken
//!   oracle contracts and invalid options produce a [`PqnError`].
//!
//! # Example
//!
//! Minimize a shifted quadratic over the unit box.
//!
//! ```
//! use pqn::{BoxProjection, Pqn, PqnSolution, Status};
//! use ndarray::{array, Array1};
//!
//! // f(x) = (x0 - 3)^2 + (x1 + 1)^2, whose unconstrained minimum (3, -1)
//! // lies outside the box.
//! let objective = |x: &Array1<f64>| -> (f64, Array1<f64>) {
//!     let f = (x[0] - 3.0).powi(2) + (x[1] + 1.0).powi(2);
//!     let g = array![2.0 * (x[0] - 3.0), 2.0 * (x[1] + 1.0)];
//!     (f, g)
//! };
//! let unit_box = BoxProjection::uniform(2, 0.0, 1.0).unwrap();
//!
//! let PqnSolution {
//!     final_point,
//!     final_value,
//!     status,
//!     ..
//! } = Pqn::new(array![0.5, 0.5], objective, unit_box)
//!     .with_tolerance(1e-8)
//!     .with_verbosity(0)
//!     .run()
//!     .expect("PQN failed to run");
//!
//! assert_eq!(status, Status::Converged);
//! assert!((final_point[0] - 1.0).abs() < 1e-8);
//! assert!(final_point[1].abs() < 1e-8);
//! assert!((final_value - 5.0).abs() < 1e-8);
//! ```

mod error;
mod interp;
mod lbfgs;
mod legality;
mod line_search;
mod linalg;
mod options;
mod oracle;
mod spg;

pub use error::{Oracle, PqnError, PqnResult};
pub use interp::{InterpPoint, polyinterp};
pub use lbfgs::{CompactHessian, LbfgsMemory};
pub use legality::{Legal, is_legal};
pub use options::{BbType, Interpolation, NumDiff, PqnOptions, SpgOptions};
pub use oracle::{BoxProjection, Objective, Projection, SimplexProjection, Unconstrained};
pub use spg::{Spg, SpgSolution};

use line_search::{LineSearch, LineStart, StepNorm};
use linalg::{norm_inf, norm_l1};
use ndarray::Array1;
use oracle::{evaluate_checked, project_checked};
use spg::QuadraticModel;
use std::fmt;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The projected gradient at the starting point is already below the
    /// optimality tolerance.
    AlreadyOptimal,
    /// The projected gradient fell below the optimality tolerance.
    Converged,
    /// The search direction is not a descent direction.
    NoProgress,
    /// The accepted step (or a failed line search) moved less than
    /// `prog_tol`.
    StepTooSmall,
    /// The objective changed by less than `prog_tol`.
    NoImprovement,
    /// The objective evaluation budget is spent.
    BudgetExceeded,
    /// The projection budget is spent.
    ProjectionBudgetExceeded,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Status::AlreadyOptimal => {
                "First-order optimality conditions below opt_tol at initial point"
            }
            Status::Converged => "First-order optimality conditions below opt_tol",
            Status::NoProgress => "Directional derivative below tolerance",
            Status::StepTooSmall => "Step size below prog_tol",
            Status::NoImprovement => "Function value changing by less than prog_tol",
            Status::BudgetExceeded => "Function evaluations exceed max_iter",
            Status::ProjectionBudgetExceeded => "Number of projections exceeds max_project",
        };
        f.write_str(reason)
    }
}

/// A summary of a projected quasi-Newton run.
///
/// Every [`Status`] is a normal outcome; the point returned is the last
/// accepted iterate, which is always feasible.
#[derive(Debug, Clone)]
pub struct PqnSolution {
    /// The last accepted iterate.
    pub final_point: Array1<f64>,
    /// The objective value at `final_point`.
    pub final_value: f64,
    /// Objective evaluations, not scaled by the numerical differentiation
    /// cost.
    pub func_evals: usize,
    /// Projections, including those spent inside the subproblems.
    pub projections: usize,
    /// Outer iterations started.
    pub iterations: usize,
    /// `‖P(x - g) - x‖₁` at `final_point` (the max norm when the run stops
    /// before its first step).
    pub optimality: f64,
    pub status: Status,
}

/// A configurable projected quasi-Newton solver.
pub struct Pqn<ObjFn, ProjFn> {
    x0: Array1<f64>,
    obj_fn: ObjFn,
    proj_fn: ProjFn,
    options: PqnOptions,
}

impl<ObjFn, ProjFn> Pqn<ObjFn, ProjFn>
where
    ObjFn: Objective,
    ProjFn: Projection,
{
    /// Creates a new solver.
    ///
    /// # Arguments
    /// * `x0` - The initial guess; it is projected before the first
    ///   evaluation unless `feasible_init` is set.
    /// * `obj_fn` - The objective, returning `(value, gradient)`.
    /// * `proj_fn` - The projection onto the feasible set.
    pub fn new(x0: Array1<f64>, obj_fn: ObjFn, proj_fn: ProjFn) -> Self {
        Self {
            x0,
            obj_fn,
            proj_fn,
            options: PqnOptions::default(),
        }
    }

    /// Replaces every option at once.
    pub fn with_options(mut self, options: PqnOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the optimality tolerance (default: 1e-6).
    pub fn with_tolerance(mut self, opt_tol: f64) -> Self {
        self.options.opt_tol = opt_tol;
        self
    }

    /// Sets the budget on objective evaluations (default: 500).
    pub fn with_max_evaluations(mut self, max_iter: usize) -> Self {
        self.options.max_iter = max_iter;
        self
    }

    /// Sets the budget on projections (default: 100000).
    pub fn with_max_projections(mut self, max_project: usize) -> Self {
        self.options.max_project = max_project;
        self
    }

    /// Sets the number of L-BFGS correction pairs kept (default: 10).
    pub fn with_corrections(mut self, corrections: usize) -> Self {
        self.options.corrections = corrections;
        self
    }

    /// 0: silent, 1: final status, 2: iteration log, 3: debug trace.
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.options.verbose = verbose;
        self
    }

    /// Computes gradients by finite differences of the objective's values.
    pub fn with_numerical_gradient(mut self, num_diff: NumDiff) -> Self {
        self.options.num_diff = num_diff;
        self
    }

    /// Executes the projected quasi-Newton iteration.
    pub fn run(&mut self) -> PqnResult<PqnSolution> {
        optimize(&self.x0, &mut self.obj_fn, &mut self.proj_fn, &self.options)
    }
}

fn log_configuration(options: &PqnOptions) {
    log::debug!("[PQN] Running PQN...");
    log::debug!("[PQN] Number of L-BFGS corrections to store: {}", options.corrections);
    log::debug!("[PQN] Spectral initialization of SPG: {}", options.bb_init);
    log::debug!("[PQN] Maximum number of SPG iterations: {}", options.spg_iters);
    log::debug!("[PQN] SPG optimality tolerance: {:.2e}", options.spg_opt_tol);
    log::debug!("[PQN] SPG progress tolerance: {:.2e}", options.spg_prog_tol);
    log::debug!("[PQN] PQN optimality tolerance: {:.2e}", options.opt_tol);
    log::debug!("[PQN] Quadratic initialization of line search: {}", options.adjust_step);
    log::debug!("[PQN] Maximum number of function evaluations: {}", options.max_iter);
    log::debug!("[PQN] Maximum number of projections: {}", options.max_project);
}

// Barzilai-Borwein start for the subproblem; falls back to the scaled
// gradient step used on the first iteration.
fn subproblem_step(s: &Array1<f64>, y: &Array1<f64>, g: &Array1<f64>) -> f64 {
    let alpha = s.dot(s) / s.dot(y);
    if alpha > 1e-10 && alpha <= 1e10 {
        alpha
    } else {
        (1.0 / norm_l1(g)).min(1.0)
    }
}

fn optimize<O, P>(
    x0: &Array1<f64>,
    obj_fn: &mut O,
    proj_fn: &mut P,
    options: &PqnOptions,
) -> PqnResult<PqnSolution>
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
        log_configuration(options);
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

    projections += 1;
    let mut optimality = norm_inf(&(project_checked(proj_fn, &(&x - &g))? - &x));
    if optimality < options.opt_tol {
        if verbose >= 1 {
            log::info!("[PQN] {}", Status::AlreadyOptimal);
        }
        return Ok(PqnSolution {
            final_point: x,
            final_value: f,
            func_evals,
            projections,
            iterations: 0,
            optimality,
            status: Status::AlreadyOptimal,
        });
    }

    if verbose >= 2 {
        log::info!(
            "[PQN] {:>9} {:>9} {:>11} {:>14} {:>14} {:>14}",
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
        step_norm: StepNorm::L1,
        verbose,
    };
    let mut memory = LbfgsMemory::new(n, options.corrections);
    let mut previous: Option<(Array1<f64>, Array1<f64>)> = None;
    let mut f_old = f;
    let mut iterations = 0;

    let status = loop {
        if func_evals * multiplier >= options.max_iter {
            break Status::BudgetExceeded;
        }
        iterations += 1;

        let p = match &previous {
            None => {
                projections += 1;
                project_checked(proj_fn, &(&x - &g))?
            }
            Some((x_old, g_old)) => {
                let s = &x - x_old;
                let y = &g - g_old;
                if !memory.update(&y, &s) && verbose >= 3 {
                    log::debug!("[L-BFGS] Skipping update (yᵀs = {:.3e}).", y.dot(&s));
                }
                let hessian = memory.compact();

                let (x_init, feasible_init) = if options.bb_init {
                    let alpha = subproblem_step(&s, &y, &g);
                    (&x - &(alpha * &g), false)
                } else {
                    (x.clone(), true)
                };
                let mut model = QuadraticModel {
                    x: &x,
                    g: &g,
                    hessian: &hessian,
                };
                let sub = spg::minimize(
                    &x_init,
                    &mut model,
                    proj_fn,
                    &options.subproblem(feasible_init),
                )?;
                projections += sub.projections;
                sub.final_point
            }
        };

        let d = &p - &x;
        let gtd = g.dot(&d);
        if gtd > -options.opt_tol {
            break Status::NoProgress;
        }

        let t0 = if iterations == 1 {
            (1.0 / norm_l1(&g)).min(1.0)
        } else if options.adjust_step {
            (2.0 * (f - f_old) / gtd).min(1.0)
        } else {
            1.0
        };

        let start = LineStart {
            x: &x,
            f,
            g: &g,
            d: &d,
            gtd,
            f_ref: f,
        };
        let outcome = search.backtrack(
            &start,
            t0,
            |t| Ok(&x + &(t * &d)),
            |point| evaluate_checked(obj_fn, point, num_diff),
        )?;
        func_evals += outcome.evals;
        if outcome.failed && verbose >= 3 {
            log::debug!("[PQN] Line search failed, keeping the current point.");
        }

        let t = outcome.t;
        f_old = f;
        previous = Some((x, g));
        x = outcome.x;
        f = outcome.f;
        g = outcome.g;

        projections += 1;
        optimality = norm_l1(&(project_checked(proj_fn, &(&x - &g))? - &x));
        if !optimality.is_finite() {
            log::warn!("[PQN] Optimality measure is not finite at iteration {}.", iterations);
        }

        if verbose >= 2 {
            log::info!(
                "[PQN] {:>9} {:>9} {:>11} {:>14.5e} {:>14.5e} {:>14.5e}",
                iterations,
                func_evals * multiplier,
                projections,
                t,
                f,
                optimality
            );
        }

        if optimality < options.opt_tol {
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
        if projections > options.max_project {
            break Status::ProjectionBudgetExceeded;
        }
    };

    if verbose >= 1 {
        log::info!("[PQN] {}", status);
    }

    Ok(PqnSolution {
        final_point: x,
        final_value: f,
        func_evals,
        projections,
        iterations,
        optimality,
        status,
    })
}

//! Solver configuration.
//!
//! Both option records are plain data with defaults, deserializable from any
//! serde format with missing fields taking their default, and validated once
//! when a run starts.

use crate::error::{PqnError, PqnResult};
use serde::{Deserialize, Serialize};

/// How gradients are obtained from the objective oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumDiff {
    /// Use the gradient returned by the oracle.
    #[default]
    Analytic,
    /// Forward differences on the oracle's values.
    ForwardDifference,
    /// Central differences on the oracle's values.
    CentralDifference,
}

impl NumDiff {
    /// Oracle calls spent per gradient evaluation for `n` variables.
    pub fn calls_per_evaluation(self, n: usize) -> usize {
        match self {
            NumDiff::Analytic => 1,
            NumDiff::ForwardDifference => n + 2,
            NumDiff::CentralDifference => 2 * n + 1,
        }
    }
}

/// Step-length selection inside a backtracking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Always halve the step.
    Halving,
    /// Polynomial interpolation (cubic when slopes are available).
    #[default]
    Cubic,
}

/// Barzilai-Borwein spectral step formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BbType {
    /// `sᵀs / sᵀy`
    #[default]
    Long,
    /// `sᵀy / yᵀy`
    Short,
}

/// Options for the projected quasi-Newton solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PqnOptions {
    /// 0: silent, 1: final status, 2: per-iteration rows, 3: debug trace.
    pub verbose: u8,
    pub opt_tol: f64,
    pub prog_tol: f64,
    /// Budget on objective evaluations (scaled by the numerical
    /// differentiation cost).
    pub max_iter: usize,
    pub max_project: usize,
    pub suff_dec: f64,
    pub corrections: usize,
    /// Initialize each line search from the previous decrease.
    pub adjust_step: bool,
    /// Start each subproblem from a Barzilai-Borwein step instead of the
    /// current point.
    pub bb_init: bool,
    pub spg_opt_tol: f64,
    pub spg_prog_tol: f64,
    pub spg_iters: usize,
    pub spg_test_opt: bool,
    pub memory: usize,
    pub interp: Interpolation,
    pub curvilinear: bool,
    /// Trust `x0` to be feasible and skip its initial projection.
    pub feasible_init: bool,
    pub bb_type: BbType,
    pub num_diff: NumDiff,
}

impl Default for PqnOptions {
    fn default() -> Self {
        Self {
            verbose: 2,
            opt_tol: 1e-6,
            prog_tol: 1e-9,
            max_iter: 500,
            max_project: 100_000,
            suff_dec: 1e-4,
            corrections: 10,
            adjust_step: false,
            bb_init: false,
            spg_opt_tol: 1e-6,
            spg_prog_tol: 1e-10,
            spg_iters: 10,
            spg_test_opt: false,
            memory: 10,
            interp: Interpolation::Cubic,
            curvilinear: false,
            feasible_init: false,
            bb_type: BbType::Long,
            num_diff: NumDiff::Analytic,
        }
    }
}

impl PqnOptions {
    pub fn validate(&self) -> PqnResult<()> {
        check_tol("opt_tol", self.opt_tol)?;
        check_tol("prog_tol", self.prog_tol)?;
        check_tol("spg_opt_tol", self.spg_opt_tol)?;
        check_tol("spg_prog_tol", self.spg_prog_tol)?;
        check_suff_dec(self.suff_dec)?;
        check_verbose(self.verbose)?;
        check_positive("max_iter", self.max_iter)?;
        check_positive("corrections", self.corrections)?;
        check_positive("spg_iters", self.spg_iters)?;
        check_positive("memory", self.memory)?;
        Ok(())
    }

    /// Options for the spectral projected gradient solve of one quadratic
    /// subproblem. The model gradient is exact, so no numerical
    /// differentiation is carried over.
    pub fn subproblem(&self, feasible_init: bool) -> SpgOptions {
        SpgOptions {
            verbose: 0,
            opt_tol: self.spg_opt_tol,
            prog_tol: self.spg_prog_tol,
            max_iter: self.spg_iters,
            suff_dec: self.suff_dec,
            interp: self.interp,
            memory: self.memory,
            use_spectral: true,
            curvilinear: self.curvilinear,
            feasible_init,
            test_opt: self.spg_test_opt,
            bb_type: self.bb_type,
            num_diff: NumDiff::Analytic,
        }
    }
}

/// Options for the spectral projected gradient solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpgOptions {
    pub verbose: u8,
    pub opt_tol: f64,
    pub prog_tol: f64,
    pub max_iter: usize,
    pub suff_dec: f64,
    pub interp: Interpolation,
    /// Length of the non-monotone acceptance window.
    pub memory: usize,
    pub use_spectral: bool,
    /// Project every trial point instead of projecting the direction once.
    pub curvilinear: bool,
    /// Trust the starting point to be feasible and skip its projection.
    pub feasible_init: bool,
    pub test_opt: bool,
    pub bb_type: BbType,
    pub num_diff: NumDiff,
}

impl Default for SpgOptions {
    fn default() -> Self {
        Self {
            verbose: 2,
            opt_tol: 1e-5,
            prog_tol: 1e-9,
            max_iter: 500,
            suff_dec: 1e-4,
            interp: Interpolation::Cubic,
            memory: 10,
            use_spectral: true,
            curvilinear: false,
            feasible_init: false,
            test_opt: true,
            bb_type: BbType::Long,
            num_diff: NumDiff::Analytic,
        }
    }
}

impl SpgOptions {
    pub fn validate(&self) -> PqnResult<()> {
        check_tol("opt_tol", self.opt_tol)?;
        check_tol("prog_tol", self.prog_tol)?;
        check_suff_dec(self.suff_dec)?;
        check_verbose(self.verbose)?;
        check_positive("max_iter", self.max_iter)?;
        check_positive("memory", self.memory)?;
        Ok(())
    }
}

fn check_tol(name: &'static str, value: f64) -> PqnResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PqnError::InvalidOption {
            name,
            reason: format!("must be finite and non-negative, got {value}"),
        })
    }
}

fn check_suff_dec(value: f64) -> PqnResult<()> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(PqnError::InvalidOption {
            name: "suff_dec",
            reason: format!("must lie in [0, 1), got {value}"),
        })
    }
}

fn check_verbose(value: u8) -> PqnResult<()> {
    if value <= 3 {
        Ok(())
    } else {
        Err(PqnError::InvalidOption {
            name: "verbose",
            reason: format!("must be between 0 and 3, got {value}"),
        })
    }
}

fn check_positive(name: &'static str, value: usize) -> PqnResult<()> {
    if value >= 1 {
        Ok(())
    } else {
        Err(PqnError::InvalidOption {
            name,
            reason: "must be at least 1".to_string(),
        })
    }
}

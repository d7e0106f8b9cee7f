//! Caller-supplied oracles and a few stock projections.
//!
//! The solvers only ever see a point through two capabilities: an
//! [`Objective`] returning `(f, ∇f)` and a [`Projection`] onto the feasible
//! set. Both are implemented for plain closures, so most callers never name
//! the traits.

use crate::error::{Oracle, PqnError, PqnResult};
use crate::options::NumDiff;
use finitediff::FiniteDiff;
use ndarray::Array1;
use std::cell::RefCell;

/// A smooth objective returning its value and gradient at `x`.
pub trait Objective {
    fn evaluate(&mut self, x: &Array1<f64>) -> (f64, Array1<f64>);
}

impl<F> Objective for F
where
    F: FnMut(&Array1<f64>) -> (f64, Array1<f64>),
{
    fn evaluate(&mut self, x: &Array1<f64>) -> (f64, Array1<f64>) {
        self(x)
    }
}

/// Euclidean projection onto a closed convex set.
pub trait Projection {
    fn project(&mut self, x: &Array1<f64>) -> Array1<f64>;
}

impl<F> Projection for F
where
    F: FnMut(&Array1<f64>) -> Array1<f64>,
{
    fn project(&mut self, x: &Array1<f64>) -> Array1<f64> {
        self(x)
    }
}

/// The whole space; projection is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconstrained;

impl Projection for Unconstrained {
    fn project(&mut self, x: &Array1<f64>) -> Array1<f64> {
        x.clone()
    }
}

/// Coordinate-wise bounds `lower <= x <= upper`.
#[derive(Debug, Clone)]
pub struct BoxProjection {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl BoxProjection {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> PqnResult<Self> {
        if lower.len() != upper.len() {
            return Err(PqnError::InvalidOption {
                name: "bounds",
                reason: format!(
                    "lower has {} entries but upper has {}",
                    lower.len(),
                    upper.len()
                ),
            });
        }
        for i in 0..lower.len() {
            if !(lower[i] <= upper[i]) {
                return Err(PqnError::InvalidOption {
                    name: "bounds",
                    reason: format!("lower bound exceeds upper bound at index {i}"),
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// The same interval `[lo, hi]` for each of `n` coordinates.
    pub fn uniform(n: usize, lo: f64, hi: f64) -> PqnResult<Self> {
        Self::new(Array1::from_elem(n, lo), Array1::from_elem(n, hi))
    }

    pub fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &Array1<f64> {
        &self.upper
    }
}

impl Projection for BoxProjection {
    // The result has the box's dimension whatever the length of `x`.
    // Coordinates missing from a short point are taken from `lower`.
    fn project(&mut self, x: &Array1<f64>) -> Array1<f64> {
        Array1::from_shape_fn(self.lower.len(), |i| {
            let (lo, hi) = (self.lower[i], self.upper[i]);
            match x.get(i) {
                Some(&v) if v < lo => lo,
                Some(&v) if v > hi => hi,
                Some(&v) => v,
                None => lo,
            }
        })
    }
}

/// The probability simplex `{ w : w >= 0, sum(w) = 1 }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplexProjection;

impl Projection for SimplexProjection {
    fn project(&mut self, v: &Array1<f64>) -> Array1<f64> {
        if v.is_empty() {
            return v.clone();
        }
        let mut mu = v.to_vec();
        mu.sort_by(|a, b| b.total_cmp(a));
        let mut sum = 0.0;
        let mut rho = 1;
        let mut sum_rho = mu[0];
        for (j, &m) in mu.iter().enumerate() {
            sum += m;
            if m - (sum - 1.0) / (j + 1) as f64 > 0.0 {
                rho = j + 1;
                sum_rho = sum;
            }
        }
        let theta = (sum_rho - 1.0) / rho as f64;
        v.mapv(|vi| (vi - theta).max(0.0))
    }
}

// Evaluates the objective and enforces the gradient length. With numerical
// differentiation only the oracle's values are used.
pub(crate) fn evaluate_checked<O: Objective + ?Sized>(
    obj_fn: &mut O,
    x: &Array1<f64>,
    num_diff: NumDiff,
) -> PqnResult<(f64, Array1<f64>)> {
    let n = x.len();
    if num_diff == NumDiff::Analytic {
        let (f, g) = obj_fn.evaluate(x);
        if g.len() != n {
            return Err(PqnError::DimensionMismatch {
                oracle: Oracle::Objective,
                expected: n,
                found: g.len(),
            });
        }
        return Ok((f, g));
    }

    let f = obj_fn.evaluate(x).0;
    let cell = RefCell::new(obj_fn);
    let value = |p: &Vec<f64>| -> f64 {
        let point = Array1::from_vec(p.clone());
        cell.borrow_mut().evaluate(&point).0
    };
    let base = x.to_vec();
    let g = match num_diff {
        NumDiff::CentralDifference => base.central_diff(&value),
        _ => base.forward_diff(&value),
    };
    Ok((f, Array1::from_vec(g)))
}

// Projects and enforces the output length.
pub(crate) fn project_checked<P: Projection + ?Sized>(
    proj_fn: &mut P,
    x: &Array1<f64>,
) -> PqnResult<Array1<f64>> {
    let p = proj_fn.project(x);
    if p.len() != x.len() {
        return Err(PqnError::DimensionMismatch {
            oracle: Oracle::Projection,
            expected: x.len(),
            found: p.len(),
        });
    }
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::{
        BoxProjection, Projection, SimplexProjection, Unconstrained, evaluate_checked,
        project_checked,
    };
    use crate::error::{Oracle, PqnError};
    use crate::options::NumDiff;
    use ndarray::{Array1, array};
    use spectral::prelude::*;

    fn max_abs_diff(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        (a - b).iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    #[test]
    fn box_projection_clamps_and_is_idempotent() {
        let mut bx = BoxProjection::new(array![0.0, -1.0, 2.0], array![1.0, 1.0, 2.0]).unwrap();
        let p = bx.project(&array![1.5, -3.0, 0.0]);
        assert_eq!(p, array![1.0, -1.0, 2.0]);
        assert_eq!(bx.project(&p), p);
        let inside = array![0.5, 0.0, 2.0];
        assert_eq!(bx.project(&inside), inside);
    }

    #[test]
    fn box_projection_rejects_bad_bounds() {
        assert!(BoxProjection::new(array![0.0], array![1.0, 2.0]).is_err());
        assert!(BoxProjection::new(array![2.0], array![1.0]).is_err());
        assert!(BoxProjection::uniform(3, 0.0, 1.0).is_ok());
    }

    #[test]
    fn simplex_projection_lands_on_simplex() {
        let mut simplex = SimplexProjection;
        for v in [
            array![0.2, 0.3, 0.5],
            array![3.0, -1.0, 0.5, 2.0],
            array![-5.0, -5.0],
            array![10.0],
        ] {
            let w = simplex.project(&v);
            assert_that!(&w.sum()).is_close_to(1.0, 1e-12);
            assert!(w.iter().all(|&wi| wi >= 0.0));
            let again = simplex.project(&w);
            assert_that!(&max_abs_diff(&again, &w)).is_less_than(1e-12);
        }
    }

    #[test]
    fn simplex_projection_known_values() {
        let mut simplex = SimplexProjection;
        let w = simplex.project(&array![1.0, 1.0]);
        assert_that!(&max_abs_diff(&w, &array![0.5, 0.5])).is_less_than(1e-15);
        let w = simplex.project(&array![2.0, 0.0, 0.0]);
        assert_that!(&max_abs_diff(&w, &array![1.0, 0.0, 0.0])).is_less_than(1e-15);
        let w = simplex.project(&array![0.5, 0.2, 0.0]);
        assert_that!(&max_abs_diff(&w, &array![0.6, 0.3, 0.1])).is_less_than(1e-12);
    }

    #[test]
    fn unconstrained_is_identity() {
        let x = array![1.0, -2.0];
        assert_eq!(Unconstrained.project(&x), x);
    }

    #[test]
    fn closures_act_as_oracles() {
        let mut clamp = |x: &Array1<f64>| x.mapv(|v| v.max(0.0));
        let p = project_checked(&mut clamp, &array![-1.0, 2.0]).unwrap();
        assert_eq!(p, array![0.0, 2.0]);
    }

    #[test]
    fn wrong_lengths_are_reported() {
        let mut bad_proj = |x: &Array1<f64>| Array1::<f64>::zeros(x.len() + 1);
        match project_checked(&mut bad_proj, &array![1.0, 2.0]) {
            Err(PqnError::DimensionMismatch {
                oracle,
                expected,
                found,
            }) => {
                assert_eq!(oracle, Oracle::Projection);
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected DimensionMismatch, got {:?}", other),
        }
        let mut plane = BoxProjection::uniform(2, 0.0, 1.0).unwrap();
        for (x, found) in [(array![0.5, 0.5, 0.5], 2), (array![0.5], 2)] {
            match project_checked(&mut plane, &x) {
                Err(PqnError::DimensionMismatch {
                    oracle: Oracle::Projection,
                    expected,
                    found: got,
                }) => {
                    assert_eq!(expected, x.len());
                    assert_eq!(got, found);
                }
                other => panic!("expected DimensionMismatch, got {:?}", other),
            }
        }
        let mut bad_obj = |x: &Array1<f64>| (x.sum(), array![1.0]);
        assert!(matches!(
            evaluate_checked(&mut bad_obj, &array![1.0, 2.0], NumDiff::Analytic),
            Err(PqnError::DimensionMismatch {
                oracle: Oracle::Objective,
                ..
            })
        ));
    }

    #[test]
    fn numerical_gradients_ignore_oracle_gradient() {
        // Value-only oracle: the returned gradient is deliberately empty.
        let mut value_only = |x: &Array1<f64>| {
            let f = (x[0] - 1.0).powi(2) + 3.0 * x[1] * x[1];
            (f, Array1::<f64>::zeros(0))
        };
        let x = array![2.0, -1.0];
        let want = array![2.0, -6.0];
        let (f, g) = evaluate_checked(&mut value_only, &x, NumDiff::CentralDifference).unwrap();
        assert_that!(&f).is_close_to(4.0, 1e-15);
        assert_that!(&max_abs_diff(&g, &want)).is_less_than(1e-5);
        let (_, g) = evaluate_checked(&mut value_only, &x, NumDiff::ForwardDifference).unwrap();
        assert_that!(&max_abs_diff(&g, &want)).is_less_than(1e-4);
    }
}

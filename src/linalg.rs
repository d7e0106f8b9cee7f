// Small dense solvers. The systems here are tiny (2k x 2k for the compact
// L-BFGS matrix, at most 6 x 6 for interpolation), so a hand-rolled LU keeps
// the crate free of a LAPACK dependency.

use ndarray::{Array1, Array2};

/// LU factorization with partial pivoting, `P A = L U`, stored in place.
#[derive(Debug, Clone)]
pub(crate) struct LuFactor {
    lu: Array2<f64>,
    perm: Vec<usize>,
}

impl LuFactor {
    // Pivots below this fraction of the largest entry count as singular.
    const PIVOT_RTOL: f64 = 1e-14;

    pub(crate) fn factor(a: &Array2<f64>) -> Option<Self> {
        let n = a.nrows();
        if a.ncols() != n {
            return None;
        }
        let mut lu = a.clone();
        let mut perm: Vec<usize> = (0..n).collect();
        let scale = lu.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        if n > 0 && (!scale.is_finite() || scale == 0.0) {
            return None;
        }
        let tiny = Self::PIVOT_RTOL * scale;
        for k in 0..n {
            let mut p = k;
            let mut best = lu[[k, k]].abs();
            for i in (k + 1)..n {
                let v = lu[[i, k]].abs();
                if v > best {
                    best = v;
                    p = i;
                }
            }
            if best <= tiny {
                return None;
            }
            if p != k {
                for j in 0..n {
                    lu.swap([k, j], [p, j]);
                }
                perm.swap(k, p);
            }
            let pivot = lu[[k, k]];
            for i in (k + 1)..n {
                let factor = lu[[i, k]] / pivot;
                lu[[i, k]] = factor;
                for j in (k + 1)..n {
                    lu[[i, j]] -= factor * lu[[k, j]];
                }
            }
        }
        Some(Self { lu, perm })
    }

    pub(crate) fn dim(&self) -> usize {
        self.perm.len()
    }

    pub(crate) fn solve(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.dim();
        // Forward solve: L y = P b (unit diagonal)
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let mut sum = b[self.perm[i]];
            for k in 0..i {
                sum -= self.lu[[i, k]] * y[k];
            }
            y[i] = sum;
        }
        // Backward solve: U x = y
        let mut x = Array1::<f64>::zeros(n);
        for i in (0..n).rev() {
            let mut sum = y[i];
            for k in (i + 1)..n {
                sum -= self.lu[[i, k]] * x[k];
            }
            x[i] = sum / self.lu[[i, i]];
        }
        x
    }
}

/// Solves the square system `a x = b`, or `None` when `a` is singular.
pub(crate) fn lu_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    if a.nrows() != b.len() {
        return None;
    }
    LuFactor::factor(a).map(|f| f.solve(b))
}

/// `max_i |v_i|`
pub(crate) fn norm_inf(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

/// `sum_i |v_i|`
pub(crate) fn norm_l1(v: &Array1<f64>) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

#[cfg(test)]
mod tests {
    use super::{LuFactor, lu_solve, norm_inf, norm_l1};
    use ndarray::{Array2, array};
    use spectral::prelude::*;

    #[test]
    fn solves_system_that_needs_pivoting() {
        let a = array![[0.0, 2.0, 1.0], [1.0, -1.0, 0.0], [3.0, 0.0, -4.0]];
        let x_true = array![1.0, -2.0, 0.5];
        let b = a.dot(&x_true);
        let x = lu_solve(&a, &b).unwrap();
        for i in 0..3 {
            assert_that!(&x[i]).is_close_to(x_true[i], 1e-12);
        }
    }

    #[test]
    fn symmetric_indefinite_matrix() {
        // Same sign pattern as the compact L-BFGS middle matrix.
        let a = array![[2.0, 0.5], [0.5, -1.0]];
        let b = array![1.0, 1.0];
        let x = lu_solve(&a, &b).unwrap();
        let r = a.dot(&x) - &b;
        assert_that!(&r.iter().map(|v| v.abs()).fold(0.0, f64::max)).is_less_than(1e-12);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(LuFactor::factor(&a).is_none());
        assert!(LuFactor::factor(&Array2::<f64>::zeros((2, 2))).is_none());
    }

    #[test]
    fn factor_is_reusable() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let lu = LuFactor::factor(&a).unwrap();
        assert_eq!(lu.dim(), 2);
        for b in [array![1.0, 0.0], array![0.0, 1.0], array![2.0, -7.0]] {
            let x = lu.solve(&b);
            let r = a.dot(&x) - &b;
            assert_that!(&r.dot(&r).sqrt()).is_less_than(1e-12);
        }
    }

    #[test]
    fn vector_norms() {
        let v = array![3.0, -4.0, 0.5];
        assert_that!(&norm_inf(&v)).is_close_to(4.0, 0.0);
        assert_that!(&norm_l1(&v)).is_close_to(7.5, 0.0);
    }
}

//! Limited-memory BFGS curvature history and its compact Hessian form.
//!
//! Correction pairs `s = x_k - x_{k-1}`, `y = g_k - g_{k-1}` live in a
//! preallocated ring of column slots; once full, each admissible pair
//! overwrites the oldest one. [`LbfgsMemory::compact`] rebuilds the compact
//! representation (Byrd, Nocedal & Schnabel) from the current contents:
//!
//! ```text
//! B = I / Hdiag - N M^{-1} N^T,   N = [S / Hdiag, Y]
//! M = [[S^T S / Hdiag, L], [L^T, -D]]
//! ```
//!
//! where `L` is the strictly lower part of `S^T Y` and `D` its diagonal.

use crate::linalg::LuFactor;
use ndarray::{Array1, Array2, ArrayView1, s};

/// Bounded FIFO store of curvature pairs plus the initial Hessian scale.
#[derive(Debug, Clone)]
pub struct LbfgsMemory {
    s_slots: Array2<f64>,
    y_slots: Array2<f64>,
    // Slot holding the oldest pair.
    head: usize,
    len: usize,
    hdiag: f64,
}

impl LbfgsMemory {
    /// Pairs with `yᵀs` at or below this value are not stored.
    pub const CURVATURE_THRESHOLD: f64 = 1e-10;

    /// Creates an empty history for `n` variables holding at most
    /// `capacity` pairs (at least one). `Hdiag` starts at 1.
    pub fn new(n: usize, capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            s_slots: Array2::zeros((n, cap)),
            y_slots: Array2::zeros((n, cap)),
            head: 0,
            len: 0,
            hdiag: 1.0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.s_slots.ncols()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Scale of the initial inverse Hessian, `yᵀs / yᵀy` of the last
    /// accepted pair.
    pub fn hdiag(&self) -> f64 {
        self.hdiag
    }

    /// Offers a new pair. Returns `false` (and leaves the history and
    /// `Hdiag` untouched) when the curvature condition `yᵀs > 1e-10` fails.
    pub fn update(&mut self, y: &Array1<f64>, s: &Array1<f64>) -> bool {
        let ys = y.dot(s);
        if !(ys > Self::CURVATURE_THRESHOLD) {
            return false;
        }
        let cap = self.capacity();
        let slot = if self.len < cap {
            let slot = (self.head + self.len) % cap;
            self.len += 1;
            slot
        } else {
            let slot = self.head;
            self.head = (self.head + 1) % cap;
            slot
        };
        self.s_slots.column_mut(slot).assign(s);
        self.y_slots.column_mut(slot).assign(y);
        self.hdiag = ys / y.dot(y);
        true
    }

    /// Stored pairs `(s, y)` from oldest to newest.
    pub fn pairs(&self) -> impl Iterator<Item = (ArrayView1<'_, f64>, ArrayView1<'_, f64>)> + '_ {
        let cap = self.capacity();
        (0..self.len).map(move |i| {
            let slot = (self.head + i) % cap;
            (self.s_slots.column(slot), self.y_slots.column(slot))
        })
    }

    /// Builds the compact representation of the current approximation.
    pub fn compact(&self) -> CompactHessian {
        let n = self.s_slots.nrows();
        let k = self.len;
        let hdiag = self.hdiag;
        if k == 0 {
            return CompactHessian::scaled_identity(n, hdiag);
        }

        let mut s_mat = Array2::<f64>::zeros((n, k));
        let mut y_mat = Array2::<f64>::zeros((n, k));
        for (j, (sj, yj)) in self.pairs().enumerate() {
            s_mat.column_mut(j).assign(&sj);
            y_mat.column_mut(j).assign(&yj);
        }
        let sts = s_mat.t().dot(&s_mat);
        let sty = s_mat.t().dot(&y_mat);

        let mut m = Array2::<f64>::zeros((2 * k, 2 * k));
        m.slice_mut(s![..k, ..k]).assign(&(&sts / hdiag));
        for i in 0..k {
            for j in 0..i {
                // L[i, j] = s_iᵀ y_j for i > j
                m[[i, k + j]] = sty[[i, j]];
                m[[k + j, i]] = sty[[i, j]];
            }
            m[[k + i, k + i]] = -sty[[i, i]];
        }

        let mut n_mat = Array2::<f64>::zeros((n, 2 * k));
        n_mat.slice_mut(s![.., ..k]).assign(&(&s_mat / hdiag));
        n_mat.slice_mut(s![.., k..]).assign(&y_mat);

        match LuFactor::factor(&m) {
            Some(lu) => CompactHessian {
                hdiag,
                n_mat,
                lu: Some(lu),
            },
            None => {
                log::warn!(
                    "[L-BFGS] Compact middle matrix is singular with {} pairs; using scaled identity.",
                    k
                );
                CompactHessian::scaled_identity(n, hdiag)
            }
        }
    }
}

/// Hessian approximation in compact form, ready for repeated products.
///
/// `M` is factored once when the representation is built, so every
/// Hessian-vector product costs two thin matrix-vector products and a
/// `2k x 2k` triangular solve.
#[derive(Debug, Clone)]
pub struct CompactHessian {
    hdiag: f64,
    n_mat: Array2<f64>,
    lu: Option<LuFactor>,
}

impl CompactHessian {
    /// `B = I / hdiag` with no stored corrections.
    pub fn scaled_identity(n: usize, hdiag: f64) -> Self {
        Self {
            hdiag,
            n_mat: Array2::zeros((n, 0)),
            lu: None,
        }
    }

    /// Number of correction pairs folded into the approximation.
    pub fn rank(&self) -> usize {
        self.n_mat.ncols() / 2
    }

    pub fn hdiag(&self) -> f64 {
        self.hdiag
    }

    /// Returns `B v`.
    pub fn hv(&self, v: &Array1<f64>) -> Array1<f64> {
        let mut hv = v / self.hdiag;
        if let Some(lu) = &self.lu {
            let ntv = self.n_mat.t().dot(v);
            let w = lu.solve(&ntv);
            hv -= &self.n_mat.dot(&w);
        }
        hv
    }
}

//! Numerical legality checks used to gate every line-search decision.
//!
//! A value is legal when it is fully real and finite. Oracles in this crate
//! are `f64`-typed, so a non-zero imaginary part cannot reach the solvers and
//! the check reduces to rejecting NaN and ±Infinity.

use ndarray::{ArrayBase, Data, Dimension};

/// Values that can be screened for NaN / Infinity.
pub trait Legal {
    fn is_legal(&self) -> bool;
}

impl Legal for f64 {
    #[inline]
    fn is_legal(&self) -> bool {
        self.is_finite()
    }
}

impl Legal for [f64] {
    fn is_legal(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }
}

impl<S, D> Legal for ArrayBase<S, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    fn is_legal(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }
}

/// Returns `true` when `value` holds no NaN or infinite entries.
#[inline]
pub fn is_legal<T: Legal + ?Sized>(value: &T) -> bool {
    value.is_legal()
}

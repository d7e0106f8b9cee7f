//! Polynomial interpolation used to choose backtracking step lengths.
//!
//! Given a handful of samples `(x, f(x), f'(x)?)` along a search line, fit
//! the lowest-order polynomial that honours every known value and
//! derivative, and return the position of its minimum inside a bracket.

use crate::linalg::lu_solve;
use ndarray::{Array1, Array2};

/// One sample of a univariate function: position, value and (optionally)
/// the derivative at that position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpPoint {
    pub x: f64,
    pub f: f64,
    pub g: Option<f64>,
}

impl InterpPoint {
    pub fn new(x: f64, f: f64, g: Option<f64>) -> Self {
        Self { x, f, g }
    }

    pub fn with_slope(x: f64, f: f64, g: f64) -> Self {
        Self { x, f, g: Some(g) }
    }

    pub fn value_only(x: f64, f: f64) -> Self {
        Self { x, f, g: None }
    }
}

/// Returns the minimizer of the interpolating polynomial through `points`,
/// restricted to `bounds` (defaults to the span of the sample positions).
///
/// Two samples with known derivatives take a closed-form cubic path. Any
/// other combination solves the square system formed by the known values and
/// derivatives, then compares the polynomial at the bracket ends, the sample
/// positions and every real critical point inside the bracket. When nothing
/// usable is found the midpoint of the bracket is returned.
pub fn polyinterp(points: &[InterpPoint], bounds: Option<(f64, f64)>) -> f64 {
    if points.is_empty() {
        return bounds.map_or(0.0, |(lo, hi)| 0.5 * (lo + hi));
    }
    let x_lo = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let x_hi = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let (lo, hi) = bounds.unwrap_or((x_lo, x_hi));
    let mid = 0.5 * (lo + hi);

    if points.len() == 2 && points.iter().all(|p| p.g.is_some()) {
        return cubic_two_point(&points[0], &points[1], lo, hi);
    }

    let n_known = points.len() + points.iter().filter(|p| p.g.is_some()).count();
    let order = n_known - 1;
    if order == 0 {
        return mid;
    }

    // Coefficients are stored highest power first.
    let mut a = Array2::<f64>::zeros((n_known, order + 1));
    let mut b = Array1::<f64>::zeros(n_known);
    let mut row = 0;
    for p in points {
        for j in 0..=order {
            a[[row, j]] = p.x.powi((order - j) as i32);
        }
        b[row] = p.f;
        row += 1;
    }
    for p in points {
        if let Some(g) = p.g {
            for j in 0..order {
                let power = order - j;
                a[[row, j]] = power as f64 * p.x.powi(power as i32 - 1);
            }
            b[row] = g;
            row += 1;
        }
    }
    let Some(params) = lu_solve(&a, &b) else {
        return mid;
    };
    if params.iter().any(|c| !c.is_finite()) {
        return mid;
    }

    let dparams: Vec<f64> = (0..order)
        .map(|i| params[i] * (order - i) as f64)
        .collect();
    let mut candidates = vec![lo, hi];
    candidates.extend(points.iter().map(|p| p.x));
    candidates.extend(real_roots_within(&dparams, lo, hi));

    let mut best_pos = mid;
    let mut best_val = f64::INFINITY;
    for &xc in &candidates {
        if !(lo..=hi).contains(&xc) {
            continue;
        }
        let fc = polyval(params.as_slice().unwrap_or(&[]), xc);
        if fc.is_finite() && fc < best_val {
            best_val = fc;
            best_pos = xc;
        }
    }
    best_pos
}

// Closed-form minimizer of the cubic matching two values and two slopes.
fn cubic_two_point(p0: &InterpPoint, p1: &InterpPoint, lo: f64, hi: f64) -> f64 {
    let (pmin, pnot) = if p1.f < p0.f { (p1, p0) } else { (p0, p1) };
    let gmin = pmin.g.unwrap_or(0.0);
    let gnot = pnot.g.unwrap_or(0.0);
    let d1 = gmin + gnot - 3.0 * (pmin.f - pnot.f) / (pmin.x - pnot.x);
    let disc = d1 * d1 - gmin * gnot;
    if disc >= 0.0 {
        let d2 = disc.sqrt();
        let t = pnot.x - (pnot.x - pmin.x) * ((gnot + d2 - d1) / (gnot - gmin + 2.0 * d2));
        if t.is_finite() {
            return t.clamp(lo.min(hi), hi.max(lo));
        }
    }
    0.5 * (lo + hi)
}

// Horner evaluation, coefficients highest power first.
fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().fold(0.0, |acc, c| acc * x + c)
}

// Real roots of the polynomial inside [lo, hi]. Degrees up to two are solved
// in closed form; anything higher is bracketed on a grid and bisected.
fn real_roots_within(coeffs: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let scale = coeffs.iter().fold(0.0f64, |m, c| m.max(c.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return Vec::new();
    }
    let lead = coeffs
        .iter()
        .position(|c| c.abs() > 1e-14 * scale)
        .unwrap_or(coeffs.len());
    let c = &coeffs[lead..];
    let roots = match c.len() {
        0 | 1 => Vec::new(),
        2 => vec![-c[1] / c[0]],
        3 => {
            let (qa, qb, qc) = (c[0], c[1], c[2]);
            let disc = qb * qb - 4.0 * qa * qc;
            if disc < 0.0 {
                Vec::new()
            } else {
                // Numerically stable pair.
                let q = -0.5 * (qb + qb.signum() * disc.sqrt());
                let mut r = vec![q / qa];
                if q != 0.0 {
                    r.push(qc / q);
                }
                r
            }
        }
        _ => bracketed_roots(c, lo, hi),
    };
    roots
        .into_iter()
        .filter(|r| r.is_finite() && *r >= lo && *r <= hi)
        .collect()
}

fn bracketed_roots(coeffs: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    const GRID: usize = 64;
    if !(hi > lo) {
        return Vec::new();
    }
    let h = (hi - lo) / GRID as f64;
    let mut roots = Vec::new();
    let mut a = lo;
    let mut fa = polyval(coeffs, a);
    for k in 1..=GRID {
        let b = if k == GRID { hi } else { lo + k as f64 * h };
        let fb = polyval(coeffs, b);
        if fa == 0.0 {
            roots.push(a);
        } else if fa * fb < 0.0 {
            let (mut l, mut r, mut fl) = (a, b, fa);
            for _ in 0..80 {
                let m = 0.5 * (l + r);
                let fm = polyval(coeffs, m);
                if fm == 0.0 {
                    l = m;
                    r = m;
                    break;
                }
                if fl * fm < 0.0 {
                    r = m;
                } else {
                    l = m;
                    fl = fm;
                }
            }
            roots.push(0.5 * (l + r));
        }
        a = b;
        fa = fb;
    }
    if fa == 0.0 {
        roots.push(hi);
    }
    roots
}

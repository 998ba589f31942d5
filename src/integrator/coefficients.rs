//! Clenshaw-Curtis coefficient tables.
//!
//! The spec treats these as "constant numeric data" supplied by an external
//! collaborator. Rather than hand-transcribing a literal table, this module
//! *derives* it once, lazily, and caches the result — nothing here depends
//! on the function being integrated.
//!
//! Samples are taken at the Chebyshev-Lobatto extrema (cheap to generate,
//! nested across depths), but each interval's samples are *fit* in the
//! orthonormal Legendre basis `phi_k(x) = sqrt(k + 0.5) * P_k(x)`, not the
//! Chebyshev basis: `phi_0 = 1/sqrt(2)` is what makes
//! `igral = (b - a) * c[depth, 0] / sqrt(2)` (see
//! [`crate::integrator::interval`]) the correct reconstruction of the
//! integral from the leading fitted coefficient.
//!
//! Four nested point sets are used, doubling in size at each refinement
//! `depth`: `N[d] - 1 = 2^d * (N[0] - 1)`, i.e. `N = [5, 9, 17, 33]`. Nesting
//! means every node of a coarser set reappears (at a stride of 2) in the
//! next finer set, which is what lets [`crate::integrator::interval`] reuse
//! samples across depths instead of re-evaluating the integrand.
use std::f64::consts::PI;
use std::sync::OnceLock;

use faer::Mat;

use crate::E;

/// Sample counts at refinement depths 0..=3.
pub const N: [usize; 4] = [5, 9, 17, 33];

/// `ndiv` threshold past which a growing divergence counter aborts the
/// learner (subject also to the `2*ndiv > rdepth` guard).
pub const NDIV_MAX: u32 = 20;

/// Precomputed, depth-indexed numerical tables shared by every `Interval`.
pub struct CoefficientTables {
    /// Chebyshev-Lobatto abscissae on `[-1, 1]`, one `Vec` per depth.
    pub xi: [Vec<E>; 4],
    /// Inverse Legendre-Vandermonde matrix at each depth: `c = V_inv[d] @ fx`.
    pub v_inv: [Mat<E>; 4],
    /// Three-term orthonormal-Legendre recurrence coefficients
    /// (`x * phi_k = alpha_k * phi_{k+1} + gamma_k * phi_{k-1}`), shared
    /// across depths and indexed by degree `k`.
    pub alpha: Vec<E>,
    /// See [`CoefficientTables::alpha`].
    pub gamma: Vec<E>,
    /// Downdating seed vector per depth, length `N[d] + 1`: the unit vector
    /// at the top degree, basis-agnostic since only `alpha`/`gamma` encode
    /// which orthogonal family is in play.
    pub b_def: [Vec<E>; 4],
    /// Condition number of the depth-`d` change of basis, used by the
    /// machine-precision termination test.
    pub vcond: [E; 4],
    /// Coefficient-space transform for a child that shares its parent's
    /// left endpoint after a split.
    pub t_left: Mat<E>,
    /// Coefficient-space transform for a child that shares its parent's
    /// right endpoint after a split.
    pub t_right: Mat<E>,
}

static TABLES: OnceLock<CoefficientTables> = OnceLock::new();

/// Returns the process-wide coefficient tables, building them on first use.
pub fn tables() -> &'static CoefficientTables {
    TABLES.get_or_init(CoefficientTables::build)
}

fn chebyshev_lobatto(n: usize) -> Vec<E> {
    (0..n)
        .map(|k| -((PI * k as E / (n as E - 1.0)).cos()))
        .collect()
}

/// Three-term recurrence coefficients for the orthonormal Legendre basis
/// `phi_k(x) = sqrt(k + 0.5) * P_k(x)`:
/// `x * phi_k = alpha_k * phi_{k+1} + gamma_k * phi_{k-1}`, with
/// `alpha_k = (k+1) / sqrt((2k+1)(2k+3))` and `gamma_k = k / sqrt(4k^2 - 1)`
/// (`gamma_0 = 0`, since `phi_{-1} = 0`).
fn legendre_recurrence(max_n: usize) -> (Vec<E>, Vec<E>) {
    let mut alpha = vec![0.0; max_n];
    let mut gamma = vec![0.0; max_n];
    for k in 0..max_n {
        let kf = k as E;
        alpha[k] = (kf + 1.0) / ((2.0 * kf + 1.0) * (2.0 * kf + 3.0)).sqrt();
        gamma[k] = if k == 0 { 0.0 } else { (kf * kf / (4.0 * kf * kf - 1.0)).sqrt() };
    }
    (alpha, gamma)
}

/// `V[k][j] = phi_j(nodes[k])`, the orthonormal-Legendre basis functions
/// evaluated via the `x * phi_k = alpha_k * phi_{k+1} + gamma_k * phi_{k-1}`
/// recurrence (`phi_0 = 1/sqrt(2)`, `phi_{-1} = 0`).
fn legendre_vandermonde(nodes: &[E], max_n: usize, alpha: &[E], gamma: &[E]) -> Vec<Vec<E>> {
    let n = nodes.len();
    let mut v = vec![vec![0.0; max_n]; n];
    let phi0 = std::f64::consts::FRAC_1_SQRT_2;
    for (k, &x) in nodes.iter().enumerate() {
        v[k][0] = phi0;
        if max_n > 1 {
            v[k][1] = x * phi0 / alpha[0];
        }
        for j in 1..max_n - 1 {
            v[k][j + 1] = (x * v[k][j] - gamma[j] * v[k][j - 1]) / alpha[j];
        }
    }
    v
}

/// Dense Gauss-Jordan inversion with partial pivoting. Used only to build
/// the small (<=33x33) tables above once at process start.
fn invert(a: &[Vec<E>]) -> Vec<Vec<E>> {
    let n = a.len();
    let mut m: Vec<Vec<E>> = a.to_vec();
    let mut inv: Vec<Vec<E>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let mut pivot = col;
        let mut best = m[col][col].abs();
        for row in (col + 1)..n {
            if m[row][col].abs() > best {
                best = m[row][col].abs();
                pivot = row;
            }
        }
        m.swap(col, pivot);
        inv.swap(col, pivot);

        let diag = m[col][col];
        for j in 0..n {
            m[col][j] /= diag;
            inv[col][j] /= diag;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor != 0.0 {
                for j in 0..n {
                    m[row][j] -= factor * m[col][j];
                    inv[row][j] -= factor * inv[col][j];
                }
            }
        }
    }
    inv
}

fn matmul(a: &[Vec<E>], b: &[Vec<E>]) -> Vec<Vec<E>> {
    let n = a.len();
    let k = b.len();
    let p = b[0].len();
    let mut out = vec![vec![0.0; p]; n];
    for i in 0..n {
        for kk in 0..k {
            let aik = a[i][kk];
            if aik == 0.0 {
                continue;
            }
            for j in 0..p {
                out[i][j] += aik * b[kk][j];
            }
        }
    }
    out
}

fn norm_inf(a: &[Vec<E>]) -> E {
    a.iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<E>())
        .fold(0.0, E::max)
}

fn to_mat(a: &[Vec<E>]) -> Mat<E> {
    let n = a.len();
    let p = a[0].len();
    Mat::from_fn(n, p, |i, j| a[i][j])
}

impl CoefficientTables {
    fn build() -> Self {
        let max_n = N[3];
        let (alpha, gamma) = legendre_recurrence(max_n);

        let mut xi: [Vec<E>; 4] = Default::default();
        let mut v_inv: [Mat<E>; 4] = [Mat::zeros(0, 0), Mat::zeros(0, 0), Mat::zeros(0, 0), Mat::zeros(0, 0)];
        let mut b_def: [Vec<E>; 4] = Default::default();
        let mut vcond: [E; 4] = [0.0; 4];

        for depth in 0..4 {
            let n = N[depth];
            let nodes = chebyshev_lobatto(n);
            let v = legendre_vandermonde(&nodes, n, &alpha, &gamma);
            let vinv = invert(&v);
            vcond[depth] = norm_inf(&v) * norm_inf(&vinv);

            let mut b = vec![0.0; n + 1];
            b[n] = 1.0;
            b_def[depth] = b;

            xi[depth] = nodes;
            v_inv[depth] = to_mat(&vinv);
        }

        // T_left/T_right: compose the affine half-interval map with the
        // degree-32 orthonormal-Legendre basis, then re-express in
        // coefficient space via V_inv[3]. A child that covers the left half
        // of its parent's domain sees parent-coordinate `x = (y - 1) / 2`
        // for its own normalized coordinate `y`; the right half sees
        // `x = (y + 1) / 2`.
        let nodes3 = chebyshev_lobatto(N[3]);
        let v3 = legendre_vandermonde(&nodes3, max_n, &alpha, &gamma);
        let v3_inv = invert(&v3);
        let mapped_left: Vec<E> = nodes3.iter().map(|&y| (y - 1.0) / 2.0).collect();
        let mapped_right: Vec<E> = nodes3.iter().map(|&y| (y + 1.0) / 2.0).collect();
        let a_left = legendre_vandermonde(&mapped_left, max_n, &alpha, &gamma);
        let a_right = legendre_vandermonde(&mapped_right, max_n, &alpha, &gamma);
        let t_left = to_mat(&matmul(&v3_inv, &a_left));
        let t_right = to_mat(&matmul(&v3_inv, &a_right));

        CoefficientTables {
            xi,
            v_inv,
            alpha,
            gamma,
            b_def,
            vcond,
            t_left,
            t_right,
        }
    }
}

/// Remove, one non-finite abscissa at a time, the contribution of each
/// placeholder from `c` (length `N[depth]`) using the three-term recurrence
/// downdating scheme. `nans` holds the in-range indices (into `xi[depth]`)
/// of the non-finite samples, in any order.
pub fn downdate(c: &mut [E], nans: &[usize], depth: usize) {
    let t = tables();
    let mut b = t.b_def[depth].clone();
    let mut m = N[depth] - 1;

    for &i in nans {
        b[m + 1] /= t.alpha[m];
        let xii = t.xi[depth][i];
        b[m] = (b[m] + xii * b[m + 1]) / t.alpha[m - 1];
        let mut j = m;
        while j >= 2 {
            j -= 1;
            b[j] = (b[j] + xii * b[j + 1] - t.gamma[j + 1] * b[j + 2]) / t.alpha[j - 1];
        }
        b = b[1..].to_vec();

        let bm = b[m];
        let scale = c[m] / bm;
        for k in 0..m {
            c[k] -= scale * b[k];
        }
        c[m] = 0.0;
        if m == 0 {
            break;
        }
        m -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_sets_are_nested() {
        let t = tables();
        for depth in 0..3 {
            let coarse = &t.xi[depth];
            let fine = &t.xi[depth + 1];
            for (k, &x) in coarse.iter().enumerate() {
                assert!((fine[2 * k] - x).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn nodes_span_the_reference_interval() {
        let t = tables();
        for depth in 0..4 {
            let nodes = &t.xi[depth];
            assert!((nodes[0] - (-1.0)).abs() < 1e-12);
            assert!((nodes[nodes.len() - 1] - 1.0).abs() < 1e-12);
            for w in nodes.windows(2) {
                assert!(w[0] < w[1]);
            }
        }
    }

    #[test]
    fn v_inv_round_trips_a_constant_function() {
        // The interpolant through a constant function is that constant
        // exactly; in the orthonormal basis (phi_0 = 1/sqrt(2)) that means
        // c[0] = sqrt(2), not 1 — phi_0 itself isn't the constant `1`.
        let t = tables();
        for depth in 0..4 {
            let n = N[depth];
            let ones = faer::Col::<E>::from_fn(n, |_| 1.0);
            let c = &t.v_inv[depth] * &ones;
            assert!((c[0] - std::f64::consts::SQRT_2).abs() < 1e-8, "depth {depth}: c0={}", c[0]);
            for j in 1..n {
                assert!(c[j].abs() < 1e-8, "depth {depth}: c[{j}]={}", c[j]);
            }
        }
    }

    #[test]
    fn vcond_is_positive_and_finite() {
        let t = tables();
        for depth in 0..4 {
            assert!(t.vcond[depth].is_finite());
            assert!(t.vcond[depth] > 0.0);
        }
    }
}

//! Dominant eigenpairs of (generally non-Hermitian) linear maps.
//!
//! Explicitly restarted Arnoldi iteration: a Krylov basis of `ncv` vectors is
//! built by modified Gram-Schmidt (with one re-orthogonalization pass), the
//! projected Hessenberg matrix is diagonalized densely, and the iteration is
//! restarted from the sum of the wanted Ritz vectors until their residuals
//! drop below the tolerance.

use ndarray as nd;
use ndarray_linalg::Eig;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use tracing::{ debug, warn };
use crate::error::{ MPSResult, config_err };

/// Options for [`arnoldi`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ArnoldiOptions {
    /// Number of eigenpairs wanted.
    pub num_ev: usize,
    /// Size of the Krylov basis built between restarts.
    pub ncv: usize,
    /// Maximum number of restarts.
    pub max_iter: usize,
    /// Relative tolerance on the Ritz residuals.
    pub tol: f64,
}

impl Default for ArnoldiOptions {
    fn default() -> Self {
        Self { num_ev: 1, ncv: 20, max_iter: 100, tol: 1e-12 }
    }
}

fn inner(a: &nd::Array1<C64>, b: &nd::Array1<C64>) -> C64 {
    a.iter().zip(b).fold(C64::zero(), |acc, (x, y)| acc + x.conj() * y)
}

fn vnorm(a: &nd::Array1<C64>) -> f64 {
    a.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
}

// eigenpairs of a dense matrix, sorted by decreasing magnitude
fn sorted_eig(h: &nd::Array2<C64>) -> MPSResult<(Vec<C64>, nd::Array2<C64>)> {
    let (theta, y) = h.eig()?;
    let mut order: Vec<usize> = (0..theta.len()).collect();
    order.sort_by(|a, b| theta[*b].norm().total_cmp(&theta[*a].norm()));
    let vals: Vec<C64> = order.iter().map(|k| theta[*k]).collect();
    let vecs = y.select(nd::Axis(1), &order);
    Ok((vals, vecs))
}

/// Find the `opts.num_ev` eigenvalues of largest magnitude of the linear map
/// `matvec` on a space of dimension `dim`, together with their (normalized)
/// eigenvectors, starting from `v0`.
///
/// Spaces no larger than the Krylov basis are diagonalized exactly. If the
/// residuals have not converged after `opts.max_iter` restarts, a warning is
/// logged and the current estimates are returned.
pub fn arnoldi<F>(
    matvec: F,
    dim: usize,
    v0: nd::Array1<C64>,
    opts: &ArnoldiOptions,
) -> MPSResult<(Vec<C64>, Vec<nd::Array1<C64>>)>
where F: Fn(&nd::Array1<C64>) -> MPSResult<nd::Array1<C64>>
{
    if dim == 0 { return config_err("cannot diagonalize a map on an empty space"); }
    if opts.num_ev == 0 { return config_err("no eigenpairs requested"); }
    if v0.len() != dim {
        return config_err(format!(
            "start vector of length {} for a space of dimension {dim}", v0.len()));
    }
    let k = opts.num_ev.min(dim);
    let ncv = opts.ncv.max(k + 2);

    if dim <= ncv {
        let mut mat: nd::Array2<C64> = nd::Array2::zeros((dim, dim));
        for j in 0..dim {
            let mut e: nd::Array1<C64> = nd::Array1::zeros(dim);
            e[j] = C64::from(1.0);
            mat.column_mut(j).assign(&matvec(&e)?);
        }
        let (vals, vecs) = sorted_eig(&mat)?;
        let vecs: Vec<nd::Array1<C64>>
            = (0..k)
            .map(|j| {
                let v = vecs.column(j).to_owned();
                let n = vnorm(&v);
                v.mapv(|x| x / n)
            })
            .collect();
        return Ok((vals[..k].to_vec(), vecs));
    }

    let mut v = v0;
    let n0 = vnorm(&v);
    if n0 == 0.0 {
        v = nd::Array1::from_elem(dim, C64::from(1.0));
    }
    let n0 = vnorm(&v);
    v.map_inplace(|x| { *x /= n0; });

    let mut vals: Vec<C64> = Vec::new();
    let mut vecs: Vec<nd::Array1<C64>> = Vec::new();
    for iter in 0..opts.max_iter {
        let mut basis: Vec<nd::Array1<C64>> = vec![v.clone()];
        let mut h: nd::Array2<C64> = nd::Array2::zeros((ncv + 1, ncv));
        let mut m = ncv;
        for j in 0..ncv {
            let mut w = matvec(&basis[j])?;
            for _ in 0..2 {
                for (i, q) in basis.iter().enumerate() {
                    let c = inner(q, &w);
                    h[[i, j]] += c;
                    w.scaled_add(-c, q);
                }
            }
            let beta = vnorm(&w);
            h[[j + 1, j]] = C64::from(beta);
            let scale = h.column(j).iter().map(|x| x.norm()).fold(0.0, f64::max);
            if beta <= 1e-14 * scale.max(1e-300) {
                // invariant subspace
                m = j + 1;
                break;
            }
            basis.push(w.mapv(|x| x / beta));
        }
        let hm = h.slice(nd::s![..m, ..m]).to_owned();
        let (theta, y) = sorted_eig(&hm)?;
        let beta = h[[m, m - 1]].norm();
        let kk = k.min(m);
        let mut converged = true;
        vals.clear();
        vecs.clear();
        for j in 0..kk {
            let res = beta * y[[m - 1, j]].norm();
            if res > opts.tol * theta[j].norm().max(f64::EPSILON) { converged = false; }
            let mut x: nd::Array1<C64> = nd::Array1::zeros(dim);
            basis.iter().take(m).zip(y.column(j))
                .for_each(|(q, yj)| { x.scaled_add(*yj, q); });
            let n = vnorm(&x);
            vals.push(theta[j]);
            vecs.push(x.mapv(|z| z / n));
        }
        if converged || m < ncv {
            debug!(restarts = iter, dim, "arnoldi converged");
            return Ok((vals, vecs));
        }
        let mut restart: nd::Array1<C64> = nd::Array1::zeros(dim);
        vecs.iter().for_each(|x| { restart += x; });
        let n = vnorm(&restart);
        v = if n > 0.0 { restart.mapv(|z| z / n) } else { vecs[0].clone() };
    }
    warn!(max_iter = opts.max_iter, dim, "arnoldi did not converge; returning the best estimate");
    Ok((vals, vecs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ Rng, SeedableRng, rngs::StdRng };

    // upper-triangular, so the eigenvalues are the diagonal entries
    fn triangular(n: usize, rng: &mut StdRng) -> nd::Array2<C64> {
        nd::Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                C64::from(if i == 0 { 2.0 } else { 1.0 / i as f64 })
            } else if i < j {
                C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5) * 0.1
            } else {
                C64::zero()
            }
        })
    }

    #[test]
    fn dominant_pairs_of_large_matrix() {
        let mut rng = StdRng::seed_from_u64(10546);
        let a = triangular(60, &mut rng);
        let v0: nd::Array1<C64>
            = (0..60).map(|_| C64::new(rng.gen(), rng.gen())).collect();
        let opts = ArnoldiOptions { num_ev: 2, ..ArnoldiOptions::default() };
        let (vals, vecs) = arnoldi(|x| Ok(a.dot(x)), 60, v0, &opts).unwrap();
        assert_abs_diff_eq!(vals[0].re, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(vals[1].re, 1.0, epsilon = 1e-9);
        for (l, x) in vals.iter().zip(&vecs) {
            let r = a.dot(x) - x.mapv(|z| z * l);
            assert!(vnorm(&r) < 1e-8);
        }
    }

    #[test]
    fn small_space_is_exact() {
        let a: nd::Array2<C64> = nd::array![
            [C64::from(0.0), C64::from(1.0)],
            [C64::from(-1.0), C64::from(0.0)],
        ];
        let v0 = nd::array![C64::from(1.0), C64::from(0.0)];
        let (vals, _) = arnoldi(|x| Ok(a.dot(x)), 2, v0, &ArnoldiOptions::default())
            .unwrap();
        // ±i, in either order
        assert_abs_diff_eq!(vals[0].norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(vals[0].re, 0.0, epsilon = 1e-12);
        assert!(arnoldi(|x| Ok(a.dot(x)), 3, nd::Array1::zeros(2), &ArnoldiOptions::default())
            .is_err());
    }
}

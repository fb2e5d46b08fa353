//! Compression of the bond dimension, by a truncating SVD sweep or by a
//! variational fit.

use std::borrow::Cow;
use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::debug;
use crate::{
    charges::LegCharge,
    decomp::{ SchmidtDecomp, c_order, frob_norm, scale_columns, scale_rows },
    env::MPSEnvironment,
    error::{ MPSResult, config_err },
    truncation::{ TruncParams, TruncationError },
};
use super::{ Form, MPS };

/// Strategy used by [`MPS::compress`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompressionMethod {
    /// A single canonicalizing sweep that truncates every bond.
    Svd,
    /// Two-site sweeps maximizing the overlap of a truncated guess with the
    /// original state.
    Variational,
}

/// Options for [`MPS::compress`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CompressionOptions {
    pub method: CompressionMethod,
    pub trunc_params: TruncParams,
    /// Maximum number of (right and left) sweeps of the variational method.
    pub max_sweeps: usize,
    /// Minimum number of sweeps of the variational method.
    pub min_sweeps: usize,
    /// The variational method stops once no two-site wavefunction changes by
    /// more than this (in `1 - |overlap|`) during a sweep.
    pub tol_theta_diff: f64,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Svd,
            trunc_params: TruncParams::default(),
            max_sweeps: 2,
            min_sweeps: 1,
            tol_theta_diff: 1e-8,
        }
    }
}

impl MPS {
    /// Compress a finite state in place, returning the truncation error.
    ///
    /// The state need not be canonical (e.g. after [`Self::add`]); afterwards
    /// it is, with the norm of the compressed state kept in [`Self::norm`].
    pub fn compress(&mut self, opts: &CompressionOptions) -> MPSResult<TruncationError> {
        if !self.finite() {
            return config_err("compression is only implemented for finite chains");
        }
        match opts.method {
            CompressionMethod::Svd => self.compress_svd(&opts.trunc_params),
            CompressionMethod::Variational => self.compress_variational(opts),
        }
    }

    /// Compress by bringing the state into canonical form with truncation.
    pub fn compress_svd(&mut self, trunc: &TruncParams) -> MPSResult<TruncationError> {
        self.canonical_form_finite(false, trunc)
    }

    fn compress_variational(&mut self, opts: &CompressionOptions)
        -> MPSResult<TruncationError>
    {
        let L = self.L();
        let trunc = &opts.trunc_params;
        if L < 2 { return self.compress_svd(trunc); }
        let mut guess = self.clone();
        guess.norm = 1.0;
        let mut err = guess.canonical_form_finite(true, trunc)?;
        let target = self.clone();
        let mut env = MPSEnvironment::from_cows(Cow::Owned(guess), Cow::Borrowed(&target))?;
        let mut norm = 1.0;
        for sweep in 0..opts.max_sweeps.max(1) {
            let mut max_diff: f64 = 0.0;
            err = TruncationError::none();
            for i in 0..L - 1 {
                let (e, n, d) = update_pair(&mut env, i, true, trunc)?;
                err += e;
                norm = n;
                max_diff = max_diff.max(d);
            }
            for i in (0..L - 1).rev() {
                let (e, n, d) = update_pair(&mut env, i, false, trunc)?;
                err += e;
                norm = n;
                max_diff = max_diff.max(d);
            }
            debug!(sweep, max_diff, eps = err.eps, "variational compression");
            if sweep + 1 >= opts.min_sweeps && max_diff < opts.tol_theta_diff { break; }
        }
        let (bra, _) = env.into_parts();
        let mut guess = bra.into_owned();
        // S[0] is trivial, so the leftmost `Th` tensor is in form `B`
        guess.form[0] = Some(Form::B);
        guess.norm = norm * target.norm;
        guess.touch(0);
        *self = guess;
        Ok(err)
    }
}

// optimize sites `i, i + 1` of the bra for maximal overlap with the ket,
// leaving the orthogonality center on the right (`moving_right`) or left site;
// returns the truncation error, the norm of the projected wavefunction and
// `1 - |⟨old|new⟩|`
fn update_pair(
    env: &mut MPSEnvironment<'_>,
    i: usize,
    moving_right: bool,
    trunc: &TruncParams,
) -> MPSResult<(TruncationError, f64, f64)>
{
    let ii = i as i64;
    let lp = env.get_LP(ii, true)?;
    let rp = env.get_RP(ii + 1, true)?;
    let th = env.ket().theta_at(ii, 2, Some(Form::Th))?;
    let (chil_k, dd, chir_k) = th.dim();
    let chil_b = lp.nrows();
    let chir_b = rp.ncols();
    // new[a', s, b'] = Σ lp[a', a] th[a, s, b] rp[b, b']
    let t = lp.dot(&c_order(th).into_shape((chil_k, dd * chir_k))?);
    let t = c_order(t).into_shape((chil_b * dd, chir_k))?.dot(&rp);
    let new = t.into_shape((chil_b, dd, chir_b))?;

    let bra = env.bra();
    let old = bra.theta_at(ii, 2, Some(Form::Th))?;
    let n_new = frob_norm(&new);
    if n_new == 0.0 {
        return config_err(format!("compressed state is orthogonal to the original on sites {i}, {}", i + 1));
    }
    let n_old = frob_norm(&old);
    let ov
        = old.iter().zip(new.iter())
        .fold(C64::from(0.0), |acc, (o, n)| acc + o.conj() * n);
    let diff = 1.0 - ov.norm() / (n_old * n_new).max(f64::MIN_POSITIVE);

    let chinfo = bra.chinfo().clone();
    let d0 = bra.site(i)?.dim();
    let d1 = bra.site(i + 1)?.dim();
    let qt = chinfo.add(&bra.qtotal[i], &bra.qtotal[i + 1]);
    let shift = chinfo.sub(&chinfo.zero(), &qt);
    let row_q
        = LegCharge::combine(&chinfo, &[(bra.leg(i), 1), (bra.site(i)?.leg(), 1)])
        .shifted(&chinfo, &shift);
    let col_q
        = LegCharge::combine(&chinfo, &[(bra.site(i + 1)?.leg(), -1), (bra.leg(i + 2), 1)]);
    let mat = new.into_shape((chil_b * d0, d1 * chir_b))?;
    let schmidt = mat.local_decomp(&chinfo, &row_q, &col_q, trunc)?;
    let r = schmidt.rank();
    trunc.check_budget(&schmidt.err, i + 1, r)?;
    let (mut u, mut v) = (schmidt.u, schmidt.v);
    if moving_right {
        scale_rows(&mut v, &schmidt.s);
    } else {
        scale_columns(&mut u, &schmidt.s);
    }
    let (fl, fr) = if moving_right { (Form::A, Form::Th) } else { (Form::Th, Form::B) };
    let zero = chinfo.zero();
    let guess = env.bra_mut();
    guess.qtotal[i] = qt;
    guess.qtotal[i + 1] = zero;
    guess.set_B(i, c_order(u).into_shape((chil_b, d0, r))?, Some(fl))?;
    guess.set_B(i + 1, c_order(v).into_shape((r, d1, chir_b))?, Some(fr))?;
    guess.set_bond(ii + 1, schmidt.s, schmidt.charges);
    Ok((schmidt.err, schmidt.norm, diff))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::{
        mps::BC,
        site::{ Conserve, Site },
    };

    #[test]
    fn sum_of_equal_states() {
        let s = Site::spin_half(Conserve::Sz);
        let psi = MPS::from_product_state(
            vec![s; 4], &["up", "down", "up", "down"], BC::Finite).unwrap();
        for method in [CompressionMethod::Svd, CompressionMethod::Variational] {
            let mut sum = psi.add(&psi, C64::from(0.5), C64::from(0.5)).unwrap();
            assert_eq!(sum.chi(), vec![1, 2, 2, 2, 1]);
            let opts = CompressionOptions { method, ..CompressionOptions::default() };
            sum.compress(&opts).unwrap();
            assert_eq!(sum.chi(), vec![1, 1, 1, 1, 1]);
            assert_abs_diff_eq!(sum.overlap(&psi, false).unwrap().re, 1.0, epsilon = 1e-12);
        }
    }
}

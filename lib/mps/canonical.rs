//! Canonical forms, orthonormality checks and overlaps.

use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use tracing::debug;
use crate::{
    charges::LegCharge,
    decomp::{
        SchmidtDecomp,
        adjoint,
        block_eigh,
        c_order,
        frob_norm,
        scale_columns,
        scale_rows,
    },
    env::contract_lp,
    error::{ MPSResult, config_err },
    krylov::ArnoldiOptions,
    transfer::TransferMatrix,
    truncation::{ TruncParams, TruncationError },
};
use super::{ BC, Form, MPS, state_tensors };

impl MPS {
    /// Bring the state into right-canonical form (all tensors in form `B`)
    /// with exact Schmidt values on every bond.
    ///
    /// With `renormalize`, the state is normalized; otherwise its norm is
    /// kept in [`Self::norm`].
    pub fn canonical_form(&mut self, renormalize: bool) -> MPSResult<()> {
        if self.finite() {
            self.canonical_form_finite(renormalize, &TruncParams::exact())?;
        } else {
            self.canonical_form_infinite(renormalize)?;
        }
        Ok(())
    }

    /// Canonical form of a finite chain by a left-to-right sweep of
    /// decompositions followed by a truncating right-to-left sweep.
    ///
    /// Works for untagged tensors. Returns the accumulated truncation error of
    /// the second sweep.
    pub fn canonical_form_finite(&mut self, renormalize: bool, trunc: &TruncParams)
        -> MPSResult<TruncationError>
    {
        if !self.finite() {
            return config_err("canonical_form_finite needs a finite chain");
        }
        let L = self.L();
        if self.bc == BC::Segment && (self.ss[0].len() != 1 || self.ss[L].len() != 1) {
            return config_err(
                "canonical form of a segment with non-trivial outer bonds is \
                not supported"
            );
        }
        let chinfo = self.chinfo.clone();
        let exact = TruncParams::exact();
        let mut ms = state_tensors(self, false)?;

        for i in 0..L - 1 {
            let (chil, d, chir) = ms[i].dim();
            let shift = chinfo.sub(&chinfo.zero(), &self.qtotal[i]);
            let row_q
                = LegCharge::combine(&chinfo, &[(&self.legs[i], 1), (self.sites[i].leg(), 1)])
                .shifted(&chinfo, &shift);
            let mat = c_order(ms[i].clone()).into_shape((chil * d, chir))?;
            let schmidt = mat.local_decomp(&chinfo, &row_q, &self.legs[i + 1], &exact)?;
            if schmidt.norm == 0.0 { return config_err("state has zero norm"); }
            let r = schmidt.rank();
            ms[i] = schmidt.u.into_shape((chil, d, r))?;
            let mut sv = schmidt.v;
            scale_rows(&mut sv, &schmidt.s.mapv(|x| x * schmidt.norm));
            let (_, dn, chirn) = ms[i + 1].dim();
            let next = c_order(ms[i + 1].clone()).into_shape((chir, dn * chirn))?;
            ms[i + 1] = sv.dot(&next).into_shape((r, dn, chirn))?;
            self.legs[i + 1] = schmidt.charges;
        }

        let mut err = TruncationError::none();
        for i in (1..L).rev() {
            let (chil, d, chir) = ms[i].dim();
            let col_q
                = LegCharge::combine(&chinfo, &[(self.sites[i].leg(), -1), (&self.legs[i + 1], 1)])
                .shifted(&chinfo, &self.qtotal[i]);
            let mat = c_order(ms[i].clone()).into_shape((chil, d * chir))?;
            let schmidt = mat.local_decomp(&chinfo, &self.legs[i], &col_q, trunc)?;
            let r = schmidt.rank();
            trunc.check_budget(&schmidt.err, i, r)?;
            if schmidt.norm == 0.0 { return config_err("state has zero norm"); }
            ms[i] = schmidt.v.into_shape((r, d, chir))?;
            let mut us = schmidt.u;
            scale_columns(&mut us, &schmidt.s.mapv(|x| x * schmidt.norm));
            let (chilp, dp, _) = ms[i - 1].dim();
            let prev = c_order(ms[i - 1].clone()).into_shape((chilp * dp, chil))?;
            ms[i - 1] = prev.dot(&us).into_shape((chilp, dp, r))?;
            self.ss[i] = schmidt.s;
            self.legs[i] = schmidt.charges;
            err += schmidt.err;
        }
        let norm = frob_norm(&ms[0]);
        if norm == 0.0 { return config_err("state has zero norm"); }
        ms[0].map_inplace(|x| { *x /= norm; });
        self.bs = ms;
        self.form = vec![Some(Form::B); L];
        if !renormalize { self.norm *= norm; }
        self.touch_all();
        debug!(chi = ?self.chi(), eps = err.eps, norm, "canonical_form_finite");
        Ok(err)
    }

    /// Canonical form of an infinite chain.
    ///
    /// The dominant right and left eigenvectors `R = X X†` and `L = Y† Y` of
    /// the transfer matrix fix the gauge on bond 0, where the decomposition
    /// of `Y X` yields the Schmidt values; two sweeps through the unit cell
    /// then make every tensor right-orthonormal and recompute the Schmidt
    /// values of the inner bonds. The norm per unit cell is the square root
    /// of the dominant eigenvalue.
    pub fn canonical_form_infinite(&mut self, renormalize: bool) -> MPSResult<()> {
        if self.finite() {
            return config_err("canonical_form_infinite needs an infinite chain");
        }
        let L = self.L();
        let chinfo = self.chinfo.clone();
        let zero = chinfo.zero();
        let exact = TruncParams::exact();
        let mut raw = self.clone();
        raw.bs
            = (0..L)
            .map(|i| self.get_B(i, Some(Form::B)))
            .collect::<MPSResult<_>>()?;
        raw.form = vec![None; L];

        // fixed points of the transfer matrix
        let opts = ArnoldiOptions::default();
        let tm_r = TransferMatrix::new(&raw, &raw, None, false, Some(zero.as_slice()))?;
        let (vals, vecs) = tm_r.eigenvectors(1, &opts)?;
        let lambda = vals[0];
        let rho = hermitian_with_positive_trace(&vecs[0]);
        let tm_l = TransferMatrix::new(&raw, &raw, None, true, Some(zero.as_slice()))?;
        let (_, vecs) = tm_l.eigenvectors(1, &opts)?;
        let ell = hermitian_with_positive_trace(&vecs[0]);
        if lambda.norm() == 0.0 { return config_err("state has zero norm"); }

        let q0 = raw.legs[0].clone();
        let (r, w, rq) = block_eigh(&rho, &chinfo, &q0, 1e-14)?;
        let (l, v, lq) = block_eigh(&ell, &chinfo, &q0, 1e-14)?;
        let mut x = w;
        scale_columns(&mut x, &r.mapv(f64::sqrt));
        let mut y = adjoint(&v);
        scale_rows(&mut y, &l.mapv(f64::sqrt));
        let schmidt = y.dot(&x).local_decomp(&chinfo, &lq, &rq, &exact)?;
        if schmidt.norm == 0.0 {
            return config_err("left and right fixed points are orthogonal");
        }
        let s_abs = schmidt.s.mapv(|sk| sk * schmidt.norm);
        // P = s^-1 U† Y  and  Q = X V†  with  P Q = 1
        let mut p = adjoint(&schmidt.u).dot(&y);
        scale_rows(&mut p, &s_abs.mapv(f64::recip));
        let q = x.dot(&adjoint(&schmidt.v));
        let k0 = schmidt.rank();
        let mut ms = raw.bs;
        let sqrt_lambda = lambda.norm().sqrt();
        {
            let (chil, d, chir) = ms[0].dim();
            let m0 = c_order(ms[0].clone()).into_shape((chil, d * chir))?;
            ms[0] = p.dot(&m0).mapv(|z| z / sqrt_lambda).into_shape((k0, d, chir))?;
            let (chil, d, chir) = ms[L - 1].dim();
            let ml = c_order(ms[L - 1].clone()).into_shape((chil * d, chir))?;
            ms[L - 1] = ml.dot(&q).into_shape((chil, d, k0))?;
        }
        self.legs[0] = schmidt.charges;
        let s0 = schmidt.s;

        // make every tensor right-orthonormal
        for i in (1..L).rev() {
            let (chil, d, chir) = ms[i].dim();
            let col_q
                = LegCharge::combine(
                    &chinfo,
                    &[(self.sites[i].leg(), -1), (&self.legs[(i + 1) % L], 1)],
                )
                .shifted(&chinfo, &self.qtotal[i]);
            let mat = c_order(ms[i].clone()).into_shape((chil, d * chir))?;
            let schmidt = mat.local_decomp(&chinfo, &self.legs[i], &col_q, &exact)?;
            if schmidt.norm == 0.0 { return config_err("state has zero norm"); }
            let r = schmidt.rank();
            ms[i] = schmidt.v.into_shape((r, d, chir))?;
            let mut us = schmidt.u;
            scale_columns(&mut us, &schmidt.s.mapv(|x| x * schmidt.norm));
            let (chilp, dp, _) = ms[i - 1].dim();
            let prev = c_order(ms[i - 1].clone()).into_shape((chilp * dp, chil))?;
            ms[i - 1] = prev.dot(&us).into_shape((chilp, dp, r))?;
            self.legs[i] = schmidt.charges;
        }
        let c = frob_norm(&ms[0]) / (k0 as f64).sqrt();
        ms[0].map_inplace(|x| { *x /= c; });

        // Schmidt values of the inner bonds, rotating each bond basis into the
        // Schmidt basis
        let mut t = ms[0].clone();
        nd::Zip::from(t.outer_iter_mut())
            .and(&s0)
            .for_each(|mut tv, sv| { tv.map_inplace(|x| { *x *= *sv; }); });
        let mut w_prev: Option<nd::Array2<C64>> = None;
        for i in 0..L {
            let bi = match &w_prev {
                Some(wp) => {
                    let (chil, d, chir) = ms[i].dim();
                    let m = c_order(ms[i].clone()).into_shape((chil, d * chir))?;
                    wp.dot(&m).into_shape((wp.nrows(), d, chir))?
                },
                None => ms[i].clone(),
            };
            if i == L - 1 {
                ms[i] = bi;
                break;
            }
            let (chil, d, chir) = t.dim();
            let shift = chinfo.sub(&zero, &self.qtotal[i]);
            let row_q
                = LegCharge::combine(&chinfo, &[(&self.legs[i], 1), (self.sites[i].leg(), 1)])
                .shifted(&chinfo, &shift);
            let mat = c_order(t).into_shape((chil * d, chir))?;
            let schmidt = mat.local_decomp(&chinfo, &row_q, &self.legs[i + 1], &exact)?;
            if schmidt.norm == 0.0 { return config_err("state has zero norm"); }
            let r = schmidt.rank();
            let (chilb, db, chirb) = bi.dim();
            let bm = c_order(bi).into_shape((chilb * db, chirb))?;
            let wv = schmidt.v;
            ms[i] = bm.dot(&adjoint(&wv)).into_shape((chilb, db, r))?;
            let (chiln, dn, chirn) = ms[i + 1].dim();
            let next = c_order(ms[i + 1].clone()).into_shape((chiln, dn * chirn))?;
            let mut tn = wv.dot(&next);
            scale_rows(&mut tn, &schmidt.s.mapv(|x| x * schmidt.norm));
            t = tn.into_shape((r, dn, chirn))?;
            self.ss[i + 1] = schmidt.s;
            self.legs[i + 1] = schmidt.charges;
            w_prev = Some(wv);
        }
        self.ss[0] = s0;
        self.bs = ms;
        self.form = vec![Some(Form::B); L];
        if !renormalize { self.norm *= sqrt_lambda; }
        self.touch_all();
        debug!(chi = ?self.chi(), lambda = %lambda, "canonical_form_infinite");
        Ok(())
    }

    /// Deviation of every tensor from left- and right-orthonormality.
    ///
    /// Returns an `(L, 2)` array whose `i`-th row holds the Frobenius norms of
    /// `A[i]† A[i] - 1` and `B[i] B[i]† - 1`. Fails for untagged tensors.
    pub fn norm_test(&self) -> MPSResult<nd::Array2<f64>> {
        let L = self.L();
        if let Some(i) = self.form.iter().position(|f| f.is_none()) {
            return config_err(format!("site {i} is not in canonical form"));
        }
        let mut res: nd::Array2<f64> = nd::Array2::zeros((L, 2));
        for i in 0..L {
            let a = self.get_B(i, Some(Form::A))?;
            let (chil, d, chir) = a.dim();
            let am = c_order(a).into_shape((chil * d, chir))?;
            let ida: nd::Array2<C64> = nd::Array2::eye(chir);
            res[[i, 0]] = frob_norm(&(adjoint(&am).dot(&am) - ida));
            let b = self.get_B(i, Some(Form::B))?;
            let (chil, d, chir) = b.dim();
            let bm = c_order(b).into_shape((chil, d * chir))?;
            let idb: nd::Array2<C64> = nd::Array2::eye(chil);
            res[[i, 1]] = frob_norm(&(bm.dot(&adjoint(&bm)) - idb));
        }
        Ok(res)
    }

    /// Overlap `⟨self|other⟩`, including both norms.
    ///
    /// For infinite chains this is the dominant eigenvalue of the mixed
    /// transfer matrix, i.e. the overlap per unit cell. With `ignore_form`,
    /// the stored tensors are contracted as they are.
    pub fn overlap(&self, other: &MPS, ignore_form: bool) -> MPSResult<C64> {
        if self.L() != other.L() || self.bc != other.bc {
            return config_err(format!(
                "cannot take the overlap of chains with (L, bc) = ({}, {:?}) \
                and ({}, {:?})",
                self.L(), self.bc, other.L(), other.bc,
            ));
        }
        if self.sites.iter().zip(&other.sites).any(|(a, b)| a.dim() != b.dim()) {
            return config_err("physical dimensions differ");
        }
        let norms = C64::from(self.norm * other.norm);
        if self.finite() {
            let tb = state_tensors(self, ignore_form)?;
            let tk = state_tensors(other, ignore_form)?;
            if tb[0].dim().0 != tk[0].dim().0 {
                return config_err("outer bond dimensions differ");
            }
            let mut x: nd::Array2<C64> = nd::Array2::eye(tb[0].dim().0);
            for (b, k) in tb.iter().zip(&tk) {
                x = contract_lp(&x, b, k, None);
            }
            if x.nrows() != x.ncols() {
                return config_err("outer bond dimensions differ");
            }
            let tr = x.diag().iter().fold(C64::zero(), |acc, z| acc + z);
            Ok(tr * norms)
        } else {
            let form = if ignore_form { None } else { Some(Form::B) };
            let zero = self.chinfo.zero();
            let tm = TransferMatrix::new(self, other, form, false, Some(zero.as_slice()))?;
            let (vals, _) = tm.eigenvectors(1, &ArnoldiOptions::default())?;
            Ok(vals[0] * norms)
        }
    }
}

// rotate the phase of `m` so that its trace is real positive, and take its
// Hermitian part
fn hermitian_with_positive_trace(m: &nd::Array2<C64>) -> nd::Array2<C64> {
    let tr = m.diag().iter().fold(C64::zero(), |acc, z| acc + z);
    let phase
        = if tr.norm() > 1e-300 { tr.conj() / tr.norm() }
        else { C64::from(1.0) };
    let mp = m.mapv(|z| z * phase);
    (&mp + &adjoint(&mp)).mapv(|z| z * 0.5)
}

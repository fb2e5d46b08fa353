//! Structural changes: sums of states, grouping of sites, and manipulations of
//! the unit cell.

use ndarray as nd;
use ndarray_linalg::Eig;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use tracing::{ debug, warn };
use crate::{
    charges::LegCharge,
    decomp::{ c_order, frob_norm },
    error::{ MPSResult, charge_err, config_err },
    krylov::ArnoldiOptions,
    site::Site,
    transfer::TransferMatrix,
    truncation::{ TruncParams, TruncationError },
};
use super::{ BC, Form, MPS, next_revision, state_tensors, zero_tensor };

/// Result of [`MPS::compute_K`].
#[derive(Clone, Debug)]
pub struct ComputeK {
    /// Unitary relating the Schmidt states on bond 0 of the state and its
    /// translate, phase-fixed to have a real positive trace.
    pub u: nd::Array2<C64>,
    /// Eigenvalues of `u`.
    pub w: nd::Array1<C64>,
    /// Charges of the eigenvectors of `u`.
    pub q: Vec<Vec<i64>>,
    /// Overlap per unit cell of the state with its translate.
    pub ov: C64,
    /// Error from truncating the translated state.
    pub trunc_err: TruncationError,
}

impl MPS {
    /// Return the direct sum `alpha |self⟩ + beta |other⟩` of two finite
    /// states, with bond dimensions adding up on every inner bond.
    ///
    /// Norms of both states are absorbed into the tensors; the result is
    /// untagged and has unit norm (see [`Self::canonical_form`] or
    /// [`Self::compress`]). Fails with
    /// [`MPSError::ChargeMismatch`][crate::error::MPSError::ChargeMismatch] if
    /// the states have different total charges.
    pub fn add(&self, other: &MPS, alpha: C64, beta: C64) -> MPSResult<MPS> {
        let L = self.L();
        if self.bc != BC::Finite || other.bc != BC::Finite {
            return config_err("only finite states can be added");
        }
        if other.L() != L {
            return config_err(format!("cannot add states of lengths {L} and {}", other.L()));
        }
        if self.sites.iter().zip(&other.sites).any(|(a, b)| a.dim() != b.dim())
            || self.chinfo != other.chinfo
        {
            return config_err("cannot add states on different sites");
        }
        let ch = &self.chinfo;
        let ta = state_tensors(self, false)?;
        let tb = state_tensors(other, false)?;
        let fa = alpha * self.norm;
        let fb = beta * other.norm;
        // charges of `other`'s bonds are shifted to match the total charges of
        // `self`'s tensors
        let mut shift = ch.sub(&self.legs[0].get(0), &other.legs[0].get(0));
        let mut legs: Vec<LegCharge> = vec![self.legs[0].clone()];
        let mut bs: Vec<nd::Array3<C64>> = Vec::with_capacity(L);
        for i in 0..L {
            shift = ch.add(&shift, &ch.sub(&other.qtotal[i], &self.qtotal[i]));
            let (al, d, ar) = ta[i].dim();
            let (bl, _, br) = tb[i].dim();
            let a = ta[i].mapv(|x| x * fa);
            let b = tb[i].mapv(|x| x * fb);
            let t
                = if L == 1 {
                    a + b
                } else if i == 0 {
                    let mut t = zero_tensor(1, d, ar + br);
                    t.slice_mut(nd::s![.., .., ..ar]).assign(&a);
                    t.slice_mut(nd::s![.., .., ar..]).assign(&b);
                    t
                } else if i == L - 1 {
                    let mut t = zero_tensor(al + bl, d, 1);
                    t.slice_mut(nd::s![..al, .., ..]).assign(&a);
                    t.slice_mut(nd::s![al.., .., ..]).assign(&b);
                    t
                } else {
                    let mut t = zero_tensor(al + bl, d, ar + br);
                    t.slice_mut(nd::s![..al, .., ..ar]).assign(&a);
                    t.slice_mut(nd::s![al.., .., ar..]).assign(&b);
                    t
                };
            bs.push(t);
            if i + 1 < L {
                let qb = other.legs[i + 1].shifted(ch, &shift);
                legs.push(self.legs[i + 1].concat(&qb));
            }
        }
        let q_self = self.legs[L].get(0);
        let q_other = ch.add(&other.legs[L].get(0), &shift);
        if !ch.equal(&q_self, &q_other) {
            return charge_err(L - 1, format!(
                "states have different total charges ({:?} vs. {:?})",
                self.get_total_charge(), other.get_total_charge(),
            ));
        }
        legs.push(self.legs[L].clone());
        let ss: Vec<nd::Array1<f64>>
            = legs.iter().map(|q| nd::Array1::ones(q.dim())).collect();
        Ok(MPS {
            sites: self.sites.clone(),
            bc: self.bc,
            chinfo: self.chinfo.clone(),
            bs,
            ss,
            form: vec![None; L],
            legs,
            qtotal: self.qtotal.clone(),
            norm: 1.0,
            grouped: self.grouped,
            revs: (0..L).map(|_| next_revision()).collect(),
        })
    }

    /// Group every `n` consecutive sites into one, contracting their tensors.
    ///
    /// The length (of the unit cell) must be divisible by `n`.
    pub fn group_sites(&mut self, n: usize) -> MPSResult<()> {
        let L = self.L();
        if n == 0 || L % n != 0 {
            return config_err(format!("cannot group {L} sites into groups of {n}"));
        }
        if n == 1 { return Ok(()); }
        let tagged = self.form.iter().all(|f| f.is_some());
        let ng = L / n;
        let mut sites: Vec<Site> = Vec::with_capacity(ng);
        let mut bs: Vec<nd::Array3<C64>> = Vec::with_capacity(ng);
        let mut qtotal: Vec<Vec<i64>> = Vec::with_capacity(ng);
        for k in 0..ng {
            let i = k * n;
            sites.push(Site::group(&self.sites[i..i + n])?);
            let first = if tagged { Some(Form::B) } else { None };
            bs.push(self.theta_at(i as i64, n, first)?);
            qtotal.push(
                self.qtotal[i..i + n].iter()
                    .fold(self.chinfo.zero(), |acc, q| self.chinfo.add(&acc, q))
            );
        }
        let nbonds = if self.finite() { ng + 1 } else { ng };
        self.ss = (0..nbonds).map(|k| self.ss[k * n].clone()).collect();
        self.legs = (0..nbonds).map(|k| self.legs[k * n].clone()).collect();
        self.sites = sites;
        self.bs = bs;
        self.qtotal = qtotal;
        self.form = vec![if tagged { Some(Form::B) } else { None }; ng];
        self.grouped *= n;
        self.revs = vec![0; ng];
        self.touch_all();
        debug!(n, L = ng, "group_sites");
        Ok(())
    }

    /// Split grouped sites back into their constituents, truncating the new
    /// bonds. Inverse of [`Self::group_sites`] up to truncation.
    ///
    /// The state must be canonical.
    pub fn group_split(&mut self, trunc: &TruncParams) -> MPSResult<TruncationError> {
        let L = self.L();
        let n = self.sites[0].parts().len();
        if n == 0 || self.sites.iter().any(|s| s.parts().len() != n) {
            return config_err("sites are not grouped uniformly");
        }
        if let Some(i) = self.form.iter().position(|f| f.is_none()) {
            return config_err(format!("site {i} is not in canonical form"));
        }
        let tensors: Vec<nd::Array3<C64>>
            = (0..L).map(|k| self.get_B(k, Some(Form::B))).collect::<MPSResult<_>>()?;
        let ch = self.chinfo.clone();
        let qn = ch.qnumber();
        let sites: Vec<Site>
            = self.sites.iter().flat_map(|s| s.parts().iter().cloned()).collect();
        let nl = L * n;
        let nbonds = if self.finite() { nl + 1 } else { nl };
        let mut out = MPS {
            bs: sites.iter().map(|s| zero_tensor(1, s.dim(), 1)).collect(),
            sites,
            bc: self.bc,
            chinfo: ch.clone(),
            ss: vec![nd::array![1.0]; nbonds],
            form: vec![Some(Form::B); nl],
            legs: vec![LegCharge::trivial(1, qn); nbonds],
            qtotal: vec![ch.zero(); nl],
            norm: self.norm,
            grouped: (self.grouped / n).max(1),
            revs: (0..nl).map(|_| next_revision()).collect(),
        };
        for b in 0..self.nbonds() {
            out.ss[b * n] = self.ss[b].clone();
            out.legs[b * n] = self.legs[b].clone();
        }
        let mut err = TruncationError::none();
        for (k, c) in tensors.into_iter().enumerate() {
            let (e, _) = out.split_theta(k * n, n, c, self.qtotal[k].clone(), trunc)?;
            err += e;
        }
        *self = out;
        debug!(n, L = self.L(), eps = err.eps, "group_split");
        Ok(err)
    }

    /// Repeat the unit cell of an infinite state `factor` times.
    pub fn enlarge_mps_unit_cell(&mut self, factor: usize) -> MPSResult<()> {
        if self.finite() {
            return config_err("only infinite states have a unit cell to enlarge");
        }
        if factor == 0 { return config_err("cannot enlarge the unit cell by zero"); }
        let L = self.L();
        let idx: Vec<usize> = (0..factor * L).map(|i| i % L).collect();
        self.sites = idx.iter().map(|i| self.sites[*i].clone()).collect();
        self.bs = idx.iter().map(|i| self.bs[*i].clone()).collect();
        self.ss = idx.iter().map(|i| self.ss[*i].clone()).collect();
        self.legs = idx.iter().map(|i| self.legs[*i].clone()).collect();
        self.form = idx.iter().map(|i| self.form[*i]).collect();
        self.qtotal = idx.iter().map(|i| self.qtotal[*i].clone()).collect();
        self.revs = vec![0; factor * L];
        self.touch_all();
        Ok(())
    }

    /// Increase the unit cell of an infinite state to `new_L` sites, which
    /// must be a multiple of the current length.
    pub fn increase_L(&mut self, new_L: usize) -> MPSResult<()> {
        let L = self.L();
        if self.finite() || new_L % L != 0 || new_L < L {
            return config_err(format!(
                "cannot increase the unit cell from {L} to {new_L} sites"));
        }
        self.enlarge_mps_unit_cell(new_L / L)
    }

    /// Translate the unit cell of an infinite state by `shift` sites to the
    /// right: the site at position `i` moves to `i + shift`.
    pub fn roll_mps_unit_cell(&mut self, shift: i64) -> MPSResult<()> {
        if self.finite() {
            return config_err("only infinite states have a unit cell to roll");
        }
        let L = self.L();
        let k = shift.rem_euclid(L as i64) as usize;
        self.sites.rotate_right(k);
        self.bs.rotate_right(k);
        self.ss.rotate_right(k);
        self.legs.rotate_right(k);
        self.form.rotate_right(k);
        self.qtotal.rotate_right(k);
        self.touch_all();
        Ok(())
    }

    /// Mirror the chain, so that site `i` becomes site `L - 1 - i`.
    pub fn spatial_inversion(&mut self) {
        let ch = self.chinfo.clone();
        self.sites.reverse();
        self.bs.reverse();
        self.bs.iter_mut()
            .for_each(|b| {
                *b = c_order(b.view().permuted_axes([2, 1, 0]).to_owned());
            });
        self.form.reverse();
        self.form.iter_mut().for_each(|f| { *f = f.map(|fm| fm.inverted()); });
        self.qtotal.reverse();
        self.legs = self.legs.iter().map(|q| q.negated(&ch)).collect();
        if self.finite() {
            self.ss.reverse();
            self.legs.reverse();
        } else {
            // bond b becomes bond L - b, with bond 0 fixed
            self.ss[1..].reverse();
            self.legs[1..].reverse();
        }
        self.touch_all();
    }

    /// Overlap of an infinite state with its translate by the permutation
    /// `perm` of the unit cell (see [`Self::permute_sites`]), and the unitary
    /// on the Schmidt states of bond 0 relating the two.
    ///
    /// The eigenvalues `W` of this unitary give the (quasi-)momenta of the
    /// Schmidt states.
    pub fn compute_K(&self, perm: &[usize], trunc: &TruncParams) -> MPSResult<ComputeK> {
        if self.finite() {
            return config_err("compute_K needs an infinite chain");
        }
        if let Some(i) = self.form.iter().position(|f| f.is_none()) {
            return config_err(format!("site {i} is not in canonical form"));
        }
        let mut translated = self.clone();
        let trunc_err = translated.permute_sites(perm, trunc)?;
        let zero = self.chinfo.zero();
        let tm = TransferMatrix::new(
            self, &translated, Some(Form::B), false, Some(zero.as_slice()))?;
        let (vals, vecs) = tm.eigenvectors(1, &ArnoldiOptions::default())?;
        let ov = vals[0];
        if (ov.norm() - 1.0).abs() > 1e-6 {
            warn!(ov = %ov, "overlap with the translated state is not of unit magnitude");
        }
        // vecs[0] :: { vL (translated), vL* (self) }
        let mut u = vecs[0].clone();
        let tr = u.diag().iter().fold(C64::zero(), |acc, z| acc + z);
        let phase = if tr.norm() > 0.0 { tr.conj() / tr.norm() } else { C64::from(1.0) };
        let chi = u.nrows().min(u.ncols());
        let scale = (chi as f64).sqrt() / frob_norm(&u).max(f64::MIN_POSITIVE);
        u.map_inplace(|z| { *z *= phase * scale; });

        let qk = translated.legs[0].blocks(&self.chinfo);
        let qb: std::collections::BTreeMap<Vec<i64>, Vec<usize>>
            = self.legs[0].blocks(&self.chinfo).into_iter().collect();
        let mut w: Vec<C64> = Vec::new();
        let mut q: Vec<Vec<i64>> = Vec::new();
        for (charge, rows) in qk.into_iter() {
            let Some(cols) = qb.get(&charge) else { continue; };
            if rows.len() != cols.len() {
                return config_err(format!(
                    "Schmidt states of charge {charge:?} differ in number ({} vs. {})",
                    rows.len(), cols.len(),
                ));
            }
            let block = u.select(nd::Axis(0), &rows).select(nd::Axis(1), cols);
            let (wb, _) = block.eig()?;
            wb.iter().for_each(|x| { w.push(*x); q.push(charge.clone()); });
        }
        debug!(ov = %ov, eps = trunc_err.eps, "compute_K");
        Ok(ComputeK { u, w: nd::Array1::from(w), q, ov, trunc_err })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::site::Conserve;

    #[test]
    fn add_orthogonal_states() {
        let s = Site::spin_half(Conserve::Sz);
        let a = MPS::from_product_state(vec![s.clone(); 3], &["up", "down", "up"], BC::Finite)
            .unwrap();
        let b = MPS::from_product_state(vec![s.clone(); 3], &["down", "up", "up"], BC::Finite)
            .unwrap();
        let sum = a.add(&b, C64::from(0.6), C64::from(0.8)).unwrap();
        assert_eq!(sum.chi(), vec![1, 2, 2, 1]);
        sum.test_sanity().unwrap();
        assert_abs_diff_eq!(a.overlap(&sum, false).unwrap().re, 0.6, epsilon = 1e-14);
        assert_abs_diff_eq!(b.overlap(&sum, false).unwrap().re, 0.8, epsilon = 1e-14);
        let c = MPS::from_product_state(vec![s; 3], &["up", "up", "up"], BC::Finite).unwrap();
        assert!(a.add(&c, C64::from(1.0), C64::from(1.0)).is_err());
    }

    #[test]
    fn roll_and_invert() {
        let s = Site::spin_half(Conserve::Sz);
        let mut psi = MPS::from_product_state(
            vec![s; 3], &["up", "down", "down"], BC::Infinite).unwrap();
        psi.roll_mps_unit_cell(1).unwrap();
        let sz = psi.expectation_value("Sz", None).unwrap();
        assert_abs_diff_eq!(sz[0].re, -0.5);
        assert_abs_diff_eq!(sz[1].re, 0.5);
        psi.roll_mps_unit_cell(-1).unwrap();
        psi.spatial_inversion();
        psi.test_sanity().unwrap();
        let sz = psi.expectation_value("Sz", None).unwrap();
        assert_abs_diff_eq!(sz[0].re, -0.5);
        assert_abs_diff_eq!(sz[2].re, 0.5);
    }

    #[test]
    fn group_then_split() {
        let s = Site::spin_half(Conserve::Sz);
        let mut psi = MPS::from_singlets(
            &s, 4, &[(0, 1), (2, 3)], &[], "up", "down", "up", BC::Finite).unwrap();
        let orig = psi.clone();
        psi.group_sites(2).unwrap();
        assert_eq!(psi.L(), 2);
        assert_eq!(psi.chi(), vec![1, 1, 1]);
        psi.test_sanity().unwrap();
        let err = psi.group_split(&TruncParams::default()).unwrap();
        assert!(err.eps < 1e-12);
        assert_eq!(psi.L(), 4);
        assert_eq!(psi.chi(), vec![1, 2, 1, 2, 1]);
        psi.test_sanity().unwrap();
        assert_abs_diff_eq!(psi.overlap(&orig, false).unwrap().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn enlarged_unit_cell() {
        let s = Site::spin_half(Conserve::Sz);
        let mut psi = MPS::from_product_state(vec![s; 2], &["up", "down"], BC::Infinite)
            .unwrap();
        assert!(psi.increase_L(3).is_err());
        psi.increase_L(6).unwrap();
        assert_eq!(psi.L(), 6);
        psi.test_sanity().unwrap();
        let sz = psi.expectation_value("Sz", None).unwrap();
        assert_abs_diff_eq!(sz[4].re, 0.5);
        assert_abs_diff_eq!(sz[5].re, -0.5);
    }

    #[test]
    fn swapped_singlet_is_odd() {
        let s = Site::spin_half(Conserve::Sz);
        let psi = MPS::from_singlets(
            &s, 2, &[(0, 1)], &[], "up", "down", "up", BC::Infinite).unwrap();
        let k = psi.compute_K(&[1, 0], &TruncParams::default()).unwrap();
        assert_abs_diff_eq!(k.ov.re, -1.0, epsilon = 1e-10);
        assert_eq!(k.w.len(), 1);
        assert_abs_diff_eq!(k.w[0].re, 1.0, epsilon = 1e-10);
    }
}

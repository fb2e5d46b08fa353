//! Local updates: operators, two-site gates, and site permutations.

use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::debug;
use crate::{
    charges::LegCharge,
    decomp::{ SchmidtDecomp, adjoint, c_order, frob_norm, scale_columns },
    error::{ MPSResult, charge_err, config_err },
    site::{ Operator, Site, op_charge },
    truncation::{ TruncParams, TruncationError },
};
use super::{ Form, MPS };

impl MPS {
    /// Write a wavefunction on the `n` sites starting at `i` back into the
    /// chain.
    ///
    /// `c` has axis signature `[ vL{i}, p{i}<>...<>p{i+n-1}, vR{i+n-1} ]` and
    /// is taken in the form `B` of the leftmost site, i.e. without the Schmidt
    /// values of bond `i`. It is split by successive decompositions from the
    /// right, leaving all `n` sites in form `B` and recomputing the Schmidt
    /// values of the inner bonds. `qtotal` is the total charge of `c`; it is
    /// assigned to the leftmost site.
    ///
    /// Returns the accumulated truncation error and the norm of the
    /// wavefunction (including the Schmidt values of bond `i`) that was
    /// divided out.
    pub(crate) fn split_theta(
        &mut self,
        i: usize,
        n: usize,
        c: nd::Array3<C64>,
        qtotal: Vec<i64>,
        trunc: &TruncParams,
    ) -> MPSResult<(TruncationError, f64)>
    {
        let idx: Vec<usize>
            = (0..n)
            .map(|k| self.idx((i + k) as i64))
            .collect::<MPSResult<_>>()?;
        let dims: Vec<usize> = idx.iter().map(|k| self.sites[*k].dim()).collect();
        let phys: Vec<LegCharge>
            = idx.iter().map(|k| self.sites[*k].leg().clone()).collect();
        let chinfo = self.chinfo.clone();
        let zero = chinfo.zero();
        let leg_l = self.legs[self.bond(i as i64)].clone();
        let sl = self.ss[self.bond(i as i64)].clone();
        let (chil, _, chir) = c.dim();

        // M = S_L C gets decomposed, while C (without S_L) is carried along
        // to build the leftmost tensor without inverting S_L
        let mut m = c.clone();
        nd::Zip::from(m.outer_iter_mut())
            .and(&sl)
            .for_each(|mut mv, sv| { mv.map_inplace(|x| { *x *= *sv; }); });
        let mut cm = c;
        let mut leg_r = self.legs[self.bond((i + n) as i64)].clone();
        let mut chi = chir;
        let mut err = TruncationError::none();
        let mut norm = frob_norm(&m);
        let shift = chinfo.sub(&zero, &qtotal);
        for k in (1..n).rev() {
            let p_rest: usize = dims[..k].iter().product();
            let dk = dims[k];
            let mut row_legs: Vec<(&LegCharge, i64)> = vec![(&leg_l, 1)];
            row_legs.extend(phys[..k].iter().map(|q| (q, 1)));
            let row_q = LegCharge::combine(&chinfo, &row_legs).shifted(&chinfo, &shift);
            let col_q = LegCharge::combine(&chinfo, &[(&phys[k], -1), (&leg_r, 1)]);
            let mm = c_order(m).into_shape((chil * p_rest, dk * chi))?;
            let schmidt = mm.local_decomp(&chinfo, &row_q, &col_q, trunc)?;
            let b = (i + k) as i64;
            let r = schmidt.rank();
            trunc.check_budget(&schmidt.err, self.bond(b), r)?;
            if schmidt.norm == 0.0 {
                return config_err(format!("wavefunction on sites {i}..{} vanishes", i + n));
            }
            let cmm = c_order(cm).into_shape((chil * p_rest, dk * chi))?;
            cm = cmm.dot(&adjoint(&schmidt.v)).into_shape((chil, p_rest, r))?;
            let mut us = schmidt.u;
            scale_columns(&mut us, &schmidt.s.mapv(|x| x * schmidt.norm));
            m = c_order(us).into_shape((chil, p_rest, r))?;
            self.bs[idx[k]] = c_order(schmidt.v).into_shape((r, dk, chi))?;
            self.form[idx[k]] = Some(Form::B);
            self.qtotal[idx[k]] = zero.clone();
            leg_r = schmidt.charges.clone();
            self.set_bond(b, schmidt.s, schmidt.charges);
            err += schmidt.err;
            norm = schmidt.norm;
            chi = r;
        }
        if norm == 0.0 {
            return config_err(format!("wavefunction on sites {i}..{} vanishes", i + n));
        }
        self.bs[idx[0]] = cm.mapv(|x| x / norm);
        self.form[idx[0]] = Some(Form::B);
        self.qtotal[idx[0]] = qtotal;
        self.touch(idx[0]);
        Ok((err, norm))
    }

    // fail unless the given sites are tagged
    fn require_form(&self, idx: &[usize]) -> MPSResult<()> {
        if let Some(k) = idx.iter().find(|k| self.form[**k].is_none()) {
            return config_err(format!(
                "site {k} is not in canonical form; call canonical_form first"
            ));
        }
        Ok(())
    }

    /// Apply a two-site gate to sites `i` and `i + 1` and truncate the bond
    /// between them (a TEBD step).
    ///
    /// `gate` acts on the fused physical index of both sites, the one of site
    /// `i` varying slowest. The state must be canonical on both sites; they
    /// are left in form `B`. The norm lost to truncation is not tracked but
    /// reported as the returned error. Fails if the gate doesn't match the
    /// site dimensions ([`MPSError::Configuration`][crate::error::MPSError::Configuration])
    /// or isn't charge neutral ([`MPSError::ChargeMismatch`][crate::error::MPSError::ChargeMismatch]).
    pub fn apply_gate(&mut self, i: usize, gate: &nd::Array2<C64>, trunc: &TruncParams)
        -> MPSResult<TruncationError>
    {
        if self.L() < 2 { return config_err("two-site gates need at least two sites"); }
        let i0 = self.idx(i as i64)?;
        let i1 = self.idx(i as i64 + 1)?;
        let d0 = self.sites[i0].dim();
        let d1 = self.sites[i1].dim();
        if gate.dim() != (d0 * d1, d0 * d1) {
            return config_err(format!(
                "gate of shape {:?} on sites {i}, {} of dimensions {d0}, {d1}",
                gate.dim(), i + 1,
            ));
        }
        let pleg = LegCharge::combine(
            &self.chinfo,
            &[(self.sites[i0].leg(), 1), (self.sites[i1].leg(), 1)],
        );
        match op_charge(&self.chinfo, &pleg, &pleg, gate) {
            None => { return charge_err(i, "gate has no definite charge"); },
            Some(q) if !self.chinfo.equal(&q, &self.chinfo.zero()) => {
                return charge_err(i, format!("gate carries charge {q:?}"));
            },
            Some(_) => { },
        }
        self.require_form(&[i0, i1])?;
        let mut c = self.theta_at(i as i64, 2, Some(Form::B))?;
        apply_physical(&mut c, gate);
        let qt = self.chinfo.add(&self.qtotal[i0], &self.qtotal[i1]);
        let (err, _) = self.split_theta(i0, 2, c, qt, trunc)?;
        debug!(bond = i + 1, chi = self.ss[self.bond(i as i64 + 1)].len(), eps = err.eps, "apply_gate");
        Ok(err)
    }

    /// Apply a local operator acting on the `n` sites starting at `i`.
    ///
    /// Operators with a definite charge shift the total charge of the state.
    /// Odd-parity (fermionic) operators on finite chains get a Jordan-Wigner
    /// string on all sites left of `i`; on infinite chains they are an
    /// error. For non-unitary operators the state is brought back into
    /// canonical form afterwards, with `renormalize` deciding whether the
    /// norm change is discarded or kept in the norm of the state.
    pub fn apply_local_op<O>(&mut self, i: usize, op: O, unitary: bool, renormalize: bool)
        -> MPSResult<()>
    where O: Into<Operator>
    {
        let op: Operator = op.into();
        let n = op.n_sites();
        let idx: Vec<usize>
            = (0..n)
            .map(|k| self.idx((i + k) as i64))
            .collect::<MPSResult<_>>()?;
        if self.finite() && i + n > self.L() {
            return config_err(format!(
                "operator on sites {i}..{} exceeds the chain", i + n));
        }
        let sites: Vec<&Site> = idx.iter().map(|k| &self.sites[*k]).collect();
        let mat = op.resolve(&sites)?;
        let fermionic = op.needs_jw(sites[0]);
        let pleg: Vec<(&LegCharge, i64)> = sites.iter().map(|s| (s.leg(), 1)).collect();
        let pleg = LegCharge::combine(&self.chinfo, &pleg);
        let Some(dq) = op_charge(&self.chinfo, &pleg, &pleg, &mat) else {
            return charge_err(i, "operator has no definite charge");
        };
        if fermionic {
            if !self.finite() {
                return config_err(
                    "fermionic operators need a Jordan-Wigner string, which \
                    is undefined on infinite chains"
                );
            }
            for k in 0..i {
                let jw = self.sites[k].get_op("JW")?;
                apply_physical(&mut self.bs[k], &jw);
                self.touch(k);
            }
        }
        if n == 1 {
            apply_physical(&mut self.bs[idx[0]], &mat);
            self.qtotal[idx[0]] = self.chinfo.add(&self.qtotal[idx[0]], &dq);
            self.touch(idx[0]);
        } else {
            self.require_form(&idx)?;
            let mut c = self.theta_at(i as i64, n, Some(Form::B))?;
            apply_physical(&mut c, &mat);
            let qt
                = idx.iter()
                .fold(dq, |acc, k| self.chinfo.add(&acc, &self.qtotal[*k]));
            let (_, norm) = self.split_theta(idx[0], n, c, qt, &TruncParams::exact())?;
            if !renormalize { self.norm *= norm; }
        }
        if !unitary { self.canonical_form(renormalize)?; }
        Ok(())
    }

    /// Exchange sites `i` and `i + 1`, truncating the bond between them.
    ///
    /// Basis states that are both fermionic pick up a sign.
    pub fn swap_sites(&mut self, i: usize, trunc: &TruncParams)
        -> MPSResult<TruncationError>
    {
        if self.L() < 2 { return config_err("cannot swap sites of a single-site chain"); }
        let i0 = self.idx(i as i64)?;
        let i1 = self.idx(i as i64 + 1)?;
        self.require_form(&[i0, i1])?;
        let d0 = self.sites[i0].dim();
        let d1 = self.sites[i1].dim();
        let c = self.theta_at(i as i64, 2, Some(Form::B))?;
        let (chil, _, chir) = c.dim();
        let c4 = c.into_shape((chil, d0, d1, chir))?;
        let mut swapped
            = c_order(c4.permuted_axes([0, 2, 1, 3]))
            .into_shape((chil, d1 * d0, chir))?;
        for s0 in 0..d0 {
            if !self.sites[i0].state_parity(s0) { continue; }
            for s1 in 0..d1 {
                if !self.sites[i1].state_parity(s1) { continue; }
                swapped.slice_mut(nd::s![.., s1 * d0 + s0, ..])
                    .map_inplace(|x| { *x = -*x; });
            }
        }
        self.sites.swap(i0, i1);
        let qt = self.chinfo.add(&self.qtotal[i0], &self.qtotal[i1]);
        let (err, _) = self.split_theta(i0, 2, swapped, qt, trunc)?;
        Ok(err)
    }

    /// Reorder the sites (of the unit cell) so that the site at position `j`
    /// ends up at position `perm[j]`, by a sequence of nearest-neighbor swaps.
    ///
    /// Fails if `perm` is not a permutation of `0..L`.
    pub fn permute_sites(&mut self, perm: &[usize], trunc: &TruncParams)
        -> MPSResult<TruncationError>
    {
        let L = self.L();
        let mut seen = vec![false; L];
        if perm.len() != L
            || perm.iter().any(|p| *p >= L || std::mem::replace(&mut seen[*p], true))
        {
            return config_err(format!("{perm:?} is not a permutation of 0..{L}"));
        }
        // cur[k] is the original position of the site now at k
        let mut cur: Vec<usize> = (0..L).collect();
        let mut err = TruncationError::none();
        let mut swaps: usize = 0;
        loop {
            let mut done = true;
            for k in 0..L.saturating_sub(1) {
                if perm[cur[k]] > perm[cur[k + 1]] {
                    err += self.swap_sites(k, trunc)?;
                    cur.swap(k, k + 1);
                    swaps += 1;
                    done = false;
                }
            }
            if done { break; }
        }
        debug!(swaps, eps = err.eps, "permute_sites");
        Ok(err)
    }
}

// apply `op` to the physical (middle) axis of `t`
pub(crate) fn apply_physical(t: &mut nd::Array3<C64>, op: &nd::Array2<C64>) {
    t.outer_iter_mut()
        .for_each(|mut ta| {
            let new = op.dot(&ta);
            ta.assign(&new);
        });
}

//! Contractions of a bra and a ket MPS, with cached boundary tensors.
//!
//! The left boundary `LP(i)` contracts everything left of site `i` (i.e. up
//! to bond `i`), built from tensors in form `A`; the right boundary `RP(i)`
//! contracts everything right of site `i` (from bond `i + 1` on), built from
//! tensors in form `B`. Axis signatures:
//! ```text
//!   LP(i) :: { vR*{i-1} (bra), vR{i-1} (ket) }
//!   RP(i) :: { vL{i+1} (ket),  vL*{i+1} (bra) }
//! ```
//! For finite chains the outer boundaries are trivial; for infinite chains
//! `LP(i)` for `i <= 0` and `RP(i)` for `i >= L - 1` are identities, which is
//! exact for canonical states. Norms of the states are not included.
//!
//! Cached boundaries are stamped with the revisions of the sites they cover
//! and are recomputed as soon as one of those sites changes.

use std::borrow::Cow;
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::{ One, Zero };
use rustc_hash::FxHashMap;
use tracing::debug;
use crate::{
    decomp::frob_norm,
    error::{ Location, MPSResult, config_err, invalid_state },
    mps::{ Form, MPS },
    mps::ops::apply_physical,
    site::{ Operator, Site },
    terms::{ SiteOps, TermList, half_site_ops, site_ops },
};

/// Extend a left boundary by one site:
/// `Y[b', b] = Σ conj(bra[a', s', b']) X[a', a] op[s', s] ket[a, s, b]`.
pub(crate) fn contract_lp(
    x: &nd::Array2<C64>,
    bra: &nd::Array3<C64>,
    ket: &nd::Array3<C64>,
    op: Option<&nd::Array2<C64>>,
) -> nd::Array2<C64>
{
    let ket: Cow<nd::Array3<C64>>
        = match op {
            Some(o) => {
                let mut k = ket.clone();
                apply_physical(&mut k, o);
                Cow::Owned(k)
            },
            None => Cow::Borrowed(ket),
        };
    let mut y: nd::Array2<C64> = nd::Array2::zeros((bra.dim().2, ket.dim().2));
    bra.axis_iter(nd::Axis(1)).zip(ket.axis_iter(nd::Axis(1)))
        .for_each(|(bs, ks)| {
            let bs_dag = bs.t().mapv(|z| z.conj());
            y += &bs_dag.dot(&x.dot(&ks));
        });
    y
}

/// Extend a right boundary by one site:
/// `Y[a, a'] = Σ op[s', s] ket[a, s, b] X[b, b'] conj(bra[a', s', b'])`.
pub(crate) fn contract_rp(
    x: &nd::Array2<C64>,
    bra: &nd::Array3<C64>,
    ket: &nd::Array3<C64>,
    op: Option<&nd::Array2<C64>>,
) -> nd::Array2<C64>
{
    let ket: Cow<nd::Array3<C64>>
        = match op {
            Some(o) => {
                let mut k = ket.clone();
                apply_physical(&mut k, o);
                Cow::Owned(k)
            },
            None => Cow::Borrowed(ket),
        };
    let mut y: nd::Array2<C64> = nd::Array2::zeros((ket.dim().0, bra.dim().0));
    bra.axis_iter(nd::Axis(1)).zip(ket.axis_iter(nd::Axis(1)))
        .for_each(|(bs, ks)| {
            let bs_dag = bs.t().mapv(|z| z.conj());
            y += &ks.dot(&x.dot(&bs_dag));
        });
    y
}

const SANITY_TOL: f64 = 1e-10;

// close a left boundary `lp :: { bra, ket }` with a right boundary
// `rp :: { ket, bra }` on the same bond
pub(crate) fn close(lp: &nd::Array2<C64>, rp: &nd::Array2<C64>) -> C64 {
    nd::Zip::from(lp).and(&rp.t())
        .fold(C64::zero(), |acc, l, r| acc + l * r)
}

// rectangular identity
fn eye(m: usize, n: usize) -> nd::Array2<C64> {
    nd::Array2::from_shape_fn((m, n), |(i, j)| if i == j { C64::one() } else { C64::zero() })
}

#[derive(Clone, Debug)]
struct Cached {
    tensor: nd::Array2<C64>,
    // maximum revisions of the covered bra and ket sites
    stamp: (u64, u64),
}

/// The network `⟨bra|...|ket⟩` with cached left and right boundaries.
///
/// The states are borrowed or owned; mutating them through
/// [`Self::bra_mut`] or [`Self::ket_mut`] invalidates exactly the cached
/// boundaries covering the changed sites.
///
/// The outermost boundaries are identities. For infinite chains this is only
/// correct if both states are in canonical form, which
/// [`Self::test_sanity`] checks.
#[derive(Clone, Debug)]
pub struct MPSEnvironment<'a> {
    bra: Cow<'a, MPS>,
    ket: Cow<'a, MPS>,
    lp: FxHashMap<i64, Cached>,
    rp: FxHashMap<i64, Cached>,
}

impl<'a> MPSEnvironment<'a> {
    /// Create for borrowed states.
    ///
    /// Fails if the states have different lengths, boundary conditions or
    /// physical dimensions.
    pub fn new(bra: &'a MPS, ket: &'a MPS) -> MPSResult<Self> {
        Self::from_cows(Cow::Borrowed(bra), Cow::Borrowed(ket))
    }

    /// Create for borrowed or owned states.
    pub fn from_cows(bra: Cow<'a, MPS>, ket: Cow<'a, MPS>) -> MPSResult<Self> {
        if bra.L() != ket.L() || bra.bc() != ket.bc() {
            return config_err(format!(
                "bra (L = {}, {:?}) and ket (L = {}, {:?}) don't match",
                bra.L(), bra.bc(), ket.L(), ket.bc(),
            ));
        }
        if bra.sites().iter().zip(ket.sites()).any(|(b, k)| b.dim() != k.dim()) {
            return config_err("bra and ket have different physical dimensions");
        }
        Ok(Self { bra, ket, lp: FxHashMap::default(), rp: FxHashMap::default() })
    }

    /// The bra state.
    pub fn bra(&self) -> &MPS { &self.bra }

    /// The ket state.
    pub fn ket(&self) -> &MPS { &self.ket }

    /// Mutable access to the bra, cloning it first if borrowed.
    pub fn bra_mut(&mut self) -> &mut MPS { self.bra.to_mut() }

    /// Mutable access to the ket, cloning it first if borrowed.
    pub fn ket_mut(&mut self) -> &mut MPS { self.ket.to_mut() }

    /// Return the bra and ket.
    pub fn into_parts(self) -> (Cow<'a, MPS>, Cow<'a, MPS>) { (self.bra, self.ket) }

    /// Number of sites in the chain (or unit cell).
    pub fn L(&self) -> usize { self.ket.L() }

    /// Drop all cached boundaries.
    pub fn clear(&mut self) {
        self.lp.clear();
        self.rp.clear();
    }

    fn lp_stamp(&self, i: i64) -> (u64, u64) {
        (self.bra.stamp(0, i), self.ket.stamp(0, i))
    }

    fn rp_stamp(&self, i: i64) -> (u64, u64) {
        let L = self.L() as i64;
        (self.bra.stamp(i + 1, L), self.ket.stamp(i + 1, L))
    }

    fn init_lp(&self, i: i64) -> nd::Array2<C64> {
        let b = self.ket.bond(i);
        eye(self.bra.ss[b].len(), self.ket.ss[b].len())
    }

    fn init_rp(&self, i: i64) -> nd::Array2<C64> {
        let b = self.ket.bond(i + 1);
        eye(self.ket.ss[b].len(), self.bra.ss[b].len())
    }

    /// The left boundary `LP(i)` of site `i`, optionally caching it and all
    /// intermediate boundaries computed on the way.
    pub fn get_LP(&mut self, i: i64, store: bool) -> MPSResult<nd::Array2<C64>> {
        let L = self.L() as i64;
        if self.ket.finite() && !(0..=L).contains(&i) {
            return config_err(format!("LP({i}) out of range for L = {L}"));
        }
        if i <= 0 { return Ok(self.init_lp(i)); }
        let mut start: i64 = 0;
        let mut x: Option<nd::Array2<C64>> = None;
        for k in (1..=i).rev() {
            if let Some(c) = self.lp.get(&k) {
                if c.stamp == self.lp_stamp(k) {
                    x = Some(c.tensor.clone());
                    start = k;
                    break;
                }
            }
        }
        let mut x = x.unwrap_or_else(|| self.init_lp(0));
        for k in start..i {
            let tb = self.bra.get_B_at(k, Some(Form::A))?;
            let tk = self.ket.get_B_at(k, Some(Form::A))?;
            x = contract_lp(&x, &tb, &tk, None);
            if store {
                let stamp = self.lp_stamp(k + 1);
                self.lp.insert(k + 1, Cached { tensor: x.clone(), stamp });
            }
        }
        Ok(x)
    }

    /// The right boundary `RP(i)` of site `i`, optionally caching it and all
    /// intermediate boundaries computed on the way.
    pub fn get_RP(&mut self, i: i64, store: bool) -> MPSResult<nd::Array2<C64>> {
        let L = self.L() as i64;
        if self.ket.finite() && !(-1..L).contains(&i) {
            return config_err(format!("RP({i}) out of range for L = {L}"));
        }
        if i >= L - 1 { return Ok(self.init_rp(i)); }
        let mut start: i64 = L - 1;
        let mut x: Option<nd::Array2<C64>> = None;
        for k in i..L - 1 {
            if let Some(c) = self.rp.get(&k) {
                if c.stamp == self.rp_stamp(k) {
                    x = Some(c.tensor.clone());
                    start = k;
                    break;
                }
            }
        }
        let mut x = x.unwrap_or_else(|| self.init_rp(L - 1));
        let mut k = start;
        while k > i {
            let tb = self.bra.get_B_at(k, Some(Form::B))?;
            let tk = self.ket.get_B_at(k, Some(Form::B))?;
            x = contract_rp(&x, &tb, &tk, None);
            k -= 1;
            if store {
                let stamp = self.rp_stamp(k);
                self.rp.insert(k, Cached { tensor: x.clone(), stamp });
            }
        }
        Ok(x)
    }

    /// Contract the whole network, cutting at bond `i`:
    /// `LP(i) · S_i · S_i* · RP(i - 1)`.
    pub fn full_contraction(&mut self, i: i64) -> MPSResult<C64> {
        let lp = self.get_LP(i, true)?;
        let rp = self.get_RP(i - 1, true)?;
        let wk = self.ket.bond_weight(i);
        let wb = self.bra.bond_weight(i);
        let mut lpw = lp;
        nd::Zip::from(lpw.rows_mut()).and(&wb)
            .for_each(|mut row, w| { row.map_inplace(|x| { *x *= *w; }); });
        nd::Zip::from(lpw.columns_mut()).and(&wk)
            .for_each(|mut col, w| { col.map_inplace(|x| { *x *= *w; }); });
        Ok(close(&lpw, &rp))
    }

    // contract site `i` into a left boundary, taking the tensors in form `Th`
    // for the first site after `LP` and `B` otherwise
    fn push_left(
        &self,
        x: &nd::Array2<C64>,
        i: i64,
        op: Option<&nd::Array2<C64>>,
        first: bool,
    ) -> MPSResult<nd::Array2<C64>>
    {
        let form = if first { Form::Th } else { Form::B };
        let tb = self.bra.get_B_at(i, Some(form))?;
        let tk = self.ket.get_B_at(i, Some(form))?;
        Ok(contract_lp(x, &tb, &tk, op))
    }

    // contract site `i` into a right boundary, taking the tensors in form `Th`
    // for the last site before `LP` and `B` otherwise
    fn push_right(
        &self,
        x: &nd::Array2<C64>,
        i: i64,
        op: Option<&nd::Array2<C64>>,
        last: bool,
    ) -> MPSResult<nd::Array2<C64>>
    {
        let form = if last { Form::Th } else { Form::B };
        let tb = self.bra.get_B_at(i, Some(form))?;
        let tk = self.ket.get_B_at(i, Some(form))?;
        Ok(contract_rp(x, &tb, &tk, op))
    }

    // Jordan-Wigner operator at site `i`, if a string passes
    fn string(&self, i: i64, odd: bool) -> MPSResult<Option<nd::Array2<C64>>> {
        if odd { Ok(Some(self.ket.site_at(i)?.get_op("JW")?)) } else { Ok(None) }
    }

    /// `⟨bra|op_i|ket⟩` for every site `i` in `sites` (default: all sites
    /// where the operator fits). Not normalized.
    pub fn expectation_value<O>(&mut self, op: O, sites: Option<&[usize]>)
        -> MPSResult<nd::Array1<C64>>
    where O: Into<Operator>
    {
        let op: Operator = op.into();
        let n = op.n_sites();
        let L = self.L();
        let sites: Vec<usize>
            = match sites {
                Some(s) => s.to_vec(),
                None if self.ket.finite() => (0..(L + 1).saturating_sub(n)).collect(),
                None => (0..L).collect(),
            };
        let mut res: nd::Array1<C64> = nd::Array1::zeros(sites.len());
        for (r, i) in res.iter_mut().zip(sites) {
            let i = i as i64;
            let local: Vec<&Site>
                = (0..n as i64)
                .map(|k| self.ket.site_at(i + k))
                .collect::<MPSResult<_>>()?;
            if op.needs_jw(local[0]) {
                return config_err(
                    "fermionic operators need a partner; use \
                    expectation_value_term"
                );
            }
            let mat = op.resolve(&local)?;
            let tb = self.bra.theta_at(i, n, Some(Form::Th))?;
            let tk = self.ket.theta_at(i, n, Some(Form::Th))?;
            let lp = self.get_LP(i, true)?;
            let rp = self.get_RP(i + n as i64 - 1, true)?;
            *r = close(&contract_lp(&lp, &tb, &tk, Some(&mat)), &rp);
        }
        Ok(res)
    }

    /// `⟨bra|term|ket⟩` for an operator product `[(name, site), ...]`,
    /// with Jordan-Wigner strings and fermionic signs taken care of.
    pub fn expectation_value_term<S>(&mut self, term: &[(S, i64)]) -> MPSResult<C64>
    where S: AsRef<str>
    {
        let ket: &MPS = &self.ket;
        let so = site_ops(term, 0, |i| ket.site_at(i))?;
        self.evaluate(&so)
    }

    // evaluate a resolved term
    fn evaluate(&mut self, so: &SiteOps) -> MPSResult<C64> {
        let mut x = self.get_LP(so.start, true)?;
        for (k, op) in so.ops.iter().enumerate() {
            x = self.push_left(&x, so.start + k as i64, Some(op), k == 0)?;
        }
        let rp = self.get_RP(so.end(), true)?;
        Ok(close(&x, &rp) * so.sign)
    }

    /// `Σ_k strength_k ⟨bra|term_k|ket⟩`.
    ///
    /// Every term is contracted separately; only the `LP` and `RP`
    /// boundaries cached along the way are shared between terms.
    pub fn expectation_value_terms_sum(&mut self, terms: &TermList) -> MPSResult<C64> {
        let mut total = C64::zero();
        for (term, strength) in terms.iter() {
            total += strength * self.expectation_value_term(term)?;
        }
        debug!(nterms = terms.len(), "expectation_value_terms_sum");
        Ok(total)
    }

    /// Correlations `⟨term_L(i_L) term_R(j)⟩` for a fixed left term and the
    /// right term shifted to each `j` in `j_R`, computed in one sweep to the
    /// right.
    ///
    /// Sites of the terms are offsets added to `i_L` and `j`. Every right
    /// term must lie entirely right of the left one. The default `j_R` covers
    /// all such positions up to the end of a finite chain, and
    /// `i_L + L, i_L + 2L, ..., i_L + 10L` for infinite chains.
    pub fn term_correlation_function_right<S, T>(
        &mut self,
        term_L: &[(S, i64)],
        term_R: &[(T, i64)],
        i_L: i64,
        j_R: Option<&[i64]>,
    ) -> MPSResult<Vec<C64>>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let L = self.L() as i64;
        let max_l = term_L.iter().map(|t| t.1).max().unwrap_or(0);
        let min_r = term_R.iter().map(|t| t.1).min().unwrap_or(0);
        let max_r = term_R.iter().map(|t| t.1).max().unwrap_or(0);
        let js: Vec<i64>
            = match j_R {
                Some(js) => js.to_vec(),
                None if self.ket.finite() =>
                    (i_L + max_l + 1 - min_r..L - max_r.max(0)).collect(),
                None => (1..=10).map(|k| i_L + k * L).collect(),
            };
        let ket: &MPS = &self.ket;
        let mut left = half_site_ops(term_L, i_L, |i| ket.site_at(i))?;
        let rights: Vec<SiteOps>
            = js.iter()
            .map(|j| half_site_ops(term_R, *j, |i| ket.site_at(i)))
            .collect::<MPSResult<_>>()?;
        if rights.iter().any(|r| r.odd != left.odd) {
            return config_err("correlation function with an odd number of fermionic operators");
        }
        if left.odd { left = left.with_string(|i| ket.site_at(i))?; }
        if let Some(r) = rights.iter().find(|r| r.start <= left.end()) {
            return config_err(format!(
                "right term at site {} overlaps the left term ending at {}",
                r.start, left.end(),
            ));
        }
        let mut order: Vec<usize> = (0..js.len()).collect();
        order.sort_by_key(|k| rights[*k].start);

        let mut x = self.get_LP(left.start, true)?;
        for (k, op) in left.ops.iter().enumerate() {
            x = self.push_left(&x, left.start + k as i64, Some(op), k == 0)?;
        }
        let mut pos = left.end() + 1;
        let mut res: Vec<C64> = vec![C64::zero(); js.len()];
        for k in order {
            let right = &rights[k];
            while pos < right.start {
                let string = self.string(pos, left.odd)?;
                x = self.push_left(&x, pos, string.as_ref(), false)?;
                pos += 1;
            }
            let mut y = x.clone();
            for (m, op) in right.ops.iter().enumerate() {
                y = self.push_left(&y, right.start + m as i64, Some(op), false)?;
            }
            let rp = self.get_RP(right.end(), true)?;
            res[k] = close(&y, &rp) * left.sign * right.sign;
        }
        Ok(res)
    }

    /// Correlations `⟨term_L(i) term_R(j_R)⟩` for a fixed right term and the
    /// left term shifted to each `i` in `i_L`, computed in one sweep to the
    /// left. Values are returned in the order of `i_L`.
    ///
    /// The default `i_L` covers all positions left of the right term down to
    /// the start of a finite chain, and `j_R - L, ..., j_R - 10L` for
    /// infinite chains.
    pub fn term_correlation_function_left<S, T>(
        &mut self,
        term_L: &[(S, i64)],
        term_R: &[(T, i64)],
        i_L: Option<&[i64]>,
        j_R: i64,
    ) -> MPSResult<Vec<C64>>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let L = self.L() as i64;
        let min_l = term_L.iter().map(|t| t.1).min().unwrap_or(0);
        let max_l = term_L.iter().map(|t| t.1).max().unwrap_or(0);
        let min_r = term_R.iter().map(|t| t.1).min().unwrap_or(0);
        let is: Vec<i64>
            = match i_L {
                Some(is) => is.to_vec(),
                None if self.ket.finite() =>
                    ((-min_l).max(0)..j_R + min_r - max_l).collect(),
                None => (1..=10).map(|k| j_R - k * L).collect(),
            };
        let ket: &MPS = &self.ket;
        let right = half_site_ops(term_R, j_R, |i| ket.site_at(i))?;
        let lefts: Vec<SiteOps>
            = is.iter()
            .map(|i| {
                let l = half_site_ops(term_L, *i, |k| ket.site_at(k))?;
                if l.odd != right.odd {
                    return config_err(
                        "correlation function with an odd number of fermionic operators");
                }
                if l.odd { l.with_string(|k| ket.site_at(k)) } else { Ok(l) }
            })
            .collect::<MPSResult<_>>()?;
        if let Some(l) = lefts.iter().find(|l| l.end() >= right.start) {
            return config_err(format!(
                "left term ending at site {} overlaps the right term starting at {}",
                l.end(), right.start,
            ));
        }
        let mut order: Vec<usize> = (0..is.len()).collect();
        order.sort_by_key(|k| std::cmp::Reverse(lefts[*k].end()));

        let mut y = self.get_RP(right.end(), true)?;
        for (m, op) in right.ops.iter().enumerate().rev() {
            y = self.push_right(&y, right.start + m as i64, Some(op), false)?;
        }
        let mut pos = right.start; // y covers sites >= pos
        let mut res: Vec<C64> = vec![C64::zero(); is.len()];
        for k in order {
            let left = &lefts[k];
            while pos - 1 > left.end() {
                let string = self.string(pos - 1, right.odd)?;
                y = self.push_right(&y, pos - 1, string.as_ref(), false)?;
                pos -= 1;
            }
            let mut z = y.clone();
            for (m, op) in left.ops.iter().enumerate().rev() {
                z = self.push_right(&z, left.start + m as i64, Some(op), m == 0)?;
            }
            let lp = self.get_LP(left.start, true)?;
            res[k] = close(&lp, &z) * left.sign * right.sign;
        }
        Ok(res)
    }

    /// Correlation matrix `C[a, b] = ⟨op1_{sites1[a]} op2_{sites2[b]}⟩` (with
    /// Jordan-Wigner strings for fermionic operators), defaulting to all
    /// sites of the chain or unit cell.
    pub fn correlation_function(
        &mut self,
        op1: &str,
        op2: &str,
        sites1: Option<&[usize]>,
        sites2: Option<&[usize]>,
    ) -> MPSResult<nd::Array2<C64>>
    {
        let L = self.L();
        let all: Vec<usize> = (0..L).collect();
        let sites1 = sites1.unwrap_or(&all);
        let sites2 = sites2.unwrap_or(&all);
        let mut corr: nd::Array2<C64> = nd::Array2::zeros((sites1.len(), sites2.len()));
        for (a, &i) in sites1.iter().enumerate() {
            let i = i as i64;
            let odd = self.ket.site_at(i)?.op_needs_jw(op1);
            let (right, left): (Vec<usize>, Vec<usize>)
                = (0..sites2.len())
                .filter(|b| sites2[*b] as i64 != i)
                .partition(|b| sites2[*b] as i64 > i);
            for b in (0..sites2.len()).filter(|b| sites2[*b] as i64 == i) {
                corr[[a, b]] = self.expectation_value_term(&[(op1, i), (op2, i)])?;
            }
            if !right.is_empty() {
                let js: Vec<i64> = right.iter().map(|b| sites2[*b] as i64).collect();
                let vals
                    = self.term_correlation_function_right(
                        &[(op1, 0)], &[(op2, 0)], i, Some(&js))?;
                right.iter().zip(vals).for_each(|(b, v)| { corr[[a, *b]] = v; });
            }
            if !left.is_empty() {
                let is: Vec<i64> = left.iter().map(|b| sites2[*b] as i64).collect();
                let vals
                    = self.term_correlation_function_left(
                        &[(op2, 0)], &[(op1, 0)], Some(&is), i)?;
                // exchanging the two fermionic operators
                let sign = if odd { -1.0 } else { 1.0 };
                left.iter().zip(vals).for_each(|(b, v)| { corr[[a, *b]] = v * sign; });
            }
        }
        Ok(corr)
    }

    /// Check both states, and that every valid cached boundary agrees with
    /// one rebuilt from scratch. On infinite chains, both states must be in
    /// canonical form.
    pub fn test_sanity(&self) -> MPSResult<()> {
        self.bra.test_sanity()?;
        self.ket.test_sanity()?;
        if !self.ket.finite() {
            for psi in [&self.bra, &self.ket] {
                if let Some(i) = psi.form().iter().position(|f| f.is_none()) {
                    return invalid_state(
                        Location::Site(i),
                        "untagged tensor in an infinite chain; the boundaries \
                        assume canonical form",
                    );
                }
            }
        }
        let mut fresh = MPSEnvironment::new(&self.bra, &self.ket)?;
        for (i, c) in self.lp.iter() {
            if c.stamp != self.lp_stamp(*i) { continue; }
            let x = fresh.get_LP(*i, false)?;
            if x.dim() != c.tensor.dim() || frob_norm(&(&x - &c.tensor)) > SANITY_TOL {
                let b = self.ket.bond(*i);
                return invalid_state(Location::Bond(b), format!("cached LP({i}) is stale"));
            }
        }
        for (i, c) in self.rp.iter() {
            if c.stamp != self.rp_stamp(*i) { continue; }
            let x = fresh.get_RP(*i, false)?;
            if x.dim() != c.tensor.dim() || frob_norm(&(&x - &c.tensor)) > SANITY_TOL {
                let b = self.ket.bond(*i + 1);
                return invalid_state(Location::Bond(b), format!("cached RP({i}) is stale"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::{
        mps::BC,
        site::Conserve,
    };

    fn neel(L: usize) -> MPS {
        let s = Site::spin_half(Conserve::Sz);
        let states: Vec<&str>
            = (0..L).map(|i| if i % 2 == 0 { "up" } else { "down" }).collect();
        MPS::from_product_state(vec![s; L], &states, BC::Finite).unwrap()
    }

    #[test]
    fn cache_is_invalidated_by_mutation() {
        let psi = neel(4);
        let mut env = MPSEnvironment::from_cows(Cow::Owned(psi.clone()), Cow::Borrowed(&psi))
            .unwrap();
        assert_abs_diff_eq!(env.full_contraction(2).unwrap().re, 1.0, epsilon = 1e-14);
        env.test_sanity().unwrap();
        // site 1 is down, so the bra picks up a sign
        let s = env.bra().sites()[1].clone();
        env.bra_mut().apply_local_op(1, s.get_op("Sigmaz").unwrap(), true, true).unwrap();
        assert_abs_diff_eq!(env.full_contraction(2).unwrap().re, -1.0, epsilon = 1e-14);
        env.bra_mut().apply_local_op(1, "Sp", false, true).unwrap();
        assert_abs_diff_eq!(env.full_contraction(2).unwrap().norm(), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn full_contraction_at_every_bond() {
        let psi = neel(4);
        let mut env = MPSEnvironment::new(&psi, &psi).unwrap();
        for i in 0..=4 {
            assert_abs_diff_eq!(env.full_contraction(i).unwrap().re, 1.0, epsilon = 1e-14);
        }
        assert!(env.get_LP(5, false).is_err());
        assert!(env.get_RP(-2, false).is_err());
    }

    #[test]
    fn infinite_boundaries_need_canonical_form() {
        let s = Site::spin_half(Conserve::Sz);
        let psi = MPS::from_product_state(vec![s; 2], &["up", "down"], BC::Infinite)
            .unwrap();
        let mut raw = psi.clone();
        let b = raw.get_B(1, None).unwrap();
        raw.set_B(1, b, None).unwrap();
        raw.test_sanity().unwrap();
        MPSEnvironment::new(&psi, &psi).unwrap().test_sanity().unwrap();
        let err = MPSEnvironment::new(&psi, &raw).unwrap().test_sanity().unwrap_err();
        assert!(matches!(
            err,
            crate::error::MPSError::InvalidState { location: Location::Site(1), .. }
        ));
    }
}

//! Matrix product states in canonical form.
//!
//! A state of `L` sites is held as one rank-3 tensor per site, with axis
//! signature `[ vL{i}, p{i}, vR{i} ]`, and a vector of Schmidt values on every
//! bond. Bond `i` sits left of site `i`:
//!
//! ```text
//!    bond 0      bond 1      bond 2              bond L-1      bond L
//!  S[0] --- B[0] --- S[1] --- B[1] --- S[2] ... S[L-1] --- B[L-1] --- S[L]
//!            |                 |                            |
//!            p                 p                            p
//! ```
//!
//! For finite chains there are `L + 1` bonds, the outer two being trivial
//! (dimension 1). For infinite chains the pattern repeats with period `L`, so
//! there are `L` bonds and bond `L` is bond `0`.
//!
//! Every tensor carries a [`Form`] tag recording which powers of the Schmidt
//! values on its left and right are absorbed into it; the canonical storage is
//! [`Form::B`] (right-orthonormal), from which the others follow via
//! [`MPS::get_B`]. Untagged (`None`) tensors are plain factors of the state
//! without any Schmidt values, as produced e.g. by [`MPS::add`].
//!
//! Charges: the indices of bond `b` carry the charges `legs[b]`, and the
//! entries of `B[i]` obey `q_vL + q_p - q_vR == qtotal[i]`.

use std::{
    fmt,
    sync::atomic::{ AtomicU64, Ordering },
};
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::{ One, Zero };
use crate::{
    charges::{ ChargeInfo, LegCharge },
    decomp::{ c_order, frob_norm },
    error::{
        Location,
        MPSResult,
        charge_err,
        config_err,
        invalid_state,
    },
    site::{ OP_ZERO, Site },
};

mod canonical;
mod charge;
mod compress;
mod measure;
pub(crate) mod ops;
mod structure;

pub use compress::{ CompressionMethod, CompressionOptions };
pub use structure::ComputeK;

/// Schmidt values below this are treated as zero when inverted.
pub(crate) const S_CUTOFF: f64 = 1e-15;

static REVISION: AtomicU64 = AtomicU64::new(1);

// every mutation stamps the touched sites with a fresh, globally increasing
// revision number; a cached contraction is valid as long as the maximum
// revision over the sites it covers is unchanged
fn next_revision() -> u64 { REVISION.fetch_add(1, Ordering::Relaxed) }

/// Boundary conditions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BC {
    /// Open chain with trivial outer bonds.
    Finite,
    /// Open chain cut out of a larger system; the outer bonds may be
    /// non-trivial.
    Segment,
    /// Translation-invariant chain with a unit cell of `L` sites.
    Infinite,
}

impl BC {
    /// Return `true` for `Finite` and `Segment`.
    pub fn is_finite(&self) -> bool { !matches!(self, Self::Infinite) }
}

/// The powers of the left and right Schmidt values absorbed into a site
/// tensor.
///
/// With `Γ` the Vidal tensor of a site and `S_L`, `S_R` the Schmidt values on
/// its bonds:
/// - `A  = S_L   Γ`      (left-orthonormal)
/// - `C  = S_L^½ Γ S_R^½`
/// - `B  =       Γ S_R`  (right-orthonormal)
/// - `G  =       Γ`
/// - `Th = S_L   Γ S_R`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Form { A, C, B, G, Th }

impl Form {
    /// Powers `(ν_L, ν_R)` of the left and right Schmidt values.
    pub fn nu(&self) -> (f64, f64) {
        match self {
            Self::A => (1.0, 0.0),
            Self::C => (0.5, 0.5),
            Self::B => (0.0, 1.0),
            Self::G => (0.0, 0.0),
            Self::Th => (1.0, 1.0),
        }
    }

    /// The form of the spatially inverted tensor.
    pub fn inverted(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
            f => *f,
        }
    }
}

/// Canonical-form tag of a bond, derived from the forms of its two
/// neighboring tensors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BondForm {
    /// At least one neighbor is untagged.
    None,
    /// Both neighbors are left-orthonormal.
    Left,
    /// Both neighbors are right-orthonormal.
    Right,
    /// Left-orthonormal on the left and right-orthonormal on the right: the
    /// orthogonality center.
    Mixed,
    /// Any other combination of tagged forms.
    Other,
}

/// The local state of one site in a product state.
#[derive(Clone, Debug, PartialEq)]
pub enum ProductState {
    /// A basis state given by its label.
    Label(String),
    /// A basis state given by its index.
    Index(usize),
    /// An arbitrary (not necessarily normalized) vector.
    Vector(nd::Array1<C64>),
}

impl From<&str> for ProductState {
    fn from(label: &str) -> Self { Self::Label(label.to_string()) }
}

impl From<usize> for ProductState {
    fn from(idx: usize) -> Self { Self::Index(idx) }
}

impl From<nd::Array1<C64>> for ProductState {
    fn from(v: nd::Array1<C64>) -> Self { Self::Vector(v) }
}

/// A matrix product state.
///
/// See the [module-level documentation][self] for the conventions.
#[derive(Clone)]
pub struct MPS {
    // Local Hilbert spaces.
    pub(crate) sites: Vec<Site>, // length L
    pub(crate) bc: BC,
    pub(crate) chinfo: ChargeInfo,
    // Site tensors, each with axis signature
    //   [ vL{i}, p{i}, vR{i} ]
    pub(crate) bs: Vec<nd::Array3<C64>>, // length L
    // Schmidt values on each bond.
    pub(crate) ss: Vec<nd::Array1<f64>>, // length L + 1 (finite), L (infinite)
    pub(crate) form: Vec<Option<Form>>, // length L
    // Charges of the bond indices.
    pub(crate) legs: Vec<LegCharge>, // same length as `ss`
    // Total charge of each site tensor.
    pub(crate) qtotal: Vec<Vec<i64>>, // length L
    // Overall scale of the state.
    pub(crate) norm: f64,
    // Number of original sites per site, after `group_sites`.
    pub(crate) grouped: usize,
    pub(crate) revs: Vec<u64>, // length L
}

impl MPS {
    /// Initialize to a product state.
    ///
    /// Fails if `sites` and `states` have different lengths, if the chain is
    /// empty, if the sites don't share the same charges, or if a state label,
    /// index or vector is not valid for its site. With charges conserved, a
    /// vector must have a definite charge.
    pub fn from_product_state<P>(sites: Vec<Site>, states: &[P], bc: BC)
        -> MPSResult<Self>
    where P: Clone + Into<ProductState>
    {
        let L = sites.len();
        if L == 0 { return config_err("cannot create an MPS for an empty chain"); }
        if states.len() != L {
            return config_err(format!(
                "got {} product states for {L} sites", states.len(),
            ));
        }
        let chinfo = Self::common_chinfo(&sites)?;
        let mut bs: Vec<nd::Array3<C64>> = Vec::with_capacity(L);
        let mut charges: Vec<Vec<i64>> = Vec::with_capacity(L);
        for (i, (site, state)) in sites.iter().zip(states).enumerate() {
            let d = site.dim();
            let v: nd::Array1<C64> = match state.clone().into() {
                ProductState::Label(label) => {
                    let Some(k) = site.state_index(&label) else {
                        return config_err(format!(
                            "invalid state label {label:?} for site {i}"
                        ));
                    };
                    let mut v = nd::Array1::zeros(d);
                    v[k] = C64::one();
                    v
                },
                ProductState::Index(k) => {
                    if k >= d {
                        return config_err(format!(
                            "state index {k} out of range for site {i} of \
                            dimension {d}"
                        ));
                    }
                    let mut v = nd::Array1::zeros(d);
                    v[k] = C64::one();
                    v
                },
                ProductState::Vector(v) => {
                    if v.len() != d {
                        return config_err(format!(
                            "state vector of length {} for site {i} of \
                            dimension {d}",
                            v.len(),
                        ));
                    }
                    let n = v.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
                    if n == 0.0 {
                        return config_err(format!("zero state vector for site {i}"));
                    }
                    v.mapv(|x| x / n)
                },
            };
            let mut q: Option<Vec<i64>> = None;
            for (k, vk) in v.iter().enumerate() {
                if vk.norm() <= OP_ZERO { continue; }
                let qk = site.leg().get(k);
                match &q {
                    None => { q = Some(qk); },
                    Some(q0) if chinfo.equal(q0, &qk) => { },
                    Some(_) => {
                        return charge_err(
                            i, "product state vector mixes different charges");
                    },
                }
            }
            charges.push(q.unwrap_or_else(|| chinfo.zero()));
            bs.push(v.into_shape((1, d, 1))?);
        }
        let qn = chinfo.qnumber();
        let nbonds = if bc.is_finite() { L + 1 } else { L };
        let (legs, qtotal): (Vec<LegCharge>, Vec<Vec<i64>>)
            = if bc.is_finite() {
                let mut q = chinfo.zero();
                let mut legs = vec![LegCharge::from_rows(&[q.clone()], qn)];
                for qi in charges.iter() {
                    q = chinfo.add(&q, qi);
                    legs.push(LegCharge::from_rows(&[q.clone()], qn));
                }
                (legs, vec![chinfo.zero(); L])
            } else {
                (vec![LegCharge::trivial(1, qn); L], charges)
            };
        let revs = (0..L).map(|_| next_revision()).collect();
        Ok(Self {
            sites,
            bc,
            chinfo,
            bs,
            ss: vec![nd::array![1.0]; nbonds],
            form: vec![Some(Form::B); L],
            legs,
            qtotal,
            norm: 1.0,
            grouped: 1,
            revs,
        })
    }

    /// Initialize to a pattern of two-site singlets
    /// `(|up down⟩ - |down up⟩)/√2` on the given `pairs` of sites, with the
    /// `lonely` sites in `lonely_state`.
    ///
    /// The bond dimension on each bond is `2^k`, with `k` the number of pairs
    /// crossing it. For infinite chains, pairs may not cross the unit cell
    /// boundary. Fails if `pairs` and `lonely` don't cover every site of
    /// `0..L` exactly once or if a state label is unknown.
    #[allow(clippy::too_many_arguments)]
    pub fn from_singlets(
        site: &Site,
        L: usize,
        pairs: &[(usize, usize)],
        lonely: &[usize],
        up: &str,
        down: &str,
        lonely_state: &str,
        bc: BC,
    ) -> MPSResult<Self>
    {
        if L == 0 { return config_err("cannot create an MPS for an empty chain"); }
        let mut seen = vec![false; L];
        let pairs: Vec<(usize, usize)>
            = pairs.iter()
            .map(|&(i, j)| (i.min(j), i.max(j)))
            .collect();
        let covered
            = pairs.iter().flat_map(|&(i, j)| [i, j])
            .chain(lonely.iter().copied());
        for k in covered {
            if k >= L || seen[k] {
                return config_err(format!(
                    "singlet pattern does not partition 0..{L}: site {k} is \
                    out of range or used twice"
                ));
            }
            seen[k] = true;
        }
        if let Some(k) = seen.iter().position(|s| !s) {
            return config_err(format!(
                "singlet pattern does not partition 0..{L}: site {k} is missing"
            ));
        }
        let find = |label: &str| -> MPSResult<usize> {
            site.state_index(label).map_or_else(
                || config_err(format!("invalid state label {label:?}")),
                Ok,
            )
        };
        let iu = find(up)?;
        let id = find(down)?;
        let il = find(lonely_state)?;
        let chinfo = site.chinfo().clone();
        let qn = chinfo.qnumber();
        let qu = site.leg().get(iu);
        let qd = site.leg().get(id);
        let d = site.dim();

        // pairs crossing each bond, in order of their left sites
        let nbonds = if bc.is_finite() { L + 1 } else { L };
        let mut sorted = pairs.clone();
        sorted.sort_unstable();
        let open: Vec<Vec<usize>>
            = (0..=L)
            .map(|b| {
                (0..sorted.len())
                    .filter(|p| sorted[*p].0 < b && b <= sorted[*p].1)
                    .collect()
            })
            .collect();
        let legs: Vec<LegCharge>
            = (0..nbonds)
            .map(|b| {
                let k = open[b].len();
                let rows: Vec<Vec<i64>>
                    = (0..1_usize << k)
                    .map(|alpha| {
                        (0..k).fold(chinfo.zero(), |q, m| {
                            if bit(alpha, k, m) == 0 { chinfo.add(&q, &qu) }
                            else { chinfo.add(&q, &qd) }
                        })
                    })
                    .collect();
                LegCharge::from_rows(&rows, qn)
            })
            .collect();
        let ss: Vec<nd::Array1<f64>>
            = (0..nbonds)
            .map(|b| {
                let dim = 1_usize << open[b].len();
                nd::Array1::from_elem(dim, (dim as f64).sqrt().recip())
            })
            .collect();

        let h = C64::from(0.5_f64.sqrt());
        let mut bs: Vec<nd::Array3<C64>> = Vec::with_capacity(L);
        let mut qtotal: Vec<Vec<i64>> = Vec::with_capacity(L);
        for i in 0..L {
            let kl = open[i].len();
            let kr = open[i + 1].len();
            let mut b: nd::Array3<C64>
                = nd::Array3::zeros((1 << kl, d, 1 << kr));
            if let Some(p) = sorted.iter().position(|&(a, _)| a == i) {
                // left partner: open a new singlet with 1/√2
                let pos = open[i + 1].iter().position(|q| *q == p).unwrap_or(0);
                for alpha in 0..1_usize << kl {
                    b[[alpha, iu, insert_bit(alpha, kl, pos, 0)]] = h;
                    b[[alpha, id, insert_bit(alpha, kl, pos, 1)]] = h;
                }
                qtotal.push(chinfo.zero());
            } else if let Some(p) = sorted.iter().position(|&(_, c)| c == i) {
                // right partner: close the singlet with the opposite state
                let pos = open[i].iter().position(|q| *q == p).unwrap_or(0);
                for alpha in 0..1_usize << kl {
                    let beta = remove_bit(alpha, kl, pos);
                    if bit(alpha, kl, pos) == 0 {
                        b[[alpha, id, beta]] = C64::one();
                    } else {
                        b[[alpha, iu, beta]] = -C64::one();
                    }
                }
                qtotal.push(chinfo.add(&qu, &qd));
            } else {
                for alpha in 0..1_usize << kl {
                    b[[alpha, il, alpha]] = C64::one();
                }
                qtotal.push(site.leg().get(il));
            }
            bs.push(b);
        }
        let revs = (0..L).map(|_| next_revision()).collect();
        Ok(Self {
            sites: vec![site.clone(); L],
            bc,
            chinfo,
            bs,
            ss,
            form: vec![Some(Form::B); L],
            legs,
            qtotal,
            norm: 1.0,
            grouped: 1,
            revs,
        })
    }

    /// Initialize from explicit site tensors with axis signature
    /// `[ vL, p, vR ]`.
    ///
    /// If `form` is given, Schmidt values `svs` must be given as well and the
    /// tensors are taken to be in that form; otherwise the tensors are plain
    /// factors of the state. Bond charges are inferred from the first
    /// non-zero entry of every column, starting from zero charges on bond 0.
    ///
    /// Fails if the shapes don't link up or don't match the sites, or if
    /// Schmidt values are missing or have the wrong lengths.
    pub fn from_bflat(
        sites: Vec<Site>,
        bs: Vec<nd::Array3<C64>>,
        svs: Option<Vec<nd::Array1<f64>>>,
        bc: BC,
        form: Option<Form>,
    ) -> MPSResult<Self>
    {
        let L = sites.len();
        if L == 0 { return config_err("cannot create an MPS for an empty chain"); }
        if bs.len() != L {
            return config_err(format!("got {} tensors for {L} sites", bs.len()));
        }
        let chinfo = Self::common_chinfo(&sites)?;
        let nbonds = if bc.is_finite() { L + 1 } else { L };
        for i in 0..L {
            let (_, d, chir) = bs[i].dim();
            let next = if i + 1 < L { bs[i + 1].dim().0 }
                else if bc.is_finite() { chir }
                else { bs[0].dim().0 };
            if d != sites[i].dim() || chir != next {
                return config_err(format!(
                    "tensor {i} has shape {:?}, incompatible with its site \
                    (dimension {}) or right neighbor (left bond {next})",
                    bs[i].dim(), sites[i].dim(),
                ));
            }
        }
        if bc == BC::Finite && (bs[0].dim().0 != 1 || bs[L - 1].dim().2 != 1) {
            return config_err("outer bonds of a finite chain must be trivial");
        }
        let bond_dim = |b: usize| -> usize {
            if b < L { bs[b].dim().0 } else { bs[L - 1].dim().2 }
        };
        let ss: Vec<nd::Array1<f64>>
            = match svs {
                Some(svs) => {
                    if svs.len() != nbonds
                        || (0..nbonds).any(|b| svs[b].len() != bond_dim(b))
                    {
                        return config_err("Schmidt values don't match the bonds");
                    }
                    svs
                },
                None => {
                    if form.is_some() {
                        return config_err(
                            "Schmidt values are required for tagged tensors");
                    }
                    (0..nbonds).map(|b| nd::Array1::ones(bond_dim(b))).collect()
                },
            };
        let qn = chinfo.qnumber();
        let mut legs: Vec<LegCharge> = vec![LegCharge::trivial(bond_dim(0), qn)];
        let mut qtotal: Vec<Vec<i64>> = Vec::with_capacity(L);
        for (i, b) in bs.iter().enumerate() {
            let ql = legs[i].clone();
            let qp = sites[i].leg();
            let first_nonzero = |c: usize| -> Option<(usize, usize)> {
                b.slice(nd::s![.., .., c]).indexed_iter()
                    .find(|(_, x)| x.norm() > OP_ZERO)
                    .map(|(idx, _)| idx)
            };
            if i + 1 < nbonds {
                let rows: Vec<Vec<i64>>
                    = (0..b.dim().2)
                    .map(|c| {
                        first_nonzero(c)
                            .map(|(a, s)| chinfo.add(&ql.get(a), &qp.get(s)))
                            .unwrap_or_else(|| chinfo.zero())
                    })
                    .collect();
                legs.push(LegCharge::from_rows(&rows, qn));
                qtotal.push(chinfo.zero());
            } else {
                // last site of an infinite chain: bond L is bond 0
                let q0 = &legs[0];
                let qt
                    = (0..b.dim().2)
                    .find_map(|c| {
                        first_nonzero(c).map(|(a, s)| {
                            chinfo.sub(&chinfo.add(&ql.get(a), &qp.get(s)), &q0.get(c))
                        })
                    })
                    .unwrap_or_else(|| chinfo.zero());
                qtotal.push(qt);
            }
        }
        let bs: Vec<nd::Array3<C64>> = bs.into_iter().map(c_order).collect();
        let revs = (0..L).map(|_| next_revision()).collect();
        Ok(Self {
            sites,
            bc,
            chinfo,
            bs,
            ss,
            form: vec![form; L],
            legs,
            qtotal,
            norm: 1.0,
            grouped: 1,
            revs,
        })
    }

    fn common_chinfo(sites: &[Site]) -> MPSResult<ChargeInfo> {
        let chinfo = sites[0].chinfo().clone();
        if sites.iter().any(|s| *s.chinfo() != chinfo) {
            return config_err("all sites must conserve the same charges");
        }
        Ok(chinfo)
    }
}

// bit `m` (0 = most significant) of a `k`-bit index
fn bit(alpha: usize, k: usize, m: usize) -> usize { (alpha >> (k - 1 - m)) & 1 }

// insert `b` as bit `pos` into a `k`-bit index, giving a `k + 1`-bit index
fn insert_bit(alpha: usize, k: usize, pos: usize, b: usize) -> usize {
    let low_bits = k - pos;
    let high = alpha >> low_bits;
    let low = alpha & ((1 << low_bits) - 1);
    (((high << 1) | b) << low_bits) | low
}

// remove bit `pos` from a `k`-bit index
fn remove_bit(alpha: usize, k: usize, pos: usize) -> usize {
    let low_bits = k - 1 - pos;
    let high = alpha >> (low_bits + 1);
    let low = alpha & ((1 << low_bits) - 1);
    (high << low_bits) | low
}

impl MPS {
    /// Number of sites in the chain (or unit cell).
    pub fn L(&self) -> usize { self.sites.len() }

    /// Boundary conditions.
    pub fn bc(&self) -> BC { self.bc }

    /// Return `true` unless the chain is infinite.
    pub fn finite(&self) -> bool { self.bc.is_finite() }

    /// Number of bonds: `L + 1` for finite chains, `L` for infinite ones.
    pub fn nbonds(&self) -> usize { self.ss.len() }

    /// The local Hilbert spaces.
    pub fn sites(&self) -> &[Site] { &self.sites }

    /// The conserved charges.
    pub fn chinfo(&self) -> &ChargeInfo { &self.chinfo }

    /// The overall scale of the state.
    pub fn norm(&self) -> f64 { self.norm }

    /// Set the overall scale of the state.
    pub fn set_norm(&mut self, norm: f64) { self.norm = norm; }

    /// Bond dimensions of all bonds.
    pub fn chi(&self) -> Vec<usize> { self.ss.iter().map(|s| s.len()).collect() }

    /// Form tags of all site tensors.
    pub fn form(&self) -> &[Option<Form>] { &self.form }

    /// Total charge of each site tensor.
    pub fn qtotal(&self) -> &[Vec<i64>] { &self.qtotal }

    /// Charges of the indices of bond `b`.
    ///
    /// *Panics if `b` is out of bounds.*
    pub fn leg(&self, b: usize) -> &LegCharge { &self.legs[b] }

    /// Number of original sites combined into each site by
    /// [`Self::group_sites`].
    pub fn grouped(&self) -> usize { self.grouped }

    // map a (possibly out-of-cell) site index to the unit cell
    pub(crate) fn idx(&self, i: i64) -> MPSResult<usize> {
        let L = self.L() as i64;
        if self.finite() {
            if i < 0 || i >= L {
                return config_err(format!(
                    "site {i} out of range for a finite chain of length {L}"
                ));
            }
            Ok(i as usize)
        } else {
            Ok(i.rem_euclid(L) as usize)
        }
    }

    // map a bond index to storage
    pub(crate) fn bond(&self, b: i64) -> usize {
        if self.finite() {
            b.clamp(0, self.L() as i64) as usize
        } else {
            b.rem_euclid(self.L() as i64) as usize
        }
    }

    /// The site at position `i`, wrapped into the unit cell for infinite
    /// chains.
    pub fn site(&self, i: usize) -> MPSResult<&Site> {
        Ok(&self.sites[self.idx(i as i64)?])
    }

    pub(crate) fn site_at(&self, i: i64) -> MPSResult<&Site> {
        Ok(&self.sites[self.idx(i)?])
    }

    /// Schmidt values on bond `b` (left of site `b`).
    pub fn get_SL(&self, i: usize) -> &nd::Array1<f64> {
        &self.ss[self.bond(i as i64)]
    }

    /// Schmidt values right of site `i`.
    pub fn get_SR(&self, i: usize) -> &nd::Array1<f64> {
        &self.ss[self.bond(i as i64 + 1)]
    }

    /// Canonical-form tag of bond `b`.
    pub fn bond_form(&self, b: usize) -> BondForm {
        let L = self.L();
        // the outer bonds of a finite chain count as orthonormal from outside
        let left
            = if b == 0 && self.finite() { Some(Form::A) }
            else { self.form[(b + L - 1) % L] };
        let right
            = if b == L && self.finite() { Some(Form::B) }
            else { self.form[b % L] };
        match (left, right) {
            (None, _) | (_, None) => BondForm::None,
            (Some(Form::A), Some(Form::A)) => BondForm::Left,
            (Some(Form::B), Some(Form::B)) => BondForm::Right,
            (Some(Form::A), Some(Form::B)) => BondForm::Mixed,
            _ => BondForm::Other,
        }
    }

    /// Return the tensor of site `i` in the requested form.
    ///
    /// Untagged tensors, or a request for `None`, return the tensor as stored.
    /// Fails if `i` is out of range for a finite chain.
    pub fn get_B(&self, i: usize, form: Option<Form>) -> MPSResult<nd::Array3<C64>> {
        self.get_B_at(i as i64, form)
    }

    pub(crate) fn get_B_at(&self, i: i64, form: Option<Form>)
        -> MPSResult<nd::Array3<C64>>
    {
        let k = self.idx(i)?;
        let b = &self.bs[k];
        let (Some(old), Some(new)) = (self.form[k], form) else {
            return Ok(b.clone());
        };
        if old == new { return Ok(b.clone()); }
        let (ol, or) = old.nu();
        let (nl, nr) = new.nu();
        let mut b = b.clone();
        if nl != ol {
            let sl = s_power(&self.ss[self.bond(i)], nl - ol);
            nd::Zip::from(b.outer_iter_mut())
                .and(&sl)
                .for_each(|mut bv, sv| { bv.map_inplace(|x| { *x *= *sv; }); });
        }
        if nr != or {
            let sr = s_power(&self.ss[self.bond(i + 1)], nr - or);
            nd::Zip::from(b.axis_iter_mut(nd::Axis(2)))
                .and(&sr)
                .for_each(|mut bw, sw| { bw.map_inplace(|x| { *x *= *sw; }); });
        }
        Ok(b)
    }

    /// Replace the tensor of site `i`, tagged with `form`.
    ///
    /// The bond dimensions must match the neighboring Schmidt values; this is
    /// not checked here (see [`Self::test_sanity`]).
    pub fn set_B(&mut self, i: usize, b: nd::Array3<C64>, form: Option<Form>)
        -> MPSResult<()>
    {
        let k = self.idx(i as i64)?;
        self.bs[k] = c_order(b);
        self.form[k] = form;
        self.touch(k);
        Ok(())
    }

    // set the Schmidt values and charges of a bond, stamping both neighbors
    pub(crate) fn set_bond(&mut self, b: i64, s: nd::Array1<f64>, leg: LegCharge) {
        let k = self.bond(b);
        self.ss[k] = s;
        self.legs[k] = leg;
        let L = self.L();
        if k < L { self.touch(k); }
        if k > 0 || !self.finite() { self.touch((k + L - 1) % L); }
    }

    /// Contract `n` consecutive site tensors starting at `i` into a single
    /// tensor with axis signature `[ vL{i}, p{i}<>...<>p{i+n-1}, vR{i+n-1} ]`
    /// (`<>` denoting fusion, the leftmost physical index varying slowest).
    ///
    /// The first tensor is taken in form `Th` and the others in form `B`, so
    /// for canonical states the result is the wavefunction on the sites. For
    /// untagged states the stored tensors are used.
    pub fn get_theta(&self, i: usize, n: usize) -> MPSResult<nd::Array3<C64>> {
        self.theta_at(i as i64, n, Some(Form::Th))
    }

    // like `get_theta`, with the form of the first tensor chosen explicitly
    pub(crate) fn theta_at(&self, i: i64, n: usize, first: Option<Form>)
        -> MPSResult<nd::Array3<C64>>
    {
        if n == 0 { return config_err("cannot contract zero sites"); }
        if self.finite() && (i < 0 || i as usize + n > self.L()) {
            return config_err(format!(
                "sites {i}..{} out of range for a finite chain of length {}",
                i + n as i64, self.L(),
            ));
        }
        let mut theta = self.get_B_at(i, first)?;
        for k in 1..n as i64 {
            let b = self.get_B_at(i + k, Some(Form::B))?;
            theta = contract_right(&theta, &b)?;
        }
        Ok(theta)
    }

    // stamp site `k` with a fresh revision
    pub(crate) fn touch(&mut self, k: usize) { self.revs[k] = next_revision(); }

    // stamp all sites with fresh revisions
    pub(crate) fn touch_all(&mut self) {
        let L = self.L();
        self.revs = (0..L).map(|_| next_revision()).collect();
    }

    // maximum revision over the sites `from..to` (wrapped into the unit cell
    // for infinite chains)
    pub(crate) fn stamp(&self, from: i64, to: i64) -> u64 {
        if to <= from { return 0; }
        let L = self.L() as i64;
        if to - from >= L {
            return self.revs.iter().copied().max().unwrap_or(0);
        }
        (from..to)
            .map(|i| self.revs[i.rem_euclid(L) as usize])
            .max()
            .unwrap_or(0)
    }

    // Schmidt values to put on bond `b` when closing a contraction there;
    // ones if either neighbor is untagged
    pub(crate) fn bond_weight(&self, b: i64) -> nd::Array1<f64> {
        let k = self.bond(b);
        let L = self.L() as i64;
        let untagged
            = [b - 1, b].iter()
            .filter(|i| !self.finite() || (0..L).contains(*i))
            .any(|i| self.form[i.rem_euclid(L) as usize].is_none());
        if untagged { nd::Array1::ones(self.ss[k].len()) }
        else { self.ss[k].clone() }
    }

    /// Check the internal consistency of the state.
    ///
    /// Verifies the lengths of all per-site and per-bond data, that the bond
    /// dimensions of neighboring tensors, Schmidt values and bond charges
    /// agree, that physical dimensions match the sites, that Schmidt values
    /// are non-negative and finite, and that no tensor entry violates its
    /// charge rule. Fails with [`MPSError::InvalidState`][crate::error::MPSError::InvalidState]
    /// naming the offending site or bond.
    pub fn test_sanity(&self) -> MPSResult<()> {
        let L = self.L();
        let nbonds = if self.finite() { L + 1 } else { L };
        if self.bs.len() != L || self.form.len() != L || self.qtotal.len() != L
            || self.revs.len() != L
        {
            return invalid_state(Location::Chain, "per-site data lengths differ");
        }
        if self.ss.len() != nbonds || self.legs.len() != nbonds {
            return invalid_state(
                Location::Chain,
                format!(
                    "expected {nbonds} bonds, found {} Schmidt vectors and {} \
                    bond legs",
                    self.ss.len(), self.legs.len(),
                ),
            );
        }
        if !self.norm.is_finite() {
            return invalid_state(Location::Chain, "norm is not finite");
        }
        for b in 0..nbonds {
            let s = &self.ss[b];
            if s.len() != self.legs[b].dim() {
                return invalid_state(
                    Location::Bond(b),
                    format!(
                        "{} Schmidt values but {} bond charges",
                        s.len(), self.legs[b].dim(),
                    ),
                );
            }
            if s.iter().any(|x| !x.is_finite() || *x < 0.0) {
                return invalid_state(
                    Location::Bond(b), "Schmidt values must be non-negative");
            }
            if self.legs[b].qnumber() != self.chinfo.qnumber() {
                return invalid_state(Location::Bond(b), "wrong number of charges");
            }
        }
        if self.bc == BC::Finite && (self.ss[0].len() != 1 || self.ss[L].len() != 1) {
            return invalid_state(
                Location::Chain, "outer bonds of a finite chain must be trivial");
        }
        for i in 0..L {
            let (chil, d, chir) = self.bs[i].dim();
            let bl = i;
            let br = self.bond(i as i64 + 1);
            if chil != self.ss[bl].len() || chir != self.ss[br].len() {
                return invalid_state(
                    Location::Site(i),
                    format!(
                        "tensor has bond dimensions ({chil}, {chir}), bonds \
                        {bl} and {br} have ({}, {})",
                        self.ss[bl].len(), self.ss[br].len(),
                    ),
                );
            }
            if d != self.sites[i].dim() {
                return invalid_state(
                    Location::Site(i),
                    format!(
                        "physical dimension {d}, site has dimension {}",
                        self.sites[i].dim(),
                    ),
                );
            }
            if self.chinfo.is_trivial() { continue; }
            let ql = &self.legs[bl];
            let qr = &self.legs[br];
            let qp = self.sites[i].leg();
            let scale = frob_norm(&self.bs[i]).max(1.0);
            for ((a, s, c), x) in self.bs[i].indexed_iter() {
                if x.norm() <= 1e-12 * scale { continue; }
                let q = self.chinfo.sub(&self.chinfo.add(&ql.get(a), &qp.get(s)), &qr.get(c));
                if !self.chinfo.equal(&q, &self.qtotal[i]) {
                    return invalid_state(
                        Location::Site(i),
                        format!(
                            "entry {:?} has charge {q:?}, tensor total is {:?}",
                            (a, s, c), self.qtotal[i],
                        ),
                    );
                }
            }
        }
        Ok(())
    }
}

// Schmidt values raised to a (possibly negative) power, with vanishing values
// mapped to zero
pub(crate) fn s_power(s: &nd::Array1<f64>, p: f64) -> nd::Array1<f64> {
    s.mapv(|x| {
        if p >= 0.0 { x.powf(p) }
        else if x > S_CUTOFF { x.powf(p) }
        else { 0.0 }
    })
}

// contract the right bond of `l` with the left bond of `r`
//
// for axis signatures
//      l :: { v, sl, u }
//      r :: { u, sr, w }
// the result has axis signature
//      q :: { v, sl<>sr, w }
// (where `<>` denotes fusion)
pub(crate) fn contract_right(l: &nd::Array3<C64>, r: &nd::Array3<C64>)
    -> MPSResult<nd::Array3<C64>>
{
    let (v, sl, u) = l.dim();
    let (_, sr, w) = r.dim();
    let lm = c_order(l.clone()).into_shape((v * sl, u))?;
    let rm = c_order(r.clone()).into_shape((u, sr * w))?;
    Ok(lm.dot(&rm).into_shape((v, sl * sr, w))?)
}

impl fmt::Debug for MPS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MPS")
            .field("L", &self.L())
            .field("bc", &self.bc)
            .field("chi", &self.chi())
            .field("form", &self.form)
            .field("norm", &self.norm)
            .field("grouped", &self.grouped)
            .finish()
    }
}

impl fmt::Display for MPS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MPS {{ L = {}, bc = {:?}, norm = {} }}", self.L(), self.bc, self.norm)?;
        for (i, b) in self.bs.iter().enumerate() {
            let form = self.form[i]
                .map(|fm| format!("{fm:?}"))
                .unwrap_or_else(|| "None".to_string());
            writeln!(
                f, "  S[{i}]: chi = {}\n  B[{i}]: shape = {:?}, form = {form}",
                self.ss[i].len(), b.dim(),
            )?;
        }
        if self.finite() {
            write!(f, "  S[{}]: chi = {}", self.L(), self.ss[self.L()].len())?;
        }
        Ok(())
    }
}

// tensors used when contracting a state's wavefunction end to end: `Th` on the
// first site, `B` on the others (or the stored tensors if untagged)
pub(crate) fn state_tensors(psi: &MPS, ignore_form: bool)
    -> MPSResult<Vec<nd::Array3<C64>>>
{
    (0..psi.L())
        .map(|i| {
            if ignore_form { Ok(psi.bs[i].clone()) }
            else if i == 0 { psi.get_B(0, Some(Form::Th)) }
            else { psi.get_B(i, Some(Form::B)) }
        })
        .collect()
}

pub(crate) fn zero_tensor(chil: usize, d: usize, chir: usize) -> nd::Array3<C64> {
    nd::Array3::from_elem((chil, d, chir), C64::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::Conserve;

    #[test]
    fn bit_manipulation() {
        // 0b101 with a 1 inserted at position 1 -> 0b1101
        assert_eq!(insert_bit(0b101, 3, 1, 1), 0b1101);
        assert_eq!(insert_bit(0b101, 3, 3, 0), 0b1010);
        assert_eq!(remove_bit(0b1101, 4, 1), 0b101);
        assert_eq!(bit(0b100, 3, 0), 1);
    }

    #[test]
    fn product_state_charges() {
        let s = Site::spin_half(Conserve::Sz);
        let psi = MPS::from_product_state(
            vec![s; 4], &["up", "up", "down", "up"], BC::Finite).unwrap();
        psi.test_sanity().unwrap();
        assert_eq!(psi.chi(), vec![1; 5]);
        assert_eq!(psi.leg(4).get(0), vec![2]);
        assert_eq!(psi.bond_form(2), BondForm::Right);
    }

    #[test]
    fn invalid_construction() {
        let s = Site::spin_half(Conserve::Sz);
        assert!(MPS::from_product_state(vec![s.clone(); 2], &["up"], BC::Finite).is_err());
        assert!(MPS::from_product_state(vec![s.clone(); 1], &["left"], BC::Finite).is_err());
        let mixed: nd::Array1<C64> = nd::array![C64::one(), C64::one()];
        assert!(matches!(
            MPS::from_product_state(vec![s.clone()], &[mixed], BC::Finite),
            Err(crate::error::MPSError::ChargeMismatch { site: 0, .. }),
        ));
        assert!(MPS::from_singlets(&s, 4, &[(0, 1)], &[2], "up", "down", "up", BC::Finite).is_err());
        assert!(MPS::from_singlets(&s, 4, &[(0, 1), (1, 2)], &[3], "up", "down", "up", BC::Finite).is_err());
    }

    #[test]
    fn sanity_detects_corruption() {
        let s = Site::spin_half(Conserve::Sz);
        let mut psi = MPS::from_singlets(
            &s, 4, &[(0, 3), (1, 2)], &[], "up", "down", "up", BC::Finite).unwrap();
        psi.test_sanity().unwrap();
        psi.bs[1] = zero_tensor(2, 2, 2);
        assert!(psi.test_sanity().is_err());
        let mut psi = MPS::from_singlets(
            &s, 4, &[(0, 3), (1, 2)], &[], "up", "down", "up", BC::Finite).unwrap();
        psi.bs[2][[0, 0, 0]] = C64::one();
        assert!(matches!(
            psi.test_sanity(),
            Err(crate::error::MPSError::InvalidState { location: Location::Site(2), .. }),
        ));
    }
}

//! Local Hilbert spaces and their operators.
//!
//! A [`Site`] holds the basis of one physical leg: its dimension and state
//! labels, a table of named operators, the charge of each basis state, and the
//! Jordan-Wigner bookkeeping for fermionic operators.

use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::{ One, Zero };
use once_cell::sync::Lazy;
use rustc_hash::{ FxHashMap, FxHashSet };
use crate::{
    ComplexFloatExt,
    charges::{ ChargeInfo, LegCharge },
    error::{ MPSResult, config_err },
};

/// Entries with smaller magnitude are treated as exact zeros when reading off
/// operator charges.
pub(crate) const OP_ZERO: f64 = 1e-14;

/// Pauli X for a [`Complex64`][C64] element type.
pub static SIGMAX: Lazy<nd::Array2<C64>> = Lazy::new(|| {
    nd::array![
        [C64::zero(), C64::one() ],
        [C64::one(),  C64::zero()],
    ]
});

/// Pauli Y for a [`Complex64`][C64] element type.
pub static SIGMAY: Lazy<nd::Array2<C64>> = Lazy::new(|| {
    nd::array![
        [C64::zero(), -C64::i()   ],
        [C64::i(),     C64::zero()],
    ]
});

/// Pauli Z for a [`Complex64`][C64] element type.
pub static SIGMAZ: Lazy<nd::Array2<C64>> = Lazy::new(|| {
    nd::array![
        [C64::one(),   C64::zero()],
        [C64::zero(), -C64::one() ],
    ]
});

/// Kronecker product `a ⊗ b`, with the index of `a` as the slower one.
pub fn kron(a: &nd::Array2<C64>, b: &nd::Array2<C64>) -> nd::Array2<C64> {
    let (ma, na) = a.dim();
    let (mb, nb) = b.dim();
    nd::Array2::from_shape_fn(
        (ma * mb, na * nb),
        |(i, j)| a[[i / mb, j / nb]] * b[[i % mb, j % nb]],
    )
}

fn diag(d: &[f64]) -> nd::Array2<C64> {
    let mut m = nd::Array2::zeros((d.len(), d.len()));
    m.diag_mut().iter_mut().zip(d)
        .for_each(|(mk, dk)| { *mk = C64::from_re(*dk); });
    m
}

/// Which charge a spin-1/2 site conserves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Conserve {
    /// Twice the z-component of the spin, as a U(1) charge.
    Sz,
    /// Parity of the number of up spins, as a Z<sub>2</sub> charge.
    Parity,
    /// Nothing.
    None,
}

/// A local physical Hilbert space.
#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    pub(crate) dim: usize,
    pub(crate) state_labels: Vec<String>,
    pub(crate) ops: FxHashMap<String, nd::Array2<C64>>,
    pub(crate) need_jw: FxHashSet<String>,
    pub(crate) chinfo: ChargeInfo,
    // charges of the basis states
    pub(crate) leg: LegCharge,
    // constituents, if this is a grouped site
    pub(crate) parts: Vec<Site>,
}

impl Site {
    /// Create a new site with the given charges of its basis states and
    /// optional state labels. The operators `Id` and `JW` (both the identity)
    /// are always defined.
    ///
    /// Fails if the number of labels doesn't match the dimension of `leg`, if
    /// `leg` doesn't hold as many charges as `chinfo`, or if the dimension is
    /// zero.
    pub fn new<S>(chinfo: ChargeInfo, leg: LegCharge, state_labels: &[S])
        -> MPSResult<Self>
    where S: AsRef<str>
    {
        let dim = leg.dim();
        if dim == 0 { return config_err("unphysical zero-dimensional site"); }
        if leg.qnumber() != chinfo.qnumber() {
            return config_err(format!(
                "site charges hold {} entries, but {} charges are conserved",
                leg.qnumber(), chinfo.qnumber(),
            ));
        }
        if !state_labels.is_empty() && state_labels.len() != dim {
            return config_err(format!(
                "{} state labels for a site of dimension {dim}",
                state_labels.len(),
            ));
        }
        let state_labels: Vec<String>
            = state_labels.iter().map(|s| s.as_ref().to_string()).collect();
        let mut ops: FxHashMap<String, nd::Array2<C64>> = FxHashMap::default();
        ops.insert("Id".to_string(), nd::Array2::eye(dim));
        ops.insert("JW".to_string(), nd::Array2::eye(dim));
        Ok(Self {
            dim,
            state_labels,
            ops,
            need_jw: FxHashSet::default(),
            chinfo,
            leg,
            parts: Vec::new(),
        })
    }

    /// Add (or replace) a named operator.
    ///
    /// Names may not contain whitespace, since whitespace-separated names are
    /// read as operator products by [`Self::get_op`]. Fails if `op` is not a
    /// square matrix of the site dimension or if it has no definite charge.
    pub fn add_op(&mut self, name: &str, op: nd::Array2<C64>, need_jw: bool)
        -> MPSResult<()>
    {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return config_err(format!("invalid operator name {name:?}"));
        }
        if op.dim() != (self.dim, self.dim) {
            return config_err(format!(
                "operator {name} has shape {:?}, expected {:?}",
                op.dim(), (self.dim, self.dim),
            ));
        }
        if self.op_charge(&op).is_none() {
            return config_err(format!("operator {name} has no definite charge"));
        }
        if need_jw {
            self.need_jw.insert(name.to_string());
        } else {
            self.need_jw.remove(name);
        }
        self.ops.insert(name.to_string(), op);
        Ok(())
    }

    /// Local dimension.
    pub fn dim(&self) -> usize { self.dim }

    /// The conserved charges.
    pub fn chinfo(&self) -> &ChargeInfo { &self.chinfo }

    /// Charges of the basis states.
    pub fn leg(&self) -> &LegCharge { &self.leg }

    /// Labels of the basis states.
    pub fn state_labels(&self) -> &[String] { &self.state_labels }

    /// Constituent sites, if this site was built by [`Self::group`].
    pub fn parts(&self) -> &[Site] { &self.parts }

    /// Index of the basis state with the given label.
    pub fn state_index(&self, label: &str) -> Option<usize> {
        self.state_labels.iter().position(|l| l == label)
    }

    /// Return `true` if `name` (a single name, without products) is defined.
    pub fn has_op(&self, name: &str) -> bool { self.ops.contains_key(name) }

    /// Names of all defined operators, sorted.
    pub fn op_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Return the matrix of a named operator.
    ///
    /// Whitespace-separated names denote products, `"A B"` being the matrix
    /// product `A·B` (i.e. `B` acts first). Fails if any name is unknown.
    pub fn get_op(&self, name: &str) -> MPSResult<nd::Array2<C64>> {
        let mut acc: Option<nd::Array2<C64>> = None;
        for part in name.split_whitespace() {
            let Some(op) = self.ops.get(part) else {
                return config_err(format!("unknown operator {part:?}"));
            };
            acc = Some(match acc {
                None => op.clone(),
                Some(a) => a.dot(op),
            });
        }
        match acc {
            Some(op) => Ok(op),
            None => config_err("empty operator name"),
        }
    }

    /// Return `true` if the (possibly composite) operator has odd fermionic
    /// parity, i.e. needs a Jordan-Wigner string.
    pub fn op_needs_jw(&self, name: &str) -> bool {
        name.split_whitespace()
            .filter(|part| self.need_jw.contains(*part))
            .count() % 2 == 1
    }

    /// Return `true` if the `s`-th basis state has odd fermionic parity.
    pub fn state_parity(&self, s: usize) -> bool {
        self.ops.get("JW")
            .map(|jw| jw[[s, s]].re < 0.0)
            .unwrap_or(false)
    }

    /// Return the charge carried by an operator, or `None` if it mixes
    /// different charges.
    ///
    /// The zero operator is neutral.
    pub fn op_charge(&self, op: &nd::Array2<C64>) -> Option<Vec<i64>> {
        op_charge(&self.chinfo, &self.leg, &self.leg, op)
    }

    /// Combine several sites into one, with the basis of the first site
    /// varying slowest.
    ///
    /// Every operator `name` of the `k`-th constituent is available as
    /// `"{name}{k}"`; for fermionic operators, Jordan-Wigner strings on the
    /// constituents to the left are included. Fails if the constituents don't
    /// conserve the same charges.
    pub fn group(sites: &[Site]) -> MPSResult<Self> {
        let Some(first) = sites.first() else {
            return config_err("cannot group an empty list of sites");
        };
        if sites.iter().any(|s| s.chinfo != first.chinfo) {
            return config_err("cannot group sites with different charges");
        }
        let chinfo = first.chinfo.clone();
        let legs: Vec<(&LegCharge, i64)>
            = sites.iter().map(|s| (&s.leg, 1)).collect();
        let leg = LegCharge::combine(&chinfo, &legs);
        let labels: Vec<String>
            = if sites.iter().all(|s| !s.state_labels.is_empty()) {
                sites.iter()
                    .fold(vec![String::new()], |acc, s| {
                        acc.iter()
                            .flat_map(|a| {
                                s.state_labels.iter()
                                    .map(move |l| {
                                        if a.is_empty() { l.clone() }
                                        else { format!("{a}_{l}") }
                                    })
                            })
                            .collect()
                    })
            } else {
                Vec::new()
            };
        let mut grouped = Self::new(chinfo, leg, &labels)?;
        let ids: Vec<nd::Array2<C64>>
            = sites.iter().map(|s| nd::Array2::eye(s.dim)).collect();
        let jws: Vec<nd::Array2<C64>>
            = sites.iter()
            .map(|s| s.get_op("JW"))
            .collect::<MPSResult<_>>()?;
        for (k, site) in sites.iter().enumerate() {
            for (name, op) in site.ops.iter() {
                let fermionic = site.need_jw.contains(name);
                let full
                    = (0..sites.len())
                    .map(|j| {
                        if j == k { op }
                        else if j < k && fermionic { &jws[j] }
                        else { &ids[j] }
                    })
                    .fold(nd::Array2::eye(1), |acc, m| kron(&acc, m));
                grouped.ops.insert(format!("{name}{k}"), full);
                if fermionic { grouped.need_jw.insert(format!("{name}{k}")); }
            }
        }
        let jw = jws.iter().fold(nd::Array2::eye(1), |acc, m| kron(&acc, m));
        grouped.ops.insert("JW".to_string(), jw);
        grouped.parts = sites.to_vec();
        Ok(grouped)
    }

    /// A spin-1/2 site with states `up, down`.
    ///
    /// Operators: `Id, JW, Sz, Sp, Sm, Sigmaz` always, plus
    /// `Sx, Sy, Sigmax, Sigmay` unless `Sz` is conserved.
    pub fn spin_half(conserve: Conserve) -> Self {
        let (chinfo, leg) = match conserve {
            Conserve::Sz => (
                ChargeInfo::new([(1, "2*Sz")]),
                LegCharge::from_rows(&[vec![1], vec![-1]], 1),
            ),
            Conserve::Parity => (
                ChargeInfo::new([(2, "parity_Sz")]),
                LegCharge::from_rows(&[vec![1], vec![0]], 1),
            ),
            Conserve::None => (ChargeInfo::trivial(), LegCharge::trivial(2, 0)),
        };
        let half = C64::from_re(0.5);
        let sp: nd::Array2<C64>
            = nd::array![
                [C64::zero(), C64::one() ],
                [C64::zero(), C64::zero()],
            ];
        let sm = sp.t().to_owned();
        let mut ops: Vec<(&str, nd::Array2<C64>)> = vec![
            ("Sz", SIGMAZ.mapv(|x| x * half)),
            ("Sp", sp),
            ("Sm", sm),
            ("Sigmaz", SIGMAZ.clone()),
        ];
        if conserve != Conserve::Sz {
            ops.push(("Sx", SIGMAX.mapv(|x| x * half)));
            ops.push(("Sy", SIGMAY.mapv(|x| x * half)));
            ops.push(("Sigmax", SIGMAX.clone()));
            ops.push(("Sigmay", SIGMAY.clone()));
        }
        let mut site = Self {
            dim: 2,
            state_labels: vec!["up".to_string(), "down".to_string()],
            ops: FxHashMap::default(),
            need_jw: FxHashSet::default(),
            chinfo,
            leg,
            parts: Vec::new(),
        };
        site.ops.insert("Id".to_string(), nd::Array2::eye(2));
        site.ops.insert("JW".to_string(), nd::Array2::eye(2));
        for (name, op) in ops.into_iter() {
            site.ops.insert(name.to_string(), op);
        }
        site
    }

    /// A site for spin-1/2 fermions with states `empty, up, down, full`,
    /// optionally conserving the particle number `N` and/or `2*Sz`.
    ///
    /// Operators: `Id, JW, JWu, JWd, Cu, Cdu, Cd, Cdd, Nu, Nd, NuNd, Ntot, Sz,
    /// Sp, Sm`. The spin-down operators `Cd, Cdd` include the on-site string
    /// `JWu`, so that `Cdu·Cd == -Cd·Cdu` holds as for operators on
    /// different sites.
    pub fn spin_half_fermion(cons_n: bool, cons_sz: bool) -> Self {
        let mut charges: Vec<(i64, &str)> = Vec::new();
        let mut rows: Vec<Vec<i64>> = vec![Vec::new(); 4];
        if cons_n {
            charges.push((1, "N"));
            [0, 1, 1, 2].iter().zip(rows.iter_mut())
                .for_each(|(q, r)| { r.push(*q); });
        }
        if cons_sz {
            charges.push((1, "2*Sz"));
            [0, 1, -1, 0].iter().zip(rows.iter_mut())
                .for_each(|(q, r)| { r.push(*q); });
        }
        let chinfo = ChargeInfo::new(charges);
        let leg = LegCharge::from_rows(&rows, chinfo.qnumber());
        let jwu = diag(&[1.0, -1.0, 1.0, -1.0]);
        let jwd = diag(&[1.0, 1.0, -1.0, -1.0]);
        let jw = diag(&[1.0, -1.0, -1.0, 1.0]);
        let nu = diag(&[0.0, 1.0, 0.0, 1.0]);
        let nd_ = diag(&[0.0, 0.0, 1.0, 1.0]);
        let mut cu: nd::Array2<C64> = nd::Array2::zeros((4, 4));
        cu[[0, 1]] = C64::one();
        cu[[2, 3]] = C64::one();
        let cdu = cu.t().to_owned();
        let mut cd_nojw: nd::Array2<C64> = nd::Array2::zeros((4, 4));
        cd_nojw[[0, 2]] = C64::one();
        cd_nojw[[1, 3]] = C64::one();
        let cd = jwu.dot(&cd_nojw);
        let cdd = cd.t().to_owned();
        let sz = (&nu - &nd_).mapv(|x| x * 0.5);
        let sp = cdu.dot(&cd);
        let sm = cdd.dot(&cu);
        let nund = nu.dot(&nd_);
        let ntot = &nu + &nd_;
        let mut site = Self {
            dim: 4,
            state_labels:
                ["empty", "up", "down", "full"].iter()
                .map(|s| s.to_string())
                .collect(),
            ops: FxHashMap::default(),
            need_jw: FxHashSet::default(),
            chinfo,
            leg,
            parts: Vec::new(),
        };
        let ops: Vec<(&str, nd::Array2<C64>, bool)> = vec![
            ("Id", nd::Array2::eye(4), false),
            ("JW", jw, false),
            ("JWu", jwu, false),
            ("JWd", jwd, false),
            ("Cu", cu, true),
            ("Cdu", cdu, true),
            ("Cd", cd, true),
            ("Cdd", cdd, true),
            ("Nu", nu, false),
            ("Nd", nd_, false),
            ("NuNd", nund, false),
            ("Ntot", ntot, false),
            ("Sz", sz, false),
            ("Sp", sp, false),
            ("Sm", sm, false),
        ];
        for (name, op, need_jw) in ops.into_iter() {
            if need_jw { site.need_jw.insert(name.to_string()); }
            site.ops.insert(name.to_string(), op);
        }
        site
    }
}

// charge of an operator mapping states with charges `leg_in` to states with
// charges `leg_out`, or `None` if the operator doesn't have a definite charge
pub(crate) fn op_charge(
    chinfo: &ChargeInfo,
    leg_out: &LegCharge,
    leg_in: &LegCharge,
    op: &nd::Array2<C64>,
) -> Option<Vec<i64>>
{
    let mut charge: Option<Vec<i64>> = None;
    for ((i, j), x) in op.indexed_iter() {
        if x.norm() <= OP_ZERO { continue; }
        let q = chinfo.sub(&leg_out.get(i), &leg_in.get(j));
        match &charge {
            None => { charge = Some(q); },
            Some(q0) if chinfo.equal(q0, &q) => { },
            Some(_) => { return None; },
        }
    }
    Some(charge.unwrap_or_else(|| chinfo.zero()))
}

/// A physical operator passed to MPS methods: either the name of a site
/// operator, or an explicit matrix acting on `n` consecutive sites.
///
/// Multi-site matrices act on the fused physical index of the `n` sites, with
/// the leftmost site varying slowest (see [`kron`]).
#[derive(Clone, Debug, PartialEq)]
pub enum Operator {
    /// A named operator of the site it acts on.
    Named(String),
    /// A matrix acting on `n` consecutive sites.
    Matrix { n: usize, mat: nd::Array2<C64> },
}

impl From<&str> for Operator {
    fn from(name: &str) -> Self { Self::Named(name.to_string()) }
}

impl From<String> for Operator {
    fn from(name: String) -> Self { Self::Named(name) }
}

impl From<nd::Array2<C64>> for Operator {
    fn from(mat: nd::Array2<C64>) -> Self { Self::Matrix { n: 1, mat } }
}

impl From<&Operator> for Operator {
    fn from(op: &Operator) -> Self { op.clone() }
}

impl Operator {
    /// An operator acting on `n` consecutive sites.
    pub fn multi(n: usize, mat: nd::Array2<C64>) -> Self {
        Self::Matrix { n, mat }
    }

    /// The product operator `ops[0] ⊗ ops[1] ⊗ ...` acting on `ops.len()`
    /// consecutive sites.
    pub fn outer(ops: &[nd::Array2<C64>]) -> Self {
        let mat = ops.iter().fold(nd::Array2::eye(1), |acc, m| kron(&acc, m));
        Self::Matrix { n: ops.len(), mat }
    }

    /// Number of sites the operator acts on.
    pub fn n_sites(&self) -> usize {
        match self {
            Self::Named(_) => 1,
            Self::Matrix { n, .. } => *n,
        }
    }

    /// Return `true` if the operator has odd fermionic parity on `site`.
    /// Explicit matrices are taken to be bosonic.
    pub fn needs_jw(&self, site: &Site) -> bool {
        match self {
            Self::Named(name) => site.op_needs_jw(name),
            Self::Matrix { .. } => false,
        }
    }

    /// Return the matrix of the operator acting on `sites`, checking that it
    /// matches their dimensions.
    pub fn resolve(&self, sites: &[&Site]) -> MPSResult<nd::Array2<C64>> {
        if sites.len() != self.n_sites() {
            return config_err(format!(
                "operator acts on {} sites, got {}", self.n_sites(), sites.len(),
            ));
        }
        match self {
            Self::Named(name) => sites[0].get_op(name),
            Self::Matrix { mat, .. } => {
                let d: usize = sites.iter().map(|s| s.dim).product();
                if mat.dim() != (d, d) {
                    return config_err(format!(
                        "operator has shape {:?}, but sites have total \
                        dimension {d}",
                        mat.dim(),
                    ));
                }
                Ok(mat.clone())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn max_abs(a: &nd::Array2<C64>) -> f64 {
        a.iter().map(|x| x.norm()).fold(0.0, f64::max)
    }

    #[test]
    fn spin_half_charges() {
        let s = Site::spin_half(Conserve::Sz);
        assert_eq!(s.state_index("down"), Some(1));
        assert_eq!(s.op_charge(&s.get_op("Sp").unwrap()), Some(vec![2]));
        assert_eq!(s.op_charge(&s.get_op("Sz").unwrap()), Some(vec![0]));
        assert!(!s.has_op("Sigmax"));
        let p = Site::spin_half(Conserve::Parity);
        assert_eq!(p.op_charge(&p.get_op("Sigmax").unwrap()), Some(vec![1]));
    }

    #[test]
    fn fermion_anticommutation() {
        let f = Site::spin_half_fermion(true, true);
        let cd = f.get_op("Cd").unwrap();
        let cdu = f.get_op("Cdu").unwrap();
        let acomm = cdu.dot(&cd) + cd.dot(&cdu);
        assert_abs_diff_eq!(max_abs(&acomm), 0.0, epsilon = 1e-15);
        let n = f.get_op("Cdu Cu").unwrap();
        assert_abs_diff_eq!(max_abs(&(n - f.get_op("Nu").unwrap())), 0.0);
        assert!(f.op_needs_jw("Cu"));
        assert!(!f.op_needs_jw("Cdu Cu"));
        assert!(f.state_parity(1) && !f.state_parity(3));
        assert!(f.get_op("Foo").is_err());
    }

    #[test]
    fn grouped_site() {
        let f = Site::spin_half_fermion(true, false);
        let g = Site::group(&[f.clone(), f.clone()]).unwrap();
        assert_eq!(g.dim(), 16);
        assert_eq!(g.state_labels()[5], "up_up");
        let c0 = g.get_op("Cu0").unwrap();
        let c1 = g.get_op("Cu1").unwrap();
        let acomm = c0.dot(&c1) + c1.dot(&c0);
        assert_abs_diff_eq!(max_abs(&acomm), 0.0, epsilon = 1e-15);
        assert!(g.op_needs_jw("Cdu1"));
        assert_eq!(g.op_charge(&g.get_op("Cdu1").unwrap()), Some(vec![1]));
    }
}

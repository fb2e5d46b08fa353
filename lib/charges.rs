//! Abelian charges attached to tensor legs.
//!
//! Tensors themselves are stored densely. Each leg carries one charge vector
//! per index, and each site tensor carries a total charge `qtotal`, with the
//! rule that an entry `B[a, s, b]` may only be non-zero if
//! ```text
//! q_vL[a] + q_p[s] - q_vR[b] == qtotal    (mod)
//! ```
//! Decompositions use [`LegCharge::blocks`] to work sector by sector, which is
//! what keeps the charges of newly created bonds exact.

use std::collections::BTreeMap;
use ndarray as nd;

/// The conserved abelian charges: one modulus per charge, where a modulus of
/// 1 stands for U(1) and `n > 1` for Z<sub>n</sub>.
///
/// The trivial `ChargeInfo` (no charges) disables charge conservation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChargeInfo {
    pub(crate) mods: Vec<i64>,
    pub(crate) names: Vec<String>,
}

impl ChargeInfo {
    /// No conserved charges.
    pub fn trivial() -> Self { Self::default() }

    /// Create from `(modulus, name)` pairs.
    ///
    /// *Panics if any modulus is less than 1.*
    pub fn new<I, S>(charges: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        let (mods, names): (Vec<i64>, Vec<String>)
            = charges.into_iter()
            .map(|(m, name)| (m, name.into()))
            .unzip();
        if mods.iter().any(|m| *m < 1) { panic!("charge moduli must be ≥ 1"); }
        Self { mods, names }
    }

    /// Number of conserved charges.
    pub fn qnumber(&self) -> usize { self.mods.len() }

    /// The modulus of each charge.
    pub fn mods(&self) -> &[i64] { &self.mods }

    /// The name of each charge.
    pub fn names(&self) -> &[String] { &self.names }

    /// Return `true` if no charges are conserved.
    pub fn is_trivial(&self) -> bool { self.mods.is_empty() }

    /// The zero charge.
    pub fn zero(&self) -> Vec<i64> { vec![0; self.qnumber()] }

    /// Bring a charge into its canonical representative.
    pub fn make_valid(&self, mut q: Vec<i64>) -> Vec<i64> {
        q.iter_mut().zip(&self.mods)
            .for_each(|(qk, m)| { if *m > 1 { *qk = qk.rem_euclid(*m); } });
        q
    }

    /// `a + b`.
    pub fn add(&self, a: &[i64], b: &[i64]) -> Vec<i64> {
        self.make_valid(a.iter().zip(b).map(|(ak, bk)| ak + bk).collect())
    }

    /// `a - b`.
    pub fn sub(&self, a: &[i64], b: &[i64]) -> Vec<i64> {
        self.make_valid(a.iter().zip(b).map(|(ak, bk)| ak - bk).collect())
    }

    /// Return `true` if `a` and `b` agree modulo the charge moduli.
    pub fn equal(&self, a: &[i64], b: &[i64]) -> bool {
        self.sub(a, b).iter().all(|d| *d == 0)
    }
}

/// Charges of the indices of one tensor leg.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegCharge {
    // axis signature [ index, charge ]
    pub(crate) charges: nd::Array2<i64>,
}

impl LegCharge {
    /// A leg of dimension `dim` with all charges zero.
    pub fn trivial(dim: usize, qnumber: usize) -> Self {
        Self { charges: nd::Array2::zeros((dim, qnumber)) }
    }

    /// Create from one charge vector per index.
    ///
    /// *Panics if any charge vector does not have length `qnumber`.*
    pub fn from_rows(rows: &[Vec<i64>], qnumber: usize) -> Self {
        let mut charges = nd::Array2::zeros((rows.len(), qnumber));
        charges.outer_iter_mut().zip(rows)
            .for_each(|(mut c, q)| {
                if q.len() != qnumber { panic!("inconsistent charge length"); }
                c.iter_mut().zip(q).for_each(|(ck, qk)| { *ck = *qk; });
            });
        Self { charges }
    }

    /// Leg dimension.
    pub fn dim(&self) -> usize { self.charges.nrows() }

    /// Number of charges per index.
    pub fn qnumber(&self) -> usize { self.charges.ncols() }

    /// The charge of the `i`-th index.
    ///
    /// *Panics if `i` is out of bounds.*
    pub fn get(&self, i: usize) -> Vec<i64> { self.charges.row(i).to_vec() }

    /// Return the charges as a `[index, charge]` array.
    pub fn as_array(&self) -> &nd::Array2<i64> { &self.charges }

    /// Add `q` to every charge.
    pub fn shifted(&self, chinfo: &ChargeInfo, q: &[i64]) -> Self {
        let rows: Vec<Vec<i64>>
            = (0..self.dim()).map(|i| chinfo.add(&self.get(i), q)).collect();
        Self::from_rows(&rows, self.qnumber())
    }

    /// Negate every charge.
    pub fn negated(&self, chinfo: &ChargeInfo) -> Self {
        let zero = chinfo.zero();
        let rows: Vec<Vec<i64>>
            = (0..self.dim()).map(|i| chinfo.sub(&zero, &self.get(i))).collect();
        Self::from_rows(&rows, self.qnumber())
    }

    /// Keep only the given indices, in the given order.
    pub fn select(&self, idx: &[usize]) -> Self {
        Self { charges: self.charges.select(nd::Axis(0), idx) }
    }

    /// Stack the indices of `other` after those of `self`.
    ///
    /// *Panics if the two legs hold different numbers of charges.*
    pub fn concat(&self, other: &Self) -> Self {
        if self.qnumber() != other.qnumber() {
            panic!("cannot concatenate legs with different charge numbers");
        }
        let d0 = self.dim();
        let charges
            = nd::Array2::from_shape_fn(
                (d0 + other.dim(), self.qnumber()),
                |(i, k)| {
                    if i < d0 { self.charges[[i, k]] }
                    else { other.charges[[i - d0, k]] }
                },
            );
        Self { charges }
    }

    /// Charges of the fused leg obtained by combining `legs` in row-major
    /// order, where each leg enters with the given sign (`+1` or `-1`).
    pub fn combine(chinfo: &ChargeInfo, legs: &[(&LegCharge, i64)]) -> Self {
        let qnumber = chinfo.qnumber();
        let mut rows: Vec<Vec<i64>> = vec![chinfo.zero()];
        for (leg, sign) in legs.iter() {
            rows = rows.iter()
                .flat_map(|q| {
                    (0..leg.dim()).map(move |k| {
                        let qk: Vec<i64>
                            = q.iter().zip(leg.charges.row(k))
                            .map(|(a, b)| a + sign * b)
                            .collect();
                        chinfo.make_valid(qk)
                    })
                })
                .collect();
        }
        Self::from_rows(&rows, qnumber)
    }

    /// Group indices by (canonical) charge, ordered by charge.
    pub fn blocks(&self, chinfo: &ChargeInfo) -> Vec<(Vec<i64>, Vec<usize>)> {
        let mut blocks: BTreeMap<Vec<i64>, Vec<usize>> = BTreeMap::new();
        for i in 0..self.dim() {
            blocks.entry(chinfo.make_valid(self.get(i))).or_default().push(i);
        }
        blocks.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_block() {
        let chinfo = ChargeInfo::new([(1, "2*Sz")]);
        let p = LegCharge::from_rows(&[vec![1], vec![-1]], 1);
        let pp = LegCharge::combine(&chinfo, &[(&p, 1), (&p, -1)]);
        assert_eq!(pp.dim(), 4);
        assert_eq!(pp.get(1), vec![2]);
        assert_eq!(pp.get(2), vec![-2]);
        let blocks = pp.blocks(&chinfo);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1], (vec![0], vec![0, 3]));
    }

    #[test]
    fn parity_wraps() {
        let chinfo = ChargeInfo::new([(2, "parity")]);
        assert_eq!(chinfo.add(&[1], &[1]), vec![0]);
        assert!(chinfo.equal(&[3], &[-1]));
        let leg = LegCharge::from_rows(&[vec![1], vec![0]], 1);
        assert_eq!(leg.shifted(&chinfo, &[1]).get(0), vec![0]);
    }
}

//! Transfer matrix of one unit cell of two infinite MPS.
//!
//! Acting on right boundaries (the default), the transfer matrix maps a
//! matrix `X :: { vL{L} (ket), vL*{L} (bra) }` on the bond right of the unit
//! cell to
//! ```text
//!   Y[a, a'] = Σ ket[0]...ket[L-1] X conj(bra[0]...bra[L-1])
//! ```
//! on the bond left of it; transposed, it maps left boundaries
//! `X :: { bra, ket }` from the left to the right end of the unit cell. Both
//! bonds are bond 0, so the map is a square matrix whose dominant eigenvalue is
//! the overlap per unit cell.
//!
//! Entries of `X` pair a ket and a bra index whose charge difference is the
//! selected charge sector; the map acts on the space of these entries only.

use ndarray as nd;
use num_complex::Complex64 as C64;
use rand::{ Rng, SeedableRng, rngs::StdRng };
use tracing::debug;
use crate::{
    env::{ contract_lp, contract_rp },
    error::{ MPSResult, config_err },
    krylov::{ ArnoldiOptions, arnoldi },
    mps::{ Form, MPS },
};

/// The transfer matrix of one unit cell, restricted to a charge sector.
#[derive(Clone, Debug)]
pub struct TransferMatrix {
    bra: Vec<nd::Array3<C64>>,
    ket: Vec<nd::Array3<C64>>,
    transpose: bool,
    // shape of the boundary matrices
    shape: (usize, usize),
    // (row, column) of every entry in the charge sector
    entries: Vec<(usize, usize)>,
}

impl TransferMatrix {
    /// Build the transfer matrix from the tensors of `bra` and `ket` in the
    /// given `form` (`None` for the stored tensors).
    ///
    /// With `charge_sector`, only entries `X[a, a']` with
    /// `q_ket(a) - q_bra(a') == charge_sector` are kept; otherwise all entries
    /// are. Fails for finite chains or mismatched states.
    pub fn new(
        bra: &MPS,
        ket: &MPS,
        form: Option<Form>,
        transpose: bool,
        charge_sector: Option<&[i64]>,
    ) -> MPSResult<Self>
    {
        if bra.finite() || ket.finite() {
            return config_err("transfer matrices need infinite chains");
        }
        if bra.L() != ket.L() {
            return config_err(format!(
                "bra and ket unit cells differ in length ({} vs. {})",
                bra.L(), ket.L(),
            ));
        }
        let L = ket.L();
        let bra_t: Vec<nd::Array3<C64>>
            = (0..L).map(|i| bra.get_B(i, form)).collect::<MPSResult<_>>()?;
        let ket_t: Vec<nd::Array3<C64>>
            = (0..L).map(|i| ket.get_B(i, form)).collect::<MPSResult<_>>()?;
        if bra_t.iter().zip(&ket_t).any(|(b, k)| b.dim().1 != k.dim().1) {
            return config_err("physical dimensions of bra and ket differ");
        }
        let chi_k = ket_t[0].dim().0;
        let chi_b = bra_t[0].dim().0;
        let chinfo = ket.chinfo();
        let qk = ket.leg(0);
        let qb = bra.leg(0);
        let allowed = |a: usize, ap: usize| -> bool {
            match charge_sector {
                None => true,
                Some(q) => chinfo.equal(&chinfo.sub(&qk.get(a), &qb.get(ap)), q),
            }
        };
        let (shape, entries)
            = if transpose {
                let entries: Vec<(usize, usize)>
                    = (0..chi_b)
                    .flat_map(|ap| (0..chi_k).map(move |a| (ap, a)))
                    .filter(|(ap, a)| allowed(*a, *ap))
                    .collect();
                ((chi_b, chi_k), entries)
            } else {
                let entries: Vec<(usize, usize)>
                    = (0..chi_k)
                    .flat_map(|a| (0..chi_b).map(move |ap| (a, ap)))
                    .filter(|(a, ap)| allowed(*a, *ap))
                    .collect();
                ((chi_k, chi_b), entries)
            };
        if entries.is_empty() {
            return config_err(format!("charge sector {charge_sector:?} is empty"));
        }
        Ok(Self { bra: bra_t, ket: ket_t, transpose, shape, entries })
    }

    /// Dimension of the space the transfer matrix acts on.
    pub fn dim(&self) -> usize { self.entries.len() }

    /// Shape of the boundary matrices.
    pub fn shape(&self) -> (usize, usize) { self.shape }

    /// Embed a vector of the charge sector as a boundary matrix.
    pub fn to_matrix(&self, v: &nd::Array1<C64>) -> nd::Array2<C64> {
        let mut x: nd::Array2<C64> = nd::Array2::zeros(self.shape);
        self.entries.iter().zip(v)
            .for_each(|(rc, vk)| { x[*rc] = *vk; });
        x
    }

    /// Project a boundary matrix onto the charge sector.
    pub fn to_vector(&self, x: &nd::Array2<C64>) -> nd::Array1<C64> {
        self.entries.iter().map(|rc| x[*rc]).collect()
    }

    /// Apply the transfer matrix to a boundary matrix.
    pub fn apply(&self, x: &nd::Array2<C64>) -> MPSResult<nd::Array2<C64>> {
        if x.dim() != self.shape {
            return config_err(format!(
                "boundary of shape {:?} for a transfer matrix on {:?}",
                x.dim(), self.shape,
            ));
        }
        let mut y = x.clone();
        if self.transpose {
            for (b, k) in self.bra.iter().zip(&self.ket) {
                y = contract_lp(&y, b, k, None);
            }
        } else {
            for (b, k) in self.bra.iter().zip(&self.ket).rev() {
                y = contract_rp(&y, b, k, None);
            }
        }
        Ok(y)
    }

    /// Apply the transfer matrix to a vector of the charge sector.
    pub fn matvec(&self, v: &nd::Array1<C64>) -> MPSResult<nd::Array1<C64>> {
        if v.len() != self.dim() {
            return config_err(format!(
                "vector of length {} for a transfer matrix of dimension {}",
                v.len(), self.dim(),
            ));
        }
        Ok(self.to_vector(&self.apply(&self.to_matrix(v))?))
    }

    /// The `k` eigenvalues of largest magnitude and their eigenvectors as
    /// boundary matrices, sorted by decreasing magnitude.
    ///
    /// Eigenvalues of a non-Hermitian transfer matrix can come in complex
    /// conjugate pairs of equal magnitude, whose relative order is arbitrary.
    pub fn eigenvectors(&self, k: usize, opts: &ArnoldiOptions)
        -> MPSResult<(Vec<C64>, Vec<nd::Array2<C64>>)>
    {
        let mut rng = StdRng::seed_from_u64(0x7f4a_7c15);
        let v0: nd::Array1<C64>
            = (0..self.dim())
            .map(|_| C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5))
            .collect();
        let opts = ArnoldiOptions { num_ev: k, ..*opts };
        let (vals, vecs) = arnoldi(|v| self.matvec(v), self.dim(), v0, &opts)?;
        debug!(
            dim = self.dim(),
            transpose = self.transpose,
            lambda = %vals.first().copied().unwrap_or_default(),
            "transfer matrix eigenvectors",
        );
        let mats = vecs.iter().map(|v| self.to_matrix(v)).collect();
        Ok((vals, mats))
    }
}

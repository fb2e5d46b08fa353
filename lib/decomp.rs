//! Charge-conserving Schmidt decompositions.
//!
//! Matrices handled here are block-diagonal once their rows and columns are
//! grouped by charge: an entry `m[i, j]` can only be non-zero if the charge of
//! row `i` equals the charge of column `j`. Every block is decomposed on its
//! own, and the new (inner) index inherits the charge of its block.

use std::collections::BTreeMap;
use ndarray as nd;
use ndarray_linalg::{ Eigh, SVD, UPLO };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{
    charges::{ ChargeInfo, LegCharge },
    error::{ MPSResult, config_err },
    truncation::{ TruncParams, TruncationError, truncate },
};

/// Data struct holding a (truncated) Schmidt decomposition
/// ```text
/// m ≈ u · diag(norm * s) · v
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Schmidt {
    /// Matrix whose columns are the kept left Schmidt vectors.
    pub u: nd::Array2<C64>,
    /// Kept Schmidt values, normalized and sorted in decreasing order.
    pub s: nd::Array1<f64>,
    /// Matrix whose rows are the kept right Schmidt vectors.
    pub v: nd::Array2<C64>,
    /// Charges of the new bond index.
    pub charges: LegCharge,
    /// Norm of the kept part of the decomposed matrix.
    pub norm: f64,
    /// Error of the truncation.
    pub err: TruncationError,
}

impl Schmidt {
    /// Schmidt rank after truncation.
    pub fn rank(&self) -> usize { self.s.len() }
}

/// A matrix that can be factorized via a charge-blocked singular value
/// decomposition.
pub trait SchmidtDecomp {
    /// Decompose `self`, whose rows and columns carry the charges `row_q` and
    /// `col_q`, and truncate according to `trunc`.
    fn local_decomp(
        &self,
        chinfo: &ChargeInfo,
        row_q: &LegCharge,
        col_q: &LegCharge,
        trunc: &TruncParams,
    ) -> MPSResult<Schmidt>;
}

// one charge sector of a blocked decomposition
struct Block {
    rows: Vec<usize>,
    cols: Vec<usize>,
    charge: Vec<i64>,
    u: nd::Array2<C64>,
    vt: nd::Array2<C64>,
}

impl SchmidtDecomp for nd::Array2<C64> {
    fn local_decomp(
        &self,
        chinfo: &ChargeInfo,
        row_q: &LegCharge,
        col_q: &LegCharge,
        trunc: &TruncParams,
    ) -> MPSResult<Schmidt>
    {
        let (m, n) = self.dim();
        let col_blocks: BTreeMap<Vec<i64>, Vec<usize>>
            = col_q.blocks(chinfo).into_iter().collect();
        let mut blocks: Vec<Block> = Vec::new();
        // (value, block, index within block)
        let mut triples: Vec<(f64, usize, usize)> = Vec::new();
        for (charge, rows) in row_q.blocks(chinfo).into_iter() {
            let Some(cols) = col_blocks.get(&charge) else { continue; };
            let sub
                = self.select(nd::Axis(0), &rows)
                .select(nd::Axis(1), cols);
            let (Some(u), s, Some(vt)) = sub.svd(true, true)? else {
                return config_err("SVD did not return singular vectors");
            };
            let b = blocks.len();
            s.iter().enumerate()
                .for_each(|(j, sj)| { triples.push((*sj, b, j)); });
            blocks.push(Block { rows, cols: cols.clone(), charge, u, vt });
        }
        if triples.is_empty() {
            // all-zero (or empty) matrix: keep a single zero value so that
            // bonds never become zero-dimensional
            let charge = chinfo.zero();
            return Ok(Schmidt {
                u: nd::Array2::zeros((m, 1)),
                s: nd::array![0.0],
                v: nd::Array2::zeros((1, n)),
                charges: LegCharge::from_rows(&[charge], chinfo.qnumber()),
                norm: 0.0,
                err: TruncationError::none(),
            });
        }
        triples.sort_by(|a, b| b.0.total_cmp(&a.0));
        let svals: nd::Array1<f64> = triples.iter().map(|t| t.0).collect();
        let (keep, _, err) = truncate(&svals, trunc);
        let norm
            = svals.iter().take(keep).map(|sk| sk * sk).sum::<f64>().sqrt();
        let mut u: nd::Array2<C64> = nd::Array2::zeros((m, keep));
        let mut v: nd::Array2<C64> = nd::Array2::zeros((keep, n));
        let mut s: nd::Array1<f64> = nd::Array1::zeros(keep);
        let mut charges: Vec<Vec<i64>> = Vec::with_capacity(keep);
        for (k, (sk, b, j)) in triples.iter().take(keep).enumerate() {
            let block = &blocks[*b];
            block.rows.iter().zip(block.u.column(*j))
                .for_each(|(r, ur)| { u[[*r, k]] = *ur; });
            block.cols.iter().zip(block.vt.row(*j))
                .for_each(|(c, vc)| { v[[k, *c]] = *vc; });
            s[k] = if norm > 0.0 { sk / norm } else { 0.0 };
            charges.push(block.charge.clone());
        }
        let charges = LegCharge::from_rows(&charges, chinfo.qnumber());
        Ok(Schmidt { u, s, v, charges, norm, err })
    }
}

/// Eigendecomposition of a Hermitian matrix whose rows and columns both carry
/// the charges `q`, keeping only eigenvalues above `cutoff` times the largest
/// one in magnitude.
///
/// Returns the eigenvalues, the eigenvectors as columns, and their charges.
pub fn block_eigh(
    mat: &nd::Array2<C64>,
    chinfo: &ChargeInfo,
    q: &LegCharge,
    cutoff: f64,
) -> MPSResult<(nd::Array1<f64>, nd::Array2<C64>, LegCharge)>
{
    let n = mat.nrows();
    let mut found: Vec<(f64, Vec<i64>, Vec<usize>, nd::Array1<C64>)> = Vec::new();
    for (charge, idx) in q.blocks(chinfo).into_iter() {
        let sub = mat.select(nd::Axis(0), &idx).select(nd::Axis(1), &idx);
        let (w, vecs) = sub.eigh(UPLO::Lower)?;
        w.iter().zip(vecs.columns())
            .for_each(|(wk, vk)| {
                found.push((*wk, charge.clone(), idx.clone(), vk.to_owned()));
            });
    }
    let wmax = found.iter().map(|f| f.0.abs()).fold(0.0, f64::max);
    found.retain(|f| f.0 > cutoff * wmax);
    found.sort_by(|a, b| b.0.total_cmp(&a.0));
    let mut vecs: nd::Array2<C64> = nd::Array2::zeros((n, found.len()));
    let mut vals: nd::Array1<f64> = nd::Array1::zeros(found.len());
    let mut charges: Vec<Vec<i64>> = Vec::with_capacity(found.len());
    for (k, (wk, charge, idx, vk)) in found.into_iter().enumerate() {
        idx.iter().zip(vk.iter())
            .for_each(|(i, x)| { vecs[[*i, k]] = *x; });
        vals[k] = wk;
        charges.push(charge);
    }
    Ok((vals, vecs, LegCharge::from_rows(&charges, chinfo.qnumber())))
}

/// Multiply each column of `m` by the corresponding entry of `s`.
pub(crate) fn scale_columns(m: &mut nd::Array2<C64>, s: &nd::Array1<f64>) {
    nd::Zip::from(m.columns_mut())
        .and(s)
        .for_each(|mut mj, sj| { mj.map_inplace(|x| { *x *= *sj; }); });
}

/// Multiply each row of `m` by the corresponding entry of `s`.
pub(crate) fn scale_rows(m: &mut nd::Array2<C64>, s: &nd::Array1<f64>) {
    nd::Zip::from(m.rows_mut())
        .and(s)
        .for_each(|mut mi, si| { mi.map_inplace(|x| { *x *= *si; }); });
}

/// Frobenius norm.
pub(crate) fn frob_norm<D>(m: &nd::Array<C64, D>) -> f64
where D: nd::Dimension
{
    m.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
}

/// Conjugate transpose.
pub(crate) fn adjoint(m: &nd::Array2<C64>) -> nd::Array2<C64> {
    m.t().mapv(|x| x.conj())
}

/// Make sure `a` is laid out in row-major order, so that `into_shape` fuses
/// and splits axes with the last one varying fastest.
pub(crate) fn c_order<D>(a: nd::Array<C64, D>) -> nd::Array<C64, D>
where D: nd::Dimension
{
    if a.is_standard_layout() { a } else { a.as_standard_layout().into_owned() }
}

/// Return `true` if every entry of `m` is (exactly) zero.
pub(crate) fn is_zero<D>(m: &nd::Array<C64, D>) -> bool
where D: nd::Dimension
{
    m.iter().all(|x| x.is_zero())
}

use approx::assert_abs_diff_eq;
use ndarray as nd;
use ndarray_linalg::Eig;
use num_complex::Complex64 as C64;
use mps_chain::prelude::*;

mod common;

fn dense(tm: &TransferMatrix) -> nd::Array2<C64> {
    let n = tm.dim();
    let mut m: nd::Array2<C64> = nd::Array2::zeros((n, n));
    for k in 0..n {
        let mut e: nd::Array1<C64> = nd::Array1::zeros(n);
        e[k] = C64::from(1.0);
        m.column_mut(k).assign(&tm.matvec(&e).unwrap());
    }
    m
}

#[test]
fn dominant_eigenpair_of_canonical_state() {
    common::init_logging();
    let psi = common::random_state(2, BC::Infinite, 2, 5);
    let zero = psi.chinfo().zero();
    let opts = ArnoldiOptions::default();

    let tm = TransferMatrix::new(&psi, &psi, Some(Form::B), false, Some(zero.as_slice()))
        .unwrap();
    let (vals, vecs) = tm.eigenvectors(1, &opts).unwrap();
    let (dense_vals, _) = dense(&tm).eig().unwrap();
    let lmax = dense_vals.iter().map(|x| x.norm()).fold(0.0, f64::max);
    assert_abs_diff_eq!(vals[0].norm(), lmax, epsilon = 1e-10);
    assert_abs_diff_eq!(vals[0].re, 1.0, epsilon = 1e-10);
    // right fixed point of B tensors is the identity
    let v = &vecs[0];
    let c = v[[0, 0]];
    for ((a, b), x) in v.indexed_iter() {
        let expected = if a == b { c } else { C64::from(0.0) };
        assert_abs_diff_eq!((x - expected).norm(), 0.0, epsilon = 1e-8);
    }

    // left fixed point is diag(S²)
    let tm_t = TransferMatrix::new(&psi, &psi, Some(Form::B), true, Some(zero.as_slice()))
        .unwrap();
    let (vals_t, vecs_t) = tm_t.eigenvectors(1, &opts).unwrap();
    assert_abs_diff_eq!(vals_t[0].re, 1.0, epsilon = 1e-10);
    let s = psi.get_SL(0);
    let w = &vecs_t[0];
    for a in 0..s.len() {
        let ratio = w[[a, a]] / w[[0, 0]];
        assert_abs_diff_eq!(ratio.re, s[a] * s[a] / (s[0] * s[0]), epsilon = 1e-8);
    }
}

#[test]
fn mixed_transfer_matrix() {
    common::init_logging();
    let psi = common::random_state(2, BC::Infinite, 1, 6);
    let phi = common::random_state(2, BC::Infinite, 1, 7);
    let tm = TransferMatrix::new(&psi, &phi, Some(Form::B), false, None).unwrap();
    assert_eq!(tm.dim(), tm.shape().0 * tm.shape().1);
    let (vals, _) = tm.eigenvectors(2, &ArnoldiOptions::default()).unwrap();
    let (dense_vals, _) = dense(&tm).eig().unwrap();
    let mut mags: Vec<f64> = dense_vals.iter().map(|x| x.norm()).collect();
    mags.sort_by(|a, b| b.total_cmp(a));
    assert_abs_diff_eq!(vals[0].norm(), mags[0], epsilon = 1e-10);
    assert_abs_diff_eq!(vals[1].norm(), mags[1], epsilon = 1e-10);
    assert!(vals[0].norm() <= 1.0 + 1e-10);
}

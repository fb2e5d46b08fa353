use approx::assert_abs_diff_eq;
use num_complex::Complex64 as C64;
use mps_chain::{ prelude::*, terms::term };

mod common;

#[test]
fn full_contraction_matches_overlap() {
    common::init_logging();
    let psi = common::random_state(6, BC::Finite, 2, 1);
    let mut phi = common::random_state(6, BC::Finite, 2, 2);
    let ov = psi.overlap(&phi, false).unwrap();
    let mut env = MPSEnvironment::new(&psi, &phi).unwrap();
    for i in 0..=6 {
        let c = env.full_contraction(i).unwrap();
        assert_abs_diff_eq!(c.re, ov.re, epsilon = 1e-10);
        assert_abs_diff_eq!(c.im, ov.im, epsilon = 1e-10);
    }
    env.test_sanity().unwrap();

    // mutating the ket through the environment invalidates the cache
    env.ket_mut().apply_local_op(3, "Sigmaz", true, false).unwrap();
    let c = env.full_contraction(2).unwrap();
    env.test_sanity().unwrap();
    drop(env);
    phi.apply_local_op(3, "Sigmaz", true, false).unwrap();
    let ov = psi.overlap(&phi, false).unwrap();
    assert_abs_diff_eq!(c.re, ov.re, epsilon = 1e-10);
    assert_abs_diff_eq!(c.im, ov.im, epsilon = 1e-10);
}

#[test]
fn terms_agree_with_correlations() {
    common::init_logging();
    let psi = common::random_state(6, BC::Finite, 2, 3);
    let zz = psi.correlation_function("Sz", "Sz", None, None).unwrap();
    let pm = psi.correlation_function("Sp", "Sm", Some(&[2]), Some(&[4])).unwrap();
    let terms = TermList::new(
        vec![term(&[("Sz", 0), ("Sz", 1)]), term(&[("Sp", 2), ("Sm", 4)])],
        vec![C64::from(1.0), C64::from(0.5)],
    ).unwrap();
    let (total, mut env) = psi.expectation_value_terms_sum(&terms).unwrap();
    let expected = zz[[0, 1]] + pm[[0, 0]] * 0.5;
    assert_abs_diff_eq!(total.re, expected.re, epsilon = 1e-10);
    assert_abs_diff_eq!(total.im, expected.im, epsilon = 1e-10);
    env.test_sanity().unwrap();

    let right
        = env.term_correlation_function_right(
            &[("Sz", 0)], &[("Sz", 0)], 1, Some(&[2, 3, 5])).unwrap();
    for (v, j) in right.iter().zip([2, 3, 5]) {
        assert_abs_diff_eq!(v.re, zz[[1, j]].re, epsilon = 1e-10);
    }
    let default = env.term_correlation_function_right(
        &[("Sz", 0)], &[("Sz", 0)], 1, None).unwrap();
    assert_eq!(default.len(), 4);
    assert_abs_diff_eq!(default[0].re, zz[[1, 2]].re, epsilon = 1e-10);

    let left
        = env.term_correlation_function_left(
            &[("Sz", 0)], &[("Sz", 0)], Some(&[2, 0]), 4).unwrap();
    assert_abs_diff_eq!(left[0].re, zz[[2, 4]].re, epsilon = 1e-10);
    assert_abs_diff_eq!(left[1].re, zz[[0, 4]].re, epsilon = 1e-10);
    for i in 0..6 {
        for j in 0..6 {
            assert_abs_diff_eq!(zz[[i, j]].re, zz[[j, i]].re, epsilon = 1e-10);
        }
    }
}

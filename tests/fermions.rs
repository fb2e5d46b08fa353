use std::f64::consts::FRAC_1_SQRT_2;
use approx::assert_abs_diff_eq;
use num_complex::Complex64 as C64;
use mps_chain::{ prelude::*, terms::term };

mod common;

// (|a⟩ + |b⟩) / √2 for two product states of spinful fermions with conserved
// particle number and spin
fn superposition(a: &[&str], b: &[&str]) -> MPS {
    let site = Site::spin_half_fermion(true, true);
    let sites = vec![site; a.len()];
    let pa = MPS::from_product_state(sites.clone(), a, BC::Finite).unwrap();
    let pb = MPS::from_product_state(sites, b, BC::Finite).unwrap();
    let mut psi
        = pa.add(&pb, C64::from(FRAC_1_SQRT_2), C64::from(FRAC_1_SQRT_2)).unwrap();
    psi.canonical_form_finite(false, &TruncParams::default()).unwrap();
    psi.test_sanity().unwrap();
    psi
}

#[test]
fn hopping_signs() {
    common::init_logging();
    let psi = superposition(&["up", "empty"], &["empty", "up"]);
    let nu = psi.expectation_value("Nu", None).unwrap();
    assert_abs_diff_eq!(nu[0].re, 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(nu[1].re, 0.5, epsilon = 1e-12);

    let hop = psi.expectation_value_term(&[("Cdu", 0), ("Cu", 1)]).unwrap();
    assert_abs_diff_eq!(hop.re, 0.5, epsilon = 1e-12);
    let hop = psi.expectation_value_term(&[("Cdu", 1), ("Cu", 0)]).unwrap();
    assert_abs_diff_eq!(hop.re, 0.5, epsilon = 1e-12);
    // anticommuting the two operators
    let hop = psi.expectation_value_term(&[("Cu", 1), ("Cdu", 0)]).unwrap();
    assert_abs_diff_eq!(hop.re, -0.5, epsilon = 1e-12);

    let corr = psi.correlation_function("Cdu", "Cu", None, None).unwrap();
    corr.iter().for_each(|c| { assert_abs_diff_eq!(c.re, 0.5, epsilon = 1e-12); });
}

#[test]
fn string_through_occupied_site() {
    common::init_logging();
    let psi = superposition(&["up", "down", "empty"], &["empty", "down", "up"]);
    let hop = psi.expectation_value_term(&[("Cdu", 0), ("Cu", 2)]).unwrap();
    assert_abs_diff_eq!(hop.re, -0.5, epsilon = 1e-12);
    let corr = psi.correlation_function("Cdu", "Cu", None, None).unwrap();
    assert_abs_diff_eq!(corr[[0, 2]].re, -0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(corr[[2, 0]].re, -0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(corr[[1, 1]].re, 0.0, epsilon = 1e-12);
    let ntot = psi.expectation_value_term(&[("Ntot", 0), ("Ntot", 1), ("Ntot", 2)]).unwrap();
    assert_abs_diff_eq!(ntot.re, 0.0, epsilon = 1e-12);
}

#[test]
fn odd_terms_are_rejected() {
    common::init_logging();
    let psi = superposition(&["up", "empty"], &["empty", "up"]);
    assert!(psi.expectation_value("Cu", None).is_err());
    assert!(psi.expectation_value_term(&[("Cu", 0)]).is_err());
    assert!(psi.expectation_value_term(&[("Cdu", 0), ("Cu", 1), ("Nu", 1)]).is_ok());
    assert!(psi.expectation_value_term(&[("Cdu", 0), ("Cdu", 1), ("Cu", 1)]).is_err());
}

#[test]
fn infinite_terms_across_unit_cells() {
    common::init_logging();
    let site = Site::spin_half_fermion(true, true);
    let psi = MPS::from_product_state(
        vec![site; 4], &["empty", "up", "down", "full"], BC::Infinite).unwrap();
    psi.test_sanity().unwrap();

    let a = psi.expectation_value_term(&[("Cd", 1), ("Cu", 2), ("Cdd", 1), ("Cdu", 2)])
        .unwrap();
    let b = psi.expectation_value_term(&[("Cu", 2), ("Cd", 1), ("Cdd", 1), ("Cdu", 2)])
        .unwrap();
    assert_abs_diff_eq!(a.re, -1.0, epsilon = 1e-12);
    assert_abs_diff_eq!((a + b).norm(), 0.0, epsilon = 1e-12);
    // the same term one unit cell further
    let a5 = psi.expectation_value_term(&[("Cd", 5), ("Cu", 6), ("Cdd", 5), ("Cdu", 6)])
        .unwrap();
    assert_abs_diff_eq!((a5 - a).norm(), 0.0, epsilon = 1e-12);

    let nn = psi.expectation_value_term(&[("Nu", 1), ("Nd", 6)]).unwrap();
    assert_abs_diff_eq!(nn.re, 1.0, epsilon = 1e-12);
    let nn = psi.expectation_value_term(&[("Nu", 2), ("Nd", 11)]).unwrap();
    assert_abs_diff_eq!(nn.re, 0.0, epsilon = 1e-12);

    // site 3 is full and site 8 is empty
    let c = psi.expectation_value_term(&[("Cdu", 3), ("Cd", 8), ("Cdd", 8), ("Cu", 3)])
        .unwrap();
    assert_abs_diff_eq!(c.re, 1.0, epsilon = 1e-12);
    let c_rev = psi.expectation_value_term(&[("Cd", 8), ("Cdu", 3), ("Cdd", 8), ("Cu", 3)])
        .unwrap();
    assert_abs_diff_eq!(c_rev.re, -1.0, epsilon = 1e-12);
    let blocked = psi.expectation_value_term(&[("Cd", 3), ("Cu", 9), ("Cdu", 9), ("Cdd", 3)])
        .unwrap();
    assert_abs_diff_eq!(blocked.norm(), 0.0, epsilon = 1e-12);

    let terms = TermList::new(
        vec![
            term(&[("Cd", 1), ("Cu", 2), ("Cdd", 1), ("Cdu", 2)]),
            term(&[("Cu", 2), ("Cd", 1), ("Cdd", 1), ("Cdu", 2)]),
            term(&[("Nu", 1), ("Nd", 6)]),
            term(&[("Cdu", 3), ("Cd", 8), ("Cdd", 8), ("Cu", 3)]),
            term(&[("Cd", 8), ("Cdu", 3), ("Cdd", 8), ("Cu", 3)]),
        ],
        vec![1.0, 2.0, 0.5, 1.0, -1.0].into_iter().map(C64::from).collect(),
    ).unwrap();
    let (total, env) = psi.expectation_value_terms_sum(&terms).unwrap();
    assert_abs_diff_eq!(total.re, 3.5, epsilon = 1e-12);
    assert_abs_diff_eq!(total.im, 0.0, epsilon = 1e-12);
    env.test_sanity().unwrap();
}

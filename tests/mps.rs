use std::f64::consts::{ FRAC_1_SQRT_2, LN_2 };
use approx::assert_abs_diff_eq;
use num_complex::Complex64 as C64;
use rand::{ SeedableRng, rngs::StdRng };
use mps_chain::prelude::*;

mod common;

fn spin_chain(states: &[&str], bc: BC) -> MPS {
    let site = Site::spin_half(Conserve::Sz);
    MPS::from_product_state(vec![site; states.len()], states, bc).unwrap()
}

#[test]
fn singlets_entropy_and_correlations() {
    common::init_logging();
    let site = Site::spin_half(Conserve::Sz);
    let psi = MPS::from_singlets(
        &site, 6, &[(1, 3), (2, 5)], &[0, 4], "up", "down", "up", BC::Finite,
    ).unwrap();
    psi.test_sanity().unwrap();
    assert_eq!(psi.chi(), vec![1, 1, 2, 4, 2, 2, 1]);
    let s = psi.entanglement_entropy(1.0, None).unwrap();
    let expected = [0.0, LN_2, 2.0 * LN_2, LN_2, LN_2];
    s.iter().zip(expected)
        .for_each(|(sk, ek)| { assert_abs_diff_eq!(*sk, ek, epsilon = 1e-12); });

    let corr = psi.correlation_function("Sz", "Sz", None, None).unwrap();
    assert_abs_diff_eq!(corr[[1, 3]].re, -0.25, epsilon = 1e-12);
    assert_abs_diff_eq!(corr[[3, 1]].re, -0.25, epsilon = 1e-12);
    assert_abs_diff_eq!(corr[[2, 5]].re, -0.25, epsilon = 1e-12);
    assert_abs_diff_eq!(corr[[0, 4]].re, 0.25, epsilon = 1e-12);
    assert_abs_diff_eq!(corr[[0, 0]].re, 0.25, epsilon = 1e-12);
    assert_abs_diff_eq!(corr[[1, 2]].re, 0.0, epsilon = 1e-12);
    let sz = psi.expectation_value("Sz", None).unwrap();
    assert_abs_diff_eq!(sz[0].re, 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(sz[1].re, 0.0, epsilon = 1e-12);
}

#[test]
fn cat_state_from_sum() {
    common::init_logging();
    let a = spin_chain(&["up", "down", "up", "down"], BC::Finite);
    let b = spin_chain(&["down", "up", "down", "up"], BC::Finite);
    let mut cat
        = a.add(&b, C64::from(FRAC_1_SQRT_2), C64::from(FRAC_1_SQRT_2)).unwrap();
    cat.canonical_form_finite(false, &TruncParams::default()).unwrap();
    cat.test_sanity().unwrap();
    let nt = cat.norm_test().unwrap();
    assert!(nt.iter().all(|x| *x < 1e-12));
    assert_eq!(cat.chi(), vec![1, 2, 2, 2, 1]);
    let s = cat.entanglement_entropy(1.0, None).unwrap();
    s.iter().for_each(|sk| { assert_abs_diff_eq!(*sk, LN_2, epsilon = 1e-12); });
    assert_abs_diff_eq!(cat.overlap(&cat, false).unwrap().re, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(a.overlap(&cat, false).unwrap().norm(), FRAC_1_SQRT_2, epsilon = 1e-12);
    let by_charge = cat.entanglement_spectrum_by_charge();
    assert_eq!(by_charge[1].len(), 2);
}

#[test]
fn local_operators_shift_charge() {
    common::init_logging();
    let mut psi = spin_chain(&["up", "down", "up"], BC::Finite);
    assert_eq!(psi.get_total_charge(), vec![1]);
    psi.apply_local_op(1, "Sp", false, false).unwrap();
    psi.test_sanity().unwrap();
    assert_eq!(psi.get_total_charge(), vec![3]);
    let sz = psi.expectation_value("Sz", None).unwrap();
    sz.iter().for_each(|x| { assert_abs_diff_eq!(x.re, 0.5, epsilon = 1e-12); });
}

#[test]
fn random_state_is_canonical() {
    common::init_logging();
    let psi = common::random_state(6, BC::Finite, 2, 1234);
    psi.test_sanity().unwrap();
    let nt = psi.norm_test().unwrap();
    assert!(nt.iter().all(|x| *x < 1e-10));
    assert_abs_diff_eq!(psi.overlap(&psi, false).unwrap().re, 1.0, epsilon = 1e-10);
    let sz = psi.expectation_value("Sz", None).unwrap();
    assert_abs_diff_eq!(sz.iter().map(|x| x.re).sum::<f64>(), 0.0, epsilon = 1e-10);

    // entropies of half-chains agree with the reduced density matrices
    let s_bond = psi.entanglement_entropy(2.0, Some(&[3])).unwrap()[0];
    let s_rdm = psi.entanglement_entropy_segment(&[0, 1, 2], Some(&[0]), 2.0).unwrap()[0];
    assert_abs_diff_eq!(s_bond, s_rdm, epsilon = 1e-10);
    let (pairs, mi) = psi.mutinf_two_site(Some(2), 1.0).unwrap();
    assert_eq!(pairs.len(), 9);
    assert!(mi.iter().all(|x| *x > -1e-10));
}

#[test]
fn spatial_inversion_mirrors_observables() {
    common::init_logging();
    let psi = common::random_state(5, BC::Finite, 2, 42);
    let mut inv = psi.clone();
    inv.spatial_inversion();
    inv.test_sanity().unwrap();
    let sz = psi.expectation_value("Sz", None).unwrap();
    let sz_inv = inv.expectation_value("Sz", None).unwrap();
    for i in 0..5 {
        assert_abs_diff_eq!(sz[i].re, sz_inv[4 - i].re, epsilon = 1e-10);
    }
    let s = psi.entanglement_entropy(1.0, None).unwrap();
    let s_inv = inv.entanglement_entropy(1.0, None).unwrap();
    for b in 0..4 {
        assert_abs_diff_eq!(s[b], s_inv[3 - b], epsilon = 1e-10);
    }
}

#[test]
fn permute_and_compress() {
    common::init_logging();
    let psi = common::random_state(6, BC::Finite, 1, 7);
    let mut perm = psi.clone();
    perm.permute_sites(&[1, 0, 2, 3, 5, 4], &TruncParams::default()).unwrap();
    perm.test_sanity().unwrap();
    let sz = psi.expectation_value("Sz", None).unwrap();
    let sz_p = perm.expectation_value("Sz", None).unwrap();
    assert_abs_diff_eq!(sz[0].re, sz_p[1].re, epsilon = 1e-10);
    assert_abs_diff_eq!(sz[4].re, sz_p[5].re, epsilon = 1e-10);

    let mut big = psi.add(&psi, C64::from(0.5), C64::from(0.5)).unwrap();
    let opts = CompressionOptions {
        method: CompressionMethod::Variational,
        ..CompressionOptions::default()
    };
    big.compress(&opts).unwrap();
    assert_eq!(big.chi(), psi.chi());
    assert_abs_diff_eq!(big.overlap(&psi, false).unwrap().norm(), 1.0, epsilon = 1e-10);
}

#[test]
fn infinite_chain_basics() {
    common::init_logging();
    let psi = common::random_state(2, BC::Infinite, 2, 99);
    psi.test_sanity().unwrap();
    assert_abs_diff_eq!(psi.overlap(&psi, false).unwrap().norm(), 1.0, epsilon = 1e-8);
    let mut big = psi.clone();
    big.enlarge_mps_unit_cell(2).unwrap();
    let sz = psi.expectation_value("Sz", None).unwrap();
    let sz_big = big.expectation_value("Sz", None).unwrap();
    assert_abs_diff_eq!(sz[0].re, sz_big[2].re, epsilon = 1e-10);
    assert_abs_diff_eq!(sz[1].re, sz_big[3].re, epsilon = 1e-10);
    assert_abs_diff_eq!(sz[0].re + sz[1].re, 0.0, epsilon = 1e-10);
}

#[test]
fn compress_orthogonal_sum() {
    common::init_logging();
    let a = spin_chain(&["up", "down", "up", "down"], BC::Finite);
    let b = spin_chain(&["down", "up", "down", "up"], BC::Finite);
    for method in [CompressionMethod::Svd, CompressionMethod::Variational] {
        let mut sum = a.add(&b, C64::from(0.5), C64::from(0.5)).unwrap();
        let opts = CompressionOptions { method, ..CompressionOptions::default() };
        let err = sum.compress(&opts).unwrap();
        assert!(err.eps < 1e-12);
        sum.test_sanity().unwrap();
        assert_abs_diff_eq!(a.overlap(&sum, false).unwrap().norm(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(b.overlap(&sum, false).unwrap().norm(), 0.5, epsilon = 1e-12);
    }
}

#[test]
fn canonical_form_is_idempotent() {
    common::init_logging();
    let psi = common::random_state(5, BC::Finite, 2, 2024);
    let mut again = psi.clone();
    again.canonical_form(false).unwrap();
    again.canonical_form(false).unwrap();
    assert_eq!(again.chi(), psi.chi());
    for i in 0..5 {
        let diff = (again.get_SL(i) - psi.get_SL(i)).mapv(f64::abs);
        assert!(diff.iter().all(|x| *x < 1e-10));
    }
    assert!(again.norm_test().unwrap().iter().all(|x| *x < 1e-12));
    assert_abs_diff_eq!(again.overlap(&psi, false).unwrap().norm(), 1.0, epsilon = 1e-10);
}

#[test]
fn singlet_segments_and_mutual_information() {
    common::init_logging();
    let site = Site::spin_half(Conserve::Sz);
    let pairs = [(0, 3), (1, 6), (2, 5)];
    let psi = MPS::from_singlets(
        &site, 8, &pairs, &[4, 7], "up", "down", "up", BC::Finite,
    ).unwrap();
    psi.test_sanity().unwrap();
    assert_eq!(psi.chi(), vec![1, 2, 4, 8, 4, 4, 2, 1, 1]);
    let s = psi.entanglement_entropy(1.0, None).unwrap();
    let expected = [1.0, 2.0, 3.0, 2.0, 2.0, 1.0, 0.0];
    s.iter().zip(expected)
        .for_each(|(sk, ek)| { assert_abs_diff_eq!(*sk, ek * LN_2, epsilon = 1e-12); });

    let seg = psi.entanglement_entropy_segment(&[0, 1, 2, 3], None, 1.0).unwrap();
    let expected = [2.0, 3.0, 1.0, 3.0, 2.0];
    assert_eq!(seg.len(), expected.len());
    seg.iter().zip(expected)
        .for_each(|(sk, ek)| { assert_abs_diff_eq!(*sk, ek * LN_2, epsilon = 1e-10); });

    let (mi_pairs, mi) = psi.mutinf_two_site(None, 1.0).unwrap();
    assert_eq!(mi_pairs.len(), 28);
    for (ij, m) in mi_pairs.iter().zip(&mi) {
        let expected = if pairs.contains(ij) { 2.0 * LN_2 } else { 0.0 };
        assert_abs_diff_eq!(*m, expected, epsilon = 1e-10);
    }

    // every singlet contributes one of its two configurations
    let prod = spin_chain(&["up", "down", "up", "down", "up", "down", "up", "up"], BC::Finite);
    let ov = prod.overlap(&psi, false).unwrap();
    assert_abs_diff_eq!(ov.norm(), 0.5_f64.powf(1.5), epsilon = 1e-12);
    let neel = spin_chain(&["up", "down", "up", "down", "up", "down", "up", "down"], BC::Finite);
    assert_abs_diff_eq!(neel.overlap(&psi, false).unwrap().norm(), 0.0, epsilon = 1e-12);
}

#[test]
fn charge_fluctuations() {
    common::init_logging();
    let n = 6;
    let mut psi = spin_chain(&["up", "down", "up", "down", "up", "down"], BC::Finite);
    psi.apply_local_op(0, "Sm", false, true).unwrap();
    let mut rng = StdRng::seed_from_u64(31);
    RandomUnitaryEvolution::new(2, TruncParams::default())
        .run(&mut psi, &mut rng)
        .unwrap();
    psi.test_sanity().unwrap();
    assert_eq!(psi.get_total_charge(), vec![-2]);

    // the mean charge on bond `b` is the charge of the sites left of it
    let left_charge = |psi: &MPS, b: usize| -> f64 {
        let sz = psi.expectation_value("Sz", None).unwrap();
        psi.leg(0).get(0)[0] as f64
            + (0..b).map(|i| 2.0 * sz[i].re - psi.qtotal()[i][0] as f64).sum::<f64>()
    };
    let mut before: Vec<(f64, f64, i64)> = Vec::new();
    for b in 0..=n {
        let avg = psi.average_charge(b).unwrap()[0];
        let var = psi.charge_variance(b).unwrap()[0];
        assert_abs_diff_eq!(avg, left_charge(&psi, b), epsilon = 1e-10);
        let probs = psi.probability_per_charge(b).unwrap();
        let p_tot: f64 = probs.iter().map(|(_, p)| p).sum();
        let q_avg: f64 = probs.iter().map(|(q, p)| q[0] as f64 * p).sum();
        let q_var: f64 = probs.iter().map(|(q, p)| (q[0] as f64 - avg).powi(2) * p).sum();
        assert_abs_diff_eq!(p_tot, 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(q_avg, avg, epsilon = 1e-10);
        assert_abs_diff_eq!(q_var, var, epsilon = 1e-10);
        before.push((avg, var, psi.leg(b).get(0)[0]));
    }
    assert!(before.iter().any(|(_, var, _)| *var > 1e-3));
    assert!(psi.charge_variance(n + 1).is_err());

    psi.gauge_total_charge();
    psi.test_sanity().unwrap();
    assert!(psi.qtotal().iter().all(|q| q[0] == 0));
    assert_eq!(psi.get_total_charge(), vec![-2]);
    for (b, (avg, var, q0)) in before.into_iter().enumerate() {
        let shift = (psi.leg(b).get(0)[0] - q0) as f64;
        assert_abs_diff_eq!(psi.average_charge(b).unwrap()[0], avg + shift, epsilon = 1e-10);
        assert_abs_diff_eq!(psi.charge_variance(b).unwrap()[0], var, epsilon = 1e-10);
        assert_abs_diff_eq!(psi.average_charge(b).unwrap()[0], left_charge(&psi, b), epsilon = 1e-10);
    }
}

//! Evolution by layers of random, charge-conserving two-site unitaries.
//!
//! Each step applies a brickwork of two layers, first on the bonds
//! `(0, 1), (2, 3), ...` and then on `(1, 2), (3, 4), ...` (wrapping around
//! the unit cell for infinite chains). Every gate is Haar-random within each
//! charge block of the two sites, so the total charge is conserved.

use ndarray as nd;
use ndarray_linalg::QRSquareInplace;
use num_complex::Complex64 as C64;
use rand::{ Rng, distributions::Distribution };
use statrs::distribution::Normal;
use tracing::debug;
use crate::{
    ComplexFloatExt,
    charges::{ ChargeInfo, LegCharge },
    error::{ MPSResult, config_err },
    mps::MPS,
    truncation::{ TruncParams, TruncationError },
};

/// Generate an `n × n` Haar-random unitary matrix.
pub fn haar<R>(n: usize, rng: &mut R) -> MPSResult<nd::Array2<C64>>
where R: Rng + ?Sized
{
    let normal = Normal::standard();
    let mut z: nd::Array2<C64>
        = nd::Array2::from_shape_simple_fn(
            (n, n),
            || C64::from_components(normal.sample(rng), normal.sample(rng)),
        );
    let (_, r) = z.qr_square_inplace()?;
    nd::Zip::from(z.columns_mut())
        .and(r.diag())
        .for_each(|mut z_j, rjj| {
            let renorm = *rjj / C64::from_re(rjj.norm());
            z_j.map_inplace(|zij| { *zij /= renorm; });
        });
    Ok(z)
}

/// Generate a random unitary acting on the fused space of `leg`, block
/// diagonal in its charges.
pub fn haar_charge_blocks<R>(chinfo: &ChargeInfo, leg: &LegCharge, rng: &mut R)
    -> MPSResult<nd::Array2<C64>>
where R: Rng + ?Sized
{
    let d = leg.dim();
    let mut u: nd::Array2<C64> = nd::Array2::zeros((d, d));
    for (_, idx) in leg.blocks(chinfo).into_iter() {
        let block = haar(idx.len(), rng)?;
        for (a, ia) in idx.iter().enumerate() {
            for (b, ib) in idx.iter().enumerate() {
                u[[*ia, *ib]] = block[[a, b]];
            }
        }
    }
    Ok(u)
}

/// Random brickwork evolution of a canonical state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RandomUnitaryEvolution {
    /// Number of (even + odd) layers to apply.
    pub n_steps: usize,
    /// Truncation of every bond after its gate.
    pub trunc_params: TruncParams,
}

impl Default for RandomUnitaryEvolution {
    fn default() -> Self {
        Self { n_steps: 1, trunc_params: TruncParams::default() }
    }
}

impl RandomUnitaryEvolution {
    pub fn new(n_steps: usize, trunc_params: TruncParams) -> Self {
        Self { n_steps, trunc_params }
    }

    /// Evolve `psi` in place, returning the accumulated truncation error.
    ///
    /// `psi` must be in canonical form and have at least two sites.
    pub fn run<R>(&self, psi: &mut MPS, rng: &mut R) -> MPSResult<TruncationError>
    where R: Rng + ?Sized
    {
        let L = psi.L();
        if L < 2 {
            return config_err("random two-site evolution needs at least two sites");
        }
        let nb = if psi.finite() { L - 1 } else { L };
        let chinfo = psi.chinfo().clone();
        let mut err = TruncationError::none();
        for step in 0..self.n_steps {
            for parity in [0, 1] {
                for i in (parity..nb).step_by(2) {
                    let j = (i + 1) % L;
                    let leg = LegCharge::combine(
                        &chinfo,
                        &[(psi.sites()[i].leg(), 1), (psi.sites()[j].leg(), 1)],
                    );
                    let gate = haar_charge_blocks(&chinfo, &leg, rng)?;
                    err += psi.apply_gate(i, &gate, &self.trunc_params)?;
                }
            }
            debug!(step, chi = ?psi.chi(), eps = err.eps, "random unitary layer");
        }
        Ok(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::{
        decomp::adjoint,
        mps::BC,
        site::{ Conserve, Site },
    };

    #[test]
    fn haar_is_unitary() {
        let mut rng = StdRng::seed_from_u64(10546);
        let u = haar(5, &mut rng).unwrap();
        let id: nd::Array2<C64> = nd::Array2::eye(5);
        let diff = u.dot(&adjoint(&u)) - id;
        assert!(diff.iter().all(|x| x.norm() < 1e-12));
    }

    #[test]
    fn evolution_conserves_charge() {
        let mut rng = StdRng::seed_from_u64(10546);
        let s = Site::spin_half(Conserve::Sz);
        let mut psi = MPS::from_product_state(
            vec![s; 6], &["up", "down", "up", "down", "up", "down"], BC::Finite).unwrap();
        let evol = RandomUnitaryEvolution::new(3, TruncParams::default());
        let err = evol.run(&mut psi, &mut rng).unwrap();
        assert!(err.eps < 1e-12);
        psi.test_sanity().unwrap();
        assert!(psi.chi().iter().any(|chi| *chi > 1));
        assert_eq!(psi.get_total_charge(), vec![0]);
        let sz = psi.expectation_value("Sz", None).unwrap();
        assert_abs_diff_eq!(sz.iter().map(|x| x.re).sum::<f64>(), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(psi.overlap(&psi, false).unwrap().re, 1.0, epsilon = 1e-10);
    }
}

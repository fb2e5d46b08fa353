//! Charge statistics of the Schmidt states and charge gauge fixing.

use ndarray as nd;
use crate::{
    charges::LegCharge,
    error::{ MPSResult, config_err },
};
use super::MPS;

impl MPS {
    fn check_bond(&self, b: usize) -> MPSResult<()> {
        if b >= self.nbonds() {
            return config_err(format!(
                "bond {b} out of range for {} bonds", self.nbonds()));
        }
        Ok(())
    }

    /// Mean charge `Σ_a s_a² q_a` of the Schmidt states on bond `b`, for every
    /// charge.
    pub fn average_charge(&self, b: usize) -> MPSResult<nd::Array1<f64>> {
        self.check_bond(b)?;
        let s2 = self.ss[b].mapv(|x| x * x);
        let q = self.legs[b].as_array().mapv(|x| x as f64);
        Ok(s2.dot(&q))
    }

    /// Variance `Σ_a s_a² (q_a - q̄)²` of the charges of the Schmidt states on
    /// bond `b`.
    pub fn charge_variance(&self, b: usize) -> MPSResult<nd::Array1<f64>> {
        let avg = self.average_charge(b)?;
        let s2 = self.ss[b].mapv(|x| x * x);
        let dq = self.legs[b].as_array().mapv(|x| x as f64) - &avg;
        Ok(s2.dot(&dq.mapv(|x| x * x)))
    }

    /// Total weight `Σ s_a²` of the Schmidt states on bond `b` for each
    /// charge, in increasing order of charge.
    pub fn probability_per_charge(&self, b: usize) -> MPSResult<Vec<(Vec<i64>, f64)>> {
        self.check_bond(b)?;
        let s = &self.ss[b];
        Ok(
            self.legs[b].blocks(&self.chinfo).into_iter()
                .map(|(q, idx)| (q, idx.iter().map(|k| s[*k] * s[*k]).sum()))
                .collect()
        )
    }

    /// Total charge of the state: the sum of all site charges, corrected by
    /// the charges of the outer bonds of a finite chain. For infinite chains
    /// this is the charge per unit cell.
    pub fn get_total_charge(&self) -> Vec<i64> {
        let ch = &self.chinfo;
        let mut q
            = self.qtotal.iter()
            .fold(ch.zero(), |acc, qt| ch.add(&acc, qt));
        if self.finite() && ch.qnumber() > 0 {
            let L = self.L();
            q = ch.add(&q, &self.legs[L].get(0));
            q = ch.sub(&q, &self.legs[0].get(0));
        }
        ch.make_valid(q)
    }

    /// Shift the charges of the bonds so that every site tensor has total
    /// charge zero, moving the total charge onto the last bond of a finite
    /// chain. Infinite chains keep the total charge per unit cell on the last
    /// site, since bond `L` is bond `0`.
    pub fn gauge_total_charge(&mut self) {
        let ch = self.chinfo.clone();
        let L = self.L();
        let mut shift = ch.zero();
        for i in 0..L {
            if i + 1 == L && !self.finite() { break; }
            shift = ch.add(&shift, &self.qtotal[i]);
            self.qtotal[i] = ch.zero();
            let leg: LegCharge = self.legs[i + 1].shifted(&ch, &shift);
            self.legs[i + 1] = leg;
        }
        if !self.finite() {
            self.qtotal[L - 1] = ch.add(&shift, &self.qtotal[L - 1]);
        }
        self.touch_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::{
        mps::BC,
        site::{ Conserve, Site },
    };

    #[test]
    fn gauge_moves_charge_to_bonds() {
        let s = Site::spin_half(Conserve::Sz);
        let mut psi = MPS::from_product_state(
            vec![s; 3], &["up", "up", "down"], BC::Infinite).unwrap();
        assert_eq!(psi.get_total_charge(), vec![1]);
        psi.gauge_total_charge();
        assert_eq!(psi.qtotal(), &[vec![0], vec![0], vec![1]]);
        assert_eq!(psi.leg(1).get(0), vec![1]);
        assert_eq!(psi.leg(2).get(0), vec![2]);
        assert_eq!(psi.get_total_charge(), vec![1]);
        psi.test_sanity().unwrap();
        assert_abs_diff_eq!(psi.average_charge(2).unwrap()[0], 2.0);
        assert_abs_diff_eq!(psi.charge_variance(2).unwrap()[0], 0.0);
        assert_eq!(psi.probability_per_charge(1).unwrap(), vec![(vec![1], 1.0)]);
    }
}

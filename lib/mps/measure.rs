//! Expectation values, correlation functions and entanglement measures.

use itertools::Itertools;
use ndarray as nd;
use ndarray_linalg::{ EigValsh, UPLO };
use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap;
use crate::{
    decomp::c_order,
    env::MPSEnvironment,
    error::{ MPSResult, config_err },
    site::Operator,
    terms::TermList,
};
use super::{ Form, MPS };

/// Entropy of a probability distribution: von Neumann for `n == 1`, Rényi
/// otherwise (with `n == ∞` giving the min-entropy).
pub(crate) fn entropy_of_probs<'a, I>(probs: I, n: f64) -> f64
where I: IntoIterator<Item = &'a f64>
{
    let p: Vec<f64> = probs.into_iter().copied().filter(|p| *p > 1e-30).collect();
    if n == 1.0 {
        -p.iter().map(|pk| pk * pk.ln()).sum::<f64>()
    } else if n.is_infinite() {
        -p.iter().copied().fold(0.0, f64::max).ln()
    } else {
        p.iter().map(|pk| pk.powf(n)).sum::<f64>().ln() / (1.0 - n)
    }
}

/// Entropy of the distribution `s²` of Schmidt values `s`.
pub(crate) fn entropy(s: &nd::Array1<f64>, n: f64) -> f64 {
    entropy_of_probs(s.mapv(|x| x * x).iter(), n)
}

impl MPS {
    // environment of the state with itself, for canonical states only
    fn self_env(&self) -> MPSResult<MPSEnvironment<'_>> {
        if let Some(i) = self.form.iter().position(|f| f.is_none()) {
            return config_err(format!(
                "site {i} is not in canonical form; call canonical_form first"
            ));
        }
        MPSEnvironment::new(self, self)
    }

    /// Expectation values `⟨op_i⟩` of an operator acting on the sites
    /// `i, ..., i + n - 1` for every `i` in `sites`.
    ///
    /// By default, `sites` are all positions where the operator fits on a
    /// finite chain and the unit cell for infinite chains. The state must be
    /// canonical; its norm is ignored. Fermionic operators are an error (use
    /// [`Self::expectation_value_term`]).
    pub fn expectation_value<O>(&self, op: O, sites: Option<&[usize]>)
        -> MPSResult<nd::Array1<C64>>
    where O: Into<Operator>
    {
        self.self_env()?.expectation_value(op, sites)
    }

    /// Expectation value of an operator product `[(name, site), ...]`,
    /// with Jordan-Wigner strings and fermionic signs taken care of.
    pub fn expectation_value_term<S>(&self, term: &[(S, i64)]) -> MPSResult<C64>
    where S: AsRef<str>
    {
        self.self_env()?.expectation_value_term(term)
    }

    /// `Σ_k strength_k ⟨term_k⟩`, returning the environment used.
    ///
    /// The terms are evaluated one by one. The environment keeps the `LP` and
    /// `RP` boundaries they left behind, so further evaluations on the same
    /// state start from those.
    pub fn expectation_value_terms_sum(&self, terms: &TermList)
        -> MPSResult<(C64, MPSEnvironment<'_>)>
    {
        let mut env = self.self_env()?;
        let total = env.expectation_value_terms_sum(terms)?;
        Ok((total, env))
    }

    /// See [`MPSEnvironment::term_correlation_function_right`].
    pub fn term_correlation_function_right<S, T>(
        &self,
        term_L: &[(S, i64)],
        term_R: &[(T, i64)],
        i_L: i64,
        j_R: Option<&[i64]>,
    ) -> MPSResult<Vec<C64>>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        self.self_env()?.term_correlation_function_right(term_L, term_R, i_L, j_R)
    }

    /// See [`MPSEnvironment::term_correlation_function_left`].
    pub fn term_correlation_function_left<S, T>(
        &self,
        term_L: &[(S, i64)],
        term_R: &[(T, i64)],
        i_L: Option<&[i64]>,
        j_R: i64,
    ) -> MPSResult<Vec<C64>>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        self.self_env()?.term_correlation_function_left(term_L, term_R, i_L, j_R)
    }

    /// Correlation matrix `C[a, b] = ⟨op1_{sites1[a]} op2_{sites2[b]}⟩`.
    ///
    /// Operators on the same site are multiplied in the given order; for
    /// fermionic operators Jordan-Wigner strings are inserted between the
    /// two sites. Sites default to the whole chain (or unit cell).
    pub fn correlation_function(
        &self,
        op1: &str,
        op2: &str,
        sites1: Option<&[usize]>,
        sites2: Option<&[usize]>,
    ) -> MPSResult<nd::Array2<C64>>
    {
        self.self_env()?.correlation_function(op1, op2, sites1, sites2)
    }

    /// Entanglement entropy (`n == 1`: von Neumann, else Rényi) of the
    /// Schmidt values on each of `bonds`, defaulting to the inner bonds
    /// `1..L` of a finite chain and the bonds `0..L` of a unit cell.
    pub fn entanglement_entropy(&self, n: f64, bonds: Option<&[usize]>)
        -> MPSResult<nd::Array1<f64>>
    {
        let L = self.L();
        let default: Vec<usize>
            = if self.finite() { (1..L).collect() } else { (0..L).collect() };
        let bonds = bonds.unwrap_or(&default);
        bonds.iter()
            .map(|b| {
                if *b >= self.nbonds() {
                    return config_err(format!("bond {b} out of range"));
                }
                Ok(entropy(&self.ss[*b], n))
            })
            .collect()
    }

    /// The entanglement spectrum `-2 ln s` on every bond.
    pub fn entanglement_spectrum(&self) -> Vec<nd::Array1<f64>> {
        self.ss.iter().map(|s| s.mapv(|x| -2.0 * x.ln())).collect()
    }

    /// The entanglement spectrum on every bond, grouped by the charge of the
    /// Schmidt states (charges in increasing order, values in increasing
    /// order within each charge).
    pub fn entanglement_spectrum_by_charge(&self) -> Vec<Vec<(Vec<i64>, nd::Array1<f64>)>> {
        self.ss.iter().zip(&self.legs)
            .map(|(s, leg)| {
                leg.blocks(&self.chinfo).into_iter()
                    .sorted_by(|a, b| a.0.cmp(&b.0))
                    .map(|(q, idx)| {
                        let es: nd::Array1<f64>
                            = idx.iter()
                            .map(|k| -2.0 * s[*k].ln())
                            .sorted_by(f64::total_cmp)
                            .collect();
                        (q, es)
                    })
                    .collect()
            })
            .collect()
    }

    /// Reduced density matrix of the given sites, as a matrix on their fused
    /// physical indices (the leftmost site varying slowest).
    ///
    /// Sites may be any set of distinct positions (beyond the unit cell for
    /// infinite chains); the state must be canonical.
    pub fn reduced_density_matrix(&self, sites: &[usize]) -> MPSResult<nd::Array2<C64>> {
        if let Some(i) = self.form.iter().position(|f| f.is_none()) {
            return config_err(format!("site {i} is not in canonical form"));
        }
        let sites: Vec<usize> = sites.iter().copied().sorted().collect();
        if sites.is_empty() { return config_err("no sites given"); }
        if sites.windows(2).any(|w| w[0] == w[1]) {
            return config_err(format!("repeated sites in {sites:?}"));
        }
        let first = sites[0];
        let last = sites[sites.len() - 1];
        if self.finite() && last >= self.L() {
            return config_err(format!("site {last} out of range"));
        }
        // rho :: { kept ket, vR (ket), kept bra, vR* (bra) }
        let chi0 = self.ss[self.bond(first as i64)].len();
        let mut rho: nd::Array4<C64>
            = nd::Array2::<C64>::eye(chi0).into_shape((1, chi0, 1, chi0))?;
        for i in first..=last {
            let form = if i == first { Form::Th } else { Form::B };
            let t = self.get_B_at(i as i64, Some(form))?;
            let (chil, d, chir) = t.dim();
            let (dk, _, _, _) = rho.dim();
            // X[D, D', a', s, b] = Σ_a rho[D, a, D', a'] t[a, s, b]
            let rm
                = c_order(rho.permuted_axes([0, 2, 3, 1]))
                .into_shape((dk * dk * chil, chil))?;
            let tm = c_order(t.clone()).into_shape((chil, d * chir))?;
            let x = rm.dot(&tm).into_shape((dk, dk, chil, d, chir))?;
            let tc = t.mapv(|z| z.conj());
            rho
                = if sites.contains(&i) {
                    let xm
                        = c_order(x.permuted_axes([0, 3, 4, 1, 2]))
                        .into_shape((dk * d * chir * dk, chil))?;
                    let tcm = c_order(tc).into_shape((chil, d * chir))?;
                    xm.dot(&tcm).into_shape((dk * d, chir, dk * d, chir))?
                } else {
                    let xm
                        = c_order(x.permuted_axes([0, 1, 4, 2, 3]))
                        .into_shape((dk * dk * chir, chil * d))?;
                    let tcm = c_order(tc).into_shape((chil * d, chir))?;
                    let y = xm.dot(&tcm).into_shape((dk, dk, chir, chir))?;
                    c_order(y.permuted_axes([0, 2, 1, 3]))
                };
        }
        let (dk, chi, _, _) = rho.dim();
        let mut res: nd::Array2<C64> = nd::Array2::zeros((dk, dk));
        for b in 0..chi {
            res += &rho.slice(nd::s![.., b, .., b]);
        }
        Ok(res)
    }

    // entropy of the reduced density matrix on `sites`
    fn rdm_entropy(&self, sites: &[usize], n: f64) -> MPSResult<f64> {
        let rho = self.reduced_density_matrix(sites)?;
        let rho = (&rho + &rho.t().mapv(|z| z.conj())).mapv(|z| z * 0.5);
        let p = rho.eigvalsh(UPLO::Lower)?;
        Ok(entropy_of_probs(p.iter(), n))
    }

    /// Entropy of the reduced density matrix of `segment` shifted to start at
    /// each of `first_sites`.
    ///
    /// `segment` lists site offsets, e.g. `[0, 1, 3]`. `first_sites` defaults
    /// to all shifts keeping the segment in a finite chain and to the unit
    /// cell for infinite chains.
    pub fn entanglement_entropy_segment(
        &self,
        segment: &[usize],
        first_sites: Option<&[usize]>,
        n: f64,
    ) -> MPSResult<nd::Array1<f64>>
    {
        let L = self.L();
        let max = segment.iter().copied().max().unwrap_or(0);
        let default: Vec<usize>
            = if self.finite() { (0..L.saturating_sub(max)).collect() }
            else { (0..L).collect() };
        let first_sites = first_sites.unwrap_or(&default);
        first_sites.iter()
            .map(|i| {
                let sites: Vec<usize> = segment.iter().map(|s| i + s).collect();
                self.rdm_entropy(&sites, n)
            })
            .collect()
    }

    /// Mutual information `S_i + S_j - S_ij` of all pairs of sites `i < j`
    /// at distance at most `max_range` (default: `L`), with `i` in the unit
    /// cell for infinite chains.
    ///
    /// Returns the pairs and the corresponding values.
    pub fn mutinf_two_site(&self, max_range: Option<usize>, n: f64)
        -> MPSResult<(Vec<(usize, usize)>, nd::Array1<f64>)>
    {
        let L = self.L();
        let max_range = max_range.unwrap_or(L);
        let pairs: Vec<(usize, usize)>
            = if self.finite() {
                (0..L).tuple_combinations()
                    .filter(|(i, j)| j - i <= max_range)
                    .collect()
            } else {
                (0..L).cartesian_product(1..=max_range)
                    .map(|(i, r)| (i, i + r))
                    .collect()
            };
        let mut single: FxHashMap<usize, f64> = FxHashMap::default();
        let mut mi: nd::Array1<f64> = nd::Array1::zeros(pairs.len());
        for (m, (i, j)) in mi.iter_mut().zip(&pairs) {
            let mut s = 0.0;
            for k in [*i, *j] {
                let key = k % L;
                if !single.contains_key(&key) {
                    single.insert(key, self.rdm_entropy(&[key], n)?);
                }
                s += single[&key];
            }
            *m = s - self.rdm_entropy(&[*i, *j], n)?;
        }
        Ok((pairs, mi))
    }
}

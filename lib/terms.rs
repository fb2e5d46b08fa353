//! Products of local operators ("terms") and their Jordan-Wigner bookkeeping.
//!
//! A term is an ordered list of `(operator name, site)` pairs, standing for
//! the operator product in the given order, e.g.
//! `[("Cdu", 0), ("Cu", 3)]` for `c†_{↑,0} c_{↑,3}`. To evaluate it on a
//! chain, the factors are sorted by site (picking up a sign for every
//! exchange of two fermionic operators) and Jordan-Wigner strings are
//! inserted, yielding one matrix per site of the covered range.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    error::{ MPSResult, config_err },
    site::Site,
};

/// An ordered operator product `[(name, site), ...]`.
pub type Term = Vec<(String, i64)>;

/// Convert a slice of `(name, site)` pairs into an owned [`Term`].
pub fn term<S>(factors: &[(S, i64)]) -> Term
where S: AsRef<str>
{
    factors.iter().map(|(name, i)| (name.as_ref().to_string(), *i)).collect()
}

/// A sum of terms with (complex) strengths.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TermList {
    terms: Vec<Term>,
    strength: Vec<C64>,
}

impl TermList {
    /// Create from terms and their strengths.
    ///
    /// Fails if the two lists have different lengths or a term is empty.
    pub fn new(terms: Vec<Term>, strength: Vec<C64>) -> MPSResult<Self> {
        if terms.len() != strength.len() {
            return config_err(format!(
                "{} terms but {} strengths", terms.len(), strength.len(),
            ));
        }
        if terms.iter().any(|t| t.is_empty()) {
            return config_err("empty term");
        }
        Ok(Self { terms, strength })
    }

    /// Add a term.
    pub fn push(&mut self, term: Term, strength: C64) -> MPSResult<()> {
        if term.is_empty() { return config_err("empty term"); }
        self.terms.push(term);
        self.strength.push(strength);
        Ok(())
    }

    /// Number of terms.
    pub fn len(&self) -> usize { self.terms.len() }

    /// Return `true` if there are no terms.
    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    /// Iterate over `(term, strength)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Term, C64)> + '_ {
        self.terms.iter().zip(self.strength.iter().copied())
    }
}

/// Sign of bringing the fermionic operators at the given positions (listed in
/// term order) into increasing order, `(-1)^(number of inversions)`.
pub fn fermionic_sign(positions: &[i64]) -> f64 {
    let inversions: usize
        = positions.iter().enumerate()
        .map(|(a, pa)| positions[a + 1..].iter().filter(|pb| *pb < pa).count())
        .sum();
    if inversions % 2 == 0 { 1.0 } else { -1.0 }
}

/// A term resolved into one matrix per site of a consecutive range.
#[derive(Clone, Debug)]
pub(crate) struct SiteOps {
    /// First site of the range.
    pub(crate) start: i64,
    /// Matrices for the sites `start, start + 1, ...`.
    pub(crate) ops: Vec<nd::Array2<C64>>,
    /// Sign picked up by sorting the fermionic operators.
    pub(crate) sign: f64,
    /// Whether the term contains an odd number of fermionic operators.
    pub(crate) odd: bool,
}

impl SiteOps {
    /// Last site of the range.
    pub(crate) fn end(&self) -> i64 { self.start + self.ops.len() as i64 - 1 }

    /// Multiply every matrix from the right by the Jordan-Wigner operator of
    /// its site, for a string passing through the whole range.
    pub(crate) fn with_string<'s, F>(mut self, site_at: F) -> MPSResult<Self>
    where F: Fn(i64) -> MPSResult<&'s Site>
    {
        for (k, op) in self.ops.iter_mut().enumerate() {
            let jw = site_at(self.start + k as i64)?.get_op("JW")?;
            *op = op.dot(&jw);
        }
        Ok(self)
    }
}

/// Sort a term by site and insert Jordan-Wigner strings.
///
/// `site_at` returns the site at a given position; `shift` is added to every
/// site of the term. The operators on one site are multiplied in term order;
/// every site carries a Jordan-Wigner operator (acting first) if an odd
/// number of fermionic operators sits to its right. Fails for empty terms,
/// unknown operators, or an odd total number of fermionic operators.
pub(crate) fn site_ops<'s, S, F>(term: &[(S, i64)], shift: i64, site_at: F)
    -> MPSResult<SiteOps>
where
    S: AsRef<str>,
    F: Fn(i64) -> MPSResult<&'s Site>,
{
    resolve(term, shift, site_at, false)
}

/// Like [`site_ops`], but allowing an odd number of fermionic operators (as
/// recorded in [`SiteOps::odd`]), for one half of a correlation function
/// whose other half supplies the partners.
pub(crate) fn half_site_ops<'s, S, F>(term: &[(S, i64)], shift: i64, site_at: F)
    -> MPSResult<SiteOps>
where
    S: AsRef<str>,
    F: Fn(i64) -> MPSResult<&'s Site>,
{
    resolve(term, shift, site_at, true)
}

fn resolve<'s, S, F>(term: &[(S, i64)], shift: i64, site_at: F, allow_odd: bool)
    -> MPSResult<SiteOps>
where
    S: AsRef<str>,
    F: Fn(i64) -> MPSResult<&'s Site>,
{
    if term.is_empty() { return config_err("empty term"); }
    // (site, name, fermionic)
    let mut factors: Vec<(i64, &str, bool)> = Vec::with_capacity(term.len());
    for (name, i) in term.iter() {
        let i = *i + shift;
        let site = site_at(i)?;
        factors.push((i, name.as_ref(), site.op_needs_jw(name.as_ref())));
    }
    let odd_positions: Vec<i64>
        = factors.iter().filter(|f| f.2).map(|f| f.0).collect();
    let odd = odd_positions.len() % 2 == 1;
    if odd && !allow_odd {
        return config_err(format!(
            "term {:?} has an odd number of fermionic operators",
            factors.iter().map(|f| (f.1, f.0)).collect::<Vec<_>>(),
        ));
    }
    let sign = fermionic_sign(&odd_positions);
    factors.sort_by_key(|f| f.0); // stable
    let start = factors[0].0;
    let end = factors[factors.len() - 1].0;
    let mut ops: Vec<nd::Array2<C64>> = Vec::with_capacity((end - start + 1) as usize);
    for k in start..=end {
        let site = site_at(k)?;
        let odd_right = factors.iter().filter(|f| f.0 > k && f.2).count() % 2 == 1;
        let names: Vec<&str>
            = factors.iter().filter(|f| f.0 == k).map(|f| f.1).collect();
        let mut op
            = if names.is_empty() { site.get_op("Id")? }
            else { site.get_op(&names.join(" "))? };
        if odd_right { op = op.dot(&site.get_op("JW")?); }
        ops.push(op);
    }
    Ok(SiteOps { start, ops, sign, odd })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::site::{ Conserve, Site };

    #[test]
    fn inversion_sign() {
        assert_eq!(fermionic_sign(&[0, 1]), 1.0);
        assert_eq!(fermionic_sign(&[1, 0]), -1.0);
        assert_eq!(fermionic_sign(&[2, 1, 1, 2]), 1.0);
        assert_eq!(fermionic_sign(&[1, 2, 1, 2]), -1.0);
    }

    #[test]
    fn strings_and_products() {
        let f = Site::spin_half_fermion(true, true);
        let at = |_: i64| MPSResult::Ok(&f);
        let so = site_ops(&[("Cdu", 3), ("Cu", 1)], 0, at).unwrap();
        assert_eq!(so.start, 1);
        assert_eq!(so.ops.len(), 3);
        assert_eq!(so.sign, -1.0);
        let cu_jw = f.get_op("Cu").unwrap().dot(&f.get_op("JW").unwrap());
        assert_abs_diff_eq!(
            (&so.ops[0] - &cu_jw).iter().map(|x| x.norm()).sum::<f64>(), 0.0);
        assert_eq!(so.ops[1], f.get_op("JW").unwrap());
        assert_eq!(so.ops[2], f.get_op("Cdu").unwrap());
        assert!(site_ops(&[("Cu", 0)], 0, at).is_err());
        let s = Site::spin_half(Conserve::Sz);
        let so = site_ops(&[("Sp", 0), ("Sm", 0)], 2, |_| Ok(&s)).unwrap();
        assert_eq!(so.start, 2);
        assert_eq!(so.ops[0], s.get_op("Sp Sm").unwrap());
    }

    #[test]
    fn term_list() {
        let terms = vec![term(&[("Sz", 0)]), term(&[("Sz", 1), ("Sz", 2)])];
        let tl = TermList::new(terms.clone(), vec![C64::from(1.0)]);
        assert!(tl.is_err());
        let tl = TermList::new(terms, vec![C64::from(1.0), C64::from(0.5)]).unwrap();
        assert_eq!(tl.len(), 2);
        assert_eq!(tl.iter().nth(1).unwrap().1, C64::from(0.5));
    }
}

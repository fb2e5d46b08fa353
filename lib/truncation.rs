//! Selection of the Schmidt values to keep on a bond.
//!
//! Given the sorted (decreasing) Schmidt values of a bond, [`truncate`] picks
//! how many to keep under the limits of a [`TruncParams`] and reports the
//! discarded weight as a [`TruncationError`].
//!
//! Values are compared against the `svd_min` and `trunc_cut` thresholds with a
//! relative tolerance of [`TIE_TOL`]; a value sitting on a threshold within
//! that tolerance is kept. `chi_max` is a hard limit. At least one value is
//! always kept.

use std::ops::{ Add, AddAssign };
use ndarray as nd;
use tracing::{ debug, warn };
use crate::error::{ MPSError, MPSResult };

/// Relative tolerance within which a Schmidt value counts as sitting exactly
/// on a truncation threshold.
pub const TIE_TOL: f64 = 1e-12;

/// Truncation limits.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TruncParams {
    /// Maximum number of kept values.
    pub chi_max: usize,
    /// Minimum number of kept values, if available; overrides the thresholds
    /// but not `chi_max`.
    pub chi_min: usize,
    /// Discard values below this threshold.
    pub svd_min: f64,
    /// Discard the smallest values for as long as their cumulative squared
    /// weight stays below this bound.
    pub trunc_cut: f64,
    /// Upper bound on the discarded weight of a single truncation.
    pub max_trunc_err: Option<f64>,
    /// Whether exceeding `max_trunc_err` is an error (`true`) or only logged
    /// as a warning (`false`).
    pub strict: bool,
}

impl Default for TruncParams {
    fn default() -> Self {
        Self {
            chi_max: 100,
            chi_min: 1,
            svd_min: 1e-14,
            trunc_cut: 1e-14,
            max_trunc_err: None,
            strict: false,
        }
    }
}

impl TruncParams {
    /// Limits that only discard numerically vanishing values.
    pub fn exact() -> Self {
        Self {
            chi_max: usize::MAX,
            chi_min: 1,
            svd_min: 1e-15,
            trunc_cut: 0.0,
            max_trunc_err: None,
            strict: false,
        }
    }

    /// Set the maximum number of kept values.
    #[must_use]
    pub fn with_chi_max(mut self, chi_max: usize) -> Self {
        self.chi_max = chi_max;
        self
    }

    /// Set the minimum number of kept values.
    #[must_use]
    pub fn with_chi_min(mut self, chi_min: usize) -> Self {
        self.chi_min = chi_min;
        self
    }

    /// Set the lower threshold on kept values.
    #[must_use]
    pub fn with_svd_min(mut self, svd_min: f64) -> Self {
        self.svd_min = svd_min;
        self
    }

    /// Set the bound on the cumulative discarded weight.
    #[must_use]
    pub fn with_trunc_cut(mut self, trunc_cut: f64) -> Self {
        self.trunc_cut = trunc_cut;
        self
    }

    /// Set an a priori budget on the discarded weight per truncation.
    ///
    /// With `strict`, exceeding it aborts the operation with
    /// [`MPSError::TruncationBudgetExceeded`].
    #[must_use]
    pub fn with_budget(mut self, max_trunc_err: f64, strict: bool) -> Self {
        self.max_trunc_err = Some(max_trunc_err);
        self.strict = strict;
        self
    }

    /// Check a truncation result on `bond` against the error budget.
    pub fn check_budget(&self, err: &TruncationError, bond: usize, chi: usize)
        -> MPSResult<()>
    {
        let Some(limit) = self.max_trunc_err else { return Ok(()); };
        if err.eps <= limit { return Ok(()); }
        if self.strict {
            Err(MPSError::TruncationBudgetExceeded {
                bond, weight: err.eps, limit, chi,
            })
        } else {
            warn!(bond, weight = err.eps, limit, chi, "truncation budget exceeded");
            Ok(())
        }
    }
}

/// Error made by discarding Schmidt values.
///
/// `eps` is the discarded weight (sum of squares of the dropped, normalized
/// values) and `ov` the overlap of the truncated state with the original one.
/// Errors of successive truncations combine via `+`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TruncationError {
    pub eps: f64,
    pub ov: f64,
}

impl Default for TruncationError {
    fn default() -> Self { Self { eps: 0.0, ov: 1.0 } }
}

impl TruncationError {
    /// No truncation.
    pub fn none() -> Self { Self::default() }

    /// The error of discarding weight `eps` from a normalized state.
    pub fn from_discarded(eps: f64) -> Self { Self { eps, ov: 1.0 - eps } }
}

impl Add for TruncationError {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self { eps: self.eps + rhs.eps, ov: self.ov * rhs.ov }
    }
}

impl AddAssign for TruncationError {
    fn add_assign(&mut self, rhs: Self) { *self = *self + rhs; }
}

/// Decide how many of the values in `s` to keep.
///
/// `s` must be non-negative and sorted in decreasing order; it is normalized
/// internally, so the thresholds refer to normalized values. Returns the
/// number of kept values (always at least one, if `s` is non-empty), the norm
/// of the kept part relative to the whole, and the truncation error.
pub fn truncate(s: &nd::Array1<f64>, params: &TruncParams)
    -> (usize, f64, TruncationError)
{
    let n = s.len();
    if n == 0 { return (0, 1.0, TruncationError::none()); }
    let norm2: f64 = s.iter().map(|sk| sk * sk).sum();
    if norm2 <= 0.0 { return (1, 1.0, TruncationError::none()); }
    let p: Vec<f64> = s.iter().map(|sk| sk * sk / norm2).collect();
    let sn: Vec<f64> = p.iter().map(|pk| pk.sqrt()).collect();

    // svd_min: keep everything at or above the threshold
    let mut keep
        = sn.iter()
        .take_while(|sk| **sk >= params.svd_min * (1.0 - TIE_TOL))
        .count();

    // trunc_cut: drop from the tail while the dropped weight stays below
    let cut = params.trunc_cut * (1.0 - TIE_TOL);
    let mut dropped: f64 = p[keep..].iter().sum();
    while keep > 0 && dropped + p[keep - 1] < cut {
        dropped += p[keep - 1];
        keep -= 1;
    }

    keep = keep.max(params.chi_min.min(n)).min(params.chi_max).max(1);
    let discarded: f64 = p[keep..].iter().sum();
    let kept_norm = (1.0 - discarded).max(0.0).sqrt();
    debug!(n, keep, discarded, "truncate");
    (keep, kept_norm, TruncationError::from_discarded(discarded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn chi_max_is_hard() {
        let s = nd::array![0.8, 0.5, 0.3, 0.1];
        let params = TruncParams::default().with_chi_max(2);
        let (keep, _, err) = truncate(&s, &params);
        assert_eq!(keep, 2);
        let norm2: f64 = s.iter().map(|x| x * x).sum();
        assert_abs_diff_eq!(err.eps, (0.09 + 0.01) / norm2, epsilon = 1e-14);
        assert_abs_diff_eq!(err.ov, 1.0 - err.eps);
    }

    #[test]
    fn thresholds_keep_ties() {
        let s = nd::array![0.6_f64.sqrt(), 0.2_f64.sqrt(), 0.2_f64.sqrt()];
        // the last two values sit exactly on the threshold
        let params
            = TruncParams::default().with_svd_min(0.2_f64.sqrt());
        assert_eq!(truncate(&s, &params).0, 3);
        let params = TruncParams::default().with_trunc_cut(0.2);
        assert_eq!(truncate(&s, &params).0, 3);
        let params = TruncParams::default().with_trunc_cut(0.25);
        assert_eq!(truncate(&s, &params).0, 2);
    }

    #[test]
    fn never_empty() {
        let s = nd::array![1e-20, 1e-21];
        let params = TruncParams::default().with_svd_min(0.5).with_chi_min(0);
        assert_eq!(truncate(&s, &params).0, 1);
        let s = nd::array![0.0, 0.0];
        assert_eq!(truncate(&s, &TruncParams::default()).0, 1);
    }

    #[test]
    fn budget() {
        let err = TruncationError::from_discarded(1e-3);
        let soft = TruncParams::default().with_budget(1e-6, false);
        assert!(soft.check_budget(&err, 3, 4).is_ok());
        let hard = TruncParams::default().with_budget(1e-6, true);
        assert!(matches!(
            hard.check_budget(&err, 3, 4),
            Err(MPSError::TruncationBudgetExceeded { bond: 3, chi: 4, .. }),
        ));
        let total = err + TruncationError::from_discarded(1e-3);
        assert_abs_diff_eq!(total.eps, 2e-3);
        assert_abs_diff_eq!(total.ov, 0.999 * 0.999);
    }
}

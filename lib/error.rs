//! Error type shared by all modules.

use ndarray as nd;
use thiserror::Error;

/// Position in a chain at which an inconsistency was found.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// The `i`-th site tensor.
    Site(usize),
    /// The `b`-th bond.
    Bond(usize),
    /// The chain as a whole.
    Chain,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Site(i) => write!(f, "site {i}"),
            Self::Bond(b) => write!(f, "bond {b}"),
            Self::Chain => write!(f, "chain"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MPSError {
    /// Returned when construction or operation inputs are malformed, e.g.
    /// lengths that don't agree, unknown basis labels or operator names, or a
    /// singlet pattern that doesn't partition the chain.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Returned by consistency checks on corrupted internal linkage.
    #[error("invalid state at {location}: {msg}")]
    InvalidState { location: Location, msg: String },

    /// Returned in strict mode when a truncation discards more weight than
    /// allowed.
    #[error(
        "truncation budget exceeded on bond {bond}: discarded weight {weight:e} \
        > {limit:e} at chi = {chi}"
    )]
    TruncationBudgetExceeded {
        bond: usize,
        weight: f64,
        limit: f64,
        chi: usize,
    },

    /// Returned when an operator or state is incompatible with the declared
    /// charge sector.
    #[error("charge mismatch at site {site}: {msg}")]
    ChargeMismatch { site: usize, msg: String },

    /// Returned when an array could not be reshaped.
    #[error("shape error: {0}")]
    Shape(#[from] nd::ShapeError),

    /// Returned when a LAPACK routine fails.
    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}
use MPSError::*;
pub type MPSResult<T> = Result<T, MPSError>;

pub(crate) fn config_err<T, S>(msg: S) -> MPSResult<T>
where S: Into<String>
{
    Err(Configuration(msg.into()))
}

pub(crate) fn invalid_state<T, S>(location: Location, msg: S) -> MPSResult<T>
where S: Into<String>
{
    Err(InvalidState { location, msg: msg.into() })
}

pub(crate) fn charge_err<T, S>(site: usize, msg: S) -> MPSResult<T>
where S: Into<String>
{
    Err(ChargeMismatch { site, msg: msg.into() })
}

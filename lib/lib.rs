#![allow(non_snake_case)]

//! Matrix product states for one-dimensional quantum many-body systems.
//!
//! A state of `L` sites is stored as a chain of rank-3 tensors `B[i]` with
//! legs `[vL, p, vR]` and a vector of Schmidt values `S[b]` on every bond,
//!
//! ```text
//!  S[0]   B[0]   S[1]   B[1]   S[2]         B[L-1]  S[L]
//!  ---- ( ---- ) ---- ( ---- ) ---- ... ( ------- ) ----
//!          |             |                   |
//!          p             p                   p
//! ```
//!
//! together with a per-site form tag recording which powers of the
//! neighboring Schmidt values are absorbed into each tensor, so that the
//! canonical-form invariants can be checked directly. Bonds carry abelian
//! charges and every decomposition is done block-wise by charge sector.
//!
//! Expectation values, correlation functions and overlaps are evaluated with
//! an [`MPSEnvironment`][env::MPSEnvironment], which caches partial
//! contractions from either end of the chain; infinite chains additionally
//! use the [`TransferMatrix`][transfer::TransferMatrix] of one unit cell.
//!
//! # Example
//!
//! ```no_run
//! use mps_chain::prelude::*;
//!
//! let site = Site::spin_half(Conserve::Sz);
//! let psi = MPS::from_singlets(
//!     &site, 6, &[(1, 3), (2, 5)], &[0, 4], "up", "down", "up", BC::Finite,
//! ).unwrap();
//! let corr = psi.correlation_function("Sz", "Sz", None, None).unwrap();
//! println!("{corr}");
//! ```

use num_complex::{ ComplexFloat, Complex };
use num_traits::{ Float, Zero };

pub mod error;
pub mod charges;
pub mod site;
pub mod truncation;
pub mod decomp;
pub mod mps;
pub mod env;
pub mod terms;
pub mod krylov;
pub mod transfer;
pub mod tebd;

/// Re-exports of the commonly used types.
pub mod prelude {
    pub use crate::{
        charges::{ ChargeInfo, LegCharge },
        env::MPSEnvironment,
        error::{ MPSError, MPSResult },
        krylov::ArnoldiOptions,
        mps::{
            BC,
            BondForm,
            ComputeK,
            CompressionMethod,
            CompressionOptions,
            Form,
            MPS,
            ProductState,
        },
        site::{ Conserve, Operator, Site },
        tebd::RandomUnitaryEvolution,
        terms::{ Term, TermList },
        transfer::TransferMatrix,
        truncation::{ TruncParams, TruncationError },
    };
}

/// Extension trait for [`ComplexFloat`].
pub trait ComplexFloatExt: ComplexFloat {
    /// Return the imaginary unit, *i*.
    fn i() -> Self;

    /// Convert from `Self::Real`.
    ///
    /// Should adhere to the usual relationship between ordinary complex and
    /// real numbers, i.e. the result should have imaginary part equal to zero.
    fn from_re(x: Self::Real) -> Self;

    /// Construct from real and imaginary components.
    fn from_components(re: Self::Real, im: Self::Real) -> Self;
}

impl<T> ComplexFloatExt for Complex<T>
where
    Complex<T>: ComplexFloat<Real = T>,
    T: Zero + Float,
{
    fn i() -> Self { Complex::i() }

    fn from_re(x: Self::Real) -> Self {
        Self { re: x, im: <Self::Real as Zero>::zero() }
    }

    fn from_components(re: Self::Real, im: Self::Real) -> Self {
        Self { re, im }
    }
}

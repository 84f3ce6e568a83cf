//! Core algorithms for dense matrix product state (MPS) representations of
//! quantum many-body wavefunctions: canonicalization, variational
//! compression, and exact-state/MPS interconversion with controlled
//! truncation.
//!
//! A state of *L* particles is factored into a chain of rank-3 site tensors
//! joined by "bond" indices, with every tensor stored in `(left bond,
//! physical, right bond)` order and boundary bonds held at dimension 1:
//!
//! ```text
//!        .-bond 0-.        .-bond 1-.        .-bond L-2-.
//!        V        V        V        V        V          V
//! A[0] ------ A[1] ------ A[2] ------ ... ------ A[L-1]
//!  |           |           |                       |
//!  | <- phys   | <- phys   | <- phys               | <- phys
//!       idx 0       idx 1       idx 2                   idx L-1
//! ```
//!
//! The same chain-bond bookkeeping extends to operators (MPOs), whose site
//! tensors are rank-4 in `(physical-out, left bond, right bond, physical-in)`
//! order.
//!
//! All sweeps factor through two external primitives: a singular value
//! decomposition with a robust LAPACK driver fallback ([`linalg`]) and a
//! pluggable dense contraction backend ([`contract`]). Truncation weight
//! discarded at a bond is never an error; it is accumulated and returned so
//! callers can judge approximation quality.
//!
//! # Example
//!
//! ```
//! use num_complex::Complex64 as C64;
//! use tensor_chain::chain::Mps;
//! use tensor_chain::compress::{ compress_variational, CompressOptions };
//! use tensor_chain::convert::state_to_mps;
//! use tensor_chain::linalg::TruncParams;
//!
//! // 0.8|0000⟩ + 0.6|0011⟩, exactly representable at bond dimension 2
//! let mut psi: Vec<C64> = vec![C64::from(0.0); 16];
//! psi[0b0000] = C64::from(0.8);
//! psi[0b0011] = C64::from(0.6);
//!
//! let (mut target, err) = state_to_mps(&psi, 4, None, None).unwrap();
//! assert!(err < 1e-12);
//!
//! // compress onto a rank-1 trial chain
//! let mut rng = rand::thread_rng();
//! let mut trial: Mps<C64> = Mps::random_near_identity(4, 1, 2, &mut rng).unwrap();
//! trial.right_canonicalize(&TruncParams { no_trunc: true, ..Default::default() })
//!     .unwrap();
//! let opts = CompressOptions { tol: 1e-10, ..Default::default() };
//! let err = compress_variational(&mut trial, &mut target, &opts).unwrap();
//! assert!((err - 0.36).abs() < 1e-8);
//! ```

use num_complex::{ Complex, ComplexFloat };
use num_traits::{ Float, Zero };

pub mod linalg;
pub mod contract;
pub mod env;
pub mod chain;
pub mod compress;
pub mod convert;

pub use chain::{ Mps, ChainError, ChainResult };
pub use compress::{ compress_variational, CompressOptions };
pub use convert::Mpo;
pub use linalg::TruncParams;

/// Extension trait for [`ComplexFloat`].
pub trait ComplexFloatExt: ComplexFloat {
    /// Convert from `Self::Real`.
    ///
    /// Should adhere to the usual relationship between ordinary complex and
    /// real numbers, i.e. the result should have imaginary part equal to
    /// zero.
    fn from_real(x: Self::Real) -> Self;

    /// Construct from real and imaginary components.
    fn from_components(re: Self::Real, im: Self::Real) -> Self;
}

impl<T> ComplexFloatExt for Complex<T>
where
    Complex<T>: ComplexFloat<Real = T>,
    T: Zero + Float,
{
    fn from_real(x: Self::Real) -> Self {
        Self { re: x, im: <Self::Real as Zero>::zero() }
    }

    fn from_components(re: Self::Real, im: Self::Real) -> Self {
        Self { re, im }
    }
}

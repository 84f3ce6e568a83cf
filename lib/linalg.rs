//! Dense linear algebra primitives: singular value decomposition with a
//! robust LAPACK driver fallback, and the truncation rule applied at every
//! bond of a chain.
//!
//! The divide-and-conquer driver (`gesdd`) is fast but can fail to converge
//! on ill-conditioned inputs; [`svd_fallback`] retries such failures once
//! with the slower, more robust `gesvd` driver and gives up only if both
//! fail. Truncation ([`truncate`]) is a pure policy on the singular value
//! spectrum and is shared verbatim by canonicalization, compression, and the
//! state/operator conversions; whether the kept values are renormalized is
//! always an explicit caller flag, never implicit.

use std::cmp::Ordering;
use ndarray as nd;
use ndarray_linalg::{ JobSvd, SVDDC, SVDInto };
use num_traits::Float;
use thiserror::Error;
use crate::ComplexFloatExt;

#[derive(Debug, Error)]
pub enum SvdError {
    /// Returned when the divide-and-conquer driver failed to converge and
    /// the robust driver subsequently failed as well. Fatal; there is no
    /// further fallback.
    #[error("svd failed with both gesdd and gesvd drivers: {0}")]
    BothDriversFailed(#[from] ndarray_linalg::error::LinalgError),
}

/// Compute the economy-size SVD of a dense matrix, `mat = U · diag(S) · V†`,
/// with singular values non-negative and in descending order.
///
/// The divide-and-conquer driver is tried first; on a convergence failure
/// the decomposition is retried with the standard driver, logging a warning.
/// Only a failure of both drivers is an error.
pub fn svd_fallback<A>(mat: nd::Array2<A>)
    -> Result<(nd::Array2<A>, nd::Array1<A::Real>, nd::Array2<A>), SvdError>
where
    A: num_complex::ComplexFloat,
    nd::Array2<A>:
        SVDDC<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>
        + SVDInto<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>,
{
    match mat.svddc(JobSvd::Some) {
        Ok((Some(u), s, Some(vt))) => { return Ok((u, s, vt)); },
        Ok(_) => unreachable!(),
        Err(err) => {
            log::warn!("gesdd failed to converge ({err}); retrying with gesvd");
        },
    }
    match mat.svd_into(true, true) {
        Ok((Some(u), s, Some(vt))) => Ok((u, s, vt)),
        Ok(_) => unreachable!(),
        Err(err) => Err(SvdError::BothDriversFailed(err)),
    }
}

/// Parameters governing truncation of a singular value spectrum at a bond.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TruncParams<R> {
    /// Hard cap on the number of singular values kept (the maximum bond
    /// dimension). `None` leaves the rank limited only by `eps`.
    pub chi_max: Option<usize>,
    /// Relative-magnitude cutoff: values with `s / ‖s‖ ≤ eps` are discarded.
    pub eps: R,
    /// Keep every singular value, making the split a lossless gauge change.
    pub no_trunc: bool,
    /// Renormalize the kept singular values to unit norm.
    pub normalized: bool,
}

impl<R: Float> Default for TruncParams<R> {
    fn default() -> Self {
        Self {
            chi_max: None,
            eps: <R as num_traits::NumCast>::from(1e-14).unwrap(),
            no_trunc: false,
            normalized: true,
        }
    }
}

impl<R: Float> TruncParams<R> {
    /// Truncate to at most `chi_max` values, keeping the default relative
    /// cutoff and renormalization.
    pub fn chi(chi_max: usize) -> Self {
        Self { chi_max: Some(chi_max), ..Self::default() }
    }
}

/// Apply the truncation rule to a singular value spectrum.
///
/// Sorts descending, determines the kept rank from `params`, and returns the
/// kept values (renormalized to unit norm if `params.normalized`) together
/// with the discarded weight `Σ s_disc² / Σ s²`.
pub fn truncate<R>(svals: nd::Array1<R>, params: &TruncParams<R>) -> (Vec<R>, R)
where R: Float
{
    let mut s: Vec<R> = svals.to_vec();
    s.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    let total: R
        = s.iter()
        .map(|x| Float::powi(*x, 2))
        .fold(R::zero(), |acc, x| acc + x);
    if total.is_zero() {
        return (s, R::zero());
    }
    let norm = Float::sqrt(total);
    let mut rank: usize
        = if params.no_trunc {
            s.len()
        } else {
            s.iter().take_while(|x| **x / norm > params.eps).count()
        };
    if let Some(chi) = params.chi_max { rank = rank.min(chi); }
    let discarded: R
        = s.iter().skip(rank)
        .map(|x| Float::powi(*x, 2))
        .fold(R::zero(), |acc, x| acc + x);
    s.truncate(rank);
    if params.normalized {
        let knorm = Float::sqrt(
            s.iter()
                .map(|x| Float::powi(*x, 2))
                .fold(R::zero(), |acc, x| acc + x)
        );
        if !knorm.is_zero() {
            s.iter_mut().for_each(|x| { *x = *x / knorm; });
        }
    }
    (s, discarded / total)
}

/// One SVD-and-truncate step on a site tensor, merging `(left × physical)`
/// against the right bond.
///
/// Returns the isometric factor reshaped back to rank 3, the carry matrix
/// `diag(S) · V†` to be absorbed into the right neighbor, and the discarded
/// weight.
pub(crate) fn split_site_left<A>(
    t: nd::Array3<A>,
    params: &TruncParams<A::Real>,
) -> Result<(nd::Array3<A>, nd::Array2<A>, A::Real), SvdError>
where
    A: num_complex::ComplexFloat + ComplexFloatExt,
    nd::Array2<A>:
        SVDDC<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>
        + SVDInto<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>,
{
    let (l, p, r) = t.dim();
    let mat = t.into_shape((l * p, r)).unwrap();
    let (u, s, vt) = svd_fallback(mat)?;
    let (kept, err) = truncate(s, params);
    let rank = kept.len();
    let iso
        = u.slice(nd::s![.., ..rank]).to_owned()
        .into_shape((l, p, rank))
        .unwrap();
    let mut carry = vt.slice(nd::s![..rank, ..]).to_owned();
    carry.axis_iter_mut(nd::Axis(0))
        .zip(&kept)
        .for_each(|(mut row, sv)| {
            row.map_inplace(|x| { *x = *x * A::from_real(*sv); });
        });
    Ok((iso, carry, err))
}

/// Mirror of [`split_site_left`]: merges `(physical × right)` against the
/// left bond and returns the carry matrix `U · diag(S)` for the left
/// neighbor.
pub(crate) fn split_site_right<A>(
    t: nd::Array3<A>,
    params: &TruncParams<A::Real>,
) -> Result<(nd::Array3<A>, nd::Array2<A>, A::Real), SvdError>
where
    A: num_complex::ComplexFloat + ComplexFloatExt,
    nd::Array2<A>:
        SVDDC<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>
        + SVDInto<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>,
{
    let (l, p, r) = t.dim();
    let mat = t.into_shape((l, p * r)).unwrap();
    let (u, s, vt) = svd_fallback(mat)?;
    let (kept, err) = truncate(s, params);
    let rank = kept.len();
    let iso
        = vt.slice(nd::s![..rank, ..]).to_owned()
        .into_shape((rank, p, r))
        .unwrap();
    let mut carry = u.slice(nd::s![.., ..rank]).to_owned();
    carry.axis_iter_mut(nd::Axis(1))
        .zip(&kept)
        .for_each(|(mut col, sv)| {
            col.map_inplace(|x| { *x = *x * A::from_real(*sv); });
        });
    Ok((iso, carry, err))
}

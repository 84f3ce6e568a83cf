//! Variational compression of a chain onto a fixed, smaller bond dimension.
//!
//! The trial chain is optimized in place toward the target by alternating
//! least squares: each half-sweep solves the locally optimal site tensor
//! given frozen environments on both sides, re-orthogonalizes it by SVD, and
//! pushes the carry into the next site. Environments are incrementally
//! updated through an [`EnvCache`] so each full iteration costs *O*(L)
//! contractions rather than *O*(L²).
//!
//! The fixed point maximizes `|⟨trial|target⟩|²` over all chains with the
//! trial's bond dimensions; the returned error `1 − |⟨trial|target⟩|²` is
//! the weight of the target outside that manifold.

use ndarray as nd;
use ndarray_linalg::{ SVDDC, SVDInto };
use num_complex::ComplexFloat;
use num_traits::{ Float, One, Zero };
use crate::{
    ComplexFloatExt,
    chain::{ ChainError, ChainResult, Mps },
    contract::{ Contract, MatMul },
    env::{ right_environment, EnvCache },
    linalg::{ self, TruncParams },
};

/// Knobs for the alternating-least-squares iteration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CompressOptions<R> {
    /// Maximum number of full (left + right) sweep iterations.
    pub max_iter: usize,
    /// Convergence threshold on the change in `1 − |⟨trial|target⟩|²`
    /// between iterations.
    pub tol: R,
    /// Tolerance on `|⟨x|x⟩ − 1|` for the trial normalization check and the
    /// target renormalization trigger.
    pub norm_tol: R,
}

impl<R: Float> Default for CompressOptions<R> {
    fn default() -> Self {
        Self {
            max_iter: 30,
            tol: <R as num_traits::NumCast>::from(1e-4).unwrap(),
            norm_tol: <R as num_traits::NumCast>::from(1e-8).unwrap(),
        }
    }
}

/// Variationally compress `target` onto the bond dimensions of `trial`,
/// optimizing `trial` in place.
///
/// `trial` must be unit-norm within `opts.norm_tol` (ideally
/// right-canonical, so the first sweep's environments are well-conditioned);
/// a non-normalized trial is an error. A non-normalized `target` is instead
/// renormalized in place before iterating. The trial ends right-canonical
/// and unit-norm.
///
/// Returns `1 − |⟨trial|target⟩|²` at the last iteration.
pub fn compress_variational_with<A, B>(
    backend: &B,
    trial: &mut Mps<A>,
    target: &mut Mps<A>,
    opts: &CompressOptions<A::Real>,
) -> ChainResult<A::Real>
where
    A: ComplexFloat + ComplexFloatExt + nd::LinalgScalar,
    B: Contract<A>,
    nd::Array2<A>:
        SVDDC<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>
        + SVDInto<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>,
{
    let n = trial.len();
    if target.len() != n || trial.phys_dims() != target.phys_dims() {
        return Err(ChainError::IncompatibleChains);
    }

    let ov = trial.overlap_with(backend, trial)?;
    if (ov - A::one()).abs() > opts.norm_tol {
        return Err(ChainError::NotNormalized(
            <f64 as num_traits::NumCast>::from(ov.abs()).unwrap_or(f64::NAN)
        ));
    }
    let ov = target.overlap_with(backend, target)?;
    if (ov - A::one()).abs() > opts.norm_tol {
        log::debug!(
            "renormalizing compression target with |<x|x>| = {:e}",
            <f64 as num_traits::NumCast>::from(ov.abs()).unwrap_or(f64::NAN),
        );
        let s = ComplexFloat::sqrt(ov);
        target.tensors[n - 1].map_inplace(|x| { *x = *x / s; });
    }

    if n == 1 {
        trial.tensors[0] = target.tensors[0].clone();
        return Ok(<A::Real as Zero>::zero());
    }

    // right bond of site i; local updates never exceed these
    let caps: Vec<usize> = trial.bond_dims();

    let mut old_err: Option<A::Real> = None;
    for iter in 0..opts.max_iter {
        let mut cache = EnvCache::new(n);
        right_environment(backend, trial, target, 0, Some(&mut cache));

        // left-moving half-sweep
        let mut left_env: nd::Array2<A> = nd::Array2::eye(1);
        for site in 0..n - 1 {
            let renv = cache.get(site + 1).unwrap();
            let upd = backend.local_update(&left_env, &target.tensors[site], renv);
            let params = TruncParams {
                chi_max: Some(caps[site]),
                eps: <A::Real as Zero>::zero(),
                no_trunc: false,
                normalized: true,
            };
            let (iso, carry, _) = linalg::split_site_left(upd, &params)?;
            trial.tensors[site] = iso;
            trial.tensors[site + 1]
                = backend.absorb_left(&carry, &trial.tensors[site + 1]);
            left_env = backend.env_left(&left_env, &trial.tensors[site], &target.tensors[site]);
            cache.set(site, left_env.clone());
            cache.invalidate(site + 1);
        }

        // right-moving half-sweep
        let mut right_env: nd::Array2<A> = nd::Array2::eye(1);
        for site in (1..n).rev() {
            let lenv = cache.get(site - 1).unwrap();
            let upd = backend.local_update(lenv, &target.tensors[site], &right_env);
            let params = TruncParams {
                chi_max: Some(caps[site - 1]),
                eps: <A::Real as Zero>::zero(),
                no_trunc: false,
                normalized: true,
            };
            let (iso, carry, _) = linalg::split_site_right(upd, &params)?;
            trial.tensors[site] = iso;
            trial.tensors[site - 1]
                = backend.absorb_right(&trial.tensors[site - 1], &carry);
            right_env = backend.env_right(&trial.tensors[site], &target.tensors[site], &right_env);
            cache.set(site, right_env.clone());
            cache.invalidate(site - 1);
        }

        let ov = trial.overlap_with(backend, target)?;
        let err = <A::Real as One>::one() - Float::powi(ov.abs(), 2);
        log::debug!(
            "compression iteration {}: 1 - |<trial|target>|^2 = {:e}",
            iter,
            <f64 as num_traits::NumCast>::from(err).unwrap_or(f64::NAN),
        );
        if let Some(prev) = old_err {
            if Float::abs(prev - err) < opts.tol {
                return Ok(err);
            }
        }
        old_err = Some(err);
    }
    log::debug!("compression did not converge in {} iterations", opts.max_iter);
    match old_err {
        Some(err) => Ok(err),
        None => {
            let ov = trial.overlap_with(backend, target)?;
            Ok(<A::Real as One>::one() - Float::powi(ov.abs(), 2))
        },
    }
}

/// [`compress_variational_with`] on the default [`MatMul`] backend.
pub fn compress_variational<A>(
    trial: &mut Mps<A>,
    target: &mut Mps<A>,
    opts: &CompressOptions<A::Real>,
) -> ChainResult<A::Real>
where
    A: ComplexFloat + ComplexFloatExt + nd::LinalgScalar,
    nd::Array2<A>:
        SVDDC<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>
        + SVDInto<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>,
{
    compress_variational_with(&MatMul, trial, target, opts)
}

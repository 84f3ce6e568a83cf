//! Matrix product states as owned chains of rank-3 site tensors, with the
//! dual canonicalization sweeps and the contraction-based readouts built on
//! top of them.
//!
//! Every site tensor is stored in `(left bond, physical, right bond)` index
//! order; the right bond dimension of site `i` always equals the left bond
//! dimension of site `i + 1`, and both chain boundaries carry bond
//! dimension 1. These invariants are checked at construction and maintained
//! by every sweep.
//!
//! "Left-canonical" means every site tensor `A` up to the orthogonality
//! center satisfies `Σ_{l,p} A†[l,p,r'] A[l,p,r] = δ_{r'r}`;
//! "right-canonical" is the mirror condition on the left bond. The property
//! is not stored — the sweeps establish it as a postcondition and the
//! truncation error accounting relies on it as a precondition (unless
//! `no_trunc` makes the pass a lossless gauge change).

use std::ops::Index;
use itertools::izip;
use ndarray as nd;
use ndarray_linalg::{ QR, SVDDC, SVDInto };
use num_complex::ComplexFloat;
use num_traits::{ Float, One, Zero };
use rand::{
    Rng,
    distributions::{ Distribution, Standard },
};
use thiserror::Error;
use crate::{
    ComplexFloatExt,
    contract::{ Contract, MatMul },
    env::{ left_environment, right_environment, EnvCache },
    linalg::{ self, SvdError, TruncParams },
};

#[derive(Debug, Error)]
pub enum ChainError {
    /// Returned when attempting to create a chain with no sites.
    #[error("cannot build a chain of zero sites")]
    EmptyChain,

    /// Returned when a site tensor has a zero-sized axis.
    #[error("site {0} has a zero-sized tensor axis")]
    ZeroDimension(usize),

    /// Returned when the right bond of a site does not match the left bond
    /// of its right neighbor.
    #[error("bond dimension mismatch after site {site}: {right} != {left}")]
    BondMismatch { site: usize, right: usize, left: usize },

    /// Returned when a boundary tensor does not have bond dimension 1.
    #[error("chain boundary on the {side} has bond dimension {dim}, expected 1")]
    OpenBoundary { side: &'static str, dim: usize },

    /// Returned when two chains that must share site structure do not.
    #[error("chains have incompatible lengths or physical dimensions")]
    IncompatibleChains,

    /// Returned when a configuration index exceeds a physical dimension.
    #[error("configuration value {value} at site {site} exceeds physical dimension {dim}")]
    BadConfig { site: usize, value: usize, dim: usize },

    /// Returned when an operator's shape does not match the site(s) it acts
    /// on.
    #[error("operator shape incompatible with site {0}")]
    OperatorShape(usize),

    /// Returned when a chain required to be unit-norm is not, within
    /// tolerance.
    #[error("chain is not normalized: |<x|x>| = {0}")]
    NotNormalized(f64),

    /// Returned when a dense input's length does not match the declared
    /// number of sites.
    #[error("dense input of dimension {len} does not match {sites} two-level sites")]
    LengthMismatch { len: usize, sites: usize },

    #[error(transparent)]
    Svd(#[from] SvdError),

    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}
use ChainError::*;
pub type ChainResult<T> = Result<T, ChainError>;

/// An ordered chain of rank-3 site tensors in `(left, physical, right)`
/// index order, bond-consistent and closed at both boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct Mps<A>
where A: ComplexFloat
{
    pub(crate) tensors: Vec<nd::Array3<A>>, // length ≥ 1
}

pub(crate) fn tensor_norm<A>(t: &nd::Array3<A>) -> A::Real
where A: ComplexFloat
{
    Float::sqrt(
        t.iter()
            .map(|a| Float::powi((*a).abs(), 2))
            .fold(<A::Real as Zero>::zero(), |acc, x| acc + x)
    )
}

// Σ_{ij} x[i,j] y[i,j], no conjugation
pub(crate) fn pair_sum<A>(x: &nd::Array2<A>, y: &nd::Array2<A>) -> A
where A: ComplexFloat
{
    x.iter().zip(y)
        .map(|(a, b)| *a * *b)
        .fold(A::zero(), |acc, v| acc + v)
}

fn capped_pow(base: usize, exp: usize, cap: usize) -> usize {
    let mut v: usize = 1;
    for _ in 0..exp {
        v = v.saturating_mul(base);
        if v >= cap { return cap; }
    }
    v.min(cap)
}

impl<A> Index<usize> for Mps<A>
where A: ComplexFloat
{
    type Output = nd::Array3<A>;

    fn index(&self, i: usize) -> &Self::Output { &self.tensors[i] }
}

impl<A> Mps<A>
where A: ComplexFloat
{
    /// Build a chain from raw site tensors, validating the bond-matching and
    /// boundary invariants.
    pub fn from_tensors(tensors: Vec<nd::Array3<A>>) -> ChainResult<Self> {
        if tensors.is_empty() { return Err(EmptyChain); }
        for (i, t) in tensors.iter().enumerate() {
            let (l, p, r) = t.dim();
            if l == 0 || p == 0 || r == 0 { return Err(ZeroDimension(i)); }
        }
        let n = tensors.len();
        let l0 = tensors[0].dim().0;
        if l0 != 1 { return Err(OpenBoundary { side: "left", dim: l0 }); }
        let rn = tensors[n - 1].dim().2;
        if rn != 1 { return Err(OpenBoundary { side: "right", dim: rn }); }
        for i in 0..n - 1 {
            let right = tensors[i].dim().2;
            let left = tensors[i + 1].dim().0;
            if right != left {
                return Err(BondMismatch { site: i, right, left });
            }
        }
        Ok(Self { tensors })
    }

    /// Product state with each site in a definite basis state.
    pub fn basis_state(d: usize, config: &[usize]) -> ChainResult<Self>
    where A: One + Zero
    {
        if config.is_empty() { return Err(EmptyChain); }
        if d == 0 { return Err(ZeroDimension(0)); }
        let tensors: Vec<nd::Array3<A>>
            = config.iter().enumerate()
            .map(|(site, &c)| {
                if c >= d { return Err(BadConfig { site, value: c, dim: d }); }
                let mut t: nd::Array3<A> = nd::Array3::zeros((1, d, 1));
                t[[0, c, 0]] = A::one();
                Ok(t)
            })
            .collect::<ChainResult<_>>()?;
        Ok(Self { tensors })
    }

    /// Number of sites.
    pub fn len(&self) -> usize { self.tensors.len() }

    /// Always false; a chain has at least one site.
    pub fn is_empty(&self) -> bool { self.tensors.is_empty() }

    /// Borrow the site tensors.
    pub fn tensors(&self) -> &[nd::Array3<A>] { &self.tensors }

    /// Unwrap into the raw site tensors.
    pub fn into_tensors(self) -> Vec<nd::Array3<A>> { self.tensors }

    /// Dimensions of the `L - 1` internal bonds.
    pub fn bond_dims(&self) -> Vec<usize> {
        self.tensors.iter().take(self.len() - 1)
            .map(|t| t.dim().2)
            .collect()
    }

    /// Physical dimension at each site.
    pub fn phys_dims(&self) -> Vec<usize> {
        self.tensors.iter().map(|t| t.dim().1).collect()
    }

    fn same_structure(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.tensors.iter().zip(&other.tensors)
                .all(|(a, b)| a.dim().1 == b.dim().1)
    }
}

impl<A> Mps<A>
where
    A: ComplexFloat + ComplexFloatExt,
    Standard: Distribution<A::Real>,
    nd::Array2<A>: QR<Q = nd::Array2<A>, R = nd::Array2<A>>,
{
    /// Random left-canonical chain of `l` sites with physical dimension `d`
    /// and bond dimension at most `chi`.
    ///
    /// Each site tensor is the thin-QR orthogonal factor of a small random
    /// perturbation of the identity, so the chain starts close to a product
    /// state but with full-rank bonds.
    pub fn random_near_identity<R>(
        l: usize,
        chi: usize,
        d: usize,
        rng: &mut R,
    ) -> ChainResult<Self>
    where R: Rng + ?Sized
    {
        if l == 0 { return Err(EmptyChain); }
        if chi == 0 || d == 0 { return Err(ZeroDimension(0)); }
        let scale: A::Real = <A::Real as num_traits::NumCast>::from(0.05).unwrap();
        let half: A::Real = <A::Real as num_traits::NumCast>::from(0.025).unwrap();
        let mut tensors: Vec<nd::Array3<A>> = Vec::with_capacity(l);
        for i in 0..l {
            let chi1 = capped_pow(d, i.min(l - i), chi);
            let chi2 = capped_pow(d, (i + 1).min(l - i - 1), chi);
            let m = chi1 * d;
            let mat: nd::Array2<A>
                = nd::Array2::from_shape_fn((m, m), |(r, c)| {
                    let diag
                        = if r == c { <A::Real as One>::one() }
                        else { <A::Real as Zero>::zero() };
                    let re = diag + scale * rng.gen::<A::Real>() - half;
                    let im = scale * rng.gen::<A::Real>() - half;
                    A::from_components(re, im)
                });
            let (q, _) = mat.qr()?;
            let t
                = q.slice(nd::s![.., ..chi2]).to_owned()
                .into_shape((chi1, d, chi2))
                .unwrap();
            tensors.push(t);
        }
        Ok(Self { tensors })
    }
}

impl<A> Mps<A>
where A: ComplexFloat + ComplexFloatExt + nd::LinalgScalar
{
    /// Inner product `⟨self|other⟩`, conjugating `self`.
    pub fn overlap_with<B>(&self, backend: &B, other: &Self) -> ChainResult<A>
    where B: Contract<A>
    {
        if !self.same_structure(other) { return Err(IncompatibleChains); }
        let env = left_environment(backend, self, other, self.len(), None);
        Ok(env[[0, 0]])
    }

    /// [`Self::overlap_with`] on the default [`MatMul`] backend.
    pub fn overlap(&self, other: &Self) -> ChainResult<A> {
        self.overlap_with(&MatMul, other)
    }

    /// `‖self‖ = √|⟨self|self⟩|`.
    pub fn norm(&self) -> A::Real {
        let env = left_environment(&MatMul, self, self, self.len(), None);
        Float::sqrt(env[[0, 0]].abs())
    }

    /// Scale the last site tensor so the chain has unit norm; returns the
    /// previous norm.
    pub fn normalize(&mut self) -> A::Real {
        let env = left_environment(&MatMul, self, self, self.len(), None);
        let ov = env[[0, 0]];
        let norm = Float::sqrt(ov.abs());
        if !norm.is_zero() {
            let s = ComplexFloat::sqrt(ov);
            let n = self.tensors.len();
            self.tensors[n - 1].map_inplace(|x| { *x = *x / s; });
        }
        norm
    }

    /// Probability amplitude of a single basis configuration.
    pub fn amplitude(&self, config: &[usize]) -> ChainResult<A> {
        self.check_config(config)?;
        let mut m: nd::Array2<A>
            = self.tensors[0].index_axis(nd::Axis(1), config[0]).to_owned();
        for (t, &c) in self.tensors.iter().zip(config).skip(1) {
            m = m.dot(&t.index_axis(nd::Axis(1), c));
        }
        Ok(m.diag().sum())
    }

    /// Probability amplitudes of a batch of basis configurations, one
    /// configuration per row.
    pub fn amplitudes_with<B>(
        &self,
        backend: &B,
        configs: &nd::Array2<usize>,
    ) -> ChainResult<nd::Array1<A>>
    where B: Contract<A>
    {
        let (nb, width) = configs.dim();
        if width != self.len() { return Err(IncompatibleChains); }
        for row in configs.rows() {
            self.check_config(row.as_slice().ok_or(IncompatibleChains)?)?;
        }
        let gather = |site: usize| -> nd::Array3<A> {
            let t = &self.tensors[site];
            let (l, _, r) = t.dim();
            nd::Array3::from_shape_fn(
                (l, nb, r),
                |(i, b, k)| t[[i, configs[[b, site]], k]],
            )
        };
        let mut batch = gather(0);
        for site in 1..self.len() {
            batch = backend.matmul_batch(&batch, &gather(site));
        }
        let out: nd::Array1<A>
            = (0..nb)
            .map(|b| batch.index_axis(nd::Axis(1), b).diag().sum())
            .collect();
        Ok(out)
    }

    /// [`Self::amplitudes_with`] on the default [`MatMul`] backend.
    pub fn amplitudes(&self, configs: &nd::Array2<usize>)
        -> ChainResult<nd::Array1<A>>
    {
        self.amplitudes_with(&MatMul, configs)
    }

    fn check_config(&self, config: &[usize]) -> ChainResult<()> {
        if config.len() != self.len() { return Err(IncompatibleChains); }
        for (site, (&c, t)) in config.iter().zip(&self.tensors).enumerate() {
            let dim = t.dim().1;
            if c >= dim { return Err(BadConfig { site, value: c, dim }); }
        }
        Ok(())
    }

    fn check_normalized(&self) -> ChainResult<()> {
        let tol: A::Real = <A::Real as num_traits::NumCast>::from(1e-8).unwrap();
        let env = left_environment(&MatMul, self, self, self.len(), None);
        let dev = (env[[0, 0]] - A::one()).abs();
        if dev > tol {
            let mag = env[[0, 0]].abs();
            return Err(NotNormalized(
                <f64 as num_traits::NumCast>::from(mag).unwrap_or(f64::NAN)
            ));
        }
        Ok(())
    }

    // op[p, p'] t[a, p', c] -> [a, p, c]
    fn apply_site_op(op: &nd::Array2<A>, t: &nd::Array3<A>) -> nd::Array3<A> {
        let (a, p, c) = t.dim();
        let tm = t.view().permuted_axes([1, 0, 2])
            .as_standard_layout().into_owned()
            .into_shape((p, a * c))
            .unwrap();
        op.dot(&tm)
            .into_shape((p, a, c)).unwrap()
            .permuted_axes([1, 0, 2])
            .as_standard_layout()
            .into_owned()
    }

    /// Expectation value of one local operator per site, evaluated in a
    /// single environment-cached pass.
    ///
    /// The chain must be unit-norm.
    pub fn expectation_values(&self, ops: &[nd::Array2<A>])
        -> ChainResult<Vec<A>>
    {
        let n = self.len();
        if ops.len() != n { return Err(IncompatibleChains); }
        for (site, (op, t)) in ops.iter().zip(&self.tensors).enumerate() {
            let d = t.dim().1;
            if op.dim() != (d, d) { return Err(OperatorShape(site)); }
        }
        self.check_normalized()?;
        let mut lcache = EnvCache::new(n);
        left_environment(&MatMul, self, self, n, Some(&mut lcache));
        let mut rcache = EnvCache::new(n);
        right_environment(&MatMul, self, self, 0, Some(&mut rcache));
        let eye: nd::Array2<A> = nd::Array2::eye(1);
        let vals: Vec<A>
            = izip!(0..n, ops, &self.tensors)
            .map(|(site, op, t)| {
                let le
                    = if site == 0 { &eye }
                    else { lcache.get(site - 1).unwrap() };
                let re
                    = if site == n - 1 { &eye }
                    else { rcache.get(site + 1).unwrap() };
                let opt = Self::apply_site_op(op, t);
                let tmp = MatMul.env_left(le, t, &opt);
                pair_sum(&tmp, re)
            })
            .collect();
        Ok(vals)
    }

    /// Expectation value of one two-site operator per internal bond, each
    /// given as a rank-4 tensor `(out_i, out_{i+1}, in_i, in_{i+1})`.
    ///
    /// The chain must be unit-norm.
    pub fn bond_expectation_values(&self, hs: &[nd::Array4<A>])
        -> ChainResult<Vec<A>>
    {
        let n = self.len();
        if n < 2 || hs.len() != n - 1 { return Err(IncompatibleChains); }
        for (site, (h, pair)) in hs.iter().zip(self.tensors.windows(2)).enumerate() {
            let p = pair[0].dim().1;
            let q = pair[1].dim().1;
            if h.dim() != (p, q, p, q) { return Err(OperatorShape(site)); }
        }
        self.check_normalized()?;
        let mut lcache = EnvCache::new(n);
        left_environment(&MatMul, self, self, n, Some(&mut lcache));
        let mut rcache = EnvCache::new(n);
        right_environment(&MatMul, self, self, 0, Some(&mut rcache));
        let eye: nd::Array2<A> = nd::Array2::eye(1);
        let vals: Vec<A>
            = izip!(0..n - 1, hs, self.tensors.windows(2))
            .map(|(site, h, pair)| {
                let (a, p, b) = pair[0].dim();
                let (_, q, c) = pair[1].dim();
                // θ[a, (p q), c] = Σ_b A_i[a, p, b] A_{i+1}[b, q, c]
                let m1 = pair[0].view().into_shape((a * p, b)).unwrap();
                let m2 = pair[1].view().into_shape((b, q * c)).unwrap();
                let theta
                    = m1.dot(&m2).into_shape((a, p * q, c)).unwrap();
                // (H θ)[a, (p q), c] = Σ_{rs} H[(p q), (r s)] θ[a, (r s), c]
                let hm = h.view().into_shape((p * q, p * q)).unwrap();
                let tm = theta.view().permuted_axes([1, 0, 2])
                    .as_standard_layout().into_owned()
                    .into_shape((p * q, a * c))
                    .unwrap();
                let htheta = hm.dot(&tm)
                    .into_shape((p * q, a, c)).unwrap()
                    .permuted_axes([1, 0, 2])
                    .as_standard_layout()
                    .into_owned();
                let le
                    = if site == 0 { &eye }
                    else { lcache.get(site - 1).unwrap() };
                let re
                    = if site + 1 == n - 1 { &eye }
                    else { rcache.get(site + 2).unwrap() };
                let tmp = MatMul.env_left(le, &theta, &htheta);
                pair_sum(&tmp, re)
            })
            .collect();
        Ok(vals)
    }
}

impl<A> Mps<A>
where
    A: ComplexFloat + ComplexFloatExt + nd::LinalgScalar,
    nd::Array2<A>:
        SVDDC<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>
        + SVDInto<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>,
{
    /// Bring the chain to left-canonical form with a single left-to-right
    /// sweep of SVD-split and carry-absorb steps, truncating each bond per
    /// `params`.
    ///
    /// Returns the truncation error accumulated over all internal bonds.
    /// For the error accounting to be meaningful the input should be
    /// (approximately) right-canonical; with `no_trunc` the pass is a
    /// lossless gauge change and the precondition is unnecessary. The
    /// terminal tensor is renormalized when `params.normalized` is set.
    pub fn left_canonicalize_with<B>(
        &mut self,
        backend: &B,
        params: &TruncParams<A::Real>,
    ) -> ChainResult<A::Real>
    where B: Contract<A>
    {
        let n = self.tensors.len();
        let mut total = <A::Real as Zero>::zero();
        for i in 0..n - 1 {
            let t = std::mem::replace(
                &mut self.tensors[i],
                nd::Array3::zeros((0, 0, 0)),
            );
            let (iso, carry, err) = linalg::split_site_left(t, params)?;
            self.tensors[i] = iso;
            self.tensors[i + 1] = backend.absorb_left(&carry, &self.tensors[i + 1]);
            total = total + err;
        }
        if params.normalized {
            let norm = tensor_norm(&self.tensors[n - 1]);
            if !norm.is_zero() {
                self.tensors[n - 1]
                    .map_inplace(|x| { *x = *x / A::from_real(norm); });
            }
        }
        Ok(total)
    }

    /// [`Self::left_canonicalize_with`] on the default [`MatMul`] backend.
    pub fn left_canonicalize(&mut self, params: &TruncParams<A::Real>)
        -> ChainResult<A::Real>
    {
        self.left_canonicalize_with(&MatMul, params)
    }

    /// Mirror of [`Self::left_canonicalize_with`]: a single right-to-left
    /// sweep ending in right-canonical form, assuming (approximate)
    /// left-canonical input when truncating.
    pub fn right_canonicalize_with<B>(
        &mut self,
        backend: &B,
        params: &TruncParams<A::Real>,
    ) -> ChainResult<A::Real>
    where B: Contract<A>
    {
        let n = self.tensors.len();
        let mut total = <A::Real as Zero>::zero();
        for i in (1..n).rev() {
            let t = std::mem::replace(
                &mut self.tensors[i],
                nd::Array3::zeros((0, 0, 0)),
            );
            let (iso, carry, err) = linalg::split_site_right(t, params)?;
            self.tensors[i] = iso;
            self.tensors[i - 1] = backend.absorb_right(&self.tensors[i - 1], &carry);
            total = total + err;
        }
        if params.normalized {
            let norm = tensor_norm(&self.tensors[0]);
            if !norm.is_zero() {
                self.tensors[0]
                    .map_inplace(|x| { *x = *x / A::from_real(norm); });
            }
        }
        Ok(total)
    }

    /// [`Self::right_canonicalize_with`] on the default [`MatMul`] backend.
    pub fn right_canonicalize(&mut self, params: &TruncParams<A::Real>)
        -> ChainResult<A::Real>
    {
        self.right_canonicalize_with(&MatMul, params)
    }

    fn entropy_sweep<F>(&self, f: F) -> ChainResult<Vec<A::Real>>
    where F: Fn(&[A::Real]) -> A::Real
    {
        let n = self.tensors.len();
        if n == 1 { return Ok(Vec::new()); }
        let cut: A::Real = <A::Real as num_traits::NumCast>::from(1e-14).unwrap();
        let mut tensors = self.tensors.clone();
        let mut out = vec![<A::Real as Zero>::zero(); n - 1];
        for i in (1..n).rev() {
            let t = std::mem::replace(&mut tensors[i], nd::Array3::zeros((0, 0, 0)));
            let (l, p, r) = t.dim();
            let (u, s, vt) = linalg::svd_fallback(t.into_shape((l, p * r)).unwrap())?;
            let rank = s.iter().take_while(|x| **x > cut).count().max(1);
            let kept: Vec<A::Real> = s.iter().take(rank).copied().collect();
            tensors[i] = vt.slice(nd::s![..rank, ..]).to_owned()
                .into_shape((rank, p, r))
                .unwrap();
            let mut carry = u.slice(nd::s![.., ..rank]).to_owned();
            carry.axis_iter_mut(nd::Axis(1))
                .zip(&kept)
                .for_each(|(mut col, sv)| {
                    col.map_inplace(|x| { *x = *x * A::from_real(*sv); });
                });
            tensors[i - 1] = MatMul.absorb_right(&tensors[i - 1], &carry);
            out[i - 1] = f(&kept);
        }
        Ok(out)
    }

    /// Bipartite Von Neumann entanglement entropy `−Σ λ² ln λ²` at each of
    /// the `L − 1` internal cuts, read off a truncated-SVD sweep over a copy
    /// of the chain.
    ///
    /// The chain must be left-canonical and unit-norm for the singular
    /// spectra to be the Schmidt spectra.
    pub fn entanglement_entropy(&self) -> ChainResult<Vec<A::Real>> {
        self.entropy_sweep(|svals| {
            -svals.iter()
                .map(|x| {
                    let w = Float::powi(*x, 2);
                    w * Float::ln(w)
                })
                .fold(<A::Real as Zero>::zero(), |acc, x| acc + x)
        })
    }

    /// Rényi-`n` entanglement entropy `ln(Σ λ^{2n}) / (1 − n)` at each
    /// internal cut, `n ≥ 2`. Same preconditions as
    /// [`Self::entanglement_entropy`].
    pub fn renyi_entropy(&self, n: u32) -> ChainResult<Vec<A::Real>> {
        debug_assert!(n >= 2);
        let order: A::Real = <A::Real as num_traits::NumCast>::from(n).unwrap();
        self.entropy_sweep(move |svals| {
            let total = svals.iter()
                .map(|x| Float::powi(*x, 2 * n as i32))
                .fold(<A::Real as Zero>::zero(), |acc, x| acc + x);
            Float::ln(total) / (<A::Real as One>::one() - order)
        })
    }
}

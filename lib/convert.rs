//! Exact conversion between dense state vectors / operator matrices and
//! their chain factorizations, with optional truncation.
//!
//! Both directions peel two-level sites off the most significant end of the
//! dense index: a reshape exposes the site, an SVD splits it off, and the
//! `diag(S) · V†` remainder carries the rest of the amplitude data into the
//! next step. With no truncation the factorization is exact and the round
//! trip reproduces the input including its norm; with a bond cap the
//! accumulated discarded weight is returned alongside the chain.
//!
//! Operator tensors are rank 4 in `(physical-out, left bond, right bond,
//! physical-in)` index order.

use std::ops::Index;
use ndarray as nd;
use ndarray_linalg::{ SVDDC, SVDInto };
use num_complex::ComplexFloat;
use num_traits::Zero;
use crate::{
    ComplexFloatExt,
    chain::{ ChainError, ChainResult, Mps },
    linalg::{ self, TruncParams },
};

/// A matrix product operator: an ordered chain of rank-4 site tensors in
/// `(physical-out, left, right, physical-in)` index order, bond-consistent
/// and closed at both boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct Mpo<A>
where A: ComplexFloat
{
    tensors: Vec<nd::Array4<A>>, // length ≥ 1
}

impl<A> Index<usize> for Mpo<A>
where A: ComplexFloat
{
    type Output = nd::Array4<A>;

    fn index(&self, i: usize) -> &Self::Output { &self.tensors[i] }
}

impl<A> Mpo<A>
where A: ComplexFloat
{
    /// Build an operator chain from raw site tensors, validating the
    /// bond-matching and boundary invariants.
    pub fn from_tensors(tensors: Vec<nd::Array4<A>>) -> ChainResult<Self> {
        if tensors.is_empty() { return Err(ChainError::EmptyChain); }
        for (i, t) in tensors.iter().enumerate() {
            let (p, l, r, q) = t.dim();
            if p == 0 || l == 0 || r == 0 || q == 0 {
                return Err(ChainError::ZeroDimension(i));
            }
        }
        let n = tensors.len();
        let l0 = tensors[0].dim().1;
        if l0 != 1 {
            return Err(ChainError::OpenBoundary { side: "left", dim: l0 });
        }
        let rn = tensors[n - 1].dim().2;
        if rn != 1 {
            return Err(ChainError::OpenBoundary { side: "right", dim: rn });
        }
        for i in 0..n - 1 {
            let right = tensors[i].dim().2;
            let left = tensors[i + 1].dim().1;
            if right != left {
                return Err(ChainError::BondMismatch { site: i, right, left });
            }
        }
        Ok(Self { tensors })
    }

    /// Number of sites.
    pub fn len(&self) -> usize { self.tensors.len() }

    /// Always false; a chain has at least one site.
    pub fn is_empty(&self) -> bool { self.tensors.is_empty() }

    /// Borrow the site tensors.
    pub fn tensors(&self) -> &[nd::Array4<A>] { &self.tensors }

    /// Unwrap into the raw site tensors.
    pub fn into_tensors(self) -> Vec<nd::Array4<A>> { self.tensors }

    /// Dimensions of the `L - 1` internal bonds.
    pub fn bond_dims(&self) -> Vec<usize> {
        self.tensors.iter().take(self.len() - 1)
            .map(|t| t.dim().2)
            .collect()
    }
}

fn dense_dim(sites: usize) -> Option<usize> {
    2_usize.checked_pow(u32::try_from(sites).ok()?)
}

/// Factor a dense state vector over `sites` two-level sites into a chain,
/// peeling one site at a time by SVD.
///
/// `chi_max` caps every bond; singular values with relative magnitude below
/// `eps` (default `1e-14`) are discarded. Returns the chain together with
/// the accumulated discarded weight; with no cap the factorization is exact
/// and the round trip through [`mps_to_state`] reproduces `psi` including
/// its norm.
pub fn state_to_mps<A>(
    psi: &[A],
    sites: usize,
    chi_max: Option<usize>,
    eps: Option<A::Real>,
) -> ChainResult<(Mps<A>, A::Real)>
where
    A: ComplexFloat + ComplexFloatExt,
    nd::Array2<A>:
        SVDDC<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>
        + SVDInto<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>,
{
    if sites == 0 { return Err(ChainError::EmptyChain); }
    let dim = dense_dim(sites)
        .filter(|d| *d == psi.len())
        .ok_or(ChainError::LengthMismatch { len: psi.len(), sites })?;
    let params = TruncParams {
        chi_max,
        eps: eps.unwrap_or_else(|| TruncParams::<A::Real>::default().eps),
        no_trunc: false,
        normalized: false,
    };
    let mut rest: nd::Array2<A>
        = nd::Array2::from_shape_vec((1, dim), psi.to_vec()).unwrap();
    let mut tensors: Vec<nd::Array3<A>> = Vec::with_capacity(sites);
    let mut total = <A::Real as Zero>::zero();
    for _ in 0..sites {
        let (chi, rem) = rest.dim();
        let mat = rest.into_shape((chi * 2, rem / 2)).unwrap();
        let (u, s, vt) = linalg::svd_fallback(mat)?;
        let (kept, err) = linalg::truncate(s, &params);
        total = total + err;
        let rank = kept.len();
        tensors.push(
            u.slice(nd::s![.., ..rank]).to_owned()
                .into_shape((chi, 2, rank))
                .unwrap()
        );
        let mut next = vt.slice(nd::s![..rank, ..]).to_owned();
        next.axis_iter_mut(nd::Axis(0))
            .zip(&kept)
            .for_each(|(mut row, sv)| {
                row.map_inplace(|x| { *x = *x * A::from_real(*sv); });
            });
        rest = next;
    }
    // all amplitude data has been peeled off; only the overall scale remains
    assert_eq!(rest.dim(), (1, 1));
    let scale = rest[[0, 0]];
    let last = tensors.last_mut().unwrap();
    last.map_inplace(|x| { *x = *x * scale; });
    Ok((Mps::from_tensors(tensors)?, total))
}

/// Contract a chain back into its dense state vector. Lossless.
pub fn mps_to_state<A>(mps: &Mps<A>) -> nd::Array1<A>
where A: ComplexFloat + nd::LinalgScalar
{
    let (_, d0, r0) = mps[0].dim();
    let mut acc: nd::Array2<A>
        = mps[0].view().into_shape((d0, r0)).unwrap().to_owned();
    for t in &mps.tensors()[1..] {
        let (l, d, r) = t.dim();
        let tm = t.view().into_shape((l, d * r)).unwrap();
        let big = acc.dot(&tm);
        let pp = big.dim().0;
        acc = big.into_shape((pp * d, r)).unwrap();
    }
    let dim = acc.len();
    acc.into_shape(dim).unwrap()
}

/// Factor a dense operator matrix over `sites` two-level sites into an
/// operator chain, peeling one site (both physical legs) at a time by SVD.
///
/// Bonds are capped by `chi_max` and cleaned of numerically negligible
/// singular values; the accumulated discarded weight is returned alongside
/// the chain. With no cap the round trip through [`mpo_to_operator`] is
/// exact within tolerance.
pub fn operator_to_mpo<A>(
    op: &nd::Array2<A>,
    sites: usize,
    chi_max: Option<usize>,
) -> ChainResult<(Mpo<A>, A::Real)>
where
    A: ComplexFloat + ComplexFloatExt,
    nd::Array2<A>:
        SVDDC<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>
        + SVDInto<U = nd::Array2<A>, VT = nd::Array2<A>, Sigma = nd::Array1<A::Real>>,
{
    if sites == 0 { return Err(ChainError::EmptyChain); }
    let dim = dense_dim(sites)
        .filter(|d| op.dim() == (*d, *d))
        .ok_or(ChainError::LengthMismatch { len: op.dim().0, sites })?;
    let params = TruncParams {
        chi_max,
        eps: TruncParams::<A::Real>::default().eps,
        no_trunc: false,
        normalized: false,
    };
    let mut rest: nd::Array3<A>
        = op.to_owned().into_shape((1, dim, dim)).unwrap();
    let mut tensors: Vec<nd::Array4<A>> = Vec::with_capacity(sites);
    let mut total = <A::Real as Zero>::zero();
    for _ in 0..sites {
        let (chi, d1, d2) = rest.dim();
        // expose the site's out and in legs next to the bond
        let mat = rest.into_shape((chi, 2, d1 / 2, 2, d2 / 2)).unwrap()
            .permuted_axes([0, 1, 3, 2, 4])
            .as_standard_layout()
            .into_owned()
            .into_shape((chi * 4, (d1 / 2) * (d2 / 2)))
            .unwrap();
        let (u, s, vt) = linalg::svd_fallback(mat)?;
        let (kept, err) = linalg::truncate(s, &params);
        total = total + err;
        let rank = kept.len();
        let m = u.slice(nd::s![.., ..rank]).to_owned()
            .into_shape((chi, 2, 2, rank)).unwrap()
            .permuted_axes([1, 0, 3, 2])
            .as_standard_layout()
            .into_owned();
        tensors.push(m);
        let mut next = vt.slice(nd::s![..rank, ..]).to_owned();
        next.axis_iter_mut(nd::Axis(0))
            .zip(&kept)
            .for_each(|(mut row, sv)| {
                row.map_inplace(|x| { *x = *x * A::from_real(*sv); });
            });
        rest = next.into_shape((rank, d1 / 2, d2 / 2)).unwrap();
    }
    assert_eq!(rest.dim(), (1, 1, 1));
    let scale = rest[[0, 0, 0]];
    let last = tensors.last_mut().unwrap();
    last.map_inplace(|x| { *x = *x * scale; });
    Ok((Mpo::from_tensors(tensors)?, total))
}

/// Contract an operator chain back into its dense matrix. Lossless.
pub fn mpo_to_operator<A>(mpo: &Mpo<A>) -> nd::Array2<A>
where A: ComplexFloat + nd::LinalgScalar
{
    let mut op3: nd::Array3<A>
        = mpo[0].index_axis(nd::Axis(1), 0).to_owned(); // (p, bond, q)
    for t in &mpo.tensors()[1..] {
        let (pp, a, l, qq) = t.dim();
        let (p, _, q) = op3.dim();
        let lm = op3.view().permuted_axes([0, 2, 1])
            .as_standard_layout().into_owned()
            .into_shape((p * q, a))
            .unwrap();
        let rm = t.view().permuted_axes([1, 0, 2, 3])
            .as_standard_layout().into_owned()
            .into_shape((a, pp * l * qq))
            .unwrap();
        op3 = lm.dot(&rm)
            .into_shape((p, q, pp, l, qq)).unwrap()
            .permuted_axes([0, 2, 3, 1, 4]) // (p, pp, l, q, qq)
            .as_standard_layout().into_owned()
            .into_shape((p * pp, l, q * qq))
            .unwrap();
    }
    debug_assert_eq!(op3.dim().1, 1);
    op3.index_axis(nd::Axis(1), 0).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64 as C64;
    use rand::{ Rng, SeedableRng };

    fn random_state(sites: usize, seed: u64) -> Vec<C64> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..1 << sites)
            .map(|_| C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5))
            .collect()
    }

    #[test]
    fn state_round_trip_is_exact() {
        let psi = random_state(4, 31);
        let (mps, err) = state_to_mps(&psi, 4, None, None).unwrap();
        assert!(err < 1e-28);
        assert_eq!(mps.len(), 4);
        let back = mps_to_state(&mps);
        for (a, b) in back.iter().zip(&psi) {
            assert!((a - b).norm() < 1e-13);
        }
    }

    #[test]
    fn state_to_mps_rejects_bad_length() {
        let psi = vec![C64::from(1.0); 12];
        assert!(matches!(
            state_to_mps(&psi, 4, None, None),
            Err(ChainError::LengthMismatch { len: 12, sites: 4 }),
        ));
    }

    #[test]
    fn truncation_error_matches_discarded_schmidt_weight() {
        // 0.8|0000> + 0.6|0011>: Schmidt rank 2 at the third cut only
        let mut psi = vec![C64::from(0.0); 16];
        psi[0b0000] = C64::from(0.8);
        psi[0b0011] = C64::from(0.6);
        let (mps, err) = state_to_mps(&psi, 4, Some(1), None).unwrap();
        assert!((err - 0.36).abs() < 1e-14);
        assert_eq!(mps.bond_dims(), vec![1, 1, 1]);
        let back = mps_to_state(&mps);
        assert!((back[0b0000] - C64::from(0.8)).norm() < 1e-13);
        assert!(back[0b0011].norm() < 1e-13);
    }

    #[test]
    fn capped_bond_dimensions_are_respected() {
        let psi = random_state(5, 32);
        let (mps, _) = state_to_mps(&psi, 5, Some(2), None).unwrap();
        assert!(mps.bond_dims().iter().all(|d| *d <= 2));
    }

    #[test]
    fn identity_operator_round_trip() {
        let eye: nd::Array2<C64> = nd::Array2::eye(8);
        let (mpo, err) = operator_to_mpo(&eye, 3, None).unwrap();
        assert!(err < 1e-28);
        // the identity factors with trivial bonds
        assert_eq!(mpo.bond_dims(), vec![1, 1]);
        let back = mpo_to_operator(&mpo);
        for ((i, j), v) in back.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((v - C64::from(expected)).norm() < 1e-13);
        }
    }

    #[test]
    fn random_operator_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(33);
        let op: nd::Array2<C64>
            = nd::Array2::from_shape_fn((4, 4), |_| {
                C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
            });
        let (mpo, err) = operator_to_mpo(&op, 2, None).unwrap();
        assert!(err < 1e-28);
        let back = mpo_to_operator(&mpo);
        for (a, b) in back.iter().zip(op.iter()) {
            assert!((a - b).norm() < 1e-13);
        }
    }

    #[test]
    fn mpo_from_tensors_rejects_bad_bonds() {
        let t0: nd::Array4<C64> = nd::Array4::zeros((2, 1, 3, 2));
        let t1: nd::Array4<C64> = nd::Array4::zeros((2, 2, 1, 2));
        assert!(matches!(
            Mpo::from_tensors(vec![t0, t1]),
            Err(ChainError::BondMismatch { site: 0, right: 3, left: 2 }),
        ));
    }
}

//! Pluggable dense tensor contraction primitives.
//!
//! Every contraction the sweep engines perform reduces to a handful of fixed
//! index patterns on rank-2 and rank-3 tensors; [`Contract`] names exactly
//! those patterns. The backend is chosen once and passed into the engines
//! explicitly — there is no module-level default probed at runtime. The
//! provided implementation, [`MatMul`], reshapes each pattern to a matrix
//! product and defers to the BLAS-backed [`ndarray::Dot`].
//!
//! Environments are `[up-bond, down-bond]` matrices; the "up" chain is
//! always the one taken in complex conjugate.

use ndarray as nd;
use num_complex::ComplexFloat;

/// Capability interface for the contraction patterns used by the
/// canonicalization, environment, and compression engines.
pub trait Contract<A>
where A: ComplexFloat + nd::LinalgScalar
{
    /// `m[i, j] · t[j, p, r] -> [i, p, r]` — absorb a carry matrix into the
    /// left bond of a site tensor.
    fn absorb_left(&self, m: &nd::Array2<A>, t: &nd::Array3<A>) -> nd::Array3<A>;

    /// `t[l, p, j] · m[j, k] -> [l, p, k]` — absorb a carry matrix into the
    /// right bond of a site tensor.
    fn absorb_right(&self, t: &nd::Array3<A>, m: &nd::Array2<A>) -> nd::Array3<A>;

    /// Advance a left environment past one site:
    /// `env[a, b], conj(up)[a, p, c], down[b, p, d] -> [c, d]`.
    fn env_left(
        &self,
        env: &nd::Array2<A>,
        up: &nd::Array3<A>,
        down: &nd::Array3<A>,
    ) -> nd::Array2<A>;

    /// Advance a right environment past one site:
    /// `conj(up)[a, p, b], down[c, p, d], env[b, d] -> [a, c]`.
    fn env_right(
        &self,
        up: &nd::Array3<A>,
        down: &nd::Array3<A>,
        env: &nd::Array2<A>,
    ) -> nd::Array2<A>;

    /// Locally optimal site update for compression:
    /// `left[i, j], t[j, p, l], right[m, l] -> [i, p, m]`.
    fn local_update(
        &self,
        left: &nd::Array2<A>,
        t: &nd::Array3<A>,
        right: &nd::Array2<A>,
    ) -> nd::Array3<A>;

    /// Batched matrix product over the middle axis:
    /// `a[i, n, r] · b[r, n, j] -> [i, n, j]`.
    fn matmul_batch(&self, a: &nd::Array3<A>, b: &nd::Array3<A>) -> nd::Array3<A>;
}

/// Reshape-to-matrix contraction backend on top of [`ndarray::Dot`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MatMul;

impl<A> Contract<A> for MatMul
where A: ComplexFloat + nd::LinalgScalar
{
    fn absorb_left(&self, m: &nd::Array2<A>, t: &nd::Array3<A>) -> nd::Array3<A> {
        let (j, p, r) = t.dim();
        let i = m.dim().0;
        let tm = t.view().into_shape((j, p * r)).unwrap();
        m.dot(&tm).into_shape((i, p, r)).unwrap()
    }

    fn absorb_right(&self, t: &nd::Array3<A>, m: &nd::Array2<A>) -> nd::Array3<A> {
        let (l, p, j) = t.dim();
        let k = m.dim().1;
        let tm = t.view().into_shape((l * p, j)).unwrap();
        tm.dot(m).into_shape((l, p, k)).unwrap()
    }

    fn env_left(
        &self,
        env: &nd::Array2<A>,
        up: &nd::Array3<A>,
        down: &nd::Array3<A>,
    ) -> nd::Array2<A> {
        let (a, p, c) = up.dim();
        let (b, pd, d) = down.dim();
        debug_assert_eq!(p, pd);
        debug_assert_eq!(env.dim(), (a, b));
        let upc = up.mapv(|x| x.conj());
        let upm = upc.view().into_shape((a, p * c)).unwrap();
        // [b, p * c] -> [b * p, c]
        let t = env.t().dot(&upm).into_shape((b * p, c)).unwrap();
        let downm = down.view().into_shape((b * p, d)).unwrap();
        t.t().dot(&downm)
    }

    fn env_right(
        &self,
        up: &nd::Array3<A>,
        down: &nd::Array3<A>,
        env: &nd::Array2<A>,
    ) -> nd::Array2<A> {
        let (a, p, b) = up.dim();
        let (c, pd, d) = down.dim();
        debug_assert_eq!(p, pd);
        debug_assert_eq!(env.dim(), (b, d));
        let upc = up.mapv(|x| x.conj());
        let upm = upc.view().into_shape((a * p, b)).unwrap();
        // [a * p, d] -> [a, p * d]
        let t = upm.dot(env).into_shape((a, p * d)).unwrap();
        let downm = down.view().into_shape((c, p * d)).unwrap();
        t.dot(&downm.t())
    }

    fn local_update(
        &self,
        left: &nd::Array2<A>,
        t: &nd::Array3<A>,
        right: &nd::Array2<A>,
    ) -> nd::Array3<A> {
        let (j, p, l) = t.dim();
        let i = left.dim().0;
        let m = right.dim().0;
        debug_assert_eq!(left.dim().1, j);
        debug_assert_eq!(right.dim().1, l);
        let tm = t.view().into_shape((j, p * l)).unwrap();
        // [i, p * l] -> [i * p, l]
        let lt = left.dot(&tm).into_shape((i * p, l)).unwrap();
        lt.dot(&right.t()).into_shape((i, p, m)).unwrap()
    }

    fn matmul_batch(&self, a: &nd::Array3<A>, b: &nd::Array3<A>) -> nd::Array3<A> {
        let (i, n, r) = a.dim();
        let (rb, nb, j) = b.dim();
        debug_assert_eq!(n, nb);
        debug_assert_eq!(r, rb);
        let mut out: nd::Array3<A> = nd::Array3::zeros((i, n, j));
        for k in 0..n {
            let m = a.index_axis(nd::Axis(1), k)
                .dot(&b.index_axis(nd::Axis(1), k));
            out.index_axis_mut(nd::Axis(1), k).assign(&m);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;
    use num_complex::Complex64 as C64;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    #[test]
    fn absorb_left_matches_loops() {
        let m: nd::Array2<C64>
            = nd::Array2::from_shape_fn((2, 3), |(i, j)| {
                c((i + 2 * j) as f64, 1.0)
            });
        let t: nd::Array3<C64>
            = nd::Array3::from_shape_fn((3, 2, 2), |(j, p, r)| {
                c(j as f64, (p + r) as f64)
            });
        let out = MatMul.absorb_left(&m, &t);
        let expected = nd::Array3::from_shape_fn((2, 2, 2), |(i, p, r)| {
            (0..3).map(|j| m[[i, j]] * t[[j, p, r]])
                .fold(C64::from(0.0), |acc, x| acc + x)
        });
        assert!((&out - &expected).iter().all(|x| x.norm() < 1e-13));
    }

    #[test]
    fn env_left_matches_loops() {
        let env: nd::Array2<C64>
            = nd::Array2::from_shape_fn((2, 3), |(a, b)| c(a as f64, b as f64));
        let up: nd::Array3<C64>
            = nd::Array3::from_shape_fn((2, 2, 3), |(a, p, cc)| {
                c((a * p) as f64, cc as f64)
            });
        let down: nd::Array3<C64>
            = nd::Array3::from_shape_fn((3, 2, 2), |(b, p, d)| {
                c(b as f64 - 1.0, (p * d) as f64)
            });
        let out = MatMul.env_left(&env, &up, &down);
        let expected = nd::Array2::from_shape_fn((3, 2), |(cc, d)| {
            let mut acc = C64::from(0.0);
            for a in 0..2 { for b in 0..3 { for p in 0..2 {
                acc += env[[a, b]] * up[[a, p, cc]].conj() * down[[b, p, d]];
            } } }
            acc
        });
        assert!((&out - &expected).iter().all(|x| x.norm() < 1e-13));
    }

    #[test]
    fn env_right_matches_loops() {
        let env: nd::Array2<C64>
            = nd::Array2::from_shape_fn((3, 2), |(b, d)| c(b as f64, d as f64));
        let up: nd::Array3<C64>
            = nd::Array3::from_shape_fn((2, 2, 3), |(a, p, b)| {
                c(a as f64, (p + b) as f64)
            });
        let down: nd::Array3<C64>
            = nd::Array3::from_shape_fn((2, 2, 2), |(cc, p, d)| {
                c((cc + p) as f64, d as f64)
            });
        let out = MatMul.env_right(&up, &down, &env);
        let expected = nd::Array2::from_shape_fn((2, 2), |(a, cc)| {
            let mut acc = C64::from(0.0);
            for b in 0..3 { for d in 0..2 { for p in 0..2 {
                acc += up[[a, p, b]].conj() * down[[cc, p, d]] * env[[b, d]];
            } } }
            acc
        });
        assert!((&out - &expected).iter().all(|x| x.norm() < 1e-13));
    }

    #[test]
    fn local_update_matches_loops() {
        let left: nd::Array2<C64>
            = nd::Array2::from_shape_fn((2, 3), |(i, j)| c(i as f64, j as f64));
        let t: nd::Array3<C64>
            = nd::Array3::from_shape_fn((3, 2, 4), |(j, p, l)| {
                c((j + p) as f64, l as f64)
            });
        let right: nd::Array2<C64>
            = nd::Array2::from_shape_fn((2, 4), |(m, l)| c(m as f64, -(l as f64)));
        let out = MatMul.local_update(&left, &t, &right);
        let expected = nd::Array3::from_shape_fn((2, 2, 2), |(i, p, m)| {
            let mut acc = C64::from(0.0);
            for j in 0..3 { for l in 0..4 {
                acc += left[[i, j]] * t[[j, p, l]] * right[[m, l]];
            } }
            acc
        });
        assert!((&out - &expected).iter().all(|x| x.norm() < 1e-13));
    }

    #[test]
    fn matmul_batch_matches_per_sample() {
        let a: nd::Array3<C64>
            = nd::Array3::from_shape_fn((2, 3, 2), |(i, n, r)| {
                c((i + n) as f64, r as f64)
            });
        let b: nd::Array3<C64>
            = nd::Array3::from_shape_fn((2, 3, 2), |(r, n, j)| {
                c(r as f64, (n * j) as f64)
            });
        let out = MatMul.matmul_batch(&a, &b);
        for n in 0..3 {
            let m = a.index_axis(nd::Axis(1), n)
                .dot(&b.index_axis(nd::Axis(1), n));
            assert!(
                (&out.index_axis(nd::Axis(1), n) - &m).iter()
                    .all(|x| x.norm() < 1e-13)
            );
        }
    }
}

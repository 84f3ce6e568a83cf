//! Left/right partial-contraction environments and their per-sweep cache.
//!
//! An environment is the contraction of an "up" chain (taken in complex
//! conjugate) against a "down" chain over all sites on one side of a cut,
//! leaving a `[up-bond, down-bond]` matrix (`1×1` at the boundary):
//!
//! ```text
//! |----------------  ----            ----  ----------------|
//! | left              |                |             right |
//! | environment       | site           | site  environment |
//! |----------------  ----            ----  ----------------|
//!   0 .. site-1                             site+1 .. L-1
//! ```
//!
//! Rebuilding an environment from the boundary costs *O*(L) contractions;
//! the sweep engines instead pass an [`EnvCache`] so every intermediate
//! environment produced on the way to a cut is stored and later queries
//! reuse the partial results. Entries are invalidated explicitly when a
//! sweep moves past them; they are never left stale.

use ndarray as nd;
use num_complex::ComplexFloat;
use crate::chain::Mps;
use crate::contract::Contract;

/// Per-sweep store of partial environments, one slot per site.
///
/// Slot `i` of a left cache holds the contraction of sites `0 ..= i`; slot
/// `i` of a right cache holds the contraction of sites `i ..= L-1`. Which
/// interpretation applies is up to the sweep that owns the cache.
#[derive(Clone, Debug)]
pub struct EnvCache<A>
where A: ComplexFloat
{
    slots: Vec<Option<nd::Array2<A>>>,
}

impl<A> EnvCache<A>
where A: ComplexFloat
{
    /// Create an empty cache with one slot per site.
    pub fn new(len: usize) -> Self {
        Self { slots: (0..len).map(|_| None).collect() }
    }

    /// Number of slots.
    pub fn len(&self) -> usize { self.slots.len() }

    /// True if no slot is occupied.
    pub fn is_empty(&self) -> bool { self.slots.iter().all(|s| s.is_none()) }

    /// Fetch the environment stored for site `i`, if still valid.
    pub fn get(&self, i: usize) -> Option<&nd::Array2<A>> {
        self.slots.get(i).and_then(|s| s.as_ref())
    }

    /// Store the environment for site `i`.
    pub fn set(&mut self, i: usize, env: nd::Array2<A>) {
        self.slots[i] = Some(env);
    }

    /// Mark the entry for site `i` stale.
    pub fn invalidate(&mut self, i: usize) {
        self.slots[i] = None;
    }
}

/// Contract the left environment of `site`: all sites `0 .. site`, with the
/// `up` chain conjugated.
///
/// When a cache is provided, the environment including each intermediate
/// site is recorded in the corresponding slot on the way. Chains must have
/// equal length and matching physical dimensions.
pub fn left_environment<A, B>(
    backend: &B,
    up: &Mps<A>,
    down: &Mps<A>,
    site: usize,
    mut cache: Option<&mut EnvCache<A>>,
) -> nd::Array2<A>
where
    A: ComplexFloat + nd::LinalgScalar,
    B: Contract<A>,
{
    let mut env: nd::Array2<A> = nd::Array2::eye(1);
    for idx in 0..site {
        env = backend.env_left(&env, &up[idx], &down[idx]);
        if let Some(cache) = cache.as_mut() {
            cache.set(idx, env.clone());
        }
    }
    env
}

/// Contract the right environment of `site`: all sites `site + 1 .. L`,
/// with the `up` chain conjugated. Mirror of [`left_environment`].
pub fn right_environment<A, B>(
    backend: &B,
    up: &Mps<A>,
    down: &Mps<A>,
    site: usize,
    mut cache: Option<&mut EnvCache<A>>,
) -> nd::Array2<A>
where
    A: ComplexFloat + nd::LinalgScalar,
    B: Contract<A>,
{
    let n = up.len();
    let mut env: nd::Array2<A> = nd::Array2::eye(1);
    for idx in (site + 1..n).rev() {
        env = backend.env_right(&up[idx], &down[idx], &env);
        if let Some(cache) = cache.as_mut() {
            cache.set(idx, env.clone());
        }
    }
    env
}

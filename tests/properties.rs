//! End-to-end properties of the chain algorithms, exercised through the
//! public API with `Complex64`.

use ndarray as nd;
use num_complex::Complex64 as C64;
use once_cell::sync::Lazy;
use rand::{ Rng, SeedableRng };
use tensor_chain::{
    Mps,
    chain::ChainError,
    compress::{ compress_variational, CompressOptions },
    convert::{ mpo_to_operator, mps_to_state, operator_to_mpo, state_to_mps },
    linalg::TruncParams,
};

const SQRT_HALF: f64 = std::f64::consts::FRAC_1_SQRT_2;

// (|0000> + |1111>) / sqrt(2)
static BELL4: Lazy<Vec<C64>> = Lazy::new(|| {
    let mut psi = vec![C64::from(0.0); 16];
    psi[0b0000] = C64::from(SQRT_HALF);
    psi[0b1111] = C64::from(SQRT_HALF);
    psi
});

// 0.8|0000> + 0.6|0011>: Schmidt rank 2 at the third cut only
static SKEWED4: Lazy<Vec<C64>> = Lazy::new(|| {
    let mut psi = vec![C64::from(0.0); 16];
    psi[0b0000] = C64::from(0.8);
    psi[0b0011] = C64::from(0.6);
    psi
});

static PAULI_Z: Lazy<nd::Array2<C64>> = Lazy::new(|| {
    nd::array![
        [C64::from(1.0), C64::from(0.0)],
        [C64::from(0.0), C64::from(-1.0)],
    ]
});

fn rng(seed: u64) -> rand::rngs::StdRng {
    rand::rngs::StdRng::seed_from_u64(seed)
}

fn random_state(sites: usize, seed: u64) -> Vec<C64> {
    let mut rng = rng(seed);
    (0..1_usize << sites)
        .map(|_| C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5))
        .collect()
}

fn no_trunc() -> TruncParams<f64> {
    TruncParams { no_trunc: true, normalized: false, ..Default::default() }
}

#[test]
fn state_round_trip_is_exact_including_norm() {
    let psi = random_state(5, 101);
    let (mps, err) = state_to_mps(&psi, 5, None, None).unwrap();
    assert!(err < 1e-28);
    let back = mps_to_state(&mps);
    for (a, b) in back.iter().zip(&psi) {
        assert!((a - b).norm() < 1e-13);
    }
}

#[test]
fn canonicalization_is_idempotent_and_lossless() {
    let psi = random_state(5, 102);
    let (mut mps, _) = state_to_mps(&psi, 5, None, None).unwrap();
    let e1 = mps.right_canonicalize(&no_trunc()).unwrap();
    let once = mps.clone();
    let e2 = mps.right_canonicalize(&no_trunc()).unwrap();
    assert_eq!(e1, 0.0);
    assert_eq!(e2, 0.0);
    // a second pass is a trivial gauge change: same state, same amplitudes
    let a = mps_to_state(&once);
    let b = mps_to_state(&mps);
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).norm() < 1e-12);
    }
    // and the right-orthogonality identity holds at every site past the first
    for t in &mps.tensors()[1..] {
        let (l, p, r) = t.dim();
        let m = t.view().into_shape((l, p * r)).unwrap();
        let g = m.dot(&m.t().mapv(|x| x.conj()));
        for i in 0..l {
            for j in 0..l {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((g[[i, j]] - C64::from(expected)).norm() < 1e-12);
            }
        }
    }
}

#[test]
fn lossless_sweeps_preserve_the_norm() {
    let psi: Vec<C64>
        = random_state(4, 103).into_iter().map(|x| x * C64::from(2.0)).collect();
    let (mut mps, _) = state_to_mps(&psi, 4, None, None).unwrap();
    let norm = mps.norm();
    mps.right_canonicalize(&no_trunc()).unwrap();
    assert!((mps.norm() - norm).abs() < 1e-12);
    mps.left_canonicalize(&no_trunc()).unwrap();
    assert!((mps.norm() - norm).abs() < 1e-12);
}

#[test]
fn truncated_sweep_reports_the_discarded_weight() {
    let (mut mps, _) = state_to_mps(&SKEWED4, 4, None, None).unwrap();
    let err = mps.right_canonicalize(&TruncParams::chi(1)).unwrap();
    assert!((err - 0.36).abs() < 1e-13);
    assert_eq!(mps.bond_dims(), vec![1, 1, 1]);
    // kept values were renormalized, so the result is a unit-norm chain
    assert!((mps.norm() - 1.0).abs() < 1e-12);
}

#[test]
fn compression_error_shrinks_with_bond_dimension() {
    let mut target: Mps<C64>
        = Mps::random_near_identity(6, 4, 2, &mut rng(104)).unwrap();
    let opts = CompressOptions { tol: 1e-12, ..Default::default() };
    let mut errs: Vec<f64> = Vec::new();
    for chi in [1, 2, 4] {
        let mut trial: Mps<C64>
            = Mps::random_near_identity(6, chi, 2, &mut rng(105)).unwrap();
        errs.push(compress_variational(&mut trial, &mut target, &opts).unwrap());
    }
    assert!(errs[0] + 1e-10 >= errs[1]);
    assert!(errs[1] + 1e-10 >= errs[2]);
    assert!(errs[2].abs() < 1e-10);
}

#[test]
fn compression_onto_one_schmidt_vector_hits_the_known_bound() {
    let (mut target, err) = state_to_mps(&SKEWED4, 4, None, None).unwrap();
    assert!(err < 1e-28);
    let mut trial: Mps<C64>
        = Mps::random_near_identity(4, 1, 2, &mut rng(106)).unwrap();
    let opts = CompressOptions { tol: 1e-12, ..Default::default() };
    let err = compress_variational(&mut trial, &mut target, &opts).unwrap();
    assert!((err - 0.36).abs() < 1e-8);
    // the optimum is the dominant Schmidt vector
    let a = trial.amplitude(&[0, 0, 0, 0]).unwrap();
    assert!((a.norm() - 1.0).abs() < 1e-6);
}

#[test]
fn compression_rejects_an_unnormalized_trial() {
    let mut target: Mps<C64>
        = Mps::random_near_identity(4, 2, 2, &mut rng(107)).unwrap();
    let trial: Mps<C64>
        = Mps::random_near_identity(4, 2, 2, &mut rng(108)).unwrap();
    let mut tensors = trial.into_tensors();
    tensors[0].map_inplace(|x| { *x *= C64::from(2.0); });
    let mut trial = Mps::from_tensors(tensors).unwrap();
    assert!(matches!(
        compress_variational(&mut trial, &mut target, &CompressOptions::default()),
        Err(ChainError::NotNormalized(_)),
    ));
}

#[test]
fn identity_mpo_round_trip() {
    let eye: nd::Array2<C64> = nd::Array2::eye(4);
    let (mpo, err) = operator_to_mpo(&eye, 2, None).unwrap();
    assert!(err < 1e-28);
    let back = mpo_to_operator(&mpo);
    for ((i, j), v) in back.indexed_iter() {
        let expected = if i == j { 1.0 } else { 0.0 };
        assert!((v - C64::from(expected)).norm() < 1e-13);
    }
}

#[test]
fn bell_state_entropy_is_ln_2_at_every_cut() {
    let (mps, _) = state_to_mps(&BELL4, 4, None, None).unwrap();
    let vn = mps.entanglement_entropy().unwrap();
    assert_eq!(vn.len(), 3);
    for s in &vn {
        assert!((s - std::f64::consts::LN_2).abs() < 1e-12);
    }
    // all Renyi entropies of a flat two-value spectrum coincide
    let r2 = mps.renyi_entropy(2).unwrap();
    for s in &r2 {
        assert!((s - std::f64::consts::LN_2).abs() < 1e-12);
    }
}

#[test]
fn product_state_entropy_is_zero() {
    let mps: Mps<C64> = Mps::basis_state(2, &[0, 1, 1, 0]).unwrap();
    for s in mps.entanglement_entropy().unwrap() {
        assert!(s.abs() < 1e-12);
    }
}

#[test]
fn bell_state_local_z_vanishes_but_zz_does_not() {
    let (mps, _) = state_to_mps(&BELL4, 4, None, None).unwrap();
    let ops: Vec<nd::Array2<C64>> = vec![PAULI_Z.clone(); 4];
    for v in mps.expectation_values(&ops).unwrap() {
        assert!(v.norm() < 1e-12);
    }
    let mut zz: nd::Array4<C64> = nd::Array4::zeros((2, 2, 2, 2));
    for p in 0..2 {
        for q in 0..2 {
            let sign = if p == q { 1.0 } else { -1.0 };
            zz[[p, q, p, q]] = C64::from(sign);
        }
    }
    for v in mps.bond_expectation_values(&vec![zz; 3]).unwrap() {
        assert!((v - C64::from(1.0)).norm() < 1e-12);
    }
}

#[test]
fn batched_amplitudes_agree_with_dense_vector() {
    let psi = random_state(4, 109);
    let (mps, _) = state_to_mps(&psi, 4, None, None).unwrap();
    let configs: nd::Array2<usize>
        = nd::array![
            [0, 0, 0, 0],
            [0, 1, 0, 1],
            [1, 1, 1, 1],
        ];
    let amps = mps.amplitudes(&configs).unwrap();
    for (b, row) in configs.rows().into_iter().enumerate() {
        let idx: usize = row.iter().fold(0, |acc, &c| (acc << 1) | c);
        assert!((amps[b] - psi[idx]).norm() < 1e-13);
    }
}

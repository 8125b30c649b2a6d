use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

impl MatOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn normalize_columns_inplace(&mut self) {
        self.column_iter_mut().for_each(|mut x_j| {
            let denom = x_j.norm();
            if denom > 0.0 {
                x_j /= denom;
            }
        });
    }

    fn normalize_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.normalize_columns_inplace();
        ret
    }
}

impl SampleOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn runif(dd: usize, nn: usize) -> Self::Mat {
        let rvec = (0..(dd * nn))
            .into_par_iter()
            .map_init(rand::rng, |rng, _| rng.random::<f32>())
            .collect();
        DMatrix::<f32>::from_vec(dd, nn, rvec)
    }

    fn rnorm_seeded(dd: usize, nn: usize, seed: u64) -> Self::Mat {
        let mut rng = StdRng::seed_from_u64(seed);
        DMatrix::<f32>::from_fn(dd, nn, |_, _| rng.sample(StandardNormal))
    }
}

/// Squared Euclidean distance between two slices
pub fn squared_distance(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y.iter()).map(|(a, b)| (a - b) * (a - b)).sum()
}

/// `1 - cos(x, y)`; a zero vector is at distance 1 from anything
pub fn cosine_distance(x: &[f32], y: &[f32]) -> f32 {
    let (mut xy, mut xx, mut yy) = (0_f32, 0_f32, 0_f32);
    for (a, b) in x.iter().zip(y.iter()) {
        xy += a * b;
        xx += a * a;
        yy += b * b;
    }
    let denom = (xx * yy).sqrt();
    if denom > 0.0 {
        (1.0 - xy / denom).max(0.0)
    } else {
        1.0
    }
}

/// Stable softmax of `-distances`, used as kNN regression weights
pub fn softmax_neg(distances: &[f32]) -> Vec<f32> {
    let dmin = distances.iter().cloned().fold(f32::INFINITY, f32::min);
    let w: Vec<f32> = distances.iter().map(|d| (dmin - d).exp()).collect();
    let tot: f32 = w.iter().sum();
    if tot > 0.0 && tot.is_finite() {
        w.into_iter().map(|x| x / tot).collect()
    } else {
        vec![1.0 / distances.len().max(1) as f32; distances.len()]
    }
}

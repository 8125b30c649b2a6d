use crate::traits::SampleOps;
use nalgebra::{DMatrix, DVector};

type Mat = DMatrix<f32>;
type DVec = DVector<f32>;

pub trait RSVD {
    /// `(U, d, V)` truncated to `rank` components
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, DVec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, DVec, Mat)> {
        let default_iter = 5;
        let mut rsvd = RandomizedSVD::new(rank, default_iter);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Range finder with subspace (power) iterations, Alg 4.4 of Halko
/// et al. (2009), followed by an exact SVD of the small projected
/// matrix. Signs are fixed so that the largest-magnitude entry of each
/// left singular vector is positive.
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    oversample: usize,
    seed: u64,
    u_vectors: Mat,
    singular_values: DVec,
    v_vectors: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize) -> Self {
        Self {
            max_rank,
            iter,
            oversample: 10,
            seed: 42,
            u_vectors: Mat::zeros(0, 0),
            singular_values: DVec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &DVec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();
        let full = nr.min(nc);

        let rank = if self.max_rank > 0 {
            self.max_rank.min(full)
        } else {
            full
        };

        if rank == 0 {
            anyhow::bail!("randomized SVD on an empty [{} x {}] matrix", nr, nc);
        }

        let ll = (rank + self.oversample).min(full);
        let qq = self.range_finder(xx, ll);

        let bb = qq.transpose() * xx;
        let svd = bb.svd(true, true);

        let (svd_u, svd_vt) = match (svd.u, svd.v_t) {
            (Some(u), Some(vt)) => (u, vt),
            _ => anyhow::bail!("SVD failed"),
        };

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
        order.truncate(rank);

        let uu = &qq * svd_u;
        let vv = svd_vt.transpose();

        let mut u_vectors = Mat::zeros(nr, rank);
        let mut v_vectors = Mat::zeros(nc, rank);
        let mut singular_values = DVec::zeros(rank);

        for (k, &j) in order.iter().enumerate() {
            let u_j = uu.column(j);
            let pivot = u_j.iter().cloned().fold(0_f32, |acc, x| {
                if x.abs() > acc.abs() {
                    x
                } else {
                    acc
                }
            });
            let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
            u_vectors.column_mut(k).copy_from(&(u_j * sign));
            v_vectors.column_mut(k).copy_from(&(vv.column(j) * sign));
            singular_values[k] = svd.singular_values[j];
        }

        self.u_vectors = u_vectors;
        self.v_vectors = v_vectors;
        self.singular_values = singular_values;
        Ok(())
    }

    // Find an orthonormal matrix qq whose range approximates the range of xx
    fn range_finder(&self, xx: &Mat, ll: usize) -> Mat {
        let omega = Mat::rnorm_seeded(xx.ncols(), ll, self.seed);
        let mut qq = (xx * omega).qr().q();

        for _ in 0..self.iter {
            let zz = (xx.transpose() * &qq).qr().q();
            qq = (xx * zz).qr().q();
        }
        qq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn recovers_low_rank_matrix() -> anyhow::Result<()> {
        let aa = Mat::rnorm_seeded(40, 3, 1);
        let bb = Mat::rnorm_seeded(3, 25, 2);
        let xx = &aa * &bb;

        let (u, d, v) = xx.rsvd(3)?;
        assert_eq!(u.shape(), (40, 3));
        assert_eq!(v.shape(), (25, 3));
        assert!(d[0] >= d[1] && d[1] >= d[2]);

        let xhat = &u * DMatrix::from_diagonal(&d) * v.transpose();
        assert_abs_diff_eq!(xx, xhat, epsilon = 1e-2);

        let utu = u.transpose() * &u;
        assert_abs_diff_eq!(utu, Mat::identity(3, 3), epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn rank_is_capped() -> anyhow::Result<()> {
        let xx = Mat::identity(5, 5);
        let (u, d, _) = xx.rsvd(10)?;
        assert_eq!(u.ncols(), 5);
        assert_eq!(d.len(), 5);
        Ok(())
    }
}

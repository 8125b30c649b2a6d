//! K-means clustering of matrix columns
//!
//! Wraps the `clustering` crate and summarizes the membership into
//! centroid columns.

use nalgebra::DMatrix;

/// Arguments for k-means clustering
#[derive(Debug, Clone)]
pub struct KmeansArgs {
    /// Number of clusters
    pub num_clusters: usize,
    /// Maximum number of iterations
    pub max_iter: usize,
}

impl Default for KmeansArgs {
    fn default() -> Self {
        Self {
            num_clusters: 1,
            max_iter: 100,
        }
    }
}

impl KmeansArgs {
    /// Create args with specified number of clusters
    pub fn with_clusters(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            ..Default::default()
        }
    }
}

/// Trait for k-means clustering on matrix columns
pub trait Kmeans {
    /// Cluster columns and return membership vector, one per column
    fn kmeans_columns(&self, args: KmeansArgs) -> Vec<usize>;

    /// Cluster columns and return the `d x k` matrix of cluster means.
    /// Clusters that end up empty are dropped, so `k` may be smaller
    /// than requested.
    fn kmeans_centroids(&self, args: KmeansArgs) -> DMatrix<f32>;
}

impl Kmeans for DMatrix<f32> {
    fn kmeans_columns(&self, args: KmeansArgs) -> Vec<usize> {
        let num_clusters = args.num_clusters.min(self.ncols());
        if num_clusters <= 1 || self.ncols() == 0 {
            return vec![0; self.ncols()];
        }

        let data: Vec<Vec<f64>> = self
            .column_iter()
            .map(|x| x.iter().map(|&v| v as f64).collect())
            .collect();

        let clust = clustering::kmeans(num_clusters, &data, args.max_iter);
        clust.membership
    }

    fn kmeans_centroids(&self, args: KmeansArgs) -> DMatrix<f32> {
        let membership = self.kmeans_columns(args);
        let kk = membership.iter().max().map(|&k| k + 1).unwrap_or(0);

        let mut sums = DMatrix::<f32>::zeros(self.nrows(), kk);
        let mut sizes = vec![0_usize; kk];

        for (j, &k) in membership.iter().enumerate() {
            let mut s_k = sums.column_mut(k);
            s_k += self.column(j);
            sizes[k] += 1;
        }

        let nonempty: Vec<usize> = (0..kk).filter(|&k| sizes[k] > 0).collect();
        DMatrix::<f32>::from_fn(self.nrows(), nonempty.len(), |i, c| {
            let k = nonempty[c];
            sums[(i, k)] / sizes[k] as f32
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmeans_columns_single_cluster() {
        let mat = DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        let membership = mat.kmeans_columns(KmeansArgs::with_clusters(1));

        assert_eq!(membership.len(), 4);
        assert!(membership.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_kmeans_centroids_two_clusters() {
        let mat = DMatrix::from_row_slice(
            2,
            6,
            &[
                0.0, 0.1, 0.2, 10.0, 10.1, 10.2, // row 0
                0.0, 0.1, 0.0, 10.0, 10.1, 10.2, // row 1
            ],
        );

        let membership = mat.kmeans_columns(KmeansArgs::with_clusters(2));
        assert_eq!(membership[0], membership[1]);
        assert_eq!(membership[3], membership[5]);
        assert_ne!(membership[0], membership[3]);

        let centroids = mat.kmeans_centroids(KmeansArgs::with_clusters(2));
        assert_eq!(centroids.shape(), (2, 2));
        let mut firsts: Vec<f32> = centroids.row(0).iter().cloned().collect();
        firsts.sort_by(|a, b| a.total_cmp(b));
        assert!((firsts[0] - 0.1).abs() < 1e-4);
        assert!((firsts[1] - 10.1).abs() < 1e-4);
    }

    #[test]
    fn test_kmeans_empty_matrix() {
        let mat: DMatrix<f32> = DMatrix::zeros(0, 0);
        assert!(mat.kmeans_columns(KmeansArgs::with_clusters(2)).is_empty());
        assert_eq!(mat.kmeans_centroids(KmeansArgs::with_clusters(2)).ncols(), 0);
    }
}

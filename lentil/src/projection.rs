//! Place query cells in the reference embedding
//!
//! Query counts go through the same normalization as the reference,
//! get projected on the reference loadings, and are then pulled
//! towards the reference clusters by a mixture of linear experts
//! (one ridge regression per soft cluster) that removes query batch
//! effects.

use crate::common::*;
use crate::neighbours::ReferenceIndex;
use crate::normalization::*;
use crate::query::QueryData;
use crate::reference::{CorrectionModel, FeatureModel, ReferenceAtlas};
use matrix_util::dmatrix_util::softmax_neg;
use matrix_util::utils::unique_in_order;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionArgs {
    /// regress out query batch effects
    pub correct_batch: bool,
    /// ridge penalty on the batch coefficients
    pub lambda: f32,
    /// number of reference neighbours for visualization coordinates
    pub viz_knn: usize,
}

impl Default for ProjectionArgs {
    fn default() -> Self {
        Self {
            correct_batch: true,
            lambda: DEFAULT_RIDGE_LAMBDA,
            viz_knn: DEFAULT_VIZ_KNN,
        }
    }
}

pub struct QueryProjection {
    /// `D x n`
    pub embedding: Mat,
    /// `2 x n`
    pub viz: Mat,
    /// `K x n` soft cluster membership before correction
    pub soft_clusters: Mat,
    /// number of reference genes found in the query
    pub num_overlap: usize,
}

/// Project query cells onto the reference
///
/// * `query` - raw counts; `query.donors` serves as the batch covariate
/// * `atlas` - reference to map onto
/// * `index` - neighbour index over `atlas.embedding()`
pub fn project_query(
    query: &QueryData,
    atlas: &ReferenceAtlas,
    index: &ReferenceIndex,
    args: &ProjectionArgs,
) -> anyhow::Result<QueryProjection> {
    let (z_dn, num_overlap) = embed_counts(&query.counts, &query.genes, atlas.features())?;

    let soft_clusters = atlas.correction().responsibilities(&z_dn);

    let batches = if args.correct_batch {
        query.donors.as_deref()
    } else {
        None
    };

    let embedding = match batches {
        Some(batches) => {
            info!("correcting query batch effects");
            correct_batch_effects(&z_dn, &soft_clusters, batches, atlas.correction(), args.lambda)?
        }
        None => {
            info!("no batch correction");
            z_dn
        }
    };

    let viz = transfer_viz(&embedding, index, atlas.viz(), args.viz_knn);

    Ok(QueryProjection {
        embedding,
        viz,
        soft_clusters,
        num_overlap,
    })
}

/// Normalize, scale and project raw counts on the reference loadings
///
/// Returns the `D x n` uncorrected embedding and the number of
/// reference genes present in the query.
pub fn embed_counts(
    counts: &CscMat,
    genes: &[Box<str>],
    features: &FeatureModel,
) -> anyhow::Result<(Mat, usize)> {
    let alignment = align_features(genes, &features.genes)?;
    let mut x_gn = log_normalize_columns(counts, &alignment);
    scale_rows_inplace(&mut x_gn, &features.mean, &features.sd);
    Ok((features.loadings.transpose() * x_gn, alignment.num_overlap))
}

/// Mixture-of-experts batch correction
///
/// For each cluster `k` with `Phi = [1; one-hot(batch)]`:
/// ```text
/// E = Phi diag(R_k) Phi' + diag(N_r[k], lambda, ..., lambda)
/// F = Phi diag(R_k) Z' + [C_k'; 0]
/// W = E^-1 F, W[0,] = 0
/// Z <- Z - W' Phi diag(R_k)
/// ```
/// The intercept row absorbs the reference cluster statistics, so
/// only batch-specific offsets are removed. Clusters whose system
/// cannot be solved are left uncorrected.
///
/// * `z_dn` - `D x n` query embedding
/// * `r_kn` - `K x n` soft cluster membership
/// * `batches` - batch label of each cell
pub fn correct_batch_effects(
    z_dn: &Mat,
    r_kn: &Mat,
    batches: &[Box<str>],
    correction: &CorrectionModel,
    lambda: f32,
) -> anyhow::Result<Mat> {
    let nn = z_dn.ncols();
    let kk = correction.num_clusters();

    if batches.len() != nn || r_kn.ncols() != nn || r_kn.nrows() != kk {
        return Err(anyhow::anyhow!(
            "{} cells, {} batch labels, {} x {} responsibilities for {} clusters",
            nn,
            batches.len(),
            r_kn.nrows(),
            r_kn.ncols(),
            kk
        ));
    }

    let mut levels = unique_in_order(batches);
    levels.sort();
    let bb = levels.len();
    info!("{} query batch(es) over {} clusters", bb, kk);

    let level_index: fnv::FnvHashMap<&str, usize> = levels
        .iter()
        .enumerate()
        .map(|(b, x)| (x.as_ref(), b + 1))
        .collect();

    // (1 + B) x n design
    let mut phi = Mat::zeros(bb + 1, nn);
    for (i, batch) in batches.iter().enumerate() {
        phi[(0, i)] = 1.0;
        if let Some(&b) = level_index.get(batch.as_ref()) {
            phi[(b, i)] = 1.0;
        }
    }

    let z_nd = z_dn.transpose();
    let mut ret = z_dn.clone();

    for k in 0..kk {
        let r_k = r_kn.row(k);

        let mut phi_rk = phi.clone();
        for (i, mut col) in phi_rk.column_iter_mut().enumerate() {
            col *= r_k[i];
        }

        let mut e_bb = &phi_rk * phi.transpose();
        e_bb[(0, 0)] += correction.cluster_sizes[k];
        for b in 1..=bb {
            e_bb[(b, b)] += lambda;
        }

        let mut f_bd = &phi_rk * &z_nd;
        {
            let mut f_0 = f_bd.row_mut(0);
            f_0 += correction.cluster_sums.column(k).transpose();
        }

        let Some(mut w_bd) = e_bb.lu().solve(&f_bd) else {
            warn!("singular correction system in cluster {}; skipped", k);
            continue;
        };

        if w_bd.iter().any(|x| !x.is_finite()) {
            warn!("non-finite correction in cluster {}; skipped", k);
            continue;
        }

        w_bd.row_mut(0).fill(0.0);
        ret -= w_bd.transpose() * &phi_rk;
    }

    Ok(ret)
}

/// Visualization coordinates as the `softmax(-distance)` weighted mean
/// of the nearest reference cells' coordinates
///
/// * `z_dn` - `D x n` query embedding
/// * `viz_2n` - `2 x N` reference coordinates
pub fn transfer_viz(z_dn: &Mat, index: &ReferenceIndex, viz_2n: &Mat, knn: usize) -> Mat {
    let neighbours = index.search_columns(z_dn, knn.max(1));
    let mut ret = Mat::from_element(viz_2n.nrows(), z_dn.ncols(), f32::NAN);

    for (i, nn_i) in neighbours.iter().enumerate() {
        if nn_i.is_empty() {
            continue;
        }
        let dist: Vec<f32> = nn_i.iter().map(|n| n.distance).collect();
        let weights = softmax_neg(&dist);
        let mut v_i = ret.column_mut(i);
        v_i.fill(0.0);
        for (n, w) in nn_i.iter().zip(weights) {
            v_i += viz_2n.column(n.index) * w;
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbours::{Metric, SearchMode};
    use crate::reference::tests::toy_atlas;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;

    fn names(xs: &[&str]) -> Vec<Box<str>> {
        xs.iter().map(|&x| x.into()).collect()
    }

    fn toy_query(donors: Option<Vec<Box<str>>>) -> QueryData {
        let mut coo = CooMatrix::<f32>::new(3, 4);
        let counts = [[5.0, 1.0, 0.0], [4.0, 1.0, 1.0], [0.0, 6.0, 1.0], [1.0, 5.0, 2.0]];
        for (j, col) in counts.iter().enumerate() {
            for (g, &c) in col.iter().enumerate() {
                if c > 0.0 {
                    coo.push(g, j, c);
                }
            }
        }
        QueryData::new(
            CscMat::from(&coo),
            names(&["g1", "g2", "zz"]),
            names(&["q1", "q2", "q3", "q4"]),
            donors,
        )
        .unwrap()
    }

    #[test]
    fn missing_batch_is_the_uncorrected_projection() -> anyhow::Result<()> {
        let atlas = toy_atlas();
        let index = ReferenceIndex::new(atlas.embedding(), Metric::Euclidean, SearchMode::Exact)?;
        let query = toy_query(None);

        let proj = project_query(&query, &atlas, &index, &ProjectionArgs::default())?;
        let (z_dn, num_overlap) = embed_counts(&query.counts, &query.genes, atlas.features())?;

        assert_eq!(num_overlap, 2);
        assert_abs_diff_eq!(proj.embedding, z_dn);
        assert_eq!(proj.viz.shape(), (2, 4));
        assert_eq!(proj.soft_clusters.shape(), (2, 4));
        Ok(())
    }

    #[test]
    fn no_shared_genes_is_fatal() -> anyhow::Result<()> {
        let atlas = toy_atlas();
        let index = ReferenceIndex::new(atlas.embedding(), Metric::Euclidean, SearchMode::Exact)?;
        let mut query = toy_query(None);
        query.genes = names(&["x", "y", "z"]);
        assert!(project_query(&query, &atlas, &index, &ProjectionArgs::default()).is_err());
        Ok(())
    }

    #[test]
    fn batch_offset_is_removed() -> anyhow::Result<()> {
        // one cluster; two batches shifted by +/- 1 in the first coordinate
        let centroids = Mat::from_row_slice(2, 1, &[1.0, 0.0]);
        let reference = Mat::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 0.0]);
        let correction = CorrectionModel::from_embedding(&reference, &centroids, 0.1)?;

        let nn = 40;
        let z_dn = Mat::from_fn(2, nn, |d, i| {
            if d == 0 {
                if i % 2 == 0 { 2.0 } else { 0.5 }
            } else {
                0.0
            }
        });
        let batches: Vec<Box<str>> = (0..nn)
            .map(|i| if i % 2 == 0 { "a".into() } else { "b".into() })
            .collect();

        let r_kn = correction.responsibilities(&z_dn);
        let corrected = correct_batch_effects(&z_dn, &r_kn, &batches, &correction, 1.0)?;

        let gap_before = (z_dn[(0, 0)] - z_dn[(0, 1)]).abs();
        let gap_after = (corrected[(0, 0)] - corrected[(0, 1)]).abs();
        assert!(gap_after < 0.2 * gap_before);
        // the second coordinate carries no batch effect
        assert_abs_diff_eq!(corrected.row(1).norm(), 0.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn viz_follows_the_nearest_reference_cells() -> anyhow::Result<()> {
        let atlas = toy_atlas();
        let index = ReferenceIndex::new(atlas.embedding(), Metric::Euclidean, SearchMode::Exact)?;
        let z_dn = Mat::from_row_slice(2, 1, &[-1.05, 0.05]);
        let viz = transfer_viz(&z_dn, &index, atlas.viz(), 2);
        // the two nearest reference cells sit at x = -1.0 and x = -1.1
        assert!(viz[(0, 0)] < -0.99 && viz[(0, 0)] > -1.11);
        Ok(())
    }
}

use crate::common::*;
use fnv::FnvHashMap as HashMap;
use rayon::prelude::*;

/// Where each query row lands in the reference feature space
pub struct FeatureAlignment {
    /// query row -> reference feature index
    pub row_to_feature: Vec<Option<usize>>,
    pub num_features: usize,
    pub num_overlap: usize,
}

/// Match query rows to reference features by name
///
/// * `query_rows` - gene names of the query count matrix
/// * `features` - gene names of the reference
///
/// Fails if no gene is shared.
pub fn align_features(
    query_rows: &[Box<str>],
    features: &[Box<str>],
) -> anyhow::Result<FeatureAlignment> {
    let feature_index: HashMap<&str, usize> = features
        .iter()
        .enumerate()
        .map(|(g, x)| (x.as_ref(), g))
        .collect();

    let mut seen = vec![false; features.len()];
    let row_to_feature: Vec<Option<usize>> = query_rows
        .iter()
        .map(|r| {
            let g = *feature_index.get(r.as_ref())?;
            // a duplicated gene name only counts once
            if seen[g] {
                None
            } else {
                seen[g] = true;
                Some(g)
            }
        })
        .collect();

    let num_overlap = seen.iter().filter(|&&x| x).count();

    if num_overlap == 0 {
        return Err(anyhow::anyhow!(
            "no common genes between the query ({} genes) and the reference ({} genes)",
            query_rows.len(),
            features.len()
        ));
    }

    info!(
        "{} of {} reference genes found in the query",
        num_overlap,
        features.len()
    );

    if num_overlap < features.len() {
        warn!(
            "{} reference genes missing in the query are set to zero",
            features.len() - num_overlap
        );
    }

    Ok(FeatureAlignment {
        row_to_feature,
        num_features: features.len(),
        num_overlap,
    })
}

/// `x[g,j] = ln(1 + 1e4 * c[g,j] / sum_g' c[g',j])`
///
/// Library sizes are taken over all rows of `counts`, including the
/// ones that do not map to any feature. Returns a `G x n` dense matrix.
pub fn log_normalize_columns(counts: &CscMat, alignment: &FeatureAlignment) -> Mat {
    let nn = counts.ncols();
    let gg = alignment.num_features;

    let columns: Vec<Vec<f32>> = (0..nn)
        .into_par_iter()
        .map(|j| {
            let col = counts.col(j);
            let mut x_j = vec![0_f32; gg];
            let libsize: f32 = col.values().iter().sum();
            if libsize > 0.0 {
                for (&i, &c) in col.row_indices().iter().zip(col.values().iter()) {
                    if let Some(g) = alignment.row_to_feature[i] {
                        x_j[g] += (SCALE_FACTOR * c / libsize).ln_1p();
                    }
                }
            }
            x_j
        })
        .collect();

    let mut x_gn = Mat::zeros(gg, nn);
    for (j, x_j) in columns.into_iter().enumerate() {
        x_gn.column_mut(j).copy_from_slice(&x_j);
    }
    x_gn
}

/// Mean and standard deviation of each row
pub fn row_mean_sd(x_gn: &Mat) -> (DVec, DVec) {
    let nn = x_gn.ncols() as f32;
    let mean = x_gn.column_mean();
    let mut sd = DVec::zeros(x_gn.nrows());
    for (g, row) in x_gn.row_iter().enumerate() {
        let ss: f32 = row.iter().map(|&x| (x - mean[g]) * (x - mean[g])).sum();
        sd[g] = (ss / (nn - 1.0).max(1.0)).sqrt();
    }
    (mean, sd)
}

/// `x[g,:] <- (x[g,:] - mean[g]) / sd[g]`, constant genes become 0
pub fn scale_rows_inplace(x_gn: &mut Mat, mean: &DVec, sd: &DVec) {
    for (g, mut row) in x_gn.row_iter_mut().enumerate() {
        if sd[g] > 0.0 {
            row.apply(|x| *x = (*x - mean[g]) / sd[g]);
        } else {
            row.fill(0.0);
        }
    }
}

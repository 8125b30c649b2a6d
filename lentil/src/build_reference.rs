//! Assemble a reference atlas from annotated reference counts
//!
//! Stands in for an external fitting package: a PCA-like linear
//! embedding by randomized SVD, unless a corrected embedding and
//! visualization coordinates are supplied from elsewhere.

use crate::common::*;
use crate::normalization::*;
use crate::reference::*;
use fnv::FnvHashMap as HashMap;
use matrix_util::clustering::{Kmeans, KmeansArgs};
use matrix_util::dmatrix_io::parse_value;
use matrix_util::dmatrix_rsvd::RandomizedSVD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReferenceArgs {
    pub name: Box<str>,
    /// number of most variable genes to keep
    pub n_genes: usize,
    /// embedding dimension; with an external embedding, the minimum
    /// rank of the basis its loadings are fitted on
    pub dim: usize,
    /// number of soft clusters for batch correction
    pub num_clusters: usize,
    pub sigma: f32,
    pub kmeans_iter: usize,
    pub rsvd_iter: usize,
    pub seed: u64,
}

impl Default for BuildReferenceArgs {
    fn default() -> Self {
        Self {
            name: "reference".into(),
            n_genes: 2000,
            dim: 20,
            num_clusters: 100,
            sigma: DEFAULT_SIGMA,
            kmeans_iter: 100,
            rsvd_iter: 5,
            seed: 42,
        }
    }
}

pub struct ReferenceInput {
    /// `genes x cells` raw counts
    pub counts: CscMat,
    pub genes: Vec<Box<str>>,
    pub cells: Vec<Box<str>>,
    pub donors: Vec<Box<str>>,
    pub labels: Vec<LabelColumn>,
    /// externally corrected `D x N` embedding
    pub embedding: Option<Mat>,
    /// externally fitted `2 x N` coordinates
    pub viz: Option<Mat>,
}

pub fn build_reference(
    input: ReferenceInput,
    args: &BuildReferenceArgs,
) -> anyhow::Result<ReferenceAtlas> {
    let nn = input.cells.len();
    if input.counts.ncols() != nn || input.counts.nrows() != input.genes.len() {
        return Err(anyhow::anyhow!(
            "[{} x {}] counts for {} genes and {} cells",
            input.counts.nrows(),
            input.counts.ncols(),
            input.genes.len(),
            nn
        ));
    }

    // 1. normalize and keep the most variable genes
    let alignment = align_features(&input.genes, &input.genes)?;
    let x_all = log_normalize_columns(&input.counts, &alignment);
    let (_, sd_all) = row_mean_sd(&x_all);

    let mut order: Vec<usize> = (0..sd_all.len()).filter(|&g| sd_all[g] > 0.0).collect();
    order.sort_by(|&a, &b| sd_all[b].total_cmp(&sd_all[a]).then(a.cmp(&b)));
    order.truncate(args.n_genes);
    order.sort();

    if order.is_empty() {
        return Err(anyhow::anyhow!("no variable genes in the reference"));
    }
    info!("selected {} variable genes", order.len());

    let mut x_gn = x_all.select_rows(order.iter());
    let genes: Vec<Box<str>> = order.iter().map(|&g| input.genes[g].clone()).collect();
    let (mean, sd) = row_mean_sd(&x_gn);
    scale_rows_inplace(&mut x_gn, &mean, &sd);

    // 2. loadings and embedding
    let (loadings, embedding) = match input.embedding {
        Some(z) => {
            info!("using the external {} x {} embedding", z.nrows(), z.ncols());
            if z.ncols() != nn {
                return Err(anyhow::anyhow!(
                    "embedding has {} cells, expected {}",
                    z.ncols(),
                    nn
                ));
            }
            let loadings = fit_external_loadings(&x_gn, &z, args)?;
            (loadings, z)
        }
        None => {
            let mut rsvd = RandomizedSVD::new(args.dim, args.rsvd_iter).with_seed(args.seed);
            rsvd.compute(&x_gn)?;
            let loadings = rsvd.matrix_u().clone();
            if loadings.ncols() != args.dim {
                return Err(anyhow::anyhow!(
                    "embedding dimension {} exceeds the rank {} of the reference",
                    args.dim,
                    loadings.ncols()
                ));
            }
            let embedding = loadings.transpose() * &x_gn;
            (loadings, embedding)
        }
    };

    if embedding.ncols() != nn {
        return Err(anyhow::anyhow!(
            "embedding has {} cells, expected {}",
            embedding.ncols(),
            nn
        ));
    }

    // 3. visualization
    let viz = match input.viz {
        Some(v) => v,
        None => {
            info!("no visualization given; using the first two dimensions");
            Mat::from_fn(2, nn, |r, j| {
                if r < embedding.nrows() {
                    embedding[(r, j)]
                } else {
                    0.0
                }
            })
        }
    };

    // 4. soft clusters for batch correction
    let kmeans_args = KmeansArgs {
        num_clusters: args.num_clusters.max(1),
        max_iter: args.kmeans_iter,
    };
    let centroids = embedding.normalize_columns().kmeans_centroids(kmeans_args);
    info!("{} clusters for batch correction", centroids.ncols());
    let correction = CorrectionModel::from_embedding(&embedding, &centroids, args.sigma)?;

    ReferenceAtlas::new(ReferenceParts {
        name: args.name.clone(),
        features: FeatureModel {
            genes,
            mean,
            sd,
            loadings,
        },
        correction,
        cells: input.cells,
        donors: input.donors,
        embedding,
        viz,
        labels: input.labels,
    })
}

/// Least-squares loadings `L` with `L' X ~ Z`, so that new cells
/// projected by `L` land in the basis of an external embedding
///
/// Solved through the truncated SVD `X = U S V'` as `L = U S^-1 V' Z'`.
/// The basis keeps `max(dim, D)` directions; near-zero singular values
/// are dropped.
///
/// * `x_gn` - scaled `G x N` reference expression
/// * `z_dn` - external `D x N` embedding
fn fit_external_loadings(
    x_gn: &Mat,
    z_dn: &Mat,
    args: &BuildReferenceArgs,
) -> anyhow::Result<Mat> {
    let rank = args.dim.max(z_dn.nrows());
    let mut rsvd = RandomizedSVD::new(rank, args.rsvd_iter).with_seed(args.seed);
    rsvd.compute(x_gn)?;

    let u = rsvd.matrix_u();
    let v = rsvd.matrix_v();
    let s = rsvd.singular_values();

    let s_max = s.iter().cloned().fold(0_f32, f32::max);
    if s_max <= 0.0 {
        return Err(anyhow::anyhow!("reference expression has rank zero"));
    }
    let tol = s_max * 1e-5;
    let s_inv = s.map(|x| if x > tol { 1.0 / x } else { 0.0 });

    // (G x r) * diag(1/s) * (r x N) * (N x D)
    let mut u_scaled = u.clone();
    for (k, mut col) in u_scaled.column_iter_mut().enumerate() {
        col *= s_inv[k];
    }
    let loadings = u_scaled * (v.transpose() * z_dn.transpose());
    debug!(
        "fitted [{} x {}] loadings onto the external embedding",
        loadings.nrows(),
        loadings.ncols()
    );
    Ok(loadings)
}

/// Read a tab-separated annotation file with a header line and cell
/// names in the first column
///
/// * `cells` - reference cells to line up with
/// * `donor_column` - column of donor names
/// * `categorical` - columns of discrete labels
/// * `continuous` - columns of numeric labels
///
/// Returns donors and label columns in the order of `cells`. Cells
/// missing from the file get [`IMPLICIT_BATCH`] and no labels.
pub fn read_annotations(
    file: &str,
    cells: &[Box<str>],
    donor_column: Option<&str>,
    categorical: &[Box<str>],
    continuous: &[Box<str>],
) -> anyhow::Result<(Vec<Box<str>>, Vec<LabelColumn>)> {
    let ReadLinesOut { lines, header } = read_lines_of_words_delim(file, "\t", 0)?;

    let column = |name: &str| -> anyhow::Result<usize> {
        header
            .iter()
            .position(|h| h.as_ref() == name)
            .ok_or(anyhow::anyhow!("no column '{}' in {}", name, file))
    };

    let row_of: HashMap<&str, usize> = lines
        .iter()
        .enumerate()
        .filter_map(|(r, words)| words.first().map(|c| (c.as_ref(), r)))
        .collect();

    let rows: Vec<Option<usize>> = cells.iter().map(|c| row_of.get(c.as_ref()).cloned()).collect();

    let nmissing = rows.iter().filter(|r| r.is_none()).count();
    if nmissing == cells.len() {
        return Err(anyhow::anyhow!("no reference cell annotated in {}", file));
    }
    if nmissing > 0 {
        warn!("{} of {} cells not annotated in {}", nmissing, cells.len(), file);
    }

    let word = |r: Option<usize>, c: usize| -> Option<&str> {
        let w = lines[r?].get(c)?.as_ref();
        if w.is_empty() || w == "NA" {
            None
        } else {
            Some(w)
        }
    };

    let donors = match donor_column {
        Some(name) => {
            let c = column(name)?;
            rows.iter()
                .map(|&r| word(r, c).unwrap_or(IMPLICIT_BATCH).into())
                .collect()
        }
        None => vec![IMPLICIT_BATCH.into(); cells.len()],
    };

    let mut labels = vec![];

    for name in categorical {
        let c = column(name)?;
        let values = rows.iter().map(|&r| word(r, c).map(Box::from)).collect();
        labels.push(LabelColumn::categorical(name, values));
    }

    for name in continuous {
        let c = column(name)?;
        let values = rows
            .iter()
            .map(|&r| match word(r, c) {
                Some(w) => parse_value(w).map(|x| Some(x).filter(|x| x.is_finite())),
                None => Ok(None),
            })
            .collect::<anyhow::Result<_>>()?;
        labels.push(LabelColumn::continuous(name, values));
    }

    info!(
        "read {} label column(s) for {} cells from {}",
        labels.len(),
        cells.len(),
        file
    );

    Ok((donors, labels))
}

/// Read a `cells x D` parquet table and return the `D x N` matrix of
/// the given cells
pub fn read_cell_coordinates(file: &str, cells: &[Box<str>]) -> anyhow::Result<Mat> {
    let MatWithNames { rows, mat, .. } = Mat::from_parquet_with_names(file)?;

    let row_of: HashMap<&str, usize> = rows
        .iter()
        .enumerate()
        .map(|(r, x)| (x.as_ref(), r))
        .collect();

    let mut ret = Mat::zeros(mat.ncols(), cells.len());
    for (j, cell) in cells.iter().enumerate() {
        let r = *row_of
            .get(cell.as_ref())
            .ok_or(anyhow::anyhow!("cell '{}' not found in {}", cell, file))?;
        ret.column_mut(j).copy_from(&mat.row(r).transpose());
    }
    Ok(ret)
}

//! Reference atlas: a fixed, labelled collection of embedded cells
//! together with the models needed to place new cells next to them.
//!
//! An atlas is immutable once built. Pipelines take it by shared
//! reference, so one atlas can serve any number of query runs.

use crate::common::*;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Per-cell values of one annotation of the reference cells
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LabelValues {
    /// e.g., cell type or lineage
    Categorical(Vec<Option<Box<str>>>),
    /// e.g., pseudotime
    Continuous(Vec<Option<f32>>),
}

impl LabelValues {
    pub fn len(&self) -> usize {
        match self {
            LabelValues::Categorical(x) => x.len(),
            LabelValues::Continuous(x) => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelColumn {
    pub name: Box<str>,
    pub values: LabelValues,
}

impl LabelColumn {
    pub fn categorical(name: &str, values: Vec<Option<Box<str>>>) -> Self {
        Self {
            name: name.into(),
            values: LabelValues::Categorical(values),
        }
    }

    pub fn continuous(name: &str, values: Vec<Option<f32>>) -> Self {
        Self {
            name: name.into(),
            values: LabelValues::Continuous(values),
        }
    }
}

/// Gene features and the linear map into the embedding space
#[derive(Debug, Clone)]
pub struct FeatureModel {
    pub genes: Vec<Box<str>>,
    /// mean of log-normalized expression per gene
    pub mean: DVec,
    /// standard deviation of log-normalized expression per gene
    pub sd: DVec,
    /// `G x D` gene loadings
    pub loadings: Mat,
}

/// Compressed reference statistics for mixture-of-experts batch
/// correction of query cells
#[derive(Debug, Clone)]
pub struct CorrectionModel {
    /// `D x K` cluster centroids, unit-norm columns
    pub centroids: Mat,
    /// `N_r[k] = sum_i R[k,i]` over reference cells
    pub cluster_sizes: DVec,
    /// `C = Z R'`, `D x K`
    pub cluster_sums: Mat,
    /// soft-clustering bandwidth per cluster
    pub sigma: DVec,
}

impl CorrectionModel {
    /// Summarize a reference embedding against the given centroids
    ///
    /// * `embedding` - `D x N` batch-corrected reference embedding
    /// * `centroids` - `D x K` (normalized here)
    /// * `sigma` - bandwidth shared by all clusters
    pub fn from_embedding(embedding: &Mat, centroids: &Mat, sigma: f32) -> anyhow::Result<Self> {
        if embedding.nrows() != centroids.nrows() {
            return Err(anyhow::anyhow!(
                "embedding dim {} != centroid dim {}",
                embedding.nrows(),
                centroids.nrows()
            ));
        }

        if centroids.ncols() == 0 {
            return Err(anyhow::anyhow!("need at least one centroid"));
        }

        if !(sigma > 0.0) {
            return Err(anyhow::anyhow!("sigma must be positive: {}", sigma));
        }

        let mut ret = Self {
            centroids: centroids.normalize_columns(),
            cluster_sizes: DVec::zeros(centroids.ncols()),
            cluster_sums: Mat::zeros(centroids.nrows(), centroids.ncols()),
            sigma: DVec::from_element(centroids.ncols(), sigma),
        };

        let r_kn = ret.responsibilities(embedding);
        ret.cluster_sizes = r_kn.column_sum();
        ret.cluster_sums = embedding * r_kn.transpose();
        Ok(ret)
    }

    pub fn num_clusters(&self) -> usize {
        self.centroids.ncols()
    }

    /// Soft cluster assignment `K x n` of the columns of `z_dn`
    ///
    /// `R[k,i] ∝ exp(-2 (1 - y_k' z_i / |z_i|) / sigma_k)`
    pub fn responsibilities(&self, z_dn: &Mat) -> Mat {
        let z_cos = z_dn.normalize_columns();
        let dot_kn = self.centroids.transpose() * z_cos;
        let kk = self.num_clusters();

        let mut r_kn = Mat::zeros(kk, z_dn.ncols());
        for (i, mut r_i) in r_kn.column_iter_mut().enumerate() {
            let logits: Vec<f32> = (0..kk)
                .map(|k| -2.0 * (1.0 - dot_kn[(k, i)]) / self.sigma[k])
                .collect();
            let lmax = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut tot = 0_f32;
            for k in 0..kk {
                let r = (logits[k] - lmax).exp();
                r_i[k] = r;
                tot += r;
            }
            r_i /= tot;
        }
        r_kn
    }
}

/// Everything needed to assemble a [`ReferenceAtlas`]
pub struct ReferenceParts {
    pub name: Box<str>,
    pub features: FeatureModel,
    pub correction: CorrectionModel,
    pub cells: Vec<Box<str>>,
    pub donors: Vec<Box<str>>,
    /// `D x N`
    pub embedding: Mat,
    /// `2 x N`
    pub viz: Mat,
    pub labels: Vec<LabelColumn>,
}

/// A labelled reference of `N` cells embedded in `D` dimensions
#[derive(Debug, Clone)]
pub struct ReferenceAtlas {
    name: Box<str>,
    features: FeatureModel,
    correction: CorrectionModel,
    cells: Vec<Box<str>>,
    donors: Vec<Box<str>>,
    embedding: Mat,
    viz: Mat,
    labels: Vec<LabelColumn>,
}

impl ReferenceAtlas {
    pub fn new(parts: ReferenceParts) -> anyhow::Result<Self> {
        let ret = Self {
            name: parts.name,
            features: parts.features,
            correction: parts.correction,
            cells: parts.cells,
            donors: parts.donors,
            embedding: parts.embedding,
            viz: parts.viz,
            labels: parts.labels,
        };
        ret.validate()?;
        Ok(ret)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn features(&self) -> &FeatureModel {
        &self.features
    }

    pub fn correction(&self) -> &CorrectionModel {
        &self.correction
    }

    pub fn cells(&self) -> &[Box<str>] {
        &self.cells
    }

    pub fn donors(&self) -> &[Box<str>] {
        &self.donors
    }

    /// `D x N` batch-corrected embedding, one column per cell
    pub fn embedding(&self) -> &Mat {
        &self.embedding
    }

    /// `2 x N` visualization coordinates
    pub fn viz(&self) -> &Mat {
        &self.viz
    }

    pub fn labels(&self) -> &[LabelColumn] {
        &self.labels
    }

    pub fn label_column(&self, name: &str) -> Option<&LabelColumn> {
        self.labels.iter().find(|c| c.name.as_ref() == name)
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_genes(&self) -> usize {
        self.features.genes.len()
    }

    pub fn dim(&self) -> usize {
        self.embedding.nrows()
    }

    pub fn num_clusters(&self) -> usize {
        self.correction.num_clusters()
    }

    /// Check that all the pieces agree on `G`, `D`, `K` and `N`
    pub fn validate(&self) -> anyhow::Result<()> {
        let gg = self.features.genes.len();
        let dd = self.embedding.nrows();
        let kk = self.correction.centroids.ncols();
        let nn = self.cells.len();

        let checks = [
            (self.features.loadings.nrows() == gg, "loadings rows != #genes"),
            (self.features.mean.len() == gg, "gene means != #genes"),
            (self.features.sd.len() == gg, "gene sds != #genes"),
            (self.features.loadings.ncols() == dd, "loadings cols != dim"),
            (self.correction.centroids.nrows() == dd, "centroid dim != dim"),
            (self.correction.cluster_sums.nrows() == dd, "cluster sums dim != dim"),
            (self.correction.cluster_sums.ncols() == kk, "cluster sums != #clusters"),
            (self.correction.cluster_sizes.len() == kk, "cluster sizes != #clusters"),
            (self.correction.sigma.len() == kk, "sigma != #clusters"),
            (self.donors.len() == nn, "donors != #cells"),
            (self.embedding.ncols() == nn, "embedding cols != #cells"),
            (self.viz.ncols() == nn, "viz cols != #cells"),
            (self.viz.nrows() == 2, "viz must be two-dimensional"),
        ];

        for (ok, msg) in checks {
            if !ok {
                return Err(anyhow::anyhow!("invalid reference '{}': {}", self.name, msg));
            }
        }

        if nn == 0 || gg == 0 || dd == 0 || kk == 0 {
            return Err(anyhow::anyhow!(
                "empty reference '{}': {} cells, {} genes, {} dims, {} clusters",
                self.name,
                nn,
                gg,
                dd,
                kk
            ));
        }

        // JSON has no NaN; a non-finite entry would not load back
        let matrices = [
            ("embedding", &self.embedding),
            ("visualization", &self.viz),
            ("loadings", &self.features.loadings),
            ("centroids", &self.correction.centroids),
            ("cluster sums", &self.correction.cluster_sums),
        ];
        for (what, mat) in matrices {
            if mat.iter().any(|x| !x.is_finite()) {
                return Err(anyhow::anyhow!(
                    "reference '{}' {} has non-finite values",
                    self.name,
                    what
                ));
            }
        }

        let mut seen = fnv::FnvHashSet::default();
        for col in self.labels.iter() {
            if col.values.len() != nn {
                return Err(anyhow::anyhow!(
                    "label column '{}' has {} values, expected {}",
                    col.name,
                    col.values.len(),
                    nn
                ));
            }
            if !seen.insert(col.name.clone()) {
                return Err(anyhow::anyhow!("duplicate label column '{}'", col.name));
            }
        }

        Ok(())
    }

    /// Write the atlas as JSON, gzipped if `path` ends with `.gz`
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let record = AtlasRecord::from(self);
        let mut buf = open_buf_writer(path)?;
        serde_json::to_writer(&mut buf, &record)?;
        buf.flush()?;
        info!(
            "saved reference '{}' ({} cells, {} genes, {} dims) to {}",
            self.name,
            self.num_cells(),
            self.num_genes(),
            self.dim(),
            path
        );
        Ok(())
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let record: AtlasRecord = serde_json::from_reader(open_buf_reader(path)?)
            .map_err(|e| anyhow::anyhow!("failed to parse reference {}: {}", path, e))?;
        let ret = Self::try_from(record)?;
        info!(
            "loaded reference '{}' ({} cells, {} genes, {} dims, {} clusters)",
            ret.name,
            ret.num_cells(),
            ret.num_genes(),
            ret.dim(),
            ret.num_clusters()
        );
        Ok(ret)
    }
}

/// column-major matrix on disk
#[derive(Serialize, Deserialize)]
struct MatrixRecord {
    nrows: usize,
    ncols: usize,
    data: Vec<f32>,
}

impl From<&Mat> for MatrixRecord {
    fn from(mat: &Mat) -> Self {
        Self {
            nrows: mat.nrows(),
            ncols: mat.ncols(),
            data: mat.as_slice().to_vec(),
        }
    }
}

impl From<&DVec> for MatrixRecord {
    fn from(vec: &DVec) -> Self {
        Self {
            nrows: vec.len(),
            ncols: 1,
            data: vec.as_slice().to_vec(),
        }
    }
}

impl TryFrom<MatrixRecord> for Mat {
    type Error = anyhow::Error;

    fn try_from(rec: MatrixRecord) -> anyhow::Result<Self> {
        if rec.nrows * rec.ncols != rec.data.len() {
            return Err(anyhow::anyhow!(
                "matrix record [{} x {}] carries {} values",
                rec.nrows,
                rec.ncols,
                rec.data.len()
            ));
        }
        Ok(Mat::from_vec(rec.nrows, rec.ncols, rec.data))
    }
}

fn to_dvec(rec: MatrixRecord) -> anyhow::Result<DVec> {
    let mat = Mat::try_from(rec)?;
    Ok(DVec::from_column_slice(mat.as_slice()))
}

#[derive(Serialize, Deserialize)]
struct AtlasRecord {
    name: Box<str>,
    genes: Vec<Box<str>>,
    gene_mean: MatrixRecord,
    gene_sd: MatrixRecord,
    loadings: MatrixRecord,
    centroids: MatrixRecord,
    cluster_sizes: MatrixRecord,
    cluster_sums: MatrixRecord,
    sigma: MatrixRecord,
    cells: Vec<Box<str>>,
    donors: Vec<Box<str>>,
    embedding: MatrixRecord,
    viz: MatrixRecord,
    labels: Vec<LabelColumn>,
}

impl From<&ReferenceAtlas> for AtlasRecord {
    fn from(atlas: &ReferenceAtlas) -> Self {
        Self {
            name: atlas.name.clone(),
            genes: atlas.features.genes.clone(),
            gene_mean: (&atlas.features.mean).into(),
            gene_sd: (&atlas.features.sd).into(),
            loadings: (&atlas.features.loadings).into(),
            centroids: (&atlas.correction.centroids).into(),
            cluster_sizes: (&atlas.correction.cluster_sizes).into(),
            cluster_sums: (&atlas.correction.cluster_sums).into(),
            sigma: (&atlas.correction.sigma).into(),
            cells: atlas.cells.clone(),
            donors: atlas.donors.clone(),
            embedding: (&atlas.embedding).into(),
            viz: (&atlas.viz).into(),
            labels: atlas.labels.clone(),
        }
    }
}

impl TryFrom<AtlasRecord> for ReferenceAtlas {
    type Error = anyhow::Error;

    fn try_from(rec: AtlasRecord) -> anyhow::Result<Self> {
        ReferenceAtlas::new(ReferenceParts {
            name: rec.name,
            features: FeatureModel {
                genes: rec.genes,
                mean: to_dvec(rec.gene_mean)?,
                sd: to_dvec(rec.gene_sd)?,
                loadings: rec.loadings.try_into()?,
            },
            correction: CorrectionModel {
                centroids: rec.centroids.try_into()?,
                cluster_sizes: to_dvec(rec.cluster_sizes)?,
                cluster_sums: rec.cluster_sums.try_into()?,
                sigma: to_dvec(rec.sigma)?,
            },
            cells: rec.cells,
            donors: rec.donors,
            embedding: rec.embedding.try_into()?,
            viz: rec.viz.try_into()?,
            labels: rec.labels,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    pub(crate) fn toy_atlas() -> ReferenceAtlas {
        let embedding = Mat::from_row_slice(2, 4, &[1.0, 1.1, -1.0, -1.1, 0.1, 0.0, 0.1, 0.0]);
        let centroids = Mat::from_row_slice(2, 2, &[1.0, -1.0, 0.0, 0.0]);
        let correction = CorrectionModel::from_embedding(&embedding, &centroids, 0.1).unwrap();

        ReferenceAtlas::new(ReferenceParts {
            name: "toy".into(),
            features: FeatureModel {
                genes: vec!["g1".into(), "g2".into(), "g3".into()],
                mean: DVec::from_vec(vec![0.5, 0.2, 0.1]),
                sd: DVec::from_vec(vec![1.0, 0.5, 0.0]),
                loadings: Mat::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 0.5, 0.5]),
            },
            correction,
            cells: vec!["r1".into(), "r2".into(), "r3".into(), "r4".into()],
            donors: vec!["d1".into(), "d1".into(), "d2".into(), "d2".into()],
            viz: embedding.clone(),
            embedding,
            labels: vec![
                LabelColumn::categorical(
                    CELL_TYPE,
                    vec![Some("A".into()), Some("A".into()), Some("B".into()), None],
                ),
                LabelColumn::continuous(PSEUDOTIME, vec![Some(0.1), Some(0.2), None, Some(0.9)]),
            ],
        })
        .unwrap()
    }

    #[test]
    fn responsibilities_are_distributions() {
        let atlas = toy_atlas();
        let r_kn = atlas.correction().responsibilities(atlas.embedding());
        assert_eq!(r_kn.shape(), (2, 4));
        for j in 0..4 {
            assert_abs_diff_eq!(r_kn.column(j).sum(), 1.0, epsilon = 1e-5);
        }
        // first two cells sit on the first centroid
        assert!(r_kn[(0, 0)] > 0.99);
        assert!(r_kn[(1, 2)] > 0.99);
        assert_abs_diff_eq!(atlas.correction().cluster_sizes.sum(), 4.0, epsilon = 1e-4);
    }

    #[test]
    fn save_and_load_preserve_the_atlas() -> anyhow::Result<()> {
        let atlas = toy_atlas();
        let file = create_temp_dir_file(".json.gz")?;
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

        atlas.save(file)?;
        let other = ReferenceAtlas::load(file)?;

        assert_eq!(other.name(), "toy");
        assert_eq!(other.cells(), atlas.cells());
        assert_eq!(other.labels(), atlas.labels());
        assert_abs_diff_eq!(other.embedding(), atlas.embedding());
        assert_abs_diff_eq!(other.features().loadings, atlas.features().loadings);
        assert_abs_diff_eq!(
            other.correction().cluster_sums,
            atlas.correction().cluster_sums
        );
        Ok(())
    }

    #[test]
    fn inconsistent_parts_are_rejected() {
        let atlas = toy_atlas();
        let mut labels = atlas.labels().to_vec();
        labels.push(LabelColumn::continuous("short", vec![Some(1.0)]));

        let ret = ReferenceAtlas::new(ReferenceParts {
            name: "bad".into(),
            features: atlas.features().clone(),
            correction: atlas.correction().clone(),
            cells: atlas.cells().to_vec(),
            donors: atlas.donors().to_vec(),
            embedding: atlas.embedding().clone(),
            viz: atlas.viz().clone(),
            labels,
        });
        assert!(ret.is_err());
    }

    #[test]
    fn missing_visualization_values_are_rejected() {
        let atlas = toy_atlas();
        let mut viz = atlas.viz().clone();
        viz[(0, 3)] = f32::NAN;

        let ret = ReferenceAtlas::new(ReferenceParts {
            name: "na".into(),
            features: atlas.features().clone(),
            correction: atlas.correction().clone(),
            cells: atlas.cells().to_vec(),
            donors: atlas.donors().to_vec(),
            embedding: atlas.embedding().clone(),
            viz,
            labels: atlas.labels().to_vec(),
        });
        assert!(ret.is_err());
    }
}

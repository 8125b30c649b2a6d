use clap::Args;
use lentil::common::*;
use lentil::label_transfer::{LabelTransferArgs, Weighting};
use lentil::mapping_qc::MappingQcArgs;
use lentil::neighbours::{Metric, SearchMode};
use lentil::pipeline::MappingParams;
use lentil::projection::ProjectionArgs;
use lentil::query::QueryData;

#[derive(Args, Debug, Clone)]
pub struct QueryInputArgs {
    #[arg(
        long,
        required = true,
        help = "Query count matrix (MatrixMarket, genes x cells)",
        long_help = "Query count matrix in MatrixMarket coordinate format.\n\
		     Rows are genes and columns are cells.\n\
		     Gzipped files (.mtx.gz) are read directly."
    )]
    pub mtx: Box<str>,

    #[arg(
        long,
        required = true,
        help = "Gene names of the query rows",
        long_help = "One gene per line. With several tab-separated words\n\
		     per line (e.g., `id symbol type`), the second word is\n\
		     taken as the gene name."
    )]
    pub rows: Box<str>,

    #[arg(long, required = true, help = "Cell names of the query columns")]
    pub cols: Box<str>,

    #[arg(
        long,
        help = "Donor (batch) of each query cell",
        long_help = "A file of `cell donor` pairs with a header line.\n\
		     Without it, donors are taken from `barcode@donor`\n\
		     cell names; if there are none, batch correction is\n\
		     skipped and all cells form one batch."
    )]
    pub donor_file: Option<Box<str>>,
}

impl QueryInputArgs {
    pub fn read(&self) -> anyhow::Result<QueryData> {
        QueryData::from_mtx(&self.mtx, &self.rows, &self.cols, self.donor_file.as_deref())
    }
}

#[derive(Args, Debug, Clone)]
pub struct MappingCliArgs {
    #[arg(
        long,
        default_value_t = DEFAULT_KNN,
        help = "Number of reference neighbours",
        long_help = "Number of nearest reference cells used for both\n\
		     the mapping error and the label vote."
    )]
    pub knn: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_VIZ_KNN,
        help = "Number of reference neighbours for visualization coordinates"
    )]
    pub viz_knn: usize,

    #[arg(long, value_enum, default_value = "euclidean", help = "Distance metric")]
    pub metric: Metric,

    #[arg(
        long,
        value_enum,
        default_value = "exact",
        help = "Neighbour search",
        long_help = "exact: brute force, deterministic.\n\
		     hnsw: approximate graph search for large references."
    )]
    pub search: SearchMode,

    #[arg(long, help = "Skip query batch correction")]
    pub no_batch_correction: bool,

    #[arg(
        long,
        default_value_t = DEFAULT_RIDGE_LAMBDA,
        help = "Ridge penalty of the batch correction"
    )]
    pub lambda: f32,

    #[arg(long, help = "Keep every cell regardless of its mapping error")]
    pub no_qc: bool,

    #[arg(
        long,
        default_value_t = DEFAULT_MAD_THRESHOLD,
        help = "Mapping error cutoff in MADs above the median"
    )]
    pub mad_threshold: f32,

    #[arg(
        long,
        help = "One mapping error cutoff for all cells",
        long_help = "Threshold the mapping error over all cells at once\n\
		     instead of within each donor."
    )]
    pub global_qc: bool,

    #[arg(
        long,
        default_value_t = DEFAULT_MIN_BATCH_CELLS,
        help = "Donors with fewer cells use the global cutoff"
    )]
    pub min_batch_cells: usize,

    #[arg(long, help = "Absolute cap on the mapping error")]
    pub max_error: Option<f32>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Reference label columns to transfer (default: all)"
    )]
    pub labels: Option<Vec<Box<str>>>,

    #[arg(
        long,
        value_enum,
        default_value = "uniform",
        help = "Neighbour weights for continuous labels"
    )]
    pub weighting: Weighting,

    #[arg(long, help = "Keep final labels of cells failing the mapping QC")]
    pub retain_failed: bool,

    #[arg(
        long,
        default_value_t = DEFAULT_CONFIDENCE_CUTOFF,
        help = "Minimum label confidence for composition"
    )]
    pub confidence_cutoff: f32,

    #[arg(
        long,
        default_value = CELL_TYPE,
        help = "Categorical label summarized per donor"
    )]
    pub composition_label: Box<str>,
}

impl MappingCliArgs {
    pub fn to_params(&self) -> MappingParams {
        MappingParams {
            metric: self.metric,
            search: self.search,
            projection: ProjectionArgs {
                correct_batch: !self.no_batch_correction,
                lambda: self.lambda,
                viz_knn: self.viz_knn,
            },
            qc: MappingQcArgs {
                enabled: !self.no_qc,
                knn: self.knn,
                mad_threshold: self.mad_threshold,
                per_batch: !self.global_qc,
                min_batch_cells: self.min_batch_cells,
                max_error: self.max_error,
            },
            transfer: LabelTransferArgs {
                knn: self.knn,
                columns: self.labels.clone(),
                weighting: self.weighting,
                retain_failed: self.retain_failed,
            },
            composition_label: self.composition_label.clone(),
            confidence_cutoff: self.confidence_cutoff,
        }
    }
}

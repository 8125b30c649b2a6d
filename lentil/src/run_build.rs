use clap::Args;
use lentil::build_reference::*;
use lentil::common::*;
use matrix_util::mtx_io::{read_mtx, read_names};

#[derive(Args, Debug)]
pub struct BuildReferenceCliArgs {
    #[arg(
        long,
        required = true,
        help = "Reference count matrix (MatrixMarket, genes x cells)"
    )]
    pub mtx: Box<str>,

    #[arg(long, required = true, help = "Gene names of the reference rows")]
    pub rows: Box<str>,

    #[arg(long, required = true, help = "Cell names of the reference columns")]
    pub cols: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Cell annotation file",
        long_help = "Tab-separated annotation file with a header line.\n\
		     The first column holds cell names; the other columns\n\
		     are picked by name with --donor-column, --categorical\n\
		     and --continuous."
    )]
    pub annotation: Box<str>,

    #[arg(long, help = "Annotation column of donor names")]
    pub donor_column: Option<Box<str>>,

    #[arg(
        long,
        value_delimiter(','),
        default_value = CELL_TYPE,
        help = "Annotation columns of discrete labels"
    )]
    pub categorical: Vec<Box<str>>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Annotation columns of numeric labels (e.g., pseudotime)"
    )]
    pub continuous: Vec<Box<str>>,

    #[arg(
        long,
        help = "Batch-corrected embedding (parquet, cells x dimensions)",
        long_help = "Embedding fitted elsewhere, e.g., after integrating\n\
		     the reference donors. Rows are cells (first column\n\
		     holds cell names). Without it, the embedding is\n\
		     the projection on the top singular vectors."
    )]
    pub embedding: Option<Box<str>>,

    #[arg(long, help = "Visualization coordinates (parquet, cells x 2)")]
    pub viz: Option<Box<str>>,

    #[arg(long, default_value = "reference", help = "Name of the reference")]
    pub name: Box<str>,

    #[arg(long, default_value_t = 2000, help = "Number of most variable genes")]
    pub n_genes: usize,

    #[arg(long, short = 'd', default_value_t = 20, help = "Embedding dimension")]
    pub dim: usize,

    #[arg(
        long,
        short = 'k',
        default_value_t = 100,
        help = "Number of clusters for batch correction"
    )]
    pub num_clusters: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_SIGMA,
        help = "Soft clustering bandwidth"
    )]
    pub sigma: f32,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        short,
        required = true,
        help = "Output reference bundle (.json or .json.gz)"
    )]
    pub out: Box<str>,
}

pub fn run_build(args: &BuildReferenceCliArgs) -> anyhow::Result<()> {
    let counts = read_mtx(&args.mtx)?;
    let genes = read_names(&args.rows, 1)?;
    let cells = read_names(&args.cols, 0)?;
    info!(
        "read {} genes x {} reference cells",
        counts.nrows(),
        counts.ncols()
    );

    let (donors, labels) = read_annotations(
        &args.annotation,
        &cells,
        args.donor_column.as_deref(),
        &args.categorical,
        &args.continuous,
    )?;

    let embedding = args
        .embedding
        .as_ref()
        .map(|file| read_cell_coordinates(file, &cells))
        .transpose()?;

    let viz = args
        .viz
        .as_ref()
        .map(|file| read_cell_coordinates(file, &cells))
        .transpose()?;

    if let Some(v) = viz.as_ref() {
        if v.nrows() != 2 {
            return Err(anyhow::anyhow!(
                "{} has {} columns; need 2 visualization coordinates",
                args.viz.as_deref().unwrap_or_default(),
                v.nrows()
            ));
        }
    }

    let build_args = BuildReferenceArgs {
        name: args.name.clone(),
        n_genes: args.n_genes,
        dim: args.dim,
        num_clusters: args.num_clusters,
        sigma: args.sigma,
        seed: args.seed,
        ..Default::default()
    };

    let atlas = build_reference(
        ReferenceInput {
            counts,
            genes,
            cells,
            donors,
            labels,
            embedding,
            viz,
        },
        &build_args,
    )?;

    atlas.save(&args.out)?;
    info!("done");
    Ok(())
}

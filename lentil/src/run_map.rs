use crate::cli_common::*;
use clap::Args;
use lentil::common::*;
use lentil::output::*;
use lentil::pipeline::map_query;
use lentil::reference::ReferenceAtlas;

#[derive(Args, Debug)]
pub struct MapArgs {
    #[command(flatten)]
    pub query: QueryInputArgs,

    #[arg(
        long,
        short,
        required = true,
        help = "Reference bundle built by `build-reference`"
    )]
    pub reference: Box<str>,

    #[command(flatten)]
    pub mapping: MappingCliArgs,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header. We will write:\n\
		     \n\
		     `{out}.cells.tsv.gz`: per-cell mapping error and labels\n\
		     `{out}.embedding.parquet`: cells x dimensions\n\
		     `{out}.viz.parquet`: cells x 2\n\
		     `{out}.composition.*.tsv.gz`: donor x label tables\n\
		     `{out}.params.json`: parameters used"
    )]
    pub out: Box<str>,
}

pub fn run_map(args: &MapArgs) -> anyhow::Result<()> {
    let query = args.query.read()?;
    let atlas = ReferenceAtlas::load(&args.reference)?;
    let params = args.mapping.to_params();

    let mapping = map_query(&query, &atlas, &params)?;
    write_mapping(&mapping, &args.out)?;

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "map",
            "reference": args.reference,
            "query": args.query.mtx,
            "num_cells": query.num_cells(),
            "num_overlap_genes": mapping.projection.num_overlap,
            "num_failed_qc": mapping.qc.num_failed(),
            "params": params,
        }),
    )?;

    info!("done");
    Ok(())
}

use clap::Args;
use lentil::common::*;
use lentil::output::composition_from_cell_table;

#[derive(Args, Debug)]
pub struct CompositionArgs {
    #[arg(
        required = true,
        help = "Cell table written by `map` or `two-stage` ({out}.cells.tsv.gz)"
    )]
    pub cells: Box<str>,

    #[arg(long, default_value = CELL_TYPE, help = "Categorical label to count")]
    pub label: Box<str>,

    #[arg(
        long,
        default_value_t = DEFAULT_CONFIDENCE_CUTOFF,
        help = "Minimum label confidence"
    )]
    pub confidence_cutoff: f32,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header. We will write\n\
		     `{out}.long.tsv.gz`, `{out}.counts.tsv.gz` and\n\
		     `{out}.proportions.tsv.gz`."
    )]
    pub out: Box<str>,
}

pub fn run_composition(args: &CompositionArgs) -> anyhow::Result<()> {
    let comp = composition_from_cell_table(&args.cells, &args.label, args.confidence_cutoff)?;
    comp.write_all(&args.out)?;
    info!("done");
    Ok(())
}

use crate::cli_common::*;
use clap::Args;
use lentil::common::*;
use lentil::output::*;
use lentil::pipeline::{default_allow_list, run_two_stage as map_two_stage};
use lentil::reference::ReferenceAtlas;

#[derive(Args, Debug)]
pub struct TwoStageArgs {
    #[command(flatten)]
    pub query: QueryInputArgs,

    #[arg(
        long,
        required = true,
        help = "Broad reference bundle (stage 1)",
        long_help = "Broad reference covering all expected lineages.\n\
		     Every query cell is mapped here first."
    )]
    pub broad: Box<str>,

    #[arg(
        long,
        required = true,
        help = "Focused reference bundle (stage 2)",
        long_help = "Focused reference for one developmental lineage.\n\
		     Only cells whose stage-1 cell type is allowed\n\
		     are mapped here."
    )]
    pub focused: Box<str>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Stage-1 cell types passed on to stage 2",
        long_help = "Comma-separated stage-1 cell types passed on to\n\
		     stage 2. Defaults to the B-lymphoid developmental path\n\
		     (HSC, MPP, LMPP, CLP, Pre-pro-B, Pro-B, Pre-B,\n\
		     Immature B, Naive B, Memory B)."
    )]
    pub allow: Option<Vec<Box<str>>>,

    #[command(flatten)]
    pub mapping: MappingCliArgs,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header. We will write `{out}.stage1.*` and\n\
		     `{out}.stage2.*` as `map` does, and `{out}.params.json`."
    )]
    pub out: Box<str>,
}

pub fn run_two_stage(args: &TwoStageArgs) -> anyhow::Result<()> {
    let query = args.query.read()?;
    let broad = ReferenceAtlas::load(&args.broad)?;
    let focused = ReferenceAtlas::load(&args.focused)?;
    let params = args.mapping.to_params();

    let allow = args.allow.clone().unwrap_or_else(default_allow_list);

    let result = map_two_stage(&query, &broad, &focused, &allow, &params)?;

    write_mapping(&result.stage1, &format!("{}.stage1", args.out))?;

    let selected: Vec<Box<str>> = result
        .selected
        .iter()
        .map(|&i| query.cells[i].clone())
        .collect();
    write_lines(&selected, &format!("{}.stage1.selected.gz", args.out))?;

    if let Some(stage2) = result.stage2.as_ref() {
        write_mapping(stage2, &format!("{}.stage2", args.out))?;
    }

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "two-stage",
            "broad": args.broad,
            "focused": args.focused,
            "query": args.query.mtx,
            "allow": allow,
            "num_cells": query.num_cells(),
            "num_selected": result.selected.len(),
            "params": params,
        }),
    )?;

    info!("done");
    Ok(())
}

mod cli_common;
mod run_build;
mod run_composition;
mod run_map;
mod run_two_stage;

use run_build::*;
use run_composition::*;
use run_map::*;
use run_two_stage::*;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lentil")]
#[command(about = "Label transfer by nearest reference cells after batch-corrected projection")]
struct Cli {
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a reference bundle from annotated reference counts
    BuildReference(BuildReferenceCliArgs),
    /// Map query cells onto one reference and transfer its labels
    Map(MapArgs),
    /// Map onto a broad reference, then map selected cells onto a focused one
    TwoStage(TwoStageArgs),
    /// Recompute per-donor composition tables from a cell table
    Composition(CompositionArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::BuildReference(args) => {
            run_build(args)?;
        }
        Commands::Map(args) => {
            run_map(args)?;
        }
        Commands::TwoStage(args) => {
            run_two_stage(args)?;
        }
        Commands::Composition(args) => {
            run_composition(args)?;
        }
    }

    Ok(())
}

use super::CliError;
use super::helpers::{render_stack_report, render_trajectory_summary, write_stdout};
use kmap_core::load_fit_config;
use kmap_core::modules::serialization::{
    render_trajectory_table, write_trajectory_json, write_trajectory_table,
};
use kmap_core::modules::traits::SlicedDataSource;
use kmap_core::modules::{JsonStackSource, MapBundle};
use kmap_core::run_decomposition;
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Args)]
pub(super) struct FitArgs {
    /// Fit configuration (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Reference orbital map bundle (JSON)
    #[arg(long)]
    references: PathBuf,

    /// Sliced data stack to decompose (JSON)
    #[arg(long)]
    stack: PathBuf,

    /// Trajectory JSON output path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Whitespace table output path; printed to stdout when neither output is given
    #[arg(long)]
    table: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct InspectArgs {
    /// Sliced data stack (JSON)
    #[arg(long)]
    stack: PathBuf,
}

pub(super) fn run_fit_command(args: FitArgs) -> Result<i32, CliError> {
    let config = load_fit_config(&args.config)?;
    let bundle = MapBundle::load(&args.references)?;
    let source = JsonStackSource::new(&args.stack);

    let trajectory = run_decomposition(&config, &bundle, &source)?;

    if let Some(output) = &args.output {
        write_trajectory_json(output, &trajectory)?;
        info!(path = %output.display(), "trajectory json written");
    }
    if let Some(table) = &args.table {
        write_trajectory_table(table, &trajectory)?;
        info!(path = %table.display(), "trajectory table written");
    }
    if args.output.is_none() && args.table.is_none() {
        write_stdout(&render_trajectory_table(&trajectory))?;
    } else {
        write_stdout(&render_trajectory_summary(&trajectory))?;
    }
    Ok(0)
}

pub(super) fn run_inspect_command(args: InspectArgs) -> Result<i32, CliError> {
    let stack = JsonStackSource::new(&args.stack).load()?;
    write_stdout(&render_stack_report(&stack))?;
    Ok(0)
}

//! End-to-end decomposition run driven by a [`FitConfig`].

use crate::common::config::FitConfig;
use crate::domain::KmapResult;
use crate::modules::decomposition::{ReferenceSet, SliceFitter, Trajectory, TrajectoryAssembler};
use crate::modules::traits::{OrbitalMapProvider, SlicedDataSource};
use crate::numerics::GridResampler;
use tracing::info;

/// Builds the reference set, loads the stack and fits it according to the
/// configured slice policy.
///
/// Setup problems (configuration, provider, grid mismatch) are returned as
/// errors before any slice is fitted. Slice-level failures are recorded in
/// the trajectory.
pub fn run_decomposition<P, S>(config: &FitConfig, provider: &P, source: &S) -> KmapResult<Trajectory>
where
    P: OrbitalMapProvider + ?Sized,
    S: SlicedDataSource + ?Sized,
{
    config.validate()?;
    let grid = config.target_grid()?;
    let resampler = GridResampler::new(config.interpolation);
    let references = ReferenceSet::build(
        provider,
        &config.references,
        &config.geometry,
        grid,
        &resampler,
    )?;
    let background = config.background.compile()?;
    let template = config.parameter_template(&background)?;
    let stack = source.load()?;
    info!(
        stack = stack.name(),
        shape = ?stack.shape(),
        parameters = template.len(),
        policy = ?config.slice_policy,
        "decomposition inputs ready"
    );

    let fitter = SliceFitter::new(
        &references,
        &background,
        &config.region,
        config.interpolation,
        config.optimizer.clone(),
    );
    TrajectoryAssembler::new(fitter)
        .with_execution(config.execution)
        .with_warm_start(config.warm_start)
        .run_policy(&stack, config.slice_axis, config.slice_policy, &template)
}

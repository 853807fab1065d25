use super::fitter::{SliceFitter, SliceResult};
use super::parameters::ParameterTemplate;
use crate::domain::{ExecutionMode, KmapResult};
use crate::modules::slicing::{SliceView, SlicedStack};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which slices of the stack are fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SlicePolicy {
    OnlyOne {
        index: usize,
    },
    #[default]
    All,
    /// One fit of the NaN-aware sum over all slices.
    AllCombined,
}

/// Per-slice results in slice order, with the slicing axis attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    axis_label: String,
    axis_units: String,
    parameter_names: Vec<String>,
    slices: Vec<SliceResult>,
}

impl Trajectory {
    pub fn new(
        axis_label: impl Into<String>,
        axis_units: impl Into<String>,
        parameter_names: Vec<String>,
        slices: Vec<SliceResult>,
    ) -> Self {
        Self {
            axis_label: axis_label.into(),
            axis_units: axis_units.into(),
            parameter_names,
            slices,
        }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SliceResult> {
        self.slices.get(index)
    }

    pub fn slices(&self) -> &[SliceResult] {
        &self.slices
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn axis_label(&self) -> &str {
        &self.axis_label
    }

    pub fn axis_units(&self) -> &str {
        &self.axis_units
    }

    pub fn axis_values(&self) -> Vec<f64> {
        self.slices.iter().map(|slice| slice.axis_value).collect()
    }

    /// Values of one parameter across all slices.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let position = self.parameter_names.iter().position(|known| known == name)?;
        Some(
            self.slices
                .iter()
                .map(|slice| {
                    slice
                        .parameters
                        .get(position)
                        .map_or(f64::NAN, |parameter| parameter.value)
                })
                .collect(),
        )
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.slices
            .iter()
            .filter(|slice| slice.status.is_failed())
            .map(|slice| slice.index)
            .collect()
    }

    pub fn degenerate_indices(&self) -> Vec<usize> {
        self.slices
            .iter()
            .filter(|slice| slice.status.is_degenerate())
            .map(|slice| slice.index)
            .collect()
    }
}

/// Runs a [`SliceFitter`] over a stack.
#[derive(Debug, Clone)]
pub struct TrajectoryAssembler<'a> {
    fitter: SliceFitter<'a>,
    execution: ExecutionMode,
    warm_start: bool,
}

impl<'a> TrajectoryAssembler<'a> {
    pub fn new(fitter: SliceFitter<'a>) -> Self {
        Self {
            fitter,
            execution: ExecutionMode::Serial,
            warm_start: false,
        }
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    /// Seed each slice from the last successful one. Only honored in serial
    /// execution.
    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
    }

    pub fn run_policy(
        &self,
        stack: &SlicedStack,
        axis: usize,
        policy: SlicePolicy,
        template: &ParameterTemplate,
    ) -> KmapResult<Trajectory> {
        match policy {
            SlicePolicy::OnlyOne { index } => self.run_single(stack, axis, index, template),
            SlicePolicy::All => self.run(stack, axis, template),
            SlicePolicy::AllCombined => self.run_combined(stack, axis, template),
        }
    }

    /// Fits every slice along `axis`. The trajectory always has one entry
    /// per slice, in slice order, whatever the individual fits report.
    pub fn run(
        &self,
        stack: &SlicedStack,
        axis: usize,
        template: &ParameterTemplate,
    ) -> KmapResult<Trajectory> {
        let slice_axis = stack.axis(axis)?;
        stack.plane_grid(axis)?;
        let count = slice_axis.num;
        info!(
            stack = stack.name(),
            slices = count,
            references = self.fitter.references().len(),
            method = %self.fitter.settings().method,
            execution = ?self.execution,
            "starting decomposition"
        );

        let slices = match self.execution {
            ExecutionMode::Parallel => {
                if self.warm_start {
                    warn!("warm start is ignored in parallel execution");
                }
                (0..count)
                    .into_par_iter()
                    .map(|index| {
                        let slice = stack.extract(index, axis)?;
                        Ok(self.fit_logged(&slice, template))
                    })
                    .collect::<KmapResult<Vec<_>>>()?
            }
            ExecutionMode::Serial => {
                let mut results: Vec<SliceResult> = Vec::with_capacity(count);
                let mut seed: Option<Vec<f64>> = None;
                for index in 0..count {
                    let slice = stack.extract(index, axis)?;
                    let result = match (&seed, self.warm_start) {
                        (Some(values), true) => {
                            self.fit_logged(&slice, &template.seeded(values))
                        }
                        _ => self.fit_logged(&slice, template),
                    };
                    if result.status.is_success() {
                        seed = Some(result.values());
                    }
                    results.push(result);
                }
                results
            }
        };

        let trajectory = Trajectory::new(
            slice_axis.label.clone(),
            slice_axis.units.clone(),
            template.names(),
            slices,
        );
        info!(
            slices = trajectory.len(),
            failed = trajectory.failed_indices().len(),
            degenerate = trajectory.degenerate_indices().len(),
            "decomposition finished"
        );
        Ok(trajectory)
    }

    /// Fits the slice at `index` only.
    pub fn run_single(
        &self,
        stack: &SlicedStack,
        axis: usize,
        index: usize,
        template: &ParameterTemplate,
    ) -> KmapResult<Trajectory> {
        let slice = stack.extract(index, axis)?;
        Ok(self.single_trajectory(slice, template))
    }

    /// Fits the NaN-aware sum over all slices along `axis`.
    pub fn run_combined(
        &self,
        stack: &SlicedStack,
        axis: usize,
        template: &ParameterTemplate,
    ) -> KmapResult<Trajectory> {
        let slice = stack.combined(axis)?;
        Ok(self.single_trajectory(slice, template))
    }

    fn single_trajectory(&self, slice: SliceView, template: &ParameterTemplate) -> Trajectory {
        let result = self.fit_logged(&slice, template);
        Trajectory::new(
            slice.axis_label,
            slice.axis_units,
            template.names(),
            vec![result],
        )
    }

    fn fit_logged(&self, slice: &SliceView, template: &ParameterTemplate) -> SliceResult {
        let result = self.fitter.fit(slice, template);
        debug!(
            slice = result.index,
            axis_value = result.axis_value,
            status = result.status.label(),
            residual_norm = result.residual_norm,
            iterations = result.iterations,
            "slice fitted"
        );
        if result.status.is_failed() || result.status.is_degenerate() {
            warn!(
                slice = result.index,
                axis_value = result.axis_value,
                status = %result.status,
                "slice fit needs attention"
            );
        }
        result
    }
}

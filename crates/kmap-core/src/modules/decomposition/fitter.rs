use super::model::DecompositionModel;
use super::parameters::ParameterTemplate;
use super::reference::ReferenceSet;
use crate::domain::DecompositionError;
use crate::modules::background::BackgroundBasis;
use crate::modules::region::FitRegion;
use crate::modules::slicing::SliceView;
use crate::numerics::{
    estimate_covariance, minimize, GridResampler, InterpolationMethod, OptimizerMethod,
    OptimizerOptions,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Nothing left to fit after masking.
    NoValidData,
    /// Iteration cap reached.
    NotConverged,
    /// The optimizer rejected the problem.
    Numerical,
}

impl FailureReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoValidData => "no_valid_data",
            Self::NotConverged => "not_converged",
            Self::Numerical => "numerical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SliceStatus {
    Converged,
    /// Converged, but the listed parameters are not identified by the data.
    Degenerate { columns: Vec<String> },
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl SliceStatus {
    pub fn is_success(&self) -> bool {
        !self.is_failed()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Degenerate { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Degenerate { .. } => "degenerate",
            Self::Failed { reason, .. } => reason.as_str(),
        }
    }
}

impl Display for SliceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => f.write_str("converged"),
            Self::Degenerate { columns } => write!(f, "degenerate ({})", columns.join(", ")),
            Self::Failed { reason, message } => write!(f, "failed ({}): {message}", reason.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedParameter {
    pub name: String,
    pub value: f64,
    pub stderr: Option<f64>,
    pub vary: bool,
}

/// Outcome of fitting one slice. Created once and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceResult {
    pub index: usize,
    pub axis_value: f64,
    pub parameters: Vec<FittedParameter>,
    pub status: SliceStatus,
    pub residual_norm: f64,
    pub chisqr: f64,
    pub redchi: f64,
    pub n_points: usize,
    pub n_varys: usize,
    pub iterations: usize,
}

impl SliceResult {
    fn unfitted(
        slice: &SliceView,
        template: &ParameterTemplate,
        values: Vec<f64>,
        reason: FailureReason,
        message: String,
    ) -> Self {
        Self {
            index: slice.index,
            axis_value: slice.axis_value,
            parameters: template
                .iter()
                .zip(values)
                .map(|(parameter, value)| FittedParameter {
                    name: parameter.name.clone(),
                    value,
                    stderr: None,
                    vary: parameter.vary,
                })
                .collect(),
            status: SliceStatus::Failed { reason, message },
            residual_norm: f64::NAN,
            chisqr: f64::NAN,
            redchi: f64::NAN,
            n_points: 0,
            n_varys: template.n_varys(),
            iterations: 0,
        }
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .map(|parameter| parameter.value)
    }

    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|parameter| parameter.value).collect()
    }

    /// The failure expressed in the shared error taxonomy.
    pub fn error(&self) -> Option<DecompositionError> {
        match &self.status {
            SliceStatus::Failed {
                reason: FailureReason::NoValidData,
                message,
            } => Some(DecompositionError::invalid_data(format!(
                "slice {}: {message}",
                self.index
            ))),
            SliceStatus::Failed { message, .. } => Some(DecompositionError::convergence(format!(
                "slice {}: {message}",
                self.index
            ))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSettings {
    pub method: OptimizerMethod,
    #[serde(flatten)]
    pub options: OptimizerOptions,
}

/// Fits single slices against a fixed reference set.
#[derive(Debug, Clone)]
pub struct SliceFitter<'a> {
    references: &'a ReferenceSet,
    background: &'a BackgroundBasis,
    region: &'a FitRegion,
    resampler: GridResampler,
    settings: FitSettings,
}

impl<'a> SliceFitter<'a> {
    pub fn new(
        references: &'a ReferenceSet,
        background: &'a BackgroundBasis,
        region: &'a FitRegion,
        interpolation: InterpolationMethod,
        settings: FitSettings,
    ) -> Self {
        Self {
            references,
            background,
            region,
            resampler: GridResampler::new(interpolation),
            settings,
        }
    }

    pub fn references(&self) -> &ReferenceSet {
        self.references
    }

    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    /// Resamples the slice onto the reference grid and fits it. Failures are
    /// recorded on the result; this never aborts.
    pub fn fit(&self, slice: &SliceView, template: &ParameterTemplate) -> SliceResult {
        let target = self.resampler.resample(&slice.map, self.references.grid());
        let model = match DecompositionModel::new(
            self.references,
            self.background,
            template,
            &target,
            self.region,
            slice.axis_value,
        ) {
            Ok(model) => model,
            Err(DecompositionError::InvalidData { message }) => {
                return SliceResult::unfitted(
                    slice,
                    template,
                    vec![f64::NAN; template.len()],
                    FailureReason::NoValidData,
                    message,
                );
            }
            Err(error) => {
                return SliceResult::unfitted(
                    slice,
                    template,
                    template.start_values(),
                    FailureReason::Numerical,
                    error.to_string(),
                );
            }
        };

        let n_points = model.n_points();
        let n_varys = model.n_varys();
        let initial = model.initial_free();

        let (free, converged, degenerate, iterations, message) = if n_varys == 0 {
            (Vec::new(), true, Vec::new(), 0, String::new())
        } else {
            match minimize(
                self.settings.method,
                &model,
                &initial,
                &model.free_bounds(),
                &self.settings.options,
            ) {
                Ok(outcome) => (
                    outcome.params,
                    outcome.converged,
                    outcome.degenerate,
                    outcome.iterations,
                    outcome.message,
                ),
                Err(error) => {
                    return SliceResult::unfitted(
                        slice,
                        template,
                        template.start_values(),
                        FailureReason::Numerical,
                        error.to_string(),
                    );
                }
            }
        };

        let chisqr = model.chisqr(&free);
        let nfree = n_points.saturating_sub(n_varys);
        let redchi = if nfree > 0 {
            chisqr / nfree as f64
        } else {
            f64::NAN
        };

        let stderr = if converged && degenerate.is_empty() && nfree > 0 && n_varys > 0 {
            estimate_covariance(&model, &free).map(|covariance| {
                (0..n_varys)
                    .map(|index| (covariance[(index, index)] * redchi).sqrt())
                    .collect::<Vec<_>>()
            })
        } else {
            None
        };

        let full = model.full_parameters(&free);
        let mut free_slot = 0;
        let parameters = template
            .iter()
            .zip(full)
            .map(|(parameter, value)| {
                let error = if parameter.vary {
                    let error = stderr.as_ref().map(|errors| errors[free_slot]);
                    free_slot += 1;
                    error
                } else {
                    None
                };
                FittedParameter {
                    name: parameter.name.clone(),
                    value,
                    stderr: error.filter(|value| value.is_finite()),
                    vary: parameter.vary,
                }
            })
            .collect();

        let status = if !converged {
            SliceStatus::Failed {
                reason: FailureReason::NotConverged,
                message,
            }
        } else if !degenerate.is_empty() {
            SliceStatus::Degenerate {
                columns: degenerate
                    .iter()
                    .map(|&column| template.as_slice()[model.varying()[column]].name.clone())
                    .collect(),
            }
        } else {
            SliceStatus::Converged
        };

        SliceResult {
            index: slice.index,
            axis_value: slice.axis_value,
            parameters,
            status,
            residual_norm: chisqr.sqrt(),
            chisqr,
            redchi,
            n_points,
            n_varys,
            iterations,
        }
    }
}

//! Background terms added to the weighted reference sum.

mod expression;

pub use expression::{EvaluationPoint, Expression, ExpressionError, RESERVED_NAMES};

use crate::domain::{DecompositionError, KmapResult};
use crate::modules::decomposition::Parameter;
use serde::{Deserialize, Serialize};

pub const BACKGROUND_PARAMETER: &str = "background";
pub const BACKGROUND_SLOPE_PARAMETER: &str = "background_slope";
pub const DEFAULT_BACKGROUND: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearAxis {
    #[default]
    Kx,
    Ky,
    /// Radial momentum `sqrt(kx² + ky²)`.
    K,
}

impl LinearAxis {
    pub fn coordinate(self, point: &EvaluationPoint) -> f64 {
        match self {
            Self::Kx => point.kx,
            Self::Ky => point.ky,
            Self::K => point.kx.hypot(point.ky),
        }
    }
}

/// Whether expression parameters are fitted on every slice or held at their
/// configured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundRefit {
    #[default]
    PerSlice,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionParameter {
    pub name: String,
    #[serde(default, alias = "initial")]
    pub value: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Background as written in configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackgroundModel {
    None,
    #[default]
    Constant,
    Linear {
        #[serde(default)]
        axis: LinearAxis,
    },
    Expression {
        equation: String,
        #[serde(default)]
        parameters: Vec<ExpressionParameter>,
        #[serde(default)]
        refit: BackgroundRefit,
    },
}

impl BackgroundModel {
    /// Parses expression backgrounds; the result is what the fitter evaluates.
    pub fn compile(&self) -> KmapResult<BackgroundBasis> {
        match self {
            Self::None => Ok(BackgroundBasis::None),
            Self::Constant => Ok(BackgroundBasis::Constant),
            Self::Linear { axis } => Ok(BackgroundBasis::Linear { axis: *axis }),
            Self::Expression {
                equation,
                parameters,
                refit,
            } => {
                let names: Vec<String> = parameters
                    .iter()
                    .map(|parameter| parameter.name.clone())
                    .collect();
                let expression = Expression::parse(equation, &names).map_err(|error| {
                    DecompositionError::invalid_configuration(format!(
                        "background equation '{equation}': {error}"
                    ))
                })?;
                Ok(BackgroundBasis::Expression {
                    expression,
                    parameters: parameters.clone(),
                    refit: *refit,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundBasis {
    None,
    Constant,
    Linear {
        axis: LinearAxis,
    },
    Expression {
        expression: Expression,
        parameters: Vec<ExpressionParameter>,
        refit: BackgroundRefit,
    },
}

impl BackgroundBasis {
    /// Template entries for the background, in evaluation order.
    pub fn parameters(&self) -> Vec<Parameter> {
        match self {
            Self::None => Vec::new(),
            Self::Constant => {
                vec![Parameter::new(BACKGROUND_PARAMETER, DEFAULT_BACKGROUND).non_negative()]
            }
            Self::Linear { .. } => vec![
                Parameter::new(BACKGROUND_PARAMETER, DEFAULT_BACKGROUND).non_negative(),
                Parameter::new(BACKGROUND_SLOPE_PARAMETER, 0.0),
            ],
            Self::Expression {
                parameters, refit, ..
            } => parameters
                .iter()
                .map(|parameter| {
                    Parameter::new(parameter.name.clone(), parameter.value)
                        .with_bounds(
                            parameter.min.unwrap_or(f64::NEG_INFINITY),
                            parameter.max.unwrap_or(f64::INFINITY),
                        )
                        .with_vary(*refit == BackgroundRefit::PerSlice)
                })
                .collect(),
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Constant => 1,
            Self::Linear { .. } => 2,
            Self::Expression { parameters, .. } => parameters.len(),
        }
    }

    /// Constant and linear backgrounds keep the model linear in all parameters.
    pub fn is_linear(&self) -> bool {
        !matches!(self, Self::Expression { .. })
    }

    pub fn evaluate(&self, point: &EvaluationPoint, params: &[f64]) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Constant => params[0],
            Self::Linear { axis } => params[0] + params[1] * axis.coordinate(point),
            Self::Expression { expression, .. } => expression.evaluate(point, params),
        }
    }

    /// Derivative of the background with respect to parameter `index`, for
    /// the linear variants. Expression backgrounds return `None`.
    pub fn derivative(&self, point: &EvaluationPoint, index: usize) -> Option<f64> {
        match (self, index) {
            (Self::Constant | Self::Linear { .. }, 0) => Some(1.0),
            (Self::Linear { axis }, 1) => Some(axis.coordinate(point)),
            _ => None,
        }
    }
}

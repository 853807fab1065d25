//! Bounded nonlinear least squares.
//!
//! Problems are posed as a residual vector `r(p)` over a parameter vector
//! `p` with per-parameter lower/upper bounds. Two strategies are available:
//!
//! - [`OptimizerMethod::ActiveSet`]: bounded Gauss-Newton. Each linearized
//!   step is solved exactly by an active-set bounded-variable least squares
//!   routine, so problems that are linear in `p` finish in one iteration.
//! - [`OptimizerMethod::LevenbergMarquardt`]: damped Gauss-Newton with the
//!   trial point projected back into the bounds.
//!
//! Both stop after `max_iterations` and report `converged = false` in that
//! case together with the best parameters seen.

mod active_set;
mod levenberg_marquardt;

use super::linalg::{cholesky_factorize, principal_submatrix, CholeskyError, DenseMatrix};
use super::stable_sum_of_squares;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

const FORWARD_DIFFERENCE_STEP: f64 = 1.0e-7;

/// Residual-vector objective consumed by [`minimize`].
pub trait ResidualProblem {
    fn parameter_count(&self) -> usize;

    fn residual_count(&self) -> usize;

    fn residuals(&self, params: &[f64], out: &mut [f64]);

    /// `residual_count x parameter_count` matrix of `∂r_i/∂p_j`.
    fn jacobian(&self, params: &[f64]) -> DenseMatrix {
        forward_difference_jacobian(self, params)
    }

    /// True when the residuals are affine in the parameters, so the Jacobian
    /// is constant and a single exact linear solve is the full answer.
    fn is_linear(&self) -> bool {
        false
    }
}

pub fn forward_difference_jacobian<P>(problem: &P, params: &[f64]) -> DenseMatrix
where
    P: ResidualProblem + ?Sized,
{
    let rows = problem.residual_count();
    let cols = problem.parameter_count();
    let mut jacobian = DenseMatrix::zeros(rows, cols);
    let mut base = vec![0.0; rows];
    let mut shifted = vec![0.0; rows];
    problem.residuals(params, &mut base);

    let mut probe = params.to_vec();
    for col in 0..cols {
        let step = FORWARD_DIFFERENCE_STEP * params[col].abs().max(1.0);
        probe[col] = params[col] + step;
        problem.residuals(&probe, &mut shifted);
        probe[col] = params[col];

        for row in 0..rows {
            jacobian[(row, col)] = (shifted[row] - base[row]) / step;
        }
    }

    jacobian
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub const fn unbounded() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub const fn non_negative() -> Self {
        Self::new(0.0, f64::INFINITY)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn is_feasible(&self) -> bool {
        !self.lower.is_nan() && !self.upper.is_nan() && self.lower <= self.upper
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1.0e-10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMethod {
    #[default]
    #[serde(alias = "bvls", alias = "nnls")]
    ActiveSet,
    #[serde(alias = "leastsq", alias = "lm")]
    LevenbergMarquardt,
}

impl OptimizerMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ActiveSet => "active_set",
            Self::LevenbergMarquardt => "levenberg_marquardt",
        }
    }
}

impl Display for OptimizerMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerMethod {
    type Err = OptimizerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active_set" | "active-set" | "bvls" | "nnls" => Ok(Self::ActiveSet),
            "levenberg_marquardt" | "levenberg-marquardt" | "leastsq" | "lm" => {
                Ok(Self::LevenbergMarquardt)
            }
            _ => Err(OptimizerError::UnknownMethod {
                name: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    pub params: Vec<f64>,
    pub converged: bool,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub residual_norm: f64,
    pub iterations: usize,
    /// Parameters whose value is not identified by the data: their column is
    /// zero or a combination of the columns of the free parameters.
    pub degenerate: Vec<usize>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizerError {
    #[error("unknown optimizer method '{name}'")]
    UnknownMethod { name: String },
    #[error("parameter length mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("bound for parameter {index} is infeasible: [{lower}, {upper}]")]
    InfeasibleBound { index: usize, lower: f64, upper: f64 },
    #[error("problem has no residuals")]
    EmptyResiduals,
    #[error("residual vector contains non-finite values")]
    NonFiniteResidual,
    #[error(transparent)]
    Factorization(#[from] CholeskyError),
}

/// Minimizes `Σ r_i(p)²` subject to `bounds`, starting from `initial`
/// projected into the bounds.
pub fn minimize<P>(
    method: OptimizerMethod,
    problem: &P,
    initial: &[f64],
    bounds: &[Bound],
    options: &OptimizerOptions,
) -> Result<OptimizerOutcome, OptimizerError>
where
    P: ResidualProblem + ?Sized,
{
    let parameter_count = problem.parameter_count();
    if initial.len() != parameter_count {
        return Err(OptimizerError::DimensionMismatch {
            expected: parameter_count,
            actual: initial.len(),
        });
    }
    if bounds.len() != parameter_count {
        return Err(OptimizerError::DimensionMismatch {
            expected: parameter_count,
            actual: bounds.len(),
        });
    }
    for (index, bound) in bounds.iter().enumerate() {
        if !bound.is_feasible() {
            return Err(OptimizerError::InfeasibleBound {
                index,
                lower: bound.lower,
                upper: bound.upper,
            });
        }
    }
    if problem.residual_count() == 0 {
        return Err(OptimizerError::EmptyResiduals);
    }

    let start: Vec<f64> = initial
        .iter()
        .zip(bounds)
        .map(|(value, bound)| bound.clamp(*value))
        .collect();

    match method {
        OptimizerMethod::ActiveSet => active_set::minimize(problem, start, bounds, options),
        OptimizerMethod::LevenbergMarquardt => {
            levenberg_marquardt::minimize(problem, start, bounds, options)
        }
    }
}

/// Inverse of `JᵀJ` at `params`, or `None` when the normal matrix is singular.
pub fn estimate_covariance<P>(problem: &P, params: &[f64]) -> Option<DenseMatrix>
where
    P: ResidualProblem + ?Sized,
{
    if problem.parameter_count() == 0 {
        return None;
    }
    let jacobian = problem.jacobian(params);
    let residuals = vec![0.0; problem.residual_count()];
    let (normal, _) = normal_equations(&jacobian, &residuals);
    cholesky_factorize(&normal).ok()?.invert().ok()
}

/// `(JᵀJ, Jᵀr)`.
pub(crate) fn normal_equations(jacobian: &DenseMatrix, residuals: &[f64]) -> (DenseMatrix, Vec<f64>) {
    let rows = jacobian.nrows();
    let cols = jacobian.ncols();
    let mut normal = DenseMatrix::zeros(cols, cols);
    let mut gradient = vec![0.0; cols];

    for i in 0..cols {
        let mut g = 0.0;
        for row in 0..rows {
            g += jacobian[(row, i)] * residuals[row];
        }
        gradient[i] = g;

        for j in i..cols {
            let mut value = 0.0;
            for row in 0..rows {
                value += jacobian[(row, i)] * jacobian[(row, j)];
            }
            normal[(i, j)] = value;
            normal[(j, i)] = value;
        }
    }

    (normal, gradient)
}

pub(crate) fn evaluate_cost<P>(problem: &P, params: &[f64], residuals: &mut [f64]) -> f64
where
    P: ResidualProblem + ?Sized,
{
    problem.residuals(params, residuals);
    if residuals.iter().any(|value| !value.is_finite()) {
        return f64::INFINITY;
    }
    stable_sum_of_squares(residuals)
}

/// Columns that are zero or fall inside the span of the earlier columns of
/// `indices`, scanning in order.
pub(crate) fn dependent_columns(normal: &DenseMatrix, indices: &[usize]) -> Vec<usize> {
    let mut independent: Vec<usize> = Vec::with_capacity(indices.len());
    let mut dependent = Vec::new();

    for &index in indices {
        if extends_independent_set(normal, &independent, index) {
            independent.push(index);
        } else {
            dependent.push(index);
        }
    }

    dependent
}

pub(crate) fn extends_independent_set(
    normal: &DenseMatrix,
    independent: &[usize],
    candidate: usize,
) -> bool {
    if normal[(candidate, candidate)] <= 0.0 {
        return false;
    }
    let mut indices = independent.to_vec();
    indices.push(candidate);
    cholesky_factorize(&principal_submatrix(normal, &indices)).is_ok()
}

pub(crate) fn euclidean_norm(values: &[f64]) -> f64 {
    stable_sum_of_squares(values).sqrt()
}

//! Projected Levenberg-Marquardt.
//!
//! Variables sitting on a bound whose gradient points out of the box are
//! frozen for the step; the remaining ones take a damped Gauss-Newton step
//! that is then clipped back into the bounds.

use super::{
    dependent_columns, euclidean_norm, evaluate_cost, normal_equations, Bound, OptimizerError,
    OptimizerOptions, OptimizerOutcome, ResidualProblem,
};
use crate::numerics::linalg::{cholesky_solve, DenseMatrix};

const INITIAL_LAMBDA: f64 = 1.0e-3;
const LAMBDA_DECREASE: f64 = 0.1;
const LAMBDA_INCREASE: f64 = 10.0;
const MIN_LAMBDA: f64 = 1.0e-12;
const MAX_LAMBDA: f64 = 1.0e12;
const DIAGONAL_FLOOR: f64 = 1.0e-12;

pub(super) fn minimize<P>(
    problem: &P,
    mut params: Vec<f64>,
    bounds: &[Bound],
    options: &OptimizerOptions,
) -> Result<OptimizerOutcome, OptimizerError>
where
    P: ResidualProblem + ?Sized,
{
    let n = params.len();
    let mut residuals = vec![0.0; problem.residual_count()];
    let mut cost = evaluate_cost(problem, &params, &mut residuals);
    if !cost.is_finite() {
        return Err(OptimizerError::NonFiniteResidual);
    }

    let mut trial = params.clone();
    let mut trial_residuals = residuals.clone();
    let mut lambda = INITIAL_LAMBDA;
    let mut converged = false;
    let mut iterations = 0;
    let mut message = String::from("iteration limit reached");
    let mut last_normal: Option<DenseMatrix> = None;

    while iterations < options.max_iterations {
        iterations += 1;

        let jacobian = problem.jacobian(&params);
        let (normal, gradient) = normal_equations(&jacobian, &residuals);

        let active: Vec<usize> = (0..n)
            .filter(|&index| !is_frozen(bounds[index], params[index], gradient[index]))
            .collect();
        let projected = active
            .iter()
            .map(|&index| gradient[index].powi(2))
            .sum::<f64>()
            .sqrt();
        last_normal = Some(normal.clone());

        if active.is_empty() || projected <= options.tolerance * (1.0 + cost.sqrt()) {
            converged = true;
            message = String::from("projected gradient below tolerance");
            break;
        }

        let max_diagonal = active
            .iter()
            .map(|&index| normal[(index, index)])
            .fold(0.0_f64, f64::max);
        let floor = if max_diagonal > 0.0 {
            DIAGONAL_FLOOR * max_diagonal
        } else {
            1.0
        };

        let mut accepted = None;
        while lambda <= MAX_LAMBDA {
            let damped = damped_subsystem(&normal, &active, lambda, floor);
            let rhs: Vec<f64> = active.iter().map(|&index| -gradient[index]).collect();

            let step = match cholesky_solve(&damped, &rhs) {
                Ok(step) => step,
                Err(_) => {
                    lambda *= LAMBDA_INCREASE;
                    continue;
                }
            };

            trial.copy_from_slice(&params);
            for (slot, &index) in active.iter().enumerate() {
                trial[index] = bounds[index].clamp(params[index] + step[slot]);
            }
            let trial_cost = evaluate_cost(problem, &trial, &mut trial_residuals);
            if trial_cost < cost {
                accepted = Some(trial_cost);
                lambda = (lambda * LAMBDA_DECREASE).max(MIN_LAMBDA);
                break;
            }
            lambda *= LAMBDA_INCREASE;
        }

        let Some(trial_cost) = accepted else {
            converged = true;
            message = String::from("damping exhausted without further decrease");
            break;
        };

        let step_norm = trial
            .iter()
            .zip(&params)
            .map(|(next, current)| (next - current).powi(2))
            .sum::<f64>()
            .sqrt();
        let param_norm = euclidean_norm(&params);
        let cost_change = cost - trial_cost;

        std::mem::swap(&mut params, &mut trial);
        std::mem::swap(&mut residuals, &mut trial_residuals);
        cost = trial_cost;

        if cost_change <= options.tolerance * cost
            || step_norm <= options.tolerance * (param_norm + options.tolerance)
        {
            converged = true;
            message = String::from("relative reduction below tolerance");
            break;
        }
    }

    let degenerate = match &last_normal {
        Some(normal) => {
            let indices: Vec<usize> = (0..n).collect();
            dependent_columns(normal, &indices)
        }
        None => Vec::new(),
    };

    if let Some(normal) = &last_normal {
        cost = rest_zero_columns(problem, normal, bounds, &mut params, cost);
    }

    Ok(OptimizerOutcome {
        params,
        converged,
        cost,
        residual_norm: cost.sqrt(),
        iterations,
        degenerate,
        message,
    })
}

/// Moves variables whose Jacobian column vanished onto the bound they would
/// rest on, keeping the move only when the cost does not increase.
fn rest_zero_columns<P>(
    problem: &P,
    normal: &DenseMatrix,
    bounds: &[Bound],
    params: &mut [f64],
    cost: f64,
) -> f64
where
    P: ResidualProblem + ?Sized,
{
    let mut rested = params.to_vec();
    let mut moved = false;
    for (index, value) in rested.iter_mut().enumerate() {
        if normal[(index, index)] > 0.0 {
            continue;
        }
        let bound = bounds[index];
        let target = if bound.lower.is_finite() {
            bound.lower
        } else if bound.upper.is_finite() {
            bound.upper
        } else {
            continue;
        };
        if *value != target {
            *value = target;
            moved = true;
        }
    }
    if !moved {
        return cost;
    }

    let mut residuals = vec![0.0; problem.residual_count()];
    let rested_cost = evaluate_cost(problem, &rested, &mut residuals);
    if rested_cost <= cost {
        params.copy_from_slice(&rested);
        rested_cost
    } else {
        cost
    }
}

fn is_frozen(bound: Bound, value: f64, gradient: f64) -> bool {
    (value <= bound.lower && gradient >= 0.0) || (value >= bound.upper && gradient <= 0.0)
}

fn damped_subsystem(normal: &DenseMatrix, active: &[usize], lambda: f64, floor: f64) -> DenseMatrix {
    let mut damped = DenseMatrix::zeros(active.len(), active.len());
    for (row, &source_row) in active.iter().enumerate() {
        for (col, &source_col) in active.iter().enumerate() {
            damped[(row, col)] = normal[(source_row, source_col)];
        }
        let diagonal = normal[(source_row, source_row)].max(floor);
        damped[(row, row)] += lambda * diagonal;
    }
    damped
}

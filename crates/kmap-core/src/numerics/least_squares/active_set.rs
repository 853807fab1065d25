//! Bounded Gauss-Newton with an exact active-set inner solver.
//!
//! The inner routine minimizes `½ δᵀGδ - cᵀδ` subject to `lower <= δ <= upper`
//! on the normal equations of the linearized problem. Bounded variables start
//! pinned to a finite bound and are only released when the gradient pulls
//! them into the interior, so parameters with no influence on the residuals
//! stay at their bound.

use super::{
    dependent_columns, euclidean_norm, evaluate_cost, extends_independent_set, normal_equations,
    Bound, OptimizerError, OptimizerOptions, OptimizerOutcome, ResidualProblem,
};
use crate::numerics::linalg::{cholesky_solve, principal_submatrix, DenseMatrix};

const MIN_STEP_SCALE: f64 = 1.0 / 1024.0;
const MIN_RESIDUAL_SCALE: f64 = 1.0e-300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariableState {
    AtLower,
    AtUpper,
    /// Unbounded variable held at zero until the gradient releases it.
    Held,
    Free,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct BoundedSolution {
    pub x: Vec<f64>,
    pub degenerate: Vec<usize>,
    pub converged: bool,
    pub iterations: usize,
}

pub(super) fn minimize<P>(
    problem: &P,
    mut params: Vec<f64>,
    bounds: &[Bound],
    options: &OptimizerOptions,
) -> Result<OptimizerOutcome, OptimizerError>
where
    P: ResidualProblem + ?Sized,
{
    let mut residuals = vec![0.0; problem.residual_count()];
    let mut cost = evaluate_cost(problem, &params, &mut residuals);
    if !cost.is_finite() {
        return Err(OptimizerError::NonFiniteResidual);
    }

    let mut trial = params.clone();
    let mut trial_residuals = residuals.clone();
    let mut degenerate = Vec::new();
    let mut converged = false;
    let mut iterations = 0;
    let mut message = String::from("iteration limit reached");

    while iterations < options.max_iterations {
        iterations += 1;

        let jacobian = problem.jacobian(&params);
        let (normal, gradient) = normal_equations(&jacobian, &residuals);
        let rhs: Vec<f64> = gradient.iter().map(|value| -value).collect();
        let step_bounds: Vec<Bound> = bounds
            .iter()
            .zip(&params)
            .map(|(bound, value)| Bound::new(bound.lower - value, bound.upper - value))
            .collect();

        let solution = solve_bounded(&normal, &rhs, &step_bounds, cost.sqrt(), options)?;
        degenerate = solution.degenerate;
        if !solution.converged {
            message = format!(
                "active-set solver did not settle within {} steps",
                solution.iterations
            );
            break;
        }

        let mut scale = 1.0;
        let mut trial_cost = f64::INFINITY;
        while scale >= MIN_STEP_SCALE {
            for ((slot, (value, step)), bound) in trial
                .iter_mut()
                .zip(params.iter().zip(&solution.x))
                .zip(bounds)
            {
                *slot = bound.clamp(value + scale * step);
            }
            trial_cost = evaluate_cost(problem, &trial, &mut trial_residuals);
            if trial_cost <= cost {
                break;
            }
            scale *= 0.5;
        }

        if trial_cost > cost {
            converged = true;
            message = String::from("no further decrease along the bounded step");
            break;
        }

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

        if problem.is_linear() && scale == 1.0 {
            converged = true;
            message = String::from("exact bounded solution of linear problem");
            break;
        }
        if cost_change <= options.tolerance * cost.max(MIN_RESIDUAL_SCALE)
            || step_norm <= options.tolerance * (param_norm + options.tolerance)
        {
            converged = true;
            message = String::from("relative reduction below tolerance");
            break;
        }
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

/// Minimizes `½ xᵀGx - cᵀx` over the box `bounds`.
///
/// `residual_scale` is the residual norm at the linearization point and sets
/// the gradient threshold below which a bound variable is considered optimal.
pub(super) fn solve_bounded(
    normal: &DenseMatrix,
    rhs: &[f64],
    bounds: &[Bound],
    residual_scale: f64,
    options: &OptimizerOptions,
) -> Result<BoundedSolution, OptimizerError> {
    let n = rhs.len();
    let mut x = vec![0.0; n];
    let mut state = vec![VariableState::Held; n];
    for index in 0..n {
        let bound = bounds[index];
        if bound.lower.is_finite() {
            x[index] = bound.lower;
            state[index] = VariableState::AtLower;
        } else if bound.upper.is_finite() {
            x[index] = bound.upper;
            state[index] = VariableState::AtUpper;
        }
    }

    let threshold = options.tolerance.max(f64::EPSILON) * residual_scale.max(MIN_RESIDUAL_SCALE);
    let mut free: Vec<usize> = Vec::with_capacity(n);
    let mut blocked = vec![false; n];
    let max_steps = options.max_iterations.max(3 * n);
    let mut steps = 0;
    let mut converged = false;

    while steps < max_steps {
        steps += 1;
        let slack = gradient(normal, rhs, &x);

        let mut entering: Option<(usize, f64)> = None;
        for index in 0..n {
            if state[index] == VariableState::Free || blocked[index] {
                continue;
            }
            let curvature = normal[(index, index)];
            if curvature <= 0.0 {
                continue;
            }
            let bound = bounds[index];
            let pull = slack[index] / curvature.sqrt();
            let can_move = match state[index] {
                VariableState::AtLower => pull > threshold && bound.upper > bound.lower,
                VariableState::AtUpper => pull < -threshold && bound.upper > bound.lower,
                VariableState::Held => pull.abs() > threshold,
                VariableState::Free => false,
            };
            if can_move && entering.is_none_or(|(_, best)| pull.abs() > best) {
                entering = Some((index, pull.abs()));
            }
        }

        let Some((candidate, _)) = entering else {
            converged = true;
            break;
        };

        if !extends_independent_set(normal, &free, candidate) {
            blocked[candidate] = true;
            continue;
        }
        state[candidate] = VariableState::Free;
        free.push(candidate);

        // Solve on the free set, stepping back to the first violated bound
        // until the free solution is feasible.
        let mut inner = 0;
        while !free.is_empty() && inner <= n {
            inner += 1;
            let z = solve_free_set(normal, rhs, &x, &free)?;

            let mut alpha = 1.0;
            let mut limiting: Option<(usize, VariableState)> = None;
            for (slot, &index) in free.iter().enumerate() {
                let bound = bounds[index];
                let target = z[slot];
                let (ratio, side) = if target < bound.lower {
                    (
                        (x[index] - bound.lower) / (x[index] - target),
                        VariableState::AtLower,
                    )
                } else if target > bound.upper {
                    (
                        (bound.upper - x[index]) / (target - x[index]),
                        VariableState::AtUpper,
                    )
                } else {
                    continue;
                };
                let ratio = ratio.clamp(0.0, 1.0);
                if limiting.is_none() || ratio < alpha {
                    alpha = ratio;
                    limiting = Some((index, side));
                }
            }

            let Some((limiting, limiting_side)) = limiting else {
                for (slot, &index) in free.iter().enumerate() {
                    x[index] = bounds[index].clamp(z[slot]);
                }
                break;
            };

            for (slot, &index) in free.iter().enumerate() {
                x[index] = bounds[index].clamp(x[index] + alpha * (z[slot] - x[index]));
            }

            free.retain(|&index| {
                let bound = bounds[index];
                let side = if index == limiting {
                    limiting_side
                } else if x[index] <= bound.lower {
                    VariableState::AtLower
                } else if x[index] >= bound.upper {
                    VariableState::AtUpper
                } else {
                    return true;
                };
                x[index] = match side {
                    VariableState::AtUpper => bound.upper,
                    _ => bound.lower,
                };
                state[index] = side;
                false
            });
            blocked.fill(false);
        }
    }

    let degenerate = if converged {
        degenerate_variables(normal, rhs, &x, &state, &free, &blocked, threshold)
    } else {
        Vec::new()
    };

    Ok(BoundedSolution {
        x,
        degenerate,
        converged,
        iterations: steps,
    })
}

/// `c - Gx`, the descent direction of the quadratic.
fn gradient(normal: &DenseMatrix, rhs: &[f64], x: &[f64]) -> Vec<f64> {
    let mut slack = rhs.to_vec();
    for (row, slot) in slack.iter_mut().enumerate() {
        for (col, value) in x.iter().enumerate() {
            *slot -= normal[(row, col)] * value;
        }
    }
    slack
}

fn solve_free_set(
    normal: &DenseMatrix,
    rhs: &[f64],
    x: &[f64],
    free: &[usize],
) -> Result<Vec<f64>, OptimizerError> {
    let mut reduced_rhs = Vec::with_capacity(free.len());
    for &row in free {
        let mut value = rhs[row];
        for (col, x_col) in x.iter().enumerate() {
            if !free.contains(&col) {
                value -= normal[(row, col)] * x_col;
            }
        }
        reduced_rhs.push(value);
    }

    Ok(cholesky_solve(&principal_submatrix(normal, free), &reduced_rhs)?)
}

fn degenerate_variables(
    normal: &DenseMatrix,
    rhs: &[f64],
    x: &[f64],
    state: &[VariableState],
    free: &[usize],
    blocked: &[bool],
    threshold: f64,
) -> Vec<usize> {
    let slack = gradient(normal, rhs, x);
    let mut degenerate: Vec<usize> = dependent_columns(normal, free);

    for index in 0..rhs.len() {
        if state[index] == VariableState::Free {
            continue;
        }
        let curvature = normal[(index, index)];
        if curvature <= 0.0 || blocked[index] {
            degenerate.push(index);
            continue;
        }
        let pull = slack[index] / curvature.sqrt();
        if pull.abs() <= threshold && !extends_independent_set(normal, free, index) {
            degenerate.push(index);
        }
    }

    degenerate.sort_unstable();
    degenerate.dedup();
    degenerate
}

#[cfg(test)]
mod tests {
    use super::{solve_bounded, Bound};
    use crate::numerics::least_squares::OptimizerOptions;
    use crate::numerics::linalg::DenseMatrix;

    fn dense(rows: &[&[f64]]) -> DenseMatrix {
        let mut matrix = DenseMatrix::zeros(rows.len(), rows[0].len());
        for (row, values) in rows.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                matrix[(row, col)] = *value;
            }
        }
        matrix
    }

    #[test]
    fn zero_gradient_variable_stays_at_its_lower_bound() {
        // Second variable has no curvature and no pull.
        let normal = dense(&[&[4.0, 0.0], &[0.0, 0.0]]);
        let solution = solve_bounded(
            &normal,
            &[8.0, 0.0],
            &[Bound::non_negative(), Bound::non_negative()],
            1.0,
            &OptimizerOptions::default(),
        )
        .expect("solve");

        assert!(solution.converged);
        assert_eq!(solution.x, vec![2.0, 0.0]);
        assert_eq!(solution.degenerate, vec![1]);
    }

    #[test]
    fn unbounded_variables_take_either_sign() {
        let normal = dense(&[&[2.0, 0.0], &[0.0, 1.0]]);
        let solution = solve_bounded(
            &normal,
            &[-4.0, 3.0],
            &[Bound::unbounded(), Bound::unbounded()],
            1.0,
            &OptimizerOptions::default(),
        )
        .expect("solve");

        assert!(solution.converged);
        assert!((solution.x[0] + 2.0).abs() < 1.0e-12);
        assert!((solution.x[1] - 3.0).abs() < 1.0e-12);
        assert!(solution.degenerate.is_empty());
    }

    #[test]
    fn variable_leaves_the_free_set_when_it_crosses_a_bound() {
        // Unconstrained minimizer is (3, -1); the box forces x1 = 0.
        let normal = dense(&[&[2.0, 1.0], &[1.0, 1.0]]);
        let rhs = [5.0, 2.0];
        let solution = solve_bounded(
            &normal,
            &rhs,
            &[Bound::non_negative(), Bound::non_negative()],
            1.0,
            &OptimizerOptions::default(),
        )
        .expect("solve");

        assert!(solution.converged);
        assert!((solution.x[0] - 2.5).abs() < 1.0e-12);
        assert_eq!(solution.x[1], 0.0);
    }
}

pub mod interpolation;
pub mod least_squares;
pub mod linalg;

pub use interpolation::{GridResampler, InterpolationMethod};
pub use least_squares::{
    estimate_covariance, forward_difference_jacobian, minimize, Bound, OptimizerError,
    OptimizerMethod, OptimizerOptions, OptimizerOutcome, ResidualProblem,
};
pub use linalg::{cholesky_factorize, CholeskyError, CholeskyFactor, DenseMatrix};

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

pub fn stable_sum_of_squares(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        kahan_add(&mut sum, &mut correction, value * value);
    }

    sum
}

use faer::Mat;

pub type DenseMatrix = Mat<f64>;

/// A pivot is rejected when it keeps less than this fraction of its diagonal
/// entry, i.e. the column is numerically inside the span of the earlier ones.
const RELATIVE_PIVOT_EPSILON: f64 = 1.0e-10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CholeskyError {
    #[error("Cholesky factorization requires a square matrix, got {rows}x{cols}")]
    NonSquareMatrix { rows: usize, cols: usize },
    #[error("Cholesky factorization requires a non-empty matrix")]
    EmptyMatrix,
    #[error("matrix is not positive definite at pivot index {pivot_index}")]
    NotPositiveDefinite { pivot_index: usize },
    #[error("right-hand side length mismatch: expected {expected}, got {actual}")]
    RhsLengthMismatch { expected: usize, actual: usize },
}

/// Lower-triangular factor `L` of a symmetric positive definite `A = L Lᵀ`.
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyFactor {
    lower: DenseMatrix,
}

impl CholeskyFactor {
    pub fn dimension(&self) -> usize {
        self.lower.nrows()
    }

    pub fn lower(&self) -> &DenseMatrix {
        &self.lower
    }

    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, CholeskyError> {
        let dimension = self.dimension();
        if rhs.len() != dimension {
            return Err(CholeskyError::RhsLengthMismatch {
                expected: dimension,
                actual: rhs.len(),
            });
        }

        let mut forward = vec![0.0; dimension];
        for row in 0..dimension {
            let mut value = rhs[row];
            for col in 0..row {
                value -= self.lower[(row, col)] * forward[col];
            }
            forward[row] = value / self.lower[(row, row)];
        }

        let mut solution = vec![0.0; dimension];
        for row in (0..dimension).rev() {
            let mut value = forward[row];
            for col in (row + 1)..dimension {
                value -= self.lower[(col, row)] * solution[col];
            }
            solution[row] = value / self.lower[(row, row)];
        }

        Ok(solution)
    }

    pub fn invert(&self) -> Result<DenseMatrix, CholeskyError> {
        let dimension = self.dimension();
        let mut inverse = DenseMatrix::zeros(dimension, dimension);
        let mut basis = vec![0.0; dimension];

        for col in 0..dimension {
            basis.fill(0.0);
            basis[col] = 1.0;
            let solution = self.solve(&basis)?;
            for row in 0..dimension {
                inverse[(row, col)] = solution[row];
            }
        }

        Ok(inverse)
    }
}

pub fn cholesky_factorize(matrix: &DenseMatrix) -> Result<CholeskyFactor, CholeskyError> {
    let dimension = validate_square_shape(matrix)?;
    let mut lower = DenseMatrix::zeros(dimension, dimension);

    for pivot in 0..dimension {
        let diagonal = matrix[(pivot, pivot)];
        let mut remainder = diagonal;
        for k in 0..pivot {
            remainder -= lower[(pivot, k)] * lower[(pivot, k)];
        }

        if !remainder.is_finite()
            || diagonal <= 0.0
            || remainder <= RELATIVE_PIVOT_EPSILON * diagonal
        {
            return Err(CholeskyError::NotPositiveDefinite { pivot_index: pivot });
        }

        let root = remainder.sqrt();
        lower[(pivot, pivot)] = root;

        for row in (pivot + 1)..dimension {
            let mut value = matrix[(row, pivot)];
            for k in 0..pivot {
                value -= lower[(row, k)] * lower[(pivot, k)];
            }
            lower[(row, pivot)] = value / root;
        }
    }

    Ok(CholeskyFactor { lower })
}

pub fn cholesky_solve(matrix: &DenseMatrix, rhs: &[f64]) -> Result<Vec<f64>, CholeskyError> {
    cholesky_factorize(matrix)?.solve(rhs)
}

/// Rows and columns of `matrix` picked by `indices`, in that order.
pub fn principal_submatrix(matrix: &DenseMatrix, indices: &[usize]) -> DenseMatrix {
    let mut output = DenseMatrix::zeros(indices.len(), indices.len());
    for (row, &source_row) in indices.iter().enumerate() {
        for (col, &source_col) in indices.iter().enumerate() {
            output[(row, col)] = matrix[(source_row, source_col)];
        }
    }
    output
}

pub fn mat_vec(matrix: &DenseMatrix, vector: &[f64]) -> Vec<f64> {
    let mut output = vec![0.0; matrix.nrows()];
    for (row, slot) in output.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (col, value) in vector.iter().enumerate() {
            sum += matrix[(row, col)] * value;
        }
        *slot = sum;
    }
    output
}

fn validate_square_shape(matrix: &DenseMatrix) -> Result<usize, CholeskyError> {
    let rows = matrix.nrows();
    let cols = matrix.ncols();
    if rows == 0 || cols == 0 {
        return Err(CholeskyError::EmptyMatrix);
    }
    if rows != cols {
        return Err(CholeskyError::NonSquareMatrix { rows, cols });
    }

    Ok(rows)
}

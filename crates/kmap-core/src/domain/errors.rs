use std::path::PathBuf;

pub type KmapResult<T> = Result<T, DecompositionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Success,
    InputValidationError,
    IoSystemError,
    ComputationError,
    InternalError,
}

impl ErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InputValidationError => 2,
            Self::IoSystemError => 3,
            Self::ComputationError => 4,
            Self::InternalError => 5,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InputValidationError => "InputValidationError",
            Self::IoSystemError => "IoSystemError",
            Self::ComputationError => "ComputationError",
            Self::InternalError => "InternalError",
        }
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Errors raised by the decomposition engine.
///
/// Setup errors (grid, shape, configuration, provider I/O) abort a run before
/// the first slice is fitted. `FitConvergenceFailure` and `InvalidData` are
/// per-slice conditions: the trajectory assembler records them on the slice
/// and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum DecompositionError {
    #[error("reference '{reference}' does not overlap the target grid: {reason}")]
    GridMismatch { reference: String, reason: String },
    #[error("invalid grid: {message}")]
    InvalidGrid { message: String },
    #[error("{context} shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },
    #[error("slice index {index} is out of range for {len} slices")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("fit did not converge: {message}")]
    FitConvergenceFailure { message: String },
    #[error("no valid data to fit: {message}")]
    InvalidData { message: String },
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("provider error: {message}")]
    Provider { message: String },
}

impl DecompositionError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn invalid_grid(message: impl Into<String>) -> Self {
        Self::InvalidGrid {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn convergence(message: impl Into<String>) -> Self {
        Self::FitConvergenceFailure {
            message: message.into(),
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::GridMismatch { .. }
            | Self::InvalidGrid { .. }
            | Self::ShapeMismatch { .. }
            | Self::IndexOutOfRange { .. }
            | Self::InvalidConfiguration { .. } => ErrorCategory::InputValidationError,
            Self::Read { .. } | Self::Parse { .. } | Self::Write { .. } => {
                ErrorCategory::IoSystemError
            }
            Self::FitConvergenceFailure { .. } | Self::InvalidData { .. } => {
                ErrorCategory::ComputationError
            }
            Self::Provider { .. } => ErrorCategory::InternalError,
        }
    }

    pub const fn placeholder(&self) -> &'static str {
        match self {
            Self::GridMismatch { .. } => "GRID.MISMATCH",
            Self::InvalidGrid { .. } => "GRID.INVALID",
            Self::ShapeMismatch { .. } => "DATA.SHAPE",
            Self::IndexOutOfRange { .. } => "SLICE.INDEX_OUT_OF_RANGE",
            Self::FitConvergenceFailure { .. } => "FIT.CONVERGENCE",
            Self::InvalidData { .. } => "FIT.INVALID_DATA",
            Self::InvalidConfiguration { .. } => "CONFIG.INVALID",
            Self::Read { .. } => "IO.READ",
            Self::Parse { .. } => "IO.PARSE",
            Self::Write { .. } => "IO.WRITE",
            Self::Provider { .. } => "PROVIDER.FAILED",
        }
    }

    /// Per-slice failures that the trajectory assembler recovers from.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FitConvergenceFailure { .. } | Self::InvalidData { .. }
        )
    }

    pub const fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category().is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.placeholder(), self)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category()
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}

#[cfg(test)]
mod tests {
    use super::{DecompositionError, ErrorCategory};

    #[test]
    fn exit_mapping_is_stable() {
        let cases = [
            (ErrorCategory::Success, 0, "Success"),
            (ErrorCategory::InputValidationError, 2, "InputValidationError"),
            (ErrorCategory::IoSystemError, 3, "IoSystemError"),
            (ErrorCategory::ComputationError, 4, "ComputationError"),
            (ErrorCategory::InternalError, 5, "InternalError"),
        ];

        for (category, exit_code, name) in cases {
            assert_eq!(category.exit_code(), exit_code);
            assert_eq!(category.as_str(), name);
        }
    }

    #[test]
    fn setup_errors_are_fatal_and_slice_errors_are_recoverable() {
        let mismatch = DecompositionError::GridMismatch {
            reference: "PTCDA_C".to_string(),
            reason: "all resampled values are NaN".to_string(),
        };
        assert_eq!(mismatch.category(), ErrorCategory::InputValidationError);
        assert!(!mismatch.is_recoverable());

        let out_of_range = DecompositionError::IndexOutOfRange { index: 7, len: 3 };
        assert_eq!(out_of_range.exit_code(), 2);
        assert_eq!(out_of_range.placeholder(), "SLICE.INDEX_OUT_OF_RANGE");

        assert!(DecompositionError::convergence("iteration cap").is_recoverable());
        assert!(DecompositionError::invalid_data("all NaN").is_recoverable());
    }

    #[test]
    fn fatal_error_renders_diagnostic_lines() {
        let error = DecompositionError::IndexOutOfRange { index: 4, len: 2 };

        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [SLICE.INDEX_OUT_OF_RANGE] slice index 4 is out of range for 2 slices"
        );
        assert_eq!(
            error.fatal_exit_line().as_deref(),
            Some("FATAL EXIT CODE: 2")
        );
    }
}

use thiserror::Error;

/// Which sweep axis a configuration problem belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisId {
    X,
    Y,
}

impl std::fmt::Display for AxisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisId::X => write!(f, "x"),
            AxisId::Y => write!(f, "y"),
        }
    }
}

/// Everything that can stop a sweep before or while it runs.
///
/// Configuration and missing-resource errors are raised before the grid is touched.
/// `EmptyState`, `StateLengthMismatch` and `ParameterUpdate` abort a running sweep;
/// the engine still restores the host before returning them.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("{axis}-axis has {targets} targets, {minima} minima and {maxima} maxima; counts must match")]
    AxisLengthMismatch {
        axis: AxisId,
        targets: usize,
        minima: usize,
        maxima: usize,
    },
    #[error("{axis}-axis has no targets to vary")]
    EmptyAxis { axis: AxisId },
    #[error("{axis}-axis lists target {target} more than once")]
    DuplicateTarget { axis: AxisId, target: String },
    #[error("{axis}-axis target {index}: bounds must be finite, got {min} and {max}")]
    NonFiniteBound {
        axis: AxisId,
        index: usize,
        min: f64,
        max: f64,
    },
    #[error("{axis}-axis target {index}: minimum must not equal maximum ({value})")]
    DegenerateRange { axis: AxisId, index: usize, value: f64 },
    #[error("{axis}-axis resolution must be at least 2, got {resolution}")]
    ResolutionTooSmall { axis: AxisId, resolution: usize },
    #[error("max period must be at least 1")]
    ZeroMaxPeriod,
    #[error("max period ({max_period}) must not be larger than max steps ({max_steps})")]
    MaxPeriodExceedsSteps { max_period: usize, max_steps: usize },
    #[error("tolerance must be a non-negative number, got {0}")]
    InvalidTolerance(f64),
    #[error("round digits must be at most 15, got {0}")]
    TooManyRoundDigits(u32),
    #[error("observed output {index}: range minimum ({min}) must be finite and smaller than maximum ({max})")]
    InvalidOutputRange { index: usize, min: f64, max: f64 },
    #[error("bifurcation diagrams need at least one observed output")]
    NoObservedOutputs,
    #[error("output resolution must be at least 2, got {0}")]
    OutputResolutionTooSmall(usize),
    #[error("bifurcation diagrams sweep a single axis; remove the y-axis")]
    BifurcationWithSecondAxis,
    #[error("missing resource: {0}")]
    MissingResource(String),
    #[error("captured an empty system state at evaluation step {step}")]
    EmptyState { step: usize },
    #[error("cannot compare states of length {left} and {right}; they come from different systems")]
    StateLengthMismatch { left: usize, right: usize },
    #[error("host rejected parameter update: {0}")]
    ParameterUpdate(#[source] anyhow::Error),
}

impl SweepError {
    /// True for errors detected before any stepping occurs.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            SweepError::MissingResource(_)
                | SweepError::EmptyState { .. }
                | SweepError::StateLengthMismatch { .. }
                | SweepError::ParameterUpdate(_)
        )
    }
}

pub type SweepResult<T> = std::result::Result<T, SweepError>;

use std::time::Duration;

use thiserror::Error;

pub type AllocationResult<T> = Result<T, AllocationError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error("Allocation matrix has no actuation authority (largest singular value {max_singular_value:e})")]
    DegenerateGeometry { max_singular_value: f64 },
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Vehicle needs at least {minimum} rotors, got {actual}")]
    TooFewRotors { minimum: usize, actual: usize },
    #[error("Rotor {0} has a zero length thrust axis or non-finite parameters")]
    InvalidThrustAxis(String),
    #[error("Thrust bounds of rotor {index} are invalid: [{min}, {max}]")]
    InvalidBounds { index: usize, min: f64, max: f64 },
    #[error("Thrust coefficient must be positive and finite, got {0}")]
    InvalidThrustCoefficient(f64),
    #[error("Rank tolerance must be positive and finite, got {0}")]
    InvalidTolerance(f64),
    #[error("Coefficient limit must be non-negative and finite, got {0}")]
    InvalidCoefficientLimit(f64),
    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),
}

impl AllocationError {
    pub(crate) fn check_dimension(
        context: &'static str,
        expected: usize,
        actual: usize,
    ) -> AllocationResult<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(AllocationError::DimensionMismatch {
                context,
                expected,
                actual,
            })
        }
    }
}

pub type CoefficientResult<T> = Result<T, CoefficientError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoefficientError {
    #[error("Observation has {actual} features, source expects {expected}")]
    ObservationDimension { expected: usize, actual: usize },
    #[error("Source produced {actual} coefficients, expected {expected}")]
    OutputDimension { expected: usize, actual: usize },
    #[error("Source produced a non-finite coefficient")]
    NonFinite,
    #[error("Coefficient source exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("Coefficient source is still busy with a previous request")]
    Busy,
    #[error("Coefficient source worker disconnected")]
    Disconnected,
}

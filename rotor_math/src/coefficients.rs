//! Observation -> Null Space Coefficients
//!
//! The allocator only ever sees a `CoefficientSource`. Learned policies, distilled regressors,
//! lookup tables and fixed rules all plug in behind it.

pub mod exploration;
pub mod fixed;
pub mod linear;
pub mod table;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::{CoefficientError, CoefficientResult};

pub use exploration::Exploration;
pub use fixed::FixedCoefficients;
pub use linear::{LinearOracle, LinearRegressor};
pub use table::TableCoefficients;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PredictionMode {
    /// Same observation, same coefficients
    #[default]
    Deterministic,
    /// Sources with a sampling step may sample, reproducibly for a fixed seed
    Stochastic,
}

pub trait CoefficientSource: Send {
    fn observation_dim(&self) -> usize;

    /// K, must match the null space dimension of the vehicle it drives
    fn coefficient_dim(&self) -> usize;

    fn predict(
        &mut self,
        observation: &DVector<f64>,
        mode: PredictionMode,
    ) -> CoefficientResult<DVector<f64>>;

    /// Output order matches input order
    fn predict_batch(
        &mut self,
        observations: &[DVector<f64>],
        mode: PredictionMode,
    ) -> CoefficientResult<Vec<DVector<f64>>> {
        observations
            .iter()
            .map(|observation| self.predict(observation, mode))
            .collect()
    }
}

impl<S: CoefficientSource + ?Sized> CoefficientSource for Box<S> {
    fn observation_dim(&self) -> usize {
        (**self).observation_dim()
    }

    fn coefficient_dim(&self) -> usize {
        (**self).coefficient_dim()
    }

    fn predict(
        &mut self,
        observation: &DVector<f64>,
        mode: PredictionMode,
    ) -> CoefficientResult<DVector<f64>> {
        (**self).predict(observation, mode)
    }

    fn predict_batch(
        &mut self,
        observations: &[DVector<f64>],
        mode: PredictionMode,
    ) -> CoefficientResult<Vec<DVector<f64>>> {
        (**self).predict_batch(observations, mode)
    }
}

pub(crate) fn check_observation(expected: usize, observation: &DVector<f64>) -> CoefficientResult<()> {
    if observation.len() != expected {
        return Err(CoefficientError::ObservationDimension {
            expected,
            actual: observation.len(),
        });
    }

    Ok(())
}

/// Validates what a source hands back before it reaches the allocator
pub fn check_coefficients(expected: usize, coefficients: &DVector<f64>) -> CoefficientResult<()> {
    if coefficients.len() != expected {
        return Err(CoefficientError::OutputDimension {
            expected,
            actual: coefficients.len(),
        });
    }

    if coefficients.iter().any(|it| !it.is_finite()) {
        return Err(CoefficientError::NonFinite);
    }

    Ok(())
}

use nalgebra::DVector;

use crate::CoefficientResult;

use super::{check_observation, CoefficientSource, PredictionMode};

/// Same coefficients for every observation. `zeros` is the plain pseudo inverse allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedCoefficients {
    coefficients: DVector<f64>,
    observation_dim: usize,
}

impl FixedCoefficients {
    pub fn new(coefficients: DVector<f64>, observation_dim: usize) -> Self {
        Self {
            coefficients,
            observation_dim,
        }
    }

    pub fn zeros(coefficient_dim: usize, observation_dim: usize) -> Self {
        Self::new(DVector::zeros(coefficient_dim), observation_dim)
    }
}

impl CoefficientSource for FixedCoefficients {
    fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    fn coefficient_dim(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(
        &mut self,
        observation: &DVector<f64>,
        _mode: PredictionMode,
    ) -> CoefficientResult<DVector<f64>> {
        check_observation(self.observation_dim, observation)?;

        Ok(self.coefficients.clone())
    }
}

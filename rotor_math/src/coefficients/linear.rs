use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::{CoefficientError, CoefficientResult};

use super::{check_observation, CoefficientSource, PredictionMode};

/// One fitted regressor per coefficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    pub weights: Vec<f64>,
    pub bias: f64,
}

/// Distilled regression oracle: z = W·obs + b
#[derive(Debug, Clone, PartialEq)]
pub struct LinearOracle {
    /// K x observation_dim
    weights: DMatrix<f64>,
    bias: DVector<f64>,
}

impl LinearOracle {
    pub fn new(weights: DMatrix<f64>, bias: DVector<f64>) -> CoefficientResult<Self> {
        if weights.nrows() != bias.len() {
            return Err(CoefficientError::OutputDimension {
                expected: weights.nrows(),
                actual: bias.len(),
            });
        }

        if weights.iter().chain(bias.iter()).any(|it| !it.is_finite()) {
            return Err(CoefficientError::NonFinite);
        }

        Ok(Self { weights, bias })
    }

    /// Regressors must all take the same number of features
    pub fn from_regressors(regressors: &[LinearRegressor]) -> CoefficientResult<Self> {
        let observation_dim = regressors.first().map_or(0, |it| it.weights.len());

        for regressor in regressors {
            if regressor.weights.len() != observation_dim {
                return Err(CoefficientError::ObservationDimension {
                    expected: observation_dim,
                    actual: regressor.weights.len(),
                });
            }
        }

        let weights = DMatrix::from_row_iterator(
            regressors.len(),
            observation_dim,
            regressors.iter().flat_map(|it| it.weights.iter().copied()),
        );
        let bias = DVector::from_iterator(regressors.len(), regressors.iter().map(|it| it.bias));

        Self::new(weights, bias)
    }
}

impl CoefficientSource for LinearOracle {
    fn observation_dim(&self) -> usize {
        self.weights.ncols()
    }

    fn coefficient_dim(&self) -> usize {
        self.bias.len()
    }

    fn predict(
        &mut self,
        observation: &DVector<f64>,
        _mode: PredictionMode,
    ) -> CoefficientResult<DVector<f64>> {
        check_observation(self.observation_dim(), observation)?;

        Ok(&self.weights * observation + &self.bias)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::dvector;

    use super::*;

    #[test]
    fn rejects_ragged_regressors() {
        let err = LinearOracle::from_regressors(&[
            LinearRegressor {
                weights: vec![1.0, 2.0, 3.0],
                bias: 0.0,
            },
            LinearRegressor {
                weights: vec![1.0, 2.0],
                bias: 0.0,
            },
        ])
        .unwrap_err();

        assert_eq!(
            err,
            CoefficientError::ObservationDimension {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn rejects_wrong_observation() {
        let mut oracle = LinearOracle::new(DMatrix::identity(2, 3), dvector![0.0, 0.0]).unwrap();

        assert!(oracle
            .predict(&dvector![1.0, 2.0], PredictionMode::Deterministic)
            .is_err());
        assert_eq!(
            oracle
                .predict(&dvector![1.0, 2.0, 3.0], PredictionMode::Deterministic)
                .unwrap(),
            dvector![1.0, 2.0]
        );
    }
}

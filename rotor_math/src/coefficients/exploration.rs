use nalgebra::DVector;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::CoefficientResult;

use super::{CoefficientSource, PredictionMode};

/// Adds uniform noise in `[-scale, scale]` to every coefficient of `inner` when asked for a
/// stochastic prediction. Deterministic predictions pass straight through.
#[derive(Debug, Clone)]
pub struct Exploration<S> {
    inner: S,
    scale: f64,
    rng: StdRng,
}

impl<S: CoefficientSource> Exploration<S> {
    pub fn new(inner: S, scale: f64, seed: u64) -> Self {
        Self {
            inner,
            scale: scale.abs(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: CoefficientSource> CoefficientSource for Exploration<S> {
    fn observation_dim(&self) -> usize {
        self.inner.observation_dim()
    }

    fn coefficient_dim(&self) -> usize {
        self.inner.coefficient_dim()
    }

    fn predict(
        &mut self,
        observation: &DVector<f64>,
        mode: PredictionMode,
    ) -> CoefficientResult<DVector<f64>> {
        let mut coefficients = self.inner.predict(observation, mode)?;

        if mode == PredictionMode::Stochastic && self.scale > 0.0 {
            for coefficient in coefficients.iter_mut() {
                *coefficient += self.rng.gen_range(-self.scale..=self.scale);
            }
        }

        Ok(coefficients)
    }
}

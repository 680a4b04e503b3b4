//! Power proxy used as a run time cost signal and an offline metric

use std::collections::VecDeque;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Momentum theory: hover power grows with thrust^(3/2)
pub const POWER_EXPONENT: f64 = 1.5;

/// Power proxy of one rotor. Uses |thrust| so numerical noise below zero never yields NaN.
pub fn rotor_power(thrust: f64, thrust_coefficient: f64) -> f64 {
    thrust.abs().powf(POWER_EXPONENT) / thrust_coefficient
}

/// Σ |T_i|^1.5 / k_t
pub fn power_proxy(thrusts: &[f64], thrust_coefficient: f64) -> f64 {
    thrusts
        .iter()
        .map(|&thrust| rotor_power(thrust, thrust_coefficient))
        .sum()
}

/// (reference - power) / reference * 100, `None` if `reference` is zero or not finite
pub fn savings_percent(power: f64, reference: f64) -> Option<f64> {
    if reference == 0.0 || !reference.is_finite() {
        return None;
    }

    Some((reference - power) / reference * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerStatistics {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub q25: f64,
    pub q75: f64,
}

impl PowerStatistics {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted.iter().map(|it| (it - mean).powi(2)).sum::<f64>() / count as f64;

        Some(Self {
            count,
            mean,
            std: variance.sqrt(),
            min: sorted[0],
            max: sorted[count - 1],
            median: percentile(&sorted, 50.0),
            q25: percentile(&sorted, 25.0),
            q75: percentile(&sorted, 75.0),
        })
    }
}

/// Linear interpolation between closest ranks, `sorted` must not be empty
fn percentile(sorted: &[f64], percent: f64) -> f64 {
    let rank = percent / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    lerp(sorted[lower], sorted[upper], rank - lower as f64)
}

fn lerp(a: f64, b: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * a + alpha * b
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    pub power: f64,
    /// Power of the clamped pseudo inverse solution for the same command
    pub baseline_power: f64,
}

/// Rolling window of per cycle power samples
#[derive(Debug, Clone)]
pub struct EnergyMonitor {
    thrust_coefficient: f64,
    capacity: usize,
    samples: VecDeque<EnergySample>,
}

impl EnergyMonitor {
    pub fn new(thrust_coefficient: f64, capacity: usize) -> Self {
        Self {
            thrust_coefficient,
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn record(&mut self, thrusts: &DVector<f64>, baseline: &DVector<f64>) -> EnergySample {
        let sample = EnergySample {
            power: power_proxy(thrusts.as_slice(), self.thrust_coefficient),
            baseline_power: power_proxy(baseline.as_slice(), self.thrust_coefficient),
        };

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        sample
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn statistics(&self) -> Option<PowerStatistics> {
        let powers = self.samples.iter().map(|it| it.power).collect::<Vec<_>>();
        PowerStatistics::from_samples(&powers)
    }

    pub fn baseline_statistics(&self) -> Option<PowerStatistics> {
        let powers = self
            .samples
            .iter()
            .map(|it| it.baseline_power)
            .collect::<Vec<_>>();
        PowerStatistics::from_samples(&powers)
    }

    /// Savings of the mean allocated power over the mean baseline power in the window
    pub fn savings_percent(&self) -> Option<f64> {
        let power = self.statistics()?.mean;
        let baseline = self.baseline_statistics()?.mean;

        savings_percent(power, baseline)
    }
}

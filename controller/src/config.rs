use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use glam::DVec3;
use nalgebra::DVector;
use rotor_math::{
    coefficients::{
        table, CoefficientSource, Exploration, FixedCoefficients, LinearOracle, LinearRegressor,
        PredictionMode,
    },
    nullspace::{NullSpaceSolver, DEFAULT_RANK_TOLERANCE},
    octo::{OctoRotorId, TiltedRing},
    solve::reverse::{ControlAllocator, ThrustBounds, ThrustLimit},
    AllocationResult, Direction, ErasedRotorId, Rotor, VehicleGeometry, WrenchAxes,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub name: String,
    pub geometry: GeometryDefinition,
    pub thrust_coefficient: f64,
    #[serde(default)]
    pub wrench_axes: WrenchAxes,
    pub thrust_limits: ThrustLimitsDefinition,

    #[serde(default = "default_rank_tolerance")]
    pub rank_tolerance: f64,
    #[serde(default)]
    pub coefficient_limit: Option<f64>,
    #[serde(default)]
    pub coefficient_source: CoefficientSourceDefinition,
    #[serde(default)]
    pub exploration: Option<ExplorationDefinition>,

    #[serde(default = "default_observation_dim")]
    pub observation_dim: usize,
    pub control_rate_hz: f64,
    pub inference_budget_ms: f64,
}

fn default_rank_tolerance() -> f64 {
    DEFAULT_RANK_TOLERANCE
}

fn default_observation_dim() -> usize {
    21
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GeometryDefinition {
    Octo(TiltedRing),
    Custom(CustomDefinition),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomDefinition {
    pub rotors: Vec<CustomRotor>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CustomRotor {
    pub index: ErasedRotorId,
    pub position: DVec3,
    pub thrust_axis: DVec3,
    pub direction: Direction,
    #[serde(default)]
    pub torque_coefficient: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrustLimitsDefinition {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub overrides: Vec<ThrustLimitOverride>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThrustLimitOverride {
    pub rotor: ErasedRotorId,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum CoefficientSourceDefinition {
    /// Plain pseudo inverse allocation
    #[default]
    Zero,
    Fixed { coefficients: Vec<f64> },
    Linear { regressors: Vec<LinearRegressor> },
    /// CSV with `obs_*` and `z1..zK` columns, relative to the config file
    Table { path: PathBuf },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExplorationDefinition {
    pub scale: f64,
    pub seed: u64,
}

impl VehicleConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Read vehicle config {}", path.display()))?;
        let mut config: VehicleConfig = toml::from_str(&raw).context("Parse vehicle config")?;

        if let CoefficientSourceDefinition::Table { path: table } = &mut config.coefficient_source {
            if table.is_relative() {
                if let Some(parent) = path.parent() {
                    *table = parent.join(&*table);
                }
            }
        }

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.control_rate_hz.is_finite() && self.control_rate_hz > 0.0) {
            bail!("control_rate_hz must be positive, got {}", self.control_rate_hz);
        }
        if !(self.inference_budget_ms.is_finite() && self.inference_budget_ms > 0.0) {
            bail!(
                "inference_budget_ms must be positive, got {}",
                self.inference_budget_ms
            );
        }
        if self.wrench_axes.is_empty() {
            bail!("wrench_axes must name at least one axis");
        }

        if let GeometryDefinition::Custom(custom) = &self.geometry {
            let mut seen = BTreeSet::new();
            for rotor in &custom.rotors {
                if !seen.insert(rotor.index) {
                    bail!("Rotor index {} is defined twice", rotor.index);
                }
            }
        }

        Ok(())
    }

    pub fn geometry(&self) -> AllocationResult<VehicleGeometry<ErasedRotorId>> {
        match &self.geometry {
            GeometryDefinition::Octo(ring) => {
                Ok(VehicleGeometry::<OctoRotorId>::new(*ring, self.thrust_coefficient)?.erase())
            }
            GeometryDefinition::Custom(custom) => VehicleGeometry::new_raw(
                custom.rotors.iter().map(|rotor| {
                    (
                        rotor.index,
                        Rotor {
                            position: rotor.position,
                            orientation: rotor.thrust_axis,
                            direction: rotor.direction,
                            torque_coefficient: rotor.torque_coefficient,
                        },
                    )
                }),
                self.thrust_coefficient,
            ),
        }
    }

    /// Limits in the column order of `geometry`
    pub fn bounds(&self, geometry: &VehicleGeometry<ErasedRotorId>) -> AllocationResult<ThrustBounds> {
        let limits = geometry
            .rotors()
            .map(|(rotor_id, _)| {
                self.thrust_limits
                    .overrides
                    .iter()
                    .find(|it| it.rotor == *rotor_id)
                    .map(|it| ThrustLimit {
                        min: it.min,
                        max: it.max,
                    })
                    .unwrap_or(ThrustLimit {
                        min: self.thrust_limits.min,
                        max: self.thrust_limits.max,
                    })
            })
            .collect();

        ThrustBounds::new(limits)
    }

    pub fn solver(&self) -> AllocationResult<NullSpaceSolver> {
        NullSpaceSolver::new(self.rank_tolerance)
    }

    pub fn allocator(&self) -> AllocationResult<ControlAllocator> {
        ControlAllocator::new(self.coefficient_limit)
    }

    pub fn prediction_mode(&self) -> PredictionMode {
        match self.exploration {
            Some(_) => PredictionMode::Stochastic,
            None => PredictionMode::Deterministic,
        }
    }

    /// `coefficient_dim` only sizes the zero source, the others carry their own
    pub fn build_source(&self, coefficient_dim: usize) -> anyhow::Result<Box<dyn CoefficientSource>> {
        let source: Box<dyn CoefficientSource> = match &self.coefficient_source {
            CoefficientSourceDefinition::Zero => Box::new(FixedCoefficients::zeros(
                coefficient_dim,
                self.observation_dim,
            )),
            CoefficientSourceDefinition::Fixed { coefficients } => Box::new(FixedCoefficients::new(
                DVector::from_column_slice(coefficients),
                self.observation_dim,
            )),
            CoefficientSourceDefinition::Linear { regressors } => Box::new(
                LinearOracle::from_regressors(regressors).context("Build linear oracle")?,
            ),
            CoefficientSourceDefinition::Table { path } => Box::new(
                table::read_table(path)
                    .with_context(|| format!("Load coefficient table {}", path.display()))?,
            ),
        };

        let Some(exploration) = self.exploration else {
            return Ok(source);
        };

        Ok(Box::new(Exploration::new(
            source,
            exploration.scale,
            exploration.seed,
        )))
    }
}

#[cfg(test)]
mod tests {
    use rotor_math::WrenchAxis;

    use super::*;

    const CONFIG: &str = r#"
name = "Test Octo"
thrust_coefficient = 1.0
control_rate_hz = 100.0
inference_budget_ms = 5.0
coefficient_limit = 2.0

[geometry.Octo]
radius = 0.25
tilt_degrees = 15.0
torque_coefficient = 0.01

[thrust_limits]
min = 0.0
max = 10.0
overrides = [{ rotor = 3, min = 0.0, max = 6.0 }]

[coefficient_source.Linear]
regressors = [
    { weights = [0.1, 0.0], bias = 0.0 },
    { weights = [0.0, 0.1], bias = 0.5 },
]

[exploration]
scale = 0.1
seed = 42
"#;

    #[test]
    fn parses_octo_config() {
        let config: VehicleConfig = toml::from_str(CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.observation_dim, 21);
        assert_eq!(config.rank_tolerance, DEFAULT_RANK_TOLERANCE);
        assert_eq!(config.wrench_axes, WrenchAxes::full());
        assert_eq!(config.prediction_mode(), PredictionMode::Stochastic);

        let geometry = config.geometry().unwrap();
        assert_eq!(geometry.rotor_count(), 8);

        let bounds = config.bounds(&geometry).unwrap();
        assert_eq!(bounds.limits()[3], ThrustLimit { min: 0.0, max: 6.0 });
        assert_eq!(bounds.limits()[4], ThrustLimit { min: 0.0, max: 10.0 });

        let source = config.build_source(2).unwrap();
        assert_eq!(source.coefficient_dim(), 2);
        assert_eq!(source.observation_dim(), 2);
    }

    #[test]
    fn parses_custom_geometry() {
        let config: VehicleConfig = toml::from_str(
            r#"
name = "Custom"
thrust_coefficient = 1.0
control_rate_hz = 50.0
inference_budget_ms = 2.0
wrench_axes = ["ForceX", "ForceY", "ForceZ", "TorqueZ"]
coefficient_source = "Zero"

[thrust_limits]
min = -5.0
max = 5.0

[[geometry.Custom.rotors]]
index = 0
position = [1.0, 0.0, 0.0]
thrust_axis = [0.0, 1.0, 0.0]
direction = "Clockwise"

[[geometry.Custom.rotors]]
index = 1
position = [-1.0, 0.0, 0.0]
thrust_axis = [0.0, 1.0, 0.0]
direction = "CounterClockwise"

[[geometry.Custom.rotors]]
index = 2
position = [0.0, 1.0, 0.0]
thrust_axis = [1.0, 0.0, 0.0]
direction = "Clockwise"

[[geometry.Custom.rotors]]
index = 3
position = [0.0, 1.0, 0.0]
thrust_axis = [0.0, 0.0, 2.0]
direction = "Clockwise"

[[geometry.Custom.rotors]]
index = 4
position = [0.0, -1.0, 0.0]
thrust_axis = [0.0, 0.0, 1.0]
direction = "CounterClockwise"

[[geometry.Custom.rotors]]
index = 5
position = [0.0, -1.0, 0.0]
thrust_axis = [1.0, 0.0, 0.0]
direction = "CounterClockwise"
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.wrench_axes,
            WrenchAxes::new([
                WrenchAxis::ForceX,
                WrenchAxis::ForceY,
                WrenchAxis::ForceZ,
                WrenchAxis::TorqueZ
            ])
        );
        assert_eq!(config.prediction_mode(), PredictionMode::Deterministic);

        let geometry = config.geometry().unwrap();
        assert_eq!(geometry.rotor_count(), 6);
        // Thrust axes are normalized
        assert_eq!(geometry.rotor(&3).unwrap().orientation, DVec3::Z);

        let source = config.build_source(2).unwrap();
        assert_eq!(source.coefficient_dim(), 2);
        assert_eq!(source.observation_dim(), 21);
    }

    #[test]
    fn rejects_duplicate_rotors() {
        let mut config: VehicleConfig = toml::from_str(CONFIG).unwrap();
        let rotor = CustomRotor {
            index: 0,
            position: DVec3::X,
            thrust_axis: DVec3::Z,
            direction: Direction::Clockwise,
            torque_coefficient: 0.0,
        };
        config.geometry = GeometryDefinition::Custom(CustomDefinition {
            rotors: vec![rotor; 6],
        });

        assert!(config.validate().is_err());
    }
}

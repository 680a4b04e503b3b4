use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use nalgebra::DVector;
use rotor_math::{
    coefficients::{CoefficientSource, PredictionMode},
    energy::{EnergyMonitor, EnergySample},
    snapshot::{AllocationSnapshot, SharedAllocation},
    solve::reverse::{self, Allocation, ControlAllocator, ThrustBounds},
    AllocationError, AllocationResult, CoefficientError, ErasedRotorId, VehicleGeometry, Wrench,
    WrenchAxes,
};
use tracing::{debug, info, warn};

use crate::{config::VehicleConfig, worker::CoefficientWorker};

/// Cycles kept by the energy monitor
const ENERGY_WINDOW: usize = 1000;

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    /// Snapshot the cycle was allocated against
    pub generation: u64,
    pub allocation: Allocation,
    /// Why zero coefficients were used instead of the source's output
    pub fallback: Option<CoefficientError>,
    pub energy: EnergySample,
}

pub struct ControlLoop {
    shared: Arc<SharedAllocation>,
    worker: CoefficientWorker,
    allocator: ControlAllocator,
    bounds: ThrustBounds,
    mode: PredictionMode,
    monitor: EnergyMonitor,

    cycle: u64,
    fallbacks: u64,
}

impl ControlLoop {
    pub fn new(config: &VehicleConfig) -> anyhow::Result<Self> {
        let geometry = config.geometry().context("Build vehicle geometry")?;
        let bounds = config.bounds(&geometry).context("Build thrust bounds")?;
        let solver = config.solver().context("Build null space solver")?;
        let allocator = config.allocator().context("Build allocator")?;

        let snapshot = AllocationSnapshot::new(geometry, config.wrench_axes.clone(), &solver)
            .context("Factor allocation matrix")?;
        let null_dim = snapshot.null_space().dim();

        info!(
            vehicle = %config.name,
            rotors = snapshot.geometry().rotor_count(),
            rank = snapshot.null_space().rank(),
            null_dim,
            "Allocation ready"
        );

        let source = config
            .build_source(null_dim)
            .context("Build coefficient source")?;
        if source.observation_dim() != config.observation_dim {
            bail!(
                "Coefficient source takes {} features, vehicle provides {}",
                source.observation_dim(),
                config.observation_dim
            );
        }

        Self::from_parts(
            Arc::new(SharedAllocation::new(snapshot, solver)),
            source,
            allocator,
            bounds,
            config.prediction_mode(),
            Duration::from_secs_f64(config.inference_budget_ms / 1000.0),
        )
    }

    pub fn from_parts<S: CoefficientSource + 'static>(
        shared: Arc<SharedAllocation>,
        source: S,
        allocator: ControlAllocator,
        bounds: ThrustBounds,
        mode: PredictionMode,
        budget: Duration,
    ) -> anyhow::Result<Self> {
        let snapshot = shared.load();

        if source.coefficient_dim() != snapshot.null_space().dim() {
            bail!(
                "Coefficient source produces {} coefficients, null space has dimension {}",
                source.coefficient_dim(),
                snapshot.null_space().dim()
            );
        }
        if bounds.len() != snapshot.geometry().rotor_count() {
            bail!(
                "Thrust bounds cover {} rotors, vehicle has {}",
                bounds.len(),
                snapshot.geometry().rotor_count()
            );
        }

        let monitor = EnergyMonitor::new(snapshot.geometry().thrust_coefficient(), ENERGY_WINDOW);
        let worker = CoefficientWorker::spawn(source, budget)?;

        Ok(Self {
            shared,
            worker,
            allocator,
            bounds,
            mode,
            monitor,
            cycle: 0,
            fallbacks: 0,
        })
    }

    /// One allocation cycle. Coefficient failures fall back to the plain pseudo inverse
    /// solution, only allocation errors are returned.
    pub fn step(&mut self, observation: &DVector<f64>, wrench: Wrench) -> AllocationResult<CycleReport> {
        let snapshot = self.shared.load();
        let null_dim = snapshot.null_space().dim();

        let predicted = self
            .worker
            .request(observation.clone(), self.mode)
            .and_then(|coefficients| {
                if coefficients.len() == null_dim {
                    Ok(coefficients)
                } else {
                    Err(CoefficientError::OutputDimension {
                        expected: null_dim,
                        actual: coefficients.len(),
                    })
                }
            });

        let (coefficients, fallback) = match predicted {
            Ok(coefficients) => (coefficients, None),
            Err(err) => {
                warn!(cycle = self.cycle, "Using zero coefficients: {err}");
                self.fallbacks += 1;

                (DVector::zeros(null_dim), Some(err))
            }
        };

        let allocation = reverse::reverse_solve(
            wrench,
            &coefficients,
            &*snapshot,
            &self.allocator,
            &self.bounds,
        )?;

        let (baseline, _) = self.bounds.clamp(&allocation.baseline)?;
        let energy = self.monitor.record(&allocation.thrusts, &baseline);

        debug!(
            cycle = self.cycle,
            power = energy.power,
            baseline_power = energy.baseline_power,
            saturated = allocation.is_saturated(),
            "Cycle complete"
        );

        let report = CycleReport {
            cycle: self.cycle,
            generation: snapshot.generation(),
            allocation,
            fallback,
            energy,
        };
        self.cycle += 1;

        Ok(report)
    }

    /// Installs a new geometry between cycles. The rotor count must stay the same so the
    /// thrust bounds and coefficient source keep matching.
    pub fn update_geometry(
        &mut self,
        geometry: VehicleGeometry<ErasedRotorId>,
        axes: WrenchAxes,
    ) -> AllocationResult<u64> {
        if geometry.rotor_count() != self.bounds.len() {
            return Err(AllocationError::DimensionMismatch {
                context: "replacement geometry rotors",
                expected: self.bounds.len(),
                actual: geometry.rotor_count(),
            });
        }

        self.shared.update(geometry, axes)
    }

    pub fn shared(&self) -> &Arc<SharedAllocation> {
        &self.shared
    }

    pub fn monitor(&self) -> &EnergyMonitor {
        &self.monitor
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    pub fn shutdown(self) {
        self.worker.shutdown();
    }
}

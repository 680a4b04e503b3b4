//! Geometry derived state that must only ever change as one unit

use std::{
    fmt::Debug,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::info;

use crate::{
    nullspace::{NullSpaceBasis, NullSpaceSolver},
    AllocationMatrix, AllocationResult, ErasedRotorId, VehicleGeometry, WrenchAxes,
};

/// A geometry together with the matrix and basis derived from it
#[derive(Debug, Clone)]
pub struct AllocationSnapshot<RotorId: Ord = ErasedRotorId> {
    geometry: VehicleGeometry<RotorId>,
    matrix: AllocationMatrix,
    null_space: NullSpaceBasis,
    generation: u64,
}

impl<RotorId: Ord + Debug> AllocationSnapshot<RotorId> {
    pub fn new(
        geometry: VehicleGeometry<RotorId>,
        axes: WrenchAxes,
        solver: &NullSpaceSolver,
    ) -> AllocationResult<Self> {
        let matrix = AllocationMatrix::build(&geometry, axes);
        let null_space = solver.solve(&matrix)?;

        Ok(Self {
            geometry,
            matrix,
            null_space,
            generation: 0,
        })
    }
}

impl<RotorId: Ord> AllocationSnapshot<RotorId> {
    pub fn geometry(&self) -> &VehicleGeometry<RotorId> {
        &self.geometry
    }

    pub fn matrix(&self) -> &AllocationMatrix {
        &self.matrix
    }

    pub fn null_space(&self) -> &NullSpaceBasis {
        &self.null_space
    }

    /// Incremented every time a `SharedAllocation` installs a new snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Read mostly cell handing out whole snapshots to the control loop
#[derive(Debug)]
pub struct SharedAllocation<RotorId: Ord = ErasedRotorId> {
    current: RwLock<Arc<AllocationSnapshot<RotorId>>>,
    solver: NullSpaceSolver,
}

impl<RotorId: Ord + Debug> SharedAllocation<RotorId> {
    pub fn new(snapshot: AllocationSnapshot<RotorId>, solver: NullSpaceSolver) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            solver,
        }
    }

    pub fn load(&self) -> Arc<AllocationSnapshot<RotorId>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Derives a complete snapshot for `geometry` and installs it. On error the previous
    /// snapshot stays in place.
    pub fn update(
        &self,
        geometry: VehicleGeometry<RotorId>,
        axes: WrenchAxes,
    ) -> AllocationResult<u64> {
        let mut snapshot = AllocationSnapshot::new(geometry, axes, &self.solver)?;

        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        snapshot.generation = current.generation + 1;

        info!(
            generation = snapshot.generation,
            null_dim = snapshot.null_space.dim(),
            "Installed new allocation snapshot"
        );

        let generation = snapshot.generation;
        *current = Arc::new(snapshot);

        Ok(generation)
    }
}

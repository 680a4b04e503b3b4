//! Rotor Thrusts -> Wrench

use std::{fmt::Debug, hash::Hash};

use ahash::HashMap;
use nalgebra::DVector;
use tracing::warn;

use crate::{AllocationError, AllocationMatrix, AllocationResult, VehicleGeometry, Wrench};

/// Wrench achieved by `thrusts` on the axes controlled by `matrix`
pub fn forward_solve(matrix: &AllocationMatrix, thrusts: &DVector<f64>) -> AllocationResult<Wrench> {
    let achieved = matrix.apply(thrusts)?;

    Wrench::from_vector(matrix.axes(), &achieved)
}

/// Full 6 axis wrench of per rotor thrusts. Unknown rotors are skipped.
pub fn forward_solve_by_id<RotorId: Ord + Hash + Eq + Debug>(
    geometry: &VehicleGeometry<RotorId>,
    thrusts: &HashMap<RotorId, f64>,
) -> Wrench {
    let mut wrench = Wrench::default();

    for (rotor_id, &thrust) in thrusts {
        let Some(rotor) = geometry.rotor(rotor_id) else {
            warn!("Thrust for unknown rotor {rotor_id:?}");
            continue;
        };

        wrench.force += rotor.force() * thrust;
        wrench.torque += rotor.torque() * thrust;
    }

    wrench
}

/// Labels an allocation output with the rotor ids of its columns
pub fn thrusts_by_id<RotorId: Ord + Hash + Eq + Clone + Debug>(
    geometry: &VehicleGeometry<RotorId>,
    thrusts: &DVector<f64>,
) -> AllocationResult<HashMap<RotorId, f64>> {
    AllocationError::check_dimension("thrust vector", geometry.rotor_count(), thrusts.len())?;

    Ok(geometry
        .rotors()
        .zip(thrusts.iter())
        .map(|((rotor_id, _), &thrust)| (rotor_id.clone(), thrust))
        .collect())
}

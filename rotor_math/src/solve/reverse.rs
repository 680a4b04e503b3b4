//! Desired Wrench + Null Space Coefficients -> Rotor Thrusts

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    nullspace::NullSpaceBasis, snapshot::AllocationSnapshot, AllocationError, AllocationMatrix,
    AllocationResult, Wrench,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThrustLimit {
    pub min: f64,
    pub max: f64,
}

impl ThrustLimit {
    pub fn contains(&self, thrust: f64) -> bool {
        (self.min..=self.max).contains(&thrust)
    }
}

/// Per rotor actuator limits, in column order
#[derive(Debug, Clone, PartialEq)]
pub struct ThrustBounds {
    limits: Vec<ThrustLimit>,
}

impl ThrustBounds {
    pub fn new(limits: Vec<ThrustLimit>) -> AllocationResult<Self> {
        for (index, limit) in limits.iter().enumerate() {
            if !(limit.min.is_finite() && limit.max.is_finite() && limit.min <= limit.max) {
                return Err(AllocationError::InvalidBounds {
                    index,
                    min: limit.min,
                    max: limit.max,
                });
            }
        }

        Ok(Self { limits })
    }

    pub fn uniform(rotor_count: usize, limit: ThrustLimit) -> AllocationResult<Self> {
        Self::new(vec![limit; rotor_count])
    }

    pub fn limits(&self) -> &[ThrustLimit] {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn contains(&self, thrusts: &DVector<f64>) -> bool {
        thrusts.len() == self.limits.len()
            && thrusts
                .iter()
                .zip(&self.limits)
                .all(|(&thrust, limit)| limit.contains(thrust))
    }

    /// Clamps every component into its limit, returning the indices that had to move
    pub fn clamp(&self, thrusts: &DVector<f64>) -> AllocationResult<(DVector<f64>, Vec<usize>)> {
        AllocationError::check_dimension("thrust bounds", thrusts.len(), self.limits.len())?;

        let mut clamped_rotors = Vec::new();
        let clamped = DVector::from_iterator(
            thrusts.len(),
            thrusts.iter().zip(&self.limits).enumerate().map(|(idx, (&thrust, limit))| {
                let clamped = thrust.clamp(limit.min, limit.max);
                if clamped != thrust {
                    clamped_rotors.push(idx);
                }

                clamped
            }),
        );

        Ok((clamped, clamped_rotors))
    }
}

/// Clamping moved the output away from the unsaturated solution
#[derive(Debug, Clone, PartialEq)]
pub struct SaturationDeviation {
    pub clamped_rotors: Vec<usize>,
    /// A·unsaturated - A·clamped, in row order
    pub wrench_error: DVector<f64>,
}

impl SaturationDeviation {
    pub fn error_norm(&self) -> f64 {
        self.wrench_error.norm()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Final, bounded rotor thrusts
    pub thrusts: DVector<f64>,
    /// Minimum norm solution, pinv(A)·w
    pub baseline: DVector<f64>,
    /// N·z
    pub correction: DVector<f64>,
    /// Coefficients actually applied, after the optional limit
    pub coefficients: DVector<f64>,
    pub requested: DVector<f64>,
    pub achieved: DVector<f64>,
    pub saturation: Option<SaturationDeviation>,
    pub coefficients_clamped: bool,
}

impl Allocation {
    /// requested - achieved. Non zero under saturation or for unrealizable commands.
    pub fn tracking_error(&self) -> DVector<f64> {
        &self.requested - &self.achieved
    }

    pub fn is_saturated(&self) -> bool {
        self.saturation.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlAllocator {
    coefficient_limit: Option<f64>,
}

impl ControlAllocator {
    /// `coefficient_limit` bounds every null space coefficient to `[-limit, limit]`,
    /// typically the range the coefficient source was trained on
    pub fn new(coefficient_limit: Option<f64>) -> AllocationResult<Self> {
        if let Some(limit) = coefficient_limit {
            if !(limit.is_finite() && limit >= 0.0) {
                return Err(AllocationError::InvalidCoefficientLimit(limit));
            }
        }

        Ok(Self { coefficient_limit })
    }

    pub fn coefficient_limit(&self) -> Option<f64> {
        self.coefficient_limit
    }

    /// thrust = clamp(pinv(A)·w + N·z)
    ///
    /// A·N·z is zero, so the coefficients never change the achieved wrench unless clamping
    /// kicks in. Clamping is reported through `Allocation::saturation`, not as an error.
    pub fn allocate(
        &self,
        matrix: &AllocationMatrix,
        null_space: &NullSpaceBasis,
        wrench: &DVector<f64>,
        coefficients: &DVector<f64>,
        bounds: &ThrustBounds,
    ) -> AllocationResult<Allocation> {
        AllocationError::check_dimension(
            "null space basis rows",
            matrix.rotor_count(),
            null_space.rotor_count(),
        )?;
        AllocationError::check_dimension(
            "pseudo inverse columns",
            matrix.wrench_dim(),
            null_space.pseudo_inverse().ncols(),
        )?;
        AllocationError::check_dimension("wrench command", matrix.wrench_dim(), wrench.len())?;
        AllocationError::check_dimension(
            "null space coefficients",
            null_space.dim(),
            coefficients.len(),
        )?;
        AllocationError::check_dimension("thrust bounds", matrix.rotor_count(), bounds.len())?;

        if wrench.iter().any(|it| !it.is_finite()) {
            return Err(AllocationError::NonFinite("wrench command"));
        }
        if coefficients.iter().any(|it| !it.is_finite()) {
            return Err(AllocationError::NonFinite("null space coefficients"));
        }

        let (coefficients, coefficients_clamped) = match self.coefficient_limit {
            Some(limit) => {
                let limited = coefficients.map(|it| it.clamp(-limit, limit));
                let clamped = limited != *coefficients;

                (limited, clamped)
            }
            None => (coefficients.clone(), false),
        };

        let baseline = null_space.pseudo_inverse() * wrench;
        let correction = null_space.basis() * &coefficients;
        let unsaturated = &baseline + &correction;

        let (thrusts, clamped_rotors) = bounds.clamp(&unsaturated)?;
        let achieved = matrix.matrix() * &thrusts;

        let saturation = if clamped_rotors.is_empty() {
            None
        } else {
            let wrench_error = matrix.matrix() * &unsaturated - &achieved;
            debug!(
                clamped = clamped_rotors.len(),
                error = wrench_error.norm(),
                "Thrust saturated"
            );

            Some(SaturationDeviation {
                clamped_rotors,
                wrench_error,
            })
        };

        trace!(?thrusts, "Allocated");

        Ok(Allocation {
            thrusts,
            baseline,
            correction,
            coefficients,
            requested: wrench.clone(),
            achieved,
            saturation,
            coefficients_clamped,
        })
    }
}

/// Allocates against a consistent matrix and basis pair
pub fn reverse_solve<RotorId: Ord>(
    wrench: Wrench,
    coefficients: &DVector<f64>,
    snapshot: &AllocationSnapshot<RotorId>,
    allocator: &ControlAllocator,
    bounds: &ThrustBounds,
) -> AllocationResult<Allocation> {
    let matrix = snapshot.matrix();

    allocator.allocate(
        matrix,
        snapshot.null_space(),
        &wrench.to_vector(matrix.axes()),
        coefficients,
        bounds,
    )
}

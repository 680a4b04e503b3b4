// +X: Right, +Y: Forwards, +Z: Up
// +XR: Pitch Up, +YR: Roll Clockwise, +ZR: Yaw Counter Clockwise (top view)

pub mod coefficients;
pub mod energy;
pub mod error;
pub mod matrix;
pub mod nullspace;
pub mod octo;
pub mod snapshot;
pub mod solve;
pub mod utils;

use std::{
    collections::BTreeMap,
    fmt::Debug,
    ops::{Add, AddAssign, Mul, Sub, SubAssign},
};

use glam::DVec3;
use serde::{Deserialize, Serialize};

pub use error::{AllocationError, AllocationResult, CoefficientError, CoefficientResult};
pub use matrix::{AllocationMatrix, WrenchAxes, WrenchAxis};

/// Smallest rotor count that can still leave a null space for full 6-DOF authority
pub const MIN_ROTORS: usize = 6;

/// Static rotor layout of a vehicle. Built once at configuration time and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleGeometry<RotorId: Ord> {
    rotors: BTreeMap<RotorId, Rotor>,
    thrust_coefficient: f64,
}

impl<RotorId: Ord + Debug> VehicleGeometry<RotorId> {
    /// Validates and normalizes the rotors. Iteration (and column) order follows `RotorId`'s `Ord`.
    pub fn new_raw(
        rotors: impl IntoIterator<Item = (RotorId, Rotor)>,
        thrust_coefficient: f64,
    ) -> AllocationResult<Self> {
        let rotors = rotors
            .into_iter()
            .map(|(id, rotor)| {
                let orientation = rotor
                    .orientation
                    .try_normalize()
                    .filter(|_| rotor.position.is_finite() && rotor.torque_coefficient.is_finite())
                    .ok_or_else(|| AllocationError::InvalidThrustAxis(format!("{id:?}")))?;

                Ok((
                    id,
                    Rotor {
                        orientation,
                        ..rotor
                    },
                ))
            })
            .collect::<AllocationResult<BTreeMap<_, _>>>()?;

        if rotors.len() < MIN_ROTORS {
            return Err(AllocationError::TooFewRotors {
                minimum: MIN_ROTORS,
                actual: rotors.len(),
            });
        }

        if !(thrust_coefficient.is_finite() && thrust_coefficient > 0.0) {
            return Err(AllocationError::InvalidThrustCoefficient(thrust_coefficient));
        }

        Ok(Self {
            rotors,
            thrust_coefficient,
        })
    }

    pub fn rotor(&self, rotor: &RotorId) -> Option<&Rotor> {
        self.rotors.get(rotor)
    }

    pub fn rotors(&self) -> impl Iterator<Item = (&RotorId, &Rotor)> {
        self.rotors.iter()
    }

    /// Column index of a rotor in the allocation matrix
    pub fn column_of(&self, rotor: &RotorId) -> Option<usize> {
        self.rotors.keys().position(|it| it == rotor)
    }

    pub fn rotor_count(&self) -> usize {
        self.rotors.len()
    }

    pub fn thrust_coefficient(&self) -> f64 {
        self.thrust_coefficient
    }
}

pub type ErasedRotorId = u8;

impl<RotorId: Ord + Into<ErasedRotorId>> VehicleGeometry<RotorId> {
    /// Order of ErasedRotorIds must match the order of RotorId given by the ord trait
    pub fn erase(self) -> VehicleGeometry<ErasedRotorId> {
        let VehicleGeometry {
            rotors,
            thrust_coefficient,
        } = self;

        let rotors = rotors
            .into_iter()
            .map(|(id, rotor)| (id.into(), rotor))
            .collect();

        VehicleGeometry {
            rotors,
            thrust_coefficient,
        }
    }
}

impl VehicleGeometry<ErasedRotorId> {
    /// Order of ErasedRotorIds must match the order of RotorId given by the ord trait
    pub fn unerase<RotorId: Ord + TryFrom<ErasedRotorId>>(
        self,
    ) -> Result<VehicleGeometry<RotorId>, <RotorId as TryFrom<ErasedRotorId>>::Error> {
        let VehicleGeometry {
            rotors,
            thrust_coefficient,
        } = self;

        let rotors = rotors
            .into_iter()
            .map(|(id, rotor)| RotorId::try_from(id).map(|it| (it, rotor)))
            .collect::<Result<_, _>>()?;

        Ok(VehicleGeometry {
            rotors,
            thrust_coefficient,
        })
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rotor {
    /// Offset from the center of mass
    pub position: DVec3,
    /// Thrust axis, normalized when the geometry is built
    pub orientation: DVec3,

    pub direction: Direction,
    /// Reaction torque per unit thrust, applied along the thrust axis
    pub torque_coefficient: f64,
}

impl Rotor {
    /// Force produced per unit thrust
    pub fn force(&self) -> DVec3 {
        self.orientation
    }

    /// Torque produced per unit thrust. Clockwise rotors contribute +k_τ along their axis.
    pub fn torque(&self) -> DVec3 {
        self.position.cross(self.orientation)
            + self.orientation * (self.direction.get_sign() * self.torque_coefficient)
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl Direction {
    pub fn get_sign(&self) -> f64 {
        match self {
            Direction::Clockwise => 1.0,
            Direction::CounterClockwise => -1.0,
        }
    }

    pub fn from_sign(sign: f64) -> Self {
        if sign.signum() == 1.0 {
            Direction::Clockwise
        } else {
            Direction::CounterClockwise
        }
    }

    pub fn flip_n(&self, count: i32) -> Self {
        let sign = self.get_sign();
        let new_sign = sign * (-1.0f64).powi(count);
        Self::from_sign(new_sign)
    }
}

/// Force and torque acting on the vehicle body
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Wrench {
    pub force: DVec3,
    pub torque: DVec3,
}

impl Wrench {
    pub fn component(&self, axis: WrenchAxis) -> f64 {
        match axis {
            WrenchAxis::ForceX => self.force.x,
            WrenchAxis::ForceY => self.force.y,
            WrenchAxis::ForceZ => self.force.z,
            WrenchAxis::TorqueX => self.torque.x,
            WrenchAxis::TorqueY => self.torque.y,
            WrenchAxis::TorqueZ => self.torque.z,
        }
    }

    fn component_mut(&mut self, axis: WrenchAxis) -> &mut f64 {
        match axis {
            WrenchAxis::ForceX => &mut self.force.x,
            WrenchAxis::ForceY => &mut self.force.y,
            WrenchAxis::ForceZ => &mut self.force.z,
            WrenchAxis::TorqueX => &mut self.torque.x,
            WrenchAxis::TorqueY => &mut self.torque.y,
            WrenchAxis::TorqueZ => &mut self.torque.z,
        }
    }

    /// Components in the order of `axes`, uncontrolled axes are dropped
    pub fn to_vector(&self, axes: &WrenchAxes) -> nalgebra::DVector<f64> {
        nalgebra::DVector::from_iterator(axes.len(), axes.iter().map(|axis| self.component(axis)))
    }

    /// Inverse of `to_vector`, uncontrolled axes are left at zero
    pub fn from_vector(axes: &WrenchAxes, vector: &nalgebra::DVector<f64>) -> AllocationResult<Self> {
        AllocationError::check_dimension("wrench vector", axes.len(), vector.len())?;

        let mut wrench = Wrench::default();
        for (axis, value) in axes.iter().zip(vector.iter()) {
            *wrench.component_mut(axis) = *value;
        }

        Ok(wrench)
    }

    pub fn is_finite(&self) -> bool {
        self.force.is_finite() && self.torque.is_finite()
    }
}

impl Add for Wrench {
    type Output = Wrench;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            force: self.force + rhs.force,
            torque: self.torque + rhs.torque,
        }
    }
}

impl AddAssign for Wrench {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Wrench {
    type Output = Wrench;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            force: self.force - rhs.force,
            torque: self.torque - rhs.torque,
        }
    }
}

impl SubAssign for Wrench {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f64> for Wrench {
    type Output = Wrench;

    fn mul(self, rhs: f64) -> Self::Output {
        Self {
            force: self.force * rhs,
            torque: self.torque * rhs,
        }
    }
}

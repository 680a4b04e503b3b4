//! Rotor Geometry -> Allocation Matrix

use std::fmt::Debug;

use nalgebra::{DMatrix, DVector};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{AllocationError, AllocationResult, VehicleGeometry, Wrench};

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum WrenchAxis {
    ForceX,
    ForceY,
    ForceZ,
    TorqueX,
    TorqueY,
    TorqueZ,
}

/// Ordered set of controlled wrench components, one allocation matrix row each
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct WrenchAxes(Vec<WrenchAxis>);

impl WrenchAxes {
    pub fn new(axes: impl IntoIterator<Item = WrenchAxis>) -> Self {
        Self(axes.into_iter().collect())
    }

    pub fn full() -> Self {
        Self(vec![
            WrenchAxis::ForceX,
            WrenchAxis::ForceY,
            WrenchAxis::ForceZ,
            WrenchAxis::TorqueX,
            WrenchAxis::TorqueY,
            WrenchAxis::TorqueZ,
        ])
    }

    /// [Fx, Fy, Fz, Mz], for vehicles whose roll and pitch are not allocated
    pub fn planar() -> Self {
        Self(vec![
            WrenchAxis::ForceX,
            WrenchAxis::ForceY,
            WrenchAxis::ForceZ,
            WrenchAxis::TorqueZ,
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = WrenchAxis> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for WrenchAxes {
    fn default() -> Self {
        Self::full()
    }
}

/// Maps rotor thrust magnitudes (columns) to wrench components (rows)
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationMatrix {
    matrix: DMatrix<f64>,
    axes: WrenchAxes,
}

impl AllocationMatrix {
    /// Column `i` is the wrench produced by one unit of thrust on the `i`th rotor in id order
    #[instrument(level = "trace", skip_all)]
    pub fn build<RotorId: Ord + Debug>(
        geometry: &VehicleGeometry<RotorId>,
        axes: WrenchAxes,
    ) -> Self {
        let matrix = DMatrix::from_iterator(
            axes.len(),
            geometry.rotor_count(),
            geometry
                .rotors()
                .map(|(_, rotor)| Wrench {
                    force: rotor.force(),
                    torque: rotor.torque(),
                })
                .flat_map(|wrench| axes.iter().map(move |axis| wrench.component(axis))),
        );

        Self { matrix, axes }
    }

    /// For matrices identified offline rather than derived from geometry
    pub fn from_raw(matrix: DMatrix<f64>, axes: WrenchAxes) -> AllocationResult<Self> {
        AllocationError::check_dimension("allocation matrix rows", axes.len(), matrix.nrows())?;

        if matrix.iter().any(|it| !it.is_finite()) {
            return Err(AllocationError::NonFinite("allocation matrix"));
        }

        Ok(Self { matrix, axes })
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn axes(&self) -> &WrenchAxes {
        &self.axes
    }

    pub fn wrench_dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn rotor_count(&self) -> usize {
        self.matrix.ncols()
    }

    /// Wrench produced by `thrusts`, in row order
    pub fn apply(&self, thrusts: &DVector<f64>) -> AllocationResult<DVector<f64>> {
        AllocationError::check_dimension("thrust vector", self.rotor_count(), thrusts.len())?;

        Ok(&self.matrix * thrusts)
    }
}

#[cfg(test)]
mod tests {
    use glam::dvec3;

    use super::*;
    use crate::{Direction, Rotor};

    fn hexagon() -> VehicleGeometry<u8> {
        let rotors = (0..6u8).map(|idx| {
            let angle = idx as f64 * std::f64::consts::TAU / 6.0;
            let position = dvec3(angle.cos(), angle.sin(), 0.0);

            (
                idx,
                Rotor {
                    position,
                    orientation: dvec3(0.0, 0.0, 2.0),
                    direction: Direction::Clockwise.flip_n(idx as i32),
                    torque_coefficient: 0.1,
                },
            )
        });

        VehicleGeometry::new_raw(rotors, 1.0).expect("Valid geometry")
    }

    #[test]
    fn columns_follow_rotor_order() {
        let geometry = hexagon();
        let matrix = AllocationMatrix::build(&geometry, WrenchAxes::full());

        assert_eq!(matrix.matrix().shape(), (6, 6));

        for (column, (_, rotor)) in geometry.rotors().enumerate() {
            // Thrust axis was normalized
            assert_eq!(matrix.matrix()[(2, column)], 1.0);
            assert_eq!(matrix.matrix()[(5, column)], rotor.torque().z);
        }
    }

    #[test]
    fn planar_axes_select_rows() {
        let geometry = hexagon();
        let full = AllocationMatrix::build(&geometry, WrenchAxes::full());
        let planar = AllocationMatrix::build(&geometry, WrenchAxes::planar());

        assert_eq!(planar.wrench_dim(), 4);
        assert_eq!(planar.matrix().row(3), full.matrix().row(5));
        assert_eq!(planar.matrix().row(2), full.matrix().row(2));
    }

    #[test]
    fn from_raw_rejects_bad_shapes() {
        let err = AllocationMatrix::from_raw(DMatrix::zeros(3, 8), WrenchAxes::full()).unwrap_err();
        assert_eq!(
            err,
            AllocationError::DimensionMismatch {
                context: "allocation matrix rows",
                expected: 6,
                actual: 3,
            }
        );

        let mut matrix = DMatrix::zeros(4, 8);
        matrix[(1, 1)] = f64::NAN;
        assert!(AllocationMatrix::from_raw(matrix, WrenchAxes::planar()).is_err());
    }

    #[test]
    fn wrench_axis_row_index() {
        assert_eq!(u8::from(WrenchAxis::TorqueZ), 5);
        assert_eq!(WrenchAxis::try_from(2u8).ok(), Some(WrenchAxis::ForceZ));
        assert!(WrenchAxis::try_from(6u8).is_err());
    }
}

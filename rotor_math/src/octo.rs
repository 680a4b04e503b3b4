use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    utils::{ring_position, tilted_axis},
    AllocationResult, Direction, Rotor, VehicleGeometry,
};

/// Rotors of an 8 arm ring, counter clockwise from the right arm (top view)
#[derive(
    Clone,
    Copy,
    Debug,
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
pub enum OctoRotorId {
    Right,
    FrontRight,
    Front,
    FrontLeft,
    Left,
    BackLeft,
    Back,
    BackRight,
}

impl OctoRotorId {
    pub const ALL: [OctoRotorId; 8] = [
        OctoRotorId::Right,
        OctoRotorId::FrontRight,
        OctoRotorId::Front,
        OctoRotorId::FrontLeft,
        OctoRotorId::Left,
        OctoRotorId::BackLeft,
        OctoRotorId::Back,
        OctoRotorId::BackRight,
    ];
}

/// Evenly spaced arms whose thrust axes lean alternately along and against the ring tangent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TiltedRing {
    pub radius: f64,
    pub tilt_degrees: f64,
    pub torque_coefficient: f64,
}

impl VehicleGeometry<OctoRotorId> {
    /// The right arm spins clockwise and leans along the tangent, every following arm
    /// flips both
    pub fn new(ring: TiltedRing, thrust_coefficient: f64) -> AllocationResult<Self> {
        let tilt = ring.tilt_degrees.to_radians();
        let count = OctoRotorId::ALL.len();

        let rotors = OctoRotorId::ALL.into_iter().map(|rotor_id| {
            let idx = u8::from(rotor_id) as i32;
            let azimuth = idx as f64 * std::f64::consts::TAU / count as f64;
            let direction = Direction::Clockwise.flip_n(idx);

            (
                rotor_id,
                Rotor {
                    position: ring_position(azimuth, ring.radius),
                    orientation: tilted_axis(azimuth, tilt, direction.get_sign()),
                    direction,
                    torque_coefficient: ring.torque_coefficient,
                },
            )
        });

        Self::new_raw(rotors, thrust_coefficient)
    }
}

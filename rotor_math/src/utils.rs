use glam::{dvec3, DVec3};

/// Unit vector from an azimuth in the XY plane and an elevation above it, both in radians
// https://stackoverflow.com/questions/30011741/3d-vector-defined-by-2-angles
pub fn vec_from_angles(angle_xy: f64, angle_yz: f64) -> DVec3 {
    let x = angle_xy.cos() * angle_yz.cos();
    let y = angle_xy.sin() * angle_yz.cos();
    let z = angle_yz.sin();

    dvec3(x, y, z)
}

/// Point on a horizontal ring around the origin
pub fn ring_position(azimuth: f64, radius: f64) -> DVec3 {
    vec_from_angles(azimuth, 0.0) * radius
}

/// +Z tilted by `tilt` radians towards the ring tangent at `azimuth`.
/// A negative `sign` tilts against the counter clockwise tangent.
pub fn tilted_axis(azimuth: f64, tilt: f64, sign: f64) -> DVec3 {
    vec_from_angles(
        azimuth + sign.signum() * std::f64::consts::FRAC_PI_2,
        std::f64::consts::FRAC_PI_2 - tilt,
    )
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn tilted_axis_components() {
        let tilt = 15f64.to_radians();
        let axis = tilted_axis(0.0, tilt, 1.0);

        assert_abs_diff_eq!(axis.length(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(axis.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(axis.y, tilt.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(axis.z, tilt.cos(), epsilon = 1e-12);

        let mirrored = tilted_axis(0.0, tilt, -1.0);
        assert_abs_diff_eq!(mirrored.y, -tilt.sin(), epsilon = 1e-12);
    }
}

// Relativistic kinematics and direction rotations shared by the samplers.

use nalgebra::{Rotation3, Unit, Vector3};

/// Momentum (GeV/c) of a particle of given mass and kinetic energy.
#[inline]
pub fn momentum(mass: f64, kinetic: f64) -> f64 {
    (kinetic * (kinetic + 2.0 * mass)).max(0.0).sqrt()
}

/// Velocity β = p/E.
#[inline]
pub fn beta(mass: f64, kinetic: f64) -> f64 {
    momentum(mass, kinetic) / (kinetic + mass)
}

/// Rotate a unit direction to a new direction at polar cosine `cos_theta`
/// and azimuth `phi` around the original one.
pub fn rotate_direction(u_old: &Vector3<f64>, cos_theta: f64, phi: f64) -> Vector3<f64> {
    let cos_theta = cos_theta.clamp(-1.0, 1.0);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    // Any vector perpendicular to u_old spans the azimuthal plane.
    let perp = if u_old.x.abs() < 0.99 {
        Vector3::new(1.0, 0.0, 0.0).cross(u_old).normalize()
    } else {
        Vector3::new(0.0, 1.0, 0.0).cross(u_old).normalize()
    };
    let ortho = u_old.cross(&perp);

    let u_new = cos_theta * u_old + sin_theta * phi.cos() * perp + sin_theta * phi.sin() * ortho;
    u_new.normalize()
}

/// Rotate a vector by `angle` around `axis` (right handed).
pub fn rotate_about(v: &Vector3<f64>, axis: &Vector3<f64>, angle: f64) -> Vector3<f64> {
    match Unit::try_new(*axis, f64::EPSILON) {
        Some(axis) => Rotation3::from_axis_angle(&axis, angle) * v,
        None => *v,
    }
}

/// Split `v` into components parallel and transverse to the unit `axis`.
pub fn decompose(v: &Vector3<f64>, axis: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let parallel = axis * v.dot(axis);
    (parallel, v - parallel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_direction_preserves_norm_and_angle() {
        let u = Vector3::new(0.0, 0.0, 1.0);
        let v = rotate_direction(&u, 0.5, 1.3);
        assert!((v.norm() - 1.0).abs() < 1e-12, "norm = {}", v.norm());
        assert!((v.dot(&u) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rotate_direction_along_x_axis() {
        let u = Vector3::new(1.0, 0.0, 0.0);
        let v = rotate_direction(&u, -1.0, 0.0);
        assert!((v + u).norm() < 1e-12);
    }

    #[test]
    fn test_rotate_about_quarter_turn() {
        let v = rotate_about(
            &Vector3::new(1.0, 0.0, 0.0),
            &Vector3::new(0.0, 0.0, 2.0),
            std::f64::consts::FRAC_PI_2,
        );
        assert!((v - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_kinematics_limits() {
        let m = 0.105_658_375_5;
        assert_eq!(momentum(m, 0.0), 0.0);
        assert!((beta(m, 1e4) - 1.0).abs() < 1e-6);
        let p = momentum(m, 1.0);
        assert!((p * p + m * m - (1.0 + m) * (1.0 + m)).abs() < 1e-12);
    }
}

//! Quaternion and spline helpers shared by the decoders.
//!
//! Quaternions are kept as plain [`Quaternion`]s rather than unit quaternions
//! because decoded values are only approximately normalized and blends are
//! normalized explicitly.

use std::ops::{Add, Mul, Sub};

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::error::{DecodeError, Result};

pub type Vec3 = Vector3<f32>;
pub type Quat = Quaternion<f32>;

/// Rotation from radian Euler angles (roll about x, pitch about y, yaw about z).
pub fn angle_quaternion(angles: &Vec3) -> Quat {
    UnitQuaternion::from_euler_angles(angles.x, angles.y, angles.z).into_inner()
}

/// Normalize in place of a copy. A zero-length quaternion is returned as is.
pub fn quaternion_normalize(q: Quat) -> Quat {
    let radius = q.coords.norm();
    if radius > 0.0 {
        Quat::from(q.coords / radius)
    } else {
        q
    }
}

/// `q` or `-q`, whichever lies on the same hemisphere as `p`.
pub fn quaternion_align(p: &Quat, q: &Quat) -> Quat {
    let a = (p.coords - q.coords).norm_squared();
    let b = (p.coords + q.coords).norm_squared();
    if a > b {
        -q
    } else {
        *q
    }
}

/// Aligned, normalized linear blend from `p` (t = 0) to `q` (t = 1).
pub fn quaternion_blend(p: &Quat, q: &Quat, t: f32) -> Quat {
    let q = quaternion_align(p, q);
    quaternion_normalize(Quat::from(p.coords * (1.0 - t) + q.coords * t))
}

pub fn lerp(a: &Vec3, b: &Vec3, t: f32) -> Vec3 {
    a * (1.0 - t) + b * t
}

/// Cubic Hermite curve from `p1` to `p2` with tangents `d1` and `d2`.
pub fn hermite_spline<T>(p1: T, p2: T, d1: T, d2: T, t: f32) -> T
where
    T: Copy + Add<Output = T> + Sub<Output = T> + Mul<f32, Output = T>,
{
    let t2 = t * t;
    let t3 = t2 * t;
    let b1 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let b2 = 1.0 - b1;
    let b3 = t3 - 2.0 * t2 + t;
    let b4 = t3 - t2;
    p1 * b1 + p2 * b2 + d1 * b3 + d2 * b4
}

/// Hermite curve through three samples, evaluated between `p1` and `p2`.
pub fn hermite_spline3<T>(p0: T, p1: T, p2: T, t: f32) -> T
where
    T: Copy + Add<Output = T> + Sub<Output = T> + Mul<f32, Output = T>,
{
    hermite_spline(p1, p2, p1 - p0, p2 - p1, t)
}

/// Component-wise Hermite through three rotations, after aligning the first
/// two with the last.
pub fn quaternion_hermite(q0: &Quat, q1: &Quat, q2: &Quat, t: f32) -> Quat {
    let q0 = quaternion_align(q2, q0);
    let q1 = quaternion_align(q2, q1);
    quaternion_normalize(Quat::from(hermite_spline3(q0.coords, q1.coords, q2.coords, t)))
}

/// Smoothstep over `[0, 1]`.
pub fn simple_spline(x: f32) -> f32 {
    let x2 = x * x;
    3.0 * x2 - 2.0 * x2 * x
}

pub(crate) fn finite_quat(q: Quat, what: &'static str) -> Result<Quat> {
    if q.coords.iter().all(|c| c.is_finite()) {
        Ok(q)
    } else {
        Err(DecodeError::NonFinite { what })
    }
}

pub(crate) fn finite_vec(v: Vec3, what: &'static str) -> Result<Vec3> {
    if v.iter().all(|c| c.is_finite()) {
        Ok(v)
    } else {
        Err(DecodeError::NonFinite { what })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: &Quat, b: &Quat) -> bool {
        (a.coords - b.coords).norm() < 1e-5
    }

    #[test]
    fn test_angle_quaternion_axes() {
        let q = angle_quaternion(&Vec3::new(0.0, 0.0, FRAC_PI_2));
        let half = (FRAC_PI_2 / 2.0).sin();
        assert!(approx(&q, &Quat::new(half, 0.0, 0.0, half)));

        let q = angle_quaternion(&Vec3::new(FRAC_PI_2, 0.0, 0.0));
        assert!(approx(&q, &Quat::new(half, half, 0.0, 0.0)));
    }

    #[test]
    fn test_align_flips_far_hemisphere() {
        let p = Quat::identity();
        let q = Quat::new(-0.9, 0.1, 0.0, 0.0);
        assert_eq!(quaternion_align(&p, &q), -q);
        assert_eq!(quaternion_align(&p, &-q), -q);
    }

    #[test]
    fn test_blend_endpoints() {
        let p = angle_quaternion(&Vec3::new(0.3, -0.2, 0.1));
        let q = angle_quaternion(&Vec3::new(-0.5, 0.4, 1.2));
        assert!(approx(&quaternion_blend(&p, &q, 0.0), &p));
        assert!(approx(&quaternion_blend(&p, &q, 1.0), &q));
        // far hemisphere input still lands on q's rotation, aligned to p
        assert!(approx(&quaternion_blend(&p, &-q, 1.0), &q));
    }

    #[test]
    fn test_normalize_zero_is_untouched() {
        let zero = Quat::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(quaternion_normalize(zero), zero);
    }

    #[test]
    fn test_lerp_is_exact_at_ends() {
        let a = Vec3::new(1.5, -2.25, 3.0);
        let b = Vec3::new(-7.0, 0.125, 9.5);
        assert_eq!(lerp(&a, &b, 0.0), a);
        assert_eq!(lerp(&a, &b, 1.0), b);
    }

    #[test]
    fn test_hermite_interpolates_endpoints() {
        assert_eq!(hermite_spline3(0.0f32, 1.0, 3.0, 0.0), 1.0);
        assert_eq!(hermite_spline3(0.0f32, 1.0, 3.0, 1.0), 3.0);
        // uniform spacing reproduces the line
        assert!((hermite_spline3(0.0f32, 1.0, 2.0, 0.5) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_quaternion_hermite_endpoints() {
        let q0 = angle_quaternion(&Vec3::new(0.0, 0.0, 0.1));
        let q1 = angle_quaternion(&Vec3::new(0.0, 0.0, 0.2));
        let q2 = angle_quaternion(&Vec3::new(0.0, 0.0, 0.3));
        assert!(approx(&quaternion_hermite(&q0, &q1, &q2, 0.0), &q1));
        assert!(approx(&quaternion_hermite(&q0, &q1, &q2, 1.0), &q2));
    }

    #[test]
    fn test_simple_spline() {
        assert_eq!(simple_spline(0.0), 0.0);
        assert_eq!(simple_spline(1.0), 1.0);
        assert_eq!(simple_spline(0.5), 0.5);
    }

    #[test]
    fn test_finite_checks() {
        assert!(finite_vec(Vec3::new(f32::NAN, 0.0, 0.0), "position").is_err());
        assert!(finite_quat(Quat::identity(), "rotation").is_ok());
    }
}

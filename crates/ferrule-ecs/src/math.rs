//! Matrix helpers and glam re-exports.
//!
//! Unlike `Mat4::to_scale_rotation_translation`, decomposition here never
//! produces NaN/Inf from a zero-length basis column. A single non-finite
//! world matrix would propagate to every descendant.

pub use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

/// Basis columns shorter than this are treated as zero scale.
pub const SCALE_EPSILON: f32 = 1.0e-6;

/// Determinants with an absolute value below this are treated as singular.
pub const DETERMINANT_EPSILON: f32 = 1.0e-12;

/// Compose a local matrix from position, rotation and scale.
#[inline]
pub fn compose(position: Vec3, rotation: Quat, scale: Vec3) -> Mat4 {
    Mat4::from_scale_rotation_translation(scale, rotation, position)
}

/// Per-axis scale: the length of each basis column.
pub fn scale_from_matrix(m: &Mat4) -> Vec3 {
    let scale = Vec3::new(
        m.x_axis.truncate().length(),
        m.y_axis.truncate().length(),
        m.z_axis.truncate().length(),
    );
    if scale.is_finite() {
        scale
    } else {
        Vec3::ONE
    }
}

/// Translation part of an affine matrix.
#[inline]
pub fn translation_from_matrix(m: &Mat4) -> Vec3 {
    let t = m.w_axis.truncate();
    if t.is_finite() {
        t
    } else {
        Vec3::ZERO
    }
}

/// Rotation part of an affine matrix.
///
/// Each basis column is divided by its length. Columns shorter than
/// [`SCALE_EPSILON`] are rebuilt from the surviving columns (cross products),
/// falling back to the matching identity axis when two or more collapse.
pub fn quat_from_matrix(m: &Mat4) -> Quat {
    let axes = [m.x_axis.truncate(), m.y_axis.truncate(), m.z_axis.truncate()];
    let mut unit = [Vec3::X, Vec3::Y, Vec3::Z];
    let mut ok = [false; 3];
    for i in 0..3 {
        let len = axes[i].length();
        if len.is_finite() && len > SCALE_EPSILON {
            unit[i] = axes[i] / len;
            ok[i] = true;
        }
    }

    match ok {
        [true, true, true] => {}
        [false, true, true] => unit[0] = unit_or(unit[1].cross(unit[2]), Vec3::X),
        [true, false, true] => unit[1] = unit_or(unit[2].cross(unit[0]), Vec3::Y),
        [true, true, false] => unit[2] = unit_or(unit[0].cross(unit[1]), Vec3::Z),
        [true, false, false] => {
            let (y, z) = orthonormal_pair(unit[0]);
            unit[1] = y;
            unit[2] = z;
        }
        [false, true, false] => {
            let (z, x) = orthonormal_pair(unit[1]);
            unit[2] = z;
            unit[0] = x;
        }
        [false, false, true] => {
            let (x, y) = orthonormal_pair(unit[2]);
            unit[0] = x;
            unit[1] = y;
        }
        [false, false, false] => return Quat::IDENTITY,
    }

    // Mirrored bases (negative determinant) cannot be expressed as a pure
    // rotation; flip the third axis so the result stays a proper rotation.
    if unit[0].cross(unit[1]).dot(unit[2]) < 0.0 {
        unit[2] = -unit[2];
    }

    let q = Quat::from_mat3(&Mat3::from_cols(unit[0], unit[1], unit[2]));
    if q.is_finite() && q.length_squared() > 0.0 {
        q.normalize()
    } else {
        Quat::IDENTITY
    }
}

/// Decompose an affine matrix into `(scale, rotation, translation)`.
pub fn decompose(m: &Mat4) -> (Vec3, Quat, Vec3) {
    (scale_from_matrix(m), quat_from_matrix(m), translation_from_matrix(m))
}

/// Inverse of `m`, or identity if `m` is singular or non-finite.
pub fn safe_inverse(m: &Mat4) -> Mat4 {
    let det = m.determinant();
    if !det.is_finite() || det.abs() < DETERMINANT_EPSILON {
        tracing::warn!(determinant = det, "singular matrix inverted -- using identity");
        return Mat4::IDENTITY;
    }
    m.inverse()
}

fn unit_or(v: Vec3, fallback: Vec3) -> Vec3 {
    let n = v.normalize_or_zero();
    if n == Vec3::ZERO {
        fallback
    } else {
        n
    }
}

/// Two unit vectors completing `n` (unit) to a right-handed basis `(n, a, b)`.
fn orthonormal_pair(n: Vec3) -> (Vec3, Vec3) {
    let helper = if n.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    let a = unit_or(n.cross(helper), Vec3::Y);
    let b = unit_or(n.cross(a), Vec3::Z);
    (a, b)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_vec(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-4
    }

    fn approx_quat(a: Quat, b: Quat) -> bool {
        // q and -q encode the same rotation.
        a.dot(b).abs() > 1.0 - 1e-4
    }

    #[test]
    fn decompose_recovers_components() {
        let rot = Quat::from_rotation_y(0.7) * Quat::from_rotation_x(-0.3);
        let m = compose(Vec3::new(1.0, 2.0, 3.0), rot, Vec3::new(2.0, 0.5, 1.5));
        let (s, r, t) = decompose(&m);
        assert!(approx_vec(s, Vec3::new(2.0, 0.5, 1.5)));
        assert!(approx_quat(r, rot));
        assert!(approx_vec(t, Vec3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn zero_scale_axis_produces_no_nan() {
        let m = compose(Vec3::ZERO, Quat::from_rotation_z(0.4), Vec3::new(1.0, 0.0, 1.0));
        let (s, r, t) = decompose(&m);
        assert!(s.is_finite());
        assert!(r.is_finite());
        assert!(t.is_finite());
        assert_eq!(s.y, 0.0);
        assert!(approx_quat(r, Quat::from_rotation_z(0.4)));
    }

    #[test]
    fn fully_degenerate_matrix_is_identity_rotation() {
        let m = Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::ZERO);
        let (s, r, t) = decompose(&m);
        assert_eq!(s, Vec3::ZERO);
        assert_eq!(r, Quat::IDENTITY);
        assert!(approx_vec(t, Vec3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn two_zero_axes_still_finite() {
        let m = compose(Vec3::ZERO, Quat::from_rotation_x(1.0), Vec3::new(0.0, 0.0, 3.0));
        let r = quat_from_matrix(&m);
        assert!(r.is_finite());
        assert!((r.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn nan_input_falls_back() {
        let mut m = Mat4::IDENTITY;
        m.x_axis.x = f32::NAN;
        let (s, r, t) = decompose(&m);
        assert!(s.is_finite());
        assert!(r.is_finite());
        assert!(t.is_finite());
    }

    #[test]
    fn safe_inverse_of_singular_is_identity() {
        let m = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(safe_inverse(&m), Mat4::IDENTITY);
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let inv = safe_inverse(&m);
        assert!(approx_vec(inv.transform_point3(Vec3::new(1.0, 2.0, 3.0)), Vec3::ZERO));
    }
}

/// A column-major 4x4 matrix, laid out the way shader uniforms expect it:
/// `m[column][row]`.
pub type Matrix4 = [[f32; 4]; 4];

/// The identity matrix.
pub const IDENTITY: Matrix4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// A 2D scale + translation matrix in normalized device coordinates.
pub fn scale_translate(sx: f32, sy: f32, tx: f32, ty: f32) -> Matrix4 {
    [
        [sx, 0.0, 0.0, 0.0],
        [0.0, sy, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [tx, ty, 0.0, 1.0],
    ]
}

/// Transform a 2D point (z = 0, w = 1) and apply the perspective divide.
pub fn transform_point(m: &Matrix4, x: f32, y: f32) -> [f32; 2] {
    let px = m[0][0] * x + m[1][0] * y + m[3][0];
    let py = m[0][1] * x + m[1][1] * y + m[3][1];
    let pw = m[0][3] * x + m[1][3] * y + m[3][3];
    if pw == 0.0 {
        return [px, py];
    }
    [px / pw, py / pw]
}

/// Inverse of the 2D affine part of `m` (upper-left 2x2 plus XY translation).
///
/// Returns `None` when that part is singular.
pub fn invert_affine_2d(m: &Matrix4) -> Option<Matrix4> {
    let (a, b, c, d) = (m[0][0], m[1][0], m[0][1], m[1][1]);
    let det = a * d - b * c;
    if det.abs() < f32::EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let (ia, ib, ic, id) = (d * inv_det, -b * inv_det, -c * inv_det, a * inv_det);
    let (tx, ty) = (m[3][0], m[3][1]);
    Some([
        [ia, ic, 0.0, 0.0],
        [ib, id, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [-(ia * tx + ib * ty), -(ic * tx + id * ty), 0.0, 1.0],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        assert_eq!(transform_point(&IDENTITY, 0.25, -0.5), [0.25, -0.5]);
    }

    #[test]
    fn test_scale_translate() {
        let m = scale_translate(2.0, 0.5, 0.1, 0.0);
        let p = transform_point(&m, 1.0, 1.0);
        assert!((p[0] - 2.1).abs() < 1e-6);
        assert!((p[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_affine_inverse_roundtrip() {
        let m = scale_translate(2.0, 4.0, 0.5, -0.25);
        let inv = invert_affine_2d(&m).unwrap();
        let p = transform_point(&m, 0.3, 0.7);
        let q = transform_point(&inv, p[0], p[1]);
        assert!((q[0] - 0.3).abs() < 1e-5);
        assert!((q[1] - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        assert!(invert_affine_2d(&scale_translate(0.0, 1.0, 0.0, 0.0)).is_none());
    }
}

//! Fixed-size linear algebra kernel.
//!
//! Storage and plain arithmetic (add, sub, scale, dot, cross, matrix products, transpose) come from
//! nalgebra's statically sized types. This module adds the operations the renderer needs a precise
//! contract for: checked division, projective augmentation/projection, Gauss-Jordan inversion and
//! cofactor determinants.

use nalgebra as na;
use na::{DMatrix, SMatrix, SVector, Vector2, Vector3, Vector4};
use thiserror::Error;

/// Pivots with a smaller magnitude than this make a matrix singular for [`inverse`].
pub const PIVOT_EPSILON: f32 = 1e-7;

/// Vector of N f32 components.
pub type VectorN<const N: usize> = SVector<f32, N>;
/// Square N x N matrix of f32.
pub type MatrixN<const N: usize> = SMatrix<f32, N, N>;

/// Arithmetic contract violations of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AlgebraError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("matrix is singular")]
    SingularMatrix,
}

/// Divides every component of `v` by `s`, refusing to produce infinities.
pub fn checked_div<const N: usize>(v: &VectorN<N>, s: f32) -> Result<VectorN<N>, AlgebraError> {
    if s == 0.0 {
        return Err(AlgebraError::DivisionByZero);
    }
    return Ok(v.map(|c| c / s));
}

/// Normalized copy of `v`. The zero vector has no direction.
pub fn unit<const N: usize>(v: &VectorN<N>) -> Result<VectorN<N>, AlgebraError> {
    return checked_div(v, v.norm());
}

/// Reflection of `l` about the normal `n` (both assumed normalized).
pub fn reflect(l: &Vector3<f32>, n: &Vector3<f32>) -> Vector3<f32> {
    return n * (2.0 * n.dot(l)) - l;
}

/// Appending a homogeneous coordinate.
pub trait Homogeneous {
    type Augmented;

    /// Appends `w` as the last coordinate, 1.0 for points and 0.0 for directions.
    fn augment(&self, w: f32) -> Self::Augmented;
}

/// Dropping the homogeneous coordinate, the inverse of [`Homogeneous::augment`].
pub trait Projective {
    type Projected;

    /// Drops the last coordinate. With `divide` set the remaining ones are divided by it first.
    fn project(&self, divide: bool) -> Result<Self::Projected, AlgebraError>;
}

impl Homogeneous for Vector2<f32> {
    type Augmented = Vector3<f32>;

    fn augment(&self, w: f32) -> Vector3<f32> {
        return Vector3::new(self.x, self.y, w);
    }
}

impl Homogeneous for Vector3<f32> {
    type Augmented = Vector4<f32>;

    fn augment(&self, w: f32) -> Vector4<f32> {
        return Vector4::new(self.x, self.y, self.z, w);
    }
}

impl Projective for Vector3<f32> {
    type Projected = Vector2<f32>;

    fn project(&self, divide: bool) -> Result<Vector2<f32>, AlgebraError> {
        let xy = Vector2::new(self.x, self.y);
        if divide {
            return checked_div(&xy, self.z);
        }
        return Ok(xy);
    }
}

impl Projective for Vector4<f32> {
    type Projected = Vector3<f32>;

    fn project(&self, divide: bool) -> Result<Vector3<f32>, AlgebraError> {
        let xyz = Vector3::new(self.x, self.y, self.z);
        if divide {
            return checked_div(&xyz, self.w);
        }
        return Ok(xyz);
    }
}

/// Inverse of a square matrix by Gauss-Jordan elimination.
///
/// Conceptually the matrix is augmented with the identity into an N x 2N block; here the two halves
/// are kept as separate matrices (`left`, `right`) and every row operation is applied to both.
/// Forward elimination (with partial pivoting) reduces `left` to unit upper-triangular form, back
/// substitution clears the entries above the pivots and `right` ends up holding the inverse.
pub fn inverse<const N: usize>(m: &MatrixN<N>) -> Result<MatrixN<N>, AlgebraError> {
    let mut left = *m;
    let mut right = MatrixN::<N>::identity();

    // Forward pass.
    for i in 0..N {
        let mut pivot_row = i;
        for k in (i + 1)..N {
            if left[(k, i)].abs() > left[(pivot_row, i)].abs() {
                pivot_row = k;
            }
        }
        if left[(pivot_row, i)].abs() < PIVOT_EPSILON {
            return Err(AlgebraError::SingularMatrix);
        }
        if pivot_row != i {
            left.swap_rows(i, pivot_row);
            right.swap_rows(i, pivot_row);
        }

        let pivot = left[(i, i)];
        for j in 0..N {
            left[(i, j)] /= pivot;
            right[(i, j)] /= pivot;
        }

        for k in (i + 1)..N {
            let coef = left[(k, i)];
            if coef == 0.0 {
                continue;
            }
            for j in 0..N {
                let (l, r) = (left[(i, j)], right[(i, j)]);
                left[(k, j)] -= coef * l;
                right[(k, j)] -= coef * r;
            }
        }
    }

    // Back substitution.
    for i in (1..N).rev() {
        for k in 0..i {
            let coef = left[(k, i)];
            if coef == 0.0 {
                continue;
            }
            for j in 0..N {
                let (l, r) = (left[(i, j)], right[(i, j)]);
                left[(k, j)] -= coef * l;
                right[(k, j)] -= coef * r;
            }
        }
    }

    return Ok(right);
}

/// Determinant by cofactor expansion along the first row.
// @OPTI exponential in N, only meant for the 3x3 and 4x4 matrices the renderer builds.
pub fn determinant<const N: usize>(m: &MatrixN<N>) -> f32 {
    // Both sides iterate column-major, so the copy keeps the layout.
    let dynamic = DMatrix::from_iterator(N, N, m.iter().copied());
    return cofactor_expansion(&dynamic);
}

fn cofactor_expansion(m: &DMatrix<f32>) -> f32 {
    match m.nrows() {
        0 => return 1.0,
        1 => return m[(0, 0)],
        2 => return m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        n => {
            let mut result = 0.0;
            for j in 0..n {
                let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
                let minor = m.clone().remove_row(0).remove_column(j);
                result += sign * m[(0, j)] * cofactor_expansion(&minor);
            }
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use na::{matrix, vector, Matrix2, Matrix3, Matrix4};

    fn sample_vectors() -> Vec<Vector3<f32>> {
        return vec![
            vector![1.0, 0.0, 0.0],
            vector![0.3, -2.0, 5.5],
            vector![-1.5, 4.0, 0.25],
            vector![7.0, 7.0, -7.0],
            vector![0.0, 0.0, 0.0],
        ];
    }

    #[test]
    fn dot_is_symmetric() {
        for v in sample_vectors() {
            for w in sample_vectors() {
                assert_relative_eq!(v.dot(&w), w.dot(&v));
            }
        }
    }

    #[test]
    fn cross_is_antisymmetric() {
        for v in sample_vectors() {
            for w in sample_vectors() {
                assert_relative_eq!(v.cross(&w), -w.cross(&v));
            }
        }
        let x: Vector3<f32> = vector![1.0, 0.0, 0.0];
        let y: Vector3<f32> = vector![0.0, 1.0, 0.0];
        assert_relative_eq!(x.cross(&y), vector![0.0, 0.0, 1.0]);
    }

    #[test]
    fn norm_is_zero_only_for_zero_vector() {
        for v in sample_vectors() {
            assert!(v.norm() >= 0.0);
            let is_zero = v.iter().all(|c| *c == 0.0);
            assert_eq!(v.norm() == 0.0, is_zero);
        }
    }

    #[test]
    fn division_by_zero_scalar_fails() {
        let v: Vector3<f32> = vector![1.0, 2.0, 3.0];
        assert_eq!(checked_div(&v, 0.0), Err(AlgebraError::DivisionByZero));
        assert_relative_eq!(checked_div(&v, 2.0).unwrap(), vector![0.5, 1.0, 1.5]);
        assert_eq!(unit(&Vector3::<f32>::zeros()), Err(AlgebraError::DivisionByZero));
        assert_relative_eq!(unit(&v).unwrap().norm(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn augment_then_project_round_trips() {
        let v: Vector3<f32> = vector![0.5, -3.0, 12.0];
        for s in [1.0, -2.0, 0.25, 10.0] {
            let augmented = (v * s).augment(s);
            assert_relative_eq!(augmented.project(true).unwrap(), v, epsilon = 1e-6);
        }
        assert_eq!(v.augment(1.0).project(false).unwrap(), v);
        assert_eq!(v.augment(0.0).project(true), Err(AlgebraError::DivisionByZero));

        let p: Vector2<f32> = vector![4.0, -1.0];
        assert_eq!(p.augment(1.0).project(true).unwrap(), p);
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let m: Matrix4<f32> = matrix![2.0, 0.0, 1.0, 3.0;
                                      1.0, 4.0, 0.0, -1.0;
                                      0.0, 1.0, 5.0, 2.0;
                                      -2.0, 0.5, 1.0, 1.0];
        let i = inverse(&m).unwrap();
        assert_relative_eq!(m * i, Matrix4::identity(), epsilon = 1e-5);
        assert_relative_eq!(i * m, Matrix4::identity(), epsilon = 1e-5);
        assert_relative_eq!(inverse(&i).unwrap(), m, epsilon = 1e-4);
        assert_relative_eq!(i, m.try_inverse().unwrap(), epsilon = 1e-5);
    }

    #[test]
    fn inverse_handles_zero_leading_pivot() {
        let swap: Matrix2<f32> = matrix![0.0, 1.0;
                                         1.0, 0.0];
        assert_relative_eq!(inverse(&swap).unwrap(), swap);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let m: Matrix3<f32> = matrix![1.0, 2.0, 3.0;
                                      2.0, 4.0, 6.0;
                                      0.0, 1.0, 1.0];
        assert_eq!(inverse(&m), Err(AlgebraError::SingularMatrix));
    }

    #[test]
    fn determinant_matches_closed_forms() {
        let m2: Matrix2<f32> = matrix![3.0, 8.0;
                                       4.0, 6.0];
        assert_relative_eq!(determinant(&m2), -14.0);

        let m3: Matrix3<f32> = matrix![6.0, 1.0, 1.0;
                                       4.0, -2.0, 5.0;
                                       2.0, 8.0, 7.0];
        assert_relative_eq!(determinant(&m3), -306.0, epsilon = 1e-4);

        let m4: Matrix4<f32> = matrix![2.0, 0.0, 1.0, 3.0;
                                       1.0, 4.0, 0.0, -1.0;
                                       0.0, 1.0, 5.0, 2.0;
                                       -2.0, 0.5, 1.0, 1.0];
        assert_relative_eq!(determinant(&m4), m4.determinant(), epsilon = 1e-3);
        assert_abs_diff_eq!(determinant(&Matrix4::<f32>::identity()), 1.0);
    }

    #[test]
    fn reflect_mirrors_about_normal() {
        let n: Vector3<f32> = vector![0.0, 0.0, 1.0];
        let l: Vector3<f32> = unit(&vector![1.0, 0.0, 1.0]).unwrap();
        let r = reflect(&l, &n);
        assert_relative_eq!(r, vector![-l.x, 0.0, l.z], epsilon = 1e-6);
    }
}

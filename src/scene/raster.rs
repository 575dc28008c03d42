use nalgebra::{vector, Vector2, Vector3};

use super::buffer::DepthBuffer;
use super::shader::{Fragment, Shader};
use crate::image::Image;

/// Triangles with a doubled screen area below this (in pixel^2) cover no pixel reliably and are skipped.
pub const DEGENERATE_EPSILON: f32 = 1e-2;

/// Barycentric coordinates of `p` with respect to the screen space triangle `pts`, depth is ignored.
/// For a degenerate triangle returns a vector with a negative coordinate, so the point gets rejected.
pub fn barycentric(pts: &[Vector3<f32>; 3], p: Vector2<f32>) -> Vector3<f32> {
    let s_x = vector![pts[2].x - pts[0].x, pts[1].x - pts[0].x, pts[0].x - p.x];
    let s_y = vector![pts[2].y - pts[0].y, pts[1].y - pts[0].y, pts[0].y - p.y];
    let u = s_x.cross(&s_y);
    if u.z.abs() < DEGENERATE_EPSILON {
        return vector![-1.0, 1.0, 1.0];
    }
    return vector![1.0 - (u.x + u.y) / u.z, u.y / u.z, u.x / u.z];
}

/// Fills the triangle with fragments of `shader`.
///
/// Every pixel whose center lies inside the triangle (edges included) gets its depth interpolated and
/// tested against `depth`. Only pixels that win the depth test reach the fragment stage, and only
/// non-discarded fragments are written to `image`. Returns the number of pixels that passed the depth test.
pub fn triangle<S: Shader + ?Sized>(
    pts: &[Vector3<f32>; 3],
    shader: &S,
    depth: &DepthBuffer,
    image: &Image,
) -> usize {
    if pts.iter().any(|p| !p.iter().all(|c| c.is_finite())) {
        return 0;
    }
    if depth.width() == 0 || depth.height() == 0 {
        return 0;
    }

    // Bounding box, clamped to the buffer.
    let x_max_clamp = depth.width() as f32 - 1.0;
    let y_max_clamp = depth.height() as f32 - 1.0;
    let x_min = pts.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor().max(0.0) as i32;
    let y_min = pts.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor().max(0.0) as i32;
    let x_max = pts.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max).floor().min(x_max_clamp) as i32;
    let y_max = pts.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max).floor().min(y_max_clamp) as i32;

    let z_values = vector![pts[0].z, pts[1].z, pts[2].z];
    let mut n_written = 0;
    for x in x_min..=x_max {
        for y in y_min..=y_max {
            let center = vector![x as f32 + 0.5, y as f32 + 0.5];
            let bar = barycentric(pts, center);
            if bar.x < 0.0 || bar.y < 0.0 || bar.z < 0.0 {
                continue;
            }
            if !depth.check_and_set(x, y, bar.dot(&z_values)) {
                continue;
            }
            n_written += 1;
            if let Some(color) = shader.fragment(Fragment { bar, x, y }) {
                image.set(x, y, color);
            }
        }
    }
    return n_written;
}

/// Runs the vertex stage of `shader` for the three corners of a face and rasterizes the result.
/// Returns false if the shader culled the face.
pub fn draw_face<S: Shader + ?Sized>(
    shader: &mut S,
    face: usize,
    depth: &DepthBuffer,
    image: &Image,
) -> bool {
    let mut pts = [Vector3::zeros(); 3];
    for (nth, point) in pts.iter_mut().enumerate() {
        match shader.vertex(face, nth) {
            Some(screen) => *point = screen,
            None => return false,
        }
    }
    triangle(&pts, shader, depth, image);
    return true;
}

//! Screen space ambient occlusion from a filled depth buffer.
//!
//! Every pixel marches rays in 8 directions over the depth buffer and finds the steepest elevation of the
//! surrounding surface. The less sky a pixel sees, the darker it gets.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};
use std::ops::Range;

use nalgebra::{vector, Vector2};

use super::buffer::DepthBuffer;
use crate::image::{Color, Image};

/// Number of ray directions, 45 degrees apart.
pub const N_DIRECTIONS: usize = 8;
/// Width of a chunk of samples processed together by the lane variant.
pub const LANES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcclusionParams {
    pub max_distance: u32, // Longest ray, in pixels.
    pub exponent: f32,     // Applied to the normalized visibility, > 1 darkens creases.
}

impl Default for OcclusionParams {
    fn default() -> Self {
        return Self {
            max_distance: 1000,
            exponent: 1.0,
        };
    }
}

/// Outcome of one step along a ray.
enum Sample {
    Outside,
    Skipped,
    Slope(f32),
}

fn sample(depth: &DepthBuffer, origin: f32, point: Vector2<f32>, direction: Vector2<f32>, t: f32) -> Sample {
    let x = point.x + direction.x * t;
    let y = point.y + direction.y * t;
    if x < 0.0 || y < 0.0 || x >= depth.width() as f32 || y >= depth.height() as f32 {
        return Sample::Outside;
    }
    let distance = ((x - point.x).powi(2) + (y - point.y).powi(2)).sqrt();
    if distance < 1.0 {
        return Sample::Skipped;
    }
    return match depth.get(x.floor() as i32, y.floor() as i32) {
        Some(value) if value.is_finite() => Sample::Slope((value - origin) / distance),
        _ => Sample::Skipped,
    };
}

/// Steepest elevation angle (in [0, pi/2)) of the depth buffer seen from `point` along `direction`,
/// sampling one pixel step at a time up to `max_distance` steps or the buffer border.
pub fn max_elevation_angle(
    depth: &DepthBuffer,
    point: Vector2<f32>,
    direction: Vector2<f32>,
    max_distance: u32,
) -> f32 {
    let origin = match depth.get(point.x as i32, point.y as i32) {
        Some(origin) if origin.is_finite() => origin,
        _ => return 0.0,
    };
    let mut max_slope: f32 = 0.0;
    for t in 0..=max_distance {
        match sample(depth, origin, point, direction, t as f32) {
            Sample::Outside => break,
            Sample::Skipped => continue,
            Sample::Slope(slope) => max_slope = max_slope.max(slope),
        }
    }
    return max_slope.atan();
}

/// Same as [`max_elevation_angle`], stepping `LANES` samples at a time over fixed size arrays, which the
/// compiler lowers to vector instructions.
pub fn max_elevation_angle_lanes(
    depth: &DepthBuffer,
    point: Vector2<f32>,
    direction: Vector2<f32>,
    max_distance: u32,
) -> f32 {
    let origin = match depth.get(point.x as i32, point.y as i32) {
        Some(origin) if origin.is_finite() => origin,
        _ => return 0.0,
    };
    let (width, height) = (depth.width() as f32, depth.height() as f32);
    let mut max_slope: f32 = 0.0;
    let mut start = 0;
    while start <= max_distance {
        let t: [f32; LANES] = std::array::from_fn(|i| (start + i as u32) as f32);
        let x: [f32; LANES] = std::array::from_fn(|i| point.x + direction.x * t[i]);
        let y: [f32; LANES] = std::array::from_fn(|i| point.y + direction.y * t[i]);
        let inside: [bool; LANES] = std::array::from_fn(|i| {
            x[i] >= 0.0 && y[i] >= 0.0 && x[i] < width && y[i] < height && t[i] <= max_distance as f32
        });
        let distance: [f32; LANES] =
            std::array::from_fn(|i| ((x[i] - point.x).powi(2) + (y[i] - point.y).powi(2)).sqrt());

        for i in 0..LANES {
            if !inside[i] || distance[i] < 1.0 {
                continue;
            }
            if let Some(value) = depth.get(x[i].floor() as i32, y[i].floor() as i32) {
                if value.is_finite() {
                    max_slope = max_slope.max((value - origin) / distance[i]);
                }
            }
        }
        // A ray that left the buffer never comes back.
        if inside.iter().any(|lane| !lane) {
            break;
        }
        start += LANES as u32;
    }
    return max_slope.atan();
}

/// Unit vectors of the ray directions, counterclockwise from +x.
pub fn directions() -> [Vector2<f32>; N_DIRECTIONS] {
    return std::array::from_fn(|i| {
        let angle = i as f32 * FRAC_PI_4;
        vector![angle.cos(), angle.sin()]
    });
}

/// Visibility of a pixel in [0, 1]: the mean unoccluded angle over all directions, normalized and raised
/// to the exponent. Pixels without depth get 0.
pub fn visibility(depth: &DepthBuffer, x: i32, y: i32, params: &OcclusionParams) -> f32 {
    match depth.get(x, y) {
        Some(value) if value.is_finite() => (),
        _ => return 0.0,
    }
    let point = vector![x as f32, y as f32];
    let total: f32 = directions()
        .iter()
        .map(|direction| FRAC_PI_2 - max_elevation_angle_lanes(depth, point, *direction, params.max_distance))
        .sum();
    let normalized = (total / N_DIRECTIONS as f32 / FRAC_PI_2).clamp(0.0, 1.0);
    return normalized.powf(params.exponent);
}

/// Fills a band of rows of `image` with visibility gray levels.
pub fn occlude_rows(depth: &DepthBuffer, params: &OcclusionParams, image: &Image, rows: Range<u32>) {
    for y in rows {
        for x in 0..depth.width() {
            let level = visibility(depth, x as i32, y as i32, params) * 255.0;
            image.set(x as i32, y as i32, Color::gray(level.round() as u8));
        }
    }
}

/// Grayscale ambient occlusion image of the whole buffer.
pub fn ambient_occlusion(depth: &DepthBuffer, params: &OcclusionParams) -> Image {
    let image = Image::new_grayscale(depth.width(), depth.height());
    occlude_rows(depth, params, &image, 0..depth.height());
    return image;
}

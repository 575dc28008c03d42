use nalgebra::{Matrix4, Vector3};

use crate::util::{self, AlgebraError, Homogeneous, Projective};

/// Resolution of the depth axis after the viewport transform.
pub const DEFAULT_DEPTH: f32 = 255.0;

/// Perspective matrix: identity except entry (3, 2), which is -1 / (camera to focal point distance).
/// A zero coefficient gives an orthographic projection.
pub fn projection(coeff: f32) -> Matrix4<f32> {
    let mut projection_matrix = Matrix4::identity();
    projection_matrix[(3, 2)] = coeff;
    return projection_matrix;
}

/// Change of basis into camera space: rotation onto the right/up/forward axes of the camera,
/// applied after translating `center` to the origin.
pub fn look_at(
    eye: Vector3<f32>,
    center: Vector3<f32>,
    up: Vector3<f32>,
) -> Result<Matrix4<f32>, AlgebraError> {
    let z = util::unit(&(eye - center))?;
    let x = util::unit(&up.cross(&z))?;
    let y = util::unit(&z.cross(&x))?;

    let mut rotation = Matrix4::identity();
    let mut translation = Matrix4::identity();
    for i in 0..3 {
        rotation[(0, i)] = x[i];
        rotation[(1, i)] = y[i];
        rotation[(2, i)] = z[i];
        translation[(i, 3)] = -center[i];
    }
    return Ok(rotation * translation);
}

/// Affine map of the [-1, 1] cube to pixels [x, x + width] x [y, y + height] and depth [0, depth].
pub fn viewport(x: f32, y: f32, width: f32, height: f32, depth: f32) -> Matrix4<f32> {
    let mut viewport_matrix = Matrix4::identity();
    viewport_matrix[(0, 3)] = x + width / 2.0;
    viewport_matrix[(1, 3)] = y + height / 2.0;
    viewport_matrix[(2, 3)] = depth / 2.0;
    viewport_matrix[(0, 0)] = width / 2.0;
    viewport_matrix[(1, 1)] = height / 2.0;
    viewport_matrix[(2, 2)] = depth / 2.0;
    return viewport_matrix;
}

/// Model-view, projection and viewport matrices of one render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transforms {
    pub model_view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub viewport: Matrix4<f32>,
}

impl Transforms {
    /// All three matrices set to identity, so model coordinates are screen coordinates.
    pub fn identity() -> Self {
        return Self {
            model_view: Matrix4::identity(),
            projection: Matrix4::identity(),
            viewport: Matrix4::identity(),
        };
    }

    /// ViewPort * Projection * ModelView, taking model space points to the screen.
    pub fn composed(&self) -> Matrix4<f32> {
        return self.viewport * self.projection * self.model_view;
    }
}

/// Point of view of a pass: the camera for the final pass, the light for the shadow pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Vector3<f32>,
    pub center: Vector3<f32>,
    pub up: Vector3<f32>,
}

impl Camera {
    pub fn new(eye: Vector3<f32>, center: Vector3<f32>, up: Vector3<f32>) -> Self {
        return Self { eye, center, up };
    }

    /// Transforms for a frame of the given size. Without `perspective` the projection is orthographic,
    /// which is what the light pass uses.
    pub fn transforms(
        &self,
        width: u32,
        height: u32,
        perspective: bool,
    ) -> Result<Transforms, AlgebraError> {
        let coeff = if perspective {
            let distance = (self.eye - self.center).norm();
            if distance == 0.0 {
                return Err(AlgebraError::DivisionByZero);
            }
            -1.0 / distance
        } else {
            0.0
        };
        // Mapping to [0, size - 1] so that the x = 1.0 edge still lands on a pixel.
        let w = width.saturating_sub(1) as f32;
        let h = height.saturating_sub(1) as f32;
        return Ok(Transforms {
            model_view: look_at(self.eye, self.center, self.up)?,
            projection: projection(coeff),
            viewport: viewport(0.0, 0.0, w, h, DEFAULT_DEPTH),
        });
    }
}

/// Uniforms shared by every shader instance of one pass. Built once before the pass starts and
/// never mutated while it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PassContext {
    pub transforms: Transforms,
    pub transform: Matrix4<f32>,   // ViewPort * Projection * ModelView, applied to vertices.
    pub uniform_m: Matrix4<f32>,   // Projection * ModelView, applied to light direction.
    pub uniform_mit: Matrix4<f32>, // (Projection * ModelView)^-T, applied to normals.
    pub light: Vector3<f32>,       // Normalized light direction after uniform_m.
    pub width: u32,
    pub height: u32,
}

impl PassContext {
    /// `light` points from the scene towards the light source, in model space.
    pub fn new(
        transforms: &Transforms,
        light: Vector3<f32>,
        width: u32,
        height: u32,
    ) -> Result<Self, AlgebraError> {
        let uniform_m = transforms.projection * transforms.model_view;
        let uniform_mit = util::inverse(&uniform_m)?.transpose();
        let t_light = util::unit(&(uniform_m * light.augment(0.0)).project(false)?)?;
        return Ok(Self {
            transforms: *transforms,
            transform: transforms.composed(),
            uniform_m,
            uniform_mit,
            light: t_light,
            width,
            height,
        });
    }

    /// Model space point to screen space (x, y in pixels, z as depth).
    pub fn to_screen(&self, position: &Vector3<f32>) -> Result<Vector3<f32>, AlgebraError> {
        return (self.transform * position.augment(1.0)).project(true);
    }

    /// Model space normal into the frame the light direction lives in, normalized.
    pub fn transform_normal(&self, normal: &Vector3<f32>) -> Result<Vector3<f32>, AlgebraError> {
        return util::unit(&(self.uniform_mit * normal.augment(0.0)).project(false)?);
    }

    /// Model space position after Projection * ModelView, without the perspective divide.
    pub fn to_view(&self, position: &Vector3<f32>) -> Result<Vector3<f32>, AlgebraError> {
        return (self.uniform_m * position.augment(1.0)).project(false);
    }
}

//! Two stage shader contract and the shading models built on it.
//!
//! A shader instance holds pass constants (`PassContext`, the model, tunable coefficients) behind `Arc`s
//! and per-triangle varyings as plain fields. The vertex stage fills the varyings for one corner at a time,
//! the fragment stage only reads them, so a single instance never needs synchronization. Workers of a pass
//! each clone their own instance.

use std::sync::Arc;

use nalgebra::{Matrix2x3, Matrix3, Matrix4, Vector2, Vector3};

use super::buffer::DepthBuffer;
use super::model::Model;
use super::transform::PassContext;
use crate::image::{Color, Image, WHITE};
use crate::util::{self, AlgebraError, Homogeneous, Projective};

/// Input of the fragment stage: barycentric weights of the pixel and its coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    pub bar: Vector3<f32>,
    pub x: i32,
    pub y: i32,
}

pub trait Shader {
    /// Screen space position (x, y in pixels, z as depth) of the nth corner of a face.
    /// Called for corners 0, 1, 2 in order before any fragment of the face. None culls the face.
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>>;

    /// Color of a covered pixel that passed the depth test. None discards the pixel.
    fn fragment(&self, fragment: Fragment) -> Option<Color>;
}

/// Tunable lighting coefficients shared by the shading models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadingParams {
    pub base_color: Color, // Surface color for models without a texture lookup.
    pub shades: u32,       // Number of bands of the cel shader.
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub specular_bias: f32, // Added to the specular map value to get the exponent.
    pub shadow_coefficient: f32,
    pub shadow_bias: f32, // In depth units, against self shadowing.
}

impl Default for ShadingParams {
    fn default() -> Self {
        return Self {
            base_color: WHITE,
            shades: 5,
            ambient: 0.1,
            diffuse: 1.0,
            specular: 0.6,
            specular_bias: 5.0,
            shadow_coefficient: 0.3,
            shadow_bias: 5.0,
        };
    }
}

/// Boilerplate for the transformation of a face corner to screen coordinates.
fn screen_position(context: &PassContext, model: &Model, face: usize, nth: usize) -> Option<Vector3<f32>> {
    return context.to_screen(&model.face_vertex(face, nth)).ok();
}

/// Diffuse intensity for a model space normal, clamped to [0, 1].
fn diffuse_intensity(context: &PassContext, normal: &Vector3<f32>) -> Option<f32> {
    let t_normal = context.transform_normal(normal).ok()?;
    return Some(t_normal.dot(&context.light).clamp(0.0, 1.0));
}

/// Writes only depth, every fragment is discarded.
#[derive(Clone)]
pub struct DepthShader {
    context: Arc<PassContext>,
    model: Arc<Model>,
}

impl DepthShader {
    pub fn new(context: Arc<PassContext>, model: Arc<Model>) -> Self {
        return Self { context, model };
    }
}

impl Shader for DepthShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        return screen_position(&self.context, &self.model, face, nth);
    }

    fn fragment(&self, _fragment: Fragment) -> Option<Color> {
        return None;
    }
}

/// One intensity per face, from the geometric face normal.
#[derive(Clone)]
pub struct FlatShader {
    context: Arc<PassContext>,
    model: Arc<Model>,
    params: ShadingParams,
    intensity: f32,
}

impl FlatShader {
    pub fn new(context: Arc<PassContext>, model: Arc<Model>, params: ShadingParams) -> Self {
        return Self {
            context,
            model,
            params,
            intensity: 0.0,
        };
    }
}

impl Shader for FlatShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        if nth == 0 {
            let [a, b, c] = [0, 1, 2].map(|i| self.model.face_vertex(face, i));
            self.intensity = diffuse_intensity(&self.context, &(b - a).cross(&(c - a)))?;
        }
        return screen_position(&self.context, &self.model, face, nth);
    }

    fn fragment(&self, _fragment: Fragment) -> Option<Color> {
        return Some(self.params.base_color.scale(self.intensity));
    }
}

/// Intensity computed at the vertices and interpolated over the face.
#[derive(Clone)]
pub struct GouraudShader {
    context: Arc<PassContext>,
    model: Arc<Model>,
    params: ShadingParams,
    varying_intensity: Vector3<f32>,
}

impl GouraudShader {
    pub fn new(context: Arc<PassContext>, model: Arc<Model>, params: ShadingParams) -> Self {
        return Self {
            context,
            model,
            params,
            varying_intensity: Vector3::zeros(),
        };
    }

    fn intensity(&self, bar: &Vector3<f32>) -> f32 {
        return self.varying_intensity.dot(bar);
    }
}

impl Shader for GouraudShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        self.varying_intensity[nth] = diffuse_intensity(&self.context, &self.model.face_normal(face, nth))?;
        return screen_position(&self.context, &self.model, face, nth);
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        return Some(self.params.base_color.scale(self.intensity(&fragment.bar)));
    }
}

/// Gouraud intensity quantized to `ShadingParams::shades` bands.
#[derive(Clone)]
pub struct CelShader {
    gouraud: GouraudShader,
}

impl CelShader {
    pub fn new(context: Arc<PassContext>, model: Arc<Model>, params: ShadingParams) -> Self {
        return Self {
            gouraud: GouraudShader::new(context, model, params),
        };
    }
}

impl Shader for CelShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        return self.gouraud.vertex(face, nth);
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        let params = &self.gouraud.params;
        let interval = 1.0 / params.shades.max(1) as f32;
        let intensity = (self.gouraud.intensity(&fragment.bar) / interval).floor() * interval;
        return Some(params.base_color.scale(intensity));
    }
}

/// Gouraud intensity applied to the diffuse texture.
#[derive(Clone)]
pub struct TexturedShader {
    gouraud: GouraudShader,
    varying_uv: Matrix2x3<f32>,
}

impl TexturedShader {
    pub fn new(context: Arc<PassContext>, model: Arc<Model>, params: ShadingParams) -> Self {
        return Self {
            gouraud: GouraudShader::new(context, model, params),
            varying_uv: Matrix2x3::zeros(),
        };
    }
}

impl Shader for TexturedShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        self.varying_uv.set_column(nth, &self.gouraud.model.face_uv(face, nth));
        return self.gouraud.vertex(face, nth);
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        let uv = self.varying_uv * fragment.bar;
        let color = self.gouraud.model.diffuse(uv)?;
        return Some(color.scale(self.gouraud.intensity(&fragment.bar)));
    }
}

/// Per fragment normals from the object space normal map, interpolated vertex normals without one.
#[derive(Clone)]
pub struct NormalMapShader {
    context: Arc<PassContext>,
    model: Arc<Model>,
    varying_uv: Matrix2x3<f32>,
    varying_normal: Matrix3<f32>, // Model space vertex normals as columns.
}

impl NormalMapShader {
    pub fn new(context: Arc<PassContext>, model: Arc<Model>) -> Self {
        return Self {
            context,
            model,
            varying_uv: Matrix2x3::zeros(),
            varying_normal: Matrix3::zeros(),
        };
    }

    /// Model space normal at a fragment.
    fn normal(&self, uv: Vector2<f32>, bar: &Vector3<f32>) -> Option<Vector3<f32>> {
        if self.model.has_normal_map() {
            return self.model.normal_map(uv);
        }
        return Some(self.varying_normal * bar);
    }

    fn store_corner(&mut self, face: usize, nth: usize) {
        self.varying_uv.set_column(nth, &self.model.face_uv(face, nth));
        self.varying_normal.set_column(nth, &self.model.face_normal(face, nth));
    }
}

impl Shader for NormalMapShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        self.store_corner(face, nth);
        return screen_position(&self.context, &self.model, face, nth);
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        let uv = self.varying_uv * fragment.bar;
        let normal = self.normal(uv, &fragment.bar)?;
        let intensity = diffuse_intensity(&self.context, &normal)?;
        return Some(self.model.diffuse(uv)?.scale(intensity));
    }
}

/// Tangent space normal mapping. The tangent basis (Darboux frame) of every fragment is solved from the
/// edges of the face in view space and the uv deltas along them.
#[derive(Clone)]
pub struct DarbouxShader {
    context: Arc<PassContext>,
    model: Arc<Model>,
    varying_uv: Matrix2x3<f32>,
    varying_normal: Matrix3<f32>, // Transformed vertex normals as columns.
    varying_view: Matrix3<f32>,   // Vertex positions after Projection * ModelView as columns.
}

impl DarbouxShader {
    pub fn new(context: Arc<PassContext>, model: Arc<Model>) -> Self {
        return Self {
            context,
            model,
            varying_uv: Matrix2x3::zeros(),
            varying_normal: Matrix3::zeros(),
            varying_view: Matrix3::zeros(),
        };
    }

    /// Fragment normal in the transformed frame. Fails for faces without a tangent frame,
    /// e.g. with collapsed uvs or edges parallel to the normal.
    fn normal(&self, uv: Vector2<f32>, bar: &Vector3<f32>) -> Result<Option<Vector3<f32>>, AlgebraError> {
        let bn = util::unit(&(self.varying_normal * bar))?;
        let edge_1 = self.varying_view.column(1) - self.varying_view.column(0);
        let edge_2 = self.varying_view.column(2) - self.varying_view.column(0);
        let a = Matrix3::from_rows(&[edge_1.transpose(), edge_2.transpose(), bn.transpose()]);
        let ai = util::inverse(&a)?;

        let uvs = &self.varying_uv;
        let i = ai * Vector3::new(uvs[(0, 1)] - uvs[(0, 0)], uvs[(0, 2)] - uvs[(0, 0)], 0.0);
        let j = ai * Vector3::new(uvs[(1, 1)] - uvs[(1, 0)], uvs[(1, 2)] - uvs[(1, 0)], 0.0);
        let b = Matrix3::from_columns(&[util::unit(&i)?, util::unit(&j)?, bn]);

        let tangent = match self.model.tangent(uv) {
            Some(tangent) => tangent,
            None => return Ok(None),
        };
        return Ok(Some(util::unit(&(b * tangent))?));
    }
}

impl Shader for DarbouxShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        let position = self.model.face_vertex(face, nth);
        let normal = self.context.transform_normal(&self.model.face_normal(face, nth)).ok()?;
        self.varying_uv.set_column(nth, &self.model.face_uv(face, nth));
        self.varying_normal.set_column(nth, &normal);
        self.varying_view.set_column(nth, &self.context.to_view(&position).ok()?);
        return screen_position(&self.context, &self.model, face, nth);
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        let uv = self.varying_uv * fragment.bar;
        let normal = self.normal(uv, &fragment.bar).ok()??;
        let intensity = normal.dot(&self.context.light).clamp(0.0, 1.0);
        return Some(self.model.diffuse(uv)?.scale(intensity));
    }
}

/// Ambient, diffuse and specular terms plus the glow texture.
#[derive(Clone)]
pub struct PhongShader {
    normal_map: NormalMapShader,
    params: ShadingParams,
}

impl PhongShader {
    pub fn new(context: Arc<PassContext>, model: Arc<Model>, params: ShadingParams) -> Self {
        return Self {
            normal_map: NormalMapShader::new(context, model),
            params,
        };
    }

    /// Color of a fragment with the non-ambient terms scaled by `shadow`
    /// and the ambient one by `occlusion`, both in [0, 1].
    fn shade(&self, bar: &Vector3<f32>, shadow: f32, occlusion: f32) -> Option<Color> {
        let context = &self.normal_map.context;
        let model = &self.normal_map.model;
        let params = &self.params;

        let uv = self.normal_map.varying_uv * bar;
        let normal = context
            .transform_normal(&self.normal_map.normal(uv, bar)?)
            .ok()?;
        let reflected = util::unit(&util::reflect(&context.light, &normal)).ok()?;
        let exponent = params.specular_bias + model.specular(uv)?;
        let spec = reflected.z.max(0.0).powf(exponent);
        let diff = normal.dot(&context.light).max(0.0);

        let light = params.ambient * occlusion + shadow * (params.diffuse * diff + params.specular * spec);
        let diffuse = model.diffuse(uv)?.to_f32();
        let glow = model.glow(uv)?.to_f32();
        let mut channels = [0.0; 3];
        for i in 0..3 {
            channels[i] = diffuse[i] * light + glow[i];
        }
        return Some(Color::from_f32(channels));
    }
}

impl Shader for PhongShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        return self.normal_map.vertex(face, nth);
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        return self.shade(&fragment.bar, 1.0, 1.0);
    }
}

/// Phong shading attenuated by a shadow map and, if available, by an ambient occlusion image.
#[derive(Clone)]
pub struct ShadowShader {
    phong: PhongShader,
    light_depth: Arc<DepthBuffer>,
    ambient: Option<Arc<Image>>,
    screen_to_light: Matrix4<f32>, // Camera screen coords to light buffer coords.
    varying_screen: Matrix3<f32>,  // Screen positions of the corners as columns.
}

impl ShadowShader {
    /// `light_transform` is the composed transform of the pass that filled `light_depth`.
    pub fn new(
        phong: PhongShader,
        light_depth: Arc<DepthBuffer>,
        light_transform: &Matrix4<f32>,
        ambient: Option<Arc<Image>>,
    ) -> Result<Self, AlgebraError> {
        let camera_transform = &phong.normal_map.context.transform;
        let screen_to_light = light_transform * util::inverse(camera_transform)?;
        return Ok(Self {
            phong,
            light_depth,
            ambient,
            screen_to_light,
            varying_screen: Matrix3::zeros(),
        });
    }

    /// Whether a camera screen point is hidden from the light by something closer to it.
    /// Points outside of the light buffer are lit.
    pub fn in_shadow(&self, screen: &Vector3<f32>) -> bool {
        let light = match (self.screen_to_light * screen.augment(1.0)).project(true) {
            Ok(light) => light,
            Err(_) => return false,
        };
        let closest = match self.light_depth.get(light.x.floor() as i32, light.y.floor() as i32) {
            Some(depth) => depth,
            None => return false,
        };
        return closest > light.z + self.phong.params.shadow_bias;
    }

    fn occlusion(&self, x: i32, y: i32) -> f32 {
        return match self.ambient.as_ref().and_then(|image| image.get(x, y)) {
            Some(level) => level.r as f32 / 255.0,
            None => 1.0,
        };
    }
}

impl Shader for ShadowShader {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        let screen = self.phong.vertex(face, nth)?;
        self.varying_screen.set_column(nth, &screen);
        return Some(screen);
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        let screen = self.varying_screen * fragment.bar;
        let shadow = if self.in_shadow(&screen) {
            self.phong.params.shadow_coefficient
        } else {
            1.0
        };
        return self.phong.shade(&fragment.bar, shadow, self.occlusion(fragment.x, fragment.y));
    }
}

/// Any of the shading models, so that a pass and the stripe dispatcher stay monomorphic.
#[derive(Clone)]
pub enum ShaderKind {
    Depth(DepthShader),
    Flat(FlatShader),
    Gouraud(GouraudShader),
    Cel(CelShader),
    Textured(TexturedShader),
    NormalMap(NormalMapShader),
    Darboux(DarbouxShader),
    Phong(PhongShader),
    Shadow(ShadowShader),
    Stripes(StripeShader),
}

impl Shader for ShaderKind {
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        return match self {
            ShaderKind::Depth(shader) => shader.vertex(face, nth),
            ShaderKind::Flat(shader) => shader.vertex(face, nth),
            ShaderKind::Gouraud(shader) => shader.vertex(face, nth),
            ShaderKind::Cel(shader) => shader.vertex(face, nth),
            ShaderKind::Textured(shader) => shader.vertex(face, nth),
            ShaderKind::NormalMap(shader) => shader.vertex(face, nth),
            ShaderKind::Darboux(shader) => shader.vertex(face, nth),
            ShaderKind::Phong(shader) => shader.vertex(face, nth),
            ShaderKind::Shadow(shader) => shader.vertex(face, nth),
            ShaderKind::Stripes(shader) => shader.vertex(face, nth),
        };
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        return match self {
            ShaderKind::Depth(shader) => shader.fragment(fragment),
            ShaderKind::Flat(shader) => shader.fragment(fragment),
            ShaderKind::Gouraud(shader) => shader.fragment(fragment),
            ShaderKind::Cel(shader) => shader.fragment(fragment),
            ShaderKind::Textured(shader) => shader.fragment(fragment),
            ShaderKind::NormalMap(shader) => shader.fragment(fragment),
            ShaderKind::Darboux(shader) => shader.fragment(fragment),
            ShaderKind::Phong(shader) => shader.fragment(fragment),
            ShaderKind::Shadow(shader) => shader.fragment(fragment),
            ShaderKind::Stripes(shader) => shader.fragment(fragment),
        };
    }
}

/// Runs the vertex stage of every shader it holds and hands each fragment to one of them, picked by
/// diagonal stripes `interval` pixels wide.
#[derive(Clone)]
pub struct StripeShader {
    shaders: Vec<ShaderKind>,
    interval: u32,
}

impl StripeShader {
    pub fn new(shaders: Vec<ShaderKind>, interval: u32) -> Self {
        return Self {
            shaders,
            interval: interval.max(1),
        };
    }

    fn select(&self, x: i32, y: i32) -> Option<&ShaderKind> {
        if self.shaders.is_empty() {
            return None;
        }
        let stripe = (x as i64 + y as i64).div_euclid(self.interval as i64);
        return self.shaders.get(stripe.rem_euclid(self.shaders.len() as i64) as usize);
    }
}

impl Shader for StripeShader {
    /// Screen position from the first shader. A cull by any of them culls the face,
    /// since its varyings would be stale otherwise.
    fn vertex(&mut self, face: usize, nth: usize) -> Option<Vector3<f32>> {
        let mut position = None;
        let mut culled = self.shaders.is_empty();
        for shader in &mut self.shaders {
            match shader.vertex(face, nth) {
                Some(screen) => {
                    position.get_or_insert(screen);
                }
                None => culled = true,
            }
        }
        if culled {
            return None;
        }
        return position;
    }

    fn fragment(&self, fragment: Fragment) -> Option<Color> {
        return self.select(fragment.x, fragment.y)?.fragment(fragment);
    }
}

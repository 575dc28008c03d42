pub mod buffer;
pub mod model;
pub mod occlusion;
pub mod raster;
pub mod shader;
pub mod transform;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use nalgebra::{vector, Vector3};
use thiserror::Error;
use threadpool::ThreadPool;

use crate::image::Image;
use crate::util::AlgebraError;
use buffer::DepthBuffer;
use model::Model;
use occlusion::OcclusionParams;
use shader::{
    CelShader, DarbouxShader, DepthShader, FlatShader, GouraudShader, NormalMapShader, PhongShader, Shader,
    ShaderKind, ShadingParams, ShadowShader, StripeShader, TexturedShader,
};
use transform::{Camera, PassContext};

/// Shading model of the final pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingModel {
    Flat,
    Gouraud,
    Cel,
    Textured,
    NormalMap,
    Darboux,
    Phong,
    Shadow,
    Occlusion, // Outputs the ambient occlusion image itself.
    Stripes,   // Diagonal stripes of Gouraud, textured, normal mapped and Phong shading.
}

impl ShadingModel {
    pub const NAMES: [&'static str; 10] = [
        "flat",
        "gouraud",
        "cel",
        "textured",
        "normal_map",
        "darboux",
        "phong",
        "shadow",
        "occlusion",
        "stripes",
    ];

    pub fn name(&self) -> &'static str {
        return match self {
            ShadingModel::Flat => "flat",
            ShadingModel::Gouraud => "gouraud",
            ShadingModel::Cel => "cel",
            ShadingModel::Textured => "textured",
            ShadingModel::NormalMap => "normal_map",
            ShadingModel::Darboux => "darboux",
            ShadingModel::Phong => "phong",
            ShadingModel::Shadow => "shadow",
            ShadingModel::Occlusion => "occlusion",
            ShadingModel::Stripes => "stripes",
        };
    }

    /// Whether the model needs the depth-only pass and the ambient occlusion built from it.
    fn needs_ambient(&self) -> bool {
        return matches!(self, ShadingModel::Shadow | ShadingModel::Occlusion);
    }
}

impl fmt::Display for ShadingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.name());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown shading model `{0}`, expected one of: {names}", names = ShadingModel::NAMES.join(", "))]
pub struct UnknownShadingModel(pub String);

impl FromStr for ShadingModel {
    type Err = UnknownShadingModel;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        return match name {
            "flat" | "default" => Ok(ShadingModel::Flat),
            "gouraud" => Ok(ShadingModel::Gouraud),
            "cel" => Ok(ShadingModel::Cel),
            "textured" => Ok(ShadingModel::Textured),
            "normal_map" => Ok(ShadingModel::NormalMap),
            "darboux" => Ok(ShadingModel::Darboux),
            "phong" | "specular" => Ok(ShadingModel::Phong),
            "shadow" => Ok(ShadingModel::Shadow),
            "occlusion" => Ok(ShadingModel::Occlusion),
            "stripes" => Ok(ShadingModel::Stripes),
            _ => Err(UnknownShadingModel(name.to_string())),
        };
    }
}

/// Everything a frame depends on besides the geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub camera: Camera,
    pub light: Vector3<f32>, // Direction towards the light, in model space.
    pub shading: ShadingModel,
    pub params: ShadingParams,
    pub occlusion: OcclusionParams,
    pub stripe_interval: u32, // Width of the stripes of `ShadingModel::Stripes`, in pixels.
}

impl Default for RenderSettings {
    fn default() -> Self {
        return Self {
            camera: Camera::new(vector![1.0, 1.0, 3.0], vector![0.0, 0.0, 0.0], vector![0.0, 1.0, 0.0]),
            light: vector![1.0, 1.0, 1.0],
            shading: ShadingModel::Gouraud,
            params: ShadingParams::default(),
            occlusion: OcclusionParams::default(),
            stripe_interval: 40,
        };
    }
}

/// Result of a render: the shaded image and the buffers of the passes that produced it.
pub struct Frame {
    pub image: Arc<Image>,
    pub depth: Arc<DepthBuffer>,
    pub light_depth: Option<Arc<DepthBuffer>>,
    pub ambient: Option<Arc<Image>>,
}

/// Below this sine of the angle between up and the light, the light camera picks another up vector.
const PARALLEL_EPSILON: f32 = 1e-4;

/// Camera of the shadow pass, looking from `light` at the scene center. Keeps the camera's up vector
/// unless the light is parallel to it, then uses the world axis least aligned with the light.
fn light_camera(camera: &Camera, light: Vector3<f32>) -> Camera {
    let mut up = camera.up;
    if up.cross(&light).norm() <= PARALLEL_EPSILON * up.norm() * light.norm() {
        up = Vector3::ith(light.iamin(), 1.0);
    }
    return Camera::new(camera.center + light, camera.center, up);
}

/// Multi pass renderer, spreading the faces of a model over a pool of workers.
pub struct Renderer {
    pool: ThreadPool,
    width: u32,
    height: u32,
}

impl Renderer {
    pub fn new(width: u32, height: u32, n_threads: usize) -> Self {
        let pool = threadpool::Builder::new()
            .num_threads(n_threads.max(1))
            .thread_name(String::from("raster"))
            .build();
        return Self { pool, width, height };
    }

    pub fn width(&self) -> u32 {
        return self.width;
    }

    pub fn height(&self) -> u32 {
        return self.height;
    }

    /// Waits for the submitted jobs. Panicked workers lose their share of the pass, which is logged.
    fn join(&self, pass: &str, panics_before: usize) {
        self.pool.join();
        let panics = self.pool.panic_count() - panics_before;
        if panics > 0 {
            warn!("{} worker(s) panicked during the {} pass", panics, pass);
        }
    }

    /// Rasterizes every face of `model` with clones of `shader`, one per chunk of faces.
    /// Returns the number of faces that were not culled.
    pub fn draw_model<S>(&self, shader: &S, model: &Arc<Model>, depth: &Arc<DepthBuffer>, image: &Arc<Image>) -> usize
    where
        S: Shader + Clone + Send + 'static,
    {
        let n_faces = model.n_faces();
        let chunk_size = n_faces.div_ceil(self.pool.max_count()).max(1);
        let drawn = Arc::new(AtomicUsize::new(0));
        let panics_before = self.pool.panic_count();

        for start in (0..n_faces).step_by(chunk_size) {
            let end = (start + chunk_size).min(n_faces);
            let mut shader = shader.clone();
            let depth = Arc::clone(depth);
            let image = Arc::clone(image);
            let drawn = Arc::clone(&drawn);
            self.pool.execute(move || {
                let mut n_drawn = 0;
                for face in start..end {
                    if raster::draw_face(&mut shader, face, &depth, &image) {
                        n_drawn += 1;
                    }
                }
                drawn.fetch_add(n_drawn, Ordering::Relaxed);
            });
        }
        self.join("draw", panics_before);
        return drawn.load(Ordering::Relaxed);
    }

    /// Ambient occlusion of a filled depth buffer, bands of rows computed in parallel.
    pub fn ambient_occlusion(&self, depth: &Arc<DepthBuffer>, params: &OcclusionParams) -> Arc<Image> {
        let image = Arc::new(Image::new_grayscale(depth.width(), depth.height()));
        let band = depth.height().div_ceil(self.pool.max_count() as u32).max(1);
        let panics_before = self.pool.panic_count();
        for start in (0..depth.height()).step_by(band as usize) {
            let rows = start..(start + band).min(depth.height());
            let depth = Arc::clone(depth);
            let image = Arc::clone(&image);
            let params = *params;
            self.pool.execute(move || occlusion::occlude_rows(&depth, &params, &image, rows));
        }
        self.join("ambient occlusion", panics_before);
        return image;
    }

    fn depth_pass(&self, models: &[Arc<Model>], context: &Arc<PassContext>, depth: &Arc<DepthBuffer>) {
        let scratch = Arc::new(Image::new(1, 1));
        for model in models {
            let shader = DepthShader::new(Arc::clone(context), Arc::clone(model));
            let drawn = self.draw_model(&shader, model, depth, &scratch);
            debug!("Depth pass: {} of {} faces drawn", drawn, model.n_faces());
        }
    }

    /// Final pass shader of a model.
    fn final_shader(
        &self,
        settings: &RenderSettings,
        context: &Arc<PassContext>,
        model: &Arc<Model>,
        shadow: Option<(&Arc<DepthBuffer>, &PassContext)>,
        ambient: Option<&Arc<Image>>,
    ) -> Result<ShaderKind, AlgebraError> {
        let (context, model, params) = (Arc::clone(context), Arc::clone(model), settings.params);
        let shader = match settings.shading {
            ShadingModel::Flat => ShaderKind::Flat(FlatShader::new(context, model, params)),
            ShadingModel::Gouraud => ShaderKind::Gouraud(GouraudShader::new(context, model, params)),
            ShadingModel::Cel => ShaderKind::Cel(CelShader::new(context, model, params)),
            ShadingModel::Textured => ShaderKind::Textured(TexturedShader::new(context, model, params)),
            ShadingModel::NormalMap => ShaderKind::NormalMap(NormalMapShader::new(context, model)),
            ShadingModel::Darboux => ShaderKind::Darboux(DarbouxShader::new(context, model)),
            ShadingModel::Phong => ShaderKind::Phong(PhongShader::new(context, model, params)),
            ShadingModel::Shadow | ShadingModel::Occlusion => {
                let phong = PhongShader::new(context, model, params);
                match shadow {
                    Some((light_depth, light_context)) => ShaderKind::Shadow(ShadowShader::new(
                        phong,
                        Arc::clone(light_depth),
                        &light_context.transform,
                        ambient.cloned(),
                    )?),
                    None => ShaderKind::Phong(phong),
                }
            }
            ShadingModel::Stripes => ShaderKind::Stripes(StripeShader::new(
                vec![
                    ShaderKind::Gouraud(GouraudShader::new(Arc::clone(&context), Arc::clone(&model), params)),
                    ShaderKind::Textured(TexturedShader::new(Arc::clone(&context), Arc::clone(&model), params)),
                    ShaderKind::NormalMap(NormalMapShader::new(Arc::clone(&context), Arc::clone(&model))),
                    ShaderKind::Phong(PhongShader::new(context, model, params)),
                ],
                settings.stripe_interval,
            )),
        };
        return Ok(shader);
    }

    /// Renders the models in up to four passes:
    ///
    /// 1. depth only from the camera and 2. ambient occlusion of that depth, for models that use it;
    /// 3. depth only from the light (orthographic), for shadows;
    /// 4. the shaded pass from the camera.
    ///
    /// Fails if the camera or the light can't form a non-degenerate basis.
    pub fn render(&self, models: &[Arc<Model>], settings: &RenderSettings) -> Result<Frame, AlgebraError> {
        let (width, height) = (self.width, self.height);
        let transforms = settings.camera.transforms(width, height, true)?;
        let context = Arc::new(PassContext::new(&transforms, settings.light, width, height)?);
        let depth = Arc::new(DepthBuffer::new(width, height));

        let mut ambient = None;
        if settings.shading.needs_ambient() {
            self.depth_pass(models, &context, &depth);
            info!("Depth range after the depth pass: [{}, {}]", depth.min(), depth.max());
            let ambient_image = self.ambient_occlusion(&depth, &settings.occlusion);
            if settings.shading == ShadingModel::Occlusion {
                return Ok(Frame {
                    image: ambient_image,
                    depth,
                    light_depth: None,
                    ambient: None,
                });
            }
            ambient = Some(ambient_image);
            depth.clear();
        }

        let mut light = None;
        if settings.shading == ShadingModel::Shadow {
            let light_view = light_camera(&settings.camera, settings.light);
            let light_transforms = light_view.transforms(width, height, false)?;
            let light_context = Arc::new(PassContext::new(&light_transforms, settings.light, width, height)?);
            let light_depth = Arc::new(DepthBuffer::new(width, height));
            self.depth_pass(models, &light_context, &light_depth);
            info!("Light depth range: [{}, {}]", light_depth.min(), light_depth.max());
            light = Some((light_depth, light_context));
        }

        let image = Arc::new(Image::new(width, height));
        for model in models {
            let shadow = light.as_ref().map(|(buffer, light_context)| (buffer, &**light_context));
            let shader = self.final_shader(settings, &context, model, shadow, ambient.as_ref())?;
            let drawn = self.draw_model(&shader, model, &depth, &image);
            debug!("{} pass: {} of {} faces drawn", settings.shading, drawn, model.n_faces());
        }

        return Ok(Frame {
            image,
            depth,
            light_depth: light.map(|(buffer, _)| buffer),
            ambient,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shading_model_names_round_trip() {
        for name in ShadingModel::NAMES {
            let model: ShadingModel = name.parse().unwrap();
            assert_eq!(model.name(), name);
            assert_eq!(model.to_string(), name);
        }
        assert_eq!("default".parse::<ShadingModel>(), Ok(ShadingModel::Flat));
        assert_eq!("specular".parse::<ShadingModel>(), Ok(ShadingModel::Phong));

        let error = "wireframe".parse::<ShadingModel>().unwrap_err();
        assert_eq!(error, UnknownShadingModel(String::from("wireframe")));
        assert!(error.to_string().contains("normal_map"));
    }

    #[test]
    fn empty_scene_renders_black() {
        let renderer = Renderer::new(8, 6, 2);
        let frame = renderer.render(&[], &RenderSettings::default()).unwrap();
        assert_eq!(frame.image.width(), 8);
        assert_eq!(frame.image.height(), 6);
        assert_eq!(frame.depth.max(), f32::NEG_INFINITY);
        assert!(frame.light_depth.is_none());
    }

    #[test]
    fn light_camera_avoids_an_up_vector_parallel_to_the_light() {
        let camera = RenderSettings::default().camera;
        let tilted = light_camera(&camera, vector![1.0, 1.0, 1.0]);
        assert_eq!(tilted.up, camera.up);
        assert_eq!(tilted.eye, camera.center + vector![1.0, 1.0, 1.0]);

        let overhead = light_camera(&camera, vector![0.0, 2.0, 0.0]);
        assert_eq!(overhead.up, vector![1.0, 0.0, 0.0]);
        assert!(overhead.transforms(8, 8, false).is_ok());

        let below = light_camera(&camera, vector![0.0, -1.0, 0.0]);
        assert!(below.up.cross(&vector![0.0, -1.0, 0.0]).norm() > 0.5);
        assert!(below.transforms(8, 8, false).is_ok());

        // Close to parallel is still a usable basis.
        let grazing = light_camera(&camera, vector![0.0, -1.0, 0.01]);
        assert_eq!(grazing.up, camera.up);
    }

    #[test]
    fn shadow_renders_with_the_light_straight_overhead() {
        // Ground triangle in the xz plane, lit from above.
        let ground = Model::new(
            vec![vector![-1.0, 0.0, -1.0], vector![0.0, 0.0, 1.0], vector![1.0, 0.0, -1.0]],
            vec![vector![0.0, 1.0, 0.0]],
            vec![vector![0.0, 0.0], vector![0.5, 1.0], vector![1.0, 0.0]],
            vec![model::Face {
                vertices: [0, 1, 2],
                uvs: [0, 1, 2],
                normals: [0, 0, 0],
            }],
        )
        .unwrap();
        let settings = RenderSettings {
            light: vector![0.0, 1.0, 0.0],
            shading: ShadingModel::Shadow,
            ..Default::default()
        };
        assert_eq!(settings.camera.up, vector![0.0, 1.0, 0.0]);

        let frame = Renderer::new(32, 32, 2).render(&[Arc::new(ground)], &settings).unwrap();
        let light_depth = frame.light_depth.unwrap();
        assert!(light_depth.max().is_finite());
        assert!(frame.depth.max().is_finite());
        let lit = (0..32)
            .flat_map(|x| (0..32).map(move |y| (x, y)))
            .filter(|(x, y)| frame.image.get(*x, *y).map_or(false, |color| color.r > 128))
            .count();
        assert!(lit > 0);
    }

    #[test]
    fn degenerate_camera_is_an_error() {
        let renderer = Renderer::new(8, 8, 1);
        let settings = RenderSettings {
            camera: Camera::new(vector![0.0, 3.0, 0.0], vector![0.0, 0.0, 0.0], vector![0.0, 1.0, 0.0]),
            ..Default::default()
        };
        assert_eq!(renderer.render(&[], &settings).err(), Some(AlgebraError::DivisionByZero));
    }
}

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time;

use anyhow::{Context, Result};
use log::{info, warn};
use nalgebra::{vector, Vector2};

use tiny_shader::image::{Image, WHITE};
use tiny_shader::scene::model::{Material, Model};
use tiny_shader::scene::{RenderSettings, Renderer};

/// Everything one invocation needs, filled from the command line.
pub struct Params {
    pub width: u32,
    pub height: u32,
    pub n_threads: usize,
    pub model_path: PathBuf,
    pub output_path: PathBuf,
    pub depth_output_path: Option<PathBuf>,
    pub uv_dump_path: Option<PathBuf>,
    pub settings: RenderSettings,
}

/// Logs the time spent between its creation and drop.
struct BlockTimer {
    name: &'static str,
    begin: time::Instant,
}

impl BlockTimer {
    fn new(name: &'static str) -> Self {
        return Self {
            name,
            begin: time::Instant::now(),
        };
    }
}

impl Drop for BlockTimer {
    fn drop(&mut self) {
        info!("{} took {:.3} s", self.name, self.begin.elapsed().as_secs_f32());
    }
}

/// Reads a wavefront file and the textures next to it.
fn load_model(path: &Path) -> Result<Model> {
    let _timer = BlockTimer::new("Loading the model");
    let file = File::open(path).with_context(|| format!("failed to open model {}", path.display()))?;
    let raw = obj::raw::parse_obj(BufReader::new(file))
        .with_context(|| format!("failed to parse model {}", path.display()))?;
    let model = Model::from_raw_obj(raw).with_context(|| format!("invalid model {}", path.display()))?;
    info!("Number of vertices - {}", model.n_vertices());
    info!("Number of faces    - {}", model.n_faces());

    let material = Material::load(&path.with_extension(""));
    return Ok(model.with_material(material));
}

/// Writes rgb images as rgb and single channel images as grayscale, format picked by extension.
fn save_image(image: &Image, path: &Path) -> Result<()> {
    let result = if image.channels() == 1 {
        image.to_gray_image().save(path)
    } else {
        image.to_rgb_image().save(path)
    };
    result.with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    return Ok(());
}

/// Draws the uv layout of every face over the diffuse texture, or over a black canvas without one.
fn dump_uv_layout(model: &Model, path: &Path) -> Result<()> {
    let canvas = match model.diffuse_texture() {
        Some(texture) => Image::from_rgb_image(texture),
        None => {
            warn!("Model has no diffuse texture, drawing the uv layout on a blank canvas");
            Image::new(1024, 1024)
        }
    };
    let scale = vector![canvas.width().saturating_sub(1) as f32, canvas.height().saturating_sub(1) as f32];
    let to_pixel = |uv: Vector2<f32>| vector![(uv.x * scale.x) as i32, (uv.y * scale.y) as i32];
    for face in 0..model.n_faces() {
        for nth in 0..3 {
            let a = to_pixel(model.face_uv(face, nth));
            let b = to_pixel(model.face_uv(face, (nth + 1) % 3));
            canvas.draw_line(a, b, WHITE);
        }
    }
    return save_image(&canvas, path);
}

/// Loads the model, renders a single frame and writes the requested images.
pub fn run(params: Params) -> Result<()> {
    let model = Arc::new(load_model(&params.model_path)?);

    if let Some(path) = &params.uv_dump_path {
        dump_uv_layout(&model, path)?;
    }

    let renderer = Renderer::new(params.width, params.height, params.n_threads);
    info!(
        "Rendering {}x{} with the {} shading model on {} threads",
        params.width, params.height, params.settings.shading, params.n_threads
    );
    let frame = {
        let _timer = BlockTimer::new("Rendering");
        renderer
            .render(&[model], &params.settings)
            .context("failed to set up the render passes")?
    };

    save_image(&frame.image, &params.output_path)?;
    if let Some(path) = &params.depth_output_path {
        save_image(&frame.depth.to_image(), path)?;
    }

    return Ok(());
}

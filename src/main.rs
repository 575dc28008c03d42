mod app;

use std::path::PathBuf;
use std::thread;

use anyhow::Result;
use clap::Parser;
use nalgebra::{vector, Vector3};

use tiny_shader::scene::occlusion::OcclusionParams;
use tiny_shader::scene::shader::ShadingParams;
use tiny_shader::scene::transform::Camera;
use tiny_shader::scene::{RenderSettings, ShadingModel};

/// Parses a comma separated triple like `1,1,3`.
fn parse_vector(value: &str) -> Result<Vector3<f32>, String> {
    let components = value
        .split(',')
        .map(|component| component.trim().parse::<f32>())
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|error| format!("invalid number in `{}`: {}", value, error))?;
    return match components[..] {
        [x, y, z] => Ok(vector![x, y, z]),
        _ => Err(format!("expected three comma separated numbers, got `{}`", value)),
    };
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Software rasterizer rendering wavefront models to images")]
struct Args {
    /// Wavefront model, textures are looked up next to it as <name>_diffuse.tga, <name>_nm.tga, ...
    #[arg(long, short = 'p', default_value = "assets/african_head.obj")]
    model: PathBuf,

    /// Shading model: flat, gouraud, cel, textured, normal_map, darboux, phong, shadow, occlusion or stripes
    #[arg(long, short = 's', default_value = "gouraud")]
    shader: ShadingModel,

    /// Image width in pixels
    #[arg(long, short = 'W', default_value_t = 800)]
    width: u32,

    /// Image height in pixels
    #[arg(long, short = 'H', default_value_t = 800)]
    height: u32,

    #[arg(long, default_value = "1,1,3", value_parser = parse_vector)]
    eye: Vector3<f32>,

    #[arg(long, default_value = "0,0,0", value_parser = parse_vector)]
    center: Vector3<f32>,

    #[arg(long, default_value = "0,1,0", value_parser = parse_vector)]
    up: Vector3<f32>,

    /// Direction towards the light
    #[arg(long, default_value = "1,1,1", value_parser = parse_vector)]
    light: Vector3<f32>,

    #[arg(long, short = 'o', default_value = "output.png")]
    output: PathBuf,

    /// Also write the normalized depth buffer
    #[arg(long)]
    depth_output: Option<PathBuf>,

    /// Also write the diffuse texture with the uv layout of the model drawn over it
    #[arg(long)]
    uv_dump: Option<PathBuf>,

    /// Worker threads, all available cores by default
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long, default_value_t = 0.1)]
    ambient: f32,

    #[arg(long, default_value_t = 1.0)]
    diffuse: f32,

    #[arg(long, default_value_t = 0.6)]
    specular: f32,

    /// Added to the specular map value to get the specular exponent
    #[arg(long, default_value_t = 5.0)]
    specular_bias: f32,

    /// Multiplier of the diffuse and specular terms in shadow
    #[arg(long, default_value_t = 0.3)]
    shadow_coefficient: f32,

    /// Depth margin of the shadow test, in depth buffer units
    #[arg(long, default_value_t = 5.0)]
    shadow_bias: f32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let n_threads = args
        .threads
        .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
    let settings = RenderSettings {
        camera: Camera::new(args.eye, args.center, args.up),
        light: args.light,
        shading: args.shader,
        params: ShadingParams {
            ambient: args.ambient,
            diffuse: args.diffuse,
            specular: args.specular,
            specular_bias: args.specular_bias,
            shadow_coefficient: args.shadow_coefficient,
            shadow_bias: args.shadow_bias,
            ..Default::default()
        },
        occlusion: OcclusionParams::default(),
        ..Default::default()
    };

    let params = app::Params {
        width: args.width,
        height: args.height,
        n_threads,
        model_path: args.model,
        output_path: args.output,
        depth_output_path: args.depth_output,
        uv_dump_path: args.uv_dump,
        settings,
    };

    app::run(params)?;

    return Ok(());
}

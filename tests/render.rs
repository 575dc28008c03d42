use std::sync::Arc;

use nalgebra::vector;

use tiny_shader::image::{Color, Image, BLACK};
use tiny_shader::scene::model::Model;
use tiny_shader::scene::transform::Camera;
use tiny_shader::scene::{RenderSettings, Renderer, ShadingModel};

const SIZE: u32 = 64;

/// Wavefront text of axis aligned squares facing +z, given as (center x, half size, z).
fn squares(squares: &[(f32, f32, f32)]) -> String {
    let mut text = String::from("vn 0 0 1\n");
    for (i, (center, half, z)) in squares.iter().enumerate() {
        for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            text += &format!("v {} {} {}\n", center + x * half, y * half, z);
            text += &format!("vt {} {}\n", (x + 1.0) / 2.0, (y + 1.0) / 2.0);
        }
        let base = 4 * i + 1;
        text += &format!("f {0}/{0}/1 {1}/{1}/1 {2}/{2}/1\n", base, base + 1, base + 2);
        text += &format!("f {0}/{0}/1 {1}/{1}/1 {2}/{2}/1\n", base, base + 2, base + 3);
    }
    return text;
}

fn load(text: &str) -> Arc<Model> {
    let raw = obj::raw::parse_obj(text.as_bytes()).unwrap();
    return Arc::new(Model::from_raw_obj(raw).unwrap());
}

fn settings(shading: ShadingModel) -> RenderSettings {
    return RenderSettings {
        camera: Camera::new(vector![0.0, 0.0, 3.0], vector![0.0, 0.0, 0.0], vector![0.0, 1.0, 0.0]),
        light: vector![0.0, 0.0, 1.0],
        shading,
        ..Default::default()
    };
}

fn covered(image: &Image) -> usize {
    let mut count = 0;
    for x in 0..image.width() as i32 {
        for y in 0..image.height() as i32 {
            if image.get(x, y) != Some(BLACK) {
                count += 1;
            }
        }
    }
    return count;
}

#[test]
fn gouraud_lights_a_square_facing_the_light() {
    let model = load(&squares(&[(0.0, 0.5, 0.0)]));
    assert_eq!(model.n_faces(), 2);
    let frame = Renderer::new(SIZE, SIZE, 2)
        .render(&[model], &settings(ShadingModel::Gouraud))
        .unwrap();

    let center = frame.image.get(32, 32).unwrap();
    assert!(center.r >= 250, "{:?}", center);
    assert_eq!(frame.image.get(2, 2), Some(BLACK));
    assert!(frame.depth.get(32, 32).unwrap().is_finite());
    assert_eq!(frame.depth.get(2, 2), Some(f32::NEG_INFINITY));
    assert!(frame.light_depth.is_none());
    assert!(frame.ambient.is_none());
}

#[test]
fn thread_count_does_not_change_the_image() {
    let model = load(&squares(&[(0.0, 0.8, 0.0), (0.2, 0.2, 0.4)]));
    let single = Renderer::new(SIZE, SIZE, 1)
        .render(&[Arc::clone(&model)], &settings(ShadingModel::Gouraud))
        .unwrap();
    let pooled = Renderer::new(SIZE, SIZE, 4)
        .render(&[model], &settings(ShadingModel::Gouraud))
        .unwrap();
    assert_eq!(single.image.to_rgb_image(), pooled.image.to_rgb_image());
}

#[test]
fn occlusion_outputs_a_grayscale_visibility_image() {
    let model = load(&squares(&[(0.0, 0.5, 0.0)]));
    let frame = Renderer::new(SIZE, SIZE, 3)
        .render(&[model], &settings(ShadingModel::Occlusion))
        .unwrap();

    assert_eq!(frame.image.channels(), 1);
    // A flat square facing the camera sees the whole sky.
    assert_eq!(frame.image.get(32, 32), Some(Color::gray(255)));
    assert_eq!(frame.image.get(1, 1), Some(Color::gray(0)));
}

#[test]
fn floating_square_casts_a_shadow() {
    // Light from the right: the shadow of the small square falls left of it, away from its silhouette.
    let model = load(&squares(&[(0.0, 1.0, 0.0), (0.0, 0.1, 0.5)]));
    let light = vector![1.0, 0.0, 1.0];
    let renderer = Renderer::new(SIZE, SIZE, 2);

    let phong = renderer
        .render(&[Arc::clone(&model)], &RenderSettings { light, ..settings(ShadingModel::Phong) })
        .unwrap();
    let shadow = renderer
        .render(&[model], &RenderSettings { light, ..settings(ShadingModel::Shadow) })
        .unwrap();
    assert!(shadow.light_depth.is_some());
    assert!(shadow.ambient.is_some());

    for x in 0..SIZE as i32 {
        for y in 0..SIZE as i32 {
            let lit = phong.image.get(x, y).unwrap();
            let shaded = shadow.image.get(x, y).unwrap();
            assert!(shaded.r <= lit.r.saturating_add(1), "({}, {}): {:?} > {:?}", x, y, shaded, lit);
        }
    }

    // (-0.5, 0, 0) on the big square.
    let lit = phong.image.get(15, 31).unwrap();
    let shaded = shadow.image.get(15, 31).unwrap();
    assert!(lit.r > shaded.r + 100, "{:?} vs {:?}", lit, shaded);

    // (0.5, 0, 0) is in the light on both.
    let lit = phong.image.get(48, 31).unwrap();
    let shaded = shadow.image.get(48, 31).unwrap();
    assert!(lit.r < shaded.r + 20, "{:?} vs {:?}", lit, shaded);
}

#[test]
fn stripes_cover_the_same_pixels_as_a_single_shader() {
    let model = load(&squares(&[(0.0, 0.7, 0.0)]));
    let renderer = Renderer::new(SIZE, SIZE, 2);
    let gouraud = renderer
        .render(&[Arc::clone(&model)], &settings(ShadingModel::Gouraud))
        .unwrap();
    let stripes = renderer
        .render(&[model], &RenderSettings { stripe_interval: 8, ..settings(ShadingModel::Stripes) })
        .unwrap();
    assert!(covered(&gouraud.image) > 0);
    assert_eq!(covered(&stripes.image), covered(&gouraud.image));
}

#[test]
fn every_shading_model_renders() {
    let model = load(&squares(&[(0.0, 0.6, 0.0)]));
    let renderer = Renderer::new(32, 32, 2);
    for name in ShadingModel::NAMES {
        let shading: ShadingModel = name.parse().unwrap();
        let frame = renderer.render(&[Arc::clone(&model)], &settings(shading)).unwrap();
        assert!(covered(&frame.image) > 0, "{} drew nothing", name);
    }
}

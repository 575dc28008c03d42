use std::ffi::OsString;
use std::path::{Path, PathBuf};

use ::image::RgbImage;
use log::{debug, info, warn};
use nalgebra::{vector, Vector2, Vector3};
use obj::raw::object::{Polygon, RawObj};
use thiserror::Error;

use crate::image::{Color, WHITE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("face {face} references {kind} {index}, but the model only has {count}")]
    IndexOutOfRange {
        face: usize,
        kind: &'static str,
        index: usize,
        count: usize,
    },
}

/// Placeholder id of an attribute a wavefront face corner doesn't have.
const MISSING: usize = usize::MAX;

/// Indices of one triangle into the vertex, uv and normal lists of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub vertices: [usize; 3],
    pub uvs: [usize; 3],
    pub normals: [usize; 3],
}

/// Optional textures of a model. Every texture is looked up by uv with (0, 0) at the bottom left.
#[derive(Default, Clone)]
pub struct Material {
    pub diffuse: Option<RgbImage>,
    pub normal_map: Option<RgbImage>,  // Object space normals.
    pub tangent_map: Option<RgbImage>, // Tangent space normals.
    pub specular: Option<RgbImage>,
    pub glow: Option<RgbImage>,
}

impl Material {
    /// Loads the textures lying next to a mesh: `<base>_diffuse.tga`, `<base>_nm.tga`, `<base>_nm_tangent.tga`,
    /// `<base>_spec.tga` and `<base>_glow.tga`, where `base` is the mesh path without extension.
    /// Missing or unreadable files leave the texture unset.
    pub fn load(base: &Path) -> Material {
        return Material {
            diffuse: load_texture(base, "_diffuse.tga"),
            normal_map: load_texture(base, "_nm.tga"),
            tangent_map: load_texture(base, "_nm_tangent.tga"),
            specular: load_texture(base, "_spec.tga"),
            glow: load_texture(base, "_glow.tga"),
        };
    }
}

fn load_texture(base: &Path, suffix: &str) -> Option<RgbImage> {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    let path = PathBuf::from(name);
    if !path.exists() {
        debug!("No texture at {}", path.display());
        return None;
    }
    return match ::image::open(&path) {
        Ok(texture) => {
            let texture = texture.to_rgb8();
            info!("Loaded texture {} ({}x{})", path.display(), texture.width(), texture.height());
            Some(texture)
        }
        Err(error) => {
            warn!("Failed to load texture {}: {}", path.display(), error);
            None
        }
    };
}

/// Texel at uv or None, if uv is outside of [0, 1]^2.
fn sample(texture: &RgbImage, uv: Vector2<f32>) -> Option<Color> {
    if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
        return None;
    }
    let (width, height) = (texture.width(), texture.height());
    if width == 0 || height == 0 {
        return None;
    }
    // Images come top row first, uv has v going up.
    let x = ((uv.x * width as f32) as u32).min(width - 1);
    let y = (((1.0 - uv.y) * height as f32) as u32).min(height - 1);
    return Some(Color::from(*texture.get_pixel(x, y)));
}

/// Color channels in [0, 255] mapped to a vector in [-1, 1]^3.
fn color_to_direction(color: Color) -> Vector3<f32> {
    let [r, g, b] = color.to_f32();
    return vector![r / 255.0 * 2.0 - 1.0, g / 255.0 * 2.0 - 1.0, b / 255.0 * 2.0 - 1.0];
}

/// Triangulated mesh with its material.
///
/// Indices are validated on construction, so accessors can't go out of bounds for any face
/// in `0..n_faces()`.
pub struct Model {
    vertices: Vec<Vector3<f32>>,
    normals: Vec<Vector3<f32>>,
    uvs: Vec<Vector2<f32>>,
    faces: Vec<Face>,
    material: Material,
}

impl Model {
    pub fn new(
        vertices: Vec<Vector3<f32>>,
        normals: Vec<Vector3<f32>>,
        uvs: Vec<Vector2<f32>>,
        faces: Vec<Face>,
    ) -> Result<Self, ModelError> {
        for (face_index, face) in faces.iter().enumerate() {
            let lists = [
                ("vertex", &face.vertices, vertices.len()),
                ("uv", &face.uvs, uvs.len()),
                ("normal", &face.normals, normals.len()),
            ];
            for (kind, indices, count) in lists {
                if let Some(index) = indices.iter().find(|index| **index >= count) {
                    return Err(ModelError::IndexOutOfRange {
                        face: face_index,
                        kind,
                        index: *index,
                        count,
                    });
                }
            }
        }
        return Ok(Self {
            vertices,
            normals,
            uvs,
            faces,
            material: Material::default(),
        });
    }

    /// Builds a model from a parsed wavefront file. Faces that are not triangles are skipped.
    /// Corners without a normal get a smoothed vertex normal appended after the file's normals,
    /// corners without uv coordinates point to an appended (0, 0). Corners that have them keep theirs.
    pub fn from_raw_obj(raw: RawObj) -> Result<Self, ModelError> {
        let vertices: Vec<Vector3<f32>> = raw
            .positions
            .iter()
            .map(|(x, y, z, _)| vector![*x, *y, *z])
            .collect();
        let mut normals: Vec<Vector3<f32>> = raw
            .normals
            .iter()
            .map(|(x, y, z)| vector![*x, *y, *z])
            .collect();
        let mut uvs: Vec<Vector2<f32>> = raw
            .tex_coords
            .iter()
            .map(|(u, v, _)| vector![*u, *v])
            .collect();

        let mut faces = Vec::with_capacity(raw.polygons.len());
        let mut skipped = 0;
        for polygon in &raw.polygons {
            // (vertex, uv, normal) triples with absent attributes as None.
            let corners: Vec<(usize, Option<usize>, Option<usize>)> = match polygon {
                Polygon::P(ids) => ids.iter().map(|v| (*v, None, None)).collect(),
                Polygon::PT(ids) => ids.iter().map(|(v, t)| (*v, Some(*t), None)).collect(),
                Polygon::PN(ids) => ids.iter().map(|(v, n)| (*v, None, Some(*n))).collect(),
                Polygon::PTN(ids) => ids.iter().map(|(v, t, n)| (*v, Some(*t), Some(*n))).collect(),
            };
            if corners.len() != 3 {
                skipped += 1;
                continue;
            }
            let mut face = Face {
                vertices: [0; 3],
                uvs: [0; 3],
                normals: [0; 3],
            };
            for (i, (v, t, n)) in corners.into_iter().enumerate() {
                face.vertices[i] = v;
                // Absent ids stay MISSING until patched below.
                face.uvs[i] = t.unwrap_or(MISSING);
                face.normals[i] = n.unwrap_or(MISSING);
            }
            faces.push(face);
        }
        if skipped > 0 {
            warn!("Skipped {} faces that are not triangles", skipped);
        }

        if faces.iter().any(|face| face.uvs.contains(&MISSING)) {
            debug!("Model has faces without uv coordinates, using (0, 0) for them");
            let default_uv = uvs.len();
            uvs.push(vector![0.0, 0.0]);
            for face in &mut faces {
                for id in face.uvs.iter_mut().filter(|id| **id == MISSING) {
                    *id = default_uv;
                }
            }
        }
        if faces.iter().any(|face| face.normals.contains(&MISSING)) {
            debug!("Model has faces without normals, computing smooth vertex normals for them");
            let first_smooth = normals.len();
            normals.extend(smooth_normals(&vertices, &faces));
            for face in &mut faces {
                for (id, vertex) in face.normals.iter_mut().zip(face.vertices) {
                    if *id == MISSING {
                        *id = first_smooth + vertex;
                    }
                }
            }
        }

        return Model::new(vertices, normals, uvs, faces);
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        return self;
    }

    pub fn n_vertices(&self) -> usize {
        return self.vertices.len();
    }

    pub fn n_faces(&self) -> usize {
        return self.faces.len();
    }

    pub fn face_vertex_ids(&self, face: usize) -> [usize; 3] {
        return self.faces[face].vertices;
    }

    pub fn face_uv_ids(&self, face: usize) -> [usize; 3] {
        return self.faces[face].uvs;
    }

    pub fn face_normal_ids(&self, face: usize) -> [usize; 3] {
        return self.faces[face].normals;
    }

    pub fn vertex(&self, id: usize) -> Vector3<f32> {
        return self.vertices[id];
    }

    pub fn normal(&self, id: usize) -> Vector3<f32> {
        return self.normals[id];
    }

    pub fn uv(&self, id: usize) -> Vector2<f32> {
        return self.uvs[id];
    }

    /// Position of the nth corner of a face.
    pub fn face_vertex(&self, face: usize, nth: usize) -> Vector3<f32> {
        return self.vertex(self.faces[face].vertices[nth]);
    }

    /// Normal of the nth corner of a face.
    pub fn face_normal(&self, face: usize, nth: usize) -> Vector3<f32> {
        return self.normal(self.faces[face].normals[nth]);
    }

    /// Uv of the nth corner of a face.
    pub fn face_uv(&self, face: usize, nth: usize) -> Vector2<f32> {
        return self.uv(self.faces[face].uvs[nth]);
    }

    pub fn has_diffuse(&self) -> bool {
        return self.material.diffuse.is_some();
    }

    pub fn has_normal_map(&self) -> bool {
        return self.material.normal_map.is_some();
    }

    pub fn has_tangent_map(&self) -> bool {
        return self.material.tangent_map.is_some();
    }

    pub fn has_specular(&self) -> bool {
        return self.material.specular.is_some();
    }

    pub fn has_glow(&self) -> bool {
        return self.material.glow.is_some();
    }

    pub fn diffuse_texture(&self) -> Option<&RgbImage> {
        return self.material.diffuse.as_ref();
    }

    // Texture lookups below return None for uv outside of [0, 1]^2, and a neutral default when
    // the material has no such texture.

    /// Diffuse color, white without a diffuse texture.
    pub fn diffuse(&self, uv: Vector2<f32>) -> Option<Color> {
        return match &self.material.diffuse {
            Some(texture) => sample(texture, uv),
            None => Some(WHITE),
        };
    }

    /// Object space normal, (0, 0, 1) without a normal map.
    pub fn normal_map(&self, uv: Vector2<f32>) -> Option<Vector3<f32>> {
        return match &self.material.normal_map {
            Some(texture) => sample(texture, uv).map(|color| color_to_direction(color).normalize()),
            None => Some(vector![0.0, 0.0, 1.0]),
        };
    }

    /// Tangent space normal, flat (0, 0, 1) without a tangent map.
    pub fn tangent(&self, uv: Vector2<f32>) -> Option<Vector3<f32>> {
        return match &self.material.tangent_map {
            Some(texture) => sample(texture, uv).map(color_to_direction),
            None => Some(vector![0.0, 0.0, 1.0]),
        };
    }

    /// Specular power in [0, 255], 0 without a specular texture.
    pub fn specular(&self, uv: Vector2<f32>) -> Option<f32> {
        return match &self.material.specular {
            Some(texture) => sample(texture, uv).map(|color| color.r as f32),
            None => Some(0.0),
        };
    }

    /// Emitted color, black without a glow texture.
    pub fn glow(&self, uv: Vector2<f32>) -> Option<Color> {
        return match &self.material.glow {
            Some(texture) => sample(texture, uv),
            None => Some(Color::default()),
        };
    }
}

/// Per vertex average of the normals of adjacent faces.
fn smooth_normals(vertices: &[Vector3<f32>], faces: &[Face]) -> Vec<Vector3<f32>> {
    let mut normals = vec![Vector3::zeros(); vertices.len()];
    for face in faces {
        let [a, b, c] = face.vertices.map(|id| vertices.get(id).copied());
        if let (Some(a), Some(b), Some(c)) = (a, b, c) {
            let face_normal = (b - a).cross(&(c - a));
            for id in face.vertices {
                normals[id] += face_normal;
            }
        }
    }
    return normals
        .into_iter()
        .map(|n| n.try_normalize(f32::EPSILON).unwrap_or(vector![0.0, 0.0, 1.0]))
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ::image::Rgb;
    use std::io::BufReader;

    #[test]
    fn rejects_out_of_range_indices() {
        let result = Model::new(
            vec![Vector3::zeros(); 3],
            vec![Vector3::z(); 1],
            vec![Vector2::zeros(); 1],
            vec![Face {
                vertices: [0, 1, 2],
                uvs: [0, 0, 0],
                normals: [0, 0, 3],
            }],
        );
        assert_eq!(
            result.err(),
            Some(ModelError::IndexOutOfRange {
                face: 0,
                kind: "normal",
                index: 3,
                count: 1
            })
        );
    }

    #[test]
    fn converts_raw_obj_and_fills_missing_attributes() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nf 1 2 3\nf 2 4 3\nf 1 2 4 3\n";
        let raw = obj::raw::parse_obj(BufReader::new(source.as_bytes())).unwrap();
        let model = Model::from_raw_obj(raw).unwrap();

        assert_eq!(model.n_vertices(), 4);
        assert_eq!(model.n_faces(), 2);
        assert_eq!(model.face_vertex_ids(1), [1, 3, 2]);
        assert_eq!(model.face_normal_ids(1), [1, 3, 2]);
        assert_relative_eq!(model.face_normal(0, 0), vector![0.0, 0.0, 1.0]);
        assert_eq!(model.face_uv(1, 2), vector![0.0, 0.0]);
    }

    #[test]
    fn fills_missing_attributes_only_where_absent() {
        // The first face is fully specified, the second has neither uv nor normal.
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nvt 0.25 0.75\nvt 1 0\nvt 0 1\nvn 0 0 -1\n\
                      f 1/1/1 2/2/1 3/3/1\nf 2 4 3\n";
        let raw = obj::raw::parse_obj(BufReader::new(source.as_bytes())).unwrap();
        let model = Model::from_raw_obj(raw).unwrap();

        assert_eq!(model.face_uv_ids(0), [0, 1, 2]);
        assert_eq!(model.face_uv(0, 0), vector![0.25, 0.75]);
        assert_eq!(model.face_normal_ids(0), [0, 0, 0]);
        assert_eq!(model.face_normal(0, 1), vector![0.0, 0.0, -1.0]);

        assert_eq!(model.face_uv_ids(1), [3, 3, 3]);
        assert_eq!(model.face_uv(1, 0), vector![0.0, 0.0]);
        // Smooth normals follow the one read from the file, indexed by vertex.
        assert_eq!(model.face_normal_ids(1), [2, 4, 3]);
        assert_relative_eq!(model.face_normal(1, 1), vector![0.0, 0.0, 1.0]);
    }

    #[test]
    fn keeps_uv_and_normal_indices_from_obj() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0.5 0.5\nvt 1 0\nvt 0 1\nvn 0 0 -1\nf 1/1/1 2/2/1 3/3/1\n";
        let raw = obj::raw::parse_obj(BufReader::new(source.as_bytes())).unwrap();
        let model = Model::from_raw_obj(raw).unwrap();
        assert_eq!(model.face_uv_ids(0), [0, 1, 2]);
        assert_eq!(model.face_uv(0, 1), vector![1.0, 0.0]);
        assert_eq!(model.face_normal(0, 2), vector![0.0, 0.0, -1.0]);
    }

    #[test]
    fn textures_default_when_absent_and_reject_out_of_range_uv() {
        let model = Model::new(vec![], vec![], vec![], vec![]).unwrap();
        let uv = vector![0.5, 0.5];
        assert!(!model.has_diffuse());
        assert_eq!(model.diffuse(uv), Some(WHITE));
        assert_eq!(model.tangent(uv), Some(vector![0.0, 0.0, 1.0]));
        assert_eq!(model.specular(uv), Some(0.0));
        assert_eq!(model.glow(uv), Some(Color::default()));

        let mut texture = RgbImage::new(2, 2);
        texture.put_pixel(0, 0, Rgb([255, 0, 0])); // Top left.
        texture.put_pixel(0, 1, Rgb([0, 255, 0])); // Bottom left.
        let model = model.with_material(Material {
            diffuse: Some(texture),
            ..Default::default()
        });
        assert!(model.has_diffuse());
        assert_eq!(model.diffuse(vector![0.1, 0.9]), Some(Color::new(255, 0, 0)));
        assert_eq!(model.diffuse(vector![0.1, 0.1]), Some(Color::new(0, 255, 0)));
        assert_eq!(model.diffuse(vector![1.0, 1.0]), Some(Color::new(0, 0, 0)));
        assert_eq!(model.diffuse(vector![1.5, 0.5]), None);
        assert_eq!(model.diffuse(vector![0.5, -0.1]), None);
    }

    #[test]
    fn missing_textures_stay_unset() {
        let base = std::env::temp_dir().join("tiny_shader_no_such_mesh");
        let material = Material::load(&base);
        assert!(material.diffuse.is_none());
        assert!(material.normal_map.is_none());
        assert!(material.tangent_map.is_none());
        assert!(material.specular.is_none());
        assert!(material.glow.is_none());
    }

    #[test]
    fn tangent_map_decodes_to_unit_range() {
        let texture = RgbImage::from_pixel(1, 1, Rgb([255, 0, 255]));
        let model = Model::new(vec![], vec![], vec![], vec![])
            .unwrap()
            .with_material(Material {
                tangent_map: Some(texture),
                ..Default::default()
            });
        assert_relative_eq!(model.tangent(vector![0.5, 0.5]).unwrap(), vector![1.0, -1.0, 1.0]);
    }
}

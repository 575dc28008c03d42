//! Software rasterizer: linear algebra kernel, transform stack, lock-free depth buffer, barycentric
//! rasterization, programmable shaders and screen space ambient occlusion.

pub mod image;
pub mod scene;
pub mod util;

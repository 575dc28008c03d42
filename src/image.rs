use std::sync::atomic::{AtomicU32, Ordering};

use ::image::{GrayImage, Luma, Rgb, RgbImage};
use nalgebra::Vector2;

/// Struct, representing raw rgb8 pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };
pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Color {
        return Color { r, g, b };
    }

    /// Gray level, all three channels equal to `value`.
    pub const fn gray(value: u8) -> Color {
        return Color { r: value, g: value, b: value };
    }

    /// Get convex combination of two colors: t * c_1 + (1 - t) * c_2.
    /// t is unrestricted, channels are rounded and saturate at the display range.
    pub fn blend(color_1: Color, color_2: Color, t: f32) -> Color {
        fn mix(a: u8, b: u8, t: f32) -> u8 {
            return (t * a as f32 + (1.0 - t) * b as f32).round().clamp(0.0, 255.0) as u8;
        }
        return Color {
            r: mix(color_1.r, color_2.r, t),
            g: mix(color_1.g, color_2.g, t),
            b: mix(color_1.b, color_2.b, t),
        };
    }

    /// Every channel multiplied by `t`, clamped to [0, 255].
    pub fn scale(self, t: f32) -> Color {
        return Color::blend(self, BLACK, t);
    }

    /// Channels as floats in [0, 255], for shading arithmetic.
    pub fn to_f32(self) -> [f32; 3] {
        return [self.r as f32, self.g as f32, self.b as f32];
    }

    /// Inverse of `to_f32`, rounding and clamping each channel to the display range.
    pub fn from_f32(channels: [f32; 3]) -> Color {
        let channel = |value: f32| value.round().clamp(0.0, 255.0) as u8;
        return Color {
            r: channel(channels[0]),
            g: channel(channels[1]),
            b: channel(channels[2]),
        };
    }

    fn pack(self) -> u32 {
        return (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32;
    }

    fn unpack(value: u32) -> Color {
        return Color {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        };
    }
}

impl From<Rgb<u8>> for Color {
    fn from(pixel: Rgb<u8>) -> Color {
        return Color::new(pixel.0[0], pixel.0[1], pixel.0[2]);
    }
}

/// Writable raster surface, holding its width, height, channel count and a flat array of pixels.
/// (0, 0) is the bottom left coord.
///
/// Pixels are atomic cells, so triangles rasterized on different threads can write through a shared
/// reference. Two writes to the same pixel race benignly: the last one wins.
pub struct Image {
    width: u32,
    height: u32,
    channels: u8,
    pixel_data: Vec<AtomicU32>, // Packed colors, row-major from the bottom row up.
}

/// Number of cells of a width x height grid, computed in usize since the u32 product can overflow.
pub(crate) fn pixel_count(width: u32, height: u32) -> usize {
    return width as usize * height as usize;
}

impl Image {
    /// Generates new black rgb image with specified width and height.
    pub fn new(width: u32, height: u32) -> Image {
        return Image::with_channels(width, height, 3);
    }

    /// Generates new black single channel image. Colors written to it are expected to be gray.
    pub fn new_grayscale(width: u32, height: u32) -> Image {
        return Image::with_channels(width, height, 1);
    }

    fn with_channels(width: u32, height: u32, channels: u8) -> Image {
        let n_pixels = pixel_count(width, height);
        let pixel_data = (0..n_pixels).map(|_| AtomicU32::new(0)).collect();
        return Image {
            width,
            height,
            channels,
            pixel_data,
        };
    }

    /// Copy of an rgb image loaded through the `image` crate, flipped so (0, 0) is bottom left.
    pub fn from_rgb_image(source: &RgbImage) -> Image {
        let image = Image::new(source.width(), source.height());
        for (x, y, pixel) in source.enumerate_pixels() {
            let flipped_y = source.height() - 1 - y;
            image.set(x as i32, flipped_y as i32, Color::from(*pixel));
        }
        return image;
    }

    pub fn width(&self) -> u32 {
        return self.width;
    }

    pub fn height(&self) -> u32 {
        return self.height;
    }

    /// 3 for rgb images, 1 for grayscale ones.
    pub fn channels(&self) -> u8 {
        return self.channels;
    }

    /// Index of a pixel in the flat array or None, if coord is out of bounds.
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        return Some(x as usize + y as usize * self.width as usize);
    }

    /// Sets image pixel to a color at specified coordinate. Out of bounds writes are ignored.
    pub fn set(&self, x: i32, y: i32, color: Color) {
        if let Some(index) = self.index(x, y) {
            self.pixel_data[index].store(color.pack(), Ordering::Relaxed);
        }
    }

    /// Color at specified coordinate or None, if coord is out of bounds.
    pub fn get(&self, x: i32, y: i32) -> Option<Color> {
        let index = self.index(x, y)?;
        return Some(Color::unpack(self.pixel_data[index].load(Ordering::Relaxed)));
    }

    /// Sets all pixels to (0, 0, 0).
    pub fn flush(&self) {
        for pixel in &self.pixel_data {
            pixel.store(0, Ordering::Relaxed);
        }
    }

    /// Draws a line between a and b coordinates with specified color
    /// via Bresenham's algorithm as presented in https://en.wikipedia.org/wiki/Bresenham%27s_line_algorithm
    pub fn draw_line(&self, a: Vector2<i32>, b: Vector2<i32>, color: Color) {
        let mut x_0 = a.x;
        let x_1 = b.x;
        let mut y_0 = a.y;
        let y_1 = b.y;
        let dx: i32 = (x_1 - x_0).abs();
        let sx: i32 = if x_0 < x_1 { 1 } else { -1 };
        let dy: i32 = -(y_1 - y_0).abs();
        let sy: i32 = if y_0 < y_1 { 1 } else { -1 };
        let mut error: i32 = dx + dy;

        loop {
            self.set(x_0, y_0, color);
            if x_0 == x_1 && y_0 == y_1 {
                break;
            }
            let e2 = 2 * error;
            if e2 >= dy {
                if x_0 == x_1 {
                    break;
                }
                error += dy;
                x_0 += sx;
            }
            if e2 <= dx {
                if y_0 == y_1 {
                    break;
                }
                error += dx;
                y_0 += sy;
            }
        }
    }

    /// Export for the image codec, with rows flipped so the top of the picture comes first.
    pub fn to_rgb_image(&self) -> RgbImage {
        return RgbImage::from_fn(self.width, self.height, |x, y| {
            let color = self.get(x as i32, (self.height - 1 - y) as i32).unwrap_or_default();
            return Rgb([color.r, color.g, color.b]);
        });
    }

    /// Same as `to_rgb_image`, keeping only the red channel, which holds the gray level.
    pub fn to_gray_image(&self) -> GrayImage {
        return GrayImage::from_fn(self.width, self.height, |x, y| {
            let color = self.get(x as i32, (self.height - 1 - y) as i32).unwrap_or_default();
            return Luma([color.r]);
        });
    }
}

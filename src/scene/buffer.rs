use std::sync::atomic::{AtomicU32, Ordering};

use crate::image::{pixel_count, Color, Image};

const SIGN_BIT: u32 = 0x8000_0000;

/// Order preserving encoding of a float: for any non-NaN a and b, a < b iff to_key(a) < to_key(b).
/// Lets the depth test run as a single integer `fetch_max`. Both zeros share one key.
fn to_key(value: f32) -> u32 {
    let value = if value == 0.0 { 0.0 } else { value };
    let bits = value.to_bits();
    if bits & SIGN_BIT != 0 {
        return !bits;
    }
    return bits | SIGN_BIT;
}

fn from_key(key: u32) -> f32 {
    if key & SIGN_BIT != 0 {
        return f32::from_bits(key & !SIGN_BIT);
    }
    return f32::from_bits(!key);
}

/// Grid of maximum-seen depth values. Serves both as the z-buffer of the camera pass and as the
/// shadow map of the light pass.
///
/// Every cell is updated atomically, so any number of rasterizing threads may share one buffer.
/// Empty cells hold negative infinity.
pub struct DepthBuffer {
    width: u32,
    height: u32,
    data: Vec<AtomicU32>,
    // Running extremes of the written values, used to normalize the buffer for visualization.
    min: AtomicU32,
    max: AtomicU32,
}

impl DepthBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let n_cells = pixel_count(width, height);
        let data = (0..n_cells)
            .map(|_| AtomicU32::new(to_key(f32::NEG_INFINITY)))
            .collect();
        return Self {
            width,
            height,
            data,
            min: AtomicU32::new(to_key(f32::INFINITY)),
            max: AtomicU32::new(to_key(f32::NEG_INFINITY)),
        };
    }

    pub fn width(&self) -> u32 {
        return self.width;
    }

    pub fn height(&self) -> u32 {
        return self.height;
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        return Some(x as usize + y as usize * self.width as usize);
    }

    fn track_extremes(&self, key: u32) {
        self.min.fetch_min(key, Ordering::AcqRel);
        self.max.fetch_max(key, Ordering::AcqRel);
    }

    /// Depth at a cell, None if out of bounds. Negative infinity means nothing was drawn there.
    pub fn get(&self, x: i32, y: i32) -> Option<f32> {
        let index = self.index(x, y)?;
        return Some(from_key(self.data[index].load(Ordering::Acquire)));
    }

    /// Unconditionally overwrites a cell. Out of bounds and NaN values are ignored.
    pub fn set(&self, x: i32, y: i32, value: f32) {
        if value.is_nan() {
            return;
        }
        if let Some(index) = self.index(x, y) {
            let key = to_key(value);
            self.data[index].store(key, Ordering::Release);
            self.track_extremes(key);
        }
    }

    /// Writes `value` only if it is strictly greater than the stored depth, as one indivisible step.
    /// Returns whether the cell was updated; a smaller or equal value is a silent no-op.
    pub fn check_and_set(&self, x: i32, y: i32, value: f32) -> bool {
        if value.is_nan() {
            return false;
        }
        let index = match self.index(x, y) {
            Some(index) => index,
            None => return false,
        };
        let key = to_key(value);
        let previous = self.data[index].fetch_max(key, Ordering::AcqRel);
        if previous >= key {
            return false;
        }
        self.track_extremes(key);
        return true;
    }

    /// Smallest value written since creation or the last clear, +inf if nothing was written.
    pub fn min(&self) -> f32 {
        return from_key(self.min.load(Ordering::Acquire));
    }

    /// Largest value written since creation or the last clear, -inf if nothing was written.
    pub fn max(&self) -> f32 {
        return from_key(self.max.load(Ordering::Acquire));
    }

    /// Resets every cell to negative infinity.
    pub fn clear(&self) {
        for cell in &self.data {
            cell.store(to_key(f32::NEG_INFINITY), Ordering::Release);
        }
        self.min.store(to_key(f32::INFINITY), Ordering::Release);
        self.max.store(to_key(f32::NEG_INFINITY), Ordering::Release);
    }

    /// Get image, representing depth values, for diagnostics.
    /// The written range [min, max] maps linearly to [0, 255], empty cells stay black.
    pub fn to_image(&self) -> Image {
        let image = Image::new_grayscale(self.width, self.height);
        let (z_min, z_max) = (self.min(), self.max());
        if z_min > z_max {
            return image;
        }
        let scale = z_max - z_min;
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let value = match self.get(x, y) {
                    Some(value) if value.is_finite() => value,
                    _ => continue,
                };
                let level = if scale > 0.0 {
                    (value - z_min) / scale * 255.0
                } else {
                    255.0
                };
                image.set(x, y, Color::gray(level.round() as u8));
            }
        }
        return image;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn key_encoding_preserves_order() {
        let values = [
            f32::NEG_INFINITY,
            -1e30,
            -3.5,
            -0.0,
            0.0,
            1e-20,
            2.0,
            255.0,
            f32::INFINITY,
        ];
        for pair in values.windows(2) {
            assert!(to_key(pair[0]) <= to_key(pair[1]));
        }
        for value in values {
            assert_eq!(from_key(to_key(value)), value);
        }
    }

    #[test]
    fn starts_empty() {
        let buffer = DepthBuffer::new(3, 2);
        assert_eq!(buffer.get(2, 1), Some(f32::NEG_INFINITY));
        assert_eq!(buffer.get(3, 0), None);
        assert!(buffer.min() > buffer.max());
    }

    #[test]
    fn check_and_set_is_idempotent() {
        let buffer = DepthBuffer::new(4, 4);
        assert!(buffer.check_and_set(1, 2, 5.0));
        assert!(!buffer.check_and_set(1, 2, 5.0));
        assert_eq!(buffer.get(1, 2), Some(5.0));

        assert!(!buffer.check_and_set(1, 2, 4.0));
        assert_eq!(buffer.get(1, 2), Some(5.0));

        assert!(buffer.check_and_set(1, 2, 6.0));
        assert_eq!(buffer.get(1, 2), Some(6.0));

        assert!(!buffer.check_and_set(9, 9, 100.0));
        assert!(!buffer.check_and_set(0, 0, f32::NAN));

        // Signed zeros are the same depth.
        assert!(buffer.check_and_set(3, 3, -0.0));
        assert!(!buffer.check_and_set(3, 3, 0.0));
        assert_eq!(to_key(-0.0), to_key(0.0));
    }


    #[test]
    fn tracks_extremes_and_clears() {
        let buffer = DepthBuffer::new(4, 4);
        buffer.check_and_set(0, 0, -2.0);
        buffer.check_and_set(1, 0, 7.0);
        buffer.set(2, 0, 3.0);
        assert_eq!(buffer.min(), -2.0);
        assert_eq!(buffer.max(), 7.0);

        buffer.clear();
        assert_eq!(buffer.get(1, 0), Some(f32::NEG_INFINITY));
        assert!(buffer.min() > buffer.max());
    }

    #[test]
    fn concurrent_writers_keep_the_maximum() {
        let buffer = DepthBuffer::new(2, 2);
        let successes: usize = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|worker| {
                    let buffer = &buffer;
                    scope.spawn(move || {
                        let mut wins = 0;
                        for step in 0..1000 {
                            let value = ((step * 8 + worker) % 997) as f32;
                            if buffer.check_and_set(1, 1, value) {
                                wins += 1;
                            }
                        }
                        return wins;
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).sum()
        });
        assert_eq!(buffer.get(1, 1), Some(996.0));
        assert!(successes >= 1);
        assert_eq!(buffer.max(), 996.0);
    }

    #[test]
    fn image_dump_is_normalized() {
        let buffer = DepthBuffer::new(3, 1);
        buffer.set(0, 0, 10.0);
        buffer.set(1, 0, 20.0);
        let image = buffer.to_image();
        assert_eq!(image.channels(), 1);
        assert_eq!(image.get(0, 0), Some(Color::gray(0)));
        assert_eq!(image.get(1, 0), Some(Color::gray(255)));
        assert_eq!(image.get(2, 0), Some(Color::gray(0)));
    }
}

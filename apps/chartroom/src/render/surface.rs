use image::{Rgba, RgbaImage};
use std::path::Path;

use crate::viewport::Point;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Destination rectangle in canvas pixels; may extend past the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// An RGBA pixel buffer the renderer and overlays draw into.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pixels: RgbaImage,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width.max(1), height.max(1)),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        (x < self.width() && y < self.height()).then(|| *self.pixels.get_pixel(x, y))
    }

    pub fn clear(&mut self, color: Rgba<u8>) {
        for pixel in self.pixels.pixels_mut() {
            *pixel = color;
        }
    }

    /// Nearest-neighbour scaled copy of `src` inside `source` onto `dest`,
    /// blended source-over. Pixels outside the surface are skipped.
    pub fn blit_scaled(&mut self, src: &RgbaImage, source: SourceRect, dest: DestRect) {
        if source.width == 0 || source.height == 0 || !(dest.width > 0.0 && dest.height > 0.0) {
            return;
        }
        let (width, height) = self.dimensions();
        let x_start = dest.x.floor().max(0.0);
        let y_start = dest.y.floor().max(0.0);
        let x_end = (dest.x + dest.width).ceil().min(f64::from(width));
        let y_end = (dest.y + dest.height).ceil().min(f64::from(height));
        if !(x_start < x_end && y_start < y_end) {
            return;
        }
        let x_scale = f64::from(source.width) / dest.width;
        let y_scale = f64::from(source.height) / dest.height;
        for y in (y_start as u32)..(y_end as u32) {
            let v = (f64::from(y) + 0.5 - dest.y) * y_scale;
            if v < 0.0 || v >= f64::from(source.height) {
                continue;
            }
            let sy = source.y + v as u32;
            for x in (x_start as u32)..(x_end as u32) {
                let u = (f64::from(x) + 0.5 - dest.x) * x_scale;
                if u < 0.0 || u >= f64::from(source.width) {
                    continue;
                }
                let sx = source.x + u as u32;
                if sx < src.width() && sy < src.height() {
                    self.blend(x, y, *src.get_pixel(sx, sy));
                }
            }
        }
    }

    /// Replaces this surface's pixels with `other`'s.
    pub fn copy_from(&mut self, other: &Surface) {
        self.pixels.clone_from(&other.pixels);
    }

    /// Source-over composite of `other` (same size) on top of this surface.
    pub fn overlay(&mut self, other: &Surface) {
        let width = self.width().min(other.width());
        let height = self.height().min(other.height());
        for y in 0..height {
            for x in 0..width {
                self.blend(x, y, *other.pixels.get_pixel(x, y));
            }
        }
    }

    pub fn draw_line(&mut self, from: Point, to: Point, color: Rgba<u8>) {
        let steps = (to.x - from.x).abs().max((to.y - from.y).abs()).ceil();
        if !steps.is_finite() {
            return;
        }
        let steps = steps.clamp(1.0, 1e5) as u32;
        for i in 0..=steps {
            let t = f64::from(i) / f64::from(steps);
            self.plot(
                from.x + (to.x - from.x) * t,
                from.y + (to.y - from.y) * t,
                color,
            );
        }
    }

    pub fn fill_circle(&mut self, center: Point, radius: f64, color: Rgba<u8>) {
        if !(center.x.is_finite() && center.y.is_finite() && radius > 0.0) {
            return;
        }
        let r = radius.ceil() as i64;
        let (cx, cy) = (center.x.round() as i64, center.y.round() as i64);
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dx * dx + dy * dy) as f64) <= radius * radius {
                    self.plot((cx + dx) as f64, (cy + dy) as f64, color);
                }
            }
        }
    }

    pub fn save_png(&self, path: &Path) -> image::ImageResult<()> {
        self.pixels.save_with_format(path, image::ImageFormat::Png)
    }

    fn plot(&mut self, x: f64, y: f64, color: Rgba<u8>) {
        if !(x.is_finite() && y.is_finite()) || x < 0.0 || y < 0.0 {
            return;
        }
        let (x, y) = (x as u32, y as u32);
        if x < self.width() && y < self.height() {
            self.blend(x, y, color);
        }
    }

    fn blend(&mut self, x: u32, y: u32, src: Rgba<u8>) {
        let alpha = u32::from(src[3]);
        if alpha == 0 {
            return;
        }
        let dst = self.pixels.get_pixel_mut(x, y);
        if alpha == 255 {
            *dst = src;
            return;
        }
        let inv = 255 - alpha;
        let dst_alpha = u32::from(dst[3]);
        let out_alpha = alpha + dst_alpha * inv / 255;
        for channel in 0..3 {
            let premultiplied = u32::from(src[channel]) * alpha
                + u32::from(dst[channel]) * dst_alpha * inv / 255;
            dst[channel] = (premultiplied / out_alpha.max(1)).min(255) as u8;
        }
        dst[3] = out_alpha.min(255) as u8;
    }
}

//! The image-space window shown on the canvas and the gestures that move it.
//!
//! Image space is the pixel space of the full, uncropped-to-canvas map
//! image. Canvas space is device pixels with the origin at the top left.
//! The two are related by independent x and y scale factors, so a window
//! whose aspect differs from the canvas stretches the image.

use parking_lot::RwLock;
use std::sync::Arc;

pub const DEFAULT_ZOOM_FACTOR: f64 = 1.1;
pub const MIN_SPAN: f64 = 1e-3;
/// Widest span zoom-out and resize may reach, in image units.
pub const MAX_SPAN: f64 = 1e9;

/// Shared between the gesture handlers that write it and the renderer and
/// overlays that read it on every frame.
pub type SharedViewport = Arc<RwLock<Viewport>>;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Visible rectangle in image space; `x1 > x0` and `y1 > y0` always.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Window {
    pub const fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> Point {
        Point::new((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    fn is_finite(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Finite, with each span as computed from the stored edges at least
    /// `min_span` and at most `MAX_SPAN` (give or take rounding).
    fn is_valid(&self, min_span: f64) -> bool {
        let spans = min_span..=MAX_SPAN * (1.0 + 1e-9);
        self.is_finite() && spans.contains(&self.width()) && spans.contains(&self.height())
    }

    fn with_min_span(mut self, min_span: f64) -> Self {
        if !(self.width() >= min_span) {
            self.x1 = self.x0 + min_span;
        }
        if !(self.height() >= min_span) {
            self.y1 = self.y0 + min_span;
        }
        self
    }
}

/// Canvas size in device pixels, never smaller than one pixel per side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    pub fn new(width: f64, height: f64) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.max(1.0) } else { 1.0 };
        Self {
            width: clamp(width),
            height: clamp(height),
        }
    }

    pub fn pixels(&self) -> (u32, u32) {
        (self.width.round() as u32, self.height.round() as u32)
    }
}

#[derive(Debug, Clone)]
pub struct Viewport {
    window: Window,
    canvas: CanvasSize,
    min_span: f64,
    pinch_origin: Option<Window>,
}

impl Viewport {
    pub fn new(window: Window, canvas: CanvasSize) -> Self {
        let window = window.with_min_span(MIN_SPAN);
        let window = if window.is_valid(MIN_SPAN) {
            window
        } else {
            Window::new(0.0, 0.0, canvas.width.min(MAX_SPAN), canvas.height.min(MAX_SPAN))
        };
        Self {
            window,
            canvas,
            min_span: MIN_SPAN,
            pinch_origin: None,
        }
    }

    /// Shows the whole `image_width` x `image_height` image centred on the
    /// canvas with equal x and y scale.
    pub fn fit_image(image_width: f64, image_height: f64, canvas: CanvasSize) -> Self {
        let image_width = if image_width > 0.0 { image_width } else { canvas.width };
        let image_height = if image_height > 0.0 { image_height } else { canvas.height };
        let scale = (canvas.width / image_width).min(canvas.height / image_height);
        let span_x = canvas.width / scale;
        let span_y = canvas.height / scale;
        let x0 = (image_width - span_x) / 2.0;
        let y0 = (image_height - span_y) / 2.0;
        Self::new(Window::new(x0, y0, x0 + span_x, y0 + span_y), canvas)
    }

    pub fn with_min_span(mut self, min_span: f64) -> Self {
        if min_span.is_finite() && min_span > 0.0 && min_span <= MAX_SPAN {
            let window = self.window.with_min_span(min_span);
            if window.is_valid(min_span) {
                self.min_span = min_span;
                self.window = window;
            }
        }
        self
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn min_span(&self) -> f64 {
        self.min_span
    }

    /// Canvas pixels per image unit along each axis.
    pub fn scale(&self) -> (f64, f64) {
        (
            self.canvas.width / self.window.width(),
            self.canvas.height / self.window.height(),
        )
    }

    pub fn uniform_scale(&self) -> f64 {
        let (sx, sy) = self.scale();
        sx.min(sy)
    }

    pub fn image_to_canvas(&self, point: Point) -> Point {
        let (sx, sy) = self.scale();
        Point::new(
            (point.x - self.window.x0) * sx,
            (point.y - self.window.y0) * sy,
        )
    }

    pub fn canvas_to_image(&self, point: Point) -> Point {
        let (sx, sy) = self.scale();
        Point::new(
            self.window.x0 + point.x / sx,
            self.window.y0 + point.y / sy,
        )
    }

    /// Moves the content by a drag of `(dx, dy)` canvas pixels.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        if !(dx.is_finite() && dy.is_finite()) {
            return;
        }
        self.settle(shifted(self.window, dx, dy, self.uniform_scale()));
    }

    /// One wheel step around `anchor` (canvas pixels), which stays put.
    pub fn zoom(&mut self, anchor: Point, zoom_in: bool, factor: f64) {
        if !anchor.is_finite() || !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let anchor = self.canvas_to_image(anchor);
        let scale = if zoom_in { 1.0 / factor } else { factor };
        let (x0, x1) = zoom_axis(self.window.x0, self.window.x1, anchor.x, scale, self.min_span);
        let (y0, y1) = zoom_axis(self.window.y0, self.window.y1, anchor.y, scale, self.min_span);
        self.settle(Window::new(x0, y0, x1, y1));
    }

    /// Remembers the window the pinch gesture is relative to.
    pub fn begin_pinch(&mut self) {
        self.pinch_origin = Some(self.window);
    }

    /// Applies a pinch of `scale_ratio` (finger distance now / at start) and
    /// a pan of `center_delta` canvas pixels, both accumulated since
    /// [`Viewport::begin_pinch`].
    pub fn pinch(&mut self, scale_ratio: f64, center_delta: Point) {
        if !scale_ratio.is_finite() || scale_ratio <= 0.0 || !center_delta.is_finite() {
            return;
        }
        let origin = *self.pinch_origin.get_or_insert(self.window);
        let center = origin.center();
        let half_x = (origin.width() / scale_ratio).clamp(self.min_span, MAX_SPAN) / 2.0;
        let half_y = (origin.height() / scale_ratio).clamp(self.min_span, MAX_SPAN) / 2.0;
        let scaled = Window::new(
            center.x - half_x,
            center.y - half_y,
            center.x + half_x,
            center.y + half_y,
        )
        .with_min_span(self.min_span);
        let uniform = (self.canvas.width / scaled.width()).min(self.canvas.height / scaled.height());
        self.settle(shifted(scaled, center_delta.x, center_delta.y, uniform));
    }

    pub fn end_pinch(&mut self) {
        self.pinch_origin = None;
    }

    pub fn is_pinching(&self) -> bool {
        self.pinch_origin.is_some()
    }

    /// Keeps the top-left corner and the scale; the far edges follow the
    /// new canvas size.
    pub fn resize(&mut self, canvas: CanvasSize) {
        let (sx, sy) = self.scale();
        let window = Window::new(
            self.window.x0,
            self.window.y0,
            self.window.x0 + (canvas.width / sx).min(MAX_SPAN),
            self.window.y0 + (canvas.height / sy).min(MAX_SPAN),
        );
        self.canvas = canvas;
        self.settle(window.with_min_span(self.min_span));
    }

    /// Adopts `candidate` only if it keeps the window valid; gestures that
    /// would overflow or collapse it leave the previous window in place.
    fn settle(&mut self, candidate: Window) {
        if candidate.is_valid(self.min_span) {
            self.window = candidate;
        }
    }
}

fn shifted(window: Window, dx: f64, dy: f64, uniform_scale: f64) -> Window {
    let shift_x = -dx / uniform_scale;
    let shift_y = -dy / uniform_scale;
    Window::new(
        window.x0 + shift_x,
        window.y0 + shift_y,
        window.x1 + shift_x,
        window.y1 + shift_y,
    )
}

fn zoom_axis(min: f64, max: f64, anchor: f64, scale: f64, min_span: f64) -> (f64, f64) {
    let span = max - min;
    let fraction = (anchor - min) / span;
    let new_span = (span * scale).clamp(min_span, MAX_SPAN);
    let new_min = anchor - fraction * new_span;
    (new_min, new_min + new_span)
}

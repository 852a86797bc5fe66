//! Progressive tile compositing for the current viewport.
//!
//! A render pass draws the visible tiles, closest to the centre first, into
//! an offscreen [`Surface`] and presents it to a [`FrameSink`] after every
//! tile. Each pass runs under a generation number; any change to the
//! viewport or the layout starts a new generation, and a pass that finds
//! itself outdated stops without drawing or presenting again.

pub mod layout;
pub mod overlay;
pub mod surface;

use image::Rgba;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::tiles::{TileCache, TileError};
use crate::viewport::{Point, SharedViewport, Viewport};

pub use layout::{Placement, TileLayout, TileSpan};
pub use overlay::{OverlayContext, OverlayPainter, WaypointOverlay};
pub use surface::{DestRect, SourceRect, Surface, TRANSPARENT};

/// The visible canvas.
pub trait FrameSink: Send + Sync {
    fn present(&self, frame: &Surface, generation: u64);
}

/// A [`FrameSink`] that keeps the most recently presented frame.
#[derive(Default)]
pub struct CanvasBuffer {
    latest: Mutex<Option<(Surface, u64)>>,
    presents: AtomicU64,
}

impl CanvasBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Surface> {
        self.latest.lock().as_ref().map(|(frame, _)| frame.clone())
    }

    pub fn generation(&self) -> Option<u64> {
        self.latest.lock().as_ref().map(|(_, generation)| *generation)
    }

    pub fn present_count(&self) -> u64 {
        self.presents.load(Ordering::Relaxed)
    }
}

impl FrameSink for CanvasBuffer {
    fn present(&self, frame: &Surface, generation: u64) {
        let mut latest = self.latest.lock();
        match latest.as_mut() {
            Some((surface, stored)) if surface.dimensions() == frame.dimensions() => {
                surface.copy_from(frame);
                *stored = generation;
            }
            _ => *latest = Some((frame.clone(), generation)),
        }
        self.presents.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    /// A newer generation started while this pass was running.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    pub generation: u64,
    pub outcome: PassOutcome,
    pub drawn: usize,
    pub failed: Vec<(u32, u32, TileError)>,
}

impl RenderReport {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            outcome: PassOutcome::Completed,
            drawn: 0,
            failed: Vec::new(),
        }
    }

    fn superseded(mut self) -> Self {
        self.outcome = PassOutcome::Superseded;
        self
    }
}

pub struct TileRenderer {
    cache: Arc<TileCache>,
    viewport: SharedViewport,
    sink: Arc<dyn FrameSink>,
    layout: RwLock<Option<TileLayout>>,
    generation: AtomicU64,
    offscreen: Mutex<Surface>,
    overlay_canvas: Mutex<Surface>,
    painter: RwLock<Option<Arc<dyn OverlayPainter>>>,
    background: Rgba<u8>,
}

impl TileRenderer {
    /// Other holders of `viewport` may read it freely; anything that writes
    /// to it outside [`TileRenderer::update_viewport`] must call
    /// [`TileRenderer::invalidate`] afterwards.
    pub fn new(cache: Arc<TileCache>, viewport: SharedViewport, sink: Arc<dyn FrameSink>) -> Self {
        let (width, height) = viewport.read().canvas().pixels();
        Self {
            cache,
            viewport,
            sink,
            layout: RwLock::new(None),
            generation: AtomicU64::new(0),
            offscreen: Mutex::new(Surface::new(width, height)),
            overlay_canvas: Mutex::new(Surface::new(width, height)),
            painter: RwLock::new(None),
            background: TRANSPARENT,
        }
    }

    pub fn with_background(mut self, background: Rgba<u8>) -> Self {
        self.background = background;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Snapshot of the window being rendered. Gestures go through
    /// [`TileRenderer::update_viewport`] so running passes are invalidated.
    pub fn viewport(&self) -> Viewport {
        self.viewport.read().clone()
    }

    pub fn layout(&self) -> Option<TileLayout> {
        self.layout.read().clone()
    }

    /// Makes every running pass stale and returns the new generation.
    pub fn invalidate(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_layout(&self, layout: TileLayout) -> u64 {
        *self.layout.write() = Some(layout);
        self.invalidate()
    }

    /// Applies a gesture to the shared viewport and invalidates running passes.
    pub fn update_viewport<R>(&self, change: impl FnOnce(&mut Viewport) -> R) -> R {
        let result = change(&mut self.viewport.write());
        self.invalidate();
        result
    }

    pub fn set_overlay(&self, painter: Arc<dyn OverlayPainter>) {
        *self.painter.write() = Some(painter);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Runs one pass for the current viewport and layout.
    pub async fn render(&self) -> RenderReport {
        let generation = self.invalidate();
        let report = RenderReport::new(generation);

        let Some(layout) = self.layout() else {
            self.present_final(generation, true);
            return report;
        };

        let (window, canvas) = {
            let viewport = self.viewport.read();
            (viewport.window(), viewport.canvas().pixels())
        };
        {
            let mut offscreen = self.offscreen.lock();
            if !self.is_current(generation) {
                return report.superseded();
            }
            if offscreen.dimensions() != canvas {
                *offscreen = Surface::new(canvas.0, canvas.1);
            }
            offscreen.clear(self.background);
        }

        let order = match layout.visible_span(&window) {
            Some(span) => layout.prioritized(&span),
            None => Vec::new(),
        };
        debug!(
            target = "chartroom::render",
            generation,
            tiles = order.len(),
            "render pass started"
        );

        // Queue every download up front, in priority order.
        for &(col, row) in &order {
            self.cache.get_tile(&layout.address(col, row));
        }

        let mut report = report;
        for (col, row) in order {
            if !self.is_current(generation) {
                return report.superseded();
            }
            let raster = match self.cache.fetch(&layout.address(col, row)).await {
                Ok(raster) => raster,
                Err(err) => {
                    report.failed.push((col, row, err));
                    continue;
                }
            };

            let mut offscreen = self.offscreen.lock();
            if !self.is_current(generation) {
                return report.superseded();
            }
            let Some(placement) = layout.placement(col, row, raster.width(), raster.height())
            else {
                continue;
            };
            let dest = dest_rect(&self.viewport.read(), &placement);
            offscreen.blit_scaled(
                &raster,
                SourceRect {
                    x: placement.src_x,
                    y: placement.src_y,
                    width: placement.src_width,
                    height: placement.src_height,
                },
                dest,
            );
            self.sink.present(&offscreen, generation);
            report.drawn += 1;
            trace!(target = "chartroom::render", generation, col, row, "tile drawn");
        }

        if !self.present_final(generation, false) {
            return report.superseded();
        }
        report
    }

    fn present_final(&self, generation: u64, clear: bool) -> bool {
        let mut offscreen = self.offscreen.lock();
        if !self.is_current(generation) {
            return false;
        }
        if clear {
            let (width, height) = self.viewport.read().canvas().pixels();
            if offscreen.dimensions() != (width, height) {
                *offscreen = Surface::new(width, height);
            }
            offscreen.clear(self.background);
        }
        self.sink.present(&offscreen, generation);
        true
    }

    /// Runs the overlay painter against the current viewport. Independent of
    /// tile generations; works before any tile or layout exists.
    pub fn draw_overlay_transformed(&self) -> bool {
        let Some(painter) = self.painter.read().clone() else {
            return false;
        };
        let (image_width, image_height) = self
            .layout
            .read()
            .as_ref()
            .map(TileLayout::image_size)
            .unwrap_or((0.0, 0.0));
        let viewport = self.viewport.read().clone();
        let (width, height) = viewport.canvas().pixels();
        let mut canvas = self.overlay_canvas.lock();
        if canvas.dimensions() != (width, height) {
            *canvas = Surface::new(width, height);
        }
        painter.paint(&mut OverlayContext {
            canvas: &mut canvas,
            image_width,
            image_height,
            viewport: &viewport,
        });
        true
    }

    pub fn overlay_frame(&self) -> Surface {
        self.overlay_canvas.lock().clone()
    }
}

fn dest_rect(viewport: &Viewport, placement: &Placement) -> DestRect {
    let top_left = viewport.image_to_canvas(Point::new(placement.image_x, placement.image_y));
    let bottom_right = viewport.image_to_canvas(Point::new(
        placement.image_x + f64::from(placement.src_width),
        placement.image_y + f64::from(placement.src_height),
    ));
    DestRect {
        x: top_left.x,
        y: top_left.y,
        width: bottom_right.x - top_left.x,
        height: bottom_right.y - top_left.y,
    }
}

use image::Rgba;
use parking_lot::RwLock;

use super::surface::{Surface, TRANSPARENT};
use crate::protocol::Waypoint;
use crate::viewport::{Point, Viewport};

/// What an overlay painter gets on each overlay pass. The canvas is not
/// cleared for it.
pub struct OverlayContext<'a> {
    pub canvas: &'a mut Surface,
    /// Zero until a tiled image has been described.
    pub image_width: f64,
    pub image_height: f64,
    pub viewport: &'a Viewport,
}

impl OverlayContext<'_> {
    pub fn has_image(&self) -> bool {
        self.image_width > 0.0 && self.image_height > 0.0
    }

    pub fn to_canvas(&self, x: f64, y: f64) -> Point {
        self.viewport.image_to_canvas(Point::new(x, y))
    }
}

/// Draws vector geometry over the tiles, in image coordinates mapped
/// through [`Viewport::image_to_canvas`].
pub trait OverlayPainter: Send + Sync {
    fn paint(&self, ctx: &mut OverlayContext<'_>);
}

/// Route legs between consecutive waypoints plus a marker on each.
pub struct WaypointOverlay {
    waypoints: RwLock<Vec<Waypoint>>,
    leg_color: Rgba<u8>,
    marker_color: Rgba<u8>,
    marker_radius: f64,
}

impl Default for WaypointOverlay {
    fn default() -> Self {
        Self {
            waypoints: RwLock::new(Vec::new()),
            leg_color: Rgba([200, 30, 140, 255]),
            marker_color: Rgba([20, 20, 160, 255]),
            marker_radius: 4.0,
        }
    }
}

impl WaypointOverlay {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        let overlay = Self::default();
        overlay.set_waypoints(waypoints);
        overlay
    }

    pub fn set_waypoints(&self, waypoints: Vec<Waypoint>) {
        *self.waypoints.write() = waypoints;
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        self.waypoints.read().clone()
    }
}

impl OverlayPainter for WaypointOverlay {
    fn paint(&self, ctx: &mut OverlayContext<'_>) {
        ctx.canvas.clear(TRANSPARENT);
        if !ctx.has_image() {
            return;
        }
        let points: Vec<Point> = self
            .waypoints
            .read()
            .iter()
            .map(|wp| ctx.to_canvas(wp.x, wp.y))
            .collect();
        for leg in points.windows(2) {
            ctx.canvas.draw_line(leg[0], leg[1], self.leg_color);
        }
        for point in &points {
            ctx.canvas
                .fill_circle(*point, self.marker_radius, self.marker_color);
        }
    }
}

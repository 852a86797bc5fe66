use std::ops::Range;
use std::sync::Arc;

use crate::protocol::{TileCrop, TileRangeWire, TiledImageHeader};
use crate::tiles::TileAddress;
use crate::viewport::Window;

/// Where the tiles of one tiled image sit in image space.
///
/// The image origin is the top-left pixel left after cropping the first
/// tile of the range, so tile `(c, r)` starts at
/// `((c - first_col) * tile_w - crop.x0, (r - first_row) * tile_h - crop.y0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayout {
    tileset: Arc<str>,
    resolution: u32,
    tile_width: f64,
    tile_height: f64,
    range: TileRangeWire,
    crop: TileCrop,
    image_width: f64,
    image_height: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSpan {
    pub cols: Range<u32>,
    pub rows: Range<u32>,
}

impl TileSpan {
    pub fn len(&self) -> usize {
        self.cols.len() * self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The part of a tile bitmap to draw and the image-space rectangle it covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub src_x: u32,
    pub src_y: u32,
    pub src_width: u32,
    pub src_height: u32,
    pub image_x: f64,
    pub image_y: f64,
}

impl TileLayout {
    pub fn from_header(header: &TiledImageHeader) -> Self {
        Self {
            tileset: Arc::from(header.tileset.as_str()),
            resolution: header.resolution,
            tile_width: f64::from(header.tile_size.x.max(1)),
            tile_height: f64::from(header.tile_size.y.max(1)),
            range: header.effective_range(),
            crop: header.crop,
            image_width: header.image_size.x,
            image_height: header.image_size.y,
        }
    }

    pub fn tileset(&self) -> &str {
        &self.tileset
    }

    pub fn image_size(&self) -> (f64, f64) {
        (self.image_width, self.image_height)
    }

    pub fn address(&self, col: u32, row: u32) -> TileAddress {
        TileAddress {
            tileset: self.tileset.clone(),
            resolution: self.resolution,
            col,
            row,
        }
    }

    /// Tiles intersecting `window`, clamped to the image's tile range.
    pub fn visible_span(&self, window: &Window) -> Option<TileSpan> {
        let cols = axis_span(
            window.x0,
            window.x1,
            self.crop.x0,
            self.tile_width,
            self.range.x,
        );
        let rows = axis_span(
            window.y0,
            window.y1,
            self.crop.y0,
            self.tile_height,
            self.range.y,
        );
        let span = TileSpan { cols, rows };
        (!span.is_empty()).then_some(span)
    }

    /// Tiles of `span` closest to its centre first; ties keep row-major order.
    pub fn prioritized(&self, span: &TileSpan) -> Vec<(u32, u32)> {
        let center_col = f64::from(span.cols.start + span.cols.end) / 2.0;
        let center_row = f64::from(span.rows.start + span.rows.end) / 2.0;
        let mut tiles: Vec<(f64, (u32, u32))> = span
            .rows
            .clone()
            .flat_map(|row| span.cols.clone().map(move |col| (col, row)))
            .map(|(col, row)| {
                let dx = f64::from(col) + 0.5 - center_col;
                let dy = f64::from(row) + 0.5 - center_row;
                ((dx * dx + dy * dy).sqrt(), (col, row))
            })
            .collect();
        tiles.sort_by(|a, b| a.0.total_cmp(&b.0));
        tiles.into_iter().map(|(_, tile)| tile).collect()
    }

    /// Placement of the decoded bitmap of tile `(col, row)`. Sizing comes
    /// from the bitmap itself so short edge tiles are not stretched; crop
    /// insets are cut from the outer rows and columns.
    pub fn placement(
        &self,
        col: u32,
        row: u32,
        bitmap_width: u32,
        bitmap_height: u32,
    ) -> Option<Placement> {
        let (src_x, src_width) = axis_crop(
            col,
            self.range.x,
            bitmap_width,
            self.crop.x0,
            self.crop.x1,
        )?;
        let (src_y, src_height) = axis_crop(
            row,
            self.range.y,
            bitmap_height,
            self.crop.y0,
            self.crop.y1,
        )?;
        let origin_x = f64::from(col.saturating_sub(self.range.x[0])) * self.tile_width - self.crop.x0;
        let origin_y = f64::from(row.saturating_sub(self.range.y[0])) * self.tile_height - self.crop.y0;
        Some(Placement {
            src_x,
            src_y,
            src_width,
            src_height,
            image_x: origin_x + f64::from(src_x),
            image_y: origin_y + f64::from(src_y),
        })
    }
}

fn axis_span(lo: f64, hi: f64, crop_start: f64, tile: f64, range: [u32; 2]) -> Range<u32> {
    let [start, end] = range;
    if end <= start || !(lo.is_finite() && hi.is_finite()) {
        return start..start;
    }
    let count = f64::from(end - start);
    let first = ((lo + crop_start) / tile).floor().clamp(0.0, count);
    let last = ((hi + crop_start) / tile).ceil().clamp(0.0, count);
    (start + first as u32)..(start + last as u32)
}

fn axis_crop(
    index: u32,
    range: [u32; 2],
    bitmap: u32,
    crop_start: f64,
    crop_end: f64,
) -> Option<(u32, u32)> {
    let lead = if index == range[0] {
        crop_start.max(0.0).round() as u32
    } else {
        0
    };
    let trail = if index + 1 == range[1] {
        crop_end.max(0.0).round() as u32
    } else {
        0
    };
    let size = bitmap.checked_sub(lead)?.checked_sub(trail)?;
    (size > 0).then_some((lead, size))
}

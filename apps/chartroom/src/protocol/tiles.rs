use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent<T> {
    pub x: T,
    pub y: T,
}

/// Pixels trimmed from the outer tiles of the grid: `x0`/`y0` from the left
/// and top of the first column/row, `x1`/`y1` from the right and bottom of
/// the last column/row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TileCrop {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// Half-open `[start, end)` index ranges of the tiles making up the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRangeWire {
    pub x: [u32; 2],
    pub y: [u32; 2],
}

/// Metadata the server sends before the client may start fetching tiles of
/// an image (`type: "tiled-image"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiledImageHeader {
    #[serde(rename = "tilesetname")]
    pub tileset: String,
    #[serde(rename = "dpi")]
    pub resolution: u32,
    #[serde(rename = "tilesize")]
    pub tile_size: Extent<u32>,
    #[serde(rename = "tilecount")]
    pub tile_count: Extent<u32>,
    #[serde(rename = "imagesize")]
    pub image_size: Extent<f64>,
    #[serde(rename = "tilecrop", default)]
    pub crop: TileCrop,
    #[serde(rename = "tilerange")]
    pub range: Option<TileRangeWire>,
    #[serde(default)]
    pub additional_data: Map<String, Value>,
}

impl TiledImageHeader {
    pub fn effective_range(&self) -> TileRangeWire {
        self.range.unwrap_or(TileRangeWire {
            x: [0, self.tile_count.x],
            y: [0, self.tile_count.y],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
}

//! Tile addressing, download and the shared decoded-tile cache.

pub mod cache;
pub mod fetch;

use image::RgbaImage;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use cache::{CacheStats, TileCache, TileCacheConfig, TileLookup};
pub use fetch::{HttpTileFetcher, TileFetcher};

/// A decoded tile, shared between the cache and every frame that draws it.
pub type Raster = Arc<RgbaImage>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    pub tileset: Arc<str>,
    pub resolution: u32,
    pub col: u32,
    pub row: u32,
}

impl TileAddress {
    pub fn new(tileset: impl Into<Arc<str>>, resolution: u32, col: u32, row: u32) -> Self {
        Self {
            tileset: tileset.into(),
            resolution,
            col,
            row,
        }
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.tileset, self.resolution, self.col, self.row
        )
    }
}

/// Tile failures are handed to every waiter of a download, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    #[error("tile request for {address} failed: {reason}")]
    Request { address: String, reason: String },
    #[error("tile server answered {status} for {address}")]
    Status { address: String, status: u16 },
    #[error("tile {address} could not be decoded: {reason}")]
    Decode { address: String, reason: String },
    #[error("tile base url cannot carry a path: {0}")]
    BaseUrl(String),
    #[error("tile download abandoned")]
    Abandoned,
}

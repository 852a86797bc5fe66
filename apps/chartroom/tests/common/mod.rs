#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chartroom_client_core::tiles::{TileAddress, TileError, TileFetcher};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// PNG bytes for a solid tile.
pub fn png_tile(width: u32, height: u32, color: [u8; 4]) -> Bytes {
    let image = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, ImageOutputFormat::Png)
        .expect("encode png");
    Bytes::from(buffer.into_inner())
}

/// Deterministic colour per tile so frames can be checked pixel by pixel.
pub fn tile_color(col: u32, row: u32) -> [u8; 4] {
    [(col * 40 + 20) as u8, (row * 40 + 20) as u8, 90, 255]
}

/// Fetcher that records calls and holds every download until released.
pub struct ScriptedFetcher {
    calls: Mutex<Vec<TileAddress>>,
    gate: Semaphore,
    failing: Mutex<HashSet<TileAddress>>,
    garbage: Mutex<HashSet<TileAddress>>,
    tile_size: (u32, u32),
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedFetcher {
    /// Downloads block until [`ScriptedFetcher::release`] hands out permits.
    pub fn gated(tile_size: (u32, u32)) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
            failing: Mutex::new(HashSet::new()),
            garbage: Mutex::new(HashSet::new()),
            tile_size,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn open(tile_size: (u32, u32)) -> Self {
        let fetcher = Self::gated(tile_size);
        fetcher.release(Semaphore::MAX_PERMITS / 2);
        fetcher
    }

    pub fn release(&self, downloads: usize) {
        self.gate.add_permits(downloads);
    }

    pub fn fail_once(&self, address: TileAddress) {
        self.failing.lock().insert(address);
    }

    pub fn serve_garbage(&self, address: TileAddress) {
        self.garbage.lock().insert(address);
    }

    pub fn calls(&self) -> Vec<TileAddress> {
        self.calls.lock().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileFetcher for ScriptedFetcher {
    async fn fetch(&self, address: &TileAddress) -> Result<Bytes, TileError> {
        self.calls.lock().push(address.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().remove(address) {
            return Err(TileError::Status {
                address: address.to_string(),
                status: 503,
            });
        }
        if self.garbage.lock().contains(address) {
            return Ok(Bytes::from_static(b"not an image"));
        }
        let (width, height) = self.tile_size;
        Ok(png_tile(width, height, tile_color(address.col, address.row)))
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition never held");
}

//! Client core for a route-planning chart editor: a resumable connection to
//! the route server, a shared tile cache, and a progressive tile renderer
//! driven by an interactive viewport.

pub mod cli;
pub mod config;
pub mod protocol;
pub mod render;
pub mod telemetry;
pub mod tiles;
pub mod transport;
pub mod viewport;

pub use config::ClientConfig;
pub use render::{CanvasBuffer, FrameSink, RenderReport, TileLayout, TileRenderer};
pub use tiles::{TileAddress, TileCache, TileCacheConfig, TileError, TileFetcher};
pub use transport::{Transport, TransportConfig, TransportError, TransportEvent};
pub use viewport::{CanvasSize, Point, SharedViewport, Viewport, Window};

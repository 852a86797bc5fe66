use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::ProtocolError;
use crate::tiles::TileError;
use crate::transport::{StoreError, TransportError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    #[error("session store: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Tile(#[from] TileError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

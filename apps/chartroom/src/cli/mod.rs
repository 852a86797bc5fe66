pub mod app;
pub mod error;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

use crate::config::{ClientConfig, ConfigError};
use crate::telemetry::logging::{LogConfig, LogLevel};

pub use app::run;
pub use error::CliError;

#[derive(Parser, Debug)]
#[command(
    name = "chartroom",
    about = "Talk to a route-planning server and render its tiled charts",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for [`ClientConfig::from_env`].
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    #[arg(
        long,
        global = true,
        value_name = "WS_URL",
        help = "WebSocket endpoint of the route server [env: CHARTROOM_SERVER]"
    )]
    pub server: Option<Url>,

    #[arg(
        long = "tile-base",
        global = true,
        value_name = "URL",
        help = "Base URL tiles are fetched from [env: CHARTROOM_TILE_BASE]"
    )]
    pub tile_base: Option<Url>,

    #[arg(
        long = "session-file",
        global = true,
        value_name = "PATH",
        help = "Where the session token is kept [env: CHARTROOM_SESSION_FILE]"
    )]
    pub session_file: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn resolve(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = ClientConfig::from_env()?;
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(tile_base) = &self.tile_base {
            config.tile_base = tile_base.clone();
        }
        if let Some(path) = &self.session_file {
            config.session_file = Some(path.clone());
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "CHARTROOM_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "CHARTROOM_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stay connected and print server pushes and connection events
    Watch(WatchArgs),
    /// Send one message and print the reply
    Request(RequestArgs),
    /// Render the server's chart for a viewport into a PNG
    Render(RenderArgs),
    /// Inspect or forget the stored session token
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[arg(long = "for", value_name = "SECONDS", help = "Stop after this many seconds")]
    pub duration: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Message type, e.g. get-waypoints or update-wps
    #[arg(value_name = "TYPE")]
    pub kind: String,

    #[arg(long, value_name = "JSON", help = "JSON object merged into the message")]
    pub payload: Option<String>,

    #[arg(
        long,
        value_delimiter = ',',
        value_name = "TYPES",
        help = "Reply types that complete the request (default: result)"
    )]
    pub expect: Vec<String>,

    #[arg(long, value_name = "PATH", help = "Write a binary reply to this file")]
    pub save: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub timeout: u64,
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    #[arg(long, value_name = "PATH", default_value = "chart.png")]
    pub out: PathBuf,

    #[arg(long, default_value_t = 1024)]
    pub width: u32,

    #[arg(long, default_value_t = 768)]
    pub height: u32,

    #[arg(
        long,
        value_name = "PATH",
        help = "Use a saved tiled-image header instead of asking the server for the low-res map"
    )]
    pub header: Option<PathBuf>,

    #[arg(
        long = "zoom",
        value_name = "STEPS",
        default_value_t = 0,
        allow_negative_numbers = true,
        help = "Wheel steps around the canvas centre; negative zooms out"
    )]
    pub zoom: i32,

    #[arg(long, help = "Fetch waypoints and draw the route on top")]
    pub waypoints: bool,

    #[arg(long, value_name = "SECONDS", default_value_t = 60)]
    pub timeout: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// Print the stored session token
    Show,
    /// Delete the stored session token
    Clear,
}

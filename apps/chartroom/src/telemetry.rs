//! Log setup shared by the CLI and anything embedding the client core.
//!
//! Every event in the workspace is emitted under a `chartroom::<area>`
//! target such as `transport`, `session`, `tiles` or `render`, or
//! under the crate paths when no target is given. Raising the level opens
//! those up first; socket and HTTP plumbing stays capped unless asked for.

pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    pub const ENV_LOG_FILTER: &str = "CHARTROOM_LOG_FILTER";
    pub const ENV_TRACE_DEPS: &str = "CHARTROOM_TRACE_DEPS";

    const OWN_TARGETS: &[&str] = &["chartroom", "chartroom_client_core", "push_bus"];

    /// Connection and download stacks; their trace output buries ours.
    const WIRE_DEPS: &[&str] = &[
        "tokio_tungstenite",
        "tungstenite",
        "reqwest",
        "hyper",
        "h2",
        "rustls",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    /// Holds the writer guard for the life of the process; set once.
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }

        let (directives, wire_capped) = match std::env::var(ENV_LOG_FILTER) {
            Ok(custom) => (custom, false),
            Err(_) => directives_for(config.level, wire_traces_requested()),
        };

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(directives))
            .with_target(config.level >= LogLevel::Debug)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;
        let _ = GUARD.set(guard);

        if wire_capped {
            tracing::debug!(
                target = "chartroom::cli",
                "socket and http traces capped at info; set {ENV_TRACE_DEPS}=1 to lift"
            );
        }
        Ok(())
    }

    fn wire_traces_requested() -> bool {
        std::env::var(ENV_TRACE_DEPS)
            .map(|value| !value.is_empty() && value != "0")
            .unwrap_or(false)
    }

    /// Filter directives for `level`, and whether the wire crates were capped.
    fn directives_for(level: LogLevel, wire_traces: bool) -> (String, bool) {
        let filter = level.to_filter();
        let baseline = match level {
            LogLevel::Error | LogLevel::Warn | LogLevel::Info => return (filter.to_string(), false),
            LogLevel::Debug => LevelFilter::INFO,
            LogLevel::Trace => LevelFilter::DEBUG,
        };

        let mut directives = vec![baseline.to_string()];
        directives.extend(OWN_TARGETS.iter().map(|target| format!("{target}={filter}")));
        let capped = level == LogLevel::Trace && !wire_traces;
        let wire_level = if capped { LevelFilter::INFO } else { filter };
        if level == LogLevel::Trace {
            directives.extend(WIRE_DEPS.iter().map(|dep| format!("{dep}={wire_level}")));
        }
        (directives.join(","), capped)
    }

}

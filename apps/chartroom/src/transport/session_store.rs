use directories::BaseDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SESSION_DIR: &str = ".chartroom";
const SESSION_FILE: &str = "session";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to determine home directory")]
    NoHome,
    #[error("session store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store is not valid toml: {0}")]
    Decode(#[from] toml::de::Error),
    #[error("unable to encode session store: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Where the server-issued session token survives between connections and
/// process restarts.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, session_id: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> Result<PathBuf, StoreError> {
        let base = BaseDirs::new().ok_or(StoreError::NoHome)?;
        Ok(base.home_dir().join(SESSION_DIR).join(SESSION_FILE))
    }

    pub fn at_default_path() -> Result<Self, StoreError> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_record(&self) -> Result<SessionRecord, StoreError> {
        if !self.path.exists() {
            return Ok(SessionRecord::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn write_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = toml::to_string_pretty(record)?;
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<String> {
        match self.read_record() {
            Ok(record) => record.session_id.filter(|id| !id.trim().is_empty()),
            Err(err) => {
                tracing::warn!(
                    target = "chartroom::session",
                    path = %self.path.display(),
                    error = %err,
                    "ignoring unreadable session store"
                );
                None
            }
        }
    }

    fn save(&self, session_id: &str) -> Result<(), StoreError> {
        self.write_record(&SessionRecord {
            session_id: Some(session_id.to_string()),
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    value: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(session_id.into())),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<String> {
        self.value.lock().clone()
    }

    fn save(&self, session_id: &str) -> Result<(), StoreError> {
        *self.value.lock() = Some(session_id.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.value.lock() = None;
        Ok(())
    }
}

//! World configuration, loadable from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{WorldError, WorldResult};

/// Where the world database lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Storage {
    /// A database file on disk.
    File { path: PathBuf },
    /// A file inside a process-registered in-memory VFS. The image outlives
    /// the world and can be reopened by name.
    Memory { vfs: String, name: String },
    /// SQLite's private in-memory database, gone when the world closes.
    #[default]
    Transient,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// When false, every component is internal and nothing is written to
    /// the database.
    pub sandbox: bool,
    pub storage: Storage,
    /// Size of the connection's prepared statement cache.
    pub statement_cache_capacity: usize,
    /// Log every statement the world's queries execute.
    pub verbose_queries: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            sandbox: true,
            storage: Storage::default(),
            statement_cache_capacity: 64,
            verbose_queries: false,
        }
    }
}

impl WorldConfig {
    pub fn transient() -> Self {
        Self::default()
    }

    pub fn memory(vfs: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            storage: Storage::Memory {
                vfs: vfs.into(),
                name: name.into(),
            },
            ..Self::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: Storage::File { path: path.into() },
            ..Self::default()
        }
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn from_json_str(text: &str) -> WorldResult<Self> {
        let config: WorldConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> WorldResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> WorldResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate(&self) -> WorldResult<()> {
        if let Storage::Memory { vfs, name } = &self.storage {
            if vfs.is_empty() || name.is_empty() {
                return Err(WorldError::config("memory storage needs a vfs and a file name"));
            }
        }
        Ok(())
    }
}

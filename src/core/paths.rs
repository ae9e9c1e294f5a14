//! Where hopgrid keeps its per-user files.

use std::fs;
use std::path::PathBuf;

use super::error::{Result, SessionError};

const APP_DIR: &str = "hopgrid";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// `<platform data dir>/hopgrid`, created when missing.
    pub fn new() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| SessionError::resource("no per-user data directory on this platform"))?;
        let root = base.join(APP_DIR);
        fs::create_dir_all(&root).map_err(|e| {
            SessionError::resource(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    /// Rooted at an explicit directory; nothing is created.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }
}

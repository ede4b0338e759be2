//! Durable storage of the toggle policy in the config file.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_CONFIG_TOML;
use crate::error::StoreError;
use crate::mode::ToggleMode;

const TOGGLE_MODE_KEY: &str = "toggle-mode";

/// The config file, seen as the place the current policy is recorded.
#[derive(Debug, Clone)]
pub struct ConfigFileStore {
    path: PathBuf,
}

impl ConfigFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the default config if the file does not exist yet.
    ///
    /// Returns true when a file was created.
    pub fn ensure_default(&self) -> Result<bool, StoreError> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&self.path, DEFAULT_CONFIG_TOML.as_bytes())?;
        tracing::info!(path = %self.path.display(), "Wrote default config");
        Ok(true)
    }

    /// Rewrite `toggle-mode`, keeping every other key.
    ///
    /// Comments in the file do not survive the rewrite.
    pub fn save_toggle_mode(&self, mode: ToggleMode) -> Result<(), StoreError> {
        let mut table = match std::fs::read_to_string(&self.path) {
            Ok(text) => text.parse::<toml::Table>()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(e.into()),
        };

        table.insert(
            TOGGLE_MODE_KEY.to_string(),
            toml::Value::String(mode.as_str().to_string()),
        );

        let text = toml::to_string(&table)?;
        write_atomic(&self.path, text.as_bytes())?;
        tracing::debug!(path = %self.path.display(), mode = %mode, "Persisted toggle mode");
        Ok(())
    }
}

/// Replace `path` with `contents` through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp, path)
}

//! Capabilities the managed server exposes to the engine.
//!
//! The engine only ever sees a [`ServerHost`]: a live online-mode it can
//! read and write, a settings record that survives restarts, and a reload
//! trigger. [`PropertiesHost`] drives a real server through its
//! `server.properties` file and a reload command; [`InMemoryHost`] is the
//! stand-in used by tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::store::write_atomic;

/// Settings key holding the online-mode flag.
pub const ONLINE_MODE_KEY: &str = "online-mode";

pub trait ServerHost: Send + 'static {
    /// Current live online-mode of the server.
    fn online_mode(&self) -> Result<bool, HostError>;

    /// Change the live online-mode.
    fn set_online_mode(&mut self, online: bool) -> Result<(), HostError>;

    /// Write the online-mode into the server's own settings record.
    fn save_online_mode(&mut self, online: bool) -> Result<(), HostError>;

    /// Ask the server to reinitialize so the new value takes effect.
    fn reload(&mut self) -> Result<(), HostError>;
}

/// Host backed by a `server.properties` file.
///
/// The live value is what the server was started with (read once from the
/// file) plus every change made through this host since.
#[derive(Debug)]
pub struct PropertiesHost {
    path: PathBuf,
    live: bool,
    reload_command: Option<Vec<String>>,
}

impl PropertiesHost {
    pub fn open(config: &HostConfig) -> Result<Self, HostError> {
        let path = config.properties_path.clone();
        let live = match std::fs::read_to_string(&path) {
            Ok(text) => parse_online_mode(&text)?.unwrap_or(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Server properties not found, assuming online-mode=true");
                true
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), online_mode = live, "Opened server properties");

        Ok(Self {
            path,
            live,
            reload_command: config.reload_command.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ServerHost for PropertiesHost {
    fn online_mode(&self) -> Result<bool, HostError> {
        Ok(self.live)
    }

    fn set_online_mode(&mut self, online: bool) -> Result<(), HostError> {
        self.live = online;
        Ok(())
    }

    fn save_online_mode(&mut self, online: bool) -> Result<(), HostError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let updated = set_online_mode_line(&text, online);
        write_atomic(&self.path, updated.as_bytes())?;
        Ok(())
    }

    fn reload(&mut self) -> Result<(), HostError> {
        let Some((program, args)) = self
            .reload_command
            .as_deref()
            .and_then(|argv| argv.split_first())
        else {
            return Err(HostError::HookUnavailable("reload"));
        };

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| HostError::Reload(format!("{program}: {e}")))?;

        tracing::info!(command = %program, "Triggered server reload");

        // Not awaited: the reload may outlive the apply that started it.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let program = program.clone();
            handle.spawn(async move {
                match child.wait().await {
                    Ok(status) if status.success() => {
                        tracing::debug!(command = %program, "Reload command finished");
                    }
                    Ok(status) => {
                        tracing::warn!(command = %program, status = %status, "Reload command exited unsuccessfully");
                    }
                    Err(e) => {
                        tracing::warn!(command = %program, error = %e, "Failed to wait on reload command");
                    }
                }
            });
        }

        Ok(())
    }
}

/// Split a properties line into key and value, skipping blanks and comments.
fn split_property(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
        return None;
    }
    let idx = line.find(['=', ':'])?;
    Some((line[..idx].trim_end(), line[idx + 1..].trim()))
}

/// The `online-mode` value in a properties file, if present.
pub fn parse_online_mode(text: &str) -> Result<Option<bool>, HostError> {
    for line in text.lines() {
        match split_property(line) {
            Some((ONLINE_MODE_KEY, value)) => {
                return match value {
                    "true" => Ok(Some(true)),
                    "false" => Ok(Some(false)),
                    other => Err(HostError::Properties(format!(
                        "{ONLINE_MODE_KEY} has non-boolean value {other:?}"
                    ))),
                };
            }
            _ => continue,
        }
    }
    Ok(None)
}

/// Set `online-mode` in a properties file, leaving every other line alone.
pub fn set_online_mode_line(text: &str, online: bool) -> String {
    let replacement = format!("{ONLINE_MODE_KEY}={online}");
    let mut found = false;
    let mut out: Vec<String> = text
        .lines()
        .map(|line| match split_property(line) {
            Some((ONLINE_MODE_KEY, _)) => {
                found = true;
                replacement.clone()
            }
            _ => line.to_string(),
        })
        .collect();
    if !found {
        out.push(replacement);
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

/// Everything an [`InMemoryHost`] has been asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRecord {
    pub live: bool,
    pub saved: Option<bool>,
    pub live_writes: usize,
    pub saves: usize,
    pub reloads: usize,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

/// In-memory host. Clones share state, so a test can keep one handle while
/// the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHost {
    record: Arc<Mutex<HostRecord>>,
}

impl InMemoryHost {
    pub fn new(live: bool) -> Self {
        Self {
            record: Arc::new(Mutex::new(HostRecord {
                live,
                ..HostRecord::default()
            })),
        }
    }

    pub fn snapshot(&self) -> HostRecord {
        self.lock().clone()
    }

    /// Make every read fail, as if the host hook had gone away.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make every write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writable(&self) -> Result<std::sync::MutexGuard<'_, HostRecord>, HostError> {
        let record = self.lock();
        if record.fail_writes {
            return Err(HostError::HookUnavailable("set online-mode"));
        }
        Ok(record)
    }
}

impl ServerHost for InMemoryHost {
    fn online_mode(&self) -> Result<bool, HostError> {
        let record = self.lock();
        if record.fail_reads {
            return Err(HostError::HookUnavailable("get online-mode"));
        }
        Ok(record.live)
    }

    fn set_online_mode(&mut self, online: bool) -> Result<(), HostError> {
        let mut record = self.writable()?;
        record.live = online;
        record.live_writes += 1;
        Ok(())
    }

    fn save_online_mode(&mut self, online: bool) -> Result<(), HostError> {
        let mut record = self.writable()?;
        record.saved = Some(online);
        record.saves += 1;
        Ok(())
    }

    fn reload(&mut self) -> Result<(), HostError> {
        let mut record = self.writable()?;
        record.reloads += 1;
        Ok(())
    }
}

//! The single read-modify-write path to the server's online-mode.

use std::fmt;

use crate::error::{ApplyError, HostError};
use crate::host::ServerHost;
use crate::mode::ToggleMode;
use crate::store::ConfigFileStore;

/// What a successful apply did to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The host already matched the target; nothing was written.
    Unchanged { online: bool },
    Changed { from: bool, to: bool },
}

impl Transition {
    pub fn online(self) -> bool {
        match self {
            Transition::Unchanged { online } => online,
            Transition::Changed { to, .. } => to,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Unchanged { online } => {
                write!(f, "Server mode already {}", describe(*online))
            }
            Transition::Changed { to, .. } => {
                write!(f, "Server mode successfully updated to: {}", describe(*to))
            }
        }
    }
}

pub(crate) fn describe(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}

/// Owns the host handle and the policy store.
///
/// Callers must serialize access; the engine keeps this behind its mutex.
/// The host hooks and the store are synchronous and run on the calling task.
/// Each touches one small local file, and the engine only holds its lock
/// for this step, never across a probe.
pub struct StateAccessor<H> {
    host: H,
    store: ConfigFileStore,
    policy: ToggleMode,
}

impl<H: ServerHost> StateAccessor<H> {
    pub fn new(host: H, store: ConfigFileStore, policy: ToggleMode) -> Self {
        Self {
            host,
            store,
            policy,
        }
    }

    /// The last policy handed to [`StateAccessor::apply_and_persist`], or
    /// the one loaded at startup.
    pub fn policy(&self) -> ToggleMode {
        self.policy
    }

    pub fn live_state(&self) -> Result<bool, HostError> {
        self.host.online_mode()
    }

    /// Record `policy` and bring the host's online-mode to `target`.
    ///
    /// The policy is persisted first and unconditionally. The host is only
    /// written, saved and reloaded when its live value differs from
    /// `target`. Errors come back as data; a failed persist is reported
    /// after the host has still been brought up to date.
    pub fn apply_and_persist(
        &mut self,
        target: bool,
        policy: ToggleMode,
    ) -> Result<Transition, ApplyError> {
        self.policy = policy;
        let persisted = self.store.save_toggle_mode(policy);
        if let Err(ref e) = persisted {
            tracing::warn!(error = %e, path = %self.store.path().display(), "Failed to persist toggle mode");
        }

        let current = self.host.online_mode()?;
        let transition = if current == target {
            Transition::Unchanged { online: current }
        } else {
            self.host.set_online_mode(target)?;
            self.host.save_online_mode(target)?;
            self.host.reload()?;
            tracing::info!(
                from = describe(current),
                to = describe(target),
                policy = %policy,
                "Server mode successfully updated"
            );
            Transition::Changed {
                from: current,
                to: target,
            }
        };

        persisted?;
        Ok(transition)
    }
}

//! Toggle policy and resolution to a concrete online-mode.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::probe::{Reachability, StatusProbe};

/// The policy chosen for the server's online-mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ToggleMode {
    On,
    Off,
    Dynamic,
}

impl ToggleMode {
    /// true -> ON, false -> OFF.
    pub fn for_state(online: bool) -> Self {
        if online {
            ToggleMode::On
        } else {
            ToggleMode::Off
        }
    }

    /// The online-mode this policy currently stands for, without probing.
    ///
    /// DYNAMIC has no fixed value, so it reports whatever the host is running
    /// with right now.
    pub fn current_state(self, live: bool) -> bool {
        match self {
            ToggleMode::On => true,
            ToggleMode::Off => false,
            ToggleMode::Dynamic => live,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToggleMode::On => "ON",
            ToggleMode::Off => "OFF",
            ToggleMode::Dynamic => "DYNAMIC",
        }
    }
}

impl fmt::Display for ToggleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the target online-mode for `mode`.
///
/// Only DYNAMIC touches the network.
pub async fn resolve<P: StatusProbe>(mode: ToggleMode, probe: &P) -> bool {
    match mode {
        ToggleMode::On => true,
        ToggleMode::Off => false,
        ToggleMode::Dynamic => probe.probe().await == Reachability::Reachable,
    }
}

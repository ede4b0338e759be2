use thiserror::Error;

/// Failure of one of the host's live-state or settings hooks.
#[derive(Debug, Error)]
pub enum HostError {
    /// The host does not expose the hook needed for this operation.
    #[error("host hook unavailable: {0}")]
    HookUnavailable(&'static str),

    #[error("host I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file exists but cannot be understood.
    #[error("invalid server properties: {0}")]
    Properties(String),

    #[error("reload failed: {0}")]
    Reload(String),
}

/// Failure to persist the toggle policy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Why an apply-and-persist did not leave the host in the requested state.
///
/// The two writes are not transactional: a `Persist` failure may come with
/// a successfully changed host, and a `Host` failure with a freshly
/// persisted policy.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("failed to persist toggle mode: {0}")]
    Persist(#[from] StoreError),

    /// A newer policy change landed while this one was being resolved.
    #[error("superseded by a newer toggle")]
    Superseded,
}

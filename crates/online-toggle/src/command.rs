//! Toggle and query commands on behalf of a named sender.

use std::collections::{HashMap, HashSet};

use tracing::Instrument;

use crate::accessor::describe;
use crate::config::OperatorConfig;
use crate::engine::ToggleEngine;
use crate::host::ServerHost;
use crate::mode::ToggleMode;
use crate::probe::StatusProbe;

pub const TOGGLE_PERMISSION: &str = "togglemode.toggle";
pub const CHECK_PERMISSION: &str = "togglemode.check";

const NO_PERMISSION: &str = "You don't have permission to do that.";
const INVALID_TOKEN: &str = "Please only enter a toggle-state (true/on/yes/false/off/no/dynamic).";
const DISABLED: &str = "Online-mode toggling is disabled in the configuration.";

/// Decides whether a sender holds a permission.
pub trait Authorizer: Send + Sync + 'static {
    fn has_permission(&self, sender: &str, permission: &str) -> bool;
}

/// Permissions granted per sender name, built from `[[operators]]`.
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    grants: HashMap<String, HashSet<String>>,
    tokens: HashMap<String, String>,
}

impl PermissionTable {
    pub fn from_operators(operators: &[OperatorConfig]) -> Self {
        let mut table = Self::default();
        for op in operators {
            table
                .grants
                .entry(op.name.clone())
                .or_default()
                .extend(op.permissions.iter().cloned());
            table.tokens.insert(op.token.clone(), op.name.clone());
        }
        table
    }

    /// Sender name for a bearer token.
    pub fn sender_for_token(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }
}

impl Authorizer for PermissionTable {
    fn has_permission(&self, sender: &str, permission: &str) -> bool {
        self.grants
            .get(sender)
            .is_some_and(|perms| perms.contains(permission))
    }
}

/// Map a free-text toggle argument to a policy. Case-insensitive.
pub fn parse_toggle_token(token: &str) -> Option<ToggleMode> {
    match token.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" => Some(ToggleMode::On),
        "false" | "no" | "off" => Some(ToggleMode::Off),
        "dynamic" => Some(ToggleMode::Dynamic),
        _ => None,
    }
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Denied,
    /// The request never reached the engine (bad argument).
    Rejected,
    Disabled,
    /// The engine ran but the host could not be brought in line.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub status: CommandStatus,
    pub message: String,
}

impl CommandResponse {
    fn new(status: CommandStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == CommandStatus::Ok
    }
}

/// Entry point for external callers.
pub struct CommandSurface<H, P, A> {
    engine: ToggleEngine<H, P>,
    authorizer: A,
}

impl<H: ServerHost, P: StatusProbe, A: Authorizer> CommandSurface<H, P, A> {
    pub fn new(engine: ToggleEngine<H, P>, authorizer: A) -> Self {
        Self { engine, authorizer }
    }

    pub fn engine(&self) -> &ToggleEngine<H, P> {
        &self.engine
    }

    pub fn authorizer(&self) -> &A {
        &self.authorizer
    }

    /// Toggle to the mode named by `token`, or to the opposite of the
    /// current state when no token is given.
    pub async fn request_toggle(&self, sender: &str, token: Option<&str>) -> CommandResponse {
        let span = toggle_tracing::command_span!("modetoggle", sender);
        let response = self.toggle_inner(sender, token).instrument(span.clone()).await;
        span.record("success", response.success());
        response
    }

    /// Report the host's live online-mode.
    pub async fn query_mode(&self, sender: &str) -> CommandResponse {
        let span = toggle_tracing::command_span!("mode", sender);
        let response = self.query_inner(sender).instrument(span.clone()).await;
        span.record("success", response.success());
        response
    }

    async fn toggle_inner(&self, sender: &str, token: Option<&str>) -> CommandResponse {
        if !self.authorizer.has_permission(sender, TOGGLE_PERMISSION) {
            tracing::warn!("Toggle denied");
            return CommandResponse::new(CommandStatus::Denied, NO_PERMISSION);
        }
        if !self.engine.enabled() {
            return CommandResponse::new(CommandStatus::Disabled, DISABLED);
        }

        let report = match token {
            Some(token) => match parse_toggle_token(token) {
                Some(mode) => {
                    tracing::info!(mode = %mode, "Toggle requested");
                    self.engine.toggle(mode).await
                }
                None => {
                    tracing::debug!(token, "Rejected toggle argument");
                    return CommandResponse::new(CommandStatus::Rejected, INVALID_TOKEN);
                }
            },
            None => {
                tracing::info!("Toggle to the opposite state requested");
                match self.engine.flip().await {
                    Ok(report) => report,
                    Err(e) => {
                        return CommandResponse::new(
                            CommandStatus::Failed,
                            format!("Could not read the current online-mode: {e}"),
                        );
                    }
                }
            }
        };

        match report.outcome {
            Ok(transition) => CommandResponse::new(
                CommandStatus::Ok,
                format!("{transition} (mode: {})", report.policy),
            ),
            Err(e) => CommandResponse::new(
                CommandStatus::Failed,
                format!(
                    "Failed to set online-mode to {} (mode: {}): {e}",
                    describe(report.target),
                    report.policy
                ),
            ),
        }
    }

    async fn query_inner(&self, sender: &str) -> CommandResponse {
        if !self.authorizer.has_permission(sender, CHECK_PERMISSION) {
            tracing::warn!("Mode query denied");
            return CommandResponse::new(CommandStatus::Denied, NO_PERMISSION);
        }

        match self.engine.live_state().await {
            Ok(online) => CommandResponse::new(CommandStatus::Ok, format!("Online-mode: {online}")),
            Err(e) => CommandResponse::new(
                CommandStatus::Failed,
                format!("Could not read the current online-mode: {e}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::PersistedConfig;
    use crate::host::InMemoryHost;
    use crate::probe::{FixedProbe, Reachability};
    use crate::store::ConfigFileStore;

    fn operators() -> Vec<OperatorConfig> {
        vec![
            OperatorConfig {
                name: "admin".to_string(),
                token: "admin-token".to_string(),
                permissions: vec![TOGGLE_PERMISSION.to_string(), CHECK_PERMISSION.to_string()],
            },
            OperatorConfig {
                name: "viewer".to_string(),
                token: "viewer-token".to_string(),
                permissions: vec![CHECK_PERMISSION.to_string()],
            },
        ]
    }

    fn surface(
        enabled: bool,
        mode: ToggleMode,
        live: bool,
    ) -> (
        CommandSurface<InMemoryHost, FixedProbe, PermissionTable>,
        InMemoryHost,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigFileStore::new(dir.path().join("online-toggle.toml"));
        let host = InMemoryHost::new(live);
        let config = PersistedConfig {
            enabled,
            toggle_mode: mode,
            delay: 60,
        };
        let engine = ToggleEngine::new(config, host.clone(), store, FixedProbe::new(Reachability::Reachable));
        let surface = CommandSurface::new(engine, PermissionTable::from_operators(&operators()));
        (surface, host, dir)
    }

    #[test]
    fn test_parse_toggle_token() {
        for token in ["true", "YES", "On"] {
            assert_eq!(parse_toggle_token(token), Some(ToggleMode::On));
        }
        for token in ["false", "No", "OFF"] {
            assert_eq!(parse_toggle_token(token), Some(ToggleMode::Off));
        }
        assert_eq!(parse_toggle_token("Dynamic"), Some(ToggleMode::Dynamic));
        assert_eq!(parse_toggle_token("maybe"), None);
        assert_eq!(parse_toggle_token(""), None);
    }

    #[test]
    fn test_permission_table() {
        let table = PermissionTable::from_operators(&operators());
        assert_eq!(table.sender_for_token("viewer-token"), Some("viewer"));
        assert_eq!(table.sender_for_token("nope"), None);
        assert!(table.has_permission("admin", TOGGLE_PERMISSION));
        assert!(!table.has_permission("viewer", TOGGLE_PERMISSION));
        assert!(!table.has_permission("anonymous", CHECK_PERMISSION));
    }

    #[tokio::test]
    async fn test_toggle_without_argument_flips_state() {
        let (surface, host, _dir) = surface(true, ToggleMode::On, true);

        let response = surface.request_toggle("admin", None).await;

        assert!(response.success());
        assert_eq!(
            response.message,
            "Server mode successfully updated to: offline (mode: OFF)"
        );
        assert!(!host.snapshot().live);
        assert_eq!(surface.engine().policy().await, ToggleMode::Off);
    }

    #[tokio::test]
    async fn test_toggle_with_argument() {
        let (surface, host, _dir) = surface(true, ToggleMode::Off, false);

        let response = surface.request_toggle("admin", Some("yes")).await;

        assert_eq!(response.status, CommandStatus::Ok);
        assert!(host.snapshot().live);
    }

    #[tokio::test]
    async fn test_invalid_token_never_reaches_engine() {
        let (surface, host, _dir) = surface(true, ToggleMode::On, false);

        let response = surface.request_toggle("admin", Some("sometimes")).await;

        assert_eq!(response.status, CommandStatus::Rejected);
        assert_eq!(response.message, INVALID_TOKEN);
        assert_eq!(host.snapshot().live_writes, 0);
        assert_eq!(surface.engine().policy().await, ToggleMode::On);
    }

    #[tokio::test]
    async fn test_permissions_are_enforced() {
        let (surface, host, _dir) = surface(true, ToggleMode::On, false);

        let denied = surface.request_toggle("viewer", Some("on")).await;
        assert_eq!(denied.status, CommandStatus::Denied);
        assert_eq!(denied.message, NO_PERMISSION);
        assert_eq!(host.snapshot().live_writes, 0);

        let query = surface.query_mode("viewer").await;
        assert_eq!(query.message, "Online-mode: false");

        let anonymous = surface.query_mode("anonymous").await;
        assert_eq!(anonymous.status, CommandStatus::Denied);
    }

    #[tokio::test]
    async fn test_disabled_engine_rejects_toggles() {
        let (surface, host, _dir) = surface(false, ToggleMode::On, false);

        let response = surface.request_toggle("admin", Some("on")).await;

        assert_eq!(response.status, CommandStatus::Disabled);
        assert_eq!(host.snapshot().live_writes, 0);
        assert!(surface.query_mode("admin").await.success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_without_argument_from_dynamic() {
        let (surface, host, _dir) = surface(true, ToggleMode::Dynamic, false);
        surface.engine().start().await.unwrap();
        assert!(host.snapshot().live);

        host.fail_reads(true);
        let response = surface.request_toggle("admin", None).await;
        assert_eq!(response.status, CommandStatus::Failed);
        assert!(response.message.starts_with("Could not read the current online-mode"));
        assert_eq!(surface.engine().policy().await, ToggleMode::Dynamic);

        host.fail_reads(false);
        let response = surface.request_toggle("admin", None).await;
        assert_eq!(
            response.message,
            "Server mode successfully updated to: offline (mode: OFF)"
        );
        assert!(!host.snapshot().live);
    }

    #[tokio::test]
    async fn test_host_failure_is_reported() {
        let (surface, host, _dir) = surface(true, ToggleMode::On, true);
        host.fail_writes(true);

        let response = surface.request_toggle("admin", Some("off")).await;

        assert_eq!(response.status, CommandStatus::Failed);
        assert!(response.message.starts_with("Failed to set online-mode to offline (mode: OFF)"));
    }
}

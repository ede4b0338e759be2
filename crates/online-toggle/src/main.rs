//! online-toggle daemon: applies the configured policy, keeps DYNAMIC in sync
//! and serves the admin API.

use std::path::PathBuf;
use std::sync::Arc;

use online_toggle::server::{self, AppState};
use online_toggle::store::ConfigFileStore;
use online_toggle::{
    CommandSurface, PermissionTable, PropertiesHost, ReachabilityChecker, ToggleConfig,
    ToggleEngine,
};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path: PathBuf = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("ONLINE_TOGGLE_CONFIG").ok())
        .unwrap_or_else(|| "online-toggle.toml".to_string())
        .into();

    // First start: write the defaults so there is something to edit.
    let store = ConfigFileStore::new(&config_path);
    let created_default = store.ensure_default()?;

    let config = ToggleConfig::load(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = toggle_tracing::init_tracing(&config.tracing);

        if created_default {
            tracing::info!(config_path = %config_path.display(), "Created default config");
        }
        tracing::info!(
            config_path = %config_path.display(),
            enabled = config.enabled,
            toggle_mode = %config.toggle_mode,
            delay_secs = config.delay,
            status_url = %config.status.url,
            otlp_export = tracing_guard.exporting(),
            "Starting online-toggle"
        );

        run(config, store).await
    })
}

async fn run(config: ToggleConfig, store: ConfigFileStore) -> anyhow::Result<()> {
    let host = PropertiesHost::open(&config.host)?;
    let probe = ReachabilityChecker::new(&config.status)?;
    let engine = ToggleEngine::new(config.persisted(), host, store, probe);

    if let Some(report) = engine.start().await {
        if let Err(e) = &report.outcome {
            tracing::warn!(error = %e, policy = %report.policy, "Initial apply failed");
        }
    }

    if config.operators.is_empty() {
        tracing::warn!("No operators configured, every admin API command will be denied");
    }
    let table = PermissionTable::from_operators(&config.operators);

    let state = Arc::new(AppState {
        surface: CommandSurface::new(engine.clone(), table),
    });

    let result = server::run(state, &config.server.listen_address).await;
    engine.shutdown().await;
    result
}

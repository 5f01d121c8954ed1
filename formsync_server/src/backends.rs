//! Wiring of the store, provider client and scheduler into an `AppState`.

use crate::server::AppState;
use formsync_core::{
    FormSyncEngine, SqliteSyncStore, StaticProviderRegistry, SyncConfig, SyncScheduler,
};
use formsync_integrations::HttpProviderClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `FORMSYNC_SQLITE_PATH` wins; otherwise `{data_dir}/formsync.db`.
pub fn sqlite_path(config: &SyncConfig, data_dir: &Path) -> PathBuf {
    config
        .sqlite_path
        .clone()
        .unwrap_or_else(|| data_dir.join("formsync.db"))
}

#[tracing::instrument(level = "info", skip(config))]
pub async fn build_state(config: &SyncConfig, data_dir: &Path) -> anyhow::Result<AppState> {
    let path = sqlite_path(config, data_dir);
    let store = Arc::new(SqliteSyncStore::new(&path).await?);
    tracing::info!(path = %path.display(), "sqlite store opened");

    if config.provider_urls.is_empty() {
        tracing::warn!("no providers configured; every import will fail with not found");
    }
    let registry = StaticProviderRegistry::new(config.provider_urls.clone());
    let client = HttpProviderClient::new(config.provider_timeout)?;

    let engine = FormSyncEngine::new(
        store.clone(),
        store,
        Arc::new(client),
        Arc::new(registry),
        Arc::new(SyncScheduler::new()),
        config,
    );
    Ok(AppState::new(Arc::new(engine)))
}

use crate::config::Config;
use crate::sync_engine::ServerSyncEngine;
use inbetweenies::store::VersionedStore;
use inbetweenies::SqliteVersionedStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VersionedStore>,
    pub sync_engine: Arc<ServerSyncEngine>,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn VersionedStore> = Arc::new(SqliteVersionedStore::connect(&config.database.url).await?);
        let sync_engine = Arc::new(ServerSyncEngine::new(
            store.clone(),
            config.sync.clone(),
            config.server.device_id.clone(),
        ));

        Ok(Self { store, sync_engine, config })
    }
}

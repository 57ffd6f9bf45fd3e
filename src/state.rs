use crate::config::Config;
use crate::db::{SharedStore, Store};
use crate::services::pending::IngestPipeline;
use std::sync::Arc;

pub struct AppState {
    pub store: SharedStore,
    pub config: Config,
    pub pipeline: IngestPipeline,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> SharedState {
    use crate::db::MemoryStore;

    let config = crate::config::test_config();
    let store: SharedStore = Arc::new(MemoryStore::new());
    let pipeline = IngestPipeline::new(store.clone(), None, config.ingest_max_attempts);
    Arc::new(AppState {
        store,
        config,
        pipeline,
    })
}

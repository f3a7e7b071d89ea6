use std::sync::Arc;

use crate::{
    config::Config,
    store::{AirtableStore, RecordStore},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = AirtableStore::new(&config.store, config.retry.clone())?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn with_store(store: Arc<dyn RecordStore>, config: Config) -> Self {
        Self { store, config }
    }
}

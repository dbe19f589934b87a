use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::storage::{SqliteStore, StoreError};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline<SqliteStore>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline<SqliteStore>>) -> Self {
        Self { pipeline }
    }

    /// Run a store query on the blocking pool.
    pub async fn query<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        let store = self.pipeline.store().clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(Error::from)?
            .map_err(Error::from)
    }
}

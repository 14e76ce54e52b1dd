use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    storage::AttachmentStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn AttachmentStorage>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, storage: Arc<dyn AttachmentStorage>) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}

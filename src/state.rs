use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::services::Reconciler;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub reconciler: Arc<Reconciler>,
    pub config: Arc<AppConfig>,
}

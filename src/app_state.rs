use sqlx::PgPool;
use std::sync::Arc;

use crate::services::queue::JobStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jobs: Arc<dyn JobStore>,
}

impl AppState {
    pub fn new(db: PgPool, jobs: impl JobStore + 'static) -> Self {
        Self {
            db,
            jobs: Arc::new(jobs),
        }
    }
}

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::db::{PgTenantRegistry, SchemaWriter};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: AppConfig,
    pub writer: SchemaWriter,
    pub registry: PgTenantRegistry,
    /// Cancelled on shutdown; in-flight imports stop before their next batch.
    pub shutdown: CancellationToken,
}

impl AppState {
    #[must_use]
    pub fn new(db: sqlx::PgPool, config: &AppConfig) -> Self {
        AppState {
            writer: SchemaWriter::new(db.clone()),
            registry: PgTenantRegistry::new(db.clone()),
            db,
            config: config.clone(),
            shutdown: CancellationToken::new(),
        }
    }
}

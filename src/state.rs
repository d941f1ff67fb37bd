use crate::config::Config;
use impose_registry::TaskRegistry;
use impose_scheduler::Pool;
use impose_storage::Storage;
use std::sync::Arc;

/// Shared application state accessible to every handler. Grounded on
/// `pdf_service::state::AppState`, generalized from a single job queue +
/// pipeline manager pair to the task registry / storage / scheduler pool
/// triple this service coordinates.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn TaskRegistry>,
    pub storage: Arc<Storage>,
    pub pool: Arc<Pool>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        storage: Arc<Storage>,
        pool: Arc<Pool>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            storage,
            pool,
            config: Arc::new(config),
        }
    }
}

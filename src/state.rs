use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::SqliteStore;
use crate::services::catalog::ServiceCatalog;
use crate::services::classifier::RuleClassifier;
use crate::services::clock::Clock;
use crate::services::conversation::ConversationOrchestrator;

pub struct AppState {
    pub config: AppConfig,
    pub desk: ConversationOrchestrator,
}

impl AppState {
    /// Wires the orchestrator to one SQLite store that serves as ledger,
    /// booking store and session store.
    pub fn new(config: AppConfig, store: SqliteStore, catalog: ServiceCatalog, clock: Arc<dyn Clock>) -> Self {
        let catalog = Arc::new(catalog);
        let store = Arc::new(store);
        let classifier = Arc::new(RuleClassifier::new(Arc::clone(&catalog)));

        let desk = ConversationOrchestrator::new(catalog, store.clone(), store.clone(), store, classifier, clock)
            .with_clinic_name(config.clinic_name.clone())
            .with_window_days(config.open_slot_window_days);

        Self { config, desk }
    }
}

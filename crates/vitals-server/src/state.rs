use std::sync::Arc;
use vitals_audit::Auditor;
use vitals_storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub auditor: Arc<Auditor>,
}

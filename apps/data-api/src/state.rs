use powersense_ingest::store::Store;

use crate::config::ApiConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Store,
}

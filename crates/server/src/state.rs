use std::sync::Arc;

use geoloop_agent::GeoSession;

/// Largest accepted `/address/batch` request.
pub const MAX_BATCH_ADDRESSES: usize = 10;

pub struct AppState {
    pub session: Arc<GeoSession>,
    pub max_batch: usize,
}

impl AppState {
    pub fn new(session: Arc<GeoSession>) -> Self {
        Self {
            session,
            max_batch: MAX_BATCH_ADDRESSES,
        }
    }
}

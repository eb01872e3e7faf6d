use std::sync::Arc;

use crate::{backend::Backend, services::order_source::OrderSource};

#[derive(Clone)]
pub struct AppState {
    /// Backend handle opened with service-tier credentials.
    pub backend: Arc<dyn Backend>,
    pub order_source: Arc<dyn OrderSource>,
    pub marketplace_id: i64,
}
